//! The template command
//!
//! Generates CloudFormation templates from policy config files: loads and
//! validates each config, expands OUs, plans the template tree, and writes
//! parent and child templates under the output directory.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::aws::orgs::{OrgAccount, OrganizationsApi};
use crate::cfn::config::{validate_config, Config, GenerationConfig};
use crate::cfn::resources::{
    resources_from_config, NameFetchers, OuFetcher, PrincipalKind, ResourceCollection,
};
use crate::cfn::templates::resolve_templates;
use crate::cli::args::TemplateArgs;
use crate::errors::{Result, SsopulseError};
use crate::lookup::ou::{lookup_accounts_for_ou, ExcludeOrgMgmt};
use crate::lookup::{
    lookup_account_by_id, lookup_group_by_id, lookup_permission_set_by_id, lookup_user_by_id, Ids,
    LookupCache,
};

struct OrgsOuFetcher {
    orgs: Arc<dyn OrganizationsApi>,
    cache: LookupCache,
}

#[async_trait]
impl OuFetcher for OrgsOuFetcher {
    async fn accounts(&self, ou: &str, recursive: bool) -> Result<Vec<OrgAccount>> {
        lookup_accounts_for_ou(
            self.orgs.as_ref(),
            ou,
            recursive,
            ExcludeOrgMgmt::No,
            &self.cache,
        )
        .await
    }
}

pub async fn run(args: &TemplateArgs) -> Result<()> {
    let region = args.region.clone().unwrap_or_else(super::default_region);
    let clients = super::admin_clients(&region)?;

    let admin: Arc<dyn crate::aws::admin::SsoAdminApi> = clients.admin.clone();
    let ids = Ids::new(
        admin,
        args.instance_arn.as_deref(),
        args.identity_store_id.as_deref(),
    );
    let instance_arn = ids.instance_arn().await?;

    let mut generation_config = GenerationConfig::default();
    generation_config.set(
        args.max_resources_per_template,
        args.max_concurrent_assignments,
        args.max_assignments_allocation,
        args.num_child_stacks,
        args.default_session_duration.clone(),
        false,
    );

    let orgs: Arc<dyn OrganizationsApi> = clients.orgs.clone();
    let ou_fetcher = OrgsOuFetcher {
        orgs,
        cache: LookupCache::new(),
    };

    for config_path in &args.config {
        generate_for_config(
            config_path,
            &clients,
            &ids,
            &instance_arn,
            &generation_config,
            &ou_fetcher,
            args.lookup_names,
            &args.output_dir,
        )
        .await?;
    }

    Ok(())
}

/// Pre-resolve display names for everything the collection references, so
/// template rendering can stay synchronous.
async fn build_name_fetchers(
    clients: &super::AdminClients,
    ids: &Ids,
    collection: &ResourceCollection,
) -> NameFetchers {
    let cache = LookupCache::new();
    let mut principal_names: HashMap<(String, String), String> = HashMap::new();
    let mut permission_set_names: HashMap<String, String> = HashMap::new();
    let mut target_names: HashMap<String, String> = HashMap::new();

    for assignment in collection.assignments.iter() {
        if let Some(id) = assignment.principal.id.as_str() {
            let key = (
                assignment.principal.kind.as_str().to_string(),
                id.to_string(),
            );
            if !principal_names.contains_key(&key) {
                let name = match assignment.principal.kind {
                    PrincipalKind::Group => {
                        lookup_group_by_id(clients.identity_store.as_ref(), ids, id, &cache)
                            .await
                            .ok()
                            .map(|group| group.display_name)
                    }
                    PrincipalKind::User => {
                        lookup_user_by_id(clients.identity_store.as_ref(), ids, id, &cache)
                            .await
                            .ok()
                            .map(|user| user.user_name)
                    }
                };
                if let Some(name) = name {
                    principal_names.insert(key, name);
                }
            }
        }

        let arn_value = assignment.permission_set.resolve_default();
        if let Some(arn) = arn_value.as_str() {
            if !permission_set_names.contains_key(arn) {
                let name =
                    lookup_permission_set_by_id(clients.admin.as_ref(), ids, arn, &cache)
                        .await
                        .ok()
                        .map(|ps| ps.name);
                if let Some(name) = name {
                    permission_set_names.insert(arn.to_string(), name);
                }
            }
        }

        if let Some(id) = assignment.target.id.as_str() {
            if !target_names.contains_key(id) {
                let name = match &assignment.target.name {
                    Some(name) => Some(name.clone()),
                    None => lookup_account_by_id(clients.orgs.as_ref(), id, &cache)
                        .await
                        .ok()
                        .and_then(|account| account.name),
                };
                if let Some(name) = name {
                    target_names.insert(id.to_string(), name);
                }
            }
        }
    }

    NameFetchers {
        principal: Some(Box::new(move |principal_type, id| {
            principal_names
                .get(&(principal_type.to_string(), id.to_string()))
                .cloned()
        })),
        permission_set: Some(Box::new(move |arn| permission_set_names.get(arn).cloned())),
        target: Some(Box::new(move |_target_type, id| {
            target_names.get(id).cloned()
        })),
    }
}

#[allow(clippy::too_many_arguments)]
async fn generate_for_config(
    config_path: &Path,
    clients: &super::AdminClients,
    ids: &Ids,
    instance_arn: &str,
    generation_config: &GenerationConfig,
    ou_fetcher: &dyn OuFetcher,
    lookup_names: bool,
    output_dir: &Path,
) -> Result<()> {
    tracing::info!(path = %config_path.display(), "Generating templates");

    let content = std::fs::read_to_string(config_path)
        .map_err(|e| SsopulseError::Config(format!("Failed to read {}: {}", config_path.display(), e)))?;
    let document: serde_json::Value = serde_yaml::from_str(&content)
        .map_err(|e| SsopulseError::Config(format!("Invalid config {}: {}", config_path.display(), e)))?;

    let mut config = Config::default();
    config.load(&document)?;
    validate_config(&mut config, instance_arn)?;

    // Generation knobs may also appear in the config document itself
    let mut generation_config = generation_config.clone();
    generation_config.load(&document, false);

    let collection = resources_from_config(&config, None, Some(ou_fetcher)).await?;
    tracing::info!(
        assignments = collection.assignments.len(),
        "Expanded config"
    );

    let fetchers = if lookup_names {
        build_name_fetchers(clients, ids, &collection).await
    } else {
        NameFetchers::default()
    };

    let parent = resolve_templates(
        collection.assignments,
        collection.permission_sets,
        &generation_config,
        0,
    )?;

    let stem = config_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("template");

    let template_collection = parent.render_collection(
        output_dir.to_str().unwrap_or("templates"),
        "",
        stem,
        ".yaml",
        &generation_config,
        &fetchers,
        None,
        None,
        true,
    )?;

    for writable in std::iter::once(&template_collection.parent)
        .chain(template_collection.children.iter())
    {
        let path = Path::new(&writable.path);
        if let Some(parent_dir) = path.parent() {
            std::fs::create_dir_all(parent_dir)?;
        }
        let rendered = serde_yaml::to_string(&writable.template)
            .map_err(|e| SsopulseError::Template(format!("Failed to render template: {}", e)))?;
        std::fs::write(path, rendered)?;
        eprintln!("Wrote {}", path.display());
    }

    Ok(())
}
