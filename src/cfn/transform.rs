//! Template transform (macro mode)
//!
//! Processes a template that declares the transform: generation parameters
//! load from `Metadata.SSO`, `SSOUtil::SSO::PermissionSet` resources become
//! `AWS::SSO::PermissionSet`, and every `SSOUtil::SSO::AssignmentGroup`
//! resource is replaced with its expansion. Child templates are written to
//! an object store under a timestamped, request-scoped prefix.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cfn::config::{validate_resource, Config, GenerationConfig};
use crate::cfn::resources::{
    resources_from_config, NameFetchers, OuFetcher, ResourceCollection,
    PERMISSION_SET_RESOURCE_TYPE,
};
use crate::cfn::templates::{process_permission_set_resource, resolve_templates};
use crate::errors::{Result, SsopulseError};

pub const TRANSFORM_NAME: &str = "SSOUtil-2020-11-08";
pub const ASSIGNMENT_GROUP_RESOURCE_TYPE: &str = "SSOUtil::SSO::AssignmentGroup";
pub const MACRO_PERMISSION_SET_RESOURCE_TYPE: &str = "SSOUtil::SSO::PermissionSet";

/// The transform invocation event
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroEvent {
    pub request_id: String,
    pub fragment: Value,
    #[serde(default)]
    pub template_parameter_values: Value,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
}

/// The transform response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroOutput {
    pub request_id: String,
    pub status: String,
    pub fragment: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Destination for generated child templates
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn put_object(&self, key: &str, content: &str, content_type: &str) -> Result<()>;
}

/// Handler configuration, typically environment-derived
#[derive(Debug, Clone, Default)]
pub struct MacroSettings {
    pub bucket_base_url: String,
    pub key_prefix: Option<String>,
    pub lookup_names: bool,
    pub child_templates_in_yaml: bool,
}

/// Everything the handler needs beyond the event itself.
pub struct MacroContext<'a> {
    pub instance_arn: String,
    pub ou_fetcher: &'a dyn OuFetcher,
    pub name_fetchers: NameFetchers,
    pub store: &'a dyn TemplateStore,
    pub generation_config: GenerationConfig,
    pub now: DateTime<Utc>,
}

/// True if the template declares this transform.
pub fn is_macro_template(template: &Value) -> bool {
    match template.get("Transform") {
        Some(Value::String(name)) => name == TRANSFORM_NAME,
        Some(Value::Array(names)) => names.iter().any(|n| n.as_str() == Some(TRANSFORM_NAME)),
        _ => false,
    }
}

fn strip_transform(template: &mut Value) {
    let Some(obj) = template.as_object_mut() else {
        return;
    };
    if matches!(obj.get("Transform"), Some(Value::String(name)) if name == TRANSFORM_NAME) {
        obj.shift_remove("Transform");
    } else if let Some(Value::Array(names)) = obj.get_mut("Transform") {
        names.retain(|n| n.as_str() != Some(TRANSFORM_NAME));
    }
}

/// Extract assignment-group resources from the template, returning the
/// stripped base template, the child-stack budget, and each group's
/// expanded resources in template order.
pub async fn process_template(
    template: &Value,
    context: &MacroContext<'_>,
    generation_config: &mut GenerationConfig,
    generation_config_template_priority: bool,
) -> Result<(Value, usize, IndexMap<String, ResourceCollection>)> {
    let mut base_template = template.clone();

    if let Some(metadata) = base_template.get("Metadata").and_then(|m| m.get("SSO")) {
        generation_config.load(metadata, generation_config_template_priority);
    }

    strip_transform(&mut base_template);

    let resources = base_template
        .get_mut("Resources")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| {
            SsopulseError::Template(format!(
                "{} can only be used as a template-level transform",
                TRANSFORM_NAME
            ))
        })?;

    for resource in resources.values_mut() {
        if resource.get("Type").and_then(Value::as_str)
            == Some(MACRO_PERMISSION_SET_RESOURCE_TYPE)
        {
            resource["Type"] = json!(PERMISSION_SET_RESOURCE_TYPE);
        }
    }

    let group_names: Vec<String> = resources
        .iter()
        .filter(|(_, resource)| {
            resource.get("Type").and_then(Value::as_str) == Some(ASSIGNMENT_GROUP_RESOURCE_TYPE)
        })
        .map(|(name, _)| name.clone())
        .collect();
    tracing::debug!(groups = ?group_names, "Found assignment group resources");

    let mut group_resources = IndexMap::new();
    for name in &group_names {
        let resource = resources.shift_remove(name).expect("listed above");
        validate_resource(&resource)?;

        let mut config = Config {
            resource_name_prefix: Some(name.clone()),
            ..Default::default()
        };
        config.load_resource_properties(resource.get("Properties").unwrap_or(&json!({})))?;
        if config.instance.is_none() {
            config.instance = Some(json!(context.instance_arn.clone()));
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("AssignmentGroupResourceName".to_string(), json!(name));

        let collection =
            resources_from_config(&config, Some(metadata), Some(context.ou_fetcher)).await?;
        group_resources.insert(name.clone(), collection);
    }

    let max_stack_resources: usize = group_resources
        .values()
        .map(|collection| generation_config.max_number_of_child_stacks(collection.num_resources))
        .sum();

    Ok((base_template, max_stack_resources, group_resources))
}

/// Process one transform event end to end.
///
/// All failures collapse into a `failure` response with the error message;
/// the transform never panics the host.
pub async fn handle(
    event: &MacroEvent,
    settings: &MacroSettings,
    context: &MacroContext<'_>,
) -> MacroOutput {
    tracing::info!(request_id = %event.request_id, "Processing transform");
    match handle_inner(event, settings, context).await {
        Ok(fragment) => MacroOutput {
            request_id: event.request_id.clone(),
            status: "success".to_string(),
            fragment,
            error_message: None,
        },
        Err(e) => {
            tracing::error!(error = %e, "Transform failed");
            MacroOutput {
                request_id: event.request_id.clone(),
                status: "failure".to_string(),
                fragment: json!({}),
                error_message: Some(e.to_string()),
            }
        }
    }
}

async fn handle_inner(
    event: &MacroEvent,
    settings: &MacroSettings,
    context: &MacroContext<'_>,
) -> Result<Value> {
    let mut generation_config = context.generation_config.clone();

    let (mut output_template, max_stack_resources, group_resources) =
        process_template(&event.fragment, context, &mut generation_config, true).await?;

    let num_assignments: usize = group_resources
        .values()
        .map(|collection| collection.assignments.len())
        .sum();
    tracing::info!(
        assignments = num_assignments,
        groups = group_resources.len(),
        "Generated assignments"
    );

    // Minute-resolution timestamp plus the request id scopes the output
    let mut base_path_parts = vec!["templates".to_string()];
    if let Some(prefix) = &settings.key_prefix {
        if !prefix.is_empty() {
            base_path_parts.push(prefix.clone());
        }
    }
    base_path_parts.push(format!(
        "{}_{}",
        context.now.format("%Y-%m-%dT%H:%M"),
        event.request_id
    ));
    let base_path = base_path_parts.join("/");

    let suffix = if settings.child_templates_in_yaml {
        ".yaml"
    } else {
        ".json"
    };

    let mut children_to_write = Vec::new();

    if group_resources.is_empty() {
        tracing::debug!("No assignment groups, processing permission sets only");
        if let Some(resources) = output_template
            .get_mut("Resources")
            .and_then(Value::as_object_mut)
        {
            for resource in resources.values_mut() {
                if resource.get("Type").and_then(Value::as_str)
                    == Some(PERMISSION_SET_RESOURCE_TYPE)
                {
                    process_permission_set_resource(
                        resource,
                        &generation_config,
                        Some(&context.instance_arn),
                    )?;
                }
            }
        }
    } else {
        for (resource_name, collection) in group_resources {
            let num_parent_resources = output_template
                .get("Resources")
                .and_then(Value::as_object)
                .map(|r| r.len())
                .unwrap_or(0)
                + max_stack_resources;

            let parent_template = resolve_templates(
                collection.assignments,
                collection.permission_sets,
                &generation_config,
                num_parent_resources,
            )?;

            let template_collection = parent_template.render_collection(
                &base_path,
                &format!("{}/{}", settings.bucket_base_url.trim_end_matches('/'), base_path),
                &resource_name,
                suffix,
                &generation_config,
                &context.name_fetchers,
                Some(&output_template),
                None,
                false,
            )?;

            output_template = template_collection.parent.template;
            children_to_write.extend(template_collection.children);
        }
    }

    tracing::info!(count = children_to_write.len(), "Writing child templates");
    for child in children_to_write {
        let (content, content_type) = if settings.child_templates_in_yaml {
            (
                serde_yaml::to_string(&child.template).map_err(|e| {
                    SsopulseError::Template(format!("Failed to render child template: {}", e))
                })?,
                "text/plain",
            )
        } else {
            (
                serde_json::to_string_pretty(&child.template)?,
                "application/json",
            )
        };
        context
            .store
            .put_object(&child.path, &content, content_type)
            .await?;
    }

    Ok(output_template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::orgs::OrgAccount;
    use std::sync::Mutex;

    struct NoOus;

    #[async_trait]
    impl OuFetcher for NoOus {
        async fn accounts(&self, _ou: &str, _recursive: bool) -> Result<Vec<OrgAccount>> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        objects: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl TemplateStore for RecordingStore {
        async fn put_object(&self, key: &str, _content: &str, content_type: &str) -> Result<()> {
            self.objects
                .lock()
                .unwrap()
                .push((key.to_string(), content_type.to_string()));
            Ok(())
        }
    }

    fn context<'a>(store: &'a RecordingStore, ou_fetcher: &'a NoOus) -> MacroContext<'a> {
        MacroContext {
            instance_arn: "arn:aws:sso:::instance/ssoins-1234567890abcdef".to_string(),
            ou_fetcher,
            name_fetchers: NameFetchers::default(),
            store,
            generation_config: GenerationConfig::default(),
            now: DateTime::parse_from_rfc3339("2024-06-01T10:30:45Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    fn macro_template() -> Value {
        json!({
            "Transform": TRANSFORM_NAME,
            "Resources": {
                "MyGroup": {
                    "Type": ASSIGNMENT_GROUP_RESOURCE_TYPE,
                    "Properties": {
                        "Principal": {"Type": "GROUP", "Id": "g-1"},
                        "PermissionSet": "ps-abc",
                        "Target": {"Type": "AWS_ACCOUNT", "Id": "111111111111"},
                    }
                },
                "Keep": {"Type": "AWS::SNS::Topic", "Properties": {}},
            }
        })
    }

    #[test]
    fn test_is_macro_template() {
        assert!(is_macro_template(&macro_template()));
        assert!(is_macro_template(
            &json!({"Transform": [TRANSFORM_NAME, "AWS::Serverless-2016-10-31"]})
        ));
        assert!(!is_macro_template(&json!({"Resources": {}})));
    }

    #[tokio::test]
    async fn test_handle_expands_assignment_group() {
        let store = RecordingStore::default();
        let ou_fetcher = NoOus;
        let context = context(&store, &ou_fetcher);

        let event = MacroEvent {
            request_id: "req-123".to_string(),
            fragment: macro_template(),
            template_parameter_values: json!({}),
            region: None,
            account_id: None,
        };

        let output = handle(&event, &MacroSettings::default(), &context).await;
        assert_eq!(output.status, "success");
        assert_eq!(output.request_id, "req-123");

        let resources = output.fragment["Resources"].as_object().unwrap();
        // The group resource is gone, its expansion and the untouched
        // resource remain, and the transform marker is stripped
        assert!(!resources.contains_key("MyGroup"));
        assert!(resources.contains_key("Keep"));
        assert!(output.fragment.get("Transform").is_none());

        let assignment_names: Vec<&String> = resources
            .keys()
            .filter(|name| name.starts_with("MyGroupAssignment"))
            .collect();
        assert_eq!(assignment_names.len(), 1);
        let assignment = &resources[assignment_names[0]];
        assert_eq!(
            assignment["Metadata"]["SSO"]["AssignmentGroupResourceName"],
            "MyGroup"
        );
    }

    #[tokio::test]
    async fn test_handle_writes_children_under_timestamped_path() {
        let store = RecordingStore::default();
        let ou_fetcher = NoOus;
        let context = context(&store, &ou_fetcher);

        let mut fragment = macro_template();
        fragment["Metadata"] = json!({"SSO": {"NumChildStacks": 2}});

        let event = MacroEvent {
            request_id: "req-456".to_string(),
            fragment,
            template_parameter_values: json!({}),
            region: None,
            account_id: None,
        };

        let settings = MacroSettings {
            bucket_base_url: "https://s3.amazonaws.com/my-bucket".to_string(),
            key_prefix: Some("prefix".to_string()),
            lookup_names: false,
            child_templates_in_yaml: false,
        };

        let output = handle(&event, &settings, &context).await;
        assert_eq!(output.status, "success");

        let objects = store.objects.lock().unwrap();
        // One assignment split over two shards: only one shard is non-empty
        assert!(!objects.is_empty());
        for (key, content_type) in objects.iter() {
            assert!(
                key.starts_with("templates/prefix/2024-06-01T10:30_req-456/"),
                "unexpected key {}",
                key
            );
            assert_eq!(content_type, "application/json");
        }
    }

    #[tokio::test]
    async fn test_handle_failure_reports_error() {
        let store = RecordingStore::default();
        let ou_fetcher = NoOus;
        let context = context(&store, &ou_fetcher);

        // Missing Resources section is a failure, not a panic
        let event = MacroEvent {
            request_id: "req-789".to_string(),
            fragment: json!({"Transform": TRANSFORM_NAME}),
            template_parameter_values: json!({}),
            region: None,
            account_id: None,
        };

        let output = handle(&event, &MacroSettings::default(), &context).await;
        assert_eq!(output.status, "failure");
        assert!(output.error_message.is_some());
    }
}
