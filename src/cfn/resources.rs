//! Assignment and permission-set resource model
//!
//! The building blocks the planner arranges into templates: principals,
//! permission-set slots in their five forms, targets, and the assignment
//! resources binding them together. An assignment's resource name is a pure
//! function of its four components, so duplicates collapse.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::aws::orgs::OrgAccount;
use crate::cfn::config::Config;
use crate::cfn::refs::{get_references, getatt_value, hash_key, is_reference, ref_value};
use crate::errors::{Result, SsopulseError};
use crate::format::instance_id_from_arn;

pub const PERMISSION_SET_RESOURCE_TYPE: &str = "AWS::SSO::PermissionSet";
pub const ASSIGNMENT_RESOURCE_TYPE: &str = "AWS::SSO::Assignment";

const PERMISSION_SET_NAME_PREFIX: &str = "PermSet";
const ASSIGNMENT_NAME_PREFIX: &str = "Assignment";

/// Expands an OU into accounts for the planner.
#[async_trait]
pub trait OuFetcher: Send + Sync {
    async fn accounts(&self, ou: &str, recursive: bool) -> Result<Vec<OrgAccount>>;
}

/// Resolves display names for assignment metadata; all optional.
#[derive(Default)]
pub struct NameFetchers {
    pub principal: Option<Box<dyn Fn(&str, &str) -> Option<String> + Send + Sync>>,
    pub permission_set: Option<Box<dyn Fn(&str) -> Option<String> + Send + Sync>>,
    pub target: Option<Box<dyn Fn(&str, &str) -> Option<String> + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalKind {
    Group,
    User,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::Group => "GROUP",
            PrincipalKind::User => "USER",
        }
    }
}

/// A principal slot; the id may be a literal or a template reference.
#[derive(Debug, Clone)]
pub struct Principal {
    pub kind: PrincipalKind,
    pub id: Value,
}

impl Principal {
    pub fn new(kind: PrincipalKind, id: Value) -> Self {
        Self { kind, id }
    }

    pub fn references(&self) -> BTreeSet<String> {
        get_references(&self.id)
    }

    pub fn hash_key(&self) -> Vec<u8> {
        let mut bytes = self.kind.as_str().as_bytes().to_vec();
        bytes.push(b':');
        bytes.extend(hash_key(&self.id));
        bytes
    }
}

/// The form a permission-set slot arrived in.
#[derive(Debug, Clone)]
pub enum PermissionSetSpec {
    /// A complete ARN
    ArnLiteral(String),
    /// An `ssoins-...`/`ins-...` scoped id, missing only the ARN prefix
    InstanceScopedId(String),
    /// A bare `ps-...` id needing the active instance
    BareId(String),
    /// A template reference to a permission set defined elsewhere
    TemplateRef(Value),
    /// An inline resource definition, emitted into the template
    InlineResource(Value),
}

/// How a permission-set slot should render into a template value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArnMode {
    /// The richest in-template form (`Fn::GetAtt` for inline resources)
    Default,
    /// A plain `Ref`, for values crossing a child-stack boundary
    ForceRef,
    /// The bare name string
    Str,
}

/// A permission-set slot bound to its instance and name prefix.
#[derive(Debug, Clone)]
pub struct PermissionSet {
    spec: PermissionSetSpec,
    instance: Value,
    instance_id: Option<String>,
    resource_name_prefix: Option<String>,
}

impl PermissionSet {
    pub fn new(
        value: Value,
        instance: &Value,
        resource_name_prefix: Option<&str>,
    ) -> Result<Self> {
        let spec = if is_reference(&value) {
            PermissionSetSpec::TemplateRef(value)
        } else if value.is_object() {
            PermissionSetSpec::InlineResource(value)
        } else if let Some(s) = value.as_str() {
            if s.starts_with("arn") {
                PermissionSetSpec::ArnLiteral(s.to_string())
            } else if s.starts_with("ssoins-") || s.starts_with("ins-") {
                PermissionSetSpec::InstanceScopedId(s.to_string())
            } else if s.starts_with("ps-") {
                PermissionSetSpec::BareId(s.to_string())
            } else {
                return Err(SsopulseError::Format(format!(
                    "Invalid permission set id {}",
                    s
                )));
            }
        } else {
            return Err(SsopulseError::Config(format!(
                "Unknown permission set form: {}",
                value
            )));
        };

        let instance_id = instance
            .as_str()
            .map(|arn| instance_id_from_arn(arn).to_string());
        if matches!(spec, PermissionSetSpec::BareId(_)) && instance_id.is_none() {
            return Err(SsopulseError::Config(
                "A bare permission set id requires a literal instance ARN".to_string(),
            ));
        }

        Ok(Self {
            spec,
            instance: instance.clone(),
            instance_id,
            resource_name_prefix: resource_name_prefix.map(str::to_string),
        })
    }

    pub fn spec(&self) -> &PermissionSetSpec {
        &self.spec
    }

    pub fn is_inline_resource(&self) -> bool {
        matches!(self.spec, PermissionSetSpec::InlineResource(_))
    }

    /// Resolve the slot into an ARN or reference in the richest form.
    pub fn resolve_default(&self) -> Value {
        match &self.spec {
            PermissionSetSpec::ArnLiteral(arn) => Value::String(arn.clone()),
            PermissionSetSpec::InstanceScopedId(id) => {
                Value::String(format!("arn:aws:sso:::permissionSet/{}", id))
            }
            PermissionSetSpec::BareId(id) => Value::String(format!(
                "arn:aws:sso:::permissionSet/{}/{}",
                self.instance_id.as_deref().unwrap_or_default(),
                id
            )),
            PermissionSetSpec::TemplateRef(value) => value.clone(),
            PermissionSetSpec::InlineResource(_) => getatt_value(
                &self.resource_name().unwrap_or_default(),
                "PermissionSetArn",
            ),
        }
    }

    /// Resolve the slot in the requested mode.
    pub fn resolve(&self, mode: ArnMode) -> Result<Value> {
        match mode {
            ArnMode::Default => Ok(self.resolve_default()),
            ArnMode::ForceRef => match &self.spec {
                PermissionSetSpec::InlineResource(_) => Ok(ref_value(
                    &self.resource_name().unwrap_or_default(),
                )),
                PermissionSetSpec::TemplateRef(value) => {
                    let references = get_references(value);
                    if references.len() != 1 {
                        return Err(SsopulseError::Template(format!(
                            "Cannot convert to ref: {}",
                            value
                        )));
                    }
                    Ok(ref_value(references.iter().next().unwrap()))
                }
                _ => Ok(self.resolve_default()),
            },
            ArnMode::Str => match &self.spec {
                PermissionSetSpec::InlineResource(_) => {
                    Ok(Value::String(self.resource_name().unwrap_or_default()))
                }
                PermissionSetSpec::TemplateRef(value) => {
                    let references = get_references(value);
                    if references.len() != 1 {
                        return Err(SsopulseError::Template(format!(
                            "Cannot convert to string reference: {}",
                            value
                        )));
                    }
                    Ok(Value::String(references.iter().next().unwrap().clone()))
                }
                _ => Ok(self.resolve_default()),
            },
        }
    }

    pub fn hash_key(&self) -> Vec<u8> {
        hash_key(&self.resolve_default())
    }

    pub fn references(&self) -> BTreeSet<String> {
        let mut references = match &self.spec {
            PermissionSetSpec::TemplateRef(value) => get_references(value),
            PermissionSetSpec::InlineResource(value) => get_references(value),
            _ => BTreeSet::new(),
        };
        if let Some(name) = self.resource_name() {
            references.insert(name);
        }
        references
    }

    fn inline_name(&self) -> Option<String> {
        let PermissionSetSpec::InlineResource(value) = &self.spec else {
            return None;
        };
        let name = if value.get("Type").is_some() {
            value.get("Properties")?.get("Name")?
        } else {
            value.get("Name")?
        };
        name.as_str().map(str::to_string)
    }

    /// The template resource name, for inline-resource slots only.
    pub fn resource_name(&self) -> Option<String> {
        let name = self.inline_name()?;
        let prefix = self.resource_name_prefix.as_deref().unwrap_or_default();
        Some(format!("{}{}{}", prefix, PERMISSION_SET_NAME_PREFIX, name))
    }

    /// The template resource, for inline-resource slots only.
    pub fn resource(&self) -> Option<Value> {
        let PermissionSetSpec::InlineResource(value) = &self.spec else {
            return None;
        };
        if value.get("Type").is_some() {
            return Some(value.clone());
        }
        let mut properties = Map::new();
        if value.get("InstanceArn").is_none() {
            properties.insert("InstanceArn".to_string(), self.instance.clone());
        }
        if let Some(map) = value.as_object() {
            for (key, nested) in map {
                properties.insert(key.clone(), nested.clone());
            }
        }
        Some(json!({
            "Type": PERMISSION_SET_RESOURCE_TYPE,
            "Properties": properties,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Ou,
    Account,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Ou => "AWS_OU",
            TargetKind::Account => "AWS_ACCOUNT",
        }
    }
}

/// A target slot; the id may be a literal or a template reference.
#[derive(Debug, Clone)]
pub struct Target {
    pub kind: TargetKind,
    pub id: Value,
    pub name: Option<String>,
    /// The OU this account was expanded from, if any
    pub source_ou: Option<String>,
}

impl Target {
    pub fn account(id: &str) -> Self {
        Self {
            kind: TargetKind::Account,
            id: Value::String(id.to_string()),
            name: None,
            source_ou: None,
        }
    }

    pub fn references(&self) -> BTreeSet<String> {
        get_references(&self.id)
    }

    pub fn hash_key(&self) -> Vec<u8> {
        let mut bytes = self.kind.as_str().as_bytes().to_vec();
        bytes.push(b':');
        bytes.extend(hash_key(&self.id));
        bytes
    }
}

/// An assignment resource binding principal, permission set, and target.
#[derive(Debug, Clone)]
pub struct AssignmentResource {
    pub instance: Value,
    pub principal: Principal,
    pub permission_set: PermissionSet,
    pub target: Target,
    pub metadata: Option<Map<String, Value>>,
    resource_name_prefix: Option<String>,
}

impl AssignmentResource {
    pub fn new(
        instance: Value,
        principal: Principal,
        permission_set: PermissionSet,
        target: Target,
        metadata: Option<Map<String, Value>>,
        resource_name_prefix: Option<&str>,
    ) -> Self {
        Self {
            instance,
            principal,
            permission_set,
            target,
            metadata,
            resource_name_prefix: resource_name_prefix.map(str::to_string),
        }
    }

    /// The MD5 fingerprint over the four components' hash keys.
    pub fn digest(&self) -> [u8; 16] {
        let mut bytes = hash_key(&self.instance);
        bytes.extend(self.principal.hash_key());
        bytes.extend(self.permission_set.hash_key());
        bytes.extend(self.target.hash_key());
        md5::compute(&bytes).0
    }

    /// `<prefix>Assignment<FINGERPRINT>`, stable across runs.
    pub fn resource_name(&self) -> String {
        let digest = hex::encode(self.digest());
        let prefix = self.resource_name_prefix.as_deref().unwrap_or_default();
        format!(
            "{}{}{}",
            prefix,
            ASSIGNMENT_NAME_PREFIX,
            digest[..6].to_uppercase()
        )
    }

    pub fn references(&self) -> BTreeSet<String> {
        let mut references = get_references(&self.instance);
        references.extend(self.principal.references());
        references.extend(self.permission_set.references());
        references.extend(self.target.references());
        references
    }

    /// Render the template resource.
    ///
    /// Inside a child stack, permission-set values cross the stack boundary
    /// and must degrade to plain `Ref`s.
    pub fn resource(
        &self,
        child_stack: bool,
        depends_on: Option<&str>,
        fetchers: &NameFetchers,
    ) -> Result<Value> {
        let arn_mode = if child_stack {
            ArnMode::ForceRef
        } else {
            ArnMode::Default
        };
        let permission_set_arn = self.permission_set.resolve(arn_mode)?;

        let mut metadata = self.metadata.clone().unwrap_or_default();
        if let Some(source_ou) = &self.target.source_ou {
            metadata.insert("AccountSourceOU".to_string(), json!(source_ou));
        }
        if let (Some(fetcher), Some(principal_id)) =
            (&fetchers.principal, self.principal.id.as_str())
        {
            if let Some(name) = fetcher(self.principal.kind.as_str(), principal_id) {
                metadata.insert("PrincipalName".to_string(), json!(name));
            }
        }
        if let (Some(fetcher), Some(arn)) = (&fetchers.permission_set, permission_set_arn.as_str())
        {
            if let Some(name) = fetcher(arn) {
                metadata.insert("PermissionSetName".to_string(), json!(name));
            }
        }
        if let Some(name) = &self.target.name {
            metadata.insert("TargetName".to_string(), json!(name));
        } else if let (Some(fetcher), Some(target_id)) = (&fetchers.target, self.target.id.as_str())
        {
            if let Some(name) = fetcher(self.target.kind.as_str(), target_id) {
                metadata.insert("TargetName".to_string(), json!(name));
            }
        }

        let mut resource = Map::new();
        resource.insert("Type".to_string(), json!(ASSIGNMENT_RESOURCE_TYPE));
        if !metadata.is_empty() {
            resource.insert("Metadata".to_string(), json!({ "SSO": metadata }));
        }
        if let Some(depends_on) = depends_on {
            resource.insert("DependsOn".to_string(), json!([depends_on]));
        }
        resource.insert(
            "Properties".to_string(),
            json!({
                "InstanceArn": self.instance,
                "PrincipalType": self.principal.kind.as_str(),
                "PrincipalId": self.principal.id,
                "PermissionSetArn": permission_set_arn,
                "TargetType": self.target.kind.as_str(),
                "TargetId": self.target.id,
            }),
        );

        Ok(Value::Object(resource))
    }
}

/// The assignments destined for one template tree.
#[derive(Debug, Clone, Default)]
pub struct AssignmentResources {
    items: Vec<AssignmentResource>,
}

impl AssignmentResources {
    pub fn new(items: Vec<AssignmentResource>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssignmentResource> {
        self.items.iter()
    }

    pub fn num_resources(&self) -> usize {
        self.items.len()
    }

    pub fn references(&self) -> BTreeSet<String> {
        let mut references = BTreeSet::new();
        for item in &self.items {
            references.extend(item.references());
        }
        references
    }

    /// Deterministically allocate assignments to `num` shards by fingerprint.
    pub fn allocate(&self, num: usize) -> Vec<AssignmentResources> {
        let mut shards: Vec<Vec<AssignmentResource>> = (0..num).map(|_| Vec::new()).collect();
        for item in &self.items {
            let digest = item.digest();
            let index = (u128::from_be_bytes(digest) % num as u128) as usize;
            shards[index].push(item.clone());
        }
        shards.into_iter().map(AssignmentResources::new).collect()
    }
}

/// The permission sets declared alongside the assignments.
#[derive(Debug, Clone, Default)]
pub struct PermissionSetResources {
    items: Vec<PermissionSet>,
}

impl PermissionSetResources {
    pub fn new(items: Vec<PermissionSet>) -> Self {
        Self { items }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PermissionSet> {
        self.items.iter()
    }

    /// Only inline-resource slots contribute template resources.
    pub fn num_resources(&self) -> usize {
        self.items.iter().filter(|ps| ps.is_inline_resource()).count()
    }

    pub fn references(&self) -> BTreeSet<String> {
        let mut references = BTreeSet::new();
        for item in &self.items {
            references.extend(item.references());
        }
        references
    }
}

/// The planner's input: total resource count plus both resource lists.
pub struct ResourceCollection {
    pub num_resources: usize,
    pub assignments: AssignmentResources,
    pub permission_sets: PermissionSetResources,
}

/// Expand a validated config into resources.
///
/// The cross product runs principals-outer, permission-sets-middle,
/// targets-inner, with OUs flattened to accounts up front.
pub async fn resources_from_config(
    config: &Config,
    assignment_metadata: Option<Map<String, Value>>,
    ou_fetcher: Option<&dyn OuFetcher>,
) -> Result<ResourceCollection> {
    let instance = config
        .instance
        .clone()
        .ok_or_else(|| SsopulseError::Config("SSO instance is not set on config".to_string()))?;

    let mut metadata = assignment_metadata.unwrap_or_default();
    if let Some(group_name) = &config.assignment_group_name {
        metadata.insert("AssignmentGroupName".to_string(), json!(group_name));
    }
    let metadata = if metadata.is_empty() {
        None
    } else {
        Some(metadata)
    };

    let mut principals = Vec::new();
    for group in &config.groups {
        principals.push(Principal::new(PrincipalKind::Group, group.clone()));
    }
    for user in &config.users {
        principals.push(Principal::new(PrincipalKind::User, user.clone()));
    }

    let mut permission_sets = Vec::new();
    for value in &config.permission_sets {
        permission_sets.push(PermissionSet::new(
            value.clone(),
            &instance,
            config.resource_name_prefix.as_deref(),
        )?);
    }

    if (!config.ous.is_empty() || !config.recursive_ous.is_empty()) && ou_fetcher.is_none() {
        return Err(SsopulseError::Config(
            "OU specified but no OU fetcher provided".to_string(),
        ));
    }

    let mut targets = Vec::new();
    for (ous, recursive) in [(&config.ous, false), (&config.recursive_ous, true)] {
        for ou in ous.iter() {
            tracing::debug!(ou = %ou, recursive, "Translating OU to accounts");
            let accounts = ou_fetcher
                .expect("checked above")
                .accounts(ou, recursive)
                .await?;
            for account in accounts {
                targets.push(Target {
                    kind: TargetKind::Account,
                    id: Value::String(account.id),
                    name: account.name,
                    source_ou: Some(ou.clone()),
                });
            }
        }
    }
    for account in &config.accounts {
        targets.push(Target {
            kind: TargetKind::Account,
            id: account.clone(),
            name: None,
            source_ou: None,
        });
    }

    let mut assignments = Vec::new();
    for principal in &principals {
        for permission_set in &permission_sets {
            for target in &targets {
                assignments.push(AssignmentResource::new(
                    instance.clone(),
                    principal.clone(),
                    permission_set.clone(),
                    target.clone(),
                    metadata.clone(),
                    config.resource_name_prefix.as_deref(),
                ));
            }
        }
    }

    let assignments = AssignmentResources::new(assignments);
    let permission_sets = PermissionSetResources::new(permission_sets);
    let num_resources = assignments.num_resources() + permission_sets.num_resources();

    Ok(ResourceCollection {
        num_resources,
        assignments,
        permission_sets,
    })
}
