//! Assignment-group configuration
//!
//! Two loaders feed the same internal `Config`: the free-form policy
//! document and the resource-properties form used by the template
//! transform. Key aliases are centralized in one table; resource-form
//! documents are schema-validated before loading.

use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};

use crate::errors::{Result, SsopulseError};
use crate::format::format_account_id;

/// Key aliases, one row per logical key.
pub const ASSIGNMENT_GROUP_NAME_KEYS: &[&str] = &["AssignmentGroupName"];
pub const NAME_KEYS: &[&str] = &["Name"];
pub const INSTANCE_KEYS: &[&str] = &["Instance", "InstanceArn", "InstanceARN"];
pub const GROUP_KEYS: &[&str] = &["Groups", "Group"];
pub const USER_KEYS: &[&str] = &["Users", "User"];
pub const PRINCIPAL_KEYS: &[&str] = &["Principal", "Principals"];
pub const PRINCIPAL_TYPE_KEYS: &[&str] = &["Type", "PrincipalType"];
pub const PRINCIPAL_ID_KEYS: &[&str] = &["Id", "PrincipalId", "Ids", "PrincipalIds"];
pub const PERMISSION_SET_KEYS: &[&str] = &[
    "PermissionSet",
    "PermissionSetArn",
    "PermissionSets",
    "PermissionSetArns",
];
pub const OU_KEYS: &[&str] = &["OUs", "Ous", "OU", "Ou"];
pub const RECURSIVE_OU_KEYS: &[&str] = &["RecursiveOUs", "RecursiveOus", "RecursiveOU", "RecursiveOu"];
pub const ACCOUNT_KEYS: &[&str] = &["Accounts", "Account"];
pub const TARGET_KEYS: &[&str] = &["Target", "Targets"];
pub const TARGET_TYPE_KEYS: &[&str] = &["Type", "TargetType"];
pub const TARGET_ID_KEYS: &[&str] = &["Id", "TargetId", "Ids", "TargetIds"];

/// Return the first alias present with a non-null value.
fn get_value<'v>(data: &'v Value, keys: &[&str]) -> Option<&'v Value> {
    for key in keys {
        if let Some(value) = data.get(*key) {
            if !value.is_null() {
                return Some(value);
            }
        }
    }
    None
}

/// Like `get_value`, coercing a scalar into a one-element list.
fn get_list(data: &Value, keys: &[&str]) -> Vec<Value> {
    match get_value(data, keys) {
        None => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(value) => vec![value.clone()],
    }
}

fn get_string(data: &Value, keys: &[&str]) -> Option<String> {
    get_value(data, keys).and_then(|v| v.as_str().map(str::to_string))
}

fn get_int(data: &Value, keys: &[&str]) -> Option<i64> {
    get_value(data, keys).and_then(|v| match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

/// Normalize an account target value: numbers and digit strings pad to 12
/// digits; references pass through.
fn normalize_account_value(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::String(format_account_id(&n.to_string())),
        Value::String(s) => Value::String(format_account_id(s)),
        other => other.clone(),
    }
}

/// The internal assignment-group configuration both loaders produce.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// The instance ARN; may be a template reference
    pub instance: Option<Value>,
    pub groups: Vec<Value>,
    pub users: Vec<Value>,
    pub permission_sets: Vec<Value>,
    pub ous: Vec<String>,
    pub recursive_ous: Vec<String>,
    /// Account ids (12-digit normalized) or template references
    pub accounts: Vec<Value>,
    pub assignment_group_name: Option<String>,
    pub resource_name_prefix: Option<String>,
}

impl Config {
    /// Load the free-form policy document.
    pub fn load(&mut self, data: &Value) -> Result<()> {
        self.assignment_group_name = get_string(data, ASSIGNMENT_GROUP_NAME_KEYS);

        if let Some(instance) = get_value(data, INSTANCE_KEYS) {
            self.instance = Some(instance.clone());
        }

        self.groups.extend(get_list(data, GROUP_KEYS));
        self.users.extend(get_list(data, USER_KEYS));

        self.permission_sets.extend(get_list(data, PERMISSION_SET_KEYS));

        for ou in get_list(data, OU_KEYS) {
            match ou.as_str() {
                Some(ou) => self.ous.push(ou.to_string()),
                None => {
                    return Err(SsopulseError::Config(format!("Invalid OU value: {}", ou)))
                }
            }
        }
        for ou in get_list(data, RECURSIVE_OU_KEYS) {
            match ou.as_str() {
                Some(ou) => self.recursive_ous.push(ou.to_string()),
                None => {
                    return Err(SsopulseError::Config(format!("Invalid OU value: {}", ou)))
                }
            }
        }
        for account in get_list(data, ACCOUNT_KEYS) {
            self.accounts.push(normalize_account_value(&account));
        }

        Ok(())
    }

    /// Load the resource-properties form, reducing it to the policy form.
    pub fn load_resource_properties(&mut self, properties: &Value) -> Result<()> {
        let mut data = Map::new();

        if let Some(name) = get_string(properties, NAME_KEYS) {
            data.insert("AssignmentGroupName".to_string(), json!(name));
        }

        if let Some(instance) = get_value(properties, INSTANCE_KEYS) {
            data.insert("Instance".to_string(), instance.clone());
        }

        for principal_entry in get_list(properties, PRINCIPAL_KEYS) {
            let principal_type = get_string(&principal_entry, PRINCIPAL_TYPE_KEYS)
                .ok_or_else(|| {
                    SsopulseError::Config("Principal entry is missing a type".to_string())
                })?;
            let ids = get_list(&principal_entry, PRINCIPAL_ID_KEYS);
            let config_key = match principal_type.to_uppercase().as_str() {
                "GROUP" => "Groups",
                "USER" => "Users",
                other => {
                    return Err(SsopulseError::Config(format!(
                        "Invalid principal type: {}",
                        other
                    )))
                }
            };
            data.entry(config_key.to_string())
                .or_insert_with(|| json!([]))
                .as_array_mut()
                .expect("array entry")
                .extend(ids);
        }

        data.insert(
            "PermissionSets".to_string(),
            Value::Array(get_list(properties, PERMISSION_SET_KEYS)),
        );

        for target_entry in get_list(properties, TARGET_KEYS) {
            let target_type = get_string(&target_entry, TARGET_TYPE_KEYS).ok_or_else(|| {
                SsopulseError::Config("Target entry is missing a type".to_string())
            })?;
            let ids = get_list(&target_entry, TARGET_ID_KEYS);
            let config_key = match target_type.to_uppercase().as_str() {
                "AWS_OU" => {
                    let recursive = target_entry
                        .get("Recursive")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    if recursive {
                        "RecursiveOus"
                    } else {
                        "Ous"
                    }
                }
                "AWS_ACCOUNT" => "Accounts",
                other => {
                    return Err(SsopulseError::Config(format!(
                        "Invalid target type: {}",
                        other
                    )))
                }
            };
            data.entry(config_key.to_string())
                .or_insert_with(|| json!([]))
                .as_array_mut()
                .expect("array entry")
                .extend(ids);
        }

        self.load(&Value::Object(data))
    }
}

static FUNC_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "patternProperties": {
            "Ref|Fn::.*": {},
        },
        "minProperties": 1,
        "maxProperties": 1,
    })
});

fn opt_func(schema: Value) -> Value {
    json!({ "oneOf": [schema, FUNC_SCHEMA.clone()] })
}

fn opt_list(schema: Value, func: bool) -> Value {
    if func {
        json!({
            "oneOf": [
                schema.clone(),
                {
                    "type": "array",
                    "items": { "oneOf": [schema, FUNC_SCHEMA.clone()] },
                },
                FUNC_SCHEMA.clone(),
            ]
        })
    } else {
        json!({
            "oneOf": [
                schema,
                { "type": "array", "items": schema },
            ]
        })
    }
}

/// Schema for the resource-properties form.
pub static RESOURCE_PROPERTY_SCHEMA: Lazy<Value> = Lazy::new(|| {
    let principal_schema = json!({
        "type": "object",
        "patternProperties": {
            "(Principal)?Type": opt_func(json!({
                "type": "string",
                "enum": ["GROUP", "USER"],
            })),
            "(Principal)?Id(s)?": opt_list(json!({"type": "string"}), true),
        }
    });
    let permission_set_schema = opt_func(json!({"type": "string"}));
    let target_schema = json!({
        "type": "object",
        "patternProperties": {
            "(Target)?Type": opt_func(json!({
                "type": "string",
                "enum": ["AWS_OU", "AWS_ACCOUNT"],
            })),
            "(Target)?Id(s)?": opt_list(json!({"type": ["string", "integer"]}), true),
            "Recursive": {"type": "boolean"},
        }
    });
    json!({
        "type": "object",
        "patternProperties": {
            "Name": opt_func(json!({"type": "string"})),
            "Instance(Arn|ARN)?": opt_func(json!({"type": "string"})),
            "Principal(s)?": opt_list(principal_schema, false),
            "PermissionSet(Arn)?(s)?": opt_list(permission_set_schema, false),
            "Target(s)?": opt_list(target_schema, false),
            "UpdateNonce": opt_func(json!({"type": "string"})),
        },
        "additionalProperties": false,
    })
});

/// Reject entries that supply more than one alias of the same logical key.
fn check_exclusive(properties: &Value, keys: &[&str], required: bool, parent: &str) -> Result<()> {
    let found: Vec<&str> = keys
        .iter()
        .filter(|key| properties.get(**key).is_some())
        .copied()
        .collect();
    if found.len() > 1 {
        return Err(SsopulseError::Config(format!(
            "{} must have only one of {}",
            parent,
            found.join(", ")
        )));
    }
    if required && found.is_empty() {
        return Err(SsopulseError::Config(format!(
            "{} must have one of {}",
            parent,
            keys.join(", ")
        )));
    }
    Ok(())
}

/// Schema-validate an assignment-group resource before loading it.
pub fn validate_resource(resource: &Value) -> Result<()> {
    let empty = json!({});
    let properties = resource.get("Properties").unwrap_or(&empty);

    jsonschema::validate(&RESOURCE_PROPERTY_SCHEMA, properties)
        .map_err(|e| SsopulseError::Config(format!("Resource is invalid: {}", e)))?;

    check_exclusive(properties, INSTANCE_KEYS, false, "Resource")?;
    check_exclusive(properties, PRINCIPAL_KEYS, true, "Resource")?;

    for principal_entry in get_list(properties, PRINCIPAL_KEYS) {
        check_exclusive(&principal_entry, PRINCIPAL_TYPE_KEYS, true, "Principal")?;
        check_exclusive(&principal_entry, PRINCIPAL_ID_KEYS, true, "Principal")?;
    }

    check_exclusive(properties, PERMISSION_SET_KEYS, true, "Resource")?;
    check_exclusive(properties, TARGET_KEYS, true, "Resource")?;

    for target_entry in get_list(properties, TARGET_KEYS) {
        check_exclusive(&target_entry, TARGET_TYPE_KEYS, true, "Target")?;
        check_exclusive(&target_entry, TARGET_ID_KEYS, true, "Target")?;
    }

    Ok(())
}

/// Final validation: fill the instance from the active one, require at
/// least one principal, permission set, and target.
pub fn validate_config(config: &mut Config, active_instance_arn: &str) -> Result<()> {
    match &config.instance {
        None => config.instance = Some(json!(active_instance_arn)),
        Some(Value::String(instance)) if instance != active_instance_arn => {
            tracing::warn!(
                configured = %instance,
                active = %active_instance_arn,
                "Config instance does not match the active instance"
            );
        }
        _ => {}
    }

    if config.groups.is_empty() && config.users.is_empty() {
        return Err(SsopulseError::Config("No principals specified".to_string()));
    }
    if config.permission_sets.is_empty() {
        return Err(SsopulseError::Config(
            "No permission sets specified".to_string(),
        ));
    }
    if config.ous.is_empty() && config.recursive_ous.is_empty() && config.accounts.is_empty() {
        return Err(SsopulseError::Config("No targets specified".to_string()));
    }

    Ok(())
}

/// Template-generation knobs, with set-once load semantics.
#[derive(Debug, Clone, Default)]
pub struct GenerationConfig {
    max_resources_per_template: Option<i64>,
    max_concurrent_assignments: Option<i64>,
    max_assignments_allocation: Option<i64>,
    num_child_stacks: Option<i64>,
    default_session_duration: Option<String>,
}

impl GenerationConfig {
    pub const DEFAULT_MAX_RESOURCES_PER_TEMPLATE: usize = 500;
    pub const DEFAULT_MAX_CONCURRENT_ASSIGNMENTS: usize = 20;

    /// Hard cap on resources in any single emitted template.
    pub fn max_resources_per_template(&self) -> usize {
        match self.max_resources_per_template {
            Some(v) if v >= 1 => v as usize,
            _ => Self::DEFAULT_MAX_RESOURCES_PER_TEMPLATE,
        }
    }

    /// Sliding window of in-flight assignments per stack.
    pub fn max_concurrent_assignments(&self) -> usize {
        match self.max_concurrent_assignments {
            Some(v) if v >= 1 => v as usize,
            _ => Self::DEFAULT_MAX_CONCURRENT_ASSIGNMENTS,
        }
    }

    /// The effective child-stack count: the allocation-derived minimum and
    /// the explicit count combine with `max`; `None` means "compute from the
    /// actual resource count".
    pub fn num_child_stacks(&self) -> Option<usize> {
        let from_allocation = match self.max_assignments_allocation {
            Some(v) if v >= 1 => {
                Some((v as usize).div_ceil(self.max_resources_per_template()))
            }
            _ => None,
        };
        let explicit = match self.num_child_stacks {
            Some(v) if v >= 0 => Some(v as usize),
            _ => None,
        };
        match (from_allocation, explicit) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// The child-stack count to budget for, given a resource count.
    pub fn max_number_of_child_stacks(&self, num_resources: usize) -> usize {
        match self.num_child_stacks() {
            Some(n) => n,
            None => num_resources.div_ceil(self.max_resources_per_template()),
        }
    }

    pub fn default_session_duration(&self) -> Option<&str> {
        self.default_session_duration.as_deref()
    }

    /// Set values; without `overwrite`, only fields not yet set change.
    #[allow(clippy::too_many_arguments)]
    pub fn set(
        &mut self,
        max_resources_per_template: Option<i64>,
        max_concurrent_assignments: Option<i64>,
        max_assignments_allocation: Option<i64>,
        num_child_stacks: Option<i64>,
        default_session_duration: Option<String>,
        overwrite: bool,
    ) {
        if self.max_resources_per_template.is_none()
            || (max_resources_per_template.is_some() && overwrite)
        {
            self.max_resources_per_template = max_resources_per_template;
        }
        if self.max_concurrent_assignments.is_none()
            || (max_concurrent_assignments.is_some() && overwrite)
        {
            self.max_concurrent_assignments = max_concurrent_assignments;
        }
        if self.max_assignments_allocation.is_none()
            || (max_assignments_allocation.is_some() && overwrite)
        {
            self.max_assignments_allocation = max_assignments_allocation;
        }
        if self.num_child_stacks.is_none() || (num_child_stacks.is_some() && overwrite) {
            self.num_child_stacks = num_child_stacks;
        }
        if default_session_duration.is_some()
            && (self.default_session_duration.is_none() || overwrite)
        {
            self.default_session_duration = default_session_duration;
        }
    }

    /// Load from a metadata document (e.g. the template's `Metadata.SSO`).
    pub fn load(&mut self, data: &Value, overwrite: bool) {
        self.set(
            get_int(data, &["MaxResourcesPerTemplate"]),
            get_int(data, &["MaxConcurrentAssignments"]),
            get_int(data, &["MaxAssignmentsAllocation"]),
            get_int(data, &["NumChildStacks", "NumChildTemplates"]),
            get_string(data, &["DefaultSessionDuration"]),
            overwrite,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_policy_form_with_aliases() {
        let mut config = Config::default();
        config
            .load(&json!({
                "InstanceARN": "arn:aws:sso:::instance/ssoins-1234567890abcdef",
                "Group": "g-1",
                "Users": ["u-1", "u-2"],
                "PermissionSetArns": ["ps-abc"],
                "OUs": ["ou-ab12-cdef5678"],
                "Accounts": [123, "456"],
            }))
            .unwrap();

        assert!(config.instance.is_some());
        assert_eq!(config.groups, vec![json!("g-1")]);
        assert_eq!(config.users.len(), 2);
        assert_eq!(config.ous, vec!["ou-ab12-cdef5678"]);
        assert_eq!(
            config.accounts,
            vec![json!("000000000123"), json!("000000000456")]
        );
    }

    #[test]
    fn test_load_resource_properties() {
        let mut config = Config::default();
        config
            .load_resource_properties(&json!({
                "Name": "MyGroup",
                "Instance": "arn:aws:sso:::instance/ssoins-1234567890abcdef",
                "Principal": [
                    {"Type": "GROUP", "Id": "g-1"},
                    {"Type": "USER", "Ids": ["u-1"]},
                ],
                "PermissionSets": ["ps-abc"],
                "Target": [
                    {"Type": "AWS_OU", "Id": "ou-ab12-cdef5678", "Recursive": true},
                    {"Type": "AWS_ACCOUNT", "Ids": ["111111111111"]},
                ],
            }))
            .unwrap();

        assert_eq!(config.assignment_group_name.as_deref(), Some("MyGroup"));
        assert_eq!(config.groups, vec![json!("g-1")]);
        assert_eq!(config.users, vec![json!("u-1")]);
        assert_eq!(config.recursive_ous, vec!["ou-ab12-cdef5678"]);
        assert_eq!(config.accounts, vec![json!("111111111111")]);
    }

    #[test]
    fn test_validate_resource_rejects_duplicate_aliases() {
        let resource = json!({
            "Type": "SSOUtil::SSO::AssignmentGroup",
            "Properties": {
                "Instance": "ssoins-1234567890abcdef",
                "InstanceArn": "ssoins-1234567890abcdef",
                "Principal": {"Type": "GROUP", "Id": "g-1"},
                "PermissionSet": "ps-abc",
                "Target": {"Type": "AWS_ACCOUNT", "Id": "111111111111"},
            }
        });
        let err = validate_resource(&resource).unwrap_err();
        assert!(err.to_string().contains("only one of"));
    }

    #[test]
    fn test_validate_resource_requires_principal() {
        let resource = json!({
            "Type": "SSOUtil::SSO::AssignmentGroup",
            "Properties": {
                "PermissionSet": "ps-abc",
                "Target": {"Type": "AWS_ACCOUNT", "Id": "111111111111"},
            }
        });
        let err = validate_resource(&resource).unwrap_err();
        assert!(err.to_string().contains("Principal"));
    }

    #[test]
    fn test_validate_config_fills_instance() {
        let mut config = Config {
            groups: vec![json!("g-1")],
            permission_sets: vec![json!("ps-abc")],
            accounts: vec![json!("111111111111")],
            ..Default::default()
        };
        validate_config(&mut config, "arn:aws:sso:::instance/ssoins-1234567890abcdef").unwrap();
        assert_eq!(
            config.instance,
            Some(json!("arn:aws:sso:::instance/ssoins-1234567890abcdef"))
        );
    }

    #[test]
    fn test_validate_config_requires_all_parts() {
        let mut config = Config::default();
        let err = validate_config(&mut config, "arn").unwrap_err();
        assert!(err.to_string().contains("No principals"));

        config.groups = vec![json!("g-1")];
        let err = validate_config(&mut config, "arn").unwrap_err();
        assert!(err.to_string().contains("No permission sets"));

        config.permission_sets = vec![json!("ps-abc")];
        let err = validate_config(&mut config, "arn").unwrap_err();
        assert!(err.to_string().contains("No targets"));
    }

    #[test]
    fn test_generation_config_defaults() {
        let config = GenerationConfig::default();
        assert_eq!(config.max_resources_per_template(), 500);
        assert_eq!(config.max_concurrent_assignments(), 20);
        assert_eq!(config.num_child_stacks(), None);
        assert_eq!(config.max_number_of_child_stacks(1200), 3);
    }

    #[test]
    fn test_generation_config_allocation_combines_with_explicit() {
        let mut config = GenerationConfig::default();
        // 2600 assignments of future growth at 500 per template → 6 stacks
        config.set(None, None, Some(2600), Some(2), None, false);
        assert_eq!(config.num_child_stacks(), Some(6));

        let mut config = GenerationConfig::default();
        config.set(None, None, Some(900), Some(4), None, false);
        assert_eq!(config.num_child_stacks(), Some(4));
    }

    #[test]
    fn test_generation_config_set_once_semantics() {
        let mut config = GenerationConfig::default();
        config.load(&json!({"MaxResourcesPerTemplate": 100}), false);
        assert_eq!(config.max_resources_per_template(), 100);

        // Without overwrite, an already-set value sticks
        config.load(&json!({"MaxResourcesPerTemplate": 200}), false);
        assert_eq!(config.max_resources_per_template(), 100);

        config.load(&json!({"MaxResourcesPerTemplate": 200}), true);
        assert_eq!(config.max_resources_per_template(), 200);

        // NumChildTemplates is an accepted alias
        config.load(&json!({"NumChildTemplates": 5}), false);
        assert_eq!(config.num_child_stacks(), Some(5));
    }
}
