//! Template composition
//!
//! Shards assignments into child stacks under the per-template resource
//! cap, wires cross-stack references, and injects the `DependsOn` edges
//! that keep concurrent assignment mutations under the service limit.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

use crate::cfn::config::GenerationConfig;
use crate::cfn::refs::{get_references, getatt_value, ref_value};
use crate::cfn::resources::{
    AssignmentResources, NameFetchers, PermissionSetResources, PERMISSION_SET_RESOURCE_TYPE,
};
use crate::errors::{Result, SsopulseError};

const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// A template plus the path it should be written to.
#[derive(Debug, Clone)]
pub struct WritableTemplate {
    pub path: String,
    pub template: Value,
}

/// The parent template and its children, ready for writing.
#[derive(Debug, Clone)]
pub struct TemplateCollection {
    pub parent: WritableTemplate,
    pub children: Vec<WritableTemplate>,
}

/// True if the name is already defined in the template.
pub fn is_name_in_template(name: &str, template: &Value) -> bool {
    ["Parameters", "Conditions", "Resources"]
        .iter()
        .any(|section| {
            template
                .get(section)
                .and_then(Value::as_object)
                .is_some_and(|map| map.contains_key(name))
        })
}

/// Merge parameters into a template: base-template parameters first, then
/// explicit parameters (with optional defaults), then plain string
/// parameters for every unresolved reference.
pub fn add_parameters_to_template(
    template: &mut Map<String, Value>,
    base_template: Option<&Value>,
    template_parameters: Option<&[(String, Option<Value>)]>,
    references: Option<&BTreeSet<String>>,
) {
    let mut parameters = template
        .get("Parameters")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    if let Some(base_parameters) = base_template
        .and_then(|t| t.get("Parameters"))
        .and_then(Value::as_object)
    {
        for (name, value) in base_parameters {
            parameters.insert(name.clone(), value.clone());
        }
    }

    if let Some(template_parameters) = template_parameters {
        for (name, default) in template_parameters {
            if !parameters.contains_key(name) {
                parameters.insert(name.clone(), json!({"Type": "String"}));
            }
            if let Some(default) = default {
                parameters[name]["Default"] = default.clone();
            }
        }
    }

    if let Some(references) = references {
        let template_value = Value::Object(template.clone());
        for name in references {
            if !is_name_in_template(name, &template_value) && !parameters.contains_key(name) {
                parameters.insert(name.clone(), json!({"Type": "String"}));
            }
        }
    }

    if parameters.is_empty() {
        template.remove("Parameters");
    } else {
        template.insert("Parameters".to_string(), Value::Object(parameters));
    }
}

/// Append assignment resources, chaining each to the one a window earlier.
pub fn add_assignments_to_template(
    template: &mut Map<String, Value>,
    assignments: &AssignmentResources,
    child_stack: bool,
    generation_config: &GenerationConfig,
    fetchers: &NameFetchers,
) -> Result<()> {
    let window = generation_config.max_concurrent_assignments();

    let mut names: Vec<String> = Vec::new();
    let mut rendered: Vec<(String, Value)> = Vec::new();
    for assignment in assignments.iter() {
        let depends_on = if names.len() >= window {
            Some(names[names.len() - window].clone())
        } else {
            None
        };
        let name = assignment.resource_name();
        let resource = assignment.resource(child_stack, depends_on.as_deref(), fetchers)?;
        names.push(name.clone());
        rendered.push((name, resource));
    }

    let mut resources = template
        .get("Resources")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for (name, resource) in rendered {
        resources.insert(name, resource);
    }
    template.insert("Resources".to_string(), Value::Object(resources));
    Ok(())
}

/// One child stack's worth of assignments.
#[derive(Debug, Clone)]
pub struct ChildTemplate {
    pub assignments: AssignmentResources,
}

impl ChildTemplate {
    pub fn references(&self) -> BTreeSet<String> {
        self.assignments.references()
    }

    /// Render the child template; an empty shard renders to `None`.
    pub fn template(
        &self,
        generation_config: &GenerationConfig,
        fetchers: &NameFetchers,
    ) -> Result<Option<Value>> {
        if self.assignments.is_empty() {
            return Ok(None);
        }

        let mut template = Map::new();
        template.insert(
            "AWSTemplateFormatVersion".to_string(),
            json!(TEMPLATE_FORMAT_VERSION),
        );
        add_parameters_to_template(&mut template, None, None, Some(&self.references()));
        add_assignments_to_template(
            &mut template,
            &self.assignments,
            true,
            generation_config,
            fetchers,
        )?;

        Ok(Some(Value::Object(template)))
    }
}

/// The planned parent template: its own assignments (inline mode), the
/// permission sets (always parent-resident), and the child shards.
#[derive(Debug)]
pub struct ParentTemplate {
    pub assignments: AssignmentResources,
    pub permission_sets: PermissionSetResources,
    pub child_templates: Vec<ChildTemplate>,
}

struct ChildData {
    path_for_writing: String,
    path_for_resource: String,
    stem: String,
    template: Option<Value>,
}

impl ParentTemplate {
    /// Render parent and child templates with their write paths.
    #[allow(clippy::too_many_arguments)]
    pub fn render_collection(
        &self,
        base_path: &str,
        child_base_path_for_resource: &str,
        stem: &str,
        template_file_suffix: &str,
        generation_config: &GenerationConfig,
        fetchers: &NameFetchers,
        base_template: Option<&Value>,
        parameters: Option<&[(String, Option<Value>)]>,
        child_templates_in_subdir: bool,
    ) -> Result<TemplateCollection> {
        let join = |base: &str, part: &str| {
            if base.is_empty() {
                part.to_string()
            } else {
                format!("{}/{}", base.trim_end_matches('/'), part)
            }
        };

        let mut children = Vec::new();
        for (i, child) in self.child_templates.iter().enumerate() {
            let mut path_for_writing = base_path.to_string();
            let mut path_for_resource = child_base_path_for_resource.to_string();
            if child_templates_in_subdir {
                path_for_writing = join(&path_for_writing, stem);
                path_for_resource = join(&path_for_resource, stem);
            }
            let child_stem = format!("{}-{:03}", stem, i);
            let file_name = format!("{}{}", child_stem, template_file_suffix);
            children.push(ChildData {
                path_for_writing: join(&path_for_writing, &file_name),
                path_for_resource: join(&path_for_resource, &file_name),
                stem: child_stem,
                template: child.template(generation_config, fetchers)?,
            });
        }

        let parent_path = join(base_path, &format!("{}{}", stem, template_file_suffix));
        let parent_template = self.render(
            generation_config,
            fetchers,
            &children,
            base_template,
            parameters,
        )?;

        Ok(TemplateCollection {
            parent: WritableTemplate {
                path: parent_path,
                template: parent_template,
            },
            children: children
                .into_iter()
                .filter_map(|c| {
                    c.template.map(|template| WritableTemplate {
                        path: c.path_for_writing,
                        template,
                    })
                })
                .collect(),
        })
    }

    fn render(
        &self,
        generation_config: &GenerationConfig,
        fetchers: &NameFetchers,
        children: &[ChildData],
        base_template: Option<&Value>,
        parameters: Option<&[(String, Option<Value>)]>,
    ) -> Result<Value> {
        let mut template = Map::new();
        template.insert(
            "AWSTemplateFormatVersion".to_string(),
            json!(TEMPLATE_FORMAT_VERSION),
        );

        let mut references = BTreeSet::new();
        for child in &self.child_templates {
            references.extend(child.references());
        }
        references.extend(self.assignments.references());

        // Permission sets resolve in the parent, not as parameters
        for permission_set in self.permission_sets.iter() {
            if let Some(name) = permission_set.resource_name() {
                references.remove(&name);
            }
        }

        if let Some(base) = base_template {
            references.retain(|name| !is_name_in_template(name, base));
        }

        add_parameters_to_template(&mut template, base_template, parameters, Some(&references));

        if let Some(base) = base_template.and_then(Value::as_object) {
            for (key, value) in base {
                if key == "AWSTemplateFormatVersion" || key == "Parameters" {
                    continue;
                }
                template.insert(key.clone(), value.clone());
            }
        }

        let mut resources = template
            .get("Resources")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        for permission_set in self.permission_sets.iter() {
            let Some(resource_name) = permission_set.resource_name() else {
                continue;
            };
            let resource = permission_set.resource().expect("inline resource");
            // A resource whose properties reference itself can never resolve
            if get_references(&resource).contains(&resource_name) {
                return Err(SsopulseError::Template(format!(
                    "Permission set resource {} references itself",
                    resource_name
                )));
            }
            resources.insert(resource_name, resource);
        }
        template.insert("Resources".to_string(), Value::Object(resources));

        if !self.assignments.is_empty() {
            add_assignments_to_template(
                &mut template,
                &self.assignments,
                false,
                generation_config,
                fetchers,
            )?;
        }

        let get_reference = |name: &str, resources: &Map<String, Value>| -> Value {
            if let Some(resource) = resources.get(name) {
                if resource.get("Type").and_then(Value::as_str)
                    == Some(PERMISSION_SET_RESOURCE_TYPE)
                {
                    return getatt_value(name, "PermissionSetArn");
                }
            }
            ref_value(name)
        };

        let mut resources = template
            .get("Resources")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut previous_child: Option<String> = None;
        for child in children {
            let Some(child_template) = &child.template else {
                continue;
            };
            let resource_name: String = child
                .stem
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .collect();

            let mut resource = Map::new();
            resource.insert("Type".to_string(), json!("AWS::CloudFormation::Stack"));
            if let Some(previous) = &previous_child {
                resource.insert("DependsOn".to_string(), json!([previous]));
            }
            let mut properties = Map::new();
            properties.insert(
                "TemplateURL".to_string(),
                json!(child.path_for_resource),
            );
            if let Some(child_parameters) = child_template
                .get("Parameters")
                .and_then(Value::as_object)
            {
                if !child_parameters.is_empty() {
                    let mut parameter_values = Map::new();
                    for name in child_parameters.keys() {
                        parameter_values.insert(name.clone(), get_reference(name, &resources));
                    }
                    properties.insert("Parameters".to_string(), Value::Object(parameter_values));
                }
            }
            resource.insert("Properties".to_string(), Value::Object(properties));

            resources.insert(resource_name.clone(), Value::Object(resource));
            previous_child = Some(resource_name);
        }

        for resource in resources.values_mut() {
            if resource.get("Type").and_then(Value::as_str) == Some(PERMISSION_SET_RESOURCE_TYPE) {
                process_permission_set_resource(resource, generation_config, None)?;
            }
        }
        template.insert("Resources".to_string(), Value::Object(resources));

        Ok(Value::Object(template))
    }
}

/// Decide the template layout for the given resources.
pub fn resolve_templates(
    assignments: AssignmentResources,
    permission_sets: PermissionSetResources,
    generation_config: &GenerationConfig,
    num_parent_resources: usize,
) -> Result<ParentTemplate> {
    let num_child_stacks = generation_config.num_child_stacks();
    let max_resources = generation_config.max_resources_per_template();
    let num_resources_to_add = assignments.num_resources() + permission_sets.num_resources();
    let too_many_for_parent = num_resources_to_add + num_parent_resources > max_resources;

    let (parent_assignments, child_templates) = match num_child_stacks {
        None => {
            if too_many_for_parent {
                return Err(SsopulseError::Template(format!(
                    "Too many assignments ({}) to fit into template, specify a number of child stacks",
                    assignments.len()
                )));
            }
            (assignments, Vec::new())
        }
        Some(0) => {
            if too_many_for_parent {
                return Err(SsopulseError::Template(format!(
                    "Too many resources ({}) to fit into template",
                    num_resources_to_add
                )));
            }
            (assignments, Vec::new())
        }
        Some(num) => {
            if num * max_resources < assignments.len() {
                return Err(SsopulseError::Template(format!(
                    "Too many assignments ({}) to fit into {} child templates",
                    assignments.len(),
                    num
                )));
            }
            let children = assignments
                .allocate(num)
                .into_iter()
                .map(|shard| ChildTemplate { assignments: shard })
                .collect();
            (AssignmentResources::default(), children)
        }
    };

    if permission_sets.num_resources() > 0
        && permission_sets.num_resources() + num_parent_resources > max_resources
    {
        return Err(SsopulseError::Template(format!(
            "Too many permission sets ({}) to fit into template",
            permission_sets.num_resources()
        )));
    }

    Ok(ParentTemplate {
        assignments: parent_assignments,
        permission_sets,
        child_templates,
    })
}

fn format_managed_policy(policy: &Value) -> Value {
    match policy.as_str() {
        Some(s) if !s.starts_with("arn:") => {
            Value::String(format!("arn:aws:iam::aws:policy/{}", s))
        }
        _ => policy.clone(),
    }
}

/// Post-process a permission-set resource: inject the instance ARN and
/// default session duration when absent, stringify structured inline
/// policies, and expand bare managed-policy names to full ARNs.
pub fn process_permission_set_resource(
    resource: &mut Value,
    generation_config: &GenerationConfig,
    instance_arn: Option<&str>,
) -> Result<()> {
    let Some(properties) = resource
        .get_mut("Properties")
        .and_then(Value::as_object_mut)
    else {
        return Ok(());
    };

    if let Some(duration) = generation_config.default_session_duration() {
        if !properties.contains_key("SessionDuration") {
            properties.insert("SessionDuration".to_string(), json!(duration));
        }
    }

    if let Some(inline_policy) = properties.get("InlinePolicy") {
        if !inline_policy.is_string() && !crate::cfn::refs::is_reference(inline_policy) {
            let serialized = serde_json::to_string(inline_policy)?;
            properties.insert("InlinePolicy".to_string(), json!(serialized));
        }
    }

    if !properties.contains_key("InstanceArn") {
        if let Some(instance_arn) = instance_arn {
            properties.insert("InstanceArn".to_string(), json!(instance_arn));
        }
    }

    if let Some(managed_policies) = properties.get("ManagedPolicies") {
        let normalized = match managed_policies {
            Value::Array(items) => Value::Array(items.iter().map(format_managed_policy).collect()),
            other => json!([format_managed_policy(other)]),
        };
        properties.insert("ManagedPolicies".to_string(), normalized);
    }

    Ok(())
}
