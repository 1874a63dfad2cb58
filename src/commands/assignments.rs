//! The assignments command
//!
//! Lists account assignments as separator-joined rows, one header line
//! first, in expansion order.

use std::sync::Arc;

use crate::assignments::{
    collect_assignments, normalize_target, PrincipalSpec, ResolverOptions,
};
use crate::cli::args::AssignmentsArgs;
use crate::errors::Result;
use crate::lookup::Ids;

const HEADER: &[&str] = &[
    "instance_arn",
    "principal_type",
    "principal_id",
    "principal_name",
    "permission_set_arn",
    "permission_set_name",
    "target_type",
    "target_id",
    "target_name",
];

pub async fn run(args: &AssignmentsArgs) -> Result<()> {
    let region = args.region.clone().unwrap_or_else(super::default_region);
    let clients = super::admin_clients(&region)?;

    let admin: Arc<dyn crate::aws::admin::SsoAdminApi> = clients.admin.clone();
    let ids = Ids::new(
        admin,
        args.instance_arn.as_deref(),
        args.identity_store_id.as_deref(),
    );

    let mut principals = Vec::new();
    principals.extend(args.group.iter().map(|id| PrincipalSpec::Group(id.clone())));
    principals.extend(args.user.iter().map(|id| PrincipalSpec::User(id.clone())));
    principals.extend(args.principal.iter().map(|id| PrincipalSpec::Any(id.clone())));

    let targets = args
        .target
        .iter()
        .map(|raw| normalize_target(raw))
        .collect::<Result<Vec<_>>>()?;

    let options = ResolverOptions {
        principals: if principals.is_empty() {
            None
        } else {
            Some(principals)
        },
        permission_sets: if args.permission_set.is_empty() {
            None
        } else {
            Some(args.permission_set.clone())
        },
        targets: if targets.is_empty() {
            None
        } else {
            Some(targets)
        },
        get_principal_names: args.lookup_names,
        get_permission_set_names: args.lookup_names,
        get_target_names: args.lookup_names,
        ou_recursive: args.ou_recursive,
        ..Default::default()
    };

    let assignments = collect_assignments(
        clients.admin.as_ref(),
        clients.identity_store.as_ref(),
        clients.orgs.as_ref(),
        &ids,
        &options,
    )
    .await?;

    println!("{}", HEADER.join(&args.separator));
    for assignment in assignments {
        let fields = [
            assignment.instance_arn.as_str(),
            assignment.principal_type.as_str(),
            assignment.principal_id.as_str(),
            assignment.principal_name.as_deref().unwrap_or(""),
            assignment.permission_set_arn.as_str(),
            assignment.permission_set_name.as_deref().unwrap_or(""),
            assignment.target_type.as_str(),
            assignment.target_id.as_str(),
            assignment.target_name.as_deref().unwrap_or(""),
        ];
        println!("{}", fields.join(&args.separator));
    }

    Ok(())
}
