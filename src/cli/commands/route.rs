//! Route command implementation.

use super::print_json;
use crate::config::OpsConfig;
use crate::config::routing::{
    extract_prefix, find_town_root, resolve_hook_dir, resolve_storage_dir_bounded,
};
use crate::error::{OpsError, Result};
use crate::ops::Wrapper;
use crate::registry::{BugRegistry, Operation};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct RouteOutput {
    pub id: String,
    pub prefix: String,
    pub from: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub town_root: Option<PathBuf>,
    pub hook_dir: PathBuf,
    pub storage_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationRoute>,
}

/// Where the wrapper runs one operation for this ID.
#[derive(Debug, Serialize)]
pub struct OperationRoute {
    pub name: String,
    pub upstream_fixed: bool,
    pub run_dir: PathBuf,
}

/// Compute the routing for `id` as seen from `from`.
///
/// # Errors
///
/// `BadArgument` for an unknown operation name, `Routing` for an ID without
/// a prefix when an operation is given.
pub fn plan(id: &str, from: &Path, op: Option<&str>, config: &OpsConfig) -> Result<RouteOutput> {
    let town_root = find_town_root(from).ok();
    let hook_dir = town_root
        .as_deref()
        .map_or_else(|| from.to_path_buf(), |town| resolve_hook_dir(town, id, from));
    let storage_dir = resolve_storage_dir_bounded(&hook_dir, config.max_redirect_depth);

    let operation = match op {
        None => None,
        Some(name) => {
            let op = Operation::from_name(name).ok_or_else(|| {
                OpsError::bad_argument("op", format!("unknown operation '{name}'"))
            })?;
            let wrapper = Wrapper::with_config(from, config.clone());
            Some(OperationRoute {
                name: op.as_str().to_string(),
                upstream_fixed: BugRegistry::global().is_fixed_op(op),
                run_dir: wrapper.dir_for(op, id)?,
            })
        }
    };

    Ok(RouteOutput {
        id: id.to_string(),
        prefix: extract_prefix(id).to_string(),
        from: from.to_path_buf(),
        town_root,
        hook_dir,
        storage_dir,
        operation,
    })
}

/// Execute the route command.
///
/// # Errors
///
/// Propagates errors from [`plan`] and output.
pub fn execute(
    id: &str,
    from: Option<&Path>,
    op: Option<&str>,
    json: bool,
    config: &OpsConfig,
) -> Result<()> {
    let from = match from {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let output = plan(id, &from, op, config)?;

    if json {
        return print_json(&output);
    }

    println!("{} -> {}", output.id, output.hook_dir.display());
    println!("  storage: {}", output.storage_dir.display());
    if output.town_root.is_none() {
        println!("  (no town root above {})", output.from.display());
    }
    if let Some(op) = &output.operation {
        let state = if op.upstream_fixed { "fixed upstream" } else { "rerouted" };
        println!("  {}: {} ({state})", op.name, op.run_dir.display());
    }
    Ok(())
}
