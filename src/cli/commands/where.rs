//! Where command implementation.

use super::print_json;
use crate::config::OpsConfig;
use crate::config::routing::{
    RoutingTable, STORAGE_MARKER, find_town_root, resolve_storage_dir_bounded,
};
use crate::error::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct WhereOutput {
    pub work_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirected_from: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub town_root: Option<PathBuf>,
    /// Prefix whose route points at this directory, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Resolve where `bd` would keep data when run from `work_dir`.
#[must_use]
pub fn locate(work_dir: &Path, config: &OpsConfig) -> WhereOutput {
    let storage_dir = resolve_storage_dir_bounded(work_dir, config.max_redirect_depth);
    let direct = work_dir.join(STORAGE_MARKER);
    let redirected_from = (storage_dir != direct).then_some(direct);
    let town_root = find_town_root(work_dir).ok();
    let prefix = town_root
        .as_deref()
        .and_then(|town| routed_prefix(town, work_dir, &storage_dir));

    WhereOutput {
        work_dir: work_dir.to_path_buf(),
        exists: storage_dir.is_dir(),
        storage_dir,
        redirected_from,
        town_root,
        prefix,
    }
}

fn routed_prefix(town: &Path, work_dir: &Path, storage_dir: &Path) -> Option<String> {
    let table = RoutingTable::for_town(town).ok()?;
    table
        .entries()
        .iter()
        .find(|route| {
            let dir = route.resolve(town);
            dir == work_dir || dir.join(STORAGE_MARKER) == storage_dir
        })
        .map(|route| route.bare_prefix().to_string())
}

/// Execute the where command.
///
/// # Errors
///
/// Returns an error if the current directory is unavailable or JSON
/// serialization fails.
pub fn execute(dir: Option<&Path>, json: bool, config: &OpsConfig) -> Result<()> {
    let work_dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let output = locate(&work_dir, config);

    if json {
        return print_json(&output);
    }

    println!("{}", output.storage_dir.display());
    if let Some(origin) = &output.redirected_from {
        println!("  (via redirect from {})", origin.display());
    }
    if !output.exists {
        println!("  (missing: run `bd init` here)");
    }
    if let Some(prefix) = &output.prefix {
        println!("  prefix: {prefix}");
    }
    match &output.town_root {
        Some(town) => println!("  town: {}", town.display()),
        None => println!("  town: (none)"),
    }
    Ok(())
}
