//! Path resolution for prefix routing across a town.
//!
//! Pure functions over the on-disk layout; nothing here writes except
//! [`RoutingTable::write`], which only the test environment uses.
//!
//! # Key Artifacts
//!
//! - `.beads/routes.jsonl` - Route entries mapping prefixes to paths
//! - `.beads/redirect` - Names the real storage directory
//! - `mayor/town.json` - Town marker read by the external tool
//!
//! # Resolution Order
//!
//! 1. Extract prefix from bead ID (substring before the first `-`)
//! 2. Find the town root: the nearest ancestor whose `.beads` holds `routes.jsonl`
//! 3. Look the prefix up in the town's routes
//! 4. `path == "."` means the town root itself, otherwise a path under it
//! 5. Storage for any working directory is `<dir>/.beads`, after redirects

use crate::error::{OpsError, Result};
use crate::model::id_prefix;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Name of the storage-marker directory under a working directory.
pub const STORAGE_MARKER: &str = ".beads";
/// Routing table file inside the town's storage marker.
pub const ROUTES_FILE: &str = "routes.jsonl";
/// Redirect file inside a storage marker.
pub const REDIRECT_FILE: &str = "redirect";
/// Redirect chains longer than this are cut off.
pub const DEFAULT_MAX_REDIRECT_DEPTH: usize = 10;

/// A route entry from routes.jsonl.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteEntry {
    /// The prefix to match, with its trailing hyphen (e.g., "gt-").
    pub prefix: String,
    /// Path to the rig, relative to the town root (or ".").
    pub path: String,
}

impl RouteEntry {
    #[must_use]
    pub fn new(prefix: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            path: path.into(),
        }
    }

    /// The prefix without its trailing hyphen.
    #[must_use]
    pub fn bare_prefix(&self) -> &str {
        self.prefix.trim_end_matches('-')
    }

    /// Working directory this route points at.
    #[must_use]
    pub fn resolve(&self, town_root: &Path) -> PathBuf {
        if self.path == "." {
            return town_root.to_path_buf();
        }
        let path = PathBuf::from(&self.path);
        if path.is_absolute() {
            path
        } else {
            town_root.join(path)
        }
    }
}

/// Ordered routing table. Prefixes are treated as unique keys; the first
/// entry for a prefix wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    entries: Vec<RouteEntry>,
}

impl RoutingTable {
    #[must_use]
    pub const fn new(entries: Vec<RouteEntry>) -> Self {
        Self { entries }
    }

    /// Load route entries from a routes.jsonl file.
    ///
    /// Returns an empty table if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(routes_path: &Path) -> Result<Self> {
        if !routes_path.is_file() {
            return Ok(Self::default());
        }

        let file = File::open(routes_path)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            let entry: RouteEntry = serde_json::from_str(&line).map_err(|e| {
                OpsError::Config(format!(
                    "Invalid route at {}:{}: {}",
                    routes_path.display(),
                    line_num + 1,
                    e
                ))
            })?;

            entries.push(entry);
        }

        debug!(
            path = %routes_path.display(),
            count = entries.len(),
            "Loaded routes"
        );

        Ok(Self { entries })
    }

    /// Load the routing table of a town.
    ///
    /// # Errors
    ///
    /// Returns an error if the routes file exists but cannot be parsed.
    pub fn for_town(town_root: &Path) -> Result<Self> {
        Self::load(&routes_path(town_root))
    }

    /// Write the table as JSON lines, preserving order.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, routes_path: &Path) -> Result<()> {
        if let Some(parent) = routes_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(routes_path)?;
        for entry in &self.entries {
            writeln!(file, "{}", serde_json::to_string(entry)?)?;
        }
        Ok(())
    }

    /// Find the entry for a bare prefix (no trailing hyphen).
    #[must_use]
    pub fn lookup(&self, prefix: &str) -> Option<&RouteEntry> {
        if prefix.is_empty() {
            return None;
        }
        self.entries.iter().find(|r| r.bare_prefix() == prefix)
    }

    #[must_use]
    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Path of the routes file for a town root.
#[must_use]
pub fn routes_path(town_root: &Path) -> PathBuf {
    town_root.join(STORAGE_MARKER).join(ROUTES_FILE)
}

/// Extract the routing prefix from a bead ID.
///
/// Returns the empty string when there is no hyphen.
#[must_use]
pub fn extract_prefix(bead_id: &str) -> &str {
    id_prefix(bead_id)
}

/// Find the town root by walking up looking for `.beads/routes.jsonl`.
///
/// # Errors
///
/// Returns `TownRootNotFound` if the filesystem root is reached first.
pub fn find_town_root(start: &Path) -> Result<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        if routes_path(&current).is_file() {
            trace!(town_root = %current.display(), "Found town root");
            return Ok(current);
        }

        if !current.pop() {
            break;
        }
    }

    Err(OpsError::TownRootNotFound {
        start: start.to_path_buf(),
    })
}

/// Read the redirect file if it exists.
///
/// The redirect file contains a single path (relative or absolute) pointing
/// to the actual storage directory. Relative paths resolve against the
/// storage marker's parent.
///
/// Returns `None` if no redirect file exists or it is blank.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_redirect(beads_dir: &Path) -> Result<Option<PathBuf>> {
    let redirect_path = beads_dir.join(REDIRECT_FILE);
    if !redirect_path.is_file() {
        return Ok(None);
    }

    let content = fs::read_to_string(&redirect_path)?;
    let target = content.trim();

    if target.is_empty() {
        warn!(path = %redirect_path.display(), "Empty redirect file");
        return Ok(None);
    }

    let target_path = PathBuf::from(target);
    let resolved = if target_path.is_absolute() {
        target_path
    } else {
        beads_dir.parent().unwrap_or(beads_dir).join(target_path)
    };

    trace!(
        from = %beads_dir.display(),
        to = %resolved.display(),
        "Following redirect"
    );

    Ok(Some(resolved))
}

/// Resolve the storage directory for a working directory.
///
/// Starts at `<work_dir>/.beads` and walks redirect files. Fails open:
/// without a marker the original candidate is returned, and a cycle,
/// unreadable redirect or depth overrun stops at the last good directory.
#[must_use]
pub fn resolve_storage_dir(work_dir: &Path) -> PathBuf {
    resolve_storage_dir_bounded(work_dir, DEFAULT_MAX_REDIRECT_DEPTH)
}

/// [`resolve_storage_dir`] with an explicit chain bound.
#[must_use]
pub fn resolve_storage_dir_bounded(work_dir: &Path, max_depth: usize) -> PathBuf {
    let candidate = work_dir.join(STORAGE_MARKER);
    if !candidate.is_dir() {
        return candidate;
    }

    let mut current = candidate;
    let mut visited = vec![current.clone()];
    for _ in 0..max_depth {
        let next = match read_redirect(&current) {
            Ok(Some(next)) => next,
            Ok(None) => return current,
            Err(e) => {
                warn!(path = %current.display(), error = %e, "Unreadable redirect");
                return current;
            }
        };
        if visited.contains(&next) {
            warn!(
                from = %current.display(),
                to = %next.display(),
                "Redirect cycle; stopping"
            );
            return current;
        }
        visited.push(next.clone());
        current = next;
    }

    warn!(
        path = %current.display(),
        max_depth,
        "Redirect chain exceeded depth limit"
    );
    current
}

/// Map a bead ID to the working directory of its rig.
///
/// Returns `fallback_work_dir` when the ID has no prefix, the prefix has no
/// route, or the routes file is unreadable.
#[must_use]
pub fn resolve_hook_dir(town_root: &Path, bead_id: &str, fallback_work_dir: &Path) -> PathBuf {
    let prefix = extract_prefix(bead_id);
    if prefix.is_empty() {
        return fallback_work_dir.to_path_buf();
    }

    let table = match RoutingTable::for_town(town_root) {
        Ok(table) => table,
        Err(e) => {
            warn!(town_root = %town_root.display(), error = %e, "Cannot read routes");
            return fallback_work_dir.to_path_buf();
        }
    };

    match table.lookup(prefix) {
        Some(route) => {
            let dir = route.resolve(town_root);
            debug!(id = bead_id, prefix, dir = %dir.display(), "Resolved hook dir");
            dir
        }
        None => {
            debug!(id = bead_id, prefix, "No route for prefix");
            fallback_work_dir.to_path_buf()
        }
    }
}
