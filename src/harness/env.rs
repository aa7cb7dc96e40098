//! Hermetic town layout for conformance runs.
//!
//! ```text
//! <tmp>/home/                                  isolated HOME
//! <tmp>/town/mayor/town.json                   town marker
//! <tmp>/town/.beads/routes.jsonl               hq- . / gt- / ap-
//! <tmp>/town/gastown/.beads/redirect           -> mayor/rig/.beads
//! <tmp>/town/gastown/mayor/rig/.beads/         gt storage
//! <tmp>/town/ai_platform/.beads/redirect       -> mayor/rig/.beads
//! <tmp>/town/ai_platform/mayor/rig/.beads/     ap storage
//! ```

use crate::config::routing::{
    REDIRECT_FILE, RouteEntry, RoutingTable, STORAGE_MARKER, routes_path,
};
use crate::config::OpsConfig;
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Town-level prefix; its route is the town root itself.
pub const TOWN_PREFIX: &str = "hq";

/// Rigs in the test town: prefix and directory under the town root.
pub const RIGS: &[(&str, &str)] = &[("gt", "gastown"), ("ap", "ai_platform")];

/// Every prefix the town routes, in routes-file order.
pub const PREFIXES: &[&str] = &[TOWN_PREFIX, "gt", "ap"];

const RIG_CLONE: &str = "mayor/rig";

/// A temporary town: removed when dropped.
#[derive(Debug)]
pub struct TownEnv {
    temp: TempDir,
    town: PathBuf,
    home: PathBuf,
}

impl TownEnv {
    /// Lay out a fresh town under a new temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the layout cannot be written.
    pub fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        let town = temp.path().join("town");
        let home = temp.path().join("home");
        fs::create_dir_all(&home)?;

        let marker_dir = town.join("mayor");
        fs::create_dir_all(&marker_dir)?;
        let marker = serde_json::json!({ "name": "test-town", "version": 1 });
        fs::write(
            marker_dir.join("town.json"),
            serde_json::to_string_pretty(&marker)?,
        )?;

        let mut routes = vec![RouteEntry::new(format!("{TOWN_PREFIX}-"), ".")];
        for (prefix, root) in RIGS {
            let clone = format!("{root}/{RIG_CLONE}");
            fs::create_dir_all(town.join(&clone).join(STORAGE_MARKER))?;
            let rig_marker = town.join(root).join(STORAGE_MARKER);
            fs::create_dir_all(&rig_marker)?;
            fs::write(
                rig_marker.join(REDIRECT_FILE),
                format!("{RIG_CLONE}/{STORAGE_MARKER}\n"),
            )?;
            routes.push(RouteEntry::new(format!("{prefix}-"), clone));
        }
        RoutingTable::new(routes).write(&routes_path(&town))?;

        debug!(town = %town.display(), "Created test town");
        Ok(Self { temp, town, home })
    }

    #[must_use]
    pub fn town_root(&self) -> &Path {
        &self.town
    }

    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Root of the temporary directory holding town and home.
    #[must_use]
    pub fn temp_root(&self) -> &Path {
        self.temp.path()
    }

    /// The rig directory a user works from: holds a redirect, not storage.
    /// The town prefix maps to the town root.
    #[must_use]
    pub fn rig_root(&self, prefix: &str) -> PathBuf {
        rig_name(prefix).map_or_else(|| self.town.clone(), |root| self.town.join(root))
    }

    /// The directory the routes file points at for `prefix`.
    #[must_use]
    pub fn rig_dir(&self, prefix: &str) -> PathBuf {
        rig_name(prefix).map_or_else(
            || self.town.clone(),
            |root| self.town.join(root).join(RIG_CLONE),
        )
    }

    /// Where `prefix`'s data lives once redirects are followed.
    #[must_use]
    pub fn storage_dir(&self, prefix: &str) -> PathBuf {
        self.rig_dir(prefix).join(STORAGE_MARKER)
    }

    /// Configuration isolated to this town: HOME points at the private home.
    /// The binary location and the actor come from the environment, since
    /// `bd` inherits the actor too.
    #[must_use]
    pub fn config(&self) -> OpsConfig {
        let ambient = OpsConfig::from_env();
        let mut config = OpsConfig::default().with_home(&self.home);
        config.bd_binary = ambient.bd_binary;
        config.actor = ambient.actor;
        config
    }
}

fn rig_name(prefix: &str) -> Option<&'static str> {
    let bare = prefix.trim_end_matches('-');
    RIGS.iter()
        .find(|(p, _)| *p == bare)
        .map(|(_, root)| *root)
}
