//! The operations surface shared by every implementation.
//!
//! [`Ops`] enumerates everything a caller can ask of the issue tracker. Three
//! implementations satisfy it:
//!
//! - [`Double`] - in-memory model of the tracker's observable behavior
//! - [`Wrapper`] - shells out to `bd`, routing around known upstream bugs
//! - [`RawWrapper`] - shells out to `bd` with no workarounds (diagnostic)
//!
//! Test code that needs to steer the in-memory model reaches it through
//! [`Ops::double_control`] instead of downcasting.

pub mod bd;
pub mod double;

pub use bd::{BdCli, Production, Raw, RawWrapper, Workarounds, Wrapper};
pub use double::Double;

use crate::error::{OpsError, Result};
use crate::model::{
    Comment, DaemonHealth, DaemonStatus, Formula, Gate, GateCheck, Issue, MergeSlotStatus,
    MolCurrent, MoleculeProto, Priority, Slots, Stats, StatusFilter, Swarm, SwarmStatus,
    SwarmValidation, SyncStatus, WispGcResult,
};
use std::path::{Path, PathBuf};

/// Role types accepted on agent beads.
pub const ROLE_TYPES: &[&str] = &[
    "mayor", "deacon", "witness", "refinery", "polecat", "crew", "dog",
];

/// Agent states accepted by [`Ops::agent_state`].
pub const AGENT_STATES: &[&str] = &[
    "idle", "spawning", "running", "working", "stuck", "done", "stopped", "dead",
];

/// Named agent slots.
pub const SLOT_NAMES: &[&str] = &["hook", "role"];

/// Filters for [`Ops::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub status: StatusFilter,
    pub issue_type: Option<String>,
    pub label: Option<String>,
    pub assignee: Option<String>,
    pub parent: Option<String>,
    /// Zero means unlimited.
    pub limit: usize,
}

impl ListOptions {
    #[must_use]
    pub fn all() -> Self {
        Self {
            status: StatusFilter::All,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_status(status: StatusFilter) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}

/// Fields for [`Ops::create`] and [`Ops::create_with_id`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    pub title: String,
    pub description: Option<String>,
    pub issue_type: Option<String>,
    /// Raw priority; validated to 0-4.
    pub priority: Option<i32>,
    pub parent: Option<String>,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    /// Created-by; falls back to the configured actor.
    pub actor: Option<String>,
    pub ephemeral: bool,
    pub role_type: Option<String>,
    /// Target database. For `create_with_id` it must match the ID's prefix.
    pub prefix: Option<String>,
}

impl CreateOptions {
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn issue_type(mut self, issue_type: impl Into<String>) -> Self {
        self.issue_type = Some(issue_type.into());
        self
    }

    #[must_use]
    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Check the documented input constraints.
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` for an empty title, an out-of-range priority or
    /// an unknown role type.
    pub fn validate(&self) -> Result<Option<Priority>> {
        if self.title.trim().is_empty() {
            return Err(OpsError::bad_argument("title", "cannot be empty"));
        }
        if let Some(role) = self.role_type.as_deref() {
            validate_member("role_type", role, ROLE_TYPES)?;
        }
        self.priority.map(Priority::new).transpose()
    }
}

/// Changes applied by [`Ops::update`]. `None` leaves a field alone.
///
/// Label edits apply in order: `set_labels`, then `add_labels`, then
/// `remove_labels`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<i32>,
    /// `Some("")` clears the assignee.
    pub assignee: Option<String>,
    pub parent: Option<String>,
    pub add_labels: Vec<String>,
    pub remove_labels: Vec<String>,
    pub set_labels: Option<Vec<String>>,
}

impl UpdateOptions {
    /// # Errors
    ///
    /// Returns `BadArgument` for an empty title, unknown status or
    /// out-of-range priority.
    pub fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(OpsError::bad_argument("title", "cannot be empty"));
            }
        }
        if let Some(status) = &self.status {
            status.parse::<crate::model::Status>()?;
        }
        if let Some(priority) = self.priority {
            Priority::new(priority)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseOptions {
    pub reason: Option<String>,
    pub force: bool,
    /// Overrides the configured session identifier.
    pub session: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub force: bool,
    /// Remove the issue outright instead of leaving a tombstone.
    pub hard: bool,
    /// Also delete issues that depend on the deleted ones.
    pub cascade: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub status: Option<StatusFilter>,
    pub issue_type: Option<String>,
    /// Zero means unlimited.
    pub limit: usize,
}

/// Check that `value` is one of `allowed`.
///
/// # Errors
///
/// Returns `BadArgument` naming `field` otherwise.
pub fn validate_member(field: &str, value: &str, allowed: &[&str]) -> Result<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(OpsError::bad_argument(
            field,
            format!("'{value}' is not one of {}", allowed.join(", ")),
        ))
    }
}

/// The full issue-tracker capability surface.
///
/// Every method is linearizable within one handle. Methods taking a bead ID
/// act on the database the ID's prefix names, wherever the handle is
/// pointed; the rest act on the handle's current database.
pub trait Ops: Send + Sync {
    // Issue CRUD

    fn list(&self, opts: &ListOptions) -> Result<Vec<Issue>>;

    /// # Errors
    ///
    /// `NotFound` when the ID does not exist or was deleted.
    fn show(&self, id: &str) -> Result<Issue>;

    /// Found issues in request order; unknown IDs are skipped.
    fn show_multiple(&self, ids: &[&str]) -> Result<Vec<Issue>>;

    fn create(&self, opts: &CreateOptions) -> Result<Issue>;

    /// # Errors
    ///
    /// `Routing` when `opts.prefix` disagrees with the ID's prefix.
    fn create_with_id(&self, id: &str, opts: &CreateOptions) -> Result<Issue>;

    fn update(&self, id: &str, opts: &UpdateOptions) -> Result<()>;

    /// Close issues. Closing a closed issue is a no-op.
    fn close(&self, ids: &[&str]) -> Result<()>;

    fn close_with_reason(&self, reason: &str, ids: &[&str]) -> Result<()>;

    fn close_with_options(&self, opts: &CloseOptions, ids: &[&str]) -> Result<()>;

    fn delete(&self, ids: &[&str]) -> Result<()>;

    fn delete_with_options(&self, opts: &DeleteOptions, ids: &[&str]) -> Result<()>;

    fn reopen(&self, id: &str) -> Result<()>;

    /// Return an issue to the pool: status open, no assignee.
    fn release(&self, id: &str) -> Result<()>;

    // Dependencies

    /// Unblocked open issues, priority descending then oldest first.
    fn ready(&self) -> Result<Vec<Issue>>;

    /// `limit` zero means unlimited.
    fn ready_with_label(&self, label: &str, limit: usize) -> Result<Vec<Issue>>;

    fn blocked(&self) -> Result<Vec<Issue>>;

    /// Add a `blocks` edge: `issue` waits on `depends_on`.
    fn add_dependency(&self, issue: &str, depends_on: &str) -> Result<()>;

    fn add_dependency_with_type(&self, issue: &str, depends_on: &str, dep_type: &str)
    -> Result<()>;

    fn remove_dependency(&self, issue: &str, depends_on: &str) -> Result<()>;

    // Sync

    fn sync(&self) -> Result<()>;
    fn sync_from_main(&self) -> Result<()>;
    fn sync_import_only(&self) -> Result<()>;
    fn get_sync_status(&self) -> Result<SyncStatus>;

    // Config & lifecycle

    /// Missing keys read as the empty string.
    fn config_get(&self, key: &str) -> Result<String>;
    fn config_set(&self, key: &str, value: &str) -> Result<()>;
    fn init(&self, prefix: &str) -> Result<()>;
    fn migrate(&self) -> Result<()>;

    // Daemon

    fn daemon_start(&self) -> Result<()>;
    fn daemon_stop(&self) -> Result<()>;
    fn daemon_status(&self) -> Result<DaemonStatus>;
    fn daemon_health(&self) -> Result<DaemonHealth>;

    // Molecules

    /// Cook every known formula that has no prototype yet.
    fn mol_seed(&self) -> Result<()>;
    fn mol_current(&self, molecule_id: &str) -> Result<MolCurrent>;
    fn mol_catalog(&self) -> Result<Vec<MoleculeProto>>;
    fn wisp_create(&self, proto_id: &str, actor: &str) -> Result<Issue>;
    fn wisp_list(&self, all: bool) -> Result<Vec<Issue>>;
    fn wisp_gc(&self) -> Result<WispGcResult>;
    /// Attach `bead_id` to a molecule with a non-blocking `bonded` edge.
    fn mol_bond(&self, molecule_id: &str, bead_id: &str) -> Result<()>;
    fn mol_burn(&self, ids: &[&str]) -> Result<()>;

    // Gates

    fn gate_create(&self, title: &str, await_id: Option<&str>) -> Result<Gate>;
    fn gate_show(&self, id: &str) -> Result<Gate>;
    /// Non-blocking: returns at once, registering `waiter` on a closed gate.
    fn gate_wait(&self, id: &str, waiter: &str) -> Result<()>;
    /// `all == false` lists only closed (pending) gates.
    fn gate_list(&self, all: bool) -> Result<Vec<Gate>>;
    fn gate_resolve(&self, id: &str) -> Result<()>;
    fn gate_add_waiter(&self, id: &str, waiter: &str) -> Result<()>;
    fn gate_check(&self) -> Result<GateCheck>;

    // Swarms

    fn swarm_status(&self, swarm_id: &str) -> Result<SwarmStatus>;
    fn swarm_create(&self, epic_id: &str, coordinator: Option<&str>) -> Result<Swarm>;
    fn swarm_list(&self) -> Result<Vec<Swarm>>;
    fn swarm_validate(&self, epic_id: &str) -> Result<SwarmValidation>;

    // Formulas

    fn formula_show(&self, name: &str) -> Result<Formula>;
    fn formula_list(&self) -> Result<Vec<Formula>>;
    /// Turn a formula into the molecule prototype `mol-<name>`.
    fn cook(&self, name: &str) -> Result<MoleculeProto>;
    fn formula_leg_add(&self, formula: &str, leg_id: &str, title: &str) -> Result<()>;

    // Labels, slots, agents

    fn label_add(&self, id: &str, label: &str) -> Result<()>;
    fn label_remove(&self, id: &str, label: &str) -> Result<()>;
    fn agent_state(&self, id: &str, state: &str) -> Result<()>;
    fn slot_show(&self, id: &str) -> Result<Slots>;
    fn slot_set(&self, id: &str, slot: &str, bead_id: &str) -> Result<()>;
    fn slot_clear(&self, id: &str, slot: &str) -> Result<()>;

    // Merge slot

    /// Create the database's merge slot; returns its ID.
    fn merge_slot_create(&self) -> Result<String>;
    fn merge_slot_check(&self) -> Result<MergeSlotStatus>;
    /// Take the slot, or queue as a waiter when `wait` is set and it is held.
    fn merge_slot_acquire(&self, holder: &str, wait: bool) -> Result<MergeSlotStatus>;
    fn merge_slot_release(&self, holder: &str) -> Result<()>;

    // Comments, search, housekeeping

    fn comment(&self, id: &str, text: &str) -> Result<Comment>;
    fn comments(&self, id: &str) -> Result<Vec<Comment>>;
    fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<Issue>>;
    fn stats(&self) -> Result<Stats>;
    fn version(&self) -> Result<String>;
    /// Hard-delete closed issues in the current database.
    fn cleanup(&self) -> Result<()>;

    /// Escape hatch: invoke an arbitrary upstream command.
    fn run(&self, args: &[&str]) -> Result<Vec<u8>>;

    /// Test-only control surface, present on the in-memory implementation.
    fn double_control(&self) -> Option<&dyn DoubleControl> {
        None
    }
}

/// Steering for the in-memory implementation.
///
/// The harness uses this to simulate invoking the tool from different
/// working directories and to install static fixtures.
pub trait DoubleControl: Send + Sync {
    /// Point at a registered working directory, switching the current
    /// database.
    ///
    /// # Errors
    ///
    /// `NotARepo` when the directory was never registered.
    fn set_work_dir(&self, dir: &Path) -> Result<()>;

    /// Bind a working directory to a database prefix.
    fn register_work_dir(&self, dir: &Path, prefix: &str);

    /// # Errors
    ///
    /// `Routing` when no database has that prefix.
    fn set_current_prefix(&self, prefix: &str) -> Result<()>;

    /// Install a molecule prototype into the current database.
    ///
    /// # Errors
    ///
    /// `NotARepo` when there is no current database.
    fn install_proto(&self, proto: MoleculeProto) -> Result<()>;

    /// Install a formula into the current database.
    ///
    /// # Errors
    ///
    /// `NotARepo` when there is no current database.
    fn install_formula(&self, formula: Formula) -> Result<()>;

    fn work_dir(&self) -> Option<PathBuf>;

    fn current_prefix(&self) -> String;
}
