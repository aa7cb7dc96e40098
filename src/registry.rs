//! Routing bug registry and the operation catalogue.
//!
//! The registry records, per operation, whether the upstream tool routes a
//! bead ID to the right database on its own. It is built once and never
//! mutated at runtime: flipping an entry is an edit to [`KNOWN_ROUTING`]
//! made after the conformance harness reports that a raw cross-rig case
//! started passing.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Every operation of the [`crate::ops::Ops`] surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    // Issue CRUD
    List,
    Show,
    ShowMultiple,
    Create,
    CreateWithId,
    Update,
    Close,
    CloseWithReason,
    CloseWithOptions,
    Delete,
    DeleteWithOptions,
    Reopen,
    Release,
    // Dependencies
    Ready,
    ReadyWithLabel,
    Blocked,
    AddDependency,
    AddDependencyWithType,
    RemoveDependency,
    // Sync
    Sync,
    SyncFromMain,
    SyncImportOnly,
    GetSyncStatus,
    // Config & lifecycle
    ConfigGet,
    ConfigSet,
    Init,
    Migrate,
    // Daemon
    DaemonStart,
    DaemonStop,
    DaemonStatus,
    DaemonHealth,
    // Molecules
    MolSeed,
    MolCurrent,
    MolCatalog,
    WispCreate,
    WispList,
    WispGc,
    MolBond,
    MolBurn,
    // Gates
    GateCreate,
    GateShow,
    GateWait,
    GateList,
    GateResolve,
    GateAddWaiter,
    GateCheck,
    // Swarms
    SwarmStatus,
    SwarmCreate,
    SwarmList,
    SwarmValidate,
    // Formulas
    FormulaShow,
    FormulaList,
    Cook,
    FormulaLegAdd,
    // Labels, slots, agents
    LabelAdd,
    LabelRemove,
    AgentState,
    SlotShow,
    SlotSet,
    SlotClear,
    MergeSlotCreate,
    MergeSlotCheck,
    MergeSlotAcquire,
    MergeSlotRelease,
    // Comments, search, housekeeping
    Comment,
    Comments,
    Search,
    Stats,
    Version,
    Cleanup,
    Run,
}

impl Operation {
    pub const ALL: &'static [Self] = &[
        Self::List,
        Self::Show,
        Self::ShowMultiple,
        Self::Create,
        Self::CreateWithId,
        Self::Update,
        Self::Close,
        Self::CloseWithReason,
        Self::CloseWithOptions,
        Self::Delete,
        Self::DeleteWithOptions,
        Self::Reopen,
        Self::Release,
        Self::Ready,
        Self::ReadyWithLabel,
        Self::Blocked,
        Self::AddDependency,
        Self::AddDependencyWithType,
        Self::RemoveDependency,
        Self::Sync,
        Self::SyncFromMain,
        Self::SyncImportOnly,
        Self::GetSyncStatus,
        Self::ConfigGet,
        Self::ConfigSet,
        Self::Init,
        Self::Migrate,
        Self::DaemonStart,
        Self::DaemonStop,
        Self::DaemonStatus,
        Self::DaemonHealth,
        Self::MolSeed,
        Self::MolCurrent,
        Self::MolCatalog,
        Self::WispCreate,
        Self::WispList,
        Self::WispGc,
        Self::MolBond,
        Self::MolBurn,
        Self::GateCreate,
        Self::GateShow,
        Self::GateWait,
        Self::GateList,
        Self::GateResolve,
        Self::GateAddWaiter,
        Self::GateCheck,
        Self::SwarmStatus,
        Self::SwarmCreate,
        Self::SwarmList,
        Self::SwarmValidate,
        Self::FormulaShow,
        Self::FormulaList,
        Self::Cook,
        Self::FormulaLegAdd,
        Self::LabelAdd,
        Self::LabelRemove,
        Self::AgentState,
        Self::SlotShow,
        Self::SlotSet,
        Self::SlotClear,
        Self::MergeSlotCreate,
        Self::MergeSlotCheck,
        Self::MergeSlotAcquire,
        Self::MergeSlotRelease,
        Self::Comment,
        Self::Comments,
        Self::Search,
        Self::Stats,
        Self::Version,
        Self::Cleanup,
        Self::Run,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Show => "show",
            Self::ShowMultiple => "show_multiple",
            Self::Create => "create",
            Self::CreateWithId => "create_with_id",
            Self::Update => "update",
            Self::Close => "close",
            Self::CloseWithReason => "close_with_reason",
            Self::CloseWithOptions => "close_with_options",
            Self::Delete => "delete",
            Self::DeleteWithOptions => "delete_with_options",
            Self::Reopen => "reopen",
            Self::Release => "release",
            Self::Ready => "ready",
            Self::ReadyWithLabel => "ready_with_label",
            Self::Blocked => "blocked",
            Self::AddDependency => "add_dependency",
            Self::AddDependencyWithType => "add_dependency_with_type",
            Self::RemoveDependency => "remove_dependency",
            Self::Sync => "sync",
            Self::SyncFromMain => "sync_from_main",
            Self::SyncImportOnly => "sync_import_only",
            Self::GetSyncStatus => "get_sync_status",
            Self::ConfigGet => "config_get",
            Self::ConfigSet => "config_set",
            Self::Init => "init",
            Self::Migrate => "migrate",
            Self::DaemonStart => "daemon_start",
            Self::DaemonStop => "daemon_stop",
            Self::DaemonStatus => "daemon_status",
            Self::DaemonHealth => "daemon_health",
            Self::MolSeed => "mol_seed",
            Self::MolCurrent => "mol_current",
            Self::MolCatalog => "mol_catalog",
            Self::WispCreate => "wisp_create",
            Self::WispList => "wisp_list",
            Self::WispGc => "wisp_gc",
            Self::MolBond => "mol_bond",
            Self::MolBurn => "mol_burn",
            Self::GateCreate => "gate_create",
            Self::GateShow => "gate_show",
            Self::GateWait => "gate_wait",
            Self::GateList => "gate_list",
            Self::GateResolve => "gate_resolve",
            Self::GateAddWaiter => "gate_add_waiter",
            Self::GateCheck => "gate_check",
            Self::SwarmStatus => "swarm_status",
            Self::SwarmCreate => "swarm_create",
            Self::SwarmList => "swarm_list",
            Self::SwarmValidate => "swarm_validate",
            Self::FormulaShow => "formula_show",
            Self::FormulaList => "formula_list",
            Self::Cook => "cook",
            Self::FormulaLegAdd => "formula_leg_add",
            Self::LabelAdd => "label_add",
            Self::LabelRemove => "label_remove",
            Self::AgentState => "agent_state",
            Self::SlotShow => "slot_show",
            Self::SlotSet => "slot_set",
            Self::SlotClear => "slot_clear",
            Self::MergeSlotCreate => "merge_slot_create",
            Self::MergeSlotCheck => "merge_slot_check",
            Self::MergeSlotAcquire => "merge_slot_acquire",
            Self::MergeSlotRelease => "merge_slot_release",
            Self::Comment => "comment",
            Self::Comments => "comments",
            Self::Search => "search",
            Self::Stats => "stats",
            Self::Version => "version",
            Self::Cleanup => "cleanup",
            Self::Run => "run",
        }
    }

    /// Whether the operation takes a bead ID that selects its database.
    #[must_use]
    pub const fn takes_id(self) -> bool {
        matches!(
            self,
            Self::Show
                | Self::ShowMultiple
                | Self::CreateWithId
                | Self::Update
                | Self::Close
                | Self::CloseWithReason
                | Self::CloseWithOptions
                | Self::Delete
                | Self::DeleteWithOptions
                | Self::Reopen
                | Self::Release
                | Self::AddDependency
                | Self::AddDependencyWithType
                | Self::RemoveDependency
                | Self::MolCurrent
                | Self::MolBond
                | Self::MolBurn
                | Self::GateShow
                | Self::GateWait
                | Self::GateResolve
                | Self::GateAddWaiter
                | Self::SwarmStatus
                | Self::SwarmCreate
                | Self::SwarmValidate
                | Self::LabelAdd
                | Self::LabelRemove
                | Self::AgentState
                | Self::SlotShow
                | Self::SlotSet
                | Self::SlotClear
                | Self::Comment
                | Self::Comments
        )
    }

    /// Whether the operation changes stored state.
    #[must_use]
    pub const fn is_write(self) -> bool {
        !matches!(
            self,
            Self::List
                | Self::Show
                | Self::ShowMultiple
                | Self::Ready
                | Self::ReadyWithLabel
                | Self::Blocked
                | Self::GetSyncStatus
                | Self::ConfigGet
                | Self::DaemonStatus
                | Self::DaemonHealth
                | Self::MolCurrent
                | Self::MolCatalog
                | Self::WispList
                | Self::GateShow
                | Self::GateList
                | Self::SwarmStatus
                | Self::SwarmList
                | Self::SwarmValidate
                | Self::FormulaShow
                | Self::FormulaList
                | Self::SlotShow
                | Self::MergeSlotCheck
                | Self::Comments
                | Self::Search
                | Self::Stats
                | Self::Version
        )
    }

    /// Look an operation up by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.as_str() == name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream routing status, one entry per ID-taking operation.
///
/// `false` means upstream misroutes the call when the bead lives in another
/// rig; the wrapper pre-resolves the working directory for those.
pub const KNOWN_ROUTING: &[(Operation, bool)] = &[
    (Operation::Show, true),
    (Operation::ShowMultiple, true),
    (Operation::CreateWithId, true),
    (Operation::Update, false),
    (Operation::Close, false),
    (Operation::CloseWithReason, false),
    (Operation::CloseWithOptions, false),
    (Operation::Delete, false),
    (Operation::DeleteWithOptions, false),
    (Operation::Reopen, false),
    (Operation::Release, false),
    (Operation::AddDependency, false),
    (Operation::AddDependencyWithType, false),
    (Operation::RemoveDependency, false),
    (Operation::MolCurrent, true),
    (Operation::MolBond, false),
    (Operation::MolBurn, false),
    (Operation::GateShow, true),
    (Operation::GateWait, false),
    (Operation::GateResolve, false),
    (Operation::GateAddWaiter, false),
    (Operation::SwarmStatus, false),
    (Operation::SwarmCreate, false),
    (Operation::SwarmValidate, false),
    (Operation::LabelAdd, false),
    (Operation::LabelRemove, false),
    (Operation::AgentState, false),
    (Operation::SlotShow, true),
    (Operation::SlotSet, false),
    (Operation::SlotClear, false),
    (Operation::Comment, false),
    (Operation::Comments, true),
];

static GLOBAL: Lazy<BugRegistry> = Lazy::new(|| BugRegistry::from_entries(KNOWN_ROUTING));

/// Immutable table of operation name → "upstream routes this correctly".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BugRegistry {
    entries: BTreeMap<String, bool>,
}

impl BugRegistry {
    /// The process-wide registry built from [`KNOWN_ROUTING`].
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    #[must_use]
    pub fn from_entries(entries: &[(Operation, bool)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(op, fixed)| (op.as_str().to_string(), *fixed))
                .collect(),
        }
    }

    /// Whether upstream routes `op` correctly. Unknown operations are
    /// assumed correct.
    #[must_use]
    pub fn is_fixed(&self, op: &str) -> bool {
        self.entries.get(op).copied().unwrap_or(true)
    }

    #[must_use]
    pub fn is_fixed_op(&self, op: Operation) -> bool {
        self.is_fixed(op.as_str())
    }

    #[must_use]
    pub fn contains(&self, op: &str) -> bool {
        self.entries.contains_key(op)
    }

    /// Operations upstream still misroutes, sorted by name.
    #[must_use]
    pub fn broken_operations(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, fixed)| !**fixed)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|(name, fixed)| (name.as_str(), *fixed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_id_taking_operation_is_registered() {
        let registry = BugRegistry::global();
        for op in Operation::ALL.iter().filter(|op| op.takes_id()) {
            assert!(registry.contains(op.as_str()), "{op} missing from registry");
        }
    }

    #[test]
    fn broken_operations_agree_with_is_fixed() {
        let registry = BugRegistry::global();
        let broken = registry.broken_operations();
        for op in Operation::ALL {
            assert_eq!(
                broken.contains(&op.as_str()),
                !registry.is_fixed_op(*op),
                "{op}"
            );
        }
    }

    #[test]
    fn unknown_operations_are_optimistic() {
        assert!(BugRegistry::global().is_fixed("frobnicate"));
        assert!(BugRegistry::default().is_fixed_op(Operation::Update));
    }

    #[test]
    fn names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_name(op.as_str()), Some(*op));
        }
        assert_eq!(Operation::ALL.len(), 71);
    }

    #[test]
    fn known_entries() {
        let registry = BugRegistry::global();
        assert!(registry.is_fixed_op(Operation::Show));
        assert!(!registry.is_fixed_op(Operation::Update));
        assert!(!registry.is_fixed_op(Operation::Close));
        let custom = BugRegistry::from_entries(&[(Operation::Update, true)]);
        assert!(custom.broken_operations().is_empty());
    }
}
