//! Subsystem records: sync, daemon, molecules, gates, swarms, formulas,
//! slots and statistics.

use super::Issue;
use serde::{Deserialize, Serialize};

/// Sync counters for one database.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStatus {
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub ahead: u32,
    #[serde(default)]
    pub behind: u32,
    #[serde(default)]
    pub conflicts: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonStatus {
    #[serde(default)]
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonHealth {
    #[serde(default)]
    pub healthy: bool,
    #[serde(default)]
    pub status: String,
}

/// A molecule prototype: a reusable ordered list of steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoleculeProto {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

/// Step cursor of an instantiated molecule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MolCurrent {
    pub molecule_id: String,
    #[serde(default)]
    pub proto_id: String,
    #[serde(default)]
    pub current_step: usize,
    #[serde(default)]
    pub total_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_title: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WispGcResult {
    #[serde(default)]
    pub removed: Vec<String>,
}

/// Gate status. A closed gate holds its waiters; an open gate lets them pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Open,
    #[default]
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Gate {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: GateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub await_id: Option<String>,
    #[serde(default)]
    pub waiters: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateCheck {
    #[serde(default)]
    pub checked: usize,
    #[serde(default)]
    pub opened: Vec<String>,
}

/// A swarm: coordinated execution of an epic's children.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Swarm {
    pub id: String,
    pub epic_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwarmStatus {
    pub swarm_id: String,
    #[serde(default)]
    pub epic_id: String,
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub active: Vec<String>,
    #[serde(default)]
    pub ready: Vec<String>,
    #[serde(default)]
    pub blocked: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwarmValidation {
    #[serde(default)]
    pub epic_id: String,
    #[serde(default)]
    pub valid: bool,
    /// Execution waves: each wave can run once all earlier waves close.
    #[serde(default)]
    pub waves: Vec<Vec<String>>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormulaStep {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormulaLeg {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Formula {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub formula_type: String,
    #[serde(default)]
    pub steps: Vec<FormulaStep>,
    #[serde(default)]
    pub legs: Vec<FormulaLeg>,
}

/// Agent slot contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Slots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeSlotStatus {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(default)]
    pub waiters: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stats {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub open: usize,
    #[serde(default)]
    pub in_progress: usize,
    #[serde(default)]
    pub closed: usize,
    #[serde(default)]
    pub hooked: usize,
    #[serde(default)]
    pub pinned: usize,
    #[serde(default)]
    pub blocked: usize,
    #[serde(default)]
    pub ready: usize,
}

impl Stats {
    /// Tally per-status counts over a set of issues.
    #[must_use]
    pub fn tally<'a>(issues: impl IntoIterator<Item = &'a Issue>) -> Self {
        let mut stats = Self::default();
        for issue in issues {
            stats.total += 1;
            match issue.status {
                super::Status::Open => stats.open += 1,
                super::Status::InProgress => stats.in_progress += 1,
                super::Status::Closed => stats.closed += 1,
                super::Status::Hooked => stats.hooked += 1,
                super::Status::Pinned => stats.pinned += 1,
                super::Status::Custom(_) => {}
            }
        }
        stats
    }
}
