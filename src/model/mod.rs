//! Core data types for `beads_ops`.
//!
//! This module defines the wire-visible types shared by every `Ops`
//! implementation:
//! - `Issue` - The unit of work (a bead)
//! - `Status` / `StatusFilter` - Lifecycle states and list filters
//! - `DependencyType` / `Dependency` - Typed edges between beads
//! - `Comment` - Issue comments
//!
//! Subsystem records (gates, swarms, molecules, formulas, slots, sync and
//! daemon state) live in [`records`].

pub mod records;

pub use records::*;

use crate::error::OpsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(b: &bool) -> bool {
    !*b
}

/// Issue lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Open,
    InProgress,
    Closed,
    Hooked,
    Pinned,
    /// Statuses the upstream tool emits that this crate does not model.
    #[serde(untagged)]
    Custom(String),
}

impl Status {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
            Self::Hooked => "hooked",
            Self::Pinned => "pinned",
            Self::Custom(value) => value,
        }
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Members of the `open` list-filter family.
    #[must_use]
    pub const fn is_open_family(&self) -> bool {
        matches!(
            self,
            Self::Open | Self::InProgress | Self::Hooked | Self::Pinned
        )
    }

    /// Statuses considered by ready/blocked computation.
    #[must_use]
    pub const fn is_workable(&self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "in_progress" | "inprogress" | "in-progress" => Ok(Self::InProgress),
            "closed" => Ok(Self::Closed),
            "hooked" => Ok(Self::Hooked),
            "pinned" => Ok(Self::Pinned),
            other => Err(OpsError::bad_argument(
                "status",
                format!("'{other}' is not one of open, in_progress, closed, hooked, pinned"),
            )),
        }
    }
}

/// List filter over statuses.
///
/// `open` is a family, not a value: it matches every non-terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    OpenFamily,
    Exact(Status),
    All,
}

impl StatusFilter {
    #[must_use]
    pub fn matches(&self, status: &Status) -> bool {
        match self {
            Self::OpenFamily => status.is_open_family(),
            Self::Exact(expected) => expected == status,
            Self::All => true,
        }
    }

    /// The value passed to `--status` upstream, if any.
    #[must_use]
    pub fn as_arg(&self) -> Option<&str> {
        match self {
            Self::OpenFamily => Some("open"),
            Self::Exact(status) => Some(status.as_str()),
            Self::All => None,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "open" => Ok(Self::OpenFamily),
            other => Ok(Self::Exact(other.parse()?)),
        }
    }
}

/// Issue priority (0=Critical, 4=Backlog).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const CRITICAL: Self = Self(0);
    pub const HIGH: Self = Self(1);
    pub const MEDIUM: Self = Self(2);
    pub const LOW: Self = Self(3);
    pub const BACKLOG: Self = Self(4);

    /// Validate a raw priority.
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` when the value is outside 0-4.
    pub fn new(value: i32) -> Result<Self, OpsError> {
        if (0..=4).contains(&value) {
            Ok(Self(value))
        } else {
            Err(OpsError::bad_argument(
                "priority",
                format!("must be 0-4, got {value}"),
            ))
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::MEDIUM
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl FromStr for Priority {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();
        let val = s.strip_prefix('P').unwrap_or(&s);
        val.parse::<i32>().map_or_else(
            |_| {
                Err(OpsError::bad_argument(
                    "priority",
                    format!("'{val}' is not a number"),
                ))
            },
            Self::new,
        )
    }
}

/// Dependency relationship type.
///
/// Exactly one value, `blocks`, affects ready/blocked computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    Blocks,
    Tracks,
    DependsOn,
    Related,
    ParentChild,
    Bonded,
    #[serde(untagged)]
    Custom(String),
}

impl DependencyType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Blocks => "blocks",
            Self::Tracks => "tracks",
            Self::DependsOn => "depends-on",
            Self::Related => "related",
            Self::ParentChild => "parent-child",
            Self::Bonded => "bonded",
            Self::Custom(value) => value,
        }
    }

    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocks)
    }
}

impl Default for DependencyType {
    fn default() -> Self {
        Self::Blocks
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DependencyType {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" => Err(OpsError::bad_argument("type", "dependency type is empty")),
            "blocks" => Ok(Self::Blocks),
            "tracks" => Ok(Self::Tracks),
            "depends-on" => Ok(Self::DependsOn),
            "related" => Ok(Self::Related),
            "parent-child" => Ok(Self::ParentChild),
            "bonded" => Ok(Self::Bonded),
            other => Ok(Self::Custom(other.to_string())),
        }
    }
}

/// A dependency as projected onto an issue by `show`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyRef {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: Status,
    #[serde(alias = "type", default)]
    pub dependency_type: DependencyType,
}

/// Directed, typed edge between two issues. Stored with its source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dependency {
    /// The issue that has the dependency (source).
    pub issue_id: String,

    /// The issue being depended on (target).
    pub depends_on_id: String,

    #[serde(rename = "type")]
    pub dep_type: DependencyType,

    pub created_at: DateTime<Utc>,
}

/// A comment on an issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    #[serde(default)]
    pub id: i64,
    pub issue_id: String,
    #[serde(default)]
    pub author: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// The primary issue entity.
///
/// Relationship fields (`dependencies`, `dependents`, `children`,
/// `blocked_by` and the counts) are projections: which of them are filled
/// depends on the operation that produced the value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    /// Unique ID (e.g., "gt-abc123").
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub status: Status,

    #[serde(default)]
    pub priority: Priority,

    /// Free-form type (task, bug, epic, agent, ...).
    #[serde(default = "default_issue_type", alias = "type")]
    pub issue_type: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_by_session: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    /// Insertion-ordered label set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    // Agent slots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_bead: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_bead: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_type: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub ephemeral: bool,

    // Projections
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependents: Vec<DependencyRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependent_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by_count: Option<usize>,
}

fn default_issue_type() -> String {
    "task".to_string()
}

impl Issue {
    /// A fresh open issue with the given identity and timestamps set to `now`.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: Status::Open,
            priority: Priority::default(),
            issue_type: default_issue_type(),
            created_at: now,
            updated_at: now,
            closed_at: None,
            close_reason: None,
            closed_by_session: None,
            parent: None,
            assignee: None,
            created_by: None,
            labels: Vec::new(),
            hook_bead: None,
            role_bead: None,
            agent_state: None,
            role_type: None,
            ephemeral: false,
            children: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            blocked_by: Vec::new(),
            dependency_count: None,
            dependent_count: None,
            blocked_by_count: None,
        }
    }

    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Add a label; returns false if it was already present.
    pub fn add_label(&mut self, label: &str) -> bool {
        if self.has_label(label) {
            return false;
        }
        self.labels.push(label.to_string());
        true
    }

    /// Remove a label; returns false if it was absent.
    pub fn remove_label(&mut self, label: &str) -> bool {
        let before = self.labels.len();
        self.labels.retain(|l| l != label);
        before != self.labels.len()
    }

    /// Replace the whole label set, dropping duplicates.
    pub fn set_labels(&mut self, labels: &[String]) {
        self.labels.clear();
        for label in labels {
            self.add_label(label);
        }
    }

    /// Apply a status transition, maintaining `closed_at`.
    pub fn transition(&mut self, status: Status, now: DateTime<Utc>) {
        match (self.status.is_closed(), status.is_closed()) {
            (false, true) => self.closed_at = Some(now),
            (true, false) => {
                self.closed_at = None;
                self.close_reason = None;
            }
            _ => {}
        }
        self.status = status;
        self.updated_at = now;
    }

    /// Strip relationship projections, leaving the stored attributes.
    #[must_use]
    pub fn without_projections(mut self) -> Self {
        self.children.clear();
        self.dependencies.clear();
        self.dependents.clear();
        self.blocked_by.clear();
        self.dependency_count = None;
        self.dependent_count = None;
        self.blocked_by_count = None;
        self
    }
}

/// Extract the prefix of a bead ID: the substring before the first hyphen.
///
/// Returns the empty string when the ID has no hyphen, which callers treat
/// as "no routing information".
#[must_use]
pub fn id_prefix(id: &str) -> &str {
    id.find('-').map_or("", |idx| &id[..idx])
}
