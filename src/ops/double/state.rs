//! Storage behind the in-memory double.
//!
//! One [`Database`] per prefix. Dependency edges live in their source's
//! database; each database also indexes the edges that point *at* its
//! issues so reverse lookups never scan other databases.

use crate::error::{OpsError, Result};
use crate::model::{
    Comment, Dependency, DependencyRef, Formula, Gate, Issue, MergeSlotStatus, MoleculeProto,
    Swarm, SyncStatus, id_prefix,
};
use crate::util::{IdConfig, IdGenerator};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// A stored issue plus bookkeeping the wire shape does not carry.
#[derive(Debug, Clone)]
pub(super) struct Record {
    pub issue: Issue,
    /// Creation order, used to break timestamp ties.
    pub seq: u64,
    /// Soft-deleted: invisible to every read.
    pub tombstone: bool,
}

/// Links an instantiated molecule to the prototype it came from.
#[derive(Debug, Clone)]
pub(super) struct Cursor {
    pub proto_id: String,
}

/// One logical database.
#[derive(Debug, Clone, Default)]
pub(super) struct Database {
    pub prefix: String,
    pub records: HashMap<String, Record>,
    /// Edges whose source lives here.
    pub deps: Vec<Dependency>,
    /// Target ID (in this database) to the IDs of issues depending on it.
    pub dependents: HashMap<String, Vec<String>>,
    pub comments: HashMap<String, Vec<Comment>>,
    pub next_comment_id: i64,
    pub child_counters: HashMap<String, u32>,
    pub config: BTreeMap<String, String>,
    pub daemon_running: bool,
    pub protos: BTreeMap<String, MoleculeProto>,
    pub cursors: HashMap<String, Cursor>,
    pub gates: BTreeMap<String, Gate>,
    pub swarms: BTreeMap<String, Swarm>,
    pub formulas: BTreeMap<String, Formula>,
    pub merge_slot: Option<MergeSlotStatus>,
    pub sync: SyncStatus,
    pub active: bool,
}

impl Database {
    pub fn new(prefix: &str) -> Self {
        let mut config = BTreeMap::new();
        config.insert("issue_prefix".to_string(), prefix.to_string());
        Self {
            prefix: prefix.to_string(),
            config,
            sync: SyncStatus {
                branch: "main".to_string(),
                ..SyncStatus::default()
            },
            active: true,
            ..Self::default()
        }
    }

    pub fn live(&self, id: &str) -> Option<&Issue> {
        self.records
            .get(id)
            .filter(|r| !r.tombstone)
            .map(|r| &r.issue)
    }

    pub fn live_mut(&mut self, id: &str) -> Option<&mut Issue> {
        self.records
            .get_mut(id)
            .filter(|r| !r.tombstone)
            .map(|r| &mut r.issue)
    }

    /// Live records, newest first.
    pub fn live_records(&self) -> Vec<&Record> {
        let mut records: Vec<&Record> = self.records.values().filter(|r| !r.tombstone).collect();
        records.sort_by(|a, b| {
            b.issue
                .created_at
                .cmp(&a.issue.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        records
    }

    /// Generate a fresh ID; tombstoned IDs are never reused.
    pub fn generate_id(&self, title: &str, creator: Option<&str>, now: DateTime<Utc>) -> String {
        let generator = IdGenerator::new(IdConfig::with_prefix(&self.prefix));
        generator.generate(title, creator, now, self.records.len(), |id| {
            self.records.contains_key(id) || self.gates.contains_key(id)
        })
    }

    pub fn generate_gate_id(&self, title: &str, now: DateTime<Utc>) -> String {
        let generator = IdGenerator::new(IdConfig::with_prefix(format!("{}-gate", self.prefix)));
        generator.generate(title, None, now, self.gates.len(), |id| {
            self.gates.contains_key(id)
        })
    }

    pub fn next_child_id(&mut self, parent: &str) -> String {
        let counter = self.child_counters.entry(parent.to_string()).or_insert(0);
        *counter += 1;
        crate::util::child_id(parent, *counter)
    }

    pub fn record_write(&mut self) {
        self.sync.ahead += 1;
    }
}

/// Everything the double knows, guarded by one lock.
#[derive(Debug, Default)]
pub(super) struct DoubleState {
    pub databases: BTreeMap<String, Database>,
    pub current: String,
    pub work_dirs: HashMap<PathBuf, String>,
    pub work_dir: Option<PathBuf>,
    pub seq: u64,
}

impl DoubleState {
    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn not_a_repo(&self) -> OpsError {
        OpsError::NotARepo {
            path: self
                .work_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("<{}>", self.current))),
        }
    }

    pub fn current_db(&self) -> Result<&Database> {
        self.databases
            .get(&self.current)
            .filter(|db| db.active)
            .ok_or_else(|| self.not_a_repo())
    }

    pub fn current_db_mut(&mut self) -> Result<&mut Database> {
        let err = self.not_a_repo();
        self.databases
            .get_mut(&self.current)
            .filter(|db| db.active)
            .ok_or(err)
    }

    /// Database named by an explicit prefix (trailing hyphen allowed).
    pub fn db_named_mut(&mut self, prefix: &str) -> Result<&mut Database> {
        let bare = prefix.trim_end_matches('-');
        self.databases
            .get_mut(bare)
            .ok_or_else(|| OpsError::routing(prefix, format!("no database with prefix '{bare}'")))
    }

    /// Database owning a bead ID.
    pub fn db_for_id(&self, id: &str) -> Result<&Database> {
        let prefix = routable_prefix(id)?;
        self.databases
            .get(prefix)
            .ok_or_else(|| OpsError::routing(id, format!("no database with prefix '{prefix}'")))
    }

    pub fn db_for_id_mut(&mut self, id: &str) -> Result<&mut Database> {
        let prefix = routable_prefix(id)?;
        self.databases
            .get_mut(prefix)
            .ok_or_else(|| OpsError::routing(id, format!("no database with prefix '{prefix}'")))
    }

    pub fn issue(&self, id: &str) -> Result<&Issue> {
        self.db_for_id(id)?
            .live(id)
            .ok_or_else(|| OpsError::not_found(id))
    }

    /// Any live issue by ID, or `None`.
    pub fn lookup(&self, id: &str) -> Option<&Issue> {
        self.databases.get(id_prefix(id))?.live(id)
    }

    /// Apply a mutation to one issue and count the write.
    pub fn mutate<T>(&mut self, id: &str, f: impl FnOnce(&mut Issue) -> Result<T>) -> Result<T> {
        let db = self.db_for_id_mut(id)?;
        let issue = db.live_mut(id).ok_or_else(|| OpsError::not_found(id))?;
        let out = f(issue)?;
        db.record_write();
        Ok(out)
    }

    /// Outgoing edges of an issue.
    pub fn outgoing(&self, id: &str) -> Vec<&Dependency> {
        self.databases
            .get(id_prefix(id))
            .map(|db| db.deps.iter().filter(|d| d.issue_id == id).collect())
            .unwrap_or_default()
    }

    /// Edges pointing at an issue, found through the target's index.
    pub fn incoming(&self, id: &str) -> Vec<&Dependency> {
        let Some(sources) = self
            .databases
            .get(id_prefix(id))
            .and_then(|db| db.dependents.get(id))
        else {
            return Vec::new();
        };
        sources
            .iter()
            .filter_map(|source| {
                self.databases
                    .get(id_prefix(source))?
                    .deps
                    .iter()
                    .find(|d| &d.issue_id == source && d.depends_on_id == id)
            })
            .collect()
    }

    /// IDs of not-yet-closed targets of `blocks` edges from `id`.
    pub fn open_blockers(&self, id: &str) -> Vec<String> {
        self.outgoing(id)
            .into_iter()
            .filter(|d| d.dep_type.is_blocking())
            .filter(|d| {
                self.lookup(&d.depends_on_id)
                    .is_some_and(|target| !target.status.is_closed())
            })
            .map(|d| d.depends_on_id.clone())
            .collect()
    }

    /// Workable and waiting on at least one open `blocks` target.
    pub fn is_blocked(&self, issue: &Issue) -> bool {
        issue.status.is_workable() && !self.open_blockers(&issue.id).is_empty()
    }

    pub fn is_ready(&self, issue: &Issue) -> bool {
        issue.status.is_workable() && self.open_blockers(&issue.id).is_empty()
    }

    /// Live issues whose parent is `id`.
    pub fn children_of(&self, id: &str) -> Vec<&Issue> {
        let Some(db) = self.databases.get(id_prefix(id)) else {
            return Vec::new();
        };
        let mut children: Vec<&Record> = db
            .records
            .values()
            .filter(|r| !r.tombstone && r.issue.parent.as_deref() == Some(id))
            .collect();
        children.sort_by_key(|r| r.seq);
        children.into_iter().map(|r| &r.issue).collect()
    }

    /// Insert an edge and its reverse index entry. An existing edge between
    /// the same pair is retyped.
    pub fn insert_edge(&mut self, edge: Dependency) -> Result<()> {
        let target = edge.depends_on_id.clone();
        let source = edge.issue_id.clone();
        let db = self.db_for_id_mut(&source)?;
        if let Some(existing) = db
            .deps
            .iter_mut()
            .find(|d| d.issue_id == source && d.depends_on_id == target)
        {
            existing.dep_type = edge.dep_type;
        } else {
            db.deps.push(edge);
        }
        db.record_write();

        let target_db = self.db_for_id_mut(&target)?;
        let sources = target_db.dependents.entry(target).or_default();
        if !sources.contains(&source) {
            sources.push(source);
        }
        Ok(())
    }

    /// Remove one edge; returns false if it did not exist.
    pub fn remove_edge(&mut self, source: &str, target: &str) -> Result<bool> {
        let db = self.db_for_id_mut(source)?;
        let before = db.deps.len();
        db.deps
            .retain(|d| !(d.issue_id == source && d.depends_on_id == target));
        let removed = before != db.deps.len();
        if removed {
            db.record_write();
        }

        if let Some(target_db) = self.databases.get_mut(id_prefix(target)) {
            if let Some(sources) = target_db.dependents.get_mut(target) {
                sources.retain(|s| s != source);
                if sources.is_empty() {
                    target_db.dependents.remove(target);
                }
            }
        }
        Ok(removed)
    }

    /// Drop every edge touching `id`, in both directions.
    pub fn detach(&mut self, id: &str) -> Result<()> {
        let targets: Vec<String> = self
            .outgoing(id)
            .into_iter()
            .map(|d| d.depends_on_id.clone())
            .collect();
        for target in targets {
            self.remove_edge(id, &target)?;
        }
        let sources: Vec<String> = self
            .incoming(id)
            .into_iter()
            .map(|d| d.issue_id.clone())
            .collect();
        for source in sources {
            self.remove_edge(&source, id)?;
        }
        Ok(())
    }

    fn dependency_ref(&self, id: &str, dep: &Dependency) -> DependencyRef {
        let issue = self.lookup(id);
        DependencyRef {
            id: id.to_string(),
            title: issue.map(|i| i.title.clone()).unwrap_or_default(),
            status: issue.map(|i| i.status.clone()).unwrap_or_default(),
            dependency_type: dep.dep_type.clone(),
        }
    }

    /// The `show` projection: edges both ways and children.
    pub fn project_show(&self, issue: &Issue) -> Issue {
        let mut out = issue.clone().without_projections();
        out.dependencies = self
            .outgoing(&issue.id)
            .into_iter()
            .map(|d| self.dependency_ref(&d.depends_on_id, d))
            .collect();
        out.dependents = self
            .incoming(&issue.id)
            .into_iter()
            .map(|d| self.dependency_ref(&d.issue_id, d))
            .collect();
        out.children = self
            .children_of(&issue.id)
            .into_iter()
            .map(|c| c.id.clone())
            .collect();
        out
    }

    /// The `list`/`ready` projection: edge counts only.
    pub fn project_counts(&self, issue: &Issue) -> Issue {
        let mut out = issue.clone().without_projections();
        out.dependency_count = Some(self.outgoing(&issue.id).len());
        out.dependent_count = Some(self.incoming(&issue.id).len());
        out
    }

    /// The `blocked` projection: open blockers only.
    pub fn project_blocked(&self, issue: &Issue) -> Issue {
        let mut out = issue.clone().without_projections();
        out.blocked_by = self.open_blockers(&issue.id);
        out.blocked_by_count = Some(out.blocked_by.len());
        out
    }
}

/// The prefix of an ID, or a routing error when it has none.
pub(super) fn routable_prefix(id: &str) -> Result<&str> {
    let prefix = id_prefix(id);
    if prefix.is_empty() {
        Err(OpsError::routing(id, "bead ID has no prefix"))
    } else {
        Ok(prefix)
    }
}
