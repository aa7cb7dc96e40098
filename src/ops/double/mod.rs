//! In-memory double of the issue tracker.
//!
//! # Routing
//!
//! Operations taking a bead ID resolve the database from the ID's prefix.
//! Create, list, ready, blocked, search and the per-database subsystems act
//! on the current database, which follows the working directory set through
//! [`DoubleControl`].
//!
//! # Concurrency
//!
//! One `RwLock` guards every database. Reads share it, writes take it
//! exclusively, and every returned entity is a copy.

mod deps;
mod issues;
mod state;
mod subsystems;

use crate::config::OpsConfig;
use crate::error::{OpsError, Result};
use crate::model::{
    Comment, DaemonHealth, DaemonStatus, Formula, Gate, GateCheck, Issue, MergeSlotStatus,
    MolCurrent, MoleculeProto, Slots, Stats, Swarm, SwarmStatus, SwarmValidation, SyncStatus,
    WispGcResult,
};
use crate::ops::{
    CloseOptions, CreateOptions, DeleteOptions, DoubleControl, ListOptions, Ops, SearchOptions,
    UpdateOptions,
};
use chrono::Utc;
use state::DoubleState;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// In-memory implementation of [`Ops`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct Double {
    state: Arc<RwLock<DoubleState>>,
    config: OpsConfig,
}

impl Double {
    /// An empty double with no databases, attributing writes to the actor
    /// and session found in the environment.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(OpsConfig::from_env())
    }

    /// An empty double that takes actor and session from `config`.
    #[must_use]
    pub fn with_config(config: OpsConfig) -> Self {
        Self {
            state: Arc::default(),
            config,
        }
    }

    /// A double with one initialized database, made current.
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` if the prefix is not lowercase letters.
    pub fn with_prefix(prefix: &str) -> Result<Self> {
        let double = Self::new();
        double.init(prefix)?;
        Ok(double)
    }

    fn read(&self) -> RwLockReadGuard<'_, DoubleState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DoubleState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn actor(&self) -> Option<&str> {
        self.config.actor.as_deref()
    }

    fn session(&self) -> Option<&str> {
        self.config.session_id.as_deref()
    }
}

impl Ops for Double {
    fn list(&self, opts: &ListOptions) -> Result<Vec<Issue>> {
        self.read().list(opts)
    }

    fn show(&self, id: &str) -> Result<Issue> {
        self.read().show(id)
    }

    fn show_multiple(&self, ids: &[&str]) -> Result<Vec<Issue>> {
        Ok(self.read().show_multiple(ids))
    }

    fn create(&self, opts: &CreateOptions) -> Result<Issue> {
        self.write().create(None, opts, self.actor(), Utc::now())
    }

    fn create_with_id(&self, id: &str, opts: &CreateOptions) -> Result<Issue> {
        self.write().create(Some(id), opts, self.actor(), Utc::now())
    }

    fn update(&self, id: &str, opts: &UpdateOptions) -> Result<()> {
        self.write().update(id, opts, Utc::now())
    }

    fn close(&self, ids: &[&str]) -> Result<()> {
        self.close_with_options(&CloseOptions::default(), ids)
    }

    fn close_with_reason(&self, reason: &str, ids: &[&str]) -> Result<()> {
        let opts = CloseOptions {
            reason: Some(reason.to_string()),
            ..CloseOptions::default()
        };
        self.close_with_options(&opts, ids)
    }

    fn close_with_options(&self, opts: &CloseOptions, ids: &[&str]) -> Result<()> {
        self.write().close(ids, opts, self.session(), Utc::now())
    }

    fn delete(&self, ids: &[&str]) -> Result<()> {
        let opts = DeleteOptions {
            force: true,
            ..DeleteOptions::default()
        };
        self.delete_with_options(&opts, ids)
    }

    fn delete_with_options(&self, opts: &DeleteOptions, ids: &[&str]) -> Result<()> {
        self.write().delete(ids, opts).map(drop)
    }

    fn reopen(&self, id: &str) -> Result<()> {
        self.write().reopen(id, Utc::now())
    }

    fn release(&self, id: &str) -> Result<()> {
        self.write().release(id, Utc::now())
    }

    fn ready(&self) -> Result<Vec<Issue>> {
        self.read().ready(None, 0)
    }

    fn ready_with_label(&self, label: &str, limit: usize) -> Result<Vec<Issue>> {
        self.read().ready(Some(label), limit)
    }

    fn blocked(&self) -> Result<Vec<Issue>> {
        self.read().blocked()
    }

    fn add_dependency(&self, issue: &str, depends_on: &str) -> Result<()> {
        self.add_dependency_with_type(issue, depends_on, "blocks")
    }

    fn add_dependency_with_type(
        &self,
        issue: &str,
        depends_on: &str,
        dep_type: &str,
    ) -> Result<()> {
        self.write()
            .add_dependency(issue, depends_on, dep_type, Utc::now())
    }

    fn remove_dependency(&self, issue: &str, depends_on: &str) -> Result<()> {
        self.write().remove_dependency(issue, depends_on)
    }

    fn sync(&self) -> Result<()> {
        self.write().sync(false, false)
    }

    fn sync_from_main(&self) -> Result<()> {
        self.write().sync(true, false)
    }

    fn sync_import_only(&self) -> Result<()> {
        self.write().sync(false, true)
    }

    fn get_sync_status(&self) -> Result<SyncStatus> {
        self.read().sync_status()
    }

    fn config_get(&self, key: &str) -> Result<String> {
        self.read().config_get(key)
    }

    fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.write().config_set(key, value)
    }

    fn init(&self, prefix: &str) -> Result<()> {
        self.write().init(prefix)
    }

    fn migrate(&self) -> Result<()> {
        self.read().current_db().map(drop)
    }

    fn daemon_start(&self) -> Result<()> {
        self.write().set_daemon(true)
    }

    fn daemon_stop(&self) -> Result<()> {
        self.write().set_daemon(false)
    }

    fn daemon_status(&self) -> Result<DaemonStatus> {
        let running = self.read().daemon_running()?;
        Ok(DaemonStatus {
            running,
            pid: running.then(std::process::id),
        })
    }

    fn daemon_health(&self) -> Result<DaemonHealth> {
        let running = self.read().daemon_running()?;
        Ok(DaemonHealth {
            healthy: running,
            status: if running { "healthy" } else { "not running" }.to_string(),
        })
    }

    fn mol_seed(&self) -> Result<()> {
        self.write().mol_seed()
    }

    fn mol_current(&self, molecule_id: &str) -> Result<MolCurrent> {
        self.read().mol_current(molecule_id)
    }

    fn mol_catalog(&self) -> Result<Vec<MoleculeProto>> {
        self.read().mol_catalog()
    }

    fn wisp_create(&self, proto_id: &str, actor: &str) -> Result<Issue> {
        self.write().wisp_create(proto_id, actor, Utc::now())
    }

    fn wisp_list(&self, all: bool) -> Result<Vec<Issue>> {
        self.read().wisp_list(all)
    }

    fn wisp_gc(&self) -> Result<WispGcResult> {
        self.write().wisp_gc()
    }

    fn mol_bond(&self, molecule_id: &str, bead_id: &str) -> Result<()> {
        self.add_dependency_with_type(molecule_id, bead_id, "bonded")
    }

    fn mol_burn(&self, ids: &[&str]) -> Result<()> {
        self.write().mol_burn(ids)
    }

    fn gate_create(&self, title: &str, await_id: Option<&str>) -> Result<Gate> {
        self.write().gate_create(title, await_id, Utc::now())
    }

    fn gate_show(&self, id: &str) -> Result<Gate> {
        self.read().gate_show(id)
    }

    fn gate_wait(&self, id: &str, waiter: &str) -> Result<()> {
        self.write().gate_wait(id, waiter)
    }

    fn gate_list(&self, all: bool) -> Result<Vec<Gate>> {
        self.read().gate_list(all)
    }

    fn gate_resolve(&self, id: &str) -> Result<()> {
        self.write().gate_resolve(id)
    }

    fn gate_add_waiter(&self, id: &str, waiter: &str) -> Result<()> {
        self.write().gate_add_waiter(id, waiter)
    }

    fn gate_check(&self) -> Result<GateCheck> {
        self.write().gate_check()
    }

    fn swarm_status(&self, swarm_id: &str) -> Result<SwarmStatus> {
        self.read().swarm_status(swarm_id)
    }

    fn swarm_create(&self, epic_id: &str, coordinator: Option<&str>) -> Result<Swarm> {
        self.write()
            .swarm_create(epic_id, coordinator, self.actor(), Utc::now())
    }

    fn swarm_list(&self) -> Result<Vec<Swarm>> {
        self.read().swarm_list()
    }

    fn swarm_validate(&self, epic_id: &str) -> Result<SwarmValidation> {
        self.read().swarm_validate(epic_id)
    }

    fn formula_show(&self, name: &str) -> Result<Formula> {
        self.read().formula_show(name)
    }

    fn formula_list(&self) -> Result<Vec<Formula>> {
        self.read().formula_list()
    }

    fn cook(&self, name: &str) -> Result<MoleculeProto> {
        self.write().cook(name)
    }

    fn formula_leg_add(&self, formula: &str, leg_id: &str, title: &str) -> Result<()> {
        self.write().formula_leg_add(formula, leg_id, title)
    }

    fn label_add(&self, id: &str, label: &str) -> Result<()> {
        self.write().label_add(id, label, Utc::now())
    }

    fn label_remove(&self, id: &str, label: &str) -> Result<()> {
        self.write().label_remove(id, label, Utc::now())
    }

    fn agent_state(&self, id: &str, state: &str) -> Result<()> {
        self.write().agent_state(id, state, Utc::now())
    }

    fn slot_show(&self, id: &str) -> Result<Slots> {
        self.read().slot_show(id)
    }

    fn slot_set(&self, id: &str, slot: &str, bead_id: &str) -> Result<()> {
        self.write().slot_set(id, slot, bead_id, Utc::now())
    }

    fn slot_clear(&self, id: &str, slot: &str) -> Result<()> {
        self.write().slot_clear(id, slot, Utc::now())
    }

    fn merge_slot_create(&self) -> Result<String> {
        self.write().merge_slot_create()
    }

    fn merge_slot_check(&self) -> Result<MergeSlotStatus> {
        self.read().merge_slot_check()
    }

    fn merge_slot_acquire(&self, holder: &str, wait: bool) -> Result<MergeSlotStatus> {
        self.write().merge_slot_acquire(holder, wait)
    }

    fn merge_slot_release(&self, holder: &str) -> Result<()> {
        self.write().merge_slot_release(holder)
    }

    fn comment(&self, id: &str, text: &str) -> Result<Comment> {
        self.write().comment(id, text, self.actor(), Utc::now())
    }

    fn comments(&self, id: &str) -> Result<Vec<Comment>> {
        self.read().comments(id)
    }

    fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<Issue>> {
        self.read().search(query, opts)
    }

    fn stats(&self) -> Result<Stats> {
        self.read().stats()
    }

    fn version(&self) -> Result<String> {
        Ok(format!("bd version {} (double)", env!("CARGO_PKG_VERSION")))
    }

    fn cleanup(&self) -> Result<()> {
        let removed = self.write().cleanup()?;
        debug!(count = removed.len(), "Cleaned up closed issues");
        Ok(())
    }

    fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        Err(OpsError::bad_argument(
            "args",
            format!("the in-memory double cannot run '{}'", args.join(" ")),
        ))
    }

    fn double_control(&self) -> Option<&dyn DoubleControl> {
        Some(self)
    }
}

impl DoubleControl for Double {
    fn set_work_dir(&self, dir: &Path) -> Result<()> {
        let mut state = self.write();
        let prefix = state
            .work_dirs
            .get(dir)
            .cloned()
            .ok_or_else(|| OpsError::NotARepo {
                path: dir.to_path_buf(),
            })?;
        debug!(dir = %dir.display(), prefix = %prefix, "Switched work dir");
        state.work_dir = Some(dir.to_path_buf());
        state.current = prefix;
        Ok(())
    }

    fn register_work_dir(&self, dir: &Path, prefix: &str) {
        self.write()
            .work_dirs
            .insert(dir.to_path_buf(), prefix.trim_end_matches('-').to_string());
    }

    fn set_current_prefix(&self, prefix: &str) -> Result<()> {
        let mut state = self.write();
        let bare = prefix.trim_end_matches('-');
        if !state.databases.contains_key(bare) {
            return Err(OpsError::routing(
                prefix,
                format!("no database with prefix '{bare}'"),
            ));
        }
        state.current = bare.to_string();
        Ok(())
    }

    fn install_proto(&self, proto: MoleculeProto) -> Result<()> {
        self.write().install_proto(proto)
    }

    fn install_formula(&self, formula: Formula) -> Result<()> {
        self.write().install_formula(formula)
    }

    fn work_dir(&self) -> Option<PathBuf> {
        self.read().work_dir.clone()
    }

    fn current_prefix(&self) -> String {
        self.read().current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::{FormulaStep, GateStatus, Status, StatusFilter};

    fn two_databases() -> Double {
        let double = Double::new();
        double.init("ap").unwrap();
        double.init("gt").unwrap();
        double
    }

    fn ids(issues: &[Issue]) -> Vec<&str> {
        issues.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn actor_stamps_creations_and_comments() {
        let double = Double::with_config(OpsConfig::default().with_actor("mayor"));
        double.init("gt").unwrap();
        let issue = double.create(&CreateOptions::titled("mine")).unwrap();
        assert_eq!(double.show(&issue.id).unwrap().created_by.as_deref(), Some("mayor"));
        assert_eq!(double.comment(&issue.id, "noted").unwrap().author, "mayor");

        let theirs = CreateOptions {
            actor: Some("witness".to_string()),
            ..CreateOptions::titled("theirs")
        };
        let issue = double.create(&theirs).unwrap();
        assert_eq!(issue.created_by.as_deref(), Some("witness"));
    }

    #[test]
    fn new_reads_actor_from_environment() {
        assert_eq!(Double::new().config.actor, OpsConfig::from_env().actor);
    }

    #[test]
    fn create_and_show() {
        let double = Double::with_prefix("gt").unwrap();
        let created = double
            .create(&CreateOptions::titled("First").priority(1).issue_type("bug"))
            .unwrap();
        assert!(created.id.starts_with("gt-"));
        let shown = double.show(&created.id).unwrap();
        assert_eq!(shown.id, created.id);
        assert_eq!(shown.title, "First");
        assert_eq!(shown.issue_type, "bug");
        assert_eq!(shown.priority.0, 1);
    }

    #[test]
    fn operations_without_database_are_not_a_repo() {
        let double = Double::new();
        let err = double.list(&ListOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotARepo);
    }

    #[test]
    fn cross_database_update_routes_by_prefix() {
        let double = two_databases();
        double.set_current_prefix("ap").unwrap();
        let ap = double.create(&CreateOptions::titled("in ap")).unwrap();
        double.set_current_prefix("gt").unwrap();

        let update = UpdateOptions {
            title: Some("X".to_string()),
            ..UpdateOptions::default()
        };
        double.update(&ap.id, &update).unwrap();
        assert_eq!(double.show(&ap.id).unwrap().title, "X");
        assert!(double.list(&ListOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn unknown_prefix_is_routing_error() {
        let double = Double::with_prefix("gt").unwrap();
        assert_eq!(double.show("zz-1").unwrap_err().kind(), ErrorKind::Routing);
        assert_eq!(double.show("gt-nope").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn create_with_id_checks_prefix() {
        let double = two_databases();
        let issue = double
            .create_with_id("gt-fixed", &CreateOptions::titled("explicit"))
            .unwrap();
        assert_eq!(issue.id, "gt-fixed");

        let mut opts = CreateOptions::titled("mismatch");
        opts.prefix = Some("ap-".to_string());
        let err = double.create_with_id("gt-other", &opts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Routing);

        let err = double
            .create_with_id("ap-foreign", &CreateOptions::titled("wrong db"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Routing);
    }

    #[test]
    fn children_live_with_parent() {
        let double = two_databases();
        double.set_current_prefix("ap").unwrap();
        let epic = double
            .create(&CreateOptions::titled("epic").issue_type("epic"))
            .unwrap();
        double.set_current_prefix("gt").unwrap();

        let child = double
            .create(&CreateOptions::titled("child").parent(&epic.id))
            .unwrap();
        assert_eq!(child.id, format!("{}.1", epic.id));
        assert_eq!(double.show(&epic.id).unwrap().children, vec![child.id]);
    }

    #[test]
    fn pinned_is_stored_as_hooked() {
        let double = Double::with_prefix("gt").unwrap();
        let issue = double.create(&CreateOptions::titled("pin me")).unwrap();
        let update = UpdateOptions {
            status: Some("pinned".to_string()),
            ..UpdateOptions::default()
        };
        double.update(&issue.id, &update).unwrap();
        assert_eq!(double.show(&issue.id).unwrap().status, Status::Hooked);
    }

    #[test]
    fn close_records_reason_and_session() {
        let double = Double::with_config(OpsConfig::default().with_session("sess-1"));
        double.init("gt").unwrap();
        let issue = double.create(&CreateOptions::titled("done soon")).unwrap();
        double.close_with_reason("shipped", &[&issue.id]).unwrap();
        double.close(&[&issue.id]).unwrap();

        let shown = double.show(&issue.id).unwrap();
        assert_eq!(shown.status, Status::Closed);
        assert_eq!(shown.close_reason.as_deref(), Some("shipped"));
        assert_eq!(shown.closed_by_session.as_deref(), Some("sess-1"));
    }

    #[test]
    fn close_parent_with_open_children_succeeds() {
        let double = Double::with_prefix("gt").unwrap();
        let parent = double.create(&CreateOptions::titled("parent")).unwrap();
        let child = double
            .create(&CreateOptions::titled("child").parent(&parent.id))
            .unwrap();
        double.close(&[&parent.id]).unwrap();

        assert_eq!(double.show(&parent.id).unwrap().status, Status::Closed);
        assert_eq!(double.show(&child.id).unwrap().status, Status::Open);
    }

    #[test]
    fn cross_database_dependents_are_indexed() {
        let double = two_databases();
        double.set_current_prefix("ap").unwrap();
        let target = double.create(&CreateOptions::titled("target")).unwrap();
        double.set_current_prefix("gt").unwrap();
        let source = double.create(&CreateOptions::titled("source")).unwrap();

        double.add_dependency(&source.id, &target.id).unwrap();
        let shown = double.show(&target.id).unwrap();
        assert_eq!(shown.dependents.len(), 1);
        assert_eq!(shown.dependents[0].id, source.id);
        assert_eq!(ids(&double.blocked().unwrap()), vec![source.id.as_str()]);

        double.remove_dependency(&source.id, &target.id).unwrap();
        assert!(double.show(&target.id).unwrap().dependents.is_empty());
        assert_eq!(
            double
                .remove_dependency(&source.id, &target.id)
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn blocking_cycles_are_rejected() {
        let double = Double::with_prefix("gt").unwrap();
        let a = double.create(&CreateOptions::titled("a")).unwrap();
        let b = double.create(&CreateOptions::titled("b")).unwrap();
        double.add_dependency(&a.id, &b.id).unwrap();
        assert!(double.add_dependency(&b.id, &a.id).is_err());
        double
            .add_dependency_with_type(&b.id, &a.id, "related")
            .unwrap();
    }

    #[test]
    fn soft_and_hard_delete() {
        let double = Double::with_prefix("gt").unwrap();
        let a = double.create(&CreateOptions::titled("a")).unwrap();
        let b = double.create(&CreateOptions::titled("b")).unwrap();
        double.delete(&[&a.id]).unwrap();
        let hard = DeleteOptions {
            force: true,
            hard: true,
            cascade: false,
        };
        double.delete_with_options(&hard, &[&b.id]).unwrap();
        for id in [&a.id, &b.id] {
            assert_eq!(double.show(id).unwrap_err().kind(), ErrorKind::NotFound);
        }
        assert!(double.list(&ListOptions::all()).unwrap().is_empty());
    }

    #[test]
    fn delete_cascade_and_guard() {
        let double = Double::with_prefix("gt").unwrap();
        let base = double.create(&CreateOptions::titled("base")).unwrap();
        let dependent = double.create(&CreateOptions::titled("dependent")).unwrap();
        double.add_dependency(&dependent.id, &base.id).unwrap();

        let guarded = DeleteOptions::default();
        assert!(double.delete_with_options(&guarded, &[&base.id]).is_err());

        let cascade = DeleteOptions {
            cascade: true,
            ..DeleteOptions::default()
        };
        double.delete_with_options(&cascade, &[&base.id]).unwrap();
        assert!(double.show(&dependent.id).is_err());
    }

    #[test]
    fn release_clears_assignee() {
        let double = Double::with_prefix("gt").unwrap();
        let issue = double.create(&CreateOptions::titled("claimed")).unwrap();
        let update = UpdateOptions {
            status: Some("in_progress".to_string()),
            assignee: Some("polecat-1".to_string()),
            ..UpdateOptions::default()
        };
        double.update(&issue.id, &update).unwrap();
        double.release(&issue.id).unwrap();
        let shown = double.show(&issue.id).unwrap();
        assert_eq!(shown.status, Status::Open);
        assert!(shown.assignee.is_none());
    }

    #[test]
    fn list_filters_and_search() {
        let double = Double::with_prefix("gt").unwrap();
        let mut opts = CreateOptions::titled("Refinery merge queue").issue_type("bug");
        opts.description = Some("stalls under load".to_string());
        let bug = double.create(&opts).unwrap();
        double.create(&CreateOptions::titled("Witness patrol")).unwrap();

        let found = double.search("LOAD", &SearchOptions::default()).unwrap();
        assert_eq!(ids(&found), vec![bug.id.as_str()]);

        let typed = ListOptions {
            issue_type: Some("bug".to_string()),
            ..ListOptions::default()
        };
        assert_eq!(ids(&double.list(&typed).unwrap()), vec![bug.id.as_str()]);

        double.close(&[&bug.id]).unwrap();
        let narrowed = SearchOptions {
            status: Some(StatusFilter::OpenFamily),
            ..SearchOptions::default()
        };
        assert!(double.search("load", &narrowed).unwrap().is_empty());
    }

    #[test]
    fn ready_with_label_limits() {
        let double = Double::with_prefix("gt").unwrap();
        for n in 0..3 {
            double
                .create(&CreateOptions::titled(format!("t{n}")).labels(["frontend"]))
                .unwrap();
        }
        double.create(&CreateOptions::titled("other")).unwrap();
        assert_eq!(double.ready_with_label("frontend", 2).unwrap().len(), 2);
        assert_eq!(double.ready_with_label("frontend", 0).unwrap().len(), 3);
    }

    #[test]
    fn sync_counters_track_writes() {
        let double = Double::with_prefix("gt").unwrap();
        double.create(&CreateOptions::titled("a")).unwrap();
        assert!(double.get_sync_status().unwrap().ahead > 0);
        double.sync().unwrap();
        assert_eq!(double.get_sync_status().unwrap().ahead, 0);
        assert_eq!(double.get_sync_status().unwrap().branch, "main");
    }

    #[test]
    fn config_missing_key_is_empty() {
        let double = Double::with_prefix("gt").unwrap();
        assert_eq!(double.config_get("nope").unwrap(), "");
        double.config_set("sync.branch", "beads-sync").unwrap();
        assert_eq!(double.config_get("sync.branch").unwrap(), "beads-sync");
        assert_eq!(double.config_get("issue_prefix").unwrap(), "gt");
    }

    #[test]
    fn daemon_lifecycle() {
        let double = Double::with_prefix("gt").unwrap();
        assert!(!double.daemon_status().unwrap().running);
        double.daemon_start().unwrap();
        assert!(double.daemon_health().unwrap().healthy);
        double.daemon_stop().unwrap();
        assert!(!double.daemon_health().unwrap().healthy);
    }

    #[test]
    fn molecules_and_wisps() {
        let double = Double::with_prefix("gt").unwrap();
        double
            .install_formula(Formula {
                name: "patrol".to_string(),
                description: "Witness patrol".to_string(),
                formula_type: "workflow".to_string(),
                steps: vec![
                    FormulaStep {
                        id: "scan".to_string(),
                        title: "Scan polecats".to_string(),
                    },
                    FormulaStep {
                        id: "report".to_string(),
                        title: String::new(),
                    },
                ],
                legs: Vec::new(),
            })
            .unwrap();
        double.mol_seed().unwrap();
        let catalog = double.mol_catalog().unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].id, "mol-patrol");
        assert_eq!(catalog[0].steps, vec!["Scan polecats", "report"]);

        let wisp = double.wisp_create("mol-patrol", "witness").unwrap();
        assert!(wisp.ephemeral);
        assert!(wisp.has_label("wisp"));
        let current = double.mol_current(&wisp.id).unwrap();
        assert_eq!(current.current_step, 0);
        assert_eq!(current.step_title.as_deref(), Some("Scan polecats"));

        let step = double.create(&CreateOptions::titled("scan")).unwrap();
        double.mol_bond(&wisp.id, &step.id).unwrap();
        assert!(double.ready().unwrap().iter().any(|i| i.id == wisp.id));
        double.close(&[&step.id]).unwrap();
        assert_eq!(double.mol_current(&wisp.id).unwrap().current_step, 1);

        double.close(&[&wisp.id]).unwrap();
        assert!(double.wisp_list(false).unwrap().is_empty());
        assert_eq!(double.wisp_list(true).unwrap().len(), 1);
        assert_eq!(double.wisp_gc().unwrap().removed, vec![wisp.id.clone()]);
        assert!(double.mol_burn(&[&step.id]).is_err());
    }

    #[test]
    fn gates_are_barriers() {
        let double = Double::with_prefix("gt").unwrap();
        let awaited = double.create(&CreateOptions::titled("ci run")).unwrap();
        let gate = double.gate_create("wait for ci", Some(&awaited.id)).unwrap();
        assert_eq!(gate.status, GateStatus::Closed);

        double.gate_wait(&gate.id, "polecat-1").unwrap();
        double.gate_wait(&gate.id, "polecat-1").unwrap();
        assert_eq!(double.gate_show(&gate.id).unwrap().waiters, vec!["polecat-1"]);
        assert_eq!(double.gate_list(false).unwrap().len(), 1);

        assert!(double.gate_check().unwrap().opened.is_empty());
        double.close(&[&awaited.id]).unwrap();
        let check = double.gate_check().unwrap();
        assert_eq!(check.opened, vec![gate.id.clone()]);
        assert!(double.gate_list(false).unwrap().is_empty());

        double.gate_wait(&gate.id, "polecat-2").unwrap();
        assert_eq!(double.gate_show(&gate.id).unwrap().waiters.len(), 1);
    }

    #[test]
    fn swarm_waves_and_status() {
        let double = Double::with_prefix("gt").unwrap();
        let epic = double
            .create(&CreateOptions::titled("convoy").issue_type("epic"))
            .unwrap();
        let a = double
            .create(&CreateOptions::titled("a").parent(&epic.id))
            .unwrap();
        let b = double
            .create(&CreateOptions::titled("b").parent(&epic.id))
            .unwrap();
        double.add_dependency(&b.id, &a.id).unwrap();

        let validation = double.swarm_validate(&epic.id).unwrap();
        assert!(validation.valid);
        assert_eq!(validation.waves, vec![vec![a.id.clone()], vec![b.id.clone()]]);

        let swarm = double.swarm_create(&epic.id, Some("mayor")).unwrap();
        let status = double.swarm_status(&swarm.id).unwrap();
        assert_eq!(status.total, 2);
        assert_eq!(status.ready, vec![a.id.clone()]);
        assert_eq!(status.blocked, vec![b.id.clone()]);
        assert_eq!(double.swarm_list().unwrap().len(), 1);

        let task = double.create(&CreateOptions::titled("not epic")).unwrap();
        assert!(double.swarm_create(&task.id, None).is_err());
    }

    #[test]
    fn slots_and_agent_state() {
        let double = Double::with_prefix("gt").unwrap();
        let agent = double
            .create(&CreateOptions::titled("polecat").issue_type("agent"))
            .unwrap();
        let work = double.create(&CreateOptions::titled("work")).unwrap();

        double.slot_set(&agent.id, "hook", &work.id).unwrap();
        assert_eq!(
            double.slot_show(&agent.id).unwrap().hook.as_deref(),
            Some(work.id.as_str())
        );
        double.slot_clear(&agent.id, "hook").unwrap();
        assert!(double.slot_show(&agent.id).unwrap().hook.is_none());
        assert_eq!(
            double
                .slot_set(&agent.id, "pocket", &work.id)
                .unwrap_err()
                .kind(),
            ErrorKind::BadArgument
        );

        double.agent_state(&agent.id, "working").unwrap();
        assert_eq!(
            double.show(&agent.id).unwrap().agent_state.as_deref(),
            Some("working")
        );
        assert!(double.agent_state(&agent.id, "dancing").is_err());
    }

    #[test]
    fn merge_slot_queue() {
        let double = Double::with_prefix("gt").unwrap();
        assert!(double.merge_slot_check().unwrap_err().is_not_found());
        assert_eq!(double.merge_slot_create().unwrap(), "gt-merge-slot");

        let held = double.merge_slot_acquire("refinery", false).unwrap();
        assert_eq!(held.holder.as_deref(), Some("refinery"));
        let queued = double.merge_slot_acquire("polecat-1", true).unwrap();
        assert_eq!(queued.holder.as_deref(), Some("refinery"));
        assert_eq!(queued.waiters, vec!["polecat-1"]);

        assert!(double.merge_slot_release("polecat-1").is_err());
        double.merge_slot_release("refinery").unwrap();
        assert!(double.merge_slot_check().unwrap().available);
    }

    #[test]
    fn comments_and_stats() {
        let double = Double::with_prefix("gt").unwrap();
        let a = double.create(&CreateOptions::titled("a")).unwrap();
        let b = double.create(&CreateOptions::titled("b")).unwrap();
        double.add_dependency(&b.id, &a.id).unwrap();
        let comment = double.comment(&a.id, "looks good").unwrap();
        assert_eq!(comment.issue_id, a.id);
        assert_eq!(double.comments(&a.id).unwrap(), vec![comment]);
        assert!(double.comment(&a.id, "  ").is_err());

        let stats = double.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.open, 2);
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.blocked, 1);

        double.close(&[&a.id]).unwrap();
        double.cleanup().unwrap();
        assert!(double.show(&a.id).is_err());
        assert_eq!(double.stats().unwrap().total, 1);
    }

    #[test]
    fn work_dir_switches_current_database() {
        let double = two_databases();
        let gt_dir = Path::new("/town/gastown");
        let ap_dir = Path::new("/town/ai_platform");
        double.register_work_dir(gt_dir, "gt-");
        double.register_work_dir(ap_dir, "ap");

        double.set_work_dir(ap_dir).unwrap();
        assert_eq!(double.current_prefix(), "ap");
        assert_eq!(double.work_dir().as_deref(), Some(ap_dir));
        double.set_work_dir(gt_dir).unwrap();
        assert_eq!(double.current_prefix(), "gt");

        let err = double.set_work_dir(Path::new("/elsewhere")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotARepo);
    }

    #[test]
    fn concurrent_creates_are_linearized() {
        let double = Double::with_prefix("gt").unwrap();
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let handle = double.clone();
                scope.spawn(move || {
                    for n in 0..10 {
                        handle
                            .create(&CreateOptions::titled(format!("w{worker}-{n}")))
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(double.list(&ListOptions::all()).unwrap().len(), 40);
    }

    #[test]
    fn run_is_unsupported() {
        let double = Double::with_prefix("gt").unwrap();
        assert!(double.run(&["version"]).is_err());
        assert!(double.version().unwrap().contains("double"));
        assert!(double.double_control().is_some());
    }
}
