//! Everything beyond issue CRUD: sync, config, daemon, molecules, gates,
//! swarms, formulas, slots, merge slot, comments and stats.
//!
//! These are modeled at the fidelity the conformance matrix exercises:
//! prototypes and formulas are fixtures, a wisp is a labeled ephemeral
//! issue, a swarm is an issue plus a record keyed by its ID.

use super::state::{Cursor, Database, DoubleState};
use crate::error::{OpsError, Result};
use crate::model::{
    Comment, DependencyType, Formula, FormulaLeg, Gate, GateCheck, GateStatus, Issue,
    MergeSlotStatus, MolCurrent, MoleculeProto, Slots, Stats, Status, Swarm, SwarmStatus,
    SwarmValidation, SyncStatus, WispGcResult, id_prefix,
};
use crate::ops::{AGENT_STATES, CreateOptions, DeleteOptions, SLOT_NAMES, validate_member};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

/// Label carried by every wisp.
pub(super) const WISP_LABEL: &str = "wisp";

static PREFIX_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]+$").unwrap_or_else(|_| unreachable!("static pattern")));

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(OpsError::bad_argument(field, "cannot be empty"))
    } else {
        Ok(())
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

const FORCE_HARD: DeleteOptions = DeleteOptions {
    force: true,
    hard: true,
    cascade: false,
};

impl DoubleState {
    // Config & lifecycle

    pub fn init(&mut self, prefix: &str) -> Result<()> {
        let bare = prefix.trim_end_matches('-');
        if !PREFIX_FORMAT.is_match(bare) {
            return Err(OpsError::bad_argument(
                "prefix",
                format!("'{prefix}' must be lowercase letters"),
            ));
        }
        let db = self
            .databases
            .entry(bare.to_string())
            .or_insert_with(|| Database::new(bare));
        db.active = true;
        self.current = bare.to_string();
        if let Some(dir) = &self.work_dir {
            self.work_dirs.insert(dir.clone(), bare.to_string());
        }
        info!(prefix = bare, "Initialized database");
        Ok(())
    }

    pub fn config_get(&self, key: &str) -> Result<String> {
        Ok(self
            .current_db()?
            .config
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    pub fn config_set(&mut self, key: &str, value: &str) -> Result<()> {
        require_non_empty("key", key)?;
        let db = self.current_db_mut()?;
        db.config.insert(key.to_string(), value.to_string());
        db.record_write();
        Ok(())
    }

    // Sync

    pub fn sync(&mut self, from_main: bool, import_only: bool) -> Result<()> {
        let db = self.current_db_mut()?;
        db.sync.behind = 0;
        if !import_only && !from_main {
            db.sync.ahead = 0;
        }
        db.sync.conflicts.clear();
        debug!(db = %db.prefix, from_main, import_only, "Synced");
        Ok(())
    }

    pub fn sync_status(&self) -> Result<SyncStatus> {
        Ok(self.current_db()?.sync.clone())
    }

    // Daemon

    pub fn set_daemon(&mut self, running: bool) -> Result<()> {
        self.current_db_mut()?.daemon_running = running;
        Ok(())
    }

    pub fn daemon_running(&self) -> Result<bool> {
        Ok(self.current_db()?.daemon_running)
    }

    // Molecules

    pub fn install_proto(&mut self, proto: MoleculeProto) -> Result<()> {
        self.current_db_mut()?
            .protos
            .insert(proto.id.clone(), proto);
        Ok(())
    }

    pub fn mol_catalog(&self) -> Result<Vec<MoleculeProto>> {
        Ok(self.current_db()?.protos.values().cloned().collect())
    }

    pub fn mol_seed(&mut self) -> Result<()> {
        let names: Vec<String> = {
            let db = self.current_db()?;
            db.formulas
                .keys()
                .filter(|name| !db.protos.contains_key(&proto_id_for(name)))
                .cloned()
                .collect()
        };
        for name in names {
            self.cook(&name)?;
        }
        Ok(())
    }

    pub fn wisp_create(
        &mut self,
        proto_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Issue> {
        let proto = self
            .current_db()?
            .protos
            .get(proto_id)
            .cloned()
            .ok_or_else(|| OpsError::not_found(format!("proto {proto_id}")))?;
        let opts = CreateOptions {
            title: if proto.title.is_empty() {
                proto.id.clone()
            } else {
                proto.title.clone()
            },
            issue_type: Some("molecule".to_string()),
            labels: vec![WISP_LABEL.to_string()],
            ephemeral: true,
            actor: Some(actor.to_string()).filter(|a| !a.is_empty()),
            ..CreateOptions::default()
        };
        let issue = self.create(None, &opts, None, now)?;
        self.current_db_mut()?.cursors.insert(
            issue.id.clone(),
            Cursor {
                proto_id: proto.id,
            },
        );
        Ok(issue)
    }

    /// Progress through a molecule: one step per closed bonded bead.
    pub fn mol_current(&self, molecule_id: &str) -> Result<MolCurrent> {
        let molecule = self.issue(molecule_id)?;
        let db = self.db_for_id(molecule_id)?;
        let cursor = db
            .cursors
            .get(molecule_id)
            .ok_or_else(|| OpsError::not_found(format!("molecule {molecule_id}")))?;
        let steps = db
            .protos
            .get(&cursor.proto_id)
            .map(|p| p.steps.clone())
            .unwrap_or_default();

        let done = self
            .outgoing(molecule_id)
            .into_iter()
            .filter(|d| d.dep_type == DependencyType::Bonded)
            .filter(|d| self.lookup(&d.depends_on_id).is_some_and(|i| i.status.is_closed()))
            .count();
        let completed = molecule.status.is_closed() || (!steps.is_empty() && done >= steps.len());
        let current_step = if completed {
            steps.len()
        } else {
            done.min(steps.len())
        };

        Ok(MolCurrent {
            molecule_id: molecule_id.to_string(),
            proto_id: cursor.proto_id.clone(),
            current_step,
            total_steps: steps.len(),
            step_title: steps.get(current_step).cloned(),
            completed,
        })
    }

    pub fn wisp_list(&self, all: bool) -> Result<Vec<Issue>> {
        let db = self.current_db()?;
        Ok(db
            .live_records()
            .into_iter()
            .map(|r| &r.issue)
            .filter(|i| i.ephemeral && i.has_label(WISP_LABEL))
            .filter(|i| all || !i.status.is_closed())
            .map(|i| self.project_counts(i))
            .collect())
    }

    pub fn wisp_gc(&mut self) -> Result<WispGcResult> {
        let closed: Vec<String> = self
            .wisp_list(true)?
            .into_iter()
            .filter(|i| i.status.is_closed())
            .map(|i| i.id)
            .collect();
        let ids: Vec<&str> = closed.iter().map(String::as_str).collect();
        let removed = self.delete(&ids, &FORCE_HARD)?;
        Ok(WispGcResult { removed })
    }

    pub fn mol_burn(&mut self, ids: &[&str]) -> Result<()> {
        for id in ids {
            if !self.issue(id)?.ephemeral {
                return Err(OpsError::bad_argument("id", format!("{id} is not a wisp")));
            }
        }
        self.delete(ids, &FORCE_HARD)?;
        Ok(())
    }

    // Gates

    pub fn gate_create(
        &mut self,
        title: &str,
        await_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Gate> {
        require_non_empty("title", title)?;
        if let Some(await_id) = await_id {
            self.issue(await_id)?;
        }
        let db = self.current_db_mut()?;
        let gate = Gate {
            id: db.generate_gate_id(title, now),
            title: title.to_string(),
            status: GateStatus::Closed,
            await_id: await_id.map(str::to_string),
            waiters: Vec::new(),
        };
        db.gates.insert(gate.id.clone(), gate.clone());
        db.record_write();
        Ok(gate)
    }

    pub fn gate_show(&self, id: &str) -> Result<Gate> {
        self.db_for_id(id)?
            .gates
            .get(id)
            .cloned()
            .ok_or_else(|| OpsError::not_found(format!("gate {id}")))
    }

    fn gate_mut(&mut self, id: &str) -> Result<&mut Gate> {
        self.db_for_id_mut(id)?
            .gates
            .get_mut(id)
            .ok_or_else(|| OpsError::not_found(format!("gate {id}")))
    }

    pub fn gate_wait(&mut self, id: &str, waiter: &str) -> Result<()> {
        require_non_empty("waiter", waiter)?;
        let gate = self.gate_mut(id)?;
        if gate.status == GateStatus::Closed {
            push_unique(&mut gate.waiters, waiter);
        }
        Ok(())
    }

    pub fn gate_add_waiter(&mut self, id: &str, waiter: &str) -> Result<()> {
        require_non_empty("waiter", waiter)?;
        push_unique(&mut self.gate_mut(id)?.waiters, waiter);
        Ok(())
    }

    pub fn gate_resolve(&mut self, id: &str) -> Result<()> {
        self.gate_mut(id)?.status = GateStatus::Open;
        self.db_for_id_mut(id)?.record_write();
        Ok(())
    }

    pub fn gate_list(&self, all: bool) -> Result<Vec<Gate>> {
        Ok(self
            .current_db()?
            .gates
            .values()
            .filter(|g| all || g.status == GateStatus::Closed)
            .cloned()
            .collect())
    }

    /// Open every closed gate whose awaited bead has closed.
    pub fn gate_check(&mut self) -> Result<GateCheck> {
        let (checked, ready): (usize, Vec<String>) = {
            let db = self.current_db()?;
            let awaiting: Vec<&Gate> = db
                .gates
                .values()
                .filter(|g| g.status == GateStatus::Closed && g.await_id.is_some())
                .collect();
            let ready = awaiting
                .iter()
                .filter(|g| {
                    g.await_id
                        .as_deref()
                        .and_then(|id| self.lookup(id))
                        .is_some_and(|i| i.status.is_closed())
                })
                .map(|g| g.id.clone())
                .collect();
            (awaiting.len(), ready)
        };
        for id in &ready {
            self.gate_resolve(id)?;
        }
        Ok(GateCheck {
            checked,
            opened: ready,
        })
    }

    // Swarms

    pub fn swarm_create(
        &mut self,
        epic_id: &str,
        coordinator: Option<&str>,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Swarm> {
        let epic = self.issue(epic_id)?;
        if epic.issue_type != "epic" {
            return Err(OpsError::bad_argument(
                "epic",
                format!("{epic_id} is a {}, not an epic", epic.issue_type),
            ));
        }
        let opts = CreateOptions {
            title: format!("Swarm: {}", epic.title),
            issue_type: Some("swarm".to_string()),
            prefix: Some(id_prefix(epic_id).to_string()),
            ..CreateOptions::default()
        };
        let issue = self.create(None, &opts, actor, now)?;
        let swarm = Swarm {
            id: issue.id.clone(),
            epic_id: epic_id.to_string(),
            title: issue.title,
            coordinator: coordinator.map(str::to_string),
        };
        self.db_for_id_mut(&swarm.id)?
            .swarms
            .insert(swarm.id.clone(), swarm.clone());
        Ok(swarm)
    }

    pub fn swarm_status(&self, swarm_id: &str) -> Result<SwarmStatus> {
        let swarm = self
            .db_for_id(swarm_id)?
            .swarms
            .get(swarm_id)
            .ok_or_else(|| OpsError::not_found(format!("swarm {swarm_id}")))?;
        let mut status = SwarmStatus {
            swarm_id: swarm_id.to_string(),
            epic_id: swarm.epic_id.clone(),
            ..SwarmStatus::default()
        };
        for child in self.children_of(&swarm.epic_id) {
            status.total += 1;
            let bucket = if child.status.is_closed() {
                &mut status.completed
            } else if self.is_blocked(child) {
                &mut status.blocked
            } else if child.status == Status::Open {
                &mut status.ready
            } else {
                &mut status.active
            };
            bucket.push(child.id.clone());
        }
        Ok(status)
    }

    pub fn swarm_list(&self) -> Result<Vec<Swarm>> {
        Ok(self.current_db()?.swarms.values().cloned().collect())
    }

    pub fn swarm_validate(&self, epic_id: &str) -> Result<SwarmValidation> {
        self.issue(epic_id)?;
        let children: Vec<String> = self
            .children_of(epic_id)
            .into_iter()
            .map(|c| c.id.clone())
            .collect();
        let mut report = SwarmValidation {
            epic_id: epic_id.to_string(),
            ..SwarmValidation::default()
        };
        if children.is_empty() {
            report.warnings.push(format!("{epic_id} has no children"));
        }

        let (waves, stuck) = self.waves(&children);
        report.waves = waves;
        if !stuck.is_empty() {
            report
                .errors
                .push(format!("dependency cycle among: {}", stuck.join(", ")));
        }
        for child in &children {
            for blocker in self.open_blockers(child) {
                if !children.contains(&blocker) {
                    report
                        .warnings
                        .push(format!("{child} waits on {blocker} outside the epic"));
                }
            }
        }
        report.valid = report.errors.is_empty();
        Ok(report)
    }

    // Formulas

    pub fn install_formula(&mut self, formula: Formula) -> Result<()> {
        self.current_db_mut()?
            .formulas
            .insert(formula.name.clone(), formula);
        Ok(())
    }

    pub fn formula_show(&self, name: &str) -> Result<Formula> {
        self.current_db()?
            .formulas
            .get(name)
            .cloned()
            .ok_or_else(|| OpsError::not_found(format!("formula {name}")))
    }

    pub fn formula_list(&self) -> Result<Vec<Formula>> {
        Ok(self.current_db()?.formulas.values().cloned().collect())
    }

    pub fn cook(&mut self, name: &str) -> Result<MoleculeProto> {
        let formula = self.formula_show(name)?;
        let steps = formula
            .steps
            .iter()
            .map(|s| display_title(&s.title, &s.id))
            .chain(formula.legs.iter().map(|l| display_title(&l.title, &l.id)))
            .collect();
        let proto = MoleculeProto {
            id: proto_id_for(name),
            title: formula.name.clone(),
            steps,
        };
        self.install_proto(proto.clone())?;
        debug!(formula = name, proto = %proto.id, "Cooked formula");
        Ok(proto)
    }

    pub fn formula_leg_add(&mut self, formula: &str, leg_id: &str, title: &str) -> Result<()> {
        require_non_empty("leg", leg_id)?;
        let entry = self
            .current_db_mut()?
            .formulas
            .get_mut(formula)
            .ok_or_else(|| OpsError::not_found(format!("formula {formula}")))?;
        if entry.legs.iter().any(|l| l.id == leg_id) {
            return Err(OpsError::bad_argument(
                "leg",
                format!("{leg_id} already exists in {formula}"),
            ));
        }
        entry.legs.push(FormulaLeg {
            id: leg_id.to_string(),
            title: title.to_string(),
            description: String::new(),
        });
        Ok(())
    }

    // Labels, slots, agents

    pub fn label_add(&mut self, id: &str, label: &str, now: DateTime<Utc>) -> Result<()> {
        require_non_empty("label", label)?;
        self.mutate(id, |issue| {
            if issue.add_label(label.trim()) {
                issue.updated_at = now;
            }
            Ok(())
        })
    }

    pub fn label_remove(&mut self, id: &str, label: &str, now: DateTime<Utc>) -> Result<()> {
        self.mutate(id, |issue| {
            if issue.remove_label(label.trim()) {
                issue.updated_at = now;
            }
            Ok(())
        })
    }

    pub fn agent_state(&mut self, id: &str, state: &str, now: DateTime<Utc>) -> Result<()> {
        validate_member("state", state, AGENT_STATES)?;
        self.mutate(id, |issue| {
            issue.agent_state = Some(state.to_string());
            issue.updated_at = now;
            Ok(())
        })
    }

    pub fn slot_show(&self, id: &str) -> Result<Slots> {
        let issue = self.issue(id)?;
        Ok(Slots {
            hook: issue.hook_bead.clone(),
            role: issue.role_bead.clone(),
        })
    }

    pub fn slot_set(
        &mut self,
        id: &str,
        slot: &str,
        bead_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        validate_member("slot", slot, SLOT_NAMES)?;
        self.issue(bead_id)?;
        self.mutate(id, |issue| {
            *slot_field(issue, slot) = Some(bead_id.to_string());
            issue.updated_at = now;
            Ok(())
        })
    }

    pub fn slot_clear(&mut self, id: &str, slot: &str, now: DateTime<Utc>) -> Result<()> {
        validate_member("slot", slot, SLOT_NAMES)?;
        self.mutate(id, |issue| {
            *slot_field(issue, slot) = None;
            issue.updated_at = now;
            Ok(())
        })
    }

    // Merge slot

    pub fn merge_slot_create(&mut self) -> Result<String> {
        let db = self.current_db_mut()?;
        let id = format!("{}-merge-slot", db.prefix);
        if db.merge_slot.is_none() {
            db.merge_slot = Some(MergeSlotStatus {
                id: id.clone(),
                available: true,
                holder: None,
                waiters: Vec::new(),
            });
            db.record_write();
        }
        Ok(id)
    }

    pub fn merge_slot_check(&self) -> Result<MergeSlotStatus> {
        self.current_db()?
            .merge_slot
            .clone()
            .ok_or_else(|| OpsError::not_found("merge slot"))
    }

    fn merge_slot_mut(&mut self) -> Result<&mut MergeSlotStatus> {
        self.current_db_mut()?
            .merge_slot
            .as_mut()
            .ok_or_else(|| OpsError::not_found("merge slot"))
    }

    pub fn merge_slot_acquire(&mut self, holder: &str, wait: bool) -> Result<MergeSlotStatus> {
        require_non_empty("holder", holder)?;
        let slot = self.merge_slot_mut()?;
        if slot.available {
            slot.available = false;
            slot.holder = Some(holder.to_string());
            slot.waiters.retain(|w| w != holder);
        } else if slot.holder.as_deref() != Some(holder) && wait {
            push_unique(&mut slot.waiters, holder);
        }
        Ok(slot.clone())
    }

    pub fn merge_slot_release(&mut self, holder: &str) -> Result<()> {
        let slot = self.merge_slot_mut()?;
        if slot.holder.as_deref() != Some(holder) {
            return Err(OpsError::bad_argument(
                "holder",
                format!("{holder} does not hold {}", slot.id),
            ));
        }
        slot.holder = None;
        slot.available = true;
        Ok(())
    }

    // Comments, stats, housekeeping

    pub fn comment(
        &mut self,
        id: &str,
        text: &str,
        author: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Comment> {
        require_non_empty("text", text)?;
        self.issue(id)?;
        let db = self.db_for_id_mut(id)?;
        db.next_comment_id += 1;
        let comment = Comment {
            id: db.next_comment_id,
            issue_id: id.to_string(),
            author: author.unwrap_or_default().to_string(),
            text: text.to_string(),
            created_at: now,
        };
        db.comments
            .entry(id.to_string())
            .or_default()
            .push(comment.clone());
        db.record_write();
        Ok(comment)
    }

    pub fn comments(&self, id: &str) -> Result<Vec<Comment>> {
        self.issue(id)?;
        Ok(self
            .db_for_id(id)?
            .comments
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    pub fn stats(&self) -> Result<Stats> {
        let db = self.current_db()?;
        let issues: Vec<&Issue> = db.live_records().into_iter().map(|r| &r.issue).collect();
        let mut stats = Stats::tally(issues.iter().copied());
        stats.blocked = issues.iter().filter(|i| self.is_blocked(i)).count();
        stats.ready = issues.iter().filter(|i| self.is_ready(i)).count();
        Ok(stats)
    }

    pub fn cleanup(&mut self) -> Result<Vec<String>> {
        let closed: Vec<String> = self
            .current_db()?
            .live_records()
            .into_iter()
            .filter(|r| r.issue.status.is_closed())
            .map(|r| r.issue.id.clone())
            .collect();
        let ids: Vec<&str> = closed.iter().map(String::as_str).collect();
        self.delete(&ids, &FORCE_HARD)
    }
}

fn proto_id_for(formula: &str) -> String {
    format!("mol-{formula}")
}

fn display_title(title: &str, id: &str) -> String {
    let chosen = if title.is_empty() { id } else { title };
    chosen.to_string()
}

fn slot_field<'a>(issue: &'a mut Issue, slot: &str) -> &'a mut Option<String> {
    if slot == "role" {
        &mut issue.role_bead
    } else {
        &mut issue.hook_bead
    }
}
