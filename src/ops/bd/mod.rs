//! `bd` subprocess client.
//!
//! [`BdCli`] is generic over a [`Workarounds`] mode. [`Production`] turns on
//! every workaround for upstream quirks; [`Raw`] turns them all off so the
//! conformance harness can observe upstream as-is.
//!
//! The workarounds are:
//!
//! 1. `BEADS_DIR` is set to the resolved storage directory on every call,
//!    never inherited.
//! 2. ID-taking operations that upstream misroutes (per the
//!    [`BugRegistry`]) run from the rig that owns the ID's prefix.
//! 3. Output is normalised: silent failures become errors, status filters
//!    are applied as families, ready results are re-sorted, `(not set)`
//!    config values read as empty.

pub mod decode;
mod exec;

pub use decode::{decode_keyed, decode_list, decode_one};
pub use exec::Captured;

use crate::config::routing::{
    extract_prefix, find_town_root, resolve_hook_dir, resolve_storage_dir_bounded,
};
use crate::config::{ENV_BEADS_DIR, ENV_HOME, OpsConfig, WriteMode};
use crate::error::{OpsError, Result};
use crate::model::{
    Comment, DaemonHealth, DaemonStatus, Formula, Gate, GateCheck, Issue, MergeSlotStatus,
    MolCurrent, MoleculeProto, Slots, Stats, StatusFilter, Swarm, SwarmStatus, SwarmValidation,
    SyncStatus, WispGcResult,
};
use crate::ops::{
    AGENT_STATES, CloseOptions, CreateOptions, DeleteOptions, ListOptions, Ops, SLOT_NAMES,
    SearchOptions, UpdateOptions, validate_member,
};
use crate::registry::{BugRegistry, Operation};
use crate::util::{check_explicit_prefix, validate_id};
use once_cell::sync::Lazy;
use regex::Regex;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Compile-time switches selecting which upstream workarounds apply.
pub trait Workarounds: Clone + Send + Sync + 'static {
    /// Implementation name used in logs and reports.
    const NAME: &'static str;
    /// Set `BEADS_DIR` explicitly on every call.
    const EXPLICIT_STORAGE_ENV: bool;
    /// Pre-resolve the working directory for misrouted operations.
    const ROUTE_BROKEN_OPS: bool;
    /// Canonicalise upstream output beyond bare JSON decoding.
    const NORMALIZE_OUTPUT: bool;
}

/// Every workaround on.
#[derive(Debug, Clone, Copy, Default)]
pub struct Production;

impl Workarounds for Production {
    const NAME: &'static str = "wrapper";
    const EXPLICIT_STORAGE_ENV: bool = true;
    const ROUTE_BROKEN_OPS: bool = true;
    const NORMALIZE_OUTPUT: bool = true;
}

/// No workarounds: upstream behavior, bugs included.
#[derive(Debug, Clone, Copy, Default)]
pub struct Raw;

impl Workarounds for Raw {
    const NAME: &'static str = "raw_wrapper";
    const EXPLICIT_STORAGE_ENV: bool = false;
    const ROUTE_BROKEN_OPS: bool = false;
    const NORMALIZE_OUTPUT: bool = false;
}

/// The production implementation.
pub type Wrapper = BdCli<Production>;

/// The diagnostic implementation.
pub type RawWrapper = BdCli<Raw>;

static SEMVER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?)")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

fn argv<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn push_opt(args: &mut Vec<String>, flag: &str, value: Option<&str>) {
    if let Some(value) = value {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

/// Client for the `bd` binary rooted at one working directory.
#[derive(Debug, Clone)]
pub struct BdCli<M: Workarounds> {
    work_dir: PathBuf,
    config: OpsConfig,
    registry: BugRegistry,
    mode: PhantomData<M>,
}

impl<M: Workarounds> BdCli<M> {
    /// A client at `work_dir` configured from the environment.
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(work_dir, OpsConfig::from_env())
    }

    #[must_use]
    pub fn with_config(work_dir: impl Into<PathBuf>, config: OpsConfig) -> Self {
        Self {
            work_dir: work_dir.into(),
            config,
            registry: BugRegistry::global().clone(),
            mode: PhantomData,
        }
    }

    /// Replace the routing registry consulted for misrouted operations.
    #[must_use]
    pub fn with_registry(mut self, registry: BugRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The same client pointed at another working directory.
    #[must_use]
    pub fn at(&self, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    #[must_use]
    pub const fn config(&self) -> &OpsConfig {
        &self.config
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        M::NAME
    }

    /// Run `bd version` and parse the semantic version it reports.
    ///
    /// # Errors
    ///
    /// `NotInstalled` when the binary is missing; `Upstream` when the output
    /// carries no version.
    pub fn probe(&self) -> Result<semver::Version> {
        let text = self.version()?;
        SEMVER
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| semver::Version::parse(m.as_str()).ok())
            .ok_or_else(|| OpsError::Upstream {
                command: Operation::Version.as_str().to_string(),
                stderr: format!("unrecognised version output: {}", text.trim()),
                exit_code: Some(0),
            })
    }

    /// The directory an ID-taking operation runs from.
    ///
    /// Operations upstream routes correctly run from the client's working
    /// directory. Misrouted ones run from the rig owning the ID's prefix
    /// when a town root and route exist.
    pub fn dir_for(&self, op: Operation, id: &str) -> Result<PathBuf> {
        if !M::ROUTE_BROKEN_OPS {
            return Ok(self.work_dir.clone());
        }
        if extract_prefix(id).is_empty() {
            return Err(OpsError::routing(id, "ID has no prefix"));
        }
        if self.registry.is_fixed_op(op) {
            return Ok(self.work_dir.clone());
        }
        let dir = match find_town_root(&self.work_dir) {
            Ok(town) => resolve_hook_dir(&town, id, &self.work_dir),
            Err(err) => {
                debug!(op = %op, error = %err, "No town root; using work dir");
                self.work_dir.clone()
            }
        };
        debug!(op = %op, id, dir = %dir.display(), "Routed around upstream");
        Ok(dir)
    }

    /// Group IDs by the directory each must run from, keeping first-seen
    /// order.
    fn group_by_dir<'a>(
        &self,
        op: Operation,
        ids: &[&'a str],
    ) -> Result<Vec<(PathBuf, Vec<&'a str>)>> {
        let mut groups: Vec<(PathBuf, Vec<&'a str>)> = Vec::new();
        for &id in ids {
            let dir = self.dir_for(op, id)?;
            match groups.iter_mut().find(|(d, _)| *d == dir) {
                Some((_, group)) => group.push(id),
                None => groups.push((dir, vec![id])),
            }
        }
        Ok(groups)
    }

    fn global_flags(&self, op: Operation) -> Vec<String> {
        let mut flags = Vec::new();
        if matches!(op, Operation::Run | Operation::Version) {
            return flags;
        }
        let daemon_op = matches!(
            op,
            Operation::DaemonStart
                | Operation::DaemonStop
                | Operation::DaemonStatus
                | Operation::DaemonHealth
        );
        if !daemon_op && (self.config.write_mode == WriteMode::Direct || !op.is_write()) {
            flags.push("--no-daemon".to_string());
        }
        if self.config.allow_stale && !op.is_write() {
            flags.push("--allow-stale".to_string());
        }
        if op != Operation::Init {
            flags.push("--json".to_string());
        }
        flags
    }

    fn exec(&self, op: Operation, dir: &Path, args: &[String]) -> Result<Captured> {
        let storage = resolve_storage_dir_bounded(dir, self.config.max_redirect_depth);
        let needs_storage = exec::needs_storage(op);
        if needs_storage && !storage.is_dir() {
            return Err(OpsError::NotARepo {
                path: dir.to_path_buf(),
            });
        }

        let mut full = self.global_flags(op);
        full.extend_from_slice(args);

        let mut cmd = Command::new(&self.config.bd_binary);
        cmd.current_dir(dir).args(&full).env("NO_COLOR", "1");
        if let Some(home) = &self.config.home {
            cmd.env(ENV_HOME, home);
        }
        if M::EXPLICIT_STORAGE_ENV && needs_storage {
            cmd.env(ENV_BEADS_DIR, &storage);
        } else {
            cmd.env_remove(ENV_BEADS_DIR);
        }

        debug!(mode = M::NAME, op = %op, dir = %dir.display(), args = ?full, "Invoking bd");
        let (output, elapsed_ms) = exec::run(cmd, op, &self.config.bd_binary)?;
        if !output.status.success() {
            return Err(exec::classify_failure(op.as_str(), &output));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if M::NORMALIZE_OUTPUT
            && !exec::quiet_on_success(op)
            && stdout.trim().is_empty()
            && !stderr.trim().is_empty()
        {
            warn!(op = %op, stderr = %stderr.trim(), "bd exited 0 with only stderr output");
            return Err(exec::classify_failure(op.as_str(), &output));
        }
        debug!(op = %op, elapsed_ms, bytes = stdout.len(), "bd succeeded");
        Ok(Captured { stdout, stderr })
    }

    /// Run from the working directory.
    fn call(&self, op: Operation, args: &[String]) -> Result<String> {
        self.exec(op, &self.work_dir, args).map(|c| c.stdout)
    }

    /// Run from the directory chosen for `id`.
    fn call_for(&self, op: Operation, id: &str, args: &[String]) -> Result<String> {
        let dir = self.dir_for(op, id)?;
        self.exec(op, &dir, args).map(|c| c.stdout)
    }

    /// Run once per routed group of IDs.
    fn call_each<F>(&self, op: Operation, ids: &[&str], build: F) -> Result<()>
    where
        F: Fn(&[&str]) -> Vec<String>,
    {
        for (dir, group) in self.group_by_dir(op, ids)? {
            self.exec(op, &dir, &build(&group))?;
        }
        Ok(())
    }

    fn require<T>(op: Operation, value: Option<T>) -> Result<T> {
        value.ok_or_else(|| OpsError::Upstream {
            command: op.as_str().to_string(),
            stderr: "bd returned no result".to_string(),
            exit_code: Some(0),
        })
    }

    fn found<T>(what: &str, value: Option<T>) -> Result<T> {
        value.ok_or_else(|| OpsError::not_found(what))
    }

    fn status_args(args: &mut Vec<String>, filter: &StatusFilter) {
        match filter {
            StatusFilter::All => args.push("--all".to_string()),
            // Upstream reads `--status open` literally; its default already
            // hides closed issues.
            StatusFilter::OpenFamily if M::NORMALIZE_OUTPUT => {}
            other => push_opt(args, "--status", other.as_arg()),
        }
    }

    fn narrow(mut issues: Vec<Issue>, filter: &StatusFilter, limit: usize) -> Vec<Issue> {
        if M::NORMALIZE_OUTPUT {
            issues.retain(|i| filter.matches(&i.status));
            if limit > 0 {
                issues.truncate(limit);
            }
        }
        issues
    }

    fn ready_as(&self, op: Operation, label: Option<&str>, limit: usize) -> Result<Vec<Issue>> {
        let mut args = argv(["ready"]);
        push_opt(&mut args, "--label", label);
        if limit > 0 {
            args.push("--limit".to_string());
            args.push(limit.to_string());
        }
        let mut issues: Vec<Issue> = decode_list(&self.call(op, &args)?, "issues")?;
        if M::NORMALIZE_OUTPUT {
            issues.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
            });
            if limit > 0 {
                issues.truncate(limit);
            }
        }
        Ok(issues)
    }

    fn create_as(&self, op: Operation, id: Option<&str>, opts: &CreateOptions) -> Result<Issue> {
        let priority = opts.validate()?;
        let mut args = argv(["create", "--title", opts.title.trim()]);
        push_opt(&mut args, "--id", id);
        push_opt(&mut args, "--description", opts.description.as_deref());
        push_opt(&mut args, "--type", opts.issue_type.as_deref());
        if let Some(priority) = priority {
            args.push("--priority".to_string());
            args.push(priority.0.to_string());
        }
        push_opt(&mut args, "--parent", opts.parent.as_deref());
        push_opt(&mut args, "--assignee", opts.assignee.as_deref());
        if !opts.labels.is_empty() {
            args.push("--labels".to_string());
            args.push(opts.labels.join(","));
        }
        let actor = opts.actor.as_deref().or(self.config.actor.as_deref());
        push_opt(&mut args, "--actor", actor);
        if opts.ephemeral {
            args.push("--ephemeral".to_string());
        }
        push_opt(&mut args, "--role-type", opts.role_type.as_deref());
        push_opt(&mut args, "--prefix", opts.prefix.as_deref());

        let stdout = match id {
            Some(id) => self.call_for(op, id, &args)?,
            None => self.call(op, &args)?,
        };
        Self::require(op, decode_one(&stdout)?)
    }

    fn close_as(&self, op: Operation, opts: &CloseOptions, ids: &[&str]) -> Result<()> {
        let session = opts
            .session
            .as_deref()
            .or(self.config.session_id.as_deref());
        self.call_each(op, ids, |group| {
            let mut args = argv(["close"]);
            args.extend(group.iter().map(|id| (*id).to_string()));
            push_opt(&mut args, "--reason", opts.reason.as_deref());
            if opts.force {
                args.push("--force".to_string());
            }
            push_opt(&mut args, "--session", session);
            args
        })
    }

    fn delete_as(&self, op: Operation, opts: &DeleteOptions, ids: &[&str]) -> Result<()> {
        self.call_each(op, ids, |group| {
            let mut args = argv(["delete"]);
            args.extend(group.iter().map(|id| (*id).to_string()));
            if opts.force {
                args.push("--force".to_string());
            }
            if opts.hard {
                args.push("--hard".to_string());
            }
            if opts.cascade {
                args.push("--cascade".to_string());
            }
            args
        })
    }

    fn dep_add_as(
        &self,
        op: Operation,
        issue: &str,
        depends_on: &str,
        dep_type: &str,
    ) -> Result<()> {
        let dep_type: crate::model::DependencyType = dep_type.parse()?;
        let args = argv(["dep", "add", issue, depends_on, "--type", dep_type.as_str()]);
        self.call_for(op, issue, &args).map(drop)
    }
}

impl<M: Workarounds> Ops for BdCli<M> {
    fn list(&self, opts: &ListOptions) -> Result<Vec<Issue>> {
        let mut args = argv(["list"]);
        Self::status_args(&mut args, &opts.status);
        push_opt(&mut args, "--type", opts.issue_type.as_deref());
        push_opt(&mut args, "--label", opts.label.as_deref());
        push_opt(&mut args, "--assignee", opts.assignee.as_deref());
        push_opt(&mut args, "--parent", opts.parent.as_deref());
        if opts.limit > 0 {
            args.push("--limit".to_string());
            args.push(opts.limit.to_string());
        }
        let issues = decode_list(&self.call(Operation::List, &args)?, "issues")?;
        Ok(Self::narrow(issues, &opts.status, opts.limit))
    }

    fn show(&self, id: &str) -> Result<Issue> {
        let stdout = self.call_for(Operation::Show, id, &argv(["show", id]))?;
        Self::found(id, decode_one(&stdout)?)
    }

    fn show_multiple(&self, ids: &[&str]) -> Result<Vec<Issue>> {
        let mut found: Vec<Issue> = Vec::new();
        for (dir, group) in self.group_by_dir(Operation::ShowMultiple, ids)? {
            let mut args = argv(["show"]);
            args.extend(group.iter().map(|id| (*id).to_string()));
            match self.exec(Operation::ShowMultiple, &dir, &args) {
                Ok(out) => found.extend(decode_list::<Issue>(&out.stdout, "issues")?),
                Err(err) if err.is_not_found() && group.len() > 1 => {
                    // One missing ID fails the whole upstream call.
                    for id in group {
                        let args = argv(["show", id]);
                        match self.exec(Operation::ShowMultiple, &dir, &args) {
                            Ok(out) => found.extend(decode_one::<Issue>(&out.stdout)?),
                            Err(err) if err.is_not_found() => {}
                            Err(err) => return Err(err),
                        }
                    }
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(ids
            .iter()
            .filter_map(|id| found.iter().find(|i| i.id == *id).cloned())
            .collect())
    }

    fn create(&self, opts: &CreateOptions) -> Result<Issue> {
        self.create_as(Operation::Create, None, opts)
    }

    fn create_with_id(&self, id: &str, opts: &CreateOptions) -> Result<Issue> {
        validate_id(id)?;
        check_explicit_prefix(id, opts.prefix.as_deref())?;
        self.create_as(Operation::CreateWithId, Some(id), opts)
    }

    fn update(&self, id: &str, opts: &UpdateOptions) -> Result<()> {
        opts.validate()?;
        if opts.is_empty() {
            return Ok(());
        }
        let mut args = argv(["update", id]);
        push_opt(&mut args, "--title", opts.title.as_deref());
        push_opt(&mut args, "--description", opts.description.as_deref());
        push_opt(&mut args, "--status", opts.status.as_deref());
        if let Some(priority) = opts.priority {
            args.push("--priority".to_string());
            args.push(priority.to_string());
        }
        push_opt(&mut args, "--assignee", opts.assignee.as_deref());
        push_opt(&mut args, "--parent", opts.parent.as_deref());
        if let Some(labels) = &opts.set_labels {
            args.push("--set-labels".to_string());
            args.push(labels.join(","));
        }
        for label in &opts.add_labels {
            args.push("--add-label".to_string());
            args.push(label.clone());
        }
        for label in &opts.remove_labels {
            args.push("--remove-label".to_string());
            args.push(label.clone());
        }
        self.call_for(Operation::Update, id, &args).map(drop)
    }

    fn close(&self, ids: &[&str]) -> Result<()> {
        self.close_as(Operation::Close, &CloseOptions::default(), ids)
    }

    fn close_with_reason(&self, reason: &str, ids: &[&str]) -> Result<()> {
        let opts = CloseOptions {
            reason: Some(reason.to_string()),
            ..CloseOptions::default()
        };
        self.close_as(Operation::CloseWithReason, &opts, ids)
    }

    fn close_with_options(&self, opts: &CloseOptions, ids: &[&str]) -> Result<()> {
        self.close_as(Operation::CloseWithOptions, opts, ids)
    }

    fn delete(&self, ids: &[&str]) -> Result<()> {
        let opts = DeleteOptions {
            force: true,
            ..DeleteOptions::default()
        };
        self.delete_as(Operation::Delete, &opts, ids)
    }

    fn delete_with_options(&self, opts: &DeleteOptions, ids: &[&str]) -> Result<()> {
        self.delete_as(Operation::DeleteWithOptions, opts, ids)
    }

    fn reopen(&self, id: &str) -> Result<()> {
        self.call_for(Operation::Reopen, id, &argv(["reopen", id]))
            .map(drop)
    }

    fn release(&self, id: &str) -> Result<()> {
        let args = argv(["update", id, "--status", "open", "--assignee", ""]);
        self.call_for(Operation::Release, id, &args).map(drop)
    }

    fn ready(&self) -> Result<Vec<Issue>> {
        self.ready_as(Operation::Ready, None, 0)
    }

    fn ready_with_label(&self, label: &str, limit: usize) -> Result<Vec<Issue>> {
        self.ready_as(Operation::ReadyWithLabel, Some(label), limit)
    }

    fn blocked(&self) -> Result<Vec<Issue>> {
        decode_list(&self.call(Operation::Blocked, &argv(["blocked"]))?, "issues")
    }

    fn add_dependency(&self, issue: &str, depends_on: &str) -> Result<()> {
        self.dep_add_as(Operation::AddDependency, issue, depends_on, "blocks")
    }

    fn add_dependency_with_type(
        &self,
        issue: &str,
        depends_on: &str,
        dep_type: &str,
    ) -> Result<()> {
        self.dep_add_as(Operation::AddDependencyWithType, issue, depends_on, dep_type)
    }

    fn remove_dependency(&self, issue: &str, depends_on: &str) -> Result<()> {
        let args = argv(["dep", "remove", issue, depends_on]);
        self.call_for(Operation::RemoveDependency, issue, &args)
            .map(drop)
    }

    fn sync(&self) -> Result<()> {
        self.call(Operation::Sync, &argv(["sync"])).map(drop)
    }

    fn sync_from_main(&self) -> Result<()> {
        self.call(Operation::SyncFromMain, &argv(["sync", "--from-main"]))
            .map(drop)
    }

    fn sync_import_only(&self) -> Result<()> {
        self.call(Operation::SyncImportOnly, &argv(["sync", "--import-only"]))
            .map(drop)
    }

    fn get_sync_status(&self) -> Result<SyncStatus> {
        let stdout = self.call(Operation::GetSyncStatus, &argv(["sync", "--status"]))?;
        Ok(decode_one(&stdout)?.unwrap_or_default())
    }

    fn config_get(&self, key: &str) -> Result<String> {
        let stdout = self.call(Operation::ConfigGet, &argv(["config", "get", key]))?;
        Ok(decode::config_value(&stdout, key, M::NORMALIZE_OUTPUT))
    }

    fn config_set(&self, key: &str, value: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(OpsError::bad_argument("key", "cannot be empty"));
        }
        self.call(Operation::ConfigSet, &argv(["config", "set", key, value]))
            .map(drop)
    }

    fn init(&self, prefix: &str) -> Result<()> {
        let bare = prefix.trim_end_matches('-');
        if bare.is_empty() {
            return Err(OpsError::bad_argument("prefix", "cannot be empty"));
        }
        self.call(Operation::Init, &argv(["init", "--prefix", bare, "--quiet"]))
            .map(drop)
    }

    fn migrate(&self) -> Result<()> {
        self.call(Operation::Migrate, &argv(["migrate"])).map(drop)
    }

    fn daemon_start(&self) -> Result<()> {
        self.call(Operation::DaemonStart, &argv(["daemon", "start"]))
            .map(drop)
    }

    fn daemon_stop(&self) -> Result<()> {
        self.call(Operation::DaemonStop, &argv(["daemon", "stop"]))
            .map(drop)
    }

    fn daemon_status(&self) -> Result<DaemonStatus> {
        let stdout = self.call(Operation::DaemonStatus, &argv(["daemon", "status"]))?;
        Ok(decode_one(&stdout)?.unwrap_or_default())
    }

    fn daemon_health(&self) -> Result<DaemonHealth> {
        let stdout = self.call(Operation::DaemonHealth, &argv(["daemon", "health"]))?;
        Ok(decode_one(&stdout)?.unwrap_or_default())
    }

    fn mol_seed(&self) -> Result<()> {
        self.call(Operation::MolSeed, &argv(["mol", "seed"])).map(drop)
    }

    fn mol_current(&self, molecule_id: &str) -> Result<MolCurrent> {
        let args = argv(["mol", "current", molecule_id]);
        let stdout = self.call_for(Operation::MolCurrent, molecule_id, &args)?;
        Self::found(molecule_id, decode_one(&stdout)?)
    }

    fn mol_catalog(&self) -> Result<Vec<MoleculeProto>> {
        decode_list(&self.call(Operation::MolCatalog, &argv(["mol", "catalog"]))?, "protos")
    }

    fn wisp_create(&self, proto_id: &str, actor: &str) -> Result<Issue> {
        let args = argv(["mol", "wisp", proto_id, "--actor", actor]);
        let stdout = self.call(Operation::WispCreate, &args)?;
        Self::require(Operation::WispCreate, decode_keyed(&stdout, "wisp")?)
    }

    fn wisp_list(&self, all: bool) -> Result<Vec<Issue>> {
        let mut args = argv(["mol", "wisp", "list"]);
        if all {
            args.push("--all".to_string());
        }
        decode_list(&self.call(Operation::WispList, &args)?, "wisps")
    }

    fn wisp_gc(&self) -> Result<WispGcResult> {
        let stdout = self.call(Operation::WispGc, &argv(["mol", "wisp", "gc"]))?;
        Ok(decode_one(&stdout)?.unwrap_or_default())
    }

    fn mol_bond(&self, molecule_id: &str, bead_id: &str) -> Result<()> {
        let args = argv(["mol", "bond", molecule_id, bead_id]);
        self.call_for(Operation::MolBond, molecule_id, &args)
            .map(drop)
    }

    fn mol_burn(&self, ids: &[&str]) -> Result<()> {
        self.call_each(Operation::MolBurn, ids, |group| {
            let mut args = argv(["mol", "burn"]);
            args.extend(group.iter().map(|id| (*id).to_string()));
            args.push("--force".to_string());
            args
        })
    }

    fn gate_create(&self, title: &str, await_id: Option<&str>) -> Result<Gate> {
        if title.trim().is_empty() {
            return Err(OpsError::bad_argument("title", "cannot be empty"));
        }
        let mut args = argv(["gate", "create", "--title", title]);
        push_opt(&mut args, "--await", await_id);
        let stdout = self.call(Operation::GateCreate, &args)?;
        Self::require(Operation::GateCreate, decode_one(&stdout)?)
    }

    fn gate_show(&self, id: &str) -> Result<Gate> {
        let stdout = self.call_for(Operation::GateShow, id, &argv(["gate", "show", id]))?;
        Self::found(id, decode_one(&stdout)?)
    }

    fn gate_wait(&self, id: &str, waiter: &str) -> Result<()> {
        let args = argv(["gate", "wait", id, "--notify", waiter]);
        self.call_for(Operation::GateWait, id, &args).map(drop)
    }

    fn gate_list(&self, all: bool) -> Result<Vec<Gate>> {
        let mut args = argv(["gate", "list"]);
        if all {
            args.push("--all".to_string());
        }
        decode_list(&self.call(Operation::GateList, &args)?, "gates")
    }

    fn gate_resolve(&self, id: &str) -> Result<()> {
        self.call_for(Operation::GateResolve, id, &argv(["gate", "resolve", id]))
            .map(drop)
    }

    fn gate_add_waiter(&self, id: &str, waiter: &str) -> Result<()> {
        let args = argv(["gate", "add-waiter", id, waiter]);
        self.call_for(Operation::GateAddWaiter, id, &args)
            .map(drop)
    }

    fn gate_check(&self) -> Result<GateCheck> {
        let stdout = self.call(Operation::GateCheck, &argv(["gate", "check"]))?;
        Ok(decode_one(&stdout)?.unwrap_or_default())
    }

    fn swarm_status(&self, swarm_id: &str) -> Result<SwarmStatus> {
        let args = argv(["swarm", "status", swarm_id]);
        let stdout = self.call_for(Operation::SwarmStatus, swarm_id, &args)?;
        Self::found(swarm_id, decode_one(&stdout)?)
    }

    fn swarm_create(&self, epic_id: &str, coordinator: Option<&str>) -> Result<Swarm> {
        let mut args = argv(["swarm", "create", epic_id]);
        push_opt(&mut args, "--coordinator", coordinator);
        let stdout = self.call_for(Operation::SwarmCreate, epic_id, &args)?;
        Self::require(Operation::SwarmCreate, decode_one(&stdout)?)
    }

    fn swarm_list(&self) -> Result<Vec<Swarm>> {
        decode_list(&self.call(Operation::SwarmList, &argv(["swarm", "list"]))?, "swarms")
    }

    fn swarm_validate(&self, epic_id: &str) -> Result<SwarmValidation> {
        let args = argv(["swarm", "validate", epic_id]);
        let stdout = self.call_for(Operation::SwarmValidate, epic_id, &args)?;
        Self::found(epic_id, decode_one(&stdout)?)
    }

    fn formula_show(&self, name: &str) -> Result<Formula> {
        let stdout = self.call(Operation::FormulaShow, &argv(["formula", "show", name]))?;
        Self::found(name, decode_one(&stdout)?)
    }

    fn formula_list(&self) -> Result<Vec<Formula>> {
        decode_list(&self.call(Operation::FormulaList, &argv(["formula", "list"]))?, "formulas")
    }

    fn cook(&self, name: &str) -> Result<MoleculeProto> {
        let stdout = self.call(Operation::Cook, &argv(["cook", name]))?;
        Self::require(Operation::Cook, decode_keyed(&stdout, "proto")?)
    }

    fn formula_leg_add(&self, formula: &str, leg_id: &str, title: &str) -> Result<()> {
        let args = argv(["formula", "leg", "add", formula, leg_id, "--title", title]);
        self.call(Operation::FormulaLegAdd, &args).map(drop)
    }

    fn label_add(&self, id: &str, label: &str) -> Result<()> {
        if label.trim().is_empty() {
            return Err(OpsError::bad_argument("label", "cannot be empty"));
        }
        self.call_for(Operation::LabelAdd, id, &argv(["label", "add", id, label]))
            .map(drop)
    }

    fn label_remove(&self, id: &str, label: &str) -> Result<()> {
        let args = argv(["label", "remove", id, label]);
        self.call_for(Operation::LabelRemove, id, &args).map(drop)
    }

    fn agent_state(&self, id: &str, state: &str) -> Result<()> {
        validate_member("state", state, AGENT_STATES)?;
        self.call_for(Operation::AgentState, id, &argv(["agent", "state", id, state]))
            .map(drop)
    }

    fn slot_show(&self, id: &str) -> Result<Slots> {
        let stdout = self.call_for(Operation::SlotShow, id, &argv(["slot", "show", id]))?;
        Ok(decode_one(&stdout)?.unwrap_or_default())
    }

    fn slot_set(&self, id: &str, slot: &str, bead_id: &str) -> Result<()> {
        validate_member("slot", slot, SLOT_NAMES)?;
        let args = argv(["slot", "set", id, slot, bead_id]);
        self.call_for(Operation::SlotSet, id, &args).map(drop)
    }

    fn slot_clear(&self, id: &str, slot: &str) -> Result<()> {
        validate_member("slot", slot, SLOT_NAMES)?;
        let args = argv(["slot", "clear", id, slot]);
        self.call_for(Operation::SlotClear, id, &args).map(drop)
    }

    fn merge_slot_create(&self) -> Result<String> {
        let stdout = self.call(Operation::MergeSlotCreate, &argv(["merge-slot", "create"]))?;
        let status: MergeSlotStatus =
            Self::require(Operation::MergeSlotCreate, decode_one(&stdout)?)?;
        Ok(status.id)
    }

    fn merge_slot_check(&self) -> Result<MergeSlotStatus> {
        let stdout = self.call(Operation::MergeSlotCheck, &argv(["merge-slot", "check"]))?;
        Self::found("merge slot", decode_one(&stdout)?)
    }

    fn merge_slot_acquire(&self, holder: &str, wait: bool) -> Result<MergeSlotStatus> {
        let mut args = argv(["merge-slot", "acquire", "--holder", holder]);
        if wait {
            args.push("--wait".to_string());
        }
        let stdout = self.call(Operation::MergeSlotAcquire, &args)?;
        Ok(decode_one(&stdout)?.unwrap_or_default())
    }

    fn merge_slot_release(&self, holder: &str) -> Result<()> {
        let args = argv(["merge-slot", "release", "--holder", holder]);
        self.call(Operation::MergeSlotRelease, &args).map(drop)
    }

    fn comment(&self, id: &str, text: &str) -> Result<Comment> {
        if text.trim().is_empty() {
            return Err(OpsError::bad_argument("text", "cannot be empty"));
        }
        let mut args = argv(["comments", "add", id, text]);
        push_opt(&mut args, "--author", self.config.actor.as_deref());
        let stdout = self.call_for(Operation::Comment, id, &args)?;
        Self::require(Operation::Comment, decode_one(&stdout)?)
    }

    fn comments(&self, id: &str) -> Result<Vec<Comment>> {
        let stdout = self.call_for(Operation::Comments, id, &argv(["comments", id]))?;
        decode_list(&stdout, "comments")
    }

    fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<Issue>> {
        let mut args = argv(["search", query]);
        let filter = opts.status.clone().unwrap_or(StatusFilter::All);
        if opts.status.is_some() {
            Self::status_args(&mut args, &filter);
        }
        push_opt(&mut args, "--type", opts.issue_type.as_deref());
        if opts.limit > 0 {
            args.push("--limit".to_string());
            args.push(opts.limit.to_string());
        }
        let issues = decode_list(&self.call(Operation::Search, &args)?, "issues")?;
        Ok(Self::narrow(issues, &filter, opts.limit))
    }

    fn stats(&self) -> Result<Stats> {
        let stdout = self.call(Operation::Stats, &argv(["stats"]))?;
        Ok(decode_keyed(&stdout, "summary")?.unwrap_or_default())
    }

    fn version(&self) -> Result<String> {
        let stdout = self.call(Operation::Version, &argv(["version"]))?;
        Ok(stdout.trim().to_string())
    }

    fn cleanup(&self) -> Result<()> {
        self.call(Operation::Cleanup, &argv(["cleanup", "--force"]))
            .map(drop)
    }

    fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
        self.call(Operation::Run, &args).map(String::into_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::harness::TownEnv;

    fn wrapper(env: &TownEnv) -> Wrapper {
        Wrapper::with_config(env.rig_dir("gt"), env.config())
    }

    #[test]
    fn at_keeps_config_and_registry() {
        let env = TownEnv::new().unwrap();
        let registry = BugRegistry::from_entries(&[(Operation::Update, true)]);
        let base = RawWrapper::with_config(env.rig_root("gt"), env.config().with_actor("mayor"))
            .with_registry(registry.clone());
        let moved = base.at(env.rig_root("ap"));
        assert_eq!(moved.work_dir(), env.rig_root("ap"));
        assert_eq!(moved.config(), base.config());
        assert_eq!(moved.registry, registry);
        assert_eq!(moved.name(), "raw_wrapper");
    }

    #[test]
    fn broken_ops_route_to_owning_rig() {
        let env = TownEnv::new().unwrap();
        let bd = wrapper(&env);
        let dir = bd.dir_for(Operation::Update, "ap-123").unwrap();
        assert_eq!(dir, env.rig_dir("ap"));
        let dir = bd.dir_for(Operation::Update, "hq-9").unwrap();
        assert_eq!(dir, env.town_root());
    }

    #[test]
    fn fixed_ops_stay_in_work_dir() {
        let env = TownEnv::new().unwrap();
        let bd = wrapper(&env);
        assert_eq!(bd.dir_for(Operation::Show, "ap-123").unwrap(), env.rig_dir("gt"));
    }

    #[test]
    fn unknown_prefix_falls_back_to_work_dir() {
        let env = TownEnv::new().unwrap();
        let bd = wrapper(&env);
        assert_eq!(bd.dir_for(Operation::Close, "zz-1").unwrap(), env.rig_dir("gt"));
        assert_eq!(
            bd.dir_for(Operation::Close, "nohyphen").unwrap_err().kind(),
            ErrorKind::Routing
        );
    }

    #[test]
    fn raw_never_reroutes() {
        let env = TownEnv::new().unwrap();
        let raw = RawWrapper::with_config(env.rig_dir("gt"), env.config());
        assert_eq!(raw.dir_for(Operation::Update, "ap-1").unwrap(), env.rig_dir("gt"));
    }

    #[test]
    fn registry_override_flips_routing() {
        let env = TownEnv::new().unwrap();
        let bd = wrapper(&env).with_registry(BugRegistry::from_entries(&[(
            Operation::Update,
            true,
        )]));
        assert_eq!(bd.dir_for(Operation::Update, "ap-1").unwrap(), env.rig_dir("gt"));
    }

    #[test]
    fn ids_group_by_rig_in_order() {
        let env = TownEnv::new().unwrap();
        let bd = wrapper(&env);
        let groups = bd
            .group_by_dir(Operation::Close, &["gt-1", "ap-1", "gt-2"])
            .unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, env.rig_dir("gt"));
        assert_eq!(groups[0].1, vec!["gt-1", "gt-2"]);
        assert_eq!(groups[1].1, vec!["ap-1"]);
    }

    #[test]
    fn global_flags_follow_write_mode() {
        let env = TownEnv::new().unwrap();
        let direct = wrapper(&env);
        assert_eq!(
            direct.global_flags(Operation::List),
            vec!["--no-daemon", "--allow-stale", "--json"]
        );
        assert_eq!(direct.global_flags(Operation::Update), vec!["--no-daemon", "--json"]);
        assert!(direct.global_flags(Operation::Version).is_empty());
        assert_eq!(direct.global_flags(Operation::Init), vec!["--no-daemon"]);

        let daemon = Wrapper::with_config(
            env.rig_dir("gt"),
            env.config().with_write_mode(WriteMode::Daemon),
        );
        assert_eq!(daemon.global_flags(Operation::Update), vec!["--json"]);
        assert_eq!(
            daemon.global_flags(Operation::Ready),
            vec!["--no-daemon", "--allow-stale", "--json"]
        );
    }

    #[test]
    fn missing_storage_is_not_a_repo() {
        let dir = tempfile::TempDir::new().unwrap();
        let bd = Wrapper::with_config(dir.path(), OpsConfig::default());
        let err = bd.list(&ListOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotARepo);
    }

    #[test]
    fn argument_errors_precede_invocation() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = OpsConfig::default().with_bd_binary("/nonexistent/bd");
        let bd = Wrapper::with_config(dir.path(), config);

        let mut opts = CreateOptions::titled("x");
        opts.prefix = Some("ap".to_string());
        let err = bd.create_with_id("gt-1", &opts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Routing);

        let err = bd.create(&CreateOptions::titled(" ")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadArgument);
        let err = bd.slot_set("gt-1", "pocket", "gt-2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadArgument);
    }

    #[test]
    fn missing_binary_is_not_installed() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = OpsConfig::default().with_bd_binary("/nonexistent/bd");
        let bd = RawWrapper::with_config(dir.path(), config);
        assert!(bd.version().unwrap_err().is_not_installed());
        assert!(bd.probe().unwrap_err().is_not_installed());
    }
}
