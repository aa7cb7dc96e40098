//! Subprocess contract of the `bd` wrappers, checked against a fake `bd`
//! that records its working directory, environment and argv.
#![cfg(unix)]

use beads_ops::config::OpsConfig;
use beads_ops::error::{ErrorKind, OpsError};
use beads_ops::harness::TownEnv;
use beads_ops::ops::{
    CloseOptions, CreateOptions, ListOptions, Ops, RawWrapper, UpdateOptions, Wrapper,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const ISSUE_OPEN_P1: &str = r#"{"id":"gt-a1","title":"low","status":"open","priority":1,"issue_type":"task","created_at":"2026-01-01T00:00:00Z","updated_at":"2026-01-01T00:00:00Z"}"#;
const ISSUE_OPEN_P3: &str = r#"{"id":"gt-b2","title":"high","status":"open","priority":3,"issue_type":"task","created_at":"2026-01-02T00:00:00Z","updated_at":"2026-01-02T00:00:00Z"}"#;
const ISSUE_CLOSED: &str = r#"{"id":"gt-c3","title":"done","status":"closed","priority":2,"issue_type":"task","created_at":"2026-01-03T00:00:00Z","updated_at":"2026-01-03T00:00:00Z"}"#;

/// One recorded invocation.
#[derive(Debug)]
struct Call {
    cwd: PathBuf,
    beads_dir: Option<PathBuf>,
    home: PathBuf,
    args: String,
}

struct FakeBd {
    env: TownEnv,
    log: PathBuf,
    config: OpsConfig,
}

impl FakeBd {
    /// Install a fake `bd` whose response is the shell snippet `body`.
    fn new(body: &str) -> Self {
        let env = TownEnv::new().unwrap();
        let bin = env.temp_root().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let log = env.temp_root().join("calls.log");
        let script = bin.join("bd");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\n\
                 printf '%s\\t%s\\t%s\\t%s\\n' \"$(pwd -P)\" \"${{BEADS_DIR-UNSET}}\" \"$HOME\" \"$*\" >> '{}'\n\
                 {body}\n",
                log.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let config = env.config().with_bd_binary(&script);
        Self { env, log, config }
    }

    fn wrapper(&self) -> Wrapper {
        Wrapper::with_config(self.env.rig_root("gt"), self.config.clone())
    }

    fn raw(&self) -> RawWrapper {
        RawWrapper::with_config(self.env.rig_root("gt"), self.config.clone())
    }

    fn calls(&self) -> Vec<Call> {
        let text = fs::read_to_string(&self.log).unwrap_or_default();
        text.lines()
            .map(|line| {
                let mut parts = line.splitn(4, '\t');
                let mut next = || parts.next().unwrap_or_default().to_string();
                let cwd = PathBuf::from(next());
                let beads_dir = Some(next()).filter(|d| d != "UNSET").map(PathBuf::from);
                let home = PathBuf::from(next());
                let args = next();
                Call {
                    cwd,
                    beads_dir,
                    home,
                    args,
                }
            })
            .collect()
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap()
}

fn title_x() -> UpdateOptions {
    UpdateOptions {
        title: Some("X".to_string()),
        ..UpdateOptions::default()
    }
}

#[test]
fn wrapper_runs_broken_op_in_owning_rig() {
    let fake = FakeBd::new("exit 0");
    fake.wrapper().update("ap-1", &title_x()).unwrap();

    let calls = fake.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.cwd, canonical(&fake.env.rig_dir("ap")));
    assert_eq!(call.beads_dir.as_deref(), Some(fake.env.storage_dir("ap").as_path()));
    assert_eq!(call.home, fake.env.home());
    assert_eq!(call.args, "--no-daemon --json update ap-1 --title X");
}

#[test]
fn raw_wrapper_stays_put_without_storage_override() {
    let fake = FakeBd::new("exit 0");
    fake.raw().update("ap-1", &title_x()).unwrap();

    let calls = fake.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].cwd, canonical(&fake.env.rig_root("gt")));
    assert!(calls[0].beads_dir.is_none());
}

#[test]
fn fixed_op_runs_from_work_dir_with_resolved_storage() {
    let fake = FakeBd::new(&format!("echo '{ISSUE_OPEN_P1}'"));
    let issue = fake.wrapper().show("gt-a1").unwrap();
    assert_eq!(issue.title, "low");

    let calls = fake.calls();
    assert_eq!(calls[0].cwd, canonical(&fake.env.rig_root("gt")));
    assert_eq!(
        calls[0].beads_dir.as_deref(),
        Some(fake.env.storage_dir("gt").as_path())
    );
    assert_eq!(calls[0].args, "--no-daemon --allow-stale --json show gt-a1");
}

#[test]
fn close_groups_ids_by_rig_and_passes_session() {
    let fake = FakeBd::new("exit 0");
    let wrapper = Wrapper::with_config(
        fake.env.rig_root("gt"),
        fake.config.clone().with_session("sess-7"),
    );
    wrapper.close(&["ap-1", "gt-2", "ap-3"]).unwrap();

    let calls = fake.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].cwd, canonical(&fake.env.rig_dir("ap")));
    assert_eq!(calls[0].args, "--no-daemon --json close ap-1 ap-3 --session sess-7");
    assert_eq!(calls[1].cwd, canonical(&fake.env.rig_dir("gt")));
    assert_eq!(calls[1].args, "--no-daemon --json close gt-2 --session sess-7");
}

#[test]
fn explicit_session_wins() {
    let fake = FakeBd::new("exit 0");
    let opts = CloseOptions {
        reason: Some("merged".to_string()),
        session: Some("override".to_string()),
        ..CloseOptions::default()
    };
    fake.wrapper().close_with_options(&opts, &["gt-1"]).unwrap();
    assert!(fake.calls()[0]
        .args
        .ends_with("close gt-1 --reason merged --session override"));
}

#[test]
fn create_passes_configured_actor() {
    let fake = FakeBd::new(&format!("echo '[{ISSUE_OPEN_P1}]'"));
    let wrapper = Wrapper::with_config(
        fake.env.rig_root("gt"),
        fake.config.clone().with_actor("mayor"),
    );
    let issue = wrapper.create(&CreateOptions::titled("low")).unwrap();
    assert_eq!(issue.id, "gt-a1");
    assert_eq!(
        fake.calls()[0].args,
        "--no-daemon --json create --title low --actor mayor"
    );
}

#[test]
fn silent_failure_becomes_upstream_error() {
    let fake = FakeBd::new("echo 'Error: database locked' >&2\nexit 0");
    let err = fake.wrapper().update("gt-1", &title_x()).unwrap_err();
    match err {
        OpsError::Upstream {
            stderr, exit_code, ..
        } => {
            assert_eq!(stderr, "Error: database locked");
            assert_eq!(exit_code, Some(0));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(fake.raw().update("gt-1", &title_x()).is_ok());
}

#[test]
fn not_found_message_maps_to_not_found() {
    let fake = FakeBd::new("echo 'Error: issue ap-zzz not found' >&2\nexit 1");
    assert_eq!(
        fake.wrapper().show("ap-zzz").unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(fake.raw().show("ap-zzz").unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn not_found_on_clean_exit_maps_to_not_found() {
    let fake = FakeBd::new("echo 'Error: issue gt-zzz not found' >&2\nexit 0");
    let err = fake.wrapper().show("gt-zzz").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("gt-zzz"));
}

#[test]
fn other_failures_carry_stderr_verbatim() {
    let fake = FakeBd::new("echo 'Error: invalid field for update: holder' >&2\nexit 1");
    let err = fake.wrapper().update("gt-1", &title_x()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert!(err.to_string().contains("invalid field for update: holder"));
}

#[test]
fn list_open_family_is_filtered_client_side() {
    let fake = FakeBd::new(&format!(
        "echo '{{\"issues\":[{ISSUE_OPEN_P1},{ISSUE_CLOSED}]}}'"
    ));
    let issues = fake.wrapper().list(&ListOptions::default()).unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].id, "gt-a1");

    let raw = fake.raw().list(&ListOptions::default()).unwrap();
    assert_eq!(raw.len(), 2);

    let calls = fake.calls();
    assert_eq!(calls[0].args, "--no-daemon --allow-stale --json list");
    assert_eq!(calls[1].args, "--no-daemon --allow-stale --json list --status open");
}

#[test]
fn ready_is_resorted_by_priority() {
    let fake = FakeBd::new(&format!("echo '[{ISSUE_OPEN_P1},{ISSUE_OPEN_P3}]'"));
    let ready = fake.wrapper().ready().unwrap();
    assert_eq!(ready[0].id, "gt-b2");
    assert_eq!(ready[1].id, "gt-a1");

    let raw = fake.raw().ready().unwrap();
    assert_eq!(raw[0].id, "gt-a1");
}

#[test]
fn unset_config_reads_as_empty() {
    let fake = FakeBd::new("echo 'sync.branch (not set)'");
    assert_eq!(fake.wrapper().config_get("sync.branch").unwrap(), "");
    assert_eq!(
        fake.raw().config_get("sync.branch").unwrap(),
        "sync.branch (not set)"
    );
}

#[test]
fn missing_storage_is_not_a_repo() {
    let fake = FakeBd::new("exit 0");
    let outside = fake.env.temp_root().join("elsewhere");
    fs::create_dir_all(&outside).unwrap();
    let err = Wrapper::with_config(&outside, fake.config.clone())
        .list(&ListOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotARepo);
    assert!(fake.calls().is_empty());
}

#[test]
fn merge_slot_runs_from_work_dir() {
    let fake = FakeBd::new(
        r#"case "$*" in
  *"merge-slot create"*) echo '{"id":"gt-merge-slot","available":true}' ;;
  *"merge-slot acquire"*) echo '{"id":"gt-merge-slot","available":false,"holder":"polecat-a","waiters":["polecat-b"]}' ;;
  *"merge-slot check"*) echo '{"id":"gt-merge-slot","available":false,"holder":"polecat-a"}' ;;
  *"merge-slot release"*) echo 'Error: invalid field for update: holder' >&2; exit 1 ;;
esac"#,
    );
    let wrapper = fake.wrapper();
    assert_eq!(wrapper.merge_slot_create().unwrap(), "gt-merge-slot");

    let queued = wrapper.merge_slot_acquire("polecat-b", true).unwrap();
    assert_eq!(queued.holder.as_deref(), Some("polecat-a"));
    assert_eq!(queued.waiters, ["polecat-b"]);

    let status = wrapper.merge_slot_check().unwrap();
    assert!(!status.available);

    let err = wrapper.merge_slot_release("polecat-a").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert!(err.to_string().contains("invalid field for update: holder"));

    let calls = fake.calls();
    assert_eq!(calls.len(), 4);
    let rig = canonical(&fake.env.rig_root("gt"));
    assert!(calls.iter().all(|call| call.cwd == rig));
    assert!(calls[0].args.ends_with("merge-slot create"));
    assert!(calls[1].args.ends_with("merge-slot acquire --holder polecat-b --wait"));
    assert!(calls[3].args.ends_with("merge-slot release --holder polecat-a"));
}
