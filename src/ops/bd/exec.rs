//! Subprocess invocation and failure classification.

use crate::error::{OpsError, Result};
use crate::registry::Operation;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::path::Path;
use std::process::{Command, Output};
use std::time::Instant;
use tracing::{debug, trace};

/// Upstream's "entity does not exist" message family.
static NOT_FOUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(not found|no issue found|no such issue|does not exist)")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Captured result of one successful `bd` invocation.
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
}

/// Run `cmd`, translating spawn failures.
pub(super) fn run(mut cmd: Command, op: Operation, binary: &Path) -> Result<(Output, u128)> {
    let start = Instant::now();
    let output = cmd.output().map_err(|err| spawn_error(err, binary))?;
    let elapsed = start.elapsed().as_millis();
    trace!(op = %op, elapsed_ms = elapsed, status = ?output.status.code(), "bd finished");
    Ok((output, elapsed))
}

fn spawn_error(err: io::Error, binary: &Path) -> OpsError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => OpsError::NotInstalled {
            binary: binary.display().to_string(),
        },
        _ => OpsError::Io(err),
    }
}

/// Map a failed call to the error taxonomy. A call fails on a non-zero exit,
/// or on exit 0 with only stderr output. Only the not-found family is
/// recognised; everything else is carried verbatim.
pub(super) fn classify_failure(command: &str, output: &Output) -> OpsError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout);
    if NOT_FOUND.is_match(&stderr) || NOT_FOUND.is_match(stdout.trim()) {
        debug!(command, "bd reported a missing entity");
        let what = if stderr.is_empty() {
            stdout.trim().to_string()
        } else {
            stderr
        };
        return OpsError::NotFound { what };
    }
    OpsError::Upstream {
        command: command.to_string(),
        stderr,
        exit_code: output.status.code(),
    }
}

/// Operations whose success may legitimately print nothing on stdout while
/// warning on stderr.
pub(super) const fn quiet_on_success(op: Operation) -> bool {
    matches!(
        op,
        Operation::Init
            | Operation::Run
            | Operation::Migrate
            | Operation::Sync
            | Operation::SyncFromMain
            | Operation::SyncImportOnly
            | Operation::DaemonStart
            | Operation::DaemonStop
    )
}

/// Operations that run without a storage directory.
pub(super) const fn needs_storage(op: Operation) -> bool {
    !matches!(op, Operation::Init | Operation::Version | Operation::Run)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn not_found_family() {
        for message in [
            "Error: issue gt-zzz not found",
            "no issue found matching 'gt-zzz'",
            "Error: No such issue",
            "gate gt-gate-1 does not exist",
        ] {
            let err = classify_failure("show", &output(1, "", message));
            assert_eq!(err.kind(), ErrorKind::NotFound, "{message}");
        }
    }

    #[test]
    fn other_failures_are_upstream_verbatim() {
        let err = classify_failure(
            "merge-slot acquire",
            &output(1, "", "Error: invalid field for update: holder\n"),
        );
        match err {
            OpsError::Upstream {
                command,
                stderr,
                exit_code,
            } => {
                assert_eq!(command, "merge-slot acquire");
                assert_eq!(stderr, "Error: invalid field for update: holder");
                assert_eq!(exit_code, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn not_found_on_clean_exit_is_still_not_found() {
        let err = classify_failure("show", &output(0, "", "Error: issue gt-zzz not found\n"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = classify_failure("update", &output(0, "", "Error: database locked"));
        assert!(matches!(err, OpsError::Upstream { exit_code: Some(0), .. }));
    }

    #[test]
    fn missing_binary_is_not_installed() {
        let binary = Path::new("/nonexistent/bd-for-tests");
        let err = run(Command::new(binary), Operation::Version, binary).unwrap_err();
        assert!(err.is_not_installed());
    }

    #[test]
    fn storage_exemptions() {
        assert!(!needs_storage(Operation::Init));
        assert!(!needs_storage(Operation::Version));
        assert!(needs_storage(Operation::List));
        assert!(quiet_on_success(Operation::Init));
        assert!(!quiet_on_success(Operation::Show));
    }
}
