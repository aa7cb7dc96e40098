#![allow(dead_code)]

use beads_ops::harness::CaseOutput;
use beads_ops::model::Issue;
use std::sync::Once;
use std::time::Instant;
use tracing::info;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        beads_ops::logging::init_test_logging();
    });
}

pub struct TestLogGuard {
    name: String,
    start: Instant,
}

impl TestLogGuard {
    fn new(name: &str) -> Self {
        init_test_logging();
        info!("{name}: starting");
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for TestLogGuard {
    fn drop(&mut self) {
        info!("{}: finished (elapsed {:?})", self.name, self.start.elapsed());
    }
}

pub fn test_log(name: &str) -> TestLogGuard {
    TestLogGuard::new(name)
}

/// Turn a failed check into a case error so the matrix can classify it.
pub fn ensure(condition: bool, what: &str) -> CaseOutput {
    anyhow::ensure!(condition, "check failed: {what}");
    Ok(())
}

pub fn ids(issues: &[Issue]) -> Vec<&str> {
    issues.iter().map(|issue| issue.id.as_str()).collect()
}

pub fn contains(issues: &[Issue], id: &str) -> bool {
    issues.iter().any(|issue| issue.id == id)
}
