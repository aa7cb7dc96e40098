//! The conformance matrix: implementation × rig context × operation.

use super::env::{PREFIXES, TownEnv};
use crate::error::{ErrorKind, OpsError, Result};
use crate::model::Issue;
use crate::ops::{CreateOptions, Double, DoubleControl, Ops, RawWrapper, Wrapper};
use crate::registry::{BugRegistry, Operation};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

/// Prefix of the rig the harness invokes from.
pub const INVOKER_PREFIX: &str = "gt";

/// Prefix of the rig cross-rig targets live in.
pub const FOREIGN_PREFIX: &str = "ap";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Implementation {
    Double,
    Wrapper,
    RawWrapper,
}

impl Implementation {
    pub const ALL: [Self; 3] = [Self::Double, Self::Wrapper, Self::RawWrapper];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::Wrapper => "wrapper",
            Self::RawWrapper => "raw_wrapper",
        }
    }
}

impl fmt::Display for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the target bead lives in the invoking rig's database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RigContext {
    SameRig,
    CrossRig,
}

impl RigContext {
    pub const ALL: [Self; 2] = [Self::SameRig, Self::CrossRig];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SameRig => "same-rig",
            Self::CrossRig => "cross-rig",
        }
    }

    /// Prefix of the database the target bead is created in.
    #[must_use]
    pub const fn target_prefix(self) -> &'static str {
        match self {
            Self::SameRig => INVOKER_PREFIX,
            Self::CrossRig => FOREIGN_PREFIX,
        }
    }
}

impl fmt::Display for RigContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the policy demands of one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    Pass,
    /// Failure is logged, not asserted.
    MayFail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    ExpectedFailure,
    /// `bd` is not installed.
    Skipped,
}

/// Expected result of running `op` against `implementation` in `context`.
///
/// Only the raw wrapper may fail, and only cross-rig on an operation the
/// registry marks broken.
#[must_use]
pub fn expectation(
    implementation: Implementation,
    op: Operation,
    context: RigContext,
    registry: &BugRegistry,
) -> Expectation {
    match (implementation, context) {
        (Implementation::RawWrapper, RigContext::CrossRig) if !registry.is_fixed_op(op) => {
            Expectation::MayFail
        }
        _ => Expectation::Pass,
    }
}

/// Raised when a raw cross-rig case passes for an operation the registry
/// still marks broken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Advisory {
    pub operation: String,
    pub message: String,
}

impl Advisory {
    fn upstream_fixed(op: Operation) -> Self {
        Self {
            operation: op.as_str().to_string(),
            message: format!(
                "raw {op} now routes cross-rig correctly: mark it fixed in the bug \
                 registry and drop the wrapper workaround"
            ),
        }
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.operation, self.message)
    }
}

/// Result of one case body. Failed checks and operation errors both land
/// here; operation errors stay downcastable to [`OpsError`].
pub type CaseOutput = anyhow::Result<()>;

fn ops_error(err: &anyhow::Error) -> Option<&OpsError> {
    err.downcast_ref::<OpsError>()
}

/// Classify a case result under the outcome policy.
#[must_use]
pub fn evaluate(
    implementation: Implementation,
    op: Operation,
    context: RigContext,
    registry: &BugRegistry,
    result: &CaseOutput,
) -> (Outcome, Option<Advisory>) {
    let expected = expectation(implementation, op, context, registry);
    match (result, expected) {
        (Err(err), _) if ops_error(err).is_some_and(OpsError::is_not_installed) => {
            (Outcome::Skipped, None)
        }
        (Ok(()), Expectation::MayFail) => {
            let advisory = Advisory::upstream_fixed(op);
            warn!(advisory = %advisory, "Upstream fix detected");
            (Outcome::Passed, Some(advisory))
        }
        (Ok(()), Expectation::Pass) => (Outcome::Passed, None),
        (Err(err), Expectation::MayFail) => {
            info!(op = %op, error = %format!("{err:#}"), "Known upstream routing bug reproduced");
            (Outcome::ExpectedFailure, None)
        }
        (Err(_), Expectation::Pass) => (Outcome::Failed, None),
    }
}

/// One cell of the matrix.
#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub implementation: Implementation,
    pub operation: Operation,
    pub context: RigContext,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl fmt::Display for CaseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}: {:?}",
            self.implementation, self.operation, self.context, self.outcome
        )?;
        match (self.error_kind, &self.error) {
            (Some(kind), Some(error)) => write!(f, " ({kind}: {error})")?,
            (None, Some(error)) => write!(f, " ({error})")?,
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MatrixReport {
    pub results: Vec<CaseResult>,
    pub advisories: Vec<Advisory>,
}

impl MatrixReport {
    fn record(
        &mut self,
        implementation: Implementation,
        op: Operation,
        context: RigContext,
        registry: &BugRegistry,
        result: &CaseOutput,
    ) {
        let (outcome, advisory) = evaluate(implementation, op, context, registry, result);
        let (error_kind, error) = match result {
            Err(err) => (ops_error(err).map(OpsError::kind), Some(format!("{err:#}"))),
            Ok(()) => (None, None),
        };
        self.results.push(CaseResult {
            implementation,
            operation: op,
            context,
            outcome,
            error_kind,
            error,
        });
        self.advisories.extend(advisory);
    }

    pub fn merge(&mut self, other: Self) {
        self.results.extend(other.results);
        self.advisories.extend(other.advisories);
    }

    #[must_use]
    pub fn failures(&self) -> Vec<&CaseResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Failed)
            .collect()
    }

    #[must_use]
    pub fn count(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    /// Result for one cell, if it ran.
    #[must_use]
    pub fn outcome_of(
        &self,
        implementation: Implementation,
        context: RigContext,
    ) -> Option<Outcome> {
        self.results
            .iter()
            .find(|r| r.implementation == implementation && r.context == context)
            .map(|r| r.outcome)
    }

    /// # Panics
    ///
    /// Panics listing every failed case.
    pub fn assert_conformant(&self) {
        let failures = self.failures();
        assert!(
            failures.is_empty(),
            "conformance failures:\n{}",
            failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n")
        );
    }
}

/// A freshly initialised town plus an `Ops` handle invoking from the `gt`
/// rig.
pub struct Fixture {
    env: TownEnv,
    implementation: Implementation,
    ops: Box<dyn Ops>,
}

impl fmt::Debug for Fixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fixture")
            .field("implementation", &self.implementation)
            .field("town", &self.env.town_root())
            .finish_non_exhaustive()
    }
}

impl Fixture {
    /// Build a town and initialise one database per routed prefix.
    ///
    /// # Errors
    ///
    /// `NotInstalled` when a `bd`-backed implementation has no binary; other
    /// errors when setup fails.
    pub fn new(implementation: Implementation) -> Result<Self> {
        let env = TownEnv::new()?;
        let invoker = env.rig_root(INVOKER_PREFIX);
        let ops: Box<dyn Ops> = match implementation {
            Implementation::Double => {
                let double = Double::with_config(env.config());
                for prefix in PREFIXES {
                    double.init(prefix)?;
                    double.register_work_dir(&env.rig_root(prefix), prefix);
                    double.register_work_dir(&env.rig_dir(prefix), prefix);
                }
                double.set_work_dir(&invoker)?;
                Box::new(double)
            }
            Implementation::Wrapper => {
                for prefix in PREFIXES {
                    Wrapper::with_config(env.rig_dir(prefix), env.config()).init(prefix)?;
                }
                Box::new(Wrapper::with_config(&invoker, env.config()))
            }
            Implementation::RawWrapper => {
                for prefix in PREFIXES {
                    RawWrapper::with_config(env.rig_dir(prefix), env.config()).init(prefix)?;
                }
                Box::new(RawWrapper::with_config(&invoker, env.config()))
            }
        };
        Ok(Self {
            env,
            implementation,
            ops,
        })
    }

    #[must_use]
    pub fn ops(&self) -> &dyn Ops {
        self.ops.as_ref()
    }

    #[must_use]
    pub const fn env(&self) -> &TownEnv {
        &self.env
    }

    #[must_use]
    pub const fn implementation(&self) -> Implementation {
        self.implementation
    }

    #[must_use]
    pub fn invoker_dir(&self) -> PathBuf {
        self.env.rig_root(INVOKER_PREFIX)
    }

    /// Run `f` with a handle invoking from `prefix`'s rig.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f` and from switching directories.
    pub fn in_rig<T, F>(&self, prefix: &str, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Ops) -> Result<T>,
    {
        let dir = self.env.rig_root(prefix);
        match self.implementation {
            Implementation::Double => {
                let control = self.control()?;
                control.set_work_dir(&dir)?;
                let result = f(self.ops());
                control.set_work_dir(&self.invoker_dir())?;
                result
            }
            Implementation::Wrapper => f(&Wrapper::with_config(&dir, self.env.config())),
            Implementation::RawWrapper => f(&RawWrapper::with_config(&dir, self.env.config())),
        }
    }

    fn control(&self) -> Result<&dyn DoubleControl> {
        self.ops.double_control().ok_or_else(|| {
            OpsError::Config(format!("{} has no double control", self.implementation))
        })
    }

    /// Create a bead in the database `context` selects.
    ///
    /// # Errors
    ///
    /// Propagates creation errors.
    pub fn create_target(&self, context: RigContext, opts: &CreateOptions) -> Result<Issue> {
        match context {
            RigContext::SameRig => self.ops.create(opts),
            RigContext::CrossRig => self.in_rig(context.target_prefix(), |ops| ops.create(opts)),
        }
    }
}

/// Runs cases across the matrix and applies the outcome policy.
#[derive(Debug, Clone)]
pub struct Conformance {
    registry: BugRegistry,
    implementations: Vec<Implementation>,
}

impl Default for Conformance {
    fn default() -> Self {
        Self::new()
    }
}

impl Conformance {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: BugRegistry::global().clone(),
            implementations: Implementation::ALL.to_vec(),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: BugRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Restrict the run to some implementations.
    #[must_use]
    pub fn only(mut self, implementations: &[Implementation]) -> Self {
        self.implementations = implementations.to_vec();
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &BugRegistry {
        &self.registry
    }

    /// Run a case for an operation that takes no bead ID, once per
    /// implementation in a fresh town.
    pub fn simple<F>(&self, op: Operation, case: F) -> MatrixReport
    where
        F: Fn(&Fixture) -> CaseOutput,
    {
        let mut report = MatrixReport::default();
        for &implementation in &self.implementations {
            let result = Fixture::new(implementation)
                .map_err(anyhow::Error::from)
                .and_then(|fixture| case(&fixture));
            report.record(implementation, op, RigContext::SameRig, &self.registry, &result);
        }
        report
    }

    /// Run a case for an ID-taking operation against a bead created by the
    /// default setup: a task titled after the operation.
    pub fn id_routing<F>(&self, op: Operation, case: F) -> MatrixReport
    where
        F: Fn(&Fixture, &str) -> CaseOutput,
    {
        self.id_routing_with(
            op,
            |fixture, context| {
                let opts = CreateOptions::titled(format!("{op} target"));
                fixture.create_target(context, &opts).map(|issue| issue.id)
            },
            case,
        )
    }

    /// Run a case for an ID-taking operation in both rig contexts. `setup`
    /// creates the target and returns its ID.
    pub fn id_routing_with<S, F>(&self, op: Operation, setup: S, case: F) -> MatrixReport
    where
        S: Fn(&Fixture, RigContext) -> Result<String>,
        F: Fn(&Fixture, &str) -> CaseOutput,
    {
        let mut report = MatrixReport::default();
        for &implementation in &self.implementations {
            for context in RigContext::ALL {
                let result = Fixture::new(implementation)
                    .map_err(anyhow::Error::from)
                    .and_then(|fixture| {
                        let id = setup(&fixture, context)?;
                        case(&fixture, &id)
                    });
                report.record(implementation, op, context, &self.registry, &result);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broken_update() -> BugRegistry {
        BugRegistry::from_entries(&[(Operation::Update, false)])
    }

    #[test]
    fn policy_table() {
        let registry = broken_update();
        for implementation in [Implementation::Double, Implementation::Wrapper] {
            for context in RigContext::ALL {
                assert_eq!(
                    expectation(implementation, Operation::Update, context, &registry),
                    Expectation::Pass
                );
            }
        }
        let raw = Implementation::RawWrapper;
        assert_eq!(
            expectation(raw, Operation::Update, RigContext::SameRig, &registry),
            Expectation::Pass
        );
        assert_eq!(
            expectation(raw, Operation::Update, RigContext::CrossRig, &registry),
            Expectation::MayFail
        );
        assert_eq!(
            expectation(raw, Operation::Show, RigContext::CrossRig, &registry),
            Expectation::Pass
        );
    }

    #[test]
    fn unexpected_pass_names_operation() {
        let registry = broken_update();
        let (outcome, advisory) = evaluate(
            Implementation::RawWrapper,
            Operation::Update,
            RigContext::CrossRig,
            &registry,
            &Ok(()),
        );
        assert_eq!(outcome, Outcome::Passed);
        let advisory = advisory.unwrap();
        assert_eq!(advisory.operation, "update");
        assert!(advisory.to_string().contains("update"));
    }

    #[test]
    fn failures_by_policy() {
        let registry = broken_update();
        let err = || -> CaseOutput { Err(OpsError::not_found("ap-1").into()) };
        let (outcome, _) = evaluate(
            Implementation::RawWrapper,
            Operation::Update,
            RigContext::CrossRig,
            &registry,
            &err(),
        );
        assert_eq!(outcome, Outcome::ExpectedFailure);
        let (outcome, _) = evaluate(
            Implementation::Wrapper,
            Operation::Update,
            RigContext::CrossRig,
            &registry,
            &err(),
        );
        assert_eq!(outcome, Outcome::Failed);

        let missing: CaseOutput = Err(OpsError::NotInstalled {
            binary: "bd".to_string(),
        }
        .into());
        let (outcome, advisory) = evaluate(
            Implementation::Wrapper,
            Operation::Update,
            RigContext::SameRig,
            &registry,
            &missing,
        );
        assert_eq!(outcome, Outcome::Skipped);
        assert!(advisory.is_none());
    }

    #[test]
    fn failed_check_is_recorded_without_kind() {
        let report = Conformance::new()
            .only(&[Implementation::Double])
            .simple(Operation::List, |_| anyhow::bail!("check failed: nothing listed"));
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].error_kind.is_none());
        assert!(failures[0].to_string().contains("nothing listed"));
    }

    #[test]
    fn double_fixture_starts_in_invoker_rig() {
        let fixture = Fixture::new(Implementation::Double).unwrap();
        let control = fixture.ops().double_control().unwrap();
        assert_eq!(control.current_prefix(), INVOKER_PREFIX);
        assert_eq!(control.work_dir(), Some(fixture.invoker_dir()));

        let foreign = fixture
            .create_target(RigContext::CrossRig, &CreateOptions::titled("far"))
            .unwrap();
        assert!(foreign.id.starts_with("ap-"));
        assert_eq!(control.current_prefix(), INVOKER_PREFIX);
        assert_eq!(fixture.ops().show(&foreign.id).unwrap().title, "far");
    }

    #[test]
    fn double_matrix_is_green() {
        let report = Conformance::new()
            .only(&[Implementation::Double])
            .id_routing(Operation::Update, |fixture, id| {
                let opts = crate::ops::UpdateOptions {
                    title: Some("X".to_string()),
                    ..crate::ops::UpdateOptions::default()
                };
                fixture.ops().update(id, &opts)?;
                let shown = fixture.ops().show(id)?;
                anyhow::ensure!(shown.title == "X", "title is {}", shown.title);
                Ok(())
            });
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.count(Outcome::Passed), 2);
        report.assert_conformant();
    }

    #[test]
    fn report_serializes() {
        let report = Conformance::new()
            .only(&[Implementation::Double])
            .simple(Operation::Stats, |fixture| {
                fixture.ops().stats()?;
                Ok(())
            });
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"][0]["implementation"], "double");
        assert_eq!(json["results"][0]["outcome"], "passed");
    }
}
