//! Conformance harness.
//!
//! Runs the same behavioral cases against every implementation, from the
//! invoking rig and across rigs, and applies the outcome policy: the Double
//! and the Wrapper must always pass, while the raw wrapper may fail
//! cross-rig on operations the bug registry marks broken. A raw pass on such
//! an operation yields an [`Advisory`] that the upstream bug looks fixed.

mod env;
mod matrix;

pub use env::{PREFIXES, RIGS, TOWN_PREFIX, TownEnv};
pub use matrix::{
    Advisory, CaseOutput, CaseResult, Conformance, Expectation, FOREIGN_PREFIX, Fixture,
    INVOKER_PREFIX, Implementation, MatrixReport, Outcome, RigContext, evaluate, expectation,
};
