//! `beads_ops` - a prefix-routing operations layer over the `bd` issue
//! tracker.
//!
//! A "town" holds several rig databases, each owning a bead ID prefix. The
//! [`Ops`] trait is the single surface callers program against; it is
//! implemented by an in-memory [`Double`], by a [`Wrapper`] that shells out
//! to `bd` and routes around known upstream bugs, and by a [`RawWrapper`]
//! that does not. The [`harness`] module checks all three against the same
//! behavioral cases.

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod harness;
pub mod logging;
pub mod model;
pub mod ops;
pub mod registry;
pub mod util;

pub use config::OpsConfig;
pub use error::{ErrorKind, OpsError, Result};
pub use model::{Issue, Priority, Status, StatusFilter};
pub use ops::{Double, DoubleControl, Ops, RawWrapper, Wrapper};
pub use registry::{BugRegistry, Operation};
