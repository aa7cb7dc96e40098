//! Shared utilities for `beads_ops`.
//!
//! - ID generation (base36 adaptive) and validation

pub mod id;

pub use id::{
    IdConfig, IdGenerator, check_explicit_prefix, child_id, is_valid_id_format, validate_id,
};
