//! `bdops` command implementations.

pub mod bugs;
pub mod route;
pub mod run;
pub mod r#where;

use crate::error::Result;
use serde::Serialize;

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
