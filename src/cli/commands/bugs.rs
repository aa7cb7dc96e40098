//! Bugs command implementation.

use super::print_json;
use crate::error::Result;
use crate::registry::BugRegistry;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct BugEntry<'a> {
    operation: &'a str,
    fixed: bool,
}

/// Execute the bugs command.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(registry: &BugRegistry, json: bool) -> Result<()> {
    if json {
        let entries: Vec<BugEntry<'_>> = registry
            .iter()
            .map(|(operation, fixed)| BugEntry { operation, fixed })
            .collect();
        return print_json(&entries);
    }

    let width = registry.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, fixed) in registry.iter() {
        let state = if fixed { "fixed" } else { "broken (rerouted)" };
        println!("{name:<width$}  {state}");
    }
    Ok(())
}
