//! Run command implementation.

use crate::config::OpsConfig;
use crate::error::Result;
use crate::ops::{Ops, RawWrapper, Wrapper};
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;

/// Execute the run command: hand `args` to `bd` and copy its stdout.
///
/// # Errors
///
/// Propagates `bd` failures and stdout write errors.
pub fn execute(args: &[String], raw: bool, dir: Option<&Path>, config: OpsConfig) -> Result<()> {
    let work_dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    debug!(raw, dir = %work_dir.display(), ?args, "Passing through to bd");

    let stdout = if raw {
        RawWrapper::with_config(work_dir, config).run(&args)?
    } else {
        Wrapper::with_config(work_dir, config).run(&args)?
    };

    let mut out = io::stdout().lock();
    out.write_all(&stdout)?;
    out.flush()?;
    Ok(())
}
