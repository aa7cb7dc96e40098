//! CLI definitions for `bdops`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// Diagnostics for prefix routing across a town of `bd` databases
#[derive(Parser, Debug)]
#[command(name = "bdops", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the storage directory and town root for a working directory
    Where {
        /// Working directory (defaults to the current directory)
        dir: Option<PathBuf>,
    },

    /// Show the directory an ID-taking command runs in
    Route(RouteArgs),

    /// List the upstream routing bug registry
    Bugs,

    /// Pass arguments straight through to bd
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RouteArgs {
    /// Bead ID, e.g. gt-abc
    pub id: String,

    /// Directory the command is invoked from
    #[arg(long)]
    pub from: Option<PathBuf>,

    /// Operation name (e.g. update); reports whether it is rerouted
    #[arg(long)]
    pub op: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Skip every workaround (diagnostic)
    #[arg(long)]
    pub raw: bool,

    /// Working directory for bd
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Arguments for bd
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub args: Vec<String>,
}
