use anyhow::Context;
use beads_ops::OpsError;
use beads_ops::cli::commands;
use beads_ops::cli::{Cli, Commands};
use beads_ops::config::OpsConfig;
use beads_ops::logging::init_logging;
use beads_ops::registry::BugRegistry;
use clap::Parser;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.quiet, cli.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    if let Err(err) = run(cli) {
        let code = err
            .downcast_ref::<OpsError>()
            .map_or(1, |ops| ops.kind().exit_code());
        eprintln!("Error: {err:#}");
        std::process::exit(code);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = OpsConfig::load().context("loading configuration")?;
    match cli.command {
        Commands::Where { dir } => commands::r#where::execute(dir.as_deref(), cli.json, &config)?,
        Commands::Route(args) => commands::route::execute(
            &args.id,
            args.from.as_deref(),
            args.op.as_deref(),
            cli.json,
            &config,
        )?,
        Commands::Bugs => commands::bugs::execute(BugRegistry::global(), cli.json)?,
        Commands::Run(args) => {
            commands::run::execute(&args.args, args.raw, args.dir.as_deref(), config)?;
        }
    }
    Ok(())
}
