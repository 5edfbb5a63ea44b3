use anyhow::Result;
use clap::Parser;

use tierlift::cli::{Cli, Commands};
use tierlift::commands::{self, RunArgs, RunExit};
use tierlift::config::{Config, Overrides};

fn main() {
    let cli = Cli::parse();
    match real_main(cli) {
        Ok(exit) => std::process::exit(exit.code()),
        Err(e) => {
            eprintln!("❌ {:#}", e);
            std::process::exit(2);
        }
    }
}

fn real_main(cli: Cli) -> Result<RunExit> {
    if let Commands::Init { force } = cli.command {
        commands::handle_init(cli.config.as_deref(), force)?;
        return Ok(RunExit::Clean);
    }

    let mut config = Config::load(cli.config.as_deref())?;
    let overrides = match cli.command {
        Commands::List { ref overrides, .. } | Commands::Plan { ref overrides, .. } => {
            overrides.to_overrides()
        }
        Commands::Run { ref overrides, no_resume, strict, .. } => {
            Overrides { no_resume, strict, ..overrides.to_overrides() }
        }
        Commands::Status { ref overrides, .. } => overrides.to_overrides(),
        Commands::Init { .. } | Commands::Tiers {} => Overrides::default(),
    };
    config.apply(&overrides);

    // keep the guard alive for the whole command so the debug file is flushed
    let _log_guard = tierlift::util::init_logging(cli.verbose, &config.log_dir)?;
    tracing::debug!("config: {:?}", config);

    match cli.command {
        Commands::Init { .. } => Ok(RunExit::Clean),
        Commands::Tiers {} => {
            commands::handle_tiers(&config)?;
            Ok(RunExit::Clean)
        }
        Commands::List { listing, save, .. } => {
            commands::handle_list(&config, listing.as_deref(), save.as_deref())?;
            Ok(RunExit::Clean)
        }
        Commands::Plan { listing, out, .. } => {
            commands::handle_plan(&config, listing.as_deref(), &out)?;
            Ok(RunExit::Clean)
        }
        Commands::Status { jobs, start_from, .. } => {
            commands::handle_status(&config, &jobs, start_from)?;
            Ok(RunExit::Clean)
        }
        Commands::Run { jobs, start_from, json, quiet, .. } => {
            commands::handle_run(&config, RunArgs { jobs, start_from, json, quiet })
        }
    }
}
