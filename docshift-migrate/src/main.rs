//! docshift Migration CLI Tool
//!
//! Command-line interface for managing document database migrations.
//! Supports both interactive use and CI/CD pipelines (non-zero exit on any error).

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use docshift::migration::{CancellationToken, Migrator, MigratorOptions};
use docshift::config::DatabaseSettings;
use docshift::store::FileStore;
use docshift::MigrateConfig;
use docshift_migrate::cli::{Cli, Commands};
use docshift_migrate::commands;
use docshift_migrate::error::CliError;
use std::io;
use std::process;

fn main() {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging
    if cli.quiet {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error")).init();
    } else if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match run(cli) {
        Ok(()) => process::exit(0),
        Err(e) => {
            match e.downcast_ref::<CliError>() {
                Some(cli_err) => eprintln!("{} {}", "Error:".red().bold(), cli_err.report()),
                None => eprintln!("{} {:#}", "Error:".red().bold(), e),
            }
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = MigrateConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let migrations_dir = cli.migrations_dir.unwrap_or_else(|| config.migrations_dir.clone());
    let database_dir = cli.database_dir.unwrap_or_else(|| config.database.dir.clone());
    let mut stdout = io::stdout().lock();

    // The store is only opened by commands that need it
    let open = || -> Result<(Migrator, FileStore), CliError> {
        let config = MigrateConfig {
            database: DatabaseSettings { dir: database_dir.clone() },
            ..config.clone()
        };
        let store = config
            .open_store()
            .map_err(|source| CliError::Store { path: database_dir.clone(), source })?;

        // Ctrl-C stops before the next step; the interrupted migration stays dirty
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || token.cancel()) {
            log::warn!("Could not install Ctrl-C handler: {}", e);
        }

        let migrator = Migrator::new(&migrations_dir).with_options(MigratorOptions {
            step_timeout: config.step_timeout(),
            cancel: Some(cancel),
        });
        log::debug!(
            "Using migrations in {} against {}",
            migrations_dir.display(),
            store.dir().display()
        );
        Ok((migrator, store))
    };

    match cli.command {
        Commands::Create { name, format } => {
            commands::handle_create(&migrations_dir, &name, format.into(), &mut stdout)?
        }
        Commands::Up { steps, dry_run } => {
            let (migrator, store) = open()?;
            commands::handle_up(&migrator, &store, steps, dry_run, &mut stdout)?
        }
        Commands::Down { dry_run } => {
            let (migrator, store) = open()?;
            commands::handle_down(&migrator, &store, dry_run, &mut stdout)?
        }
        Commands::Goto { version, dry_run } => {
            let (migrator, store) = open()?;
            commands::handle_goto(&migrator, &store, version, dry_run, &mut stdout)?
        }
        Commands::Force { version } => {
            let (migrator, store) = open()?;
            commands::handle_force(&migrator, &store, version, &mut stdout)?
        }
        Commands::Status { verbose } => {
            let (migrator, store) = open()?;
            commands::handle_status(&migrator, &store, verbose, &mut stdout)?
        }
        Commands::Version => {
            let (migrator, store) = open()?;
            commands::handle_version(&migrator, &store, &mut stdout)?
        }
        Commands::Info { version } => {
            let (migrator, store) = open()?;
            commands::handle_info(&migrator, &store, version, &mut stdout)?
        }
    }

    Ok(())
}
