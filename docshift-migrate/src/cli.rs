//! CLI definitions for docshift-migrate

use clap::{Parser, Subcommand, ValueEnum};
use docshift::migration::MigrationFormat;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "docshift-migrate")]
#[command(about = "Migration management tool for docshift document databases")]
#[command(version)]
pub struct Cli {
    /// Migrations directory path [default: migrations]
    #[arg(long, env = "DB_MIGRATION_PATH", global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Directory of the file-backed database [default: data]
    #[arg(long, global = true)]
    pub database_dir: Option<PathBuf>,

    /// Configuration file [default: config/docshift.toml]
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Apply pending migrations
    Up {
        /// Number of migrations to apply (default: all pending)
        #[arg(long)]
        steps: Option<usize>,

        /// Dry run - show what would be executed without running
        #[arg(long)]
        dry_run: bool,
    },

    /// Roll back the current migration
    Down {
        /// Dry run - show what would be rolled back
        #[arg(long)]
        dry_run: bool,
    },

    /// Migrate up or down to a specific version
    Goto {
        version: u64,

        #[arg(long)]
        dry_run: bool,
    },

    /// Set the version without running migrations and clear the dirty flag (-1 resets)
    Force {
        #[arg(allow_negative_numbers = true)]
        version: i64,
    },

    /// Create a new up/down migration pair
    Create {
        /// Migration name (e.g., "add_users")
        name: String,

        #[arg(long, value_enum, default_value_t = FormatArg::Script)]
        format: FormatArg,
    },

    /// Show migration status (applied vs pending)
    Status {
        /// List every migration with its checksum
        #[arg(long)]
        verbose: bool,
    },

    /// Print the current version
    Version,

    /// Show detailed migration information
    Info {
        /// Show information for a specific migration version
        #[arg(long)]
        version: Option<u64>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatArg {
    #[value(alias = "js")]
    Script,
    #[value(alias = "json")]
    Declarative,
}

impl From<FormatArg> for MigrationFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Script => MigrationFormat::Script,
            FormatArg::Declarative => MigrationFormat::Declarative,
        }
    }
}
