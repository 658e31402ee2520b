//! Migration system for docshift
//!
//! This module provides the infrastructure for document database migrations:
//! - Discovery of versioned up/down migration files
//! - Execution of script and declarative migration bodies
//! - A `{version, dirty}` record updated through compare-and-set
//! - The `Migrator` engine (`up`, `down`, `goto`, `force`, `status`)
//! - Scaffolding of new migration pairs
//!
//! # Example
//!
//! ```rust,no_run
//! use docshift::migration::{MigrationOutcome, Migrator};
//! use docshift::store::FileStore;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = FileStore::open("./data")?;
//!     let migrator = Migrator::new("./migrations");
//!
//!     match migrator.up(&store, None)? {
//!         MigrationOutcome::NoChange { .. } => println!("Already up to date"),
//!         MigrationOutcome::Migrated(report) => {
//!             println!("Applied {} migration(s)", report.applied.len())
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod file;
pub mod interpreter;
pub mod migrator;
pub mod operation;
pub mod scaffold;
pub mod startup;
pub mod status;
pub mod version_store;

pub use checksum::calculate_checksum;
pub use error::{ConflictError, ExecutionCause, ExecutionError, MigrationError, SourceError};
pub use file::{
    discover_migrations, MigrationCatalog, MigrationDirection, MigrationEntry, MigrationFile,
    MigrationFormat, ParsedFilename,
};
pub use interpreter::{CancellationToken, ExecutionContext, OperationInterpreter};
pub use migrator::{
    AppliedMigration, MigrationOutcome, MigrationPlan, MigrationReport, Migrator,
    MigratorOptions, PlannedStep,
};
pub use operation::{CreateIndex, DeclarativeMigration, DeleteOne, InsertOne, OperationStep};
pub use scaffold::{sanitize_name, ScaffoldGenerator, ScaffoldPaths};
pub use startup::startup_migrations;
pub use status::MigrationStatus;
pub use version_store::{VersionState, VersionStore};
