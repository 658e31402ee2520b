//! In-process migration execution helpers

use crate::migration::{MigrationError, MigrationOutcome, Migrator, MigratorOptions};
use crate::store::DocumentStore;
use std::path::Path;

/// Run migrations on application startup
///
/// Applies every pending up migration. A dirty version record or a failing
/// migration is returned as an error so the application can refuse to start.
/// When several instances start together, the first to claim the version
/// record wins and the others fail with `MigrationError::Conflict`.
///
/// # Example
///
/// ```rust,no_run
/// use docshift::migration::startup_migrations;
/// use docshift::store::FileStore;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStore::open("./data")?;
///
///     startup_migrations(&store, "./migrations", Default::default())?;
///
///     // Continue with application startup...
///     Ok(())
/// }
/// ```
pub fn startup_migrations(
    store: &dyn DocumentStore,
    migrations_dir: impl AsRef<Path>,
    options: MigratorOptions,
) -> Result<MigrationOutcome, MigrationError> {
    let migrator = Migrator::new(migrations_dir).with_options(options);

    let outcome = migrator.up(store, None)?;
    match &outcome {
        MigrationOutcome::Migrated(report) => {
            log::info!("Applied {} migration(s) on startup", report.applied.len());
        }
        MigrationOutcome::NoChange { .. } => {
            log::debug!("No pending migrations to apply");
        }
    }

    Ok(outcome)
}
