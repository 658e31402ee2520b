//! # docshift
//!
//! Versioned, reversible schema migrations for document databases.
//!
//! Migrations are pairs of up/down files in one directory. The engine keeps a
//! single `{version, dirty}` record per database, claims it before running a
//! migration and releases it afterwards, so a failed or interrupted run is
//! visible and blocks further runs until an operator forces the version.
//!
//! See [`migration`] for the engine and [`store`] for the database side.

pub mod config;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod migration;
pub mod store;

pub use config::MigrateConfig;
pub use migration::{MigrationError, MigrationOutcome, Migrator, VersionState};
pub use store::{DocumentStore, FileStore, MemoryStore, StoreError};
