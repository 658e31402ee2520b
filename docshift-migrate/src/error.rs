//! CLI error reporting

use docshift::migration::{MigrationError, VersionState};
use docshift::StoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{source}")]
    Migration {
        #[source]
        source: MigrationError,
        /// Version record as read after the failure
        state: Option<VersionState>,
        /// Last migration boundary known to be fully applied
        last_applied: Option<u64>,
        /// Last applied version if the interrupted run was a rollback
        rollback_applied: Option<u64>,
    },

    #[error("Invalid version {0}: use a non-negative version, or -1 to reset")]
    InvalidForceVersion(i64),

    #[error("Failed to open database at {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("Migration version {0} not found")]
    UnknownMigration(u64),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl CliError {
    /// Short machine-friendly kind shown next to the message
    pub fn kind(&self) -> &'static str {
        match self {
            CliError::Migration { source, .. } => source.kind(),
            CliError::InvalidForceVersion(_) => "invalid-version",
            CliError::Store { .. } => "store",
            CliError::UnknownMigration(_) => "source",
            CliError::Output(_) => "io",
        }
    }

    /// Multi-line report: message, kind, last applied version and a force hint
    pub fn report(&self) -> String {
        let mut out = format!("{}\n  kind: {}", self, self.kind());

        if let CliError::Migration { source, state, last_applied, rollback_applied } = self {
            let last = last_applied.map_or_else(|| "none".to_string(), |v| v.to_string());
            out.push_str(&format!("\n  last applied version: {}", last));

            if let Some(state) = state {
                out.push_str(&format!("\n  version record: {}", state));
            }
            if source.requires_force() {
                out.push_str(&format!(
                    "\n  hint: fix the database by hand, then run `docshift-migrate force {}`",
                    last_applied.map_or_else(|| "-1".to_string(), |v| v.to_string())
                ));
                if let Some(v) = rollback_applied {
                    out.push_str(&format!(
                        "\n  if the failed run was a rollback, version {} is still applied: \
                         run `docshift-migrate force {}` instead",
                        v, v
                    ));
                }
            }
        }
        out
    }
}
