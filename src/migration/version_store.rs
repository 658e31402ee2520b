//! Version record tracking
//!
//! One record per target database: the last migration boundary reached and
//! whether a migration was in flight (or failed) when it was written.

use crate::migration::{ConflictError, MigrationError};
use crate::store::{DocumentStore, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted `{version, dirty}` record
///
/// `version == None` means no migration has ever been applied; this is
/// distinct from `Some(0)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionState {
    pub version: Option<u64>,
    pub dirty: bool,
}

impl VersionState {
    /// State of a database that has never been migrated
    pub const fn initial() -> Self {
        Self { version: None, dirty: false }
    }

    pub const fn clean(version: u64) -> Self {
        Self { version: Some(version), dirty: false }
    }

    pub const fn dirty(version: Option<u64>) -> Self {
        Self { version, dirty: true }
    }

    pub fn is_never_migrated(&self) -> bool {
        self.version.is_none() && !self.dirty
    }
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{v}")?,
            None => write!(f, "none")?,
        }
        if self.dirty {
            write!(f, " (dirty)")?;
        }
        Ok(())
    }
}

/// Read / compare-and-set access to the version record of one store
///
/// The handle borrows the store it was built from, so several databases can
/// be migrated by one process without sharing any global state.
pub struct VersionStore<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> VersionStore<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    /// Current record (lazily [`VersionState::initial`] if never written)
    pub fn read(&self) -> Result<VersionState, MigrationError> {
        Ok(self.store.read_metadata_record()?)
    }

    /// Replace the record with `next` only if it still equals `expected`
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Conflict` if another writer got there first.
    /// Never retries.
    pub fn compare_and_set(
        &self,
        expected: VersionState,
        next: VersionState,
    ) -> Result<(), MigrationError> {
        self.store
            .write_metadata_record(next, expected)
            .map_err(|e| match e {
                StoreError::Conflict { expected, found } => {
                    MigrationError::Conflict(ConflictError::ConcurrentWriter { expected, found })
                }
                other => MigrationError::Store(other),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_display_distinguishes_none_and_zero() {
        assert_eq!(VersionState::initial().to_string(), "none");
        assert_eq!(VersionState::clean(0).to_string(), "0");
        assert_eq!(VersionState::dirty(Some(3)).to_string(), "3 (dirty)");
    }

    #[test]
    fn test_compare_and_set_conflict_maps_to_conflict_error() {
        let store = MemoryStore::new();
        let versions = VersionStore::new(&store);

        versions
            .compare_and_set(VersionState::initial(), VersionState::clean(1))
            .unwrap();
        let err = versions
            .compare_and_set(VersionState::initial(), VersionState::clean(5))
            .unwrap_err();

        match err {
            MigrationError::Conflict(ConflictError::ConcurrentWriter { found, .. }) => {
                assert_eq!(found, VersionState::clean(1));
            }
            other => panic!("Expected ConcurrentWriter, got {other:?}"),
        }
        assert_eq!(versions.read().unwrap(), VersionState::clean(1));
    }
}
