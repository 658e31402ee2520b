//! Migration status tracking

use crate::migration::{MigrationEntry, VersionState};

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Version record as read from the store
    pub state: VersionState,

    /// Catalog entries at or below the current version
    pub applied: Vec<MigrationEntry>,

    /// Catalog entries above the current version
    pub pending: Vec<MigrationEntry>,

    /// Total number of migrations (applied + pending)
    pub total: usize,

    pub applied_count: usize,

    pub pending_count: usize,
}

impl MigrationStatus {
    /// Create a new `MigrationStatus`
    #[must_use]
    pub fn new(
        state: VersionState,
        applied: Vec<MigrationEntry>,
        pending: Vec<MigrationEntry>,
    ) -> Self {
        let applied_count = applied.len();
        let pending_count = pending.len();
        let total = applied_count + pending_count;

        Self {
            state,
            applied,
            pending,
            total,
            applied_count,
            pending_count,
        }
    }

    /// Check if all migrations are applied and the record is clean
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending_count == 0 && !self.state.dirty
    }

    /// Get the latest applied migration version
    #[must_use]
    pub fn latest_applied_version(&self) -> Option<u64> {
        self.applied.last().map(|m| m.version)
    }

    /// Get the next pending migration version
    #[must_use]
    pub fn next_pending_version(&self) -> Option<u64> {
        self.pending.first().map(|m| m.version)
    }
}
