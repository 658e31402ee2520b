//! Document store collaborator
//!
//! The migration engine talks to the target database only through
//! [`DocumentStore`]. Opaque script bodies go through the [`ScriptRunner`]
//! capability, which every store must provide (possibly by refusing).
//!
//! Two stores ship with the crate:
//! - [`MemoryStore`] keeps everything in process, for tests and embedding
//! - [`FileStore`] persists collections as JSON files in a directory and
//!   serialises writers across processes with a lock file

pub mod collection;
pub mod file;
pub mod lock;
pub mod memory;
pub mod script;

pub use collection::{Collection, IndexSpec};
pub use file::FileStore;
pub use lock::FileLockGuard;
pub use memory::MemoryStore;
pub use script::{CommandScriptRunner, RecordingScriptRunner};

use crate::migration::VersionState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A JSON document
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Index options passed through from the migration file (`unique`, `name`, ...)
pub type IndexOptions = serde_json::Map<String, serde_json::Value>;

/// Sort direction of one index key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexOrder {
    Ascending,
    Descending,
}

impl IndexOrder {
    /// The numeric form used in index specs (`1` / `-1`)
    pub fn as_i64(self) -> i64 {
        match self {
            IndexOrder::Ascending => 1,
            IndexOrder::Descending => -1,
        }
    }
}

/// One field of a (possibly composite) index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKey {
    pub field: String,
    pub order: IndexOrder,
}

impl IndexKey {
    pub fn new(field: impl Into<String>, order: IndexOrder) -> Self {
        Self { field: field.into(), order }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new(field, IndexOrder::Ascending)
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self::new(field, IndexOrder::Descending)
    }
}

/// Store error type
#[derive(Debug)]
pub enum StoreError {
    /// Compare-and-set on the version record failed
    Conflict { expected: VersionState, found: VersionState },
    /// The collection already exists
    NamespaceExists(String),
    /// Collection name cannot be used by this store
    InvalidName(String),
    /// A unique index would be violated
    DuplicateKey { collection: String, index: String, key: String },
    /// Index spec is invalid or conflicts with an existing index
    InvalidIndex(String),
    /// The store cannot execute script migrations
    ScriptUnsupported,
    /// The script ran and failed
    Script(String),
    /// An operation exceeded its time limit
    Timeout(String),
    /// Could not take the store lock in time
    LockTimeout(String),
    /// Persisted data could not be (de)serialised
    Serialization(String),
    /// Underlying I/O failure
    Io(std::io::Error),
    /// Other store errors
    Other(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Conflict { expected, found } => {
                write!(f, "Version record conflict: expected {expected}, found {found}")
            }
            StoreError::NamespaceExists(name) => write!(f, "Collection '{name}' already exists"),
            StoreError::InvalidName(name) => write!(f, "Invalid collection name '{name}'"),
            StoreError::DuplicateKey { collection, index, key } => {
                write!(f, "Duplicate key in '{collection}' for index '{index}': {key}")
            }
            StoreError::InvalidIndex(msg) => write!(f, "Invalid index: {msg}"),
            StoreError::ScriptUnsupported => {
                write!(f, "This store has no script runner configured")
            }
            StoreError::Script(msg) => write!(f, "Script failed: {msg}"),
            StoreError::Timeout(msg) => write!(f, "Timed out: {msg}"),
            StoreError::LockTimeout(msg) => write!(f, "Store lock timeout: {msg}"),
            StoreError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            StoreError::Io(e) => write!(f, "I/O error: {e}"),
            StoreError::Other(msg) => write!(f, "Store error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Capability to execute an opaque migration script.
///
/// The engine never looks inside the body; sandboxing is entirely the
/// implementor's responsibility.
pub trait ScriptRunner {
    /// Execute `body` and report success or failure
    fn execute_script(&self, body: &str) -> Result<(), StoreError>;
}

/// Trait for the document database a migration runs against
///
/// Every method is one store primitive. Implementations use interior
/// mutability so a store can be shared behind `&self` (and across threads
/// when the implementation is `Sync`).
pub trait DocumentStore: ScriptRunner {
    /// Create an empty collection; fails if it already exists
    fn create_collection(&self, name: &str) -> Result<(), StoreError>;

    /// Drop a collection and its indexes; dropping a missing collection is a no-op
    fn drop_collection(&self, name: &str) -> Result<(), StoreError>;

    /// Create a (possibly composite) index, creating the collection if needed
    fn create_index(
        &self,
        collection: &str,
        keys: &[IndexKey],
        options: &IndexOptions,
    ) -> Result<(), StoreError>;

    /// Insert one document, assigning an `_id` if it has none
    fn insert_one(&self, collection: &str, document: Document) -> Result<(), StoreError>;

    /// Delete the first document matching `filter` exactly; returns how many were deleted
    fn delete_one(&self, collection: &str, filter: &Document) -> Result<u64, StoreError>;

    /// Read the version record; an absent record reads as [`VersionState::initial`]
    fn read_metadata_record(&self) -> Result<VersionState, StoreError>;

    /// Replace the version record with `next` if it currently equals `expected`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the stored record differs from `expected`.
    fn write_metadata_record(
        &self,
        next: VersionState,
        expected: VersionState,
    ) -> Result<(), StoreError>;
}
