//! Migration-specific error types

use crate::migration::{MigrationDirection, VersionState};
use crate::store::StoreError;
use std::path::PathBuf;
use std::time::Duration;

/// Problems with the migrations directory or the files in it
#[derive(Debug)]
pub enum SourceError {
    /// The migrations directory is missing or cannot be read
    Unreadable { path: PathBuf, error: std::io::Error },
    /// A file name does not follow `<version>_<name>.<up|down>.<ext>`
    MalformedFilename { filename: String, reason: String },
    /// A migration file body could not be read or parsed
    InvalidBody { path: PathBuf, reason: String },
    /// The requested version is not present in the catalog
    UnknownVersion(u64),
    /// The catalog has the version but not the file for this direction
    MissingFile { version: u64, direction: MigrationDirection },
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Unreadable { path, error } => {
                write!(f, "Cannot read migrations directory {}: {}", path.display(), error)
            }
            SourceError::MalformedFilename { filename, reason } => {
                write!(
                    f,
                    "Malformed migration file name '{}': {}\n\
                     Expected pattern: <version>_<name>.<up|down>.<js|script|json>",
                    filename, reason
                )
            }
            SourceError::InvalidBody { path, reason } => {
                write!(f, "Invalid migration file {}: {}", path.display(), reason)
            }
            SourceError::UnknownVersion(version) => {
                write!(f, "No migration with version {} exists in the migrations directory", version)
            }
            SourceError::MissingFile { version, direction } => {
                write!(
                    f,
                    "Migration version {} has no {} file",
                    version, direction
                )
            }
        }
    }
}

/// Two writers (or two files) claim the same slot
#[derive(Debug)]
pub enum ConflictError {
    /// Two files share the same `(version, direction)`
    DuplicateMigration {
        version: u64,
        direction: MigrationDirection,
        first: PathBuf,
        second: PathBuf,
    },
    /// The stored version record changed under us
    ConcurrentWriter { expected: VersionState, found: VersionState },
}

impl std::fmt::Display for ConflictError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictError::DuplicateMigration { version, direction, first, second } => {
                write!(
                    f,
                    "Duplicate {} migration for version {}: {} and {}",
                    direction,
                    version,
                    first.display(),
                    second.display()
                )
            }
            ConflictError::ConcurrentWriter { expected, found } => {
                write!(
                    f,
                    "Version record changed concurrently (expected {}, found {}).\n\
                     Another process may be running migrations; retry once it has finished.",
                    expected, found
                )
            }
        }
    }
}

/// Why a migration step failed
#[derive(Debug)]
pub enum ExecutionCause {
    /// The store rejected the operation
    Store(StoreError),
    /// The declarative body could not be parsed
    InvalidBody(String),
    /// The run was cancelled before this step started
    Cancelled,
    /// The per-migration deadline passed before this step started
    TimedOut(Duration),
}

impl std::fmt::Display for ExecutionCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionCause::Store(e) => write!(f, "{}", e),
            ExecutionCause::InvalidBody(msg) => write!(f, "invalid migration body: {}", msg),
            ExecutionCause::Cancelled => write!(f, "cancelled"),
            ExecutionCause::TimedOut(limit) => {
                write!(f, "timed out after {:.1}s", limit.as_secs_f64())
            }
        }
    }
}

/// A step failed while applying a migration body.
///
/// `step_index` is 1-based; scripts count as a single step.
#[derive(Debug)]
pub struct ExecutionError {
    pub step_index: usize,
    pub cause: ExecutionCause,
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step {} failed: {}", self.step_index, self.cause)
    }
}

impl std::error::Error for ExecutionError {}

/// Migration-specific errors
#[derive(Debug)]
pub enum MigrationError {
    /// Bad migrations directory, file name or body
    Source(SourceError),
    /// Duplicate migration or concurrent writer
    Conflict(ConflictError),
    /// Migration failed during execution; the version record is left dirty
    Execution {
        version: u64,
        name: String,
        direction: MigrationDirection,
        step_index: usize,
        cause: ExecutionCause,
    },
    /// Refusal to migrate while the version record is dirty
    DirtyState { version: Option<u64> },
    /// `down` was requested but nothing has been applied
    NilVersion,
    /// A scaffold name sanitised down to nothing
    InvalidName(String),
    /// Scaffold or filesystem error
    Io { path: PathBuf, error: std::io::Error },
    /// The store failed outside of a migration step
    Store(StoreError),
}

impl MigrationError {
    /// Short machine-friendly name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            MigrationError::Source(_) => "source",
            MigrationError::Conflict(_) => "conflict",
            MigrationError::Execution { .. } => "execution",
            MigrationError::DirtyState { .. } => "dirty-state",
            MigrationError::NilVersion => "nil-version",
            MigrationError::InvalidName(_) => "invalid-name",
            MigrationError::Io { .. } => "io",
            MigrationError::Store(_) => "store",
        }
    }

    /// Whether this failure left (or found) the version record dirty
    pub fn requires_force(&self) -> bool {
        matches!(
            self,
            MigrationError::Execution { .. } | MigrationError::DirtyState { .. }
        )
    }
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationError::Source(e) => write!(f, "{}", e),
            MigrationError::Conflict(e) => write!(f, "{}", e),
            MigrationError::Execution { version, name, direction, step_index, cause } => {
                write!(
                    f,
                    "Migration '{}' (version {}, {}) failed at step {}: {}",
                    name, version, direction, step_index, cause
                )
            }
            MigrationError::DirtyState { version } => {
                let version = version.map_or_else(|| "none".to_string(), |v| v.to_string());
                write!(
                    f,
                    "Database is dirty at version {}.\n\
                     A previous migration did not complete; reconcile the schema by hand, \
                     then run `force <version>` to clear the dirty flag.",
                    version
                )
            }
            MigrationError::NilVersion => {
                write!(f, "No migration has been applied yet; nothing to roll back")
            }
            MigrationError::InvalidName(name) => {
                write!(f, "Invalid migration name '{}': it must contain letters or digits", name)
            }
            MigrationError::Io { path, error } => {
                write!(f, "I/O error on {}: {}", path.display(), error)
            }
            MigrationError::Store(e) => write!(f, "Store error: {}", e),
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrationError::Io { error, .. } => Some(error),
            MigrationError::Store(e) => Some(e),
            MigrationError::Execution { cause: ExecutionCause::Store(e), .. } => Some(e),
            _ => None,
        }
    }
}

impl From<SourceError> for MigrationError {
    fn from(error: SourceError) -> Self {
        MigrationError::Source(error)
    }
}

impl From<ConflictError> for MigrationError {
    fn from(error: ConflictError) -> Self {
        MigrationError::Conflict(error)
    }
}

impl From<StoreError> for MigrationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict { expected, found } => {
                MigrationError::Conflict(ConflictError::ConcurrentWriter { expected, found })
            }
            other => MigrationError::Store(other),
        }
    }
}
