//! Migration file discovery and parsing

use crate::migration::{calculate_checksum, ConflictError, MigrationError, SourceError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// `<digits>_<rest>`
static VERSION_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)_(.+)$").expect("version prefix pattern is valid"));

/// Direction a migration file moves the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MigrationDirection {
    /// Apply the migration (up)
    Up,
    /// Rollback the migration (down)
    Down,
}

impl MigrationDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationDirection::Up => "up",
            MigrationDirection::Down => "down",
        }
    }
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a migration body is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationFormat {
    /// Opaque script handed to the store's script runner
    Script,
    /// JSON `{ "operations": [...] }` list interpreted step by step
    Declarative,
}

impl MigrationFormat {
    /// Extension written by the scaffold generator
    pub fn extension(self) -> &'static str {
        match self {
            MigrationFormat::Script => "js",
            MigrationFormat::Declarative => "json",
        }
    }

    /// Map a file extension to a format
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "js" | "script" => Some(MigrationFormat::Script),
            "json" => Some(MigrationFormat::Declarative),
            _ => None,
        }
    }
}

impl fmt::Display for MigrationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationFormat::Script => f.write_str("script"),
            MigrationFormat::Declarative => f.write_str("declarative"),
        }
    }
}

/// The parts encoded in a migration file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub version: u64,
    pub name: String,
    pub direction: MigrationDirection,
    pub format: MigrationFormat,
}

/// Represents a discovered migration file
#[derive(Debug, Clone)]
pub struct MigrationFile {
    /// Path to the migration file
    pub path: PathBuf,

    /// Migration version (usually a timestamp: YYYYMMDDHHMMSS)
    pub version: u64,

    /// Human-readable migration name
    pub name: String,

    pub direction: MigrationDirection,

    pub format: MigrationFormat,

    /// File content, uninterpreted
    pub body: String,

    /// SHA-256 checksum of the file content
    pub checksum: String,
}

impl MigrationFile {
    /// Parse migration file name to extract version, name, direction and format
    ///
    /// Expected format: `{version}_{name}.{up|down}.{js|script|json}`
    ///
    /// # Example
    /// - `20240120120000_create_users.up.json` → version: 20240120120000, name: "create_users",
    ///   direction: Up, format: Declarative
    pub fn parse_filename(filename: &str) -> Result<ParsedFilename, SourceError> {
        let malformed = |reason: String| SourceError::MalformedFilename {
            filename: filename.to_string(),
            reason,
        };

        let caps = VERSION_PREFIX
            .captures(filename)
            .ok_or_else(|| malformed("missing numeric version prefix".to_string()))?;
        let version_str = &caps[1];
        let rest = &caps[2];

        let version = version_str
            .parse::<u64>()
            .map_err(|e| malformed(format!("version '{version_str}' is not a valid u64: {e}")))?;

        let (stem, ext) = rest
            .rsplit_once('.')
            .ok_or_else(|| malformed("missing direction suffix (.up/.down)".to_string()))?;

        let (name, direction) = if let Some(name) = stem.strip_suffix(".up") {
            (name, MigrationDirection::Up)
        } else if let Some(name) = stem.strip_suffix(".down") {
            (name, MigrationDirection::Down)
        } else {
            return Err(malformed("missing direction suffix (.up/.down)".to_string()));
        };

        let format = MigrationFormat::from_extension(ext)
            .ok_or_else(|| malformed(format!("unrecognized extension '.{ext}'")))?;

        if name.is_empty() {
            return Err(malformed("missing migration name".to_string()));
        }

        Ok(ParsedFilename {
            version,
            name: name.to_string(),
            direction,
            format,
        })
    }

    /// Read and parse a single migration file
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SourceError::MalformedFilename {
                filename: path.display().to_string(),
                reason: "file name is not valid UTF-8".to_string(),
            })?;

        let parsed = Self::parse_filename(filename)?;

        let body = fs::read_to_string(path).map_err(|e| SourceError::InvalidBody {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            version: parsed.version,
            name: parsed.name,
            direction: parsed.direction,
            format: parsed.format,
            checksum: calculate_checksum(&body),
            body,
        })
    }

    /// File name without the directory
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Up and down files of one version
#[derive(Debug, Clone)]
pub struct MigrationEntry {
    pub version: u64,
    pub name: String,
    pub up: Option<MigrationFile>,
    pub down: Option<MigrationFile>,
}

impl MigrationEntry {
    pub fn file(&self, direction: MigrationDirection) -> Option<&MigrationFile> {
        match direction {
            MigrationDirection::Up => self.up.as_ref(),
            MigrationDirection::Down => self.down.as_ref(),
        }
    }
}

/// Ordered set of discovered migrations, keyed by version
#[derive(Debug, Clone, Default)]
pub struct MigrationCatalog {
    entries: BTreeMap<u64, MigrationEntry>,
}

impl MigrationCatalog {
    /// Build a catalog, rejecting duplicate `(version, direction)` pairs
    pub fn from_files(files: Vec<MigrationFile>) -> Result<Self, MigrationError> {
        let mut entries: BTreeMap<u64, MigrationEntry> = BTreeMap::new();

        for file in files {
            let entry = entries.entry(file.version).or_insert_with(|| MigrationEntry {
                version: file.version,
                name: file.name.clone(),
                up: None,
                down: None,
            });

            let slot = match file.direction {
                MigrationDirection::Up => &mut entry.up,
                MigrationDirection::Down => &mut entry.down,
            };

            if let Some(existing) = slot {
                return Err(ConflictError::DuplicateMigration {
                    version: file.version,
                    direction: file.direction,
                    first: existing.path.clone(),
                    second: file.path,
                }
                .into());
            }
            *slot = Some(file);
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All versions, ascending
    pub fn versions(&self) -> impl DoubleEndedIterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }

    /// All entries, ascending by version
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &MigrationEntry> + '_ {
        self.entries.values()
    }

    pub fn get(&self, version: u64) -> Option<&MigrationEntry> {
        self.entries.get(&version)
    }

    pub fn contains(&self, version: u64) -> bool {
        self.entries.contains_key(&version)
    }

    pub fn file(&self, version: u64, direction: MigrationDirection) -> Option<&MigrationFile> {
        self.entries.get(&version)?.file(direction)
    }

    /// First version strictly after `current` (`None` = before everything)
    pub fn next(&self, current: Option<u64>) -> Option<u64> {
        match current {
            None => self.entries.keys().next().copied(),
            Some(v) => self.entries.range(v.saturating_add(1)..).next().map(|(k, _)| *k),
        }
    }

    /// Last version strictly before `version`
    pub fn prev(&self, version: u64) -> Option<u64> {
        self.entries.range(..version).next_back().map(|(k, _)| *k)
    }

    pub fn latest(&self) -> Option<u64> {
        self.entries.keys().next_back().copied()
    }

    /// Files of one direction: ascending for up, descending for down
    pub fn ordered(&self, direction: MigrationDirection) -> Vec<&MigrationFile> {
        let files = self.entries.values().filter_map(|e| e.file(direction));
        match direction {
            MigrationDirection::Up => files.collect(),
            MigrationDirection::Down => {
                let mut files: Vec<_> = files.collect();
                files.reverse();
                files
            }
        }
    }
}

/// Discover all migration files in a directory
///
/// Every regular, non-hidden file must follow the naming pattern; anything
/// else fails the discovery. Sub-directories are skipped.
///
/// # Errors
///
/// Returns errors if:
/// - The directory doesn't exist or can't be read
/// - A migration file has an invalid name or cannot be read
/// - Two files claim the same `(version, direction)`
pub fn discover_migrations(migrations_dir: &Path) -> Result<MigrationCatalog, MigrationError> {
    let unreadable = |error: std::io::Error| SourceError::Unreadable {
        path: migrations_dir.to_path_buf(),
        error,
    };

    let entries = fs::read_dir(migrations_dir).map_err(unreadable)?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(unreadable)?;
        let path = entry.path();

        if path.is_dir() {
            continue;
        }
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            continue;
        }
        paths.push(path);
    }

    // Stable order so duplicate reports name files deterministically
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(MigrationFile::load(&path)?);
    }

    log::debug!(
        "Discovered {} migration file(s) in {}",
        files.len(),
        migrations_dir.display()
    );

    MigrationCatalog::from_files(files)
}
