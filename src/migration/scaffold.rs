//! Migration file scaffolding
//!
//! Creates an up/down pair named `<YYYYMMDDHHMMSS>_<name>.<up|down>.<ext>`
//! with a starting body for the chosen format.

use crate::migration::operation::{CreateIndex, DeleteOne, InsertOne};
use crate::migration::{
    DeclarativeMigration, MigrationDirection, MigrationError, MigrationFile, MigrationFormat,
    OperationStep,
};
use crate::store::Document;
use chrono::{DateTime, Datelike, NaiveDateTime, TimeDelta, Timelike, Utc};
use serde_json::{json, Value};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const EXAMPLE_COLLECTION: &str = "example_collection";

/// Paths of a freshly created migration pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldPaths {
    pub version: u64,
    pub up_path: PathBuf,
    pub down_path: PathBuf,
}

/// Writes new migration file pairs into a migrations directory
pub struct ScaffoldGenerator {
    migrations_dir: PathBuf,
}

impl ScaffoldGenerator {
    pub fn new(migrations_dir: impl AsRef<Path>) -> Self {
        Self {
            migrations_dir: migrations_dir.as_ref().to_path_buf(),
        }
    }

    /// Create a migration pair stamped with the current UTC time
    pub fn create(
        &self,
        name: &str,
        format: MigrationFormat,
    ) -> Result<ScaffoldPaths, MigrationError> {
        self.create_at(name, format, Utc::now())
    }

    /// Create a migration pair stamped with `now`
    ///
    /// The version is bumped past the newest file already in the directory,
    /// so two pairs created within the same second still sort in creation
    /// order.
    ///
    /// # Errors
    ///
    /// - `InvalidName` if `name` has no letters or digits
    /// - `Io` if the directory cannot be created or either file already exists
    pub fn create_at(
        &self,
        name: &str,
        format: MigrationFormat,
        now: DateTime<Utc>,
    ) -> Result<ScaffoldPaths, MigrationError> {
        let sanitized = sanitize_name(name);
        if sanitized.is_empty() {
            return Err(MigrationError::InvalidName(name.to_string()));
        }

        fs::create_dir_all(&self.migrations_dir).map_err(|error| MigrationError::Io {
            path: self.migrations_dir.clone(),
            error,
        })?;

        let version = self.next_version(now.naive_utc())?;
        let stem = format!("{}_{}", version, sanitized);
        let up_path = self.migrations_dir.join(format!(
            "{}.{}.{}",
            stem,
            MigrationDirection::Up,
            format.extension()
        ));
        let down_path = self.migrations_dir.join(format!(
            "{}.{}.{}",
            stem,
            MigrationDirection::Down,
            format.extension()
        ));

        let (up_body, down_body) = match format {
            MigrationFormat::Script => (
                script_template(&sanitized, MigrationDirection::Up),
                script_template(&sanitized, MigrationDirection::Down),
            ),
            MigrationFormat::Declarative => (
                declarative_template(&sanitized, MigrationDirection::Up)?,
                declarative_template(&sanitized, MigrationDirection::Down)?,
            ),
        };

        write_new(&up_path, &up_body)?;
        if let Err(e) = write_new(&down_path, &down_body) {
            // Leave no half-created pair behind
            let _ = fs::remove_file(&up_path);
            return Err(e);
        }

        log::info!(
            "Created {} migration files:\n  {}\n  {}",
            format,
            up_path.display(),
            down_path.display()
        );

        Ok(ScaffoldPaths { version, up_path, down_path })
    }

    /// Timestamp version for `now`, or one past the newest existing version
    fn next_version(&self, now: NaiveDateTime) -> Result<u64, MigrationError> {
        let candidate = timestamp_version(&now);
        let latest = self.latest_existing_version()?;

        match latest {
            Some(latest) if latest >= candidate => {
                let bumped = NaiveDateTime::parse_from_str(&latest.to_string(), TIMESTAMP_FORMAT)
                    .ok()
                    .and_then(|t| t.checked_add_signed(TimeDelta::seconds(1)))
                    .map(|t| timestamp_version(&t));
                Ok(bumped.unwrap_or(latest + 1))
            }
            _ => Ok(candidate),
        }
    }

    /// Files that do not parse as migrations are ignored here
    fn latest_existing_version(&self) -> Result<Option<u64>, MigrationError> {
        let entries = fs::read_dir(&self.migrations_dir).map_err(|error| MigrationError::Io {
            path: self.migrations_dir.clone(),
            error,
        })?;

        let latest = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| MigrationFile::parse_filename(&name).ok())
            .map(|parsed| parsed.version)
            .max();
        Ok(latest)
    }
}

/// Lower-case the name and collapse every run of other characters into `_`
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

fn timestamp_version(t: &NaiveDateTime) -> u64 {
    let date = u64::from(t.year().unsigned_abs()) * 10_000 + u64::from(t.month()) * 100
        + u64::from(t.day());
    let time = u64::from(t.hour()) * 10_000 + u64::from(t.minute()) * 100 + u64::from(t.second());
    date * 1_000_000 + time
}

fn write_new(path: &Path, body: &str) -> Result<(), MigrationError> {
    let io_err = |error: io::Error| MigrationError::Io {
        path: path.to_path_buf(),
        error,
    };
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(io_err)?;
    file.write_all(body.as_bytes()).map_err(io_err)
}

fn script_template(name: &str, direction: MigrationDirection) -> String {
    match direction {
        MigrationDirection::Up => format!(
            "// Up migration for {name}\n\
             // Add your database operations here\n\
             // Example:\n\
             // db.createCollection(\"collection_name\");\n\
             // db.collection_name.createIndex({{ \"field\": 1 }});\n\
             // db.collection_name.insertOne({{ \"field\": \"value\" }});\n"
        ),
        MigrationDirection::Down => format!(
            "// Down migration for {name}\n\
             // Add your rollback operations here\n\
             // Example:\n\
             // db.collection_name.drop();\n\
             // db.collection_name.deleteOne({{ \"field\": \"value\" }});\n"
        ),
    }
}

fn declarative_template(
    name: &str,
    direction: MigrationDirection,
) -> Result<String, MigrationError> {
    let operations = match direction {
        MigrationDirection::Up => vec![
            OperationStep::Comment(format!("Up migration for {name}")),
            OperationStep::CreateCollection(EXAMPLE_COLLECTION.to_string()),
            OperationStep::CreateIndex(CreateIndex {
                collection: EXAMPLE_COLLECTION.to_string(),
                index: document(json!({ "field": 1 })),
                options: document(json!({ "unique": true })),
            }),
            OperationStep::InsertOne(InsertOne {
                collection: EXAMPLE_COLLECTION.to_string(),
                document: document(json!({
                    "field": "value",
                    "created_at": "2024-01-01T00:00:00Z"
                })),
            }),
        ],
        MigrationDirection::Down => vec![
            OperationStep::Comment(format!("Down migration for {name}")),
            OperationStep::DeleteOne(DeleteOne {
                collection: EXAMPLE_COLLECTION.to_string(),
                filter: document(json!({ "field": "value" })),
            }),
            OperationStep::DropCollection(EXAMPLE_COLLECTION.to_string()),
        ],
    };

    let mut body = DeclarativeMigration { operations }
        .to_json_pretty()
        .map_err(|e| MigrationError::Io {
            path: PathBuf::from(name),
            error: io::Error::from(e),
        })?;
    body.push('\n');
    Ok(body)
}

fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::discover_migrations;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 20, h, m, s).unwrap()
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Add Users"), "add_users");
        assert_eq!(sanitize_name("  add--email/index!! "), "add_email_index");
        assert_eq!(sanitize_name("___"), "");
        assert_eq!(sanitize_name("v2 Schema"), "v2_schema");
    }

    #[test]
    fn test_create_declarative_pair() {
        let temp = TempDir::new().unwrap();
        let generator = ScaffoldGenerator::new(temp.path().join("migrations"));

        let paths = generator
            .create_at("Add Users", MigrationFormat::Declarative, at(12, 0, 0))
            .unwrap();
        assert_eq!(paths.version, 20_240_120_120_000);
        assert!(paths.up_path.ends_with("20240120120000_add_users.up.json"));
        assert!(paths.down_path.ends_with("20240120120000_add_users.down.json"));

        let up = DeclarativeMigration::parse(&fs::read_to_string(&paths.up_path).unwrap()).unwrap();
        let names: Vec<_> = up.operations.iter().map(|s| s.op_name()).collect();
        assert_eq!(names, vec!["comment", "createCollection", "createIndex", "insertOne"]);

        let down =
            DeclarativeMigration::parse(&fs::read_to_string(&paths.down_path).unwrap()).unwrap();
        let names: Vec<_> = down.operations.iter().map(|s| s.op_name()).collect();
        assert_eq!(names, vec!["comment", "deleteOne", "dropCollection"]);

        let catalog = discover_migrations(&temp.path().join("migrations")).unwrap();
        assert!(catalog.contains(20_240_120_120_000));
    }

    #[test]
    fn test_create_script_pair() {
        let temp = TempDir::new().unwrap();
        let generator = ScaffoldGenerator::new(temp.path());

        let paths = generator.create_at("seed", MigrationFormat::Script, at(9, 30, 0)).unwrap();
        assert!(paths.up_path.ends_with("20240120093000_seed.up.js"));
        let body = fs::read_to_string(&paths.up_path).unwrap();
        assert!(body.starts_with("// Up migration for seed"));
    }

    #[test]
    fn test_versions_stay_monotonic_within_one_second() {
        let temp = TempDir::new().unwrap();
        let generator = ScaffoldGenerator::new(temp.path());

        let first = generator.create_at("a", MigrationFormat::Script, at(12, 0, 59)).unwrap();
        let second = generator.create_at("b", MigrationFormat::Script, at(12, 0, 59)).unwrap();
        assert_eq!(first.version, 20_240_120_120_059);
        assert_eq!(second.version, 20_240_120_120_100);
    }

    #[test]
    fn test_non_timestamp_versions_bump_by_one() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("99999999999999_big.up.js"), "").unwrap();
        let generator = ScaffoldGenerator::new(temp.path());

        let paths = generator.create_at("next", MigrationFormat::Script, at(0, 0, 0)).unwrap();
        assert_eq!(paths.version, 100_000_000_000_000);
    }

    #[test]
    fn test_empty_name_rejected() {
        let temp = TempDir::new().unwrap();
        let generator = ScaffoldGenerator::new(temp.path());
        assert!(matches!(
            generator.create_at("!!!", MigrationFormat::Script, at(0, 0, 0)),
            Err(MigrationError::InvalidName(_))
        ));
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_write_new_refuses_existing_file() {
        let temp = TempDir::new().unwrap();
        let down = temp.path().join("20240120120000_users.down.js");
        fs::write(&down, "keep").unwrap();

        let err = write_new(&down, "new").unwrap_err();
        assert!(matches!(err, MigrationError::Io { .. }));
        assert_eq!(fs::read_to_string(&down).unwrap(), "keep");
    }

    #[test]
    fn test_existing_version_is_bumped() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("20240120120000_users.down.js"), "keep").unwrap();
        let generator = ScaffoldGenerator::new(temp.path());

        let paths = generator.create_at("users", MigrationFormat::Script, at(12, 0, 0)).unwrap();
        assert_eq!(paths.version, 20_240_120_120_001);
    }
}
