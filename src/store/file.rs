//! Directory-backed JSON document store
//!
//! Layout:
//!
//! ```text
//! <dir>/
//!   schema_migrations.json     version record
//!   collections/<name>.json    documents + indexes of one collection
//!   .docshift.lock             present while a process is writing
//! ```
//!
//! Every primitive takes the lock file, so independent processes are
//! serialised and the version record gets a real compare-and-set.

use crate::migration::VersionState;
use crate::store::{
    Collection, Document, DocumentStore, FileLockGuard, IndexKey, IndexOptions, ScriptRunner,
    StoreError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

const METADATA_FILE: &str = "schema_migrations.json";
const COLLECTIONS_DIR: &str = "collections";
const LOCK_FILE: &str = ".docshift.lock";
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-file document store
pub struct FileStore {
    dir: PathBuf,
    lock_timeout: Duration,
    scripts: Option<Box<dyn ScriptRunner + Send + Sync>>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join(COLLECTIONS_DIR))?;
        Ok(Self {
            dir,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            scripts: None,
        })
    }

    /// How long to wait for another process's lock
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Runner used for script migrations; without one they fail with `ScriptUnsupported`
    pub fn with_script_runner(mut self, runner: impl ScriptRunner + Send + Sync + 'static) -> Self {
        self.scripts = Some(Box::new(runner));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read a collection (without locking)
    pub fn collection(&self, name: &str) -> Result<Option<Collection>, StoreError> {
        let path = self.collection_path(name)?;
        read_json(&path)
    }

    /// Names of all collections, sorted
    pub fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.dir.join(COLLECTIONS_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn lock(&self) -> Result<FileLockGuard, StoreError> {
        FileLockGuard::acquire(self.dir.join(LOCK_FILE), self.lock_timeout)
    }

    fn collection_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\', '\0']);
        if !valid {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(COLLECTIONS_DIR).join(format!("{name}.json")))
    }

    /// Load, modify and save one collection under the store lock
    fn update_collection<T>(
        &self,
        name: &str,
        create_if_missing: bool,
        f: impl FnOnce(&mut Collection) -> Result<T, StoreError>,
    ) -> Result<Option<T>, StoreError> {
        let path = self.collection_path(name)?;
        let _lock = self.lock()?;
        let mut collection = match read_json::<Collection>(&path)? {
            Some(c) => c,
            None if create_if_missing => Collection::new(),
            None => return Ok(None),
        };
        let result = f(&mut collection)?;
        write_json(&path, &collection)?;
        Ok(Some(result))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).map(Some).map_err(|e| {
            StoreError::Serialization(format!("{}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(e)),
    }
}

/// Write through a temp file and rename so readers never see a torn file
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl ScriptRunner for FileStore {
    fn execute_script(&self, body: &str) -> Result<(), StoreError> {
        match &self.scripts {
            Some(runner) => runner.execute_script(body),
            None => Err(StoreError::ScriptUnsupported),
        }
    }
}

impl DocumentStore for FileStore {
    fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        let path = self.collection_path(name)?;
        let _lock = self.lock()?;
        if path.exists() {
            return Err(StoreError::NamespaceExists(name.to_string()));
        }
        write_json(&path, &Collection::new())
    }

    fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        let path = self.collection_path(name)?;
        let _lock = self.lock()?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn create_index(
        &self,
        collection: &str,
        keys: &[IndexKey],
        options: &IndexOptions,
    ) -> Result<(), StoreError> {
        self.update_collection(collection, true, |c| c.create_index(collection, keys, options))?;
        Ok(())
    }

    fn insert_one(&self, collection: &str, document: Document) -> Result<(), StoreError> {
        self.update_collection(collection, true, |c| c.insert(collection, document))?;
        Ok(())
    }

    fn delete_one(&self, collection: &str, filter: &Document) -> Result<u64, StoreError> {
        let deleted = self.update_collection(collection, false, |c| Ok(c.delete_one(filter)))?;
        Ok(deleted.unwrap_or(0))
    }

    fn read_metadata_record(&self) -> Result<VersionState, StoreError> {
        Ok(read_json(&self.dir.join(METADATA_FILE))?.unwrap_or_default())
    }

    fn write_metadata_record(
        &self,
        next: VersionState,
        expected: VersionState,
    ) -> Result<(), StoreError> {
        let path = self.dir.join(METADATA_FILE);
        let _lock = self.lock()?;
        let found: VersionState = read_json(&path)?.unwrap_or_default();
        if found != expected {
            return Err(StoreError::Conflict { expected, found });
        }
        write_json(&path, &next)
    }
}
