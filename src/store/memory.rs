//! In-process document store

use crate::migration::VersionState;
use crate::store::{
    Collection, Document, DocumentStore, IndexKey, IndexOptions, RecordingScriptRunner,
    ScriptRunner, StoreError,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    collections: BTreeMap<String, Collection>,
    metadata: Option<VersionState>,
    mutations: usize,
}

/// A document store held entirely in memory
///
/// All state sits behind one mutex, so a `MemoryStore` shared through an
/// `Arc` gives the same compare-and-set guarantees to concurrent engines
/// that a real database would. Scripts go to a [`RecordingScriptRunner`]
/// unless another runner is supplied.
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    scripts: Box<dyn ScriptRunner + Send + Sync>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_script_runner(RecordingScriptRunner::new())
    }

    pub fn with_script_runner(runner: impl ScriptRunner + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            scripts: Box::new(runner),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::Other(format!("Failed to lock memory store: {e}")))
    }

    /// Snapshot of a collection, if it exists
    pub fn collection(&self, name: &str) -> Option<Collection> {
        self.lock().ok()?.collections.get(name).cloned()
    }

    /// Names of all collections, sorted
    pub fn collection_names(&self) -> Vec<String> {
        self.lock()
            .map(|s| s.collections.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of successful data/schema mutations and scripts (the version record excluded)
    pub fn mutation_count(&self) -> usize {
        self.lock().map(|s| s.mutations).unwrap_or_default()
    }
}

impl ScriptRunner for MemoryStore {
    fn execute_script(&self, body: &str) -> Result<(), StoreError> {
        self.scripts.execute_script(body)?;
        self.lock()?.mutations += 1;
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.collections.contains_key(name) {
            return Err(StoreError::NamespaceExists(name.to_string()));
        }
        state.collections.insert(name.to_string(), Collection::new());
        state.mutations += 1;
        Ok(())
    }

    fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.collections.remove(name).is_some() {
            state.mutations += 1;
        }
        Ok(())
    }

    fn create_index(
        &self,
        collection: &str,
        keys: &[IndexKey],
        options: &IndexOptions,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let mut target = state.collections.get(collection).cloned().unwrap_or_default();
        target.create_index(collection, keys, options)?;
        state.collections.insert(collection.to_string(), target);
        state.mutations += 1;
        Ok(())
    }

    fn insert_one(&self, collection: &str, document: Document) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(collection, document)?;
        state.mutations += 1;
        Ok(())
    }

    fn delete_one(&self, collection: &str, filter: &Document) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let deleted = state
            .collections
            .get_mut(collection)
            .map_or(0, |c| c.delete_one(filter));
        if deleted > 0 {
            state.mutations += 1;
        }
        Ok(deleted)
    }

    fn read_metadata_record(&self) -> Result<VersionState, StoreError> {
        Ok(self.lock()?.metadata.unwrap_or_default())
    }

    fn write_metadata_record(
        &self,
        next: VersionState,
        expected: VersionState,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let found = state.metadata.unwrap_or_default();
        if found != expected {
            return Err(StoreError::Conflict { expected, found });
        }
        state.metadata = Some(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_fresh_store_reads_initial_state() {
        let store = MemoryStore::new();
        assert_eq!(store.read_metadata_record().unwrap(), VersionState::initial());
    }

    #[test]
    fn test_compare_and_set() {
        let store = MemoryStore::new();
        let one = VersionState::clean(1);
        store.write_metadata_record(one, VersionState::initial()).unwrap();
        assert_eq!(store.read_metadata_record().unwrap(), one);

        let err = store
            .write_metadata_record(VersionState::clean(2), VersionState::initial())
            .unwrap_err();
        match err {
            StoreError::Conflict { expected, found } => {
                assert_eq!(expected, VersionState::initial());
                assert_eq!(found, one);
            }
            other => panic!("Expected Conflict, got {other:?}"),
        }
        assert_eq!(store.read_metadata_record().unwrap(), one);
    }

    #[test]
    fn test_create_collection_twice_fails() {
        let store = MemoryStore::new();
        store.create_collection("users").unwrap();
        assert!(matches!(
            store.create_collection("users"),
            Err(StoreError::NamespaceExists(_))
        ));
    }

    #[test]
    fn test_drop_missing_collection_is_noop() {
        let store = MemoryStore::new();
        store.drop_collection("ghosts").unwrap();
        assert_eq!(store.mutation_count(), 0);
    }

    #[test]
    fn test_insert_and_delete() {
        let store = MemoryStore::new();
        store.insert_one("users", doc(json!({"name": "ada"}))).unwrap();
        assert_eq!(store.collection("users").unwrap().len(), 1);
        assert_eq!(store.delete_one("users", &doc(json!({"name": "ada"}))).unwrap(), 1);
        assert!(store.collection("users").unwrap().is_empty());
        assert_eq!(store.delete_one("nope", &doc(json!({}))).unwrap(), 0);
    }

    #[test]
    fn test_failed_index_leaves_collection_untouched() {
        let store = MemoryStore::new();
        store.insert_one("users", doc(json!({"email": "a"}))).unwrap();
        store.insert_one("users", doc(json!({"email": "a"}))).unwrap();

        let result = store.create_index(
            "users",
            &[IndexKey::ascending("email")],
            &doc(json!({"unique": true})),
        );
        assert!(result.is_err());
        assert!(store.collection("users").unwrap().indexes.is_empty());
    }

    #[test]
    fn test_scripts_are_recorded_and_counted() {
        let store = MemoryStore::new();
        store.execute_script("db.users.drop()").unwrap();
        assert_eq!(store.mutation_count(), 1);
    }
}
