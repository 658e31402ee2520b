//! In-memory collection model shared by the bundled stores

use crate::store::{Document, IndexKey, IndexOptions, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field every document is keyed by
pub const ID_FIELD: &str = "_id";

/// An index on a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<IndexKey>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub options: IndexOptions,
}

impl IndexSpec {
    /// Build an index spec, deriving the name (`field_1_other_-1`) unless `options.name` is set
    pub fn new(keys: &[IndexKey], options: &IndexOptions) -> Result<Self, StoreError> {
        if keys.is_empty() {
            return Err(StoreError::InvalidIndex("index must have at least one key".to_string()));
        }

        let name = match options.get("name") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            Some(other) => {
                return Err(StoreError::InvalidIndex(format!(
                    "index name must be a non-empty string, got {other}"
                )))
            }
            None => default_index_name(keys),
        };

        let unique = match options.get("unique") {
            None => false,
            Some(Value::Bool(unique)) => *unique,
            Some(other) => {
                return Err(StoreError::InvalidIndex(format!(
                    "index option 'unique' must be a boolean, got {other}"
                )))
            }
        };

        Ok(Self {
            name,
            keys: keys.to_vec(),
            unique,
            options: options.clone(),
        })
    }

    /// The index key of a document, as a JSON array (missing fields are `null`)
    fn key_of(&self, document: &Document) -> Value {
        Value::Array(
            self.keys
                .iter()
                .map(|k| lookup(document, &k.field).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }
}

/// `{a: 1, b: -1}` → `a_1_b_-1`
pub fn default_index_name(keys: &[IndexKey]) -> String {
    keys.iter()
        .map(|k| format!("{}_{}", k.field, k.order.as_i64()))
        .collect::<Vec<_>>()
        .join("_")
}

/// Resolve a dotted path (`address.city`) inside a document
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Exact-match filter: every filter field must equal the document's value
pub fn matches(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(path, expected)| lookup(document, path) == Some(expected))
}

/// A collection of documents plus its secondary indexes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    #[serde(default)]
    pub documents: Vec<Document>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an index; an identical existing index is a no-op
    pub fn create_index(
        &mut self,
        collection: &str,
        keys: &[IndexKey],
        options: &IndexOptions,
    ) -> Result<(), StoreError> {
        let spec = IndexSpec::new(keys, options)?;

        if let Some(existing) = self.indexes.iter().find(|i| i.name == spec.name || i.keys == spec.keys) {
            if *existing == spec {
                return Ok(());
            }
            return Err(StoreError::InvalidIndex(format!(
                "index '{}' on '{}' conflicts with existing index '{}'",
                spec.name, collection, existing.name
            )));
        }

        if spec.unique {
            let mut seen: Vec<Value> = Vec::with_capacity(self.documents.len());
            for doc in &self.documents {
                let key = spec.key_of(doc);
                if seen.contains(&key) {
                    return Err(StoreError::DuplicateKey {
                        collection: collection.to_string(),
                        index: spec.name.clone(),
                        key: key.to_string(),
                    });
                }
                seen.push(key);
            }
        }

        self.indexes.push(spec);
        Ok(())
    }

    /// Insert a document after checking `_id` and every unique index
    pub fn insert(&mut self, collection: &str, mut document: Document) -> Result<(), StoreError> {
        let id = document
            .entry(ID_FIELD)
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()))
            .clone();

        if self.documents.iter().any(|d| d.get(ID_FIELD) == Some(&id)) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                index: "_id_".to_string(),
                key: id.to_string(),
            });
        }

        for index in self.indexes.iter().filter(|i| i.unique) {
            let key = index.key_of(&document);
            if self.documents.iter().any(|d| index.key_of(d) == key) {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    index: index.name.clone(),
                    key: key.to_string(),
                });
            }
        }

        self.documents.push(document);
        Ok(())
    }

    /// Remove the first document matching `filter`
    pub fn delete_one(&mut self, filter: &Document) -> u64 {
        match self.documents.iter().position(|d| matches(d, filter)) {
            Some(pos) => {
                self.documents.remove(pos);
                1
            }
            None => 0,
        }
    }

    /// Documents matching `filter`
    pub fn find<'a>(&'a self, filter: &'a Document) -> impl Iterator<Item = &'a Document> + 'a {
        self.documents.iter().filter(move |d| matches(d, filter))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_default_index_name_composite() {
        let keys = vec![IndexKey::ascending("email"), IndexKey::descending("created_at")];
        assert_eq!(default_index_name(&keys), "email_1_created_at_-1");
    }

    #[test]
    fn test_lookup_dotted_path() {
        let d = doc(json!({"address": {"city": "Oslo"}}));
        assert_eq!(lookup(&d, "address.city"), Some(&json!("Oslo")));
        assert_eq!(lookup(&d, "address.zip"), None);
        assert_eq!(lookup(&d, "missing"), None);
    }

    #[test]
    fn test_insert_assigns_id() {
        let mut c = Collection::new();
        c.insert("users", doc(json!({"name": "ada"}))).unwrap();
        assert!(c.documents[0].get(ID_FIELD).is_some());
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let mut c = Collection::new();
        c.insert("users", doc(json!({"_id": 1}))).unwrap();
        let err = c.insert("users", doc(json!({"_id": 1}))).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { ref index, .. } if index == "_id_"));
    }

    #[test]
    fn test_unique_index_blocks_duplicate_insert() {
        let mut c = Collection::new();
        let options = doc(json!({"unique": true}));
        c.create_index("users", &[IndexKey::ascending("email")], &options).unwrap();
        c.insert("users", doc(json!({"email": "a@x.io"}))).unwrap();

        let err = c.insert("users", doc(json!({"email": "a@x.io"}))).unwrap_err();
        match err {
            StoreError::DuplicateKey { index, .. } => assert_eq!(index, "email_1"),
            other => panic!("Expected DuplicateKey, got {other:?}"),
        }
    }

    #[test]
    fn test_unique_index_over_existing_duplicates_fails() {
        let mut c = Collection::new();
        c.insert("users", doc(json!({"email": "a@x.io"}))).unwrap();
        c.insert("users", doc(json!({"email": "a@x.io"}))).unwrap();

        let options = doc(json!({"unique": true}));
        let result = c.create_index("users", &[IndexKey::ascending("email")], &options);
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
        assert!(c.indexes.is_empty());
    }

    #[test]
    fn test_identical_index_is_noop_and_conflicting_index_fails() {
        let mut c = Collection::new();
        let keys = [IndexKey::ascending("email")];
        c.create_index("users", &keys, &IndexOptions::new()).unwrap();
        c.create_index("users", &keys, &IndexOptions::new()).unwrap();
        assert_eq!(c.indexes.len(), 1);

        let unique = doc(json!({"unique": true}));
        assert!(matches!(
            c.create_index("users", &keys, &unique),
            Err(StoreError::InvalidIndex(_))
        ));
    }

    #[test]
    fn test_delete_one_exact_match_only_first() {
        let mut c = Collection::new();
        c.insert("tags", doc(json!({"tag": "a", "n": 1}))).unwrap();
        c.insert("tags", doc(json!({"tag": "a", "n": 2}))).unwrap();

        assert_eq!(c.delete_one(&doc(json!({"tag": "a"}))), 1);
        assert_eq!(c.len(), 1);
        assert_eq!(c.documents[0].get("n"), Some(&json!(2)));
        assert_eq!(c.delete_one(&doc(json!({"tag": "b"}))), 0);
    }
}
