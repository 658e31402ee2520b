//! Declarative migration format
//!
//! ```json
//! {
//!   "operations": [
//!     { "comment": "Up migration for add_users" },
//!     { "createCollection": "users" },
//!     { "createIndex": { "collection": "users", "index": { "email": 1 }, "options": { "unique": true } } },
//!     { "insertOne": { "collection": "users", "document": { "email": "root@example.com" } } }
//!   ]
//! }
//! ```

use crate::store::{Document, IndexKey, IndexOptions, IndexOrder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Parsed body of a declarative migration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeclarativeMigration {
    pub operations: Vec<OperationStep>,
}

impl DeclarativeMigration {
    /// Parse and validate a declarative body
    ///
    /// Index key specs are checked here so a bad file is rejected before
    /// anything touches the store.
    pub fn parse(body: &str) -> Result<Self, String> {
        let migration: Self = serde_json::from_str(body).map_err(|e| e.to_string())?;
        for (i, step) in migration.operations.iter().enumerate() {
            if let OperationStep::CreateIndex(create) = step {
                create.keys().map_err(|e| format!("operation {}: {}", i + 1, e))?;
            }
        }
        Ok(migration)
    }

    /// Pretty JSON, as written by the scaffold generator
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// One step of a declarative migration
///
/// Each variant maps to exactly one store primitive, except `Comment`
/// which does nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationStep {
    Comment(String),
    CreateCollection(String),
    DropCollection(String),
    CreateIndex(CreateIndex),
    InsertOne(InsertOne),
    DeleteOne(DeleteOne),
}

impl OperationStep {
    /// Operation name as written in the file
    pub fn op_name(&self) -> &'static str {
        match self {
            OperationStep::Comment(_) => "comment",
            OperationStep::CreateCollection(_) => "createCollection",
            OperationStep::DropCollection(_) => "dropCollection",
            OperationStep::CreateIndex(_) => "createIndex",
            OperationStep::InsertOne(_) => "insertOne",
            OperationStep::DeleteOne(_) => "deleteOne",
        }
    }
}

impl fmt::Display for OperationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStep::Comment(text) => write!(f, "comment: {text}"),
            OperationStep::CreateCollection(name) => write!(f, "createCollection {name}"),
            OperationStep::DropCollection(name) => write!(f, "dropCollection {name}"),
            OperationStep::CreateIndex(c) => {
                write!(f, "createIndex {} {}", c.collection, Value::Object(c.index.clone()))
            }
            OperationStep::InsertOne(i) => write!(f, "insertOne {}", i.collection),
            OperationStep::DeleteOne(d) => {
                write!(f, "deleteOne {} {}", d.collection, Value::Object(d.filter.clone()))
            }
        }
    }
}

/// `createIndex` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateIndex {
    pub collection: String,
    /// Ordered `{field: 1 | -1}` map; order defines the composite key
    pub index: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: IndexOptions,
}

impl CreateIndex {
    /// Index keys in declaration order
    pub fn keys(&self) -> Result<Vec<IndexKey>, String> {
        if self.index.is_empty() {
            return Err(format!("createIndex on '{}' has no keys", self.collection));
        }
        self.index
            .iter()
            .map(|(field, order)| {
                let order = match order.as_i64() {
                    Some(1) => IndexOrder::Ascending,
                    Some(-1) => IndexOrder::Descending,
                    _ => {
                        return Err(format!(
                            "index key '{field}' must be 1 or -1, got {order}"
                        ))
                    }
                };
                Ok(IndexKey::new(field.clone(), order))
            })
            .collect()
    }
}

/// `insertOne` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InsertOne {
    pub collection: String,
    pub document: Document,
}

/// `deleteOne` parameters; `filter` is matched by equality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteOne {
    pub collection: String,
    pub filter: Document,
}
