//! Executes one migration body against a store

use crate::migration::{
    DeclarativeMigration, ExecutionCause, ExecutionError, MigrationFile, MigrationFormat,
    OperationStep,
};
use crate::store::{DocumentStore, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag used to stop a run between steps
///
/// Cancelling never interrupts a store call that is already running; it
/// stops the next step from starting. The interrupted migration stays dirty.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Limits applied while one migration body runs
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    deadline: Option<(Instant, Duration)>,
    cancel: Option<CancellationToken>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any step that would start after `limit` has elapsed from now
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.deadline = Some((Instant::now() + limit, limit));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Checked before each step
    fn check(&self) -> Result<(), ExecutionCause> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(ExecutionCause::Cancelled);
        }
        if let Some((deadline, limit)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ExecutionCause::TimedOut(limit));
            }
        }
        Ok(())
    }
}

/// Runs migration bodies through the store's primitives
///
/// Steps are applied one after another with no surrounding transaction:
/// when step *k* fails, steps `1..k` stay applied.
pub struct OperationInterpreter<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> OperationInterpreter<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    /// Apply a migration file; returns the number of steps executed
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError` carrying the 1-based index of the first
    /// failing step. Nothing after that step runs.
    pub fn apply(
        &self,
        migration: &MigrationFile,
        ctx: &ExecutionContext,
    ) -> Result<usize, ExecutionError> {
        match migration.format {
            MigrationFormat::Script => {
                ctx.check().map_err(|cause| ExecutionError { step_index: 1, cause })?;
                self.store
                    .execute_script(&migration.body)
                    .map_err(|e| ExecutionError {
                        step_index: 1,
                        cause: ExecutionCause::Store(e),
                    })?;
                Ok(1)
            }
            MigrationFormat::Declarative => {
                let parsed = DeclarativeMigration::parse(&migration.body).map_err(|e| {
                    ExecutionError {
                        step_index: 0,
                        cause: ExecutionCause::InvalidBody(e),
                    }
                })?;
                self.run_steps(&parsed.operations, ctx)
            }
        }
    }

    /// Run declarative steps in order, stopping at the first failure
    pub fn run_steps(
        &self,
        steps: &[OperationStep],
        ctx: &ExecutionContext,
    ) -> Result<usize, ExecutionError> {
        for (i, step) in steps.iter().enumerate() {
            let step_index = i + 1;
            ctx.check().map_err(|cause| ExecutionError { step_index, cause })?;

            log::debug!("  step {}: {}", step_index, step);
            self.apply_step(step).map_err(|e| ExecutionError {
                step_index,
                cause: ExecutionCause::Store(e),
            })?;
        }
        Ok(steps.len())
    }

    /// Map one step onto its store primitive
    pub fn apply_step(&self, step: &OperationStep) -> Result<(), StoreError> {
        match step {
            OperationStep::Comment(_) => Ok(()),
            OperationStep::CreateCollection(name) => self.store.create_collection(name),
            OperationStep::DropCollection(name) => self.store.drop_collection(name),
            OperationStep::CreateIndex(create) => {
                let keys = create.keys().map_err(StoreError::InvalidIndex)?;
                self.store.create_index(&create.collection, &keys, &create.options)
            }
            OperationStep::InsertOne(insert) => {
                self.store.insert_one(&insert.collection, insert.document.clone())
            }
            OperationStep::DeleteOne(delete) => {
                self.store.delete_one(&delete.collection, &delete.filter).map(|_| ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{MigrationDirection, calculate_checksum};
    use crate::store::MemoryStore;
    use std::path::PathBuf;

    fn migration(format: MigrationFormat, body: &str) -> MigrationFile {
        MigrationFile {
            path: PathBuf::from("1_test.up.json"),
            version: 1,
            name: "test".to_string(),
            direction: MigrationDirection::Up,
            format,
            body: body.to_string(),
            checksum: calculate_checksum(body),
        }
    }

    #[test]
    fn test_declarative_failure_keeps_earlier_steps() {
        let store = MemoryStore::new();
        let body = r#"{"operations": [
            {"createCollection": "users"},
            {"insertOne": {"collection": "users", "document": {"_id": 1}}},
            {"createCollection": "users"},
            {"insertOne": {"collection": "users", "document": {"_id": 2}}}
        ]}"#;

        let err = OperationInterpreter::new(&store)
            .apply(&migration(MigrationFormat::Declarative, body), &ExecutionContext::new())
            .unwrap_err();

        assert_eq!(err.step_index, 3);
        assert!(matches!(err.cause, ExecutionCause::Store(StoreError::NamespaceExists(_))));
        let users = store.collection("users").unwrap();
        assert_eq!(users.len(), 1, "step 2 stays applied, step 4 never runs");
    }

    #[test]
    fn test_comment_is_noop() {
        let store = MemoryStore::new();
        let steps = [OperationStep::Comment("nothing".to_string())];
        let applied = OperationInterpreter::new(&store)
            .run_steps(&steps, &ExecutionContext::new())
            .unwrap();
        assert_eq!(applied, 1);
        assert_eq!(store.mutation_count(), 0);
    }

    #[test]
    fn test_script_body_passed_verbatim() {
        let store = MemoryStore::new();
        let body = "db.users.createIndex({ email: 1 });\n";
        OperationInterpreter::new(&store)
            .apply(&migration(MigrationFormat::Script, body), &ExecutionContext::new())
            .unwrap();
        assert_eq!(store.mutation_count(), 1);
    }

    #[test]
    fn test_cancelled_context_stops_before_first_step() {
        let store = MemoryStore::new();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ExecutionContext::new().with_cancellation(token);

        let err = OperationInterpreter::new(&store)
            .run_steps(&[OperationStep::CreateCollection("a".to_string())], &ctx)
            .unwrap_err();
        assert_eq!(err.step_index, 1);
        assert!(matches!(err.cause, ExecutionCause::Cancelled));
        assert!(store.collection_names().is_empty());
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let store = MemoryStore::new();
        let ctx = ExecutionContext::new().with_timeout(Duration::ZERO);
        let err = OperationInterpreter::new(&store)
            .run_steps(&[OperationStep::CreateCollection("a".to_string())], &ctx)
            .unwrap_err();
        assert!(matches!(err.cause, ExecutionCause::TimedOut(_)));
    }

    #[test]
    fn test_invalid_declarative_body() {
        let store = MemoryStore::new();
        let err = OperationInterpreter::new(&store)
            .apply(&migration(MigrationFormat::Declarative, "{"), &ExecutionContext::new())
            .unwrap_err();
        assert_eq!(err.step_index, 0);
        assert!(matches!(err.cause, ExecutionCause::InvalidBody(_)));
    }
}
