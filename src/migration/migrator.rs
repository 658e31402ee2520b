//! Migrator - Core migration execution engine

use crate::migration::{
    discover_migrations, CancellationToken, DeclarativeMigration, ExecutionContext,
    MigrationCatalog, MigrationDirection, MigrationError, MigrationFile, MigrationFormat,
    MigrationStatus, OperationInterpreter, SourceError, VersionState, VersionStore,
};
use crate::store::DocumentStore;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Limits applied to every migration the engine runs
#[derive(Debug, Clone, Default)]
pub struct MigratorOptions {
    /// Deadline for a single migration body, checked between steps
    pub step_timeout: Option<Duration>,
    /// Stops the run before the next step once cancelled
    pub cancel: Option<CancellationToken>,
}

/// One migration the engine intends to run
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub version: u64,
    pub name: String,
    pub direction: MigrationDirection,
    /// Version recorded once this step has completed
    pub to: Option<u64>,
    pub file: MigrationFile,
}

/// Ordered, fully validated path from the current state to a target
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// State read when the plan was built; the first claim is made against it
    pub from: VersionState,
    pub steps: Vec<PlannedStep>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Version the store will be at once every step has run
    pub fn target(&self) -> Option<u64> {
        self.steps.last().map_or(self.from.version, |s| s.to)
    }
}

/// A migration that ran to completion
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub version: u64,
    pub name: String,
    pub direction: MigrationDirection,
    /// Number of steps executed (1 for scripts)
    pub steps: usize,
    pub duration: Duration,
}

/// Summary of a run that changed the version
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub from: Option<u64>,
    pub to: Option<u64>,
    pub applied: Vec<AppliedMigration>,
}

/// Result of `up`, `down` and `goto`
#[derive(Debug, Clone)]
pub enum MigrationOutcome {
    /// Already at the requested version; nothing was touched
    NoChange { version: Option<u64> },
    Migrated(MigrationReport),
}

impl MigrationOutcome {
    /// Version the store is at after the run
    pub fn version(&self) -> Option<u64> {
        match self {
            MigrationOutcome::NoChange { version } => *version,
            MigrationOutcome::Migrated(report) => report.to,
        }
    }

    pub fn applied_count(&self) -> usize {
        match self {
            MigrationOutcome::NoChange { .. } => 0,
            MigrationOutcome::Migrated(report) => report.applied.len(),
        }
    }
}

/// Core migration execution engine
///
/// The `Migrator` plans a path through the migration catalog, then walks it
/// one migration at a time. Each migration is claimed in the version record
/// (`dirty = true`) before its body runs and released (`dirty = false`)
/// afterwards, both through compare-and-set. A failure leaves the record
/// dirty at the attempted version until an operator runs [`Migrator::force`].
pub struct Migrator {
    migrations_dir: PathBuf,
    options: MigratorOptions,
}

impl Migrator {
    /// Create a new Migrator with the specified migrations directory
    pub fn new(migrations_dir: impl AsRef<Path>) -> Self {
        Self {
            migrations_dir: migrations_dir.as_ref().to_path_buf(),
            options: MigratorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MigratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Discover all migration files in the migrations directory
    pub fn discover_migrations(&self) -> Result<MigrationCatalog, MigrationError> {
        discover_migrations(&self.migrations_dir)
    }

    /// Current version record
    pub fn version(&self, store: &dyn DocumentStore) -> Result<VersionState, MigrationError> {
        VersionStore::new(store).read()
    }

    /// Get migration status (applied vs pending relative to the current version)
    pub fn status(&self, store: &dyn DocumentStore) -> Result<MigrationStatus, MigrationError> {
        let state = self.version(store)?;
        let catalog = self.discover_migrations()?;

        let (applied, pending): (Vec<_>, Vec<_>) = catalog
            .entries()
            .cloned()
            .partition(|entry| state.version.is_some_and(|v| entry.version <= v));

        Ok(MigrationStatus::new(state, applied, pending))
    }

    /// Plan the up migrations after the current version
    ///
    /// `steps` limits how many are taken; `None` means all pending.
    pub fn plan_up(
        &self,
        store: &dyn DocumentStore,
        steps: Option<usize>,
    ) -> Result<MigrationPlan, MigrationError> {
        let from = self.clean_state(store)?;
        let catalog = self.discover_migrations()?;

        let pending = catalog
            .versions()
            .filter(|v| from.version.map_or(true, |current| *v > current))
            .take(steps.unwrap_or(usize::MAX));

        let mut planned = Vec::new();
        for version in pending {
            planned.push(planned_step(&catalog, version, MigrationDirection::Up, Some(version))?);
        }

        Ok(MigrationPlan { from, steps: planned })
    }

    /// Plan the single down migration of the current version
    pub fn plan_down(&self, store: &dyn DocumentStore) -> Result<MigrationPlan, MigrationError> {
        let from = self.clean_state(store)?;
        let current = from.version.ok_or(MigrationError::NilVersion)?;
        let catalog = self.discover_migrations()?;

        if !catalog.contains(current) {
            return Err(SourceError::UnknownVersion(current).into());
        }
        let step = planned_step(&catalog, current, MigrationDirection::Down, catalog.prev(current))?;

        Ok(MigrationPlan { from, steps: vec![step] })
    }

    /// Plan the path from the current version to `target`
    ///
    /// `target` must be a version present in the catalog.
    pub fn plan_goto(
        &self,
        store: &dyn DocumentStore,
        target: u64,
    ) -> Result<MigrationPlan, MigrationError> {
        let from = self.clean_state(store)?;
        let catalog = self.discover_migrations()?;

        if !catalog.contains(target) {
            return Err(SourceError::UnknownVersion(target).into());
        }

        let mut planned = Vec::new();
        match from.version {
            Some(current) if current == target => {}
            Some(current) if current > target => {
                if !catalog.contains(current) {
                    return Err(SourceError::UnknownVersion(current).into());
                }
                let versions: Vec<u64> = catalog
                    .versions()
                    .rev()
                    .filter(|v| *v > target && *v <= current)
                    .collect();
                for version in versions {
                    let to = catalog.prev(version);
                    planned.push(planned_step(&catalog, version, MigrationDirection::Down, to)?);
                }
            }
            current => {
                let versions: Vec<u64> = catalog
                    .versions()
                    .filter(|v| current.map_or(true, |c| *v > c) && *v <= target)
                    .collect();
                for version in versions {
                    planned.push(planned_step(
                        &catalog,
                        version,
                        MigrationDirection::Up,
                        Some(version),
                    )?);
                }
            }
        }

        Ok(MigrationPlan { from, steps: planned })
    }

    /// Apply pending migrations
    ///
    /// Returns `NoChange` when nothing is pending.
    ///
    /// # Errors
    ///
    /// - `DirtyState` if a previous run did not complete
    /// - `Source` if a needed file is missing or invalid (nothing is touched)
    /// - `Conflict` if another process claimed the version record first
    /// - `Execution` if a migration body fails (the record is left dirty)
    pub fn up(
        &self,
        store: &dyn DocumentStore,
        steps: Option<usize>,
    ) -> Result<MigrationOutcome, MigrationError> {
        let plan = self.plan_up(store, steps)?;
        self.execute(store, &plan)
    }

    /// Roll back the current version to its predecessor in the catalog
    pub fn down(&self, store: &dyn DocumentStore) -> Result<MigrationOutcome, MigrationError> {
        let plan = self.plan_down(store)?;
        self.execute(store, &plan)
    }

    /// Migrate up or down until the version equals `target`
    pub fn goto(
        &self,
        store: &dyn DocumentStore,
        target: u64,
    ) -> Result<MigrationOutcome, MigrationError> {
        let plan = self.plan_goto(store, target)?;
        self.execute(store, &plan)
    }

    /// Overwrite the version record without running any migration
    ///
    /// `None` resets the record to "never migrated". Valid from any state,
    /// dirty included.
    pub fn force(
        &self,
        store: &dyn DocumentStore,
        target: Option<u64>,
    ) -> Result<VersionState, MigrationError> {
        let versions = VersionStore::new(store);
        let current = versions.read()?;
        let next = VersionState { version: target, dirty: false };

        versions.compare_and_set(current, next)?;

        if current.dirty {
            log::warn!("Cleared dirty state at {}; version forced to {}", current, next);
        } else {
            log::info!("Version forced from {} to {}", current, next);
        }
        Ok(next)
    }

    /// Run a plan built by one of the `plan_*` methods
    pub fn execute(
        &self,
        store: &dyn DocumentStore,
        plan: &MigrationPlan,
    ) -> Result<MigrationOutcome, MigrationError> {
        if plan.is_empty() {
            log::debug!("No migrations to run; version is {}", plan.from);
            return Ok(MigrationOutcome::NoChange { version: plan.from.version });
        }

        let versions = VersionStore::new(store);
        let interpreter = OperationInterpreter::new(store);
        let mut state = plan.from;
        let mut applied = Vec::with_capacity(plan.len());

        for step in &plan.steps {
            #[cfg(feature = "tracing")]
            let _span = tracing::info_span!(
                "migration",
                version = step.version,
                name = %step.name,
                direction = %step.direction
            )
            .entered();

            let claimed = VersionState::dirty(step.to);
            versions.compare_and_set(state, claimed)?;
            state = claimed;

            log::info!(
                "Applying {} migration {} ({})",
                step.direction,
                step.version,
                step.name
            );

            let start = Instant::now();
            let executed = match interpreter.apply(&step.file, &self.context()) {
                Ok(executed) => executed,
                Err(e) => {
                    log::warn!(
                        "Migration {} ({}) failed at step {}; version record left dirty at {}",
                        step.version,
                        step.name,
                        e.step_index,
                        claimed
                    );
                    #[cfg(feature = "metrics")]
                    METRICS.record_failure(step.direction);

                    return Err(MigrationError::Execution {
                        version: step.version,
                        name: step.name.clone(),
                        direction: step.direction,
                        step_index: e.step_index,
                        cause: e.cause,
                    });
                }
            };
            let duration = start.elapsed();

            let released = VersionState { version: step.to, dirty: false };
            versions.compare_and_set(claimed, released)?;
            state = released;

            #[cfg(feature = "metrics")]
            METRICS.record_applied(step.direction, duration);

            log::info!(
                "Applied {} migration {} ({}) in {:.3}s",
                step.direction,
                step.version,
                step.name,
                duration.as_secs_f64()
            );

            applied.push(AppliedMigration {
                version: step.version,
                name: step.name.clone(),
                direction: step.direction,
                steps: executed,
                duration,
            });
        }

        Ok(MigrationOutcome::Migrated(MigrationReport {
            from: plan.from.version,
            to: state.version,
            applied,
        }))
    }

    /// Current state, refusing to plan anything while it is dirty
    fn clean_state(&self, store: &dyn DocumentStore) -> Result<VersionState, MigrationError> {
        let state = self.version(store)?;
        if state.dirty {
            return Err(MigrationError::DirtyState { version: state.version });
        }
        Ok(state)
    }

    fn context(&self) -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        if let Some(limit) = self.options.step_timeout {
            ctx = ctx.with_timeout(limit);
        }
        if let Some(token) = &self.options.cancel {
            ctx = ctx.with_cancellation(token.clone());
        }
        ctx
    }
}

/// Look up and validate the file for one step
fn planned_step(
    catalog: &MigrationCatalog,
    version: u64,
    direction: MigrationDirection,
    to: Option<u64>,
) -> Result<PlannedStep, MigrationError> {
    let file = catalog
        .file(version, direction)
        .ok_or(SourceError::MissingFile { version, direction })?;

    if file.format == MigrationFormat::Declarative {
        DeclarativeMigration::parse(&file.body).map_err(|reason| SourceError::InvalidBody {
            path: file.path.clone(),
            reason,
        })?;
    }

    Ok(PlannedStep {
        version,
        name: file.name.clone(),
        direction,
        to,
        file: file.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::ConflictError;
    use crate::store::MemoryStore;
    use std::fs;
    use tempfile::TempDir;

    const EMPTY: &str = r#"{"operations": []}"#;

    fn create(name: &str) -> String {
        format!(r#"{{"operations": [{{"createCollection": "{name}"}}]}}"#)
    }

    fn drop_body(name: &str) -> String {
        format!(r#"{{"operations": [{{"dropCollection": "{name}"}}]}}"#)
    }

    fn dir_with(files: &[(&str, String)]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for (name, body) in files {
            fs::write(temp.path().join(name), body).unwrap();
        }
        temp
    }

    fn three_migrations() -> TempDir {
        dir_with(&[
            ("1_a.up.json", create("a")),
            ("1_a.down.json", drop_body("a")),
            ("2_b.up.json", create("b")),
            ("2_b.down.json", drop_body("b")),
            ("3_c.up.json", create("c")),
            ("3_c.down.json", drop_body("c")),
        ])
    }

    #[test]
    fn test_up_applies_all_then_no_change() {
        let temp = three_migrations();
        let store = MemoryStore::new();
        let migrator = Migrator::new(temp.path());

        let outcome = migrator.up(&store, None).unwrap();
        assert_eq!(outcome.applied_count(), 3);
        assert_eq!(migrator.version(&store).unwrap(), VersionState::clean(3));
        assert_eq!(store.collection_names(), vec!["a", "b", "c"]);

        let again = migrator.up(&store, None).unwrap();
        assert!(matches!(again, MigrationOutcome::NoChange { version: Some(3) }));
    }

    #[test]
    fn test_up_with_step_limit() {
        let temp = three_migrations();
        let store = MemoryStore::new();
        let migrator = Migrator::new(temp.path());

        migrator.up(&store, Some(2)).unwrap();
        assert_eq!(migrator.version(&store).unwrap(), VersionState::clean(2));
    }

    #[test]
    fn test_down_moves_to_predecessor_then_none() {
        let temp = three_migrations();
        let store = MemoryStore::new();
        let migrator = Migrator::new(temp.path());
        migrator.up(&store, Some(2)).unwrap();

        migrator.down(&store).unwrap();
        assert_eq!(migrator.version(&store).unwrap(), VersionState::clean(1));
        migrator.down(&store).unwrap();
        assert_eq!(migrator.version(&store).unwrap(), VersionState::initial());
        assert!(store.collection_names().is_empty());

        assert!(matches!(migrator.down(&store), Err(MigrationError::NilVersion)));
    }

    #[test]
    fn test_goto_both_directions() {
        let temp = three_migrations();
        let store = MemoryStore::new();
        let migrator = Migrator::new(temp.path());

        let outcome = migrator.goto(&store, 3).unwrap();
        assert_eq!(outcome.version(), Some(3));

        let plan = migrator.plan_goto(&store, 1).unwrap();
        let order: Vec<_> = plan.steps.iter().map(|s| (s.version, s.to)).collect();
        assert_eq!(order, vec![(3, Some(2)), (2, Some(1))]);

        migrator.execute(&store, &plan).unwrap();
        assert_eq!(migrator.version(&store).unwrap(), VersionState::clean(1));
        assert_eq!(store.collection_names(), vec!["a"]);

        assert!(matches!(
            migrator.goto(&store, 1).unwrap(),
            MigrationOutcome::NoChange { version: Some(1) }
        ));
    }

    #[test]
    fn test_goto_unknown_target_touches_nothing() {
        let temp = three_migrations();
        let store = MemoryStore::new();
        let migrator = Migrator::new(temp.path());
        migrator.up(&store, Some(1)).unwrap();
        let before = store.mutation_count();

        let err = migrator.goto(&store, 7).unwrap_err();
        assert!(matches!(err, MigrationError::Source(SourceError::UnknownVersion(7))));
        assert_eq!(store.mutation_count(), before);
        assert_eq!(migrator.version(&store).unwrap(), VersionState::clean(1));
    }

    #[test]
    fn test_failure_leaves_dirty_and_blocks_until_forced() {
        let temp = dir_with(&[
            ("1_a.up.json", create("a")),
            ("2_dup.up.json", create("a")),
            ("3_c.up.json", create("c")),
        ]);
        let store = MemoryStore::new();
        let migrator = Migrator::new(temp.path());

        let err = migrator.up(&store, None).unwrap_err();
        match &err {
            MigrationError::Execution { version, step_index, .. } => {
                assert_eq!(*version, 2);
                assert_eq!(*step_index, 1);
            }
            other => panic!("Expected Execution, got {other:?}"),
        }
        assert!(err.requires_force());
        assert_eq!(migrator.version(&store).unwrap(), VersionState::dirty(Some(2)));
        assert!(store.collection("c").is_none());

        assert!(matches!(
            migrator.up(&store, None),
            Err(MigrationError::DirtyState { version: Some(2) })
        ));

        let before = store.mutation_count();
        migrator.force(&store, Some(1)).unwrap();
        assert_eq!(store.mutation_count(), before);
        assert_eq!(migrator.version(&store).unwrap(), VersionState::clean(1));
    }

    #[test]
    fn test_missing_down_file_is_source_error() {
        let temp = dir_with(&[("1_a.up.json", create("a"))]);
        let store = MemoryStore::new();
        let migrator = Migrator::new(temp.path());
        migrator.up(&store, None).unwrap();

        let err = migrator.down(&store).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Source(SourceError::MissingFile { version: 1, .. })
        ));
        assert_eq!(migrator.version(&store).unwrap(), VersionState::clean(1));
    }

    #[test]
    fn test_invalid_body_rejected_before_any_mutation() {
        let temp = dir_with(&[("1_a.up.json", create("a")), ("2_b.up.json", "{ not json".to_string())]);
        let store = MemoryStore::new();
        let migrator = Migrator::new(temp.path());

        let err = migrator.up(&store, None).unwrap_err();
        assert!(matches!(err, MigrationError::Source(SourceError::InvalidBody { .. })));
        assert_eq!(store.mutation_count(), 0);
        assert_eq!(migrator.version(&store).unwrap(), VersionState::initial());
    }

    #[test]
    fn test_force_none_resets() {
        let temp = dir_with(&[("1_a.up.json", EMPTY.to_string())]);
        let store = MemoryStore::new();
        let migrator = Migrator::new(temp.path());
        migrator.up(&store, None).unwrap();

        migrator.force(&store, None).unwrap();
        assert!(migrator.version(&store).unwrap().is_never_migrated());
    }

    #[test]
    fn test_stale_plan_loses_claim() {
        let temp = three_migrations();
        let store = MemoryStore::new();
        let migrator = Migrator::new(temp.path());

        let stale = migrator.plan_up(&store, None).unwrap();
        migrator.up(&store, Some(1)).unwrap();
        let before = store.mutation_count();

        let err = migrator.execute(&store, &stale).unwrap_err();
        assert!(matches!(err, MigrationError::Conflict(ConflictError::ConcurrentWriter { .. })));
        assert_eq!(store.mutation_count(), before);
    }

    #[test]
    fn test_cancelled_run_is_dirty() {
        let temp = three_migrations();
        let store = MemoryStore::new();
        let token = CancellationToken::new();
        token.cancel();
        let migrator = Migrator::new(temp.path()).with_options(MigratorOptions {
            step_timeout: None,
            cancel: Some(token),
        });

        assert!(matches!(migrator.up(&store, None), Err(MigrationError::Execution { .. })));
        assert_eq!(migrator.version(&store).unwrap(), VersionState::dirty(Some(1)));
    }

    #[test]
    fn test_status_splits_applied_and_pending() {
        let temp = three_migrations();
        let store = MemoryStore::new();
        let migrator = Migrator::new(temp.path());
        migrator.up(&store, Some(1)).unwrap();

        let status = migrator.status(&store).unwrap();
        assert_eq!(status.applied_count, 1);
        assert_eq!(status.pending_count, 2);
        assert_eq!(status.next_pending_version(), Some(2));
        assert!(!status.is_up_to_date());
    }
}
