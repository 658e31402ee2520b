//! Command handlers
//!
//! Each handler writes its human-readable output to `out` so the binary can
//! print to stdout and tests can capture it.

use crate::error::CliError;
use docshift::migration::{
    MigrationDirection, MigrationError, MigrationFormat, MigrationOutcome, MigrationPlan,
    Migrator, ScaffoldGenerator,
};
use docshift::store::DocumentStore;
use std::io::Write;
use std::path::Path;

/// Attach the post-failure version record to an engine error
pub fn migration_failure(
    migrator: &Migrator,
    store: &dyn DocumentStore,
    source: MigrationError,
) -> CliError {
    let state = migrator.version(store).ok();
    let catalog = migrator.discover_migrations().ok();
    let mut rollback_applied = None;
    let last_applied = match &source {
        MigrationError::Execution { version, direction: MigrationDirection::Up, .. } => {
            catalog.and_then(|catalog| catalog.prev(*version))
        }
        MigrationError::Execution { version, direction: MigrationDirection::Down, .. } => {
            Some(*version)
        }
        // The record names the attempted target: an up of `v`, or a down from the
        // migration after `v`. Only a down can leave a dirty `none`.
        MigrationError::DirtyState { version: Some(v) } => match catalog {
            Some(catalog) => {
                rollback_applied = catalog.next(Some(*v));
                catalog.prev(*v)
            }
            None => Some(*v),
        },
        MigrationError::DirtyState { version: None } => {
            catalog.and_then(|catalog| catalog.next(None))
        }
        _ => state.and_then(|s| s.version),
    };
    CliError::Migration { source, state, last_applied, rollback_applied }
}

fn print_plan(out: &mut dyn Write, plan: &MigrationPlan) -> Result<(), CliError> {
    if plan.is_empty() {
        writeln!(out, "Nothing to do: database is at version {}", plan.from)?;
        return Ok(());
    }
    writeln!(out, "Would run {} migration(s):", plan.len())?;
    for step in &plan.steps {
        let arrow = match step.direction {
            MigrationDirection::Up => "↑",
            MigrationDirection::Down => "↓",
        };
        writeln!(
            out,
            "  {} {} {} ({})",
            arrow,
            step.version,
            step.name,
            step.file.filename()
        )?;
    }
    let target = plan.target().map_or_else(|| "none".to_string(), |v| v.to_string());
    writeln!(out, "Target version: {}", target)?;
    Ok(())
}

fn print_outcome(out: &mut dyn Write, outcome: &MigrationOutcome) -> Result<(), CliError> {
    match outcome {
        MigrationOutcome::NoChange { version } => {
            let version = version.map_or_else(|| "none".to_string(), |v| v.to_string());
            writeln!(out, "No change: database is at version {}", version)?;
        }
        MigrationOutcome::Migrated(report) => {
            for applied in &report.applied {
                writeln!(
                    out,
                    "Applied {} {} ({}) in {:.3}s",
                    applied.direction,
                    applied.version,
                    applied.name,
                    applied.duration.as_secs_f64()
                )?;
            }
            let to = report.to.map_or_else(|| "none".to_string(), |v| v.to_string());
            writeln!(out, "Now at version {}", to)?;
        }
    }
    Ok(())
}

pub fn handle_up(
    migrator: &Migrator,
    store: &dyn DocumentStore,
    steps: Option<usize>,
    dry_run: bool,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    if dry_run {
        let plan = migrator
            .plan_up(store, steps)
            .map_err(|e| migration_failure(migrator, store, e))?;
        return print_plan(out, &plan);
    }
    let outcome = migrator
        .up(store, steps)
        .map_err(|e| migration_failure(migrator, store, e))?;
    print_outcome(out, &outcome)
}

pub fn handle_down(
    migrator: &Migrator,
    store: &dyn DocumentStore,
    dry_run: bool,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    if dry_run {
        let plan = migrator
            .plan_down(store)
            .map_err(|e| migration_failure(migrator, store, e))?;
        return print_plan(out, &plan);
    }
    let outcome = migrator
        .down(store)
        .map_err(|e| migration_failure(migrator, store, e))?;
    print_outcome(out, &outcome)
}

pub fn handle_goto(
    migrator: &Migrator,
    store: &dyn DocumentStore,
    version: u64,
    dry_run: bool,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    if dry_run {
        let plan = migrator
            .plan_goto(store, version)
            .map_err(|e| migration_failure(migrator, store, e))?;
        return print_plan(out, &plan);
    }
    let outcome = migrator
        .goto(store, version)
        .map_err(|e| migration_failure(migrator, store, e))?;
    print_outcome(out, &outcome)
}

/// `-1` resets to "never migrated"; other negatives are rejected
pub fn handle_force(
    migrator: &Migrator,
    store: &dyn DocumentStore,
    version: i64,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let target = match version {
        -1 => None,
        v => Some(u64::try_from(v).map_err(|_| CliError::InvalidForceVersion(v))?),
    };

    let before = migrator
        .version(store)
        .map_err(|e| migration_failure(migrator, store, e))?;
    let after = migrator
        .force(store, target)
        .map_err(|e| migration_failure(migrator, store, e))?;

    writeln!(out, "Forced version from {} to {}", before, after)?;
    Ok(())
}

pub fn handle_create(
    migrations_dir: &Path,
    name: &str,
    format: MigrationFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let paths = ScaffoldGenerator::new(migrations_dir)
        .create(name, format)
        .map_err(|source| CliError::Migration {
            source,
            state: None,
            last_applied: None,
            rollback_applied: None,
        })?;

    let cwd = std::env::current_dir().unwrap_or_default();
    let display = |p: &Path| {
        pathdiff::diff_paths(p, &cwd)
            .unwrap_or_else(|| p.to_path_buf())
            .display()
            .to_string()
    };

    writeln!(out, "Created {} migration files:", format)?;
    writeln!(out, "  {}", display(&paths.up_path))?;
    writeln!(out, "  {}", display(&paths.down_path))?;
    Ok(())
}

/// Bare version, ` (dirty)` suffix when dirty, `none` if never migrated
pub fn handle_version(
    migrator: &Migrator,
    store: &dyn DocumentStore,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let state = migrator
        .version(store)
        .map_err(|e| migration_failure(migrator, store, e))?;
    writeln!(out, "{}", state)?;
    Ok(())
}

pub fn handle_status(
    migrator: &Migrator,
    store: &dyn DocumentStore,
    verbose: bool,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let status = migrator
        .status(store)
        .map_err(|e| migration_failure(migrator, store, e))?;

    match status.state.version {
        None if !status.state.dirty => writeln!(out, "No migrations have been applied yet")?,
        version => {
            let version = version.map_or_else(|| "none".to_string(), |v| v.to_string());
            writeln!(out, "Current migration version: {}", version)?;
        }
    }
    if status.state.dirty {
        writeln!(out, "Database is in dirty state (migration failed)")?;
    } else {
        writeln!(out, "Database is clean")?;
    }
    writeln!(
        out,
        "Applied: {}  Pending: {}  Total: {}",
        status.applied_count, status.pending_count, status.total
    )?;

    if verbose {
        for (entries, label) in [(&status.applied, "applied"), (&status.pending, "pending")] {
            for entry in entries {
                let checksum = entry
                    .up
                    .as_ref()
                    .map_or("-", |f| &f.checksum[..12.min(f.checksum.len())]);
                writeln!(
                    out,
                    "  [{}] {} {}  up:{}  down:{}",
                    label,
                    entry.version,
                    entry.name,
                    checksum,
                    if entry.down.is_some() { "yes" } else { "missing" }
                )?;
            }
        }
    }
    Ok(())
}

pub fn handle_info(
    migrator: &Migrator,
    store: &dyn DocumentStore,
    version: Option<u64>,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let status = migrator
        .status(store)
        .map_err(|e| migration_failure(migrator, store, e))?;

    if let Some(version) = version {
        let (entry, applied) = match status.applied.iter().find(|e| e.version == version) {
            Some(entry) => (entry, true),
            None => (
                status
                    .pending
                    .iter()
                    .find(|e| e.version == version)
                    .ok_or(CliError::UnknownMigration(version))?,
                false,
            ),
        };

        writeln!(out, "Migration Information")?;
        writeln!(out, "Version: {}", entry.version)?;
        writeln!(out, "Name: {}", entry.name)?;
        writeln!(out, "Status: {}", if applied { "Applied" } else { "Pending" })?;
        for file in [entry.up.as_ref(), entry.down.as_ref()].into_iter().flatten() {
            writeln!(
                out,
                "{} file: {} ({}, checksum {})",
                file.direction,
                file.path.display(),
                file.format,
                file.checksum
            )?;
        }
    } else {
        writeln!(out, "Migration System Information")?;
        writeln!(out, "Migrations directory: {}", migrator.migrations_dir().display())?;
        writeln!(out, "Version record: {}", status.state)?;
        writeln!(out, "Total Migrations: {}", status.total)?;
        writeln!(out, "Applied: {}", status.applied_count)?;
        writeln!(out, "Pending: {}", status.pending_count)?;

        if let Some(latest) = status.latest_applied_version() {
            writeln!(out, "Latest Applied Version: {}", latest)?;
        }
        if let Some(next) = status.next_pending_version() {
            writeln!(out, "Next Pending Version: {}", next)?;
        }
    }
    Ok(())
}
