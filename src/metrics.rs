use crate::migration::MigrationDirection;
use once_cell::sync::Lazy;
use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
    KeyValue,
};
use std::time::Duration;

/// Instruments are registered against the global meter provider; install an
/// exporter in the host application to collect them.
pub static METRICS: Lazy<DocshiftMetrics> = Lazy::new(DocshiftMetrics::init);

pub struct DocshiftMetrics {
    pub migrations_applied: Counter<u64>,
    pub migration_failures: Counter<u64>,
    pub migration_duration: Histogram<f64>,
}

impl DocshiftMetrics {
    pub fn init() -> Self {
        let meter = global::meter("docshift");

        let migrations_applied = meter
            .u64_counter("docshift_migrations_applied_total")
            .with_description("Migrations applied to completion")
            .build();

        let migration_failures = meter
            .u64_counter("docshift_migration_failures_total")
            .with_description("Migrations that failed and left the version record dirty")
            .build();

        let migration_duration = meter
            .f64_histogram("docshift_migration_duration_seconds")
            .with_description("Duration of applied migrations")
            .build();

        Self {
            migrations_applied,
            migration_failures,
            migration_duration,
        }
    }

    pub fn record_applied(&self, direction: MigrationDirection, elapsed: Duration) {
        let attrs = [KeyValue::new("direction", direction.as_str())];
        self.migrations_applied.add(1, &attrs);
        self.migration_duration.record(elapsed.as_secs_f64(), &attrs);
    }

    pub fn record_failure(&self, direction: MigrationDirection) {
        self.migration_failures
            .add(1, &[KeyValue::new("direction", direction.as_str())]);
    }
}
