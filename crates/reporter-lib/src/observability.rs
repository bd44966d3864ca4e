//! Observability infrastructure for the event reporter
//!
//! Provides:
//! - Prometheus metrics (notification throughput, suppression, enrichment latency)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::report::Report;

/// Histogram buckets for enrichment fetches (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ReporterMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct ReporterMetricsInner {
    notifications: IntCounterVec,
    notifications_skipped: IntCounter,
    notifications_dropped: IntCounter,
    terminations_deduplicated: IntCounter,
    reports: IntCounterVec,
    report_failures: IntCounter,
    enrichment_fallbacks: IntCounter,
    enrichment_latency_seconds: Histogram,
    namespace_policies: IntGauge,
    termination_cache_entries: IntGauge,
}

impl ReporterMetricsInner {
    fn new() -> Self {
        Self {
            notifications: register_int_counter_vec!(
                "event_reporter_notifications_total",
                "Notifications received from the watch layer",
                &["source"]
            )
            .expect("Failed to register notifications_total"),

            notifications_skipped: register_int_counter!(
                "event_reporter_notifications_skipped_total",
                "Events suppressed by skip rules"
            )
            .expect("Failed to register notifications_skipped_total"),

            notifications_dropped: register_int_counter!(
                "event_reporter_notifications_dropped_total",
                "Notifications dropped because their payload could not be used"
            )
            .expect("Failed to register notifications_dropped_total"),

            terminations_deduplicated: register_int_counter!(
                "event_reporter_terminations_deduplicated_total",
                "Container terminations suppressed as already reported"
            )
            .expect("Failed to register terminations_deduplicated_total"),

            reports: register_int_counter_vec!(
                "event_reporter_reports_total",
                "Reports handed to the sink",
                &["kind"]
            )
            .expect("Failed to register reports_total"),

            report_failures: register_int_counter!(
                "event_reporter_report_failures_total",
                "Reports the sink failed to deliver"
            )
            .expect("Failed to register report_failures_total"),

            enrichment_fallbacks: register_int_counter!(
                "event_reporter_enrichment_fallbacks_total",
                "Enrichment attempts that fell back to the default handler"
            )
            .expect("Failed to register enrichment_fallbacks_total"),

            enrichment_latency_seconds: register_histogram!(
                "event_reporter_enrichment_latency_seconds",
                "Time spent building kind-specific handlers",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register enrichment_latency_seconds"),

            namespace_policies: register_int_gauge!(
                "event_reporter_namespace_policies",
                "Namespaces carrying their own reporting policy"
            )
            .expect("Failed to register namespace_policies"),

            termination_cache_entries: register_int_gauge!(
                "event_reporter_termination_cache_entries",
                "Entries in the container termination cache"
            )
            .expect("Failed to register termination_cache_entries"),
        }
    }
}

/// Reporter metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ReporterMetrics {
    _private: (),
}

impl Default for ReporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ReporterMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ReporterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ReporterMetricsInner {
        GLOBAL_METRICS.get_or_init(ReporterMetricsInner::new)
    }

    pub fn inc_notifications(&self, source: &str) {
        self.inner().notifications.with_label_values(&[source]).inc();
    }

    pub fn inc_skipped(&self) {
        self.inner().notifications_skipped.inc();
    }

    pub fn inc_dropped(&self) {
        self.inner().notifications_dropped.inc();
    }

    pub fn inc_terminations_deduplicated(&self) {
        self.inner().terminations_deduplicated.inc();
    }

    pub fn inc_reports(&self, kind: &str) {
        self.inner().reports.with_label_values(&[kind]).inc();
    }

    pub fn inc_report_failures(&self) {
        self.inner().report_failures.inc();
    }

    pub fn inc_enrichment_fallbacks(&self) {
        self.inner().enrichment_fallbacks.inc();
    }

    pub fn observe_enrichment_latency(&self, duration_secs: f64) {
        self.inner().enrichment_latency_seconds.observe(duration_secs);
    }

    pub fn set_namespace_policies(&self, count: usize) {
        self.inner().namespace_policies.set(count as i64);
    }

    pub fn set_termination_cache_entries(&self, count: usize) {
        self.inner().termination_cache_entries.set(count as i64);
    }
}

/// Structured logger for reporter events
///
/// Emits `event = ...` tagged records so log pipelines can filter on them.
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn log_startup(&self, version: &str, namespaces: &[String]) {
        info!(
            event = "reporter_started",
            cluster = %self.cluster,
            version = %version,
            namespaces = ?namespaces,
            "Event reporter started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "reporter_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Event reporter shutting down"
        );
    }

    /// Log a report handed to the sink
    pub fn log_report(&self, report: &Report) {
        info!(
            event = "report_emitted",
            cluster = %self.cluster,
            kind = %report.kind,
            level = %report.level,
            environment = %report.environment,
            fingerprint = ?report.fingerprint,
            "{}",
            report.message
        );
    }

    pub fn log_skipped(&self, namespace: &str, kind: &str, level: &str, reason: &str) {
        debug!(
            event = "notification_skipped",
            cluster = %self.cluster,
            namespace = %namespace,
            kind = %kind,
            level = %level,
            reason = %reason,
            "Event suppressed by skip rules"
        );
    }

    pub fn log_namespace_policy(&self, namespace: &str, own_rules: bool, removed: bool) {
        info!(
            event = "namespace_policy",
            cluster = %self.cluster,
            namespace = %namespace,
            own_rules = own_rules,
            removed = removed,
            "Namespace reporting policy changed"
        );
    }

    pub fn log_delivery_failure(&self, report: &Report, error: &str) {
        warn!(
            event = "report_failed",
            cluster = %self.cluster,
            kind = %report.kind,
            error = %error,
            "Failed to deliver report: {}",
            report.message
        );
    }
}
