//! Notification pipeline
//!
//! Single entry point per notification type. Events go through
//! once-per-uid suppression, the skip rules, enrichment and assembly; pod updates go
//! through the termination tracker. Every produced report is handed to the
//! sink, and delivery failures are counted but never retried.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::enrich::HandlerRegistry;
use crate::health::{components, HealthRegistry};
use crate::models::{ContainerSnapshot, EventRecord, NamespaceSnapshot, Notification, PodSnapshot};
use crate::observability::{ReporterMetrics, StructuredLogger};
use crate::recency::{RecencyCache, TerminationKey, TerminationTracker, DEFAULT_TERMINATION_CAPACITY};
use crate::report::{assemble_event_report, assemble_termination_report, Report, ReportSettings};
use crate::sink::ReportSink;
use crate::skip::NamespaceRules;

#[cfg(test)]
mod tests;

/// Default number of remembered event revisions
pub const DEFAULT_EVENT_CACHE_CAPACITY: usize = 4096;

/// Cache sizing for the pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub termination_capacity: usize,
    /// Terminations older than this at observation time are not reported
    pub termination_max_age: Option<chrono::Duration>,
    pub event_cache_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            termination_capacity: DEFAULT_TERMINATION_CAPACITY,
            termination_max_age: None,
            event_cache_capacity: DEFAULT_EVENT_CACHE_CAPACITY,
        }
    }
}

pub struct ReportPipeline {
    settings: ReportSettings,
    rules: Arc<NamespaceRules>,
    terminations: TerminationTracker,
    seen_events: RecencyCache<String, ()>,
    handlers: HandlerRegistry,
    sink: Arc<dyn ReportSink>,
    health: Option<HealthRegistry>,
    metrics: ReporterMetrics,
    logger: StructuredLogger,
}

impl ReportPipeline {
    pub fn new(
        settings: ReportSettings,
        rules: Arc<NamespaceRules>,
        handlers: HandlerRegistry,
        sink: Arc<dyn ReportSink>,
        config: PipelineConfig,
    ) -> Self {
        let logger = StructuredLogger::new(settings.cluster.clone().unwrap_or_default());

        Self {
            settings,
            rules,
            terminations: TerminationTracker::new(config.termination_capacity)
                .with_max_age(config.termination_max_age),
            seen_events: RecencyCache::new(config.event_cache_capacity),
            handlers,
            sink,
            health: None,
            metrics: ReporterMetrics::new(),
            logger,
        }
    }

    /// Report sink outcomes to the health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn rules(&self) -> &NamespaceRules {
        &self.rules
    }

    pub fn tracked_terminations(&self) -> usize {
        self.terminations.len()
    }

    /// Dispatch one notification
    pub async fn process(&self, notification: &Notification, observed_at: DateTime<Utc>) -> Vec<Report> {
        match notification {
            Notification::Event(event) => self
                .handle_event(event, observed_at)
                .await
                .into_iter()
                .collect(),
            Notification::PodUpdate(pod) => self.handle_pod_update(pod, observed_at).await,
        }
    }

    /// Handle a newly added event; returns the report when one was produced
    pub async fn handle_event(&self, event: &EventRecord, observed_at: DateTime<Utc>) -> Option<Report> {
        self.metrics.inc_notifications("event");

        // Updates to a known event (count bumps, relists) are not new events
        if !self.seen_events.insert_if_absent(event.meta.uid.clone(), ()) {
            debug!(
                event_uid = %event.meta.uid,
                resource_version = %event.resource_version,
                "Event already processed"
            );
            return None;
        }

        if self.rules.should_skip(event) {
            self.metrics.inc_skipped();
            self.logger.log_skipped(
                event.namespace(),
                &event.involved_object.kind,
                &event.level,
                &event.reason,
            );
            return None;
        }

        let handler = self.handlers.resolve(event).await;
        let report = assemble_event_report(event, handler.as_ref(), &self.settings, observed_at);
        self.deliver(&report).await;
        Some(report)
    }

    /// Handle a pod state change; one report per new failed termination
    pub async fn handle_pod_update(&self, pod: &PodSnapshot, observed_at: DateTime<Utc>) -> Vec<Report> {
        self.metrics.inc_notifications("pod");

        if self.rules.ignores_pod_updates(&pod.meta.namespace) {
            debug!(
                namespace = %pod.meta.namespace,
                pod = %pod.meta.name,
                "Pod updates ignored for namespace"
            );
            return Vec::new();
        }

        let mut reports = Vec::new();
        for container in &pod.containers {
            let Some(termination) = &container.terminated else {
                continue;
            };

            let finished_at = termination.finished_at.unwrap_or_default();
            let key = termination_key(pod, container);
            if !self
                .terminations
                .is_new_termination(key, finished_at, observed_at)
            {
                self.metrics.inc_terminations_deduplicated();
                continue;
            }

            if termination.exit_code == 0 {
                continue;
            }

            let report = assemble_termination_report(
                pod,
                container,
                termination,
                &self.settings,
                observed_at,
            );
            self.deliver(&report).await;
            reports.push(report);
        }

        self.metrics
            .set_termination_cache_entries(self.terminations.len());
        reports
    }

    /// Record a pod's current terminations without reporting them
    pub fn prime_pod(&self, pod: &PodSnapshot) {
        for container in &pod.containers {
            if let Some(termination) = &container.terminated {
                self.terminations.record(
                    termination_key(pod, container),
                    termination.finished_at.unwrap_or_default(),
                );
            }
        }
        self.metrics
            .set_termination_cache_entries(self.terminations.len());
    }

    /// Namespace added or modified
    pub fn apply_namespace(&self, namespace: &NamespaceSnapshot) {
        let own_rules = self.rules.upsert(namespace);
        self.logger
            .log_namespace_policy(&namespace.name, own_rules, false);
        self.metrics.set_namespace_policies(self.rules.len());
    }

    /// Namespace deleted
    pub fn delete_namespace(&self, name: &str) {
        if self.rules.remove(name) {
            self.logger.log_namespace_policy(name, false, true);
        }
        self.metrics.set_namespace_policies(self.rules.len());
    }

    /// Full namespace listing after a (re)list
    pub fn resync_namespaces(&self, listing: &[NamespaceSnapshot]) {
        self.rules.replace_all(listing);
        info!(
            namespaces = listing.len(),
            policies = self.rules.len(),
            "Namespace policies resynced"
        );
        self.metrics.set_namespace_policies(self.rules.len());
    }

    async fn deliver(&self, report: &Report) {
        self.metrics.inc_reports(&report.kind.to_string());
        self.logger.log_report(report);

        match self.sink.send(report).await {
            Ok(()) => {
                if let Some(health) = &self.health {
                    health.record_success(components::REPORT_SINK).await;
                }
            }
            Err(e) => {
                self.metrics.inc_report_failures();
                self.logger.log_delivery_failure(report, &e.to_string());
                if let Some(health) = &self.health {
                    health
                        .record_failure(
                            components::REPORT_SINK,
                            format!("{} sink: {e}", self.sink.name()),
                        )
                        .await;
                }
            }
        }
    }
}

fn termination_key(pod: &PodSnapshot, container: &ContainerSnapshot) -> TerminationKey {
    TerminationKey::new(pod.meta.uid.as_str(), container.name.as_str())
        .with_restart_count(container.restart_count)
}
