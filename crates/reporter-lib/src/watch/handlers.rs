use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Event, Namespace, Pod};
use kube::runtime::watcher;
use kube::ResourceExt;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::WatchHandler;
use crate::models::{EventRecord, NamespaceSnapshot, PodSnapshot};
use crate::observability::ReporterMetrics;
use crate::pipeline::ReportPipeline;

/// Keeps namespace policies in step with the cluster
pub struct NamespaceStreamHandler {
    pipeline: Arc<ReportPipeline>,
    ready: Option<oneshot::Sender<()>>,
    metrics: ReporterMetrics,
}

impl NamespaceStreamHandler {
    /// `ready` fires after the first full listing has been applied
    pub fn new(pipeline: Arc<ReportPipeline>, ready: oneshot::Sender<()>) -> Self {
        Self {
            pipeline,
            ready: Some(ready),
            metrics: ReporterMetrics::new(),
        }
    }

    fn snapshot(&self, ns: &Namespace) -> Option<NamespaceSnapshot> {
        match NamespaceSnapshot::try_from(ns) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "Dropping namespace notification");
                self.metrics.inc_dropped();
                None
            }
        }
    }
}

#[async_trait]
impl WatchHandler<Namespace> for NamespaceStreamHandler {
    async fn handle(&mut self, event: watcher::Event<Namespace>) {
        match event {
            watcher::Event::Applied(ns) => {
                if let Some(snapshot) = self.snapshot(&ns) {
                    self.pipeline.apply_namespace(&snapshot);
                }
            }
            watcher::Event::Deleted(ns) => {
                self.pipeline.delete_namespace(&ns.name_any());
            }
            watcher::Event::Restarted(list) => {
                let listing: Vec<NamespaceSnapshot> =
                    list.iter().filter_map(|ns| self.snapshot(ns)).collect();
                self.pipeline.resync_namespaces(&listing);

                if let Some(ready) = self.ready.take() {
                    // Receiver gone means startup already gave up
                    let _ = ready.send(());
                }
            }
        }
    }
}

/// Feeds added events into the pipeline
pub struct EventStreamHandler {
    pipeline: Arc<ReportPipeline>,
    metrics: ReporterMetrics,
}

impl EventStreamHandler {
    pub fn new(pipeline: Arc<ReportPipeline>) -> Self {
        Self {
            pipeline,
            metrics: ReporterMetrics::new(),
        }
    }

    async fn process(&self, event: &Event) {
        match EventRecord::try_from(event) {
            Ok(record) => {
                self.pipeline.handle_event(&record, Utc::now()).await;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    event = %event.name_any(),
                    namespace = %event.namespace().unwrap_or_default(),
                    "Dropping event notification"
                );
                self.metrics.inc_dropped();
            }
        }
    }
}

#[async_trait]
impl WatchHandler<Event> for EventStreamHandler {
    async fn handle(&mut self, event: watcher::Event<Event>) {
        match event {
            watcher::Event::Applied(event) => self.process(&event).await,
            // Events seen before under the same uid are dropped by the pipeline
            watcher::Event::Restarted(events) => {
                for event in &events {
                    self.process(event).await;
                }
            }
            watcher::Event::Deleted(_) => {}
        }
    }
}

/// Feeds pod updates into the pipeline
///
/// Pods from a full listing only prime the termination tracker, so a
/// restart of the reporter does not re-report old crashes.
pub struct PodStreamHandler {
    pipeline: Arc<ReportPipeline>,
    metrics: ReporterMetrics,
}

impl PodStreamHandler {
    pub fn new(pipeline: Arc<ReportPipeline>) -> Self {
        Self {
            pipeline,
            metrics: ReporterMetrics::new(),
        }
    }

    fn snapshot(&self, pod: &Pod) -> Option<PodSnapshot> {
        match PodSnapshot::try_from(pod) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(
                    error = %e,
                    pod = %pod.name_any(),
                    "Dropping pod notification"
                );
                self.metrics.inc_dropped();
                None
            }
        }
    }
}

#[async_trait]
impl WatchHandler<Pod> for PodStreamHandler {
    async fn handle(&mut self, event: watcher::Event<Pod>) {
        match event {
            watcher::Event::Applied(pod) => {
                if let Some(snapshot) = self.snapshot(&pod) {
                    self.pipeline.handle_pod_update(&snapshot, Utc::now()).await;
                }
            }
            watcher::Event::Restarted(pods) => {
                for pod in &pods {
                    if let Some(snapshot) = self.snapshot(pod) {
                        self.pipeline.prime_pod(&snapshot);
                    }
                }
                debug!(pods = pods.len(), "Primed termination tracker from listing");
            }
            watcher::Event::Deleted(_) => {}
        }
    }
}
