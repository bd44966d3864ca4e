//! Cluster watch wiring
//!
//! One task per (scope, resource kind) plus a cluster-wide namespace task.
//! Event and pod watchers only start once the namespace watcher delivered
//! its first full listing, so namespace policies are in place before the
//! first event is classified.

mod handlers;

pub use handlers::{EventStreamHandler, NamespaceStreamHandler, PodStreamHandler};

use std::fmt::Debug;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, Namespace, Pod};
use kube::runtime::watcher;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::error::{ReporterError, ReporterResult};
use crate::health::{components, HealthRegistry};
use crate::pipeline::ReportPipeline;

/// Default bound on the initial namespace listing
pub const DEFAULT_NAMESPACE_SYNC_TIMEOUT: Duration = Duration::from_secs(20);

/// Consumer of one watch stream
#[async_trait]
pub trait WatchHandler<K: Send + 'static>: Send {
    async fn handle(&mut self, event: watcher::Event<K>);
}

/// Drive a watch stream into a handler until shutdown
///
/// Stream errors mark the component degraded; the watcher itself backs
/// off and re-lists, so the loop keeps going.
pub async fn run_watch<K, H>(
    api: Api<K>,
    component: &'static str,
    health: HealthRegistry,
    mut shutdown: broadcast::Receiver<()>,
    mut handler: H,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    H: WatchHandler<K>,
{
    let mut stream = pin!(watcher(api, watcher::Config::default()));
    debug!(component = component, "Watch started");

    loop {
        tokio::select! {
            item = stream.next() => {
                match item {
                    Some(Ok(event)) => {
                        handler.handle(event).await;
                        health.record_success(component).await;
                    }
                    Some(Err(e)) => {
                        warn!(component = component, error = %e, "Watch stream error");
                        health.record_failure(component, e.to_string()).await;
                    }
                    None => {
                        warn!(component = component, "Watch stream ended");
                        break;
                    }
                }
            }
            _ = shutdown.recv() => {
                info!(component = component, "Watch stopping");
                break;
            }
        }
    }
}

/// Which namespaces to watch
#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// Empty means cluster-wide
    pub namespaces: Vec<String>,
    pub namespace_sync_timeout: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            namespaces: Vec::new(),
            namespace_sync_timeout: DEFAULT_NAMESPACE_SYNC_TIMEOUT,
        }
    }
}

impl WatchSettings {
    /// Namespace scopes for event and pod watchers; `None` is cluster-wide
    pub fn scopes(&self) -> Vec<Option<String>> {
        let mut scopes: Vec<Option<String>> = self
            .namespaces
            .iter()
            .map(|ns| ns.trim())
            .filter(|ns| !ns.is_empty())
            .map(|ns| Some(ns.to_string()))
            .collect();
        scopes.dedup();

        if scopes.is_empty() {
            scopes.push(None);
        }
        scopes
    }
}

/// Starts and owns all watch tasks
pub struct WatchSupervisor {
    client: Client,
    pipeline: Arc<ReportPipeline>,
    health: HealthRegistry,
    settings: WatchSettings,
}

impl WatchSupervisor {
    pub fn new(
        client: Client,
        pipeline: Arc<ReportPipeline>,
        health: HealthRegistry,
        settings: WatchSettings,
    ) -> Self {
        Self {
            client,
            pipeline,
            health,
            settings,
        }
    }

    /// Start the namespace watcher, wait for its first listing, then start
    /// event and pod watchers for every scope
    pub async fn start(&self, shutdown: &broadcast::Sender<()>) -> ReporterResult<Vec<JoinHandle<()>>> {
        let (ready_tx, ready_rx) = oneshot::channel();

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespace_task = tokio::spawn(run_watch(
            namespaces,
            components::NAMESPACE_WATCHER,
            self.health.clone(),
            shutdown.subscribe(),
            NamespaceStreamHandler::new(self.pipeline.clone(), ready_tx),
        ));

        let timeout = self.settings.namespace_sync_timeout;
        match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                namespace_task.abort();
                return Err(ReporterError::Other(
                    "namespace watcher stopped before initial sync".to_string(),
                ));
            }
            Err(_) => {
                namespace_task.abort();
                return Err(ReporterError::Timeout {
                    what: "initial namespace sync".to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }

        self.health.set_synced(true).await;
        info!(
            policies = self.pipeline.rules().len(),
            "Initial namespace sync complete"
        );

        let mut handles = vec![namespace_task];
        for scope in self.settings.scopes() {
            let (events, pods): (Api<Event>, Api<Pod>) = match &scope {
                Some(ns) => (
                    Api::namespaced(self.client.clone(), ns),
                    Api::namespaced(self.client.clone(), ns),
                ),
                None => (Api::all(self.client.clone()), Api::all(self.client.clone())),
            };

            info!(
                namespace = scope.as_deref().unwrap_or("<all>"),
                "Starting event and pod watchers"
            );

            handles.push(tokio::spawn(run_watch(
                events,
                components::EVENT_WATCHER,
                self.health.clone(),
                shutdown.subscribe(),
                EventStreamHandler::new(self.pipeline.clone()),
            )));
            handles.push(tokio::spawn(run_watch(
                pods,
                components::POD_WATCHER,
                self.health.clone(),
                shutdown.subscribe(),
                PodStreamHandler::new(self.pipeline.clone()),
            )));
        }

        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_namespaces_mean_cluster_wide() {
        let settings = WatchSettings::default();
        assert_eq!(settings.scopes(), vec![None]);
    }

    #[test]
    fn test_explicit_namespaces() {
        let settings = WatchSettings {
            namespaces: vec![
                "shop".to_string(),
                " ".to_string(),
                "billing".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(
            settings.scopes(),
            vec![Some("shop".to_string()), Some("billing".to_string())]
        );
    }

    #[test]
    fn test_default_sync_timeout() {
        assert_eq!(
            WatchSettings::default().namespace_sync_timeout,
            Duration::from_secs(20)
        );
    }
}
