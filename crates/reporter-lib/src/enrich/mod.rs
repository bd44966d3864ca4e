//! Kind-specific enrichment of event reports
//!
//! Handlers are looked up by the involved object's `(apiVersion, kind)`.
//! A specialized handler may fetch the related object to add context; if
//! there is none, or it cannot be built, the default handler is used.

mod default;
mod pod;

pub use default::DefaultHandler;
pub use pod::{PodHandler, PodHandlerFactory};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use crate::error::ReporterResult;
use crate::models::{EventRecord, PodSnapshot};
use crate::observability::ReporterMetrics;

/// Default bound for fetching the related object
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Kind-specific grouping and tagging for one event
pub trait EventHandler: Send + Sync {
    /// Fingerprint segments appended after the event prefix
    fn fingerprint(&self) -> Vec<String>;

    /// Tags added to the report, overriding base tags on collision
    fn tags(&self) -> BTreeMap<String, String>;
}

/// Builds a handler for an event, possibly fetching cluster state
#[async_trait]
pub trait HandlerFactory: Send + Sync {
    async fn create(&self, event: &EventRecord) -> ReporterResult<Box<dyn EventHandler>>;
}

/// Point-in-time lookup of a pod
///
/// With a resource version the pod is read as of that revision, otherwise
/// the latest state is returned.
#[async_trait]
pub trait PodFetcher: Send + Sync {
    async fn fetch_pod(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> ReporterResult<PodSnapshot>;
}

/// Registry lookup key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryKey {
    pub api_version: String,
    pub kind: String,
}

impl RegistryKey {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }
}

/// Dispatch table from object kind to handler factory
pub struct HandlerRegistry {
    factories: HashMap<RegistryKey, Arc<dyn HandlerFactory>>,
    metrics: ReporterMetrics,
}

impl HandlerRegistry {
    /// A registry that always resolves to the default handler
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            metrics: ReporterMetrics::new(),
        }
    }

    /// Registry with the built-in handlers (`v1/Pod`)
    pub fn with_builtin(fetcher: Arc<dyn PodFetcher>, fetch_timeout: Duration) -> Self {
        let mut registry = Self::new();
        registry.register(
            RegistryKey::new("v1", "Pod"),
            Arc::new(PodHandlerFactory::new(fetcher, fetch_timeout)),
        );
        registry
    }

    pub fn register(&mut self, key: RegistryKey, factory: Arc<dyn HandlerFactory>) {
        self.factories.insert(key, factory);
    }

    pub fn is_registered(&self, api_version: &str, kind: &str) -> bool {
        self.factories
            .contains_key(&RegistryKey::new(api_version, kind))
    }

    /// Resolve the handler for an event
    ///
    /// Never fails: factory errors are logged and counted, and the
    /// default handler is returned instead.
    pub async fn resolve(&self, event: &EventRecord) -> Box<dyn EventHandler> {
        let involved = &event.involved_object;
        let key = RegistryKey::new(involved.api_version.as_str(), involved.kind.as_str());

        if let Some(factory) = self.factories.get(&key) {
            let start = Instant::now();
            let result = factory.create(event).await;
            self.metrics
                .observe_enrichment_latency(start.elapsed().as_secs_f64());

            match result {
                Ok(handler) => return handler,
                Err(e) => {
                    warn!(
                        error = %e,
                        kind = %involved.kind,
                        namespace = %involved.namespace,
                        name = %involved.name,
                        "Enrichment failed, using default handler"
                    );
                    self.metrics.inc_enrichment_fallbacks();
                }
            }
        }

        Box::new(DefaultHandler::new(event))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
