//! Pod-aware handler
//!
//! Fetches the current pod so reports group by the pod's controller and
//! carry its labels and node.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{EventHandler, HandlerFactory, PodFetcher};
use crate::error::{ReporterError, ReporterResult};
use crate::fingerprint::fingerprint_from_meta;
use crate::models::{EventRecord, PodSnapshot};

#[derive(Debug, Clone)]
pub struct PodHandler {
    pod: PodSnapshot,
}

impl PodHandler {
    pub fn new(pod: PodSnapshot) -> Self {
        Self { pod }
    }
}

impl EventHandler for PodHandler {
    fn fingerprint(&self) -> Vec<String> {
        fingerprint_from_meta(&self.pod.meta)
    }

    fn tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.pod.meta.labels.clone();
        tags.insert("nodeName".to_string(), self.pod.node_name.clone());
        tags
    }
}

/// Creates [`PodHandler`]s, one bounded fetch per event
pub struct PodHandlerFactory {
    fetcher: Arc<dyn PodFetcher>,
    timeout: Duration,
}

impl PodHandlerFactory {
    pub fn new(fetcher: Arc<dyn PodFetcher>, timeout: Duration) -> Self {
        Self { fetcher, timeout }
    }
}

#[async_trait]
impl HandlerFactory for PodHandlerFactory {
    async fn create(&self, event: &EventRecord) -> ReporterResult<Box<dyn EventHandler>> {
        let involved = &event.involved_object;
        let namespace = if involved.namespace.is_empty() {
            event.namespace()
        } else {
            &involved.namespace
        };

        let pod = tokio::time::timeout(
            self.timeout,
            self.fetcher.fetch_pod(
                namespace,
                &involved.name,
                Some(involved.resource_version.as_str()).filter(|rv| !rv.is_empty()),
            ),
        )
        .await
        .map_err(|_| ReporterError::Timeout {
            what: format!("fetching pod {}/{}", namespace, involved.name),
            timeout_ms: self.timeout.as_millis() as u64,
        })??;

        Ok(Box::new(PodHandler::new(pod)))
    }
}
