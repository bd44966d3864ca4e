//! Health tracking for the reporter's watchers and sink
//!
//! Backs the Kubernetes liveness and readiness probes. Watch streams and
//! the report sink record their successes and failures here; repeated
//! failures escalate a component from degraded to unhealthy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures after which a component is considered unhealthy
pub const UNHEALTHY_AFTER_FAILURES: u32 = 10;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is failing intermittently but still operational
    Degraded,
    /// Component has failed
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Information about a component's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub consecutive_failures: u32,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    fn failing(previous_failures: u32, message: String) -> Self {
        let consecutive_failures = previous_failures.saturating_add(1);
        let status = if consecutive_failures >= UNHEALTHY_AFTER_FAILURES {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };

        Self {
            status,
            message: Some(message),
            consecutive_failures,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|health| health.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const NAMESPACE_WATCHER: &str = "namespace_watcher";
    pub const EVENT_WATCHER: &str = "event_watcher";
    pub const POD_WATCHER: &str = "pod_watcher";
    pub const REPORT_SINK: &str = "report_sink";

    pub const ALL: [&str; 4] = [NAMESPACE_WATCHER, EVENT_WATCHER, POD_WATCHER, REPORT_SINK];
}

/// Health registry shared by all delivery paths
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    synced: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            synced: Arc::new(RwLock::new(false)),
        }
    }

    /// Register every known component as healthy
    pub async fn register_all(&self) {
        let mut map = self.components.write().await;
        for name in components::ALL {
            map.insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        let mut map = self.components.write().await;
        map.insert(name.to_string(), ComponentHealth::healthy());
    }

    /// A successful operation resets the failure streak
    pub async fn record_success(&self, name: &str) {
        let mut map = self.components.write().await;
        let needs_reset = map
            .get(name)
            .map(|health| health.status != ComponentStatus::Healthy)
            .unwrap_or(true);
        if needs_reset {
            map.insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    /// A failed operation extends the failure streak
    pub async fn record_failure(&self, name: &str, message: impl Into<String>) {
        let mut map = self.components.write().await;
        let previous = map
            .get(name)
            .map(|health| health.consecutive_failures)
            .unwrap_or(0);
        map.insert(
            name.to_string(),
            ComponentHealth::failing(previous, message.into()),
        );
    }

    /// Mark the initial namespace sync as complete (or lost)
    pub async fn set_synced(&self, synced: bool) {
        *self.synced.write().await = synced;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let synced = *self.synced.read().await;
        let health = self.health().await;

        if !synced {
            ReadinessResponse {
                ready: false,
                reason: Some("Initial namespace sync not complete".to_string()),
            }
        } else if !health.status.is_operational() {
            ReadinessResponse {
                ready: false,
                reason: Some("Component unhealthy".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_register_all() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        let health = registry.health().await;
        assert_eq!(health.components.len(), components::ALL.len());
        assert!(health.components.contains_key(components::REPORT_SINK));
    }

    #[tokio::test]
    async fn test_failure_degrades_then_escalates() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        registry
            .record_failure(components::EVENT_WATCHER, "watch stream error")
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::EVENT_WATCHER].consecutive_failures,
            1
        );

        for _ in 1..UNHEALTHY_AFTER_FAILURES {
            registry
                .record_failure(components::EVENT_WATCHER, "watch stream error")
                .await;
        }
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_success_resets_streak() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        registry.record_failure(components::REPORT_SINK, "503").await;
        registry.record_success(components::REPORT_SINK).await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(
            health.components[components::REPORT_SINK].consecutive_failures,
            0
        );
    }

    #[tokio::test]
    async fn test_readiness_requires_sync() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());

        registry.set_synced(true).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_readiness_not_ready_when_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register_all().await;
        registry.set_synced(true).await;

        for _ in 0..UNHEALTHY_AFTER_FAILURES {
            registry
                .record_failure(components::POD_WATCHER, "forbidden")
                .await;
        }

        assert!(!registry.readiness().await.ready);
    }
}
