//! Core data models for the event reporter
//!
//! Watchers deliver `k8s-openapi` objects. The classification engine only
//! ever sees the read-only views defined here, which keeps it independent
//! of the API machinery and easy to construct in tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ContainerStatus, Event, Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as K8sObjectMeta;
use serde::{Deserialize, Serialize};

use crate::error::{ReporterError, ReporterResult};

/// Back-reference from an object to one of its owners
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    /// True when this owner is the managing controller
    pub controller: bool,
}

/// Identity and grouping-relevant metadata of an object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub generate_name: String,
    pub namespace: String,
    pub uid: String,
    pub labels: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerRef>,
}

impl ObjectMeta {
    /// The owner reference flagged as controller, if any
    pub fn controller(&self) -> Option<&OwnerRef> {
        self.owner_references.iter().find(|owner| owner.controller)
    }
}

impl From<&K8sObjectMeta> for ObjectMeta {
    fn from(meta: &K8sObjectMeta) -> Self {
        let owner_references = meta
            .owner_references
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|owner| OwnerRef {
                api_version: owner.api_version.clone(),
                kind: owner.kind.clone(),
                name: owner.name.clone(),
                uid: owner.uid.clone(),
                controller: owner.controller.unwrap_or(false),
            })
            .collect();

        Self {
            name: meta.name.clone().unwrap_or_default(),
            generate_name: meta.generate_name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            uid: meta.uid.clone().unwrap_or_default(),
            labels: meta.labels.clone().unwrap_or_default(),
            owner_references,
        }
    }
}

/// The object an event is about
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub resource_version: String,
    pub field_path: String,
}

/// A narrative event record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Metadata of the event object itself
    pub meta: ObjectMeta,
    pub resource_version: String,
    pub involved_object: ObjectRef,
    /// Event type, e.g. `Normal` or `Warning`
    pub level: String,
    pub reason: String,
    pub message: String,
    pub count: i32,
    /// Source component, e.g. `kubelet`
    pub component: String,
    pub reporting_controller: String,
    pub action: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl EventRecord {
    /// Namespace used for rule-set resolution
    pub fn namespace(&self) -> &str {
        if self.meta.namespace.is_empty() {
            &self.involved_object.namespace
        } else {
            &self.meta.namespace
        }
    }
}

impl TryFrom<&Event> for EventRecord {
    type Error = ReporterError;

    fn try_from(event: &Event) -> ReporterResult<Self> {
        let meta = ObjectMeta::from(&event.metadata);
        if meta.uid.is_empty() {
            return Err(ReporterError::MissingField {
                object: "Event",
                field: "metadata.uid",
            });
        }

        let involved = &event.involved_object;
        let kind = involved.kind.clone().unwrap_or_default();
        if kind.is_empty() {
            return Err(ReporterError::MissingField {
                object: "Event",
                field: "involvedObject.kind",
            });
        }

        let created_at = event
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| event.event_time.as_ref().map(|t| t.0))
            .or_else(|| event.first_timestamp.as_ref().map(|t| t.0));

        Ok(Self {
            resource_version: event.metadata.resource_version.clone().unwrap_or_default(),
            involved_object: ObjectRef {
                api_version: involved.api_version.clone().unwrap_or_default(),
                kind,
                namespace: involved.namespace.clone().unwrap_or_default(),
                name: involved.name.clone().unwrap_or_default(),
                uid: involved.uid.clone().unwrap_or_default(),
                resource_version: involved.resource_version.clone().unwrap_or_default(),
                field_path: involved.field_path.clone().unwrap_or_default(),
            },
            level: event.type_.clone().unwrap_or_default(),
            reason: event.reason.clone().unwrap_or_default(),
            message: event.message.clone().unwrap_or_default(),
            count: event.count.unwrap_or(1),
            component: event
                .source
                .as_ref()
                .and_then(|s| s.component.clone())
                .unwrap_or_default(),
            reporting_controller: event.reporting_component.clone().unwrap_or_default(),
            action: event.action.clone().unwrap_or_default(),
            created_at,
            meta,
        })
    }
}

/// Terminated state of a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Termination {
    pub exit_code: i32,
    pub reason: String,
    pub message: String,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Status of one container in a pod
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub name: String,
    pub image: String,
    pub restart_count: i32,
    pub terminated: Option<Termination>,
}

impl From<&ContainerStatus> for ContainerSnapshot {
    fn from(status: &ContainerStatus) -> Self {
        let terminated = status
            .state
            .as_ref()
            .and_then(|state| state.terminated.as_ref())
            .map(|t| Termination {
                exit_code: t.exit_code,
                reason: t.reason.clone().unwrap_or_default(),
                message: t.message.clone().unwrap_or_default(),
                finished_at: t.finished_at.as_ref().map(|time| time.0),
            });

        Self {
            name: status.name.clone(),
            image: status.image.clone(),
            restart_count: status.restart_count,
            terminated,
        }
    }
}

/// Point-in-time view of a pod
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSnapshot {
    pub meta: ObjectMeta,
    pub node_name: String,
    pub restart_policy: String,
    pub phase: String,
    pub status_message: String,
    pub status_reason: String,
    /// Init containers first, then regular containers
    pub containers: Vec<ContainerSnapshot>,
}

impl TryFrom<&Pod> for PodSnapshot {
    type Error = ReporterError;

    fn try_from(pod: &Pod) -> ReporterResult<Self> {
        let meta = ObjectMeta::from(&pod.metadata);
        if meta.uid.is_empty() {
            return Err(ReporterError::MissingField {
                object: "Pod",
                field: "metadata.uid",
            });
        }

        let spec = pod.spec.as_ref();
        let status = pod.status.as_ref();

        let containers = status
            .map(|s| {
                s.init_container_statuses
                    .iter()
                    .flatten()
                    .chain(s.container_statuses.iter().flatten())
                    .map(ContainerSnapshot::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            meta,
            node_name: spec.and_then(|s| s.node_name.clone()).unwrap_or_default(),
            restart_policy: spec
                .and_then(|s| s.restart_policy.clone())
                .unwrap_or_default(),
            phase: status.and_then(|s| s.phase.clone()).unwrap_or_default(),
            status_message: status.and_then(|s| s.message.clone()).unwrap_or_default(),
            status_reason: status.and_then(|s| s.reason.clone()).unwrap_or_default(),
            containers,
        })
    }
}

/// Name and annotations of a namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSnapshot {
    pub name: String,
    pub annotations: BTreeMap<String, String>,
}

impl TryFrom<&Namespace> for NamespaceSnapshot {
    type Error = ReporterError;

    fn try_from(ns: &Namespace) -> ReporterResult<Self> {
        let name = ns.metadata.name.clone().unwrap_or_default();
        if name.is_empty() {
            return Err(ReporterError::MissingField {
                object: "Namespace",
                field: "metadata.name",
            });
        }

        Ok(Self {
            name,
            annotations: ns.metadata.annotations.clone().unwrap_or_default(),
        })
    }
}

/// One raw signal delivered by the watch layer
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A narrative event was added
    Event(EventRecord),
    /// A pod changed state
    PodUpdate(PodSnapshot),
}
