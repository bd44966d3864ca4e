//! Report assembly
//!
//! Pure composition of the final structured report from a notification,
//! its fingerprint and its enrichment output. Nothing here performs I/O.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::enrich::EventHandler;
use crate::fingerprint::{event_prefix, fingerprint_from_meta};
use crate::models::{ContainerSnapshot, EventRecord, PodSnapshot, Termination};

/// Logger name attached to every report
pub const REPORT_LOGGER: &str = "kubernetes";

/// Report severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportLevel {
    Info,
    Warning,
    Error,
}

impl ReportLevel {
    /// Map a Kubernetes event type onto a report level
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "Warning" => ReportLevel::Warning,
            "Error" => ReportLevel::Error,
            other => {
                debug!(event_type = %other, "Unexpected event type, reporting as info");
                ReportLevel::Info
            }
        }
    }
}

impl std::fmt::Display for ReportLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportLevel::Info => write!(f, "info"),
            ReportLevel::Warning => write!(f, "warning"),
            ReportLevel::Error => write!(f, "error"),
        }
    }
}

/// What produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Event,
    ContainerTermination,
}

impl std::fmt::Display for ReportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportKind::Event => write!(f, "event"),
            ReportKind::ContainerTermination => write!(f, "container_termination"),
        }
    }
}

/// Deployment-wide values stamped on every report
#[derive(Debug, Clone, Default)]
pub struct ReportSettings {
    /// Fixed environment; the object's namespace is used when unset
    pub environment: Option<String>,
    pub cluster: Option<String>,
}

impl ReportSettings {
    fn environment_for(&self, namespace: &str) -> String {
        match self.environment.as_deref() {
            Some(env) if !env.is_empty() => env.to_string(),
            _ => namespace.to_string(),
        }
    }

    fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref().filter(|c| !c.is_empty())
    }
}

/// Structured error report handed to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub kind: ReportKind,
    pub message: String,
    pub level: ReportLevel,
    pub logger: String,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
    pub fingerprint: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub extra: BTreeMap<String, Value>,
    /// Container image for termination reports
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    /// Node the pod ran on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

fn set_tag(tags: &mut BTreeMap<String, String>, key: &str, value: impl ToString) {
    tags.insert(key.to_string(), value.to_string());
}

/// Assemble the report for a narrative event
pub fn assemble_event_report(
    event: &EventRecord,
    handler: &dyn EventHandler,
    settings: &ReportSettings,
    observed_at: DateTime<Utc>,
) -> Report {
    let involved = &event.involved_object;

    let text = if event.message.is_empty() {
        &event.reason
    } else {
        &event.message
    };
    let message = format!("{}/{}: {}", involved.kind, involved.name, text);

    let mut fingerprint = event_prefix(event);
    fingerprint.extend(handler.fingerprint());

    let mut tags = BTreeMap::new();
    set_tag(&mut tags, "namespace", &involved.namespace);
    set_tag(&mut tags, "component", &event.component);
    set_tag(&mut tags, "reason", &event.reason);
    set_tag(&mut tags, "kind", &involved.kind);
    set_tag(&mut tags, "type", &event.level);
    if let Some(cluster) = settings.cluster() {
        set_tag(&mut tags, "cluster", cluster);
    }
    if !event.reporting_controller.is_empty() {
        set_tag(&mut tags, "controller", &event.reporting_controller);
    }
    tags.extend(handler.tags());

    let mut extra = BTreeMap::new();
    extra.insert("count".to_string(), Value::from(event.count));
    if !event.action.is_empty() {
        extra.insert("action".to_string(), Value::from(event.action.clone()));
    }

    Report {
        kind: ReportKind::Event,
        message,
        level: ReportLevel::from_event_type(&event.level),
        logger: REPORT_LOGGER.to_string(),
        environment: settings.environment_for(&involved.namespace),
        timestamp: event.created_at.unwrap_or(observed_at),
        fingerprint,
        tags,
        extra,
        release: None,
        server_name: None,
    }
}

/// Human-readable description of a termination
fn termination_text(container: &ContainerSnapshot, termination: &Termination) -> String {
    if !termination.message.is_empty() {
        return termination.message.clone();
    }

    if termination.reason == "Error" {
        format!(
            "Error {} exited with code {}",
            container.name, termination.exit_code
        )
    } else {
        // OOMKilled and friends leave no message
        termination.reason.clone()
    }
}

/// Assemble the report for a failed container
pub fn assemble_termination_report(
    pod: &PodSnapshot,
    container: &ContainerSnapshot,
    termination: &Termination,
    settings: &ReportSettings,
    observed_at: DateTime<Utc>,
) -> Report {
    let message = format!(
        "Pod/{}: {}",
        pod.meta.name,
        termination_text(container, termination)
    );

    let mut fingerprint = vec![termination.reason.clone()];
    fingerprint.extend(fingerprint_from_meta(&pod.meta));

    let mut tags = BTreeMap::new();
    set_tag(&mut tags, "reason", &termination.reason);
    set_tag(&mut tags, "namespace", &pod.meta.namespace);
    set_tag(&mut tags, "kind", "Pod");
    if let Some(cluster) = settings.cluster() {
        set_tag(&mut tags, "cluster", cluster);
    }
    tags.extend(pod.meta.labels.clone());

    let mut extra = BTreeMap::new();
    extra.insert(
        "exit-code".to_string(),
        Value::from(termination.exit_code.to_string()),
    );
    extra.insert("restartCount".to_string(), Value::from(container.restart_count));
    extra.insert(
        "restartPolicy".to_string(),
        Value::from(pod.restart_policy.clone()),
    );
    extra.insert("container".to_string(), Value::from(container.name.clone()));
    extra.insert("pod".to_string(), Value::from(pod.meta.name.clone()));
    extra.insert("pod-phase".to_string(), Value::from(pod.phase.clone()));
    if !pod.status_message.is_empty() {
        extra.insert(
            "pod-status-message".to_string(),
            Value::from(pod.status_message.clone()),
        );
    }
    if !pod.status_reason.is_empty() {
        extra.insert(
            "pod-status-reason".to_string(),
            Value::from(pod.status_reason.clone()),
        );
    }

    Report {
        kind: ReportKind::ContainerTermination,
        message,
        level: ReportLevel::Error,
        logger: REPORT_LOGGER.to_string(),
        environment: settings.environment_for(&pod.meta.namespace),
        timestamp: termination.finished_at.unwrap_or(observed_at),
        fingerprint,
        tags,
        extra,
        release: Some(container.image.clone()).filter(|image| !image.is_empty()),
        server_name: Some(pod.node_name.clone()).filter(|node| !node.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::DefaultHandler;
    use crate::models::{ObjectMeta, ObjectRef};

    struct FixedHandler;

    impl EventHandler for FixedHandler {
        fn fingerprint(&self) -> Vec<String> {
            vec!["apps/v1".to_string(), "ReplicaSet".to_string(), "api".to_string()]
        }

        fn tags(&self) -> BTreeMap<String, String> {
            BTreeMap::from([
                ("kind".to_string(), "Overridden".to_string()),
                ("nodeName".to_string(), "node-a".to_string()),
            ])
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn backoff_event() -> EventRecord {
        EventRecord {
            involved_object: ObjectRef {
                api_version: "v1".to_string(),
                kind: "Pod".to_string(),
                namespace: "shop".to_string(),
                name: "api-7d9f8-x2x4z".to_string(),
                ..Default::default()
            },
            level: "Warning".to_string(),
            reason: "BackOff".to_string(),
            message: "Back-off restarting failed container".to_string(),
            count: 7,
            component: "kubelet".to_string(),
            created_at: Some(ts(1_700_000_000)),
            ..Default::default()
        }
    }

    fn crashed_pod() -> (PodSnapshot, ContainerSnapshot, Termination) {
        let termination = Termination {
            exit_code: 1,
            reason: "Error".to_string(),
            message: String::new(),
            finished_at: Some(ts(1_700_000_500)),
        };
        let container = ContainerSnapshot {
            name: "app".to_string(),
            image: "shop/api:1.2".to_string(),
            restart_count: 3,
            terminated: Some(termination.clone()),
        };
        let mut meta = ObjectMeta {
            name: "api-7d9f8-x2x4z".to_string(),
            namespace: "shop".to_string(),
            uid: "pod-uid".to_string(),
            ..Default::default()
        };
        meta.labels.insert("app".to_string(), "api".to_string());

        let pod = PodSnapshot {
            meta,
            node_name: "node-a".to_string(),
            restart_policy: "Always".to_string(),
            phase: "Running".to_string(),
            containers: vec![container.clone()],
            ..Default::default()
        };
        (pod, container, termination)
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(ReportLevel::from_event_type("Warning"), ReportLevel::Warning);
        assert_eq!(ReportLevel::from_event_type("Error"), ReportLevel::Error);
        assert_eq!(ReportLevel::from_event_type("Other"), ReportLevel::Info);
        assert_eq!(ReportLevel::Warning.to_string(), "warning");
    }

    #[test]
    fn test_event_report_fields() {
        let event = backoff_event();
        let handler = DefaultHandler::new(&event);
        let settings = ReportSettings {
            environment: None,
            cluster: Some("prod-eu".to_string()),
        };

        let report = assemble_event_report(&event, &handler, &settings, ts(1_800_000_000));

        assert_eq!(
            report.message,
            "Pod/api-7d9f8-x2x4z: Back-off restarting failed container"
        );
        assert_eq!(report.level, ReportLevel::Warning);
        assert_eq!(report.environment, "shop");
        assert_eq!(report.timestamp, ts(1_700_000_000));
        assert_eq!(
            report.fingerprint,
            vec!["kubelet", "Warning", "BackOff", "v1", "Pod", "shop", "api", ""]
        );
        assert_eq!(report.tags["cluster"], "prod-eu");
        assert_eq!(report.tags["type"], "Warning");
        assert_eq!(report.extra["count"], Value::from(7));
        assert!(!report.extra.contains_key("action"));
    }

    #[test]
    fn test_event_message_falls_back_to_reason() {
        let mut event = backoff_event();
        event.message.clear();
        event.created_at = None;

        let report = assemble_event_report(
            &event,
            &DefaultHandler::new(&event),
            &ReportSettings::default(),
            ts(1_800_000_000),
        );

        assert_eq!(report.message, "Pod/api-7d9f8-x2x4z: BackOff");
        assert_eq!(report.timestamp, ts(1_800_000_000));
        assert!(!report.tags.contains_key("cluster"));
    }

    #[test]
    fn test_handler_tags_take_precedence() {
        let event = backoff_event();
        let settings = ReportSettings {
            environment: Some("production".to_string()),
            cluster: None,
        };

        let report = assemble_event_report(&event, &FixedHandler, &settings, ts(0));

        assert_eq!(report.tags["kind"], "Overridden");
        assert_eq!(report.tags["nodeName"], "node-a");
        assert_eq!(report.environment, "production");
        assert_eq!(&report.fingerprint[3..], ["apps/v1", "ReplicaSet", "api"]);
    }

    #[test]
    fn test_termination_report_fields() {
        let (pod, container, termination) = crashed_pod();
        let report = assemble_termination_report(
            &pod,
            &container,
            &termination,
            &ReportSettings::default(),
            ts(1_800_000_000),
        );

        assert_eq!(report.kind, ReportKind::ContainerTermination);
        assert_eq!(report.message, "Pod/api-7d9f8-x2x4z: Error app exited with code 1");
        assert_eq!(report.level, ReportLevel::Error);
        assert_eq!(report.fingerprint, vec!["Error", "shop", "api"]);
        assert_eq!(report.release.as_deref(), Some("shop/api:1.2"));
        assert_eq!(report.server_name.as_deref(), Some("node-a"));
        assert_eq!(report.timestamp, ts(1_700_000_500));
        assert_eq!(report.tags["app"], "api");
        assert_eq!(report.tags["kind"], "Pod");
        assert_eq!(report.extra["exit-code"], Value::from("1"));
        assert_eq!(report.extra["restartCount"], Value::from(3));
        assert!(!report.extra.contains_key("pod-status-reason"));
    }

    #[test]
    fn test_termination_text_variants() {
        let (_, container, mut termination) = crashed_pod();

        termination.reason = "OOMKilled".to_string();
        assert_eq!(termination_text(&container, &termination), "OOMKilled");

        termination.message = "panic: nil map".to_string();
        assert_eq!(termination_text(&container, &termination), "panic: nil map");
    }

    #[test]
    fn test_report_serializes_without_empty_options() {
        let event = backoff_event();
        let report = assemble_event_report(
            &event,
            &DefaultHandler::new(&event),
            &ReportSettings::default(),
            ts(0),
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["level"], "warning");
        assert_eq!(json["kind"], "event");
        assert!(json.get("release").is_none());
    }
}
