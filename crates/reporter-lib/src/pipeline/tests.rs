//! Tests for the notification pipeline
//!
//! These tests verify:
//! - Event suppression (skip rules, replays)
//! - Termination reporting and deduplication
//! - Namespace policy changes taking effect immediately

use super::*;
use crate::error::{ReporterError, ReporterResult};
use crate::models::{ObjectMeta, ObjectRef, Termination};
use crate::report::ReportKind;
use crate::skip::{RuleSet, IGNORE_POD_UPDATES_ANNOTATION, SKIP_REASONS_ANNOTATION};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Sink that keeps every report it receives
#[derive(Default)]
struct RecordingSink {
    reports: Mutex<Vec<Report>>,
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn send(&self, report: &Report) -> ReporterResult<()> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

struct FailingSink;

#[async_trait]
impl ReportSink for FailingSink {
    async fn send(&self, _report: &Report) -> ReporterResult<()> {
        Err(ReporterError::Sink("503 Service Unavailable".to_string()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

fn ts_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

fn pipeline_with(sink: Arc<dyn ReportSink>) -> ReportPipeline {
    let settings = ReportSettings {
        environment: None,
        cluster: Some("test-cluster".to_string()),
    };
    ReportPipeline::new(
        settings,
        Arc::new(NamespaceRules::new(RuleSet::builtin_default())),
        HandlerRegistry::new(),
        sink,
        PipelineConfig::default(),
    )
}

fn event(uid: &str, namespace: &str, level: &str, reason: &str) -> EventRecord {
    EventRecord {
        meta: ObjectMeta {
            name: format!("{uid}.evt"),
            namespace: namespace.to_string(),
            uid: uid.to_string(),
            ..Default::default()
        },
        resource_version: "1".to_string(),
        involved_object: ObjectRef {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            namespace: namespace.to_string(),
            name: "web-5f6d7-abcde".to_string(),
            ..Default::default()
        },
        level: level.to_string(),
        reason: reason.to_string(),
        message: format!("{reason} happened"),
        count: 1,
        component: "kubelet".to_string(),
        ..Default::default()
    }
}

fn crashed_pod(uid: &str, namespace: &str, exit_code: i32, finished_ms: i64) -> PodSnapshot {
    PodSnapshot {
        meta: ObjectMeta {
            name: format!("{uid}-pod"),
            namespace: namespace.to_string(),
            uid: uid.to_string(),
            ..Default::default()
        },
        node_name: "node-1".to_string(),
        restart_policy: "Always".to_string(),
        phase: "Running".to_string(),
        containers: vec![ContainerSnapshot {
            name: "app".to_string(),
            image: "registry/app:1".to_string(),
            restart_count: 0,
            terminated: Some(Termination {
                exit_code,
                reason: "Error".to_string(),
                message: String::new(),
                finished_at: Some(ts_ms(finished_ms)),
            }),
        }],
        ..Default::default()
    }
}

fn namespace(name: &str, annotations: &[(&str, &str)]) -> NamespaceSnapshot {
    NamespaceSnapshot {
        name: name.to_string(),
        annotations: annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

mod event_tests {
    use super::*;

    #[tokio::test]
    async fn test_warning_event_is_reported() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline_with(sink.clone());

        let report = pipeline
            .handle_event(&event("e1", "shop", "Warning", "BackOff"), ts_ms(1_000))
            .await
            .expect("warning events are reported");

        assert_eq!(report.kind, ReportKind::Event);
        assert_eq!(report.tags["cluster"], "test-cluster");
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_normal_event_skipped_by_builtin_rules() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline_with(sink.clone());

        let report = pipeline
            .handle_event(&event("e1", "shop", "Normal", "Scheduled"), ts_ms(1_000))
            .await;

        assert!(report.is_none());
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_event_count_bumps_report_once() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline_with(sink.clone());
        let warning = event("e1", "shop", "Warning", "BackOff");

        assert!(pipeline.handle_event(&warning, ts_ms(1_000)).await.is_some());
        assert!(pipeline.handle_event(&warning, ts_ms(2_000)).await.is_none());

        // The kubelet bumps count on the same event object
        for (revision, count) in [("2", 2), ("3", 3)] {
            let mut bumped = warning.clone();
            bumped.resource_version = revision.to_string();
            bumped.count = count;
            assert!(pipeline.handle_event(&bumped, ts_ms(3_000)).await.is_none());
        }
        assert_eq!(sink.count(), 1);

        // A different event object is still reported
        let other = event("e2", "shop", "Warning", "BackOff");
        assert!(pipeline.handle_event(&other, ts_ms(4_000)).await.is_some());
        assert_eq!(sink.count(), 2);
    }

    #[tokio::test]
    async fn test_namespace_override_takes_effect() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline_with(sink.clone());

        pipeline.apply_namespace(&namespace(
            "team-a",
            &[(SKIP_REASONS_ANNOTATION, "Pod:BackOff")],
        ));

        // Own rule set: BackOff on pods skipped, Normal no longer skipped
        assert!(pipeline
            .handle_event(&event("e1", "team-a", "Warning", "BackOff"), ts_ms(1))
            .await
            .is_none());
        assert!(pipeline
            .handle_event(&event("e2", "team-a", "Normal", "Pulled"), ts_ms(2))
            .await
            .is_some());

        // Other namespaces still use the global rules
        assert!(pipeline
            .handle_event(&event("e3", "team-b", "Warning", "BackOff"), ts_ms(3))
            .await
            .is_some());

        pipeline.delete_namespace("team-a");
        assert!(pipeline
            .handle_event(&event("e4", "team-a", "Warning", "BackOff"), ts_ms(4))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_resync_replaces_policies() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline_with(sink);

        pipeline.apply_namespace(&namespace("old", &[(SKIP_REASONS_ANNOTATION, "BackOff")]));
        assert_eq!(pipeline.rules().len(), 1);

        pipeline.resync_namespaces(&[
            namespace("new", &[(SKIP_REASONS_ANNOTATION, "Killing")]),
            namespace("plain", &[]),
        ]);

        assert_eq!(pipeline.rules().len(), 1);
        assert_eq!(pipeline.rules().rules_for("old"), RuleSet::builtin_default());
        assert_ne!(pipeline.rules().rules_for("new"), RuleSet::builtin_default());
    }

    #[tokio::test]
    async fn test_sink_failure_still_returns_report() {
        let health = HealthRegistry::new();
        health.register_all().await;
        let pipeline = pipeline_with(Arc::new(FailingSink)).with_health(health.clone());

        let report = pipeline
            .handle_event(&event("e1", "shop", "Warning", "BackOff"), ts_ms(1))
            .await;

        assert!(report.is_some());
        let status = health.health().await;
        assert_eq!(
            status.components[components::REPORT_SINK].consecutive_failures,
            1
        );
    }

    #[tokio::test]
    async fn test_process_dispatches_by_notification_type() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline_with(sink.clone());

        let reports = pipeline
            .process(
                &Notification::Event(event("e1", "shop", "Warning", "Failed")),
                ts_ms(1),
            )
            .await;
        assert_eq!(reports.len(), 1);

        let reports = pipeline
            .process(&Notification::PodUpdate(crashed_pod("p1", "shop", 2, 10)), ts_ms(10))
            .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, ReportKind::ContainerTermination);
        assert_eq!(sink.count(), 2);
    }
}

mod termination_tests {
    use super::*;

    #[tokio::test]
    async fn test_repeated_updates_report_once() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline_with(sink.clone());
        let pod = crashed_pod("X", "shop", 137, 100);

        assert_eq!(pipeline.handle_pod_update(&pod, ts_ms(100)).await.len(), 1);
        assert!(pipeline.handle_pod_update(&pod, ts_ms(150)).await.is_empty());
        assert!(pipeline.handle_pod_update(&pod, ts_ms(175)).await.is_empty());

        assert_eq!(sink.count(), 1);
        assert_eq!(pipeline.tracked_terminations(), 1);
    }

    #[tokio::test]
    async fn test_newer_termination_is_reported_again() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline_with(sink.clone());

        pipeline
            .handle_pod_update(&crashed_pod("X", "shop", 1, 100), ts_ms(100))
            .await;
        let reports = pipeline
            .handle_pod_update(&crashed_pod("X", "shop", 1, 200), ts_ms(200))
            .await;

        assert_eq!(reports.len(), 1);
        assert_eq!(sink.count(), 2);
    }

    #[tokio::test]
    async fn test_zero_exit_is_never_reported() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline_with(sink.clone());

        let reports = pipeline
            .handle_pod_update(&crashed_pod("X", "shop", 0, 100), ts_ms(100))
            .await;

        assert!(reports.is_empty());
        assert_eq!(sink.count(), 0);
        // Still remembered, so a later failure at the same instant is a replay
        assert_eq!(pipeline.tracked_terminations(), 1);
    }

    #[tokio::test]
    async fn test_primed_pod_is_not_reported() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline_with(sink.clone());
        let pod = crashed_pod("X", "shop", 1, 100);

        pipeline.prime_pod(&pod);
        assert!(pipeline.handle_pod_update(&pod, ts_ms(500)).await.is_empty());
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_ignore_pod_updates_annotation() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline_with(sink.clone());

        pipeline.apply_namespace(&namespace(
            "batch",
            &[(IGNORE_POD_UPDATES_ANNOTATION, "True")],
        ));

        let reports = pipeline
            .handle_pod_update(&crashed_pod("X", "batch", 1, 100), ts_ms(100))
            .await;
        assert!(reports.is_empty());

        let reports = pipeline
            .handle_pod_update(&crashed_pod("Y", "shop", 1, 100), ts_ms(100))
            .await;
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_termination_not_reported() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = ReportPipeline::new(
            ReportSettings::default(),
            Arc::new(NamespaceRules::new(RuleSet::builtin_default())),
            HandlerRegistry::new(),
            sink.clone(),
            PipelineConfig {
                termination_max_age: Some(chrono::Duration::milliseconds(5)),
                ..Default::default()
            },
        );

        let reports = pipeline
            .handle_pod_update(&crashed_pod("X", "shop", 1, 100), ts_ms(60_000))
            .await;
        assert!(reports.is_empty());
        assert_eq!(sink.count(), 0);
    }
}
