//! Cluster event reporter library
//!
//! This crate provides the core functionality for:
//! - Skip rules for noisy events, global and per namespace
//! - Fingerprinting and kind-specific enrichment of reports
//! - Deduplication of container terminations
//! - Report assembly and delivery
//! - Cluster watch wiring, health checks and observability

pub mod cluster;
pub mod enrich;
pub mod error;
pub mod fingerprint;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod recency;
pub mod report;
pub mod sink;
pub mod skip;
pub mod watch;

pub use error::{ReporterError, ReporterResult};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ReporterMetrics, StructuredLogger};
pub use pipeline::{PipelineConfig, ReportPipeline};
pub use report::{Report, ReportKind, ReportLevel, ReportSettings};
pub use sink::{LogSink, ReportSink, WebhookSink};
pub use skip::{NamespaceRules, RuleSet};
pub use watch::{WatchSettings, WatchSupervisor};
