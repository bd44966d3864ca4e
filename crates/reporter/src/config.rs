//! Reporter configuration

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reporter_lib::pipeline::PipelineConfig;
use reporter_lib::report::ReportSettings;
use reporter_lib::skip::RuleSet;
use reporter_lib::watch::WatchSettings;
use serde::Deserialize;

/// Prefix of every configuration environment variable
pub const ENV_PREFIX: &str = "REPORTER";

/// Reporter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReporterConfig {
    /// Fixed environment for every report; the namespace is used when unset
    #[serde(default)]
    pub environment: Option<String>,

    /// Cluster name added as a tag
    #[serde(default)]
    pub cluster_name: Option<String>,

    /// Namespaces to watch; empty watches the whole cluster
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Global reason rules, `[kind:]reason,...`
    #[serde(default)]
    pub skip_event_reasons: Option<String>,

    /// Global level rules, `[kind:]level,...`
    #[serde(default)]
    pub skip_event_levels: Option<String>,

    /// Webhook receiving reports; reports are logged when unset
    #[serde(default)]
    pub report_endpoint: Option<String>,

    #[serde(default = "default_sink_timeout_ms")]
    pub sink_timeout_ms: u64,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_termination_cache_capacity")]
    pub termination_cache_capacity: usize,

    /// Terminations older than this when observed are not reported
    #[serde(default)]
    pub termination_max_age_ms: Option<u64>,

    #[serde(default = "default_event_cache_capacity")]
    pub event_cache_capacity: usize,

    #[serde(default = "default_enrichment_timeout_ms")]
    pub enrichment_timeout_ms: u64,

    #[serde(default = "default_namespace_sync_timeout_secs")]
    pub namespace_sync_timeout_secs: u64,

    /// Grace period for in-flight reports on shutdown
    #[serde(default = "default_shutdown_flush_ms")]
    pub shutdown_flush_ms: u64,
}

fn default_sink_timeout_ms() -> u64 {
    10_000
}

fn default_api_port() -> u16 {
    8080
}

fn default_termination_cache_capacity() -> usize {
    reporter_lib::recency::DEFAULT_TERMINATION_CAPACITY
}

fn default_event_cache_capacity() -> usize {
    reporter_lib::pipeline::DEFAULT_EVENT_CACHE_CAPACITY
}

fn default_enrichment_timeout_ms() -> u64 {
    2_000
}

fn default_namespace_sync_timeout_secs() -> u64 {
    20
}

fn default_shutdown_flush_ms() -> u64 {
    1_000
}

impl ReporterConfig {
    /// Load configuration from an optional file and the environment
    ///
    /// Environment variables override file values.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_from(file, None)
    }

    /// Like [`ReporterConfig::load`] with an explicit environment map
    pub fn load_from(file: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("namespaces")
                .source(env),
        );

        let config = builder.build().context("Failed to read configuration")?;
        config
            .try_deserialize()
            .context("Invalid reporter configuration")
    }

    /// Global skip rules
    pub fn rule_set(&self) -> RuleSet {
        RuleSet::from_config(
            self.skip_event_reasons.as_deref(),
            self.skip_event_levels.as_deref(),
        )
    }

    pub fn report_settings(&self) -> ReportSettings {
        ReportSettings {
            environment: self.environment.clone(),
            cluster: self.cluster_name.clone(),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            termination_capacity: self.termination_cache_capacity,
            termination_max_age: self
                .termination_max_age_ms
                .map(|ms| chrono::Duration::milliseconds(ms as i64)),
            event_cache_capacity: self.event_cache_capacity,
        }
    }

    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            namespaces: self.namespaces.clone(),
            namespace_sync_timeout: Duration::from_secs(self.namespace_sync_timeout_secs),
        }
    }

    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_millis(self.enrichment_timeout_ms)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    pub fn shutdown_flush(&self) -> Duration {
        Duration::from_millis(self.shutdown_flush_ms)
    }
}
