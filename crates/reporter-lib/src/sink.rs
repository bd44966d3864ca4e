//! Report delivery backends

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{error, info, warn};

use crate::error::{ReporterError, ReporterResult};
use crate::report::{Report, ReportLevel};

/// Default request timeout for webhook delivery
pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(10);

/// Destination for assembled reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn send(&self, report: &Report) -> ReporterResult<()>;

    /// Short name for logs and health output
    fn name(&self) -> &'static str;
}

/// Posts each report as JSON to an HTTP endpoint
pub struct WebhookSink {
    client: Client,
    endpoint: String,
}

impl WebhookSink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> ReporterResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ReportSink for WebhookSink {
    async fn send(&self, report: &Report) -> ReporterResult<()> {
        let response = self.client.post(&self.endpoint).json(report).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReporterError::Sink(format!("{status}: {body}")));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Writes reports to the process log
///
/// Used when no endpoint is configured.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl ReportSink for LogSink {
    async fn send(&self, report: &Report) -> ReporterResult<()> {
        let payload = serde_json::to_string(report)?;
        match report.level {
            ReportLevel::Error => error!(target: "event_reporter::report", report = %payload),
            ReportLevel::Warning => warn!(target: "event_reporter::report", report = %payload),
            ReportLevel::Info => info!(target: "event_reporter::report", report = %payload),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
