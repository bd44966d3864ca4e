//! Event reporter - forwards cluster warnings and container crashes
//!
//! Watches namespaces, events and pods, suppresses noise according to
//! skip rules, and hands structured reports to the configured sink.

use anyhow::{Context, Result};
use clap::Parser;
use event_reporter::{api, config::ReporterConfig};
use reporter_lib::{
    cluster::{make_client, KubePodFetcher},
    enrich::HandlerRegistry,
    health::HealthRegistry,
    observability::{ReporterMetrics, StructuredLogger},
    sink::{LogSink, ReportSink, WebhookSink},
    skip::NamespaceRules,
    ReportPipeline, WatchSupervisor,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const REPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "event-reporter", version, about = "Report Kubernetes events and container crashes")]
struct Cli {
    /// Path to kubeconfig file (in-cluster config or default location if not set)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Optional configuration file (TOML, YAML or JSON)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = Cli::parse();

    let config = ReporterConfig::load(cli.config.as_deref())?;
    let cluster = config.cluster_name.clone().unwrap_or_default();

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    // Registers the metric families before the first scrape
    let _metrics = ReporterMetrics::new();

    let logger = StructuredLogger::new(cluster.as_str());
    logger.log_startup(REPORTER_VERSION, &config.namespaces);

    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    // Serve health checks during startup so readiness reports the pending sync
    let app_state = Arc::new(api::AppState::new(health_registry.clone()));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    let client = make_client(cli.kubeconfig.as_deref())
        .await
        .context("Failed to create Kubernetes client")?;

    let sink: Arc<dyn ReportSink> = match config.report_endpoint.as_deref() {
        Some(endpoint) if !endpoint.is_empty() => {
            info!(endpoint = %endpoint, "Delivering reports to webhook");
            Arc::new(
                WebhookSink::new(endpoint, config.sink_timeout())
                    .context("Failed to create report sink")?,
            )
        }
        _ => {
            warn!("No report endpoint configured, reports are only logged");
            Arc::new(LogSink)
        }
    };

    let handlers = HandlerRegistry::with_builtin(
        Arc::new(KubePodFetcher::new(client.clone())),
        config.enrichment_timeout(),
    );

    let pipeline = Arc::new(
        ReportPipeline::new(
            config.report_settings(),
            Arc::new(NamespaceRules::new(config.rule_set())),
            handlers,
            sink,
            config.pipeline_config(),
        )
        .with_health(health_registry.clone()),
    );

    let supervisor = WatchSupervisor::new(
        client,
        pipeline,
        health_registry.clone(),
        config.watch_settings(),
    );
    let watch_handles = supervisor
        .start(&shutdown_tx)
        .await
        .context("Failed to start watchers")?;

    let reason = wait_for_signal().await?;
    logger.log_shutdown(reason);
    health_registry.set_synced(false).await;

    // Receivers may already be gone if a task exited on its own
    let _ = shutdown_tx.send(());

    let drained = tokio::time::timeout(config.shutdown_flush(), async {
        for handle in watch_handles {
            let _ = handle.await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            flush_ms = config.shutdown_flush_ms,
            "Watchers still busy after flush delay"
        );
    }

    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for SIGINT")?;
                Ok("SIGINT received")
            }
            _ = sigterm.recv() => Ok("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for SIGINT")?;
        Ok("SIGINT received")
    }
}
