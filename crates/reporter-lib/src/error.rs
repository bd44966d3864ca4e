//! Error type shared by the reporter library

use thiserror::Error;

pub type ReporterResult<T> = Result<T, ReporterError>;

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A watched object lacked a field the engine cannot work without
    #[error("{object} is missing {field}")]
    MissingField {
        object: &'static str,
        field: &'static str,
    },

    #[error("{what} timed out after {timeout_ms}ms")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("report sink rejected report: {0}")]
    Sink(String),

    #[error("{0}")]
    Other(String),
}
