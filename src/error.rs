//! Error types for the scaledrive operator

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the scaledrive operator
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Finalizer handling failed
    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid scaler configuration. Never retried.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    // =========================================================================
    // Metric Source Errors
    // =========================================================================
    /// Prometheus connection error
    #[error("Prometheus connection error: {0}")]
    PrometheusConnection(#[source] reqwest::Error),

    /// Prometheus query error
    #[error("Prometheus query error: {0}")]
    PrometheusQuery(String),

    /// Prometheus response parse error
    #[error("Failed to parse Prometheus response: {0}")]
    PrometheusResponseParse(String),

    /// Transient metric failure (network, upstream unavailable)
    #[error("Transient metric error: {0}")]
    TransientMetric(String),

    /// Metric query exceeded its time budget
    #[error("Metric query timed out after {0:?}")]
    MetricTimeout(Duration),

    // =========================================================================
    // Scale Target Errors
    // =========================================================================
    /// Target was mutated between read and write
    #[error("Write conflict on scale target {target}")]
    WriteConflict { target: String },

    /// Scale target does not exist
    #[error("Scale target not found: {kind}/{name}")]
    ScaleTargetNotFound { kind: String, name: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the operation that produced this error may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::PrometheusConnection(_)
            | Error::TransientMetric(_)
            | Error::MetricTimeout(_)
            | Error::WriteConflict { .. }
            | Error::Io(_) => true,
            Error::Kube(kube::Error::Api(e)) => e.code == 409 || e.code == 429 || e.code >= 500,
            Error::Kube(_) => true,
            Error::InvalidConfiguration(_)
            | Error::DurationParse(_)
            | Error::PrometheusQuery(_)
            | Error::PrometheusResponseParse(_)
            | Error::ScaleTargetNotFound { .. }
            | Error::Finalizer(_)
            | Error::Internal(_) => false,
        }
    }

    /// Whether this error should stop a ScaledObject from being served.
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(self, Error::InvalidConfiguration(_) | Error::DurationParse(_))
    }
}
