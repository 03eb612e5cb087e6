//! Metrics Watcher - "The Eyes"
//!
//! Runs instant PromQL queries against a Prometheus server and turns the
//! first sample of the result vector into a [`MetricSample`].

use crate::domain::ports::MetricSample;
use crate::error::{Error, Result};
use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the metrics watcher
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Prometheus server URL
    pub prometheus_url: String,

    /// HTTP request timeout
    pub query_timeout: Duration,

    /// Enable caching
    pub cache_enabled: bool,

    /// Cache TTL. Keep below the shortest polling interval.
    pub cache_ttl: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prometheus_url: "http://prometheus.monitoring.svc.cluster.local:9090".to_string(),
            query_timeout: Duration::from_secs(10),
            cache_enabled: false,
            cache_ttl: Duration::from_secs(5),
        }
    }
}

impl MetricsConfig {
    /// Same settings against another server.
    pub fn with_url(&self, prometheus_url: impl Into<String>) -> Self {
        Self {
            prometheus_url: prometheus_url.into(),
            ..self.clone()
        }
    }
}

// =============================================================================
// Prometheus Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct PrometheusResponse {
    status: String,
    #[serde(default)]
    data: Option<PrometheusData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrometheusData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<PrometheusResult>,
}

#[derive(Debug, Deserialize)]
struct PrometheusResult {
    #[allow(dead_code)]
    metric: serde_json::Value,
    #[serde(default)]
    value: Option<(f64, String)>,
}

/// Extract a single value from an instant-query response.
///
/// An empty vector reads as 0. NaN and Inf read as 0.
fn parse_instant_value(response: PrometheusResponse, query: &str) -> Result<MetricSample> {
    if response.status != "success" {
        return Err(Error::PrometheusQuery(format!(
            "Prometheus returned status {}: {}",
            response.status,
            response.error.unwrap_or_default()
        )));
    }

    let data = response
        .data
        .ok_or_else(|| Error::PrometheusResponseParse("missing data".into()))?;

    if data.result_type != "vector" {
        return Err(Error::PrometheusQuery(format!(
            "query '{}' returned {} instead of an instant vector",
            query, data.result_type
        )));
    }

    match data.result.as_slice() {
        [] => {
            debug!("Empty result for '{}', reading as 0", query);
            Ok(MetricSample::new(0.0))
        }
        [single] => {
            let (ts, value_str) = single
                .value
                .as_ref()
                .ok_or_else(|| Error::PrometheusResponseParse("sample without value".into()))?;

            let value: f64 = value_str
                .parse()
                .map_err(|_| Error::PrometheusResponseParse("Invalid float value".into()))?;

            // Filter out NaN and Inf
            let value = if value.is_finite() { value } else { 0.0 };

            let timestamp = Utc
                .timestamp_millis_opt((ts * 1000.0) as i64)
                .single()
                .unwrap_or_else(Utc::now);

            Ok(MetricSample::at(value, timestamp))
        }
        many => Err(Error::PrometheusQuery(format!(
            "query '{}' returned {} series, expected one",
            query,
            many.len()
        ))),
    }
}

/// Server-side failures are retried; rejected queries are not.
fn status_error(status: reqwest::StatusCode) -> Error {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Error::TransientMetric(format!("Prometheus unavailable: {}", status))
    } else {
        Error::PrometheusQuery(format!("Query failed with status: {}", status))
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    sample: MetricSample,
    expires_at: std::time::Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        std::time::Instant::now() > self.expires_at
    }
}

// =============================================================================
// Metrics Watcher
// =============================================================================

/// Queries a single Prometheus server
pub struct MetricsWatcher {
    config: MetricsConfig,
    client: Client,
    cache: DashMap<String, CacheEntry>,
    healthy: RwLock<bool>,
}

impl std::fmt::Debug for MetricsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsWatcher")
            .field("prometheus_url", &self.config.prometheus_url)
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

impl MetricsWatcher {
    /// Create a new metrics watcher
    pub fn new(config: MetricsConfig) -> Result<Arc<Self>> {
        let client = Client::builder()
            .timeout(config.query_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Arc::new(Self {
            config,
            client,
            cache: DashMap::new(),
            healthy: RwLock::new(true),
        }))
    }

    pub fn prometheus_url(&self) -> &str {
        &self.config.prometheus_url
    }

    /// Check if Prometheus is reachable
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<()> {
        let url = format!(
            "{}/-/healthy",
            self.config.prometheus_url.trim_end_matches('/')
        );

        let response = self.client.get(&url).send().await.map_err(|e| {
            *self.healthy.write() = false;
            Error::PrometheusConnection(e)
        })?;

        if response.status().is_success() {
            *self.healthy.write() = true;
            Ok(())
        } else {
            *self.healthy.write() = false;
            Err(Error::PrometheusQuery(format!(
                "Health check failed: {}",
                response.status()
            )))
        }
    }

    /// Result of the last health check or query
    pub fn is_healthy(&self) -> bool {
        *self.healthy.read()
    }

    /// Run an instant query, serving from cache when enabled.
    #[instrument(skip(self))]
    pub async fn query(&self, query: &str) -> Result<MetricSample> {
        if self.config.cache_enabled {
            if let Some(entry) = self.cache.get(query) {
                if !entry.is_expired() {
                    debug!("Cache hit for '{}'", query);
                    return Ok(entry.sample.clone());
                }
            }
        }

        let sample = self.query_instant(query).await?;

        if self.config.cache_enabled {
            self.cache.insert(
                query.to_string(),
                CacheEntry {
                    sample: sample.clone(),
                    expires_at: std::time::Instant::now() + self.config.cache_ttl,
                },
            );
        }

        Ok(sample)
    }

    async fn query_instant(&self, query: &str) -> Result<MetricSample> {
        let url = format!(
            "{}/api/v1/query?query={}",
            self.config.prometheus_url.trim_end_matches('/'),
            urlencoding::encode(query)
        );

        debug!("Querying Prometheus: {}", query);

        let response = self.client.get(&url).send().await.map_err(|e| {
            *self.healthy.write() = false;
            if e.is_timeout() {
                Error::MetricTimeout(self.config.query_timeout)
            } else {
                Error::PrometheusConnection(e)
            }
        })?;
        *self.healthy.write() = true;

        if !response.status().is_success() {
            return Err(status_error(response.status()));
        }

        let prom_response: PrometheusResponse = response
            .json()
            .await
            .map_err(|e| Error::PrometheusResponseParse(e.to_string()))?;

        parse_instant_value(prom_response, query)
    }
}
