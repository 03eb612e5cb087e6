//! Prometheus Metric Source Adapter
//!
//! Implements the `MetricSource` port with a fixed PromQL query.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::ports::{MetricSample, MetricSource};
use crate::error::Result;
use crate::metrics::MetricsWatcher;

/// One trigger's query bound to a Prometheus server.
pub struct PrometheusMetricSource {
    watcher: Arc<MetricsWatcher>,
    query: String,
}

impl PrometheusMetricSource {
    pub fn new(watcher: Arc<MetricsWatcher>, query: impl Into<String>) -> Self {
        Self {
            watcher,
            query: query.into(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Get a reference to the underlying watcher.
    pub fn watcher(&self) -> &MetricsWatcher {
        &self.watcher
    }
}

impl std::fmt::Debug for PrometheusMetricSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetricSource")
            .field("prometheus_url", &self.watcher.prometheus_url())
            .field("query", &self.query)
            .finish()
    }
}

#[async_trait]
impl MetricSource for PrometheusMetricSource {
    async fn get_value(&self) -> Result<MetricSample> {
        self.watcher.query(&self.query).await
    }

    fn describe(&self) -> String {
        format!("prometheus[{}]", self.query)
    }
}
