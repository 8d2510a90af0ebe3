//! Prometheus metrics registry
//!
//! Thin wrapper over a `prometheus::Registry`: components register named
//! counters, gauges and histograms (optionally with constant labels) and the
//! `/metrics` handler renders everything in the text exposition format.

use std::collections::HashMap;
use std::sync::Arc;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metric registration failed: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("metrics output is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Shared handle to the process metrics registry
pub type SharedMetrics = Arc<MetricsRegistry>;

/// Registry of named metrics exposed on `/metrics`
#[derive(Default)]
pub struct MetricsRegistry {
    registry: Registry,
}

fn opts(name: &str, help: &str, const_labels: &[(&str, &str)]) -> Opts {
    Opts::new(name, help).const_labels(labels_map(const_labels))
}

fn labels_map(const_labels: &[(&str, &str)]) -> HashMap<String, String> {
    const_labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_counter(
        &self,
        name: &str,
        help: &str,
        const_labels: &[(&str, &str)],
    ) -> Result<IntCounter, MetricsError> {
        let counter = IntCounter::with_opts(opts(name, help, const_labels))?;
        self.registry.register(Box::new(counter.clone()))?;
        Ok(counter)
    }

    pub fn register_counter_vec(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<IntCounterVec, MetricsError> {
        let counter = IntCounterVec::new(Opts::new(name, help), label_names)?;
        self.registry.register(Box::new(counter.clone()))?;
        Ok(counter)
    }

    pub fn register_gauge(
        &self,
        name: &str,
        help: &str,
        const_labels: &[(&str, &str)],
    ) -> Result<IntGauge, MetricsError> {
        let gauge = IntGauge::with_opts(opts(name, help, const_labels))?;
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(gauge)
    }

    pub fn register_gauge_vec(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<IntGaugeVec, MetricsError> {
        let gauge = IntGaugeVec::new(Opts::new(name, help), label_names)?;
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(gauge)
    }

    /// Register a histogram; `buckets` of `None` uses the prometheus defaults
    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        const_labels: &[(&str, &str)],
        buckets: Option<Vec<f64>>,
    ) -> Result<Histogram, MetricsError> {
        let mut hopts = HistogramOpts::new(name, help).const_labels(labels_map(const_labels));
        if let Some(buckets) = buckets {
            hopts = hopts.buckets(buckets);
        }
        let histogram = Histogram::with_opts(hopts)?;
        self.registry.register(Box::new(histogram.clone()))?;
        Ok(histogram)
    }

    /// Render every registered metric in Prometheus text format
    pub fn encode(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Create the shared metrics registry
pub fn create_metrics() -> SharedMetrics {
    Arc::new(MetricsRegistry::new())
}
