//! Prometheus metrics for the gateway.
//!
//! One [`Metrics`] value is registered at boot and shared with the service
//! and every binding. The engine reports typed errors by code and operation;
//! bindings report request counts, latencies, and active stream gauges.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
};

use crate::error::ErrorCode;

#[derive(Clone)]
pub struct Metrics {
    request_total: IntCounterVec,
    request_latency: HistogramVec,
    request_errors: IntCounterVec,
    active_streams: IntGaugeVec,
}

impl Metrics {
    /// Create and register the gateway metric families.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let request_total = IntCounterVec::new(
            Opts::new(
                "http_requests_total",
                "Total number of HTTP requests processed by migd.",
            )
            .namespace("mig")
            .subsystem("gateway"),
            &["method", "path", "status"],
        )?;
        let request_latency = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "Request duration by route.")
                .namespace("mig")
                .subsystem("gateway"),
            &["method", "path"],
        )?;
        let request_errors = IntCounterVec::new(
            Opts::new("errors_total", "MIG errors emitted by code.")
                .namespace("mig")
                .subsystem("gateway"),
            &["code", "operation"],
        )?;
        let active_streams = IntGaugeVec::new(
            Opts::new("active_streams", "Active stream count by type.")
                .namespace("mig")
                .subsystem("gateway"),
            &["type"],
        )?;

        registry.register(Box::new(request_total.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;
        registry.register(Box::new(request_errors.clone()))?;
        registry.register(Box::new(active_streams.clone()))?;

        Ok(Self {
            request_total,
            request_latency,
            request_errors,
            active_streams,
        })
    }

    pub fn observe_request(&self, method: &str, path: &str, status: u16, seconds: f64) {
        self.request_total
            .with_label_values(&[method, path, &status.to_string()])
            .inc();
        self.request_latency
            .with_label_values(&[method, path])
            .observe(seconds);
    }

    pub fn record_error(&self, code: ErrorCode, operation: &str) {
        let operation = if operation.is_empty() {
            "unknown"
        } else {
            operation
        };
        self.request_errors
            .with_label_values(&[code.as_str(), operation])
            .inc();
    }

    pub fn inc_active_stream(&self, stream_type: &str) {
        self.active_streams.with_label_values(&[stream_type]).inc();
    }

    pub fn dec_active_stream(&self, stream_type: &str) {
        self.active_streams.with_label_values(&[stream_type]).dec();
    }
}

/// RAII guard that keeps an `active_streams` gauge honest across early
/// returns and disconnects.
pub struct StreamGauge {
    metrics: Option<Metrics>,
    stream_type: &'static str,
}

impl StreamGauge {
    pub fn new(metrics: Option<Metrics>, stream_type: &'static str) -> Self {
        if let Some(m) = &metrics {
            m.inc_active_stream(stream_type);
        }
        Self {
            metrics,
            stream_type,
        }
    }
}

impl Drop for StreamGauge {
    fn drop(&mut self) {
        if let Some(m) = &self.metrics {
            m.dec_active_stream(self.stream_type);
        }
    }
}
