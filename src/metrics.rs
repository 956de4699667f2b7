//! Prometheus counters for relayed requests.

use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};

/// How a relayed stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Sentinel written.
    Completed,
    /// Upstream failed after headers were committed.
    Failed,
    /// Client went away before the stream ended.
    Disconnected,
    /// Upstream failed before the first byte; answered with an error object.
    Rejected,
}

impl StreamOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamOutcome::Completed => "completed",
            StreamOutcome::Failed => "failed",
            StreamOutcome::Disconnected => "disconnected",
            StreamOutcome::Rejected => "rejected",
        }
    }
}

/// Process-wide relay counters. Cloning shares the underlying registry.
#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,
    requests: IntCounterVec,
    streams: IntCounterVec,
}

impl RelayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("relay_requests_total", "Chat requests accepted, by mode"),
            &["mode"],
        )?;
        let streams = IntCounterVec::new(
            Opts::new("relay_streams_total", "Relayed streams, by outcome"),
            &["outcome"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(streams.clone()))?;

        Ok(Self {
            registry,
            requests,
            streams,
        })
    }

    pub fn record_request(&self, streaming: bool) {
        let mode = if streaming { "stream" } else { "single" };
        self.requests.with_label_values(&[mode]).inc();
    }

    pub fn record_stream(&self, outcome: StreamOutcome) {
        self.streams.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn stream_count(&self, outcome: StreamOutcome) -> u64 {
        self.streams.with_label_values(&[outcome.as_str()]).get()
    }

    /// Render all counters in the text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
