//! Prometheus metrics for consensus

use crate::error::Result;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

const NAMESPACE: &str = "depchain";

/// Consensus metrics exposed to Prometheus
pub struct ConsensusMetrics {
    /// Values proposed by this replica as leader
    pub proposals: IntCounter,

    /// Epochs decided
    pub decisions: IntCounter,

    /// Epochs aborted
    pub aborts: IntCounter,

    /// Protocol and client messages handled
    pub messages_handled: IntCounter,

    /// Messages dropped (malformed, stale, rejected, unknown)
    pub messages_dropped: IntCounter,

    /// Messages put back in the inbox while an epoch was in progress
    pub messages_deferred: IntCounter,

    /// Byzantine violations detected
    pub byzantine_violations: IntCounter,

    /// Highest epoch started
    pub current_epoch: IntGauge,

    /// Messages waiting across all inboxes
    pub inbox_depth: IntGauge,

    /// Time from epoch start to decision in milliseconds (histogram)
    pub decision_time: Histogram,

    /// Prometheus registry
    registry: Arc<Registry>,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl ConsensusMetrics {
    /// Create new consensus metrics in a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let proposals = counter(&registry, "consensus_proposals_total", "Values proposed")?;
        let decisions = counter(&registry, "consensus_decisions_total", "Epochs decided")?;
        let aborts = counter(&registry, "consensus_aborts_total", "Epochs aborted")?;
        let messages_handled = counter(
            &registry,
            "consensus_messages_handled_total",
            "Messages handled",
        )?;
        let messages_dropped = counter(
            &registry,
            "consensus_messages_dropped_total",
            "Messages dropped",
        )?;
        let messages_deferred = counter(
            &registry,
            "consensus_messages_deferred_total",
            "Messages deferred while an epoch was in progress",
        )?;
        let byzantine_violations = counter(
            &registry,
            "consensus_byzantine_violations_total",
            "Total Byzantine violations detected",
        )?;
        let current_epoch = gauge(&registry, "consensus_current_epoch", "Highest epoch started")?;
        let inbox_depth = gauge(
            &registry,
            "consensus_inbox_depth",
            "Messages waiting across all inboxes",
        )?;

        let decision_time = Histogram::with_opts(
            HistogramOpts::new(
                "consensus_decision_time_ms",
                "Epoch decision time in milliseconds",
            )
            .namespace(NAMESPACE)
            .buckets(vec![
                10.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
            ]),
        )?;
        registry.register(Box::new(decision_time.clone()))?;

        Ok(Self {
            proposals,
            decisions,
            aborts,
            messages_handled,
            messages_dropped,
            messages_deferred,
            byzantine_violations,
            current_epoch,
            inbox_depth,
            decision_time,
            registry: Arc::new(registry),
        })
    }

    /// Get Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::error::ConsensusError::Metrics(e.to_string()))
    }
}
