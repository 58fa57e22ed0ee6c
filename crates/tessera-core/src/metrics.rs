//! Metrics sink injected into coordinator and agent components
//!
//! Components never consult a global switch; they hold an `Arc<dyn MetricsSink>`
//! and the default is [`NoopMetrics`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub trait MetricsSink: Send + Sync {
    /// Add `value` to a counter
    fn increment(&self, name: &str, value: u64);

    /// Set a gauge
    fn gauge(&self, name: &str, value: f64);

    /// Record one observation (durations, sizes)
    fn observe(&self, name: &str, value: f64);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str, _value: u64) {}

    fn gauge(&self, _name: &str, _value: f64) {}

    fn observe(&self, _name: &str, _value: f64) {}
}

/// Shared no-op sink
pub fn noop() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetrics)
}

/// Keeps the latest values in memory
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    counters: Mutex<BTreeMap<String, u64>>,
    gauges: Mutex<BTreeMap<String, f64>>,
    observations: Mutex<BTreeMap<String, Vec<f64>>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .map(|c| c.get(name).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges.lock().ok().and_then(|g| g.get(name).copied())
    }

    pub fn observation_count(&self, name: &str) -> usize {
        self.observations
            .lock()
            .map(|o| o.get(name).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

impl MetricsSink for MemoryMetrics {
    fn increment(&self, name: &str, value: u64) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(name.to_string()).or_insert(0) += value;
        }
    }

    fn gauge(&self, name: &str, value: f64) {
        if let Ok(mut gauges) = self.gauges.lock() {
            gauges.insert(name.to_string(), value);
        }
    }

    fn observe(&self, name: &str, value: f64) {
        if let Ok(mut observations) = self.observations.lock() {
            observations.entry(name.to_string()).or_default().push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_metrics() {
        let metrics = MemoryMetrics::new();
        metrics.increment("signing_success", 1);
        metrics.increment("signing_success", 2);
        metrics.gauge("de_left", 12.0);
        metrics.observe("process_time", 0.5);

        assert_eq!(metrics.counter("signing_success"), 3);
        assert_eq!(metrics.counter("missing"), 0);
        assert_eq!(metrics.gauge_value("de_left"), Some(12.0));
        assert_eq!(metrics.observation_count("process_time"), 1);
    }

    #[test]
    fn test_noop_sink_is_object_safe() {
        let sink = noop();
        sink.increment("x", 1);
        sink.gauge("y", 1.0);
        sink.observe("z", 1.0);
    }
}
