//! Session counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters owned by one session.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    errors: AtomicU64,
    reconnects: AtomicU64,
    function_calls: AtomicU64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_function_call(&self) {
        self.function_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of a session's metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub errors: u64,
    pub reconnects: u64,
    pub function_calls: u64,
    pub function_replays: u64,
    pub avg_function_latency_ms: f64,
    pub ingress_dropped: u64,
    pub egress_dropped: u64,
    pub ingress_rejected: u64,
    pub egress_rejected: u64,
    pub uptime_ms: u64,
}

impl SessionMetrics {
    /// Copy the plain counters into a snapshot; the session fills in the rest.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            function_calls: self.function_calls.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let metrics = SessionMetrics::new();
        metrics.record_sent();
        metrics.record_sent();
        metrics.record_received();
        metrics.record_reconnect();
        metrics.record_error();

        let snap = metrics.snapshot();
        assert_eq!(snap.messages_sent, 2);
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.reconnects, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.function_calls, 0);
    }
}
