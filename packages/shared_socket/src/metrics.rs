//! Per-connection-lifetime traffic counters.
//!
//! Each consumer accounts only for its own traffic, even though the
//! underlying connection is shared; counters reset whenever the logical
//! connection closes.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters owned by a single socket client.
#[derive(Debug, Default)]
pub struct SocketMetrics {
    /// Milliseconds spent establishing the current connection.
    pub connect_time_ms: AtomicU64,
    /// Bytes this client has written on the shared connection.
    pub bytes_sent: AtomicU64,
    /// Bytes of inbound traffic this client has observed.
    pub bytes_received: AtomicU64,
}

impl SocketMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connect_time(&self, ms: u64) {
        self.connect_time_ms.store(ms, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Zero everything; called whenever the connection transitions to
    /// closed.
    pub fn reset(&self) {
        self.connect_time_ms.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
    }

    /// Create a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connect_time_ms: self.connect_time_ms.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of a client's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub connect_time_ms: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traffic_accounting() {
        let metrics = SocketMetrics::new();

        metrics.record_sent(5);
        metrics.record_sent(0);
        metrics.record_sent(7);
        metrics.record_received(1024);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_sent, 12);
        assert_eq!(snapshot.bytes_received, 1024);
        assert_eq!(snapshot.connect_time_ms, 0);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let metrics = SocketMetrics::new();
        metrics.record_connect_time(42);
        metrics.record_sent(100);
        metrics.record_received(200);

        metrics.reset();

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                connect_time_ms: 0,
                bytes_sent: 0,
                bytes_received: 0
            }
        );
    }

    #[test]
    fn test_snapshot_serde() {
        let metrics = SocketMetrics::new();
        metrics.record_connect_time(17);
        metrics.record_sent(3);

        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.connect_time_ms, 17);
        assert_eq!(back.bytes_sent, 3);
    }
}
