//! Observability and Metrics
//!
//! Process-wide counters for sessions, migrations and fields.
//!
//! Uses atomic counters so hot paths never take a lock to record an event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Global metrics collector for server operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Total packets sent
    pub packets_sent: AtomicU64,
    /// Total packets received
    pub packets_received: AtomicU64,
    /// Total payload bytes sent
    pub bytes_sent: AtomicU64,
    /// Total payload bytes received
    pub bytes_received: AtomicU64,
    /// Migration records created
    pub migrations_created: AtomicU64,
    /// Migration records consumed successfully
    pub migrations_consumed: AtomicU64,
    /// Migrate-in attempts rejected
    pub migrations_rejected: AtomicU64,
    /// Expired records removed by the sweep
    pub migrations_expired: AtomicU64,
    /// Fields started and published
    pub fields_created: AtomicU64,
    /// Fields built by a losing creation race and discarded
    pub fields_discarded: AtomicU64,
    /// Ticks that faulted and were contained
    pub tick_faults: AtomicU64,
    /// Script executions that ended in an error or fault
    pub script_faults: AtomicU64,
    /// Protocol errors that dropped a connection
    pub protocol_errors: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            migrations_created: AtomicU64::new(0),
            migrations_consumed: AtomicU64::new(0),
            migrations_rejected: AtomicU64::new(0),
            migrations_expired: AtomicU64::new(0),
            fields_created: AtomicU64::new(0),
            fields_discarded: AtomicU64::new(0),
            tick_faults: AtomicU64::new(0),
            script_faults: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn packet_sent(&self, byte_count: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn packet_received(&self, byte_count: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn migration_created(&self) {
        self.migrations_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn migration_consumed(&self) {
        self.migrations_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn migration_rejected(&self) {
        self.migrations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn migrations_swept(&self, count: usize) {
        self.migrations_expired
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn field_created(&self) {
        self.fields_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn field_discarded(&self) {
        self.fields_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_fault(&self) {
        self.tick_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn script_fault(&self) {
        self.script_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            migrations_created: self.migrations_created.load(Ordering::Relaxed),
            migrations_consumed: self.migrations_consumed.load(Ordering::Relaxed),
            migrations_rejected: self.migrations_rejected.load(Ordering::Relaxed),
            migrations_expired: self.migrations_expired.load(Ordering::Relaxed),
            fields_created: self.fields_created.load(Ordering::Relaxed),
            fields_discarded: self.fields_discarded.load(Ordering::Relaxed),
            tick_faults: self.tick_faults.load(Ordering::Relaxed),
            script_faults: self.script_faults.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            migrations_created = snapshot.migrations_created,
            migrations_consumed = snapshot.migrations_consumed,
            migrations_rejected = snapshot.migrations_rejected,
            migrations_expired = snapshot.migrations_expired,
            fields_created = snapshot.fields_created,
            fields_discarded = snapshot.fields_discarded,
            tick_faults = snapshot.tick_faults,
            script_faults = snapshot.script_faults,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Server metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub migrations_created: u64,
    pub migrations_consumed: u64,
    pub migrations_rejected: u64,
    pub migrations_expired: u64,
    pub fields_created: u64,
    pub fields_discarded: u64,
    pub tick_faults: u64,
    pub script_faults: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Log a snapshot every `interval` until `shutdown` fires.
pub fn spawn_reporter(interval: Duration, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => global_metrics().log_metrics(),
            }
        }
        debug!("Metrics reporter stopped");
    })
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_feed_snapshot() {
        let metrics = Metrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        metrics.packet_sent(10);
        metrics.migrations_swept(3);
        let snap = metrics.snapshot();
        assert_eq!(snap.connections_total, 2);
        assert_eq!(snap.connections_active, 1);
        assert_eq!(snap.bytes_sent, 10);
        assert_eq!(snap.migrations_expired, 3);
    }
}
