//! Observability and Metrics
//!
//! Counters for monitoring the world socket layer: connection churn,
//! handshake outcomes, framing and protocol faults, keepalive abuse and
//! traffic volume.
//!
//! Uses atomic counters for thread-safe metrics collection. A single
//! [`RealmMetrics`] is shared through `Arc` by the listener and every
//! connection task.

use crate::error::AuthFailure;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for world socket operations
#[derive(Debug)]
pub struct RealmMetrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Connections refused because the server was at capacity
    pub connections_refused: AtomicU64,
    /// Credential submissions processed
    pub handshakes_total: AtomicU64,
    /// Sessions established
    pub handshakes_success: AtomicU64,
    /// Rejections for an unaccepted client build
    pub rejected_version: AtomicU64,
    /// Rejections for an unknown account name
    pub rejected_unknown_account: AtomicU64,
    /// Rejections for an IP-locked account seen from another address
    pub rejected_address_lock: AtomicU64,
    /// Rejections for a wrong session digest
    pub rejected_digest: AtomicU64,
    /// Rejections for an active account or IP ban
    pub rejected_banned: AtomicU64,
    /// Rejections by the minimum security gate
    pub rejected_unavailable: AtomicU64,
    /// Headers with an out-of-range size
    pub framing_errors: AtomicU64,
    /// Opcodes sent in the wrong session state
    pub protocol_violations: AtomicU64,
    /// Short or garbled inline-handled bodies
    pub malformed_packets: AtomicU64,
    /// Connections closed for ping flooding
    pub overspeed_kicks: AtomicU64,
    /// Messages handed to the simulation queue
    pub messages_queued: AtomicU64,
    /// Total messages received
    pub messages_received: AtomicU64,
    /// Total messages sent
    pub messages_sent: AtomicU64,
    /// Total body bytes received
    pub bytes_received: AtomicU64,
    /// Total body bytes sent
    pub bytes_sent: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl RealmMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_refused: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            rejected_version: AtomicU64::new(0),
            rejected_unknown_account: AtomicU64::new(0),
            rejected_address_lock: AtomicU64::new(0),
            rejected_digest: AtomicU64::new(0),
            rejected_banned: AtomicU64::new(0),
            rejected_unavailable: AtomicU64::new(0),
            framing_errors: AtomicU64::new(0),
            protocol_violations: AtomicU64::new(0),
            malformed_packets: AtomicU64::new(0),
            overspeed_kicks: AtomicU64::new(0),
            messages_queued: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a connection turned away at the connection cap
    pub fn connection_refused(&self) {
        self.connections_refused.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a credential submission
    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful handshake
    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected handshake under its reason
    pub fn handshake_rejected(&self, reason: AuthFailure) {
        let counter = match reason {
            AuthFailure::VersionMismatch => &self.rejected_version,
            AuthFailure::UnknownAccount => &self.rejected_unknown_account,
            AuthFailure::AddressLocked => &self.rejected_address_lock,
            AuthFailure::DigestMismatch => &self.rejected_digest,
            AuthFailure::AccountBanned => &self.rejected_banned,
            AuthFailure::ServerUnavailable => &self.rejected_unavailable,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn framing_error(&self) {
        self.framing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_packet(&self) {
        self.malformed_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn overspeed_kick(&self) {
        self.overspeed_kicks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_queued(&self) {
        self.messages_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message received
    pub fn message_received(&self, byte_count: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a message sent
    pub fn message_sent(&self, byte_count: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Total rejected handshakes across all reasons
    pub fn handshakes_rejected(&self) -> u64 {
        [
            &self.rejected_version,
            &self.rejected_unknown_account,
            &self.rejected_address_lock,
            &self.rejected_digest,
            &self.rejected_banned,
            &self.rejected_unavailable,
        ]
        .iter()
        .map(|c| c.load(Ordering::Relaxed))
        .sum()
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_refused: self.connections_refused.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_rejected: self.handshakes_rejected(),
            rejected_version: self.rejected_version.load(Ordering::Relaxed),
            rejected_unknown_account: self.rejected_unknown_account.load(Ordering::Relaxed),
            rejected_address_lock: self.rejected_address_lock.load(Ordering::Relaxed),
            rejected_digest: self.rejected_digest.load(Ordering::Relaxed),
            rejected_banned: self.rejected_banned.load(Ordering::Relaxed),
            rejected_unavailable: self.rejected_unavailable.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            overspeed_kicks: self.overspeed_kicks.load(Ordering::Relaxed),
            messages_queued: self.messages_queued.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            connections_refused = snapshot.connections_refused,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_rejected = snapshot.handshakes_rejected,
            framing_errors = snapshot.framing_errors,
            protocol_violations = snapshot.protocol_violations,
            malformed_packets = snapshot.malformed_packets,
            overspeed_kicks = snapshot.overspeed_kicks,
            messages_queued = snapshot.messages_queued,
            messages_received = snapshot.messages_received,
            messages_sent = snapshot.messages_sent,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            uptime_seconds = snapshot.uptime_seconds,
            "World socket metrics snapshot"
        );
    }
}

impl Default for RealmMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_refused: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_rejected: u64,
    pub rejected_version: u64,
    pub rejected_unknown_account: u64,
    pub rejected_address_lock: u64,
    pub rejected_digest: u64,
    pub rejected_banned: u64,
    pub rejected_unavailable: u64,
    pub framing_errors: u64,
    pub protocol_violations: u64,
    pub malformed_packets: u64,
    pub overspeed_kicks: u64,
    pub messages_queued: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub uptime_seconds: u64,
}
