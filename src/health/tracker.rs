//! Per-server health and transfer counters.
//!
//! # Responsibilities
//! - Count connects, disconnects and typed errors
//! - Maintain the continuous-error streak used by selection and affinity
//! - Track connect latency and byte totals
//! - Provide administrative resets and serializable snapshots
//!
//! Every counter is an independent atomic, so recording on one server never
//! contends with another and never needs a lock.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::observability::metrics;

/// Category of a failed connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Upstream refused or reset the connection.
    Connect,
    /// Upstream did not answer in time.
    Timeout,
    /// Upstream answered with data that failed to decode.
    Decode,
    /// Upstream closed without sending anything.
    Empty,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connect => "connect",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Decode => "decode",
            ErrorKind::Empty => "empty",
        }
    }
}

/// Transfer direction, from the local client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Upload,
    Download,
}

/// Health counters of a single server.
#[derive(Debug, Default)]
pub struct ServerHealth {
    total_connects: AtomicU64,
    total_disconnects: AtomicU64,

    error_connect: AtomicU64,
    error_timeout: AtomicU64,
    error_decode: AtomicU64,
    error_empty: AtomicU64,
    /// Lifetime error count, all kinds.
    error_total: AtomicU64,
    /// Consecutive errors since the last successful connect.
    error_streak: AtomicU64,

    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,

    upload_bytes: AtomicU64,
    download_bytes: AtomicU64,
    max_upload_speed: AtomicU64,
    max_download_speed: AtomicU64,
}

impl ServerHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection to the server was established.
    pub fn record_connect(&self) {
        self.total_connects.fetch_add(1, Ordering::Relaxed);
        self.error_streak.store(0, Ordering::Relaxed);
    }

    /// A connection to the server was closed.
    pub fn record_disconnect(&self) {
        self.total_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// A connection attempt failed.
    pub fn record_error(&self, kind: ErrorKind) {
        let counter = match kind {
            ErrorKind::Connect => &self.error_connect,
            ErrorKind::Timeout => &self.error_timeout,
            ErrorKind::Decode => &self.error_decode,
            ErrorKind::Empty => &self.error_empty,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.error_total.fetch_add(1, Ordering::Relaxed);
        self.error_streak.fetch_add(1, Ordering::Relaxed);
        metrics::record_server_error(kind.as_str());
    }

    /// Record the time it took to establish a connection.
    pub fn record_latency(&self, ms: u64) {
        self.latency_total_ms.fetch_add(ms, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Add transferred bytes to the running totals.
    pub fn record_bytes(&self, direction: Direction, size: u64) {
        match direction {
            Direction::Upload => self.upload_bytes.fetch_add(size, Ordering::Relaxed),
            Direction::Download => self.download_bytes.fetch_add(size, Ordering::Relaxed),
        };
    }

    /// Record an observed transfer rate; only the maximum is kept.
    pub fn record_speed(&self, direction: Direction, bytes_per_sec: u64) {
        match direction {
            Direction::Upload => self.max_upload_speed.fetch_max(bytes_per_sec, Ordering::Relaxed),
            Direction::Download => self.max_download_speed.fetch_max(bytes_per_sec, Ordering::Relaxed),
        };
    }

    pub fn continuous_errors(&self) -> u64 {
        self.error_streak.load(Ordering::Relaxed)
    }

    /// Mean connect latency, `None` until the first sample.
    pub fn avg_latency_ms(&self) -> Option<u64> {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return None;
        }
        Some(self.latency_total_ms.load(Ordering::Relaxed) / samples)
    }

    pub fn active_connections(&self) -> u64 {
        self.total_connects
            .load(Ordering::Relaxed)
            .saturating_sub(self.total_disconnects.load(Ordering::Relaxed))
    }

    // --- Administrative resets ---

    /// Zero all error counters, including the streak.
    pub fn clear_error(&self) {
        self.error_connect.store(0, Ordering::Relaxed);
        self.error_timeout.store(0, Ordering::Relaxed);
        self.error_decode.store(0, Ordering::Relaxed);
        self.error_empty.store(0, Ordering::Relaxed);
        self.error_total.store(0, Ordering::Relaxed);
        self.error_streak.store(0, Ordering::Relaxed);
    }

    pub fn clear_max_speed(&self) {
        self.max_upload_speed.store(0, Ordering::Relaxed);
        self.max_download_speed.store(0, Ordering::Relaxed);
    }

    /// Zero the byte totals.
    pub fn clear_total(&self) {
        self.upload_bytes.store(0, Ordering::Relaxed);
        self.download_bytes.store(0, Ordering::Relaxed);
    }

    /// Zero every counter.
    pub fn clear(&self) {
        self.clear_error();
        self.clear_max_speed();
        self.clear_total();
        self.latency_total_ms.store(0, Ordering::Relaxed);
        self.latency_samples.store(0, Ordering::Relaxed);
        // Keep connects == disconnects so live connections don't go negative.
        let active = self.active_connections();
        self.total_connects.store(active, Ordering::Relaxed);
        self.total_disconnects.store(0, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            total_connects: self.total_connects.load(Ordering::Relaxed),
            total_disconnects: self.total_disconnects.load(Ordering::Relaxed),
            error_connect: self.error_connect.load(Ordering::Relaxed),
            error_timeout: self.error_timeout.load(Ordering::Relaxed),
            error_decode: self.error_decode.load(Ordering::Relaxed),
            error_empty: self.error_empty.load(Ordering::Relaxed),
            error_total: self.error_total.load(Ordering::Relaxed),
            error_streak: self.error_streak.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            latency_total_ms: self.latency_total_ms.load(Ordering::Relaxed),
            latency_samples: self.latency_samples.load(Ordering::Relaxed),
            upload_bytes: self.upload_bytes.load(Ordering::Relaxed),
            download_bytes: self.download_bytes.load(Ordering::Relaxed),
            max_upload_speed: self.max_upload_speed.load(Ordering::Relaxed),
            max_download_speed: self.max_download_speed.load(Ordering::Relaxed),
        }
    }

    /// Overwrite counters from a persisted snapshot.
    ///
    /// Connect/disconnect counts are not restored: there are no live
    /// connections after a restart.
    pub fn restore(&self, snap: &HealthSnapshot) {
        self.error_connect.store(snap.error_connect, Ordering::Relaxed);
        self.error_timeout.store(snap.error_timeout, Ordering::Relaxed);
        self.error_decode.store(snap.error_decode, Ordering::Relaxed);
        self.error_empty.store(snap.error_empty, Ordering::Relaxed);
        self.error_total.store(snap.error_total, Ordering::Relaxed);
        self.error_streak.store(snap.error_streak, Ordering::Relaxed);
        self.latency_total_ms.store(snap.latency_total_ms, Ordering::Relaxed);
        self.latency_samples.store(snap.latency_samples, Ordering::Relaxed);
        self.upload_bytes.store(snap.upload_bytes, Ordering::Relaxed);
        self.download_bytes.store(snap.download_bytes, Ordering::Relaxed);
        self.max_upload_speed.store(snap.max_upload_speed, Ordering::Relaxed);
        self.max_download_speed.store(snap.max_download_speed, Ordering::Relaxed);
    }
}

/// Serializable view of [`ServerHealth`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSnapshot {
    pub total_connects: u64,
    pub total_disconnects: u64,
    pub error_connect: u64,
    pub error_timeout: u64,
    pub error_decode: u64,
    pub error_empty: u64,
    pub error_total: u64,
    pub error_streak: u64,
    pub avg_latency_ms: Option<u64>,
    pub latency_total_ms: u64,
    pub latency_samples: u64,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub max_upload_speed: u64,
    pub max_download_speed: u64,
}
