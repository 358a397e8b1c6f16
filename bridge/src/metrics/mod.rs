//! Metrics sink.
//!
//! The core consumes "a metrics sink"; exporting those
//! numbers (Prometheus text format, a `/metrics` endpoint) is out of scope.
//! `MetricsSink` is the seam; `InMemoryMetrics` is a standalone, testable
//! implementation built from the same `DashMap`/`AtomicU64` primitives as
//! `rust-srec/src/metrics/collector.rs`.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Metrics sink consumed by the orchestrator, packager, and registry.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    fn incr_session_started(&self);
    fn incr_session_ready(&self);
    fn incr_session_failed(&self, class: &str);
    fn incr_stall(&self);
    fn incr_retry(&self, kind: &str);
    fn incr_lease_denied(&self);
    fn set_active_sessions(&self, count: u64);
    fn set_tuners_in_use(&self, count: u64);
}

/// No-op sink for tests and call sites that don't care about metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_session_started(&self) {}
    fn incr_session_ready(&self) {}
    fn incr_session_failed(&self, _class: &str) {}
    fn incr_stall(&self) {}
    fn incr_retry(&self, _kind: &str) {}
    fn incr_lease_denied(&self) {}
    fn set_active_sessions(&self, _count: u64) {}
    fn set_tuners_in_use(&self, _count: u64) {}
}

/// In-process metrics collector.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    sessions_started: AtomicU64,
    sessions_ready: AtomicU64,
    sessions_failed: DashMap<String, AtomicU64>,
    stalls: AtomicU64,
    retries: DashMap<String, AtomicU64>,
    lease_denied: AtomicU64,
    active_sessions: AtomicU64,
    tuners_in_use: AtomicU64,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }

    pub fn sessions_ready(&self) -> u64 {
        self.sessions_ready.load(Ordering::Relaxed)
    }

    pub fn sessions_failed_total(&self) -> u64 {
        self.sessions_failed
            .iter()
            .map(|e| e.value().load(Ordering::Relaxed))
            .sum()
    }

    pub fn sessions_failed_for(&self, class: &str) -> u64 {
        self.sessions_failed
            .get(class)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn stalls(&self) -> u64 {
        self.stalls.load(Ordering::Relaxed)
    }

    pub fn retries_for(&self, kind: &str) -> u64 {
        self.retries
            .get(kind)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn lease_denied(&self) -> u64 {
        self.lease_denied.load(Ordering::Relaxed)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn incr_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_session_ready(&self) {
        self.sessions_ready.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_session_failed(&self, class: &str) {
        self.sessions_failed
            .entry(class.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn incr_stall(&self) {
        self.stalls.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_retry(&self, kind: &str) {
        self.retries
            .entry(kind.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn incr_lease_denied(&self) {
        self.lease_denied.fetch_add(1, Ordering::Relaxed);
    }

    fn set_active_sessions(&self, count: u64) {
        self.active_sessions.store(count, Ordering::Relaxed);
    }

    fn set_tuners_in_use(&self, count: u64) {
        self.tuners_in_use.store(count, Ordering::Relaxed);
    }
}
