//! Pipeline counters.
//!
//! Cheap atomic counters surfaced as point-in-time snapshots. These back
//! operational dashboards; the per-event detail lives on the diagnostic
//! bus.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide pipeline counters.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    requests_total: AtomicU64,
    replies_total: AtomicU64,
    empty_replies_total: AtomicU64,
    transport_retries_total: AtomicU64,
    degradations_total: AtomicU64,
    tool_calls_total: AtomicU64,
    tool_blocked_total: AtomicU64,
    terminal_failures_total: AtomicU64,
}

impl PipelineMetrics {
    pub fn inc_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_replies(&self) {
        self.replies_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_empty_replies(&self) {
        self.empty_replies_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_transport_retries(&self) {
        self.transport_retries_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_degradations(&self) {
        self.degradations_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_tool_calls(&self) {
        self.tool_calls_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_tool_blocked(&self) {
        self.tool_blocked_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_terminal_failures(&self) {
        self.terminal_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            replies_total: self.replies_total.load(Ordering::Relaxed),
            empty_replies_total: self.empty_replies_total.load(Ordering::Relaxed),
            transport_retries_total: self.transport_retries_total.load(Ordering::Relaxed),
            degradations_total: self.degradations_total.load(Ordering::Relaxed),
            tool_calls_total: self.tool_calls_total.load(Ordering::Relaxed),
            tool_blocked_total: self.tool_blocked_total.load(Ordering::Relaxed),
            terminal_failures_total: self.terminal_failures_total.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time view of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub replies_total: u64,
    pub empty_replies_total: u64,
    pub transport_retries_total: u64,
    pub degradations_total: u64,
    pub tool_calls_total: u64,
    pub tool_blocked_total: u64,
    pub terminal_failures_total: u64,
}
