//! Compute counters for cached references
//!
//! Each [`CachedReference`](crate::CachedReference) owns one. A read either
//! hits the memo or runs the compute closure; nothing else is counted.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub struct ComputeMetrics {
    name: &'static str,
    hits: AtomicU64,
    executions: AtomicU64,
    compute_ns: AtomicU64,
}

impl ComputeMetrics {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            hits: AtomicU64::new(0),
            executions: AtomicU64::new(0),
            compute_ns: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_execution(&self, elapsed: Duration) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.compute_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Number of times the compute closure ran
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            name: self.name,
            hits: self.hits(),
            executions: self.executions(),
            compute_us: self.compute_ns.load(Ordering::Relaxed) / 1_000,
        }
    }
}

/// Counters of one reference at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub name: &'static str,
    pub hits: u64,
    pub executions: u64,
    pub compute_us: u64,
}

impl MetricsSnapshot {
    /// Reads served since `earlier`, which must come from the same reference
    pub fn since(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            name: self.name,
            hits: self.hits.saturating_sub(earlier.hits),
            executions: self.executions.saturating_sub(earlier.executions),
            compute_us: self.compute_us.saturating_sub(earlier.compute_us),
        }
    }

    /// Reads answered without running the compute closure
    pub fn is_memoized(&self) -> bool {
        self.executions == 0
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} computed, {} memoized ({}us)",
            self.name, self.executions, self.hits, self.compute_us
        )
    }
}
