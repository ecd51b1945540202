//! Rebind counters.
//!
//! Thread-safe counters updated from the capture workers and read at
//! shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Statistics of one rebind session.
#[derive(Debug, Default)]
pub struct RebindStats {
    /// Outbound frames rewritten onto the rebind adapter.
    pub outbound_routed: Counter,
    /// Inbound replies rewritten back to the default adapter.
    pub inbound_routed: Counter,
    /// Frames left untouched.
    pub passed: Counter,
    /// Outbound frames whose owner could not be resolved or did not match.
    pub classification_misses: Counter,
    /// Forced process table refreshes.
    pub resolver_refreshes: Counter,
    /// Handler invocations that panicked and failed open.
    pub faults: Counter,
    /// Capture socket receive/inject errors.
    pub capture_errors: Counter,
}

impl RebindStats {
    /// Creates a new set of counters initialized to zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of frames routed in either direction.
    pub fn routed(&self) -> u64 {
        self.outbound_routed.get() + self.inbound_routed.get()
    }

    /// Exports all counters as key-value pairs.
    pub fn export(&self) -> Vec<(String, u64)> {
        vec![
            ("outbound_routed".into(), self.outbound_routed.get()),
            ("inbound_routed".into(), self.inbound_routed.get()),
            ("passed".into(), self.passed.get()),
            (
                "classification_misses".into(),
                self.classification_misses.get(),
            ),
            ("resolver_refreshes".into(), self.resolver_refreshes.get()),
            ("faults".into(), self.faults.get()),
            ("capture_errors".into(), self.capture_errors.get()),
        ]
    }
}
