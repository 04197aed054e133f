// OTC Broker Engine
// Copyright (C) 2026 OTC Broker Engine contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Plain atomic counters for the three long-running loops. No external
//! metrics backend is wired up (the scrape/export surface is an outer
//! collaborator's job); these exist so that surface has something to read.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A point-in-time read of a [`Metrics`]' counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    /// Current number of PENDING queue items across all chains.
    pub queue_depth: i64,
    /// Recovery phases that completed without error.
    pub recovery_phase_successes: u64,
    /// Recovery phases that errored (still non-aborting per spec §4.4).
    pub recovery_phase_failures: u64,
    /// Total chain-plugin calls observed.
    pub plugin_calls: u64,
    /// Sum of observed plugin call latency, in milliseconds.
    pub plugin_call_latency_ms_total: u64,
}

impl MetricsSnapshot {
    /// Mean plugin call latency in milliseconds, or `0.0` with no samples.
    pub fn avg_plugin_call_latency_ms(&self) -> f64 {
        if self.plugin_calls == 0 {
            0.0
        } else {
            self.plugin_call_latency_ms_total as f64 / self.plugin_calls as f64
        }
    }
}

/// Atomic counters a long-running loop updates as it works. Cheap to clone
/// (an `Arc` internally would be redundant since every field is already a
/// lock-free atomic); share by reference instead.
#[derive(Debug, Default)]
pub struct Metrics {
    queue_depth: AtomicI64,
    recovery_phase_successes: AtomicU64,
    recovery_phase_failures: AtomicU64,
    plugin_calls: AtomicU64,
    plugin_call_latency_ms_total: AtomicU64,
}

impl Metrics {
    /// A fresh, zeroed counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the Queue Dispatcher's current PENDING-item count.
    pub fn set_queue_depth(&self, depth: i64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    /// Record one Recovery Manager phase's outcome.
    pub fn record_recovery_phase(&self, succeeded: bool) {
        if succeeded {
            self.recovery_phase_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.recovery_phase_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one chain-plugin call's latency.
    pub fn record_plugin_call(&self, latency_ms: u64) {
        self.plugin_calls.fetch_add(1, Ordering::Relaxed);
        self.plugin_call_latency_ms_total.fetch_add(latency_ms, Ordering::Relaxed);
    }

    /// A consistent-enough snapshot for scraping (each field reads
    /// independently; under concurrent updates this is eventually, not
    /// atomically, consistent across fields, which is fine for counters).
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            recovery_phase_successes: self.recovery_phase_successes.load(Ordering::Relaxed),
            recovery_phase_failures: self.recovery_phase_failures.load(Ordering::Relaxed),
            plugin_calls: self.plugin_calls.load(Ordering::Relaxed),
            plugin_call_latency_ms_total: self.plugin_call_latency_ms_total.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_values() {
        let metrics = Metrics::new();
        metrics.set_queue_depth(7);
        metrics.record_recovery_phase(true);
        metrics.record_recovery_phase(false);
        metrics.record_plugin_call(100);
        metrics.record_plugin_call(300);

        let snap = metrics.snapshot();
        assert_eq!(snap.queue_depth, 7);
        assert_eq!(snap.recovery_phase_successes, 1);
        assert_eq!(snap.recovery_phase_failures, 1);
        assert_eq!(snap.plugin_calls, 2);
        assert_eq!(snap.avg_plugin_call_latency_ms(), 200.0);
    }

    #[test]
    fn avg_latency_is_zero_with_no_samples() {
        assert_eq!(Metrics::new().snapshot().avg_plugin_call_latency_ms(), 0.0);
    }
}
