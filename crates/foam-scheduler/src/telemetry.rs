// SPDX-License-Identifier: Apache-2.0
//! Telemetry / HUD State (C6): an atomically-published, read-mostly snapshot
//! of scheduler health.

use std::sync::{Arc, Mutex};

/// One tick's worth of scheduler health, as consumed by a HUD or embedder.
///
/// Readers obtain a consistent snapshot (a mutex-protected copy); the
/// scheduler is the sole writer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetrySnapshot {
    /// Tick index at which this snapshot was published.
    pub tick_index: u64,
    /// Current cadence (ticks between geometry submissions).
    pub k: u32,
    /// Whether a geometry request is currently in flight.
    pub pending: bool,
    /// Most recently observed geometry round-trip latency, in milliseconds.
    pub t_geom_ms: f64,
    /// Mean of defined IQ values from the last completed ADJUST.
    pub iq_mean: f64,
    /// Population standard deviation of defined IQ values.
    pub iq_stddev: f64,
    /// Fraction of defined-IQ cells below `IQ_min`.
    pub pct_below: f64,
    /// Fraction of defined-IQ cells within `[IQ_min, IQ_max]`.
    pub pct_within: f64,
    /// Fraction of defined-IQ cells above `IQ_max`.
    pub pct_above: f64,
    /// Count of cells flagged other than `OK` in the last completed result.
    pub flags_nonzero_count: usize,
}

/// Shared handle to the scheduler's current telemetry snapshot.
///
/// Cloning shares the same underlying storage; any clone observes writes made
/// through any other, which is how an embedder reads telemetry from a
/// different thread than the one driving `tick()`.
#[derive(Debug, Clone, Default)]
pub struct TelemetryHandle(Arc<Mutex<TelemetrySnapshot>>);

impl TelemetryHandle {
    /// Build a handle seeded with the default (all-zero) snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current snapshot.
    ///
    /// A poisoned mutex (only possible if a prior writer panicked mid-publish)
    /// is recovered from rather than propagated, since a stale-but-valid
    /// snapshot is more useful to a HUD than a panic.
    #[must_use]
    pub fn read(&self) -> TelemetrySnapshot {
        *self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Overwrite the snapshot. Called only by the scheduler, once per tick.
    pub(crate) fn publish(&self, snapshot: TelemetrySnapshot) {
        *self
            .0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = snapshot;
    }
}
