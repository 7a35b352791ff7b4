// SPDX-License-Identifier: Apache-2.0
//! Error taxonomy for construction-time and live-configuration failures.
//!
//! Per-cell geometry failures are not modeled as errors: they are encoded in
//! [`crate::geometry::GeomFlag`] and excluded from control, matching the
//! "the core never panics on well-formed input" propagation policy.

use thiserror::Error;

/// Fatal construction-time or `set_config` validation failure.
///
/// These are the only errors the core propagates to the embedder; every
/// runtime condition (transient or total geometry failure, backend
/// catastrophe) is recovered locally and surfaced only via telemetry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Particle count is zero or exceeds the adapter's hard cap.
    #[error("particle count {n} is out of range (1..={max})")]
    InvalidParticleCount {
        /// Requested count.
        n: usize,
        /// Adapter hard cap.
        max: usize,
    },
    /// `IQ_min` is not strictly less than `IQ_max`, or either is outside `(0, 1]`.
    #[error("band inversion: IQ_min ({iq_min}) must be < IQ_max ({iq_max}), both in (0, 1]")]
    BandInversion {
        /// Proposed lower band edge.
        iq_min: f64,
        /// Proposed upper band edge.
        iq_max: f64,
    },
    /// A rate parameter (`beta_grow`, `beta_shrink`) is outside `[0, 1]`.
    #[error("rate parameter {name} = {value} is out of range [0, 1]")]
    RateOutOfRange {
        /// Name of the offending field.
        name: &'static str,
        /// Offending value.
        value: f64,
    },
    /// `r_min` is not strictly less than `r_max`, or either is non-positive.
    #[error("radius bound inversion: r_min ({r_min}) must be < r_max ({r_max}), both > 0")]
    RadiusBoundInversion {
        /// Proposed lower radius clamp.
        r_min: f64,
        /// Proposed upper radius clamp.
        r_max: f64,
    },
    /// Cadence bounds are inconsistent (`k_min > k_max`, or `k_initial` outside them).
    #[error("cadence bounds invalid: k_min={k_min}, k_initial={k_initial}, k_max={k_max}")]
    CadenceBoundInversion {
        /// Minimum cadence.
        k_min: u32,
        /// Initial cadence.
        k_initial: u32,
        /// Maximum cadence.
        k_max: u32,
    },
}
