// SPDX-License-Identifier: Apache-2.0
//! Construction-time and live-tunable configuration.
//!
//! [`SchedulerConfig`] holds every parameter named in the external
//! interface's configuration table. [`PartialSchedulerConfig`] is the
//! all-optional counterpart `Scheduler::set_config` accepts: validation runs
//! against a hypothetical merged config before anything is applied, so a
//! rejected update leaves the previous values intact, as the "Coupled
//! UI-side live configuration" design note requires.

use crate::error::ConfigError;

/// Complete, validated configuration for a [`foam-scheduler`][crate] instance.
///
/// `n` and the adapter/geometry bounds (`n_max`) are fixed for the life of a
/// scheduler; every other field is live-tunable via `Scheduler::set_config`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerConfig {
    /// Fixed particle count. Construction-time only.
    pub n: usize,
    /// Hard cap on particle count the geometry adapter will accept.
    pub n_max: usize,
    /// Starting cadence (ticks between geometry submissions). Construction-time
    /// only: this is the value `k` is initialized to, never mutated after
    /// [`Scheduler::new`][crate] runs.
    pub k_initial: u32,
    /// Live cadence actually used to decide submission boundaries. Starts
    /// equal to `k_initial` and is thereafter adapted by `adapt_cadence` or
    /// overridden by a [`PartialSchedulerConfig::k`] update.
    pub k: u32,
    /// Minimum cadence the adaptive-cadence rule will shrink `k` to.
    pub k_min: u32,
    /// Maximum cadence the adaptive-cadence rule will grow `k` to.
    pub k_max: u32,
    /// Cadence increment applied when geometry latency runs hot.
    pub delta_k_up: u32,
    /// Cadence decrement applied when geometry latency runs cool.
    pub delta_k_down: u32,
    /// Whether the scheduler adapts `k` automatically from observed latency.
    pub auto_cadence: bool,
    /// Target geometry round-trip latency, in milliseconds.
    pub t_target_ms: f64,
    /// Lower edge of the IQ control band (cells below this grow).
    pub iq_min: f64,
    /// Upper edge of the IQ control band (cells above this shrink).
    pub iq_max: f64,
    /// Growth rate applied to below-band cells, as a fraction of `V_i`.
    pub beta_grow: f64,
    /// Shrink rate applied to above-band cells, as a fraction of `mean(V)`.
    pub beta_shrink: f64,
    /// Per-step radius change bound, as a fraction of `r_i` (`gamma`).
    pub dr_cap: f64,
    /// Absolute minimum radius clamp.
    pub r_min: f64,
    /// Absolute maximum radius clamp.
    pub r_max: f64,
    /// Dispersion (`std/mean` of `r_new`) threshold that triggers renormalisation.
    pub sigma_disp: f64,
    /// Per-cell volume dominance threshold that triggers dampening.
    pub v_dom: f64,
    /// Zero-sum rescale tolerance: below this, no rescale is applied.
    pub eps_zs: f64,
    /// Adapter batching bound (`chunk_max`).
    pub chunk_max: usize,
    /// Completed-results interval after which the worker is recycled.
    pub recycle_every: u32,
    /// Minimum weight the adapter will sanitise a non-finite/non-positive
    /// weight to.
    pub w_min: f64,
    /// Maximum weight the adapter will clamp a weight to.
    pub w_max: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            n: 256,
            n_max: 100_000,
            k_initial: 16,
            k: 16,
            k_min: 8,
            k_max: 200,
            delta_k_up: 8,
            delta_k_down: 4,
            auto_cadence: true,
            t_target_ms: 12.0,
            iq_min: 0.70,
            iq_max: 0.90,
            beta_grow: 0.015,
            beta_shrink: 0.002,
            dr_cap: 0.01,
            r_min: 0.005,
            r_max: 0.060,
            sigma_disp: 0.5,
            v_dom: 0.5,
            eps_zs: 1e-6,
            chunk_max: 768,
            recycle_every: 300,
            w_min: 1e-8,
            w_max: 1.0,
        }
    }
}

impl SchedulerConfig {
    /// Validate this configuration, returning the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n == 0 || self.n > self.n_max {
            return Err(ConfigError::InvalidParticleCount {
                n: self.n,
                max: self.n_max,
            });
        }
        if !(self.iq_min > 0.0 && self.iq_min < self.iq_max && self.iq_max <= 1.0) {
            return Err(ConfigError::BandInversion {
                iq_min: self.iq_min,
                iq_max: self.iq_max,
            });
        }
        if !(0.0..=1.0).contains(&self.beta_grow) {
            return Err(ConfigError::RateOutOfRange {
                name: "beta_grow",
                value: self.beta_grow,
            });
        }
        if !(0.0..=1.0).contains(&self.beta_shrink) {
            return Err(ConfigError::RateOutOfRange {
                name: "beta_shrink",
                value: self.beta_shrink,
            });
        }
        if !(self.r_min > 0.0 && self.r_min < self.r_max) {
            return Err(ConfigError::RadiusBoundInversion {
                r_min: self.r_min,
                r_max: self.r_max,
            });
        }
        if !(self.k_min <= self.k_initial && self.k_initial <= self.k_max && self.k_min >= 1) {
            return Err(ConfigError::CadenceBoundInversion {
                k_min: self.k_min,
                k_initial: self.k_initial,
                k_max: self.k_max,
            });
        }
        Ok(())
    }

    /// Apply a partial update, validating the merged result first.
    ///
    /// On failure, `self` is left completely unchanged: the caller gets the
    /// error back to report via telemetry, and previous values remain live.
    pub fn apply_partial(&mut self, partial: &PartialSchedulerConfig) -> Result<(), ConfigError> {
        let mut merged = self.clone();
        partial.merge_into(&mut merged);
        merged.validate()?;
        *self = merged;
        Ok(())
    }
}

/// Sparse configuration update for live-tunable parameters only.
///
/// Non-live parameters (`n`, `n_max`, radius bounds, etc.) are intentionally
/// absent: changing them requires constructing a new scheduler.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartialSchedulerConfig {
    /// See [`SchedulerConfig::iq_min`].
    pub iq_min: Option<f64>,
    /// See [`SchedulerConfig::iq_max`].
    pub iq_max: Option<f64>,
    /// See [`SchedulerConfig::beta_grow`].
    pub beta_grow: Option<f64>,
    /// See [`SchedulerConfig::beta_shrink`].
    pub beta_shrink: Option<f64>,
    /// Manual cadence override. Ignored while `auto_cadence` resolves to true.
    pub k: Option<u32>,
    /// See [`SchedulerConfig::auto_cadence`].
    pub auto_cadence: Option<bool>,
}

impl PartialSchedulerConfig {
    fn merge_into(&self, target: &mut SchedulerConfig) {
        if let Some(v) = self.iq_min {
            target.iq_min = v;
        }
        if let Some(v) = self.iq_max {
            target.iq_max = v;
        }
        if let Some(v) = self.beta_grow {
            target.beta_grow = v;
        }
        if let Some(v) = self.beta_shrink {
            target.beta_shrink = v;
        }
        if let Some(v) = self.k {
            target.k = v.clamp(target.k_min, target.k_max);
        }
        if let Some(v) = self.auto_cadence {
            target.auto_cadence = v;
        }
    }
}
