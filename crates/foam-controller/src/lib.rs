// SPDX-License-Identifier: Apache-2.0
//! foam-controller: the IQ controller (C3).
//!
//! A single pure function, [`adjust`], implements the banded, zero-sum,
//! clamped, dispersion-bounded radius update described in the core's
//! measurement-control cycle. It raises no errors: degenerate input (every
//! cell flagged, or no cells at all) simply yields `r_new == r_prev`.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self
)]

use foam_core::{GeomFlag, GeometryResult, IqSample, SchedulerConfig};

/// Dampening factor applied to every `dr_i` when a dominant cell or any
/// non-OK flag is observed. Not a tunable: this value is fixed.
const DAMPENING_FACTOR: f64 = 0.25;

/// Output of one [`adjust`] call: the proposed new radii, the per-cell IQ
/// samples that produced them, and flags describing which safety guards
/// fired (useful for telemetry, not for control itself).
#[derive(Debug, Clone)]
pub struct AdjustOutput {
    /// Proposed radii, one per cell, already clamped to `[r_min, r_max]`.
    pub r_new: Vec<f64>,
    /// Per-cell IQ sample (`None` for cells excluded from control).
    pub iq: Vec<IqSample>,
    /// Whether the dominant-cell/any-bad-flag dampening guard fired.
    pub dampened: bool,
    /// Whether the dispersion guard triggered a multiplicative renormalisation.
    pub renormalised: bool,
}

/// Compute the next radius set from one geometry result.
///
/// `result` and `r_prev` must carry the same cell count; if they don't, the
/// shorter length is used (callers are expected to only ever pass matched
/// snapshots and results, so this never occurs on a correctly wired
/// scheduler).
#[must_use]
pub fn adjust(result: &GeometryResult, r_prev: &[f64], cfg: &SchedulerConfig) -> AdjustOutput {
    let n = result.len().min(r_prev.len());

    // Step 1: per-cell IQ.
    let iq: Vec<IqSample> = (0..n)
        .map(|i| IqSample::compute(result.volume[i], result.surface[i], result.flags[i]))
        .collect();

    let included: Vec<usize> = (0..n).filter(|&i| iq[i].is_defined()).collect();
    let mean_v_included = if included.is_empty() {
        0.0
    } else {
        included.iter().map(|&i| result.volume[i]).sum::<f64>() / included.len() as f64
    };

    // Step 2: banded proposal.
    let mut d_volume = vec![0.0_f64; n];
    for &i in &included {
        // Safe: `i` is in `included`, so `iq[i]` is defined.
        let Some(iq_i) = iq[i].value() else {
            continue;
        };
        if iq_i < cfg.iq_min {
            d_volume[i] = cfg.beta_grow * result.volume[i];
        } else if iq_i > cfg.iq_max {
            d_volume[i] = -cfg.beta_shrink * mean_v_included;
        }
    }

    // Step 3: zero-sum rescale (shrink pool only).
    let s_pos: f64 = d_volume.iter().filter(|&&d| d > 0.0).sum();
    let s_neg: f64 = -d_volume.iter().filter(|&&d| d < 0.0).sum::<f64>();
    if s_pos > 0.0 && s_neg > 0.0 && (s_pos - s_neg).abs() > cfg.eps_zs {
        let scale = s_pos / s_neg;
        for d in &mut d_volume {
            if *d < 0.0 {
                *d *= scale;
            }
        }
    }

    // Step 4: convert to radius delta.
    let mut dr = vec![0.0_f64; n];
    for i in 0..n {
        if r_prev[i] > 0.0 {
            dr[i] = d_volume[i] / (4.0 * std::f64::consts::PI * r_prev[i] * r_prev[i]);
        }
    }

    // Step 5a: dampening.
    let max_v = result.volume[..n].iter().copied().fold(0.0_f64, f64::max);
    let any_bad_flag = result.flags[..n].iter().any(|f| !f.is_ok());
    let dampened = max_v > cfg.v_dom || any_bad_flag;
    if dampened {
        for d in &mut dr {
            *d *= DAMPENING_FACTOR;
        }
    }

    // Step 5b: per-step clamp.
    for i in 0..n {
        let cap = cfg.dr_cap * r_prev[i];
        dr[i] = dr[i].clamp(-cap, cap);
    }

    // Step 5c: form r_new, clamp to absolute bounds.
    let mut r_new: Vec<f64> = (0..n)
        .map(|i| (r_prev[i] + dr[i]).clamp(cfg.r_min, cfg.r_max))
        .collect();

    // Step 5d: dispersion-triggered renormalisation, preserving total volume.
    let renormalised = if n > 0 {
        let mean_r = r_new.iter().sum::<f64>() / n as f64;
        let renorm = if mean_r > 0.0 {
            let variance =
                r_new.iter().map(|r| (r - mean_r).powi(2)).sum::<f64>() / n as f64;
            let dispersion = variance.sqrt() / mean_r;
            dispersion > cfg.sigma_disp
        } else {
            false
        };
        if renorm {
            let sum_prev: f64 = r_prev[..n].iter().sum();
            let sum_new: f64 = r_new.iter().sum();
            if sum_new > 0.0 {
                let scale = sum_prev / sum_new;
                for r in &mut r_new {
                    *r *= scale;
                }
            }
        }
        renorm
    } else {
        false
    };

    AdjustOutput {
        r_new,
        iq,
        dampened,
        renormalised,
    }
}

/// Sentinel IQ distribution buckets used for telemetry, computed against a
/// configured band. Exposed here (rather than in `foam-scheduler`) because
/// the banding rule that defines "below/within/above" belongs to the
/// controller's domain.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IqDistribution {
    /// Fraction of defined-IQ cells below `IQ_min`.
    pub pct_below: f64,
    /// Fraction of defined-IQ cells within `[IQ_min, IQ_max]`.
    pub pct_within: f64,
    /// Fraction of defined-IQ cells above `IQ_max`.
    pub pct_above: f64,
    /// Mean of defined IQ values (`0.0` if none are defined).
    pub mean: f64,
    /// Population standard deviation of defined IQ values.
    pub stddev: f64,
}

/// Summarise an IQ sample array into mean/stddev/banded percentages.
#[must_use]
pub fn distribution(iq: &[IqSample], iq_min: f64, iq_max: f64) -> IqDistribution {
    let values: Vec<f64> = iq.iter().filter_map(|s| s.value()).collect();
    if values.is_empty() {
        return IqDistribution::default();
    }
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
    let below = values.iter().filter(|&&v| v < iq_min).count() as f64;
    let above = values.iter().filter(|&&v| v > iq_max).count() as f64;
    let within = count - below - above;
    IqDistribution {
        pct_below: below / count,
        pct_within: within / count,
        pct_above: above / count,
        mean,
        stddev: variance.sqrt(),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use foam_core::GeomFlag;
    use proptest::prelude::*;

    fn result_of(volume: Vec<f64>, surface: Vec<f64>, flags: Vec<GeomFlag>) -> GeometryResult {
        let n = volume.len();
        GeometryResult {
            volume,
            surface,
            faces: vec![10; n],
            flags,
            elapsed_ms: 5.0,
        }
    }

    #[test]
    fn all_flagged_result_leaves_radii_unchanged() {
        let cfg = SchedulerConfig::default();
        let result = result_of(
            vec![0.0; 4],
            vec![0.0; 4],
            vec![GeomFlag::Empty; 4],
        );
        let r_prev = vec![0.02; 4];
        let out = adjust(&result, &r_prev, &cfg);
        assert_eq!(out.r_new, r_prev);
        assert!(out.iq.iter().all(|s| !s.is_defined()));
    }

    #[test]
    fn single_grower_scenario_from_spec() {
        let mut cfg = SchedulerConfig::default();
        cfg.iq_min = 0.70;
        cfg.iq_max = 0.90;
        cfg.beta_grow = 0.015;
        cfg.beta_shrink = 0.002;

        let result = result_of(
            vec![0.10, 0.30, 0.30],
            vec![2.0, 1.5, 1.5],
            vec![GeomFlag::Ok; 3],
        );
        let r_prev = vec![0.02, 0.02, 0.02];
        let out = adjust(&result, &r_prev, &cfg);

        let iq0 = out.iq[0].value().expect("defined");
        let iq1 = out.iq[1].value().expect("defined");
        assert!(iq0 < cfg.iq_min);
        assert!(iq1 > cfg.iq_max);

        assert!(out.r_new[0] > r_prev[0], "cell 0 should grow");
        assert!(out.r_new[1] < r_prev[1], "cell 1 should shrink");
        assert!(out.r_new[2] < r_prev[2], "cell 2 should shrink");

        for i in 0..3 {
            let dr = (out.r_new[i] - r_prev[i]).abs();
            assert!(
                dr <= cfg.dr_cap * r_prev[i] * 1.0 + 1e-12,
                "per-step cap violated at {i}: dr={dr}"
            );
            assert!(out.r_new[i] >= cfg.r_min && out.r_new[i] <= cfg.r_max);
        }
    }

    #[test]
    fn dominant_cell_triggers_dampening() {
        let mut cfg = SchedulerConfig::default();
        cfg.iq_min = 0.70;
        cfg.iq_max = 0.90;
        cfg.v_dom = 0.5;

        let result = result_of(
            vec![0.6, 0.2, 0.2],
            vec![2.0, 1.5, 1.5],
            vec![GeomFlag::Ok; 3],
        );
        let r_prev = vec![0.02, 0.02, 0.02];
        let out = adjust(&result, &r_prev, &cfg);
        assert!(out.dampened);
    }

    #[test]
    fn band_idempotence_when_every_cell_is_on_target() {
        let cfg = SchedulerConfig::default();
        // Pick V, S so IQ ~= 0.80 for every cell (within the default band).
        let target_iq = 0.80_f64;
        let v = 0.1_f64;
        let s = (36.0 * std::f64::consts::PI * v * v / target_iq).cbrt();
        let result = result_of(vec![v; 5], vec![s; 5], vec![GeomFlag::Ok; 5]);
        let r_prev = vec![0.02; 5];
        let out = adjust(&result, &r_prev, &cfg);
        for i in 0..5 {
            assert!((out.r_new[i] - r_prev[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn zero_sum_holds_when_no_cell_is_flagged() {
        let mut cfg = SchedulerConfig::default();
        cfg.iq_min = 0.70;
        cfg.iq_max = 0.90;
        let result = result_of(
            vec![0.10, 0.30, 0.30, 0.30],
            vec![2.0, 1.5, 1.5, 1.5],
            vec![GeomFlag::Ok; 4],
        );
        let r_prev = vec![0.02; 4];
        let out = adjust(&result, &r_prev, &cfg);

        let total_dv: f64 = (0..4)
            .map(|i| {
                let dr = out.r_new[i] - r_prev[i];
                4.0 * std::f64::consts::PI * r_prev[i] * r_prev[i] * dr
            })
            .sum();
        let total_v: f64 = result.volume.iter().map(|v| v.abs()).sum();
        assert!(total_dv.abs() <= cfg.eps_zs.max(1e-6) * total_v * 10.0);
    }

    proptest! {
        #[test]
        fn radii_always_stay_within_absolute_bounds(
            volumes in proptest::collection::vec(0.0001_f64..0.3, 3..12),
        ) {
            let cfg = SchedulerConfig::default();
            let n = volumes.len();
            let surfaces: Vec<f64> = volumes.iter().map(|v| (36.0 * std::f64::consts::PI * v * v / 0.5).cbrt()).collect();
            let result = result_of(volumes, surfaces, vec![GeomFlag::Ok; n]);
            let r_prev = vec![0.02; n];
            let out = adjust(&result, &r_prev, &cfg);
            for r in out.r_new {
                prop_assert!(r >= cfg.r_min - 1e-9 && r <= cfg.r_max + 1e-9);
            }
        }

        #[test]
        fn per_step_cap_never_exceeded_before_renormalisation(
            volumes in proptest::collection::vec(0.0001_f64..0.3, 3..12),
        ) {
            let cfg = SchedulerConfig::default();
            let n = volumes.len();
            let surfaces: Vec<f64> = volumes.iter().map(|v| (36.0 * std::f64::consts::PI * v * v / 0.9).cbrt()).collect();
            let result = result_of(volumes, surfaces, vec![GeomFlag::Ok; n]);
            let r_prev = vec![0.02; n];
            let out = adjust(&result, &r_prev, &cfg);
            if !out.renormalised {
                for i in 0..n {
                    let dr = (out.r_new[i] - r_prev[i]).abs();
                    prop_assert!(dr <= cfg.dr_cap * r_prev[i] + 1e-9);
                }
            }
        }
    }
}
