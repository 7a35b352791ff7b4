// SPDX-License-Identifier: Apache-2.0
//! foam-demo-stepper: a minimal, non-normative [`DynamicsStepper`] for local
//! smoke use — not a physics engine, and not part of the core's contract.
//!
//! Particles drift at fixed per-particle velocities and wrap at the unit
//! cube's boundary. `freeze`/`resume` are no-ops: the contract allows a
//! stepper to ignore them entirely.
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

use foam_core::particle::wrap_point01;
use foam_core::Point3;
use foam_scheduler::stepper::DynamicsStepper;

/// Deterministic pseudo-random value in `[0, 1)` for index `i`, used only to
/// seed demo particle placement and velocity (splitmix64-style bit mixing,
/// the same construction the synthetic geometry backend uses).
fn unit_hash(i: u64) -> f64 {
    let mut z = i.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64
}

/// A non-normative stepper driving `n` particles at fixed per-particle
/// velocity across the unit torus, for exercising [`foam_scheduler::Scheduler`]
/// without a real dynamics backend.
pub struct DemoStepper {
    positions: Vec<Point3>,
    velocities: Vec<Point3>,
    radii: Vec<f64>,
    frozen: bool,
}

impl DemoStepper {
    /// Build a stepper with `n` particles at deterministic starting
    /// positions, velocities, and a uniform starting radius.
    #[must_use]
    pub fn new(n: usize, initial_radius: f64) -> Self {
        let positions = (0..n)
            .map(|i| {
                let k = i as u64;
                [unit_hash(k * 3), unit_hash(k * 3 + 1), unit_hash(k * 3 + 2)]
            })
            .collect();
        let velocities = (0..n)
            .map(|i| {
                let k = i as u64 + 1_000_003;
                let scale = 2e-4;
                [
                    (unit_hash(k * 3) - 0.5) * scale,
                    (unit_hash(k * 3 + 1) - 0.5) * scale,
                    (unit_hash(k * 3 + 2) - 0.5) * scale,
                ]
            })
            .collect();
        Self {
            positions,
            velocities,
            radii: vec![initial_radius; n],
            frozen: false,
        }
    }
}

impl DynamicsStepper for DemoStepper {
    fn get_positions01(&self) -> Vec<Point3> {
        self.positions.clone()
    }

    fn get_radii(&self) -> Vec<f64> {
        self.radii.clone()
    }

    fn set_radii(&mut self, radii: &[f64]) {
        let n = self.radii.len().min(radii.len());
        self.radii[..n].copy_from_slice(&radii[..n]);
    }

    fn relax_step(&mut self) {
        if self.frozen {
            return;
        }
        for (p, v) in self.positions.iter_mut().zip(self.velocities.iter()) {
            let next = [p[0] + v[0], p[1] + v[1], p[2] + v[2]];
            *p = wrap_point01(next);
        }
    }

    fn freeze(&mut self) {
        self.frozen = true;
    }

    fn resume(&mut self) {
        self.frozen = false;
    }
}
