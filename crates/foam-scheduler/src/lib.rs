// SPDX-License-Identifier: Apache-2.0
//! foam-scheduler: the FREEZE/MEASURE/ADJUST/RELAX cycle FSM (C4), the
//! Dynamics Stepper Contract (C5), and telemetry/HUD state (C6).
//!
//! [`scheduler::Scheduler`] is the crate's one embedder-facing type: it owns
//! a [`stepper::DynamicsStepper`] and a [`foam_worker::GeometryWorker`], and
//! drives them through the cycle described in the core's measurement-control
//! design. Everything else here (telemetry snapshotting, cadence adaptation,
//! worker recycling) exists to support that one `tick()` loop.
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

/// The cycle FSM itself.
pub mod scheduler;
/// The Dynamics Stepper Contract trait.
pub mod stepper;
/// Atomically-published telemetry/HUD state.
pub mod telemetry;

pub use scheduler::Scheduler;
pub use stepper::DynamicsStepper;
pub use telemetry::{TelemetryHandle, TelemetrySnapshot};
