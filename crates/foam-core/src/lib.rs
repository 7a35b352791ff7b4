// SPDX-License-Identifier: Apache-2.0
//! foam-core: shared domain types for the adaptive foam controller.
//!
//! This crate defines the entities described by the measurement-control
//! cycle: the particle set, the immutable snapshot handed to the geometry
//! worker, the per-cell geometry result, the IQ signal, pending-request
//! state, and the typed error taxonomy. It has no runtime dependency on
//! `tokio` or any async executor; only [`foam-worker`] and the `foamd`
//! binary pull those in.
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

/// Live-tunable and construction-time configuration.
pub mod config;
/// Error taxonomy for construction and per-cell geometry failures.
pub mod error;
/// Per-cell geometry result, status flags, and the IQ signal.
pub mod geometry;
/// Particle set, snapshots, and pending-request bookkeeping.
pub mod particle;

pub use config::{PartialSchedulerConfig, SchedulerConfig};
pub use error::ConfigError;
pub use geometry::{GeomFlag, GeometryResult, IqSample};
pub use particle::{ParticleSnapshot, PendingRequest, Point3};
