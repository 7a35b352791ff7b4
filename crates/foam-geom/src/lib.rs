// SPDX-License-Identifier: Apache-2.0
//! Geometry backend adapter for the foam controller.
//!
//! This crate provides:
//! - [`backend::GeometryBackend`], the pluggable, possibly-unstable periodic
//!   power-diagram routine the adapter wraps.
//! - [`backend::SyntheticPeriodicBackend`], a deterministic stand-in for the
//!   real geometry kernel (see `DESIGN.md` for why).
//! - [`adapter::GeometryAdapter`], which sequences ownership copy, input
//!   validation, sanitisation, de-duplication, batching, guarded backend
//!   invocation, and output sanity clamping, never propagating a panic.
//!
//! Design notes:
//! - No ambient RNG: de-duplication jitter is a pure function of index.
//! - The adapter never raises for per-cell extraction failures; those are
//!   encoded as [`foam_core::GeomFlag`] values on the returned result.
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

/// The pluggable backend trait and the deterministic synthetic stand-in.
pub mod backend;
/// The adapter itself: validation, sanitisation, batching, fault isolation.
pub mod adapter;

pub use adapter::{AdapterInputError, GeometryAdapter};
pub use backend::{BackendBatchOutput, GeometryBackend, SyntheticPeriodicBackend};
