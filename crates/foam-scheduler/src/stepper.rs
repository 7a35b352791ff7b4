// SPDX-License-Identifier: Apache-2.0
//! The Dynamics Stepper Contract (C5): the six capabilities the scheduler
//! needs from whatever owns the live particle set.

use foam_core::Point3;

/// Everything the scheduler needs from the dynamics it drives.
///
/// No guarantee is made about the implementation's internal physics,
/// determinism, or performance; the scheduler is agnostic to all of that. The
/// getters must return owned copies — the scheduler's snapshotting relies on
/// this to hold the ownership-isolation invariant.
pub trait DynamicsStepper {
    /// Positions of all particles, wrapped into `[0, 1)^3`.
    fn get_positions01(&self) -> Vec<Point3>;

    /// Radii of all particles, each strictly positive and finite.
    fn get_radii(&self) -> Vec<f64>;

    /// Overwrite live radii. A subsequent `get_radii` call reflects the write.
    fn set_radii(&mut self, radii: &[f64]);

    /// Advance one sub-tick of dynamics. May no-op while frozen, but the
    /// scheduler calls this unconditionally every tick regardless of FREEZE
    /// state.
    fn relax_step(&mut self);

    /// Best-effort marker that a snapshot is about to be taken. May no-op.
    fn freeze(&mut self);

    /// Paired with [`Self::freeze`]; the scheduler always calls both within
    /// the same tick, freeze immediately before snapshotting and resume
    /// immediately after.
    fn resume(&mut self);
}
