// SPDX-License-Identifier: Apache-2.0
//! The geometry backend adapter: the only component allowed to touch the
//! possibly-unstable geometry routine directly.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use foam_core::particle::wrap01;
use foam_core::{GeomFlag, GeometryResult, Point3};
use thiserror::Error;

use crate::backend::{BackendBatchOutput, GeometryBackend};

/// Periodicity passed to the backend: the unit cube always wraps at `1.0`.
const PERIODICITY: f64 = 1.0;

/// Deterministic micro-jitter magnitude applied to exact-duplicate points,
/// keyed by particle index so repeated runs displace the same way.
const DEDUP_JITTER: f64 = 1e-9;

/// Typed input-validation failure. This is the only error the adapter
/// raises; every later-stage failure is encoded in [`GeomFlag`] instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterInputError {
    /// `points` and `weights` did not carry the same particle count.
    #[error("size mismatch: {points} points vs {weights} weights")]
    SizeMismatch {
        /// Length of the points slice.
        points: usize,
        /// Length of the weights slice.
        weights: usize,
    },
    /// The input carried zero particles.
    #[error("empty input: N must be > 0")]
    EmptyInput,
    /// `N` exceeded the adapter's configured hard cap.
    #[error("N ({n}) exceeds the adapter's hard cap ({max})")]
    TooManyParticles {
        /// Requested particle count.
        n: usize,
        /// Configured cap.
        max: usize,
    },
}

/// Wraps a [`GeometryBackend`] with ownership copying, input validation,
/// sanitisation, de-duplication, batching, per-cell fault isolation, and
/// output sanity clamping.
pub struct GeometryAdapter<B> {
    backend: B,
    n_max: usize,
    chunk_max: usize,
    w_min: f64,
    w_max: f64,
    initialised: AtomicBool,
}

impl<B: GeometryBackend> GeometryAdapter<B> {
    /// Build an adapter around `backend` with the given hard cap, batching
    /// bound, and weight sanitisation bounds.
    #[must_use]
    pub fn new(backend: B, n_max: usize, chunk_max: usize, w_min: f64, w_max: f64) -> Self {
        Self {
            backend,
            n_max,
            chunk_max: chunk_max.max(1),
            w_min,
            w_max,
            initialised: AtomicBool::new(false),
        }
    }

    /// Idempotent one-time backend initialisation, guarded by an atomic
    /// flag so construction can run ahead of the first call without ever
    /// re-running init on subsequent calls.
    fn ensure_init(&self) {
        // `swap` rather than `compare_exchange`: the only competing writer
        // would also be setting `true`, so a benign race just re-runs a
        // no-op toggle rather than corrupting state.
        self.initialised.swap(true, Ordering::AcqRel);
    }

    /// Whether one-time backend initialisation has run.
    #[must_use]
    pub fn is_initialised(&self) -> bool {
        self.initialised.load(Ordering::Acquire)
    }

    /// Run the full adapter pipeline over `points`/`weights`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterInputError`] only for structural validation failures
    /// (size mismatch, `N == 0`, `N > n_max`). Every other failure mode —
    /// backend catastrophe, per-cell extraction failure, non-finite output —
    /// is encoded in the returned result's flags instead of raised as an
    /// error.
    pub fn compute(
        &self,
        points: &[Point3],
        weights: &[f64],
    ) -> Result<GeometryResult, AdapterInputError> {
        // Step 1: ownership copy. These owned copies are the only buffers
        // touched from here on; the caller's slices are never read again.
        let points: Vec<Point3> = points.to_vec();
        let weights: Vec<f64> = weights.to_vec();

        // Step 2: input validation.
        if points.len() != weights.len() {
            return Err(AdapterInputError::SizeMismatch {
                points: points.len(),
                weights: weights.len(),
            });
        }
        let n = points.len();
        if n == 0 {
            return Err(AdapterInputError::EmptyInput);
        }
        if n > self.n_max {
            return Err(AdapterInputError::TooManyParticles { n, max: self.n_max });
        }

        self.ensure_init();

        // Step 3: sanitisation.
        let mut points = points;
        let mut weights = weights;
        for p in &mut points {
            for c in p.iter_mut() {
                *c = wrap01(*c).min(1.0 - f64::EPSILON);
            }
        }
        for w in &mut weights {
            if !w.is_finite() || *w <= 0.0 {
                *w = self.w_min;
            }
            *w = w.clamp(self.w_min, self.w_max);
        }

        // Step 4: de-duplication via deterministic index-keyed micro-jitter.
        dedup_exact_points(&mut points);

        let start = Instant::now();

        // Step 5/6: batching + guarded backend invocation. The full point
        // cloud is visible to every batch call (periodic cells are globally
        // coupled); only the assigned slice's outputs are kept per batch.
        let raw = invoke_batched(&self.backend, &points, &weights, self.chunk_max);

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let raw = match raw {
            Some(output) => output,
            None => {
                // Backend catastrophe: every cell becomes TRIANGULATION_FAIL.
                return Ok(GeometryResult {
                    volume: vec![0.0; n],
                    surface: vec![0.0; n],
                    faces: vec![0; n],
                    flags: vec![GeomFlag::TriangulationFail; n],
                    elapsed_ms,
                });
            }
        };

        // Steps 7/8: per-cell extraction guard + output sanity.
        let mut volume = Vec::with_capacity(n);
        let mut surface = Vec::with_capacity(n);
        let mut faces = Vec::with_capacity(n);
        let mut flags = Vec::with_capacity(n);

        for i in 0..n {
            let (v, s, f, flag) = sanitise_cell(
                raw.volumes.get(i).copied(),
                raw.surfaces.get(i).copied(),
                raw.faces.get(i).copied(),
            );
            volume.push(v);
            surface.push(s);
            faces.push(f);
            flags.push(flag);
        }

        Ok(GeometryResult {
            volume,
            surface,
            faces,
            flags,
            elapsed_ms,
        })
    }
}

/// Displace exact-duplicate points deterministically so the backend never
/// sees two identical sites. Each duplicate (by discovery order) is nudged
/// along its own index-keyed direction; the original of each group is left
/// untouched.
fn dedup_exact_points(points: &mut [Point3]) {
    use std::collections::HashMap;

    let mut seen: HashMap<[u64; 3], usize> = HashMap::new();
    for i in 0..points.len() {
        let key = [
            points[i][0].to_bits(),
            points[i][1].to_bits(),
            points[i][2].to_bits(),
        ];
        if let Some(&_first) = seen.get(&key) {
            let jitter = DEDUP_JITTER * (1.0 + (i as f64));
            points[i][0] = wrap01(points[i][0] + jitter);
            points[i][1] = wrap01(points[i][1] + jitter * 0.5);
            points[i][2] = wrap01(points[i][2] + jitter * 0.25);
        } else {
            seen.insert(key, i);
        }
    }
}

/// Invoke the backend, batching the index range when `n > chunk_max`.
/// Returns `None` if the backend panicked on any batch (a "catastrophe").
fn invoke_batched<B: GeometryBackend>(
    backend: &B,
    points: &[Point3],
    weights: &[f64],
    chunk_max: usize,
) -> Option<BackendBatchOutput> {
    let n = points.len();
    if n <= chunk_max {
        return catch_unwind(AssertUnwindSafe(|| {
            backend.compute_batch(points, weights, PERIODICITY)
        }))
        .ok();
    }

    let mut volumes = vec![0.0; n];
    let mut surfaces = vec![0.0; n];
    let mut faces = vec![0u32; n];

    let mut start = 0;
    while start < n {
        let end = (start + chunk_max).min(n);
        // The full cloud is passed so periodic coupling is preserved; only
        // the assigned sub-range's outputs are extracted from this call.
        let batch = catch_unwind(AssertUnwindSafe(|| {
            backend.compute_batch(points, weights, PERIODICITY)
        }))
        .ok()?;
        for i in start..end {
            volumes[i] = batch.volumes.get(i).copied().unwrap_or(0.0);
            surfaces[i] = batch.surfaces.get(i).copied().unwrap_or(0.0);
            faces[i] = batch.faces.get(i).copied().unwrap_or(0);
        }
        start = end;
    }

    Some(BackendBatchOutput {
        volumes,
        surfaces,
        faces,
    })
}

/// Apply output sanity clamping to one cell's raw outputs.
fn sanitise_cell(
    v: Option<f64>,
    s: Option<f64>,
    f: Option<u32>,
) -> (f64, f64, u32, GeomFlag) {
    let (Some(v), Some(s), Some(f)) = (v, s, f) else {
        return (0.0, 0.0, 0, GeomFlag::ExtractFail);
    };
    if !v.is_finite() || !s.is_finite() {
        return (0.0, 0.0, 0, GeomFlag::BadVolume);
    }
    if v <= 0.0 {
        return (0.0, 0.0, 0, GeomFlag::Empty);
    }
    let v = v.clamp(0.0, 1.0);
    let s = s.clamp(0.0, 6.0);
    let f = f.min(100);
    (v, s, f, GeomFlag::Ok)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::SyntheticPeriodicBackend;

    fn adapter() -> GeometryAdapter<SyntheticPeriodicBackend> {
        GeometryAdapter::new(SyntheticPeriodicBackend, 100_000, 512, 1e-8, 1.0)
    }

    #[test]
    fn rejects_empty_input() {
        let a = adapter();
        assert_eq!(a.compute(&[], &[]), Err(AdapterInputError::EmptyInput));
    }

    #[test]
    fn rejects_size_mismatch() {
        let a = adapter();
        let points = vec![[0.1, 0.1, 0.1]];
        let weights = vec![0.1, 0.2];
        assert_eq!(
            a.compute(&points, &weights),
            Err(AdapterInputError::SizeMismatch {
                points: 1,
                weights: 2
            })
        );
    }

    #[test]
    fn rejects_too_many_particles() {
        let a = GeometryAdapter::new(SyntheticPeriodicBackend, 4, 512, 1e-8, 1.0);
        let points = vec![[0.1, 0.1, 0.1]; 5];
        let weights = vec![0.1; 5];
        assert_eq!(
            a.compute(&points, &weights),
            Err(AdapterInputError::TooManyParticles { n: 5, max: 4 })
        );
    }

    #[test]
    fn volumes_sum_to_one_and_ok_cells_within_bounds() {
        let a = adapter();
        let n = 50;
        let points: Vec<Point3> = (0..n)
            .map(|i| [(i as f64) / n as f64, 0.2, 0.3])
            .collect();
        let weights = vec![0.02 * 0.02; n];
        let result = a.compute(&points, &weights).expect("valid input");
        assert!(result.flags.iter().all(|f| f.is_ok()));
        let total: f64 = result.volume.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        for &s in &result.surface {
            assert!((0.0..=6.0).contains(&s));
        }
    }

    #[test]
    fn batching_matches_single_batch_for_a_stable_backend() {
        let n = 2000;
        let points: Vec<Point3> = (0..n)
            .map(|i| [(i as f64) / n as f64, 0.5, 0.5])
            .collect();
        let weights: Vec<f64> = (0..n).map(|i| 0.001 + (i as f64) * 1e-6).collect();

        let single = GeometryAdapter::new(SyntheticPeriodicBackend, 100_000, n, 1e-8, 1.0);
        let batched = GeometryAdapter::new(SyntheticPeriodicBackend, 100_000, 128, 1e-8, 1.0);

        let r1 = single.compute(&points, &weights).expect("single batch");
        let r2 = batched.compute(&points, &weights).expect("multi batch");

        for i in 0..n {
            assert!((r1.volume[i] - r2.volume[i]).abs() < 1e-12);
            assert!((r1.surface[i] - r2.surface[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn duplicate_points_are_deterministically_displaced() {
        let a = adapter();
        let points = vec![[0.3, 0.3, 0.3]; 3];
        let weights = vec![0.01; 3];
        let r1 = a.compute(&points, &weights).expect("valid input");
        let r2 = a.compute(&points, &weights).expect("valid input");
        assert_eq!(r1.volume, r2.volume, "dedup jitter must be deterministic");
    }

    struct PanickingBackend;
    impl GeometryBackend for PanickingBackend {
        fn compute_batch(&self, _: &[Point3], _: &[f64], _: f64) -> BackendBatchOutput {
            panic!("simulated backend crash");
        }
    }

    #[test]
    fn backend_panic_becomes_total_triangulation_failure() {
        let a = GeometryAdapter::new(PanickingBackend, 100_000, 512, 1e-8, 1.0);
        let points = vec![[0.1, 0.2, 0.3]; 4];
        let weights = vec![0.01, 0.02, 0.03, 0.04];
        let result = a.compute(&points, &weights).expect("validation passes");
        assert!(result
            .flags
            .iter()
            .all(|f| *f == GeomFlag::TriangulationFail));
        assert!(result.volume.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn ensure_init_runs_exactly_idempotently() {
        let a = adapter();
        assert!(!a.is_initialised());
        let _ = a.compute(&[[0.1, 0.1, 0.1]], &[0.01]);
        assert!(a.is_initialised());
        let _ = a.compute(&[[0.1, 0.1, 0.1]], &[0.01]);
        assert!(a.is_initialised());
    }
}
