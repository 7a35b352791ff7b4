// SPDX-License-Identifier: Apache-2.0
//! Per-cell geometry results and the derived isoperimetric-quotient signal.

/// Per-cell status flag returned by the geometry backend adapter.
///
/// Any flag other than [`GeomFlag::Ok`] means the cell contributed zero
/// metrics and is excluded from control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GeomFlag {
    /// Cell extracted successfully; metrics are meaningful.
    Ok,
    /// The cell carried zero volume (degenerate site, usually a duplicate).
    Empty,
    /// Extracted volume failed the output sanity check (non-finite, clamped).
    BadVolume,
    /// The backend could not extract the cell's boundary.
    ExtractFail,
    /// The backend's geometric computation failed (e.g. ill-conditioned dual).
    GeomFail,
    /// Facet iteration failed after the cell boundary was otherwise extracted.
    FacetFail,
    /// The backend returned an unrecognised or undocumented failure code.
    Unknown,
    /// The backend's underlying triangulation step failed or aborted.
    TriangulationFail,
}

impl GeomFlag {
    /// Whether this flag marks the cell usable for control.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Result of a single geometry computation over `N` particles, in original
/// index order (`0..N`), regardless of how the adapter batched the call.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeometryResult {
    /// Per-cell volume, `V_i in [0, 1]`.
    pub volume: Vec<f64>,
    /// Per-cell surface area, `S_i in [0, 6]`.
    pub surface: Vec<f64>,
    /// Per-cell face count, `F_i in [0, 100]`.
    pub faces: Vec<u32>,
    /// Per-cell status flag.
    pub flags: Vec<GeomFlag>,
    /// Wall-clock time spent inside the backend call(s), across all batches.
    pub elapsed_ms: f64,
}

impl GeometryResult {
    /// Number of cells carried by this result.
    #[must_use]
    pub fn len(&self) -> usize {
        self.volume.len()
    }

    /// Whether this result carries no cells at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volume.is_empty()
    }

    /// Whether every cell in this result is flagged as a failure.
    ///
    /// A total-failure result is treated as a skipped ADJUST cycle: the
    /// controller leaves radii unchanged.
    #[must_use]
    pub fn is_total_failure(&self) -> bool {
        !self.flags.is_empty() && self.flags.iter().all(|f| !f.is_ok())
    }

    /// Count of cells whose flag is not [`GeomFlag::Ok`].
    #[must_use]
    pub fn flags_nonzero_count(&self) -> usize {
        self.flags.iter().filter(|f| !f.is_ok()).count()
    }
}

/// Minimum surface area for which an IQ value is considered defined.
pub const EPS_S: f64 = 1e-9;

/// `36 * pi`, the isoperimetric quotient's normalising constant.
pub const IQ_NORMALISER: f64 = 36.0 * std::f64::consts::PI;

/// The isoperimetric quotient for one cell, or `None` if undefined.
///
/// `IQ_i = 36 * pi * V_i^2 / S_i^3` when `flag == Ok` and `S_i > EPS_S`;
/// otherwise the cell is excluded from control (`dr_i := 0`).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IqSample(Option<f64>);

impl IqSample {
    /// Compute the IQ sample for one cell from its raw geometry outputs.
    #[must_use]
    pub fn compute(volume: f64, surface: f64, flag: GeomFlag) -> Self {
        if flag.is_ok() && surface > EPS_S {
            Self(Some(IQ_NORMALISER * volume * volume / (surface * surface * surface)))
        } else {
            Self(None)
        }
    }

    /// The underlying value, or `None` if this cell is excluded from control.
    #[must_use]
    pub const fn value(self) -> Option<f64> {
        self.0
    }

    /// Whether this sample participates in control (i.e. is defined).
    #[must_use]
    pub const fn is_defined(self) -> bool {
        self.0.is_some()
    }
}
