// SPDX-License-Identifier: AGPL-3.0-only

//! Simulation bounds, per-dimension boundary conditions, and the periodic
//! minimum-image convention.
//!
//! The simulation domain is an axis-aligned box `[min_d, max_d)` per
//! dimension. Each dimension independently carries one of four boundary
//! conditions; Wrap dimensions identify opposite faces, and displacement
//! computations fold through that identification.

use serde::{Deserialize, Serialize};

use crate::error::GranError;

/// Per-dimension boundary condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BcFlag {
    /// No boundary: particles may leave the box freely.
    Open,
    /// Periodic identification of opposite faces.
    Wrap,
    /// Elastic reflection: position mirrored, normal velocity negated.
    Reflect,
    /// Linear spring plus dissipation pushing escaped particles back inside.
    Repulse,
}

impl BcFlag {
    /// Parse a boundary-condition name as it appears in scenario files.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::BadArgument`] for an unrecognized name.
    pub fn parse(name: &str) -> Result<Self, GranError> {
        match name {
            "Open" => Ok(Self::Open),
            "Wrap" => Ok(Self::Wrap),
            "Reflect" => Ok(Self::Reflect),
            "Repulse" => Ok(Self::Repulse),
            other => Err(GranError::BadArgument(format!(
                "unknown boundary condition '{other}'"
            ))),
        }
    }
}

/// Axis-aligned simulation box `[min_d, max_d)` per dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Lower corner, one entry per dimension.
    pub min: Vec<f64>,
    /// Upper corner, one entry per dimension.
    pub max: Vec<f64>,
}

impl Bounds {
    /// Degenerate zero-width bounds of the given dimension.
    #[must_use]
    pub fn zeroed(dim: usize) -> Self {
        Self {
            min: vec![0.0; dim],
            max: vec![0.0; dim],
        }
    }

    /// Construct from per-dimension `(lo, hi)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::BadArgument`] if any `hi <= lo`.
    pub fn new(pairs: &[(f64, f64)]) -> Result<Self, GranError> {
        for (d, &(lo, hi)) in pairs.iter().enumerate() {
            if hi <= lo {
                return Err(GranError::BadArgument(format!(
                    "bounds in dimension {d} are inverted or empty ({lo}, {hi})"
                )));
            }
        }
        Ok(Self {
            min: pairs.iter().map(|p| p.0).collect(),
            max: pairs.iter().map(|p| p.1).collect(),
        })
    }

    /// Number of dimensions.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.min.len()
    }

    /// Width of the box in dimension `d`.
    #[must_use]
    pub fn wd(&self, d: usize) -> f64 {
        self.max[d] - self.min[d]
    }

    /// Volume (product of widths).
    #[must_use]
    pub fn volume(&self) -> f64 {
        (0..self.dim()).map(|d| self.wd(d)).product()
    }

    /// Write the box center into `out`.
    pub fn center(&self, out: &mut [f64]) {
        for d in 0..self.dim() {
            out[d] = 0.5 * (self.min[d] + self.max[d]);
        }
    }

    /// Whether a point lies inside the half-open box.
    #[must_use]
    pub fn contains(&self, x: &[f64]) -> bool {
        (0..self.dim()).all(|d| self.min[d] <= x[d] && x[d] < self.max[d])
    }

    /// Fold a single coordinate into `[min_d, max_d)`.
    ///
    /// Handles points arbitrarily far outside the box, not just one image
    /// away.
    #[must_use]
    pub fn wrap_coordinate(&self, x: f64, d: usize) -> f64 {
        let w = self.wd(d);
        if x < self.min[d] {
            self.max[d] - (self.min[d] - x) % w
        } else if x >= self.max[d] {
            (x - self.min[d]) % w + self.min[d]
        } else {
            x
        }
    }
}

/// Minimum-image correction of a raw displacement component.
///
/// For a Wrap dimension of width `w`, replaces `dis` by the shorter of the
/// direct and through-the-boundary separations, preserving orientation.
#[inline]
#[must_use]
pub fn min_image_component(dis: f64, width: f64) -> f64 {
    let alt = width - dis.abs();
    if alt < dis.abs() {
        if dis > 0.0 {
            -alt
        } else {
            alt
        }
    } else {
        dis
    }
}

/// Write the displacement `x - y` into `dis`, folding Wrap dimensions
/// through the minimum-image convention.
#[inline]
pub fn displacement(x: &[f64], y: &[f64], dis: &mut [f64], bounds: &Bounds, bcs: &[BcFlag]) {
    for d in 0..bounds.dim() {
        let raw = x[d] - y[d];
        dis[d] = if bcs[d] == BcFlag::Wrap {
            min_image_component(raw, bounds.wd(d))
        } else {
            raw
        };
    }
}

/// Squared norm of a short vector.
#[inline]
#[must_use]
pub fn norm_sqr(v: &[f64]) -> f64 {
    v.iter().map(|c| c * c).sum()
}

/// Minimum-image distance between two points.
#[must_use]
pub fn distance(x: &[f64], y: &[f64], bounds: &Bounds, bcs: &[BcFlag]) -> f64 {
    let mut total = 0.0;
    for d in 0..bounds.dim() {
        let raw = x[d] - y[d];
        let ds = if bcs[d] == BcFlag::Wrap {
            min_image_component(raw, bounds.wd(d))
        } else {
            raw
        };
        total += ds * ds;
    }
    total.sqrt()
}
