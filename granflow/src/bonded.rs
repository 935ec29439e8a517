// SPDX-License-Identifier: AGPL-3.0-only

//! Bonded interactions and body-level constraints.
//!
//! Bonds are addressed by global id so they survive compaction and
//! sorting; a bond whose endpoint has left the simulation is silently
//! skipped.

use crate::bounds::{displacement, norm_sqr, BcFlag, Bounds};
use crate::error::GranError;
use crate::store::ParticleStore;

/// Harmonic pair bonds: `|F| = k (r - r0)` pulling toward the rest length.
#[derive(Debug, Clone)]
pub struct HarmonicBonds {
    /// Bonded global-id pairs.
    bonds: Vec<(i64, i64)>,
    /// Spring constant.
    pub strength: f64,
    /// Rest length.
    pub rest_length: f64,
}

impl HarmonicBonds {
    /// Empty bond set with the given spring constant and rest length.
    #[must_use]
    pub const fn new(strength: f64, rest_length: f64) -> Self {
        Self {
            bonds: Vec::new(),
            strength,
            rest_length,
        }
    }

    /// Bond two particles by global id.
    pub fn add_bond(&mut self, gid_a: i64, gid_b: i64) {
        self.bonds.push((gid_a, gid_b));
    }

    /// Number of bonds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bonds.len()
    }

    /// Whether the bond set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bonds.is_empty()
    }

    /// Accumulate bond forces (equal and opposite on each endpoint).
    ///
    /// # Errors
    ///
    /// Returns [`GranError::NanValue`] when a bond produces a non-finite
    /// force (coincident endpoints).
    pub fn interact(
        &self,
        store: &mut ParticleStore,
        bounds: &Bounds,
        bcs: &[BcFlag],
    ) -> Result<(), GranError> {
        let dim = store.dim();
        let mut dis = vec![0.0; dim];
        for &(ga, gb) in &self.bonds {
            let (Some(a), Some(b)) = (store.local_id(ga), store.local_id(gb)) else {
                continue;
            };
            displacement(store.x_of(a), store.x_of(b), &mut dis, bounds, bcs);
            let r = norm_sqr(&dis).sqrt();
            // Positive magnitude pushes the endpoints apart; a stretched
            // bond (r > r0) needs a pull, hence the sign.
            let magnitude = -self.strength * (r - self.rest_length);
            if !magnitude.is_finite() || r == 0.0 {
                return Err(GranError::NanValue(format!(
                    "harmonic bond ({ga}, {gb}) produced a non-finite force at r = {r:.6e}"
                )));
            }
            let invr = 1.0 / r;
            let f = store.f_mut();
            for d in 0..dim {
                let comp = magnitude * dis[d] * invr;
                f[a * dim + d] += comp;
                f[b * dim + d] -= comp;
            }
        }
        Ok(())
    }
}

/// A body-level constraint corrected once per step after force computation.
pub trait Body {
    /// Display name for the run summary.
    fn name(&self) -> &'static str;

    /// Enforce the constraint (positions and velocities may be adjusted).
    fn correct(&mut self, store: &mut ParticleStore, bounds: &Bounds, bcs: &[BcFlag]);
}

/// Rigid distance constraint between two particles: positions are projected
/// back to the fixed separation and the radial relative velocity is
/// removed.
#[derive(Debug, Clone)]
pub struct DistanceConstraint {
    gid_a: i64,
    gid_b: i64,
    /// Enforced separation.
    pub length: f64,
}

impl DistanceConstraint {
    /// Constrain two global ids to the given separation.
    #[must_use]
    pub const fn new(gid_a: i64, gid_b: i64, length: f64) -> Self {
        Self { gid_a, gid_b, length }
    }
}

impl Body for DistanceConstraint {
    fn name(&self) -> &'static str {
        "DistanceConstraint"
    }

    fn correct(&mut self, store: &mut ParticleStore, bounds: &Bounds, bcs: &[BcFlag]) {
        let dim = store.dim();
        let (Some(a), Some(b)) = (store.local_id(self.gid_a), store.local_id(self.gid_b)) else {
            return;
        };
        let mut dis = vec![0.0; dim];
        displacement(store.x_of(a), store.x_of(b), &mut dis, bounds, bcs);
        let r = norm_sqr(&dis).sqrt();
        if r == 0.0 || !r.is_finite() {
            return;
        }
        // Weight the correction by inverse mass so an immovable anchor
        // stays put.
        let (wa, wb) = (store.im()[a], store.im()[b]);
        let wsum = wa + wb;
        if wsum == 0.0 {
            return;
        }
        let err = r - self.length;
        let x = store.x_mut();
        for d in 0..dim {
            let n = dis[d] / r;
            x[a * dim + d] -= err * n * wa / wsum;
            x[b * dim + d] += err * n * wb / wsum;
        }
        // Remove the radial component of the relative velocity.
        let v = store.v();
        let mut vrel = 0.0;
        for d in 0..dim {
            vrel += (v[a * dim + d] - v[b * dim + d]) * dis[d] / r;
        }
        let v = store.v_mut();
        for d in 0..dim {
            let n = dis[d] / r;
            v[a * dim + d] -= vrel * n * wa / wsum;
            v[b * dim + d] += vrel * n * wb / wsum;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn open_fixture() -> (ParticleStore, Bounds, Vec<BcFlag>) {
        let store = ParticleStore::new(2, 1).unwrap();
        let bounds = Bounds::new(&[(0.0, 10.0), (0.0, 10.0)]).unwrap();
        (store, bounds, vec![BcFlag::Open, BcFlag::Open])
    }

    #[test]
    fn stretched_bond_pulls_together() {
        let (mut store, bounds, bcs) = open_fixture();
        let ga = store.add_particle(&[1.0, 5.0], &[0.0; 2], 0.1, 1.0, 0).unwrap();
        let gb = store.add_particle(&[3.0, 5.0], &[0.0; 2], 0.1, 1.0, 0).unwrap();
        let mut bonds = HarmonicBonds::new(10.0, 1.0);
        bonds.add_bond(ga, gb);
        bonds.interact(&mut store, &bounds, &bcs).unwrap();
        // r = 2, r0 = 1: a (left) is pulled right, b left.
        assert!(store.f()[0] > 0.0);
        assert!((store.f()[0] + store.f()[2]).abs() < 1e-12);
        assert!((store.f()[0] - 10.0).abs() < 1e-10);
    }

    #[test]
    fn compressed_bond_pushes_apart() {
        let (mut store, bounds, bcs) = open_fixture();
        let ga = store.add_particle(&[1.0, 5.0], &[0.0; 2], 0.1, 1.0, 0).unwrap();
        let gb = store.add_particle(&[1.5, 5.0], &[0.0; 2], 0.1, 1.0, 0).unwrap();
        let mut bonds = HarmonicBonds::new(10.0, 1.0);
        bonds.add_bond(ga, gb);
        bonds.interact(&mut store, &bounds, &bcs).unwrap();
        assert!(store.f()[0] < 0.0, "left particle pushed further left");
    }

    #[test]
    fn bond_to_departed_particle_skipped() {
        let (mut store, bounds, bcs) = open_fixture();
        let ga = store.add_particle(&[1.0, 5.0], &[0.0; 2], 0.1, 1.0, 0).unwrap();
        let gb = store.add_particle(&[3.0, 5.0], &[0.0; 2], 0.1, 1.0, 0).unwrap();
        store.mark_for_removal(1);
        store.do_particle_removal();
        let mut bonds = HarmonicBonds::new(10.0, 1.0);
        bonds.add_bond(ga, gb);
        bonds.interact(&mut store, &bounds, &bcs).unwrap();
        assert!(store.f().iter().all(|&c| c == 0.0));
    }

    #[test]
    fn distance_constraint_restores_length() {
        let (mut store, bounds, bcs) = open_fixture();
        let ga = store.add_particle(&[1.0, 5.0], &[0.0; 2], 0.1, 1.0, 0).unwrap();
        let gb = store.add_particle(&[3.0, 5.0], &[0.5, 0.0], 0.1, 1.0, 0).unwrap();
        let mut link = DistanceConstraint::new(ga, gb, 1.0);
        link.correct(&mut store, &bounds, &bcs);
        let dx = store.x_of(1)[0] - store.x_of(0)[0];
        assert!((dx - 1.0).abs() < 1e-12, "separation {dx}");
        // Radial relative velocity removed.
        let vrel = store.v_of(0)[0] - store.v_of(1)[0];
        assert!(vrel.abs() < 1e-12);
    }

    #[test]
    fn constraint_respects_immovable_anchor() {
        let (mut store, bounds, bcs) = open_fixture();
        let ga = store.add_particle(&[1.0, 5.0], &[0.0; 2], 0.1, 0.0, 0).unwrap();
        let gb = store.add_particle(&[3.0, 5.0], &[0.0; 2], 0.1, 1.0, 0).unwrap();
        let mut link = DistanceConstraint::new(ga, gb, 1.0);
        link.correct(&mut store, &bounds, &bcs);
        assert_eq!(store.x_of(0), &[1.0, 5.0], "anchor moved");
        assert!((store.x_of(1)[0] - 2.0).abs() < 1e-12);
    }
}
