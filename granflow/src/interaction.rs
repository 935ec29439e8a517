// SPDX-License-Identifier: AGPL-3.0-only

//! Pairwise interaction laws and the (type × type) dispatch grid.
//!
//! An interaction law is a tagged variant; the grid maps ordered type pairs
//! to law indices, so dispatch per pair is a table lookup plus a match —
//! no per-pair virtual calls. Kernels act on exactly the two particles of a
//! pair: equal and opposite force increments (Newton's third law), plus
//! optional virial `Σ r·F` and potential accumulation on the dispatcher.
//!
//! A particle's radius doubles as its interaction reach: a pair is within
//! range when `r < sigma_a + sigma_b`. For Lennard-Jones that sum is the
//! truncation radius and the zero-crossing distance sits at
//! `(sigma_a + sigma_b) / cutoff`.

use std::collections::HashSet;

use serde::Serialize;

use crate::bounds::{displacement, norm_sqr, BcFlag, Bounds};
use crate::defaults;
use crate::error::GranError;
use crate::store::ParticleStore;

/// One pairwise force law with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum InteractionLaw {
    /// Linear repulsion on overlap: `|F| = k * (sigma_a + sigma_b - r)`.
    HardSphere {
        /// Spring constant of the overlap repulsion.
        repulsion: f64,
    },
    /// Hard sphere plus normal dissipation
    /// `-gamma * ((v_a - v_b) · n̂)` along the contact normal.
    HardSphereDissipative {
        /// Spring constant of the overlap repulsion.
        repulsion: f64,
        /// Normal damping coefficient.
        dissipation: f64,
    },
    /// Truncated-and-shifted Lennard-Jones with `V(r_cut) = 0`.
    LennardJones {
        /// Well depth (epsilon).
        strength: f64,
        /// Truncation radius in units of the zero-crossing distance.
        cutoff: f64,
    },
}

impl InteractionLaw {
    /// Hard-sphere law with the given repulsion.
    #[must_use]
    pub const fn hard_sphere(repulsion: f64) -> Self {
        Self::HardSphere { repulsion }
    }

    /// Dissipative hard-sphere law.
    #[must_use]
    pub const fn hard_sphere_dissipative(repulsion: f64, dissipation: f64) -> Self {
        Self::HardSphereDissipative {
            repulsion,
            dissipation,
        }
    }

    /// Lennard-Jones law with the conventional 2.5-sigma truncation.
    #[must_use]
    pub const fn lennard_jones(strength: f64) -> Self {
        Self::LennardJones {
            strength,
            cutoff: defaults::DEFAULT_LENNARD_JONES_CUTOFF,
        }
    }

    /// Scalar force magnitude along the contact normal (positive = repulsive
    /// on particle a) and pair potential, for separation `r`, combined
    /// radius `sigsum = sigma_a + sigma_b`, and relative normal velocity
    /// `vn = (v_a - v_b) · n̂`.
    #[must_use]
    pub fn evaluate(&self, r: f64, sigsum: f64, vn: f64) -> (f64, f64) {
        match *self {
            Self::HardSphere { repulsion } => {
                let overlap = (sigsum - r).max(0.0);
                (repulsion * overlap, 0.5 * repulsion * overlap * overlap)
            }
            Self::HardSphereDissipative {
                repulsion,
                dissipation,
            } => {
                let overlap = (sigsum - r).max(0.0);
                (
                    repulsion * overlap - dissipation * vn,
                    0.5 * repulsion * overlap * overlap,
                )
            }
            Self::LennardJones { strength, cutoff } => {
                let sigma0 = sigsum / cutoff;
                let s6 = (sigma0 / r).powi(6);
                let s12 = s6 * s6;
                let force = 24.0 * strength / r * (2.0 * s12 - s6);
                let sc6 = cutoff.powi(-6);
                let shift = 4.0 * strength * (sc6 * sc6 - sc6);
                let potential = 4.0 * strength * (s12 - s6) - shift;
                (force, potential)
            }
        }
    }
}

/// State of one (type, type) grid slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// The scenario never mentioned this pair — no interaction, warn once.
    Unset,
    /// The scenario explicitly declared `None`.
    Explicit,
    /// Index into the law table.
    Law(usize),
}

/// The (type × type) dispatch table driving pair-list force computation.
#[derive(Debug)]
pub struct ForceGrid {
    ntypes: usize,
    grid: Vec<Slot>,
    laws: Vec<InteractionLaw>,
    /// Accumulate `Σ r·F` during [`ForceGrid::interact`].
    pub do_virial: bool,
    /// Accumulate pair potential during [`ForceGrid::interact`].
    pub do_potential: bool,
    virial: f64,
    potential: f64,
    warned: HashSet<(usize, usize)>,
}

impl ForceGrid {
    /// Empty grid for `ntypes` particle types.
    #[must_use]
    pub fn new(ntypes: usize) -> Self {
        Self {
            ntypes,
            grid: vec![Slot::Unset; ntypes * ntypes],
            laws: Vec::new(),
            do_virial: true,
            do_potential: true,
            virial: 0.0,
            potential: 0.0,
            warned: HashSet::new(),
        }
    }

    /// Number of registered types.
    #[must_use]
    pub const fn ntypes(&self) -> usize {
        self.ntypes
    }

    /// Number of distinct laws installed.
    #[must_use]
    pub fn num_laws(&self) -> usize {
        self.laws.len()
    }

    /// Install `law` for the unordered type pair `(t1, t2)`.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::BadArgument`] for an out-of-range type.
    pub fn set_law(&mut self, t1: usize, t2: usize, law: InteractionLaw) -> Result<(), GranError> {
        self.check_types(t1, t2)?;
        let idx = match self.laws.iter().position(|l| *l == law) {
            Some(i) => i,
            None => {
                self.laws.push(law);
                self.laws.len() - 1
            }
        };
        self.grid[t1 * self.ntypes + t2] = Slot::Law(idx);
        self.grid[t2 * self.ntypes + t1] = Slot::Law(idx);
        Ok(())
    }

    /// Declare the unordered type pair `(t1, t2)` explicitly
    /// non-interacting.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::BadArgument`] for an out-of-range type.
    pub fn set_none(&mut self, t1: usize, t2: usize) -> Result<(), GranError> {
        self.check_types(t1, t2)?;
        self.grid[t1 * self.ntypes + t2] = Slot::Explicit;
        self.grid[t2 * self.ntypes + t1] = Slot::Explicit;
        Ok(())
    }

    fn check_types(&self, t1: usize, t2: usize) -> Result<(), GranError> {
        if t1 >= self.ntypes || t2 >= self.ntypes {
            return Err(GranError::BadArgument(format!(
                "type pair ({t1}, {t2}) outside the {} registered types",
                self.ntypes
            )));
        }
        Ok(())
    }

    /// Whether the pair `(t1, t2)` has a law installed.
    #[must_use]
    pub fn does_interact(&self, t1: usize, t2: usize) -> bool {
        matches!(self.grid[t1 * self.ntypes + t2], Slot::Law(_))
    }

    /// Whether type `t` interacts with anything.
    #[must_use]
    pub fn type_interacts(&self, t: usize) -> bool {
        (0..self.ntypes).any(|u| self.does_interact(t, u))
    }

    /// Accumulated virial `Σ r·F` since the last clear.
    #[must_use]
    pub const fn virial(&self) -> f64 {
        self.virial
    }

    /// Accumulated pair potential since the last clear.
    #[must_use]
    pub const fn potential(&self) -> f64 {
        self.potential
    }

    /// Zero the virial and potential accumulators.
    pub fn clear_accumulators(&mut self) {
        self.virial = 0.0;
        self.potential = 0.0;
    }

    /// A grid with the same interacting pairs but every law replaced by a
    /// plain hard sphere — used for hard-sphere relaxation runs.
    #[must_use]
    pub fn hard_sphere_variant(&self, repulsion: f64) -> Self {
        let mut out = Self::new(self.ntypes);
        for t1 in 0..self.ntypes {
            for t2 in t1..self.ntypes {
                match self.grid[t1 * self.ntypes + t2] {
                    // set_law/set_none cannot fail: indices are in range.
                    Slot::Law(_) => {
                        let _ = out.set_law(t1, t2, InteractionLaw::hard_sphere(repulsion));
                    }
                    Slot::Explicit => {
                        let _ = out.set_none(t1, t2);
                    }
                    Slot::Unset => {}
                }
            }
        }
        out
    }

    /// Drive the pair list: look up each pair's law, evaluate it inside the
    /// cutoff, and accumulate forces (third law), virial, and potential.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::NanValue`] when a kernel produces a non-finite
    /// force.
    pub fn interact(
        &mut self,
        store: &mut ParticleStore,
        pairs: &[u32],
        bounds: &Bounds,
        bcs: &[BcFlag],
    ) -> Result<(), GranError> {
        self.clear_accumulators();
        if self.laws.is_empty() || store.number() == 0 {
            return Ok(());
        }
        let dim = store.dim();
        let (x, v, f, sg, types) = store.force_views();
        let mut dis = vec![0.0; dim];

        for pair in pairs.chunks_exact(2) {
            let (a, b) = (pair[0] as usize, pair[1] as usize);
            let (ta, tb) = (types[a], types[b]);
            if ta < 0 || tb < 0 {
                continue;
            }
            let (ta, tb) = (ta as usize, tb as usize);
            let law = match self.grid[ta * self.ntypes + tb] {
                Slot::Law(idx) => self.laws[idx],
                Slot::Explicit => continue,
                Slot::Unset => {
                    if self.warned.insert((ta.min(tb), ta.max(tb))) {
                        eprintln!(
                            "Warning: no interaction configured for type pair ({ta}, {tb}); treating as none"
                        );
                    }
                    continue;
                }
            };
            displacement(
                &x[a * dim..(a + 1) * dim],
                &x[b * dim..(b + 1) * dim],
                &mut dis,
                bounds,
                bcs,
            );
            let rsqr = norm_sqr(&dis);
            let sigsum = sg[a] + sg[b];
            if rsqr >= sigsum * sigsum {
                continue;
            }
            let r = rsqr.sqrt();
            let invr = 1.0 / r;
            // n̂ points from b to a, so vn > 0 means the pair is separating.
            let mut vn = 0.0;
            for d in 0..dim {
                vn += (v[a * dim + d] - v[b * dim + d]) * dis[d] * invr;
            }
            let (magnitude, potential) = law.evaluate(r, sigsum, vn);
            if !magnitude.is_finite() {
                return Err(GranError::NanValue(format!(
                    "kernel produced non-finite force for pair ({a}, {b}) at r = {r:.6e}"
                )));
            }
            for d in 0..dim {
                let comp = magnitude * dis[d] * invr;
                f[a * dim + d] += comp;
                f[b * dim + d] -= comp;
            }
            if self.do_virial {
                self.virial += magnitude * r;
            }
            if self.do_potential {
                self.potential += potential;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pair_store(xa: [f64; 2], xb: [f64; 2], sg: f64) -> ParticleStore {
        let mut s = ParticleStore::new(2, 2).unwrap();
        s.add_particle(&xa, &[0.0; 2], sg, 1.0, 0).unwrap();
        s.add_particle(&xb, &[0.0; 2], sg, 1.0, 0).unwrap();
        s
    }

    fn open_box() -> (Bounds, Vec<BcFlag>) {
        (
            Bounds::new(&[(0.0, 10.0), (0.0, 10.0)]).unwrap(),
            vec![BcFlag::Open, BcFlag::Open],
        )
    }

    #[test]
    fn hard_sphere_repels_on_overlap() {
        let mut store = pair_store([4.6, 5.0], [5.0, 5.0], 0.25);
        let mut grid = ForceGrid::new(2);
        grid.set_law(0, 0, InteractionLaw::hard_sphere(100.0)).unwrap();
        let (bounds, bcs) = open_box();
        grid.interact(&mut store, &[0, 1], &bounds, &bcs).unwrap();
        // overlap = 0.5 - 0.4 = 0.1; |F| = 10, pushing a to -x.
        assert!((store.f()[0] + 10.0).abs() < 1e-10);
        assert!((store.f()[2] - 10.0).abs() < 1e-10);
        assert!(store.f()[1].abs() < 1e-12);
    }

    #[test]
    fn forces_obey_third_law() {
        let mut store = pair_store([4.7, 5.1], [5.0, 4.9], 0.3);
        let mut grid = ForceGrid::new(2);
        grid.set_law(0, 0, InteractionLaw::hard_sphere_dissipative(50.0, 2.0))
            .unwrap();
        store.v_mut()[0] = 1.0;
        store.v_mut()[3] = -0.5;
        let (bounds, bcs) = open_box();
        grid.interact(&mut store, &[0, 1], &bounds, &bcs).unwrap();
        for d in 0..2 {
            assert!(
                (store.f()[d] + store.f()[2 + d]).abs() < 1e-12,
                "third law broken in component {d}"
            );
        }
    }

    #[test]
    fn momentum_conserved_over_many_pairs() {
        let mut store = ParticleStore::new(2, 1).unwrap();
        let mut seed = 9u64;
        let mut next = || {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            (seed >> 33) as f64 / f64::from(1u32 << 31)
        };
        for _ in 0..40 {
            let x = [next() * 3.0, next() * 3.0];
            let v = [next() - 0.5, next() - 0.5];
            store.add_particle(&x, &v, 0.3, 1.0, 0).unwrap();
        }
        let mut grid = ForceGrid::new(1);
        grid.set_law(0, 0, InteractionLaw::hard_sphere_dissipative(80.0, 1.0))
            .unwrap();
        let mut pairs = Vec::new();
        for a in 0..40u32 {
            for b in (a + 1)..40 {
                pairs.push(a);
                pairs.push(b);
            }
        }
        let (bounds, bcs) = open_box();
        grid.interact(&mut store, &pairs, &bounds, &bcs).unwrap();
        let f = store.f();
        for d in 0..2 {
            let total: f64 = (0..40).map(|i| f[i * 2 + d]).sum();
            assert!(total.abs() < 1e-9, "net force {total} in component {d}");
        }
    }

    #[test]
    fn lj_potential_vanishes_at_cutoff() {
        let law = InteractionLaw::lennard_jones(0.01);
        let sigsum = 1.0;
        let (_, v) = law.evaluate(sigsum - 1e-12, sigsum, 0.0);
        assert!(v.abs() < 1e-9, "V(rc) = {v}");
    }

    #[test]
    fn lj_force_repulsive_inside_attractive_outside_minimum() {
        let law = InteractionLaw::lennard_jones(0.01);
        let sigsum = 1.0;
        let sigma0 = sigsum / defaults::DEFAULT_LENNARD_JONES_CUTOFF;
        let r_min = sigma0 * 2.0_f64.powf(1.0 / 6.0);
        let (f_in, _) = law.evaluate(0.9 * r_min, sigsum, 0.0);
        let (f_out, _) = law.evaluate(1.1 * r_min, sigsum, 0.0);
        assert!(f_in > 0.0);
        assert!(f_out < 0.0);
    }

    #[test]
    fn dissipation_opposes_separation() {
        let law = InteractionLaw::hard_sphere_dissipative(0.0, 3.0);
        // Separating pair (vn > 0): dissipative force pulls a back.
        let (f_sep, _) = law.evaluate(0.5, 0.6, 1.0);
        assert!((f_sep + 3.0).abs() < 1e-12);
        // Approaching pair (vn < 0): force pushes a away.
        let (f_app, _) = law.evaluate(0.5, 0.6, -1.0);
        assert!((f_app - 3.0).abs() < 1e-12);
    }

    #[test]
    fn virial_positive_for_compressed_pair() {
        let mut store = pair_store([4.8, 5.0], [5.0, 5.0], 0.2);
        let mut grid = ForceGrid::new(2);
        grid.set_law(0, 0, InteractionLaw::hard_sphere(10.0)).unwrap();
        let (bounds, bcs) = open_box();
        grid.interact(&mut store, &[0, 1], &bounds, &bcs).unwrap();
        assert!(grid.virial() > 0.0);
        assert!(grid.potential() > 0.0);
    }

    #[test]
    fn accumulators_reset_per_interact() {
        let mut store = pair_store([4.8, 5.0], [5.0, 5.0], 0.2);
        let mut grid = ForceGrid::new(2);
        grid.set_law(0, 0, InteractionLaw::hard_sphere(10.0)).unwrap();
        let (bounds, bcs) = open_box();
        grid.interact(&mut store, &[0, 1], &bounds, &bcs).unwrap();
        let first = grid.virial();
        store.clear_f();
        grid.interact(&mut store, &[0, 1], &bounds, &bcs).unwrap();
        assert!((grid.virial() - first).abs() < 1e-12, "virial accumulated across calls");
    }

    #[test]
    fn unset_pair_skipped() {
        let mut store = ParticleStore::new(2, 2).unwrap();
        store.add_particle(&[4.9, 5.0], &[0.0; 2], 0.2, 1.0, 0).unwrap();
        store.add_particle(&[5.0, 5.0], &[0.0; 2], 0.2, 1.0, 1).unwrap();
        let mut grid = ForceGrid::new(2);
        grid.set_law(0, 0, InteractionLaw::hard_sphere(10.0)).unwrap();
        let (bounds, bcs) = open_box();
        grid.interact(&mut store, &[0, 1], &bounds, &bcs).unwrap();
        assert!(store.f().iter().all(|&c| c == 0.0));
    }

    #[test]
    fn explicit_none_skipped_silently() {
        let mut grid = ForceGrid::new(2);
        grid.set_none(0, 1).unwrap();
        assert!(!grid.does_interact(0, 1));
        assert!(!grid.type_interacts(0));
    }

    #[test]
    fn tombstones_skipped() {
        let mut store = pair_store([4.9, 5.0], [5.0, 5.0], 0.2);
        store.mark_for_removal(0);
        let mut grid = ForceGrid::new(2);
        grid.set_law(0, 0, InteractionLaw::hard_sphere(10.0)).unwrap();
        let (bounds, bcs) = open_box();
        grid.interact(&mut store, &[0, 1], &bounds, &bcs).unwrap();
        assert!(store.f().iter().all(|&c| c == 0.0));
    }

    #[test]
    fn coincident_particles_fatal_nan() {
        let mut store = pair_store([5.0, 5.0], [5.0, 5.0], 0.2);
        let mut grid = ForceGrid::new(2);
        grid.set_law(0, 0, InteractionLaw::lennard_jones(0.01)).unwrap();
        let (bounds, bcs) = open_box();
        let err = grid.interact(&mut store, &[0, 1], &bounds, &bcs).unwrap_err();
        assert!(matches!(err, GranError::NanValue(_)));
    }

    #[test]
    fn set_law_rejects_unknown_type() {
        let mut grid = ForceGrid::new(2);
        assert!(grid.set_law(0, 2, InteractionLaw::hard_sphere(1.0)).is_err());
    }

    #[test]
    fn hard_sphere_variant_keeps_topology() {
        let mut grid = ForceGrid::new(3);
        grid.set_law(0, 0, InteractionLaw::lennard_jones(0.01)).unwrap();
        grid.set_law(0, 1, InteractionLaw::hard_sphere_dissipative(5.0, 1.0))
            .unwrap();
        grid.set_none(1, 1).unwrap();
        let hs = grid.hard_sphere_variant(42.0);
        assert!(hs.does_interact(0, 0));
        assert!(hs.does_interact(1, 0));
        assert!(!hs.does_interact(1, 1));
        assert!(!hs.does_interact(2, 2));
        assert_eq!(hs.num_laws(), 1);
    }

    #[test]
    fn wrap_pair_interacts_through_boundary() {
        let mut store = pair_store([0.1, 5.0], [9.9, 5.0], 0.15);
        let mut grid = ForceGrid::new(2);
        grid.set_law(0, 0, InteractionLaw::hard_sphere(10.0)).unwrap();
        let bounds = Bounds::new(&[(0.0, 10.0), (0.0, 10.0)]).unwrap();
        let bcs = vec![BcFlag::Wrap, BcFlag::Wrap];
        grid.interact(&mut store, &[0, 1], &bounds, &bcs).unwrap();
        // Separation through the boundary is 0.2 < 0.3: overlap 0.1.
        assert!((store.f()[0] - 1.0).abs() < 1e-10, "f = {}", store.f()[0]);
        assert!((store.f()[2] + 1.0).abs() < 1e-10);
    }
}
