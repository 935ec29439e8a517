// SPDX-License-Identifier: AGPL-3.0-only

//! Cell-list spatial decomposition and Verlet pair list.
//!
//! The simulation box is divided into a uniform integer lattice of cells at
//! least one interaction diameter wide. Pair candidates are generated by
//! walking, for every cell, the lower half of its Moore stencil (plus the
//! cell itself), so each unordered cell pair is visited once. Candidates
//! within `sigma_a + sigma_b + skin_depth` (minimum-image) enter a flat
//! Verlet pair list that stays valid until particles have moved a skin's
//! worth.
//!
//! ## Rebuild decision
//!
//! Positions are snapshotted at every rebuild. Each pre-force phase the
//! maximum single-particle displacement since the snapshot is estimated
//! (optionally from a sample of the particles); twice that value is the
//! worst-case closing motion of two particles. When it reaches
//! `motion_factor * skin_depth` — or too much simulated time has passed —
//! the cells and the pair list are rebuilt.
//!
//! Sampling assumes a homogeneous system: a localized burst of fast
//! particles can be missed when only the array tail is sampled. Strict mode
//! (`sample_size == 0`) scans every particle.
//!
//! ## Two-cell axes
//!
//! When an axis has exactly two cells under Wrap, the `+1` and `-1` stencil
//! offsets alias to the same neighbor, which the naive walk would visit
//! twice (the old "two-sector" collapse worked around this by refusing
//! two-cell axes). Here adjacency is deduplicated globally when the grid is
//! built, so two-cell axes produce each pair exactly once.

use std::collections::HashSet;

use rayon::prelude::*;

use crate::bounds::{displacement, norm_sqr, BcFlag, Bounds};
use crate::defaults;
use crate::error::GranError;
use crate::interaction::ForceGrid;
use crate::store::ParticleStore;

/// Uniform cell lattice over the simulation bounds.
#[derive(Debug, Clone)]
pub struct CellGrid {
    /// Cells per dimension.
    pub dims: Vec<usize>,
    /// Cell width per dimension.
    pub widths: Vec<f64>,
    inv_widths: Vec<f64>,
    min: Vec<f64>,
    /// Deduplicated half-stencil adjacency, one list per cell.
    neighbors: Vec<Vec<u32>>,
    /// Particle ids per cell.
    cells: Vec<Vec<u32>>,
}

impl CellGrid {
    /// Build the lattice geometry and its half-stencil adjacency.
    ///
    /// `target_width` is the smallest acceptable cell width; each dimension
    /// gets `max(1, floor(box / target_width))` cells.
    #[must_use]
    pub fn build(bounds: &Bounds, bcs: &[BcFlag], target_width: f64) -> Self {
        let dim = bounds.dim();
        let mut dims = Vec::with_capacity(dim);
        let mut widths = Vec::with_capacity(dim);
        let mut inv_widths = Vec::with_capacity(dim);
        for d in 0..dim {
            let n = ((bounds.wd(d) / target_width).floor() as usize).max(1);
            dims.push(n);
            let w = bounds.wd(d) / n as f64;
            widths.push(w);
            inv_widths.push(1.0 / w);
        }
        let ncells: usize = dims.iter().product();

        // Lower half of the Moore stencil: the first floor(3^dim / 2)
        // offsets in base-3 digit order are exactly those preceding the
        // all-zero center.
        let three_pow: usize = 3usize.pow(dim as u32);
        let mut stencil = Vec::with_capacity(three_pow / 2);
        for code in 0..three_pow / 2 {
            let mut c = code;
            let mut offset = vec![0i64; dim];
            for o in offset.iter_mut() {
                *o = (c % 3) as i64 - 1;
                c /= 3;
            }
            stencil.push(offset);
        }

        // Resolve the stencil per cell, wrapping through periodic faces and
        // discarding out-of-range neighbors on non-periodic axes. A global
        // seen-set keeps each unordered cell pair unique even when wrap
        // aliasing (two-cell axes) maps two offsets onto one neighbor.
        let mut neighbors = vec![Vec::new(); ncells];
        let mut seen: HashSet<(u32, u32)> = HashSet::new();
        let mut tuple = vec![0usize; dim];
        for cell in 0..ncells {
            Self::linear_to_tuple_static(&dims, cell, &mut tuple);
            'offsets: for offset in &stencil {
                let mut other = vec![0i64; dim];
                for d in 0..dim {
                    let raw = tuple[d] as i64 + offset[d];
                    other[d] = if raw < 0 || raw >= dims[d] as i64 {
                        if bcs[d] == BcFlag::Wrap {
                            raw.rem_euclid(dims[d] as i64)
                        } else {
                            continue 'offsets;
                        }
                    } else {
                        raw
                    };
                }
                let linear = Self::tuple_to_linear_static(&dims, &other);
                if linear == cell {
                    // Single-cell axis: the in-cell pairing already covers it.
                    continue;
                }
                let key = (
                    (cell.min(linear)) as u32,
                    (cell.max(linear)) as u32,
                );
                if seen.insert(key) {
                    neighbors[cell].push(linear as u32);
                }
            }
        }

        Self {
            dims,
            widths,
            inv_widths,
            min: bounds.min.clone(),
            neighbors,
            cells: vec![Vec::new(); ncells],
        }
    }

    /// Total number of cells.
    #[must_use]
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Linear cell index containing position `x` (clamped onto the lattice).
    #[must_use]
    pub fn cell_index(&self, x: &[f64]) -> usize {
        let dim = self.dims.len();
        let mut linear = 0usize;
        for d in 0..dim {
            let raw = ((x[d] - self.min[d]) * self.inv_widths[d]) as i64;
            let idx = raw.clamp(0, self.dims[d] as i64 - 1) as usize;
            linear = linear * self.dims[d] + idx;
        }
        linear
    }

    fn linear_to_tuple_static(dims: &[usize], linear: usize, tuple: &mut [usize]) {
        let mut rem = linear;
        for d in (0..dims.len()).rev() {
            tuple[d] = rem % dims[d];
            rem /= dims[d];
        }
    }

    fn tuple_to_linear_static(dims: &[usize], tuple: &[i64]) -> usize {
        let mut linear = 0usize;
        for d in 0..dims.len() {
            linear = linear * dims[d] + tuple[d] as usize;
        }
        linear
    }

    /// Empty every cell, keeping allocations.
    pub fn clear_cells(&mut self) {
        for c in &mut self.cells {
            c.clear();
        }
    }

    /// Scatter particles `[0, size)` into cells, skipping tombstones.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::CellOverflow`] when any cell exceeds
    /// `max_occupancy`.
    pub fn fill_cells(
        &mut self,
        x: &[f64],
        types: &[i64],
        dim: usize,
        max_occupancy: usize,
    ) -> Result<(), GranError> {
        self.clear_cells();
        for (i, t) in types.iter().enumerate() {
            if *t < 0 {
                continue;
            }
            let cell = self.cell_index(&x[i * dim..(i + 1) * dim]);
            let bucket = &mut self.cells[cell];
            if bucket.len() >= max_occupancy {
                return Err(GranError::CellOverflow {
                    cell,
                    occupancy: bucket.len() + 1,
                });
            }
            bucket.push(i as u32);
        }
        Ok(())
    }
}

/// Neighbor index: cell grid, Verlet pair list, and rebuild bookkeeping.
#[derive(Debug)]
pub struct NeighborIndex {
    /// Margin added to interaction ranges when listing pairs.
    pub skin_depth: f64,
    /// Target cell width as a multiple of the minimum cutoff.
    pub cutoff_factor: f64,
    /// Fraction of the skin particles may close before the list is stale.
    pub motion_factor: f64,
    /// Safety factor tightening the motion criterion.
    pub mv_ratio_tolerance: f64,
    /// Longest simulated time between rebuilds.
    pub max_update_delay: f64,
    /// Particles sampled for the motion estimate; 0 scans all (strict mode).
    pub sample_size: usize,
    /// Hard per-cell occupancy bound.
    pub max_cell_occupancy: usize,

    grid: Option<CellGrid>,
    /// Flat pair list: `[a0, b0, a1, b1, ...]` with `a < b`.
    pairs: Vec<u32>,
    /// Positions of the sampled particles at the last rebuild, tail-first:
    /// row `k` holds particle `number - 1 - k`.
    snapshot: Vec<f64>,
    min_cutoff: f64,

    last_check: f64,
    last_update: f64,
    update_delay: f64,
    steps_since_remake: usize,

    number_of_remakes: usize,
    missed_target: usize,
    ave_miss: f64,
}

impl Default for NeighborIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl NeighborIndex {
    /// Neighbor index with the documented default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            skin_depth: defaults::DEFAULT_SKIN_DEPTH,
            cutoff_factor: defaults::DEFAULT_CUTOFF_FACTOR,
            motion_factor: defaults::DEFAULT_MOTION_FACTOR,
            mv_ratio_tolerance: defaults::DEFAULT_MV_RATIO_TOLERANCE,
            max_update_delay: defaults::DEFAULT_MAX_UPDATE_DELAY,
            sample_size: 0,
            max_cell_occupancy: defaults::MAX_CELL_OCCUPANCY,
            grid: None,
            pairs: Vec::new(),
            snapshot: Vec::new(),
            min_cutoff: 0.0,
            last_check: -1.0,
            last_update: -1.0,
            update_delay: 1e-4,
            steps_since_remake: 0,
            number_of_remakes: 0,
            missed_target: 0,
            ave_miss: 0.0,
        }
    }

    /// The flat pair list: consecutive `(a, b)` index pairs with `a < b`.
    #[must_use]
    pub fn pairs(&self) -> &[u32] {
        &self.pairs
    }

    /// Number of listed pairs.
    #[must_use]
    pub fn num_pairs(&self) -> usize {
        self.pairs.len() / 2
    }

    /// The current grid, if one has been built.
    #[must_use]
    pub const fn grid(&self) -> Option<&CellGrid> {
        self.grid.as_ref()
    }

    /// Interaction cutoff the current grid was sized for.
    #[must_use]
    pub const fn min_cutoff(&self) -> f64 {
        self.min_cutoff
    }

    /// How many times the pair list has been rebuilt.
    #[must_use]
    pub const fn number_of_remakes(&self) -> usize {
        self.number_of_remakes
    }

    /// How many times the motion estimate exceeded the target when checked.
    #[must_use]
    pub const fn missed_target(&self) -> usize {
        self.missed_target
    }

    /// Average motion ratio over the missed checks.
    #[must_use]
    pub fn average_miss(&self) -> f64 {
        if self.missed_target > 0 {
            self.ave_miss / self.missed_target as f64
        } else {
            0.0
        }
    }

    /// Reset the per-run clocks. Called from the engine's pre-integrate.
    pub fn pre_integrate(&mut self) {
        self.last_check = -1.0;
        self.last_update = -1.0;
        self.update_delay = 1e-4;
        self.steps_since_remake = 0;
    }

    /// Pre-force maintenance: decide whether the pair list is stale and
    /// rebuild it if so; otherwise keep positions wrapped. Returns whether
    /// a rebuild happened.
    ///
    /// # Errors
    ///
    /// Propagates [`GranError::CellOverflow`] from the rebuild.
    pub fn pre_forces(
        &mut self,
        store: &mut ParticleStore,
        forces: &ForceGrid,
        bounds: &Bounds,
        bcs: &[BcFlag],
        time: f64,
    ) -> Result<bool, GranError> {
        self.steps_since_remake += 1;
        if store.number() == 0 {
            return Ok(false);
        }
        if store.needs_remake() {
            self.construct(store, forces, bounds, bcs, time)?;
            return Ok(true);
        }
        if time - self.last_update > self.update_delay {
            if forces.num_laws() > 0 && self.check_needs_remake(store, bounds, bcs, time) {
                self.construct(store, forces, bounds, bcs, time)?;
                return Ok(true);
            }
            wrap_positions_of(store, bounds, bcs);
        }
        Ok(false)
    }

    /// Rebuild everything: drop halo/ghost copies, compact, scrub
    /// non-finite particles, wrap, re-size the grid, scatter, and list
    /// pairs. Snapshots positions for the staleness estimate.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::CellOverflow`] when a cell exceeds the
    /// occupancy bound.
    pub fn construct(
        &mut self,
        store: &mut ParticleStore,
        forces: &ForceGrid,
        bounds: &Bounds,
        bcs: &[BcFlag],
        time: f64,
    ) -> Result<(), GranError> {
        store.remove_halo_and_ghost_particles();
        store.do_particle_removal();
        if store.remove_bad_particles() {
            store.do_particle_removal();
        }
        wrap_positions_of(store, bounds, bcs);

        self.last_update = time;
        self.steps_since_remake = 0;
        self.number_of_remakes += 1;
        self.pairs.clear();

        if store.number() == 0 {
            self.grid = None;
            self.fill_snapshot(store);
            return Ok(());
        }

        // Largest and second-largest interaction radii over owned,
        // interacting particles size the cells so that any listed pair fits
        // inside one stencil step.
        let (sig1, sig2) = interacting_radii(store, forces);
        self.min_cutoff = sig1 + sig2 + self.skin_depth;
        let target = self.min_cutoff * self.cutoff_factor;

        let mut grid = match self.grid.take() {
            Some(g) if grid_matches(&g, bounds, target) => g,
            _ => CellGrid::build(bounds, bcs, target),
        };

        let dim = store.dim();
        grid.fill_cells(store.x(), store.types(), dim, self.max_cell_occupancy)?;
        self.list_pairs(&grid, store, bounds, bcs);
        self.grid = Some(grid);
        self.fill_snapshot(store);
        Ok(())
    }

    /// Walk cells and their half stencil, appending close pairs.
    fn list_pairs(
        &mut self,
        grid: &CellGrid,
        store: &ParticleStore,
        bounds: &Bounds,
        bcs: &[BcFlag],
    ) {
        let dim = store.dim();
        let x = store.x();
        let sg = store.sg();
        let types = store.types();
        let skin = self.skin_depth;
        let pairs = &mut self.pairs;
        let mut dis = vec![0.0; dim];

        let mut try_pair = |a: u32, b: u32, dis: &mut [f64], pairs: &mut Vec<u32>| {
            let (ai, bi) = (a as usize, b as usize);
            if types[ai] < 0 || types[bi] < 0 {
                return;
            }
            displacement(
                &x[ai * dim..(ai + 1) * dim],
                &x[bi * dim..(bi + 1) * dim],
                dis,
                bounds,
                bcs,
            );
            let reach = sg[ai] + sg[bi] + skin;
            if norm_sqr(dis) < reach * reach {
                pairs.push(a.min(b));
                pairs.push(a.max(b));
            }
        };

        for cell in 0..grid.num_cells() {
            let bucket = &grid.cells[cell];
            for (k, &a) in bucket.iter().enumerate() {
                for &b in &bucket[k + 1..] {
                    try_pair(a, b, &mut dis, pairs);
                }
            }
            for &ncell in &grid.neighbors[cell] {
                for &a in bucket {
                    for &b in &grid.cells[ncell as usize] {
                        try_pair(a, b, &mut dis, pairs);
                    }
                }
            }
        }
    }

    /// Record the sampled particle positions for the staleness estimate.
    fn fill_snapshot(&mut self, store: &ParticleStore) {
        let dim = store.dim();
        let number = store.size();
        let samples = if self.sample_size > 0 {
            self.sample_size.min(number)
        } else {
            number
        };
        self.snapshot.clear();
        self.snapshot.reserve(samples * dim);
        for k in 0..samples {
            let i = number - 1 - k;
            self.snapshot.extend_from_slice(store.x_of(i));
        }
    }

    /// Whether particle motion since the snapshot warrants a rebuild. Also
    /// reschedules the next check and tracks missed-target statistics.
    pub fn check_needs_remake(
        &mut self,
        store: &ParticleStore,
        _bounds: &Bounds,
        _bcs: &[BcFlag],
        time: f64,
    ) -> bool {
        self.last_check = time;
        if self.last_check - self.last_update > self.max_update_delay {
            return true;
        }
        let max_motion = self.max_motion(store);
        let motion_ratio = max_motion / self.skin_depth;
        if motion_ratio > 0.0 {
            self.update_delay = self.max_update_delay.min(
                self.mv_ratio_tolerance * self.motion_factor * (self.last_check - self.last_update)
                    / motion_ratio,
            );
        }
        if motion_ratio > self.motion_factor {
            self.missed_target += 1;
            self.ave_miss += motion_ratio;
        }
        motion_ratio > self.mv_ratio_tolerance * self.motion_factor
    }

    /// Worst-case closing motion: twice the largest single displacement
    /// since the snapshot (two maximal movers can approach head-on).
    ///
    /// Displacements past the wrap-plausibility bound are position-fold
    /// artifacts, not motion, and are excluded.
    #[must_use]
    pub fn max_motion(&self, store: &ParticleStore) -> f64 {
        let dim = store.dim();
        let number = store.size();
        let samples = self.snapshot.len() / dim;
        if samples == 0 || number == 0 {
            return 0.0;
        }
        let bound = defaults::WRAP_PLAUSIBLE_FACTOR * self.skin_depth;
        let max_plausible = bound * bound;
        let x = store.x();
        let max_dsqr = (0..samples.min(number))
            .into_par_iter()
            .map(|k| {
                let i = number - 1 - k;
                let snap = &self.snapshot[k * dim..(k + 1) * dim];
                let mut dsqr = 0.0;
                for d in 0..dim {
                    let ds = x[i * dim + d] - snap[d];
                    dsqr += ds * ds;
                }
                if dsqr < max_plausible {
                    dsqr
                } else {
                    0.0
                }
            })
            .reduce(|| 0.0, f64::max);
        2.0 * max_dsqr.sqrt()
    }

    /// Ids of all valid particles within `r` of particle `i`
    /// (minimum-image; `i` itself excluded).
    #[must_use]
    pub fn all_within(
        &self,
        store: &ParticleStore,
        i: usize,
        r: f64,
        bounds: &Bounds,
        bcs: &[BcFlag],
    ) -> Vec<usize> {
        let dim = store.dim();
        let x = store.x();
        let types = store.types();
        let mut dis = vec![0.0; dim];
        let mut found = Vec::new();
        for j in 0..store.size() {
            if j == i || types[j] < 0 {
                continue;
            }
            displacement(
                &x[i * dim..(i + 1) * dim],
                &x[j * dim..(j + 1) * dim],
                &mut dis,
                bounds,
                bcs,
            );
            if norm_sqr(&dis) < r * r {
                found.push(j);
            }
        }
        found
    }

    /// Mark the smaller particle of every pair overlapping by more than
    /// `fraction` of its radius, then compact. Returns how many were
    /// removed. The pair list must be current.
    pub fn remove_overlapping(
        &mut self,
        store: &mut ParticleStore,
        bounds: &Bounds,
        bcs: &[BcFlag],
        fraction: f64,
    ) -> usize {
        let dim = store.dim();
        let mut dis = vec![0.0; dim];
        let mut doomed: Vec<usize> = Vec::new();
        {
            let x = store.x();
            let sg = store.sg();
            let types = store.types();
            for pair in self.pairs.chunks_exact(2) {
                let (a, b) = (pair[0] as usize, pair[1] as usize);
                if types[a] < 0 || types[b] < 0 {
                    continue;
                }
                displacement(
                    &x[a * dim..(a + 1) * dim],
                    &x[b * dim..(b + 1) * dim],
                    &mut dis,
                    bounds,
                    bcs,
                );
                let r = norm_sqr(&dis).sqrt();
                let overlap = sg[a] + sg[b] - r;
                let smaller = if sg[a] < sg[b] { a } else { b };
                if overlap > fraction * sg[smaller] {
                    doomed.push(smaller);
                }
            }
        }
        let removed = doomed.len();
        for i in doomed {
            store.mark_for_removal(i);
        }
        if removed > 0 {
            store.do_particle_removal();
        }
        removed
    }
}

/// Fold every position into the box along Wrap dimensions.
///
/// Idempotent; Open/Reflect/Repulse dimensions are untouched.
pub fn wrap_positions_of(store: &mut ParticleStore, bounds: &Bounds, bcs: &[BcFlag]) {
    let dim = store.dim();
    let size = store.size();
    let x = store.x_mut();
    for d in 0..dim {
        if bcs[d] != BcFlag::Wrap {
            continue;
        }
        for i in 0..size {
            x[i * dim + d] = bounds.wrap_coordinate(x[i * dim + d], d);
        }
    }
}

/// Largest and second-largest radii over owned, valid, interacting
/// particles. Falls back to the first particle's radius when nothing
/// interacts.
fn interacting_radii(store: &ParticleStore, forces: &ForceGrid) -> (f64, f64) {
    let mut sig1 = 0.0f64;
    let mut sig2 = 0.0f64;
    let sg = store.sg();
    let types = store.types();
    for i in 0..store.size_owned() {
        let t = types[i];
        if t < 0 || !forces.type_interacts(t as usize) {
            continue;
        }
        let s = sg[i];
        if s > sig1 {
            sig2 = sig1;
            sig1 = s;
        } else if s > sig2 {
            sig2 = s;
        }
    }
    if sig1 == 0.0 && store.size() > 0 {
        sig1 = sg[0];
        sig2 = sg[0];
    }
    (sig1, sig2)
}

/// Whether an existing grid still fits the bounds and target width.
fn grid_matches(grid: &CellGrid, bounds: &Bounds, target: f64) -> bool {
    (0..bounds.dim()).all(|d| {
        let n = ((bounds.wd(d) / target).floor() as usize).max(1);
        n == grid.dims[d]
    })
}
