// SPDX-License-Identifier: AGPL-3.0-only

//! Particle store: owns all per-particle state for one node.
//!
//! Data is held as flat interleaved arrays (`[i * dim + d]` for vector
//! entries, `[i]` for scalars and integers), one array per named quantity.
//! The first three vector entries are position, velocity, force; the first
//! two scalars are radius and inverse mass; the first two integers are type
//! and global id. Additional named arrays can be requested at setup time.
//!
//! ## Index-range partitioning
//!
//! ```text
//! [0 ............. first_halo ........... first_ghost .......... size)
//!    owned & real      halo copies           ghost copies
//! ```
//!
//! Halo copies are local duplicates of owned particles displaced by a
//! lattice vector; ghost copies are read-only shadows of remote particles.
//! Both carry global id −1 and never appear in the id map.
//!
//! ## Counting invariants
//!
//! `number` counts slots with `type >= 0` in `[0, size)`, and
//! `number <= size <= capacity` at all times. A tombstone (`type == -1`)
//! occupies a slot until [`ParticleStore::do_particle_removal`] compacts the
//! arrays, after which `number == size` and no tombstones remain.

use std::collections::{BTreeSet, HashMap};

use crate::error::GranError;

/// Granularity of capacity growth: the arrays never grow by fewer slots.
const GROWTH_QUANTUM: usize = 32;

/// One halo copy: array index of the copy, array index of its primary, and
/// the lattice shift that separates them.
#[derive(Debug, Clone)]
struct HaloLink {
    halo: usize,
    primary: usize,
    shift: Vec<f64>,
}

/// Scalar projection used to order particles during a sort.
#[derive(Debug, Clone)]
enum SortKey {
    /// Position component along one axis.
    Axis(usize),
    /// Position projected onto an arbitrary direction.
    Projection(Vec<f64>),
}

/// Container for all particle data on this node.
#[derive(Debug)]
pub struct ParticleStore {
    dim: usize,
    ntypes: usize,

    /// Vector quantities, `[entry][i * dim + d]`. 0 = position, 1 = velocity,
    /// 2 = force.
    vdata: Vec<Vec<f64>>,
    /// Scalar quantities, `[entry][i]`. 0 = radius, 1 = inverse mass.
    sdata: Vec<Vec<f64>>,
    /// Integer quantities, `[entry][i]`. 0 = type, 1 = global id.
    idata: Vec<Vec<i64>>,

    vector_names: HashMap<String, usize>,
    scalar_names: HashMap<String, usize>,
    integer_names: HashMap<String, usize>,

    next_global_id: i64,
    /// global id → local index, for every owned particle.
    id_map: HashMap<i64, usize>,
    halo_links: Vec<HaloLink>,
    /// Pending removals (local indices), ordered so compaction fills the
    /// lowest holes first.
    remove_list: BTreeSet<usize>,

    number: usize,
    size: usize,
    capacity: usize,
    first_halo: usize,
    first_ghost: usize,

    needs_remake: bool,
}

/// Index of the position entry in the vector data table.
pub const POS: usize = 0;
/// Index of the velocity entry in the vector data table.
pub const VEL: usize = 1;
/// Index of the force entry in the vector data table.
pub const FRC: usize = 2;
/// Index of the radius entry in the scalar data table.
pub const SG: usize = 0;
/// Index of the inverse-mass entry in the scalar data table.
pub const IM: usize = 1;
/// Index of the type entry in the integer data table.
pub const TYPE: usize = 0;
/// Index of the global-id entry in the integer data table.
pub const GID: usize = 1;

impl ParticleStore {
    /// Create an empty store for `dim`-dimensional particles of `ntypes`
    /// registered types.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::BadDimension`] for `dim == 0` and
    /// [`GranError::BadArgument`] for `ntypes == 0`.
    pub fn new(dim: usize, ntypes: usize) -> Result<Self, GranError> {
        if dim == 0 {
            return Err(GranError::BadDimension(
                "particle store requires dim >= 1".into(),
            ));
        }
        if ntypes == 0 {
            return Err(GranError::BadArgument(
                "at least one particle type must be registered".into(),
            ));
        }
        Ok(Self {
            dim,
            ntypes,
            vdata: vec![Vec::new(), Vec::new(), Vec::new()],
            sdata: vec![Vec::new(), Vec::new()],
            idata: vec![Vec::new(), Vec::new()],
            vector_names: HashMap::new(),
            scalar_names: HashMap::new(),
            integer_names: HashMap::new(),
            next_global_id: 0,
            id_map: HashMap::new(),
            halo_links: Vec::new(),
            remove_list: BTreeSet::new(),
            number: 0,
            size: 0,
            capacity: 0,
            first_halo: 0,
            first_ghost: 0,
            needs_remake: false,
        })
    }

    // ── Counts and classification ──────────────────────────────────────

    /// Spatial dimension of the stored vectors.
    #[must_use]
    pub const fn dim(&self) -> usize {
        self.dim
    }

    /// Number of registered particle types.
    #[must_use]
    pub const fn ntypes(&self) -> usize {
        self.ntypes
    }

    /// Count of valid (non-tombstone) particles, halos and ghosts included.
    #[must_use]
    pub const fn number(&self) -> usize {
        self.number
    }

    /// Count of valid owned particles (excludes halo and ghost copies).
    #[must_use]
    pub fn number_owned(&self) -> usize {
        self.idata[TYPE][..self.first_halo]
            .iter()
            .filter(|&&t| t >= 0)
            .count()
    }

    /// Extent of the array range that may contain valid particles.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Extent of the owned region (halo copies start here).
    #[must_use]
    pub const fn size_owned(&self) -> usize {
        self.first_halo
    }

    /// Allocated capacity in particles.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index of the first halo copy (== `size` when there are none).
    #[must_use]
    pub const fn first_halo(&self) -> usize {
        self.first_halo
    }

    /// Index of the first ghost copy (== `size` when there are none).
    #[must_use]
    pub const fn first_ghost(&self) -> usize {
        self.first_ghost
    }

    /// Number of ghost copies.
    #[must_use]
    pub const fn number_ghosts(&self) -> usize {
        self.size - self.first_ghost
    }

    /// Whether `i` is a valid owned particle.
    #[must_use]
    pub fn is_real(&self, i: usize) -> bool {
        i < self.first_halo && self.idata[TYPE][i] >= 0
    }

    /// Whether `i` is a halo copy.
    #[must_use]
    pub const fn is_halo(&self, i: usize) -> bool {
        self.first_halo <= i && i < self.first_ghost
    }

    /// Whether `i` is a ghost copy.
    #[must_use]
    pub const fn is_ghost(&self, i: usize) -> bool {
        self.first_ghost <= i && i < self.size
    }

    /// Whether slot `i` holds a valid (non-tombstone) particle.
    #[must_use]
    pub fn valid(&self, i: usize) -> bool {
        i < self.size && self.idata[TYPE][i] >= 0
    }

    // ── Flag plumbing ──────────────────────────────────────────────────

    /// Whether store mutations have invalidated local indices held elsewhere
    /// (the neighbor index watches this).
    #[must_use]
    pub const fn needs_remake(&self) -> bool {
        self.needs_remake
    }

    /// Set or clear the needs-remake flag.
    pub fn set_needs_remake(&mut self, flag: bool) {
        self.needs_remake = flag;
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Grow the arrays so at least `n` particles fit without reallocation.
    pub fn reserve(&mut self, n: usize) {
        if n > self.capacity {
            self.grow(n - self.capacity);
        }
    }

    fn grow(&mut self, requested: usize) {
        let extra = requested.max(GROWTH_QUANTUM);
        self.capacity += extra;
        for v in &mut self.vdata {
            v.resize(self.capacity * self.dim, 0.0);
        }
        for s in &mut self.sdata {
            s.resize(self.capacity, 0.0);
        }
        for i in &mut self.idata {
            i.resize(self.capacity, -1);
        }
    }

    /// Append an owned particle. Returns its global id.
    ///
    /// Existing indices remain valid: the particle lands at the tail and
    /// capacity growth preserves contents.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::BadArgument`] if `ptype` is not a registered
    /// type, and [`GranError::InvalidSetup`] if halo or ghost copies are
    /// present (owned particles may only be added while the suffix is
    /// empty; the engine removes the suffix before particle creation).
    pub fn add_particle(
        &mut self,
        x: &[f64],
        v: &[f64],
        sg: f64,
        im: f64,
        ptype: i64,
    ) -> Result<i64, GranError> {
        if ptype < 0 || ptype as usize >= self.ntypes {
            return Err(GranError::BadArgument(format!(
                "particle type {ptype} not in [0, {})",
                self.ntypes
            )));
        }
        if x.len() != self.dim || v.len() != self.dim {
            return Err(GranError::BadDimension(format!(
                "position/velocity of length {}/{} in a {}-d store",
                x.len(),
                v.len(),
                self.dim
            )));
        }
        if self.first_halo != self.size {
            return Err(GranError::InvalidSetup(
                "cannot add owned particles while halo/ghost copies exist".into(),
            ));
        }
        if self.size == self.capacity {
            self.grow(GROWTH_QUANTUM);
        }
        let i = self.size;
        let base = i * self.dim;
        self.vdata[POS][base..base + self.dim].copy_from_slice(x);
        self.vdata[VEL][base..base + self.dim].copy_from_slice(v);
        self.vdata[FRC][base..base + self.dim].fill(0.0);
        for extra in self.vdata.iter_mut().skip(3) {
            extra[base..base + self.dim].fill(0.0);
        }
        self.sdata[SG][i] = sg;
        self.sdata[IM][i] = im;
        for extra in self.sdata.iter_mut().skip(2) {
            extra[i] = 0.0;
        }
        let gid = self.next_global_id;
        self.next_global_id += 1;
        self.idata[TYPE][i] = ptype;
        self.idata[GID][i] = gid;
        for extra in self.idata.iter_mut().skip(2) {
            extra[i] = 0;
        }
        self.id_map.insert(gid, i);
        self.size += 1;
        self.number += 1;
        self.first_halo = self.size;
        self.first_ghost = self.size;
        Ok(gid)
    }

    /// Mark slot `i` for removal: tombstone the type, zero velocity and
    /// force, drop the global id. Idempotent.
    pub fn mark_for_removal(&mut self, i: usize) {
        if i >= self.size || self.idata[TYPE][i] < 0 {
            return;
        }
        self.remove_list.insert(i);
        self.idata[TYPE][i] = -1;
        let gid = self.idata[GID][i];
        if gid >= 0 {
            self.id_map.remove(&gid);
        }
        self.idata[GID][i] = -1;
        let base = i * self.dim;
        self.vdata[VEL][base..base + self.dim].fill(0.0);
        self.vdata[FRC][base..base + self.dim].fill(0.0);
        self.number -= 1;
    }

    /// Compact the arrays: every tombstone is filled by a valid particle
    /// from the tail. On return `number == size` and all types are
    /// non-negative.
    ///
    /// Halo and ghost copies are removed first (they are recreated at the
    /// next neighbor rebuild anyway, and compaction across the partition
    /// boundary would scramble it). Sets the needs-remake flag if anything
    /// moved.
    pub fn do_particle_removal(&mut self) {
        self.remove_halo_and_ghost_particles();
        if self.remove_list.is_empty() {
            return;
        }
        let holes = std::mem::take(&mut self.remove_list);
        let mut back = self.size;
        for &hole in &holes {
            if hole + 1 >= back {
                break;
            }
            back -= 1;
            while back > hole && self.idata[TYPE][back] < 0 {
                back -= 1;
            }
            if back > hole {
                self.move_particle(back, hole);
            } else {
                break;
            }
        }
        self.size = self.number;
        self.first_halo = self.size;
        self.first_ghost = self.size;
        self.needs_remake = true;
    }

    /// Copy every array entry of `src` into `dst` (a hole) and remap the
    /// global id. `dst` must be a tombstone.
    fn move_particle(&mut self, src: usize, dst: usize) {
        let d = self.dim;
        for v in &mut self.vdata {
            v.copy_within(src * d..(src + 1) * d, dst * d);
        }
        for s in &mut self.sdata {
            s[dst] = s[src];
        }
        for idat in &mut self.idata {
            idat[dst] = idat[src];
        }
        let gid = self.idata[GID][dst];
        if gid >= 0 {
            self.id_map.insert(gid, dst);
        }
        self.idata[TYPE][src] = -1;
        self.needs_remake = true;
    }

    /// Tombstone every owned particle with a non-finite position or
    /// velocity component. Returns whether any were found; if so the
    /// needs-remake flag is set so the next rebuild compacts them away.
    pub fn remove_bad_particles(&mut self) -> bool {
        let mut found = false;
        for i in 0..self.first_halo {
            if self.idata[TYPE][i] < 0 {
                continue;
            }
            let base = i * self.dim;
            let bad = self.vdata[POS][base..base + self.dim]
                .iter()
                .chain(&self.vdata[VEL][base..base + self.dim])
                .any(|c| !c.is_finite());
            if bad {
                self.mark_for_removal(i);
                found = true;
            }
        }
        if found {
            self.needs_remake = true;
        }
        found
    }

    // ── Sorting ────────────────────────────────────────────────────────

    /// Reorder particles by position along axis `axis` (permutation
    /// scatter; ordering need not be stable). All arrays move coherently
    /// and the id map is rebuilt.
    ///
    /// Halo/ghost copies are removed and the store is compacted first.
    pub fn sort_by_axis(&mut self, axis: usize) {
        self.apply_sort(SortKey::Axis(axis));
    }

    /// Reorder particles by position projected onto `direction`.
    pub fn sort_by_projection(&mut self, direction: &[f64]) {
        self.apply_sort(SortKey::Projection(direction.to_vec()));
    }

    fn apply_sort(&mut self, key: SortKey) {
        self.remove_halo_and_ghost_particles();
        self.do_particle_removal();
        let d = self.dim;
        let n = self.size;
        let keys: Vec<f64> = (0..n)
            .map(|i| match &key {
                SortKey::Axis(axis) => self.vdata[POS][i * d + axis],
                SortKey::Projection(dir) => {
                    (0..d).map(|k| self.vdata[POS][i * d + k] * dir[k]).sum()
                }
            })
            .collect();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_unstable_by(|&a, &b| keys[a].total_cmp(&keys[b]));

        for v in &mut self.vdata {
            let mut scattered = vec![0.0; n * d];
            for (new_i, &old_i) in order.iter().enumerate() {
                scattered[new_i * d..(new_i + 1) * d]
                    .copy_from_slice(&v[old_i * d..(old_i + 1) * d]);
            }
            v[..n * d].copy_from_slice(&scattered);
        }
        for s in &mut self.sdata {
            let scattered: Vec<f64> = order.iter().map(|&old_i| s[old_i]).collect();
            s[..n].copy_from_slice(&scattered);
        }
        for idat in &mut self.idata {
            let scattered: Vec<i64> = order.iter().map(|&old_i| idat[old_i]).collect();
            idat[..n].copy_from_slice(&scattered);
        }
        self.id_map.clear();
        for i in 0..n {
            let gid = self.idata[GID][i];
            if gid >= 0 {
                self.id_map.insert(gid, i);
            }
        }
        self.needs_remake = true;
    }

    // ── Named auxiliary data ───────────────────────────────────────────

    /// Get (creating if absent) the index of a named vector array.
    pub fn request_vector_data(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.vector_names.get(name) {
            return idx;
        }
        let idx = self.vdata.len();
        self.vdata.push(vec![0.0; self.capacity * self.dim]);
        self.vector_names.insert(name.to_string(), idx);
        idx
    }

    /// Get (creating if absent) the index of a named scalar array.
    pub fn request_scalar_data(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.scalar_names.get(name) {
            return idx;
        }
        let idx = self.sdata.len();
        self.sdata.push(vec![0.0; self.capacity]);
        self.scalar_names.insert(name.to_string(), idx);
        idx
    }

    /// Get (creating if absent) the index of a named integer array.
    pub fn request_integer_data(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.integer_names.get(name) {
            return idx;
        }
        let idx = self.idata.len();
        self.idata.push(vec![0; self.capacity]);
        self.integer_names.insert(name.to_string(), idx);
        idx
    }

    /// Look up a named vector array without creating it.
    #[must_use]
    pub fn get_vector_data(&self, name: &str) -> Option<usize> {
        self.vector_names.get(name).copied()
    }

    /// Look up a named scalar array without creating it.
    #[must_use]
    pub fn get_scalar_data(&self, name: &str) -> Option<usize> {
        self.scalar_names.get(name).copied()
    }

    /// Look up a named integer array without creating it.
    #[must_use]
    pub fn get_integer_data(&self, name: &str) -> Option<usize> {
        self.integer_names.get(name).copied()
    }

    // ── Halo and ghost copies ──────────────────────────────────────────

    /// Append a halo copy of owned particle `src`, displaced by `shift`.
    /// The copy shares the primary's scalars and type, carries global id −1,
    /// and lands at an index `>= first_halo`.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::InvalidSetup`] if ghost copies already exist
    /// (halos must precede ghosts in the array) or `src` is not owned, and
    /// [`GranError::BadDimension`] on a shift of the wrong length.
    pub fn create_halo_of(&mut self, src: usize, shift: &[f64]) -> Result<usize, GranError> {
        if shift.len() != self.dim {
            return Err(GranError::BadDimension(format!(
                "halo shift of length {} in a {}-d store",
                shift.len(),
                self.dim
            )));
        }
        if self.first_ghost != self.size {
            return Err(GranError::InvalidSetup(
                "halo copies must be created before ghost copies".into(),
            ));
        }
        if src >= self.first_halo {
            return Err(GranError::InvalidSetup(format!(
                "halo source {src} is not an owned particle"
            )));
        }
        if self.size == self.capacity {
            self.grow(GROWTH_QUANTUM);
        }
        let i = self.size;
        let d = self.dim;
        for (entry, v) in self.vdata.iter_mut().enumerate() {
            v.copy_within(src * d..(src + 1) * d, i * d);
            if entry == POS {
                for (k, s) in shift.iter().enumerate() {
                    v[i * d + k] += s;
                }
            }
        }
        for s in &mut self.sdata {
            s[i] = s[src];
        }
        for idat in &mut self.idata {
            idat[i] = idat[src];
        }
        self.idata[GID][i] = -1;
        self.halo_links.push(HaloLink {
            halo: i,
            primary: src,
            shift: shift.to_vec(),
        });
        self.size += 1;
        self.number += 1;
        self.first_ghost = self.size;
        Ok(i)
    }

    /// Append a ghost copy (a shadow of a remote particle). Used by the
    /// topology's ghost-exchange hook.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::BadArgument`] for an unregistered type and
    /// [`GranError::BadDimension`] for wrong-length vectors.
    pub fn add_ghost(
        &mut self,
        x: &[f64],
        v: &[f64],
        sg: f64,
        im: f64,
        ptype: i64,
    ) -> Result<usize, GranError> {
        if ptype < 0 || ptype as usize >= self.ntypes {
            return Err(GranError::BadArgument(format!(
                "ghost type {ptype} not in [0, {})",
                self.ntypes
            )));
        }
        if x.len() != self.dim || v.len() != self.dim {
            return Err(GranError::BadDimension(
                "ghost vectors must match the store dimension".into(),
            ));
        }
        if self.size == self.capacity {
            self.grow(GROWTH_QUANTUM);
        }
        let i = self.size;
        let base = i * self.dim;
        self.vdata[POS][base..base + self.dim].copy_from_slice(x);
        self.vdata[VEL][base..base + self.dim].copy_from_slice(v);
        self.vdata[FRC][base..base + self.dim].fill(0.0);
        self.sdata[SG][i] = sg;
        self.sdata[IM][i] = im;
        self.idata[TYPE][i] = ptype;
        self.idata[GID][i] = -1;
        self.size += 1;
        self.number += 1;
        Ok(i)
    }

    /// Drop the entire halo/ghost suffix.
    pub fn remove_halo_and_ghost_particles(&mut self) {
        for i in self.first_halo..self.size {
            if self.idata[TYPE][i] >= 0 {
                self.number -= 1;
            }
            self.idata[TYPE][i] = -1;
        }
        self.remove_list.retain(|&i| i < self.first_halo);
        self.size = self.first_halo;
        self.first_ghost = self.first_halo;
        self.halo_links.clear();
    }

    /// Fold each halo copy's accumulated force into its primary and zero
    /// the copy. Called once per step, after all force accumulation and
    /// before the integrator's post-force half-kick.
    pub fn update_halo_particles(&mut self) {
        let d = self.dim;
        for link in &self.halo_links {
            for k in 0..d {
                let contribution = self.vdata[FRC][link.halo * d + k];
                self.vdata[FRC][link.primary * d + k] += contribution;
                self.vdata[FRC][link.halo * d + k] = 0.0;
            }
        }
    }

    /// Re-shadow each halo copy's position and velocity from its primary
    /// (primary position plus the stored lattice shift). Called after the
    /// integrator drift so copies track their owners between rebuilds.
    pub fn sync_halo_particles(&mut self) {
        let d = self.dim;
        for link in &self.halo_links {
            for k in 0..d {
                self.vdata[POS][link.halo * d + k] =
                    self.vdata[POS][link.primary * d + k] + link.shift[k];
                self.vdata[VEL][link.halo * d + k] = self.vdata[VEL][link.primary * d + k];
            }
        }
    }

    // ── Bulk clears ────────────────────────────────────────────────────

    /// Zero all velocities.
    pub fn clear_v(&mut self) {
        self.vdata[VEL][..self.size * self.dim].fill(0.0);
    }

    /// Zero all forces.
    pub fn clear_f(&mut self) {
        self.vdata[FRC][..self.size * self.dim].fill(0.0);
    }

    /// Zero a named scalar array, if it exists.
    pub fn clear_scalar(&mut self, name: &str) {
        if let Some(&idx) = self.scalar_names.get(name) {
            self.sdata[idx][..self.size].fill(0.0);
        }
    }

    // ── Id management ──────────────────────────────────────────────────

    /// Current local index of the particle with global id `gid`, or `None`
    /// if it no longer exists on this node.
    #[must_use]
    pub fn local_id(&self, gid: i64) -> Option<usize> {
        self.id_map.get(&gid).copied()
    }

    /// The global id the next added particle will receive.
    #[must_use]
    pub const fn next_global_id(&self) -> i64 {
        self.next_global_id
    }

    // ── Accessors ──────────────────────────────────────────────────────
    //
    // Flat slices cover `[0, size)`; per-particle views are contiguous
    // sub-slices. This indexing layer is the layout seam: an SoA variant
    // would change only these methods.

    /// All position components, `[i * dim + d]`.
    #[must_use]
    pub fn x(&self) -> &[f64] {
        &self.vdata[POS][..self.size * self.dim]
    }

    /// Mutable position components.
    pub fn x_mut(&mut self) -> &mut [f64] {
        let end = self.size * self.dim;
        &mut self.vdata[POS][..end]
    }

    /// Position of particle `i`.
    #[must_use]
    pub fn x_of(&self, i: usize) -> &[f64] {
        &self.vdata[POS][i * self.dim..(i + 1) * self.dim]
    }

    /// All velocity components.
    #[must_use]
    pub fn v(&self) -> &[f64] {
        &self.vdata[VEL][..self.size * self.dim]
    }

    /// Mutable velocity components.
    pub fn v_mut(&mut self) -> &mut [f64] {
        let end = self.size * self.dim;
        &mut self.vdata[VEL][..end]
    }

    /// Velocity of particle `i`.
    #[must_use]
    pub fn v_of(&self, i: usize) -> &[f64] {
        &self.vdata[VEL][i * self.dim..(i + 1) * self.dim]
    }

    /// All force components.
    #[must_use]
    pub fn f(&self) -> &[f64] {
        &self.vdata[FRC][..self.size * self.dim]
    }

    /// Mutable force components.
    pub fn f_mut(&mut self) -> &mut [f64] {
        let end = self.size * self.dim;
        &mut self.vdata[FRC][..end]
    }

    /// Radii.
    #[must_use]
    pub fn sg(&self) -> &[f64] {
        &self.sdata[SG][..self.size]
    }

    /// Mutable radii.
    pub fn sg_mut(&mut self) -> &mut [f64] {
        &mut self.sdata[SG][..self.size]
    }

    /// Inverse masses (0 = immovable).
    #[must_use]
    pub fn im(&self) -> &[f64] {
        &self.sdata[IM][..self.size]
    }

    /// Particle types (−1 = tombstone).
    #[must_use]
    pub fn types(&self) -> &[i64] {
        &self.idata[TYPE][..self.size]
    }

    /// Global ids (−1 for halo/ghost copies).
    #[must_use]
    pub fn gids(&self) -> &[i64] {
        &self.idata[GID][..self.size]
    }

    /// A named vector array by index from `request_vector_data`.
    #[must_use]
    pub fn vector_data(&self, idx: usize) -> &[f64] {
        &self.vdata[idx][..self.size * self.dim]
    }

    /// Mutable named vector array.
    pub fn vector_data_mut(&mut self, idx: usize) -> &mut [f64] {
        let end = self.size * self.dim;
        &mut self.vdata[idx][..end]
    }

    /// A named scalar array by index.
    #[must_use]
    pub fn scalar_data(&self, idx: usize) -> &[f64] {
        &self.sdata[idx][..self.size]
    }

    /// Mutable named scalar array.
    pub fn scalar_data_mut(&mut self, idx: usize) -> &mut [f64] {
        let end = self.size;
        &mut self.sdata[idx][..end]
    }

    /// A named integer array by index.
    #[must_use]
    pub fn integer_data(&self, idx: usize) -> &[i64] {
        &self.idata[idx][..self.size]
    }

    /// Mutable named integer array.
    pub fn integer_data_mut(&mut self, idx: usize) -> &mut [i64] {
        let end = self.size;
        &mut self.idata[idx][..end]
    }

    /// Simultaneous mutable views of positions, velocities and forces plus
    /// shared views of inverse masses — the integrator's working set.
    pub fn integrate_views(&mut self) -> (&mut [f64], &mut [f64], &mut [f64], &[f64]) {
        let end = self.size * self.dim;
        let (pos_slice, rest) = self.vdata.split_at_mut(1);
        let (vel_slice, frc_slice) = rest.split_at_mut(1);
        (
            &mut pos_slice[0][..end],
            &mut vel_slice[0][..end],
            &mut frc_slice[0][..end],
            &self.sdata[IM][..self.size],
        )
    }

    /// Mutable forces together with shared positions, velocities, radii and
    /// types — the force dispatcher's working set.
    pub fn force_views(&mut self) -> (&[f64], &[f64], &mut [f64], &[f64], &[i64]) {
        let end = self.size * self.dim;
        let (head, frc_slice) = self.vdata.split_at_mut(FRC);
        (
            &head[POS][..end],
            &head[VEL][..end],
            &mut frc_slice[0][..end],
            &self.sdata[SG][..self.size],
            &self.idata[TYPE][..self.size],
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn store_2d() -> ParticleStore {
        ParticleStore::new(2, 2).unwrap()
    }

    fn add_at(store: &mut ParticleStore, x: [f64; 2]) -> i64 {
        store.add_particle(&x, &[0.0, 0.0], 0.05, 1.0, 0).unwrap()
    }

    #[test]
    fn new_rejects_zero_dim() {
        assert!(ParticleStore::new(0, 1).is_err());
        assert!(ParticleStore::new(2, 0).is_err());
    }

    #[test]
    fn add_particle_increments_gid() {
        let mut s = store_2d();
        let a = add_at(&mut s, [0.0, 0.0]);
        let b = add_at(&mut s, [1.0, 0.0]);
        assert!(b > a);
        assert_eq!(s.number(), 2);
        assert_eq!(s.size(), 2);
    }

    #[test]
    fn add_particle_rejects_bad_type() {
        let mut s = store_2d();
        assert!(s.add_particle(&[0.0; 2], &[0.0; 2], 0.05, 1.0, 5).is_err());
        assert!(s.add_particle(&[0.0; 2], &[0.0; 2], 0.05, 1.0, -1).is_err());
        assert_eq!(s.number(), 0);
    }

    #[test]
    fn capacity_grows_by_quantum() {
        let mut s = store_2d();
        add_at(&mut s, [0.0, 0.0]);
        assert_eq!(s.capacity(), 32);
        for i in 0..32 {
            add_at(&mut s, [f64::from(i), 0.0]);
        }
        assert_eq!(s.capacity(), 64);
    }

    #[test]
    fn growth_preserves_contents() {
        let mut s = store_2d();
        for i in 0..100 {
            add_at(&mut s, [f64::from(i), -f64::from(i)]);
        }
        for i in 0..100 {
            assert!((s.x_of(i)[0] - i as f64).abs() < 1e-15);
            assert!((s.x_of(i)[1] + i as f64).abs() < 1e-15);
        }
    }

    #[test]
    fn gid_roundtrip() {
        let mut s = store_2d();
        let gids: Vec<i64> = (0..10).map(|i| add_at(&mut s, [f64::from(i), 0.0])).collect();
        for (i, gid) in gids.iter().enumerate() {
            assert_eq!(s.local_id(*gid), Some(i));
        }
    }

    #[test]
    fn mark_for_removal_idempotent() {
        let mut s = store_2d();
        let gid = add_at(&mut s, [1.0, 2.0]);
        add_at(&mut s, [3.0, 4.0]);
        s.mark_for_removal(0);
        let n_after_once = s.number();
        s.mark_for_removal(0);
        assert_eq!(s.number(), n_after_once);
        assert_eq!(s.local_id(gid), None);
        assert_eq!(s.types()[0], -1);
        assert_eq!(s.v_of(0), &[0.0, 0.0]);
    }

    #[test]
    fn removal_compacts_to_contiguous() {
        let mut s = store_2d();
        let mut gids = Vec::new();
        for i in 0..1000 {
            gids.push(add_at(&mut s, [f64::from(i), 0.0]));
        }
        for i in (1..1000).step_by(2) {
            s.mark_for_removal(i);
        }
        s.do_particle_removal();
        assert_eq!(s.number(), 500);
        assert_eq!(s.size(), 500);
        for i in 0..s.size() {
            assert!(s.types()[i] >= 0, "tombstone at {i} after compaction");
        }
        // Every even-input survivor is reachable through its global id.
        for (i, gid) in gids.iter().enumerate() {
            if i % 2 == 0 {
                let local = s.local_id(*gid).expect("surviving gid lost");
                assert_eq!(s.gids()[local], *gid);
            } else {
                assert_eq!(s.local_id(*gid), None);
            }
        }
        assert!(s.needs_remake());
    }

    #[test]
    fn gid_map_consistent_after_compaction() {
        let mut s = store_2d();
        for i in 0..50 {
            add_at(&mut s, [f64::from(i), 0.0]);
        }
        for i in [0, 7, 13, 49, 48] {
            s.mark_for_removal(i);
        }
        s.do_particle_removal();
        for i in 0..s.size() {
            let gid = s.gids()[i];
            assert_eq!(s.local_id(gid), Some(i), "gid map broken at slot {i}");
        }
    }

    #[test]
    fn remove_all_particles() {
        let mut s = store_2d();
        for i in 0..8 {
            add_at(&mut s, [f64::from(i), 0.0]);
        }
        for i in 0..8 {
            s.mark_for_removal(i);
        }
        s.do_particle_removal();
        assert_eq!(s.number(), 0);
        assert_eq!(s.size(), 0);
    }

    #[test]
    fn halo_copy_follows_contract() {
        let mut s = store_2d();
        add_at(&mut s, [9.9, 5.0]);
        let h = s.create_halo_of(0, &[-10.0, 0.0]).unwrap();
        assert!(s.is_halo(h));
        assert!(!s.is_real(h));
        assert!((s.x_of(h)[0] + 0.1).abs() < 1e-12);
        assert_eq!(s.gids()[h], -1);
        assert_eq!(s.number(), 2);
        assert_eq!(s.number_owned(), 1);
    }

    #[test]
    fn halo_force_folds_once() {
        let mut s = store_2d();
        add_at(&mut s, [9.9, 5.0]);
        let h = s.create_halo_of(0, &[-10.0, 0.0]).unwrap();
        s.f_mut()[h * 2] = 1.5;
        s.f_mut()[h * 2 + 1] = -0.5;
        s.f_mut()[0] = 0.25;
        s.update_halo_particles();
        assert!((s.f()[0] - 1.75).abs() < 1e-15);
        assert!((s.f()[1] + 0.5).abs() < 1e-15);
        assert_eq!(s.f()[h * 2], 0.0);
        // A second fold must not double-count.
        s.update_halo_particles();
        assert!((s.f()[0] - 1.75).abs() < 1e-15);
    }

    #[test]
    fn halo_sync_tracks_primary() {
        let mut s = store_2d();
        add_at(&mut s, [9.9, 5.0]);
        let h = s.create_halo_of(0, &[-10.0, 0.0]).unwrap();
        s.x_mut()[0] = 9.95;
        s.v_mut()[0] = 3.0;
        s.sync_halo_particles();
        assert!((s.x_of(h)[0] + 0.05).abs() < 1e-12);
        assert!((s.v_of(h)[0] - 3.0).abs() < 1e-15);
    }

    #[test]
    fn remove_halo_and_ghost_truncates() {
        let mut s = store_2d();
        add_at(&mut s, [1.0, 1.0]);
        add_at(&mut s, [2.0, 2.0]);
        s.create_halo_of(0, &[10.0, 0.0]).unwrap();
        s.add_ghost(&[5.0, 5.0], &[0.0, 0.0], 0.05, 1.0, 0).unwrap();
        assert_eq!(s.number(), 4);
        s.remove_halo_and_ghost_particles();
        assert_eq!(s.number(), 2);
        assert_eq!(s.size(), 2);
        assert_eq!(s.first_ghost(), 2);
        assert_eq!(s.number_ghosts(), 0);
    }

    #[test]
    fn add_owned_blocked_while_suffix_exists() {
        let mut s = store_2d();
        add_at(&mut s, [1.0, 1.0]);
        s.create_halo_of(0, &[10.0, 0.0]).unwrap();
        assert!(s.add_particle(&[0.0; 2], &[0.0; 2], 0.05, 1.0, 0).is_err());
        s.remove_halo_and_ghost_particles();
        assert!(s.add_particle(&[0.0; 2], &[0.0; 2], 0.05, 1.0, 0).is_ok());
    }

    #[test]
    fn sort_by_axis_moves_arrays_coherently() {
        let mut s = store_2d();
        let g2 = s.add_particle(&[2.0, 0.0], &[0.2, 0.0], 0.2, 0.5, 1).unwrap();
        let g0 = s.add_particle(&[0.0, 0.0], &[0.0, 0.0], 0.1, 1.0, 0).unwrap();
        let g1 = s.add_particle(&[1.0, 0.0], &[0.1, 0.0], 0.15, 0.8, 0).unwrap();
        s.sort_by_axis(0);
        assert_eq!(s.local_id(g0), Some(0));
        assert_eq!(s.local_id(g1), Some(1));
        assert_eq!(s.local_id(g2), Some(2));
        assert!((s.sg()[0] - 0.1).abs() < 1e-15);
        assert!((s.sg()[2] - 0.2).abs() < 1e-15);
        assert_eq!(s.types()[2], 1);
        assert!((s.v()[2 * 2] - 0.2).abs() < 1e-15);
    }

    #[test]
    fn sort_by_projection_orders_diagonal() {
        let mut s = store_2d();
        add_at(&mut s, [3.0, 3.0]);
        add_at(&mut s, [1.0, 1.0]);
        add_at(&mut s, [2.0, 2.0]);
        s.sort_by_projection(&[1.0, 1.0]);
        assert!(s.x_of(0)[0] < s.x_of(1)[0]);
        assert!(s.x_of(1)[0] < s.x_of(2)[0]);
    }

    #[test]
    fn named_arrays_created_once() {
        let mut s = store_2d();
        add_at(&mut s, [0.0, 0.0]);
        let a = s.request_scalar_data("Tq");
        let b = s.request_scalar_data("Tq");
        assert_eq!(a, b);
        assert_eq!(s.get_scalar_data("Tq"), Some(a));
        assert_eq!(s.get_scalar_data("Qt"), None);
        s.scalar_data_mut(a)[0] = 2.5;
        s.clear_scalar("Tq");
        assert_eq!(s.scalar_data(a)[0], 0.0);
    }

    #[test]
    fn named_vector_and_integer_arrays() {
        let mut s = store_2d();
        add_at(&mut s, [0.0, 0.0]);
        let v = s.request_vector_data("Omega");
        let i = s.request_integer_data("Body");
        s.vector_data_mut(v)[1] = 4.0;
        s.integer_data_mut(i)[0] = 9;
        assert_eq!(s.vector_data(v)[1], 4.0);
        assert_eq!(s.integer_data(i)[0], 9);
    }

    #[test]
    fn remove_bad_particles_scrubs_nan() {
        let mut s = store_2d();
        add_at(&mut s, [0.0, 0.0]);
        add_at(&mut s, [1.0, 1.0]);
        s.x_mut()[2] = f64::NAN;
        assert!(s.remove_bad_particles());
        assert_eq!(s.number(), 1);
        assert!(s.needs_remake());
        s.do_particle_removal();
        assert_eq!(s.size(), 1);
        assert!(s.x()[..2].iter().all(|c| c.is_finite()));
    }

    #[test]
    fn clear_f_zeroes_everything() {
        let mut s = store_2d();
        add_at(&mut s, [0.0, 0.0]);
        s.f_mut()[0] = 3.0;
        s.f_mut()[1] = -3.0;
        s.clear_f();
        assert!(s.f().iter().all(|&c| c == 0.0));
    }

    #[test]
    fn reserve_does_not_shrink() {
        let mut s = store_2d();
        s.reserve(100);
        assert!(s.capacity() >= 100);
        let cap = s.capacity();
        s.reserve(10);
        assert_eq!(s.capacity(), cap);
    }

    #[test]
    fn integrate_views_are_consistent() {
        let mut s = store_2d();
        add_at(&mut s, [1.0, 2.0]);
        {
            let (x, v, f, im) = s.integrate_views();
            assert_eq!(x.len(), 2);
            assert_eq!(v.len(), 2);
            assert_eq!(f.len(), 2);
            assert_eq!(im.len(), 1);
            x[0] += 1.0;
        }
        assert!((s.x()[0] - 2.0).abs() < 1e-15);
    }
}
