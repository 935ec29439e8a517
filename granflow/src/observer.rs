// SPDX-License-Identifier: AGPL-3.0-only

//! Observers: per-frame data objects recorded on a fixed cadence.
//!
//! The data master owns the observers and triggers them at `fps` frames per
//! unit simulated time once `start_rec_time` has passed. Each observer
//! buffers in memory and writes its own subdirectory of the output
//! directory at the end of the run, alongside a `times.csv` with the frame
//! times.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::defaults;
use crate::error::GranError;
use crate::integrator::Integrator;
use crate::interaction::ForceGrid;
use crate::neighbor::NeighborIndex;
use crate::store::ParticleStore;

/// Read-only view of the simulation handed to observers.
pub struct ObserverContext<'a> {
    /// Particle state.
    pub store: &'a ParticleStore,
    /// Interaction dispatcher (virial/potential accumulators).
    pub forces: &'a ForceGrid,
    /// Integrator (time step).
    pub integrator: &'a Integrator,
    /// Neighbor index (remake statistics).
    pub neighbor: &'a NeighborIndex,
    /// Elapsed simulated time in the current run.
    pub time: f64,
    /// Step counter.
    pub iter: u64,
    /// Boundary force accumulated this step.
    pub boundary_force: f64,
    /// Boundary energy accumulated this step.
    pub boundary_energy: f64,
}

/// Total kinetic energy of owned, movable particles.
#[must_use]
pub fn kinetic_energy(store: &ParticleStore) -> f64 {
    let dim = store.dim();
    let mut ke = 0.0;
    for i in 0..store.size_owned() {
        if store.types()[i] < 0 {
            continue;
        }
        let im = store.im()[i];
        if im <= 0.0 {
            continue;
        }
        let v = store.v_of(i);
        let vsqr: f64 = v.iter().map(|c| c * c).sum();
        ke += 0.5 * vsqr / im;
    }
    ke
}

/// A recorded data object.
pub trait Observer {
    /// Name, used as the output subdirectory.
    fn name(&self) -> &'static str;

    /// Capture one frame.
    fn record(&mut self, ctx: &ObserverContext);

    /// Write buffered frames under `dir` (already the observer's own
    /// subdirectory).
    ///
    /// # Errors
    ///
    /// Returns [`GranError::FileOpen`] on any failed write.
    fn write(&self, dir: &Path) -> Result<(), GranError>;
}

fn open_writer(path: &Path) -> Result<BufWriter<fs::File>, GranError> {
    let file = fs::File::create(path)
        .map_err(|e| GranError::FileOpen(format!("{}: {e}", path.display())))?;
    Ok(BufWriter::new(file))
}

fn io_err(path: &Path, e: &std::io::Error) -> GranError {
    GranError::FileOpen(format!("{}: {e}", path.display()))
}

/// Per-frame particle dumps: position components, radius, and type.
#[derive(Default)]
pub struct PositionData {
    dim: usize,
    frames: Vec<Vec<f64>>,
}

impl PositionData {
    /// Empty position recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of captured frames.
    #[must_use]
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }
}

impl Observer for PositionData {
    fn name(&self) -> &'static str {
        "PositionData"
    }

    fn record(&mut self, ctx: &ObserverContext) {
        let store = ctx.store;
        let dim = store.dim();
        self.dim = dim;
        let mut frame = Vec::with_capacity(store.number_owned() * (dim + 2));
        for i in 0..store.size_owned() {
            if store.types()[i] < 0 {
                continue;
            }
            frame.extend_from_slice(store.x_of(i));
            frame.push(store.sg()[i]);
            frame.push(store.types()[i] as f64);
        }
        self.frames.push(frame);
    }

    fn write(&self, dir: &Path) -> Result<(), GranError> {
        let stride = self.dim + 2;
        for (k, frame) in self.frames.iter().enumerate() {
            let path = dir.join(format!("PositionData{k}.csv"));
            let mut w = open_writer(&path)?;
            for row in frame.chunks_exact(stride) {
                let line: Vec<String> = row.iter().map(|c| format!("{c}")).collect();
                writeln!(w, "{}", line.join(",")).map_err(|e| io_err(&path, &e))?;
            }
        }
        Ok(())
    }
}

/// Kinetic / potential / total energy and temperature time series.
#[derive(Default)]
pub struct EnergyData {
    rows: Vec<[f64; 5]>,
}

impl EnergyData {
    /// Empty energy recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded rows `(time, ke, pe, total, temperature)`.
    #[must_use]
    pub fn rows(&self) -> &[[f64; 5]] {
        &self.rows
    }
}

impl Observer for EnergyData {
    fn name(&self) -> &'static str {
        "EnergyData"
    }

    fn record(&mut self, ctx: &ObserverContext) {
        let ke = kinetic_energy(ctx.store);
        let pe = ctx.forces.potential();
        let n = ctx.store.number_owned();
        let dof = (ctx.store.dim() * n.max(1)) as f64;
        let temperature = 2.0 * ke / dof;
        self.rows.push([ctx.time, ke, pe, ke + pe, temperature]);
    }

    fn write(&self, dir: &Path) -> Result<(), GranError> {
        let path = dir.join("EnergyData.csv");
        let mut w = open_writer(&path)?;
        writeln!(w, "time,kinetic,potential,total,temperature").map_err(|e| io_err(&path, &e))?;
        for row in &self.rows {
            writeln!(
                w,
                "{},{},{},{},{}",
                row[0], row[1], row[2], row[3], row[4]
            )
            .map_err(|e| io_err(&path, &e))?;
        }
        Ok(())
    }
}

/// Owned-particle count time series.
#[derive(Default)]
pub struct NumberData {
    rows: Vec<(f64, usize)>,
}

impl NumberData {
    /// Empty count recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Observer for NumberData {
    fn name(&self) -> &'static str {
        "NumberData"
    }

    fn record(&mut self, ctx: &ObserverContext) {
        self.rows.push((ctx.time, ctx.store.number_owned()));
    }

    fn write(&self, dir: &Path) -> Result<(), GranError> {
        let path = dir.join("NumberData.csv");
        let mut w = open_writer(&path)?;
        writeln!(w, "time,number").map_err(|e| io_err(&path, &e))?;
        for (t, n) in &self.rows {
            writeln!(w, "{t},{n}").map_err(|e| io_err(&path, &e))?;
        }
        Ok(())
    }
}

/// Boundary force and energy time series (Repulse walls).
#[derive(Default)]
pub struct BoundaryForceData {
    rows: Vec<[f64; 3]>,
}

impl BoundaryForceData {
    /// Empty boundary recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded rows `(time, force, energy)`.
    #[must_use]
    pub fn rows(&self) -> &[[f64; 3]] {
        &self.rows
    }
}

impl Observer for BoundaryForceData {
    fn name(&self) -> &'static str {
        "BoundaryForceData"
    }

    fn record(&mut self, ctx: &ObserverContext) {
        self.rows
            .push([ctx.time, ctx.boundary_force, ctx.boundary_energy]);
    }

    fn write(&self, dir: &Path) -> Result<(), GranError> {
        let path = dir.join("BoundaryForceData.csv");
        let mut w = open_writer(&path)?;
        writeln!(w, "time,boundary_force,boundary_energy").map_err(|e| io_err(&path, &e))?;
        for row in &self.rows {
            writeln!(w, "{},{},{}", row[0], row[1], row[2]).map_err(|e| io_err(&path, &e))?;
        }
        Ok(())
    }
}

/// Owns the observers and their recording cadence; writes the per-object
/// output tree.
pub struct DataMaster {
    /// Frames per unit simulated time.
    pub fps: f64,
    /// Simulated time before which nothing records.
    pub start_rec_time: f64,
    /// Master switch; relaxation phases run with recording off.
    pub recording: bool,
    next_frame: f64,
    times: Vec<f64>,
    observers: Vec<Box<dyn Observer>>,
}

impl Default for DataMaster {
    fn default() -> Self {
        Self::new()
    }
}

impl DataMaster {
    /// Data master with the default cadence and no observers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fps: defaults::DEFAULT_FPS,
            start_rec_time: 0.0,
            recording: true,
            next_frame: 0.0,
            times: Vec::new(),
            observers: Vec::new(),
        }
    }

    /// Register an observer.
    pub fn add_observer(&mut self, obs: Box<dyn Observer>) {
        self.observers.push(obs);
    }

    /// Number of registered observers.
    #[must_use]
    pub fn num_observers(&self) -> usize {
        self.observers.len()
    }

    /// Frame times recorded so far.
    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Per-run reset of the frame clock.
    pub fn pre_integrate(&mut self) {
        self.next_frame = self.start_rec_time;
    }

    /// Record a frame if the cadence says so.
    pub fn post_step(&mut self, ctx: &ObserverContext) {
        if !self.recording || self.fps <= 0.0 || ctx.time < self.next_frame {
            return;
        }
        self.times.push(ctx.time);
        for obs in &mut self.observers {
            obs.record(ctx);
        }
        self.next_frame = ctx.time + 1.0 / self.fps;
    }

    /// Write every observer's subdirectory plus its `times.csv`.
    ///
    /// Failed writes are collected, not fatal: remaining observers are
    /// still attempted. Returns the failure messages (empty = all good).
    #[must_use]
    pub fn write_to_directory(&self, dir: &Path) -> Vec<String> {
        let mut failures = Vec::new();
        for obs in &self.observers {
            let sub = dir.join(obs.name());
            if let Err(e) = fs::create_dir_all(&sub) {
                failures.push(format!("{}: {e}", sub.display()));
                continue;
            }
            if let Err(e) = obs.write(&sub) {
                failures.push(e.to_string());
            }
            if let Err(e) = self.write_times(&sub) {
                failures.push(e.to_string());
            }
        }
        failures
    }

    fn write_times(&self, dir: &Path) -> Result<(), GranError> {
        let path = dir.join("times.csv");
        let mut w = open_writer(&path)?;
        for t in &self.times {
            writeln!(w, "{t}").map_err(|e| io_err(&path, &e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn context_parts() -> (ParticleStore, ForceGrid, Integrator, NeighborIndex) {
        let mut store = ParticleStore::new(2, 1).unwrap();
        store
            .add_particle(&[1.0, 1.0], &[2.0, 0.0], 0.05, 1.0, 0)
            .unwrap();
        store
            .add_particle(&[2.0, 2.0], &[0.0, 0.0], 0.05, 0.0, 0)
            .unwrap();
        (
            store,
            ForceGrid::new(1),
            Integrator::velocity_verlet(),
            NeighborIndex::new(),
        )
    }

    fn make_ctx<'a>(
        store: &'a ParticleStore,
        forces: &'a ForceGrid,
        integrator: &'a Integrator,
        neighbor: &'a NeighborIndex,
        time: f64,
    ) -> ObserverContext<'a> {
        ObserverContext {
            store,
            forces,
            integrator,
            neighbor,
            time,
            iter: 0,
            boundary_force: 0.0,
            boundary_energy: 0.0,
        }
    }

    #[test]
    fn kinetic_energy_skips_immovable() {
        let (store, ..) = context_parts();
        // Only the moving unit-mass particle contributes: 0.5 * 4.
        assert!((kinetic_energy(&store) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn cadence_limits_frames() {
        let (store, forces, integrator, neighbor) = context_parts();
        let mut dm = DataMaster::new();
        dm.fps = 10.0; // one frame per 0.1 time units
        dm.add_observer(Box::new(PositionData::new()));
        dm.pre_integrate();
        let mut t = 0.0;
        for _ in 0..1000 {
            t += 0.001;
            let ctx = make_ctx(&store, &forces, &integrator, &neighbor, t);
            dm.post_step(&ctx);
        }
        // 1.0 time units at 10 fps: ~10 frames, certainly not 1000.
        assert!(dm.times().len() >= 9 && dm.times().len() <= 12, "{}", dm.times().len());
    }

    #[test]
    fn recording_gate_blocks_frames() {
        let (store, forces, integrator, neighbor) = context_parts();
        let mut dm = DataMaster::new();
        dm.recording = false;
        dm.add_observer(Box::new(EnergyData::new()));
        dm.pre_integrate();
        let ctx = make_ctx(&store, &forces, &integrator, &neighbor, 1.0);
        dm.post_step(&ctx);
        assert!(dm.times().is_empty());
    }

    #[test]
    fn start_rec_time_delays_frames() {
        let (store, forces, integrator, neighbor) = context_parts();
        let mut dm = DataMaster::new();
        dm.start_rec_time = 0.5;
        dm.add_observer(Box::new(NumberData::new()));
        dm.pre_integrate();
        let ctx = make_ctx(&store, &forces, &integrator, &neighbor, 0.25);
        dm.post_step(&ctx);
        assert!(dm.times().is_empty());
        let ctx = make_ctx(&store, &forces, &integrator, &neighbor, 0.6);
        dm.post_step(&ctx);
        assert_eq!(dm.times().len(), 1);
    }

    #[test]
    fn position_frames_capture_owned_particles() {
        let (store, forces, integrator, neighbor) = context_parts();
        let mut pd = PositionData::new();
        let ctx = make_ctx(&store, &forces, &integrator, &neighbor, 0.0);
        pd.record(&ctx);
        assert_eq!(pd.num_frames(), 1);
    }

    #[test]
    fn writes_land_on_disk() {
        let (store, forces, integrator, neighbor) = context_parts();
        let mut dm = DataMaster::new();
        dm.add_observer(Box::new(PositionData::new()));
        dm.add_observer(Box::new(EnergyData::new()));
        dm.pre_integrate();
        let ctx = make_ctx(&store, &forces, &integrator, &neighbor, 0.0);
        dm.post_step(&ctx);
        let dir = std::env::temp_dir().join(format!(
            "granflow_obs_test_{}",
            std::process::id()
        ));
        let failures = dm.write_to_directory(&dir);
        assert!(failures.is_empty(), "{failures:?}");
        assert!(dir.join("PositionData/PositionData0.csv").exists());
        assert!(dir.join("PositionData/times.csv").exists());
        assert!(dir.join("EnergyData/EnergyData.csv").exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
