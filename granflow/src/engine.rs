// SPDX-License-Identifier: AGPL-3.0-only

//! The step orchestrator.
//!
//! Owns every subsystem and drives the fixed phase sequence:
//!
//! ```text
//! pre-step      modifiers, integrator (adaptive dt), observers, neighbor
//! pre-exchange  modifiers, topology particle migration
//! pre-forces    modifiers, integrator half-kick + drift, neighbor rebuild
//! forces        clear, boundary (reflect/repulse/attract), pair kernels,
//!               bonded kernels, body corrections, modifier retirement,
//!               modifier post-forces, halo force fold,
//!               integrator second half-kick
//! post-step     modifiers, observers, clocks, stop reduction
//! ```
//!
//! The halo force fold runs after the modifiers' post-forces and before the
//! integrator's second half-kick, so every force a copy accumulated reaches
//! its owner exactly once per step.
//!
//! Subsystems never hold references to one another; the orchestrator passes
//! each phase hook the context it needs.

use std::time::Instant;

use crate::bonded::{Body, HarmonicBonds};
use crate::bounds::{BcFlag, Bounds};
use crate::defaults;
use crate::error::GranError;
use crate::integrator::{Integrator, IntegratorKind};
use crate::interaction::ForceGrid;
use crate::modifier::{Modifier, ModifierContext};
use crate::neighbor::{wrap_positions_of, NeighborIndex};
use crate::observer::{DataMaster, ObserverContext};
use crate::output::RunSummary;
use crate::store::ParticleStore;
use crate::topology::{SingleNode, Topology};

#[derive(Clone, Copy)]
enum ModPhase {
    PreIntegrate,
    PreStep,
    PreExchange,
    PreForces,
    PostForces,
    PostStep,
    PostIntegrate,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

/// The simulation engine: unique owner of all subsystems and the master
/// step loop.
pub struct Engine {
    /// Particle state.
    pub store: ParticleStore,
    /// Cell grid and pair list.
    pub neighbor: NeighborIndex,
    /// Pairwise force dispatch.
    pub forces: ForceGrid,
    /// Optional bonded interactions.
    pub bonded: Vec<HarmonicBonds>,
    /// Optional body-level constraints.
    pub bodies: Vec<Box<dyn Body>>,
    /// Phase-hook modifiers.
    pub modifiers: Vec<Box<dyn Modifier>>,
    /// Time integration.
    pub integrator: Integrator,
    /// Observers and recording cadence.
    pub observers: DataMaster,
    /// Cross-node synchronization hooks.
    pub topology: Box<dyn Topology>,
    /// Simulation box.
    pub bounds: Bounds,
    /// Per-dimension boundary conditions.
    pub bcs: Vec<BcFlag>,

    /// Spring constant of Repulse walls.
    pub repulsion: f64,
    /// Damping of Repulse walls.
    pub dissipation: f64,
    /// Strength of the central attraction (0 disables).
    pub center_attraction: f64,
    /// Master switch for pair/bonded force computation.
    pub use_forces: bool,
    /// Print progress lines at `update_interval` of simulated time.
    pub print_updates: bool,
    /// Simulated time between progress lines.
    pub update_interval: f64,

    running: bool,
    requested_time: f64,
    total_requested_time: f64,
    elapsed_time: f64,
    total_time: f64,
    iter: u64,
    boundary_force: f64,
    boundary_energy: f64,
    wall_time_s: f64,
    run_timer: Option<Instant>,
    notes: Vec<String>,
}

impl Engine {
    /// Engine around a populated store, with default subsystems and a
    /// single-node topology.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::BadDimension`] when store, bounds, and boundary
    /// conditions disagree on the dimension.
    pub fn new(store: ParticleStore, bounds: Bounds, bcs: Vec<BcFlag>) -> Result<Self, GranError> {
        if bounds.dim() != store.dim() || bcs.len() != store.dim() {
            return Err(GranError::BadDimension(format!(
                "store is {}-d but bounds are {}-d and {} boundary flags were given",
                store.dim(),
                bounds.dim(),
                bcs.len()
            )));
        }
        let ntypes = store.ntypes();
        Ok(Self {
            store,
            neighbor: NeighborIndex::new(),
            forces: ForceGrid::new(ntypes),
            bonded: Vec::new(),
            bodies: Vec::new(),
            modifiers: Vec::new(),
            integrator: Integrator::velocity_verlet(),
            observers: DataMaster::new(),
            topology: Box::new(SingleNode),
            bounds,
            bcs,
            repulsion: defaults::DEFAULT_HARD_SPHERE_REPULSION,
            dissipation: 0.0,
            center_attraction: 0.0,
            use_forces: true,
            print_updates: false,
            update_interval: 1.0,
            running: false,
            requested_time: 0.0,
            total_requested_time: 0.0,
            elapsed_time: 0.0,
            total_time: 0.0,
            iter: 0,
            boundary_force: 0.0,
            boundary_energy: 0.0,
            wall_time_s: 0.0,
            run_timer: None,
            notes: Vec::new(),
        })
    }

    /// Simulated time completed in the current/last run.
    #[must_use]
    pub const fn elapsed_time(&self) -> f64 {
        self.elapsed_time
    }

    /// Simulated time across all runs.
    #[must_use]
    pub const fn total_time(&self) -> f64 {
        self.total_time
    }

    /// Steps taken in the current/last run.
    #[must_use]
    pub const fn iterations(&self) -> u64 {
        self.iter
    }

    /// Boundary force accumulated in the last step.
    #[must_use]
    pub const fn boundary_force(&self) -> f64 {
        self.boundary_force
    }

    /// Boundary energy accumulated in the last step.
    #[must_use]
    pub const fn boundary_energy(&self) -> f64 {
        self.boundary_energy
    }

    /// Notes accumulated during the run (precision loss etc.).
    #[must_use]
    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// Advance the simulation by `rt` units of simulated time.
    ///
    /// # Errors
    ///
    /// Propagates fatal conditions: [`GranError::NanValue`],
    /// [`GranError::CellOverflow`], setup errors. Loss of precision stops
    /// the loop cleanly and is recorded in [`Engine::notes`] instead.
    pub fn run(&mut self, rt: f64) -> Result<(), GranError> {
        if rt > 0.0 {
            self.requested_time = rt;
        }
        self.total_requested_time += self.requested_time;

        if self.store.number() == 0 {
            self.elapsed_time = self.requested_time;
            self.total_time += self.requested_time;
            self.requested_time = 0.0;
            return Ok(());
        }

        self.running = true;
        self.elapsed_time = 0.0;
        self.iter = 0;
        self.run_timer = Some(Instant::now());

        // Pre-integrate: reset every subsystem's per-run state.
        self.run_modifiers(ModPhase::PreIntegrate);
        self.integrator.pre_integrate(&self.store);
        self.neighbor.pre_integrate();
        self.observers.pre_integrate();
        if self.use_forces && self.forces.num_laws() > 0 {
            self.neighbor.construct(
                &mut self.store,
                &self.forces,
                &self.bounds,
                &self.bcs,
                self.elapsed_time,
            )?;
        }

        let outcome = self.main_loop();
        self.topology.barrier();

        // Post-integrate, even on a fatal step: leave the store owned-only.
        self.requested_time = 0.0;
        self.store.remove_halo_and_ghost_particles();
        self.run_modifiers(ModPhase::PostIntegrate);
        if let Some(timer) = self.run_timer.take() {
            self.wall_time_s = timer.elapsed().as_secs_f64();
        }
        outcome
    }

    fn main_loop(&mut self) -> Result<(), GranError> {
        while self.running && self.requested_time > 0.0 {
            if let Err(fatal) = self.step() {
                // A fatal condition on any node becomes fatal on all nodes.
                self.topology.broadcast_fatal(true);
                self.running = false;
                self.notes.push(format!("fatal: {fatal}"));
                return Err(fatal);
            }
        }
        Ok(())
    }

    /// One full step of the fixed phase sequence.
    fn step(&mut self) -> Result<(), GranError> {
        // ── Pre-step ──
        self.run_modifiers(ModPhase::PreStep);
        self.integrator.pre_step(&self.store)?;
        let dt = self.topology.reduce_min_dt(self.integrator.dt());
        self.integrator.set_dt(dt);

        // ── Pre-exchange ──
        self.run_modifiers(ModPhase::PreExchange);
        self.topology.exchange_particles(&mut self.store)?;

        // ── Pre-forces ──
        self.run_modifiers(ModPhase::PreForces);
        self.integrator.pre_forces(&mut self.store);
        self.store.sync_halo_particles();
        let rebuilt = if self.use_forces {
            self.neighbor.pre_forces(
                &mut self.store,
                &self.forces,
                &self.bounds,
                &self.bcs,
                self.elapsed_time,
            )?
        } else {
            wrap_positions_of(&mut self.store, &self.bounds, &self.bcs);
            false
        };
        if rebuilt {
            self.topology
                .update_ghosts(&mut self.store, self.neighbor.min_cutoff())?;
        }

        // ── Forces ──
        self.store.clear_f();
        self.store.clear_scalar("Tq");
        self.reflect_positions();
        self.repulse_positions();
        self.attract_positions();
        if self.use_forces {
            self.forces.interact(
                &mut self.store,
                self.neighbor.pairs(),
                &self.bounds,
                &self.bcs,
            )?;
            for bonds in &self.bonded {
                bonds.interact(&mut self.store, &self.bounds, &self.bcs)?;
            }
        }
        for body in &mut self.bodies {
            body.correct(&mut self.store, &self.bounds, &self.bcs);
        }
        self.modifiers.retain(|m| !m.remove());

        // ── Post-forces ──
        self.run_modifiers(ModPhase::PostForces);
        self.store.update_halo_particles();
        self.integrator.post_forces(&mut self.store);

        // ── Post-step ──
        if self.requested_time <= self.elapsed_time {
            self.running = false;
        }
        self.run_modifiers(ModPhase::PostStep);
        let dt = self.integrator.dt();
        self.iter += 1;
        self.elapsed_time += dt;
        self.total_time += dt;
        if self.total_time - dt == self.total_time {
            self.notes
                .push("loss of precision: dt vanished against total time; stopping".into());
            self.running = false;
        }
        let ctx = ObserverContext {
            store: &self.store,
            forces: &self.forces,
            integrator: &self.integrator,
            neighbor: &self.neighbor,
            time: self.elapsed_time,
            iter: self.iter,
            boundary_force: self.boundary_force,
            boundary_energy: self.boundary_energy,
        };
        self.observers.post_step(&ctx);
        self.print_progress(dt);
        self.store.set_needs_remake(false);
        self.running = self.topology.reduce_running(self.running);
        Ok(())
    }

    fn print_progress(&self, dt: f64) {
        if !self.print_updates || self.update_interval <= 0.0 {
            return;
        }
        let prev = ((self.elapsed_time - dt) / self.update_interval) as i64;
        let now = (self.elapsed_time / self.update_interval) as i64;
        if prev < now {
            if let Some(timer) = &self.run_timer {
                let wall = timer.elapsed().as_secs_f64().max(1e-9);
                let ratio = self.elapsed_time / wall;
                println!(
                    "    Simulation time: {:.2}  Ratio: {ratio:.2}  Est. remaining: {:.1}s",
                    self.elapsed_time,
                    (self.requested_time - self.elapsed_time).max(0.0) / ratio
                );
            }
        }
    }

    fn run_modifiers(&mut self, phase: ModPhase) {
        let dt = self.integrator.dt();
        let time = self.elapsed_time;
        for m in &mut self.modifiers {
            let mut ctx = ModifierContext {
                store: &mut self.store,
                bounds: &self.bounds,
                bcs: &self.bcs,
                dt,
                time,
            };
            match phase {
                ModPhase::PreIntegrate => m.pre_integrate(&mut ctx),
                ModPhase::PreStep => m.pre_step(&mut ctx),
                ModPhase::PreExchange => m.pre_exchange(&mut ctx),
                ModPhase::PreForces => m.pre_forces(&mut ctx),
                ModPhase::PostForces => m.post_forces(&mut ctx),
                ModPhase::PostStep => m.post_step(&mut ctx),
                ModPhase::PostIntegrate => m.post_integrate(&mut ctx),
            }
        }
    }

    // ── Boundary passes ────────────────────────────────────────────────

    /// Mirror escaped particles across Reflect faces, negating the normal
    /// velocity component.
    fn reflect_positions(&mut self) {
        let dim = self.store.dim();
        let owned = self.store.size_owned();
        for d in 0..dim {
            if self.bcs[d] != BcFlag::Reflect {
                continue;
            }
            let (lo, hi) = (self.bounds.min[d], self.bounds.max[d]);
            let (x, v, _f, _im) = self.store.integrate_views();
            for i in 0..owned {
                let idx = i * dim + d;
                let mut xl = x[idx];
                if xl < lo {
                    xl = 2.0 * lo - xl;
                    v[idx] = -v[idx];
                } else if hi < xl {
                    xl = 2.0 * hi - xl;
                    v[idx] = -v[idx];
                }
                x[idx] = xl;
            }
        }
    }

    /// Spring-plus-damping force pushing escaped particles back through
    /// Repulse faces; accumulates the boundary force and energy.
    fn repulse_positions(&mut self) {
        self.boundary_force = 0.0;
        self.boundary_energy = 0.0;
        let dim = self.store.dim();
        let owned = self.store.size_owned();
        let (repulsion, dissipation) = (self.repulsion, self.dissipation);
        for d in 0..dim {
            if self.bcs[d] != BcFlag::Repulse {
                continue;
            }
            let (lo, hi) = (self.bounds.min[d], self.bounds.max[d]);
            let (x, v, f, _im) = self.store.integrate_views();
            for i in 0..owned {
                let idx = i * dim + d;
                if x[idx] < lo {
                    let depth = lo - x[idx];
                    let force = repulsion * depth + dissipation * (-v[idx]).max(0.0);
                    f[idx] += force;
                    self.boundary_force += force;
                    self.boundary_energy += 0.5 * repulsion * depth * depth;
                } else if hi < x[idx] {
                    let depth = x[idx] - hi;
                    let force = repulsion * depth + dissipation * v[idx].max(0.0);
                    f[idx] -= force;
                    self.boundary_force += force;
                    self.boundary_energy += 0.5 * repulsion * depth * depth;
                }
            }
        }
    }

    /// Constant-magnitude acceleration toward the box center.
    fn attract_positions(&mut self) {
        if self.center_attraction == 0.0 {
            return;
        }
        let dim = self.store.dim();
        let owned = self.store.size_owned();
        let mut center = vec![0.0; dim];
        self.bounds.center(&mut center);
        let attraction = self.center_attraction;
        let types: Vec<i64> = self.store.types()[..owned].to_vec();
        let (x, _v, f, im) = self.store.integrate_views();
        for i in 0..owned {
            if types[i] < 0 || im[i] <= 0.0 {
                continue;
            }
            let mut delta = vec![0.0; dim];
            let mut norm = 0.0;
            for dd in 0..dim {
                delta[dd] = center[dd] - x[i * dim + dd];
                norm += delta[dd] * delta[dd];
            }
            let norm = norm.sqrt();
            if norm == 0.0 {
                continue;
            }
            for dd in 0..dim {
                f[i * dim + dd] += attraction / im[i] * delta[dd] / norm;
            }
        }
    }

    // ── Relaxation runs ────────────────────────────────────────────────

    /// Run `t` simulated time with every interaction replaced by a plain
    /// hard sphere, then reset all velocities. Recording stays off.
    ///
    /// # Errors
    ///
    /// Propagates fatal step errors.
    pub fn hs_relax(&mut self, t: f64) -> Result<(), GranError> {
        let variant = self
            .forces
            .hard_sphere_variant(defaults::DEFAULT_HARD_SPHERE_REPULSION);
        let saved = std::mem::replace(&mut self.forces, variant);
        let result = self.quiet_run(t);
        self.forces = saved;
        self.store.clear_v();
        result
    }

    /// Run `t` simulated time with the real forces, then reset all
    /// velocities. Recording stays off.
    ///
    /// # Errors
    ///
    /// Propagates fatal step errors.
    pub fn relax(&mut self, t: f64) -> Result<(), GranError> {
        let result = self.quiet_run(t);
        self.store.clear_v();
        result
    }

    fn quiet_run(&mut self, t: f64) -> Result<(), GranError> {
        let was_recording = self.observers.recording;
        self.observers.recording = false;
        let result = self.run(t);
        self.observers.recording = was_recording;
        result
    }

    // ── Reporting ──────────────────────────────────────────────────────

    /// Assemble the end-of-run summary.
    #[must_use]
    pub fn summary(&self, command: &str) -> RunSummary {
        let steps_per_sec = if self.wall_time_s > 0.0 {
            self.iter as f64 / self.wall_time_s
        } else {
            0.0
        };
        RunSummary {
            version: env!("CARGO_PKG_VERSION").to_string(),
            command: command.to_string(),
            dimensions: self.store.dim(),
            bounds: (0..self.bounds.dim())
                .map(|d| (self.bounds.min[d], self.bounds.max[d]))
                .collect(),
            boundary: self.bcs.iter().map(|bc| format!("{bc:?}")).collect(),
            integrator: match self.integrator.kind {
                IntegratorKind::VelocityVerlet => "VelocityVerlet".to_string(),
                IntegratorKind::Overdamped { damping } => {
                    format!("Overdamped(damping={damping})")
                }
            },
            final_dt: self.integrator.dt(),
            requested_time: self.total_requested_time,
            elapsed_time: self.elapsed_time,
            total_time: self.total_time,
            iterations: self.iter,
            wall_time_s: self.wall_time_s,
            steps_per_sec,
            particles: self.store.number_owned(),
            ntypes: self.store.ntypes(),
            interactions: self.forces.num_laws(),
            remakes: self.neighbor.number_of_remakes(),
            missed_target: self.neighbor.missed_target(),
            average_miss: self.neighbor.average_miss(),
            virial: self.forces.virial(),
            potential: self.forces.potential(),
            boundary_force: self.boundary_force,
            notes: self.notes.clone(),
        }
    }
}
