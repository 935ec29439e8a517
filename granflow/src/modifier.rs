// SPDX-License-Identifier: AGPL-3.0-only

//! Modifiers: pluggable phase hooks that perturb the simulation.
//!
//! A modifier implements whichever subset of the phase hooks it needs; the
//! orchestrator calls every modifier at every phase in registration order.
//! A modifier that reports `remove()` is retired after the force phase of
//! the current step.

use crate::bounds::{BcFlag, Bounds};
use crate::store::ParticleStore;

/// Mutable view of the simulation handed to modifier hooks.
pub struct ModifierContext<'a> {
    /// The particle store (modifiers may mutate any particle data).
    pub store: &'a mut ParticleStore,
    /// Simulation bounds.
    pub bounds: &'a Bounds,
    /// Per-dimension boundary conditions.
    pub bcs: &'a [BcFlag],
    /// Current time step.
    pub dt: f64,
    /// Elapsed simulated time in the current run.
    pub time: f64,
}

/// Phase-hook capability set. Implementations override exactly the phases
/// they need; defaults are no-ops.
pub trait Modifier {
    /// Display name, used in the run summary.
    fn name(&self) -> &'static str;

    /// Whether the orchestrator should retire this modifier this step.
    fn remove(&self) -> bool {
        false
    }

    /// Once per run, before the first step.
    fn pre_integrate(&mut self, _ctx: &mut ModifierContext) {}
    /// Start of every step.
    fn pre_step(&mut self, _ctx: &mut ModifierContext) {}
    /// Before cross-node particle migration.
    fn pre_exchange(&mut self, _ctx: &mut ModifierContext) {}
    /// Before force computation (the integrator has already drifted).
    fn pre_forces(&mut self, _ctx: &mut ModifierContext) {}
    /// After pair forces, before the halo fold and the second half-kick.
    fn post_forces(&mut self, _ctx: &mut ModifierContext) {}
    /// End of every step.
    fn post_step(&mut self, _ctx: &mut ModifierContext) {}
    /// Once per run, after the last step.
    fn post_integrate(&mut self, _ctx: &mut ModifierContext) {}
}

/// Uniform body acceleration (gravity and the like): adds `a / im` to every
/// movable particle's force in post-forces.
pub struct ConstantAcceleration {
    acceleration: Vec<f64>,
}

impl ConstantAcceleration {
    /// Constant acceleration with the given vector.
    #[must_use]
    pub const fn new(acceleration: Vec<f64>) -> Self {
        Self { acceleration }
    }
}

impl Modifier for ConstantAcceleration {
    fn name(&self) -> &'static str {
        "ConstantAcceleration"
    }

    fn post_forces(&mut self, ctx: &mut ModifierContext) {
        let dim = ctx.store.dim();
        let owned = ctx.store.size_owned();
        let types: Vec<i64> = ctx.store.types()[..owned].to_vec();
        let im: Vec<f64> = ctx.store.im()[..owned].to_vec();
        let f = ctx.store.f_mut();
        for i in 0..owned {
            if types[i] < 0 || im[i] <= 0.0 {
                continue;
            }
            for d in 0..dim {
                f[i * dim + d] += self.acceleration[d] / im[i];
            }
        }
    }
}

/// Viscous drag: adds `-damping * v` to every particle's force.
pub struct LinearDamping {
    damping: f64,
}

impl LinearDamping {
    /// Drag with the given damping coefficient.
    #[must_use]
    pub const fn new(damping: f64) -> Self {
        Self { damping }
    }
}

impl Modifier for LinearDamping {
    fn name(&self) -> &'static str {
        "LinearDamping"
    }

    fn post_forces(&mut self, ctx: &mut ModifierContext) {
        let dim = ctx.store.dim();
        let total = ctx.store.size_owned() * dim;
        let damping = self.damping;
        let v: Vec<f64> = ctx.store.v()[..total].to_vec();
        let f = ctx.store.f_mut();
        for i in 0..total {
            f[i] -= damping * v[i];
        }
    }
}

/// Drives particle velocities toward a target flow field, optionally
/// expiring after a set simulated time (at which point the orchestrator
/// drops it).
pub struct Flow {
    velocity: Vec<f64>,
    strength: f64,
    until: Option<f64>,
    expired: bool,
}

impl Flow {
    /// Flow driving toward `velocity` with coupling `strength`; `until`
    /// expires the modifier at that simulated time.
    #[must_use]
    pub const fn new(velocity: Vec<f64>, strength: f64, until: Option<f64>) -> Self {
        Self {
            velocity,
            strength,
            until,
            expired: false,
        }
    }
}

impl Modifier for Flow {
    fn name(&self) -> &'static str {
        "Flow"
    }

    fn remove(&self) -> bool {
        self.expired
    }

    fn post_forces(&mut self, ctx: &mut ModifierContext) {
        if let Some(until) = self.until {
            if ctx.time >= until {
                self.expired = true;
                return;
            }
        }
        let dim = ctx.store.dim();
        let owned = ctx.store.size_owned();
        let strength = self.strength;
        let v: Vec<f64> = ctx.store.v()[..owned * dim].to_vec();
        let f = ctx.store.f_mut();
        for i in 0..owned {
            for d in 0..dim {
                f[i * dim + d] += strength * (self.velocity[d] - v[i * dim + d]);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::bounds::Bounds;

    fn context_fixture() -> (ParticleStore, Bounds, Vec<BcFlag>) {
        let mut store = ParticleStore::new(2, 1).unwrap();
        store
            .add_particle(&[1.0, 1.0], &[0.5, 0.0], 0.05, 2.0, 0)
            .unwrap();
        store
            .add_particle(&[2.0, 2.0], &[0.0, 0.0], 0.05, 0.0, 0)
            .unwrap();
        let bounds = Bounds::new(&[(0.0, 10.0), (0.0, 10.0)]).unwrap();
        (store, bounds, vec![BcFlag::Open, BcFlag::Open])
    }

    #[test]
    fn constant_acceleration_scales_by_mass() {
        let (mut store, bounds, bcs) = context_fixture();
        let mut gravity = ConstantAcceleration::new(vec![0.0, -1.0]);
        let mut ctx = ModifierContext {
            store: &mut store,
            bounds: &bounds,
            bcs: &bcs,
            dt: 0.01,
            time: 0.0,
        };
        gravity.post_forces(&mut ctx);
        // im = 2 → mass 0.5 → F_y = a/im = -0.5.
        assert!((store.f()[1] + 0.5).abs() < 1e-15);
        // Immovable particle receives nothing.
        assert_eq!(store.f()[3], 0.0);
    }

    #[test]
    fn linear_damping_opposes_velocity() {
        let (mut store, bounds, bcs) = context_fixture();
        let mut drag = LinearDamping::new(2.0);
        let mut ctx = ModifierContext {
            store: &mut store,
            bounds: &bounds,
            bcs: &bcs,
            dt: 0.01,
            time: 0.0,
        };
        drag.post_forces(&mut ctx);
        assert!((store.f()[0] + 1.0).abs() < 1e-15);
        assert_eq!(store.f()[1], 0.0);
    }

    #[test]
    fn flow_expires_and_requests_removal() {
        let (mut store, bounds, bcs) = context_fixture();
        let mut flow = Flow::new(vec![1.0, 0.0], 3.0, Some(1.0));
        let mut ctx = ModifierContext {
            store: &mut store,
            bounds: &bounds,
            bcs: &bcs,
            dt: 0.01,
            time: 0.0,
        };
        flow.post_forces(&mut ctx);
        assert!(!flow.remove());
        // Particle 0 moves at 0.5 toward target 1.0: F = 3 * 0.5.
        assert!((store.f()[0] - 1.5).abs() < 1e-15);
        let mut ctx = ModifierContext {
            store: &mut store,
            bounds: &bounds,
            bcs: &bcs,
            dt: 0.01,
            time: 2.0,
        };
        flow.post_forces(&mut ctx);
        assert!(flow.remove());
    }
}
