// SPDX-License-Identifier: AGPL-3.0-only

//! Time integration: Velocity-Verlet and overdamped dynamics, with an
//! adaptive time-step controller.
//!
//! Velocity-Verlet splits the update around the force computation:
//!
//! ```text
//! pre-forces : v += (dt/2) im f ;  x += dt v      (half-kick + drift)
//! post-forces: v += (dt/2) im f                   (second half-kick)
//! ```
//!
//! The overdamped variant has no inertia: positions follow the force
//! directly in the post-forces phase.
//!
//! ## Adaptive time step
//!
//! Every `step_delay` steps the controller measures the fastest particle
//! (and optionally the largest acceleration) and targets `target_steps`
//! steps per characteristic length traversed. Decreases apply immediately;
//! increases are smoothed (`dt <- 0.9 dt + 0.1 dt_candidate`) so one slow
//! sample cannot balloon the step. The result is clamped to
//! `[min_dt, max_dt]`.

use rayon::prelude::*;

use crate::defaults;
use crate::error::GranError;
use crate::store::ParticleStore;

/// Which update rule the integrator applies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntegratorKind {
    /// Symplectic Velocity-Verlet (half-kick / drift / half-kick).
    VelocityVerlet,
    /// First-order overdamped dynamics `x += damping * im * f * dt`.
    Overdamped {
        /// Mobility prefactor applied to the force.
        damping: f64,
    },
}

/// Integrator state: update rule plus adaptive-dt controller.
#[derive(Debug, Clone)]
pub struct Integrator {
    /// Active update rule.
    pub kind: IntegratorKind,
    dt: f64,
    /// Whether the adaptive controller may change `dt`.
    pub adjust_dt: bool,
    /// Lower clamp for the adaptive controller.
    pub min_dt: f64,
    /// Upper clamp for the adaptive controller.
    pub max_dt: f64,
    /// Target steps per characteristic length at the maximum speed.
    pub target_steps: usize,
    /// Steps between controller updates.
    pub step_delay: usize,
    step_count: usize,
    /// Derive the candidate dt from the maximum speed.
    pub use_v: bool,
    /// Also derive a candidate dt from the maximum acceleration.
    pub use_a: bool,
    characteristic_length: f64,
}

impl Integrator {
    /// Velocity-Verlet integrator with default adaptive-dt settings.
    #[must_use]
    pub fn velocity_verlet() -> Self {
        Self {
            kind: IntegratorKind::VelocityVerlet,
            dt: defaults::DEFAULT_TIME_STEP,
            adjust_dt: true,
            min_dt: defaults::DEFAULT_MIN_DT,
            max_dt: defaults::DEFAULT_MAX_DT,
            target_steps: defaults::DEFAULT_TARGET_STEPS,
            step_delay: defaults::DEFAULT_STEP_DELAY,
            step_count: 0,
            use_v: true,
            use_a: false,
            characteristic_length: defaults::DEFAULT_CHARACTERISTIC_LENGTH,
        }
    }

    /// Overdamped integrator with the given damping constant. Overdamped
    /// dynamics carry no velocities, so the dt controller watches
    /// accelerations instead.
    #[must_use]
    pub fn overdamped(damping: f64) -> Self {
        Self {
            kind: IntegratorKind::Overdamped { damping },
            use_v: false,
            use_a: true,
            ..Self::velocity_verlet()
        }
    }

    /// Current time step.
    #[must_use]
    pub const fn dt(&self) -> f64 {
        self.dt
    }

    /// Force a specific time step (the controller may move it later).
    pub fn set_dt(&mut self, dt: f64) {
        if dt > 0.0 {
            self.dt = dt;
        }
    }

    /// Set the upper clamp.
    pub fn set_max_dt(&mut self, max_dt: f64) {
        if max_dt > 0.0 {
            self.max_dt = max_dt;
        }
    }

    /// Set the lower clamp.
    pub fn set_min_dt(&mut self, min_dt: f64) {
        if min_dt > 0.0 {
            self.min_dt = min_dt;
        }
    }

    /// Mean radius the controller treats as one characteristic length.
    #[must_use]
    pub const fn characteristic_length(&self) -> f64 {
        self.characteristic_length
    }

    /// Per-run reset: prime the controller so the first step triggers a
    /// check, measure the characteristic length, and start from `min_dt`.
    pub fn pre_integrate(&mut self, store: &ParticleStore) {
        self.step_count = self.step_delay;
        let mut length = 0.0;
        let mut count = 0usize;
        for i in 0..store.size() {
            if store.types()[i] < 0 {
                continue;
            }
            length += store.sg()[i];
            count += 1;
        }
        self.characteristic_length = if count > 0 {
            length / count as f64
        } else {
            defaults::DEFAULT_CHARACTERISTIC_LENGTH
        };
        if self.adjust_dt {
            self.dt = self.min_dt;
        }
    }

    /// Adaptive-dt check, every `step_delay` steps.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::NanValue`] when the measured maximum speed or
    /// acceleration is NaN.
    pub fn pre_step(&mut self, store: &ParticleStore) -> Result<(), GranError> {
        if !self.adjust_dt {
            return Ok(());
        }
        if self.step_count < self.step_delay {
            self.step_count += 1;
            return Ok(());
        }
        self.step_count = 0;

        let mut max_v = -1.0;
        let mut max_a = -1.0;
        let mut dt_v = 1.0;
        let mut dt_a = 1.0;
        if self.use_v {
            max_v = self.max_velocity(store);
            dt_v = self.characteristic_length / (max_v * self.target_steps as f64);
        }
        if self.use_a {
            max_a = self.max_acceleration(store);
            dt_a = 10.0 * self.characteristic_length.sqrt() / (max_a * self.target_steps as f64);
        }
        if max_v.is_nan() || max_a.is_nan() {
            return Err(GranError::NanValue(
                "integrator pre-step detected NaN speed or acceleration".into(),
            ));
        }
        // No motion information yet (start of a run): leave dt alone.
        if (!self.use_v || max_v == 0.0) && (!self.use_a || max_a == 0.0) {
            return Ok(());
        }

        let dt_c = dt_v.min(dt_a);
        self.dt = if dt_c < self.dt {
            dt_c
        } else {
            0.9 * self.dt + 0.1 * dt_c
        };
        self.dt = self.dt.clamp(self.min_dt, self.max_dt);
        Ok(())
    }

    /// Pre-force phase: Velocity-Verlet half-kick plus drift. No-op for the
    /// overdamped rule.
    pub fn pre_forces(&mut self, store: &mut ParticleStore) {
        if self.kind != IntegratorKind::VelocityVerlet {
            return;
        }
        let dim = store.dim();
        let total = store.size_owned() * dim;
        let dt = self.dt;
        let hdt = 0.5 * dt;
        let (x, v, f, im) = store.integrate_views();
        for i in 0..total {
            let w = im[i / dim];
            v[i] += hdt * w * f[i];
            x[i] += dt * v[i];
        }
    }

    /// Post-force phase: Velocity-Verlet second half-kick, or the full
    /// overdamped position update.
    pub fn post_forces(&mut self, store: &mut ParticleStore) {
        let dim = store.dim();
        let total = store.size_owned() * dim;
        let dt = self.dt;
        match self.kind {
            IntegratorKind::VelocityVerlet => {
                let hdt = 0.5 * dt;
                let (_x, v, f, im) = store.integrate_views();
                for i in 0..total {
                    v[i] += hdt * im[i / dim] * f[i];
                }
            }
            IntegratorKind::Overdamped { damping } => {
                let (x, _v, f, im) = store.integrate_views();
                for i in 0..total {
                    x[i] += damping * im[i / dim] * f[i] * dt;
                }
            }
        }
    }

    /// Largest velocity component over all particles, scaled by `sqrt(D)`
    /// to bound the vector magnitude. NaN components poison the result so
    /// the caller's NaN check can fire.
    #[must_use]
    pub fn max_velocity(&self, store: &ParticleStore) -> f64 {
        let v = store.v();
        let max_comp = v
            .par_iter()
            .map(|c| c.abs())
            .reduce(|| 0.0, nan_preserving_max);
        max_comp * (store.dim() as f64).sqrt()
    }

    /// Largest acceleration component (`|f * im|`) over all particles,
    /// scaled by `sqrt(D)`. NaN components poison the result.
    #[must_use]
    pub fn max_acceleration(&self, store: &ParticleStore) -> f64 {
        let dim = store.dim();
        let f = store.f();
        let im = store.im();
        let max_comp = f
            .par_iter()
            .enumerate()
            .map(|(i, c)| (c * im[i / dim]).abs())
            .reduce(|| 0.0, nan_preserving_max);
        max_comp * (dim as f64).sqrt()
    }
}

/// `f64::max` quietly discards NaN operands; this variant propagates them.
fn nan_preserving_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}
