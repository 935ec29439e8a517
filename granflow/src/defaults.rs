// SPDX-License-Identifier: AGPL-3.0-only

//! Centralized default parameters with physical justification.
//!
//! Every default used by the engine is defined here with documentation of
//! its origin and rationale. No ad-hoc magic numbers in module code.
//!
//! Units are the reduced units of the simulation: particle radii of order
//! 0.05, box sides of order 1–10, forces from the hard-sphere repulsion
//! scale below.

/// Fallback integration time step when adaptive stepping is disabled.
///
/// Small enough that a hard-sphere contact at the default repulsion is
/// resolved over ~10 steps for radius-0.05 particles.
pub const DEFAULT_TIME_STEP: f64 = 1e-3;

/// Smallest time step the adaptive controller will select.
pub const DEFAULT_MIN_DT: f64 = 1e-6;

/// Largest time step the adaptive controller will select.
///
/// Above this, fast head-on contacts tunnel through each other even at
/// moderate velocities.
pub const DEFAULT_MAX_DT: f64 = 2e-3;

/// Target number of steps for a particle moving at the maximum observed
/// speed to traverse one characteristic length (mean radius).
pub const DEFAULT_TARGET_STEPS: usize = 20;

/// How many steps pass between adaptive time-step recomputations.
///
/// The max-speed scan is O(N); every step would be wasteful, and speeds
/// change slowly on the scale of a few steps.
pub const DEFAULT_STEP_DELAY: usize = 10;

/// Characteristic length used before any particles exist.
pub const DEFAULT_CHARACTERISTIC_LENGTH: f64 = 0.05;

/// Linear repulsion strength for hard-sphere contacts.
pub const DEFAULT_HARD_SPHERE_REPULSION: f64 = 10.0;

/// Lennard-Jones well depth (epsilon).
pub const DEFAULT_LENNARD_JONES_STRENGTH: f64 = 0.01;

/// Lennard-Jones cutoff in units of the zero-crossing distance.
///
/// 2.5 sigma is the conventional LJ truncation radius; the tail beyond it
/// contributes < 1.6% of the well depth.
pub const DEFAULT_LENNARD_JONES_CUTOFF: f64 = 2.5;

/// Damping constant for the overdamped integrator.
pub const DEFAULT_DAMPING_CONSTANT: f64 = 0.1;

/// Skin depth added to interaction ranges when building the pair list.
///
/// Half a typical radius: large enough that lists survive tens of steps,
/// small enough that the pair list stays within ~2x the true neighbor count.
pub const DEFAULT_SKIN_DEPTH: f64 = 0.025;

/// Fraction of the skin depth particles may close before the pair list is
/// considered stale. The rebuild check compares twice the maximum single
/// displacement against `MOTION_FACTOR * skin_depth`.
pub const DEFAULT_MOTION_FACTOR: f64 = 1.0;

/// Safety factor applied to the motion criterion: rebuild slightly before
/// the theoretical staleness point.
pub const DEFAULT_MV_RATIO_TOLERANCE: f64 = 0.95;

/// Multiple of the minimum cutoff used as the target cell width.
///
/// 1.0 gives the smallest cells that still make the half-stencil walk
/// sufficient; larger values trade fewer cells for more distance checks.
pub const DEFAULT_CUTOFF_FACTOR: f64 = 1.0;

/// Longest simulated time between pair-list rebuilds, regardless of motion.
///
/// Guards against a stale list when the motion estimate is fooled (e.g.
/// sampled estimation in a non-homogeneous system).
pub const DEFAULT_MAX_UPDATE_DELAY: f64 = 0.025;

/// Displacements larger than this multiple of the skin depth are assumed to
/// be wrap artifacts and excluded from the max-motion estimate.
pub const WRAP_PLAUSIBLE_FACTOR: f64 = 10.0;

/// Hard bound on particles per neighbor cell.
///
/// A cell is ~one interaction diameter wide, so physical packings hold tens
/// of particles per cell; a thousand means collapse onto a point or broken
/// sizing, and the build aborts rather than thrash.
pub const MAX_CELL_OCCUPANCY: usize = 1024;

/// Rejection-sampling attempts per particle when filling around excluded
/// regions before giving up on that particle.
pub const MAX_FILL_ATTEMPTS: usize = 50;

/// Default recording cadence (frames per unit simulated time).
pub const DEFAULT_FPS: f64 = 15.0;

/// Default kinetic energy per particle for sampled fill velocities.
pub const DEFAULT_FILL_KINETIC: f64 = 0.25 / 127.324;

/// Default temperature for thermal fill velocities.
pub const DEFAULT_FILL_TEMPERATURE: f64 = 0.00156;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dt_window_ordered() {
        assert!(DEFAULT_MIN_DT < DEFAULT_TIME_STEP);
        assert!(DEFAULT_TIME_STEP <= DEFAULT_MAX_DT);
    }

    #[test]
    fn rebuild_criterion_tightened_not_loosened() {
        // The tolerance must trigger rebuilds at or before the theoretical
        // staleness point, never after.
        assert!(DEFAULT_MV_RATIO_TOLERANCE <= 1.0);
        assert!(DEFAULT_MV_RATIO_TOLERANCE > 0.0);
    }

    #[test]
    fn cell_width_covers_cutoff() {
        assert!(DEFAULT_CUTOFF_FACTOR >= 1.0);
    }

    #[test]
    fn skin_positive_and_small() {
        assert!(DEFAULT_SKIN_DEPTH > 0.0);
        assert!(DEFAULT_SKIN_DEPTH < DEFAULT_CHARACTERISTIC_LENGTH);
    }
}
