// SPDX-License-Identifier: AGPL-3.0-only

// Clippy pedantic/nursery + numeric allows are in [workspace.lints.clippy]
// in Cargo.toml. Library code must propagate errors, not panic:
#![deny(clippy::expect_used, clippy::unwrap_used)]
#![warn(missing_docs)]

//! granFlow — granular / soft-matter molecular dynamics.
//!
//! Advances a collection of interacting discs or spheres forward in time
//! under pairwise short-range forces, body-level constraints, and
//! environmental boundary conditions. Built for flows, packings, jamming,
//! and obstacle-wake studies.
//!
//! # Architecture
//!
//! ```text
//! scenario file ──> Scenario ──> Engine ──> output directory
//!                                  │
//!                 ParticleStore ◄──┼──► NeighborIndex (cells + pair list)
//!                 ForceGrid     ◄──┼──► Integrator (VV / overdamped)
//!                 Modifiers, Bodies, Observers, Topology hooks
//! ```
//!
//! The engine owns every subsystem and drives a fixed phase sequence per
//! step (pre-step, pre-exchange, pre-forces, forces, post-forces,
//! post-step); subsystems receive exactly the context they need and never
//! hold references to one another.
//!
//! # Reduced units
//!
//! Everything is dimensionless: radii of order 0.05, boxes of order 1–10,
//! the hard-sphere repulsion sets the force scale, `k_B = 1`.

/// Bonded interactions (harmonic bonds) and body-level constraints.
pub mod bonded;
/// Simulation box, boundary flags, and minimum-image displacement.
pub mod bounds;
/// Centralized default parameters with justification.
pub mod defaults;
/// The step orchestrator: master loop, boundary passes, relaxation runs.
pub mod engine;
/// Typed errors for configuration, setup, and run-time failure modes.
pub mod error;
/// Velocity-Verlet / overdamped integration with adaptive dt.
pub mod integrator;
/// Interaction laws and the (type × type) dispatch grid.
pub mod interaction;
/// Phase-hook modifiers (gravity, drag, driven flow).
pub mod modifier;
/// Cell-list spatial decomposition and Verlet pair list.
pub mod neighbor;
/// Observers (position/energy/count/boundary series) and their cadence.
pub mod observer;
/// Run summary and fixed output files.
pub mod output;
/// Scenario parsing and engine construction.
pub mod scenario;
/// The particle store: positions, velocities, forces, ids, halo/ghost
/// partitioning, compaction.
pub mod store;
/// Multi-node synchronization hooks (single-node implementation bundled).
pub mod topology;

pub use bounds::{BcFlag, Bounds};
pub use engine::Engine;
pub use error::GranError;
pub use integrator::{Integrator, IntegratorKind};
pub use interaction::{ForceGrid, InteractionLaw};
pub use neighbor::NeighborIndex;
pub use scenario::{RunPlan, Scenario};
pub use store::ParticleStore;
