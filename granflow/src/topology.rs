// SPDX-License-Identifier: AGPL-3.0-only

//! Multi-node synchronization contract.
//!
//! The step loop synchronizes with peer nodes at five points: particle
//! migration (pre-exchange), ghost refresh (after a pair-list rebuild),
//! halo/ghost force fold-back, the end-of-step stop reduction, and the
//! time-step minimum. This trait carries those hooks; the bundled
//! implementation is a single node for which every hook is the identity.
//! Message-passing mechanics live outside this crate.

use crate::error::GranError;
use crate::store::ParticleStore;

/// Cross-node synchronization hooks, called by the orchestrator at the
/// documented sync points.
pub trait Topology {
    /// Number of cooperating nodes.
    fn num_nodes(&self) -> usize {
        1
    }

    /// Migrate owned particles that crossed subdomain boundaries and adopt
    /// arrivals (pre-exchange sync point).
    ///
    /// # Errors
    ///
    /// Implementations surface communication failures as [`GranError`].
    fn exchange_particles(&mut self, _store: &mut ParticleStore) -> Result<(), GranError> {
        Ok(())
    }

    /// Re-send ghost copies of remote particles within `cutoff` of shared
    /// faces (pair-list rebuild sync point).
    ///
    /// # Errors
    ///
    /// Implementations surface communication failures as [`GranError`].
    fn update_ghosts(&mut self, _store: &mut ParticleStore, _cutoff: f64) -> Result<(), GranError> {
        Ok(())
    }

    /// Combine per-node continue/stop decisions: the run continues only
    /// while every node wants to continue.
    fn reduce_running(&mut self, running: bool) -> bool {
        running
    }

    /// Global minimum of the adaptive time step.
    fn reduce_min_dt(&mut self, dt: f64) -> f64 {
        dt
    }

    /// Broadcast a fatal decision; returns whether any node is fatal.
    fn broadcast_fatal(&mut self, fatal: bool) -> bool {
        fatal
    }

    /// Block until all nodes arrive.
    fn barrier(&mut self) {}
}

/// The trivial single-node topology.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleNode;

impl Topology for SingleNode {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_node_hooks_are_identities() {
        let mut topo = SingleNode;
        assert_eq!(topo.num_nodes(), 1);
        assert!(topo.reduce_running(true));
        assert!(!topo.reduce_running(false));
        assert!((topo.reduce_min_dt(0.125) - 0.125).abs() < 1e-18);
        assert!(!topo.broadcast_fatal(false));
        assert!(topo.broadcast_fatal(true));
    }
}
