// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end dynamics: drift, collisions, energy and momentum behavior,
//! boundary responses, and an obstacle-wake sanity check.

use granflow::bonded::HarmonicBonds;
use granflow::interaction::InteractionLaw;
use granflow::modifier::Flow;
use granflow::observer::kinetic_energy;
use granflow::scenario::fill;
use granflow::{BcFlag, Bounds, Engine, ParticleStore};

fn engine_2d(
    particles: &[([f64; 2], [f64; 2], f64, f64)],
    bcs: [BcFlag; 2],
    box_side: f64,
) -> Engine {
    let mut store = ParticleStore::new(2, 1).expect("store");
    for (x, v, sg, im) in particles {
        store.add_particle(x, v, *sg, *im, 0).expect("add");
    }
    let bounds = Bounds::new(&[(0.0, box_side), (0.0, box_side)]).expect("bounds");
    let mut engine = Engine::new(store, bounds, bcs.to_vec()).expect("engine");
    engine.integrator.adjust_dt = false;
    engine
}

/// Spec scenario 1: free drift under Wrap returns home with velocity and
/// energy untouched.
#[test]
fn single_particle_drift_conserves_state() {
    let mut engine = engine_2d(
        &[([0.0, 0.0], [1.0, 0.0], 0.05, 1.0)],
        [BcFlag::Wrap, BcFlag::Wrap],
        10.0,
    );
    engine.integrator.set_dt(0.01);
    let ke0 = kinetic_energy(&engine.store);
    engine.run(10.0).expect("run");
    let x = engine.store.x_of(0)[0];
    let folded = x.rem_euclid(10.0);
    assert!(folded.min(10.0 - folded) < 0.05, "not home: x = {x}");
    assert_eq!(engine.store.v_of(0), &[1.0, 0.0]);
    assert!((kinetic_energy(&engine.store) - ke0).abs() < 1e-14);
}

/// Spec scenario 2: head-on hard-sphere collision reverses the relative
/// velocity and conserves kinetic energy to 0.5% at dt = 1e-4.
#[test]
fn head_on_collision_is_nearly_elastic() {
    let mut engine = engine_2d(
        &[
            ([4.0, 5.0], [1.0, 0.0], 0.5, 1.0),
            ([6.0, 5.0], [-1.0, 0.0], 0.5, 1.0),
        ],
        [BcFlag::Open, BcFlag::Open],
        10.0,
    );
    engine
        .forces
        .set_law(0, 0, InteractionLaw::hard_sphere(100.0))
        .expect("law");
    engine.integrator.set_dt(1e-4);
    let ke0 = kinetic_energy(&engine.store);
    engine.run(2.0).expect("run");

    let v_rel = engine.store.v_of(0)[0] - engine.store.v_of(1)[0];
    assert!(v_rel < 0.0, "relative velocity must reverse, got {v_rel}");
    let ke = kinetic_energy(&engine.store);
    assert!(
        (ke - ke0).abs() / ke0 <= 5e-3,
        "kinetic energy drifted {:.3}%",
        100.0 * (ke - ke0).abs() / ke0
    );
}

/// Spec invariant 5: Velocity-Verlet on a harmonic pair conserves energy
/// with O(dt^2) drift — quartering the step should cut the drift by about
/// an order of magnitude.
#[test]
fn velocity_verlet_energy_drift_scales_quadratically() {
    // Max relative energy error sampled over many windows; for VV this
    // amplitude scales with dt^2.
    let drift_at = |dt: f64| -> f64 {
        let mut engine = engine_2d(
            &[
                ([4.0, 5.0], [0.0, 0.0], 0.1, 1.0),
                ([5.5, 5.0], [0.0, 0.0], 0.1, 1.0),
            ],
            [BcFlag::Open, BcFlag::Open],
            10.0,
        );
        let ga = engine.store.gids()[0];
        let gb = engine.store.gids()[1];
        let mut bonds = HarmonicBonds::new(5.0, 1.0);
        bonds.add_bond(ga, gb);
        engine.bonded.push(bonds);
        engine.integrator.set_dt(dt);
        // Stretched bond: total energy = spring PE at start.
        let e0 = 0.5 * 5.0 * (1.5 - 1.0_f64).powi(2);
        let mut max_drift = 0.0_f64;
        for _ in 0..20 {
            engine.run(0.2).expect("run");
            let r = engine.store.x_of(1)[0] - engine.store.x_of(0)[0];
            let pe = 0.5 * 5.0 * (r - 1.0).powi(2);
            let drift = (kinetic_energy(&engine.store) + pe - e0).abs() / e0;
            max_drift = max_drift.max(drift);
        }
        max_drift
    };
    let coarse = drift_at(4e-3);
    let fine = drift_at(1e-3);
    assert!(coarse < 2e-3, "coarse drift too large: {coarse}");
    assert!(
        fine < coarse,
        "drift did not shrink with dt: coarse {coarse}, fine {fine}"
    );
}

/// Spec invariant 4, exercised through halo copies: forces accumulated on
/// a copy fold back to the owner, so total momentum is conserved.
#[test]
fn halo_fold_preserves_momentum() {
    let mut store = ParticleStore::new(2, 1).expect("store");
    store
        .add_particle(&[9.9, 5.0], &[0.0, 0.0], 0.2, 1.0, 0)
        .expect("add");
    store
        .add_particle(&[0.1, 5.0], &[0.0, 0.0], 0.2, 1.0, 0)
        .expect("add");
    // Copy of particle 0 shifted one lattice vector down in x, sitting
    // right next to particle 1.
    let halo = store.create_halo_of(0, &[-10.0, 0.0]).expect("halo");

    let mut forces = granflow::ForceGrid::new(1);
    forces
        .set_law(0, 0, InteractionLaw::hard_sphere(50.0))
        .expect("law");
    let bounds = Bounds::new(&[(0.0, 10.0), (0.0, 10.0)]).expect("bounds");
    let bcs = vec![BcFlag::Open, BcFlag::Open];
    let pairs = [halo as u32, 1u32];
    forces
        .interact(&mut store, &pairs, &bounds, &bcs)
        .expect("interact");
    store.update_halo_particles();

    // Owner received the reaction of what particle 1 felt.
    assert!(
        (store.f()[0] + store.f()[2]).abs() < 1e-12,
        "halo fold broke momentum: {} vs {}",
        store.f()[0],
        store.f()[2]
    );
    assert!(store.f()[0].abs() > 0.0, "no force was exchanged");
}

#[test]
fn reflect_boundary_flips_normal_component_once_per_crossing() {
    let mut engine = engine_2d(
        &[([9.0, 5.0], [2.0, 0.3], 0.05, 1.0)],
        [BcFlag::Reflect, BcFlag::Open],
        10.0,
    );
    engine.integrator.set_dt(0.001);
    engine.run(1.0).expect("run");
    // One crossing of the upper x face in 1 time unit.
    assert!((engine.store.v_of(0)[0] + 2.0).abs() < 1e-12);
    assert!((engine.store.v_of(0)[1] - 0.3).abs() < 1e-12, "tangential touched");
    assert!(engine.store.x_of(0)[0] <= 10.0);
}

#[test]
fn repulse_boundary_pushes_back_and_reports_force() {
    let mut engine = engine_2d(
        &[([9.99, 5.0], [1.0, 0.0], 0.05, 1.0)],
        [BcFlag::Repulse, BcFlag::Open],
        10.0,
    );
    engine.repulsion = 50.0;
    engine.integrator.set_dt(0.001);
    engine.run(1.0).expect("run");
    // The wall turned the particle around inside the box eventually.
    assert!(engine.store.v_of(0)[0] < 0.0, "not repelled");
    assert!(
        engine.store.x_of(0)[0] < 10.5,
        "escaped: x = {}",
        engine.store.x_of(0)[0]
    );
}

/// Obstacle in a driven flow: drag points downstream, lift averages out by
/// symmetry. A scaled-down wake scenario; statistical, fixed seed.
#[test]
fn obstacle_drag_positive_lift_small() {
    let mut store = ParticleStore::new(2, 2).expect("store");
    // Obstacle ring at the box center (type 1, immovable).
    fill::fill_circle(&mut store, &[5.0, 5.0], 0.15, 0.8, 1).expect("ring");
    // Fluid lattice around it (type 0), seeded off-lattice a touch.
    let mut k = 0u64;
    for ix in 0..14 {
        for iy in 0..14 {
            k = k.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(97);
            let jitter = (k >> 33) as f64 / f64::from(1u32 << 31) * 0.05;
            let x = [
                0.35 + ix as f64 * 0.7 + jitter,
                0.35 + iy as f64 * 0.7,
            ];
            let dx = x[0] - 5.0;
            let dy = x[1] - 5.0;
            if (dx * dx + dy * dy).sqrt() < 1.3 {
                continue;
            }
            store.add_particle(&x, &[0.5, 0.0], 0.25, 1.0, 0).expect("add");
        }
    }
    let obstacle_start = store
        .types()
        .iter()
        .filter(|&&t| t == 1)
        .count();
    assert!(obstacle_start > 10);

    let bounds = Bounds::new(&[(0.0, 10.0), (0.0, 10.0)]).expect("bounds");
    let mut engine = Engine::new(store, bounds, vec![BcFlag::Wrap, BcFlag::Wrap]).expect("engine");
    engine
        .forces
        .set_law(0, 0, InteractionLaw::hard_sphere_dissipative(40.0, 2.0))
        .expect("law");
    engine
        .forces
        .set_law(0, 1, InteractionLaw::hard_sphere_dissipative(40.0, 2.0))
        .expect("law");
    engine.forces.set_none(1, 1).expect("none");
    engine
        .modifiers
        .push(Box::new(Flow::new(vec![0.6, 0.0], 2.0, None)));
    engine.integrator.adjust_dt = false;
    engine.integrator.set_dt(2e-3);

    engine.relax(0.5).expect("relax");
    // Accumulate the force on the obstacle over many short windows.
    let mut drag = 0.0;
    let mut lift = 0.0;
    let mut samples = 0usize;
    for _ in 0..60 {
        engine.run(0.05).expect("window");
        let types = engine.store.types();
        for i in 0..engine.store.size_owned() {
            if types[i] == 1 {
                drag += engine.store.f()[i * 2];
                lift += engine.store.f()[i * 2 + 1];
            }
        }
        samples += 1;
    }
    let drag = drag / samples as f64;
    let lift = lift / samples as f64;
    assert!(drag > 0.0, "drag must point downstream, got {drag}");
    assert!(
        lift.abs() < drag,
        "lift should average near zero: lift {lift}, drag {drag}"
    );
}

#[test]
fn momentum_conserved_in_a_dense_wrap_box() {
    let mut store = ParticleStore::new(2, 1).expect("store");
    let mut seed = 31_u64;
    let mut next = || {
        seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        (seed >> 33) as f64 / f64::from(1u32 << 31)
    };
    for _ in 0..80 {
        let x = [next() * 6.0, next() * 6.0];
        let v = [next() - 0.5, next() - 0.5];
        store.add_particle(&x, &v, 0.2, 1.0, 0).expect("add");
    }
    let p0: (f64, f64) = {
        let v = store.v();
        (
            (0..80).map(|i| v[i * 2]).sum(),
            (0..80).map(|i| v[i * 2 + 1]).sum(),
        )
    };
    let bounds = Bounds::new(&[(0.0, 6.0), (0.0, 6.0)]).expect("bounds");
    let mut engine = Engine::new(store, bounds, vec![BcFlag::Wrap, BcFlag::Wrap]).expect("engine");
    engine
        .forces
        .set_law(0, 0, InteractionLaw::hard_sphere(60.0))
        .expect("law");
    engine.integrator.adjust_dt = false;
    engine.integrator.set_dt(1e-3);
    engine.run(1.0).expect("run");
    let v = engine.store.v();
    let px: f64 = (0..engine.store.size()).map(|i| v[i * 2]).sum();
    let py: f64 = (0..engine.store.size()).map(|i| v[i * 2 + 1]).sum();
    assert!((px - p0.0).abs() < 1e-9, "px drift {}", px - p0.0);
    assert!((py - p0.1).abs() < 1e-9, "py drift {}", py - p0.1);
}
