// SPDX-License-Identifier: AGPL-3.0-only

//! Particle generator templates and fill operations.
//!
//! A template names a radius distribution, a mass rule, and a particle
//! type. Fills draw from a template until a count or density target is
//! met, rejecting draws that land in excluded regions (up to a bounded
//! number of attempts per particle). Overlaps between accepted particles
//! are allowed: scenarios relax them away afterwards.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution as _, Normal};
use serde::Serialize;

use crate::defaults;
use crate::error::GranError;
use crate::store::ParticleStore;

/// A scalar sampling rule.
#[derive(Debug, Clone, Serialize)]
pub enum Distribution {
    /// Always the same value.
    Literal(f64),
    /// Uniform on `[lo, hi)`.
    Uniform {
        /// Lower edge.
        lo: f64,
        /// Upper edge.
        hi: f64,
    },
    /// Gaussian with the given mean and standard deviation.
    Gaussian {
        /// Mean.
        mean: f64,
        /// Standard deviation.
        std: f64,
    },
}

impl Distribution {
    /// Parse from scenario args: `0.4`, `Uniform, lo, hi`, or
    /// `Normal, mean, std`.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::BadArgument`] on an unknown form.
    pub fn parse(args: &[String], line: usize) -> Result<Self, GranError> {
        match args {
            [value] => Ok(Self::Literal(super::parse::parse_f64(value, line)?)),
            [kind, a, b] if kind == "Uniform" => Ok(Self::Uniform {
                lo: super::parse::parse_f64(a, line)?,
                hi: super::parse::parse_f64(b, line)?,
            }),
            [kind, a, b] if kind == "Normal" => Ok(Self::Gaussian {
                mean: super::parse::parse_f64(a, line)?,
                std: super::parse::parse_f64(b, line)?,
            }),
            _ => Err(GranError::BadArgument(format!(
                "unrecognized distribution {args:?} (line {line})"
            ))),
        }
    }

    /// Draw one strictly positive value (radii and masses must be > 0;
    /// Gaussian tails are re-drawn, falling back to the mean).
    pub fn sample_positive(&self, rng: &mut StdRng) -> f64 {
        match *self {
            Self::Literal(v) => v,
            Self::Uniform { lo, hi } => rng.gen_range(lo..hi),
            Self::Gaussian { mean, std } => {
                let normal = match Normal::new(mean, std) {
                    Ok(n) => n,
                    Err(_) => return mean,
                };
                for _ in 0..defaults::MAX_FILL_ATTEMPTS {
                    let v = normal.sample(rng);
                    if v > 0.0 {
                        return v;
                    }
                }
                mean
            }
        }
    }
}

/// How a template assigns inverse mass.
#[derive(Debug, Clone, Copy, Serialize)]
pub enum MassSpec {
    /// Mass from a constant material density times the particle volume.
    Density(f64),
    /// Fixed mass regardless of radius.
    Fixed(f64),
    /// Immovable (`im = 0`).
    Infinite,
}

impl MassSpec {
    /// Parse from scenario args: `Density, rho`, `Fixed, m`, or `Infinite`.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::BadArgument`] on an unknown form.
    pub fn parse(args: &[String], line: usize) -> Result<Self, GranError> {
        match args {
            [kind, rho] if kind == "Density" => {
                Ok(Self::Density(super::parse::parse_f64(rho, line)?))
            }
            [kind, m] if kind == "Fixed" => Ok(Self::Fixed(super::parse::parse_f64(m, line)?)),
            [kind] if kind == "Infinite" => Ok(Self::Infinite),
            _ => Err(GranError::BadArgument(format!(
                "unrecognized mass spec {args:?} (line {line})"
            ))),
        }
    }

    /// Inverse mass for a particle of radius `sigma` in `dim` dimensions.
    #[must_use]
    pub fn inverse_mass(&self, sigma: f64, dim: usize) -> f64 {
        match *self {
            Self::Density(rho) => {
                let mass = rho * ball_volume(sigma, dim);
                if mass > 0.0 {
                    1.0 / mass
                } else {
                    0.0
                }
            }
            Self::Fixed(m) => {
                if m > 0.0 {
                    1.0 / m
                } else {
                    0.0
                }
            }
            Self::Infinite => 0.0,
        }
    }
}

/// Volume of a `dim`-ball of radius `sigma` (1, 2, 3 dimensions).
#[must_use]
pub fn ball_volume(sigma: f64, dim: usize) -> f64 {
    match dim {
        1 => 2.0 * sigma,
        2 => std::f64::consts::PI * sigma * sigma,
        _ => 4.0 / 3.0 * std::f64::consts::PI * sigma.powi(3),
    }
}

/// A named particle generator.
#[derive(Debug, Clone, Serialize)]
pub struct Template {
    /// Template name, referenced by fills.
    pub name: String,
    /// Radius distribution.
    pub radius: Distribution,
    /// Mass rule.
    pub mass: MassSpec,
    /// Particle type.
    pub ptype: i64,
}

/// How fill velocities are drawn.
#[derive(Debug, Clone, Serialize)]
pub enum VelocitySpec {
    /// All particles at rest.
    Zero,
    /// Every particle gets this exact velocity.
    Vector(Vec<f64>),
    /// Isotropic Gaussian components targeting a kinetic energy per
    /// particle.
    Normal {
        /// Target kinetic energy per particle.
        kinetic: f64,
    },
    /// Thermal velocities by equipartition at the given temperature.
    Temperature {
        /// Temperature in energy units (`k_B = 1`).
        temperature: f64,
    },
}

impl VelocitySpec {
    /// Parse from scenario args: `Zero`, `Vector, vx, vy, ...`,
    /// `Normal, ke`, or `Temperature, t`.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::BadArgument`] on an unknown form.
    pub fn parse(args: &[String], line: usize) -> Result<Self, GranError> {
        match args {
            [] => Ok(Self::Normal {
                kinetic: defaults::DEFAULT_FILL_KINETIC,
            }),
            [kind] if kind == "Zero" => Ok(Self::Zero),
            [kind, ke] if kind == "Normal" => Ok(Self::Normal {
                kinetic: super::parse::parse_f64(ke, line)?,
            }),
            [kind, t] if kind == "Temperature" => Ok(Self::Temperature {
                temperature: super::parse::parse_f64(t, line)?,
            }),
            [kind, rest @ ..] if kind == "Vector" && !rest.is_empty() => {
                let mut v = Vec::with_capacity(rest.len());
                for a in rest {
                    v.push(super::parse::parse_f64(a, line)?);
                }
                Ok(Self::Vector(v))
            }
            _ => Err(GranError::BadArgument(format!(
                "unrecognized velocity spec {args:?} (line {line})"
            ))),
        }
    }

    /// Draw one velocity for a particle of inverse mass `im`.
    pub fn sample(&self, rng: &mut StdRng, dim: usize, im: f64) -> Vec<f64> {
        match self {
            Self::Zero => vec![0.0; dim],
            Self::Vector(v) => {
                let mut out = v.clone();
                out.resize(dim, 0.0);
                out
            }
            Self::Normal { kinetic } => {
                gaussian_components(rng, dim, (2.0 * kinetic * im / dim as f64).max(0.0).sqrt())
            }
            Self::Temperature { temperature } => {
                gaussian_components(rng, dim, (temperature * im).max(0.0).sqrt())
            }
        }
    }
}

fn gaussian_components(rng: &mut StdRng, dim: usize, sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return vec![0.0; dim];
    }
    let normal = match Normal::new(0.0, sigma) {
        Ok(n) => n,
        Err(_) => return vec![0.0; dim],
    };
    (0..dim).map(|_| normal.sample(rng)).collect()
}

/// An excluded (or generally, testable) region of space.
#[derive(Debug, Clone, Serialize)]
pub enum Region {
    /// Axis-aligned box.
    Rect {
        /// Per-dimension `(lo, hi)`.
        bounds: Vec<(f64, f64)>,
    },
    /// Ball around a center.
    Sphere {
        /// Center point.
        center: Vec<f64>,
        /// Ball radius.
        radius: f64,
    },
}

impl Region {
    /// Whether a point lies inside the region.
    #[must_use]
    pub fn contains(&self, x: &[f64]) -> bool {
        match self {
            Self::Rect { bounds } => bounds
                .iter()
                .enumerate()
                .all(|(d, (lo, hi))| *lo <= x[d] && x[d] < *hi),
            Self::Sphere { center, radius } => {
                let dsqr: f64 = center
                    .iter()
                    .zip(x)
                    .map(|(c, xi)| (c - xi) * (c - xi))
                    .sum();
                dsqr < radius * radius
            }
        }
    }
}

/// Target particle quantity for an area fill.
#[derive(Debug, Clone, Copy, Serialize)]
pub enum NumberSpec {
    /// Exact count.
    Count(usize),
    /// Packing (volume) fraction of the fill region.
    Phi(f64),
    /// Number density (particles per unit volume).
    Rho(f64),
}

impl NumberSpec {
    /// Parse from args: `200`, `Phi=0.5`, or `Rho=1.2`.
    ///
    /// # Errors
    ///
    /// Returns [`GranError::BadArgument`] on an unknown form.
    pub fn parse(args: &[String], line: usize) -> Result<Self, GranError> {
        match args {
            [single] => {
                if let Some(phi) = single.strip_prefix("Phi=") {
                    Ok(Self::Phi(super::parse::parse_f64(phi, line)?))
                } else if let Some(rho) = single.strip_prefix("Rho=") {
                    Ok(Self::Rho(super::parse::parse_f64(rho, line)?))
                } else {
                    Ok(Self::Count(super::parse::parse_usize(single, line)?))
                }
            }
            _ => Err(GranError::BadArgument(format!(
                "unrecognized number spec {args:?} (line {line})"
            ))),
        }
    }
}

/// Fill an axis-aligned region from a template until the target count or
/// density is reached. Draws landing in an excluded region are rejected
/// and retried up to [`defaults::MAX_FILL_ATTEMPTS`] times, then skipped.
/// Returns the global ids of the added particles.
///
/// # Errors
///
/// Returns [`GranError::BadDimension`] when the region does not match the
/// store dimension, or any store error from particle creation.
#[allow(clippy::too_many_arguments)]
pub fn fill_area(
    store: &mut ParticleStore,
    rng: &mut StdRng,
    region: &[(f64, f64)],
    template: &Template,
    number: NumberSpec,
    velocity: &VelocitySpec,
    excluded: &[Region],
) -> Result<Vec<i64>, GranError> {
    let dim = store.dim();
    if region.len() != dim {
        return Err(GranError::BadDimension(format!(
            "fill region is {}-d in a {dim}-d simulation",
            region.len()
        )));
    }
    let volume: f64 = region.iter().map(|(lo, hi)| hi - lo).product();
    let target_count = match number {
        NumberSpec::Count(n) => Some(n),
        NumberSpec::Rho(rho) => Some((rho * volume).round() as usize),
        NumberSpec::Phi(_) => None,
    };
    let target_phi = match number {
        NumberSpec::Phi(phi) => Some(phi),
        _ => None,
    };

    let mut placed = Vec::new();
    let mut placed_volume = 0.0;
    loop {
        match (target_count, target_phi) {
            (Some(n), _) if placed.len() >= n => break,
            (_, Some(phi)) if placed_volume / volume >= phi => break,
            _ => {}
        }
        let sigma = template.radius.sample_positive(rng);
        let mut x = vec![0.0; dim];
        let mut accepted = false;
        for _ in 0..defaults::MAX_FILL_ATTEMPTS {
            for (d, (lo, hi)) in region.iter().enumerate() {
                x[d] = rng.gen_range(*lo..*hi);
            }
            if excluded.iter().any(|r| r.contains(&x)) {
                continue;
            }
            accepted = true;
            break;
        }
        if !accepted {
            // Excluded regions dominate the target area; placing more
            // would spin forever.
            break;
        }
        let im = template.mass.inverse_mass(sigma, dim);
        let v = velocity.sample(rng, dim, im);
        placed.push(store.add_particle(&x, &v, sigma, im, template.ptype)?);
        placed_volume += ball_volume(sigma, dim);
    }
    Ok(placed)
}

/// Re-draw velocities for previously filled particles by global id.
///
/// Relaxation phases end with every velocity zeroed; fixers restore the
/// configured velocity distribution before the production run. Particles
/// that left the simulation in the meantime are skipped.
pub fn apply_velocity_fixers(
    store: &mut ParticleStore,
    fixers: &[VelocityFixer],
    rng: &mut StdRng,
) {
    let dim = store.dim();
    for fixer in fixers {
        for &gid in &fixer.gids {
            let Some(i) = store.local_id(gid) else {
                continue;
            };
            let im = store.im()[i];
            let v = fixer.velocity.sample(rng, dim, im);
            store.v_mut()[i * dim..(i + 1) * dim].copy_from_slice(&v);
        }
    }
}

/// Deferred velocity assignment for one area fill.
#[derive(Debug, Clone, Serialize)]
pub struct VelocityFixer {
    /// Global ids of the particles the fill created.
    pub gids: Vec<i64>,
    /// The velocity rule to re-draw from.
    pub velocity: VelocitySpec,
}

/// Place immovable particles along a circle (an obstacle wall): discs of
/// radius `sigma` spaced to just overlap, centered on the circle of radius
/// `radius` in the first two coordinates. Returns how many were added.
///
/// # Errors
///
/// Returns [`GranError::BadDimension`] for a 1-d store or mismatched
/// center, or any store error from particle creation.
pub fn fill_circle(
    store: &mut ParticleStore,
    center: &[f64],
    sigma: f64,
    radius: f64,
    ptype: i64,
) -> Result<usize, GranError> {
    let dim = store.dim();
    if dim < 2 || center.len() != dim {
        return Err(GranError::BadDimension(format!(
            "circle fill needs a >=2-d store and a {dim}-d center"
        )));
    }
    let count = ((std::f64::consts::PI * radius / sigma).ceil() as usize).max(3);
    let zero_v = vec![0.0; dim];
    for k in 0..count {
        let angle = 2.0 * std::f64::consts::PI * k as f64 / count as f64;
        let mut x = center.to_vec();
        x[0] += radius * angle.cos();
        x[1] += radius * angle.sin();
        store.add_particle(&x, &zero_v, sigma, 0.0, ptype)?;
    }
    Ok(count)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn ball_template() -> Template {
        Template {
            name: "ball".into(),
            radius: Distribution::Uniform { lo: 0.1, hi: 0.2 },
            mass: MassSpec::Density(1.0),
            ptype: 0,
        }
    }

    #[test]
    fn count_fill_places_exactly_n() {
        let mut store = ParticleStore::new(2, 1).unwrap();
        let placed = fill_area(
            &mut store,
            &mut rng(),
            &[(0.0, 10.0), (0.0, 10.0)],
            &ball_template(),
            NumberSpec::Count(50),
            &VelocitySpec::Zero,
            &[],
        )
        .unwrap();
        assert_eq!(placed.len(), 50);
        assert_eq!(store.number(), 50);
        assert!(store.sg().iter().all(|&s| (0.1..0.2).contains(&s)));
        // The returned gids address exactly the created particles.
        for gid in placed {
            assert!(store.local_id(gid).is_some());
        }
    }

    #[test]
    fn phi_fill_reaches_packing_fraction() {
        let mut store = ParticleStore::new(2, 1).unwrap();
        fill_area(
            &mut store,
            &mut rng(),
            &[(0.0, 10.0), (0.0, 10.0)],
            &ball_template(),
            NumberSpec::Phi(0.3),
            &VelocitySpec::Zero,
            &[],
        )
        .unwrap();
        let packed: f64 = store.sg().iter().map(|&s| ball_volume(s, 2)).sum();
        let phi = packed / 100.0;
        assert!(phi >= 0.3 && phi < 0.32, "phi = {phi}");
    }

    #[test]
    fn excluded_region_stays_empty() {
        let mut store = ParticleStore::new(2, 1).unwrap();
        let hole = Region::Sphere {
            center: vec![5.0, 5.0],
            radius: 2.0,
        };
        fill_area(
            &mut store,
            &mut rng(),
            &[(0.0, 10.0), (0.0, 10.0)],
            &ball_template(),
            NumberSpec::Count(200),
            &VelocitySpec::Zero,
            &[hole.clone()],
        )
        .unwrap();
        for i in 0..store.size() {
            assert!(!hole.contains(store.x_of(i)), "particle inside exclusion");
        }
    }

    #[test]
    fn impossible_fill_gives_up() {
        let mut store = ParticleStore::new(2, 1).unwrap();
        // Excluded region covers the whole fill area.
        let everything = Region::Rect {
            bounds: vec![(-1.0, 11.0), (-1.0, 11.0)],
        };
        let placed = fill_area(
            &mut store,
            &mut rng(),
            &[(0.0, 10.0), (0.0, 10.0)],
            &ball_template(),
            NumberSpec::Count(10),
            &VelocitySpec::Zero,
            &[everything],
        )
        .unwrap();
        assert!(placed.is_empty());
    }

    #[test]
    fn density_mass_scales_with_radius() {
        let spec = MassSpec::Density(2.0);
        let im_small = spec.inverse_mass(0.1, 2);
        let im_big = spec.inverse_mass(0.2, 2);
        assert!(im_small > im_big, "bigger disc must be heavier");
        let expected = 1.0 / (2.0 * std::f64::consts::PI * 0.01);
        assert!((im_small - expected).abs() < 1e-12);
        assert_eq!(MassSpec::Infinite.inverse_mass(0.1, 2), 0.0);
    }

    #[test]
    fn temperature_velocities_match_equipartition() {
        let mut store = ParticleStore::new(2, 1).unwrap();
        let tpl = Template {
            name: "gas".into(),
            radius: Distribution::Literal(0.05),
            mass: MassSpec::Fixed(1.0),
            ptype: 0,
        };
        fill_area(
            &mut store,
            &mut rng(),
            &[(0.0, 10.0), (0.0, 10.0)],
            &tpl,
            NumberSpec::Count(2000),
            &VelocitySpec::Temperature { temperature: 0.5 },
            &[],
        )
        .unwrap();
        let v = store.v();
        let mean_sq: f64 = v.iter().map(|c| c * c).sum::<f64>() / v.len() as f64;
        // <v_c^2> = T/m = 0.5; sampling tolerance ~5%.
        assert!((mean_sq - 0.5).abs() < 0.05, "mean v^2 = {mean_sq}");
    }

    #[test]
    fn vector_velocity_applied_verbatim() {
        let spec = VelocitySpec::parse(
            &["Vector".into(), "1.5".into(), "-0.5".into()],
            1,
        )
        .unwrap();
        let v = spec.sample(&mut rng(), 2, 1.0);
        assert_eq!(v, vec![1.5, -0.5]);
    }

    #[test]
    fn circle_fill_is_immovable_ring() {
        let mut store = ParticleStore::new(2, 1).unwrap();
        let count = fill_circle(&mut store, &[5.0, 5.0], 0.1, 1.0, 0).unwrap();
        assert!(count >= 3);
        assert_eq!(store.number(), count);
        for i in 0..store.size() {
            assert_eq!(store.im()[i], 0.0, "ring particles must be immovable");
            let dx = store.x_of(i)[0] - 5.0;
            let dy = store.x_of(i)[1] - 5.0;
            assert!(((dx * dx + dy * dy).sqrt() - 1.0).abs() < 1e-12);
        }
        // Adjacent ring particles touch or overlap (a closed wall).
        let spacing = 2.0 * std::f64::consts::PI * 1.0 / count as f64;
        assert!(spacing <= 2.0 * 0.1 + 1e-12);
    }

    #[test]
    fn velocity_fixers_redraw_after_reset() {
        let mut store = ParticleStore::new(2, 1).unwrap();
        let gids = fill_area(
            &mut store,
            &mut rng(),
            &[(0.0, 10.0), (0.0, 10.0)],
            &ball_template(),
            NumberSpec::Count(40),
            &VelocitySpec::Temperature { temperature: 0.4 },
            &[],
        )
        .unwrap();
        // A relaxation pass wipes velocities; fixers restore the ensemble.
        store.clear_v();
        assert!(store.v().iter().all(|&c| c == 0.0));
        let fixers = vec![VelocityFixer {
            gids,
            velocity: VelocitySpec::Temperature { temperature: 0.4 },
        }];
        apply_velocity_fixers(&mut store, &fixers, &mut rng());
        let moving = store.v().iter().filter(|&&c| c != 0.0).count();
        assert!(moving > 70, "only {moving} nonzero components");
    }

    #[test]
    fn fixers_skip_departed_particles() {
        let mut store = ParticleStore::new(2, 1).unwrap();
        let gids = fill_area(
            &mut store,
            &mut rng(),
            &[(0.0, 10.0), (0.0, 10.0)],
            &ball_template(),
            NumberSpec::Count(4),
            &VelocitySpec::Zero,
            &[],
        )
        .unwrap();
        store.mark_for_removal(0);
        store.do_particle_removal();
        let fixers = vec![VelocityFixer {
            gids,
            velocity: VelocitySpec::Vector(vec![1.0, 0.0]),
        }];
        apply_velocity_fixers(&mut store, &fixers, &mut rng());
        assert_eq!(store.number(), 3);
        for i in 0..store.size() {
            assert_eq!(store.v_of(i), &[1.0, 0.0]);
        }
    }

    #[test]
    fn number_spec_forms() {
        assert!(matches!(
            NumberSpec::parse(&["240".into()], 1).unwrap(),
            NumberSpec::Count(240)
        ));
        assert!(matches!(
            NumberSpec::parse(&["Phi=0.5".into()], 1).unwrap(),
            NumberSpec::Phi(_)
        ));
        assert!(matches!(
            NumberSpec::parse(&["Rho=1.5".into()], 1).unwrap(),
            NumberSpec::Rho(_)
        ));
        assert!(NumberSpec::parse(&["Phi=abc".into()], 3).is_err());
    }

    #[test]
    fn distribution_parse_forms() {
        assert!(matches!(
            Distribution::parse(&["0.4".into()], 1).unwrap(),
            Distribution::Literal(_)
        ));
        assert!(matches!(
            Distribution::parse(&["Uniform".into(), "0.1".into(), "0.2".into()], 1).unwrap(),
            Distribution::Uniform { .. }
        ));
        assert!(Distribution::parse(&["Weird".into(), "1".into()], 1).is_err());
    }
}
