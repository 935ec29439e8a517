// SPDX-License-Identifier: AGPL-3.0-only

//! Scenario files: parsing, validation, and engine construction.
//!
//! A scenario is a nested block file (see [`parse`]) describing one
//! simulation:
//!
//! ```text
//! Dimensions: 2
//! Bounds: { : 0, 10 ; : 0, 10 }
//! Boundary: { : Wrap ; : Wrap }
//! NTypes: 1
//! Force-grid: { : 0, 0, HardSphere { Repulsion: 100 } }
//! Template: ball { Radius: Uniform, 0.1, 0.2 ; Mass: Density, 1.0 ; Type: 0 }
//! Fill: Area { Template: ball ; Number: Phi=0.4 ; Velocity: Temperature, 0.002 }
//! Integrator: VelocityVerlet { MaxDT: 0.002 }
//! HSRelax: 0.5
//! Time: 10
//! ```
//!
//! [`Scenario::parse`] turns the text into a validated description;
//! [`Scenario::build`] constructs a ready-to-run [`Engine`] plus the run
//! plan (relaxation phases, requested time, chosen seed). The parsed
//! scenario serializes to JSON for the output-directory snapshot.

pub mod fill;
pub mod parse;

use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::bounds::{BcFlag, Bounds};
use crate::defaults;
use crate::engine::Engine;
use crate::error::GranError;
use crate::integrator::Integrator;
use crate::interaction::InteractionLaw;
use crate::modifier::{ConstantAcceleration, Flow, LinearDamping};
use crate::observer::{BoundaryForceData, EnergyData, NumberData, PositionData};
use crate::store::ParticleStore;

pub use fill::{apply_velocity_fixers, VelocityFixer};

use fill::{NumberSpec, Region, Template, VelocitySpec};
use parse::{parse_f64, parse_usize, Node};

/// One entry of the (type × type) force grid.
#[derive(Debug, Clone, Serialize)]
pub struct ForceEntry {
    /// First type.
    pub t1: usize,
    /// Second type.
    pub t2: usize,
    /// Law, or `None` for an explicit non-interaction.
    pub law: Option<InteractionLaw>,
}

/// A fill operation in file order.
#[derive(Debug, Clone, Serialize)]
pub enum FillSpec {
    /// Rejection-fill an axis-aligned region from a template.
    Area {
        /// Fill region, `(lo, hi)` per dimension (defaults to the box).
        region: Option<Vec<(f64, f64)>>,
        /// Template name.
        template: String,
        /// Count/density target.
        number: NumberSpec,
        /// Velocity rule.
        velocity: VelocitySpec,
        /// Regions kept empty.
        excluded: Vec<Region>,
    },
    /// Immovable ring of discs (an obstacle).
    Circle {
        /// Ring center.
        center: Vec<f64>,
        /// Disc radius.
        sigma: f64,
        /// Ring radius.
        radius: f64,
        /// Particle type.
        ptype: i64,
    },
}

/// Integrator selection.
#[derive(Debug, Clone, Serialize)]
pub enum IntegratorSpec {
    /// Velocity-Verlet with optional dt-controller overrides.
    VelocityVerlet {
        /// Upper dt clamp.
        max_dt: Option<f64>,
        /// Lower dt clamp.
        min_dt: Option<f64>,
    },
    /// Overdamped dynamics.
    Overdamped {
        /// Mobility prefactor.
        damping: f64,
        /// Upper dt clamp.
        max_dt: Option<f64>,
        /// Lower dt clamp.
        min_dt: Option<f64>,
    },
}

/// Modifier selection.
#[derive(Debug, Clone, Serialize)]
pub enum ModifierSpec {
    /// Uniform acceleration (gravity).
    ConstantAcceleration(Vec<f64>),
    /// Viscous drag coefficient.
    LinearDamping(f64),
    /// Flow driving toward a velocity, with coupling strength and optional
    /// expiry time.
    Flow {
        /// Target velocity.
        velocity: Vec<f64>,
        /// Coupling strength.
        strength: f64,
        /// Expiry (simulated time).
        until: Option<f64>,
    },
}

/// A validated scenario description.
#[derive(Debug, Clone, Serialize)]
pub struct Scenario {
    /// Spatial dimension.
    pub dim: usize,
    /// Simulation bounds per dimension.
    pub bounds: Vec<(f64, f64)>,
    /// Boundary condition per dimension.
    pub bcs: Vec<BcFlag>,
    /// Number of particle types.
    pub ntypes: usize,
    /// Force-grid entries.
    pub force_entries: Vec<ForceEntry>,
    /// Named particle templates.
    pub templates: Vec<Template>,
    /// Fill operations in file order.
    pub fills: Vec<FillSpec>,
    /// Integrator selection.
    pub integrator: IntegratorSpec,
    /// Modifiers in file order.
    pub modifiers: Vec<ModifierSpec>,
    /// Hard-sphere relaxation time before the run.
    pub hs_relax: Option<f64>,
    /// Full-force relaxation time before the run.
    pub relax: Option<f64>,
    /// Central attraction strength.
    pub attraction: f64,
    /// RNG seed; seeded from wall time when absent.
    pub seed: Option<u64>,
    /// Requested simulated time (the CLI may override).
    pub time: Option<f64>,
    /// Recording cadence (the CLI may override).
    pub fps: Option<f64>,
}

/// What to run, in order, after [`Scenario::build`].
#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    /// Hard-sphere relaxation time.
    pub hs_relax: Option<f64>,
    /// Full-force relaxation time.
    pub relax: Option<f64>,
    /// Requested simulated time.
    pub time: f64,
    /// The seed actually used.
    pub seed: u64,
    /// Velocity assignments to re-apply after the relaxation phases
    /// (relaxation ends with every velocity zeroed).
    pub fixers: Vec<VelocityFixer>,
}

impl Scenario {
    /// Parse and validate scenario text.
    ///
    /// # Errors
    ///
    /// [`GranError::BadStructure`] for malformed syntax,
    /// [`GranError::BadArgument`] / [`GranError::BadDimension`] for invalid
    /// values.
    pub fn parse(text: &str) -> Result<Self, GranError> {
        let nodes = parse::parse_nodes(text)?;

        let dim = match nodes.iter().find(|n| n.heading == "Dimensions") {
            Some(node) => {
                let d = parse_usize(single_arg(node, "Dimensions")?, node.line)?;
                if d == 0 {
                    return Err(GranError::BadDimension(format!(
                        "Dimensions must be >= 1 (line {})",
                        node.line
                    )));
                }
                d
            }
            None => 2,
        };

        let mut scenario = Self {
            dim,
            bounds: Vec::new(),
            bcs: Vec::new(),
            ntypes: 1,
            force_entries: Vec::new(),
            templates: Vec::new(),
            fills: Vec::new(),
            integrator: IntegratorSpec::VelocityVerlet {
                max_dt: None,
                min_dt: None,
            },
            modifiers: Vec::new(),
            hs_relax: None,
            relax: None,
            attraction: 0.0,
            seed: None,
            time: None,
            fps: None,
        };

        for node in &nodes {
            match node.heading.as_str() {
                "Dimensions" => {}
                "Bounds" => scenario.bounds = parse_bound_rows(node, dim)?,
                "Boundary" => scenario.bcs = parse_boundary_rows(node, dim)?,
                "NTypes" => {
                    scenario.ntypes = parse_usize(single_arg(node, "NTypes")?, node.line)?;
                    if scenario.ntypes == 0 {
                        return Err(GranError::BadArgument(format!(
                            "NTypes must be >= 1 (line {})",
                            node.line
                        )));
                    }
                }
                "Force-grid" => scenario.force_entries = parse_force_grid(node)?,
                "Template" => scenario.templates.push(parse_template(node)?),
                "Fill" => scenario.fills.push(parse_fill(node, dim)?),
                "Integrator" => scenario.integrator = parse_integrator(node)?,
                "Modifier" => scenario.modifiers.push(parse_modifier(node, dim)?),
                "HSRelax" => {
                    scenario.hs_relax = Some(parse_f64(single_arg(node, "HSRelax")?, node.line)?);
                }
                "Relax" => {
                    scenario.relax = Some(parse_f64(single_arg(node, "Relax")?, node.line)?);
                }
                "Attraction" => {
                    scenario.attraction =
                        parse_f64(single_arg(node, "Attraction")?, node.line)?;
                }
                "Seed" => {
                    scenario.seed = Some(
                        single_arg(node, "Seed")?.parse::<u64>().map_err(|_| {
                            GranError::BadArgument(format!(
                                "Seed must be a non-negative integer (line {})",
                                node.line
                            ))
                        })?,
                    );
                }
                "Time" => {
                    scenario.time = Some(parse_f64(single_arg(node, "Time")?, node.line)?);
                }
                "FPS" => {
                    scenario.fps = Some(parse_f64(single_arg(node, "FPS")?, node.line)?);
                }
                other => {
                    return Err(GranError::BadArgument(format!(
                        "unrecognized key '{other}' (line {})",
                        node.line
                    )))
                }
            }
        }

        if scenario.bounds.is_empty() {
            return Err(GranError::BadStructure {
                line: 0,
                msg: "scenario needs a Bounds block".into(),
            });
        }
        if scenario.bcs.is_empty() {
            scenario.bcs = vec![BcFlag::Wrap; dim];
        }
        Ok(scenario)
    }

    /// Build the engine and the run plan.
    ///
    /// # Errors
    ///
    /// Propagates validation failures (unknown template names, type
    /// indices outside `NTypes`, inverted bounds, dimension mismatches).
    pub fn build(&self) -> Result<(Engine, RunPlan), GranError> {
        let seed = self.seed.unwrap_or_else(seed_from_wall_clock);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut store = ParticleStore::new(self.dim, self.ntypes)?;
        let mut fixers = Vec::new();
        for spec in &self.fills {
            let gids = self.apply_fill(&mut store, &mut rng, spec)?;
            if let FillSpec::Area { velocity, .. } = spec {
                if !gids.is_empty() {
                    fixers.push(VelocityFixer {
                        gids,
                        velocity: velocity.clone(),
                    });
                }
            }
        }

        let bounds = Bounds::new(&self.bounds)?;
        let mut engine = Engine::new(store, bounds, self.bcs.clone())?;

        for entry in &self.force_entries {
            match entry.law {
                Some(law) => engine.forces.set_law(entry.t1, entry.t2, law)?,
                None => engine.forces.set_none(entry.t1, entry.t2)?,
            }
        }

        engine.integrator = match self.integrator {
            IntegratorSpec::VelocityVerlet { max_dt, min_dt } => {
                let mut it = Integrator::velocity_verlet();
                if let Some(v) = max_dt {
                    it.set_max_dt(v);
                }
                if let Some(v) = min_dt {
                    it.set_min_dt(v);
                }
                it
            }
            IntegratorSpec::Overdamped {
                damping,
                max_dt,
                min_dt,
            } => {
                let mut it = Integrator::overdamped(damping);
                if let Some(v) = max_dt {
                    it.set_max_dt(v);
                }
                if let Some(v) = min_dt {
                    it.set_min_dt(v);
                }
                it
            }
        };

        for spec in &self.modifiers {
            engine.modifiers.push(match spec {
                ModifierSpec::ConstantAcceleration(a) => {
                    Box::new(ConstantAcceleration::new(a.clone()))
                }
                ModifierSpec::LinearDamping(d) => Box::new(LinearDamping::new(*d)),
                ModifierSpec::Flow {
                    velocity,
                    strength,
                    until,
                } => Box::new(Flow::new(velocity.clone(), *strength, *until)),
            });
        }

        engine.center_attraction = self.attraction;
        if let Some(fps) = self.fps {
            engine.observers.fps = fps;
        }
        engine.observers.add_observer(Box::new(PositionData::new()));
        engine.observers.add_observer(Box::new(EnergyData::new()));
        engine.observers.add_observer(Box::new(NumberData::new()));
        if self.bcs.contains(&BcFlag::Repulse) {
            engine
                .observers
                .add_observer(Box::new(BoundaryForceData::new()));
        }

        let plan = RunPlan {
            hs_relax: self.hs_relax,
            relax: self.relax,
            time: self.time.unwrap_or(0.0),
            seed,
            fixers,
        };
        Ok((engine, plan))
    }

    /// Apply one fill; returns the created global ids (empty for obstacle
    /// rings, which never receive a velocity fixer).
    fn apply_fill(
        &self,
        store: &mut ParticleStore,
        rng: &mut StdRng,
        spec: &FillSpec,
    ) -> Result<Vec<i64>, GranError> {
        match spec {
            FillSpec::Area {
                region,
                template,
                number,
                velocity,
                excluded,
            } => {
                let tpl = self
                    .templates
                    .iter()
                    .find(|t| t.name == *template)
                    .ok_or_else(|| {
                        GranError::BadArgument(format!("unknown template '{template}'"))
                    })?;
                let region = region.clone().unwrap_or_else(|| self.bounds.clone());
                fill::fill_area(store, rng, &region, tpl, *number, velocity, excluded)
            }
            FillSpec::Circle {
                center,
                sigma,
                radius,
                ptype,
            } => {
                fill::fill_circle(store, center, *sigma, *radius, *ptype)?;
                Ok(Vec::new())
            }
        }
    }

    /// JSON snapshot of the parsed scenario (written to the output
    /// directory).
    ///
    /// # Errors
    ///
    /// Returns [`GranError::BadStructure`] if serialization fails (it
    /// should not for a parsed scenario).
    pub fn to_json(&self) -> Result<String, GranError> {
        serde_json::to_string_pretty(self).map_err(|e| GranError::BadStructure {
            line: 0,
            msg: format!("scenario serialization failed: {e}"),
        })
    }
}

fn seed_from_wall_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0x5eed_0bad, |d| {
            u64::from(d.subsec_nanos()) ^ d.as_secs().rotate_left(17)
        })
}

fn single_arg<'a>(node: &'a Node, what: &str) -> Result<&'a String, GranError> {
    match node.args.as_slice() {
        [one] => Ok(one),
        _ => Err(GranError::BadStructure {
            line: node.line,
            msg: format!("{what} takes exactly one value"),
        }),
    }
}

fn parse_bound_rows(node: &Node, dim: usize) -> Result<Vec<(f64, f64)>, GranError> {
    let mut out = Vec::new();
    for row in &node.body {
        match row.args.as_slice() {
            [lo, hi] => out.push((parse_f64(lo, row.line)?, parse_f64(hi, row.line)?)),
            _ => {
                return Err(GranError::BadStructure {
                    line: row.line,
                    msg: "bounds rows are ': lo, hi'".into(),
                })
            }
        }
    }
    if out.len() != dim {
        return Err(GranError::BadDimension(format!(
            "{} bounds rows for a {dim}-d simulation (line {})",
            out.len(),
            node.line
        )));
    }
    Ok(out)
}

fn parse_boundary_rows(node: &Node, dim: usize) -> Result<Vec<BcFlag>, GranError> {
    let mut out = Vec::new();
    for row in &node.body {
        match row.args.as_slice() {
            [name] => out.push(BcFlag::parse(name)?),
            _ => {
                return Err(GranError::BadStructure {
                    line: row.line,
                    msg: "boundary rows are ': Kind'".into(),
                })
            }
        }
    }
    if out.len() != dim {
        return Err(GranError::BadDimension(format!(
            "{} boundary rows for a {dim}-d simulation (line {})",
            out.len(),
            node.line
        )));
    }
    Ok(out)
}

fn parse_force_grid(node: &Node) -> Result<Vec<ForceEntry>, GranError> {
    let mut entries = Vec::new();
    for row in &node.body {
        let [t1, t2, kind] = row.args.as_slice() else {
            return Err(GranError::BadStructure {
                line: row.line,
                msg: "force-grid rows are ': t1, t2, Kernel'".into(),
            });
        };
        let t1 = parse_usize(t1, row.line)?;
        let t2 = parse_usize(t2, row.line)?;
        let law = match kind.as_str() {
            "None" => None,
            "HardSphere" => {
                let repulsion = body_f64(row, "Repulsion")?
                    .unwrap_or(defaults::DEFAULT_HARD_SPHERE_REPULSION);
                let dissipation = body_f64(row, "Dissipation")?.unwrap_or(0.0);
                Some(if dissipation > 0.0 {
                    InteractionLaw::hard_sphere_dissipative(repulsion, dissipation)
                } else {
                    InteractionLaw::hard_sphere(repulsion)
                })
            }
            "LennardJones" => {
                let strength = body_f64(row, "Strength")?
                    .unwrap_or(defaults::DEFAULT_LENNARD_JONES_STRENGTH);
                let cutoff =
                    body_f64(row, "Cutoff")?.unwrap_or(defaults::DEFAULT_LENNARD_JONES_CUTOFF);
                Some(InteractionLaw::LennardJones { strength, cutoff })
            }
            other => {
                return Err(GranError::BadArgument(format!(
                    "unknown kernel '{other}' (line {})",
                    row.line
                )))
            }
        };
        entries.push(ForceEntry { t1, t2, law });
    }
    Ok(entries)
}

fn body_f64(node: &Node, key: &str) -> Result<Option<f64>, GranError> {
    node.find(key)
        .map(|n| parse_f64(single_arg(n, key)?, n.line))
        .transpose()
}

fn parse_template(node: &Node) -> Result<Template, GranError> {
    let name = single_arg(node, "Template")?.clone();
    let radius = match node.find("Radius") {
        Some(n) => fill::Distribution::parse(&n.args, n.line)?,
        None => fill::Distribution::Literal(defaults::DEFAULT_CHARACTERISTIC_LENGTH),
    };
    let mass = match node.find("Mass") {
        Some(n) => fill::MassSpec::parse(&n.args, n.line)?,
        None => fill::MassSpec::Density(1.0),
    };
    let ptype = match node.find("Type") {
        Some(n) => parse_usize(single_arg(n, "Type")?, n.line)? as i64,
        None => 0,
    };
    Ok(Template {
        name,
        radius,
        mass,
        ptype,
    })
}

fn parse_region(node: &Node, dim: usize) -> Result<Region, GranError> {
    match node.args.first().map(String::as_str) {
        Some("Sphere") => {
            let center_node = node.find("Center").ok_or(GranError::BadStructure {
                line: node.line,
                msg: "Sphere region needs a Center".into(),
            })?;
            let center = args_to_vec(center_node, dim)?;
            let radius = body_f64(node, "Radius")?.ok_or(GranError::BadStructure {
                line: node.line,
                msg: "Sphere region needs a Radius".into(),
            })?;
            Ok(Region::Sphere { center, radius })
        }
        Some("Rect") => {
            let bounds_node = node.find("Bounds").ok_or(GranError::BadStructure {
                line: node.line,
                msg: "Rect region needs a Bounds block".into(),
            })?;
            Ok(Region::Rect {
                bounds: parse_bound_rows(bounds_node, dim)?,
            })
        }
        other => Err(GranError::BadArgument(format!(
            "unknown region kind {other:?} (line {})",
            node.line
        ))),
    }
}

fn args_to_vec(node: &Node, dim: usize) -> Result<Vec<f64>, GranError> {
    if node.args.len() != dim {
        return Err(GranError::BadDimension(format!(
            "{} components for a {dim}-d vector (line {})",
            node.args.len(),
            node.line
        )));
    }
    node.args.iter().map(|a| parse_f64(a, node.line)).collect()
}

fn parse_fill(node: &Node, dim: usize) -> Result<FillSpec, GranError> {
    match node.args.first().map(String::as_str) {
        Some("Area") => {
            let region = node
                .find("Bounds")
                .map(|b| parse_bound_rows(b, dim))
                .transpose()?;
            let template = node
                .find("Template")
                .ok_or(GranError::BadStructure {
                    line: node.line,
                    msg: "Fill: Area needs a Template".into(),
                })
                .and_then(|n| single_arg(n, "Template").cloned())?;
            let number_node = node.find("Number").ok_or(GranError::BadStructure {
                line: node.line,
                msg: "Fill: Area needs a Number".into(),
            })?;
            let number = NumberSpec::parse(&number_node.args, number_node.line)?;
            let velocity = match node.find("Velocity") {
                Some(n) => VelocitySpec::parse(&n.args, n.line)?,
                None => VelocitySpec::Normal {
                    kinetic: defaults::DEFAULT_FILL_KINETIC,
                },
            };
            let mut excluded = Vec::new();
            for ex in node.find_all("Excluded") {
                excluded.push(parse_region(ex, dim)?);
            }
            Ok(FillSpec::Area {
                region,
                template,
                number,
                velocity,
                excluded,
            })
        }
        Some("Circle") => {
            let center_node = node.find("Center").ok_or(GranError::BadStructure {
                line: node.line,
                msg: "Fill: Circle needs a Center".into(),
            })?;
            let center = args_to_vec(center_node, dim)?;
            let sigma = body_f64(node, "Sigma")?.ok_or(GranError::BadStructure {
                line: node.line,
                msg: "Fill: Circle needs a Sigma".into(),
            })?;
            let radius = body_f64(node, "Radius")?.ok_or(GranError::BadStructure {
                line: node.line,
                msg: "Fill: Circle needs a Radius".into(),
            })?;
            let ptype = match node.find("Type") {
                Some(n) => parse_usize(single_arg(n, "Type")?, n.line)? as i64,
                None => 0,
            };
            Ok(FillSpec::Circle {
                center,
                sigma,
                radius,
                ptype,
            })
        }
        other => Err(GranError::BadArgument(format!(
            "unknown fill kind {other:?} (line {})",
            node.line
        ))),
    }
}

fn parse_integrator(node: &Node) -> Result<IntegratorSpec, GranError> {
    match node.args.first().map(String::as_str) {
        Some("VelocityVerlet") => Ok(IntegratorSpec::VelocityVerlet {
            max_dt: body_f64(node, "MaxDT")?,
            min_dt: body_f64(node, "MinDT")?,
        }),
        Some("Overdamped") => Ok(IntegratorSpec::Overdamped {
            damping: body_f64(node, "Damping")?.unwrap_or(defaults::DEFAULT_DAMPING_CONSTANT),
            max_dt: body_f64(node, "MaxDT")?,
            min_dt: body_f64(node, "MinDT")?,
        }),
        other => Err(GranError::BadArgument(format!(
            "unknown integrator {other:?} (line {})",
            node.line
        ))),
    }
}

fn parse_modifier(node: &Node, dim: usize) -> Result<ModifierSpec, GranError> {
    match node.args.first().map(String::as_str) {
        Some("ConstantAcceleration") => {
            let acc = node.find("Acceleration").ok_or(GranError::BadStructure {
                line: node.line,
                msg: "ConstantAcceleration needs an Acceleration vector".into(),
            })?;
            Ok(ModifierSpec::ConstantAcceleration(args_to_vec(acc, dim)?))
        }
        Some("LinearDamping") => {
            let damping = body_f64(node, "Damping")?.ok_or(GranError::BadStructure {
                line: node.line,
                msg: "LinearDamping needs a Damping value".into(),
            })?;
            Ok(ModifierSpec::LinearDamping(damping))
        }
        Some("Flow") => {
            let vel = node.find("Velocity").ok_or(GranError::BadStructure {
                line: node.line,
                msg: "Flow needs a Velocity vector".into(),
            })?;
            Ok(ModifierSpec::Flow {
                velocity: args_to_vec(vel, dim)?,
                strength: body_f64(node, "Strength")?.unwrap_or(1.0),
                until: body_f64(node, "Until")?,
            })
        }
        other => Err(GranError::BadArgument(format!(
            "unknown modifier {other:?} (line {})",
            node.line
        ))),
    }
}
