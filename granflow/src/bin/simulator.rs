// SPDX-License-Identifier: AGPL-3.0-only

//! Scenario-driven simulation runs.
//!
//! ```text
//! simulator --config <file> [--time T] [--out <dir>] [--fps F]
//! ```
//!
//! Exit codes: 0 success, 1 configuration error, 2 run-time fatal,
//! 3 write failure (remaining writes are still attempted).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rand::SeedableRng;

use granflow::scenario::Scenario;
use granflow::GranError;

#[derive(Parser)]
#[command(
    name = "simulator",
    version,
    about = "Granular / soft-matter molecular dynamics runs"
)]
struct Args {
    /// Scenario file describing the simulation.
    #[arg(long)]
    config: PathBuf,

    /// Simulated time to run (overrides the scenario's Time key).
    #[arg(long)]
    time: Option<f64>,

    /// Output directory.
    #[arg(long, default_value = "RunData")]
    out: PathBuf,

    /// Recording cadence in frames per unit simulated time (overrides the
    /// scenario's FPS key).
    #[arg(long)]
    fps: Option<f64>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let command = std::env::args().collect::<Vec<_>>().join(" ");

    // ── Configuration ──
    let text = match std::fs::read_to_string(&args.config) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: cannot read {}: {e}", args.config.display());
            return ExitCode::from(1);
        }
    };
    let scenario = match Scenario::parse(&text) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}: {e}", args.config.display());
            return ExitCode::from(1);
        }
    };
    let (mut engine, plan) = match scenario.build() {
        Ok(built) => built,
        Err(e) => {
            eprintln!("Error: {}: {e}", args.config.display());
            return ExitCode::from(1);
        }
    };
    let requested = args.time.unwrap_or(plan.time);
    if requested <= 0.0 {
        eprintln!("Error: no simulated time requested (scenario Time or --time)");
        return ExitCode::from(1);
    }
    if let Some(fps) = args.fps {
        engine.observers.fps = fps;
    }
    engine.print_updates = true;

    println!("══════════════════════════════════════════════════════");
    println!("  granflow v{}", env!("CARGO_PKG_VERSION"));
    println!("══════════════════════════════════════════════════════");
    println!("  ── Scenario: {} ──", args.config.display());
    println!("    Particles: {}", engine.store.number_owned());
    println!("    Types:     {}", engine.store.ntypes());
    println!("    Seed:      {}", plan.seed);

    // ── Relaxation ──
    let mut fatal: Option<GranError> = None;
    if fatal.is_none() {
        if let Some(t) = plan.hs_relax {
            println!("  ── Hard-sphere relaxation ({t} time units) ──");
            fatal = engine.hs_relax(t).err();
        }
    }
    if fatal.is_none() {
        if let Some(t) = plan.relax {
            println!("  ── Relaxation ({t} time units) ──");
            fatal = engine.relax(t).err();
        }
    }
    // Relaxation ends with zeroed velocities; restore the configured
    // velocity distributions before production.
    if fatal.is_none() && !plan.fixers.is_empty() {
        let mut fix_rng = rand::rngs::StdRng::seed_from_u64(plan.seed.wrapping_add(1));
        granflow::scenario::apply_velocity_fixers(&mut engine.store, &plan.fixers, &mut fix_rng);
    }

    // ── Run ──
    if fatal.is_none() {
        println!("  ── Running ({requested} time units) ──");
        fatal = engine.run(requested).err();
        if fatal.is_none() {
            println!(
                "    Done: {} steps in {:.2} simulated time units",
                engine.iterations(),
                engine.elapsed_time()
            );
        }
    }
    if let Some(e) = &fatal {
        eprintln!("Fatal: {e}");
    }

    // ── Output (always attempted, even after a fatal step) ──
    let mut failures = engine.observers.write_to_directory(&args.out);
    match scenario.to_json() {
        Ok(json) => {
            if std::fs::create_dir_all(&args.out).is_ok() {
                if let Err(e) = std::fs::write(args.out.join("scenario.json"), json) {
                    failures.push(format!("scenario.json: {e}"));
                }
            }
        }
        Err(e) => failures.push(e.to_string()),
    }
    // The summary goes last so it can record any failed writes.
    let mut summary = engine.summary(&command);
    if !failures.is_empty() {
        summary.notes.push("some writes failed".into());
    }
    failures.extend(summary.write_to_directory(&args.out));
    if !failures.is_empty() {
        eprintln!("Warning: some writes failed:");
        for f in &failures {
            eprintln!("  {f}");
        }
    } else {
        println!("  ── Data written to {} ──", args.out.display());
    }

    match (fatal, failures.is_empty()) {
        (Some(_), _) => ExitCode::from(2),
        (None, false) => ExitCode::from(3),
        (None, true) => ExitCode::SUCCESS,
    }
}
