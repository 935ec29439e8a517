// SPDX-License-Identifier: AGPL-3.0-only

//! Run summary and fixed output files.
//!
//! The writer produces the top of the output directory:
//!
//! ```text
//! <out>/run_summary.txt    timing, counts, parameters, interactions
//! <out>/run_summary.json   the same, machine-readable
//! <out>/log.txt            build/version info
//! <out>/info.csv           dimensions, bounds, integrator
//! ```
//!
//! Observer subdirectories are written by the data master. Write failures
//! are collected rather than fatal so remaining files are still attempted;
//! the process maps a non-empty failure list to a non-zero exit.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

/// Everything the end-of-run report needs, assembled by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Crate version baked in at compile time.
    pub version: String,
    /// Command line that started the run.
    pub command: String,
    /// Spatial dimension.
    pub dimensions: usize,
    /// Per-dimension `(lo, hi)` bounds.
    pub bounds: Vec<(f64, f64)>,
    /// Per-dimension boundary condition names.
    pub boundary: Vec<String>,
    /// Integrator description.
    pub integrator: String,
    /// Time step at the end of the run.
    pub final_dt: f64,
    /// Simulated time requested.
    pub requested_time: f64,
    /// Simulated time completed in the final run.
    pub elapsed_time: f64,
    /// Simulated time across all runs (relaxation included).
    pub total_time: f64,
    /// Steps taken in the final run.
    pub iterations: u64,
    /// Wall-clock seconds for the final run.
    pub wall_time_s: f64,
    /// Steps per wall-clock second.
    pub steps_per_sec: f64,
    /// Owned particles at the end of the run.
    pub particles: usize,
    /// Registered particle types.
    pub ntypes: usize,
    /// Distinct interaction laws installed.
    pub interactions: usize,
    /// Pair-list rebuild count.
    pub remakes: usize,
    /// Rebuild checks that exceeded the motion target.
    pub missed_target: usize,
    /// Mean motion ratio over the missed checks.
    pub average_miss: f64,
    /// Last-step virial.
    pub virial: f64,
    /// Last-step pair potential.
    pub potential: f64,
    /// Last-step boundary force.
    pub boundary_force: f64,
    /// Anything unusual: precision loss, failed writes, fatal errors.
    pub notes: Vec<String>,
}

impl RunSummary {
    /// Write `run_summary.txt`, `run_summary.json`, `log.txt`, `info.csv`.
    ///
    /// Returns failure messages for writes that did not land; always
    /// attempts every file.
    #[must_use]
    pub fn write_to_directory(&self, dir: &Path) -> Vec<String> {
        let mut failures = Vec::new();
        if let Err(e) = fs::create_dir_all(dir) {
            return vec![format!("{}: {e}", dir.display())];
        }
        if let Err(e) = self.write_text(&dir.join("run_summary.txt")) {
            failures.push(e);
        }
        if let Err(e) = self.write_json(&dir.join("run_summary.json")) {
            failures.push(e);
        }
        if let Err(e) = self.write_log(&dir.join("log.txt")) {
            failures.push(e);
        }
        if let Err(e) = self.write_info(&dir.join("info.csv")) {
            failures.push(e);
        }
        failures
    }

    fn write_text(&self, path: &Path) -> Result<(), String> {
        let mut out = String::new();
        out.push_str("══════════════════════════════════════════════════════\n");
        out.push_str(&format!("  RUN SUMMARY — granflow v{}\n", self.version));
        out.push_str("══════════════════════════════════════════════════════\n\n");
        out.push_str(&format!("  Command:        {}\n\n", self.command));
        out.push_str("  ── Timing ──\n");
        out.push_str(&format!("    Requested time:  {:.6}\n", self.requested_time));
        out.push_str(&format!("    Elapsed time:    {:.6}\n", self.elapsed_time));
        out.push_str(&format!("    Total time:      {:.6}\n", self.total_time));
        out.push_str(&format!("    Iterations:      {}\n", self.iterations));
        out.push_str(&format!("    Wall time:       {:.3} s\n", self.wall_time_s));
        out.push_str(&format!("    Steps/s:         {:.1}\n", self.steps_per_sec));
        out.push_str(&format!("    Final dt:        {:.3e}\n\n", self.final_dt));
        out.push_str("  ── Domain ──\n");
        out.push_str(&format!("    Dimensions:      {}\n", self.dimensions));
        for (d, (lo, hi)) in self.bounds.iter().enumerate() {
            out.push_str(&format!(
                "    Bounds[{d}]:       [{lo}, {hi})  {}\n",
                self.boundary[d]
            ));
        }
        out.push_str(&format!("    Particles:       {}\n", self.particles));
        out.push_str(&format!("    Types:           {}\n\n", self.ntypes));
        out.push_str("  ── Interactions ──\n");
        out.push_str(&format!("    Integrator:      {}\n", self.integrator));
        out.push_str(&format!("    Laws installed:  {}\n", self.interactions));
        out.push_str(&format!("    Virial:          {:.6e}\n", self.virial));
        out.push_str(&format!("    Potential:       {:.6e}\n", self.potential));
        out.push_str(&format!("    Boundary force:  {:.6e}\n\n", self.boundary_force));
        out.push_str("  ── Neighbor index ──\n");
        out.push_str(&format!("    Remakes:         {}\n", self.remakes));
        out.push_str(&format!("    Missed target:   {}\n", self.missed_target));
        out.push_str(&format!("    Average miss:    {:.4}\n", self.average_miss));
        if !self.notes.is_empty() {
            out.push_str("\n  ── Notes ──\n");
            for note in &self.notes {
                out.push_str(&format!("    {note}\n"));
            }
        }
        fs::write(path, out).map_err(|e| format!("{}: {e}", path.display()))
    }

    fn write_json(&self, path: &Path) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("{}: {e}", path.display()))?;
        fs::write(path, json).map_err(|e| format!("{}: {e}", path.display()))
    }

    fn write_log(&self, path: &Path) -> Result<(), String> {
        let file = fs::File::create(path).map_err(|e| format!("{}: {e}", path.display()))?;
        let mut w = std::io::BufWriter::new(file);
        let result = writeln!(w, "granflow v{}", self.version)
            .and_then(|()| writeln!(w, "profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" }))
            .and_then(|()| writeln!(w, "target pointer width: {} bits", usize::BITS))
            .and_then(|()| writeln!(w, "command: {}", self.command));
        result.map_err(|e| format!("{}: {e}", path.display()))
    }

    fn write_info(&self, path: &Path) -> Result<(), String> {
        let mut out = String::from("key,value\n");
        out.push_str(&format!("dimensions,{}\n", self.dimensions));
        for (d, (lo, hi)) in self.bounds.iter().enumerate() {
            out.push_str(&format!("bounds_{d},{lo}:{hi}\n"));
            out.push_str(&format!("boundary_{d},{}\n", self.boundary[d]));
        }
        out.push_str(&format!("integrator,{}\n", self.integrator));
        out.push_str(&format!("ntypes,{}\n", self.ntypes));
        fs::write(path, out).map_err(|e| format!("{}: {e}", path.display()))
    }
}
