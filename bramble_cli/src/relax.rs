use super::{GlobalConfiguration, Subcommand};
use anyhow::{Context as _, Result};
use bramble::arena::{ArenaLimits, PolyArena};
use bramble::driver::relax_run;
use bramble::linear_resp::{resolve_maxwell_modes, write_maxwell_modes, zero_shear_viscosity};
use bramble::polyconf::{load_polyconf, read_polyconf};
use clap::{Parser, ValueHint};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

/// Relax a saved configuration and write the supertube trace and the
/// resolved Maxwell modes.
#[derive(Parser)]
pub struct Opts {
    /// Saved polymer configuration.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,
    /// Supertube trace output.
    #[arg(long, default_value = "supertube.dat", value_hint = ValueHint::FilePath)]
    supertube: PathBuf,
    /// Maxwell mode output.
    #[arg(long, default_value = "maxwell.dat", value_hint = ValueHint::FilePath)]
    maxwell: PathBuf,
    /// Entanglement time in seconds.
    #[arg(long, default_value = "1.0e-6")]
    tau_e: f64,
    /// Monomer molar mass in g/mol.
    #[arg(long, default_value = "28.0")]
    mass_mono: f64,
    /// Melt density in kg/m^3.
    #[arg(long, default_value = "785.0")]
    rho: f64,
    /// Temperature in kelvin.
    #[arg(long, default_value = "413.0")]
    temp: f64,
    /// Segment pool size; relaxation may split one extra bond per molecule.
    #[arg(long, default_value = "1000000")]
    max_arm: usize,
}

impl Subcommand for Opts {
    fn run(&self, cfg: &GlobalConfiguration) -> Result<ExitCode> {
        let mut ctx = super::make_context(cfg)?;
        let text = std::fs::read_to_string(&self.input)
            .with_context(|| format!("cannot open {}", self.input.display()))?;
        let conf = read_polyconf(&text)?;
        println!(
            "{}: {} molecules, N_e = {}",
            conf.polycode,
            conf.polymers.len(),
            conf.n_e
        );

        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: self.max_arm,
            max_poly: conf.polymers.len() + 1,
        });
        let polys = load_polyconf(&mut arena, &conf, 1.0)?;
        let trace = relax_run(&mut arena, &mut ctx, &polys, None)?;

        let mut out = BufWriter::new(File::create(&self.supertube)?);
        for row in &trace {
            writeln!(out, "{:e} {:e} {:e} {:e}", row.t, row.phi, row.phi_st, row.phi_true)?;
        }
        println!(
            "relaxed in {} steps, final t = {:.4e} tau_e",
            trace.len(),
            trace.last().map_or(0.0, |r| r.t)
        );

        let g0_unit = 6651.58 * (self.rho * self.temp / (conf.n_e * self.mass_mono));
        let modes = resolve_maxwell_modes(&ctx.params, &trace, self.tau_e, g0_unit);
        let mut out = BufWriter::new(File::create(&self.maxwell)?);
        write_maxwell_modes(&mut out, &modes)?;
        println!("{} Maxwell modes written to {}", modes.len(), self.maxwell.display());

        let eta0 = zero_shear_viscosity(&ctx.params, &trace, self.tau_e, g0_unit);
        println!("zero-shear viscosity = {eta0:.6e} Pa s");
        Ok(ExitCode::SUCCESS)
    }
}
