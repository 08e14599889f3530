#![allow(clippy::missing_errors_doc)]
#![allow(missing_docs)]

mod generate;
mod relax;

use anyhow::Result;
use clap::Parser;
use enum_dispatch::enum_dispatch;
use std::process::ExitCode;

#[derive(Parser)]
pub struct GlobalConfiguration {
    /// Seed for the run's random number generator.
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,
    /// Path to a `key=value` options file applied on top of the defaults.
    #[arg(long, value_name = "FILE")]
    pub options: Option<std::path::PathBuf>,
}

#[enum_dispatch]
pub trait Subcommand {
    fn run(&self, cfg: &GlobalConfiguration) -> Result<ExitCode>;
}

#[enum_dispatch(Subcommand)]
#[derive(Parser)]
pub enum SubcommandEnum {
    Generate(generate::Opts),
    Relax(relax::Opts),
}

#[derive(Parser)]
#[command(
    arg_required_else_help = true,
    author,
    about,
    disable_help_subcommand = true,
    name = "bramble",
    version
)]
pub struct Opts {
    #[command(flatten)]
    pub configuration: GlobalConfiguration,
    #[command(subcommand)]
    pub subcommand: SubcommandEnum,
}

/// Builds the run context from the global flags.
fn make_context(cfg: &GlobalConfiguration) -> Result<bramble::context::Context> {
    let mut params = bramble::context::Params::default();
    if let Some(path) = &cfg.options {
        let warnings = bramble::config::apply_options(&mut params, &std::fs::read_to_string(path)?)?;
        for warning in warnings {
            eprintln!("{warning}");
        }
    }
    Ok(cfg.seed.map_or_else(
        || bramble::context::Context::new(params.clone()),
        |seed| bramble::context::Context::seeded(params.clone(), seed),
    ))
}
