#![allow(missing_docs)]

use bramble_cli::{Opts, Subcommand};
use clap::Parser;
use std::process::{ExitCode, Termination};

fn main() -> ExitCode {
    env_logger::init();
    let opts = Opts::parse();

    match opts.subcommand.run(&opts.configuration) {
        Ok(code) => code,
        result @ Err(_) => result.report(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_command() {
        use clap::CommandFactory;
        Opts::command().debug_assert();
    }
}
