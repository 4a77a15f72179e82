//! BlockWitness CLI
//!
//! Main entry point for the `blockwitness` binary.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

mod cli;

use cli::Cli;

/// Application exit codes
#[repr(u8)]
pub enum Exit {
    Success = 0,
    /// Verification found integrity problems
    IntegrityFailure = 1,
    GeneralError = 2,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit as u8)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(&cli);

    match cli.execute() {
        Ok(exit) => exit.into(),
        Err(e) => {
            error!("{e:#}");
            Exit::GeneralError.into()
        }
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // RUST_LOG wins over the verbosity flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 if cli.quiet => EnvFilter::new("error"),
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(cli.verbose >= 2))
        .init();
}
