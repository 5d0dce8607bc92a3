use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kurie_lab::config::Config;
use kurie_lab::pipeline::{self, Stage};

/// Gamma detector calibration and beta spectrum endpoint analysis
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// TOML configuration, built-in defaults are used if the file does not exist
    #[arg(long, default_value = "kurie-lab.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, Subcommand)]
enum Command {
    /// Attach Poisson errors and subtract the background
    Annotate,
    /// Fit the calibration line and compute its count rate
    Fit,
    /// Derive the energy scale and convert the spectra
    Calibrate,
    /// Detector efficiency from the reference source
    Activity,
    /// Fractions of counts in configured energy ranges
    Intensity,
    /// Tabulate the Kurie transform
    Kurie,
    /// Search the fit windows of both linearised quantities
    Qsearch,
    /// Refit the selected windows and propagate errors into Q
    Qfit,
    /// Draw every figure
    Plot,
    /// Run every stage in order
    All,
}

impl Command {
    const fn stage(self) -> Option<Stage> {
        match self {
            Self::Annotate => Some(Stage::Annotate),
            Self::Fit => Some(Stage::Fit),
            Self::Calibrate => Some(Stage::Calibrate),
            Self::Activity => Some(Stage::Activity),
            Self::Intensity => Some(Stage::Intensity),
            Self::Kurie => Some(Stage::Kurie),
            Self::Qsearch => Some(Stage::QSearch),
            Self::Qfit => Some(Stage::QFit),
            Self::Plot => Some(Stage::Plot),
            Self::All => None,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let result = Config::load(&cli.config).and_then(|config| match cli.command.stage() {
        Some(stage) => stage.run(&config),
        None => pipeline::run_all(&config),
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(command = ?cli.command, error = %e, "stage failed");
            ExitCode::FAILURE
        }
    }
}
