use std::path::PathBuf;

/// Failures raised by the analysis stages themselves.
///
/// I/O, table, TOML, linear algebra and plotting failures travel through the crate
/// [`Result`](crate::Result) unchanged; this enum covers the conditions the analysis detects.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("input file {0:?} does not exist")]
    MissingFile(PathBuf),
    #[error("{path:?} line {line}: {reason}")]
    MalformedRow {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("spectrum {name}: {reason}")]
    InconsistentSpectrum { name: String, reason: String },
    #[error("fit did not converge: {0}")]
    FitDidNotConverge(String),
    #[error("{needed} points are needed for the fit, the window holds {found}")]
    InsufficientData { needed: usize, found: usize },
    #[error("report {path:?} has no entry `{key}`")]
    MissingReportKey { path: PathBuf, key: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
