//! Error type shared across the pipeline.
//!
//! Every failure is fatal: the pipeline is one-shot and nothing is
//! recovered locally. `main` prints the error and exits 1.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can abort a run.
#[derive(Error, Debug)]
pub enum GaleError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot find genome index part {}", path.display())]
    MissingPart { path: PathBuf },

    #[error("malformed index {}: {message}", path.display())]
    Malformed { path: PathBuf, message: String },

    #[error("index mismatch: {0}")]
    Mismatch(String),

    #[error("invalid parameter: {0}")]
    Parameter(String),

    #[error("cannot write output {}: {message}", path.display())]
    Output { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, GaleError>;

impl GaleError {
    /// Attach a path to a bare I/O error when opening index parts.
    pub fn opening(path: impl Into<PathBuf>, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            GaleError::MissingPart { path: path.into() }
        } else {
            GaleError::Io(err)
        }
    }
}
