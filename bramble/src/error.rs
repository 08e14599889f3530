//! Error type of this crate.

use std::io;
use thiserror::Error;

/// Catch-all error for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The segment arena ran out of records in the middle of growing a
    /// molecule. The partial molecule has been released.
    #[error("segment arena exhausted while growing a molecule")]
    ArenaExhausted,
    /// The polymer arena ran out of records.
    #[error("polymer arena exhausted")]
    PolymersExhausted,
    /// A recursive generator exceeded its configured depth limit.
    #[error("generator recursion exceeded the depth limit of {0}")]
    RecursionOverflow(usize),
    /// A malformed line or value in an input file.
    #[error("parse error in {file}: {reason}")]
    Parse {
        /// Name of the offending file.
        file: String,
        /// What was wrong with it.
        reason: String,
    },
    /// A quantity left its admissible range and could not be clamped back.
    #[error("numerical failure: {0}")]
    Numerical(String),
    /// The run was cancelled through the stop flag.
    #[error("run cancelled")]
    Cancelled,
    /// A required input file could not be opened or read.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
