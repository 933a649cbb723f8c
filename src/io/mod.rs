//! Text formats used to get reads in and out of containers.

pub mod sam;

pub use sam::{read_sam, read_sam_path, write_sam, write_sam_path, SamFile};

use std::io;

use thiserror::Error;

use crate::model::ModelError;

/// Errors reading or writing SAM text.
#[derive(Debug, Error)]
pub enum SamError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Line is not valid SAM.
    #[error("line {line}: {reason}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// Line parsed but describes an inconsistent record.
    #[error("line {line}: {source}")]
    Invalid {
        /// 1-based line number.
        line: usize,
        /// Validation failure.
        #[source]
        source: ModelError,
    },
}
