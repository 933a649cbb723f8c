//! Transform orchestration: run the enabled stages in a fixed order over a
//! collection, materializing each stage so failures are attributed to it.
//!
//! ```text
//! load ─▶ sort ─▶ duplicate marking ─▶ recalibration table ─▶ recalibration
//!       ─▶ realignment ─▶ final sort ─▶ store
//! ```

mod config;
mod orchestrator;

pub use config::{RecalibrationOptions, TransformConfig, DEFAULT_PARTITIONS};
pub use orchestrator::{
    transform_container, Stage, StageReport, TransformOutput, TransformReport, Transformer,
};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::framework::FrameworkError;
use crate::store::StoreError;

/// Errors of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input could not be read or is corrupt.
    #[error("ingestion failed: {0}")]
    Ingestion(String),

    /// Input written with an incompatible schema.
    #[error("schema mismatch: {0}")]
    Schema(#[source] StoreError),

    /// A stage failed; nothing was written.
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        /// Stage that failed.
        stage: Stage,
        /// Underlying failure.
        #[source]
        source: FrameworkError,
    },

    /// Configuration rejected before execution.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Output container could not be written.
    #[error("failed to write output: {0}")]
    Storage(#[source] StoreError),

    /// Auxiliary output (recalibration table) could not be written.
    #[error("failed to write {}: {source}", .path.display())]
    Export {
        /// File being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    /// Classify a failure surfaced while `stage` ran.
    ///
    /// Partition sources failing during a stage are ingestion problems of the
    /// lazily loaded input, not of the stage itself.
    pub fn at_stage(stage: Stage, source: FrameworkError) -> Self {
        match source {
            FrameworkError::Source { .. } => Self::Ingestion(source.to_string()),
            source => Self::Stage { stage, source },
        }
    }

    /// Classify a failure opening the input container.
    pub fn from_load(error: StoreError) -> Self {
        if error.is_schema_error() {
            Self::Schema(error)
        } else {
            Self::Ingestion(error.to_string())
        }
    }
}
