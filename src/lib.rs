//! # readprep: partitioned read pre-processing
//!
//! Turns aligned sequencing reads into analysis-ready reads and keeps them in
//! a columnar, schema-evolvable container.
//!
//! ## Pipeline
//!
//! 1. **Sort**: global coordinate order, range partitioned
//! 2. **Duplicate marking**: one representative per read-pair key
//! 3. **Base quality recalibration**: empirical qualities per covariate bucket
//! 4. **Indel realignment**: reads moved onto the best alternate haplotype
//!
//! Every stage is a transformation of a lazily evaluated, partitioned
//! [`Collection`] executed on an explicit [`ExecutionContext`].
//!
//! ## Usage Example
//!
//! ```no_run
//! use readprep::framework::ExecutionContext;
//! use readprep::pipeline::{TransformConfig, Transformer};
//! use readprep::store::{self, ReadOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TransformConfig::default();
//! let ctx = config.execution_context()?;
//! let reads = store::load(&ctx, "reads.rpc", &ReadOptions::default())?;
//! let out = Transformer::new(config)?.run(&reads)?;
//! store::save(&out.records, "prepared.rpc")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

pub mod model;      // Record model
pub mod framework;  // Partitioned lazy collections
pub mod store;      // Columnar container
pub mod transforms; // Pipeline stages
pub mod pipeline;   // Stage orchestration
pub mod io;         // SAM text import/export
pub mod stats;      // Flag statistics and comparison

// Re-exports for convenience
pub use framework::{Broadcast, Collection, ExecutionContext, FrameworkError};
pub use model::{AlignmentRecord, CigarOp, CigarOpKind, Field, Flags, ModelError};
pub use pipeline::{PipelineError, TransformConfig, Transformer};
pub use store::{Predicate, Projection, ReadOptions, StoreError};
