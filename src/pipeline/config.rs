use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::PipelineError;
use crate::framework::ExecutionContext;
use crate::transforms::bqsr::{
    CovariateKind, DEFAULT_MIN_OBSERVATIONS_FOR_BUCKET, DEFAULT_RECALIBRATION_MIN_BASE_QUALITY,
};
use crate::transforms::markdup::{DuplicatePolicy, DEFAULT_DUPLICATE_MIN_BASE_QUALITY};
use crate::transforms::realign::RealignmentOptions;

/// Partition count used when a configuration does not name one.
pub const DEFAULT_PARTITIONS: usize = 8;

/// Recalibration settings beyond the covariate set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecalibrationOptions {
    /// Bases below this reported quality are neither counted nor rewritten.
    pub min_base_quality: u8,
    /// BED file of known variant sites excluded from counting.
    pub known_sites: Option<PathBuf>,
    /// Write the recalibration table here as TSV.
    pub export_table: Option<PathBuf>,
}

impl Default for RecalibrationOptions {
    fn default() -> Self {
        Self {
            min_base_quality: DEFAULT_RECALIBRATION_MIN_BASE_QUALITY,
            known_sites: None,
            export_table: None,
        }
    }
}

/// Which stages run and how.
///
/// Loadable from TOML; every key is optional:
///
/// ```toml
/// enable_realignment = false
/// covariates = ["quality_score", "cycle"]
/// partitions = 16
///
/// [realignment]
/// lod_threshold = 3.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    /// Coordinate sort before the other stages and again after marking or
    /// realignment.
    pub enable_sort: bool,
    /// Mark duplicates.
    pub enable_duplicate_marking: bool,
    /// Recalibrate base qualities.
    pub enable_recalibration: bool,
    /// Realign around indels.
    pub enable_realignment: bool,
    /// Recalibration covariates; the read group is always included.
    pub covariates: Vec<CovariateKind>,
    /// Buckets with fewer observations fall back to a coarser level.
    pub min_observations_for_bucket: u64,
    /// Duplicate representative selection.
    pub duplicate_policy: DuplicatePolicy,
    /// Minimum base quality counted by the quality-sum policy.
    pub duplicate_min_base_quality: u8,
    /// Recalibration settings.
    pub recalibration: RecalibrationOptions,
    /// Realignment settings.
    pub realignment: RealignmentOptions,
    /// Partitions of in-memory collections.
    pub partitions: usize,
    /// Worker threads; rayon's default when unset.
    pub threads: Option<usize>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            enable_sort: true,
            enable_duplicate_marking: true,
            enable_recalibration: true,
            enable_realignment: true,
            covariates: CovariateKind::ALL.to_vec(),
            min_observations_for_bucket: DEFAULT_MIN_OBSERVATIONS_FOR_BUCKET,
            duplicate_policy: DuplicatePolicy::default(),
            duplicate_min_base_quality: DEFAULT_DUPLICATE_MIN_BASE_QUALITY,
            recalibration: RecalibrationOptions::default(),
            realignment: RealignmentOptions::default(),
            partitions: DEFAULT_PARTITIONS,
            threads: None,
        }
    }
}

impl TransformConfig {
    /// Parse a TOML configuration file and validate it.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&text)
            .map_err(|e| PipelineError::Configuration(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Parse TOML text and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        let config: Self =
            toml::from_str(text).map_err(|e| PipelineError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |msg: &str| Err(PipelineError::Configuration(msg.to_string()));
        if self.partitions == 0 {
            return fail("partitions must be at least 1");
        }
        if self.threads == Some(0) {
            return fail("threads must be at least 1");
        }
        if self.enable_realignment && !self.enable_sort {
            return fail("realignment requires coordinate sort");
        }
        if self.enable_recalibration {
            if self.covariates.is_empty() {
                return fail("recalibration requires at least one covariate");
            }
            if self.min_observations_for_bucket == 0 {
                return fail("min_observations_for_bucket must be at least 1");
            }
        }
        if self.enable_realignment {
            let lod = self.realignment.lod_threshold;
            if !lod.is_finite() || lod < 0.0 {
                return fail("realignment lod_threshold must be finite and non-negative");
            }
            if self.realignment.max_target_size == 0 {
                return fail("realignment max_target_size must be at least 1");
            }
        }
        Ok(())
    }

    /// Execution context sized by this configuration.
    pub fn execution_context(&self) -> Result<ExecutionContext, PipelineError> {
        let ctx = match self.threads {
            Some(threads) => ExecutionContext::with_threads(self.partitions, threads),
            None => ExecutionContext::new(self.partitions),
        };
        ctx.map_err(|e| PipelineError::Configuration(e.to_string()))
    }
}
