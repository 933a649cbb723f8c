use std::fmt;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{info, info_span};

use super::{PipelineError, TransformConfig};
use crate::framework::{Collection, ExecutionContext, FrameworkError};
use crate::model::AlignmentRecord;
use crate::store::{self, ReadOptions, StoreSummary};
use crate::transforms::bqsr::{KnownSites, RecalibrationTable, Recalibrator};
use crate::transforms::markdup::{DuplicateMarker, DuplicateMetrics};
use crate::transforms::realign::IndelRealigner;
use crate::transforms::sort::sort_by_coordinate;

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Forcing the input.
    Load,
    /// Coordinate sort.
    Sort,
    /// Duplicate marking.
    DuplicateMarking,
    /// Recalibration table build.
    RecalibrationTable,
    /// Recalibrated quality rewrite.
    Recalibration,
    /// Indel realignment.
    Realignment,
    /// Coordinate sort after realignment.
    FinalSort,
}

impl Stage {
    /// Short stage name used in logs and reports.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Sort => "sort",
            Stage::DuplicateMarking => "markdup",
            Stage::RecalibrationTable => "bqsr-table",
            Stage::Recalibration => "bqsr-apply",
            Stage::Realignment => "realign",
            Stage::FinalSort => "final-sort",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What one stage did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    /// Stage.
    pub stage: Stage,
    /// Records out of the stage.
    pub records: usize,
    /// Wall time including materialization.
    pub elapsed: Duration,
}

/// Per-stage metrics of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransformReport {
    /// Records in the input.
    pub input_records: usize,
    /// Stages in the order they ran.
    pub stages: Vec<StageReport>,
    /// Duplicate marking counters, when it ran.
    pub duplicates: Option<DuplicateMetrics>,
    /// Populated recalibration buckets, when it ran.
    pub recalibration_buckets: Option<usize>,
    /// Realignment targets found, when it ran.
    pub realignment_targets: Option<usize>,
}

impl TransformReport {
    /// Report of `stage`, if it ran.
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }
}

/// Result of [`Transformer::run`].
#[derive(Debug)]
pub struct TransformOutput {
    /// Transformed, materialized records.
    pub records: Collection<AlignmentRecord>,
    /// What each stage did.
    pub report: TransformReport,
    /// Recalibration table, when recalibration ran.
    pub table: Option<RecalibrationTable>,
}

/// Runs the enabled stages of a [`TransformConfig`].
#[derive(Debug, Clone)]
pub struct Transformer {
    config: TransformConfig,
    known_sites: Option<KnownSites>,
}

impl Transformer {
    /// Validate `config` and load its known-sites file, if any.
    pub fn new(config: TransformConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let known_sites = match &config.recalibration.known_sites {
            Some(path) if config.enable_recalibration => {
                let sites = KnownSites::from_path(path).map_err(|e| {
                    PipelineError::Configuration(format!(
                        "known sites {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                info!(path = %path.display(), intervals = sites.len(), "known sites loaded");
                Some(sites)
            }
            _ => None,
        };
        Ok(Self {
            config,
            known_sites,
        })
    }

    /// Use `sites` instead of the configured known-sites file.
    pub fn with_known_sites(mut self, sites: KnownSites) -> Self {
        self.known_sites = Some(sites);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Run every enabled stage over `input`.
    ///
    /// Each stage is materialized before the next begins; the first failure
    /// aborts the run and names its stage. The configured recalibration table
    /// export is written only once every stage has succeeded.
    pub fn run(&self, input: &Collection<AlignmentRecord>) -> Result<TransformOutput, PipelineError> {
        let out = self.run_stages(input)?;
        if let Some(staged) = self.stage_table(&out)? {
            staged.persist()?;
        }
        Ok(out)
    }

    /// Write the table export, if configured, beside its destination without
    /// publishing it.
    fn stage_table(&self, out: &TransformOutput) -> Result<Option<StagedTable>, PipelineError> {
        match (&self.config.recalibration.export_table, &out.table) {
            (Some(path), Some(table)) => StagedTable::write(table, path).map(Some),
            _ => Ok(None),
        }
    }

    fn run_stages(&self, input: &Collection<AlignmentRecord>) -> Result<TransformOutput, PipelineError> {
        let config = &self.config;
        let ctx = input.context().clone();
        let mut report = TransformReport::default();
        let mut table = None;

        let mut current = force(Stage::Load, &mut report, || Ok(input.clone()))?;
        report.input_records = report.stages[0].records;

        if config.enable_sort {
            current = force(Stage::Sort, &mut report, || Ok(sort_by_coordinate(&current)))?;
        }

        if config.enable_duplicate_marking {
            let marker = DuplicateMarker::new(config.duplicate_policy)
                .with_min_base_quality(config.duplicate_min_base_quality);
            current = force(Stage::DuplicateMarking, &mut report, || Ok(marker.mark(&current)))?;
            let metrics = DuplicateMetrics::collect(&current)
                .map_err(|e| PipelineError::at_stage(Stage::DuplicateMarking, e))?;
            info!(
                examined = metrics.examined,
                duplicates = metrics.duplicates,
                "duplicates marked"
            );
            report.duplicates = Some(metrics);
        }

        if config.enable_recalibration {
            let mut recalibrator = Recalibrator::new(&config.covariates)
                .with_min_observations(config.min_observations_for_bucket)
                .with_min_base_quality(config.recalibration.min_base_quality);
            if let Some(sites) = &self.known_sites {
                recalibrator = recalibrator.with_known_sites(ctx.broadcast(sites.clone()));
            }

            let started = Instant::now();
            let built = {
                let _span = info_span!("stage", stage = %Stage::RecalibrationTable).entered();
                recalibrator
                    .build_table(&current)
                    .map_err(|e| PipelineError::at_stage(Stage::RecalibrationTable, e))?
            };
            report.stages.push(StageReport {
                stage: Stage::RecalibrationTable,
                records: built.len(),
                elapsed: started.elapsed(),
            });
            report.recalibration_buckets = Some(built.len());

            let shared = ctx.broadcast(built.clone());
            current = force(Stage::Recalibration, &mut report, || {
                Ok(recalibrator.apply(&current, shared.clone()))
            })?;
            table = Some(built);
        }

        if config.enable_realignment {
            let realigner = IndelRealigner::new(config.realignment.clone());
            let targets = realigner
                .targets(&current)
                .map_err(|e| PipelineError::at_stage(Stage::Realignment, e))?;
            report.realignment_targets = Some(targets.len());
            let shared = ctx.broadcast(targets);
            current = force(Stage::Realignment, &mut report, || {
                Ok(realigner.realign(&current, shared.clone()))
            })?;
        }

        // Marking and realignment do not preserve order.
        if config.enable_sort && (config.enable_duplicate_marking || config.enable_realignment) {
            current = force(Stage::FinalSort, &mut report, || Ok(sort_by_coordinate(&current)))?;
        }

        Ok(TransformOutput {
            records: current,
            report,
            table,
        })
    }
}

/// Build a stage's collection, materialize it and record its report.
fn force<F>(
    stage: Stage,
    report: &mut TransformReport,
    build: F,
) -> Result<Collection<AlignmentRecord>, PipelineError>
where
    F: FnOnce() -> Result<Collection<AlignmentRecord>, FrameworkError>,
{
    let _span = info_span!("stage", stage = %stage).entered();
    let started = Instant::now();
    let materialized = build()
        .and_then(|c| c.cache())
        .map_err(|e| PipelineError::at_stage(stage, e))?;
    let records = materialized
        .count()
        .map_err(|e| PipelineError::at_stage(stage, e))?;
    let elapsed = started.elapsed();
    info!(records, elapsed_ms = elapsed.as_millis() as u64, "stage finished");
    report.stages.push(StageReport {
        stage,
        records,
        elapsed,
    });
    Ok(materialized)
}

/// Recalibration table written to a hidden temporary file in the
/// destination directory. Dropping it discards the file; [`persist`]
/// renames it into place.
///
/// [`persist`]: StagedTable::persist
struct StagedTable {
    file: NamedTempFile,
    path: PathBuf,
    buckets: usize,
}

impl StagedTable {
    fn write(table: &RecalibrationTable, path: &Path) -> Result<Self, PipelineError> {
        let export_err = |source| PipelineError::Export {
            path: path.to_path_buf(),
            source,
        };
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut file = tempfile::Builder::new()
            .prefix(".readprep-table-")
            .tempfile_in(parent)
            .map_err(export_err)?;
        table
            .write_tsv(BufWriter::new(file.as_file_mut()))
            .map_err(export_err)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            buckets: table.len(),
        })
    }

    fn persist(self) -> Result<(), PipelineError> {
        let Self { file, path, buckets } = self;
        file.persist(&path).map_err(|e| PipelineError::Export {
            path: path.clone(),
            source: e.error,
        })?;
        info!(path = %path.display(), buckets, "recalibration table exported");
        Ok(())
    }
}

/// Load the container at `input`, run `transformer` and store the result at
/// `output`.
///
/// Nothing is written if any stage fails. The recalibration table export is
/// published only after the output container is in place.
pub fn transform_container(
    transformer: &Transformer,
    ctx: &ExecutionContext,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<(TransformReport, StoreSummary), PipelineError> {
    let records =
        store::load(ctx, input, &ReadOptions::default()).map_err(PipelineError::from_load)?;
    let out = transformer.run_stages(&records)?;
    let staged = transformer.stage_table(&out)?;
    let summary = store::save(&out.records, output).map_err(PipelineError::Storage)?;
    if let Some(staged) = staged {
        staged.persist()?;
    }
    Ok((out.report, summary))
}
