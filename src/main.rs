use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use readprep::framework::{Collection, ExecutionContext};
use readprep::io::sam::{self, default_header};
use readprep::model::{Field, Flags};
use readprep::pipeline::{transform_container, TransformConfig, Transformer};
use readprep::stats::{compare, FlagStats};
use readprep::store::{self, CompareOp, Predicate, Projection, ReadOptions, WriteOptions};

#[derive(Parser, Debug)]
#[command(name = "readprep", about = "Read pre-processing over columnar read containers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct ExecutionArgs {
    /// Partitions of in-memory collections.
    #[arg(long)]
    partitions: Option<usize>,
    /// Worker threads (default: one per core).
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert a SAM file into a container.
    Import {
        /// SAM input.
        sam: PathBuf,
        /// Container to create.
        output: PathBuf,
        /// Rows per row group.
        #[arg(long, default_value_t = store::DEFAULT_ROW_GROUP_SIZE)]
        row_group_size: usize,
        #[command(flatten)]
        execution: ExecutionArgs,
    },
    /// Run the pre-processing stages over a container.
    Transform {
        /// Input container.
        input: PathBuf,
        /// Container to create.
        output: PathBuf,
        /// TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Skip coordinate sort (requires --skip-realign).
        #[arg(long)]
        skip_sort: bool,
        /// Skip duplicate marking.
        #[arg(long)]
        skip_markdup: bool,
        /// Skip base quality recalibration.
        #[arg(long)]
        skip_bqsr: bool,
        /// Skip indel realignment.
        #[arg(long)]
        skip_realign: bool,
        /// BED file of known variant sites excluded from recalibration.
        #[arg(long)]
        known_sites: Option<PathBuf>,
        /// Write the recalibration table as TSV.
        #[arg(long)]
        export_table: Option<PathBuf>,
        #[command(flatten)]
        execution: ExecutionArgs,
    },
    /// Print flag statistics of a container.
    Stats {
        /// Container to summarize.
        input: PathBuf,
        #[command(flatten)]
        execution: ExecutionArgs,
    },
    /// Compare two containers record by record.
    Compare {
        /// First container.
        left: PathBuf,
        /// Second container.
        right: PathBuf,
        /// Exit with an error when the containers differ.
        #[arg(long)]
        fail_on_difference: bool,
        #[command(flatten)]
        execution: ExecutionArgs,
    },
    /// Write a container (or a selection of it) as SAM.
    Export {
        /// Input container.
        input: PathBuf,
        /// SAM file to create.
        sam: PathBuf,
        /// Only reads starting in `contig:start-end` (1-based, inclusive).
        #[arg(long)]
        region: Option<String>,
        /// Only reads with at least this mapping quality.
        #[arg(long)]
        min_mapq: Option<u8>,
        /// Drop reads flagged as duplicates.
        #[arg(long)]
        no_duplicates: bool,
        #[command(flatten)]
        execution: ExecutionArgs,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Import {
            sam,
            output,
            row_group_size,
            execution,
        } => run_import(&sam, &output, row_group_size, &execution)?,
        Commands::Transform {
            input,
            output,
            config,
            skip_sort,
            skip_markdup,
            skip_bqsr,
            skip_realign,
            known_sites,
            export_table,
            execution,
        } => {
            let mut config = match config {
                Some(path) => TransformConfig::from_toml_file(&path)?,
                None => TransformConfig::default(),
            };
            config.enable_sort &= !skip_sort;
            config.enable_duplicate_marking &= !skip_markdup;
            config.enable_recalibration &= !skip_bqsr;
            config.enable_realignment &= !skip_realign;
            if known_sites.is_some() {
                config.recalibration.known_sites = known_sites;
            }
            if export_table.is_some() {
                config.recalibration.export_table = export_table;
            }
            apply_execution(&mut config, &execution);
            run_transform(config, &input, &output)?
        }
        Commands::Stats { input, execution } => run_stats(&input, &execution)?,
        Commands::Compare {
            left,
            right,
            fail_on_difference,
            execution,
        } => run_compare(&left, &right, fail_on_difference, &execution)?,
        Commands::Export {
            input,
            sam,
            region,
            min_mapq,
            no_duplicates,
            execution,
        } => {
            let predicate = export_predicate(region.as_deref(), min_mapq, no_duplicates)?;
            run_export(&input, &sam, predicate, &execution)?
        }
    }

    Ok(())
}

fn apply_execution(config: &mut TransformConfig, execution: &ExecutionArgs) {
    if let Some(partitions) = execution.partitions {
        config.partitions = partitions;
    }
    if execution.threads.is_some() {
        config.threads = execution.threads;
    }
}

fn context(execution: &ExecutionArgs) -> Result<ExecutionContext> {
    let mut config = TransformConfig::default();
    apply_execution(&mut config, execution);
    config.validate()?;
    Ok(config.execution_context()?)
}

fn run_import(
    sam_path: &Path,
    output: &Path,
    row_group_size: usize,
    execution: &ExecutionArgs,
) -> Result<()> {
    let ctx = context(execution)?;
    let file = sam::read_sam_path(sam_path)
        .with_context(|| format!("failed to read SAM from {}", sam_path.display()))?;
    info!(records = file.records.len(), "SAM parsed");

    let collection = Collection::from_vec(&ctx, file.records);
    let options = WriteOptions {
        row_group_size,
        ..WriteOptions::default()
    };
    let summary = store::save_with(&collection, output, &options)
        .with_context(|| format!("failed to write container {}", output.display()))?;
    println!(
        "imported {} records into {} ({} row groups)",
        summary.rows,
        summary.path.display(),
        summary.row_groups
    );
    Ok(())
}

fn run_transform(config: TransformConfig, input: &Path, output: &Path) -> Result<()> {
    let ctx = config.execution_context()?;
    let transformer = Transformer::new(config)?;
    let (report, summary) = transform_container(&transformer, &ctx, input, output)
        .with_context(|| format!("transform of {} failed", input.display()))?;

    for stage in &report.stages {
        println!(
            "{}\t{} records\t{:.3}s",
            stage.stage,
            stage.records,
            stage.elapsed.as_secs_f64()
        );
    }
    if let Some(dups) = report.duplicates {
        println!(
            "duplicates\t{}/{} ({:.2}%)",
            dups.duplicates,
            dups.examined,
            100.0 * dups.duplicate_fraction()
        );
    }
    if let Some(buckets) = report.recalibration_buckets {
        println!("recalibration buckets\t{}", buckets);
    }
    if let Some(targets) = report.realignment_targets {
        println!("realignment targets\t{}", targets);
    }
    println!("wrote {} records to {}", summary.rows, summary.path.display());
    Ok(())
}

fn run_stats(input: &Path, execution: &ExecutionArgs) -> Result<()> {
    let ctx = context(execution)?;
    let reads = store::load(&ctx, input, &ReadOptions::default())
        .with_context(|| format!("failed to open {}", input.display()))?;
    let stats = FlagStats::collect(&reads).context("failed to read records")?;
    println!("{}", stats);
    Ok(())
}

fn run_compare(
    left: &Path,
    right: &Path,
    fail_on_difference: bool,
    execution: &ExecutionArgs,
) -> Result<()> {
    let ctx = context(execution)?;
    let open = |path: &Path| {
        store::load(&ctx, path, &ReadOptions::default())
            .with_context(|| format!("failed to open {}", path.display()))
    };
    let comparison = compare(&open(left)?, &open(right)?).context("comparison failed")?;
    println!("{}", comparison);
    if fail_on_difference && !comparison.is_identical() {
        bail!("{} and {} differ", left.display(), right.display());
    }
    Ok(())
}

fn export_predicate(region: Option<&str>, min_mapq: Option<u8>, no_duplicates: bool) -> Result<Predicate> {
    let mut predicate = Predicate::True;
    if let Some(region) = region {
        let (contig, start, end) = parse_region(region)?;
        predicate = predicate.and(Predicate::region(contig, start, end));
    }
    if let Some(mapq) = min_mapq {
        predicate = predicate.and(Predicate::compare(
            Field::MappingQuality,
            CompareOp::Ge,
            i64::from(mapq),
        ));
    }
    if no_duplicates {
        predicate = predicate.and(Predicate::FlagUnset(Flags::DUPLICATE));
    }
    Ok(predicate)
}

/// Parse `contig:start-end` (1-based, inclusive) into a 0-based half-open interval.
fn parse_region(text: &str) -> Result<(&str, u32, u32)> {
    let (contig, range) = text
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("region '{}' is not contig:start-end", text))?;
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| anyhow!("region '{}' is not contig:start-end", text))?;
    let start: u32 = start
        .replace(',', "")
        .parse()
        .with_context(|| format!("bad region start in '{}'", text))?;
    let end: u32 = end
        .replace(',', "")
        .parse()
        .with_context(|| format!("bad region end in '{}'", text))?;
    if start == 0 || end < start {
        bail!("region '{}' is empty or not 1-based", text);
    }
    Ok((contig, start - 1, end))
}

fn run_export(
    input: &Path,
    sam_path: &Path,
    predicate: Predicate,
    execution: &ExecutionArgs,
) -> Result<()> {
    let ctx = context(execution)?;
    let options = ReadOptions::default()
        .with_projection(Projection::all())
        .with_predicate(predicate);
    let reads = store::load(&ctx, input, &options)
        .with_context(|| format!("failed to open {}", input.display()))?;
    let records = reads.collect().context("failed to read records")?;
    let header = default_header(&records, false);
    sam::write_sam_path(sam_path, &header, &records)
        .with_context(|| format!("failed to write {}", sam_path.display()))?;
    println!("exported {} records to {}", records.len(), sam_path.display());
    Ok(())
}
