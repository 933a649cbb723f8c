use std::collections::BTreeMap;
use std::io::{self, Write};
use std::ops::AddAssign;
use std::sync::Arc;

use serde::Serialize;

use super::covariates::{BaseCovariates, CovariateKey, CovariateSet};

/// Lowest quality recalibration emits.
pub const MIN_RECALIBRATED_QUALITY: u8 = 1;
/// Highest quality recalibration emits.
pub const MAX_RECALIBRATED_QUALITY: u8 = 60;

/// Observation counts of one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    /// Bases counted.
    pub observations: u64,
    /// Bases disagreeing with the reference.
    pub mismatches: u64,
}

impl Counts {
    /// One observed base.
    pub fn observed(mismatch: bool) -> Self {
        Self {
            observations: 1,
            mismatches: u64::from(mismatch),
        }
    }

    /// Phred-scaled empirical quality with a +1/+2 pseudo-count, rounded and
    /// clamped to the emitted range.
    pub fn empirical_quality(&self) -> u8 {
        let error = (self.mismatches as f64 + 1.0) / (self.observations as f64 + 2.0);
        let phred = (-10.0 * error.log10()).round();
        phred.clamp(
            f64::from(MIN_RECALIBRATED_QUALITY),
            f64::from(MAX_RECALIBRATED_QUALITY),
        ) as u8
    }
}

impl AddAssign for Counts {
    fn add_assign(&mut self, other: Self) {
        self.observations += other.observations;
        self.mismatches += other.mismatches;
    }
}

/// Bucket of the recalibration table: a lookup level and its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableKey {
    /// Index into [`CovariateSet::levels`], 0 being the finest.
    pub level: u8,
    /// Covariate values at that level.
    pub key: CovariateKey,
}

/// Mutable accumulator for a recalibration table.
///
/// Consumed by [`freeze`](RecalibrationTableBuilder::freeze); the resulting
/// table has no mutating API.
#[derive(Debug, Clone)]
pub struct RecalibrationTableBuilder {
    covariates: CovariateSet,
    min_observations: u64,
    buckets: BTreeMap<TableKey, Counts>,
}

impl RecalibrationTableBuilder {
    /// Empty builder.
    pub fn new(covariates: CovariateSet, min_observations: u64) -> Self {
        Self {
            covariates,
            min_observations,
            buckets: BTreeMap::new(),
        }
    }

    /// Add counts to a bucket.
    pub fn add(&mut self, key: TableKey, counts: Counts) {
        *self.buckets.entry(key).or_default() += counts;
    }

    /// Finish building.
    pub fn freeze(self) -> RecalibrationTable {
        RecalibrationTable {
            levels: self.covariates.levels(),
            covariates: self.covariates,
            min_observations: self.min_observations,
            buckets: self.buckets,
        }
    }
}

/// Keys of every lookup level for one base.
pub fn table_keys(
    covariates: &CovariateSet,
    values: &BaseCovariates,
    read_group: &Option<Arc<str>>,
) -> Vec<TableKey> {
    covariates
        .levels()
        .iter()
        .enumerate()
        .map(|(level, set)| TableKey {
            level: level as u8,
            key: set.key(values, read_group),
        })
        .collect()
}

/// Frozen per-bucket observation and mismatch counts.
#[derive(Debug, Clone, PartialEq)]
pub struct RecalibrationTable {
    covariates: CovariateSet,
    levels: Vec<CovariateSet>,
    min_observations: u64,
    buckets: BTreeMap<TableKey, Counts>,
}

impl RecalibrationTable {
    /// Covariates the table was built with.
    pub fn covariates(&self) -> CovariateSet {
        self.covariates
    }

    /// Minimum observations a bucket needs to be used.
    pub fn min_observations(&self) -> u64 {
        self.min_observations
    }

    /// Number of populated buckets across all levels.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no base was counted.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Counts of one bucket.
    pub fn counts(&self, key: &TableKey) -> Option<Counts> {
        self.buckets.get(key).copied()
    }

    /// Recalibrated quality for a base, or `None` when no level has enough
    /// observations and the reported quality must be kept.
    pub fn recalibrate(
        &self,
        values: &BaseCovariates,
        read_group: &Option<Arc<str>>,
    ) -> Option<u8> {
        self.levels.iter().enumerate().find_map(|(level, set)| {
            let key = TableKey {
                level: level as u8,
                key: set.key(values, read_group),
            };
            self.buckets
                .get(&key)
                .filter(|counts| counts.observations >= self.min_observations)
                .map(Counts::empirical_quality)
        })
    }

    /// Write the table as tab-separated text, one bucket per line, in key order.
    pub fn write_tsv<W: Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(
            out,
            "level\tread_group\tquality\tcycle\tcontext\tobservations\tmismatches\tempirical_quality"
        )?;
        let dash = || "-".to_string();
        for (key, counts) in &self.buckets {
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                key.level,
                key.key.read_group.as_deref().unwrap_or("-"),
                key.key.quality.map(|q| q.to_string()).unwrap_or_else(dash),
                key.key.cycle.map(|c| c.to_string()).unwrap_or_else(dash),
                key.key.context.map(|c| c.to_string()).unwrap_or_else(dash),
                counts.observations,
                counts.mismatches,
                counts.empirical_quality()
            )?;
        }
        out.flush()
    }
}
