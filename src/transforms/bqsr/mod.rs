//! Base quality score recalibration.
//!
//! Two phases over the same input:
//!
//! 1. [`Recalibrator::build_table`] counts observations and mismatches for
//!    every covariate bucket (`flat_map` → `reduce_by_key`) and freezes the
//!    result into a [`RecalibrationTable`].
//! 2. [`Recalibrator::apply`] rewrites every base quality from the broadcast
//!    table. The new quality depends only on the base's covariate key and the
//!    table, never on the rest of the read or on partitioning.

mod covariates;
mod known_sites;
mod table;

pub use covariates::{
    base_covariates, BaseCovariates, CovariateKey, CovariateKind, CovariateSet, Dinucleotide,
};
pub use known_sites::{KnownSites, KnownSitesError};
pub use table::{
    table_keys, Counts, RecalibrationTable, RecalibrationTableBuilder, TableKey,
    MAX_RECALIBRATED_QUALITY, MIN_RECALIBRATED_QUALITY,
};

use std::sync::Arc;

use tracing::info;

use crate::framework::{Broadcast, Collection, FrameworkError};
use crate::model::{AlignmentRecord, CigarOpKind};

/// Bases reported below this quality are neither counted nor rewritten.
pub const DEFAULT_RECALIBRATION_MIN_BASE_QUALITY: u8 = 6;

/// Buckets with fewer observations fall back to a coarser level.
pub const DEFAULT_MIN_OBSERVATIONS_FOR_BUCKET: u64 = 100;

/// Recalibration stage.
#[derive(Debug, Clone)]
pub struct Recalibrator {
    covariates: CovariateSet,
    min_observations: u64,
    min_base_quality: u8,
    known_sites: Option<Broadcast<KnownSites>>,
}

impl Recalibrator {
    /// Recalibrator conditioning on `covariates` (plus the read group).
    pub fn new(covariates: &[CovariateKind]) -> Self {
        Self {
            covariates: CovariateSet::of(covariates),
            min_observations: DEFAULT_MIN_OBSERVATIONS_FOR_BUCKET,
            min_base_quality: DEFAULT_RECALIBRATION_MIN_BASE_QUALITY,
            known_sites: None,
        }
    }

    /// Minimum observations for a bucket to be used.
    pub fn with_min_observations(mut self, min_observations: u64) -> Self {
        self.min_observations = min_observations;
        self
    }

    /// Minimum reported quality of counted and rewritten bases.
    pub fn with_min_base_quality(mut self, min_base_quality: u8) -> Self {
        self.min_base_quality = min_base_quality;
        self
    }

    /// Exclude known variant positions from counting.
    pub fn with_known_sites(mut self, known_sites: Broadcast<KnownSites>) -> Self {
        self.known_sites = Some(known_sites);
        self
    }

    /// Phase 1: count every covariate bucket.
    ///
    /// A read with an MD tag that does not fit its alignment fails the build
    /// with the read named.
    pub fn build_table(
        &self,
        input: &Collection<AlignmentRecord>,
    ) -> Result<RecalibrationTable, FrameworkError> {
        let covariates = self.covariates;
        let min_q = self.min_base_quality;
        let known_sites = self.known_sites.clone();

        let buckets = input
            .filter(counts_toward_table)
            .try_flat_map(move |record| {
                observe(&record, &covariates, min_q, known_sites.as_deref())
            })
            .reduce_by_key(|mut a, b| {
                a += b;
                a
            })
            .collect()?;

        let mut builder = RecalibrationTableBuilder::new(covariates, self.min_observations);
        for (key, counts) in buckets {
            builder.add(key, counts);
        }
        let table = builder.freeze();
        info!(buckets = table.len(), "recalibration table built");
        Ok(table)
    }

    /// Phase 2: rewrite qualities from a frozen table.
    pub fn apply(
        &self,
        input: &Collection<AlignmentRecord>,
        table: Broadcast<RecalibrationTable>,
    ) -> Collection<AlignmentRecord> {
        let min_q = self.min_base_quality;
        input.map(move |record| recalibrate_record(record, &table, min_q))
    }
}

/// Reads whose aligned bases are counted.
pub fn counts_toward_table(record: &AlignmentRecord) -> bool {
    record.is_mapped()
        && !record.flags.is_duplicate()
        && !record.flags.is_secondary()
        && !record.flags.is_qc_fail()
        && record.mismatching_positions.is_some()
        && !record.quality_scores.is_empty()
}

fn observe(
    record: &AlignmentRecord,
    covariates: &CovariateSet,
    min_base_quality: u8,
    known_sites: Option<&KnownSites>,
) -> Result<Vec<(TableKey, Counts)>, FrameworkError> {
    let md = match record.md_tag() {
        Ok(Some(md)) => md,
        Ok(None) => return Ok(Vec::new()),
        Err(e) => {
            return Err(FrameworkError::transform(e.to_string()).for_record(record.read_name.as_ref()))
        }
    };
    let (Some(start), Some(contig)) = (record.reference_position, record.reference_name.as_deref())
    else {
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    let mut ref_pos = start;
    let mut read_pos = 0usize;
    for op in &record.cigar {
        match op.kind {
            kind if kind.is_aligned() => {
                for _ in 0..op.len {
                    let base = record.sequence.get(read_pos).copied().unwrap_or(b'N');
                    let quality = record.quality_at(read_pos).unwrap_or(0);
                    let masked = known_sites.is_some_and(|sites| sites.contains(contig, ref_pos));
                    if quality >= min_base_quality
                        && !base.eq_ignore_ascii_case(&b'N')
                        && !masked
                        && read_pos < record.sequence.len()
                    {
                        let values = base_covariates(record, read_pos);
                        let mismatch = md.mismatch_at(ref_pos).is_some();
                        for key in table_keys(covariates, &values, &record.read_group_id) {
                            out.push((key, Counts::observed(mismatch)));
                        }
                    }
                    ref_pos += 1;
                    read_pos += 1;
                }
            }
            CigarOpKind::Deletion | CigarOpKind::Skip => ref_pos += op.len,
            CigarOpKind::Insertion | CigarOpKind::SoftClip => read_pos += op.len as usize,
            _ => {}
        }
    }
    Ok(out)
}

fn recalibrate_record(
    mut record: AlignmentRecord,
    table: &RecalibrationTable,
    min_base_quality: u8,
) -> AlignmentRecord {
    if record.quality_scores.is_empty() || record.quality_scores.len() != record.sequence.len() {
        return record;
    }

    let recalibrated: Vec<u8> = record
        .quality_scores
        .iter()
        .enumerate()
        .map(|(offset, &reported)| {
            if reported < min_base_quality {
                return reported;
            }
            let values = base_covariates(&record, offset);
            table
                .recalibrate(&values, &record.read_group_id)
                .unwrap_or(reported)
        })
        .collect();

    if record.original_quality_scores.is_empty() {
        record.original_quality_scores = Arc::clone(&record.quality_scores);
    }
    record.quality_scores = Arc::from(recalibrated);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::ExecutionContext;
    use crate::model::{parse_cigar, Flags};

    fn ctx() -> ExecutionContext {
        ExecutionContext::with_threads(4, 2).unwrap()
    }

    fn read(name: &str, pos: u32, md: &str, qual: u8) -> AlignmentRecord {
        AlignmentRecord::builder(name)
            .mapped("chr1", pos)
            .cigar(parse_cigar("10M").unwrap())
            .sequence(b"ACGTACGTAC".to_vec())
            .qualities(vec![qual; 10])
            .read_group("rg1")
            .md(md)
            .build()
    }

    #[test]
    fn observe_skips_low_quality_n_and_known_sites() {
        let mut record = read("r", 100, "2T7", 30);
        let mut quals = vec![30u8; 10];
        quals[5] = 2;
        record.quality_scores = Arc::from(quals);
        let mut seq = record.sequence.to_vec();
        seq[6] = b'N';
        record.sequence = Arc::from(seq);

        let covariates = CovariateSet::of(&[CovariateKind::QualityScore]);
        let sites = KnownSites::from_intervals(vec![("chr1", 107, 108)]);
        let observed = observe(&record, &covariates, 6, Some(&sites)).unwrap();
        // 10 bases minus low quality, N and the known site
        assert_eq!(observed.len(), 7);
        assert_eq!(observed.iter().filter(|(_, c)| c.mismatches == 1).count(), 1);
    }

    #[test]
    fn malformed_md_names_the_read() {
        let record = read("bad", 0, "20", 30);
        let err = observe(&record, &CovariateSet::of(&CovariateKind::ALL), 6, None).unwrap_err();
        match err {
            FrameworkError::Transform { record, .. } => assert_eq!(record.as_deref(), Some("bad")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn table_excludes_duplicates_and_apply_saves_originals() {
        let context = ctx();
        let mut records: Vec<AlignmentRecord> = (0..40)
            .map(|i| read(&format!("r{}", i), i * 3, "10", 30))
            .collect();
        let mut dup = read("dup", 0, "0T9", 30);
        dup.flags = dup.flags.with(Flags::DUPLICATE, true);
        records.push(dup);
        let input = Collection::from_vec(&context, records);

        let recalibrator = Recalibrator::new(&[CovariateKind::QualityScore]).with_min_observations(1);
        let table = recalibrator.build_table(&input).unwrap();
        let key = TableKey {
            level: 0,
            key: CovariateKey {
                read_group: Some(Arc::from("rg1")),
                quality: Some(30),
                cycle: None,
                context: None,
            },
        };
        assert_eq!(
            table.counts(&key),
            Some(Counts {
                observations: 400,
                mismatches: 0
            })
        );

        let out = recalibrator
            .apply(&input, context.broadcast(table))
            .collect()
            .unwrap();
        let expected = Counts {
            observations: 400,
            mismatches: 0,
        }
        .empirical_quality();
        for record in &out {
            assert_eq!(record.original_quality_scores.as_ref(), &[30u8; 10][..]);
            assert!(record.quality_scores.iter().all(|&q| q == expected));
        }
    }
}
