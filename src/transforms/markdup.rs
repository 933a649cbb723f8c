//! Duplicate marking.
//!
//! Reads sharing a [`ReadPairKey`] came from the same original molecule.
//! Every key group keeps exactly one fragment (the best scoring, ties broken
//! by the smallest read name) and flags the others as duplicates. Scores are
//! computed per fragment (all primary reads sharing a read group and read
//! name) so both mates of a pair make the same choice in their own groups.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::framework::{Collection, FrameworkError};
use crate::model::{AlignmentRecord, Flags, Strand};

/// Default minimum base quality counted by [`DuplicatePolicy::QualitySum`].
pub const DEFAULT_DUPLICATE_MIN_BASE_QUALITY: u8 = 15;

/// How the representative of a duplicate group is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Highest sum of base qualities at or above the threshold.
    #[default]
    QualitySum,
    /// Lexicographically smallest read name.
    FirstByName,
}

/// Mate placement part of a [`ReadPairKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MateKey {
    /// Mate reference contig.
    pub reference_name: Option<Arc<str>>,
    /// Mate 5′ position (unclipped when the mate is present).
    pub five_prime: i64,
    /// Mate strand.
    pub strand: Strand,
}

/// Identity of a read's original molecule placement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadPairKey {
    /// Read group; duplicates never span read groups.
    pub read_group_id: Option<Arc<str>>,
    /// Reference contig.
    pub reference_name: Option<Arc<str>>,
    /// Unclipped 5′ position.
    pub five_prime: i64,
    /// Alignment strand.
    pub strand: Strand,
    /// Mate part; absent for unpaired reads and reads with unmapped mates.
    pub mate: Option<MateKey>,
}

impl ReadPairKey {
    /// Key of `record`, taking the mate's placement from `mate` when it is
    /// available and from the record's mate fields otherwise.
    ///
    /// Returns `None` for reads that are not mapped.
    pub fn for_read(record: &AlignmentRecord, mate: Option<&AlignmentRecord>) -> Option<Self> {
        let five_prime = record.five_prime_position()?;
        let mate = if !record.flags.is_paired() || record.flags.is_mate_unmapped() {
            None
        } else {
            match mate.filter(|m| m.is_mapped()) {
                Some(m) => Some(MateKey {
                    reference_name: m.reference_name.clone(),
                    five_prime: m.five_prime_position()?,
                    strand: m.strand(),
                }),
                None => record.mate_position.map(|pos| MateKey {
                    reference_name: record.mate_reference_name.clone(),
                    five_prime: i64::from(pos),
                    strand: if record.flags.is_mate_reverse() {
                        Strand::Reverse
                    } else {
                        Strand::Forward
                    },
                }),
            }
        };

        Some(Self {
            read_group_id: record.read_group_id.clone(),
            reference_name: record.reference_name.clone(),
            five_prime,
            strand: record.strand(),
            mate,
        })
    }
}

/// Counters describing one duplicate-marking pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateMetrics {
    /// Mapped primary reads considered.
    pub examined: u64,
    /// Reads flagged as duplicates.
    pub duplicates: u64,
    /// Reads passed through untouched (unmapped, secondary, supplementary).
    pub skipped: u64,
    /// Distinct read-pair keys among the examined reads.
    pub groups: u64,
}

impl DuplicateMetrics {
    /// Count a marked collection.
    ///
    /// Key groups are recounted with the same fragment keying the marker
    /// uses, which costs one more shuffle.
    pub fn collect(collection: &Collection<AlignmentRecord>) -> Result<Self, FrameworkError> {
        let mut metrics = collection.aggregate(
            Self::default(),
            |mut acc, record| {
                if is_eligible(record) {
                    acc.examined += 1;
                    if record.flags.is_duplicate() {
                        acc.duplicates += 1;
                    }
                } else {
                    acc.skipped += 1;
                }
                acc
            },
            |a, b| Self {
                examined: a.examined + b.examined,
                duplicates: a.duplicates + b.duplicates,
                skipped: a.skipped + b.skipped,
                groups: 0,
            },
        )?;
        metrics.groups = keyed_fragments(collection, DuplicatePolicy::FirstByName, 0)
            .map(|(key, _)| key)
            .group_by_key(|key| key.clone())
            .count()? as u64;
        Ok(metrics)
    }

    /// Fraction of examined reads marked as duplicates.
    pub fn duplicate_fraction(&self) -> f64 {
        if self.examined == 0 {
            0.0
        } else {
            self.duplicates as f64 / self.examined as f64
        }
    }
}

/// Duplicate-marking stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateMarker {
    policy: DuplicatePolicy,
    min_base_quality: u8,
}

impl Default for DuplicateMarker {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}

#[derive(Clone)]
struct Scored {
    score: u64,
    record: AlignmentRecord,
}

impl DuplicateMarker {
    /// Marker using `policy` and the default quality threshold.
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            min_base_quality: DEFAULT_DUPLICATE_MIN_BASE_QUALITY,
        }
    }

    /// Override the minimum base quality counted by the quality-sum policy.
    pub fn with_min_base_quality(mut self, min_base_quality: u8) -> Self {
        self.min_base_quality = min_base_quality;
        self
    }

    /// Selection policy.
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Mark duplicates in `input`.
    ///
    /// Existing duplicate flags on eligible reads are discarded first, so the
    /// stage is idempotent. Ineligible reads pass through unchanged. The
    /// output is not ordered.
    pub fn mark(&self, input: &Collection<AlignmentRecord>) -> Collection<AlignmentRecord> {
        let policy = self.policy;
        let min_q = self.min_base_quality;

        let passthrough = input.filter(|r| !is_eligible(r));
        let marked = keyed_fragments(input, policy, min_q)
            .group_by_key(|(key, _)| key.clone())
            .flat_map(|(_, members)| resolve_group(members));

        info!(policy = ?policy, "duplicate marking planned");
        marked.union(&passthrough)
    }
}

/// Mapped primary reads take part in duplicate marking.
pub fn is_eligible(record: &AlignmentRecord) -> bool {
    record.is_mapped() && record.flags.is_primary()
}

/// Eligible reads with their duplicate flag cleared, keyed and scored per fragment.
fn keyed_fragments(
    input: &Collection<AlignmentRecord>,
    policy: DuplicatePolicy,
    min_base_quality: u8,
) -> Collection<(ReadPairKey, Scored)> {
    input
        .filter(is_eligible)
        .map(|mut record| {
            record.flags = record.flags.with(Flags::DUPLICATE, false);
            record
        })
        .group_by_key(|r| (r.read_group_id.clone(), Arc::clone(&r.read_name)))
        .flat_map(move |(_, fragment)| key_fragment(fragment, policy, min_base_quality))
}

fn key_fragment(
    fragment: Vec<AlignmentRecord>,
    policy: DuplicatePolicy,
    min_base_quality: u8,
) -> Vec<(ReadPairKey, Scored)> {
    let score = match policy {
        DuplicatePolicy::QualitySum => fragment
            .iter()
            .map(|r| r.quality_sum(min_base_quality))
            .sum(),
        DuplicatePolicy::FirstByName => 0,
    };

    let mut out = Vec::with_capacity(fragment.len());
    for (idx, record) in fragment.iter().enumerate() {
        let mate = find_mate(&fragment, idx);
        if let Some(key) = ReadPairKey::for_read(record, mate) {
            out.push((
                key,
                Scored {
                    score,
                    record: record.clone(),
                },
            ));
        }
    }
    out
}

/// The other end of a pair inside a fragment, if it is unambiguous.
fn find_mate(fragment: &[AlignmentRecord], idx: usize) -> Option<&AlignmentRecord> {
    let record = &fragment[idx];
    let mut candidates = fragment.iter().enumerate().filter(|(other, r)| {
        *other != idx
            && (r.flags.is_first_of_pair() != record.flags.is_first_of_pair()
                || r.flags.is_second_of_pair() != record.flags.is_second_of_pair())
    });
    match (candidates.next(), candidates.next()) {
        (Some((_, mate)), None) => Some(mate),
        _ => None,
    }
}

fn better(a: &Scored, b: &Scored) -> Ordering {
    a.score
        .cmp(&b.score)
        .then_with(|| b.record.read_name.cmp(&a.record.read_name))
}

fn resolve_group(members: Vec<(ReadPairKey, Scored)>) -> Vec<AlignmentRecord> {
    let Some(best) = members.iter().map(|(_, s)| s).max_by(|a, b| better(a, b)) else {
        return Vec::new();
    };
    let keep = Arc::clone(&best.record.read_name);

    members
        .into_iter()
        .map(|(_, scored)| {
            let mut record = scored.record;
            let duplicate = record.read_name != keep;
            record.flags = record.flags.with(Flags::DUPLICATE, duplicate);
            record
        })
        .collect()
}
