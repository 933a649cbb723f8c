//! Local realignment around indels.
//!
//! Reads near an indel are often aligned with mismatches instead of the gap.
//! For each [`RealignmentTarget`] the reads overlapping it are gathered
//! (across partitions, via `group_by_key`), the reference is rebuilt from
//! their MD tags, every single-indel read proposes an alternate haplotype
//! ([`Consensus`]) and the haplotype explaining the reads with the lowest
//! mismatch quality wins. Reads are only moved when the winning haplotype
//! beats the reference by the configured LOD and the move does not lose
//! matched bases.

mod consensus;
mod targets;

pub use consensus::{candidates, single_indel, Consensus, HaplotypeOrigin, Indel, ReferenceWindow};
pub use targets::{find_targets, is_realignable, RealignmentTarget, TargetSet};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::framework::{Broadcast, Collection, FrameworkError};
use crate::model::{
    compute_md, normalize, AlignmentRecord, CigarOp, CigarOpKind, MdTag, MAPQ_UNAVAILABLE,
};

/// Mapping quality ceiling after a realignment bonus.
pub const MAX_REALIGNED_MAPQ: u8 = 254;

/// Mapping quality added to moved reads.
pub const REALIGNED_MAPQ_BONUS: u8 = 10;

/// Realignment tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealignmentOptions {
    /// Minimum `(original − consensus) / 10` mismatch-quality improvement.
    pub lod_threshold: f64,
    /// Widest merged target realigned.
    pub max_target_size: u32,
    /// MD mismatches that make a read nominate its mismatch span; 0 disables.
    pub mismatch_threshold: usize,
    /// Targets with more reads are left unchanged.
    pub max_reads_per_target: usize,
}

impl Default for RealignmentOptions {
    fn default() -> Self {
        Self {
            lod_threshold: 5.0,
            max_target_size: 250,
            mismatch_threshold: 3,
            max_reads_per_target: 20_000,
        }
    }
}

/// Realignment stage.
#[derive(Debug, Clone, Default)]
pub struct IndelRealigner {
    options: RealignmentOptions,
}

impl IndelRealigner {
    /// Realigner with `options`.
    pub fn new(options: RealignmentOptions) -> Self {
        Self { options }
    }

    /// Options in use.
    pub fn options(&self) -> &RealignmentOptions {
        &self.options
    }

    /// Find targets over coordinate-sorted `input`.
    pub fn targets(&self, input: &Collection<AlignmentRecord>) -> Result<TargetSet, FrameworkError> {
        find_targets(input, &self.options)
    }

    /// Realign reads overlapping `targets`; all other reads pass through.
    ///
    /// Groups inherit the order of `input`, so a coordinate-sorted input gives
    /// deterministic results.
    pub fn realign(
        &self,
        input: &Collection<AlignmentRecord>,
        targets: Broadcast<TargetSet>,
    ) -> Collection<AlignmentRecord> {
        let options = self.options.clone();
        let lookup = targets.clone();

        let passthrough = {
            let targets = targets.clone();
            input.filter(move |r| targets.target_of(r).is_none())
        };
        let realigned = input
            .flat_map(move |r| lookup.target_of(&r).map(|idx| (idx, r)))
            .group_by_key(|(idx, _)| *idx)
            .flat_map(move |(idx, members)| {
                let reads: Vec<AlignmentRecord> = members.into_iter().map(|(_, r)| r).collect();
                match targets.get(idx) {
                    Some(target) => realign_target(target, reads, &options).reads,
                    None => reads,
                }
            });
        realigned.union(&passthrough)
    }
}

/// Outcome of realigning one target.
#[derive(Debug, Clone)]
pub struct TargetOutcome {
    /// Reads of the target, realigned where accepted.
    pub reads: Vec<AlignmentRecord>,
    /// Reads that were moved.
    pub realigned: usize,
}

struct Scored<'a> {
    record: &'a AlignmentRecord,
    md: MdTag,
    original: u64,
}

/// Reference bases between the leftmost and rightmost aligned positions.
fn window_span(reads: &[(&AlignmentRecord, &MdTag)]) -> u64 {
    let start = reads.iter().map(|(_, md)| md.start()).min();
    let end = reads.iter().map(|(_, md)| md.end()).max();
    match (start, end) {
        (Some(s), Some(e)) => u64::from(e.saturating_sub(s)),
        _ => 0,
    }
}

/// Widest reference window rebuilt for `target`: the target plus room for
/// the longest read and a target-sized indel on either side. Spliced reads
/// with long skips exceed it.
fn window_limit(
    target: &RealignmentTarget,
    reads: &[(&AlignmentRecord, &MdTag)],
    options: &RealignmentOptions,
) -> u64 {
    let longest = reads.iter().map(|(r, _)| r.len()).max().unwrap_or(0) as u64;
    u64::from(target.width()) + 2 * (u64::from(options.max_target_size) + longest)
}

/// Realign the reads of one target.
pub fn realign_target(
    target: &RealignmentTarget,
    mut reads: Vec<AlignmentRecord>,
    options: &RealignmentOptions,
) -> TargetOutcome {
    let unchanged = |reads: Vec<AlignmentRecord>| TargetOutcome {
        reads,
        realigned: 0,
    };
    if reads.len() > options.max_reads_per_target {
        warn!(%target, reads = reads.len(), "too many reads, target skipped");
        return unchanged(reads);
    }
    reads.sort_by(|a, b| {
        (a.reference_position, &a.read_name, a.flags.bits())
            .cmp(&(b.reference_position, &b.read_name, b.flags.bits()))
    });

    let scored: Vec<Scored<'_>> = reads
        .iter()
        .filter_map(|record| match record.md_tag() {
            Ok(Some(md)) => Some(Scored {
                original: mismatch_quality(record, &md),
                record,
                md,
            }),
            _ => None,
        })
        .collect();
    let pairs: Vec<(&AlignmentRecord, &MdTag)> = scored.iter().map(|s| (s.record, &s.md)).collect();
    let width = window_span(&pairs);
    let limit = window_limit(target, &pairs, options);
    if width > limit {
        warn!(%target, width, limit, "reference window too wide, target left unchanged");
        return unchanged(reads);
    }
    let Some(window) = ReferenceWindow::reconstruct(&pairs) else {
        warn!(%target, "no usable MD tags, target left unchanged");
        return unchanged(reads);
    };

    let consensuses = candidates(&window, scored.iter().map(|s| s.record));
    if consensuses.is_empty() {
        return unchanged(reads);
    }

    let original_total: u64 = scored.iter().map(|s| s.original).sum();
    let mut best: Option<(u64, usize, Vec<Option<(usize, u64)>>)> = None;
    for (idx, consensus) in consensuses.iter().enumerate() {
        let placements: Vec<Option<(usize, u64)>> = scored
            .iter()
            .map(|s| best_placement(s.record, &consensus.haplotype))
            .collect();
        let total: u64 = scored
            .iter()
            .zip(&placements)
            .map(|(s, p)| p.map_or(s.original, |(_, score)| score.min(s.original)))
            .sum();
        if best.as_ref().map_or(true, |(best_total, _, _)| total < *best_total) {
            best = Some((total, idx, placements));
        }
    }
    let Some((best_total, best_idx, placements)) = best else {
        return unchanged(reads);
    };

    let improvement = original_total.saturating_sub(best_total) as f64 / 10.0;
    if best_total >= original_total || improvement < options.lod_threshold {
        debug!(%target, improvement, "consensus rejected");
        return unchanged(reads);
    }
    let consensus = &consensuses[best_idx];

    let mut replacements: Vec<(Arc<str>, u16, AlignmentRecord)> = Vec::new();
    for (s, placement) in scored.iter().zip(&placements) {
        let Some((offset, score)) = *placement else {
            continue;
        };
        if score >= s.original {
            continue;
        }
        if let Some(moved) = place_read(s.record, &s.md, consensus, &window, offset) {
            replacements.push((Arc::clone(&s.record.read_name), s.record.flags.bits(), moved));
        }
    }

    let realigned = replacements.len();
    let reads = reads
        .into_iter()
        .map(|record| {
            replacements
                .iter()
                .position(|(name, flags, _)| *name == record.read_name && *flags == record.flags.bits())
                .map(|i| replacements[i].2.clone())
                .unwrap_or(record)
        })
        .collect();
    debug!(%target, realigned, improvement, "target realigned");
    TargetOutcome { reads, realigned }
}

/// Soft clips at the start and end of the read.
fn clip_bounds(record: &AlignmentRecord) -> (usize, usize) {
    let leading: usize = record
        .cigar
        .iter()
        .take_while(|op| op.kind.is_clip())
        .filter(|op| op.kind == CigarOpKind::SoftClip)
        .map(|op| op.len as usize)
        .sum();
    let trailing: usize = record
        .cigar
        .iter()
        .rev()
        .take_while(|op| op.kind.is_clip())
        .filter(|op| op.kind == CigarOpKind::SoftClip)
        .map(|op| op.len as usize)
        .sum();
    (leading, trailing)
}

/// Sum of qualities of aligned bases the MD tag marks as mismatches.
pub fn mismatch_quality(record: &AlignmentRecord, md: &MdTag) -> u64 {
    walk_aligned(record, md.start())
        .filter(|&(read_pos, ref_pos)| md.mismatch_at(ref_pos).is_some() && read_pos < record.len())
        .map(|(read_pos, _)| u64::from(record.quality_at(read_pos).unwrap_or(0)))
        .sum()
}

/// Aligned bases whose read base equals the reference base.
fn matched_bases(record: &AlignmentRecord, md: &MdTag) -> usize {
    walk_aligned(record, md.start())
        .filter(|&(_, ref_pos)| md.is_match(ref_pos))
        .count()
}

fn walk_aligned(record: &AlignmentRecord, start: u32) -> impl Iterator<Item = (usize, u32)> + '_ {
    let mut pairs = Vec::new();
    let mut ref_pos = start;
    let mut read_pos = 0usize;
    for op in &record.cigar {
        if op.kind.is_aligned() {
            for i in 0..op.len {
                pairs.push((read_pos + i as usize, ref_pos + i));
            }
        }
        if op.kind.consumes_reference() {
            ref_pos += op.len;
        }
        if op.kind.consumes_read() {
            read_pos += op.len as usize;
        }
    }
    pairs.into_iter()
}

/// Lowest mismatch quality of the read's unclipped bases over every ungapped
/// offset of `haplotype`; ties keep the leftmost offset.
fn best_placement(record: &AlignmentRecord, haplotype: &[u8]) -> Option<(usize, u64)> {
    let (leading, trailing) = clip_bounds(record);
    let end = record.len().checked_sub(trailing)?;
    if leading >= end {
        return None;
    }
    let bases = &record.sequence[leading..end];
    if bases.len() > haplotype.len() {
        return None;
    }

    let mut best: Option<(usize, u64)> = None;
    for offset in 0..=(haplotype.len() - bases.len()) {
        let mut score = 0u64;
        for (i, &base) in bases.iter().enumerate() {
            if !base.eq_ignore_ascii_case(&haplotype[offset + i]) {
                score += u64::from(record.quality_at(leading + i).unwrap_or(0));
            }
            if best.is_some_and(|(_, b)| score >= b) {
                break;
            }
        }
        if best.map_or(true, |(_, b)| score < b) {
            best = Some((offset, score));
        }
    }
    best
}

/// Rebuild a read's alignment at haplotype `offset`.
///
/// Returns `None` when the new alignment would match fewer bases than the
/// current one or cannot be expressed.
fn place_read(
    record: &AlignmentRecord,
    md: &MdTag,
    consensus: &Consensus,
    window: &ReferenceWindow,
    offset: usize,
) -> Option<AlignmentRecord> {
    let (leading, trailing) = clip_bounds(record);
    let aligned_len = record.len().checked_sub(leading + trailing)?;

    let mut ops: Vec<CigarOp> = Vec::new();
    let mut push = |kind: CigarOpKind, len: u32| {
        if len == 0 {
            return;
        }
        match ops.last_mut() {
            Some(last) if last.kind == kind => last.len += len,
            _ => ops.push(CigarOp::new(kind, len)),
        }
    };

    // Leading clips as they were.
    for op in record.cigar.iter().take_while(|op| op.kind.is_clip()) {
        push(op.kind, op.len);
    }

    let mut start: Option<u32> = None;
    let mut last_ref: Option<u32> = None;
    let mut pending_clip = 0u32;
    for i in 0..aligned_len {
        match consensus.origin(window.start(), offset + i) {
            HaplotypeOrigin::Inserted => {
                if start.is_none() {
                    pending_clip += 1;
                } else {
                    push(CigarOpKind::Insertion, 1);
                }
            }
            HaplotypeOrigin::Reference(pos) => {
                if start.is_none() {
                    push(CigarOpKind::SoftClip, pending_clip);
                    pending_clip = 0;
                    start = Some(pos);
                }
                if let Some(prev) = last_ref {
                    if pos > prev + 1 {
                        push(CigarOpKind::Deletion, pos - prev - 1);
                    }
                }
                push(CigarOpKind::Match, 1);
                last_ref = Some(pos);
            }
        }
    }
    let start = start?;

    // Trailing insertion bases become clips.
    if let Some(last) = ops.last().copied() {
        if last.kind == CigarOpKind::Insertion {
            ops.pop();
            ops.push(CigarOp::new(CigarOpKind::SoftClip, last.len));
        }
    }
    let trailing_clips: Vec<CigarOp> = record
        .cigar
        .iter()
        .rev()
        .take_while(|op| op.kind.is_clip())
        .copied()
        .collect();
    ops.extend(trailing_clips.into_iter().rev());
    let cigar = normalize(ops);

    let new_md = compute_md(window.bases(), window.start(), &record.sequence, start, &cigar);
    let parsed = MdTag::parse(&new_md, start, &cigar).ok()?;

    let mut moved = record.clone();
    moved.reference_position = Some(start);
    moved.cigar = cigar;
    moved.mismatching_positions = Some(Arc::from(new_md));
    if matched_bases(&moved, &parsed) < matched_bases(record, md) {
        return None;
    }
    if record.mapping_quality != MAPQ_UNAVAILABLE {
        moved.mapping_quality = record
            .mapping_quality
            .saturating_add(REALIGNED_MAPQ_BONUS)
            .min(MAX_REALIGNED_MAPQ);
    }
    Some(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::ExecutionContext;
    use crate::model::{format_cigar, parse_cigar};

    // Reference around the target (position 0):
    // ACGTTGCA TT GACCTAGGCA
    const REFERENCE: &[u8] = b"ACGTTGCATTGACCTAGGCA";

    fn with_md(name: &str, pos: u32, cigar: &str, seq: &[u8]) -> AlignmentRecord {
        let ops = parse_cigar(cigar).unwrap();
        let md = compute_md(REFERENCE, 0, seq, pos, &ops);
        AlignmentRecord::builder(name)
            .mapped("chr1", pos)
            .cigar(ops)
            .sequence(seq.to_vec())
            .qualities(vec![30; seq.len()])
            .md(md)
            .mapping_quality(40)
            .build()
    }

    /// Haplotype with `TT` at 8..10 deleted.
    fn alt() -> Vec<u8> {
        let mut h = REFERENCE[..8].to_vec();
        h.extend_from_slice(&REFERENCE[10..]);
        h
    }

    fn scenario() -> Vec<AlignmentRecord> {
        let hap = alt();
        // Two reads carry the deletion explicitly.
        let mut reads = vec![
            with_md("gapped1", 0, "8M2D10M", &hap[..18]),
            with_md("gapped2", 0, "8M2D10M", &hap[..18]),
        ];
        // Reads spanning the deletion aligned without a gap mismatch heavily.
        for (i, start) in [2usize, 3, 4].into_iter().enumerate() {
            let seq = &hap[start..start + 12];
            reads.push(with_md(&format!("ungapped{}", i), start as u32, "12M", seq));
        }
        reads
    }

    fn target() -> RealignmentTarget {
        RealignmentTarget {
            reference_name: Arc::from("chr1"),
            start: 8,
            end: 10,
        }
    }

    #[test]
    fn spliced_read_with_a_long_skip_leaves_the_target_alone() {
        let mut reads = scenario();
        reads.push(
            AlignmentRecord::builder("spliced")
                .mapped("chr1", 2)
                .cigar(parse_cigar("4M1000000N4M").unwrap())
                .sequence(b"GTTGACCT".to_vec())
                .qualities(vec![30; 8])
                .md("8")
                .mapping_quality(40)
                .build(),
        );
        let outcome = realign_target(&target(), reads.clone(), &RealignmentOptions::default());
        assert_eq!(outcome.realigned, 0);
        assert_eq!(outcome.reads.len(), reads.len());
        for read in &outcome.reads {
            let original = reads.iter().find(|r| r.read_name == read.read_name).unwrap();
            assert_eq!(read.cigar, original.cigar);
            assert_eq!(read.reference_position, original.reference_position);
        }
    }

    #[test]
    fn ungapped_reads_move_onto_the_deletion() {
        let reads = scenario();
        let before: Vec<usize> = reads
            .iter()
            .map(|r| matched_bases(r, &r.md_tag().unwrap().unwrap()))
            .collect();
        let outcome = realign_target(&target(), reads.clone(), &RealignmentOptions::default());
        assert_eq!(outcome.realigned, 3);

        for read in &outcome.reads {
            let md = read.md_tag().unwrap().unwrap();
            assert_eq!(md.mismatch_count(), 0, "{} {}", read.read_name, format_cigar(&read.cigar));
            if read.read_name.starts_with("ungapped") {
                assert!(format_cigar(&read.cigar).contains("2D"));
                assert_eq!(read.mapping_quality, 50);
            } else {
                assert_eq!(read.mapping_quality, 40);
            }
        }
        let original: Vec<&AlignmentRecord> = reads.iter().collect();
        for read in &outcome.reads {
            let idx = original
                .iter()
                .position(|r| r.read_name == read.read_name)
                .unwrap();
            let after = matched_bases(read, &read.md_tag().unwrap().unwrap());
            assert!(after >= before[idx]);
        }
    }

    #[test]
    fn high_lod_threshold_leaves_reads() {
        let reads = scenario();
        let options = RealignmentOptions {
            lod_threshold: 1_000.0,
            ..RealignmentOptions::default()
        };
        let outcome = realign_target(&target(), reads.clone(), &options);
        assert_eq!(outcome.realigned, 0);
        let mut expected = reads;
        expected.sort_by(|a, b| {
            (a.reference_position, &a.read_name).cmp(&(b.reference_position, &b.read_name))
        });
        assert_eq!(outcome.reads, expected);
    }

    #[test]
    fn reads_without_md_are_left_alone() {
        let mut reads = scenario();
        for read in &mut reads {
            read.mismatching_positions = None;
        }
        let outcome = realign_target(&target(), reads, &RealignmentOptions::default());
        assert_eq!(outcome.realigned, 0);
    }

    #[test]
    fn realign_collection_groups_across_partitions() {
        let ctx = ExecutionContext::with_threads(3, 2).unwrap();
        let mut reads = scenario();
        reads.push(
            AlignmentRecord::builder("far")
                .mapped("chr2", 5000)
                .cigar(parse_cigar("4M").unwrap())
                .sequence(b"ACGT".to_vec())
                .qualities(vec![30; 4])
                .build(),
        );
        let input = Collection::from_vec(&ctx, reads).sort_by(
            |r| (r.reference_name.clone(), r.reference_position),
            true,
        );
        let realigner = IndelRealigner::default();
        let targets = realigner.targets(&input).unwrap();
        assert_eq!(targets.len(), 1);
        let out = realigner
            .realign(&input, ctx.broadcast(targets))
            .collect()
            .unwrap();
        assert_eq!(out.len(), 6);
        let moved = out
            .iter()
            .filter(|r| r.read_name.starts_with("ungapped"))
            .filter(|r| format_cigar(&r.cigar).contains('D'))
            .count();
        assert_eq!(moved, 3);
    }
}
