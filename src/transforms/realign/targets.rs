use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::RealignmentOptions;
use crate::framework::{Collection, FrameworkError};
use crate::model::{AlignmentRecord, CigarOpKind};

/// Reference interval whose reads are realigned together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RealignmentTarget {
    /// Contig.
    pub reference_name: Arc<str>,
    /// First position (0-based, inclusive).
    pub start: u32,
    /// One past the last position.
    pub end: u32,
}

impl RealignmentTarget {
    /// Width in reference bases.
    pub fn width(&self) -> u32 {
        self.end - self.start
    }

    /// Whether `[start, end)` on `contig` overlaps the target.
    pub fn overlaps(&self, contig: &str, start: u32, end: u32) -> bool {
        self.reference_name.as_ref() == contig && start < self.end && self.start < end
    }
}

impl fmt::Display for RealignmentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.reference_name, self.start, self.end)
    }
}

/// Sorted, non-overlapping realignment targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet {
    targets: Vec<RealignmentTarget>,
}

impl TargetSet {
    /// Merge candidate spans into targets.
    ///
    /// Overlapping or abutting spans on the same contig are merged; merged
    /// targets wider than `max_target_size` are dropped.
    pub fn from_spans(mut spans: Vec<RealignmentTarget>, max_target_size: u32) -> Self {
        spans.sort();
        let mut merged: Vec<RealignmentTarget> = Vec::with_capacity(spans.len());
        for span in spans {
            match merged.last_mut() {
                Some(last) if last.reference_name == span.reference_name && span.start <= last.end => {
                    last.end = last.end.max(span.end);
                }
                _ => merged.push(span),
            }
        }

        let before = merged.len();
        merged.retain(|t| t.width() <= max_target_size);
        if merged.len() < before {
            debug!(
                dropped = before - merged.len(),
                max_target_size, "dropped oversized realignment targets"
            );
        }
        Self { targets: merged }
    }

    /// Targets in order.
    pub fn targets(&self) -> &[RealignmentTarget] {
        &self.targets
    }

    /// Target by index.
    pub fn get(&self, idx: usize) -> Option<&RealignmentTarget> {
        self.targets.get(idx)
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether there is nothing to realign.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Index of the first target overlapping `[start, end)` on `contig`.
    pub fn find(&self, contig: &str, start: u32, end: u32) -> Option<usize> {
        let idx = self.targets.partition_point(|t| {
            (t.reference_name.as_ref(), t.end) <= (contig, start)
        });
        self.targets
            .get(idx)
            .filter(|t| t.overlaps(contig, start, end))
            .map(|_| idx)
    }

    /// Index of the target a read belongs to, if any.
    pub fn target_of(&self, record: &AlignmentRecord) -> Option<usize> {
        if !is_realignable(record) {
            return None;
        }
        let contig = record.reference_name.as_deref()?;
        let start = record.reference_position?;
        let end = record.end()?;
        self.find(contig, start, end.max(start + 1))
    }
}

/// Reads that may be moved by realignment.
pub fn is_realignable(record: &AlignmentRecord) -> bool {
    record.is_mapped() && record.flags.is_primary() && !record.cigar.is_empty()
}

/// Spans a read nominates as realignment candidates.
fn candidate_spans(record: &AlignmentRecord, mismatch_threshold: usize) -> Vec<RealignmentTarget> {
    let (Some(contig), Some(start)) = (&record.reference_name, record.reference_position) else {
        return Vec::new();
    };
    if !is_realignable(record) {
        return Vec::new();
    }

    let span = |s: u32, e: u32| RealignmentTarget {
        reference_name: Arc::clone(contig),
        start: s,
        end: e,
    };

    let mut out = Vec::new();
    let mut ref_pos = start;
    for op in &record.cigar {
        match op.kind {
            CigarOpKind::Deletion => out.push(span(ref_pos, ref_pos + op.len)),
            CigarOpKind::Insertion => out.push(span(ref_pos.saturating_sub(1), ref_pos + 1)),
            _ => {}
        }
        if op.kind.consumes_reference() {
            ref_pos += op.len;
        }
    }

    if mismatch_threshold > 0 {
        match record.md_tag() {
            Ok(Some(md)) if md.mismatch_count() >= mismatch_threshold => {
                let mut positions = md.mismatch_positions();
                if let Some(first) = positions.next() {
                    let last = positions.last().unwrap_or(first);
                    out.push(span(first, last + 1));
                }
            }
            Ok(_) => {}
            Err(e) => warn!(read = %record.read_name, error = %e, "ignoring unusable MD tag"),
        }
    }
    out
}

/// Collect realignment targets over `input`.
///
/// Candidate spans are gathered per read, globally sorted, then merged in a
/// single ordered scan.
pub fn find_targets(
    input: &Collection<AlignmentRecord>,
    options: &RealignmentOptions,
) -> Result<TargetSet, FrameworkError> {
    let threshold = options.mismatch_threshold;
    let spans = input
        .flat_map(move |record| candidate_spans(&record, threshold))
        .sort_by(|span| span.clone(), true)
        .collect()?;
    let targets = TargetSet::from_spans(spans, options.max_target_size);
    debug!(targets = targets.len(), "realignment targets found");
    Ok(targets)
}
