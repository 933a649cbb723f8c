use std::fmt;

use serde::Serialize;

use crate::framework::{Collection, FrameworkError};
use crate::model::AlignmentRecord;

/// Flag counts over a collection, in the spirit of `samtools flagstat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlagStats {
    /// All records.
    pub total: u64,
    /// Primary records.
    pub primary: u64,
    /// Secondary alignments.
    pub secondary: u64,
    /// Supplementary alignments.
    pub supplementary: u64,
    /// Marked duplicates.
    pub duplicates: u64,
    /// Failed vendor QC.
    pub qc_failed: u64,
    /// Mapped records.
    pub mapped: u64,
    /// Paired records.
    pub paired: u64,
    /// Properly paired records.
    pub proper_pairs: u64,
    /// Mapped records whose mate is unmapped.
    pub singletons: u64,
    /// Records carrying an MD tag.
    pub with_md: u64,
    /// Records holding pre-recalibration qualities.
    pub recalibrated: u64,
}

impl FlagStats {
    /// Count `collection`.
    pub fn collect(collection: &Collection<AlignmentRecord>) -> Result<Self, FrameworkError> {
        collection.aggregate(
            Self::default(),
            |mut acc, record| {
                acc.add(record);
                acc
            },
            |a, b| a.merge(b),
        )
    }

    /// Count one record.
    pub fn add(&mut self, record: &AlignmentRecord) {
        let flags = record.flags;
        let bump = |counter: &mut u64, yes: bool| *counter += u64::from(yes);
        bump(&mut self.total, true);
        bump(&mut self.primary, flags.is_primary());
        bump(&mut self.secondary, flags.is_secondary());
        bump(&mut self.supplementary, flags.is_supplementary());
        bump(&mut self.duplicates, flags.is_duplicate());
        bump(&mut self.qc_failed, flags.is_qc_fail());
        bump(&mut self.mapped, record.is_mapped());
        bump(&mut self.paired, flags.is_paired());
        bump(&mut self.proper_pairs, flags.is_paired() && flags.is_proper_pair());
        bump(
            &mut self.singletons,
            flags.is_paired() && record.is_mapped() && flags.is_mate_unmapped(),
        );
        bump(&mut self.with_md, record.mismatching_positions.is_some());
        bump(&mut self.recalibrated, !record.original_quality_scores.is_empty());
    }

    /// Sum of two counts.
    pub fn merge(self, other: Self) -> Self {
        Self {
            total: self.total + other.total,
            primary: self.primary + other.primary,
            secondary: self.secondary + other.secondary,
            supplementary: self.supplementary + other.supplementary,
            duplicates: self.duplicates + other.duplicates,
            qc_failed: self.qc_failed + other.qc_failed,
            mapped: self.mapped + other.mapped,
            paired: self.paired + other.paired,
            proper_pairs: self.proper_pairs + other.proper_pairs,
            singletons: self.singletons + other.singletons,
            with_md: self.with_md + other.with_md,
            recalibrated: self.recalibrated + other.recalibrated,
        }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

impl fmt::Display for FlagStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} total", self.total)?;
        writeln!(f, "{} primary", self.primary)?;
        writeln!(f, "{} secondary", self.secondary)?;
        writeln!(f, "{} supplementary", self.supplementary)?;
        writeln!(
            f,
            "{} duplicates ({:.2}%)",
            self.duplicates,
            percent(self.duplicates, self.total)
        )?;
        writeln!(f, "{} QC failed", self.qc_failed)?;
        writeln!(
            f,
            "{} mapped ({:.2}%)",
            self.mapped,
            percent(self.mapped, self.total)
        )?;
        writeln!(f, "{} paired", self.paired)?;
        writeln!(f, "{} properly paired", self.proper_pairs)?;
        writeln!(f, "{} singletons", self.singletons)?;
        writeln!(f, "{} with MD tag", self.with_md)?;
        write!(f, "{} recalibrated", self.recalibrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::ExecutionContext;
    use crate::model::{parse_cigar, Flags};

    #[test]
    fn counts_match_flags() {
        let ctx = ExecutionContext::with_threads(3, 2).unwrap();
        let mapped = |name: &str| {
            AlignmentRecord::builder(name)
                .mapped("chr1", 1)
                .cigar(parse_cigar("2M").unwrap())
                .sequence(b"AC".to_vec())
        };
        let records = vec![
            mapped("a").flag(Flags::DUPLICATE, true).md("2").build(),
            mapped("b")
                .mate("chr1", 50)
                .flag(Flags::PROPER_PAIR, true)
                .build(),
            mapped("c").flag(Flags::SECONDARY, true).build(),
            mapped("d")
                .flag(Flags::PAIRED, true)
                .flag(Flags::MATE_UNMAPPED, true)
                .build(),
            AlignmentRecord::builder("e").unmapped().build(),
        ];
        let stats = FlagStats::collect(&Collection::from_vec(&ctx, records)).unwrap();
        assert_eq!(stats.total, 5);
        assert_eq!(stats.primary, 4);
        assert_eq!(stats.secondary, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.mapped, 4);
        assert_eq!(stats.paired, 2);
        assert_eq!(stats.proper_pairs, 1);
        assert_eq!(stats.singletons, 1);
        assert_eq!(stats.with_md, 1);
        assert!(stats.to_string().starts_with("5 total\n"));
    }
}
