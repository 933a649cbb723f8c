use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::AlignmentRecord;

/// Per-base feature recalibration can condition on.
///
/// The read group is always part of the key and is not listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovariateKind {
    /// Reported quality score.
    QualityScore,
    /// Machine cycle in sequencing direction; negative for the second read of a pair.
    Cycle,
    /// Previous and current base in sequencing direction.
    Context,
}

impl CovariateKind {
    /// Every covariate, in fallback order (the last is dropped first).
    pub const ALL: [CovariateKind; 3] = [
        CovariateKind::QualityScore,
        CovariateKind::Cycle,
        CovariateKind::Context,
    ];
}

/// Enabled covariates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CovariateSet {
    quality: bool,
    cycle: bool,
    context: bool,
}

impl CovariateSet {
    /// Set containing `kinds`.
    pub fn of(kinds: &[CovariateKind]) -> Self {
        Self {
            quality: kinds.contains(&CovariateKind::QualityScore),
            cycle: kinds.contains(&CovariateKind::Cycle),
            context: kinds.contains(&CovariateKind::Context),
        }
    }

    /// Whether `kind` is enabled.
    pub fn contains(&self, kind: CovariateKind) -> bool {
        match kind {
            CovariateKind::QualityScore => self.quality,
            CovariateKind::Cycle => self.cycle,
            CovariateKind::Context => self.context,
        }
    }

    /// Whether no covariate beyond the read group is enabled.
    pub fn is_empty(&self) -> bool {
        !(self.quality || self.cycle || self.context)
    }

    /// Lookup levels from finest to coarsest: the set itself, then without
    /// `Context`, then without `Cycle`.
    pub fn levels(&self) -> Vec<CovariateSet> {
        let mut levels = vec![*self];
        if self.context {
            levels.push(Self {
                context: false,
                ..*self
            });
        }
        if self.cycle {
            levels.push(Self {
                context: false,
                cycle: false,
                ..*self
            });
        }
        levels
    }

    /// Project full covariate values onto this set.
    pub fn key(&self, values: &BaseCovariates, read_group: &Option<Arc<str>>) -> CovariateKey {
        CovariateKey {
            read_group: read_group.clone(),
            quality: values.quality.filter(|_| self.quality),
            cycle: if self.cycle { Some(values.cycle) } else { None },
            context: if self.context { values.context } else { None },
        }
    }
}

/// Two-base sequencing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dinucleotide(pub [u8; 2]);

impl fmt::Display for Dinucleotide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.0[0] as char, self.0[1] as char)
    }
}

/// Covariate values observed for one base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseCovariates {
    /// Reported quality (absent when the read has no qualities).
    pub quality: Option<u8>,
    /// Signed 1-based machine cycle.
    pub cycle: i32,
    /// Sequencing context; absent at the first cycle or next to an `N`.
    pub context: Option<Dinucleotide>,
}

/// Bucket a base is counted in and looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CovariateKey {
    /// Read group.
    pub read_group: Option<Arc<str>>,
    /// Reported quality, when the quality covariate is in use.
    pub quality: Option<u8>,
    /// Cycle, when the cycle covariate is in use.
    pub cycle: Option<i32>,
    /// Context, when the context covariate is in use.
    pub context: Option<Dinucleotide>,
}

fn complement(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        _ => b'N',
    }
}

fn is_called(base: u8) -> bool {
    matches!(base, b'A' | b'C' | b'G' | b'T')
}

/// Covariates of the base at read `offset` (0-based, in stored orientation).
///
/// Reverse-strand reads are stored reverse complemented, so their first
/// sequenced base is the last stored one and contexts are complemented.
pub fn base_covariates(record: &AlignmentRecord, offset: usize) -> BaseCovariates {
    let len = record.sequence.len();
    let reverse = record.flags.is_reverse();

    let cycle_index = if reverse { len - offset } else { offset + 1 };
    let cycle = if record.flags.is_second_of_pair() {
        -(cycle_index as i32)
    } else {
        cycle_index as i32
    };

    let context = if cycle_index == 1 {
        None
    } else {
        let (previous, current) = if reverse {
            (
                complement(record.sequence[offset + 1]),
                complement(record.sequence[offset]),
            )
        } else {
            (
                record.sequence[offset - 1].to_ascii_uppercase(),
                record.sequence[offset].to_ascii_uppercase(),
            )
        };
        if is_called(previous) && is_called(current) {
            Some(Dinucleotide([previous, current]))
        } else {
            None
        }
    };

    BaseCovariates {
        quality: record.quality_scores.get(offset).copied(),
        cycle,
        context,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parse_cigar, Flags};

    fn read(seq: &[u8], flags: u16) -> AlignmentRecord {
        let mut record = AlignmentRecord::builder("r")
            .mapped("chr1", 0)
            .cigar(parse_cigar(&format!("{}M", seq.len())).unwrap())
            .sequence(seq.to_vec())
            .qualities(vec![30; seq.len()])
            .build();
        record.flags = Flags::from_bits(record.flags.bits() | flags);
        record
    }

    #[test]
    fn forward_read_cycles_and_context() {
        let record = read(b"ACGN", 0);
        let first = base_covariates(&record, 0);
        assert_eq!(first.cycle, 1);
        assert_eq!(first.context, None);
        let second = base_covariates(&record, 1);
        assert_eq!(second.cycle, 2);
        assert_eq!(second.context, Some(Dinucleotide(*b"AC")));
        assert_eq!(base_covariates(&record, 3).context, None);
    }

    #[test]
    fn reverse_second_read_is_negated_and_complemented() {
        let record = read(b"ACGT", Flags::REVERSE | Flags::PAIRED | Flags::SECOND_OF_PAIR);
        let last = base_covariates(&record, 3);
        assert_eq!(last.cycle, -1);
        assert_eq!(last.context, None);
        let offset_two = base_covariates(&record, 2);
        assert_eq!(offset_two.cycle, -2);
        // sequenced as complement(T) then complement(G)
        assert_eq!(offset_two.context, Some(Dinucleotide(*b"AC")));
    }

    #[test]
    fn levels_drop_context_then_cycle() {
        let all = CovariateSet::of(&CovariateKind::ALL);
        let levels = all.levels();
        assert_eq!(levels.len(), 3);
        assert!(levels[1].contains(CovariateKind::Cycle));
        assert!(!levels[1].contains(CovariateKind::Context));
        assert!(levels[2].contains(CovariateKind::QualityScore));
        assert!(!levels[2].contains(CovariateKind::Cycle));

        let quality_only = CovariateSet::of(&[CovariateKind::QualityScore]);
        assert_eq!(quality_only.levels(), vec![quality_only]);
        assert!(CovariateSet::of(&[]).is_empty());
    }
}
