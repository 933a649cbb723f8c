use std::fmt;
use std::sync::Arc;

use super::cigar::{leading_clip, read_length, reference_length, trailing_clip};
use super::{CigarOp, MdTag, ModelError};

/// Mapping quality value meaning "unavailable".
pub const MAPQ_UNAVAILABLE: u8 = 255;

/// SAM-style alignment flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u16);

impl Flags {
    /// Template has multiple segments.
    pub const PAIRED: u16 = 0x1;
    /// Each segment properly aligned.
    pub const PROPER_PAIR: u16 = 0x2;
    /// Segment unmapped.
    pub const UNMAPPED: u16 = 0x4;
    /// Next segment unmapped.
    pub const MATE_UNMAPPED: u16 = 0x8;
    /// Sequence reverse complemented.
    pub const REVERSE: u16 = 0x10;
    /// Next segment reverse complemented.
    pub const MATE_REVERSE: u16 = 0x20;
    /// First segment in the template.
    pub const FIRST_OF_PAIR: u16 = 0x40;
    /// Last segment in the template.
    pub const SECOND_OF_PAIR: u16 = 0x80;
    /// Secondary alignment.
    pub const SECONDARY: u16 = 0x100;
    /// Failed platform/vendor quality checks.
    pub const QC_FAIL: u16 = 0x200;
    /// PCR or optical duplicate.
    pub const DUPLICATE: u16 = 0x400;
    /// Supplementary alignment.
    pub const SUPPLEMENTARY: u16 = 0x800;

    /// Wrap raw flag bits.
    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw flag bits.
    pub fn bits(self) -> u16 {
        self.0
    }

    /// Whether every bit of `mask` is set.
    pub fn contains(self, mask: u16) -> bool {
        self.0 & mask == mask
    }

    /// Copy with `mask` set or cleared.
    pub fn with(self, mask: u16, value: bool) -> Self {
        if value {
            Self(self.0 | mask)
        } else {
            Self(self.0 & !mask)
        }
    }

    /// Paired-end read.
    pub fn is_paired(self) -> bool {
        self.contains(Self::PAIRED)
    }

    /// Both mates aligned in the expected orientation.
    pub fn is_proper_pair(self) -> bool {
        self.contains(Self::PROPER_PAIR)
    }

    /// Read is unmapped.
    pub fn is_unmapped(self) -> bool {
        self.contains(Self::UNMAPPED)
    }

    /// Mate is unmapped.
    pub fn is_mate_unmapped(self) -> bool {
        self.contains(Self::MATE_UNMAPPED)
    }

    /// Read aligned to the reverse strand.
    pub fn is_reverse(self) -> bool {
        self.contains(Self::REVERSE)
    }

    /// Mate aligned to the reverse strand.
    pub fn is_mate_reverse(self) -> bool {
        self.contains(Self::MATE_REVERSE)
    }

    /// First read of the pair.
    pub fn is_first_of_pair(self) -> bool {
        self.contains(Self::FIRST_OF_PAIR)
    }

    /// Second read of the pair.
    pub fn is_second_of_pair(self) -> bool {
        self.contains(Self::SECOND_OF_PAIR)
    }

    /// Secondary alignment.
    pub fn is_secondary(self) -> bool {
        self.contains(Self::SECONDARY)
    }

    /// Supplementary alignment.
    pub fn is_supplementary(self) -> bool {
        self.contains(Self::SUPPLEMENTARY)
    }

    /// Failed vendor quality checks.
    pub fn is_qc_fail(self) -> bool {
        self.contains(Self::QC_FAIL)
    }

    /// Marked as a duplicate.
    pub fn is_duplicate(self) -> bool {
        self.contains(Self::DUPLICATE)
    }

    /// Neither secondary nor supplementary.
    pub fn is_primary(self) -> bool {
        !self.is_secondary() && !self.is_supplementary()
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({:#06x})", self.0)
    }
}

/// Strand of an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strand {
    /// Forward strand.
    Forward,
    /// Reverse strand.
    Reverse,
}

/// One sequenced read aligned (or not) to a reference.
///
/// Cloning is cheap: names and per-base arrays are reference counted, and
/// stages produce new records by replacing whole fields.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRecord {
    /// Template name shared by mates; stable identifier for tie-breaks.
    pub read_name: Arc<str>,
    /// Read sequence stored as uppercase ASCII.
    pub sequence: Arc<[u8]>,
    /// Per-base quality scores in Phred space (empty when unavailable).
    pub quality_scores: Arc<[u8]>,
    /// Reference contig/chromosome name.
    pub reference_name: Option<Arc<str>>,
    /// 0-based leftmost aligned reference coordinate.
    pub reference_position: Option<u32>,
    /// CIGAR describing the alignment.
    pub cigar: Vec<CigarOp>,
    /// Read group the read was sequenced in.
    pub read_group_id: Option<Arc<str>>,
    /// Mapping quality (Phred-scaled, 255 when unavailable).
    pub mapping_quality: u8,
    /// SAM flags.
    pub flags: Flags,
    /// Reference contig of the mate.
    pub mate_reference_name: Option<Arc<str>>,
    /// 0-based leftmost position of the mate.
    pub mate_position: Option<u32>,
    /// MD tag describing reference bases at mismatches and deletions.
    pub mismatching_positions: Option<Arc<str>>,
    /// Qualities reported before recalibration (empty when never recalibrated).
    pub original_quality_scores: Arc<[u8]>,
}

impl Default for AlignmentRecord {
    fn default() -> Self {
        Self {
            read_name: Arc::from(""),
            sequence: Arc::from(Vec::new()),
            quality_scores: Arc::from(Vec::new()),
            reference_name: None,
            reference_position: None,
            cigar: Vec::new(),
            read_group_id: None,
            mapping_quality: 0,
            flags: Flags::default(),
            mate_reference_name: None,
            mate_position: None,
            mismatching_positions: None,
            original_quality_scores: Arc::from(Vec::new()),
        }
    }
}

impl AlignmentRecord {
    /// Start building a mapped record.
    pub fn builder(read_name: impl Into<Arc<str>>) -> RecordBuilder {
        RecordBuilder::new(read_name)
    }

    /// Read length inferred from the sequence.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Whether the read carries no bases.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Mapped reads have a reference placement.
    pub fn is_mapped(&self) -> bool {
        !self.flags.is_unmapped() && self.reference_position.is_some()
    }

    /// Strand of the alignment.
    pub fn strand(&self) -> Strand {
        if self.flags.is_reverse() {
            Strand::Reverse
        } else {
            Strand::Forward
        }
    }

    /// Reference bases spanned by the cigar.
    pub fn reference_span(&self) -> u32 {
        reference_length(&self.cigar)
    }

    /// End position (half-open) on the reference.
    pub fn end(&self) -> Option<u32> {
        self.reference_position
            .map(|pos| pos + self.reference_span())
    }

    /// Alignment start minus leading clips.
    pub fn unclipped_start(&self) -> Option<i64> {
        if !self.is_mapped() {
            return None;
        }
        let pos = self.reference_position? as i64;
        Some(pos - leading_clip(&self.cigar) as i64)
    }

    /// Alignment end (inclusive) plus trailing clips.
    pub fn unclipped_end(&self) -> Option<i64> {
        if !self.is_mapped() {
            return None;
        }
        let pos = self.reference_position? as i64;
        let span = self.reference_span() as i64;
        Some(pos + span - 1 + trailing_clip(&self.cigar) as i64)
    }

    /// Unclipped 5′ position: start on the forward strand, end on the reverse.
    pub fn five_prime_position(&self) -> Option<i64> {
        match self.strand() {
            Strand::Forward => self.unclipped_start(),
            Strand::Reverse => self.unclipped_end(),
        }
    }

    /// Base at the provided read offset.
    pub fn base_at(&self, offset: usize) -> Option<u8> {
        self.sequence.get(offset).copied()
    }

    /// Quality score at the provided read offset.
    pub fn quality_at(&self, offset: usize) -> Option<u8> {
        self.quality_scores.get(offset).copied()
    }

    /// Parsed MD tag, if present.
    pub fn md_tag(&self) -> Result<Option<MdTag>, ModelError> {
        match (&self.mismatching_positions, self.reference_position) {
            (Some(md), Some(pos)) => MdTag::parse(md, pos, &self.cigar).map(Some),
            _ => Ok(None),
        }
    }

    /// Check the record-level invariants.
    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.quality_scores.is_empty() && self.quality_scores.len() != self.sequence.len() {
            return Err(ModelError::LengthMismatch {
                read_name: self.read_name.to_string(),
                sequence: self.sequence.len(),
                qualities: self.quality_scores.len(),
            });
        }

        if self.flags.is_unmapped() {
            if self.reference_position.is_some() || !self.cigar.is_empty() {
                return Err(ModelError::UnmappedWithAlignment {
                    read_name: self.read_name.to_string(),
                });
            }
            return Ok(());
        }

        if self.reference_name.is_none() || self.reference_position.is_none() || self.cigar.is_empty()
        {
            return Err(ModelError::MissingAlignment {
                read_name: self.read_name.to_string(),
            });
        }

        let described = read_length(&self.cigar) as usize;
        if !self.sequence.is_empty() && described != self.sequence.len() {
            return Err(ModelError::CigarLengthMismatch {
                read_name: self.read_name.to_string(),
                cigar: described,
                sequence: self.sequence.len(),
            });
        }
        Ok(())
    }

    /// Sum of base qualities at or above `min_quality`.
    pub fn quality_sum(&self, min_quality: u8) -> u64 {
        self.quality_scores
            .iter()
            .filter(|&&q| q >= min_quality)
            .map(|&q| q as u64)
            .sum()
    }
}

/// Builder for [`AlignmentRecord`], mainly used by tests and importers.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    record: AlignmentRecord,
}

impl RecordBuilder {
    fn new(read_name: impl Into<Arc<str>>) -> Self {
        Self {
            record: AlignmentRecord {
                read_name: read_name.into(),
                mapping_quality: 60,
                ..AlignmentRecord::default()
            },
        }
    }

    /// Place the read at `position` on `reference`.
    pub fn mapped(mut self, reference: impl Into<Arc<str>>, position: u32) -> Self {
        self.record.reference_name = Some(reference.into());
        self.record.reference_position = Some(position);
        self.record.flags = self.record.flags.with(Flags::UNMAPPED, false);
        self
    }

    /// Mark the read unmapped, clearing any placement.
    pub fn unmapped(mut self) -> Self {
        self.record.reference_name = None;
        self.record.reference_position = None;
        self.record.cigar.clear();
        self.record.flags = self.record.flags.with(Flags::UNMAPPED, true);
        self
    }

    /// Set the cigar.
    pub fn cigar(mut self, cigar: Vec<CigarOp>) -> Self {
        self.record.cigar = cigar;
        self
    }

    /// Set sequence bases.
    pub fn sequence(mut self, sequence: impl Into<Arc<[u8]>>) -> Self {
        self.record.sequence = sequence.into();
        self
    }

    /// Set base qualities.
    pub fn qualities(mut self, qualities: impl Into<Arc<[u8]>>) -> Self {
        self.record.quality_scores = qualities.into();
        self
    }

    /// Set the read group.
    pub fn read_group(mut self, read_group: impl Into<Arc<str>>) -> Self {
        self.record.read_group_id = Some(read_group.into());
        self
    }

    /// Set the mapping quality.
    pub fn mapping_quality(mut self, mapq: u8) -> Self {
        self.record.mapping_quality = mapq;
        self
    }

    /// Set or clear flag bits.
    pub fn flag(mut self, mask: u16, value: bool) -> Self {
        self.record.flags = self.record.flags.with(mask, value);
        self
    }

    /// Link the read to its mate.
    pub fn mate(mut self, reference: impl Into<Arc<str>>, position: u32) -> Self {
        self.record.mate_reference_name = Some(reference.into());
        self.record.mate_position = Some(position);
        self.record.flags = self.record.flags.with(Flags::PAIRED, true);
        self
    }

    /// Set the MD tag.
    pub fn md(mut self, md: impl Into<Arc<str>>) -> Self {
        self.record.mismatching_positions = Some(md.into());
        self
    }

    /// Finish without validation.
    pub fn build(self) -> AlignmentRecord {
        self.record
    }
}
