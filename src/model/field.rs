use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ModelError;

/// Addressable fields of an [`AlignmentRecord`](super::AlignmentRecord).
///
/// Each field is stored as one column; projections and predicates name
/// fields, never struct members directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Template name.
    ReadName,
    /// Read bases.
    Sequence,
    /// Base qualities.
    QualityScores,
    /// Reference contig.
    ReferenceName,
    /// Leftmost aligned position.
    ReferencePosition,
    /// Alignment cigar.
    Cigar,
    /// Read group identifier.
    ReadGroupId,
    /// Mapping quality.
    MappingQuality,
    /// SAM flags.
    Flags,
    /// Mate reference contig.
    MateReferenceName,
    /// Mate leftmost position.
    MatePosition,
    /// MD tag.
    MismatchingPositions,
    /// Pre-recalibration qualities.
    OriginalQualityScores,
}

impl Field {
    /// Every field, in schema order.
    pub const ALL: [Field; 13] = [
        Field::ReadName,
        Field::Sequence,
        Field::QualityScores,
        Field::ReferenceName,
        Field::ReferencePosition,
        Field::Cigar,
        Field::ReadGroupId,
        Field::MappingQuality,
        Field::Flags,
        Field::MateReferenceName,
        Field::MatePosition,
        Field::MismatchingPositions,
        Field::OriginalQualityScores,
    ];

    /// Column name used in containers and configuration.
    pub fn name(self) -> &'static str {
        match self {
            Field::ReadName => "read_name",
            Field::Sequence => "sequence",
            Field::QualityScores => "quality_scores",
            Field::ReferenceName => "reference_name",
            Field::ReferencePosition => "reference_position",
            Field::Cigar => "cigar",
            Field::ReadGroupId => "read_group_id",
            Field::MappingQuality => "mapping_quality",
            Field::Flags => "flags",
            Field::MateReferenceName => "mate_reference_name",
            Field::MatePosition => "mate_position",
            Field::MismatchingPositions => "mismatching_positions",
            Field::OriginalQualityScores => "original_quality_scores",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|field| field.name() == s)
            .ok_or_else(|| ModelError::UnknownField(s.to_string()))
    }
}
