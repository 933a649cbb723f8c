//! Record model: typed aligned reads and the pieces they are made of.
//!
//! Everything downstream (collections, stages, the columnar store) works in
//! terms of [`AlignmentRecord`] and addresses its columns through [`Field`].

mod cigar;
mod field;
mod md;
mod record;

pub use cigar::{
    format_cigar, indel_count, leading_clip, normalize, parse_cigar, read_length,
    reference_length, trailing_clip, CigarOp, CigarOpKind,
};
pub use field::Field;
pub use md::{compute_md, MdTag};
pub use record::{AlignmentRecord, Flags, RecordBuilder, Strand, MAPQ_UNAVAILABLE};

use thiserror::Error;

/// Errors raised when a record or one of its encoded fields is malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// CIGAR text could not be parsed.
    #[error("invalid cigar '{cigar}': {reason}")]
    InvalidCigar {
        /// Offending cigar text.
        cigar: String,
        /// What was wrong with it.
        reason: String,
    },

    /// MD tag inconsistent with the alignment.
    #[error("invalid MD tag '{md}': {reason}")]
    InvalidMdTag {
        /// Offending MD text.
        md: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Sequence and quality arrays differ in length.
    #[error("read {read_name}: {sequence} bases but {qualities} qualities")]
    LengthMismatch {
        /// Read implicated.
        read_name: String,
        /// Sequence length.
        sequence: usize,
        /// Quality array length.
        qualities: usize,
    },

    /// Cigar describes a different number of read bases than the sequence holds.
    #[error("read {read_name}: cigar describes {cigar} bases, sequence has {sequence}")]
    CigarLengthMismatch {
        /// Read implicated.
        read_name: String,
        /// Read bases described by the cigar.
        cigar: usize,
        /// Sequence length.
        sequence: usize,
    },

    /// Unmapped read carrying a position or cigar.
    #[error("read {read_name} is unmapped but carries an alignment")]
    UnmappedWithAlignment {
        /// Read implicated.
        read_name: String,
    },

    /// Mapped read without a full placement.
    #[error("read {read_name} is mapped but lacks reference, position or cigar")]
    MissingAlignment {
        /// Read implicated.
        read_name: String,
    },

    /// Field name not part of the schema.
    #[error("unknown field '{0}'")]
    UnknownField(String),
}
