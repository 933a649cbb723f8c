use std::fmt;

use super::ModelError;

/// Simple CIGAR operation kinds describing how a read aligns to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CigarOpKind {
    /// Consuming match/mismatch (`M`).
    Match,
    /// Insertion relative to the reference (`I`).
    Insertion,
    /// Deletion relative to the reference (`D`).
    Deletion,
    /// Skipped reference region, e.g. an intron (`N`).
    Skip,
    /// Soft clipping (sequence present in read only).
    SoftClip,
    /// Hard clipping (trimmed sequence not present in read).
    HardClip,
    /// Silent deletion from a padded reference (`P`).
    Padding,
    /// Sequence match (`=`).
    SequenceMatch,
    /// Sequence mismatch (`X`).
    SequenceMismatch,
}

impl CigarOpKind {
    /// SAM character for the operation.
    pub fn as_char(self) -> char {
        match self {
            CigarOpKind::Match => 'M',
            CigarOpKind::Insertion => 'I',
            CigarOpKind::Deletion => 'D',
            CigarOpKind::Skip => 'N',
            CigarOpKind::SoftClip => 'S',
            CigarOpKind::HardClip => 'H',
            CigarOpKind::Padding => 'P',
            CigarOpKind::SequenceMatch => '=',
            CigarOpKind::SequenceMismatch => 'X',
        }
    }

    /// Parse a SAM operation character.
    pub fn from_char(c: char) -> Option<Self> {
        let kind = match c {
            'M' => CigarOpKind::Match,
            'I' => CigarOpKind::Insertion,
            'D' => CigarOpKind::Deletion,
            'N' => CigarOpKind::Skip,
            'S' => CigarOpKind::SoftClip,
            'H' => CigarOpKind::HardClip,
            'P' => CigarOpKind::Padding,
            '=' => CigarOpKind::SequenceMatch,
            'X' => CigarOpKind::SequenceMismatch,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether the operation consumes reference bases.
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Deletion
                | CigarOpKind::Skip
                | CigarOpKind::SequenceMatch
                | CigarOpKind::SequenceMismatch
        )
    }

    /// Whether the operation consumes read bases.
    pub fn consumes_read(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Insertion
                | CigarOpKind::SoftClip
                | CigarOpKind::SequenceMatch
                | CigarOpKind::SequenceMismatch
        )
    }

    /// Whether read bases under this operation are aligned against a reference base.
    pub fn is_aligned(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match | CigarOpKind::SequenceMatch | CigarOpKind::SequenceMismatch
        )
    }

    /// Whether the operation is a clip.
    pub fn is_clip(self) -> bool {
        matches!(self, CigarOpKind::SoftClip | CigarOpKind::HardClip)
    }

    /// Whether the operation is an insertion or deletion.
    pub fn is_indel(self) -> bool {
        matches!(self, CigarOpKind::Insertion | CigarOpKind::Deletion)
    }
}

/// CIGAR operation with length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CigarOp {
    /// Operation kind.
    pub kind: CigarOpKind,
    /// Number of bases affected by the operation.
    pub len: u32,
}

impl CigarOp {
    /// Construct a new CIGAR operation.
    pub fn new(kind: CigarOpKind, len: u32) -> Self {
        Self { kind, len }
    }
}

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.len, self.kind.as_char())
    }
}

/// Parse a SAM CIGAR string (`*` and the empty string parse to no operations).
pub fn parse_cigar(text: &str) -> Result<Vec<CigarOp>, ModelError> {
    if text.is_empty() || text == "*" {
        return Ok(Vec::new());
    }

    let invalid = |reason: &str| ModelError::InvalidCigar {
        cigar: text.to_string(),
        reason: reason.to_string(),
    };

    let mut ops = Vec::new();
    let mut len: Option<u32> = None;
    for c in text.chars() {
        if let Some(digit) = c.to_digit(10) {
            let current = len.unwrap_or(0);
            len = Some(
                current
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(digit))
                    .ok_or_else(|| invalid("operation length overflows"))?,
            );
            continue;
        }
        let kind = CigarOpKind::from_char(c)
            .ok_or_else(|| invalid(&format!("unknown operation '{}'", c)))?;
        let op_len = len
            .take()
            .ok_or_else(|| invalid(&format!("operation '{}' has no length", c)))?;
        if op_len == 0 {
            return Err(invalid("zero-length operation"));
        }
        ops.push(CigarOp::new(kind, op_len));
    }

    if len.is_some() {
        return Err(invalid("trailing length without operation"));
    }
    Ok(ops)
}

/// Render operations as a SAM CIGAR string (`*` when empty).
pub fn format_cigar(ops: &[CigarOp]) -> String {
    if ops.is_empty() {
        return "*".to_string();
    }
    ops.iter().map(|op| op.to_string()).collect()
}

/// Number of reference bases spanned by the operations.
pub fn reference_length(ops: &[CigarOp]) -> u32 {
    ops.iter()
        .filter(|op| op.kind.consumes_reference())
        .map(|op| op.len)
        .sum()
}

/// Number of read bases described by the operations.
pub fn read_length(ops: &[CigarOp]) -> u32 {
    ops.iter()
        .filter(|op| op.kind.consumes_read())
        .map(|op| op.len)
        .sum()
}

/// Soft and hard clipped bases before the first non-clip operation.
pub fn leading_clip(ops: &[CigarOp]) -> u32 {
    ops.iter()
        .take_while(|op| op.kind.is_clip())
        .map(|op| op.len)
        .sum()
}

/// Soft and hard clipped bases after the last non-clip operation.
pub fn trailing_clip(ops: &[CigarOp]) -> u32 {
    ops.iter()
        .rev()
        .take_while(|op| op.kind.is_clip())
        .map(|op| op.len)
        .sum()
}

/// Number of insertion and deletion operations.
pub fn indel_count(ops: &[CigarOp]) -> usize {
    ops.iter().filter(|op| op.kind.is_indel()).count()
}

/// Merge adjacent operations of the same kind and drop zero-length ones.
pub fn normalize(ops: Vec<CigarOp>) -> Vec<CigarOp> {
    let mut merged: Vec<CigarOp> = Vec::with_capacity(ops.len());
    for op in ops.into_iter().filter(|op| op.len > 0) {
        match merged.last_mut() {
            Some(last) if last.kind == op.kind => last.len += op.len,
            _ => merged.push(op),
        }
    }
    merged
}
