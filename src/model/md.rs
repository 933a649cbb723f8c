//! MD tag parsing and generation.
//!
//! The MD tag records the reference base at every mismatching aligned
//! position and the reference bases removed by deletions. Together with the
//! read sequence it recovers the reference under an alignment without
//! consulting a reference genome, which is what recalibration (mismatch
//! counting) and realignment (reference reconstruction) rely on.
//!
//! ```text
//! MD:Z:10A5^AC6   10 matches, ref A mismatch, 5 matches, AC deleted, 6 matches
//! ```

use std::collections::BTreeMap;

use super::{CigarOp, CigarOpKind, ModelError};

/// Parsed MD tag resolved against a read's alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdTag {
    start: u32,
    end: u32,
    mismatches: BTreeMap<u32, u8>,
    deletions: BTreeMap<u32, u8>,
}

impl MdTag {
    /// Parse `text` for a read aligned at `position` with `cigar`.
    ///
    /// Fails when the tag does not describe exactly the aligned and deleted
    /// reference positions of the cigar.
    pub fn parse(text: &str, position: u32, cigar: &[CigarOp]) -> Result<Self, ModelError> {
        let invalid = |reason: String| ModelError::InvalidMdTag {
            md: text.to_string(),
            reason,
        };

        // Reference positions the MD string walks over, in order, with a flag
        // marking positions removed by a deletion.
        let mut walk: Vec<(u32, bool)> = Vec::new();
        let mut ref_pos = position;
        for op in cigar {
            match op.kind {
                kind if kind.is_aligned() => {
                    walk.extend((0..op.len).map(|i| (ref_pos + i, false)));
                    ref_pos += op.len;
                }
                CigarOpKind::Deletion => {
                    walk.extend((0..op.len).map(|i| (ref_pos + i, true)));
                    ref_pos += op.len;
                }
                CigarOpKind::Skip => ref_pos += op.len,
                _ => {}
            }
        }

        let mut mismatches = BTreeMap::new();
        let mut deletions = BTreeMap::new();
        let bytes = text.as_bytes();
        let mut cursor = 0usize;
        let mut i = 0usize;

        while i < bytes.len() {
            let b = bytes[i];
            if b.is_ascii_digit() {
                let mut run = 0usize;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    run = run
                        .checked_mul(10)
                        .and_then(|r| r.checked_add(usize::from(bytes[i] - b'0')))
                        .ok_or_else(|| invalid("match run length overflows".into()))?;
                    i += 1;
                }
                for _ in 0..run {
                    match walk.get(cursor) {
                        Some((_, false)) => cursor += 1,
                        Some((pos, true)) => {
                            return Err(invalid(format!("match run covers deleted base at {}", pos)))
                        }
                        None => return Err(invalid("match run extends past alignment".into())),
                    }
                }
            } else if b == b'^' {
                i += 1;
                let mut deleted = 0;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    match walk.get(cursor) {
                        Some((pos, true)) => {
                            deletions.insert(*pos, bytes[i].to_ascii_uppercase());
                            cursor += 1;
                        }
                        _ => return Err(invalid("deletion does not match cigar".into())),
                    }
                    deleted += 1;
                    i += 1;
                }
                if deleted == 0 {
                    return Err(invalid("empty deletion".into()));
                }
            } else if b.is_ascii_alphabetic() {
                match walk.get(cursor) {
                    Some((pos, false)) => {
                        mismatches.insert(*pos, b.to_ascii_uppercase());
                        cursor += 1;
                    }
                    _ => return Err(invalid("mismatch outside aligned bases".into())),
                }
                i += 1;
            } else {
                return Err(invalid(format!("unexpected character '{}'", b as char)));
            }
        }

        if cursor != walk.len() {
            return Err(invalid(format!(
                "tag covers {} reference bases, alignment has {}",
                cursor,
                walk.len()
            )));
        }

        Ok(Self {
            start: position,
            end: ref_pos,
            mismatches,
            deletions,
        })
    }

    /// First reference position covered.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Reference position one past the alignment end.
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Whether the aligned base at `position` matches the reference.
    pub fn is_match(&self, position: u32) -> bool {
        position >= self.start
            && position < self.end
            && !self.mismatches.contains_key(&position)
            && !self.deletions.contains_key(&position)
    }

    /// Reference base at a mismatching position, if any.
    pub fn mismatch_at(&self, position: u32) -> Option<u8> {
        self.mismatches.get(&position).copied()
    }

    /// Reference base removed by a deletion at `position`, if any.
    pub fn deleted_at(&self, position: u32) -> Option<u8> {
        self.deletions.get(&position).copied()
    }

    /// Reference base under an aligned read base.
    pub fn reference_base(&self, position: u32, read_base: u8) -> u8 {
        self.mismatch_at(position).unwrap_or(read_base)
    }

    /// Iterator over mismatching reference positions.
    pub fn mismatch_positions(&self) -> impl Iterator<Item = u32> + '_ {
        self.mismatches.keys().copied()
    }

    /// Number of mismatching aligned bases.
    pub fn mismatch_count(&self) -> usize {
        self.mismatches.len()
    }
}

/// Compute the MD string for an alignment against a reference window.
///
/// `reference` holds the reference bases starting at `window_start`.
/// Reference bases outside the window are treated as `N`.
pub fn compute_md(
    reference: &[u8],
    window_start: u32,
    sequence: &[u8],
    position: u32,
    cigar: &[CigarOp],
) -> String {
    let ref_base = |pos: u32| -> u8 {
        pos.checked_sub(window_start)
            .and_then(|offset| reference.get(offset as usize))
            .copied()
            .unwrap_or(b'N')
            .to_ascii_uppercase()
    };

    let mut md = String::with_capacity(cigar.len() * 3 + 8);
    let mut match_count = 0u32;
    let mut ref_pos = position;
    let mut read_pos = 0usize;

    for op in cigar {
        match op.kind {
            kind if kind.is_aligned() => {
                for _ in 0..op.len {
                    let r = ref_base(ref_pos);
                    let q = sequence
                        .get(read_pos)
                        .copied()
                        .unwrap_or(b'N')
                        .to_ascii_uppercase();
                    if r == q {
                        match_count += 1;
                    } else {
                        md.push_str(&match_count.to_string());
                        md.push(r as char);
                        match_count = 0;
                    }
                    ref_pos += 1;
                    read_pos += 1;
                }
            }
            CigarOpKind::Deletion => {
                md.push_str(&match_count.to_string());
                md.push('^');
                for _ in 0..op.len {
                    md.push(ref_base(ref_pos) as char);
                    ref_pos += 1;
                }
                match_count = 0;
            }
            CigarOpKind::Skip => ref_pos += op.len,
            CigarOpKind::Insertion | CigarOpKind::SoftClip => read_pos += op.len as usize,
            _ => {}
        }
    }

    md.push_str(&match_count.to_string());
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_cigar;

    #[test]
    fn parse_resolves_mismatches_and_deletions() {
        let cigar = parse_cigar("2S10M2D6M").unwrap();
        let md = MdTag::parse("4A5^AC6", 100, &cigar).expect("valid md");
        assert_eq!(md.start(), 100);
        assert_eq!(md.end(), 118);
        assert_eq!(md.mismatch_at(104), Some(b'A'));
        assert_eq!(md.deleted_at(110), Some(b'A'));
        assert_eq!(md.deleted_at(111), Some(b'C'));
        assert!(md.is_match(103));
        assert!(!md.is_match(104));
        assert!(md.is_match(112));
        assert_eq!(md.mismatch_count(), 1);
    }

    #[test]
    fn parse_skips_introns() {
        let cigar = parse_cigar("3M100N3M").unwrap();
        let md = MdTag::parse("3G2", 0, &cigar).expect("valid md");
        assert_eq!(md.mismatch_at(103), Some(b'G'));
        assert_eq!(md.end(), 106);
    }

    #[test]
    fn parse_rejects_inconsistent_tags() {
        let cigar = parse_cigar("10M").unwrap();
        assert!(MdTag::parse("9", 0, &cigar).is_err());
        assert!(MdTag::parse("11", 0, &cigar).is_err());
        assert!(MdTag::parse("5^A5", 0, &cigar).is_err());
        assert!(MdTag::parse("5;4", 0, &cigar).is_err());
    }

    #[test]
    fn parse_rejects_overflowing_match_runs() {
        let cigar = parse_cigar("10M").unwrap();
        let err = MdTag::parse("99999999999999999999999", 0, &cigar).unwrap_err();
        assert!(matches!(err, ModelError::InvalidMdTag { .. }));
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn compute_md_matches_parse() {
        let reference = b"ACGTACGTACGTAA";
        let cigar = parse_cigar("4M2D4M").unwrap();
        let read = b"ACGTGTTC";
        let md = compute_md(reference, 10, read, 10, &cigar);
        assert_eq!(md, "4^AC2A1");
        let parsed = MdTag::parse(&md, 10, &cigar).unwrap();
        assert_eq!(parsed.mismatch_count(), 1);
        assert_eq!(parsed.mismatch_at(18), Some(b'A'));
    }
}
