//! Reference reconstruction and alternate haplotypes for one target.

use std::sync::Arc;

use crate::model::{AlignmentRecord, CigarOpKind, MdTag};

/// Reference bases under a group of reads, recovered from their MD tags.
///
/// Positions no read covers hold `N`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceWindow {
    start: u32,
    bases: Vec<u8>,
}

impl ReferenceWindow {
    /// Rebuild the reference spanned by `reads`, each paired with its parsed MD tag.
    ///
    /// Returns `None` when no read contributes.
    pub fn reconstruct(reads: &[(&AlignmentRecord, &MdTag)]) -> Option<Self> {
        let start = reads.iter().map(|(_, md)| md.start()).min()?;
        let end = reads.iter().map(|(_, md)| md.end()).max()?;
        let mut bases = vec![b'N'; (end - start) as usize];

        for (record, md) in reads {
            let mut ref_pos = md.start();
            let mut read_pos = 0usize;
            for op in &record.cigar {
                match op.kind {
                    kind if kind.is_aligned() => {
                        for _ in 0..op.len {
                            let slot = &mut bases[(ref_pos - start) as usize];
                            if *slot == b'N' {
                                let read_base = record
                                    .base_at(read_pos)
                                    .unwrap_or(b'N')
                                    .to_ascii_uppercase();
                                *slot = md.reference_base(ref_pos, read_base);
                            }
                            ref_pos += 1;
                            read_pos += 1;
                        }
                    }
                    CigarOpKind::Deletion => {
                        for _ in 0..op.len {
                            if let Some(base) = md.deleted_at(ref_pos) {
                                bases[(ref_pos - start) as usize] = base;
                            }
                            ref_pos += 1;
                        }
                    }
                    CigarOpKind::Skip => ref_pos += op.len,
                    CigarOpKind::Insertion | CigarOpKind::SoftClip => read_pos += op.len as usize,
                    _ => {}
                }
            }
        }
        Some(Self { start, bases })
    }

    /// First reference position.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// One past the last reference position.
    pub fn end(&self) -> u32 {
        self.start + self.bases.len() as u32
    }

    /// Reference bases.
    pub fn bases(&self) -> &[u8] {
        &self.bases
    }
}

/// Indel carried by an alternate haplotype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Indel {
    /// Reference bases removed.
    Deletion {
        /// Bases removed.
        len: u32,
    },
    /// Bases inserted before the position.
    Insertion {
        /// Inserted bases.
        bases: Arc<[u8]>,
    },
}

/// Alternate haplotype: the reference window with one indel applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Consensus {
    /// Reference position of the indel.
    pub position: u32,
    /// The indel.
    pub indel: Indel,
    /// Haplotype bases.
    pub haplotype: Vec<u8>,
}

/// Where a haplotype base came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaplotypeOrigin {
    /// Reference position.
    Reference(u32),
    /// Inserted base.
    Inserted,
}

impl Consensus {
    /// Apply `indel` at `position` to `window`; `None` if it does not fit.
    pub fn new(window: &ReferenceWindow, position: u32, indel: Indel) -> Option<Self> {
        if position < window.start() || position > window.end() {
            return None;
        }
        let offset = (position - window.start()) as usize;
        let bases = window.bases();
        let haplotype = match &indel {
            Indel::Deletion { len } => {
                let resume = offset + *len as usize;
                if resume > bases.len() {
                    return None;
                }
                let mut h = bases[..offset].to_vec();
                h.extend_from_slice(&bases[resume..]);
                h
            }
            Indel::Insertion { bases: inserted } => {
                let mut h = bases[..offset].to_vec();
                h.extend_from_slice(inserted);
                h.extend_from_slice(&bases[offset..]);
                h
            }
        };
        Some(Self {
            position,
            indel,
            haplotype,
        })
    }

    /// Reference origin of haplotype index `idx`.
    pub fn origin(&self, window_start: u32, idx: usize) -> HaplotypeOrigin {
        let offset = (self.position - window_start) as usize;
        match &self.indel {
            Indel::Deletion { len } => {
                if idx < offset {
                    HaplotypeOrigin::Reference(window_start + idx as u32)
                } else {
                    HaplotypeOrigin::Reference(window_start + idx as u32 + len)
                }
            }
            Indel::Insertion { bases } => {
                if idx < offset {
                    HaplotypeOrigin::Reference(window_start + idx as u32)
                } else if idx < offset + bases.len() {
                    HaplotypeOrigin::Inserted
                } else {
                    HaplotypeOrigin::Reference(window_start + (idx - bases.len()) as u32)
                }
            }
        }
    }
}

/// The single indel of a read, with its reference position.
pub fn single_indel(record: &AlignmentRecord) -> Option<(u32, Indel)> {
    let mut ref_pos = record.reference_position?;
    let mut read_pos = 0usize;
    let mut found = None;
    for op in &record.cigar {
        match op.kind {
            CigarOpKind::Deletion => {
                if found.is_some() {
                    return None;
                }
                found = Some((ref_pos, Indel::Deletion { len: op.len }));
            }
            CigarOpKind::Insertion => {
                if found.is_some() {
                    return None;
                }
                let end = read_pos + op.len as usize;
                let inserted = record.sequence.get(read_pos..end)?;
                let upper: Vec<u8> = inserted.iter().map(u8::to_ascii_uppercase).collect();
                found = Some((
                    ref_pos,
                    Indel::Insertion {
                        bases: Arc::from(upper),
                    },
                ));
            }
            _ => {}
        }
        if op.kind.consumes_reference() {
            ref_pos += op.len;
        }
        if op.kind.consumes_read() {
            read_pos += op.len as usize;
        }
    }
    found
}

/// Candidate haplotypes from reads carrying exactly one indel.
///
/// Duplicates keep their first occurrence; candidates are ordered by first
/// occurrence, then by haplotype.
pub fn candidates<'a>(
    window: &ReferenceWindow,
    reads: impl IntoIterator<Item = &'a AlignmentRecord>,
) -> Vec<Consensus> {
    let mut out: Vec<(usize, Consensus)> = Vec::new();
    for (order, record) in reads.into_iter().enumerate() {
        let Some((position, indel)) = single_indel(record) else {
            continue;
        };
        let Some(consensus) = Consensus::new(window, position, indel) else {
            continue;
        };
        if out.iter().any(|(_, seen)| seen == &consensus) {
            continue;
        }
        out.push((order, consensus));
    }
    out.sort_by(|(a_order, a), (b_order, b)| {
        a_order
            .cmp(b_order)
            .then_with(|| a.haplotype.cmp(&b.haplotype))
    });
    out.into_iter().map(|(_, consensus)| consensus).collect()
}
