#![allow(dead_code)]

use std::sync::Arc;

use readprep::framework::ExecutionContext;
use readprep::model::{compute_md, parse_cigar, AlignmentRecord, Flags};

pub fn ctx(partitions: usize) -> ExecutionContext {
    ExecutionContext::with_threads(partitions, 4).expect("context builds")
}

/// Small deterministic generator so fixtures do not depend on a RNG crate.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407))
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    pub fn below(&mut self, bound: u32) -> u32 {
        self.next_u32() % bound
    }
}

pub fn reference(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = Lcg::new(seed);
    (0..len).map(|_| b"ACGT"[rng.below(4) as usize]).collect()
}

pub fn substitute(base: u8) -> u8 {
    match base {
        b'A' => b'C',
        b'C' => b'G',
        b'G' => b'T',
        _ => b'A',
    }
}

/// Mapped read copied from `reference` at `pos`, with MD computed against it.
pub fn read_from(
    reference: &[u8],
    name: &str,
    pos: u32,
    len: usize,
    quality: u8,
    mismatches: &[usize],
) -> AlignmentRecord {
    let start = pos as usize;
    let mut seq = reference[start..start + len].to_vec();
    for &offset in mismatches {
        seq[offset] = substitute(seq[offset]);
    }
    let cigar = parse_cigar(&format!("{}M", len)).expect("valid cigar");
    let md = compute_md(reference, 0, &seq, pos, &cigar);
    AlignmentRecord::builder(name)
        .mapped("chr1", pos)
        .cigar(cigar)
        .sequence(seq)
        .qualities(vec![quality; len])
        .read_group("rg1")
        .md(md)
        .build()
}

/// Paired reads `name/1` at `left` (forward) and `name/2` at `right` (reverse).
pub fn pair(reference: &[u8], name: &str, left: u32, right: u32, quality: u8) -> Vec<AlignmentRecord> {
    let mut r1 = read_from(reference, name, left, 50, quality, &[]);
    r1.flags = r1
        .flags
        .with(Flags::PAIRED, true)
        .with(Flags::PROPER_PAIR, true)
        .with(Flags::FIRST_OF_PAIR, true)
        .with(Flags::MATE_REVERSE, true);
    r1.mate_reference_name = Some(Arc::from("chr1"));
    r1.mate_position = Some(right);

    let mut r2 = read_from(reference, name, right, 50, quality, &[]);
    r2.flags = r2
        .flags
        .with(Flags::PAIRED, true)
        .with(Flags::PROPER_PAIR, true)
        .with(Flags::SECOND_OF_PAIR, true)
        .with(Flags::REVERSE, true);
    r2.mate_reference_name = Some(Arc::from("chr1"));
    r2.mate_position = Some(left);
    vec![r1, r2]
}

pub fn sort_canonical(records: &mut [AlignmentRecord]) {
    records.sort_by(|a, b| {
        (&a.read_name, a.flags.bits(), a.reference_position)
            .cmp(&(&b.read_name, b.flags.bits(), b.reference_position))
    });
}
