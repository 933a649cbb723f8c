mod common;

use std::collections::BTreeMap;

use proptest::prelude::*;
use readprep::framework::Collection;
use readprep::model::{compute_md, parse_cigar, AlignmentRecord, CigarOpKind, Flags};
use readprep::transforms::bqsr::{CovariateKind, Recalibrator};
use readprep::transforms::markdup::{DuplicateMarker, ReadPairKey};
use readprep::transforms::realign::{IndelRealigner, RealignmentOptions};
use readprep::transforms::sort::{sort_by_coordinate, CoordinateKey};

use common::{ctx, read_from, reference, sort_canonical};

/// (position, reverse, quality, length)
fn single_reads() -> impl Strategy<Value = Vec<(u32, bool, u8, usize)>> {
    proptest::collection::vec((0u32..40, any::<bool>(), 5u8..41, 10usize..20), 1..60)
}

fn build_singles(layout: &[(u32, bool, u8, usize)]) -> Vec<AlignmentRecord> {
    let genome = reference(100, 1);
    layout.iter()
        .enumerate()
        .map(|(i, &(pos, reverse, quality, len))| {
            let mut read = read_from(&genome, &format!("r{:03}", i), pos, len, quality, &[]);
            read.flags = read.flags.with(Flags::REVERSE, reverse);
            read
        })
        .collect()
}

fn mark(records: Vec<AlignmentRecord>, partitions: usize) -> Vec<AlignmentRecord> {
    let mut out = DuplicateMarker::default()
        .mark(&Collection::from_vec(&ctx(partitions), records))
        .collect()
        .unwrap();
    sort_canonical(&mut out);
    out
}

fn matched_bases(record: &AlignmentRecord) -> usize {
    let aligned: u32 = record
        .cigar
        .iter()
        .filter(|op| op.kind.is_aligned())
        .map(|op| op.len)
        .sum();
    let mismatches = record
        .md_tag()
        .unwrap()
        .map(|md| md.mismatch_count())
        .unwrap_or(0);
    aligned as usize - mismatches
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn marking_twice_changes_nothing(layout in single_reads(), partitions in 1usize..6) {
        let once = mark(build_singles(&layout), partitions);
        let twice = mark(once.clone(), partitions);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn every_key_keeps_one_read(layout in single_reads()) {
        let out = mark(build_singles(&layout), 3);
        let mut kept: BTreeMap<ReadPairKey, usize> = BTreeMap::new();
        for record in &out {
            let key = ReadPairKey::for_read(record, None).unwrap();
            let entry = kept.entry(key).or_default();
            if !record.flags.is_duplicate() {
                *entry += 1;
            }
        }
        prop_assert!(kept.values().all(|&n| n == 1), "{:?}", kept);
    }

    #[test]
    fn marking_ignores_partitioning(layout in single_reads(), a in 1usize..5, b in 5usize..12) {
        prop_assert_eq!(mark(build_singles(&layout), a), mark(build_singles(&layout), b));
    }

    #[test]
    fn recalibration_is_per_read(
        layout in proptest::collection::vec((0u32..400, 10u8..41, proptest::collection::vec(0usize..30, 0..3)), 1..80),
        partitions in 1usize..8,
    ) {
        let genome = reference(500, 2);
        let records: Vec<AlignmentRecord> = layout
            .iter()
            .enumerate()
            .map(|(i, (pos, quality, mismatches))| {
                read_from(&genome, &format!("q{:03}", i), *pos, 30, *quality, mismatches)
            })
            .collect();

        let recalibrator = Recalibrator::new(&[CovariateKind::QualityScore, CovariateKind::Cycle])
            .with_min_observations(1);
        let context = ctx(partitions);
        let table = recalibrator
            .build_table(&Collection::from_vec(&context, records.clone()))
            .unwrap();
        let table = context.broadcast(table);

        let mut together = recalibrator
            .apply(&Collection::from_vec(&context, records.clone()), table.clone())
            .collect()
            .unwrap();
        sort_canonical(&mut together);

        let solo = ctx(1);
        let mut alone = Vec::new();
        for record in records.iter().rev() {
            let single = Collection::from_vec(&solo, vec![record.clone()]);
            alone.extend(recalibrator.apply(&single, table.clone()).collect().unwrap());
        }
        sort_canonical(&mut alone);

        prop_assert_eq!(together.len(), records.len());
        prop_assert_eq!(together, alone);
    }

    #[test]
    fn realignment_never_loses_matched_bases(
        deletion in 1usize..5,
        gapped_starts in proptest::collection::vec(71u32..95, 1..4),
        ungapped_starts in proptest::collection::vec(80u32..100, 0..6),
        seed in 0u64..1_000,
    ) {
        let genome = reference(240, seed);
        let site = 100usize;
        let mut alt = genome[..site].to_vec();
        alt.extend_from_slice(&genome[site + deletion..]);

        let mut records = Vec::new();
        for (i, &start) in gapped_starts.iter().enumerate() {
            let left = site - start as usize;
            let mut seq = genome[start as usize..site].to_vec();
            seq.extend_from_slice(&genome[site + deletion..site + deletion + 30 - left]);
            let cigar = parse_cigar(&format!("{}M{}D{}M", left, deletion, 30 - left)).unwrap();
            let md = compute_md(&genome, 0, &seq, start, &cigar);
            records.push(
                AlignmentRecord::builder(format!("gap{}", i))
                    .mapped("chr1", start)
                    .cigar(cigar)
                    .sequence(seq)
                    .qualities(vec![30; 30])
                    .md(md)
                    .build(),
            );
        }
        for (i, &start) in ungapped_starts.iter().enumerate() {
            let seq = alt[start as usize..start as usize + 24].to_vec();
            let cigar = parse_cigar("24M").unwrap();
            let md = compute_md(&genome, 0, &seq, start, &cigar);
            records.push(
                AlignmentRecord::builder(format!("flat{}", i))
                    .mapped("chr1", start)
                    .cigar(cigar)
                    .sequence(seq)
                    .qualities(vec![30; 24])
                    .md(md)
                    .build(),
            );
        }

        let context = ctx(3);
        let input = Collection::from_vec(&context, records.clone());
        let realigner = IndelRealigner::new(RealignmentOptions::default());
        let targets = realigner.targets(&input).unwrap();
        let out = realigner
            .realign(&input, context.broadcast(targets))
            .collect()
            .unwrap();

        prop_assert_eq!(out.len(), records.len());
        let before: BTreeMap<_, _> = records.iter().map(|r| (r.read_name.clone(), r)).collect();
        for record in &out {
            let original = before[&record.read_name];
            prop_assert_eq!(&record.sequence, &original.sequence);
            prop_assert!(matched_bases(record) >= matched_bases(original));
            prop_assert!(record.cigar.iter().all(|op| op.kind != CigarOpKind::HardClip));
        }
    }

    #[test]
    fn coordinate_sort_is_ordered_permutation(
        layout in proptest::collection::vec((0usize..3, 0u32..500, any::<bool>()), 0..120),
        partitions in 1usize..9,
    ) {
        let records: Vec<AlignmentRecord> = layout
            .iter()
            .enumerate()
            .map(|(i, &(contig, pos, unmapped))| {
                let builder = AlignmentRecord::builder(format!("s{:03}", (i * 7919) % 1000));
                if unmapped {
                    builder.unmapped().build()
                } else {
                    builder
                        .mapped(["chr1", "chr10", "chr2"][contig], pos)
                        .cigar(parse_cigar("5M").unwrap())
                        .build()
                }
            })
            .collect();

        let sorted = sort_by_coordinate(&Collection::from_vec(&ctx(partitions), records.clone()))
            .collect()
            .unwrap();
        prop_assert_eq!(sorted.len(), records.len());
        prop_assert!(sorted
            .windows(2)
            .all(|w| CoordinateKey::of(&w[0]) <= CoordinateKey::of(&w[1])));
        if let Some(first_unmapped) = sorted.iter().position(|r| !r.is_mapped()) {
            prop_assert!(sorted[first_unmapped..].iter().all(|r| !r.is_mapped()));
        }

        let mut expected = records;
        let mut actual = sorted;
        sort_canonical(&mut expected);
        sort_canonical(&mut actual);
        prop_assert_eq!(actual, expected);
    }
}
