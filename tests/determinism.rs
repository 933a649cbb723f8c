mod common;

use std::collections::HashSet;

use blake3::Hasher;
use readprep::framework::{Collection, ExecutionContext};
use readprep::model::{compute_md, parse_cigar, AlignmentRecord};
use readprep::pipeline::{TransformConfig, Transformer};
use readprep::store::{self, ReadOptions};

use common::{pair, read_from, reference, Lcg};

fn gapped(genome: &[u8], name: &str, pos: u32) -> AlignmentRecord {
    let start = pos as usize;
    let mut seq = genome[start..start + 20].to_vec();
    seq.extend_from_slice(&genome[start + 22..start + 42]);
    let cigar = parse_cigar("20M2D20M").unwrap();
    let md = compute_md(genome, 0, &seq, pos, &cigar);
    AlignmentRecord::builder(name)
        .mapped("chr1", pos)
        .cigar(cigar)
        .sequence(seq)
        .qualities(vec![32; 40])
        .read_group("rg1")
        .md(md)
        .build()
}

fn dataset() -> Vec<AlignmentRecord> {
    let genome = reference(40_000, 99);
    let mut rng = Lcg::new(4);
    let mut records = Vec::new();
    for i in 0..300u32 {
        let left = rng.below(38_000);
        let right = left + 150 + rng.below(300);
        records.extend(pair(&genome, &format!("t{:04}", i), left, right, 20 + (i % 15) as u8));
    }
    for i in 0..200u32 {
        let pos = rng.below(39_000);
        let mismatches: Vec<usize> = (0..rng.below(3)).map(|_| rng.below(40) as usize).collect();
        records.push(read_from(&genome, &format!("s{:04}", i), pos, 40, 30, &mismatches));
    }
    // Copies of the first ten templates.
    for i in 0..10usize {
        let mut copy = records[2 * i].clone();
        copy.read_name = format!("zz{:02}", i).into();
        records.push(copy);
    }
    // A deletion hotspot with ungapped reads across it.
    records.push(gapped(&genome, "g1", 20_000));
    records.push(gapped(&genome, "g2", 20_004));
    for i in 0..4u32 {
        records.push(read_from(&genome, &format!("h{}", i), 20_010 + i, 16, 30, &[]));
    }
    records.push(AlignmentRecord::builder("nowhere").unmapped().sequence(b"ACGT".to_vec()).build());
    records
}

fn fingerprint(records: &[AlignmentRecord]) -> blake3::Hash {
    let mut hasher = Hasher::new();
    for record in records {
        hasher.update(format!("{:?}\n", record).as_bytes());
    }
    hasher.finalize()
}

fn run(partitions: usize, threads: usize) -> blake3::Hash {
    let ctx = ExecutionContext::with_threads(partitions, threads).unwrap();
    let config = TransformConfig {
        min_observations_for_bucket: 10,
        ..TransformConfig::default()
    };
    let out = Transformer::new(config)
        .unwrap()
        .run(&Collection::from_vec(&ctx, dataset()))
        .unwrap();
    fingerprint(&out.records.collect().unwrap())
}

#[test]
fn pipeline_output_is_independent_of_partitioning() {
    let mut fingerprints = HashSet::new();
    for (partitions, threads) in [(1, 1), (2, 1), (3, 4), (8, 2), (17, 8)] {
        fingerprints.insert(run(partitions, threads));
    }
    assert_eq!(fingerprints.len(), 1, "outputs diverged across partitionings");
}

#[test]
fn repeated_runs_agree() {
    let first = run(4, 4);
    for _ in 0..3 {
        assert_eq!(run(4, 4), first);
    }
}

#[test]
fn stored_output_round_trips_to_the_same_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ExecutionContext::with_threads(5, 3).unwrap();
    let config = TransformConfig {
        min_observations_for_bucket: 10,
        ..TransformConfig::default()
    };
    let out = Transformer::new(config)
        .unwrap()
        .run(&Collection::from_vec(&ctx, dataset()))
        .unwrap();
    let expected = fingerprint(&out.records.collect().unwrap());

    let path = dir.path().join("prepared.rpc");
    store::save(&out.records, &path).unwrap();
    let reloaded = store::load(&ctx, &path, &ReadOptions::default())
        .unwrap()
        .collect()
        .unwrap();
    assert_eq!(fingerprint(&reloaded), expected);
}
