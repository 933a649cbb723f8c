mod common;

use std::fs;
use std::sync::Arc;

use readprep::framework::{Collection, FrameworkError};
use readprep::model::{AlignmentRecord, Field, Flags};
use readprep::pipeline::PipelineError;
use readprep::store::{
    self, files, CompareOp, Manifest, Predicate, Projection, ReadOptions, StoreError, WriteOptions,
};
use tempfile::TempDir;
use test_case::test_case;

use common::{ctx, pair, read_from, reference, sort_canonical};

fn fixture() -> Vec<AlignmentRecord> {
    let genome = reference(5_000, 21);
    let mut records = Vec::new();
    for i in 0..60u32 {
        records.extend(pair(&genome, &format!("p{:03}", i), i * 40, i * 40 + 200, 20 + (i % 20) as u8));
    }
    let mut dup = read_from(&genome, "single", 17, 30, 35, &[3, 9]);
    dup.flags = dup.flags.with(Flags::DUPLICATE, true);
    dup.original_quality_scores = Arc::from(vec![12u8; 30]);
    records.push(dup);
    records.push(AlignmentRecord::builder("lost").unmapped().sequence(b"ACGTN".to_vec()).build());
    records
}

fn write(dir: &TempDir, name: &str, records: Vec<AlignmentRecord>, options: &WriteOptions) -> std::path::PathBuf {
    let path = dir.path().join(name);
    store::save_with(&Collection::from_vec(&ctx(4), records), &path, options).unwrap();
    path
}

#[test_case(1 ; "one row per group")]
#[test_case(7 ; "uneven groups")]
#[test_case(100_000 ; "single group")]
fn round_trip_with_full_projection_is_lossless(row_group_size: usize) {
    let dir = TempDir::new().unwrap();
    let records = fixture();
    let options = WriteOptions {
        row_group_size,
        ..WriteOptions::default()
    };
    let path = write(&dir, "reads.rpc", records.clone(), &options);

    let mut loaded = store::load(&ctx(3), &path, &ReadOptions::default())
        .unwrap()
        .collect()
        .unwrap();
    let mut expected = records;
    sort_canonical(&mut loaded);
    sort_canonical(&mut expected);
    assert_eq!(loaded, expected);
}

#[test]
fn projection_fills_only_requested_fields() {
    let dir = TempDir::new().unwrap();
    let records = fixture();
    let path = write(&dir, "reads.rpc", records.clone(), &WriteOptions::default());

    let projection = Projection::of([Field::ReadName, Field::ReferencePosition]);
    let options = ReadOptions::default().with_projection(projection);
    let mut loaded = store::load(&ctx(2), &path, &options).unwrap().collect().unwrap();
    let mut expected: Vec<AlignmentRecord> = records
        .iter()
        .map(|r| AlignmentRecord {
            read_name: Arc::clone(&r.read_name),
            reference_position: r.reference_position,
            ..AlignmentRecord::default()
        })
        .collect();
    sort_canonical(&mut loaded);
    sort_canonical(&mut expected);
    assert_eq!(loaded, expected);
}

#[test_case(Predicate::compare(Field::MappingQuality, CompareOp::Ge, 30i64) ; "mapq")]
#[test_case(Predicate::region("chr1", 400, 1_200) ; "region")]
#[test_case(Predicate::FlagUnset(Flags::DUPLICATE).and(Predicate::FlagSet(Flags::REVERSE)) ; "flags")]
#[test_case(Predicate::IsNull(Field::ReferenceName) ; "unmapped")]
#[test_case(Predicate::Or(vec![
    Predicate::eq(Field::ReadName, "single"),
    Predicate::compare(Field::ReferencePosition, CompareOp::Lt, 80i64),
]).negate() ; "negated disjunction")]
fn pushdown_equals_post_filter(predicate: Predicate) {
    let dir = TempDir::new().unwrap();
    let mut records = fixture();
    for (i, r) in records.iter_mut().enumerate() {
        r.mapping_quality = (i % 61) as u8;
    }
    let path = write(
        &dir,
        "reads.rpc",
        records.clone(),
        &WriteOptions {
            row_group_size: 13,
            ..WriteOptions::default()
        },
    );

    let projection = Projection::of([Field::ReadName, Field::Flags, Field::Sequence]);
    let options = ReadOptions::default()
        .with_projection(projection.clone())
        .with_predicate(predicate.clone());
    let mut pushed = store::load(&ctx(2), &path, &options).unwrap().collect().unwrap();

    let full = store::load(&ctx(2), &path, &ReadOptions::default()).unwrap();
    let mut filtered: Vec<AlignmentRecord> = full
        .filter(move |r| predicate.evaluate(r))
        .map(|r| AlignmentRecord {
            read_name: r.read_name,
            flags: r.flags,
            sequence: r.sequence,
            ..AlignmentRecord::default()
        })
        .collect()
        .unwrap();

    sort_canonical(&mut pushed);
    sort_canonical(&mut filtered);
    assert_eq!(pushed, filtered);
}

#[test]
fn predicate_against_wrong_column_type_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "reads.rpc", fixture(), &WriteOptions::default());
    let options =
        ReadOptions::default().with_predicate(Predicate::eq(Field::MappingQuality, "high"));
    assert!(matches!(
        store::load(&ctx(2), &path, &options),
        Err(StoreError::InvalidPredicate(_))
    ));
}

#[test]
fn containers_without_newer_columns_read_as_defaults() {
    let dir = TempDir::new().unwrap();
    let records = fixture();
    let older: Projection = Field::ALL
        .into_iter()
        .filter(|f| !matches!(f, Field::MismatchingPositions | Field::OriginalQualityScores))
        .collect();
    let path = write(
        &dir,
        "old.rpc",
        records.clone(),
        &WriteOptions {
            columns: older,
            ..WriteOptions::default()
        },
    );

    let loaded = store::load(&ctx(2), &path, &ReadOptions::default())
        .unwrap()
        .collect()
        .unwrap();
    assert_eq!(loaded.len(), records.len());
    assert!(loaded.iter().all(|r| r.mismatching_positions.is_none()));
    assert!(loaded.iter().all(|r| r.original_quality_scores.is_empty()));
    assert!(loaded.iter().any(|r| !r.sequence.is_empty()));
}

#[test]
fn unknown_columns_are_ignored() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "reads.rpc", fixture(), &WriteOptions::default());

    let manifest_path = path.join(files::MANIFEST);
    let mut manifest: Manifest = toml::from_str(&fs::read_to_string(&manifest_path).unwrap()).unwrap();
    manifest.columns.push(store::ColumnInfo {
        name: "insert_size".to_string(),
        kind: store::ColumnKind::OptionalU32,
    });
    fs::write(&manifest_path, toml::to_string_pretty(&manifest).unwrap()).unwrap();

    let loaded = store::load(&ctx(2), &path, &ReadOptions::default())
        .unwrap()
        .count()
        .unwrap();
    assert_eq!(loaded, fixture().len());
}

#[test]
fn schema_conflicts_are_schema_errors() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "reads.rpc", fixture(), &WriteOptions::default());
    let manifest_path = path.join(files::MANIFEST);
    let original = fs::read_to_string(&manifest_path).unwrap();

    let retyped = original.replacen("kind = \"u8\"", "kind = \"text\"", 1);
    fs::write(&manifest_path, retyped).unwrap();
    let err = store::load(&ctx(2), &path, &ReadOptions::default()).unwrap_err();
    assert!(err.is_schema_error(), "{}", err);
    assert!(matches!(PipelineError::from_load(err), PipelineError::Schema(_)));

    let mut manifest: Manifest = toml::from_str(&original).unwrap();
    manifest.format_version += 1;
    fs::write(&manifest_path, toml::to_string_pretty(&manifest).unwrap()).unwrap();
    assert!(matches!(
        store::load(&ctx(2), &path, &ReadOptions::default()),
        Err(StoreError::UnsupportedVersion { .. })
    ));

    manifest.format_version -= 1;
    manifest.magic = "SOMETHING_ELSE".to_string();
    fs::write(&manifest_path, toml::to_string_pretty(&manifest).unwrap()).unwrap();
    let err = store::load(&ctx(2), &path, &ReadOptions::default()).unwrap_err();
    assert!(err.is_schema_error());
}

#[test]
fn damaged_column_is_an_ingestion_error() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "reads.rpc", fixture(), &WriteOptions::default());
    let column = path
        .join(files::row_group_dir(0))
        .join(files::column_file(Field::Sequence.name()));
    let mut bytes = fs::read(&column).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&column, bytes).unwrap();

    let loaded = store::load(&ctx(2), &path, &ReadOptions::default()).unwrap();
    let err = loaded.collect().unwrap_err();
    assert!(matches!(err, FrameworkError::Source { partition: 0, .. }));
    assert!(matches!(
        PipelineError::at_stage(readprep::pipeline::Stage::Load, err),
        PipelineError::Ingestion(_)
    ));
}

#[test]
fn failed_save_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("never.rpc");
    let failing = Collection::from_vec(&ctx(3), fixture()).try_map(|r| {
        if r.read_name.as_ref() == "single" {
            Err(FrameworkError::transform("boom"))
        } else {
            Ok(r)
        }
    });
    assert!(store::save(&failing, &path).is_err());
    assert!(!path.exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn existing_container_is_not_overwritten() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "reads.rpc", fixture(), &WriteOptions::default());
    let before = fs::read_to_string(path.join(files::MANIFEST)).unwrap();
    let err = store::save(&Collection::from_vec(&ctx(1), Vec::new()), &path).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));
    assert_eq!(fs::read_to_string(path.join(files::MANIFEST)).unwrap(), before);
}
