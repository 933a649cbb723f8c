use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bitvec::prelude::*;
use tracing::{debug, info};

use super::column::{copy_field, ColumnData, ColumnFault};
use super::schema::{files, Manifest, RowGroupInfo};
use super::{ReadOptions, StoreError};
use crate::framework::{Collection, ExecutionContext, FrameworkError};
use crate::model::{AlignmentRecord, Field};

/// Read access to a validated container.
#[derive(Debug, Clone)]
pub struct ContainerReader {
    root: PathBuf,
    manifest: Arc<Manifest>,
}

impl ContainerReader {
    /// Open the container at `path`, validating its manifest.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        let manifest = Manifest::load(&root)?;
        debug!(
            path = %root.display(),
            rows = manifest.row_count,
            row_groups = manifest.row_groups.len(),
            schema_version = manifest.schema_version,
            "opened container"
        );
        Ok(Self {
            root,
            manifest: Arc::new(manifest),
        })
    }

    /// Container manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Rows stored.
    pub fn row_count(&self) -> u64 {
        self.manifest.row_count
    }

    /// Row groups stored.
    pub fn num_row_groups(&self) -> usize {
        self.manifest.row_groups.len()
    }

    /// Lazily load the container, one partition per row group.
    pub fn load(
        &self,
        ctx: &ExecutionContext,
        options: &ReadOptions,
    ) -> Result<Collection<AlignmentRecord>, StoreError> {
        options.predicate.validate()?;
        info!(
            path = %self.root.display(),
            columns = options.projection.len(),
            predicate = %options.predicate,
            "loading container"
        );

        let reader = self.clone();
        let options = options.clone();
        let label = self.root.display().to_string();
        Ok(Collection::from_loader(
            ctx,
            self.num_row_groups(),
            label,
            move |idx| {
                if idx >= reader.num_row_groups() {
                    return Ok(Vec::new());
                }
                reader
                    .read_row_group(idx, &options)
                    .map_err(|e| FrameworkError::load_failed(idx, e.to_string()))
            },
        ))
    }

    /// Decode one row group.
    ///
    /// Columns the predicate reads are decoded first and turned into a
    /// selection mask; projected columns are then applied to selected rows
    /// only. Columns absent from the container keep default values.
    pub fn read_row_group(
        &self,
        index: usize,
        options: &ReadOptions,
    ) -> Result<Vec<AlignmentRecord>, StoreError> {
        let group = self
            .manifest
            .row_groups
            .get(index)
            .ok_or_else(|| StoreError::Corrupt {
                path: self.root.join(files::MANIFEST),
                reason: format!("row group {} not declared", index),
            })?;
        let rows = group.rows as usize;

        if options.predicate.is_trivial() {
            let mut records = vec![AlignmentRecord::default(); rows];
            for field in options.projection.fields() {
                if let Some(column) = self.read_column(group, field)? {
                    self.apply(group, field, column, &mut records, None)?;
                }
            }
            return Ok(records);
        }

        let predicate_fields: BTreeSet<Field> = options.predicate.fields();
        let mut scratch = vec![AlignmentRecord::default(); rows];
        for &field in &predicate_fields {
            if let Some(column) = self.read_column(group, field)? {
                self.apply(group, field, column, &mut scratch, None)?;
            }
        }

        let mut selection: BitVec = BitVec::with_capacity(rows);
        selection.extend(scratch.iter().map(|r| options.predicate.evaluate(r)));
        let selected = selection.count_ones();

        let mut records = vec![AlignmentRecord::default(); selected];
        for field in options.projection.fields() {
            if predicate_fields.contains(&field) {
                for (target, row) in records.iter_mut().zip(selection.iter_ones()) {
                    copy_field(field, &scratch[row], target);
                }
            } else if selected > 0 {
                if let Some(column) = self.read_column(group, field)? {
                    self.apply(group, field, column, &mut records, Some(&selection))?;
                }
            }
        }
        debug!(row_group = group.id, rows, selected, "row group filtered");
        Ok(records)
    }

    fn column_path(&self, group: &RowGroupInfo, field: Field) -> PathBuf {
        self.root
            .join(files::row_group_dir(group.id))
            .join(files::column_file(field.name()))
    }

    /// Read and verify a column; `None` when the container never stored it.
    fn read_column(
        &self,
        group: &RowGroupInfo,
        field: Field,
    ) -> Result<Option<ColumnData>, StoreError> {
        if !self.manifest.has_field(field) {
            return Ok(None);
        }
        let path = self.column_path(group, field);
        let expected = group
            .checksums
            .get(field.name())
            .ok_or_else(|| StoreError::Corrupt {
                path: path.clone(),
                reason: "column has no recorded checksum".to_string(),
            })?;

        let bytes = fs::read(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let actual = blake3::hash(&bytes).to_hex().to_string();
        if &actual != expected {
            return Err(StoreError::Corrupt {
                path,
                reason: format!("checksum mismatch: expected {}, got {}", expected, actual),
            });
        }

        let (column, _): (ColumnData, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).map_err(
                |e| StoreError::Corrupt {
                    path: path.clone(),
                    reason: format!("undecodable column: {}", e),
                },
            )?;
        Ok(Some(column))
    }

    fn apply(
        &self,
        group: &RowGroupInfo,
        field: Field,
        column: ColumnData,
        records: &mut [AlignmentRecord],
        selection: Option<&BitSlice>,
    ) -> Result<(), StoreError> {
        column
            .apply(field, records, selection)
            .map_err(|fault| match fault {
                ColumnFault::Kind { expected, found } => StoreError::IncompatibleColumn {
                    column: field.name().to_string(),
                    expected,
                    found,
                },
                ColumnFault::Rows { expected, found } => StoreError::Corrupt {
                    path: self.column_path(group, field),
                    reason: format!("expected {} rows, found {}", expected, found),
                },
                ColumnFault::Value { row, reason } => StoreError::Corrupt {
                    path: self.column_path(group, field),
                    reason: format!("row {}: {}", row, reason),
                },
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parse_cigar, Flags};
    use crate::store::{save_with, Predicate, Projection, WriteOptions};

    fn ctx() -> ExecutionContext {
        ExecutionContext::with_threads(2, 2).unwrap()
    }

    fn records() -> Vec<AlignmentRecord> {
        (0..10u32)
            .map(|i| {
                AlignmentRecord::builder(format!("read{}", i))
                    .mapped("chr1", i * 10)
                    .cigar(parse_cigar("4M").unwrap())
                    .sequence(b"ACGT".to_vec())
                    .qualities(vec![30; 4])
                    .flag(Flags::DUPLICATE, i % 3 == 0)
                    .build()
            })
            .collect()
    }

    fn write(dir: &Path, row_group_size: usize) -> PathBuf {
        let path = dir.join("reads.rpc");
        let collection = Collection::from_vec(&ctx(), records());
        let options = WriteOptions {
            row_group_size,
            ..WriteOptions::default()
        };
        save_with(&collection, &path, &options).unwrap();
        path
    }

    #[test]
    fn pushdown_matches_post_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), 4);
        let reader = ContainerReader::open(&path).unwrap();
        let predicate = Predicate::FlagUnset(Flags::DUPLICATE);
        let options = ReadOptions::default().with_predicate(predicate.clone());

        let pushed = reader.load(&ctx(), &options).unwrap().collect().unwrap();
        let expected: Vec<_> = records()
            .into_iter()
            .filter(|r| predicate.evaluate(r))
            .collect();
        assert_eq!(pushed, expected);
    }

    #[test]
    fn projection_leaves_other_fields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), 100);
        let reader = ContainerReader::open(&path).unwrap();
        let options = ReadOptions::default()
            .with_projection(Projection::of([Field::ReadName]))
            .with_predicate(Predicate::eq(Field::ReferencePosition, 30u32));
        let out = reader.read_row_group(0, &options).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].read_name.as_ref(), "read3");
        assert_eq!(out[0].reference_position, None);
        assert!(out[0].sequence.is_empty());
    }

    #[test]
    fn checksum_mismatch_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), 100);
        let column = path.join("rg-00000").join("sequence.col");
        let mut bytes = fs::read(&column).unwrap();
        bytes[0] ^= 0xff;
        fs::write(&column, bytes).unwrap();

        let reader = ContainerReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_row_group(0, &ReadOptions::default()),
            Err(StoreError::Corrupt { .. })
        ));
        let lazy = reader.load(&ctx(), &ReadOptions::default()).unwrap();
        assert!(matches!(
            lazy.collect(),
            Err(FrameworkError::Source { partition: 0, .. })
        ));
    }
}
