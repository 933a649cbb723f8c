use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tempfile::TempDir;
use tracing::{debug, info};

use super::column::ColumnData;
use super::schema::{column_kind, files, ColumnInfo, Manifest, RowGroupInfo};
use super::{Projection, StoreError};
use crate::framework::ExecutionContext;
use crate::model::{AlignmentRecord, Field};

/// Default maximum rows per row group.
pub const DEFAULT_ROW_GROUP_SIZE: usize = 65_536;

/// How a container is laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Maximum rows per row group; partitions larger than this are split.
    pub row_group_size: usize,
    /// Columns to write. Omitted columns read back as defaults.
    pub columns: Projection,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            columns: Projection::all(),
        }
    }
}

/// Outcome of a completed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSummary {
    /// Final container location.
    pub path: PathBuf,
    /// Rows written.
    pub rows: u64,
    /// Row groups written.
    pub row_groups: usize,
    /// Bytes of column data written.
    pub bytes: u64,
}

/// Writes a container into a staging directory and publishes it on
/// [`finish`](ContainerWriter::finish).
///
/// Dropping the writer without finishing removes the staging directory and
/// leaves the target untouched.
#[derive(Debug)]
pub struct ContainerWriter {
    target: PathBuf,
    staging: TempDir,
    options: WriteOptions,
    manifest: Manifest,
    bytes: u64,
}

impl ContainerWriter {
    /// Prepare a staged write to `path`, which must not exist yet.
    pub fn create(path: impl AsRef<Path>, options: WriteOptions) -> Result<Self, StoreError> {
        let target = path.as_ref().to_path_buf();
        if target.exists() {
            return Err(StoreError::AlreadyExists(target));
        }
        if options.row_group_size == 0 {
            return Err(StoreError::Encode(
                "row group size must be > 0".to_string(),
            ));
        }

        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|source| StoreError::Io {
            path: parent.clone(),
            source,
        })?;
        let staging = tempfile::Builder::new()
            .prefix(".readprep-staging-")
            .tempdir_in(&parent)
            .map_err(|source| StoreError::Io {
                path: parent.clone(),
                source,
            })?;

        let mut manifest = Manifest::current();
        manifest.columns = options
            .columns
            .fields()
            .map(|field| ColumnInfo {
                name: field.name().to_string(),
                kind: column_kind(field),
            })
            .collect();

        debug!(path = %target.display(), staging = %staging.path().display(), "staging container");
        Ok(Self {
            target,
            staging,
            options,
            manifest,
            bytes: 0,
        })
    }

    /// Write one partition as one or more row groups.
    pub fn write_partition(
        &mut self,
        ctx: &ExecutionContext,
        records: &[AlignmentRecord],
    ) -> Result<(), StoreError> {
        for chunk in records.chunks(self.options.row_group_size) {
            self.write_row_group(ctx, chunk)?;
        }
        Ok(())
    }

    /// Write `records` as a single row group. Empty input writes nothing.
    pub fn write_row_group(
        &mut self,
        ctx: &ExecutionContext,
        records: &[AlignmentRecord],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let id = self.manifest.row_groups.len() as u32;
        let dir = self.staging.path().join(files::row_group_dir(id));
        fs::create_dir(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let fields: Vec<Field> = self.options.columns.fields().collect();
        let written: Vec<(String, String, u64)> = ctx.install(|| {
            fields
                .par_iter()
                .map(|&field| write_column(&dir, field, records))
                .collect::<Result<Vec<_>, StoreError>>()
        })?;

        let mut info = RowGroupInfo {
            id,
            rows: records.len() as u64,
            checksums: Default::default(),
        };
        for (name, checksum, size) in written {
            info.checksums.insert(name, checksum);
            self.bytes += size;
        }
        self.manifest.row_count += info.rows;
        self.manifest.row_groups.push(info);
        Ok(())
    }

    /// Write the manifest and move the container into place.
    pub fn finish(self) -> Result<StoreSummary, StoreError> {
        self.manifest.save(self.staging.path())?;

        if self.target.exists() {
            return Err(StoreError::AlreadyExists(self.target));
        }
        fs::rename(self.staging.path(), &self.target).map_err(|source| StoreError::Io {
            path: self.target.clone(),
            source,
        })?;

        let summary = StoreSummary {
            path: self.target,
            rows: self.manifest.row_count,
            row_groups: self.manifest.row_groups.len(),
            bytes: self.bytes,
        };
        info!(
            path = %summary.path.display(),
            rows = summary.rows,
            row_groups = summary.row_groups,
            bytes = summary.bytes,
            "container written"
        );
        Ok(summary)
    }
}

fn write_column(
    dir: &Path,
    field: Field,
    records: &[AlignmentRecord],
) -> Result<(String, String, u64), StoreError> {
    let column = ColumnData::encode(field, records);
    let bytes = bincode::serde::encode_to_vec(&column, bincode::config::standard())
        .map_err(|e| StoreError::Encode(format!("column {}: {}", field, e)))?;
    let checksum = blake3::hash(&bytes).to_hex().to_string();
    let path = dir.join(files::column_file(field.name()));
    fs::write(&path, &bytes).map_err(|source| StoreError::Io { path, source })?;
    Ok((field.name().to_string(), checksum, bytes.len() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExecutionContext {
        ExecutionContext::with_threads(2, 2).unwrap()
    }

    fn records(n: usize) -> Vec<AlignmentRecord> {
        (0..n)
            .map(|i| {
                AlignmentRecord::builder(format!("read{}", i))
                    .unmapped()
                    .sequence(b"ACGT".to_vec())
                    .qualities(vec![20; 4])
                    .build()
            })
            .collect()
    }

    #[test]
    fn partitions_are_split_into_row_groups() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.rpc");
        let options = WriteOptions {
            row_group_size: 3,
            ..WriteOptions::default()
        };
        let mut writer = ContainerWriter::create(&target, options).unwrap();
        writer.write_partition(&ctx(), &records(7)).unwrap();
        writer.write_partition(&ctx(), &[]).unwrap();
        let summary = writer.finish().unwrap();

        assert_eq!(summary.rows, 7);
        assert_eq!(summary.row_groups, 3);
        let manifest = Manifest::load(&target).unwrap();
        assert_eq!(
            manifest.row_groups.iter().map(|rg| rg.rows).collect::<Vec<_>>(),
            vec![3, 3, 1]
        );
        assert!(target.join("rg-00002").join("read_name.col").exists());
    }

    #[test]
    fn abandoned_writer_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.rpc");
        {
            let mut writer = ContainerWriter::create(&target, WriteOptions::default()).unwrap();
            writer.write_partition(&ctx(), &records(2)).unwrap();
        }
        assert!(!target.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn existing_target_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ContainerWriter::create(dir.path(), WriteOptions::default()),
            Err(StoreError::AlreadyExists(_))
        ));
    }
}
