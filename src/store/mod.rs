//! Columnar store: schema-evolvable, projection- and predicate-aware
//! persistence of record collections.
//!
//! A container is a directory holding a TOML manifest and one bincode-encoded
//! file per column per row group. Reads decode only the projected columns
//! plus the columns the predicate needs; each row group becomes one
//! partition of the loaded [`Collection`]. Writes are staged in a hidden
//! sibling directory and renamed into place, so a container is either
//! complete or absent.

mod column;
mod predicate;
mod projection;
mod reader;
mod schema;
mod writer;

pub use column::ColumnData;
pub use predicate::{CompareOp, Literal, Predicate};
pub use projection::Projection;
pub use reader::ContainerReader;
pub use schema::{
    column_kind, files, ColumnInfo, ColumnKind, Manifest, RowGroupInfo, FORMAT_MAGIC,
    FORMAT_VERSION, SCHEMA_VERSION,
};
pub use writer::{ContainerWriter, StoreSummary, WriteOptions, DEFAULT_ROW_GROUP_SIZE};

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::framework::{Collection, ExecutionContext, FrameworkError};
use crate::model::AlignmentRecord;

/// Errors that can occur while reading or writing containers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem access failed.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// Container content is damaged or inconsistent.
    #[error("corrupt container data at {}: {reason}", .path.display())]
    Corrupt {
        /// File implicated.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// Manifest does not identify a readprep container.
    #[error("not a readprep container: manifest magic '{found}'")]
    UnknownFormat {
        /// Magic recorded in the manifest.
        found: String,
    },

    /// Container written by a newer, incompatible layout.
    #[error("unsupported container format version {found} (this build reads up to {supported})")]
    UnsupportedVersion {
        /// Version recorded in the manifest.
        found: u32,
        /// Newest version this build understands.
        supported: u32,
    },

    /// Known column stored with a different physical type.
    #[error("column '{column}' stored as {found:?}, expected {expected:?}")]
    IncompatibleColumn {
        /// Column name.
        column: String,
        /// Type the schema declares.
        expected: ColumnKind,
        /// Type found in the container.
        found: ColumnKind,
    },

    /// Serialization failed while writing.
    #[error("encoding failed: {0}")]
    Encode(String),

    /// Refusing to overwrite an existing container.
    #[error("container already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    /// Predicate cannot be evaluated against the schema.
    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    /// Executing the collection being saved failed.
    #[error(transparent)]
    Framework(#[from] FrameworkError),
}

impl StoreError {
    /// Whether the error stems from a schema incompatibility rather than
    /// damaged or unreadable data.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            StoreError::UnknownFormat { .. }
                | StoreError::UnsupportedVersion { .. }
                | StoreError::IncompatibleColumn { .. }
        )
    }
}

/// What to materialize when loading a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Fields to decode.
    pub projection: Projection,
    /// Rows to keep.
    pub predicate: Predicate,
}

impl ReadOptions {
    /// Restrict decoded fields.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Restrict returned rows.
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }
}

/// Open the container at `path` as a lazily loaded collection.
///
/// The manifest is read and validated eagerly; column data is decoded when
/// an action runs.
pub fn load(
    ctx: &ExecutionContext,
    path: impl AsRef<Path>,
    options: &ReadOptions,
) -> Result<Collection<AlignmentRecord>, StoreError> {
    ContainerReader::open(path)?.load(ctx, options)
}

/// Execute `collection` and persist it at `path` with default options.
pub fn save(
    collection: &Collection<AlignmentRecord>,
    path: impl AsRef<Path>,
) -> Result<StoreSummary, StoreError> {
    save_with(collection, path, &WriteOptions::default())
}

/// Execute `collection` and persist it at `path`.
///
/// Nothing is visible at `path` unless every partition was computed and
/// every file written.
pub fn save_with(
    collection: &Collection<AlignmentRecord>,
    path: impl AsRef<Path>,
    options: &WriteOptions,
) -> Result<StoreSummary, StoreError> {
    let mut writer = ContainerWriter::create(path, options.clone())?;
    let partitions = collection.partitions()?;
    for partition in &partitions {
        writer.write_partition(collection.context(), partition)?;
    }
    writer.finish()
}
