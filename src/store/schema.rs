//! Container layout, manifest and column typing.
//!
//! ```text
//! reads.rpc/
//! ├── manifest.toml          # magic, versions, columns, row groups + checksums
//! ├── rg-00000/
//! │   ├── read_name.col      # one bincode-encoded column per field
//! │   └── ...
//! └── rg-00001/
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::model::Field;

/// Format version of the container layout.
/// Increment when making breaking changes to the layout.
pub const FORMAT_VERSION: u32 = 1;

/// Version of the record schema; bumped on every additive field change.
pub const SCHEMA_VERSION: u32 = 2;

/// Magic string identifying a container manifest.
pub const FORMAT_MAGIC: &str = "READPREP_COLUMNAR_V1";

/// Standard file names within a container directory.
pub mod files {
    /// Manifest file name.
    pub const MANIFEST: &str = "manifest.toml";

    /// Directory name of a row group.
    pub fn row_group_dir(id: u32) -> String {
        format!("rg-{:05}", id)
    }

    /// File name of a column inside a row group.
    pub fn column_file(name: &str) -> String {
        format!("{}.col", name)
    }
}

/// Physical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Nullable UTF-8 strings.
    Text,
    /// Byte arrays (empty when absent).
    Bytes,
    /// Nullable unsigned 32-bit integers.
    OptionalU32,
    /// Unsigned 8-bit integers.
    U8,
    /// Unsigned 16-bit integers.
    U16,
}

/// Column type every field is written with.
pub fn column_kind(field: Field) -> ColumnKind {
    match field {
        Field::ReadName
        | Field::ReferenceName
        | Field::Cigar
        | Field::ReadGroupId
        | Field::MateReferenceName
        | Field::MismatchingPositions => ColumnKind::Text,
        Field::Sequence | Field::QualityScores | Field::OriginalQualityScores => ColumnKind::Bytes,
        Field::ReferencePosition | Field::MatePosition => ColumnKind::OptionalU32,
        Field::MappingQuality => ColumnKind::U8,
        Field::Flags => ColumnKind::U16,
    }
}

/// Column declared in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column (field) name.
    pub name: String,
    /// Physical type.
    pub kind: ColumnKind,
}

/// Row group declared in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowGroupInfo {
    /// Row group identifier (directory suffix).
    pub id: u32,
    /// Number of rows.
    pub rows: u64,
    /// blake3 hex digest per column file.
    pub checksums: BTreeMap<String, String>,
}

/// Manifest containing container metadata.
///
/// Stored as TOML for human readability and easy inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Magic string for format identification.
    pub magic: String,
    /// Layout version for compatibility checking.
    pub format_version: u32,
    /// Record schema version the writer used.
    pub schema_version: u32,
    /// Total number of rows.
    pub row_count: u64,
    /// Writer identification.
    #[serde(default)]
    pub created_by: String,
    /// Columns present in every row group.
    pub columns: Vec<ColumnInfo>,
    /// Row groups in order.
    #[serde(default)]
    pub row_groups: Vec<RowGroupInfo>,
}

impl Manifest {
    /// Manifest for a container written with the current schema.
    pub fn current() -> Self {
        Self {
            magic: FORMAT_MAGIC.to_string(),
            format_version: FORMAT_VERSION,
            schema_version: SCHEMA_VERSION,
            row_count: 0,
            created_by: format!("readprep {}", env!("CARGO_PKG_VERSION")),
            columns: Field::ALL
                .iter()
                .map(|&field| ColumnInfo {
                    name: field.name().to_string(),
                    kind: column_kind(field),
                })
                .collect(),
            row_groups: Vec::new(),
        }
    }

    /// Save manifest to the container directory.
    pub fn save(&self, dir: &Path) -> Result<(), StoreError> {
        let path = dir.join(files::MANIFEST);
        let text = toml::to_string_pretty(self)
            .map_err(|e| StoreError::Encode(format!("manifest: {}", e)))?;
        fs::write(&path, text).map_err(|source| StoreError::Io { path, source })
    }

    /// Load and validate a manifest from the container directory.
    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join(files::MANIFEST);
        let text = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let manifest: Self = toml::from_str(&text).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            reason: format!("unparsable manifest: {}", e),
        })?;

        if manifest.magic != FORMAT_MAGIC {
            return Err(StoreError::UnknownFormat {
                found: manifest.magic,
            });
        }
        if manifest.format_version > FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: manifest.format_version,
                supported: FORMAT_VERSION,
            });
        }
        manifest.check_columns()?;

        let declared: u64 = manifest.row_groups.iter().map(|rg| rg.rows).sum();
        if declared != manifest.row_count {
            return Err(StoreError::Corrupt {
                path,
                reason: format!(
                    "row groups hold {} rows, manifest declares {}",
                    declared, manifest.row_count
                ),
            });
        }
        Ok(manifest)
    }

    /// Reject columns whose physical type changed; unknown columns are allowed.
    fn check_columns(&self) -> Result<(), StoreError> {
        for column in &self.columns {
            if let Ok(field) = column.name.parse::<Field>() {
                let expected = column_kind(field);
                if column.kind != expected {
                    return Err(StoreError::IncompatibleColumn {
                        column: column.name.clone(),
                        expected,
                        found: column.kind,
                    });
                }
            }
        }
        Ok(())
    }

    /// Known fields present in the container.
    pub fn fields(&self) -> Vec<Field> {
        self.columns
            .iter()
            .filter_map(|column| column.name.parse::<Field>().ok())
            .collect()
    }

    /// Whether the container stores `field`.
    pub fn has_field(&self, field: Field) -> bool {
        self.columns.iter().any(|column| column.name == field.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_manifest_covers_schema() {
        let manifest = Manifest::current();
        assert_eq!(manifest.fields().len(), Field::ALL.len());
        assert!(manifest.check_columns().is_ok());
    }

    #[test]
    fn changed_column_kind_is_rejected() {
        let mut manifest = Manifest::current();
        manifest.columns[0].kind = ColumnKind::U8;
        assert!(matches!(
            manifest.check_columns(),
            Err(StoreError::IncompatibleColumn { .. })
        ));
    }

    #[test]
    fn unknown_columns_are_tolerated() {
        let mut manifest = Manifest::current();
        manifest.columns.push(ColumnInfo {
            name: "insert_size".to_string(),
            kind: ColumnKind::OptionalU32,
        });
        assert!(manifest.check_columns().is_ok());
        assert_eq!(manifest.fields().len(), Field::ALL.len());
    }
}
