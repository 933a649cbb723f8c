use std::sync::Arc;

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

use super::schema::ColumnKind;
use crate::model::{format_cigar, parse_cigar, AlignmentRecord, Field, Flags};

/// Values of one field across the rows of a row group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    /// Nullable strings.
    Text(Vec<Option<String>>),
    /// Byte arrays.
    Bytes(Vec<Vec<u8>>),
    /// Nullable 32-bit integers.
    OptionalU32(Vec<Option<u32>>),
    /// 8-bit integers.
    U8(Vec<u8>),
    /// 16-bit integers.
    U16(Vec<u16>),
}

/// Reason a decoded column cannot be applied to records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ColumnFault {
    Kind { expected: ColumnKind, found: ColumnKind },
    Rows { expected: usize, found: usize },
    Value { row: usize, reason: String },
}

impl ColumnData {
    /// Physical type of the column.
    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnData::Text(_) => ColumnKind::Text,
            ColumnData::Bytes(_) => ColumnKind::Bytes,
            ColumnData::OptionalU32(_) => ColumnKind::OptionalU32,
            ColumnData::U8(_) => ColumnKind::U8,
            ColumnData::U16(_) => ColumnKind::U16,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Text(v) => v.len(),
            ColumnData::Bytes(v) => v.len(),
            ColumnData::OptionalU32(v) => v.len(),
            ColumnData::U8(v) => v.len(),
            ColumnData::U16(v) => v.len(),
        }
    }

    /// Whether the column holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode one field of `records`.
    pub fn encode(field: Field, records: &[AlignmentRecord]) -> Self {
        let text = |f: &dyn Fn(&AlignmentRecord) -> Option<String>| {
            ColumnData::Text(records.iter().map(f).collect())
        };
        match field {
            Field::ReadName => text(&|r| Some(r.read_name.to_string())),
            Field::ReferenceName => text(&|r| r.reference_name.as_deref().map(str::to_string)),
            Field::Cigar => text(&|r| {
                if r.cigar.is_empty() {
                    None
                } else {
                    Some(format_cigar(&r.cigar))
                }
            }),
            Field::ReadGroupId => text(&|r| r.read_group_id.as_deref().map(str::to_string)),
            Field::MateReferenceName => {
                text(&|r| r.mate_reference_name.as_deref().map(str::to_string))
            }
            Field::MismatchingPositions => {
                text(&|r| r.mismatching_positions.as_deref().map(str::to_string))
            }
            Field::Sequence => {
                ColumnData::Bytes(records.iter().map(|r| r.sequence.to_vec()).collect())
            }
            Field::QualityScores => {
                ColumnData::Bytes(records.iter().map(|r| r.quality_scores.to_vec()).collect())
            }
            Field::OriginalQualityScores => ColumnData::Bytes(
                records
                    .iter()
                    .map(|r| r.original_quality_scores.to_vec())
                    .collect(),
            ),
            Field::ReferencePosition => {
                ColumnData::OptionalU32(records.iter().map(|r| r.reference_position).collect())
            }
            Field::MatePosition => {
                ColumnData::OptionalU32(records.iter().map(|r| r.mate_position).collect())
            }
            Field::MappingQuality => {
                ColumnData::U8(records.iter().map(|r| r.mapping_quality).collect())
            }
            Field::Flags => ColumnData::U16(records.iter().map(|r| r.flags.bits()).collect()),
        }
    }

    /// Write the column's values into `records`.
    ///
    /// With a selection, only selected rows are applied and `records` holds
    /// exactly one record per selected row, in row order.
    pub(crate) fn apply(
        self,
        field: Field,
        records: &mut [AlignmentRecord],
        selection: Option<&BitSlice>,
    ) -> Result<(), ColumnFault> {
        let expected_kind = super::schema::column_kind(field);
        if self.kind() != expected_kind {
            return Err(ColumnFault::Kind {
                expected: expected_kind,
                found: self.kind(),
            });
        }

        let rows = self.len();
        let expected_rows = selection.map(|s| s.len()).unwrap_or(records.len());
        if rows != expected_rows {
            return Err(ColumnFault::Rows {
                expected: expected_rows,
                found: rows,
            });
        }

        let selected = |row: usize| selection.map(|s| s[row]).unwrap_or(true);
        let mut targets = records.iter_mut();

        macro_rules! assign {
            ($values:expr, |$record:ident, $row:ident, $value:ident| $body:block) => {
                for ($row, $value) in $values.into_iter().enumerate() {
                    if !selected($row) {
                        continue;
                    }
                    let Some($record) = targets.next() else {
                        return Err(ColumnFault::Rows {
                            expected: $row,
                            found: rows,
                        });
                    };
                    $body
                }
            };
        }

        match self {
            ColumnData::Text(values) => assign!(values, |record, row, value| {
                match field {
                    Field::ReadName => record.read_name = Arc::from(value.unwrap_or_default()),
                    Field::ReferenceName => record.reference_name = value.map(Arc::from),
                    Field::ReadGroupId => record.read_group_id = value.map(Arc::from),
                    Field::MateReferenceName => record.mate_reference_name = value.map(Arc::from),
                    Field::MismatchingPositions => {
                        record.mismatching_positions = value.map(Arc::from)
                    }
                    Field::Cigar => {
                        record.cigar = match value {
                            Some(text) => parse_cigar(&text).map_err(|e| ColumnFault::Value {
                                row,
                                reason: e.to_string(),
                            })?,
                            None => Vec::new(),
                        }
                    }
                    _ => {}
                }
            }),
            ColumnData::Bytes(values) => assign!(values, |record, row, value| {
                let _ = row;
                match field {
                    Field::Sequence => record.sequence = Arc::from(value),
                    Field::QualityScores => record.quality_scores = Arc::from(value),
                    Field::OriginalQualityScores => {
                        record.original_quality_scores = Arc::from(value)
                    }
                    _ => {}
                }
            }),
            ColumnData::OptionalU32(values) => assign!(values, |record, row, value| {
                let _ = row;
                match field {
                    Field::ReferencePosition => record.reference_position = value,
                    Field::MatePosition => record.mate_position = value,
                    _ => {}
                }
            }),
            ColumnData::U8(values) => assign!(values, |record, row, value| {
                let _ = row;
                record.mapping_quality = value;
            }),
            ColumnData::U16(values) => assign!(values, |record, row, value| {
                let _ = row;
                record.flags = Flags::from_bits(value);
            }),
        }
        Ok(())
    }
}

/// Copy one field from `from` into `to`.
pub(crate) fn copy_field(field: Field, from: &AlignmentRecord, to: &mut AlignmentRecord) {
    match field {
        Field::ReadName => to.read_name = Arc::clone(&from.read_name),
        Field::Sequence => to.sequence = Arc::clone(&from.sequence),
        Field::QualityScores => to.quality_scores = Arc::clone(&from.quality_scores),
        Field::ReferenceName => to.reference_name = from.reference_name.clone(),
        Field::ReferencePosition => to.reference_position = from.reference_position,
        Field::Cigar => to.cigar = from.cigar.clone(),
        Field::ReadGroupId => to.read_group_id = from.read_group_id.clone(),
        Field::MappingQuality => to.mapping_quality = from.mapping_quality,
        Field::Flags => to.flags = from.flags,
        Field::MateReferenceName => to.mate_reference_name = from.mate_reference_name.clone(),
        Field::MatePosition => to.mate_position = from.mate_position,
        Field::MismatchingPositions => {
            to.mismatching_positions = from.mismatching_positions.clone()
        }
        Field::OriginalQualityScores => {
            to.original_quality_scores = Arc::clone(&from.original_quality_scores)
        }
    }
}
