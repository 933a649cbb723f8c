use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::schema::{column_kind, ColumnKind};
use super::StoreError;
use crate::model::{format_cigar, AlignmentRecord, Field};

/// Constant a field is compared against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    /// String constant for text columns.
    Text(String),
    /// Integer constant for numeric columns.
    Int(i64),
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Text(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::Text(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Int(value)
    }
}

impl From<u32> for Literal {
    fn from(value: u32) -> Self {
        Literal::Int(value as i64)
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl CompareOp {
    fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ordering == Equal,
            CompareOp::Ne => ordering != Equal,
            CompareOp::Lt => ordering == Less,
            CompareOp::Le => ordering != Greater,
            CompareOp::Gt => ordering == Greater,
            CompareOp::Ge => ordering != Less,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Row filter evaluated inside the store before records are materialized.
///
/// Every predicate names the columns it reads through
/// [`fields`](Predicate::fields), so the reader can decode exactly those
/// columns, build a selection mask, and skip the rest of the row group.
/// Comparisons against a null value are false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Keep every row.
    #[default]
    True,
    /// All sub-predicates hold (an empty list holds).
    And(Vec<Predicate>),
    /// Any sub-predicate holds (an empty list does not).
    Or(Vec<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
    /// Compare a scalar field with a constant.
    Compare {
        /// Column read.
        field: Field,
        /// Operator.
        op: CompareOp,
        /// Constant.
        value: Literal,
    },
    /// Every bit of the mask is set in the flags.
    FlagSet(u16),
    /// No bit of the mask is set in the flags.
    FlagUnset(u16),
    /// Field holds no value.
    IsNull(Field),
}

enum Value<'a> {
    Text(Option<std::borrow::Cow<'a, str>>),
    Int(Option<i64>),
    Bytes(&'a [u8]),
}

fn value_of(record: &AlignmentRecord, field: Field) -> Value<'_> {
    use std::borrow::Cow;
    match field {
        Field::ReadName => Value::Text(Some(Cow::Borrowed(record.read_name.as_ref()))),
        Field::ReferenceName => Value::Text(record.reference_name.as_deref().map(Cow::Borrowed)),
        Field::ReadGroupId => Value::Text(record.read_group_id.as_deref().map(Cow::Borrowed)),
        Field::MateReferenceName => {
            Value::Text(record.mate_reference_name.as_deref().map(Cow::Borrowed))
        }
        Field::MismatchingPositions => {
            Value::Text(record.mismatching_positions.as_deref().map(Cow::Borrowed))
        }
        Field::Cigar => Value::Text(if record.cigar.is_empty() {
            None
        } else {
            Some(Cow::Owned(format_cigar(&record.cigar)))
        }),
        Field::ReferencePosition => Value::Int(record.reference_position.map(i64::from)),
        Field::MatePosition => Value::Int(record.mate_position.map(i64::from)),
        Field::MappingQuality => Value::Int(Some(i64::from(record.mapping_quality))),
        Field::Flags => Value::Int(Some(i64::from(record.flags.bits()))),
        Field::Sequence => Value::Bytes(&record.sequence[..]),
        Field::QualityScores => Value::Bytes(&record.quality_scores[..]),
        Field::OriginalQualityScores => Value::Bytes(&record.original_quality_scores[..]),
    }
}

impl Predicate {
    /// `field op value`.
    pub fn compare(field: Field, op: CompareOp, value: impl Into<Literal>) -> Self {
        Predicate::Compare {
            field,
            op,
            value: value.into(),
        }
    }

    /// `field == value`.
    pub fn eq(field: Field, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    /// Conjunction of `self` and `other`.
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::True, p) | (p, Predicate::True) => p,
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), p) => {
                left.push(p);
                Predicate::And(left)
            }
            (p, q) => Predicate::And(vec![p, q]),
        }
    }

    /// Negation of `self`.
    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Reads starting in the half-open interval `[start, end)` on `reference`.
    ///
    /// Alignment ends are not stored as a column, so reads starting before
    /// `start` are not selected even when they reach into the interval.
    pub fn region(reference: &str, start: u32, end: u32) -> Self {
        Predicate::And(vec![
            Self::eq(Field::ReferenceName, reference),
            Self::compare(Field::ReferencePosition, CompareOp::Ge, start),
            Self::compare(Field::ReferencePosition, CompareOp::Lt, end),
        ])
    }

    /// Whether the predicate keeps every row without reading anything.
    pub fn is_trivial(&self) -> bool {
        match self {
            Predicate::True => true,
            Predicate::And(parts) => parts.iter().all(Predicate::is_trivial),
            _ => false,
        }
    }

    /// Columns the predicate reads.
    pub fn fields(&self) -> BTreeSet<Field> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut BTreeSet<Field>) {
        match self {
            Predicate::True => {}
            Predicate::And(parts) | Predicate::Or(parts) => {
                for part in parts {
                    part.collect_fields(out);
                }
            }
            Predicate::Not(inner) => inner.collect_fields(out),
            Predicate::Compare { field, .. } | Predicate::IsNull(field) => {
                out.insert(*field);
            }
            Predicate::FlagSet(_) | Predicate::FlagUnset(_) => {
                out.insert(Field::Flags);
            }
        }
    }

    /// Reject comparisons the store cannot evaluate.
    pub fn validate(&self) -> Result<(), StoreError> {
        match self {
            Predicate::True | Predicate::FlagSet(_) | Predicate::FlagUnset(_) => Ok(()),
            Predicate::IsNull(_) => Ok(()),
            Predicate::And(parts) | Predicate::Or(parts) => {
                parts.iter().try_for_each(Predicate::validate)
            }
            Predicate::Not(inner) => inner.validate(),
            Predicate::Compare { field, value, .. } => {
                let ok = matches!(
                    (column_kind(*field), value),
                    (ColumnKind::Text, Literal::Text(_))
                        | (ColumnKind::OptionalU32, Literal::Int(_))
                        | (ColumnKind::U8, Literal::Int(_))
                        | (ColumnKind::U16, Literal::Int(_))
                );
                if ok {
                    Ok(())
                } else {
                    Err(StoreError::InvalidPredicate(format!(
                        "cannot compare {} column '{}' with {:?}",
                        kind_name(column_kind(*field)),
                        field,
                        value
                    )))
                }
            }
        }
    }

    /// Evaluate against one record.
    pub fn evaluate(&self, record: &AlignmentRecord) -> bool {
        match self {
            Predicate::True => true,
            Predicate::And(parts) => parts.iter().all(|p| p.evaluate(record)),
            Predicate::Or(parts) => parts.iter().any(|p| p.evaluate(record)),
            Predicate::Not(inner) => !inner.evaluate(record),
            Predicate::FlagSet(mask) => record.flags.contains(*mask),
            Predicate::FlagUnset(mask) => record.flags.bits() & mask == 0,
            Predicate::IsNull(field) => match value_of(record, *field) {
                Value::Text(v) => v.is_none(),
                Value::Int(v) => v.is_none(),
                Value::Bytes(b) => b.is_empty(),
            },
            Predicate::Compare { field, op, value } => {
                match (value_of(record, *field), value) {
                    (Value::Text(Some(actual)), Literal::Text(expected)) => {
                        op.holds(str::cmp(&actual, expected))
                    }
                    (Value::Int(Some(actual)), Literal::Int(expected)) => {
                        op.holds(actual.cmp(expected))
                    }
                    _ => false,
                }
            }
        }
    }
}

fn kind_name(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Text => "text",
        ColumnKind::Bytes => "bytes",
        ColumnKind::OptionalU32 => "integer",
        ColumnKind::U8 => "integer",
        ColumnKind::U16 => "integer",
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => f.write_str("true"),
            Predicate::And(parts) | Predicate::Or(parts) => {
                let joiner = if matches!(self, Predicate::And(_)) {
                    " and "
                } else {
                    " or "
                };
                f.write_str("(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(joiner)?;
                    }
                    write!(f, "{}", part)?;
                }
                f.write_str(")")
            }
            Predicate::Not(inner) => write!(f, "not {}", inner),
            Predicate::Compare { field, op, value } => match value {
                Literal::Text(text) => write!(f, "{} {} '{}'", field, op.symbol(), text),
                Literal::Int(n) => write!(f, "{} {} {}", field, op.symbol(), n),
            },
            Predicate::FlagSet(mask) => write!(f, "flags & {:#x} == {:#x}", mask, mask),
            Predicate::FlagUnset(mask) => write!(f, "flags & {:#x} == 0", mask),
            Predicate::IsNull(field) => write!(f, "{} is null", field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parse_cigar, Flags};

    fn read(reference: Option<&str>, position: u32, flags: u16) -> AlignmentRecord {
        let builder = AlignmentRecord::builder("r1")
            .sequence(b"ACGT".to_vec())
            .qualities(vec![30; 4])
            .mapping_quality(40);
        let builder = match reference {
            Some(name) => builder.mapped(name, position).cigar(parse_cigar("4M").unwrap()),
            None => builder.unmapped(),
        };
        let mut record = builder.build();
        record.flags = Flags::from_bits(record.flags.bits() | flags);
        record
    }

    #[test]
    fn region_selects_reads_by_start() {
        let p = Predicate::region("chr1", 100, 200);
        assert!(p.evaluate(&read(Some("chr1"), 150, 0)));
        assert!(!p.evaluate(&read(Some("chr1"), 200, 0)));
        assert!(!p.evaluate(&read(Some("chr2"), 150, 0)));
        assert!(!p.evaluate(&read(None, 0, 0)));
        assert_eq!(
            p.fields().into_iter().collect::<Vec<_>>(),
            vec![Field::ReferenceName, Field::ReferencePosition]
        );
    }

    #[test]
    fn flags_null_and_negation() {
        let dup = read(Some("chr1"), 10, Flags::DUPLICATE);
        let unmapped = read(None, 0, 0);
        assert!(Predicate::FlagSet(Flags::DUPLICATE).evaluate(&dup));
        assert!(!Predicate::FlagUnset(Flags::DUPLICATE).evaluate(&dup));
        assert!(Predicate::IsNull(Field::ReferencePosition).evaluate(&unmapped));
        assert!(Predicate::IsNull(Field::OriginalQualityScores).evaluate(&dup));
        assert!(Predicate::IsNull(Field::ReferenceName)
            .negate()
            .evaluate(&dup));
    }

    #[test]
    fn and_flattens_and_drops_true() {
        let p = Predicate::True
            .and(Predicate::FlagSet(1))
            .and(Predicate::FlagUnset(2));
        assert_eq!(
            p,
            Predicate::And(vec![Predicate::FlagSet(1), Predicate::FlagUnset(2)])
        );
        assert!(Predicate::And(vec![]).is_trivial());
        assert!(!Predicate::Or(vec![]).evaluate(&read(None, 0, 0)));
    }

    #[test]
    fn validate_rejects_mismatched_literals() {
        assert!(Predicate::eq(Field::ReadName, "r1").validate().is_ok());
        assert!(Predicate::eq(Field::MappingQuality, 30u32).validate().is_ok());
        assert!(matches!(
            Predicate::eq(Field::ReferencePosition, "100").validate(),
            Err(StoreError::InvalidPredicate(_))
        ));
        assert!(Predicate::eq(Field::Sequence, "ACGT").validate().is_err());
    }

    #[test]
    fn display_is_readable() {
        let p = Predicate::compare(Field::MappingQuality, CompareOp::Ge, 20u32)
            .and(Predicate::FlagUnset(Flags::DUPLICATE));
        assert_eq!(p.to_string(), "(mapping_quality >= 20 and flags & 0x400 == 0)");
    }
}
