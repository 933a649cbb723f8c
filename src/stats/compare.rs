use std::collections::BTreeMap;
use std::fmt;
use std::slice;
use std::sync::Arc;

use serde::Serialize;

use crate::framework::{Collection, FrameworkError};
use crate::model::{AlignmentRecord, Field, Flags};
use crate::store::ColumnData;

/// Flag bits that distinguish records sharing a read name.
const SEGMENT_BITS: u16 =
    Flags::FIRST_OF_PAIR | Flags::SECOND_OF_PAIR | Flags::SECONDARY | Flags::SUPPLEMENTARY;

/// Record-level differences between two collections.
///
/// Records are matched by read name and segment (first/second of pair,
/// secondary, supplementary); several records sharing that identity are
/// matched in collection order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Comparison {
    /// Records in the first collection.
    pub left: u64,
    /// Records in the second collection.
    pub right: u64,
    /// Records matched on both sides.
    pub matched: u64,
    /// Matched records equal in every field.
    pub identical: u64,
    /// Records only in the first collection.
    pub only_left: u64,
    /// Records only in the second collection.
    pub only_right: u64,
    /// Matched records differing in each field.
    pub differences: BTreeMap<Field, u64>,
}

impl Comparison {
    /// Whether both sides hold the same records.
    pub fn is_identical(&self) -> bool {
        self.only_left == 0 && self.only_right == 0 && self.identical == self.matched
    }

    fn merge(mut self, other: Self) -> Self {
        self.left += other.left;
        self.right += other.right;
        self.matched += other.matched;
        self.identical += other.identical;
        self.only_left += other.only_left;
        self.only_right += other.only_right;
        for (field, count) in other.differences {
            *self.differences.entry(field).or_default() += count;
        }
        self
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "records\t{}\t{}", self.left, self.right)?;
        writeln!(f, "matched\t{}", self.matched)?;
        writeln!(f, "identical\t{}", self.identical)?;
        writeln!(f, "only_left\t{}", self.only_left)?;
        write!(f, "only_right\t{}", self.only_right)?;
        for (field, count) in &self.differences {
            write!(f, "\ndiffers:{}\t{}", field, count)?;
        }
        Ok(())
    }
}

/// Fields in which `a` and `b` differ.
pub fn differing_fields(a: &AlignmentRecord, b: &AlignmentRecord) -> Vec<Field> {
    Field::ALL
        .into_iter()
        .filter(|&field| {
            ColumnData::encode(field, slice::from_ref(a)) != ColumnData::encode(field, slice::from_ref(b))
        })
        .collect()
}

/// Compare two collections record by record.
pub fn compare(
    left: &Collection<AlignmentRecord>,
    right: &Collection<AlignmentRecord>,
) -> Result<Comparison, FrameworkError> {
    let tagged_left = left.map(|r| (false, r));
    let tagged_right = right.map(|r| (true, r));
    let groups = tagged_left
        .union(&tagged_right)
        .group_by_key(|(_, r)| (Arc::clone(&r.read_name), r.flags.bits() & SEGMENT_BITS));

    groups.aggregate(
        Comparison::default(),
        |acc, (_, members)| acc.merge(compare_group(members)),
        Comparison::merge,
    )
}

fn compare_group(members: &[(bool, AlignmentRecord)]) -> Comparison {
    let lefts: Vec<&AlignmentRecord> = members.iter().filter(|(s, _)| !s).map(|(_, r)| r).collect();
    let rights: Vec<&AlignmentRecord> = members.iter().filter(|(s, _)| *s).map(|(_, r)| r).collect();

    let mut out = Comparison {
        left: lefts.len() as u64,
        right: rights.len() as u64,
        ..Comparison::default()
    };
    let paired = lefts.len().min(rights.len());
    out.matched = paired as u64;
    out.only_left = (lefts.len() - paired) as u64;
    out.only_right = (rights.len() - paired) as u64;
    for (a, b) in lefts.iter().zip(&rights) {
        let fields = differing_fields(a, b);
        if fields.is_empty() {
            out.identical += 1;
        }
        for field in fields {
            *out.differences.entry(field).or_default() += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::ExecutionContext;
    use crate::model::parse_cigar;

    fn read(name: &str, pos: u32) -> AlignmentRecord {
        AlignmentRecord::builder(name)
            .mapped("chr1", pos)
            .cigar(parse_cigar("4M").unwrap())
            .sequence(b"ACGT".to_vec())
            .qualities(vec![30; 4])
            .build()
    }

    #[test]
    fn identical_collections_compare_equal() {
        let ctx = ExecutionContext::with_threads(3, 2).unwrap();
        let records: Vec<_> = (0..20).map(|i| read(&format!("r{}", i), i)).collect();
        let mut shuffled = records.clone();
        shuffled.reverse();
        let result = compare(
            &Collection::from_vec(&ctx, records),
            &Collection::from_vec(&ctx, shuffled),
        )
        .unwrap();
        assert!(result.is_identical());
        assert_eq!(result.matched, 20);
    }

    #[test]
    fn differences_are_counted_per_field() {
        let ctx = ExecutionContext::with_threads(2, 2).unwrap();
        let left = vec![read("a", 1), read("b", 2), read("only-left", 3)];
        let mut moved = read("a", 9);
        moved.flags = moved.flags.with(Flags::DUPLICATE, true);
        let right = vec![moved, read("b", 2), read("only-right", 4)];

        let result = compare(
            &Collection::from_vec(&ctx, left),
            &Collection::from_vec(&ctx, right),
        )
        .unwrap();
        assert_eq!(result.matched, 2);
        assert_eq!(result.identical, 1);
        assert_eq!(result.only_left, 1);
        assert_eq!(result.only_right, 1);
        assert_eq!(result.differences.get(&Field::ReferencePosition), Some(&1));
        assert_eq!(result.differences.get(&Field::Flags), Some(&1));
        assert_eq!(result.differences.len(), 2);
        assert!(!result.is_identical());
    }
}
