//! Coordinate sort.
//!
//! Mapped reads order by contig name, then position; unmapped reads follow
//! all mapped reads. Read name and flags break ties so the output order never
//! depends on input partitioning.

use std::sync::Arc;

use crate::framework::Collection;
use crate::model::AlignmentRecord;

/// Total order key of a read in coordinate order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoordinateKey {
    unmapped: bool,
    reference_name: Option<Arc<str>>,
    position: u32,
    read_name: Arc<str>,
    flags: u16,
}

impl CoordinateKey {
    /// Key of `record`.
    pub fn of(record: &AlignmentRecord) -> Self {
        let placed = record.is_mapped() && record.reference_position.is_some();
        Self {
            unmapped: !placed,
            reference_name: if placed {
                record.reference_name.clone()
            } else {
                None
            },
            position: if placed {
                record.reference_position.unwrap_or(0)
            } else {
                0
            },
            read_name: Arc::clone(&record.read_name),
            flags: record.flags.bits(),
        }
    }
}

/// Sort `input` into coordinate order, range partitioned.
pub fn sort_by_coordinate(input: &Collection<AlignmentRecord>) -> Collection<AlignmentRecord> {
    input.sort_by(CoordinateKey::of, true)
}

/// Fixed-width reference window a mapped read starts in.
pub fn window_of(record: &AlignmentRecord, width: u32) -> Option<(Arc<str>, u32)> {
    let contig = record.reference_name.clone()?;
    let position = record.reference_position?;
    Some((contig, position / width.max(1)))
}

/// Group mapped reads by the `width`-base window they start in.
///
/// Over coordinate-sorted input each group lists its reads in coordinate
/// order. Unmapped reads are dropped.
pub fn group_by_window(
    input: &Collection<AlignmentRecord>,
    width: u32,
) -> Collection<((Arc<str>, u32), Vec<AlignmentRecord>)> {
    input
        .flat_map(move |record| window_of(&record, width).map(|window| (window, record)))
        .group_by_key(|(window, _)| window.clone())
        .map(|(window, members)| (window, members.into_iter().map(|(_, r)| r).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::ExecutionContext;
    use crate::model::parse_cigar;

    fn mapped(name: &str, contig: &str, pos: u32) -> AlignmentRecord {
        AlignmentRecord::builder(name)
            .mapped(contig, pos)
            .cigar(parse_cigar("4M").unwrap())
            .sequence(b"ACGT".to_vec())
            .build()
    }

    #[test]
    fn unmapped_reads_sort_last() {
        let ctx = ExecutionContext::with_threads(3, 2).unwrap();
        let records = vec![
            AlignmentRecord::builder("u1").unmapped().build(),
            mapped("b", "chr2", 5),
            mapped("a", "chr1", 900),
            mapped("c", "chr1", 7),
            AlignmentRecord::builder("u0").unmapped().build(),
        ];
        let sorted = sort_by_coordinate(&Collection::from_vec(&ctx, records))
            .collect()
            .unwrap();
        let names: Vec<&str> = sorted.iter().map(|r| r.read_name.as_ref()).collect();
        assert_eq!(names, vec!["c", "a", "b", "u0", "u1"]);
    }

    #[test]
    fn equal_positions_break_ties_by_name() {
        let ctx = ExecutionContext::with_threads(2, 2).unwrap();
        let records = vec![mapped("z", "chr1", 10), mapped("m", "chr1", 10), mapped("a", "chr1", 10)];
        let sorted = sort_by_coordinate(&Collection::from_vec(&ctx, records))
            .collect()
            .unwrap();
        let names: Vec<&str> = sorted.iter().map(|r| r.read_name.as_ref()).collect();
        assert_eq!(names, vec!["a", "m", "z"]);
    }

    #[test]
    fn sorted_reads_group_into_one_window() {
        let ctx = ExecutionContext::with_threads(4, 2).unwrap();
        let records = [50, 10, 30, 20, 40]
            .into_iter()
            .map(|pos| mapped(&format!("r{}", pos), "chr1", pos))
            .collect();
        let sorted = sort_by_coordinate(&Collection::from_vec(&ctx, records));
        let groups = group_by_window(&sorted, 100).collect().unwrap();
        assert_eq!(groups.len(), 1);
        let positions: Vec<u32> = groups[0]
            .1
            .iter()
            .filter_map(|r| r.reference_position)
            .collect();
        assert_eq!(positions, vec![10, 20, 30, 40, 50]);
    }
}
