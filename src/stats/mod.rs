//! Summaries over record collections: flag counts and record-level
//! comparison of two collections.

mod compare;
mod flagstat;

pub use compare::{compare, differing_fields, Comparison};
pub use flagstat::FlagStats;
