//! Pipeline stages over collections of [`AlignmentRecord`](crate::model::AlignmentRecord).
//!
//! Each stage takes a collection and returns a new one; none mutates its
//! input. Stages that need global statistics (recalibration tables,
//! realignment targets) compute them with an action first and hand them to
//! workers as a [`Broadcast`](crate::framework::Broadcast).

pub mod bqsr;
pub mod markdup;
pub mod realign;
pub mod sort;

pub use bqsr::{CovariateKind, RecalibrationTable, Recalibrator};
pub use markdup::{DuplicateMarker, DuplicateMetrics, DuplicatePolicy, ReadPairKey};
pub use realign::{IndelRealigner, RealignmentOptions, TargetSet};
pub use sort::{group_by_window, sort_by_coordinate, CoordinateKey};
