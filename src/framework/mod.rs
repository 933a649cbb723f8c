//! Partitioned, lazily evaluated collections executed on an explicit context.
//!
//! Stands in for a distributed execution engine: partitions play the role of
//! remote tasks, the context's thread pool plays the role of executors, and
//! `group_by_key`/`sort_by` are the shuffle boundaries.

mod collection;
mod context;

pub use collection::{Collection, Element};
pub use context::{Broadcast, ExecutionContext};

use thiserror::Error;

/// Errors that can occur while executing a collection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameworkError {
    /// Configuration invalid (e.g., zero partitions).
    #[error("invalid execution configuration: {0}")]
    InvalidConfiguration(String),

    /// Worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    ThreadPool(String),

    /// A user-supplied transform rejected its input.
    #[error("transform failed{}: {message}", location_suffix(.partition, .record))]
    Transform {
        /// Partition the failure happened in, once known.
        partition: Option<usize>,
        /// Record implicated, when identifiable.
        record: Option<String>,
        /// What went wrong.
        message: String,
    },

    /// A partition source could not produce its data.
    #[error("failed to load partition {partition}: {message}")]
    Source {
        /// Partition being loaded.
        partition: usize,
        /// What went wrong.
        message: String,
    },

    /// Execution stopped because the context was cancelled.
    #[error("execution cancelled before partition {partition}")]
    Cancelled {
        /// First partition that observed the cancellation.
        partition: usize,
    },
}

impl FrameworkError {
    /// Helper for constructing transform-originated errors.
    pub fn transform(message: impl Into<String>) -> Self {
        FrameworkError::Transform {
            partition: None,
            record: None,
            message: message.into(),
        }
    }

    /// Helper for constructing source (loader) errors.
    pub fn load_failed(partition: usize, message: impl Into<String>) -> Self {
        FrameworkError::Source {
            partition,
            message: message.into(),
        }
    }

    /// Attach the implicated record.
    pub fn for_record(self, name: impl Into<String>) -> Self {
        match self {
            FrameworkError::Transform {
                partition, message, ..
            } => FrameworkError::Transform {
                partition,
                record: Some(name.into()),
                message,
            },
            other => other,
        }
    }

    /// Attach the partition index if not already known.
    pub(crate) fn in_partition(self, idx: usize) -> Self {
        match self {
            FrameworkError::Transform {
                partition: None,
                record,
                message,
            } => FrameworkError::Transform {
                partition: Some(idx),
                record,
                message,
            },
            other => other,
        }
    }
}

fn location_suffix(partition: &Option<usize>, record: &Option<String>) -> String {
    match (partition, record) {
        (Some(p), Some(r)) => format!(" in partition {} at record {}", p, r),
        (Some(p), None) => format!(" in partition {}", p),
        (None, Some(r)) => format!(" at record {}", r),
        (None, None) => String::new(),
    }
}
