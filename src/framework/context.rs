use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::FrameworkError;

/// Explicit execution context handed to every collection and pipeline entry point.
///
/// Owns the worker pool partitions run on and the cancellation flag shared by
/// every collection created from it. Cloning shares both.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    pool: rayon::ThreadPool,
    default_partitions: usize,
    cancelled: AtomicBool,
}

impl ExecutionContext {
    /// Create a context using rayon's default thread count.
    pub fn new(default_partitions: usize) -> Result<Self, FrameworkError> {
        Self::build(default_partitions, None)
    }

    /// Create a context with an explicit worker count.
    pub fn with_threads(default_partitions: usize, threads: usize) -> Result<Self, FrameworkError> {
        if threads == 0 {
            return Err(FrameworkError::InvalidConfiguration(
                "thread count must be > 0".to_string(),
            ));
        }
        Self::build(default_partitions, Some(threads))
    }

    fn build(default_partitions: usize, threads: Option<usize>) -> Result<Self, FrameworkError> {
        if default_partitions == 0 {
            return Err(FrameworkError::InvalidConfiguration(
                "partition count must be > 0".to_string(),
            ));
        }

        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|idx| format!("readprep-worker-{}", idx));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| FrameworkError::ThreadPool(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(ContextInner {
                pool,
                default_partitions,
                cancelled: AtomicBool::new(false),
            }),
        })
    }

    /// Partition count used when a collection is created without one.
    pub fn default_partitions(&self) -> usize {
        self.inner.default_partitions
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.inner.pool.current_num_threads()
    }

    /// Request cancellation of the running stage.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation request.
    pub fn reset_cancellation(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
    }

    /// Freeze a value for read-only sharing with workers.
    pub fn broadcast<T: Send + Sync>(&self, value: T) -> Broadcast<T> {
        Broadcast(Arc::new(value))
    }

    pub(crate) fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.inner.pool.install(f)
    }

    pub(crate) fn check_cancelled(&self, partition: usize) -> Result<(), FrameworkError> {
        if self.is_cancelled() {
            Err(FrameworkError::Cancelled { partition })
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("threads", &self.threads())
            .field("default_partitions", &self.default_partitions())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Immutable value shared with every partition.
///
/// There is no way to obtain a mutable reference once broadcast, so a value
/// built by one phase cannot change underneath the phase reading it.
#[derive(Debug)]
pub struct Broadcast<T>(Arc<T>);

impl<T> Broadcast<T> {
    /// Borrow the shared value.
    pub fn value(&self) -> &T {
        &self.0
    }
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Deref for Broadcast<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}
