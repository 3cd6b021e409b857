//! Persistence boundary for extracted samples.
//!
//! A [`SampleSink`] receives each [`SampleResult`] as soon as its document
//! finishes, while later documents are still in flight. Implementations can
//! append to a dataset, a database, or a file; [`MemorySink`] collects
//! samples in memory for tests and small batches.
//!
//! Persist failures never abort a run: the pipeline logs them and counts
//! them in [`crate::ExtractStats::persist_failed`].

use crate::output::SampleResult;
use std::sync::Mutex;
use thiserror::Error;

/// Error returned by a [`SampleSink`] when a sample cannot be persisted.
#[derive(Debug, Error)]
#[error("failed to persist sample: {0}")]
pub struct SinkError(String);

impl SinkError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

/// Destination for per-document results.
///
/// Implementations must be `Send + Sync`: samples for distinct documents may
/// be persisted concurrently from different tasks. The pipeline never calls
/// `persist` twice for the same document.
pub trait SampleSink: Send + Sync {
    /// Persist a single sample.
    ///
    /// The sample is borrowed; the pipeline retains ownership so the same
    /// record can still appear in the returned [`crate::ExtractOutput`].
    fn persist(&self, sample: &SampleResult) -> Result<(), SinkError>;
}

/// A [`SampleSink`] that collects samples in memory.
///
/// Samples are stored in arrival order, which under concurrency is not the
/// input order. Use [`crate::ExtractOutput::samples`] when order matters.
#[derive(Default)]
pub struct MemorySink {
    samples: Mutex<Vec<SampleResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of samples persisted so far.
    pub fn len(&self) -> usize {
        self.samples.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return all persisted samples.
    pub fn take(&self) -> Vec<SampleResult> {
        self.samples
            .lock()
            .map(|mut g| std::mem::take(&mut *g))
            .unwrap_or_default()
    }

    /// Clone the persisted samples without removing them.
    pub fn snapshot(&self) -> Vec<SampleResult> {
        self.samples.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl SampleSink for MemorySink {
    fn persist(&self, sample: &SampleResult) -> Result<(), SinkError> {
        let mut guard = self
            .samples
            .lock()
            .map_err(|_| SinkError::new("memory sink mutex poisoned"))?;
        guard.push(sample.clone());
        Ok(())
    }
}
