use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    analyses: AtomicU64,
    comparisons: AtomicU64,
    queries_answered: AtomicU64,
    queries_failed: AtomicU64,
    map_fallbacks: AtomicU64,
    chunks_indexed: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished analysis and how many of its chunks fell back to raw text.
    pub fn record_analysis(&self, fallback_chunks: u64) {
        self.analyses.fetch_add(1, Ordering::Relaxed);
        self.map_fallbacks
            .fetch_add(fallback_chunks, Ordering::Relaxed);
    }

    /// Record a finished comparison.
    pub fn record_comparison(&self) {
        self.comparisons.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a chat query outcome.
    pub fn record_query(&self, success: bool) {
        let counter = if success {
            &self.queries_answered
        } else {
            &self.queries_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record chunks indexed for a chat session.
    pub fn record_ingest(&self, chunk_count: u64) {
        self.chunks_indexed
            .fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            analyses: self.analyses.load(Ordering::Relaxed),
            comparisons: self.comparisons.load(Ordering::Relaxed),
            queries_answered: self.queries_answered.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            map_fallbacks: self.map_fallbacks.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    /// Analyses completed since startup.
    pub analyses: u64,
    /// Comparisons completed since startup.
    pub comparisons: u64,
    /// Chat queries answered successfully.
    pub queries_answered: u64,
    /// Chat queries that returned a failure response.
    pub queries_failed: u64,
    /// Map-step chunks that used the raw-text fallback.
    pub map_fallbacks: u64,
    /// Chunks indexed into chat retrievers.
    pub chunks_indexed: u64,
}
