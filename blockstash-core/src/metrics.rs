//! Retrieval metrics
//!
//! Thread-safe counters using atomic types, shared by every clone.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters describing block retrieval activity
#[derive(Clone, Default)]
pub struct RetrievalMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    // Backend reads
    read_attempts: AtomicU64,
    read_retries: AtomicU64,
    reads_exhausted: AtomicU64,
    reads_permanent_failures: AtomicU64,

    // Codec fallback
    fallbacks_attempted: AtomicU64,
    fallbacks_succeeded: AtomicU64,

    // Verification
    blocks_verified: AtomicU64,
    bytes_verified: AtomicU64,
    verification_failures: AtomicU64,
}

impl RetrievalMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    // Backend reads

    pub fn read_attempted(&self) {
        self.inner.read_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_retried(&self) {
        self.inner.read_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_exhausted(&self) {
        self.inner.reads_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_failed_permanently(&self) {
        self.inner
            .reads_permanent_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_attempts(&self) -> u64 {
        self.inner.read_attempts.load(Ordering::Relaxed)
    }

    pub fn read_retries(&self) -> u64 {
        self.inner.read_retries.load(Ordering::Relaxed)
    }

    pub fn reads_exhausted(&self) -> u64 {
        self.inner.reads_exhausted.load(Ordering::Relaxed)
    }

    pub fn reads_permanent_failures(&self) -> u64 {
        self.inner.reads_permanent_failures.load(Ordering::Relaxed)
    }

    // Codec fallback

    pub fn fallback_attempted(&self) {
        self.inner.fallbacks_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fallback_succeeded(&self) {
        self.inner.fallbacks_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fallbacks_attempted(&self) -> u64 {
        self.inner.fallbacks_attempted.load(Ordering::Relaxed)
    }

    pub fn fallbacks_succeeded(&self) -> u64 {
        self.inner.fallbacks_succeeded.load(Ordering::Relaxed)
    }

    // Verification

    pub fn block_verified(&self, size: usize) {
        self.inner.blocks_verified.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_verified
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn verification_failed(&self) {
        self.inner
            .verification_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn blocks_verified(&self) -> u64 {
        self.inner.blocks_verified.load(Ordering::Relaxed)
    }

    pub fn bytes_verified(&self) -> u64 {
        self.inner.bytes_verified.load(Ordering::Relaxed)
    }

    pub fn verification_failures(&self) -> u64 {
        self.inner.verification_failures.load(Ordering::Relaxed)
    }

    /// Generate Prometheus-formatted metrics text
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP blockstash_read_attempts_total Backend read attempts\n\
             # TYPE blockstash_read_attempts_total counter\n\
             blockstash_read_attempts_total {}\n\
             \n\
             # HELP blockstash_read_retries_total Backend reads retried after a backoff\n\
             # TYPE blockstash_read_retries_total counter\n\
             blockstash_read_retries_total {}\n\
             \n\
             # HELP blockstash_reads_exhausted_total Reads that ran out of retries\n\
             # TYPE blockstash_reads_exhausted_total counter\n\
             blockstash_reads_exhausted_total {}\n\
             \n\
             # HELP blockstash_reads_permanent_failures_total Reads that failed without retry\n\
             # TYPE blockstash_reads_permanent_failures_total counter\n\
             blockstash_reads_permanent_failures_total {}\n\
             \n\
             # HELP blockstash_fallbacks_attempted_total Alternate codec attempts\n\
             # TYPE blockstash_fallbacks_attempted_total counter\n\
             blockstash_fallbacks_attempted_total {}\n\
             \n\
             # HELP blockstash_fallbacks_succeeded_total Alternate codec attempts that verified\n\
             # TYPE blockstash_fallbacks_succeeded_total counter\n\
             blockstash_fallbacks_succeeded_total {}\n\
             \n\
             # HELP blockstash_blocks_verified_total Blocks decompressed and verified\n\
             # TYPE blockstash_blocks_verified_total counter\n\
             blockstash_blocks_verified_total {}\n\
             \n\
             # HELP blockstash_bytes_verified_total Decompressed bytes verified\n\
             # TYPE blockstash_bytes_verified_total counter\n\
             blockstash_bytes_verified_total {}\n\
             \n\
             # HELP blockstash_verification_failures_total Blocks that failed verification\n\
             # TYPE blockstash_verification_failures_total counter\n\
             blockstash_verification_failures_total {}\n",
            self.read_attempts(),
            self.read_retries(),
            self.reads_exhausted(),
            self.reads_permanent_failures(),
            self.fallbacks_attempted(),
            self.fallbacks_succeeded(),
            self.blocks_verified(),
            self.bytes_verified(),
            self.verification_failures(),
        )
    }
}

impl fmt::Debug for RetrievalMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrievalMetrics")
            .field("read_attempts", &self.read_attempts())
            .field("read_retries", &self.read_retries())
            .field("blocks_verified", &self.blocks_verified())
            .field("fallbacks_attempted", &self.fallbacks_attempted())
            .field("verification_failures", &self.verification_failures())
            .finish()
    }
}
