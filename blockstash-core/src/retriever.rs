//! Resilient block retrieval
//!
//! `BlockRetriever` wraps a backend with two layers of recovery:
//!
//! 1. `read_with_retry` retries failed backend reads on the backoff
//!    schedule. Permanent failures are returned after the first attempt.
//! 2. `decompress_and_verify` decodes and checks a block. When the stored
//!    bytes turn out to belong to the other codec, it reads a fresh stream
//!    and tries that codec exactly once.
//!
//! Each call owns its own stream and attempt counter, so one retriever can
//! serve many concurrent block operations.

use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, BlockBackend, BlockReader};
use crate::backoff::BackoffSchedule;
use crate::codec::Codec;
use crate::metrics::RetrievalMetrics;
use crate::verify::{self, VerifiedBlock, VerifyError};

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("failed to read block {path} after {attempts} attempts: {source}")]
    RetriesExhausted {
        path: String,
        attempts: usize,
        #[source]
        source: BackendError,
    },

    #[error("failed to read block {path} (not retryable, {attempts} attempts): {source}")]
    Permanent {
        path: String,
        attempts: usize,
        #[source]
        source: BackendError,
    },

    #[error("read of block {path} cancelled after {attempts} attempts: {source}")]
    Cancelled {
        path: String,
        attempts: usize,
        #[source]
        source: BackendError,
    },

    #[error("decompression verification failed for block {path} with {codec}: {source}")]
    Verification {
        path: String,
        codec: Codec,
        #[source]
        source: VerifyError,
    },

    #[error("fallback decompression with {codec} also failed for block {path} (requested {requested}): {source}")]
    FallbackFailed {
        path: String,
        requested: Codec,
        codec: Codec,
        #[source]
        source: VerifyError,
    },

    #[error("verification task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl RetrievalError {
    /// Backend path of the block the error refers to
    pub fn path(&self) -> Option<&str> {
        match self {
            RetrievalError::RetriesExhausted { path, .. }
            | RetrievalError::Permanent { path, .. }
            | RetrievalError::Cancelled { path, .. }
            | RetrievalError::Verification { path, .. }
            | RetrievalError::FallbackFailed { path, .. } => Some(path),
            RetrievalError::Task(_) => None,
        }
    }

    /// Number of backend reads made by the failing read, if it failed there
    pub fn attempts(&self) -> Option<usize> {
        match self {
            RetrievalError::RetriesExhausted { attempts, .. }
            | RetrievalError::Permanent { attempts, .. }
            | RetrievalError::Cancelled { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetrievalError::Cancelled { .. })
    }
}

/// Block reader with retry, codec fallback and verification
pub struct BlockRetriever<B> {
    backend: B,
    schedule: BackoffSchedule,
    cancel: CancellationToken,
    metrics: RetrievalMetrics,
    max_block_size: Option<u64>,
}

impl<B: BlockBackend> BlockRetriever<B> {
    /// Create a retriever using the reference backoff schedule
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            schedule: BackoffSchedule::reference(),
            cancel: CancellationToken::new(),
            metrics: RetrievalMetrics::new(),
            max_block_size: None,
        }
    }

    pub fn with_schedule(mut self, schedule: BackoffSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Abandon backoff waits once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_metrics(mut self, metrics: RetrievalMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Reject blocks that decompress to more than `limit` bytes
    pub fn with_max_block_size(mut self, limit: u64) -> Self {
        self.max_block_size = Some(limit);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn schedule(&self) -> &BackoffSchedule {
        &self.schedule
    }

    pub fn metrics(&self) -> &RetrievalMetrics {
        &self.metrics
    }

    /// Open a block stream, retrying transient failures on the backoff schedule
    ///
    /// A schedule of N entries allows N + 1 attempts. Attempts are strictly
    /// sequential; the only wait is the backoff sleep between them.
    pub async fn read_with_retry(&self, path: &str) -> Result<BlockReader, RetrievalError> {
        let mut retries = 0;
        loop {
            self.metrics.read_attempted();
            let error = match self.backend.read(path).await {
                Ok(reader) => {
                    debug!(path, attempt = retries + 1, "Block read succeeded");
                    return Ok(reader);
                }
                Err(error) => error,
            };
            let attempts = retries + 1;

            if !error.is_retryable() {
                self.metrics.read_failed_permanently();
                return Err(RetrievalError::Permanent {
                    path: path.to_string(),
                    attempts,
                    source: error,
                });
            }

            let Some(delay) = self.schedule.delay(retries) else {
                self.metrics.read_exhausted();
                return Err(RetrievalError::RetriesExhausted {
                    path: path.to_string(),
                    attempts,
                    source: error,
                });
            };

            warn!(
                path,
                attempt = attempts,
                delay = ?delay,
                error = %error,
                "Block read failed, backing off"
            );

            if !self.backoff(delay).await {
                return Err(RetrievalError::Cancelled {
                    path: path.to_string(),
                    attempts,
                    source: error,
                });
            }

            retries += 1;
            self.metrics.read_retried();
        }
    }

    /// Read, decompress and verify a block, falling back to the alternate codec once
    pub async fn decompress_and_verify(
        &self,
        path: &str,
        codec: Codec,
        checksum: &str,
    ) -> Result<VerifiedBlock, RetrievalError> {
        let reader = self.read_with_retry(path).await?;
        let error = match self.attempt(reader, codec, checksum).await? {
            Ok(block) => return Ok(self.accept(block)),
            Err(error) => error,
        };

        let Some(alternate) = error.fallback_codec() else {
            self.metrics.verification_failed();
            return Err(RetrievalError::Verification {
                path: path.to_string(),
                codec,
                source: error,
            });
        };

        info!(
            path,
            requested = %codec,
            alternate = %alternate,
            error = %error,
            "Codec mismatch, retrying block with alternate codec"
        );
        self.metrics.fallback_attempted();

        // the first stream is consumed, fallback needs a fresh one
        let reader = self.read_with_retry(path).await?;
        match self.attempt(reader, alternate, checksum).await? {
            Ok(block) => {
                self.metrics.fallback_succeeded();
                debug!(path, codec = %alternate, "Fallback decompression succeeded");
                Ok(self.accept(block))
            }
            Err(source) => {
                self.metrics.verification_failed();
                Err(RetrievalError::FallbackFailed {
                    path: path.to_string(),
                    requested: codec,
                    codec: alternate,
                    source,
                })
            }
        }
    }

    /// Sleep for `delay` unless cancelled first; returns false on cancellation
    async fn backoff(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Decode and verify one stream on the blocking pool
    async fn attempt(
        &self,
        reader: BlockReader,
        codec: Codec,
        checksum: &str,
    ) -> Result<Result<VerifiedBlock, VerifyError>, tokio::task::JoinError> {
        let checksum = checksum.to_string();
        let max_size = self.max_block_size;
        tokio::task::spawn_blocking(move || {
            verify::decompress_and_verify(codec, reader, &checksum, max_size)
        })
        .await
    }

    fn accept(&self, block: VerifiedBlock) -> VerifiedBlock {
        self.metrics.block_verified(block.size());
        block
    }
}
