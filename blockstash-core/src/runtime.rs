//! Block fetch orchestration
//!
//! Fetches every requested block of a volume concurrently. Each block task
//! owns a oneshot failure sender; the senders are merged into one channel
//! that the orchestrator drains to build its report.

use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backend::FsBackend;
use crate::codec::Codec;
use crate::config::Config;
use crate::layout::{block_file_path, LayoutError};
use crate::merge::merge_error_channels;
use crate::metrics::RetrievalMetrics;
use crate::retriever::{BlockRetriever, RetrievalError};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("failed to write block: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
#[error("block {checksum}: {error}")]
pub struct BlockFailure {
    pub checksum: String,
    #[source]
    pub error: FetchError,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of a fetch run
#[derive(Debug)]
pub struct FetchReport {
    /// Checksums written to the output directory
    pub fetched: Vec<String>,
    pub failed: Vec<BlockFailure>,
    /// True when the run was cancelled before all blocks settled
    pub cancelled: bool,
    pub metrics: RetrievalMetrics,
}

impl FetchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

/// Settings every block task needs
struct BlockJob {
    volume: String,
    codec: Codec,
    output_dir: PathBuf,
}

/// Fetch, verify and store every block named in `config`
///
/// Cancelling `cancel` interrupts pending backoff waits and stops failure
/// collection; blocks already verified are still written.
pub async fn run_fetch(
    config: &Config,
    cancel: CancellationToken,
) -> Result<FetchReport, RuntimeError> {
    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .map_err(|source| RuntimeError::OutputDir {
            path: config.output_dir.clone(),
            source,
        })?;

    let metrics = RetrievalMetrics::new();
    let retriever = Arc::new(
        BlockRetriever::new(FsBackend::new(&config.root))
            .with_schedule(config.backoff.clone())
            .with_cancellation(cancel.clone())
            .with_metrics(metrics.clone())
            .with_max_block_size(config.block_size),
    );
    let job = Arc::new(BlockJob {
        volume: config.volume.clone(),
        codec: config.codec,
        output_dir: config.output_dir.clone(),
    });

    info!(
        volume = %config.volume,
        blocks = config.checksums.len(),
        codec = %config.codec,
        "Fetching blocks"
    );

    let mut failure_channels = Vec::with_capacity(config.checksums.len());
    let mut tasks = Vec::with_capacity(config.checksums.len());
    for checksum in &config.checksums {
        let (failure_tx, failure_rx) = oneshot::channel();
        failure_channels.push(failure_rx);

        let retriever = Arc::clone(&retriever);
        let job = Arc::clone(&job);
        let checksum = checksum.clone();
        tasks.push(tokio::spawn(async move {
            match fetch_block(&retriever, &job, &checksum).await {
                Ok(size) => {
                    info!(checksum = %checksum, size, "Block verified");
                    Some(checksum)
                }
                Err(error) => {
                    // receiver gone means the run was cancelled
                    let _ = failure_tx.send(BlockFailure { checksum, error });
                    None
                }
            }
        }));
    }

    let mut failures = merge_error_channels(cancel.clone(), failure_channels);
    let mut failed = Vec::new();
    while let Some(failure) = failures.recv().await {
        error!(checksum = %failure.checksum, error = %failure.error, "Block fetch failed");
        failed.push(failure);
    }

    let mut fetched = Vec::new();
    for result in join_all(tasks).await {
        match result {
            Ok(Some(checksum)) => fetched.push(checksum),
            Ok(None) => {}
            Err(e) => error!(error = %e, "Block task panicked"),
        }
    }

    let cancelled = cancel.is_cancelled();
    if cancelled {
        warn!(
            fetched = fetched.len(),
            failed = failed.len(),
            "Fetch cancelled"
        );
    }

    Ok(FetchReport {
        fetched,
        failed,
        cancelled,
        metrics,
    })
}

async fn fetch_block(
    retriever: &BlockRetriever<FsBackend>,
    job: &BlockJob,
    checksum: &str,
) -> Result<u64, FetchError> {
    let path = block_file_path(&job.volume, checksum)?;
    let block = retriever
        .decompress_and_verify(&path, job.codec, checksum)
        .await?;

    let size = block.size() as u64;
    tokio::fs::write(output_path(&job.output_dir, checksum), &block.data).await?;
    Ok(size)
}

fn output_path(output_dir: &Path, checksum: &str) -> PathBuf {
    output_dir.join(checksum)
}
