//! Blockstash Core
//!
//! Resilient retrieval of content-addressed backup blocks: bounded retry of
//! backend reads, codec fallback with checksum verification, and fan-in of
//! failures from concurrent block operations.

pub mod backend;
pub mod backoff;
pub mod checksum;
pub mod codec;
pub mod config;
pub mod layout;
pub mod merge;
pub mod metrics;
pub mod retriever;
pub mod runtime;
pub mod verify;

pub use backend::{BackendError, BlockBackend, BlockReader, ErrorClass, FsBackend};
pub use backoff::BackoffSchedule;
pub use checksum::{compute_checksum, verify_checksum, ChecksumError};
pub use codec::{Codec, CodecError};
pub use config::{Config, ConfigError};
pub use layout::{block_file_path, block_size_from_parameters, LayoutError, DEFAULT_BLOCK_SIZE};
pub use merge::merge_error_channels;
pub use metrics::RetrievalMetrics;
pub use retriever::{BlockRetriever, RetrievalError};
pub use runtime::{run_fetch, BlockFailure, FetchError, FetchReport, RuntimeError};
pub use verify::{decompress_and_verify, VerifiedBlock, VerifyError};

// Re-export the cancellation token used across the public API
pub use tokio_util::sync::CancellationToken;
