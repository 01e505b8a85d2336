//! Integration tests for block retrieval: codec fallback, verification and
//! failure fan-in across concurrent block operations.

use async_trait::async_trait;
use blockstash_core::{
    compute_checksum, merge_error_channels, BackendError, BackoffSchedule, BlockBackend,
    BlockReader, BlockRetriever, CancellationToken, Codec, CodecError, RetrievalError,
    VerifyError,
};
use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Initialize tracing for tests
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// In-memory backend counting reads across all paths
#[derive(Default)]
struct MemoryBackend {
    objects: HashMap<String, Vec<u8>>,
    /// Read calls (by index, across all paths) that fail, and how
    failures: Option<(Range<usize>, io::ErrorKind)>,
    reads: AtomicUsize,
}

impl MemoryBackend {
    fn with_object(path: &str, bytes: Vec<u8>) -> Self {
        let mut backend = Self::default();
        backend.objects.insert(path.to_string(), bytes);
        backend
    }

    /// Fail the read calls numbered `calls` with an error of `kind`
    fn failing(mut self, calls: Range<usize>, kind: io::ErrorKind) -> Self {
        self.failures = Some((calls, kind));
        self
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockBackend for MemoryBackend {
    async fn read(&self, path: &str) -> Result<BlockReader, BackendError> {
        let call = self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some((calls, kind)) = &self.failures {
            if calls.contains(&call) {
                return Err(BackendError::new(path, io::Error::from(*kind)));
            }
        }
        match self.objects.get(path) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(BackendError::new(path, io::Error::from(io::ErrorKind::NotFound))),
        }
    }
}

fn fast_schedule() -> BackoffSchedule {
    BackoffSchedule::new(vec![Duration::from_millis(1); 3])
}

fn content() -> Vec<u8> {
    b"content-addressed block payload ".repeat(256)
}

#[tokio::test]
async fn test_roundtrip_each_codec() {
    init_tracing();

    for codec in Codec::ALL {
        let data = content();
        let checksum = compute_checksum(&data);
        let backend = MemoryBackend::with_object("blk", codec.compress(&data).unwrap());
        let retriever = BlockRetriever::new(backend).with_schedule(fast_schedule());

        let block = retriever
            .decompress_and_verify("blk", codec, &checksum)
            .await
            .unwrap();

        let mut read_back = Vec::new();
        block.reader().read_to_end(&mut read_back).unwrap();
        assert_eq!(read_back, data);
        assert_eq!(block.codec, codec);
        assert_eq!(retriever.backend().reads(), 1);
        assert_eq!(retriever.metrics().fallbacks_attempted(), 0);
    }
}

#[tokio::test]
async fn test_fallback_to_alternate_codec() {
    init_tracing();

    for stored_with in Codec::ALL {
        let data = content();
        let checksum = compute_checksum(&data);
        let backend = MemoryBackend::with_object("blk", stored_with.compress(&data).unwrap());
        let retriever = BlockRetriever::new(backend).with_schedule(fast_schedule());

        let requested = stored_with.alternate();
        let block = retriever
            .decompress_and_verify("blk", requested, &checksum)
            .await
            .unwrap();

        assert_eq!(block.data, data);
        assert_eq!(block.codec, stored_with);
        assert_eq!(retriever.backend().reads(), 2);
        assert_eq!(retriever.metrics().fallbacks_attempted(), 1);
        assert_eq!(retriever.metrics().fallbacks_succeeded(), 1);
    }
}

#[tokio::test]
async fn test_corrupted_block_is_not_retried_with_other_codec() {
    init_tracing();

    let stored = Codec::Gzip.compress(b"what is really stored").unwrap();
    let backend = MemoryBackend::with_object("blk", stored);
    let retriever = BlockRetriever::new(backend).with_schedule(fast_schedule());

    let err = retriever
        .decompress_and_verify("blk", Codec::Gzip, &compute_checksum(b"what was expected"))
        .await
        .unwrap_err();

    match &err {
        RetrievalError::Verification { path, codec, source } => {
            assert_eq!(path, "blk");
            assert_eq!(*codec, Codec::Gzip);
            assert!(matches!(source, VerifyError::Checksum { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("blk"));
    assert_eq!(retriever.backend().reads(), 1);
    assert_eq!(retriever.metrics().fallbacks_attempted(), 0);
    assert_eq!(retriever.metrics().verification_failures(), 1);
}

#[tokio::test]
async fn test_fallback_failure_is_fatal() {
    init_tracing();

    // stored as lz4, requested as gzip, and the checksum matches nothing
    let stored = Codec::Lz4.compress(b"stored content").unwrap();
    let backend = MemoryBackend::with_object("blk", stored);
    let retriever = BlockRetriever::new(backend).with_schedule(fast_schedule());

    let err = retriever
        .decompress_and_verify("blk", Codec::Gzip, &compute_checksum(b"other content"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RetrievalError::FallbackFailed {
            requested: Codec::Gzip,
            codec: Codec::Lz4,
            ..
        }
    ));
    assert!(err.to_string().contains("fallback decompression"));
    assert_eq!(retriever.backend().reads(), 2);
    assert_eq!(retriever.metrics().fallbacks_succeeded(), 0);
}

#[tokio::test]
async fn test_transient_failures_recovered_before_verification() {
    init_tracing();

    let data = content();
    let checksum = compute_checksum(&data);
    let backend = MemoryBackend::with_object("blk", Codec::Lz4.compress(&data).unwrap())
        .failing(0..2, io::ErrorKind::ConnectionReset);
    let retriever = BlockRetriever::new(backend).with_schedule(fast_schedule());

    let block = retriever
        .decompress_and_verify("blk", Codec::Lz4, &checksum)
        .await
        .unwrap();

    assert_eq!(block.data, data);
    assert_eq!(retriever.backend().reads(), 3);
    assert_eq!(retriever.metrics().read_retries(), 2);
}

#[tokio::test]
async fn test_read_error_propagates_unchanged() {
    init_tracing();

    let backend = MemoryBackend::with_object("blk", Vec::new())
        .failing(0..usize::MAX, io::ErrorKind::ConnectionReset);
    let retriever = BlockRetriever::new(backend).with_schedule(fast_schedule());

    let err = retriever
        .decompress_and_verify("blk", Codec::Lz4, &compute_checksum(b""))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RetrievalError::RetriesExhausted { attempts: 4, .. }
    ));
    assert_eq!(retriever.backend().reads(), 4);
}

#[tokio::test]
async fn test_fallback_reread_is_retried() {
    init_tracing();

    // first read succeeds, the fallback's fresh read fails twice before succeeding
    let data = content();
    let checksum = compute_checksum(&data);
    let backend = MemoryBackend::with_object("blk", Codec::Gzip.compress(&data).unwrap())
        .failing(1..3, io::ErrorKind::ConnectionReset);
    let retriever = BlockRetriever::new(backend).with_schedule(fast_schedule());

    let block = retriever
        .decompress_and_verify("blk", Codec::Lz4, &checksum)
        .await
        .unwrap();

    assert_eq!(block.data, data);
    assert_eq!(block.codec, Codec::Gzip);
    assert_eq!(retriever.backend().reads(), 4);
    assert_eq!(retriever.metrics().read_retries(), 2);
    assert_eq!(retriever.metrics().fallbacks_succeeded(), 1);
}

#[tokio::test]
async fn test_fallback_reread_exhaustion_propagates_unchanged() {
    init_tracing();

    let data = content();
    let backend = MemoryBackend::with_object("blk", Codec::Gzip.compress(&data).unwrap())
        .failing(1..usize::MAX, io::ErrorKind::ConnectionReset);
    let retriever = BlockRetriever::new(backend).with_schedule(fast_schedule());

    let err = retriever
        .decompress_and_verify("blk", Codec::Lz4, &compute_checksum(&data))
        .await
        .unwrap_err();

    match &err {
        RetrievalError::RetriesExhausted {
            path,
            attempts,
            source,
        } => {
            assert_eq!(path, "blk");
            assert_eq!(*attempts, 4);
            assert!(source.is_retryable());
        }
        other => panic!("unexpected error: {other}"),
    }
    // one initial read, then one attempt plus three retries for the fallback
    assert_eq!(retriever.backend().reads(), 5);
    assert_eq!(retriever.metrics().fallbacks_attempted(), 1);
    assert_eq!(retriever.metrics().fallbacks_succeeded(), 0);
}

#[tokio::test]
async fn test_fallback_reread_permanent_failure_propagates_unchanged() {
    init_tracing();

    let data = content();
    let backend = MemoryBackend::with_object("blk", Codec::Lz4.compress(&data).unwrap())
        .failing(1..usize::MAX, io::ErrorKind::PermissionDenied);
    let retriever = BlockRetriever::new(backend).with_schedule(fast_schedule());

    let err = retriever
        .decompress_and_verify("blk", Codec::Gzip, &compute_checksum(&data))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RetrievalError::Permanent { attempts: 1, .. }
    ));
    assert_eq!(err.path(), Some("blk"));
    assert_eq!(retriever.backend().reads(), 2);
    assert_eq!(retriever.metrics().read_retries(), 0);
}

#[tokio::test]
async fn test_block_over_size_limit_is_not_verified() {
    init_tracing();

    let data = vec![0u8; 4 * 1024 * 1024];
    let backend = MemoryBackend::with_object("blk", Codec::Gzip.compress(&data).unwrap());
    let retriever = BlockRetriever::new(backend)
        .with_schedule(fast_schedule())
        .with_max_block_size(64 * 1024);

    let err = retriever
        .decompress_and_verify("blk", Codec::Gzip, &compute_checksum(&data))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RetrievalError::Verification {
            source: VerifyError::Codec(CodecError::TooLarge { limit: 65536, .. }),
            ..
        }
    ));
    assert_eq!(retriever.backend().reads(), 1);
    assert_eq!(retriever.metrics().blocks_verified(), 0);
    assert_eq!(retriever.metrics().bytes_verified(), 0);
}

#[tokio::test]
async fn test_missing_block_fails_fast() {
    init_tracing();

    let retriever = BlockRetriever::new(MemoryBackend::default()).with_schedule(fast_schedule());

    let err = retriever
        .decompress_and_verify("absent", Codec::Gzip, &compute_checksum(b""))
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::Permanent { attempts: 1, .. }));
    assert_eq!(retriever.backend().reads(), 1);
}

#[tokio::test]
async fn test_concurrent_block_failures_are_merged() {
    init_tracing();

    let mut backend = MemoryBackend::default();
    let mut requests = Vec::new();
    for index in 0..8 {
        let data = format!("block number {index}").into_bytes();
        let path = format!("blocks/{index}.blk");
        // odd blocks are stored damaged
        let stored = if index % 2 == 0 {
            Codec::Lz4.compress(&data).unwrap()
        } else {
            Codec::Lz4.compress(b"damaged").unwrap()
        };
        backend.objects.insert(path.clone(), stored);
        requests.push((path, compute_checksum(&data)));
    }
    let retriever = Arc::new(BlockRetriever::new(backend).with_schedule(fast_schedule()));

    let mut channels = Vec::new();
    for (path, checksum) in requests {
        let (tx, rx) = oneshot::channel();
        channels.push(rx);
        let retriever = Arc::clone(&retriever);
        tokio::spawn(async move {
            if let Err(e) = retriever
                .decompress_and_verify(&path, Codec::Lz4, &checksum)
                .await
            {
                let _ = tx.send(e);
            }
        });
    }

    let mut merged = merge_error_channels(CancellationToken::new(), channels);
    let mut failed_paths = Vec::new();
    while let Some(error) = merged.recv().await {
        failed_paths.push(error.path().unwrap().to_string());
    }
    failed_paths.sort();

    assert_eq!(
        failed_paths,
        vec![
            "blocks/1.blk".to_string(),
            "blocks/3.blk".to_string(),
            "blocks/5.blk".to_string(),
            "blocks/7.blk".to_string(),
        ]
    );
    assert_eq!(retriever.metrics().blocks_verified(), 4);
}
