//! Backend read capability
//!
//! A backend driver exposes a single operation: open the object at a path
//! and hand back an exclusively owned sequential stream. Dropping the
//! stream releases it, so callers release on every exit path for free.

use async_trait::async_trait;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Stream returned by a backend read
pub type BlockReader = Box<dyn Read + Send>;

/// Whether a failed read is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient I/O, timeouts, throttling
    Retryable,
    /// Missing object, access denied, malformed path
    Permanent,
}

impl ErrorClass {
    /// Classify a std I/O error
    pub fn from_io(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::Unsupported => ErrorClass::Permanent,
            _ => ErrorClass::Retryable,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("backend read of {path} failed: {source}")]
pub struct BackendError {
    pub path: String,
    pub class: ErrorClass,
    #[source]
    pub source: io::Error,
}

impl BackendError {
    /// Build an error, classifying it from the I/O error kind
    pub fn new(path: impl Into<String>, source: io::Error) -> Self {
        Self {
            path: path.into(),
            class: ErrorClass::from_io(source.kind()),
            source,
        }
    }

    /// A transient failure regardless of the I/O error kind
    pub fn retryable(path: impl Into<String>, source: io::Error) -> Self {
        Self {
            path: path.into(),
            class: ErrorClass::Retryable,
            source,
        }
    }

    /// A terminal failure regardless of the I/O error kind
    pub fn permanent(path: impl Into<String>, source: io::Error) -> Self {
        Self {
            path: path.into(),
            class: ErrorClass::Permanent,
            source,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class == ErrorClass::Retryable
    }
}

/// Storage driver capable of opening block objects
///
/// Implementations must be stateless per call: every `read` returns an
/// independent stream with its own cursor.
#[async_trait]
pub trait BlockBackend: Send + Sync {
    async fn read(&self, path: &str) -> Result<BlockReader, BackendError>;
}

#[async_trait]
impl<T: BlockBackend + ?Sized> BlockBackend for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<BlockReader, BackendError> {
        (**self).read(path).await
    }
}

/// Backend rooted at a local directory (or a mounted NFS/SMB share)
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a backend path below the root, refusing traversal outside it
    fn resolve(&self, path: &str) -> Result<PathBuf, BackendError> {
        let relative = Path::new(path);
        let escapes = relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(BackendError::permanent(
                path,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "path escapes the backend root",
                ),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlockBackend for FsBackend {
    async fn read(&self, path: &str) -> Result<BlockReader, BackendError> {
        let full_path = self.resolve(path)?;
        let file = tokio::fs::File::open(&full_path)
            .await
            .map_err(|e| BackendError::new(path, e))?;

        trace!(path = %full_path.display(), "Opened block file");
        Ok(Box::new(file.into_std().await))
    }
}
