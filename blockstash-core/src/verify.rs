//! Decompress-and-verify primitive
//!
//! Consumes one backend stream, decodes it with a single codec and checks
//! the content digest. No retries and no fallback happen here.

use std::io::{Cursor, Read};
use thiserror::Error;

use crate::checksum::{verify_checksum, ChecksumError};
use crate::codec::{Codec, CodecError};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("{codec}: decompressed content failed verification: {source}")]
    Checksum {
        codec: Codec,
        #[source]
        source: ChecksumError,
    },
}

impl VerifyError {
    /// Codec worth trying next, if this failure says the stream belongs to another codec
    ///
    /// Only a tagged wrong-container failure qualifies. Corrupted bodies and
    /// checksum mismatches are data damage, not a codec mix-up.
    pub fn fallback_codec(&self) -> Option<Codec> {
        match self {
            VerifyError::Codec(CodecError::WrongContainer { codec }) => Some(codec.alternate()),
            _ => None,
        }
    }

    pub fn is_format_mismatch(&self) -> bool {
        self.fallback_codec().is_some()
    }
}

/// Decompressed block content whose checksum has been verified
#[derive(Clone, Debug, PartialEq)]
pub struct VerifiedBlock {
    pub checksum: String,
    /// Codec that actually decoded the stored bytes
    pub codec: Codec,
    pub data: Vec<u8>,
}

impl VerifiedBlock {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Sequential reader over the verified content
    pub fn reader(&self) -> Cursor<&[u8]> {
        Cursor::new(self.data.as_slice())
    }

    pub fn into_reader(self) -> Cursor<Vec<u8>> {
        Cursor::new(self.data)
    }
}

/// Decode `reader` with `codec` and check the result against `checksum`
///
/// The reader is consumed and dropped on every path. With `max_size` set,
/// decoding stops with `CodecError::TooLarge` before the digest is taken.
pub fn decompress_and_verify<R: Read>(
    codec: Codec,
    reader: R,
    checksum: &str,
    max_size: Option<u64>,
) -> Result<VerifiedBlock, VerifyError> {
    let data = codec.decompress_limited(reader, max_size)?;
    verify_checksum(&data, checksum).map_err(|source| VerifyError::Checksum { codec, source })?;

    Ok(VerifiedBlock {
        checksum: checksum.to_string(),
        codec,
        data,
    })
}
