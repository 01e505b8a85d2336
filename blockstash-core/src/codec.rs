//! Block compression codecs
//!
//! Two interchangeable codecs are supported. Each one recognises its own
//! container by magic header, which lets a reader tell "this stream was
//! written by the other codec" apart from "this stream is damaged".
//!
//! Magic headers:
//! - gzip: `1f 8b`
//! - LZ4 frame: `04 22 4d 18`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::str::FromStr;
use thiserror::Error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const LZ4_FRAME_MAGIC: [u8; 4] = [0x04, 0x22, 0x4d, 0x18];

/// Longest magic header of any codec
const MAX_MAGIC_LEN: usize = 4;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Gzip,
    Lz4,
}

#[derive(Error, Debug)]
pub enum CodecError {
    /// The stream was not written by this codec
    #[error("{codec}: stream does not carry the {codec} container header")]
    WrongContainer { codec: Codec },

    /// The header matched but the body could not be decoded
    #[error("{codec}: corrupted stream: {source}")]
    Corrupted {
        codec: Codec,
        #[source]
        source: io::Error,
    },

    /// The decoded content grew past the allowed size
    #[error("{codec}: decompressed content exceeds {limit} bytes")]
    TooLarge { codec: Codec, limit: u64 },

    #[error("{codec}: compression failed: {source}")]
    Compression {
        codec: Codec,
        #[source]
        source: io::Error,
    },

    #[error("unknown codec: {0}")]
    Unknown(String),
}

impl CodecError {
    /// True when the failure indicates the wrong codec was requested
    pub fn is_format_mismatch(&self) -> bool {
        matches!(self, CodecError::WrongContainer { .. })
    }
}

impl Codec {
    pub const ALL: [Codec; 2] = [Codec::Gzip, Codec::Lz4];

    pub fn name(self) -> &'static str {
        match self {
            Codec::Gzip => "gzip",
            Codec::Lz4 => "lz4",
        }
    }

    pub fn magic(self) -> &'static [u8] {
        match self {
            Codec::Gzip => &GZIP_MAGIC,
            Codec::Lz4 => &LZ4_FRAME_MAGIC,
        }
    }

    /// The codec to try when a stream turns out not to be ours
    pub fn alternate(self) -> Codec {
        match self {
            Codec::Gzip => Codec::Lz4,
            Codec::Lz4 => Codec::Gzip,
        }
    }

    /// Identify a codec from the leading bytes of a stream
    pub fn detect(header: &[u8]) -> Option<Codec> {
        Codec::ALL
            .into_iter()
            .find(|codec| header.starts_with(codec.magic()))
    }

    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let wrap = |source| CodecError::Compression {
            codec: self,
            source,
        };

        match self {
            Codec::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data).map_err(wrap)?;
                encoder.finish().map_err(wrap)
            }
            Codec::Lz4 => {
                let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
                encoder.write_all(data).map_err(wrap)?;
                encoder.finish().map_err(|e| wrap(io::Error::other(e)))
            }
        }
    }

    /// Decode a whole stream
    ///
    /// Fails with `WrongContainer` before decoding anything if the stream
    /// does not open with this codec's magic header.
    pub fn decompress<R: Read>(self, reader: R) -> Result<Vec<u8>, CodecError> {
        self.decompress_limited(reader, None)
    }

    /// Decode a stream, giving up once more than `limit` bytes come out
    ///
    /// At most `limit + 1` decoded bytes are ever buffered.
    pub fn decompress_limited<R: Read>(
        self,
        mut reader: R,
        limit: Option<u64>,
    ) -> Result<Vec<u8>, CodecError> {
        let header = read_header(&mut reader).map_err(|source| CodecError::Corrupted {
            codec: self,
            source,
        })?;
        if !header.starts_with(self.magic()) {
            return Err(CodecError::WrongContainer { codec: self });
        }

        let stream = Cursor::new(header).chain(reader);
        let decoded = match self {
            Codec::Gzip => read_bounded(flate2::read::GzDecoder::new(stream), limit),
            Codec::Lz4 => read_bounded(lz4_flex::frame::FrameDecoder::new(stream), limit),
        };
        let out = decoded.map_err(|source| CodecError::Corrupted {
            codec: self,
            source,
        })?;

        if let Some(limit) = limit {
            if out.len() as u64 > limit {
                return Err(CodecError::TooLarge { codec: self, limit });
            }
        }

        Ok(out)
    }
}

/// Drain a decoder, stopping one byte past `limit`
fn read_bounded<D: Read>(mut decoder: D, limit: Option<u64>) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match limit {
        Some(limit) => decoder.take(limit.saturating_add(1)).read_to_end(&mut out)?,
        None => decoder.read_to_end(&mut out)?,
    };
    Ok(out)
}

/// Read up to `MAX_MAGIC_LEN` bytes, tolerating short reads and early EOF
fn read_header<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut header = vec![0u8; MAX_MAGIC_LEN];
    let mut filled = 0;
    while filled < MAX_MAGIC_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    header.truncate(filled);
    Ok(header)
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gzip" => Ok(Codec::Gzip),
            "lz4" => Ok(Codec::Lz4),
            _ => Err(CodecError::Unknown(s.to_string())),
        }
    }
}
