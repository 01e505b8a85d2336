//! Backup store object layout
//!
//! Block files are sharded two levels deep by checksum prefix so no single
//! directory grows unbounded:
//!
//! ```text
//! backupstore/volumes/<v0v1>/<v2v3>/<volume>/blocks/<c0c1>/<c2c3>/<checksum>.blk
//! ```
//!
//! where `v` is the checksum of the volume name and `c` the block checksum.

use std::collections::HashMap;
use thiserror::Error;

use crate::checksum::compute_checksum;

pub const BACKUPSTORE_BASE: &str = "backupstore";
pub const VOLUME_DIRECTORY: &str = "volumes";
pub const BLOCKS_DIRECTORY: &str = "blocks";
pub const BLOCK_SUFFIX: &str = ".blk";

const SEPARATE_LAYER1: usize = 2;
const SEPARATE_LAYER2: usize = 4;

/// Block size used when a backup does not specify one: 2 MiB
pub const DEFAULT_BLOCK_SIZE: u64 = 2 * 1024 * 1024;

/// Backup parameter carrying the block size quantity
pub const BLOCK_SIZE_PARAMETER: &str = "backupBlockSize";

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("invalid block checksum {0:?}: need at least 4 alphanumeric characters")]
    InvalidChecksum(String),

    #[error("invalid block size {value} from parameter {parameter}: {reason}")]
    InvalidBlockSize {
        value: String,
        parameter: &'static str,
        reason: String,
    },
}

/// Directory holding everything stored for a volume
pub fn volume_path(volume: &str) -> String {
    let hash = compute_checksum(volume.as_bytes());
    format!(
        "{}/{}/{}/{}/{}/",
        BACKUPSTORE_BASE,
        VOLUME_DIRECTORY,
        &hash[..SEPARATE_LAYER1],
        &hash[SEPARATE_LAYER1..SEPARATE_LAYER2],
        volume
    )
}

/// Directory holding a volume's block files
pub fn block_directory(volume: &str) -> String {
    format!("{}{}/", volume_path(volume), BLOCKS_DIRECTORY)
}

/// Backend path of a block file
pub fn block_file_path(volume: &str, checksum: &str) -> Result<String, LayoutError> {
    let valid = checksum.len() >= SEPARATE_LAYER2
        && checksum.chars().all(|c| c.is_ascii_alphanumeric());
    if !valid {
        return Err(LayoutError::InvalidChecksum(checksum.to_string()));
    }

    Ok(format!(
        "{}{}/{}/{}{}",
        block_directory(volume),
        &checksum[..SEPARATE_LAYER1],
        &checksum[SEPARATE_LAYER1..SEPARATE_LAYER2],
        checksum,
        BLOCK_SUFFIX
    ))
}

/// Block size requested by backup parameters
///
/// Missing, empty or zero quantities fall back to `DEFAULT_BLOCK_SIZE`.
pub fn block_size_from_parameters(
    parameters: Option<&HashMap<String, String>>,
) -> Result<u64, LayoutError> {
    let Some(value) = parameters
        .and_then(|params| params.get(BLOCK_SIZE_PARAMETER))
        .filter(|value| !value.is_empty())
    else {
        return Ok(DEFAULT_BLOCK_SIZE);
    };

    let size = parse_quantity(value).map_err(|reason| LayoutError::InvalidBlockSize {
        value: value.clone(),
        parameter: BLOCK_SIZE_PARAMETER,
        reason,
    })?;

    Ok(if size == 0 { DEFAULT_BLOCK_SIZE } else { size })
}

/// Parse a Kubernetes-style quantity (`2Mi`, `512k`, `1G`, `4096`) into bytes
pub fn parse_quantity(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, suffix) = value.split_at(split);
    if digits.is_empty() {
        return Err("missing numeric value".to_string());
    }

    let number: u64 = digits
        .parse()
        .map_err(|e| format!("bad number {digits:?}: {e}"))?;
    let multiplier: u64 = match suffix {
        "" => 1,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        other => return Err(format!("unsupported suffix {other:?}")),
    };

    number
        .checked_mul(multiplier)
        .ok_or_else(|| "quantity overflows".to_string())
}
