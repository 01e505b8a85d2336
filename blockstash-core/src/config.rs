//! Configuration management for Blockstash
//!
//! Handles CLI argument parsing, config file loading, and defaults.
//! Values given on the command line override the config file, which
//! overrides the built-in defaults.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::backoff::BackoffSchedule;
use crate::codec::Codec;
use crate::layout::{block_size_from_parameters, LayoutError, BLOCK_SIZE_PARAMETER, DEFAULT_BLOCK_SIZE};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

#[derive(Parser, Debug)]
#[command(name = "blockstash")]
#[command(about = "Fetch and verify blocks from a backup store", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch, decompress and verify blocks of a volume
    Fetch(FetchCommand),
}

#[derive(Parser, Debug, Clone)]
pub struct FetchCommand {
    /// Root directory of the backup store
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Volume the blocks belong to
    #[arg(long)]
    pub volume: Option<String>,

    /// Codec the blocks were written with
    #[arg(long, value_enum)]
    pub codec: Option<Codec>,

    /// Directory verified blocks are written to
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum decompressed block size, as a quantity (e.g. 2Mi)
    #[arg(long)]
    pub block_size: Option<String>,

    /// Logging level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// TOML config file supplying defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Checksums of the blocks to fetch
    #[arg(required = true)]
    pub checksums: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub root: PathBuf,
    pub volume: String,
    pub codec: Codec,
    pub output_dir: PathBuf,
    pub block_size: u64,
    pub log_level: String,
    #[serde(rename = "backoff_secs")]
    pub backoff: BackoffSchedule,
    pub checksums: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root: PathBuf::from("."),
            volume: String::new(),
            codec: Codec::Lz4,
            output_dir: PathBuf::from("./blocks"),
            block_size: DEFAULT_BLOCK_SIZE,
            log_level: "info".to_string(),
            backoff: BackoffSchedule::reference(),
            checksums: Vec::new(),
        }
    }
}

impl Config {
    /// Create config from CLI arguments
    pub fn from_cli() -> Result<Self, ConfigError> {
        let cli = Cli::parse();

        match cli.command {
            Commands::Fetch(cmd) => Self::from_fetch_command(cmd),
        }
    }

    /// Load config from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Layer a fetch command over its config file (or the defaults)
    pub fn from_fetch_command(cmd: FetchCommand) -> Result<Self, ConfigError> {
        let mut config = match &cmd.config {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };

        if let Some(root) = cmd.root {
            config.root = root;
        }
        if let Some(volume) = cmd.volume {
            config.volume = volume;
        }
        if let Some(codec) = cmd.codec {
            config.codec = codec;
        }
        if let Some(output_dir) = cmd.output_dir {
            config.output_dir = output_dir;
        }
        if let Some(block_size) = cmd.block_size {
            let params = HashMap::from([(BLOCK_SIZE_PARAMETER.to_string(), block_size)]);
            config.block_size = block_size_from_parameters(Some(&params))?;
        }
        if let Some(log_level) = cmd.log_level {
            config.log_level = log_level;
        }
        config.checksums = cmd.checksums;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.volume.is_empty() {
            return Err(ConfigError::Invalid("volume name is required".to_string()));
        }
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block size must be positive".to_string()));
        }
        Ok(())
    }
}
