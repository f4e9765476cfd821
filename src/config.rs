//! Configuration for storage backends and the `mmdata` command line tool.
//!
//! Library callers configure file-backed storage through [`StorageOptions`].
//! The binary parses a [`Cli`] with clap; every option can also be set via
//! environment variables with the `MMDATA_` prefix:
//!
//! - `MMDATA_MAX_FILE_MB` - Maximum size of one multipage container file in MiB
//! - `MMDATA_VERBOSE` - Enable debug logging
//!
//! # Example
//!
//! ```
//! use mm_datastore::config::StorageOptions;
//!
//! let options = StorageOptions::with_max_file_bytes(64 * 1024 * 1024).unwrap();
//! assert_eq!(options.max_file_bytes, 64 * 1024 * 1024);
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::error::DataError;

// =============================================================================
// Default Values
// =============================================================================

/// Default maximum size of one multipage container file (4 GiB - 1 MiB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = (4 << 30) - (1 << 20);

/// Smallest accepted container size limit.
pub const MIN_MAX_FILE_BYTES: u64 = 1024;

/// Largest accepted container size limit; offsets in a classic TIFF are 32-bit.
pub const MAX_MAX_FILE_BYTES: u64 = u32::MAX as u64;

// =============================================================================
// StorageOptions
// =============================================================================

/// Options for file-backed storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageOptions {
    /// A multipage container is finalized and a new file started before a
    /// page would push it past this size.
    pub max_file_bytes: u64,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl StorageOptions {
    /// Options with a custom container size limit.
    pub fn with_max_file_bytes(max_file_bytes: u64) -> Result<Self, DataError> {
        let options = Self { max_file_bytes };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), DataError> {
        if !(MIN_MAX_FILE_BYTES..=MAX_MAX_FILE_BYTES).contains(&self.max_file_bytes) {
            return Err(DataError::InvalidArgument(format!(
                "max_file_bytes must be between {} and {}, got {}",
                MIN_MAX_FILE_BYTES, MAX_MAX_FILE_BYTES, self.max_file_bytes
            )));
        }
        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// mmdata - Inspect and convert microscopy datasets.
#[derive(Parser, Debug, Clone)]
#[command(name = "mmdata")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the format, summary and coordinates of a dataset.
    Info(InfoConfig),

    /// Copy a dataset into a new directory using another storage layout.
    Convert(ConvertConfig),
}

/// Target layout for `mmdata convert`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    /// MMStack multipage TIFF containers
    Multipage,

    /// One TIFF per image with a metadata.txt companion
    SinglePlane,
}

#[derive(Parser, Debug, Clone)]
pub struct InfoConfig {
    /// Dataset directory.
    pub dir: PathBuf,

    /// List every image coordinate.
    #[arg(long, default_value_t = false)]
    pub list: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false, env = "MMDATA_VERBOSE")]
    pub verbose: bool,
}

impl InfoConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.dir.as_os_str().is_empty() {
            return Err("dataset directory is required".to_string());
        }
        Ok(())
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ConvertConfig {
    /// Source dataset directory.
    pub src: PathBuf,

    /// Destination directory (must not already hold a dataset).
    pub dst: PathBuf,

    /// Layout to write.
    #[arg(long = "to", value_enum)]
    pub to: TargetFormat,

    /// Write each stage position to its own file sequence (multipage only).
    #[arg(long, default_value_t = false)]
    pub split_positions: bool,

    /// Also write per-image metadata to a separate text file (multipage only).
    #[arg(long, default_value_t = false)]
    pub separate_metadata: bool,

    /// Maximum size of one container file in MiB.
    #[arg(long, env = "MMDATA_MAX_FILE_MB")]
    pub max_file_mb: Option<u64>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false, env = "MMDATA_VERBOSE")]
    pub verbose: bool,
}

impl ConvertConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.src == self.dst {
            return Err("source and destination must differ".to_string());
        }

        if self.to == TargetFormat::SinglePlane && (self.split_positions || self.separate_metadata)
        {
            return Err(
                "--split-positions and --separate-metadata only apply to --to multipage"
                    .to_string(),
            );
        }

        self.storage_options()
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    /// Storage options derived from `--max-file-mb`.
    pub fn storage_options(&self) -> Result<StorageOptions, DataError> {
        match self.max_file_mb {
            Some(mb) => StorageOptions::with_max_file_bytes(mb.saturating_mul(1024 * 1024)),
            None => Ok(StorageOptions::default()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
