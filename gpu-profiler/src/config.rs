//! Configuration types for the tracer

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::buffer::{BUFFER_ALIGN, DEFAULT_BUFFER_SIZE};

/// Default location of the trace log, relative to the working directory
pub const DEFAULT_LOG_PATH: &str = "cupti_trace.bnff.txt";

/// Smallest activity buffer the tracer will hand to the runtime
pub const MIN_BUFFER_SIZE: usize = 1024;

/// Tracer configuration
///
/// The set of traced activity kinds is fixed and not part of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Append-mode text log (None = no log file)
    pub log_path: Option<PathBuf>,

    /// Capacity of each activity buffer handed to the runtime, in bytes
    pub buffer_size: usize,

    /// Flush the log after every entry instead of only at session end
    pub flush_per_record: bool,

    /// Keep decoded records in memory for `get_records`
    pub keep_records: bool,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            log_path: Some(PathBuf::from(DEFAULT_LOG_PATH)),
            buffer_size: DEFAULT_BUFFER_SIZE,
            flush_per_record: true,
            keep_records: true,
        }
    }
}

impl TracerConfig {
    /// Parse a configuration from TOML and validate it
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: TracerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration that keeps records in memory but writes no log file
    pub fn in_memory() -> Self {
        Self {
            log_path: None,
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            anyhow::bail!(
                "Buffer size too small ({} bytes, min {})",
                self.buffer_size,
                MIN_BUFFER_SIZE
            );
        }

        if self.buffer_size % BUFFER_ALIGN != 0 {
            anyhow::bail!(
                "Buffer size must be a multiple of {} bytes, got {}",
                BUFFER_ALIGN,
                self.buffer_size
            );
        }

        if let Some(path) = &self.log_path {
            if path.as_os_str().is_empty() {
                anyhow::bail!("Log path must not be empty");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TracerConfig::default();
        assert_eq!(config.buffer_size, 32 * 1024);
        assert_eq!(config.log_path, Some(PathBuf::from("cupti_trace.bnff.txt")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_buffer_too_small() {
        let config = TracerConfig {
            buffer_size: 512,
            ..TracerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_unaligned_buffer() {
        let config = TracerConfig {
            buffer_size: 4097,
            ..TracerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_empty_log_path() {
        let config = TracerConfig {
            log_path: Some(PathBuf::new()),
            ..TracerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = TracerConfig::from_toml_str(
            r#"
            buffer_size = 65536
            flush_per_record = false
            "#,
        )
        .unwrap();

        assert_eq!(config.buffer_size, 65536);
        assert!(!config.flush_per_record);
        assert!(config.keep_records);
        assert_eq!(config.log_path, Some(PathBuf::from(DEFAULT_LOG_PATH)));
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        assert!(TracerConfig::from_toml_str("buffer_size = 100").is_err());
        assert!(TracerConfig::from_toml_str("buffer_size = \"big\"").is_err());
    }
}
