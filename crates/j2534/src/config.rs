//! Client configuration

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PassThruError, Result};

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Path to the vendor PassThru shared library
    pub library_path: Option<PathBuf>,

    /// Timeout for read and select helpers (milliseconds)
    pub default_timeout_ms: u32,

    /// Messages requested per `PassThruReadMsgs` call
    pub read_batch_size: usize,

    /// Payload capacity of each receive buffer (bytes)
    pub rx_buffer_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            default_timeout_ms: 1000,
            read_batch_size: 16,
            // Largest ISO 15765 payload plus the 4-byte CAN id.
            rx_buffer_size: 4128,
        }
    }
}

impl ClientConfig {
    /// Config pointing at a specific library
    pub fn with_library(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Load defaults, then `file` if given, then `J2534_*` environment variables
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(Environment::with_prefix("J2534").try_parsing(true))
            .build()?;

        let config: ClientConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_batch_size == 0 {
            return Err(PassThruError::InvalidConfig(
                "read_batch_size must be at least 1".to_string(),
            ));
        }
        if self.rx_buffer_size == 0 {
            return Err(PassThruError::InvalidConfig(
                "rx_buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured library path, or a descriptive error
    pub fn require_library_path(&self) -> Result<&Path> {
        self.library_path.as_deref().ok_or_else(|| {
            PassThruError::InvalidConfig(
                "library_path is not set (use a config file or J2534_LIBRARY_PATH)".to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.default_timeout_ms, 1000);
        assert_eq!(config.rx_buffer_size, 4128);
        assert!(config.library_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let config = ClientConfig {
            read_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PassThruError::InvalidConfig(_))));

        let config = ClientConfig {
            rx_buffer_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_library_path() {
        assert!(ClientConfig::default().require_library_path().is_err());
        let config = ClientConfig::with_library("/opt/passthru/libj2534.so");
        assert_eq!(
            config.require_library_path().unwrap(),
            Path::new("/opt/passthru/libj2534.so")
        );
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("j2534-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "library_path = \"/usr/lib/j2534.so\"").unwrap();
        writeln!(file, "read_batch_size = 4").unwrap();
        drop(file);

        let config = ClientConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.library_path, Some(PathBuf::from("/usr/lib/j2534.so")));
        assert_eq!(config.read_batch_size, 4);
        assert_eq!(config.default_timeout_ms, 1000);
    }
}
