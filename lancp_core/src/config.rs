use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::discovery::{MAX_PASSPHRASE_BUF_SIZE, MIN_PASSPHRASE_BUF_SIZE};
use crate::error::LancpError;
use crate::net::Port;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "lancp";
const APP_NAME: &str = "lancp";
const CONFIG_FILE: &str = "config.json";

/// Overrides the platform config directory.
pub const CONFIG_DIR_ENV: &str = "LANCP_CONFIG_DIR";

pub const DEFAULT_PORT: u16 = 6969;
pub const DEFAULT_TLS_PORT: u16 = 6970;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LancpConfig {
    /// Discovery UDP port, reused for the certificate hand-over.
    pub port: u16,
    pub tls_port: u16,
    pub handshake_timeout_secs: u64,
    pub bootstrap_timeout_secs: u64,
    pub transfer_timeout_secs: u64,
    pub passphrase_buffer_size: usize,
    pub download_dir: PathBuf,
}

impl Default for LancpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            tls_port: DEFAULT_TLS_PORT,
            handshake_timeout_secs: 60,
            bootstrap_timeout_secs: 10,
            transfer_timeout_secs: 30,
            passphrase_buffer_size: MIN_PASSPHRASE_BUF_SIZE,
            download_dir: PathBuf::from("."),
        }
    }
}

impl LancpConfig {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        get_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from disk or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Ignoring unreadable config: {}", e);
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, LancpError> {
        let content = fs::read_to_string(path).map_err(|source| LancpError::FilesystemFailure {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content)
            .map_err(|e| LancpError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), LancpError> {
        let fs_err = |source| LancpError::FilesystemFailure {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(fs_err)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| LancpError::Config(e.to_string()))?;
        fs::write(path, json).map_err(fs_err)
    }

    /// Check ranges and return the validated discovery and TLS ports.
    pub fn validate(&self) -> Result<(Port, Port), LancpError> {
        let port = Port::new(self.port as i64)?;
        let tls_port = Port::new(self.tls_port as i64)?;
        if port == tls_port {
            return Err(LancpError::Config(format!(
                "discovery and TLS ports must differ, both are {}",
                port
            )));
        }
        if !(MIN_PASSPHRASE_BUF_SIZE..=MAX_PASSPHRASE_BUF_SIZE)
            .contains(&self.passphrase_buffer_size)
        {
            return Err(LancpError::Config(format!(
                "passphrase buffer size should be in the range [{}, {}], got: {}",
                MIN_PASSPHRASE_BUF_SIZE, MAX_PASSPHRASE_BUF_SIZE, self.passphrase_buffer_size
            )));
        }
        for (name, secs) in [
            ("handshake", self.handshake_timeout_secs),
            ("bootstrap", self.bootstrap_timeout_secs),
            ("transfer", self.transfer_timeout_secs),
        ] {
            if secs == 0 {
                return Err(LancpError::Config(format!("{} timeout must be positive", name)));
            }
        }
        Ok((port, tls_port))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

/// Get the config directory path for this app
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LancpConfig::default();
        let (port, tls_port) = config.validate().unwrap();
        assert_eq!(port.get(), 6969);
        assert_eq!(tls_port.get(), 6970);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{ "port": 7000, "download_dir": "/tmp/in" }"#).unwrap();

        let config = LancpConfig::load_from(&path).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.tls_port, DEFAULT_TLS_PORT);
        assert_eq!(config.download_dir, PathBuf::from("/tmp/in"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config = LancpConfig {
            transfer_timeout_secs: 5,
            ..LancpConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(LancpConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            LancpConfig::load_from(&path),
            Err(LancpError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let low_port = LancpConfig {
            port: 80,
            ..LancpConfig::default()
        };
        assert!(matches!(
            low_port.validate(),
            Err(LancpError::InvalidAddress(_))
        ));

        let same_ports = LancpConfig {
            tls_port: DEFAULT_PORT,
            ..LancpConfig::default()
        };
        assert!(matches!(same_ports.validate(), Err(LancpError::Config(_))));

        let big_buffer = LancpConfig {
            passphrase_buffer_size: 4096,
            ..LancpConfig::default()
        };
        assert!(matches!(big_buffer.validate(), Err(LancpError::Config(_))));

        let no_wait = LancpConfig {
            handshake_timeout_secs: 0,
            ..LancpConfig::default()
        };
        assert!(matches!(no_wait.validate(), Err(LancpError::Config(_))));
    }
}
