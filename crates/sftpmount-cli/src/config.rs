//! Loading the mount configuration for the binary.
//!
//! An explicit `--config FILE` must exist. Otherwise `config.toml` in the
//! user config directory is used if present, and the defaults if not.
//! `SFTPMOUNT_CONFIG_DIR` overrides the config directory.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use sftpmount_vfs::{FsError, MountConfig};
use thiserror::Error;

const CONFIG_FILE: &str = "config.toml";

/// Contents that are not a usable mount configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Syntax(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] FsError),
}

/// A configuration file that could not be used.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file: {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {}", path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
}

/// Directory holding the default config file.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("SFTPMOUNT_CONFIG_DIR") {
        return Some(PathBuf::from(dir));
    }
    directories::ProjectDirs::from("com", "sftpmount", "sftpmount")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn load(explicit: Option<&Path>) -> Result<MountConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_dir().map(|dir| dir.join(CONFIG_FILE)) {
            Some(path) if path.exists() => path,
            _ => {
                tracing::debug!("No config file found, using defaults");
                return Ok(MountConfig::default());
            }
        },
    };
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(source) => return Err(ConfigFileError::Read { path, source }.into()),
    };
    let config = match parse(&contents) {
        Ok(config) => config,
        Err(source) => return Err(ConfigFileError::Invalid { path, source }.into()),
    };
    tracing::info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Parses and validates a TOML mount configuration.
pub fn parse(contents: &str) -> Result<MountConfig, ConfigError> {
    let config: MountConfig = toml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_partial_config() {
        let config = parse("cache_ttl = \"5s\"\nchannels = \"two\"\n").unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(5));
        assert_eq!(config.max_read, MountConfig::default().max_read);
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        assert!(parse("max_write = 0\n").is_err());
        assert!(parse("cache_ttl = 12\n").is_err());
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mount.toml");
        std::fs::write(&path, "remote_root = \"/srv\"\n").unwrap();
        assert_eq!(load(Some(&path)).unwrap().remote_root, "/srv");
    }

    #[test]
    fn test_bad_file_reports_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mount.toml");
        std::fs::write(&path, "max_read = \"lots\"\n").unwrap();
        let err = load(Some(&path)).unwrap_err();
        let config_err = err.downcast_ref::<ConfigFileError>().unwrap();
        assert!(matches!(
            config_err,
            ConfigFileError::Invalid {
                source: ConfigError::Syntax(_),
                ..
            }
        ));
        // The TOML cause stays reachable through the chain.
        assert_eq!(err.chain().count(), 2);
    }

    #[test]
    fn test_rejected_values_keep_their_cause() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mount.toml");
        std::fs::write(&path, "max_read = 0\n").unwrap();
        let err = load(Some(&path)).unwrap_err();
        let cause = err.chain().nth(1).unwrap();
        assert!(cause.downcast_ref::<ConfigError>().is_some());
        assert!(format!("{err:#}").contains("chunk sizes must be non-zero"));
    }

    #[test]
    fn test_unreadable_file_keeps_io_cause() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        let cause = err.chain().nth(1).unwrap();
        let io_err = cause.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);
    }
}
