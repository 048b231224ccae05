//! Mount configuration.
//!
//! Everything here can be loaded from a TOML file (durations use humantime
//! syntax such as `"30s"`) or set with the builder methods. Transport knobs
//! are passed through to the client via [`MountConfig::client_config`].

use crate::error::{FsError, FsResult};
use serde::{Deserialize, Serialize};
use sftpmount_client::{
    ChannelMode, ClientConfig, DEFAULT_MAX_FRAME_LEN, ReconnectPolicy, SymlinkOrder,
};
use std::time::Duration;

/// Default freshness window for attributes and listings.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Default largest single READ or WRITE request.
pub const DEFAULT_CHUNK_SIZE: u32 = 32 * 1024;

/// Frame overhead on top of a data chunk (header, handle, offsets).
const CHUNK_OVERHEAD: usize = 1024;

/// Configuration options for a mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// How long cached attributes and directory listings stay fresh.
    ///
    /// A read before the TTL has elapsed is answered locally; at or after
    /// the TTL it triggers one remote request. Default: 30 seconds.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// One connection, or separate metadata and data connections.
    pub channels: ChannelMode,

    /// Largest READ request sent. Larger reads are split. Default: 32 KiB.
    pub max_read: u32,

    /// Largest WRITE request sent. Larger writes are split. Default: 32 KiB.
    pub max_write: u32,

    /// Issue an LSTAT for every newly listed name while a listing is fetched.
    pub prefetch_attrs: bool,

    /// Remote directory to mount. Resolved with REALPATH at mount time.
    pub remote_root: String,

    pub symlink_order: SymlinkOrder,

    /// Optional per-request deadline. Default: none.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// Largest frame accepted from the server.
    pub max_frame_len: usize,

    pub reconnect: ReconnectPolicy,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            channels: ChannelMode::One,
            max_read: DEFAULT_CHUNK_SIZE,
            max_write: DEFAULT_CHUNK_SIZE,
            prefetch_attrs: false,
            remote_root: ".".to_string(),
            symlink_order: SymlinkOrder::OpenSsh,
            request_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl MountConfig {
    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn channels(mut self, channels: ChannelMode) -> Self {
        self.channels = channels;
        self
    }

    #[must_use]
    pub fn max_read(mut self, size: u32) -> Self {
        self.max_read = size;
        self
    }

    #[must_use]
    pub fn max_write(mut self, size: u32) -> Self {
        self.max_write = size;
        self
    }

    #[must_use]
    pub fn prefetch_attrs(mut self, enabled: bool) -> Self {
        self.prefetch_attrs = enabled;
        self
    }

    #[must_use]
    pub fn remote_root(mut self, root: impl Into<String>) -> Self {
        self.remote_root = root.into();
        self
    }

    #[must_use]
    pub fn symlink_order(mut self, order: SymlinkOrder) -> Self {
        self.symlink_order = order;
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Checks that the chunk sizes fit in a frame.
    pub fn validate(&self) -> FsResult<()> {
        if self.max_read == 0 || self.max_write == 0 {
            return Err(FsError::Config("chunk sizes must be non-zero".into()));
        }
        let largest = self.max_read.max(self.max_write) as usize;
        if largest + CHUNK_OVERHEAD > self.max_frame_len {
            return Err(FsError::Config(format!(
                "chunk size {largest} does not fit in max_frame_len {}",
                self.max_frame_len
            )));
        }
        if self.remote_root.is_empty() {
            return Err(FsError::Config("remote_root is empty".into()));
        }
        Ok(())
    }

    /// The transport settings for the client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            channels: self.channels,
            max_frame_len: self.max_frame_len,
            request_timeout: self.request_timeout,
            reconnect: self.reconnect.clone(),
            symlink_order: self.symlink_order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MountConfig::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
        assert_eq!(config.max_read, 32 * 1024);
        assert_eq!(config.max_write, 32 * 1024);
        assert_eq!(config.channels, ChannelMode::One);
        assert_eq!(config.remote_root, ".");
        assert!(!config.prefetch_attrs);
        assert!(config.request_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = MountConfig::default()
            .cache_ttl(Duration::from_secs(5))
            .channels(ChannelMode::Two)
            .prefetch_attrs(true)
            .remote_root("/srv")
            .request_timeout(Some(Duration::from_secs(10)));
        assert_eq!(config.cache_ttl, Duration::from_secs(5));
        assert_eq!(config.channels, ChannelMode::Two);
        assert!(config.prefetch_attrs);
        assert_eq!(config.remote_root, "/srv");

        let client = config.client_config();
        assert_eq!(client.channels, ChannelMode::Two);
        assert_eq!(client.request_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_validate_rejects_oversized_chunks() {
        let config = MountConfig::default().max_read(DEFAULT_MAX_FRAME_LEN as u32);
        assert!(matches!(config.validate(), Err(FsError::Config(_))));
        let config = MountConfig::default().max_write(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let config: MountConfig = toml::from_str(
            r#"
            cache_ttl = "2m"
            channels = "two"
            remote_root = "/data"
            request_timeout = "15s"

            [reconnect]
            max_attempts = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(120));
        assert_eq!(config.channels, ChannelMode::Two);
        assert_eq!(config.remote_root, "/data");
        assert_eq!(config.request_timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.initial_backoff, Duration::from_millis(250));
        assert_eq!(config.max_read, DEFAULT_CHUNK_SIZE);
    }
}
