//! Client-side configuration.

use crate::frame::DEFAULT_MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many connections a mount keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// All traffic on one connection.
    #[default]
    One,
    /// Metadata on one connection, file data on a second.
    Two,
}

/// Argument order of the `SYMLINK` request.
///
/// The protocol draft sends (linkpath, targetpath); OpenSSH's server has
/// always read them the other way around, and other servers followed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymlinkOrder {
    #[default]
    OpenSsh,
    Draft,
}

/// Bounded exponential backoff for reconnecting a failed channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Attempts before the transport is declared dead. Zero disables reconnecting.
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect; the first failure is fatal.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before attempt number `attempt` (starting at 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// Settings shared by every channel of a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub channels: ChannelMode,
    /// Largest frame accepted from the server.
    pub max_frame_len: usize,
    /// Per-request deadline. `None` waits for as long as the connection lives.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    pub reconnect: ReconnectPolicy,
    pub symlink_order: SymlinkOrder,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            channels: ChannelMode::One,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            request_timeout: None,
            reconnect: ReconnectPolicy::default(),
            symlink_order: SymlinkOrder::OpenSsh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_secs(1));
        assert_eq!(policy.backoff(6), Duration::from_secs(8));
        assert_eq!(policy.backoff(60), Duration::from_secs(8));
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.channels, ChannelMode::One);
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(ReconnectPolicy::disabled().max_attempts, 0);
    }
}
