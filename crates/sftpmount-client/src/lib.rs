//! Asynchronous SFTP client for sftpmount.
//!
//! Layers, bottom up:
//!
//! - [`frame`]: reassembles length-prefixed frames from arbitrary reads
//! - [`correlator`]: matches replies to suspended callers by request id
//! - [`channel`]: one connection at a time, with reader/writer tasks and
//!   reconnect on failure
//! - [`client`]: typed calls (`lstat`, `open`, `read`, ...) routed over one or
//!   two channels
//!
//! Every call is an `async fn` that suspends until its reply arrives. Any
//! number of calls may be in flight at once and replies may arrive in any
//! order.
//!
//! # Example
//!
//! ```no_run
//! use sftpmount_client::{Client, ClientConfig, CommandConnector};
//! use std::sync::Arc;
//!
//! # async fn demo() -> sftpmount_client::ClientResult<()> {
//! let connector = CommandConnector::new("ssh", ["-s", "example.org", "sftp"]);
//! let client = Client::connect(Arc::new(connector), ClientConfig::default()).await?;
//! let attrs = client.lstat("/etc/hostname").await?;
//! println!("{:?}", attrs.size);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod connector;
pub mod correlator;
pub mod error;
pub mod frame;
pub mod session;

/// In-memory server for tests of code built on this crate.
pub mod testing;

pub use channel::{Channel, ChannelRole, ChannelStats, LinkStatus};
pub use client::{Client, ClientStats, RemoteHandle};
pub use config::{ChannelMode, ClientConfig, ReconnectPolicy, SymlinkOrder};
pub use connector::{CommandConnector, Connection, Connector};
pub use correlator::{Correlator, PendingRequest};
pub use error::{ClientError, ClientResult, TransportError};
pub use frame::{DEFAULT_MAX_FRAME_LEN, FrameError, FrameReader};
pub use session::{ROOT_INO, Session};
