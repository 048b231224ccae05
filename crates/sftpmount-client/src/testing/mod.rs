//! Testing utilities for code built on the client.
//!
//! Provides an in-memory SFTP server that speaks the real wire protocol over
//! an in-process duplex stream, so the whole stack (framing, correlation,
//! reconnect) runs unchanged in tests:
//!
//! - **Filesystem**: a path-keyed tree of files, directories and symlinks
//! - **Counters**: requests received, per packet type
//! - **Reply holding**: queue replies and release them in any order
//! - **Fault injection**: kill connections, refuse reconnects, fail requests
//!
//! # Usage
//!
//! ```ignore
//! use sftpmount_client::testing::MemoryServer;
//! use sftpmount_client::{Client, ClientConfig};
//!
//! let server = MemoryServer::new();
//! server.add_file("/hello.txt", b"hi");
//! let client = Client::connect(server.connector(), ClientConfig::default()).await?;
//! ```

mod server;

pub use server::{MemoryConnector, MemoryServer, READDIR_BATCH};
