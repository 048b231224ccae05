//! Virtual filesystem over SFTP.
//!
//! This crate turns a remote directory into a tree of inode-numbered nodes
//! that a host (FUSE, NFS, or a command-line tool) can drive:
//!
//! - Attribute and directory-listing caches with a single freshness window
//! - Stable node identity across listing refreshes and renames
//! - Parent-before-child reclamation with deferred, cascading frees
//! - Shared remote file handles per node, reopened after reconnects
//! - Chunked, pipelined reads and writes
//!
//! # Usage
//!
//! ```no_run
//! use sftpmount_client::CommandConnector;
//! use sftpmount_vfs::{MountConfig, SftpFs};
//! use std::sync::Arc;
//!
//! # async fn demo() -> sftpmount_vfs::FsResult<()> {
//! let connector = CommandConnector::new("ssh", ["-s", "example.org", "sftp"]);
//! let fs = SftpFs::mount(Arc::new(connector), MountConfig::default()).await?;
//! for entry in fs.readdir(fs.root(), 0).await? {
//!     println!("{}", entry.name);
//! }
//! # Ok(())
//! # }
//! ```

mod cache;
pub mod config;
pub mod error;
pub mod export;
mod files;
pub mod filesystem;
pub mod lifecycle;
pub mod node;
pub mod notifier;
pub mod stats;

pub use config::{DEFAULT_CACHE_TTL, DEFAULT_CHUNK_SIZE, MountConfig};
pub use error::{FsError, FsResult};
pub use export::ExportHandle;
pub use filesystem::SftpFs;
pub use lifecycle::Reclaimed;
pub use node::{Access, DirEntry, DirectoryEntry, Listing, Node, NodeAttr, NodeTable, OpenMode};
pub use notifier::{NoopNotifier, Notifier};
pub use sftpmount_client::ROOT_INO;
pub use stats::FsStatistics;
