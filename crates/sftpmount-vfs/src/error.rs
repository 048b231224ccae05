//! Error handling and errno mapping for filesystem operations.

use sftpmount_client::ClientError;
use thiserror::Error;

/// Errors returned by filesystem operations.
#[derive(Debug, Clone, Error)]
pub enum FsError {
    /// Failure reported by the client: remote status, protocol, transport.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The name is not in the directory's (fresh) listing.
    #[error("No such entry: {0}")]
    NotFound(String),

    #[error("Not a directory: inode {0}")]
    NotADirectory(u64),

    #[error("Is a directory: inode {0}")]
    IsADirectory(u64),

    /// The inode is not (or no longer) known.
    #[error("Invalid inode: {0}")]
    InvalidInode(u64),

    /// No open remote handle for the requested access.
    #[error("No open handle on inode {0}")]
    InvalidHandle(u64),

    /// An exported handle that does not resolve in this mount.
    #[error("Stale exported handle")]
    StaleExport,

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    /// Names may not be empty or contain a slash.
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// `offset + len` does not fit in a file offset.
    #[error("Range out of bounds: offset {offset}, length {len}")]
    InvalidRange { offset: u64, len: u64 },

    /// The client gave up reconnecting; the mount is unusable.
    #[error("Connection to the server is gone")]
    Disconnected,
}

impl FsError {
    /// Converts this error to a libc error code.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::Client(e) => e.to_errno(),
            FsError::NotFound(_) | FsError::InvalidInode(_) => libc::ENOENT,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::InvalidHandle(_) => libc::EBADF,
            FsError::StaleExport => libc::ESTALE,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::InvalidName(_) | FsError::Config(_) | FsError::InvalidRange { .. } => {
                libc::EINVAL
            }
            FsError::Disconnected => libc::ENOTCONN,
        }
    }

    /// True for "does not exist", whether decided locally or by the server.
    pub fn is_not_found(&self) -> bool {
        match self {
            FsError::NotFound(_) | FsError::InvalidInode(_) => true,
            FsError::Client(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;
