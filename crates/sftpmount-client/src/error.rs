//! Error types for the client.

use sftpmount_proto::{DecodeError, ErrorKind, Status, StatusCode};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failures of the byte stream underneath a channel.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The connection carrying the request went away before a reply arrived.
    ///
    /// The channel reconnects on its own; retrying the call is safe once the
    /// caller knows the request was idempotent.
    #[error("connection lost")]
    ConnectionLost,

    /// Reconnection gave up. The mount cannot continue.
    #[error("transport failed permanently after {attempts} reconnect attempts")]
    Fatal { attempts: u32 },

    /// Spawning or talking to the endpoint failed.
    #[error("transport I/O error: {kind}: {message}")]
    Io { kind: io::ErrorKind, message: String },
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Errors returned by client calls.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The server answered with a failure status.
    #[error("remote error: {kind} ({message})")]
    Remote {
        kind: ErrorKind,
        code: StatusCode,
        message: String,
    },

    /// A malformed or unexpected packet.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A configured limit was exceeded.
    #[error("resource limit exceeded: {0}")]
    Resource(String),

    /// No reply within the configured request timeout.
    #[error("{request} timed out after {elapsed:?}")]
    Timeout {
        request: &'static str,
        elapsed: Duration,
    },

    /// The handle belongs to a connection that has since been replaced.
    #[error("handle is from connection generation {handle}, channel is at {current}")]
    StaleHandle { handle: u64, current: u64 },
}

impl ClientError {
    /// Builds the error for a failure status.
    ///
    /// `OK` and `EOF` are not failures; callers handle them before getting
    /// here, so they are reported as protocol errors if they do arrive.
    pub fn from_status(status: Status) -> Self {
        match status.error_kind() {
            Some(kind) => ClientError::Remote {
                kind,
                code: status.code,
                message: status.message,
            },
            None => ClientError::Protocol(format!("unexpected status {:?}", status.code)),
        }
    }

    /// The remote error kind, if this is a remote failure.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind(), Some(ErrorKind::NotFound | ErrorKind::BadPath))
    }

    pub fn is_permission_denied(&self) -> bool {
        self.kind() == Some(ErrorKind::PermissionDenied)
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ClientError::Transport(TransportError::ConnectionLost))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Transport(TransportError::Fatal { .. }))
    }

    /// Converts this error to a libc error code.
    pub fn to_errno(&self) -> i32 {
        match self {
            ClientError::Remote { kind, .. } => kind.to_errno(),
            ClientError::Protocol(_) => libc::EPROTO,
            ClientError::Transport(TransportError::ConnectionLost) => libc::ESHUTDOWN,
            ClientError::Transport(TransportError::Fatal { .. }) => libc::ENOTCONN,
            ClientError::Transport(TransportError::Io { .. }) => libc::EIO,
            ClientError::Resource(_) => libc::EMSGSIZE,
            ClientError::Timeout { .. } => libc::ETIMEDOUT,
            ClientError::StaleHandle { .. } => libc::EBADF,
        }
    }
}

impl From<DecodeError> for ClientError {
    fn from(err: DecodeError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_status_keeps_kind_and_message() {
        let err = ClientError::from_status(Status::new(StatusCode::NoSuchFile, "gone"));
        assert!(err.is_not_found());
        assert_eq!(err.to_errno(), libc::ENOENT);
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_ok_status_is_not_a_remote_error() {
        let err = ClientError::from_status(Status::ok());
        assert!(matches!(err, ClientError::Protocol(_)));
        assert_eq!(err.to_errno(), libc::EPROTO);
    }

    #[test]
    fn test_transport_errno() {
        assert_eq!(
            ClientError::from(TransportError::ConnectionLost).to_errno(),
            libc::ESHUTDOWN
        );
        assert!(ClientError::from(TransportError::Fatal { attempts: 5 }).is_fatal());
        let io_err = TransportError::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert_eq!(ClientError::from(io_err).to_errno(), libc::EIO);
    }

    #[test]
    fn test_timeout_errno() {
        let err = ClientError::Timeout {
            request: "lstat",
            elapsed: Duration::from_secs(3),
        };
        assert_eq!(err.to_errno(), libc::ETIMEDOUT);
        assert!(err.to_string().starts_with("lstat"));
    }
}
