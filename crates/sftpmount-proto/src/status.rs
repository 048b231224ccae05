//! Status codes and their POSIX-like error taxonomy.

use std::fmt;

/// A status code carried by a `STATUS` response.
///
/// Codes 0 through 12 are the ones defined for the protocol; anything else
/// is preserved as [`StatusCode::Other`] so it survives a round trip, and is
/// classified as a generic protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Eof,
    NoSuchFile,
    PermissionDenied,
    Failure,
    BadMessage,
    NoConnection,
    ConnectionLost,
    OpUnsupported,
    InvalidHandle,
    NoSuchPath,
    FileAlreadyExists,
    WriteProtect,
    Other(u32),
}

impl StatusCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Eof,
            2 => StatusCode::NoSuchFile,
            3 => StatusCode::PermissionDenied,
            4 => StatusCode::Failure,
            5 => StatusCode::BadMessage,
            6 => StatusCode::NoConnection,
            7 => StatusCode::ConnectionLost,
            8 => StatusCode::OpUnsupported,
            9 => StatusCode::InvalidHandle,
            10 => StatusCode::NoSuchPath,
            11 => StatusCode::FileAlreadyExists,
            12 => StatusCode::WriteProtect,
            other => StatusCode::Other(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::Eof => 1,
            StatusCode::NoSuchFile => 2,
            StatusCode::PermissionDenied => 3,
            StatusCode::Failure => 4,
            StatusCode::BadMessage => 5,
            StatusCode::NoConnection => 6,
            StatusCode::ConnectionLost => 7,
            StatusCode::OpUnsupported => 8,
            StatusCode::InvalidHandle => 9,
            StatusCode::NoSuchPath => 10,
            StatusCode::FileAlreadyExists => 11,
            StatusCode::WriteProtect => 12,
            StatusCode::Other(code) => code,
        }
    }

    /// Maps the code to its error kind.
    ///
    /// Returns `None` for `OK` and `EOF`, which are outcomes rather than
    /// failures.
    pub fn error_kind(self) -> Option<ErrorKind> {
        match self {
            StatusCode::Ok | StatusCode::Eof => None,
            StatusCode::NoSuchFile => Some(ErrorKind::NotFound),
            StatusCode::PermissionDenied => Some(ErrorKind::PermissionDenied),
            StatusCode::Failure => Some(ErrorKind::Failure),
            StatusCode::BadMessage => Some(ErrorKind::BadMessage),
            StatusCode::NoConnection => Some(ErrorKind::NotConnected),
            StatusCode::ConnectionLost => Some(ErrorKind::ConnectionLost),
            StatusCode::OpUnsupported => Some(ErrorKind::Unsupported),
            StatusCode::InvalidHandle => Some(ErrorKind::InvalidHandle),
            StatusCode::NoSuchPath => Some(ErrorKind::BadPath),
            StatusCode::FileAlreadyExists => Some(ErrorKind::AlreadyExists),
            StatusCode::WriteProtect => Some(ErrorKind::WriteProtected),
            StatusCode::Other(_) => Some(ErrorKind::Protocol),
        }
    }
}

/// POSIX-like classification of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    Failure,
    BadMessage,
    NotConnected,
    ConnectionLost,
    Unsupported,
    InvalidHandle,
    BadPath,
    AlreadyExists,
    WriteProtected,
    /// A status code outside the known range.
    Protocol,
}

impl ErrorKind {
    /// Converts this kind to a libc error code.
    pub fn to_errno(self) -> i32 {
        match self {
            ErrorKind::NotFound | ErrorKind::BadPath => libc::ENOENT,
            ErrorKind::PermissionDenied => libc::EACCES,
            ErrorKind::Failure => libc::EIO,
            ErrorKind::BadMessage => libc::EBADMSG,
            ErrorKind::NotConnected => libc::ENOTCONN,
            ErrorKind::ConnectionLost => libc::ESHUTDOWN,
            ErrorKind::Unsupported => libc::EOPNOTSUPP,
            ErrorKind::InvalidHandle => libc::EBADF,
            ErrorKind::AlreadyExists => libc::EEXIST,
            ErrorKind::WriteProtected => libc::EROFS,
            ErrorKind::Protocol => libc::EPROTO,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::Failure => "failure",
            ErrorKind::BadMessage => "malformed message",
            ErrorKind::NotConnected => "not connected",
            ErrorKind::ConnectionLost => "connection lost",
            ErrorKind::Unsupported => "operation unsupported",
            ErrorKind::InvalidHandle => "invalid handle",
            ErrorKind::BadPath => "bad path",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::WriteProtected => "write protected",
            ErrorKind::Protocol => "protocol error",
        };
        f.write_str(s)
    }
}

/// Payload of a `STATUS` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
    pub language: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            language: String::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, "")
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    pub fn is_eof(&self) -> bool {
        self.code == StatusCode::Eof
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.code.error_kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip_all_known() {
        for raw in 0..=12 {
            let code = StatusCode::from_u32(raw);
            assert!(!matches!(code, StatusCode::Other(_)), "{raw} should be known");
            assert_eq!(code.as_u32(), raw);
        }
    }

    #[test]
    fn test_unknown_code_is_protocol_error() {
        let code = StatusCode::from_u32(99);
        assert_eq!(code, StatusCode::Other(99));
        assert_eq!(code.as_u32(), 99);
        assert_eq!(code.error_kind(), Some(ErrorKind::Protocol));
        assert_eq!(ErrorKind::Protocol.to_errno(), libc::EPROTO);
    }

    #[test]
    fn test_ok_and_eof_are_not_errors() {
        assert_eq!(StatusCode::Ok.error_kind(), None);
        assert_eq!(StatusCode::Eof.error_kind(), None);
        assert!(Status::ok().is_ok());
    }

    #[test]
    fn test_every_error_code_maps_to_one_kind() {
        let expected = [
            (2, ErrorKind::NotFound, libc::ENOENT),
            (3, ErrorKind::PermissionDenied, libc::EACCES),
            (4, ErrorKind::Failure, libc::EIO),
            (5, ErrorKind::BadMessage, libc::EBADMSG),
            (6, ErrorKind::NotConnected, libc::ENOTCONN),
            (7, ErrorKind::ConnectionLost, libc::ESHUTDOWN),
            (8, ErrorKind::Unsupported, libc::EOPNOTSUPP),
            (9, ErrorKind::InvalidHandle, libc::EBADF),
            (10, ErrorKind::BadPath, libc::ENOENT),
            (11, ErrorKind::AlreadyExists, libc::EEXIST),
            (12, ErrorKind::WriteProtected, libc::EROFS),
        ];
        for (raw, kind, errno) in expected {
            let code = StatusCode::from_u32(raw);
            assert_eq!(code.error_kind(), Some(kind), "code {raw}");
            assert_eq!(kind.to_errno(), errno, "kind {kind}");
        }
    }
}
