//! Decoding errors.

use thiserror::Error;

/// Errors produced while decoding wire data.
///
/// [`DecodeError::Incomplete`] is not a protocol violation: it tells an
/// incremental reader that the buffer ends before the value does and more
/// bytes must be read before retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The buffer ends before the value is complete.
    #[error("incomplete message: {needed} more bytes required")]
    Incomplete {
        /// Minimum number of additional bytes needed.
        needed: usize,
    },

    /// The packet type byte is not one this codec knows.
    #[error("unknown packet type {0}")]
    UnknownType(u8),

    /// The bytes are complete but do not form a valid message.
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl DecodeError {
    /// Returns true if more input could make decoding succeed.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, DecodeError::Incomplete { .. })
    }

    /// Converts "need more data" into a hard error.
    ///
    /// Used once a whole frame is known to be present: a field running past
    /// the end of a complete frame means the sender lied about its length.
    #[must_use]
    pub fn into_malformed(self, what: &str) -> Self {
        match self {
            DecodeError::Incomplete { needed } => {
                DecodeError::Malformed(format!("{what} truncated ({needed} bytes short)"))
            }
            other => other,
        }
    }
}

/// Result type for decoding.
pub type DecodeResult<T> = Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_malformed_converts_incomplete() {
        let e = DecodeError::Incomplete { needed: 3 }.into_malformed("status");
        assert!(matches!(e, DecodeError::Malformed(ref m) if m.contains("status")));
        assert!(!e.is_incomplete());
    }

    #[test]
    fn test_into_malformed_keeps_other_errors() {
        let e = DecodeError::UnknownType(250).into_malformed("packet");
        assert_eq!(e, DecodeError::UnknownType(250));
    }
}
