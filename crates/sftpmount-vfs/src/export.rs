//! Persistent handles for hosts that identify files by an opaque token
//! (NFS-style file handles) rather than by a lookup count.

use crate::error::{FsError, FsResult};
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque token naming a node of one particular mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExportHandle {
    ino: u64,
    mount_id: u64,
}

impl ExportHandle {
    /// Encoded length in bytes.
    pub const LEN: usize = 16;

    pub(crate) fn new(ino: u64, mount_id: u64) -> Self {
        Self { ino, mount_id }
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub(crate) fn mount_id(&self) -> u64 {
        self.mount_id
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..8].copy_from_slice(&self.mount_id.to_be_bytes());
        out[8..].copy_from_slice(&self.ino.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> FsResult<Self> {
        let bytes: &[u8; Self::LEN] = bytes.try_into().map_err(|_| FsError::StaleExport)?;
        let (mount_id, ino) = bytes.split_at(8);
        let word = |b: &[u8]| b.try_into().map(u64::from_be_bytes).map_err(|_| FsError::StaleExport);
        Ok(Self {
            mount_id: word(mount_id)?,
            ino: word(ino)?,
        })
    }
}

/// Identifier distinguishing this mount from earlier ones.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn new_mount_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_roundtrip() {
        let handle = ExportHandle::new(42, 0xdead_beef);
        let decoded = ExportHandle::from_bytes(&handle.to_bytes()).unwrap();
        assert_eq!(decoded, handle);
        assert_eq!(decoded.ino(), 42);
    }

    #[test]
    fn test_wrong_length_is_stale() {
        assert!(matches!(
            ExportHandle::from_bytes(&[0u8; 15]),
            Err(FsError::StaleExport)
        ));
    }
}
