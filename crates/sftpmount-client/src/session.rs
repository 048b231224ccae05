//! Per-mount protocol session.
//!
//! Holds the state that outlives any single connection: the negotiated
//! version, the request-id counter shared by every channel, and the local
//! inode counter.

use parking_lot::Mutex;
use sftpmount_proto::Extension;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Inode number of the mount root.
pub const ROOT_INO: u64 = 1;

#[derive(Debug)]
pub struct Session {
    version: OnceLock<u32>,
    extensions: Mutex<Vec<Extension>>,
    next_request_id: AtomicU32,
    next_ino: AtomicU64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            version: OnceLock::new(),
            extensions: Mutex::new(Vec::new()),
            next_request_id: AtomicU32::new(0),
            next_ino: AtomicU64::new(ROOT_INO + 1),
        }
    }

    /// Records the result of a handshake.
    ///
    /// The version is fixed by the first handshake; a later one (after a
    /// reconnect) that disagrees returns the version already in force and
    /// leaves the recorded extensions alone.
    pub fn record_handshake(&self, version: u32, extensions: Vec<Extension>) -> Result<(), u32> {
        let negotiated = *self.version.get_or_init(|| version);
        if negotiated != version {
            return Err(negotiated);
        }
        *self.extensions.lock() = extensions;
        Ok(())
    }

    /// The negotiated protocol version, once known.
    pub fn version(&self) -> Option<u32> {
        self.version.get().copied()
    }

    /// Extensions announced by the most recent handshake.
    pub fn extensions(&self) -> Vec<Extension> {
        self.extensions.lock().clone()
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.lock().iter().any(|(n, _)| n == name)
    }

    /// Next request id. Wraps at `u32::MAX`; callers skip ids still in use.
    pub fn next_request_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocates a fresh inode number. Never returns [`ROOT_INO`].
    pub fn next_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }
}
