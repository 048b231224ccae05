//! Invalidation callbacks into the host.
//!
//! When the cache learns that something changed behind the host's back
//! (a file's modification time moved, a name vanished from a listing) it
//! tells the host through a [`Notifier`] so that kernel-side caches can be
//! dropped. Calls are made after the node table lock is released.

/// Receives cache invalidations. Both methods default to doing nothing.
pub trait Notifier: Send + Sync {
    /// Buffered data for `ino` is out of date.
    fn invalidate_data(&self, ino: u64) {
        let _ = ino;
    }

    /// The name `name` in directory `parent` no longer resolves as cached.
    fn invalidate_entry(&self, parent: u64, name: &str) {
        let _ = (parent, name);
    }
}

/// A notifier that ignores every invalidation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {}

/// A pending notification, collected under the lock and sent after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Invalidation {
    Data(u64),
    Entry(u64, String),
}

pub(crate) fn dispatch(notifier: &dyn Notifier, events: Vec<Invalidation>) {
    for event in events {
        match event {
            Invalidation::Data(ino) => notifier.invalidate_data(ino),
            Invalidation::Entry(parent, name) => notifier.invalidate_entry(parent, &name),
        }
    }
}
