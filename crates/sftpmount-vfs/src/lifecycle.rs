//! Node allocation and reclamation.
//!
//! Every live node keeps its parent alive: the parent's `child_count` counts
//! live children, and a directory whose count is non-zero is never freed.
//! When the host drops its last reference to a node that still has
//! children, the node is marked reclaim-pending and freed later, when its
//! last child goes. Freeing a node can therefore cascade up the tree.

use crate::error::FsResult;
use crate::node::{Node, NodeTable};
use sftpmount_client::{ROOT_INO, RemoteHandle};
use sftpmount_proto::FileAttributes;
use tokio::time::Instant;
use tracing::{debug, trace};

/// What a reclamation freed. Handles must be closed by the caller, outside
/// the table lock.
#[derive(Debug, Default)]
#[must_use]
pub struct Reclaimed {
    pub freed: Vec<u64>,
    pub handles: Vec<RemoteHandle>,
}

impl Reclaimed {
    fn absorb(&mut self, other: Reclaimed) {
        self.freed.extend(other.freed);
        self.handles.extend(other.handles);
    }
}

impl NodeTable {
    /// Instantiates a child of `parent`. The caller links it into the
    /// parent's listing, if there is one.
    pub fn allocate(
        &mut self,
        ino: u64,
        parent: u64,
        name: &str,
        attrs: FileAttributes,
        refreshed: Option<Instant>,
    ) -> FsResult<u64> {
        self.node_mut(parent)?.child_count += 1;
        self.insert(Node::new(ino, Some(parent), name, attrs, refreshed));
        trace!(ino, parent, name, "Allocated node");
        Ok(ino)
    }

    /// The host no longer references `ino`.
    ///
    /// Exported nodes and the root are kept. A node with live children is
    /// marked pending and freed with its last child.
    pub fn reclaim(&mut self, ino: u64) -> Reclaimed {
        let mut out = Reclaimed::default();
        if ino == ROOT_INO {
            return out;
        }
        let Some(node) = self.get_mut(ino) else {
            return out;
        };
        if node.exported {
            debug!(ino, "Reclaim deferred: node is exported");
            return out;
        }
        if node.child_count > 0 {
            debug!(ino, children = node.child_count, "Reclaim deferred until children go");
            node.reclaim_pending = true;
            return out;
        }
        self.free_cascade(ino, &mut out);
        out
    }

    /// Frees `ino`, then each ancestor that was only waiting for it.
    fn free_cascade(&mut self, mut ino: u64, out: &mut Reclaimed) {
        loop {
            let Some(mut node) = self.remove(ino) else {
                return;
            };
            out.freed.push(ino);
            out.handles.extend(node.files.take_all());
            trace!(ino, "Freed node");

            let Some(parent_ino) = node.parent else {
                return;
            };
            let Some(parent) = self.get_mut(parent_ino) else {
                return;
            };
            parent.child_count = parent.child_count.saturating_sub(1);
            if let Some(listing) = parent.listing.as_mut() {
                listing.unlink_node(ino);
            }
            let cascade = parent_ino != ROOT_INO
                && parent.reclaim_pending
                && parent.child_count == 0
                && !parent.exported;
            if !cascade {
                return;
            }
            ino = parent_ino;
        }
    }

    /// Moves `ino` under `new_parent` as `new_name`.
    ///
    /// If the old parent was waiting for its last child to go, it is freed.
    pub fn reparent(&mut self, ino: u64, new_parent: u64, new_name: &str) -> FsResult<Reclaimed> {
        self.node(new_parent)?;
        let node = self.node_mut(ino)?;
        let old_parent = node.parent;
        node.name = new_name.to_string();
        node.parent = Some(new_parent);

        let mut out = Reclaimed::default();
        let Some(old_parent) = old_parent.filter(|&p| p != new_parent) else {
            return Ok(out);
        };
        self.node_mut(new_parent)?.child_count += 1;
        if let Some(old) = self.get_mut(old_parent) {
            old.child_count = old.child_count.saturating_sub(1);
            if let Some(listing) = old.listing.as_mut() {
                listing.unlink_node(ino);
            }
            if old_parent != ROOT_INO && old.reclaim_pending && old.child_count == 0 && !old.exported {
                let mut freed = Reclaimed::default();
                self.free_cascade(old_parent, &mut freed);
                out.absorb(freed);
            }
        }
        Ok(out)
    }

    /// Marks the live child `name` of `parent` as removed remotely and drops
    /// its listing row. Returns the node, if one was live.
    pub fn detach(&mut self, parent: u64, name: &str) -> Option<u64> {
        let listed = self
            .get_mut(parent)?
            .listing
            .as_mut()
            .and_then(|l| l.remove(name))
            .and_then(|e| e.node);
        let ino = listed
            .filter(|&c| self.is_live_child(parent, c, name))
            .or_else(|| self.find_child(parent, name))?;
        let node = self.get_mut(ino)?;
        node.unlinked = true;
        node.listing = None;
        debug!(ino, parent, name, "Detached node");
        Some(ino)
    }
}
