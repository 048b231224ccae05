//! Attribute and listing cache maintenance.
//!
//! These functions mutate a locked [`NodeTable`] and never touch the
//! network. Fetching happens in the filesystem, which then hands the results
//! here. Node identity is preserved across refreshes: a name that is still
//! listed keeps the inode it had, and a name that reappears after being
//! dropped from a listing picks up its orphaned node again.

use crate::error::FsResult;
use crate::node::{DirectoryEntry, Listing, NodeTable};
use crate::notifier::Invalidation;
use sftpmount_proto::{FileAttributes, NameEntry};
use std::collections::{HashMap, HashSet};
use tokio::time::Instant;
use tracing::debug;

/// True if both records report an mtime and they differ.
fn mtime_changed(old: &FileAttributes, new: &FileAttributes) -> bool {
    matches!((old.mtime(), new.mtime()), (Some(a), Some(b)) if a != b)
}

/// Replaces a node's attributes with a fresh record.
///
/// Returns an invalidation when the modification time moved.
pub(crate) fn store_attrs(
    table: &mut NodeTable,
    ino: u64,
    attrs: FileAttributes,
    now: Instant,
) -> FsResult<Option<Invalidation>> {
    let node = table.node_mut(ino)?;
    let changed = mtime_changed(&node.attrs, &attrs);
    node.attrs = attrs;
    node.attrs_refreshed = Some(now);
    if changed {
        debug!(ino, "Modification time changed, dropping cached data");
        return Ok(Some(Invalidation::Data(ino)));
    }
    Ok(None)
}

/// Installs a freshly fetched listing of `dir`, reconciling by name.
///
/// `fetched` must not contain `.` or `..`. Names that left the listing keep
/// their nodes (which become orphans) and are reported for invalidation.
pub(crate) fn reconcile(
    table: &mut NodeTable,
    dir: u64,
    fetched: Vec<NameEntry>,
    now: Instant,
) -> FsResult<Vec<Invalidation>> {
    let previous = table.node_mut(dir)?.listing.take();
    let mut inherited: HashMap<String, Option<u64>> = previous
        .map(|l| {
            l.entries
                .into_iter()
                .filter(|e| !e.removed)
                .map(|e| (e.name, e.node))
                .collect()
        })
        .unwrap_or_default();
    let orphans = table.children_by_name(dir);

    let mut events = Vec::new();
    let mut seen = HashSet::with_capacity(fetched.len());
    let mut entries = Vec::with_capacity(fetched.len());
    for entry in fetched {
        if !seen.insert(entry.filename.clone()) {
            continue;
        }
        let name = entry.filename;
        let live = inherited
            .remove(&name)
            .flatten()
            .filter(|&ino| table.is_live_child(dir, ino, &name))
            .or_else(|| orphans.get(&name).copied());
        if let Some(ino) = live {
            events.extend(store_attrs(table, ino, entry.attrs.clone(), now)?);
        }
        entries.push(DirectoryEntry::new(name, entry.attrs, now, live));
    }

    for (name, node) in inherited {
        if node.is_some() {
            events.push(Invalidation::Entry(dir, name));
        }
    }
    debug!(dir, entries = entries.len(), "Listing reconciled");
    table.node_mut(dir)?.listing = Some(Listing {
        entries,
        refreshed: Some(now),
    });
    Ok(events)
}

/// Gives the listing row `name` of `parent` a live node, allocating one with
/// `next_ino` if needed. Returns `None` if there is no such row.
pub(crate) fn instantiate_entry(
    table: &mut NodeTable,
    parent: u64,
    name: &str,
    next_ino: impl FnOnce() -> u64,
) -> FsResult<Option<u64>> {
    let Some(entry) = table
        .node(parent)?
        .listing
        .as_ref()
        .and_then(|l| l.find(name))
        .cloned()
    else {
        return Ok(None);
    };
    let ino = match entry.node.filter(|&c| table.is_live_child(parent, c, name)) {
        Some(ino) => ino,
        None => {
            let ino = match table.find_child(parent, name) {
                Some(orphan) => orphan,
                None => table.allocate(
                    next_ino(),
                    parent,
                    name,
                    entry.attrs.clone(),
                    Some(entry.refreshed),
                )?,
            };
            if let Some(row) = table
                .node_mut(parent)?
                .listing
                .as_mut()
                .and_then(|l| l.find_mut(name))
            {
                row.node = Some(ino);
            }
            ino
        }
    };
    Ok(Some(ino))
}

/// Records a child that was just created or looked up directly.
///
/// Reuses a live node of the same name, otherwise allocates one, and keeps
/// the parent's listing (if cached) in step.
pub(crate) fn install_child(
    table: &mut NodeTable,
    parent: u64,
    name: &str,
    attrs: FileAttributes,
    now: Instant,
    next_ino: impl FnOnce() -> u64,
) -> FsResult<(u64, Option<Invalidation>)> {
    let listed = table
        .node(parent)?
        .listing
        .as_ref()
        .and_then(|l| l.find(name))
        .and_then(|e| e.node)
        .filter(|&c| table.is_live_child(parent, c, name));
    let (ino, event) = match listed.or_else(|| table.find_child(parent, name)) {
        Some(ino) => (ino, store_attrs(table, ino, attrs.clone(), now)?),
        None => (
            table.allocate(next_ino(), parent, name, attrs.clone(), Some(now))?,
            None,
        ),
    };
    if let Some(listing) = table.node_mut(parent)?.listing.as_mut() {
        match listing.find_mut(name) {
            Some(row) => {
                row.attrs = attrs;
                row.refreshed = now;
                row.node = Some(ino);
            }
            None => listing
                .entries
                .push(DirectoryEntry::new(name, attrs, now, Some(ino))),
        }
    }
    Ok((ino, event))
}

/// Marks every attribute record and listing stale.
pub(crate) fn invalidate_all(table: &mut NodeTable) {
    for node in table.iter_mut() {
        node.attrs_refreshed = None;
        if let Some(listing) = node.listing.as_mut() {
            listing.refreshed = None;
        }
    }
}
