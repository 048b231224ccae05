//! The mounted filesystem and its operation handlers.
//!
//! [`SftpFs`] is host-agnostic: a FUSE or NFS adapter (or the CLI) calls its
//! async handlers directly. Every handler follows the same discipline: read
//! what it needs from the node table, release the lock, await the server,
//! then re-resolve by inode and name before applying the result. Nothing
//! found before an await is trusted after it.

use crate::cache::{install_child, instantiate_entry, invalidate_all, reconcile, store_attrs};
use crate::config::MountConfig;
use crate::error::{FsError, FsResult};
use crate::export::{ExportHandle, new_mount_id};
use crate::lifecycle::Reclaimed;
use crate::node::{
    Access, DirEntry, Listing, Node, NodeAttr, NodeTable, join_path, synthesized_attrs,
    validate_name,
};
use crate::notifier::{Invalidation, NoopNotifier, Notifier, dispatch};
use crate::stats::{CacheCounters, FsStatistics};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use sftpmount_client::{Client, ClientResult, Connector, ROOT_INO, RemoteHandle};
use sftpmount_proto::{FileAttributes, FileKind, NameEntry};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// A remote directory tree mounted over SFTP.
pub struct SftpFs {
    pub(crate) client: Client,
    pub(crate) config: MountConfig,
    pub(crate) nodes: Mutex<NodeTable>,
    notifier: Arc<dyn Notifier>,
    cache_stats: CacheCounters,
    mount_id: u64,
}

impl fmt::Debug for SftpFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpFs")
            .field("root", &self.nodes.lock().root_path())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SftpFs {
    /// Connects, resolves the remote root and builds the root node.
    pub async fn mount(connector: Arc<dyn Connector>, config: MountConfig) -> FsResult<Self> {
        Self::mount_with_notifier(connector, config, Arc::new(NoopNotifier)).await
    }

    pub async fn mount_with_notifier(
        connector: Arc<dyn Connector>,
        config: MountConfig,
        notifier: Arc<dyn Notifier>,
    ) -> FsResult<Self> {
        config.validate()?;
        let client = Client::connect(connector, config.client_config()).await?;
        let root_path = client.realpath(&config.remote_root).await?;
        let attrs = client.lstat(&root_path).await?;
        if !attrs.is_dir() {
            return Err(FsError::NotADirectory(ROOT_INO));
        }
        info!(root = %root_path, channels = ?config.channels, "Mounted remote directory");
        Ok(Self {
            nodes: Mutex::new(NodeTable::new(root_path, attrs, Instant::now())),
            client,
            config,
            notifier,
            cache_stats: CacheCounters::default(),
            mount_id: new_mount_id(),
        })
    }

    pub fn root(&self) -> u64 {
        ROOT_INO
    }

    /// Resolved remote path of the mount root.
    pub fn root_path(&self) -> String {
        self.nodes.lock().root_path().to_string()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// True once the client has given up reconnecting. Every operation fails
    /// from then on, so the host should unmount.
    pub fn is_dead(&self) -> bool {
        self.client.is_dead()
    }

    /// Resolves when the mount becomes unusable.
    pub async fn wait_dead(&self) {
        self.client.dead().await;
    }

    /// Remote path of a live node.
    pub fn path_of(&self, ino: u64) -> FsResult<String> {
        self.nodes.lock().path_of(ino)
    }

    pub(crate) fn next_ino(&self) -> u64 {
        self.client.session().next_ino()
    }

    pub(crate) fn notify(&self, events: Vec<Invalidation>) {
        if !events.is_empty() {
            dispatch(self.notifier.as_ref(), events);
        }
    }

    /// Closes handles released by the node table. Failures are logged only.
    pub(crate) async fn close_handles(&self, handles: Vec<RemoteHandle>) {
        for handle in handles {
            if let Err(e) = self.client.close(handle).await {
                warn!(error = %e, "Failed to close remote handle");
            }
        }
    }

    async fn finish_reclaim(&self, reclaimed: Reclaimed) {
        if !reclaimed.freed.is_empty() {
            debug!(freed = ?reclaimed.freed, "Reclaimed nodes");
        }
        self.close_handles(reclaimed.handles).await;
    }

    /// A handle of `node` usable right now, preferring the write handle.
    pub(crate) fn current_open_handle(&self, node: &Node) -> Option<RemoteHandle> {
        [Access::Write, Access::Read]
            .into_iter()
            .filter_map(|access| node.files.slot(access))
            .map(|shared| &shared.handle)
            .find(|handle| self.client.is_current(handle))
            .cloned()
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Returns a node's attributes, refreshing them once the TTL has passed.
    pub async fn getattr(&self, ino: u64) -> FsResult<NodeAttr> {
        trace!(inode = ino, "getattr");
        let (path, handle) = {
            let table = self.nodes.lock();
            let node = table.node(ino)?;
            if node.attrs_fresh(Instant::now(), self.config.cache_ttl) {
                self.cache_stats.record_hit();
                return Ok(node.to_attr());
            }
            // An unlinked file is only reachable through its open handle.
            let handle = if node.unlinked {
                self.current_open_handle(node)
            } else {
                None
            };
            (table.path_of(ino)?, handle)
        };
        self.cache_stats.record_miss();
        debug!(inode = ino, path = %path, "Attribute cache miss");
        let attrs = match handle {
            Some(handle) => self.client.fstat(&handle).await?,
            None => self.client.lstat(&path).await?,
        };
        self.apply_attrs(ino, attrs)
    }

    fn apply_attrs(&self, ino: u64, attrs: FileAttributes) -> FsResult<NodeAttr> {
        let (attr, event) = {
            let mut table = self.nodes.lock();
            let event = store_attrs(&mut table, ino, attrs, Instant::now())?;
            (table.node(ino)?.to_attr(), event)
        };
        self.notify(event.into_iter().collect());
        Ok(attr)
    }

    /// Sends SETSTAT and merges the change into the cache.
    ///
    /// Only the fields present in `changes` are sent. A size change drops
    /// buffered data for the node.
    pub async fn setattr(&self, ino: u64, changes: FileAttributes) -> FsResult<NodeAttr> {
        trace!(inode = ino, "setattr");
        let (path, handle) = {
            let table = self.nodes.lock();
            let node = table.node(ino)?;
            let handle = if node.unlinked {
                self.current_open_handle(node)
            } else {
                None
            };
            (table.path_of(ino)?, handle)
        };
        match &handle {
            Some(handle) => self.client.fsetstat(handle, changes.clone()).await?,
            None => self.client.setstat(&path, changes.clone()).await?,
        }
        let attr = {
            let mut table = self.nodes.lock();
            let node = table.node_mut(ino)?;
            node.attrs.merge_from(&changes);
            node.to_attr()
        };
        if changes.size.is_some() {
            self.notify(vec![Invalidation::Data(ino)]);
        }
        Ok(attr)
    }

    // ========================================================================
    // Listings and lookup
    // ========================================================================

    /// Refetches the listing of `dir` unless it is still fresh.
    pub(crate) async fn refresh_listing(&self, dir: u64) -> FsResult<()> {
        let (path, known) = {
            let table = self.nodes.lock();
            let node = table.node(dir)?;
            if !node.is_dir() {
                return Err(FsError::NotADirectory(dir));
            }
            if node
                .listing
                .as_ref()
                .is_some_and(|l| l.is_fresh(Instant::now(), self.config.cache_ttl))
            {
                self.cache_stats.record_hit();
                return Ok(());
            }
            let known: HashSet<String> = node
                .listing
                .iter()
                .flat_map(|l| l.live().map(|e| e.name.clone()))
                .collect();
            (table.path_of(dir)?, known)
        };
        self.cache_stats.record_miss();
        debug!(inode = dir, path = %path, "Listing cache miss");
        let fetched = self.fetch_listing(&path, &known).await?;
        let events = {
            let mut table = self.nodes.lock();
            reconcile(&mut table, dir, fetched, Instant::now())?
        };
        self.notify(events);
        Ok(())
    }

    async fn fetch_listing(&self, path: &str, known: &HashSet<String>) -> FsResult<Vec<NameEntry>> {
        let handle = self.client.opendir(path).await?;
        let result = if self.config.prefetch_attrs {
            self.read_listing_prefetching(&handle, path, known).await
        } else {
            read_listing(&self.client, &handle, None).await
        };
        if let Err(e) = self.client.close(handle).await {
            warn!(path, error = %e, "Failed to close directory handle");
        }
        Ok(result?)
    }

    /// Reads a listing while stat-ing every new name as soon as it arrives.
    async fn read_listing_prefetching(
        &self,
        handle: &RemoteHandle,
        path: &str,
        known: &HashSet<String>,
    ) -> ClientResult<Vec<NameEntry>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let listing = read_listing(&self.client, handle, Some((known, tx)));
        let warm = async {
            let mut inflight = FuturesUnordered::new();
            let mut warmed = HashMap::new();
            let mut open = true;
            while open || !inflight.is_empty() {
                tokio::select! {
                    name = rx.recv(), if open => match name {
                        Some(name) => {
                            let child = join_path(path, &name);
                            let client = &self.client;
                            inflight.push(async move {
                                let result = client.lstat(&child).await;
                                (name, result)
                            });
                        }
                        None => open = false,
                    },
                    Some((name, result)) = inflight.next(), if !inflight.is_empty() => match result {
                        Ok(attrs) => {
                            warmed.insert(name, attrs);
                        }
                        Err(e) => debug!(name = %name, error = %e, "Attribute prefetch failed"),
                    },
                }
            }
            warmed
        };
        let (listing, mut warmed) = tokio::join!(listing, warm);
        let mut entries = listing?;
        debug!(path, prefetched = warmed.len(), "Attribute prefetch complete");
        for entry in &mut entries {
            if let Some(attrs) = warmed.remove(&entry.filename) {
                entry.attrs = attrs;
            }
        }
        Ok(entries)
    }

    /// Resolves `name` in directory `parent`.
    ///
    /// Answered from the parent's listing while it is fresh, including
    /// negative answers. If the parent cannot be listed, falls back to an
    /// LSTAT of the child path.
    pub async fn lookup(&self, parent: u64, name: &str) -> FsResult<NodeAttr> {
        trace!(parent, name, "lookup");
        match name {
            "." => return self.getattr(parent).await,
            ".." => {
                let up = self.nodes.lock().node(parent)?.parent.unwrap_or(ROOT_INO);
                return self.getattr(up).await;
            }
            _ => validate_name(name)?,
        }

        match self.refresh_listing(parent).await {
            Ok(()) => {}
            Err(FsError::Client(e)) if e.is_permission_denied() => {
                debug!(parent, name, "Listing denied, looking up directly");
                return self.lookup_direct(parent, name).await;
            }
            Err(e) => return Err(e),
        }

        let found = {
            let mut table = self.nodes.lock();
            match instantiate_entry(&mut table, parent, name, || self.next_ino())? {
                Some(ino) => {
                    let node = table.node_mut(ino)?;
                    node.reclaim_pending = false;
                    Some(node.to_attr())
                }
                None if table.node(parent)?.listing.is_some() => {
                    debug!(parent, name, "Negative lookup answered from listing");
                    return Err(FsError::NotFound(name.to_string()));
                }
                None => None,
            }
        };
        match found {
            Some(attr) => Ok(attr),
            None => self.lookup_direct(parent, name).await,
        }
    }

    async fn lookup_direct(&self, parent: u64, name: &str) -> FsResult<NodeAttr> {
        let path = self.nodes.lock().child_path(parent, name)?;
        self.cache_stats.record_miss();
        let attrs = self.client.lstat(&path).await?;
        self.install(parent, name, attrs)
    }

    /// Records a child just created or stat-ed and returns its attributes.
    pub(crate) fn install(&self, parent: u64, name: &str, attrs: FileAttributes) -> FsResult<NodeAttr> {
        let (attr, event) = {
            let mut table = self.nodes.lock();
            let (ino, event) =
                install_child(&mut table, parent, name, attrs, Instant::now(), || self.next_ino())?;
            let node = table.node_mut(ino)?;
            node.reclaim_pending = false;
            (node.to_attr(), event)
        };
        self.notify(event.into_iter().collect());
        Ok(attr)
    }

    /// Lists `dir` from `cursor` on. Cursor 0 refreshes a stale listing.
    ///
    /// Only real entries are returned; `.` and `..` are left to the host.
    pub async fn readdir(&self, dir: u64, cursor: u64) -> FsResult<Vec<DirEntry>> {
        trace!(inode = dir, cursor, "readdir");
        let needs_refresh = {
            let table = self.nodes.lock();
            let node = table.node(dir)?;
            if !node.is_dir() {
                return Err(FsError::NotADirectory(dir));
            }
            cursor == 0 || node.listing.is_none()
        };
        if needs_refresh {
            self.refresh_listing(dir).await?;
        }

        let table = self.nodes.lock();
        let Some(listing) = table.node(dir)?.listing.as_ref() else {
            return Ok(Vec::new());
        };
        let skip = usize::try_from(cursor).unwrap_or(usize::MAX);
        Ok(listing
            .entries
            .iter()
            .enumerate()
            .skip(skip)
            .filter(|(_, entry)| !entry.removed)
            .map(|(index, entry)| DirEntry {
                name: entry.name.clone(),
                kind: entry.attrs.kind().unwrap_or(FileKind::Regular),
                ino: entry.node,
                attrs: entry.attrs.clone(),
                next_cursor: index as u64 + 1,
            })
            .collect())
    }

    // ========================================================================
    // Namespace operations
    // ========================================================================

    /// True if a fresh listing of `parent` contains `name`.
    fn listed_fresh(&self, parent: u64, name: &str) -> FsResult<bool> {
        let table = self.nodes.lock();
        let listed = table.node(parent)?.listing.as_ref().is_some_and(|l| {
            l.is_fresh(Instant::now(), self.config.cache_ttl) && l.find(name).is_some()
        });
        Ok(listed)
    }

    pub async fn mkdir(&self, parent: u64, name: &str, mode: u32) -> FsResult<NodeAttr> {
        trace!(parent, name, mode, "mkdir");
        validate_name(name)?;
        if self.listed_fresh(parent, name)? {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        let path = self.nodes.lock().child_path(parent, name)?;
        self.client
            .mkdir(&path, FileAttributes::with_permissions(mode & 0o7777))
            .await?;
        let attrs = self.created_attrs(&path, FileKind::Directory, mode).await;
        let attr = self.install(parent, name, attrs)?;
        // A directory we just created is known to be empty.
        if let Some(node) = self.nodes.lock().get_mut(attr.ino)
            && node.listing.is_none()
        {
            node.listing = Some(Listing::empty(Instant::now()));
        }
        Ok(attr)
    }

    /// Creates a symbolic link `name` in `parent` pointing at `target`.
    pub async fn symlink(&self, parent: u64, name: &str, target: &str) -> FsResult<NodeAttr> {
        trace!(parent, name, target, "symlink");
        validate_name(name)?;
        if self.listed_fresh(parent, name)? {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        let path = self.nodes.lock().child_path(parent, name)?;
        self.client.symlink(target, &path).await?;
        let attrs = self.created_attrs(&path, FileKind::Symlink, 0o777).await;
        self.install(parent, name, attrs)
    }

    /// Attributes of something just created, synthesized if LSTAT fails.
    async fn created_attrs(&self, path: &str, kind: FileKind, mode: u32) -> FileAttributes {
        match self.client.lstat(path).await {
            Ok(attrs) => attrs,
            Err(e) => {
                debug!(path, error = %e, "Stat after create failed");
                synthesized_attrs(kind, mode)
            }
        }
    }

    pub async fn readlink(&self, ino: u64) -> FsResult<String> {
        trace!(inode = ino, "readlink");
        let path = self.nodes.lock().path_of(ino)?;
        Ok(self.client.readlink(&path).await?)
    }

    /// Removes a non-directory.
    pub async fn remove(&self, parent: u64, name: &str) -> FsResult<()> {
        trace!(parent, name, "remove");
        validate_name(name)?;
        let path = self.nodes.lock().child_path(parent, name)?;
        self.client.remove(&path).await?;
        self.nodes.lock().detach(parent, name);
        Ok(())
    }

    pub async fn rmdir(&self, parent: u64, name: &str) -> FsResult<()> {
        trace!(parent, name, "rmdir");
        validate_name(name)?;
        let path = {
            let table = self.nodes.lock();
            let now = Instant::now();
            let child = cached_child(&table, parent, name);
            let non_empty = child.and_then(|ino| table.get(ino)).is_some_and(|node| {
                node.listing
                    .as_ref()
                    .is_some_and(|l| l.is_fresh(now, self.config.cache_ttl) && !l.is_empty())
            });
            if non_empty {
                return Err(FsError::NotEmpty(name.to_string()));
            }
            table.child_path(parent, name)?
        };
        self.client.rmdir(&path).await?;
        self.nodes.lock().detach(parent, name);
        Ok(())
    }

    /// Renames `parent/name` to `new_parent/new_name`.
    ///
    /// SFTP version 3 RENAME fails if the target exists, so an existing
    /// target is removed first. If that removal fails the rename is never
    /// sent. The two steps are not atomic.
    pub async fn rename(
        &self,
        parent: u64,
        name: &str,
        new_parent: u64,
        new_name: &str,
    ) -> FsResult<()> {
        trace!(parent, name, new_parent, new_name, "rename");
        validate_name(name)?;
        validate_name(new_name)?;
        if parent == new_parent && name == new_name {
            return Ok(());
        }
        let (from, to) = {
            let table = self.nodes.lock();
            (table.child_path(parent, name)?, table.child_path(new_parent, new_name)?)
        };

        if let Some(kind) = self.target_kind(new_parent, new_name, &to).await? {
            debug!(target = %to, ?kind, "Removing rename target first");
            let removed = if kind == FileKind::Directory {
                self.client.rmdir(&to).await
            } else {
                self.client.remove(&to).await
            };
            if let Err(e) = removed {
                debug!(target = %to, error = %e, "Target removal failed, rename not sent");
                return Err(e.into());
            }
            self.nodes.lock().detach(new_parent, new_name);
        }

        self.client.rename(&from, &to).await?;

        let reclaimed = {
            let mut table = self.nodes.lock();
            move_entry(&mut table, parent, name, new_parent, new_name, Instant::now())?
        };
        self.finish_reclaim(reclaimed).await;
        Ok(())
    }

    /// Kind of whatever currently occupies `new_parent/new_name`, if anything.
    async fn target_kind(
        &self,
        new_parent: u64,
        new_name: &str,
        path: &str,
    ) -> FsResult<Option<FileKind>> {
        match self.refresh_listing(new_parent).await {
            Ok(()) => {
                let table = self.nodes.lock();
                let listed = table
                    .node(new_parent)?
                    .listing
                    .as_ref()
                    .and_then(|l| l.find(new_name))
                    .map(|e| e.attrs.kind().unwrap_or(FileKind::Regular));
                Ok(listed)
            }
            Err(FsError::Client(e)) if e.is_permission_denied() => {
                match self.client.lstat(path).await {
                    Ok(attrs) => Ok(Some(attrs.kind().unwrap_or(FileKind::Regular))),
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// The host holds no more references to `ino`.
    pub async fn reclaim(&self, ino: u64) {
        trace!(inode = ino, "reclaim");
        let reclaimed = self.nodes.lock().reclaim(ino);
        self.finish_reclaim(reclaimed).await;
    }

    /// Marks every cached attribute and listing stale.
    pub fn invalidate_all(&self) {
        let mut table = self.nodes.lock();
        invalidate_all(&mut table);
        debug!(nodes = table.len(), "Invalidated all caches");
    }

    /// Returns a persistent handle for `ino`. The node is never reclaimed
    /// afterwards.
    pub fn node_to_handle(&self, ino: u64) -> FsResult<ExportHandle> {
        let mut table = self.nodes.lock();
        table.node_mut(ino)?.exported = true;
        Ok(ExportHandle::new(ino, self.mount_id))
    }

    /// Resolves a handle from [`node_to_handle`](Self::node_to_handle).
    pub fn handle_to_node(&self, handle: &ExportHandle) -> FsResult<u64> {
        if handle.mount_id() != self.mount_id {
            return Err(FsError::StaleExport);
        }
        let table = self.nodes.lock();
        match table.get(handle.ino()) {
            Some(node) if !node.unlinked => Ok(node.ino),
            _ => Err(FsError::StaleExport),
        }
    }

    pub fn statistics(&self) -> FsStatistics {
        let mut stats = {
            let table = self.nodes.lock();
            FsStatistics {
                nodes: table.len(),
                reclaim_pending: table.iter().filter(|n| n.reclaim_pending).count(),
                exported: table.iter().filter(|n| n.exported).count(),
                open_handles: table.iter().map(Node::open_handles).sum(),
                ..FsStatistics::default()
            }
        };
        let client = self.client.stats();
        stats.outstanding = client.outstanding();
        stats.reconnects = client.reconnects();
        stats.cache_hits = self.cache_stats.hits();
        stats.cache_misses = self.cache_stats.misses();
        stats
    }

    /// Closes every open remote handle.
    ///
    /// On a dead mount the handles are dropped without closing.
    pub async fn unmount(&self) {
        let handles: Vec<RemoteHandle> = {
            let mut table = self.nodes.lock();
            table.iter_mut().flat_map(|n| n.files.take_all()).collect()
        };
        let count = handles.len();
        if self.is_dead() {
            warn!(dropped = count, "Unmounted after losing the server");
            return;
        }
        self.close_handles(handles).await;
        info!(closed = count, "Unmounted");
    }
}

/// Reads every batch of an open directory, skipping `.` and `..`.
///
/// With `prefetch`, names not in the known set are also sent down the channel.
async fn read_listing(
    client: &Client,
    handle: &RemoteHandle,
    prefetch: Option<(&HashSet<String>, mpsc::UnboundedSender<String>)>,
) -> ClientResult<Vec<NameEntry>> {
    let mut entries = Vec::new();
    while let Some(batch) = client.readdir(handle).await? {
        for entry in batch {
            if entry.filename == "." || entry.filename == ".." {
                continue;
            }
            if let Some((known, tx)) = &prefetch
                && !known.contains(&entry.filename)
            {
                let _ = tx.send(entry.filename.clone());
            }
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// The live node for `name` in `parent`, listed or orphaned.
fn cached_child(table: &NodeTable, parent: u64, name: &str) -> Option<u64> {
    table
        .get(parent)?
        .listing
        .as_ref()
        .and_then(|l| l.find(name))
        .and_then(|e| e.node)
        .filter(|&ino| table.is_live_child(parent, ino, name))
        .or_else(|| table.find_child(parent, name))
}

/// Applies a completed remote rename to the node table.
fn move_entry(
    table: &mut NodeTable,
    parent: u64,
    name: &str,
    new_parent: u64,
    new_name: &str,
    now: Instant,
) -> FsResult<Reclaimed> {
    let row = table
        .node_mut(parent)?
        .listing
        .as_mut()
        .and_then(|l| l.remove(name));
    let ino = row
        .as_ref()
        .and_then(|e| e.node)
        .filter(|&c| table.is_live_child(parent, c, name))
        .or_else(|| table.find_child(parent, name));
    let attrs = row
        .map(|e| e.attrs)
        .or_else(|| ino.and_then(|i| table.get(i)).map(|n| n.attrs.clone()));

    // Whatever the cache still holds under the new name is gone remotely.
    table.detach(new_parent, new_name);

    if let Some(attrs) = attrs
        && let Some(listing) = table.node_mut(new_parent)?.listing.as_mut()
    {
        listing
            .entries
            .push(crate::node::DirectoryEntry::new(new_name, attrs, now, ino));
    }
    match ino {
        Some(ino) => table.reparent(ino, new_parent, new_name),
        None => Ok(Reclaimed::default()),
    }
}
