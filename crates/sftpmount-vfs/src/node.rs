//! Nodes, directory entries and the node arena.
//!
//! A [`Node`] is the in-memory representation of a remote object. Nodes live
//! in a [`NodeTable`] keyed by inode number; relations between them (parent
//! pointer, the node a [`DirectoryEntry`] refers to) are inode numbers, never
//! owning references.
//!
//! A directory caches its last listing as a vector of [`DirectoryEntry`]
//! rows. A row may or may not have a live node: nodes are only instantiated
//! when the host looks a name up.

use crate::error::{FsError, FsResult};
use sftpmount_client::{ROOT_INO, RemoteHandle};
use sftpmount_proto::{FileAttributes, FileKind, FileTimes, OpenFlags};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// True if a cache item refreshed at `refreshed` is still usable at `now`.
///
/// The boundary is exclusive: at exactly `ttl` the item is stale.
pub fn is_fresh(refreshed: Option<Instant>, now: Instant, ttl: Duration) -> bool {
    refreshed.is_some_and(|at| now.saturating_duration_since(at) < ttl)
}

/// Direction of an open remote file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    /// Flags used to (re)open an existing file for this direction.
    pub fn open_flags(self) -> OpenFlags {
        match self {
            Access::Read => OpenFlags::READ,
            Access::Write => OpenFlags::WRITE,
        }
    }
}

/// How the host opened a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl OpenMode {
    /// Maps `open(2)` flags to a mode.
    pub fn from_flags(flags: i32) -> Self {
        match flags & libc::O_ACCMODE {
            libc::O_WRONLY => OpenMode::WriteOnly,
            libc::O_RDWR => OpenMode::ReadWrite,
            _ => OpenMode::ReadOnly,
        }
    }

    pub fn accesses(self) -> &'static [Access] {
        match self {
            OpenMode::ReadOnly => &[Access::Read],
            OpenMode::WriteOnly => &[Access::Write],
            OpenMode::ReadWrite => &[Access::Read, Access::Write],
        }
    }
}

/// A remote handle shared by every local opener of one direction.
#[derive(Debug)]
pub(crate) struct SharedHandle {
    pub handle: RemoteHandle,
    pub opens: u32,
}

/// At most one remote handle per direction.
#[derive(Debug, Default)]
pub(crate) struct OpenFiles {
    read: Option<SharedHandle>,
    write: Option<SharedHandle>,
}

impl OpenFiles {
    pub fn slot(&self, access: Access) -> Option<&SharedHandle> {
        match access {
            Access::Read => self.read.as_ref(),
            Access::Write => self.write.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, access: Access) -> &mut Option<SharedHandle> {
        match access {
            Access::Read => &mut self.read,
            Access::Write => &mut self.write,
        }
    }

    pub fn count(&self) -> usize {
        usize::from(self.read.is_some()) + usize::from(self.write.is_some())
    }

    /// Empties both slots, returning the handles to close.
    pub fn take_all(&mut self) -> Vec<RemoteHandle> {
        [self.read.take(), self.write.take()]
            .into_iter()
            .flatten()
            .map(|shared| shared.handle)
            .collect()
    }
}

/// One row of a cached directory listing.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub name: String,
    /// Attributes as reported by the listing (or a later prefetch).
    pub attrs: FileAttributes,
    pub refreshed: Instant,
    /// The live node for this name, if one has been instantiated.
    pub node: Option<u64>,
    /// Removed since the listing was fetched. The row keeps its position so
    /// readdir cursors stay valid until the next refresh.
    pub removed: bool,
}

impl DirectoryEntry {
    pub fn new(
        name: impl Into<String>,
        attrs: FileAttributes,
        refreshed: Instant,
        node: Option<u64>,
    ) -> Self {
        Self {
            name: name.into(),
            attrs,
            refreshed,
            node,
            removed: false,
        }
    }
}

/// A directory's cached listing.
#[derive(Debug, Clone)]
pub struct Listing {
    pub entries: Vec<DirectoryEntry>,
    /// `None` once invalidated; the rows are kept for identity reconciliation.
    pub refreshed: Option<Instant>,
}

impl Listing {
    /// A known-empty listing, fresh as of `now`.
    pub fn empty(now: Instant) -> Self {
        Self {
            entries: Vec::new(),
            refreshed: Some(now),
        }
    }

    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        is_fresh(self.refreshed, now, ttl)
    }

    /// Rows that have not been removed.
    pub fn live(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.iter().filter(|e| !e.removed)
    }

    pub fn is_empty(&self) -> bool {
        self.live().next().is_none()
    }

    pub fn find(&self, name: &str) -> Option<&DirectoryEntry> {
        self.live().find(|e| e.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut DirectoryEntry> {
        self.entries
            .iter_mut()
            .find(|e| !e.removed && e.name == name)
    }

    /// Removes the row for `name` and returns what it held.
    ///
    /// The row stays in place as a tombstone; the next refresh drops it.
    pub fn remove(&mut self, name: &str) -> Option<DirectoryEntry> {
        let row = self.find_mut(name)?;
        let taken = row.clone();
        row.removed = true;
        row.node = None;
        Some(taken)
    }

    /// Forgets every reference to `ino`.
    pub fn unlink_node(&mut self, ino: u64) {
        for entry in &mut self.entries {
            if entry.node == Some(ino) {
                entry.node = None;
            }
        }
    }
}

/// In-memory representation of a remote object.
#[derive(Debug)]
pub struct Node {
    pub ino: u64,
    /// Non-owning back reference. `None` only for the root.
    pub parent: Option<u64>,
    /// Name within the parent. Empty for the root.
    pub name: String,
    pub attrs: FileAttributes,
    pub attrs_refreshed: Option<Instant>,
    /// Number of live nodes whose parent is this node.
    pub child_count: usize,
    /// Cached listing, directories only.
    pub listing: Option<Listing>,
    pub(crate) files: OpenFiles,
    /// The host holds no references, but children still do.
    pub reclaim_pending: bool,
    /// An exported handle refers to this node; it is never reclaimed.
    pub exported: bool,
    /// Removed remotely. The node survives until reclaimed but is no longer
    /// reachable by name.
    pub unlinked: bool,
}

impl Node {
    pub fn new(
        ino: u64,
        parent: Option<u64>,
        name: impl Into<String>,
        attrs: FileAttributes,
        refreshed: Option<Instant>,
    ) -> Self {
        Self {
            ino,
            parent,
            name: name.into(),
            attrs,
            attrs_refreshed: refreshed,
            child_count: 0,
            listing: None,
            files: OpenFiles::default(),
            reclaim_pending: false,
            exported: false,
            unlinked: false,
        }
    }

    /// Kind from the cached permission bits. Regular if the server never
    /// reported any.
    pub fn kind(&self) -> FileKind {
        self.attrs.kind().unwrap_or(FileKind::Regular)
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    pub fn attrs_fresh(&self, now: Instant, ttl: Duration) -> bool {
        is_fresh(self.attrs_refreshed, now, ttl)
    }

    pub fn open_handles(&self) -> usize {
        self.files.count()
    }

    pub fn to_attr(&self) -> NodeAttr {
        NodeAttr::from_attributes(self.ino, &self.attrs)
    }
}

/// Host-facing attributes of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttr {
    pub ino: u64,
    pub kind: FileKind,
    pub size: u64,
    /// Permission bits without the file type.
    pub perm: u16,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub nlink: u32,
}

impl NodeAttr {
    /// Fills unreported fields with zero (or the epoch).
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_attributes(ino: u64, attrs: &FileAttributes) -> Self {
        let kind = attrs.kind().unwrap_or(FileKind::Regular);
        let secs = |s: u32| UNIX_EPOCH + Duration::from_secs(u64::from(s));
        Self {
            ino,
            kind,
            size: attrs.size.unwrap_or(0),
            perm: (attrs.permissions.unwrap_or(0) & 0o7777) as u16,
            uid: attrs.owner.map_or(0, |o| o.uid),
            gid: attrs.owner.map_or(0, |o| o.gid),
            atime: attrs.times.map_or(UNIX_EPOCH, |t| secs(t.atime)),
            mtime: attrs.times.map_or(UNIX_EPOCH, |t| secs(t.mtime)),
            nlink: if kind == FileKind::Directory { 2 } else { 1 },
        }
    }
}

/// One row returned by readdir.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
    /// Live node for the name, if instantiated.
    pub ino: Option<u64>,
    pub attrs: FileAttributes,
    /// Cursor that resumes the listing after this row.
    pub next_cursor: u64,
}

/// Attributes for an object the server did not describe after creating it.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn synthesized_attrs(kind: FileKind, mode: u32) -> FileAttributes {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;
    FileAttributes {
        size: Some(0),
        owner: None,
        permissions: Some(kind.mode_bits() | (mode & 0o7777)),
        times: Some(FileTimes {
            atime: now,
            mtime: now,
        }),
        extended: Vec::new(),
    }
}

/// Rejects names that cannot appear as a single path component.
pub fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(FsError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Joins a remote directory path and a component.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// The node arena.
#[derive(Debug)]
pub struct NodeTable {
    nodes: HashMap<u64, Node>,
    root_path: String,
}

impl NodeTable {
    /// Creates a table holding only the root node.
    pub fn new(root_path: impl Into<String>, root_attrs: FileAttributes, now: Instant) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_INO,
            Node::new(ROOT_INO, None, "", root_attrs, Some(now)),
        );
        Self {
            nodes,
            root_path: root_path.into(),
        }
    }

    /// Resolved remote path of the root.
    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    pub fn get(&self, ino: u64) -> Option<&Node> {
        self.nodes.get(&ino)
    }

    pub fn get_mut(&mut self, ino: u64) -> Option<&mut Node> {
        self.nodes.get_mut(&ino)
    }

    pub fn node(&self, ino: u64) -> FsResult<&Node> {
        self.nodes.get(&ino).ok_or(FsError::InvalidInode(ino))
    }

    pub fn node_mut(&mut self, ino: u64) -> FsResult<&mut Node> {
        self.nodes.get_mut(&ino).ok_or(FsError::InvalidInode(ino))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    pub(crate) fn insert(&mut self, node: Node) {
        self.nodes.insert(node.ino, node);
    }

    pub(crate) fn remove(&mut self, ino: u64) -> Option<Node> {
        self.nodes.remove(&ino)
    }

    /// Remote path of a node, built from the parent chain.
    pub fn path_of(&self, ino: u64) -> FsResult<String> {
        let mut names = Vec::new();
        let mut current = self.node(ino)?;
        while let Some(parent) = current.parent {
            if names.len() > self.nodes.len() {
                return Err(FsError::InvalidInode(ino));
            }
            names.push(current.name.as_str());
            current = self.node(parent)?;
        }
        let mut path = self.root_path.clone();
        for name in names.iter().rev() {
            path = join_path(&path, name);
        }
        Ok(path)
    }

    /// Remote path of `name` inside directory `parent`.
    pub fn child_path(&self, parent: u64, name: &str) -> FsResult<String> {
        Ok(join_path(&self.path_of(parent)?, name))
    }

    /// True if `ino` is a live, still-linked child of `parent` named `name`.
    pub fn is_live_child(&self, parent: u64, ino: u64, name: &str) -> bool {
        self.nodes
            .get(&ino)
            .is_some_and(|n| n.parent == Some(parent) && n.name == name && !n.unlinked)
    }

    /// Finds a live child of `parent` by name, listed or not.
    pub fn find_child(&self, parent: u64, name: &str) -> Option<u64> {
        self.nodes
            .values()
            .find(|n| n.parent == Some(parent) && n.name == name && !n.unlinked)
            .map(|n| n.ino)
    }

    /// Live, still-linked children of `parent`, by name.
    pub fn children_by_name(&self, parent: u64) -> HashMap<String, u64> {
        self.nodes
            .values()
            .filter(|n| n.parent == Some(parent) && !n.unlinked)
            .map(|n| (n.name.clone(), n.ino))
            .collect()
    }
}
