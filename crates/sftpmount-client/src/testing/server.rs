use crate::connector::{Connection, Connector};
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use sftpmount_proto::{
    FileAttributes, FileKind, FileTimes, Handle, NameEntry, OpenFlags, Ownership, Packet,
    PacketType, Request, Response, SFTP_VERSION, StatusCode,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, watch};

/// Entries returned per `READDIR` reply.
pub const READDIR_BATCH: usize = 50;

const DUPLEX_BUF: usize = 512 * 1024;
const OWNER: Ownership = Ownership {
    uid: 1000,
    gid: 1000,
};

#[derive(Debug, Clone)]
enum MemNode {
    File { data: Vec<u8>, mode: u32, mtime: u32 },
    Dir { mode: u32, mtime: u32 },
    Symlink { target: String, mtime: u32 },
}

impl MemNode {
    fn attrs(&self) -> FileAttributes {
        let (size, mode, mtime) = match self {
            MemNode::File { data, mode, mtime } => (
                data.len() as u64,
                FileKind::Regular.mode_bits() | mode,
                *mtime,
            ),
            MemNode::Dir { mode, mtime } => (4096, FileKind::Directory.mode_bits() | mode, *mtime),
            MemNode::Symlink { target, mtime } => (
                target.len() as u64,
                FileKind::Symlink.mode_bits() | 0o777,
                *mtime,
            ),
        };
        FileAttributes {
            size: Some(size),
            owner: Some(OWNER),
            permissions: Some(mode),
            times: Some(FileTimes {
                atime: mtime,
                mtime,
            }),
            extended: Vec::new(),
        }
    }

    fn set_mtime(&mut self, value: u32) {
        match self {
            MemNode::File { mtime, .. }
            | MemNode::Dir { mtime, .. }
            | MemNode::Symlink { mtime, .. } => *mtime = value,
        }
    }
}

#[derive(Debug)]
enum OpenHandle {
    File { path: String },
    Dir { remaining: VecDeque<NameEntry> },
}

struct HeldReply {
    out: mpsc::UnboundedSender<Bytes>,
    frame: Bytes,
}

struct ServerState {
    tree: BTreeMap<String, MemNode>,
    handles: HashMap<u32, OpenHandle>,
    next_handle: u32,
    counts: HashMap<PacketType, usize>,
    hold: bool,
    held: Vec<HeldReply>,
    refuse: bool,
    attempts: usize,
    denied_listings: HashSet<String>,
    injected: HashMap<PacketType, VecDeque<StatusCode>>,
    clock: u32,
}

impl ServerState {
    fn tick(&mut self) -> u32 {
        self.clock += 1;
        self.clock
    }

    fn touch_parent(&mut self, path: &str) {
        let now = self.tick();
        if let Some(parent) = self.tree.get_mut(parent_of(path)) {
            parent.set_mtime(now);
        }
    }

    fn children(&self, dir: &str) -> Vec<(String, MemNode)> {
        let prefix = child_prefix(dir);
        self.tree
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/') && k.len() > prefix.len())
            .map(|(k, v)| (k[prefix.len()..].to_string(), v.clone()))
            .collect()
    }

    /// Follows symlinks from `path`.
    fn resolve(&self, path: &str) -> Option<(String, &MemNode)> {
        let mut current = path.to_string();
        for _ in 0..8 {
            let node = self.tree.get(&current)?;
            match node {
                MemNode::Symlink { target, .. } => {
                    current = if target.starts_with('/') {
                        normalize(target)
                    } else {
                        normalize(&format!("{}/{target}", parent_of(&current)))
                    };
                }
                _ => return Some((current, node)),
            }
        }
        None
    }

    fn insert_dirs(&mut self, path: &str) {
        let mut partial = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            partial.push('/');
            partial.push_str(part);
            let now = self.clock;
            self.tree
                .entry(partial.clone())
                .or_insert(MemNode::Dir { mode: 0o755, mtime: now });
        }
    }
}

struct ServerInner {
    state: Mutex<ServerState>,
    kill: watch::Sender<u64>,
    held_count: watch::Sender<usize>,
}

/// An in-memory SFTP version 3 server. Clones share state.
#[derive(Clone)]
pub struct MemoryServer {
    inner: Arc<ServerInner>,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    pub fn new() -> Self {
        let mut tree = BTreeMap::new();
        let clock = 1_700_000_000;
        tree.insert(
            "/".to_string(),
            MemNode::Dir {
                mode: 0o755,
                mtime: clock,
            },
        );
        Self {
            inner: Arc::new(ServerInner {
                state: Mutex::new(ServerState {
                    tree,
                    handles: HashMap::new(),
                    next_handle: 1,
                    counts: HashMap::new(),
                    hold: false,
                    held: Vec::new(),
                    refuse: false,
                    attempts: 0,
                    denied_listings: HashSet::new(),
                    injected: HashMap::new(),
                    clock,
                }),
                kill: watch::channel(0).0,
                held_count: watch::channel(0).0,
            }),
        }
    }

    /// A connector whose every connection is served by this server.
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MemoryConnector {
            server: self.clone(),
        })
    }

    /// Creates (or replaces) a file, creating missing parent directories.
    pub fn add_file(&self, path: &str, data: &[u8]) {
        let path = normalize(path);
        let mut state = self.inner.state.lock();
        state.insert_dirs(parent_of(&path));
        let now = state.tick();
        state.tree.insert(
            path,
            MemNode::File {
                data: data.to_vec(),
                mode: 0o644,
                mtime: now,
            },
        );
    }

    pub fn add_dir(&self, path: &str) {
        let path = normalize(path);
        self.inner.state.lock().insert_dirs(&path);
    }

    pub fn add_symlink(&self, path: &str, target: &str) {
        let path = normalize(path);
        let mut state = self.inner.state.lock();
        state.insert_dirs(parent_of(&path));
        let now = state.tick();
        state.tree.insert(
            path,
            MemNode::Symlink {
                target: target.to_string(),
                mtime: now,
            },
        );
    }

    /// Deletes a path and everything below it, bypassing the protocol.
    pub fn remove_path(&self, path: &str) {
        let path = normalize(path);
        let prefix = child_prefix(&path);
        let mut state = self.inner.state.lock();
        state.tree.retain(|k, _| *k != path && !k.starts_with(&prefix));
    }

    /// Replaces a file's content from outside, advancing its mtime.
    pub fn modify_file(&self, path: &str, data: &[u8]) {
        let path = normalize(path);
        let mut state = self.inner.state.lock();
        let now = state.tick();
        if let Some(MemNode::File {
            data: content,
            mtime,
            ..
        }) = state.tree.get_mut(&path)
        {
            *content = data.to_vec();
            *mtime = now;
        }
    }

    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        match self.inner.state.lock().tree.get(&normalize(path)) {
            Some(MemNode::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.inner.state.lock().tree.contains_key(&normalize(path))
    }

    /// Attributes as the server would report them for `lstat`.
    pub fn attrs(&self, path: &str) -> Option<FileAttributes> {
        self.inner
            .state
            .lock()
            .tree
            .get(&normalize(path))
            .map(MemNode::attrs)
    }

    /// Number of requests of type `ty` received so far.
    pub fn count(&self, ty: PacketType) -> usize {
        self.inner
            .state
            .lock()
            .counts
            .get(&ty)
            .copied()
            .unwrap_or(0)
    }

    /// Requests received, excluding the handshake.
    pub fn total_requests(&self) -> usize {
        self.inner
            .state
            .lock()
            .counts
            .iter()
            .filter(|(ty, _)| **ty != PacketType::Init)
            .map(|(_, n)| n)
            .sum()
    }

    pub fn reset_counts(&self) {
        self.inner.state.lock().counts.clear();
    }

    /// Handles currently open on the server.
    pub fn open_handles(&self) -> usize {
        self.inner.state.lock().handles.len()
    }

    /// While on, replies are queued instead of sent.
    pub fn hold_replies(&self, hold: bool) {
        self.inner.state.lock().hold = hold;
    }

    pub fn held_count(&self) -> usize {
        self.inner.state.lock().held.len()
    }

    /// Waits until at least `n` replies are held.
    pub async fn wait_for_held(&self, n: usize) {
        let mut rx = self.inner.held_count.subscribe();
        let _ = rx.wait_for(|held| *held >= n).await;
    }

    /// Sends held replies in the given order of arrival indices.
    /// Replies not named stay held.
    pub fn release_held(&self, order: &[usize]) {
        let mut state = self.inner.state.lock();
        let mut slots: Vec<Option<HeldReply>> = state.held.drain(..).map(Some).collect();
        for &i in order {
            if let Some(reply) = slots.get_mut(i).and_then(Option::take) {
                let _ = reply.out.send(reply.frame);
            }
        }
        state.held = slots.into_iter().flatten().collect();
        self.inner.held_count.send_replace(state.held.len());
    }

    /// Sends every held reply in arrival order.
    pub fn release_all_held(&self) {
        let mut state = self.inner.state.lock();
        for reply in state.held.drain(..) {
            let _ = reply.out.send(reply.frame);
        }
        self.inner.held_count.send_replace(0);
    }

    /// Drops every live connection, as if the endpoint process died.
    pub fn kill_connections(&self) {
        {
            let mut state = self.inner.state.lock();
            state.held.clear();
            state.handles.clear();
            self.inner.held_count.send_replace(0);
        }
        self.inner.kill.send_modify(|epoch| *epoch += 1);
    }

    /// While on, new connection attempts fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.state.lock().refuse = refuse;
    }

    /// Connection attempts so far, refused ones included.
    pub fn connections_attempted(&self) -> usize {
        self.inner.state.lock().attempts
    }

    /// Makes the next request of type `ty` fail with `code`.
    pub fn fail_next(&self, ty: PacketType, code: StatusCode) {
        self.inner
            .state
            .lock()
            .injected
            .entry(ty)
            .or_default()
            .push_back(code);
    }

    /// Makes `OPENDIR` of `path` fail with permission denied.
    pub fn deny_listing(&self, path: &str) {
        self.inner
            .state
            .lock()
            .denied_listings
            .insert(normalize(path));
    }

    fn accept(&self) -> io::Result<DuplexStream> {
        {
            let mut state = self.inner.state.lock();
            state.attempts += 1;
            if state.refuse {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "memory server refusing connections",
                ));
            }
        }
        let (client, server) = tokio::io::duplex(DUPLEX_BUF);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(serve(inner, server));
        Ok(client)
    }
}

/// [`Connector`] for a [`MemoryServer`].
pub struct MemoryConnector {
    server: MemoryServer,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> io::Result<Connection> {
        let stream = self.server.accept()?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(Connection::new(
            Box::new(reader),
            Box::new(writer),
            "memory server",
        ))
    }
}

async fn serve(inner: Arc<ServerInner>, stream: DuplexStream) {
    let (mut rd, mut wr) = tokio::io::split(stream);
    let (out, mut queue) = mpsc::unbounded_channel::<Bytes>();
    let mut kill = inner.kill.subscribe();

    let writer = async {
        while let Some(frame) = queue.recv().await {
            if wr.write_all(&frame).await.is_err() {
                break;
            }
        }
    };

    let reader = async {
        let mut buf = BytesMut::with_capacity(64 * 1024);
        loop {
            match rd.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            loop {
                let (packet, used) = match Packet::decode_frame(&buf) {
                    Ok(decoded) => decoded,
                    Err(e) if e.is_incomplete() => break,
                    Err(_) => return,
                };
                buf.advance(used);
                handle_packet(&inner, &out, packet);
            }
        }
    };

    tokio::select! {
        () = reader => {}
        () = writer => {}
        _ = kill.changed() => {}
    }
}

fn handle_packet(inner: &ServerInner, out: &mpsc::UnboundedSender<Bytes>, packet: Packet) {
    let mut state = inner.state.lock();
    match packet {
        Packet::Init { .. } => {
            *state.counts.entry(PacketType::Init).or_default() += 1;
            let version = Packet::Version {
                version: SFTP_VERSION,
                extensions: vec![("posix-rename@openssh.com".into(), "1".into())],
            };
            let _ = out.send(version.to_frame());
        }
        Packet::Request { id, request } => {
            let ty = request.packet_type();
            *state.counts.entry(ty).or_default() += 1;
            let injected = state.injected.get_mut(&ty).and_then(VecDeque::pop_front);
            let response = match injected {
                Some(code) => Response::status(code, "injected failure"),
                None => execute(&mut state, request),
            };
            let frame = Packet::response(id, response).to_frame();
            if state.hold {
                state.held.push(HeldReply {
                    out: out.clone(),
                    frame,
                });
                inner.held_count.send_replace(state.held.len());
            } else {
                let _ = out.send(frame);
            }
        }
        Packet::Version { .. } | Packet::Response { .. } => {}
    }
}

fn ok() -> Response {
    Response::status(StatusCode::Ok, "")
}

fn status(code: StatusCode, message: &str) -> Response {
    Response::status(code, message)
}

fn handle_id(handle: &Handle) -> Option<u32> {
    let bytes: [u8; 4] = handle.as_bytes().try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

fn execute(state: &mut ServerState, request: Request) -> Response {
    match request {
        Request::Realpath { path } => single_name(normalize(&path)),
        Request::Lstat { path } => match state.tree.get(&normalize(&path)) {
            Some(node) => Response::Attrs(node.attrs()),
            None => status(StatusCode::NoSuchFile, "no such file"),
        },
        Request::Stat { path } => match state.resolve(&normalize(&path)) {
            Some((_, node)) => Response::Attrs(node.attrs()),
            None => status(StatusCode::NoSuchFile, "no such file"),
        },
        Request::Opendir { path } => {
            let path = normalize(&path);
            if state.denied_listings.contains(&path) {
                return status(StatusCode::PermissionDenied, "permission denied");
            }
            let Some((dir, node)) = state.resolve(&path) else {
                return status(StatusCode::NoSuchFile, "no such file");
            };
            if !matches!(node, MemNode::Dir { .. }) {
                return status(StatusCode::Failure, "not a directory");
            }
            let dir_attrs = node.attrs();
            let mut remaining = VecDeque::new();
            for dot in [".", ".."] {
                remaining.push_back(NameEntry {
                    filename: dot.into(),
                    longname: dot.into(),
                    attrs: dir_attrs.clone(),
                });
            }
            for (name, child) in state.children(&dir) {
                remaining.push_back(NameEntry {
                    longname: format!("?????????? 1 1000 1000 0 {name}"),
                    filename: name,
                    attrs: child.attrs(),
                });
            }
            new_handle(state, OpenHandle::Dir { remaining })
        }
        Request::Readdir { handle } => {
            let Some(OpenHandle::Dir { remaining }) =
                handle_id(&handle).and_then(|id| state.handles.get_mut(&id))
            else {
                return status(StatusCode::InvalidHandle, "invalid handle");
            };
            if remaining.is_empty() {
                return status(StatusCode::Eof, "");
            }
            let n = remaining.len().min(READDIR_BATCH);
            Response::Name(remaining.drain(..n).collect())
        }
        Request::Close { handle } => match handle_id(&handle).and_then(|id| state.handles.remove(&id)) {
            Some(_) => ok(),
            None => status(StatusCode::InvalidHandle, "invalid handle"),
        },
        Request::Open { path, flags, attrs } => open(state, &normalize(&path), flags, &attrs),
        Request::Read {
            handle,
            offset,
            len,
        } => {
            let Some(path) = file_handle_path(state, &handle) else {
                return status(StatusCode::InvalidHandle, "invalid handle");
            };
            match state.tree.get(&path) {
                Some(MemNode::File { data, .. }) => {
                    let Ok(start) = usize::try_from(offset) else {
                        return status(StatusCode::Eof, "");
                    };
                    if start >= data.len() {
                        return status(StatusCode::Eof, "");
                    }
                    let end = data.len().min(start + len as usize);
                    Response::Data(Bytes::copy_from_slice(&data[start..end]))
                }
                _ => status(StatusCode::NoSuchFile, "file vanished"),
            }
        }
        Request::Write {
            handle,
            offset,
            data,
        } => {
            let Some(path) = file_handle_path(state, &handle) else {
                return status(StatusCode::InvalidHandle, "invalid handle");
            };
            let now = state.tick();
            match state.tree.get_mut(&path) {
                Some(MemNode::File {
                    data: content,
                    mtime,
                    ..
                }) => {
                    let start = offset as usize;
                    if content.len() < start + data.len() {
                        content.resize(start + data.len(), 0);
                    }
                    content[start..start + data.len()].copy_from_slice(&data);
                    *mtime = now;
                    ok()
                }
                _ => status(StatusCode::NoSuchFile, "file vanished"),
            }
        }
        Request::Fstat { handle } => match file_handle_path(state, &handle) {
            Some(path) => match state.tree.get(&path) {
                Some(node) => Response::Attrs(node.attrs()),
                None => status(StatusCode::NoSuchFile, "file vanished"),
            },
            None => status(StatusCode::InvalidHandle, "invalid handle"),
        },
        Request::Setstat { path, attrs } => setstat(state, &normalize(&path), &attrs),
        Request::Fsetstat { handle, attrs } => match file_handle_path(state, &handle) {
            Some(path) => setstat(state, &path, &attrs),
            None => status(StatusCode::InvalidHandle, "invalid handle"),
        },
        Request::Remove { path } => {
            let path = normalize(&path);
            match state.tree.get(&path) {
                None => status(StatusCode::NoSuchFile, "no such file"),
                Some(MemNode::Dir { .. }) => status(StatusCode::Failure, "is a directory"),
                Some(_) => {
                    state.tree.remove(&path);
                    state.touch_parent(&path);
                    ok()
                }
            }
        }
        Request::Mkdir { path, attrs } => {
            let path = normalize(&path);
            if state.tree.contains_key(&path) {
                return status(StatusCode::FileAlreadyExists, "file exists");
            }
            if !matches!(state.tree.get(parent_of(&path)), Some(MemNode::Dir { .. })) {
                return status(StatusCode::NoSuchFile, "no such directory");
            }
            let now = state.tick();
            let mode = attrs.permissions.unwrap_or(0o755) & 0o7777;
            state.tree.insert(path.clone(), MemNode::Dir { mode, mtime: now });
            state.touch_parent(&path);
            ok()
        }
        Request::Rmdir { path } => {
            let path = normalize(&path);
            match state.tree.get(&path) {
                None => status(StatusCode::NoSuchFile, "no such file"),
                Some(MemNode::Dir { .. }) => {
                    if state.children(&path).is_empty() {
                        state.tree.remove(&path);
                        state.touch_parent(&path);
                        ok()
                    } else {
                        status(StatusCode::Failure, "directory not empty")
                    }
                }
                Some(_) => status(StatusCode::Failure, "not a directory"),
            }
        }
        Request::Rename { from, to } => rename(state, &normalize(&from), &normalize(&to)),
        Request::Readlink { path } => match state.tree.get(&normalize(&path)) {
            Some(MemNode::Symlink { target, .. }) => single_name(target.clone()),
            Some(_) => status(StatusCode::Failure, "not a symlink"),
            None => status(StatusCode::NoSuchFile, "no such file"),
        },
        // OpenSSH order: target first, then the link to create.
        Request::Symlink { first, second } => {
            let link = normalize(&second);
            if state.tree.contains_key(&link) {
                return status(StatusCode::Failure, "file exists");
            }
            if !matches!(state.tree.get(parent_of(&link)), Some(MemNode::Dir { .. })) {
                return status(StatusCode::NoSuchFile, "no such directory");
            }
            let now = state.tick();
            state.tree.insert(
                link.clone(),
                MemNode::Symlink {
                    target: first,
                    mtime: now,
                },
            );
            state.touch_parent(&link);
            ok()
        }
        Request::Extended { .. } => status(StatusCode::OpUnsupported, "unsupported"),
    }
}

fn single_name(filename: String) -> Response {
    Response::Name(vec![NameEntry {
        longname: filename.clone(),
        filename,
        attrs: FileAttributes::empty(),
    }])
}

fn new_handle(state: &mut ServerState, open: OpenHandle) -> Response {
    let id = state.next_handle;
    state.next_handle += 1;
    state.handles.insert(id, open);
    Response::Handle(Handle(Bytes::copy_from_slice(&id.to_be_bytes())))
}

fn file_handle_path(state: &ServerState, handle: &Handle) -> Option<String> {
    match state.handles.get(&handle_id(handle)?)? {
        OpenHandle::File { path } => Some(path.clone()),
        OpenHandle::Dir { .. } => None,
    }
}

fn open(state: &mut ServerState, path: &str, flags: OpenFlags, attrs: &FileAttributes) -> Response {
    let exists = match state.tree.get(path) {
        Some(MemNode::Dir { .. }) => return status(StatusCode::Failure, "is a directory"),
        Some(_) => true,
        None => false,
    };
    if exists && flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
        return status(StatusCode::FileAlreadyExists, "file exists");
    }
    if !exists {
        if !flags.contains(OpenFlags::CREAT) {
            return status(StatusCode::NoSuchFile, "no such file");
        }
        if !matches!(state.tree.get(parent_of(path)), Some(MemNode::Dir { .. })) {
            return status(StatusCode::NoSuchFile, "no such directory");
        }
        let now = state.tick();
        let mode = attrs.permissions.unwrap_or(0o644) & 0o7777;
        state.tree.insert(
            path.to_string(),
            MemNode::File {
                data: Vec::new(),
                mode,
                mtime: now,
            },
        );
        state.touch_parent(path);
    } else if flags.contains(OpenFlags::TRUNC) {
        let now = state.tick();
        if let Some(MemNode::File { data, mtime, .. }) = state.tree.get_mut(path) {
            data.clear();
            *mtime = now;
        }
    }
    new_handle(
        state,
        OpenHandle::File {
            path: path.to_string(),
        },
    )
}

fn setstat(state: &mut ServerState, path: &str, attrs: &FileAttributes) -> Response {
    let now = state.tick();
    let Some(node) = state.tree.get_mut(path) else {
        return status(StatusCode::NoSuchFile, "no such file");
    };
    if let Some(size) = attrs.size {
        match node {
            MemNode::File { data, mtime, .. } => {
                data.resize(size as usize, 0);
                *mtime = now;
            }
            _ => return status(StatusCode::Failure, "not a regular file"),
        }
    }
    if let Some(perm) = attrs.permissions {
        match node {
            MemNode::File { mode, .. } | MemNode::Dir { mode, .. } => *mode = perm & 0o7777,
            MemNode::Symlink { .. } => {}
        }
    }
    if let Some(times) = attrs.times {
        node.set_mtime(times.mtime);
    }
    ok()
}

fn rename(state: &mut ServerState, from: &str, to: &str) -> Response {
    if !state.tree.contains_key(from) {
        return status(StatusCode::NoSuchFile, "no such file");
    }
    if state.tree.contains_key(to) {
        return status(StatusCode::Failure, "target exists");
    }
    if !matches!(state.tree.get(parent_of(to)), Some(MemNode::Dir { .. })) {
        return status(StatusCode::NoSuchFile, "no such directory");
    }
    let prefix = child_prefix(from);
    let moved: Vec<String> = state
        .tree
        .keys()
        .filter(|k| *k == from || k.starts_with(&prefix))
        .cloned()
        .collect();
    for old in moved {
        if let Some(node) = state.tree.remove(&old) {
            let new = format!("{to}{}", &old[from.len()..]);
            state.tree.insert(new, node);
        }
    }
    for path in [from, to] {
        state.touch_parent(path);
    }
    ok()
}

/// Absolute, `.`/`..`-free form of `path`. Relative paths start at `/`.
fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn child_prefix(dir: &str) -> String {
    if dir == "/" {
        "/".to_string()
    } else {
        format!("{dir}/")
    }
}
