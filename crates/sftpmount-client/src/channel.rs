//! Transport channel: one connection at a time, replaced on failure.
//!
//! A channel owns the current connection to the endpoint and the table of
//! requests outstanding on it. Each connection runs two tasks: a reader that
//! reassembles frames and completes pending requests, and a writer that
//! drains the queue of encoded frames onto the stream.
//!
//! When either task sees the stream fail, every request outstanding on that
//! connection completes with [`TransportError::ConnectionLost`] and a
//! reconnect task starts. Calls submitted while it runs wait for the outcome.
//! If every attempt fails the channel is dead and all later calls fail with
//! [`TransportError::Fatal`].
//!
//! Connection state, generation and the pending table sit behind one lock, so
//! registering a request and queueing its frame happen atomically with
//! respect to the failure drain: a request is either failed by the drain or
//! sent on a live connection, never lost in between.

use crate::config::ClientConfig;
use crate::connector::{BoxReader, BoxWriter, Connection, Connector};
use crate::correlator::Correlator;
use crate::error::{ClientError, ClientResult, TransportError};
use crate::frame::{FrameError, FrameReader};
use crate::session::Session;
use bytes::Bytes;
use parking_lot::Mutex;
use sftpmount_proto::{Packet, Request, Response, SFTP_VERSION};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Which traffic a channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    Metadata,
    Data,
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRole::Metadata => f.write_str("metadata"),
            ChannelRole::Data => f.write_str("data"),
        }
    }
}

/// Observable state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Connected; handles are valid for this generation.
    Up { generation: u64 },
    Reconnecting,
    /// Reconnecting gave up.
    Dead,
}

/// Point-in-time counters for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub role: ChannelRole,
    pub status: LinkStatus,
    pub outstanding: usize,
    pub reconnects: u64,
}

struct Link {
    outgoing: mpsc::UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    child: Option<Child>,
    peer: String,
}

impl Link {
    fn shutdown(self) {
        self.reader.abort();
        self.writer.abort();
        // kill_on_drop takes care of the endpoint process.
        drop(self.child);
    }
}

struct State {
    generation: u64,
    status: LinkStatus,
    link: Option<Link>,
    correlator: Correlator,
}

/// A connection that completed the handshake but has no tasks yet.
struct Established {
    reader: BoxReader,
    writer: BoxWriter,
    frames: FrameReader,
    /// Frames that arrived in the same read as the handshake reply.
    leftover: Vec<Bytes>,
    child: Option<Child>,
    peer: String,
}

struct Inner {
    role: ChannelRole,
    connector: Arc<dyn Connector>,
    session: Arc<Session>,
    config: ClientConfig,
    state: Mutex<State>,
    status: watch::Sender<LinkStatus>,
    reconnects: AtomicU64,
}

/// Handle to a transport channel. Cheap to clone.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("role", &self.inner.role)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Connects and performs the handshake.
    ///
    /// A failure here is returned directly; reconnecting only applies to
    /// connections that were once established.
    pub async fn connect(
        role: ChannelRole,
        connector: Arc<dyn Connector>,
        session: Arc<Session>,
        config: ClientConfig,
    ) -> ClientResult<Self> {
        let (status, _) = watch::channel(LinkStatus::Reconnecting);
        let inner = Arc::new(Inner {
            role,
            connector,
            session,
            config,
            state: Mutex::new(State {
                generation: 0,
                status: LinkStatus::Reconnecting,
                link: None,
                correlator: Correlator::new(),
            }),
            status,
            reconnects: AtomicU64::new(0),
        });
        let established = inner.establish().await?;
        let generation = inner.install(established);
        tracing::info!(role = %role, generation, "Channel connected");
        Ok(Self { inner })
    }

    pub fn role(&self) -> ChannelRole {
        self.inner.role
    }

    pub fn status(&self) -> LinkStatus {
        self.inner.state.lock().status
    }

    /// Generation of the current connection. Increments on every reconnect.
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    pub fn is_dead(&self) -> bool {
        self.status() == LinkStatus::Dead
    }

    /// Watches status transitions.
    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.inner.status.subscribe()
    }

    /// Description of the current endpoint.
    pub fn peer(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .link
            .as_ref()
            .map(|link| link.peer.clone())
    }

    pub fn stats(&self) -> ChannelStats {
        let state = self.inner.state.lock();
        ChannelStats {
            role: self.inner.role,
            status: state.status,
            outstanding: state.correlator.len(),
            reconnects: self.inner.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Sends a request and waits for its reply.
    pub async fn submit(&self, request: Request) -> ClientResult<Response> {
        self.submit_inner(request, None).await.map(|(response, _)| response)
    }

    /// Like [`submit`](Self::submit), also returning the generation of the
    /// connection the request was actually sent on.
    pub async fn submit_tagged(&self, request: Request) -> ClientResult<(Response, u64)> {
        self.submit_inner(request, None).await
    }

    /// Sends a handle-addressed request.
    ///
    /// Fails with [`ClientError::StaleHandle`] unless the current connection
    /// is the one of `generation`: handles are meaningless on any other.
    pub async fn submit_on(&self, request: Request, generation: u64) -> ClientResult<Response> {
        self.submit_inner(request, Some(generation))
            .await
            .map(|(response, _)| response)
    }

    async fn submit_inner(
        &self,
        request: Request,
        expected: Option<u64>,
    ) -> ClientResult<(Response, u64)> {
        let kind = request.name();
        let (id, generation, rx) = loop {
            let mut status_rx = {
                let mut guard = self.inner.state.lock();
                let state = &mut *guard;
                match state.status {
                    LinkStatus::Up { generation } => {
                        if let Some(handle) = expected
                            && handle != generation
                        {
                            return Err(ClientError::StaleHandle {
                                handle,
                                current: generation,
                            });
                        }
                        let Some(link) = state.link.as_ref() else {
                            return Err(TransportError::ConnectionLost.into());
                        };
                        let (id, rx) = state.correlator.register(&self.inner.session, kind);
                        let frame = Packet::request(id, request).to_frame();
                        tracing::trace!(id, request = kind, len = frame.len(), "Queueing request");
                        if link.outgoing.send(frame).is_err() {
                            state.correlator.remove(id);
                            return Err(TransportError::ConnectionLost.into());
                        }
                        break (id, generation, rx);
                    }
                    LinkStatus::Reconnecting => {
                        if let Some(handle) = expected {
                            return Err(ClientError::StaleHandle {
                                handle,
                                current: state.generation,
                            });
                        }
                        self.inner.status.subscribe()
                    }
                    LinkStatus::Dead => {
                        return Err(TransportError::Fatal {
                            attempts: self.inner.config.reconnect.max_attempts,
                        }
                        .into());
                    }
                }
            };
            tracing::debug!(role = %self.inner.role, request = kind, "Waiting for reconnect");
            // The sender lives in `inner`, which we hold; this cannot close.
            let _ = status_rx
                .wait_for(|s| !matches!(s, LinkStatus::Reconnecting))
                .await;
        };

        let received = match self.inner.config.request_timeout {
            None => rx.await,
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    {
                        let mut state = self.inner.state.lock();
                        if state.generation == generation {
                            state.correlator.remove(id);
                        }
                    }
                    tracing::warn!(id, request = kind, timeout = ?limit, "Request timed out");
                    return Err(ClientError::Timeout {
                        request: kind,
                        elapsed: limit,
                    });
                }
            },
        };
        // A dropped sender means the pending entry went away with its connection.
        let response = received.unwrap_or_else(|_| Err(TransportError::ConnectionLost.into()))?;
        Ok((response, generation))
    }
}

impl Inner {
    /// Opens a connection and runs the handshake on it.
    async fn establish(&self) -> ClientResult<Established> {
        let handshake = self.handshake();
        match self.config.request_timeout {
            None => handshake.await,
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| ClientError::Timeout {
                    request: "init",
                    elapsed: limit,
                })?,
        }
    }

    async fn handshake(&self) -> ClientResult<Established> {
        let Connection {
            mut reader,
            mut writer,
            child,
            peer,
        } = self
            .connector
            .connect()
            .await
            .map_err(TransportError::from)?;

        writer
            .write_all(&Packet::init().to_frame())
            .await
            .map_err(TransportError::from)?;
        writer.flush().await.map_err(TransportError::from)?;

        let mut frames = FrameReader::new(self.config.max_frame_len);
        let mut bodies = Vec::new();
        let mut buf = vec![0u8; READ_BUF_SIZE];
        while bodies.is_empty() {
            let n = reader.read(&mut buf).await.map_err(TransportError::from)?;
            if n == 0 {
                return Err(TransportError::ConnectionLost.into());
            }
            frames.feed(&buf[..n], &mut bodies).map_err(frame_error)?;
        }
        let first = bodies.remove(0);

        let (version, extensions) = match Packet::decode(&first)? {
            Packet::Version {
                version,
                extensions,
            } => (version, extensions),
            other => {
                return Err(ClientError::Protocol(format!(
                    "expected VERSION, got {:?}",
                    other.packet_type()
                )));
            }
        };
        if version < SFTP_VERSION {
            return Err(ClientError::Protocol(format!(
                "server speaks version {version}, need {SFTP_VERSION}"
            )));
        }
        let version = version.min(SFTP_VERSION);
        if let Err(previous) = self.session.record_handshake(version, extensions) {
            return Err(ClientError::Protocol(format!(
                "server changed protocol version from {previous} to {version}"
            )));
        }
        tracing::info!(
            role = %self.role,
            peer = %peer,
            version,
            extensions = self.session.extensions().len(),
            "Handshake complete"
        );

        Ok(Established {
            reader,
            writer,
            frames,
            leftover: bodies,
            child,
            peer,
        })
    }

    /// Starts the tasks for an established connection and makes it current.
    fn install(self: &Arc<Self>, established: Established) -> u64 {
        let Established {
            reader,
            writer,
            frames,
            leftover,
            child,
            peer,
        } = established;

        let mut state = self.state.lock();
        state.generation += 1;
        let generation = state.generation;

        let (outgoing, queue) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(
            Arc::downgrade(self),
            generation,
            reader,
            frames,
            leftover,
        ));
        let writer = tokio::spawn(write_loop(Arc::downgrade(self), generation, writer, queue));

        if let Some(old) = state.link.replace(Link {
            outgoing,
            reader,
            writer,
            child,
            peer,
        }) {
            old.shutdown();
        }
        state.status = LinkStatus::Up { generation };
        self.status.send_replace(state.status);
        generation
    }

    /// Handles the loss of connection `generation`.
    ///
    /// Only the first report for a generation acts; later ones (the other
    /// task noticing the same failure) are ignored.
    fn connection_failed(self: &Arc<Self>, generation: u64, reason: &str) {
        let (link, failed) = {
            let mut state = self.state.lock();
            if state.status != (LinkStatus::Up { generation }) {
                return;
            }
            state.status = LinkStatus::Reconnecting;
            self.status.send_replace(LinkStatus::Reconnecting);
            let failed = state
                .correlator
                .fail_all(|| TransportError::ConnectionLost.into());
            (state.link.take(), failed)
        };
        tracing::warn!(
            role = %self.role,
            generation,
            failed,
            reason,
            "Connection lost"
        );
        if let Some(link) = link {
            link.shutdown();
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.reconnect().await });
    }

    async fn reconnect(self: Arc<Self>) {
        let policy = &self.config.reconnect;
        for attempt in 1..=policy.max_attempts {
            let delay = policy.backoff(attempt);
            tracing::debug!(role = %self.role, attempt, delay = ?delay, "Scheduling reconnect");
            tokio::time::sleep(delay).await;
            match self.establish().await {
                Ok(established) => {
                    let generation = self.install(established);
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(role = %self.role, attempt, generation, "Reconnected");
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        role = %self.role,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Reconnect attempt failed"
                    );
                }
            }
        }

        let failed = {
            let mut state = self.state.lock();
            state.status = LinkStatus::Dead;
            self.status.send_replace(LinkStatus::Dead);
            state.correlator.fail_all(|| {
                TransportError::Fatal {
                    attempts: policy.max_attempts,
                }
                .into()
            })
        };
        tracing::error!(
            role = %self.role,
            attempts = policy.max_attempts,
            failed,
            "Transport is dead, giving up on reconnecting"
        );
    }

    /// Routes one received frame body to its waiter.
    fn dispatch(&self, generation: u64, body: &[u8]) {
        let (id, result) = match Packet::decode(body) {
            Ok(Packet::Response { id, response }) => (id, Ok(response)),
            Ok(other) => {
                tracing::warn!(
                    role = %self.role,
                    packet_type = ?other.packet_type(),
                    "Ignoring unexpected packet from server"
                );
                return;
            }
            Err(e) => match Packet::peek_request_id(body) {
                Some(id) => (id, Err(ClientError::from(e))),
                None => {
                    tracing::warn!(role = %self.role, error = %e, "Discarding undecodable frame");
                    return;
                }
            },
        };

        let delivered = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.correlator.deliver(id, result)
        };
        if !delivered {
            tracing::warn!(role = %self.role, id, "Discarding reply with no pending request");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state
            .correlator
            .fail_all(|| TransportError::ConnectionLost.into());
        if let Some(link) = state.link.take() {
            link.shutdown();
        }
    }
}

fn frame_error(err: FrameError) -> ClientError {
    match err {
        FrameError::TooLarge { .. } => ClientError::Resource(err.to_string()),
        FrameError::Empty => ClientError::Protocol(err.to_string()),
    }
}

async fn read_loop(
    inner: Weak<Inner>,
    generation: u64,
    mut reader: BoxReader,
    mut frames: FrameReader,
    mut bodies: Vec<Bytes>,
) {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let reason = loop {
        if !bodies.is_empty() {
            let Some(inner) = inner.upgrade() else { return };
            for body in bodies.drain(..) {
                tracing::trace!(generation, len = body.len(), "Received frame");
                inner.dispatch(generation, &body);
            }
        }
        match reader.read(&mut buf).await {
            Ok(0) => break "end of stream".to_string(),
            Ok(n) => {
                if let Err(e) = frames.feed(&buf[..n], &mut bodies) {
                    break frame_error(e).to_string();
                }
            }
            Err(e) => break format!("read failed: {e}"),
        }
    };
    if let Some(inner) = inner.upgrade() {
        inner.connection_failed(generation, &reason);
    }
}

async fn write_loop(
    inner: Weak<Inner>,
    generation: u64,
    mut writer: BoxWriter,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
) {
    let reason = 'outer: loop {
        let Some(frame) = queue.recv().await else {
            // Link shut down from the other side.
            return;
        };
        if let Err(e) = writer.write_all(&frame).await {
            break format!("write failed: {e}");
        }
        // Batch whatever else is queued before flushing.
        while let Ok(frame) = queue.try_recv() {
            if let Err(e) = writer.write_all(&frame).await {
                break 'outer format!("write failed: {e}");
            }
        }
        if let Err(e) = writer.flush().await {
            break format!("flush failed: {e}");
        }
    };
    if let Some(inner) = inner.upgrade() {
        inner.connection_failed(generation, &reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectPolicy;
    use crate::testing::MemoryServer;
    use sftpmount_proto::{FileAttributes, PacketType, StatusCode};
    use std::time::Duration;

    async fn channel(server: &MemoryServer, config: ClientConfig) -> Channel {
        Channel::connect(
            ChannelRole::Metadata,
            server.connector(),
            Arc::new(Session::new()),
            config,
        )
        .await
        .unwrap()
    }

    fn size_of(response: Response) -> u64 {
        match response {
            Response::Attrs(attrs) => attrs.size.unwrap(),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_runs_handshake() {
        let server = MemoryServer::new();
        let ch = channel(&server, ClientConfig::default()).await;
        assert_eq!(ch.status(), LinkStatus::Up { generation: 1 });
        assert_eq!(ch.inner.session.version(), Some(SFTP_VERSION));
        assert!(ch.inner.session.has_extension("posix-rename@openssh.com"));
        assert_eq!(server.count(PacketType::Init), 1);
    }

    #[tokio::test]
    async fn test_permuted_replies_reach_their_callers() {
        let server = MemoryServer::new();
        for i in 0..8u64 {
            server.add_file(&format!("/f{i}"), &vec![0u8; i as usize * 10]);
        }
        let ch = channel(&server, ClientConfig::default()).await;
        server.hold_replies(true);

        let mut calls = Vec::new();
        for i in 0..8u64 {
            let ch = ch.clone();
            calls.push(tokio::spawn(async move {
                let response = ch
                    .submit(Request::Lstat {
                        path: format!("/f{i}"),
                    })
                    .await
                    .unwrap();
                (i, size_of(response))
            }));
        }
        server.wait_for_held(8).await;
        server.release_held(&[5, 2, 7, 0, 3, 6, 1, 4]);

        for call in calls {
            let (i, size) = call.await.unwrap();
            assert_eq!(size, i * 10);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_fails_outstanding_then_recovers() {
        let server = MemoryServer::new();
        server.add_file("/a", b"abc");
        let ch = channel(&server, ClientConfig::default()).await;
        server.hold_replies(true);

        let mut calls = Vec::new();
        for _ in 0..4 {
            let ch = ch.clone();
            calls.push(tokio::spawn(async move {
                ch.submit(Request::Stat { path: "/a".into() }).await
            }));
        }
        server.wait_for_held(4).await;
        server.hold_replies(false);
        server.kill_connections();

        for call in calls {
            let err = call.await.unwrap().unwrap_err();
            assert!(err.is_connection_lost(), "{err:?}");
        }

        // The next call waits out the reconnect and succeeds.
        let response = ch.submit(Request::Stat { path: "/a".into() }).await.unwrap();
        assert_eq!(size_of(response), 3);
        assert_eq!(ch.generation(), 2);
        assert_eq!(ch.stats().reconnects, 1);
        assert_eq!(server.count(PacketType::Init), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reconnects_are_fatal() {
        let server = MemoryServer::new();
        let config = ClientConfig {
            reconnect: ReconnectPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_secs(1),
            },
            ..ClientConfig::default()
        };
        let ch = channel(&server, config).await;
        let mut status = ch.subscribe();

        server.refuse_connections(true);
        server.kill_connections();

        status
            .wait_for(|s| *s == LinkStatus::Dead)
            .await
            .unwrap();
        let err = ch
            .submit(Request::Stat { path: "/".into() })
            .await
            .unwrap_err();
        assert!(err.is_fatal(), "{err:?}");
        assert_eq!(err.to_errno(), libc::ENOTCONN);
        assert_eq!(server.connections_attempted(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_is_opt_in() {
        let server = MemoryServer::new();
        let config = ClientConfig {
            request_timeout: Some(Duration::from_secs(5)),
            ..ClientConfig::default()
        };
        let ch = channel(&server, config).await;
        server.hold_replies(true);

        let err = ch
            .submit(Request::Stat { path: "/".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { request: "stat", .. }));
        assert_eq!(ch.stats().outstanding, 0);

        // The late reply is dropped; the channel stays usable.
        server.hold_replies(false);
        server.release_all_held();
        let response = ch.submit(Request::Stat { path: "/".into() }).await.unwrap();
        assert!(matches!(response, Response::Attrs(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_from_previous_connection_is_refused() {
        let server = MemoryServer::new();
        server.add_file("/a", b"x");
        let ch = channel(&server, ClientConfig::default()).await;
        let handle = match ch
            .submit(Request::Open {
                path: "/a".into(),
                flags: sftpmount_proto::OpenFlags::READ,
                attrs: FileAttributes::empty(),
            })
            .await
            .unwrap()
        {
            Response::Handle(h) => h,
            other => panic!("unexpected {other:?}"),
        };
        let opened_on = ch.generation();
        let mut status = ch.subscribe();

        server.kill_connections();
        status
            .wait_for(|s| *s == LinkStatus::Up { generation: 2 })
            .await
            .unwrap();

        let err = ch
            .submit_on(
                Request::Read {
                    handle,
                    offset: 0,
                    len: 1,
                },
                opened_on,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::StaleHandle { handle: 1, current: 2 }));
        assert_eq!(err.to_errno(), libc::EBADF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_frame_tears_down_connection() {
        let server = MemoryServer::new();
        server.add_file("/big", &vec![1u8; 4096]);
        let config = ClientConfig {
            max_frame_len: 1024,
            ..ClientConfig::default()
        };
        let ch = channel(&server, config).await;
        let handle = match ch
            .submit(Request::Open {
                path: "/big".into(),
                flags: sftpmount_proto::OpenFlags::READ,
                attrs: FileAttributes::empty(),
            })
            .await
            .unwrap()
        {
            Response::Handle(h) => h,
            other => panic!("unexpected {other:?}"),
        };
        let err = ch
            .submit(Request::Read {
                handle,
                offset: 0,
                len: 4096,
            })
            .await
            .unwrap_err();
        assert!(err.is_connection_lost(), "{err:?}");
    }

    #[tokio::test]
    async fn test_remote_status_passes_through() {
        let server = MemoryServer::new();
        let ch = channel(&server, ClientConfig::default()).await;
        let response = ch
            .submit(Request::Lstat {
                path: "/missing".into(),
            })
            .await
            .unwrap();
        match response {
            Response::Status(status) => assert_eq!(status.code, StatusCode::NoSuchFile),
            other => panic!("unexpected {other:?}"),
        }
    }
}
