//! Typed request API over one or two channels.

use crate::channel::{Channel, ChannelRole, ChannelStats, LinkStatus};
use crate::config::{ChannelMode, ClientConfig, SymlinkOrder};
use crate::connector::Connector;
use crate::error::{ClientError, ClientResult};
use crate::session::Session;
use bytes::Bytes;
use sftpmount_proto::{FileAttributes, Handle, NameEntry, OpenFlags, Request, Response};
use std::sync::Arc;

/// A server handle together with the connection it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHandle {
    handle: Handle,
    role: ChannelRole,
    generation: u64,
}

impl RemoteHandle {
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn role(&self) -> ChannelRole {
        self.role
    }

    /// Connection generation the handle was opened on.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Counters for every channel of a client.
#[derive(Debug, Clone)]
pub struct ClientStats {
    pub channels: Vec<ChannelStats>,
}

impl ClientStats {
    pub fn outstanding(&self) -> usize {
        self.channels.iter().map(|c| c.outstanding).sum()
    }

    pub fn reconnects(&self) -> u64 {
        self.channels.iter().map(|c| c.reconnects).sum()
    }
}

/// SFTP client. Cheap to clone; clones share the channels.
#[derive(Debug, Clone)]
pub struct Client {
    session: Arc<Session>,
    config: ClientConfig,
    meta: Channel,
    data: Option<Channel>,
}

impl Client {
    /// Connects every channel the configuration asks for.
    pub async fn connect(connector: Arc<dyn Connector>, config: ClientConfig) -> ClientResult<Self> {
        let session = Arc::new(Session::new());
        let meta = Channel::connect(
            ChannelRole::Metadata,
            Arc::clone(&connector),
            Arc::clone(&session),
            config.clone(),
        )
        .await?;
        let data = match config.channels {
            ChannelMode::One => None,
            ChannelMode::Two => Some(
                Channel::connect(
                    ChannelRole::Data,
                    connector,
                    Arc::clone(&session),
                    config.clone(),
                )
                .await?,
            ),
        };
        Ok(Self {
            session,
            config,
            meta,
            data,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn channel(&self, role: ChannelRole) -> &Channel {
        match role {
            ChannelRole::Metadata => &self.meta,
            ChannelRole::Data => self.data.as_ref().unwrap_or(&self.meta),
        }
    }

    /// True if `handle` is still valid on its connection.
    pub fn is_current(&self, handle: &RemoteHandle) -> bool {
        self.channel(handle.role).status()
            == LinkStatus::Up {
                generation: handle.generation,
            }
    }

    /// True once any channel has given up reconnecting.
    pub fn is_dead(&self) -> bool {
        self.meta.is_dead() || self.data.as_ref().is_some_and(Channel::is_dead)
    }

    /// Resolves once any channel is dead.
    pub async fn dead(&self) {
        let wait = |channel: &Channel| {
            let mut rx = channel.subscribe();
            async move {
                let _ = rx.wait_for(|s| *s == LinkStatus::Dead).await;
            }
        };
        match &self.data {
            None => wait(&self.meta).await,
            Some(data) => {
                tokio::select! {
                    () = wait(&self.meta) => {}
                    () = wait(data) => {}
                }
            }
        }
    }

    pub fn stats(&self) -> ClientStats {
        let mut channels = vec![self.meta.stats()];
        if let Some(data) = &self.data {
            channels.push(data.stats());
        }
        ClientStats { channels }
    }

    async fn call(&self, role: ChannelRole, request: Request) -> ClientResult<Response> {
        let kind = request.name();
        let response = self.channel(role).submit(request).await;
        if let Err(e) = &response {
            tracing::debug!(request = kind, error = %e, "Request failed");
        }
        response
    }

    async fn call_handle(&self, handle: &RemoteHandle, request: Request) -> ClientResult<Response> {
        self.channel(handle.role)
            .submit_on(request, handle.generation)
            .await
    }

    async fn open_handle(&self, role: ChannelRole, request: Request) -> ClientResult<RemoteHandle> {
        let (response, generation) = self.channel(role).submit_tagged(request).await?;
        let handle = expect_handle(response)?;
        Ok(RemoteHandle {
            handle,
            role,
            generation,
        })
    }

    pub async fn stat(&self, path: &str) -> ClientResult<FileAttributes> {
        let response = self
            .call(ChannelRole::Metadata, Request::Stat { path: path.into() })
            .await?;
        expect_attrs(response)
    }

    pub async fn lstat(&self, path: &str) -> ClientResult<FileAttributes> {
        let response = self
            .call(ChannelRole::Metadata, Request::Lstat { path: path.into() })
            .await?;
        expect_attrs(response)
    }

    pub async fn fstat(&self, handle: &RemoteHandle) -> ClientResult<FileAttributes> {
        let response = self
            .call_handle(
                handle,
                Request::Fstat {
                    handle: handle.handle.clone(),
                },
            )
            .await?;
        expect_attrs(response)
    }

    pub async fn setstat(&self, path: &str, attrs: FileAttributes) -> ClientResult<()> {
        let response = self
            .call(
                ChannelRole::Metadata,
                Request::Setstat {
                    path: path.into(),
                    attrs,
                },
            )
            .await?;
        expect_ok(response)
    }

    pub async fn fsetstat(&self, handle: &RemoteHandle, attrs: FileAttributes) -> ClientResult<()> {
        let response = self
            .call_handle(
                handle,
                Request::Fsetstat {
                    handle: handle.handle.clone(),
                    attrs,
                },
            )
            .await?;
        expect_ok(response)
    }

    /// Opens a file. File handles live on the data channel when there is one.
    pub async fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: FileAttributes,
    ) -> ClientResult<RemoteHandle> {
        self.open_handle(
            ChannelRole::Data,
            Request::Open {
                path: path.into(),
                flags,
                attrs,
            },
        )
        .await
    }

    pub async fn opendir(&self, path: &str) -> ClientResult<RemoteHandle> {
        self.open_handle(ChannelRole::Metadata, Request::Opendir { path: path.into() })
            .await
    }

    /// Closes a handle. A handle whose connection is gone was closed with it,
    /// so that case succeeds without a round trip.
    pub async fn close(&self, handle: RemoteHandle) -> ClientResult<()> {
        let response = self
            .call_handle(
                &handle,
                Request::Close {
                    handle: handle.handle.clone(),
                },
            )
            .await;
        match response {
            Ok(response) => expect_ok(response),
            Err(ClientError::StaleHandle { .. }) => {
                tracing::trace!(generation = handle.generation, "Skipping close of stale handle");
                Ok(())
            }
            Err(e) if e.is_connection_lost() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Reads up to `len` bytes. `None` at end of file.
    pub async fn read(
        &self,
        handle: &RemoteHandle,
        offset: u64,
        len: u32,
    ) -> ClientResult<Option<Bytes>> {
        let response = self
            .call_handle(
                handle,
                Request::Read {
                    handle: handle.handle.clone(),
                    offset,
                    len,
                },
            )
            .await?;
        match response {
            Response::Data(data) => Ok(Some(data)),
            Response::Status(status) if status.is_eof() => Ok(None),
            other => Err(unexpected("read", other)),
        }
    }

    pub async fn write(&self, handle: &RemoteHandle, offset: u64, data: Bytes) -> ClientResult<()> {
        let response = self
            .call_handle(
                handle,
                Request::Write {
                    handle: handle.handle.clone(),
                    offset,
                    data,
                },
            )
            .await?;
        expect_ok(response)
    }

    /// Next batch of directory entries. `None` once the listing is exhausted.
    pub async fn readdir(&self, handle: &RemoteHandle) -> ClientResult<Option<Vec<NameEntry>>> {
        let response = self
            .call_handle(
                handle,
                Request::Readdir {
                    handle: handle.handle.clone(),
                },
            )
            .await?;
        match response {
            Response::Name(entries) => Ok(Some(entries)),
            Response::Status(status) if status.is_eof() => Ok(None),
            other => Err(unexpected("readdir", other)),
        }
    }

    pub async fn remove(&self, path: &str) -> ClientResult<()> {
        let response = self
            .call(ChannelRole::Metadata, Request::Remove { path: path.into() })
            .await?;
        expect_ok(response)
    }

    pub async fn mkdir(&self, path: &str, attrs: FileAttributes) -> ClientResult<()> {
        let response = self
            .call(
                ChannelRole::Metadata,
                Request::Mkdir {
                    path: path.into(),
                    attrs,
                },
            )
            .await?;
        expect_ok(response)
    }

    pub async fn rmdir(&self, path: &str) -> ClientResult<()> {
        let response = self
            .call(ChannelRole::Metadata, Request::Rmdir { path: path.into() })
            .await?;
        expect_ok(response)
    }

    pub async fn rename(&self, from: &str, to: &str) -> ClientResult<()> {
        let response = self
            .call(
                ChannelRole::Metadata,
                Request::Rename {
                    from: from.into(),
                    to: to.into(),
                },
            )
            .await?;
        expect_ok(response)
    }

    pub async fn readlink(&self, path: &str) -> ClientResult<String> {
        let response = self
            .call(ChannelRole::Metadata, Request::Readlink { path: path.into() })
            .await?;
        Ok(expect_single_name("readlink", response)?.filename)
    }

    /// Creates `linkpath` pointing at `target`.
    pub async fn symlink(&self, target: &str, linkpath: &str) -> ClientResult<()> {
        let (first, second) = match self.config.symlink_order {
            SymlinkOrder::OpenSsh => (target, linkpath),
            SymlinkOrder::Draft => (linkpath, target),
        };
        let response = self
            .call(
                ChannelRole::Metadata,
                Request::Symlink {
                    first: first.into(),
                    second: second.into(),
                },
            )
            .await?;
        expect_ok(response)
    }

    /// Canonicalizes a path on the server.
    pub async fn realpath(&self, path: &str) -> ClientResult<String> {
        let response = self
            .call(ChannelRole::Metadata, Request::Realpath { path: path.into() })
            .await?;
        Ok(expect_single_name("realpath", response)?.filename)
    }
}

fn unexpected(request: &str, response: Response) -> ClientError {
    match response {
        Response::Status(status) if !status.is_ok() && !status.is_eof() => {
            ClientError::from_status(status)
        }
        other => ClientError::Protocol(format!(
            "unexpected {:?} reply to {request}",
            other.packet_type()
        )),
    }
}

fn expect_ok(response: Response) -> ClientResult<()> {
    match response {
        Response::Status(status) if status.is_ok() => Ok(()),
        other => Err(unexpected("request", other)),
    }
}

fn expect_handle(response: Response) -> ClientResult<Handle> {
    match response {
        Response::Handle(handle) => Ok(handle),
        other => Err(unexpected("open", other)),
    }
}

fn expect_attrs(response: Response) -> ClientResult<FileAttributes> {
    match response {
        Response::Attrs(attrs) => Ok(attrs),
        other => Err(unexpected("stat", other)),
    }
}

fn expect_single_name(request: &str, response: Response) -> ClientResult<NameEntry> {
    match response {
        Response::Name(entries) => entries
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Protocol(format!("empty NAME reply to {request}"))),
        other => Err(unexpected(request, other)),
    }
}
