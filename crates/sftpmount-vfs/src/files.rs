//! File handles and data transfer.
//!
//! A node holds at most one remote read handle and one remote write handle,
//! each shared by every local opener of that direction and closed when the
//! last one releases it. A handle opened on a connection that has since
//! been replaced is reopened by path on first use.

use crate::error::{FsError, FsResult};
use crate::filesystem::SftpFs;
use crate::node::{Access, Node, NodeAttr, OpenMode, SharedHandle, synthesized_attrs, validate_name};
use bytes::{Bytes, BytesMut};
use futures::future::try_join_all;
use sftpmount_client::{ClientError, ClientResult, RemoteHandle};
use sftpmount_proto::{FileAttributes, FileKind, OpenFlags};
use tracing::{debug, trace, warn};

/// End of `len` bytes at `offset`, or an error if it overflows.
fn range_end(offset: u64, len: u64) -> FsResult<u64> {
    offset
        .checked_add(len)
        .ok_or(FsError::InvalidRange { offset, len })
}

/// Splits `len` bytes at `offset` into requests of at most `chunk` bytes.
///
/// The caller checks that `offset + len` fits.
fn chunk_ranges(offset: u64, len: u32, chunk: u32) -> Vec<(u64, u32)> {
    let mut ranges = Vec::new();
    let mut done = 0u32;
    while done < len {
        let size = chunk.min(len - done);
        ranges.push((offset + u64::from(done), size));
        done += size;
    }
    ranges
}

/// Drops one opener of `access`; returns the handle if it was the last.
fn release_slot(node: &mut Node, access: Access) -> Option<RemoteHandle> {
    let slot = node.files.slot_mut(access);
    let shared = slot.as_mut()?;
    shared.opens = shared.opens.saturating_sub(1);
    if shared.opens > 0 {
        return None;
    }
    slot.take().map(|shared| shared.handle)
}

fn single(access: Access) -> OpenMode {
    match access {
        Access::Read => OpenMode::ReadOnly,
        Access::Write => OpenMode::WriteOnly,
    }
}

impl SftpFs {
    /// Creates (or truncates) `parent/name` and opens it.
    ///
    /// With `exclusive`, fails if the name already exists.
    pub async fn create(
        &self,
        parent: u64,
        name: &str,
        mode: u32,
        open: OpenMode,
        exclusive: bool,
    ) -> FsResult<NodeAttr> {
        trace!(parent, name, mode, ?open, exclusive, "create");
        validate_name(name)?;
        let path = self.nodes.lock().child_path(parent, name)?;
        let mut flags = OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC;
        if exclusive {
            flags |= OpenFlags::EXCL;
        }
        let handle = self
            .client
            .open(&path, flags, FileAttributes::with_permissions(mode & 0o7777))
            .await?;
        let attrs = match self.client.fstat(&handle).await {
            Ok(attrs) => attrs,
            Err(e) => {
                debug!(path, error = %e, "Stat after create failed");
                synthesized_attrs(FileKind::Regular, mode)
            }
        };

        let attr = match self.install(parent, name, attrs) {
            Ok(attr) => attr,
            Err(e) => {
                self.close_handles(vec![handle]).await;
                return Err(e);
            }
        };
        let adopted = {
            let mut table = self.nodes.lock();
            table
                .node_mut(attr.ino)
                .map(|node| self.adopt(node, Access::Write, handle.clone()))
        };
        match adopted {
            Ok(extra) => self.close_handles(extra.into_iter().collect()).await,
            Err(e) => {
                self.close_handles(vec![handle]).await;
                return Err(e);
            }
        }

        if open.accesses().contains(&Access::Read)
            && let Err(e) = self.acquire(attr.ino, Access::Read, false).await
        {
            if let Err(release) = self.release(attr.ino, OpenMode::WriteOnly).await {
                warn!(inode = attr.ino, error = %release, "Failed to roll back create");
            }
            return Err(e);
        }
        Ok(attr)
    }

    /// Opens a file for the host, sharing remote handles between openers.
    pub async fn open(&self, ino: u64, mode: OpenMode, truncate: bool) -> FsResult<()> {
        trace!(inode = ino, ?mode, truncate, "open");
        let accesses = mode.accesses();
        for (done, &access) in accesses.iter().enumerate() {
            let trunc = truncate && access == Access::Write;
            if let Err(e) = self.acquire(ino, access, trunc).await {
                for &acquired in &accesses[..done] {
                    if let Err(release) = self.release(ino, single(acquired)).await {
                        warn!(inode = ino, error = %release, "Failed to roll back open");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Drops one opener per direction of `mode`. The remote handle is closed
    /// when its last opener goes.
    pub async fn release(&self, ino: u64, mode: OpenMode) -> FsResult<()> {
        trace!(inode = ino, ?mode, "release");
        let handles: Vec<RemoteHandle> = {
            let mut table = self.nodes.lock();
            let node = table.node_mut(ino)?;
            mode.accesses()
                .iter()
                .filter_map(|&access| release_slot(node, access))
                .collect()
        };
        let mut result = Ok(());
        for handle in handles {
            if let Err(e) = self.client.close(handle).await {
                warn!(inode = ino, error = %e, "Failed to close remote handle");
                result = Err(e.into());
            }
        }
        result
    }

    /// Takes one reference on the handle for `access`, opening it if needed.
    async fn acquire(&self, ino: u64, access: Access, truncate: bool) -> FsResult<()> {
        let path = {
            let mut table = self.nodes.lock();
            let node = table.node_mut(ino)?;
            if node.is_dir() {
                return Err(FsError::IsADirectory(ino));
            }
            if let Some(shared) = node.files.slot_mut(access).as_mut() {
                shared.opens += 1;
                None
            } else {
                Some(table.path_of(ino)?)
            }
        };
        let Some(path) = path else {
            if truncate {
                let changes = FileAttributes {
                    size: Some(0),
                    ..FileAttributes::default()
                };
                self.setattr(ino, changes).await?;
            }
            return Ok(());
        };

        let mut flags = access.open_flags();
        if truncate {
            flags |= OpenFlags::TRUNC;
        }
        let handle = self
            .client
            .open(&path, flags, FileAttributes::empty())
            .await?;
        let adopted = {
            let mut table = self.nodes.lock();
            table.node_mut(ino).map(|node| {
                if truncate {
                    node.attrs.size = Some(0);
                }
                self.adopt(node, access, handle.clone())
            })
        };
        match adopted {
            Ok(extra) => {
                self.close_handles(extra.into_iter().collect()).await;
                Ok(())
            }
            Err(e) => {
                self.close_handles(vec![handle]).await;
                Err(e)
            }
        }
    }

    /// Stores a newly opened handle as one more opener of `access`.
    ///
    /// Returns a handle that is no longer needed: the new one if a usable
    /// handle was already there, or the stale one it replaces.
    fn adopt(&self, node: &mut Node, access: Access, handle: RemoteHandle) -> Option<RemoteHandle> {
        let slot = node.files.slot_mut(access);
        if let Some(shared) = slot.as_mut() {
            shared.opens += 1;
            if self.client.is_current(&shared.handle) {
                return Some(handle);
            }
            return Some(std::mem::replace(&mut shared.handle, handle));
        }
        *slot = Some(SharedHandle { handle, opens: 1 });
        None
    }

    /// The handle for `access`, reopened by path if its connection is gone.
    async fn current_handle(&self, ino: u64, access: Access) -> FsResult<RemoteHandle> {
        let (stale, path) = {
            let table = self.nodes.lock();
            let node = table.node(ino)?;
            let shared = node.files.slot(access).ok_or(FsError::InvalidHandle(ino))?;
            if self.client.is_current(&shared.handle) {
                return Ok(shared.handle.clone());
            }
            (shared.handle.clone(), table.path_of(ino)?)
        };
        debug!(
            inode = ino,
            ?access,
            generation = stale.generation(),
            "Reopening handle from an earlier connection"
        );
        let fresh = self
            .client
            .open(&path, access.open_flags(), FileAttributes::empty())
            .await?;
        let outcome = {
            let mut table = self.nodes.lock();
            match table
                .get_mut(ino)
                .and_then(|node| node.files.slot_mut(access).as_mut())
            {
                Some(shared) => {
                    if shared.handle != stale && self.client.is_current(&shared.handle) {
                        // Another caller reopened it first.
                        Ok((shared.handle.clone(), Some(fresh)))
                    } else {
                        shared.handle = fresh.clone();
                        Ok((fresh, None))
                    }
                }
                None => Err(fresh),
            }
        };
        match outcome {
            Ok((handle, extra)) => {
                self.close_handles(extra.into_iter().collect()).await;
                Ok(handle)
            }
            Err(fresh) => {
                self.close_handles(vec![fresh]).await;
                Err(FsError::InvalidHandle(ino))
            }
        }
    }

    /// Reads up to `size` bytes at `offset`. Short at end of file.
    pub async fn read(&self, ino: u64, offset: u64, size: u32) -> FsResult<Bytes> {
        trace!(inode = ino, offset, size, "read");
        range_end(offset, u64::from(size))?;
        let mut retried = false;
        loop {
            let handle = self.current_handle(ino, Access::Read).await?;
            match self.read_chunks(&handle, offset, size).await {
                Err(ClientError::StaleHandle { .. }) if !retried => retried = true,
                result => return Ok(result?),
            }
        }
    }

    async fn read_chunks(&self, handle: &RemoteHandle, offset: u64, size: u32) -> ClientResult<Bytes> {
        let ranges = chunk_ranges(offset, size, self.config.max_read);
        let replies = try_join_all(
            ranges
                .iter()
                .map(|&(at, len)| self.client.read(handle, at, len)),
        )
        .await?;
        let mut out = BytesMut::with_capacity(size as usize);
        for (&(_, len), reply) in ranges.iter().zip(replies) {
            let Some(data) = reply else {
                break;
            };
            let short = data.len() < len as usize;
            out.extend_from_slice(&data);
            if short {
                break;
            }
        }
        Ok(out.freeze())
    }

    /// Writes `data` at `offset` and returns the number of bytes written.
    ///
    /// The cached size grows to cover the write.
    pub async fn write(&self, ino: u64, offset: u64, data: Bytes) -> FsResult<u32> {
        let len = u32::try_from(data.len())
            .map_err(|_| FsError::Client(ClientError::Resource("write too large".into())))?;
        trace!(inode = ino, offset, len, "write");
        let end = range_end(offset, u64::from(len))?;
        let mut retried = false;
        loop {
            let handle = self.current_handle(ino, Access::Write).await?;
            match self.write_chunks(&handle, offset, &data).await {
                Err(ClientError::StaleHandle { .. }) if !retried => retried = true,
                result => {
                    result?;
                    break;
                }
            }
        }
        if let Some(node) = self.nodes.lock().get_mut(ino) {
            node.attrs.size = Some(node.attrs.size.unwrap_or(0).max(end));
        }
        Ok(len)
    }

    #[allow(clippy::cast_possible_truncation)]
    async fn write_chunks(&self, handle: &RemoteHandle, offset: u64, data: &Bytes) -> ClientResult<()> {
        let ranges = chunk_ranges(offset, data.len() as u32, self.config.max_write);
        try_join_all(ranges.iter().map(|&(at, len)| {
            let start = (at - offset) as usize;
            let chunk = data.slice(start..start + len as usize);
            self.client.write(handle, at, chunk)
        }))
        .await?;
        Ok(())
    }
}
