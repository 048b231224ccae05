//! File attribute records.
//!
//! On the wire an attribute record is a `flags:u32` word followed by only
//! the fields whose presence bit is set:
//!
//! | Flag | Fields |
//! |------|--------|
//! | `SIZE` | `size:u64` |
//! | `UIDGID` | `uid:u32, gid:u32` |
//! | `PERMISSIONS` | `permissions:u32` |
//! | `ACMODTIME` | `atime:u32, mtime:u32` |
//! | `EXTENDED` | `count:u32`, then `count` × (`type:string`, `data:string`) |
//!
//! A field that is absent from the flag word decodes as `None`.

use crate::codec::{WireReader, WireWriter};
use crate::error::DecodeResult;
use bitflags::bitflags;
use bytes::{BufMut, Bytes};

bitflags! {
    /// Presence bits of an attribute record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AttrFlags: u32 {
        const SIZE = 0x0000_0001;
        const UIDGID = 0x0000_0002;
        const PERMISSIONS = 0x0000_0004;
        const ACMODTIME = 0x0000_0008;
        const EXTENDED = 0x8000_0000;
    }
}

/// File type bits within `permissions` (POSIX `S_IFMT`).
const S_IFMT: u32 = 0o170_000;
const S_IFSOCK: u32 = 0o140_000;
const S_IFLNK: u32 = 0o120_000;
const S_IFREG: u32 = 0o100_000;
const S_IFBLK: u32 = 0o060_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFCHR: u32 = 0o020_000;
const S_IFIFO: u32 = 0o010_000;

/// Kind of a remote filesystem object, derived from its permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl FileKind {
    /// Extracts the kind from a `st_mode`-style value.
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG => Some(FileKind::Regular),
            S_IFDIR => Some(FileKind::Directory),
            S_IFLNK => Some(FileKind::Symlink),
            S_IFCHR => Some(FileKind::CharDevice),
            S_IFBLK => Some(FileKind::BlockDevice),
            S_IFIFO => Some(FileKind::Fifo),
            S_IFSOCK => Some(FileKind::Socket),
            _ => None,
        }
    }

    /// Returns the `S_IFMT` bits for this kind.
    pub fn mode_bits(self) -> u32 {
        match self {
            FileKind::Regular => S_IFREG,
            FileKind::Directory => S_IFDIR,
            FileKind::Symlink => S_IFLNK,
            FileKind::CharDevice => S_IFCHR,
            FileKind::BlockDevice => S_IFBLK,
            FileKind::Fifo => S_IFIFO,
            FileKind::Socket => S_IFSOCK,
        }
    }
}

/// Owner and group, which always travel together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

/// Access and modification time, seconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileTimes {
    pub atime: u32,
    pub mtime: u32,
}

/// An attribute record. `None` means "not reported".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    pub size: Option<u64>,
    pub owner: Option<Ownership>,
    pub permissions: Option<u32>,
    pub times: Option<FileTimes>,
    /// Vendor extensions as (type, data) pairs, kept in wire order.
    pub extended: Vec<(String, Bytes)>,
}

impl FileAttributes {
    /// An empty record: encodes as a bare zero flag word.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Record carrying only permission bits, as sent by mkdir/open-create.
    pub fn with_permissions(permissions: u32) -> Self {
        Self {
            permissions: Some(permissions),
            ..Self::default()
        }
    }

    /// The flag word describing which fields are present.
    pub fn flags(&self) -> AttrFlags {
        let mut flags = AttrFlags::empty();
        flags.set(AttrFlags::SIZE, self.size.is_some());
        flags.set(AttrFlags::UIDGID, self.owner.is_some());
        flags.set(AttrFlags::PERMISSIONS, self.permissions.is_some());
        flags.set(AttrFlags::ACMODTIME, self.times.is_some());
        flags.set(AttrFlags::EXTENDED, !self.extended.is_empty());
        flags
    }

    /// File kind, if permissions were reported.
    pub fn kind(&self) -> Option<FileKind> {
        self.permissions.and_then(FileKind::from_mode)
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == Some(FileKind::Directory)
    }

    pub fn mtime(&self) -> Option<u32> {
        self.times.map(|t| t.mtime)
    }

    /// Overwrites fields present in `other`, keeping the rest.
    pub fn merge_from(&mut self, other: &FileAttributes) {
        if other.size.is_some() {
            self.size = other.size;
        }
        if other.owner.is_some() {
            self.owner = other.owner;
        }
        if let Some(perm) = other.permissions {
            // A setattr carries only the permission bits; keep the type bits.
            let type_bits = match (perm & S_IFMT, self.permissions) {
                (0, Some(old)) => old & S_IFMT,
                _ => 0,
            };
            self.permissions = Some(perm | type_bits);
        }
        if other.times.is_some() {
            self.times = other.times;
        }
        if !other.extended.is_empty() {
            self.extended.clone_from(&other.extended);
        }
    }

    /// Appends the wire form of this record.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.flags().bits());
        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let Some(owner) = self.owner {
            buf.put_u32(owner.uid);
            buf.put_u32(owner.gid);
        }
        if let Some(perm) = self.permissions {
            buf.put_u32(perm);
        }
        if let Some(times) = self.times {
            buf.put_u32(times.atime);
            buf.put_u32(times.mtime);
        }
        if !self.extended.is_empty() {
            #[allow(clippy::cast_possible_truncation)]
            buf.put_u32(self.extended.len() as u32);
            for (kind, data) in &self.extended {
                buf.put_wire_str(kind);
                buf.put_wire_bytes(data);
            }
        }
    }

    /// Decodes a record from the cursor.
    ///
    /// Unknown flag bits are ignored: there is no way to know how many bytes
    /// they would occupy, and servers only send bits the client asked for.
    pub fn decode(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        let flags = AttrFlags::from_bits_truncate(r.read_u32()?);
        let mut attrs = FileAttributes::default();
        if flags.contains(AttrFlags::SIZE) {
            attrs.size = Some(r.read_u64()?);
        }
        if flags.contains(AttrFlags::UIDGID) {
            attrs.owner = Some(Ownership {
                uid: r.read_u32()?,
                gid: r.read_u32()?,
            });
        }
        if flags.contains(AttrFlags::PERMISSIONS) {
            attrs.permissions = Some(r.read_u32()?);
        }
        if flags.contains(AttrFlags::ACMODTIME) {
            attrs.times = Some(FileTimes {
                atime: r.read_u32()?,
                mtime: r.read_u32()?,
            });
        }
        if flags.contains(AttrFlags::EXTENDED) {
            let count = r.read_u32()?;
            for _ in 0..count {
                let kind = r.read_string()?;
                let data = r.read_bytes()?;
                attrs.extended.push((kind, data));
            }
        }
        Ok(attrs)
    }
}
