//! Packets: the typed form of one frame.
//!
//! Decoding is a single dispatch on the type byte into [`Packet`], whose
//! variants make shapes the protocol does not allow unrepresentable: a
//! request never carries a response payload, and only the handshake lacks a
//! request id.

use crate::attrs::FileAttributes;
use crate::codec::{WireReader, WireWriter};
use crate::error::{DecodeError, DecodeResult};
use crate::status::{Status, StatusCode};
use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Protocol version spoken by this crate.
pub const SFTP_VERSION: u32 = 3;

/// Size of the big-endian length prefix of every frame.
pub const LENGTH_PREFIX: usize = 4;

/// Packet type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Init = 1,
    Version = 2,
    Open = 3,
    Close = 4,
    Read = 5,
    Write = 6,
    Lstat = 7,
    Fstat = 8,
    Setstat = 9,
    Fsetstat = 10,
    Opendir = 11,
    Readdir = 12,
    Remove = 13,
    Mkdir = 14,
    Rmdir = 15,
    Realpath = 16,
    Stat = 17,
    Rename = 18,
    Readlink = 19,
    Symlink = 20,
    Status = 101,
    Handle = 102,
    Data = 103,
    Name = 104,
    Attrs = 105,
    Extended = 200,
    ExtendedReply = 201,
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => PacketType::Init,
            2 => PacketType::Version,
            3 => PacketType::Open,
            4 => PacketType::Close,
            5 => PacketType::Read,
            6 => PacketType::Write,
            7 => PacketType::Lstat,
            8 => PacketType::Fstat,
            9 => PacketType::Setstat,
            10 => PacketType::Fsetstat,
            11 => PacketType::Opendir,
            12 => PacketType::Readdir,
            13 => PacketType::Remove,
            14 => PacketType::Mkdir,
            15 => PacketType::Rmdir,
            16 => PacketType::Realpath,
            17 => PacketType::Stat,
            18 => PacketType::Rename,
            19 => PacketType::Readlink,
            20 => PacketType::Symlink,
            101 => PacketType::Status,
            102 => PacketType::Handle,
            103 => PacketType::Data,
            104 => PacketType::Name,
            105 => PacketType::Attrs,
            200 => PacketType::Extended,
            201 => PacketType::ExtendedReply,
            other => return Err(DecodeError::UnknownType(other)),
        })
    }
}

bitflags! {
    /// Flags of an `OPEN` request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u32 {
        const READ = 0x0000_0001;
        const WRITE = 0x0000_0002;
        const APPEND = 0x0000_0004;
        const CREAT = 0x0000_0008;
        const TRUNC = 0x0000_0010;
        const EXCL = 0x0000_0020;
    }
}

/// Opaque server-issued handle for an open file or directory.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Handle(pub Bytes);

impl Handle {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle(")?;
        for b in self.0.iter() {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

impl From<&[u8]> for Handle {
    fn from(value: &[u8]) -> Self {
        Handle(Bytes::copy_from_slice(value))
    }
}

/// A protocol extension announced in the handshake: (name, data).
pub type Extension = (String, String);

/// One row of a `NAME` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    pub filename: String,
    /// `ls -l` style rendering; informational only.
    pub longname: String,
    pub attrs: FileAttributes,
}

/// Client-to-server requests (everything that carries a request id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Open {
        path: String,
        flags: OpenFlags,
        attrs: FileAttributes,
    },
    Close {
        handle: Handle,
    },
    Read {
        handle: Handle,
        offset: u64,
        len: u32,
    },
    Write {
        handle: Handle,
        offset: u64,
        data: Bytes,
    },
    Lstat {
        path: String,
    },
    Fstat {
        handle: Handle,
    },
    Setstat {
        path: String,
        attrs: FileAttributes,
    },
    Fsetstat {
        handle: Handle,
        attrs: FileAttributes,
    },
    Opendir {
        path: String,
    },
    Readdir {
        handle: Handle,
    },
    Remove {
        path: String,
    },
    Mkdir {
        path: String,
        attrs: FileAttributes,
    },
    Rmdir {
        path: String,
    },
    Realpath {
        path: String,
    },
    Stat {
        path: String,
    },
    Rename {
        from: String,
        to: String,
    },
    Readlink {
        path: String,
    },
    /// Arguments in wire order. Servers disagree on which comes first; the
    /// caller decides.
    Symlink {
        first: String,
        second: String,
    },
    Extended {
        name: String,
        data: Bytes,
    },
}

impl Request {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Request::Open { .. } => PacketType::Open,
            Request::Close { .. } => PacketType::Close,
            Request::Read { .. } => PacketType::Read,
            Request::Write { .. } => PacketType::Write,
            Request::Lstat { .. } => PacketType::Lstat,
            Request::Fstat { .. } => PacketType::Fstat,
            Request::Setstat { .. } => PacketType::Setstat,
            Request::Fsetstat { .. } => PacketType::Fsetstat,
            Request::Opendir { .. } => PacketType::Opendir,
            Request::Readdir { .. } => PacketType::Readdir,
            Request::Remove { .. } => PacketType::Remove,
            Request::Mkdir { .. } => PacketType::Mkdir,
            Request::Rmdir { .. } => PacketType::Rmdir,
            Request::Realpath { .. } => PacketType::Realpath,
            Request::Stat { .. } => PacketType::Stat,
            Request::Rename { .. } => PacketType::Rename,
            Request::Readlink { .. } => PacketType::Readlink,
            Request::Symlink { .. } => PacketType::Symlink,
            Request::Extended { .. } => PacketType::Extended,
        }
    }

    /// Short lowercase name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Open { .. } => "open",
            Request::Close { .. } => "close",
            Request::Read { .. } => "read",
            Request::Write { .. } => "write",
            Request::Lstat { .. } => "lstat",
            Request::Fstat { .. } => "fstat",
            Request::Setstat { .. } => "setstat",
            Request::Fsetstat { .. } => "fsetstat",
            Request::Opendir { .. } => "opendir",
            Request::Readdir { .. } => "readdir",
            Request::Remove { .. } => "remove",
            Request::Mkdir { .. } => "mkdir",
            Request::Rmdir { .. } => "rmdir",
            Request::Realpath { .. } => "realpath",
            Request::Stat { .. } => "stat",
            Request::Rename { .. } => "rename",
            Request::Readlink { .. } => "readlink",
            Request::Symlink { .. } => "symlink",
            Request::Extended { .. } => "extended",
        }
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Request::Open { path, flags, attrs } => {
                buf.put_wire_str(path);
                buf.put_u32(flags.bits());
                attrs.encode(buf);
            }
            Request::Close { handle }
            | Request::Fstat { handle }
            | Request::Readdir { handle } => buf.put_wire_bytes(handle.as_bytes()),
            Request::Read {
                handle,
                offset,
                len,
            } => {
                buf.put_wire_bytes(handle.as_bytes());
                buf.put_u64(*offset);
                buf.put_u32(*len);
            }
            Request::Write {
                handle,
                offset,
                data,
            } => {
                buf.put_wire_bytes(handle.as_bytes());
                buf.put_u64(*offset);
                buf.put_wire_bytes(data);
            }
            Request::Lstat { path }
            | Request::Opendir { path }
            | Request::Remove { path }
            | Request::Rmdir { path }
            | Request::Realpath { path }
            | Request::Stat { path }
            | Request::Readlink { path } => buf.put_wire_str(path),
            Request::Setstat { path, attrs } | Request::Mkdir { path, attrs } => {
                buf.put_wire_str(path);
                attrs.encode(buf);
            }
            Request::Fsetstat { handle, attrs } => {
                buf.put_wire_bytes(handle.as_bytes());
                attrs.encode(buf);
            }
            Request::Rename { from, to } => {
                buf.put_wire_str(from);
                buf.put_wire_str(to);
            }
            Request::Symlink { first, second } => {
                buf.put_wire_str(first);
                buf.put_wire_str(second);
            }
            Request::Extended { name, data } => {
                buf.put_wire_str(name);
                buf.put_slice(data);
            }
        }
    }

    fn decode_payload(ty: PacketType, r: &mut WireReader<'_>) -> DecodeResult<Self> {
        let handle = |r: &mut WireReader<'_>| r.read_bytes().map(Handle);
        Ok(match ty {
            PacketType::Open => Request::Open {
                path: r.read_string()?,
                flags: OpenFlags::from_bits_retain(r.read_u32()?),
                attrs: FileAttributes::decode(r)?,
            },
            PacketType::Close => Request::Close { handle: handle(r)? },
            PacketType::Read => Request::Read {
                handle: handle(r)?,
                offset: r.read_u64()?,
                len: r.read_u32()?,
            },
            PacketType::Write => Request::Write {
                handle: handle(r)?,
                offset: r.read_u64()?,
                data: r.read_bytes()?,
            },
            PacketType::Lstat => Request::Lstat {
                path: r.read_string()?,
            },
            PacketType::Fstat => Request::Fstat { handle: handle(r)? },
            PacketType::Setstat => Request::Setstat {
                path: r.read_string()?,
                attrs: FileAttributes::decode(r)?,
            },
            PacketType::Fsetstat => Request::Fsetstat {
                handle: handle(r)?,
                attrs: FileAttributes::decode(r)?,
            },
            PacketType::Opendir => Request::Opendir {
                path: r.read_string()?,
            },
            PacketType::Readdir => Request::Readdir { handle: handle(r)? },
            PacketType::Remove => Request::Remove {
                path: r.read_string()?,
            },
            PacketType::Mkdir => Request::Mkdir {
                path: r.read_string()?,
                attrs: FileAttributes::decode(r)?,
            },
            PacketType::Rmdir => Request::Rmdir {
                path: r.read_string()?,
            },
            PacketType::Realpath => Request::Realpath {
                path: r.read_string()?,
            },
            PacketType::Stat => Request::Stat {
                path: r.read_string()?,
            },
            PacketType::Rename => Request::Rename {
                from: r.read_string()?,
                to: r.read_string()?,
            },
            PacketType::Readlink => Request::Readlink {
                path: r.read_string()?,
            },
            PacketType::Symlink => Request::Symlink {
                first: r.read_string()?,
                second: r.read_string()?,
            },
            PacketType::Extended => Request::Extended {
                name: r.read_string()?,
                data: r.read_rest(),
            },
            other => {
                return Err(DecodeError::Malformed(format!(
                    "{other:?} is not a request type"
                )));
            }
        })
    }
}

/// Server-to-client responses (everything that carries a request id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Status(Status),
    Handle(Handle),
    Data(Bytes),
    Name(Vec<NameEntry>),
    Attrs(FileAttributes),
    ExtendedReply(Bytes),
}

impl Response {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Response::Status(_) => PacketType::Status,
            Response::Handle(_) => PacketType::Handle,
            Response::Data(_) => PacketType::Data,
            Response::Name(_) => PacketType::Name,
            Response::Attrs(_) => PacketType::Attrs,
            Response::ExtendedReply(_) => PacketType::ExtendedReply,
        }
    }

    /// Convenience constructor for a status response.
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        Response::Status(Status::new(code, message))
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Response::Status(status) => {
                buf.put_u32(status.code.as_u32());
                buf.put_wire_str(&status.message);
                buf.put_wire_str(&status.language);
            }
            Response::Handle(handle) => buf.put_wire_bytes(handle.as_bytes()),
            Response::Data(data) => buf.put_wire_bytes(data),
            Response::Name(entries) => {
                #[allow(clippy::cast_possible_truncation)]
                buf.put_u32(entries.len() as u32);
                for entry in entries {
                    buf.put_wire_str(&entry.filename);
                    buf.put_wire_str(&entry.longname);
                    entry.attrs.encode(buf);
                }
            }
            Response::Attrs(attrs) => attrs.encode(buf),
            Response::ExtendedReply(data) => buf.put_slice(data),
        }
    }

    fn decode_payload(ty: PacketType, r: &mut WireReader<'_>) -> DecodeResult<Self> {
        Ok(match ty {
            PacketType::Status => {
                let code = StatusCode::from_u32(r.read_u32()?);
                // Some servers omit the message and language tag entirely.
                let message = if r.remaining() > 0 {
                    r.read_string()?
                } else {
                    String::new()
                };
                let language = if r.remaining() > 0 {
                    r.read_string()?
                } else {
                    String::new()
                };
                Response::Status(Status {
                    code,
                    message,
                    language,
                })
            }
            PacketType::Handle => Response::Handle(Handle(r.read_bytes()?)),
            PacketType::Data => Response::Data(r.read_bytes()?),
            PacketType::Name => {
                let count = r.read_u32()?;
                // Each entry needs at least 12 bytes; reject absurd counts
                // before allocating for them.
                if count as usize > r.remaining() / 12 {
                    return Err(DecodeError::Malformed(format!(
                        "name count {count} exceeds payload"
                    )));
                }
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    entries.push(NameEntry {
                        filename: r.read_string()?,
                        longname: r.read_string()?,
                        attrs: FileAttributes::decode(r)?,
                    });
                }
                Response::Name(entries)
            }
            PacketType::Attrs => Response::Attrs(FileAttributes::decode(r)?),
            PacketType::ExtendedReply => Response::ExtendedReply(r.read_rest()),
            other => {
                return Err(DecodeError::Malformed(format!(
                    "{other:?} is not a response type"
                )));
            }
        })
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Client handshake. No request id.
    Init {
        version: u32,
        extensions: Vec<Extension>,
    },
    /// Server handshake reply. No request id.
    Version {
        version: u32,
        extensions: Vec<Extension>,
    },
    Request {
        id: u32,
        request: Request,
    },
    Response {
        id: u32,
        response: Response,
    },
}

impl Packet {
    pub fn init() -> Self {
        Packet::Init {
            version: SFTP_VERSION,
            extensions: Vec::new(),
        }
    }

    pub fn request(id: u32, request: Request) -> Self {
        Packet::Request { id, request }
    }

    pub fn response(id: u32, response: Response) -> Self {
        Packet::Response { id, response }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Init { .. } => PacketType::Init,
            Packet::Version { .. } => PacketType::Version,
            Packet::Request { request, .. } => request.packet_type(),
            Packet::Response { response, .. } => response.packet_type(),
        }
    }

    /// The request id, absent only for the handshake.
    pub fn request_id(&self) -> Option<u32> {
        match self {
            Packet::Init { .. } | Packet::Version { .. } => None,
            Packet::Request { id, .. } | Packet::Response { id, .. } => Some(*id),
        }
    }

    /// Appends the body (type byte onwards, no length prefix).
    pub fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u8(self.packet_type() as u8);
        match self {
            Packet::Init {
                version,
                extensions,
            }
            | Packet::Version {
                version,
                extensions,
            } => {
                buf.put_u32(*version);
                for (name, data) in extensions {
                    buf.put_wire_str(name);
                    buf.put_wire_str(data);
                }
            }
            Packet::Request { id, request } => {
                buf.put_u32(*id);
                request.encode_payload(buf);
            }
            Packet::Response { id, response } => {
                buf.put_u32(*id);
                response.encode_payload(buf);
            }
        }
    }

    /// Encodes a complete frame.
    ///
    /// The length prefix is reserved first and filled in once the body size
    /// is known.
    pub fn to_frame(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u32(0);
        self.encode_body(&mut buf);
        #[allow(clippy::cast_possible_truncation)]
        let body_len = (buf.len() - LENGTH_PREFIX) as u32;
        buf[..LENGTH_PREFIX].copy_from_slice(&body_len.to_be_bytes());
        buf.freeze()
    }

    /// Decodes one complete body (without the length prefix).
    ///
    /// The body is known to be whole, so a field running off its end is
    /// reported as malformed rather than incomplete.
    pub fn decode(body: &[u8]) -> DecodeResult<Self> {
        let mut r = WireReader::new(body);
        let ty = PacketType::try_from(r.read_u8().map_err(|e| e.into_malformed("type"))?)?;
        let packet = Self::decode_typed(ty, &mut r).map_err(|e| e.into_malformed("packet"))?;
        if r.remaining() > 0 {
            tracing::trace!(
                packet_type = ?ty,
                trailing = r.remaining(),
                "Ignoring trailing bytes in packet"
            );
        }
        Ok(packet)
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns the packet and the number of bytes consumed, or
    /// [`DecodeError::Incomplete`] if `buf` does not yet hold a whole frame.
    pub fn decode_frame(buf: &[u8]) -> DecodeResult<(Self, usize)> {
        let mut r = WireReader::new(buf);
        let len = r.read_u32()? as usize;
        if len == 0 {
            return Err(DecodeError::Malformed("zero-length frame".into()));
        }
        if r.remaining() < len {
            return Err(DecodeError::Incomplete {
                needed: len - r.remaining(),
            });
        }
        let packet = Self::decode(&buf[LENGTH_PREFIX..LENGTH_PREFIX + len])?;
        Ok((packet, LENGTH_PREFIX + len))
    }

    /// Reads the request id of a body without decoding the rest.
    ///
    /// Lets a reader fail the right caller when a reply is malformed.
    pub fn peek_request_id(body: &[u8]) -> Option<u32> {
        let mut r = WireReader::new(body);
        let ty = PacketType::try_from(r.read_u8().ok()?).ok()?;
        match ty {
            PacketType::Init | PacketType::Version => None,
            _ => r.read_u32().ok(),
        }
    }

    fn decode_typed(ty: PacketType, r: &mut WireReader<'_>) -> DecodeResult<Self> {
        match ty {
            PacketType::Init | PacketType::Version => {
                let version = r.read_u32()?;
                let mut extensions = Vec::new();
                while r.remaining() > 0 {
                    extensions.push((r.read_string()?, r.read_string()?));
                }
                Ok(if ty == PacketType::Init {
                    Packet::Init {
                        version,
                        extensions,
                    }
                } else {
                    Packet::Version {
                        version,
                        extensions,
                    }
                })
            }
            PacketType::Status
            | PacketType::Handle
            | PacketType::Data
            | PacketType::Name
            | PacketType::Attrs
            | PacketType::ExtendedReply => {
                let id = r.read_u32()?;
                let response = Response::decode_payload(ty, r)?;
                Ok(Packet::Response { id, response })
            }
            _ => {
                let id = r.read_u32()?;
                let request = Request::decode_payload(ty, r)?;
                Ok(Packet::Request { id, request })
            }
        }
    }
}
