//! Wire types and codec for the SFTP protocol (version 3).
//!
//! This crate is transport-agnostic: it turns packets into byte frames and
//! byte frames back into packets, nothing more. Both directions of the
//! protocol are covered, so the same types describe what a client sends and
//! what a server answers.
//!
//! # Frame layout
//!
//! ```text
//! length:u32 (big-endian) || type:u8 || [request-id:u32] || payload
//! ```
//!
//! Every packet except the initial `INIT`/`VERSION` handshake carries a
//! request id.
//!
//! # Example
//!
//! ```
//! use sftpmount_proto::{Packet, Request};
//!
//! let packet = Packet::request(7, Request::Lstat { path: "/etc".into() });
//! let frame = packet.to_frame();
//! let (decoded, used) = Packet::decode_frame(&frame).unwrap();
//! assert_eq!(decoded, packet);
//! assert_eq!(used, frame.len());
//! ```

pub mod attrs;
pub mod codec;
pub mod error;
pub mod packet;
pub mod status;

pub use attrs::{AttrFlags, FileAttributes, FileKind, FileTimes, Ownership};
pub use codec::{WireReader, WireWriter};
pub use error::{DecodeError, DecodeResult};
pub use packet::{
    Extension, Handle, NameEntry, OpenFlags, Packet, PacketType, Request, Response,
    SFTP_VERSION,
};
pub use status::{ErrorKind, Status, StatusCode};
