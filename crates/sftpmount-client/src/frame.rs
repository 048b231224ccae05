//! Incremental frame reassembly.
//!
//! Bytes arrive from the stream in arbitrary pieces. [`FrameReader`] keeps
//! the partial state between reads: first the four length bytes, then the
//! declared number of body bytes. Each completed body is handed out whole.

use bytes::{Bytes, BytesMut};
use sftpmount_proto::packet::LENGTH_PREFIX;
use thiserror::Error;

/// Largest payload a server sends for a 256 KiB read, plus header slack.
pub const DEFAULT_MAX_FRAME_LEN: usize = 256 * 1024 + 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds limit of {max}")]
    TooLarge { len: usize, max: usize },

    #[error("zero-length frame")]
    Empty,
}

#[derive(Debug)]
enum ReadState {
    /// Collecting the length prefix.
    Header { buf: [u8; LENGTH_PREFIX], filled: usize },
    /// Collecting `remaining` more body bytes.
    Body { body: BytesMut, remaining: usize },
}

/// Read-side framing state for one connection.
#[derive(Debug)]
pub struct FrameReader {
    state: ReadState,
    max_frame_len: usize,
}

impl FrameReader {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            state: ReadState::Header {
                buf: [0; LENGTH_PREFIX],
                filled: 0,
            },
            max_frame_len,
        }
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ReadState::Header { filled: 0, .. })
    }

    /// Consumes `data`, appending every body it completes to `out`.
    ///
    /// After an error the reader is unusable; the connection must be dropped.
    pub fn feed(&mut self, mut data: &[u8], out: &mut Vec<Bytes>) -> Result<(), FrameError> {
        while !data.is_empty() {
            match &mut self.state {
                ReadState::Header { buf, filled } => {
                    let n = (LENGTH_PREFIX - *filled).min(data.len());
                    buf[*filled..*filled + n].copy_from_slice(&data[..n]);
                    *filled += n;
                    data = &data[n..];
                    if *filled < LENGTH_PREFIX {
                        break;
                    }
                    let len = u32::from_be_bytes(*buf) as usize;
                    if len == 0 {
                        return Err(FrameError::Empty);
                    }
                    if len > self.max_frame_len {
                        return Err(FrameError::TooLarge {
                            len,
                            max: self.max_frame_len,
                        });
                    }
                    self.state = ReadState::Body {
                        body: BytesMut::with_capacity(len),
                        remaining: len,
                    };
                }
                ReadState::Body { body, remaining } => {
                    let n = (*remaining).min(data.len());
                    body.extend_from_slice(&data[..n]);
                    *remaining -= n;
                    data = &data[n..];
                    if *remaining > 0 {
                        break;
                    }
                    let complete = std::mem::take(body).freeze();
                    out.push(complete);
                    self.state = ReadState::Header {
                        buf: [0; LENGTH_PREFIX],
                        filled: 0,
                    };
                }
            }
        }
        Ok(())
    }
}
