//! Scalar and string primitives.
//!
//! All integers are big-endian. Strings and byte strings are a `u32` length
//! followed by that many bytes.

use crate::error::{DecodeError, DecodeResult};
use bytes::{BufMut, Bytes};

/// Bounds-checked cursor over a received buffer.
///
/// Every read that would run past the end returns
/// [`DecodeError::Incomplete`] and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Creates a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes left.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        let left = self.remaining();
        if left < n {
            return Err(DecodeError::Incomplete { needed: n - left });
        }
        let buf: &'a [u8] = self.buf;
        let out = &buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> DecodeResult<u16> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> DecodeResult<u64> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    /// Reads a length-prefixed byte string.
    pub fn read_bytes(&mut self) -> DecodeResult<Bytes> {
        let start = self.pos;
        let len = self.read_u32()? as usize;
        match self.take(len) {
            Ok(data) => Ok(Bytes::copy_from_slice(data)),
            Err(e) => {
                self.pos = start;
                Err(e)
            }
        }
    }

    /// Reads a length-prefixed string.
    ///
    /// Remote filenames are not guaranteed to be UTF-8; invalid sequences are
    /// replaced rather than rejected so the rest of a listing stays usable.
    pub fn read_string(&mut self) -> DecodeResult<String> {
        let raw = self.read_bytes()?;
        match String::from_utf8(raw.to_vec()) {
            Ok(s) => Ok(s),
            Err(e) => {
                tracing::debug!(len = raw.len(), "Non-UTF-8 string on the wire, decoding lossily");
                Ok(String::from_utf8_lossy(e.as_bytes()).into_owned())
            }
        }
    }

    /// Returns everything not yet consumed and moves to the end.
    pub fn read_rest(&mut self) -> Bytes {
        let rest = Bytes::copy_from_slice(&self.buf[self.pos..]);
        self.pos = self.buf.len();
        rest
    }
}

/// Encoding helpers on top of [`BufMut`].
pub trait WireWriter: BufMut {
    /// Writes a length-prefixed byte string.
    fn put_wire_bytes(&mut self, data: &[u8]) {
        // Lengths are bounded by the frame limit long before u32::MAX.
        #[allow(clippy::cast_possible_truncation)]
        self.put_u32(data.len() as u32);
        self.put_slice(data);
    }

    /// Writes a length-prefixed string.
    fn put_wire_str(&mut self, s: &str) {
        self.put_wire_bytes(s.as_bytes());
    }
}

impl<B: BufMut + ?Sized> WireWriter for B {}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use proptest::prelude::*;

    #[test]
    fn test_scalars_are_big_endian() {
        let mut buf = BytesMut::new();
        buf.put_u16(0x0102);
        buf.put_u32(0x0304_0506);
        buf.put_u64(0x0708_090a_0b0c_0d0e);
        assert_eq!(
            &buf[..],
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14]
        );

        let mut r = WireReader::new(&buf);
        assert_eq!(r.read_u16().unwrap(), 0x0102);
        assert_eq!(r.read_u32().unwrap(), 0x0304_0506);
        assert_eq!(r.read_u64().unwrap(), 0x0708_090a_0b0c_0d0e);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_truncated_scalar_is_incomplete() {
        let mut r = WireReader::new(&[0, 0, 1]);
        assert_eq!(
            r.read_u32().unwrap_err(),
            DecodeError::Incomplete { needed: 1 }
        );
        // The cursor does not move on failure.
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn test_truncated_string_rewinds() {
        let mut buf = Vec::new();
        buf.put_u32(10);
        buf.put_slice(b"abc");
        let mut r = WireReader::new(&buf);
        assert_eq!(
            r.read_string().unwrap_err(),
            DecodeError::Incomplete { needed: 7 }
        );
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn test_non_utf8_string_is_lossy() {
        let mut buf = Vec::new();
        buf.put_wire_bytes(&[b'a', 0xff, b'b']);
        let mut r = WireReader::new(&buf);
        assert_eq!(r.read_string().unwrap(), "a\u{fffd}b");
    }

    proptest! {
        #[test]
        fn prop_scalars_roundtrip(a: u8, b: u16, c: u32, d: u64) {
            let mut buf = BytesMut::new();
            buf.put_u8(a);
            buf.put_u16(b);
            buf.put_u32(c);
            buf.put_u64(d);
            let mut r = WireReader::new(&buf);
            prop_assert_eq!(r.read_u8().unwrap(), a);
            prop_assert_eq!(r.read_u16().unwrap(), b);
            prop_assert_eq!(r.read_u32().unwrap(), c);
            prop_assert_eq!(r.read_u64().unwrap(), d);
        }

        #[test]
        fn prop_strings_roundtrip(s in ".*", data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut buf = BytesMut::new();
            buf.put_wire_str(&s);
            buf.put_wire_bytes(&data);
            let mut r = WireReader::new(&buf);
            prop_assert_eq!(r.read_string().unwrap(), s);
            prop_assert_eq!(&r.read_bytes().unwrap()[..], &data[..]);
        }
    }
}
