//! Opcode-tagged packets and little-endian readers/writers.
//!
//! A finished [`Packet`] wraps immutable [`Bytes`], so fanning one packet out
//! to many connections only bumps a reference count. Encryption happens on the
//! codec's output buffer, never on the shared bytes.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::error::{Result, ServerError};

/// Immutable packet whose first two bytes are the little-endian opcode.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    data: Bytes,
}

impl Packet {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// The opcode, or `None` for a packet shorter than two bytes.
    pub fn opcode(&self) -> Option<u16> {
        match self.data.as_ref() {
            [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reader positioned just after the opcode.
    pub fn reader(&self) -> PacketReader<'_> {
        let mut reader = PacketReader::new(&self.data);
        reader.pos = self.data.len().min(2);
        reader
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode() {
            Some(op) => write!(f, "Packet(op={op:#06x}, len={})", self.data.len()),
            None => write!(f, "Packet(len={})", self.data.len()),
        }
    }
}

/// Growable buffer used while building a packet.
#[derive(Debug)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new(opcode: u16) -> Self {
        let mut buf = BytesMut::with_capacity(32);
        buf.put_u16_le(opcode);
        Self { buf }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(v as u8)
    }

    pub fn i8(&mut self, v: i8) -> &mut Self {
        self.buf.put_i8(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16_le(v);
        self
    }

    pub fn i16(&mut self, v: i16) -> &mut Self {
        self.buf.put_i16_le(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.put_i32_le(v);
        self
    }

    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.buf.put_i64_le(v);
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.put_slice(v);
        self
    }

    /// u16 length followed by the raw string bytes. Longer strings are cut
    /// at `u16::MAX` bytes so the prefix always matches the body.
    pub fn str(&mut self, v: &str) -> &mut Self {
        let raw = v.as_bytes();
        let len = u16::try_from(raw.len()).unwrap_or(u16::MAX);
        self.buf.put_u16_le(len);
        self.buf.put_slice(&raw[..usize::from(len)]);
        self
    }

    /// String right-padded with zeros (or truncated) to exactly `width` bytes.
    pub fn padded_str(&mut self, v: &str, width: usize) -> &mut Self {
        let raw = v.as_bytes();
        let take = raw.len().min(width);
        self.buf.put_slice(&raw[..take]);
        self.buf.put_bytes(0, width - take);
        self
    }

    pub fn zeros(&mut self, count: usize) -> &mut Self {
        self.buf.put_bytes(0, count);
        self
    }

    pub fn build(&mut self) -> Packet {
        Packet {
            data: self.buf.split().freeze(),
        }
    }
}

/// Cursor over a received packet.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ServerError::Truncated {
                needed: n - self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// u16 length-prefixed string, lossily decoded.
    pub fn str(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }
}

/// Clamp a collection length to what a u8 count prefix can carry. Writers
/// emit only that many elements after the prefix.
pub fn u8_count(len: usize) -> u8 {
    u8::try_from(len).unwrap_or(u8::MAX)
}
