//! Tokio codecs for the enciphered stream.
//!
//! Reads and writes are split so that each half owns its own IV: the read
//! loop drives a [`PacketDecoder`] and the writer task drives a
//! [`PacketEncoder`]. Neither half ever touches the other's IV.

use bytes::{Buf, BytesMut};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};

use crate::cipher::{self, Iv, KeySchedule};
use crate::core::header::{self, HEADER_LEN};
use crate::core::packet::Packet;
use crate::error::{Result, ServerError};

/// Receive half: header decode, payload decrypt, IV advance.
pub struct PacketDecoder {
    schedule: Arc<KeySchedule>,
    iv: Iv,
    expected_version: u16,
    pending: Option<usize>,
}

impl PacketDecoder {
    pub fn new(schedule: Arc<KeySchedule>, iv: Iv, expected_version: u16) -> Self {
        Self {
            schedule,
            iv,
            expected_version,
            pending: None,
        }
    }

    pub fn iv(&self) -> Iv {
        self.iv
    }
}

impl Decoder for PacketDecoder {
    type Item = Packet;
    type Error = ServerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        let len = match self.pending {
            Some(len) => len,
            None => {
                if src.len() < HEADER_LEN {
                    return Ok(None);
                }
                let raw = [src[0], src[1], src[2], src[3]];
                let len = header::decode_checked(raw, self.iv, self.expected_version)?;
                src.advance(HEADER_LEN);
                self.pending = Some(len);
                len
            }
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let mut payload = src.split_to(len);
        cipher::open(&self.schedule, &mut payload, self.iv);
        self.iv.shuffle();
        self.pending = None;
        Ok(Some(Packet::from_bytes(payload.freeze())))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() && self.pending.is_none() => Ok(None),
            None => Err(ServerError::Truncated {
                needed: self.pending.unwrap_or(HEADER_LEN).saturating_sub(src.len()),
            }),
        }
    }
}

/// Send half: header encode, payload encrypt, IV advance.
pub struct PacketEncoder {
    schedule: Arc<KeySchedule>,
    iv: Iv,
    version: u16,
}

impl PacketEncoder {
    pub fn new(schedule: Arc<KeySchedule>, iv: Iv, version: u16) -> Self {
        Self {
            schedule,
            iv,
            version,
        }
    }

    pub fn iv(&self) -> Iv {
        self.iv
    }
}

impl Encoder<Packet> for PacketEncoder {
    type Error = ServerError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        let head = header::encode(packet.len(), self.iv, self.version)?;
        dst.reserve(HEADER_LEN + packet.len());
        dst.extend_from_slice(&head);
        let start = dst.len();
        dst.extend_from_slice(packet.as_bytes());
        cipher::seal(&self.schedule, &mut dst[start..], self.iv);
        self.iv.shuffle();
        Ok(())
    }
}
