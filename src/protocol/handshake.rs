//! Unencrypted hello block sent by the server right after accept.
//!
//! ```text
//! [u16 body_len] [u16 game_version] [u16 len + patch] [recv_iv(4)] [send_iv(4)] [u8 locale]
//! ```
//!
//! The IVs are named from the server's point of view: the client encrypts
//! with `recv_iv` and decrypts with `send_iv`.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, instrument};

use crate::cipher::Iv;
use crate::core::packet::PacketReader;
use crate::error::{constants, Result, ServerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub game_version: u16,
    pub patch: String,
    pub recv_iv: Iv,
    pub send_iv: Iv,
    pub locale: u8,
}

impl Handshake {
    /// Fresh handshake with random IVs for a newly accepted connection.
    pub fn generate(game_version: u16, patch: &str, locale: u8) -> Self {
        Self {
            game_version,
            patch: patch.to_string(),
            recv_iv: Iv::random(),
            send_iv: Iv::random(),
            locale,
        }
    }

    /// Length-prefixed wire encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = BytesMut::with_capacity(16 + self.patch.len());
        body.put_u16_le(self.game_version);
        body.put_u16_le(self.patch.len() as u16);
        body.put_slice(self.patch.as_bytes());
        body.put_slice(&self.recv_iv.bytes());
        body.put_slice(&self.send_iv.bytes());
        body.put_u8(self.locale);

        let mut out = Vec::with_capacity(body.len() + 2);
        out.extend_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Parse the body (everything after the length prefix).
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut r = PacketReader::new(body);
        let truncated =
            |_| ServerError::Custom(constants::ERR_HANDSHAKE_TRUNCATED.to_string());
        let game_version = r.u16().map_err(truncated)?;
        let patch = r.str().map_err(truncated)?;
        let mut recv = [0u8; 4];
        recv.copy_from_slice(r.bytes(4).map_err(truncated)?);
        let mut send = [0u8; 4];
        send.copy_from_slice(r.bytes(4).map_err(truncated)?);
        let locale = r.u8().map_err(truncated)?;
        Ok(Self {
            game_version,
            patch,
            recv_iv: Iv::new(recv),
            send_iv: Iv::new(send),
            locale,
        })
    }

    /// Read a handshake from a stream (client side).
    #[instrument(skip(reader))]
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let len = reader.read_u16_le().await? as usize;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        let hs = Self::parse(&body)?;
        debug!(version = hs.game_version, patch = %hs.patch, "Handshake received");
        Ok(hs)
    }
}
