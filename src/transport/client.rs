//! Client side of the wire protocol.
//!
//! Reads the handshake, then speaks through the same codecs with the roles
//! swapped: the client encrypts with the server's `recv_iv` using the plain
//! game version and decrypts with `send_iv` expecting the inverted version.
//! Used by integration tests and tooling that drive a live listener.

use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, instrument};

use crate::cipher::KeySchedule;
use crate::core::codec::{PacketDecoder, PacketEncoder};
use crate::core::header::server_send_version;
use crate::core::packet::Packet;
use crate::error::{Result, ServerError};
use crate::protocol::handshake::Handshake;
use crate::utils::timeout::{with_timeout, with_timeout_error};

/// Both codec halves under one type so a single `Framed` can drive them.
pub struct ClientCodec {
    decoder: PacketDecoder,
    encoder: PacketEncoder,
}

impl ClientCodec {
    pub fn new(schedule: std::sync::Arc<KeySchedule>, handshake: &Handshake) -> Self {
        Self {
            decoder: PacketDecoder::new(
                schedule.clone(),
                handshake.send_iv,
                server_send_version(handshake.game_version),
            ),
            encoder: PacketEncoder::new(schedule, handshake.recv_iv, handshake.game_version),
        }
    }
}

impl Decoder for ClientCodec {
    type Item = Packet;
    type Error = ServerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        self.decoder.decode(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        self.decoder.decode_eof(src)
    }
}

impl Encoder<Packet> for ClientCodec {
    type Error = ServerError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        self.encoder.encode(packet, dst)
    }
}

pub struct ClientConnection {
    framed: Framed<TcpStream, ClientCodec>,
    handshake: Handshake,
    timeout: Duration,
}

impl ClientConnection {
    #[instrument(skip(addr))]
    pub async fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<Self> {
        let schedule = KeySchedule::global()?;
        let mut stream = with_timeout_error(
            async { TcpStream::connect(addr).await.map_err(ServerError::from) },
            timeout,
        )
        .await?;
        let handshake =
            with_timeout_error(Handshake::read_from(&mut stream), timeout).await?;
        debug!(version = handshake.game_version, "Connected");
        let codec = ClientCodec::new(schedule, &handshake);
        Ok(Self {
            framed: Framed::new(stream, codec),
            handshake,
            timeout,
        })
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub async fn send(&mut self, packet: Packet) -> Result<()> {
        with_timeout_error(self.framed.send(packet), self.timeout).await
    }

    /// Next packet, `Ok(None)` once the server closed the socket.
    pub async fn recv(&mut self) -> Result<Option<Packet>> {
        match with_timeout(self.framed.next(), self.timeout).await? {
            None => Ok(None),
            Some(result) => result.map(Some),
        }
    }

    /// Skip packets until one with `opcode` arrives.
    pub async fn recv_opcode(&mut self, opcode: u16) -> Result<Packet> {
        loop {
            match self.recv().await? {
                Some(packet) if packet.opcode() == Some(opcode) => return Ok(packet),
                Some(_) => continue,
                None => return Err(ServerError::ConnectionClosed),
            }
        }
    }

    /// Whether the server closes the socket within the timeout.
    pub async fn expect_closed(&mut self) -> bool {
        loop {
            match self.recv().await {
                Ok(Some(_)) => continue,
                Ok(None) => return true,
                Err(ServerError::Timeout) => return false,
                Err(_) => return true,
            }
        }
    }
}
