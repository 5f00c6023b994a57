//! One accepted client socket.
//!
//! The socket is split on accept. The read half stays with the session task
//! and is driven through [`Connection::next_packet`]; the write half moves into
//! a dedicated writer task fed by a bounded queue. Producers only ever touch
//! the queue through a cloneable [`ConnectionHandle`], so a packet's header and
//! body can never interleave with another packet and a broadcast never waits
//! on a slow socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::cipher::KeySchedule;
use crate::config::ServerConfig;
use crate::core::codec::{PacketDecoder, PacketEncoder};
use crate::core::header::server_send_version;
use crate::core::packet::Packet;
use crate::error::{constants, Result, ServerError};
use crate::protocol::handshake::Handshake;
use crate::protocol::opcode::OpcodeTable;
use crate::utils::global_metrics;
use crate::utils::timeout::{with_timeout, with_timeout_error};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-listener transport parameters.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub game_version: u16,
    pub patch: String,
    pub locale: u8,
    pub read_idle: Duration,
    pub write_timeout: Duration,
    pub send_queue: usize,
}

impl TransportSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            game_version: config.game.version,
            patch: config.game.patch.clone(),
            locale: config.game.locale,
            read_idle: config.timeouts.read_idle,
            write_timeout: config.timeouts.write,
            send_queue: config.login.send_queue,
        }
    }
}

struct Shared {
    id: u64,
    peer: SocketAddr,
    tx: mpsc::Sender<Packet>,
    closed: AtomicBool,
    cancel: CancellationToken,
    outbound: OpcodeTable,
}

/// Cloneable sending side of a connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionHandle {
    fn new(
        peer: SocketAddr,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            inner: Arc::new(Shared {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                peer,
                tx,
                closed: AtomicBool::new(false),
                cancel,
                outbound: OpcodeTable::outbound(),
            }),
        };
        (handle, rx)
    }

    /// Handle whose packets land in the returned receiver instead of a socket.
    pub fn detached(peer: SocketAddr, capacity: usize) -> (Self, mpsc::Receiver<Packet>) {
        Self::new(peer, capacity, CancellationToken::new())
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Queue a packet without waiting. Returns `false` if it was not queued.
    ///
    /// A full queue means the peer stopped reading; the connection is closed
    /// rather than letting the backlog grow.
    pub fn send(&self, packet: Packet) -> bool {
        if self.is_closed() {
            return false;
        }
        let opcode = packet.opcode().unwrap_or_default();
        match self.inner.tx.try_send(packet) {
            Ok(()) => {
                trace!(
                    conn = self.inner.id,
                    opcode = %self.inner.outbound.name(opcode),
                    "Packet queued"
                );
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(conn = self.inner.id, peer = %self.inner.peer, "Outbound queue full, closing connection");
                self.close();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!(conn = self.inner.id, peer = %self.inner.peer, "Connection closing");
            self.inner.cancel.cancel();
        }
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await
    }

    fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }
}

/// Receiving side of an accepted connection, owned by its session task.
pub struct Connection {
    reader: FramedRead<OwnedReadHalf, PacketDecoder>,
    handle: ConnectionHandle,
    inbound: OpcodeTable,
    read_idle: Duration,
    writer: Option<JoinHandle<()>>,
}

impl Connection {
    /// Send the handshake and start the writer task.
    #[instrument(skip_all, fields(peer = ?stream.peer_addr().ok()))]
    pub async fn accept(
        mut stream: TcpStream,
        schedule: Arc<KeySchedule>,
        settings: &TransportSettings,
        inbound: OpcodeTable,
        shutdown: &CancellationToken,
    ) -> Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        let handshake = Handshake::generate(settings.game_version, &settings.patch, settings.locale);
        let hello = handshake.to_bytes();
        with_timeout_error(
            async {
                stream.write_all(&hello).await?;
                Ok(())
            },
            settings.write_timeout,
        )
        .await?;

        let (read_half, write_half) = stream.into_split();
        let reader = FramedRead::new(
            read_half,
            PacketDecoder::new(schedule.clone(), handshake.recv_iv, settings.game_version),
        );
        let sink = FramedWrite::new(
            write_half,
            PacketEncoder::new(
                schedule,
                handshake.send_iv,
                server_send_version(settings.game_version),
            ),
        );

        let (handle, rx) = ConnectionHandle::new(peer, settings.send_queue, shutdown.child_token());
        let writer = tokio::spawn(write_loop(sink, rx, handle.clone(), settings.write_timeout));

        global_metrics().connection_opened();
        debug!(conn = handle.id(), "Handshake sent");

        Ok(Self {
            reader,
            handle,
            inbound,
            read_idle: settings.read_idle,
            writer: Some(writer),
        })
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn peer(&self) -> SocketAddr {
        self.handle.peer()
    }

    /// Name of an inbound opcode for diagnostics.
    pub fn opcode_name(&self, opcode: u16) -> std::borrow::Cow<'static, str> {
        self.inbound.name(opcode)
    }

    /// Next packet, `Ok(None)` on clean close or local shutdown.
    ///
    /// Fails with [`ServerError::ConnectionTimeout`] after the idle deadline
    /// and with a protocol error on a bad header.
    pub async fn next_packet(&mut self) -> Result<Option<Packet>> {
        let cancel = self.handle.cancel_token().clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            next = tokio::time::timeout(self.read_idle, self.reader.next()) => match next {
                Err(_) => Err(ServerError::ConnectionTimeout),
                Ok(None) => Ok(None),
                Ok(Some(Err(e))) => {
                    global_metrics().protocol_error();
                    Err(e)
                }
                Ok(Some(Ok(packet))) => {
                    global_metrics().packet_received(packet.len());
                    trace!(
                        conn = self.handle.id(),
                        opcode = %self.inbound.name(packet.opcode().unwrap_or_default()),
                        len = packet.len(),
                        "Packet received"
                    );
                    Ok(Some(packet))
                }
            }
        }
    }

    /// Close and wait for the writer to flush what was queued.
    pub async fn shutdown(mut self) {
        self.handle.close();
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
            global_metrics().connection_closed();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.handle.close();
        if self.writer.take().is_some() {
            global_metrics().connection_closed();
        }
    }
}

async fn write_one(
    sink: &mut FramedWrite<OwnedWriteHalf, PacketEncoder>,
    packet: Packet,
    write_timeout: Duration,
) -> Result<()> {
    let len = packet.len();
    with_timeout_error(sink.send(packet), write_timeout).await?;
    global_metrics().packet_sent(len);
    Ok(())
}

async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, PacketEncoder>,
    mut rx: mpsc::Receiver<Packet>,
    handle: ConnectionHandle,
    write_timeout: Duration,
) {
    loop {
        let packet = tokio::select! {
            biased;
            packet = rx.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
            _ = handle.closed() => break,
        };
        if let Err(e) = write_one(&mut sink, packet, write_timeout).await {
            match e {
                ServerError::Timeout => {
                    warn!(conn = handle.id(), peer = %handle.peer(), "{}", constants::ERR_WRITE_TIMEOUT)
                }
                e => warn!(conn = handle.id(), peer = %handle.peer(), error = %e, "Write failed"),
            }
            handle.close();
            return;
        }
    }

    // Flush whatever was queued before the close.
    rx.close();
    while let Ok(packet) = rx.try_recv() {
        if write_one(&mut sink, packet, write_timeout).await.is_err() {
            break;
        }
    }
    let _ = with_timeout(sink.close(), write_timeout).await;
    debug!(conn = handle.id(), "Writer stopped");
}
