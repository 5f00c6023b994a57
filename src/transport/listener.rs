use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cipher::KeySchedule;
use crate::error::Result;
use crate::protocol::opcode::OpcodeTable;
use crate::transport::connection::{Connection, TransportSettings};

/// Per-role session logic run once per accepted connection.
pub trait SessionHandler: Send + Sync + 'static {
    /// Short role name for logs ("login", "channel").
    fn role(&self) -> &'static str;

    /// Inbound opcode names for this role.
    fn inbound(&self) -> OpcodeTable;

    /// Drive one connection to completion. Must deregister everything the
    /// session registered before returning.
    fn run(self: Arc<Self>, conn: Connection) -> BoxFuture<'static, ()>;
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Accept loop on an already bound listener until `shutdown` fires.
///
/// Every connection's cancellation token is a child of `shutdown`, so the
/// signal also ends each session's read loop; the loop then waits up to
/// `grace` for sessions to finish their teardown.
pub async fn serve<H: SessionHandler>(
    listener: TcpListener,
    handler: Arc<H>,
    schedule: Arc<KeySchedule>,
    settings: TransportSettings,
    shutdown: CancellationToken,
    grace: Duration,
) -> Result<()> {
    let local = listener.local_addr()?;
    let role = handler.role();
    info!(role, address = %local, "Listening");

    let active = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(role, "Shutting down listener. Waiting for sessions to close...");

                let deadline = tokio::time::sleep(grace);
                tokio::pin!(deadline);

                loop {
                    let remaining = active.load(Ordering::Acquire);
                    if remaining == 0 {
                        info!(role, "All sessions closed");
                        break;
                    }
                    tokio::select! {
                        _ = &mut deadline => {
                            warn!(role, sessions = remaining, "Shutdown timeout reached, forcing exit");
                            break;
                        }
                        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                    }
                }

                return Ok(());
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(role, peer = %peer, "New connection");
                        let guard = ActiveGuard::new(&active);
                        let handler = handler.clone();
                        let schedule = schedule.clone();
                        let settings = settings.clone();
                        let shutdown = shutdown.clone();

                        tokio::spawn(async move {
                            let _guard = guard;
                            let inbound = handler.inbound();
                            match Connection::accept(stream, schedule, &settings, inbound, &shutdown).await {
                                Ok(conn) => handler.run(conn).await,
                                Err(e) => warn!(role, peer = %peer, error = %e, "Handshake failed"),
                            }
                            debug!(role, peer = %peer, "Connection finished");
                        });
                    }
                    Err(e) => {
                        error!(role, error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}
