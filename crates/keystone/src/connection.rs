//! Per-connection task: from accept to close.
//!
//! Each accepted connection gets its own Tokio task running
//! [`handle_connection`]. The flow is:
//!   1. Create the session, announce phase `HANDSHAKE`, send the challenge
//!   2. Loop: read bytes → run the inbound pipeline → dispatch, while
//!      writing whatever handlers queue on the session
//!   3. On any exit, the guard closes the session exactly once

use std::sync::Arc;

use keystone_protocol::packets::phase_packet;
use keystone_protocol::{Packet, Phase, SchemaRegistry};
use keystone_session::{ChannelHandle, Session, SessionId, SessionRegistry};
use keystone_transport::{Connection, TransportError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pipeline::{Admission, InboundPipeline, OutboundPipeline};
use crate::{Dispatcher, HandlerContext, KeystoneError, ServerConfig};

/// State shared by every connection task.
pub(crate) struct Shared {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) schemas: Arc<SchemaRegistry>,
    pub(crate) sessions: Arc<SessionRegistry>,
    pub(crate) dispatcher: Dispatcher,
}

/// Drop guard that closes the session when the task exits.
///
/// Runs on every exit path (clean close, error, panic). The registry's
/// close is idempotent, so a session already closed by a command is left
/// alone.
struct SessionGuard {
    id: SessionId,
    sessions: Arc<SessionRegistry>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.close(self.id);
    }
}

/// Why the session loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    PeerClosed,
    ClosedByServer,
    IdleTimeout,
}

/// Drives one connection until it closes.
pub(crate) async fn handle_connection<C>(mut conn: C, shared: Arc<Shared>) -> Result<(), KeystoneError>
where
    C: Connection<Error = TransportError>,
{
    let conn_id = conn.id();
    let (tx, rx) = mpsc::unbounded_channel();
    let closed = CancellationToken::new();
    let session = shared
        .sessions
        .create(ChannelHandle::new(conn_id, tx, closed.clone()));
    let _guard = SessionGuard {
        id: session.id(),
        sessions: Arc::clone(&shared.sessions),
    };
    debug!(%conn_id, session_id = %session.id(), peer = ?conn.peer_addr(), "handling new connection");

    let result = run_session(&mut conn, &session, rx, &closed, &shared).await;

    match &result {
        Ok(exit) => info!(session_id = %session.id(), ?exit, "connection closed"),
        Err(e) => warn!(session_id = %session.id(), error = %e, "connection closed on error"),
    }
    if let Err(e) = conn.close().await {
        debug!(%conn_id, error = %e, "close failed");
    }
    result.map(|_| ())
}

async fn run_session<C>(
    conn: &mut C,
    session: &Arc<Session>,
    mut rx: mpsc::UnboundedReceiver<Packet>,
    closed: &CancellationToken,
    shared: &Shared,
) -> Result<Exit, KeystoneError>
where
    C: Connection<Error = TransportError>,
{
    let mut inbound = InboundPipeline::new(Arc::clone(&shared.schemas), Arc::clone(&shared.config));
    let mut outbound = OutboundPipeline::new(Arc::clone(&shared.schemas));

    let challenge = session.lock().handshake.challenge();
    write_packet(conn, &mut outbound, session, &phase_packet(Phase::Handshake)).await?;
    write_packet(conn, &mut outbound, session, &challenge.to_packet()).await?;

    let idle = shared.config.idle_timeout();
    let mut deadline = Instant::now() + idle.unwrap_or_default();

    loop {
        // Drain every complete frame already buffered.
        while let Some(admission) = inbound.next(session)? {
            match admission {
                Admission::Dispatch(packet) => {
                    let ctx = HandlerContext::new(session, &shared.sessions, &shared.config);
                    if let Err(e) = shared.dispatcher.dispatch(&packet, &ctx) {
                        if e.is_fatal() {
                            return Err(e);
                        }
                        warn!(
                            session_id = %session.id(),
                            header = format_args!("0x{:02X}", packet.header()),
                            error = %e,
                            "handler error"
                        );
                    }
                }
                Admission::Respond(packets) => {
                    for packet in &packets {
                        write_packet(conn, &mut outbound, session, packet).await?;
                    }
                }
                Admission::Drop => {}
            }
        }

        tokio::select! {
            biased;

            () = closed.cancelled() => return Ok(Exit::ClosedByServer),

            Some(packet) = rx.recv() => {
                write_packet(conn, &mut outbound, session, &packet).await?;
            }

            read = conn.read(inbound.buffer_mut()) => {
                if read? == 0 {
                    return Ok(Exit::PeerClosed);
                }
                if let Some(idle) = idle {
                    deadline = Instant::now() + idle;
                }
            }

            () = tokio::time::sleep_until(deadline), if idle.is_some() => {
                return Ok(Exit::IdleTimeout);
            }
        }
    }
}

/// Encodes and writes one packet.
///
/// A packet that cannot be encoded is a bug in whoever queued it, not in
/// the peer, so it is logged and skipped. Write failures end the session.
async fn write_packet<C>(
    conn: &mut C,
    outbound: &mut OutboundPipeline,
    session: &Session,
    packet: &Packet,
) -> Result<(), KeystoneError>
where
    C: Connection<Error = TransportError>,
{
    match outbound.encode(packet, session) {
        Ok(bytes) => {
            conn.write(&bytes).await?;
            Ok(())
        }
        Err(e) => {
            error!(
                session_id = %session.id(),
                header = format_args!("0x{:02X}", packet.header()),
                error = %e,
                "dropping packet that failed to encode"
            );
            Ok(())
        }
    }
}
