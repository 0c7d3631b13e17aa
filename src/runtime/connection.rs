//! Per-connection worker.
//!
//! Each accepted connection runs two tasks:
//! - a reader that pulls bytes off the socket and hands them over a
//!   bounded channel, one chunk at a time
//! - the dispatch loop below, which waits on whichever comes first of the
//!   shutdown signal, the next reader event, or an outbound notification
//!
//! Frames from one connection are handled strictly in arrival order.

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::Session;
use crate::error::Error;
use crate::protocol::{parse, Response};
use crate::service::ServiceGateway;

/// Default size of a single socket read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Upper bound on the farewell write to a client that stopped reading.
const DISCONNECT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything a connection worker shares with the server.
#[derive(Clone)]
pub struct ConnectionContext {
    pub gateway: Arc<ServiceGateway>,
    pub shutdown: CancellationToken,
    pub max_frame_bytes: usize,
    pub read_buffer_size: usize,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// The client closed its side.
    Eof,
    /// The server is shutting down.
    Shutdown,
    /// Reading or writing the socket failed.
    Transport,
    /// The client sent more than the frame limit without a delimiter.
    FrameTooLarge,
}

/// What the reader task saw on the socket.
#[derive(Debug)]
enum ReadEvent {
    Data(Bytes),
    Eof,
    Failed(std::io::Error),
}

/// Serve one client until it disconnects or the server shuts down.
pub async fn serve_connection<S>(stream: S, peer: SocketAddr, ctx: ConnectionContext) -> Disconnect
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let registry = Arc::clone(ctx.gateway.registry());
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();
    let id = registry.register(peer, outbound_tx);
    let mut session = Session::new(id, peer, ctx.max_frame_bytes);

    info!(peer = %peer, conn = id, "New connection");

    let (reader, mut writer) = tokio::io::split(stream);
    let (events_tx, mut events_rx) = mpsc::channel(1);
    let reader_cancel = ctx.shutdown.child_token();
    let reader_task = tokio::spawn(read_loop(
        reader,
        events_tx,
        reader_cancel.clone(),
        ctx.read_buffer_size,
    ));

    let reason = loop {
        tokio::select! {
            biased;

            _ = ctx.shutdown.cancelled() => {
                debug!(peer = %peer, "Shutdown signal received");
                break Disconnect::Shutdown;
            }

            event = events_rx.recv() => match event {
                Some(ReadEvent::Data(data)) => {
                    if let Err(reason) = process(&ctx, &mut session, &data, &mut writer).await {
                        break reason;
                    }
                }
                Some(ReadEvent::Eof) | None => {
                    info!(peer = %peer, "Disconnected");
                    let unframed = session.decoder.pending().len();
                    if unframed > 0 {
                        debug!(peer = %peer, bytes = unframed, "Dropping incomplete request");
                    }
                    break Disconnect::Eof;
                }
                Some(ReadEvent::Failed(e)) => {
                    error!(peer = %peer, error = %Error::from(e), "Read failed");
                    break Disconnect::Transport;
                }
            },

            Some(message) = outbound_rx.recv() => {
                if let Err(reason) = send(&mut writer, &message, &ctx.shutdown).await {
                    break reason;
                }
            }
        }
    };

    // Best effort: the peer may already be gone.
    let farewell = async {
        writer.write_all(Response::disconnecting()).await?;
        writer.shutdown().await
    };
    if let Err(e) = tokio::time::timeout(DISCONNECT_WRITE_TIMEOUT, farewell)
        .await
        .unwrap_or_else(|_| Err(std::io::ErrorKind::TimedOut.into()))
    {
        trace!(peer = %peer, error = %e, "Disconnect notice not delivered");
    }

    registry.unregister(id);
    reader_cancel.cancel();
    if let Err(e) = reader_task.await {
        warn!(peer = %peer, error = %e, "Reader task failed");
    }

    debug!(peer = %peer, reason = ?reason, remaining = registry.len(), "Connection closed");
    reason
}

/// Feed a chunk to the session's decoder and answer every frame it
/// completes.
async fn process<W>(
    ctx: &ConnectionContext,
    session: &mut Session,
    data: &[u8],
    writer: &mut W,
) -> Result<(), Disconnect>
where
    W: AsyncWrite + Unpin,
{
    for frame in session.decoder.feed(data) {
        let reply = match parse(&frame) {
            Ok(request) => {
                trace!(
                    peer = %session.peer(),
                    method = %request.method,
                    auth = ?session.auth(),
                    "Processing request"
                );
                ctx.gateway.respond(&request, session)
            }
            Err(e) => {
                warn!(peer = %session.peer(), error = %e, "Parse error");
                e.to_wire()
            }
        };
        send(writer, &reply, &ctx.shutdown).await?;
    }

    if let Err(e) = session.decoder.check_limit() {
        warn!(peer = %session.peer(), error = %e, "Frame limit exceeded");
        send(writer, &Error::from(e).to_wire(), &ctx.shutdown).await?;
        return Err(Disconnect::FrameTooLarge);
    }

    Ok(())
}

/// Write `bytes`, giving up if the server starts shutting down.
async fn send<W>(writer: &mut W, bytes: &[u8], shutdown: &CancellationToken) -> Result<(), Disconnect>
where
    W: AsyncWrite + Unpin,
{
    tokio::select! {
        written = writer.write_all(bytes) => written.map_err(|e| {
            error!(error = %e, "Write failed");
            Disconnect::Transport
        }),
        _ = shutdown.cancelled() => Err(Disconnect::Shutdown),
    }
}

/// Reader half: forward socket chunks until EOF, an error, or cancellation.
async fn read_loop<R>(
    mut reader: R,
    events: mpsc::Sender<ReadEvent>,
    cancel: CancellationToken,
    buffer_size: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(buffer_size);

    loop {
        buffer.reserve(buffer_size);

        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            read = reader.read_buf(&mut buffer) => match read {
                Ok(0) => ReadEvent::Eof,
                Ok(n) => {
                    trace!(bytes = n, "Read from socket");
                    ReadEvent::Data(buffer.split().freeze())
                }
                Err(e) => ReadEvent::Failed(e),
            },
        };

        let terminal = !matches!(event, ReadEvent::Data(_));
        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = events.send(event) => {
                if sent.is_err() {
                    return;
                }
            }
        }
        if terminal {
            return;
        }
    }
}
