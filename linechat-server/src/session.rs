//! Per-connection handler: username handshake, line loop and cleanup.
//!
//! Each accepted socket is split in two. The read half is driven here; the
//! write half is owned by a writer task that drains the session's outbound
//! queue, the same queue the registry pushes broadcast lines into.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use linechat_proto::cipher;
use linechat_proto::frame::{ClientFrame, FileAnnouncement, FrameKind, MAX_LINE_LENGTH};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::broadcast::Outgoing;
use crate::persist::StoreOp;
use crate::registry::SessionId;
use crate::server::ServerContext;

/// How long cleanup waits for the writer to flush queued lines.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

type LineReader = FramedRead<OwnedReadHalf, LinesCodec>;

/// Lifecycle of a server-side session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the first line, which carries the username.
    AwaitingUsername,
    /// Username bound; relaying lines.
    Active,
    /// Leaving the registry and recording the disconnect.
    Closing,
    /// Transport released.
    Closed,
}

/// Result of waiting for the next inbound line.
enum ReadOutcome {
    Line(String),
    Closed,
    Shutdown,
}

/// One connected client as seen by the server.
struct Session {
    id: SessionId,
    remote_addr: SocketAddr,
    username: Option<String>,
    state: SessionState,
}

impl Session {
    const fn new(id: SessionId, remote_addr: SocketAddr) -> Self {
        Self {
            id,
            remote_addr,
            username: None,
            state: SessionState::AwaitingUsername,
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(
            session_id = self.id,
            from = ?self.state,
            to = ?next,
            "session state change"
        );
        self.state = next;
    }
}

/// Drives one accepted connection to completion.
///
/// The session must already be registered under `id` with the sender half
/// of `outbound`. Returns once the session has left the registry and its
/// writer has finished or been aborted.
pub async fn run(
    stream: TcpStream,
    id: SessionId,
    outbound: mpsc::UnboundedReceiver<String>,
    ctx: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let remote_addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::warn!(session_id = id, error = %e, "peer address unavailable");
            ctx.registry.remove(id);
            return;
        }
    };
    let (read_half, write_half) = stream.into_split();
    let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let writer = spawn_writer(id, write_half, outbound);
    let mut session = Session::new(id, remote_addr);

    if handshake(&mut session, &mut lines, &mut shutdown, &ctx).await {
        session.transition(SessionState::Active);
        active_loop(&session, &mut lines, &mut shutdown, &ctx).await;
    }

    session.transition(SessionState::Closing);
    close(&session, &ctx);
    drop(lines);
    finish_writer(id, writer).await;
    session.transition(SessionState::Closed);
}

/// Reads the username line and announces the session.
///
/// Returns `false` when the connection ends before a usable username.
async fn handshake(
    session: &mut Session,
    lines: &mut LineReader,
    shutdown: &mut watch::Receiver<bool>,
    ctx: &ServerContext,
) -> bool {
    let raw = match next_line(session.id, lines, shutdown).await {
        ReadOutcome::Line(line) => line,
        ReadOutcome::Closed | ReadOutcome::Shutdown => {
            tracing::debug!(session_id = session.id, "closed before username");
            return false;
        }
    };
    let username = raw.trim();
    if username.is_empty() {
        tracing::debug!(session_id = session.id, "empty username, closing");
        return false;
    }

    if let Err(e) = ctx.registry.bind_username(session.id, username) {
        tracing::warn!(session_id = session.id, error = %e, "could not bind username");
        return false;
    }
    session.username = Some(username.to_string());

    ctx.broadcaster.persist(StoreOp::Connection {
        username: username.to_string(),
        ip: session.remote_addr.ip().to_string(),
        connected: true,
    });

    tracing::info!(
        session_id = session.id,
        username = %username,
        addr = %session.remote_addr,
        "user joined"
    );
    ctx.broadcaster
        .broadcast(&Outgoing::Notice(format!("{username} joined")), Some(session.id));
    true
}

/// Relays lines until EOF, a disconnect line, or server shutdown.
async fn active_loop(
    session: &Session,
    lines: &mut LineReader,
    shutdown: &mut watch::Receiver<bool>,
    ctx: &ServerContext,
) {
    let Some(username) = session.username.as_deref() else {
        return;
    };

    loop {
        let line = match next_line(session.id, lines, shutdown).await {
            ReadOutcome::Line(line) => line,
            ReadOutcome::Closed | ReadOutcome::Shutdown => return,
        };
        if line.is_empty() {
            continue;
        }

        match ClientFrame::parse(&line) {
            Ok(ClientFrame::Disconnect(notice)) => {
                tracing::info!(
                    session_id = session.id,
                    username = %username,
                    announced = %notice.username,
                    ip = %notice.ip,
                    port = notice.port,
                    "client requested disconnect"
                );
                return;
            }
            Err(e) if e.kind() == FrameKind::Disconnect => {
                tracing::warn!(session_id = session.id, error = %e, "malformed disconnect, closing anyway");
                return;
            }
            Ok(ClientFrame::File(file)) => relay_file(session.id, username, file, ctx),
            Err(e) => {
                tracing::debug!(session_id = session.id, error = %e, "rejecting file announcement");
                ctx.registry.send_to(session.id, e.notice());
            }
            Ok(ClientFrame::Chat(body)) => {
                let message = Outgoing::Chat {
                    sender: username.to_string(),
                    plaintext: cipher::decrypt(&body),
                    body,
                };
                ctx.broadcaster.broadcast(&message, Some(session.id));
            }
        }
    }
}

fn relay_file(id: SessionId, username: &str, file: FileAnnouncement, ctx: &ServerContext) {
    let file = FileAnnouncement {
        sender: username.to_string(),
        ..file
    };
    ctx.broadcaster.persist(StoreOp::File {
        sender: file.sender.clone(),
        filename: file.filename.clone(),
        filesize: file.filesize,
    });
    tracing::info!(
        session_id = id,
        username = %username,
        filename = %file.filename,
        filesize = file.filesize,
        "file announced"
    );
    ctx.broadcaster.broadcast(&Outgoing::File(file), Some(id));
}

/// Removes the session and, if it had joined, records and announces the
/// departure. The leave notice is skipped while the server is stopping.
fn close(session: &Session, ctx: &ServerContext) {
    if ctx.registry.remove(session.id).is_none() {
        tracing::debug!(session_id = session.id, "session already removed");
    }
    let Some(username) = session.username.as_deref() else {
        return;
    };

    ctx.broadcaster.persist(StoreOp::Connection {
        username: username.to_string(),
        ip: session.remote_addr.ip().to_string(),
        connected: false,
    });

    tracing::info!(session_id = session.id, username = %username, "user left");
    if !ctx.is_stopping() {
        ctx.broadcaster
            .broadcast(&Outgoing::Notice(format!("{username} left")), Some(session.id));
    }
}

async fn next_line(
    id: SessionId,
    lines: &mut LineReader,
    shutdown: &mut watch::Receiver<bool>,
) -> ReadOutcome {
    tokio::select! {
        biased;
        _ = shutdown.wait_for(|stop| *stop) => ReadOutcome::Shutdown,
        frame = lines.next() => match frame {
            Some(Ok(line)) => ReadOutcome::Line(line),
            Some(Err(e)) => {
                tracing::debug!(session_id = id, error = %e, "read failed");
                ReadOutcome::Closed
            }
            None => ReadOutcome::Closed,
        },
    }
}

fn spawn_writer(
    id: SessionId,
    write_half: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sink = FramedWrite::new(write_half, LinesCodec::new());
        while let Some(line) = outbound.recv().await {
            if let Err(e) = sink.send(line).await {
                tracing::debug!(session_id = id, error = %e, "write failed");
                break;
            }
        }
        if let Err(e) = SinkExt::<String>::close(&mut sink).await {
            tracing::debug!(session_id = id, error = %e, "close failed");
        }
    })
}

/// Waits for the writer to flush what is already queued. The registry entry
/// is gone by now, so the queue closes once the writer catches up.
async fn finish_writer(id: SessionId, mut writer: JoinHandle<()>) {
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        tracing::debug!(session_id = id, "writer did not drain in time, aborting");
        writer.abort();
    }
}
