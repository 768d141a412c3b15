//! TCP client for a `LineChat` server.
//!
//! [`ChatClient::connect`] opens the stream, sends the username line and
//! spawns a background read loop that classifies every server line and
//! reports it through [`ChatEvents`]. Sends are awaited on the caller's task
//! and encode the text with the shared cipher before it leaves the process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use linechat_proto::cipher::Cipher;
use linechat_proto::frame::{
    ClientFrame, DisconnectNotice, FileAnnouncement, MAX_LINE_LENGTH, ServerFrame,
};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use crate::events::ChatEvents;

/// Default timeout for establishing the TCP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between the disconnect line and closing the socket, so the server
/// reads the line before it sees EOF.
const DISCONNECT_LINGER: Duration = Duration::from_millis(100);

type LineWriter = FramedWrite<OwnedWriteHalf, LinesCodec>;

/// Errors returned by [`ChatClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server could not be reached.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address as given by the caller.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Connecting took longer than the timeout.
    #[error("timed out connecting to {0}")]
    Timeout(String),

    /// The username is empty after trimming.
    #[error("username must not be empty")]
    EmptyUsername,

    /// Text to send contains a line break.
    #[error("text must be a single line")]
    MultiLine,

    /// The client has disconnected or lost the connection.
    #[error("not connected")]
    NotConnected,

    /// Writing a line failed.
    #[error("write failed: {0}")]
    Write(#[from] LinesCodecError),

    /// Any other socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// State the read loop shares with the client handle.
struct Shared {
    username: String,
    connected: AtomicBool,
    /// Own chat lines sent but not yet relayed back.
    pending_echoes: AtomicUsize,
    users: parking_lot::Mutex<Vec<String>>,
    cipher: Cipher,
    events: Arc<dyn ChatEvents>,
}

/// A connected chat client.
pub struct ChatClient {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    writer: Mutex<Option<LineWriter>>,
    reader: JoinHandle<()>,
}

impl ChatClient {
    /// Connects to `addr` and announces `username`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::EmptyUsername`] for a blank username,
    /// [`ClientError::Connect`] or [`ClientError::Timeout`] if the server
    /// cannot be reached, and [`ClientError::Write`] if the username line
    /// cannot be sent.
    pub async fn connect(
        addr: impl ToSocketAddrs + std::fmt::Display,
        username: &str,
        events: Arc<dyn ChatEvents>,
    ) -> Result<Self, ClientError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ClientError::EmptyUsername);
        }

        let target = addr.to_string();
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::warn!(addr = %target, "connect timed out");
                ClientError::Timeout(target.clone())
            })?
            .map_err(|source| {
                tracing::warn!(addr = %target, error = %source, "connect failed");
                ClientError::Connect {
                    addr: target.clone(),
                    source,
                }
            })?;

        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let mut writer = FramedWrite::new(write_half, LinesCodec::new());
        writer.send(username).await?;

        let shared = Arc::new(Shared {
            username: username.to_string(),
            connected: AtomicBool::new(true),
            pending_echoes: AtomicUsize::new(0),
            users: parking_lot::Mutex::new(Vec::new()),
            cipher: Cipher::default(),
            events,
        });
        let lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let reader = tokio::spawn(read_loop(lines, Arc::clone(&shared)));

        tracing::info!(
            username = %username,
            server = %peer_addr,
            local = %local_addr,
            "connected"
        );
        Ok(Self {
            shared,
            local_addr,
            peer_addr,
            writer: Mutex::new(Some(writer)),
            reader,
        })
    }

    /// Encodes and sends one chat line, then shows it locally.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] after disconnect or server
    /// shutdown, [`ClientError::MultiLine`] for text with a line break, or
    /// a write error if the socket fails.
    pub async fn send(&self, text: &str) -> Result<(), ClientError> {
        if text.contains(['\n', '\r']) {
            return Err(ClientError::MultiLine);
        }
        let encoded = self.shared.cipher.encrypt(text);
        // Counted before the write so the relayed copy cannot beat it.
        self.shared.pending_echoes.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = self.write_line(&ClientFrame::Chat(encoded).to_line()).await {
            self.shared.take_pending_echo();
            return Err(e);
        }
        self.shared
            .events
            .on_chat_message(&self.shared.username, text);
        Ok(())
    }

    /// Announces a file by name and size. No file content is sent.
    ///
    /// # Errors
    ///
    /// Same conditions as [`send`](Self::send).
    pub async fn send_file_announcement(
        &self,
        filename: &str,
        filesize: u64,
    ) -> Result<(), ClientError> {
        if filename.contains(['\n', '\r']) {
            return Err(ClientError::MultiLine);
        }
        let frame = ClientFrame::File(FileAnnouncement {
            sender: String::new(),
            filename: filename.to_string(),
            filesize,
        });
        self.write_line(&frame.to_line()).await
    }

    /// Tells the server this client is leaving, then closes the connection.
    ///
    /// Safe to call more than once and after the server has gone away, in
    /// which case nothing is sent.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if shutting down the socket fails.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let was_connected = self.shared.connected.swap(false, Ordering::AcqRel);
        let Some(mut writer) = self.writer.lock().await.take() else {
            return Ok(());
        };
        if !was_connected {
            // The server ended the session; there is nobody to tell.
            self.reader.abort();
            return Ok(());
        }

        let notice = ClientFrame::Disconnect(DisconnectNotice {
            username: self.shared.username.clone(),
            ip: self.local_addr.ip().to_string(),
            port: self.local_addr.port(),
        });
        if let Err(e) = writer.send(notice.to_line()).await {
            tracing::debug!(error = %e, "disconnect line not delivered");
        }
        tokio::time::sleep(DISCONNECT_LINGER).await;

        let result = writer.get_mut().shutdown().await;
        self.reader.abort();
        tracing::info!(username = %self.shared.username, "disconnected");
        match result {
            Err(e) if e.kind() != std::io::ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Whether the session is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Username announced to the server.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.shared.username
    }

    /// Local socket address, as sent in the disconnect line.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address of the server.
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Users seen joining and not yet leaving, in join order.
    #[must_use]
    pub fn users(&self) -> Vec<String> {
        self.shared.users.lock().clone()
    }

    async fn write_line(&self, line: &str) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;
        if let Err(e) = writer.send(line).await {
            tracing::warn!(error = %e, "write failed, closing session");
            self.shared.connected.store(false, Ordering::Release);
            guard.take();
            return Err(e.into());
        }
        Ok(())
    }
}

impl Shared {
    /// Consumes one expected echo. Returns `false` if none was pending.
    fn take_pending_echo(&self) -> bool {
        self.pending_echoes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Reads server lines until the stream ends or the shutdown sentinel
/// arrives.
async fn read_loop(mut lines: FramedRead<OwnedReadHalf, LinesCodec>, shared: Arc<Shared>) {
    while let Some(next) = lines.next().await {
        let line = match next {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!(error = %e, "read failed");
                break;
            }
        };
        if !dispatch(&line, &shared) {
            return;
        }
    }

    if shared.connected.swap(false, Ordering::AcqRel) {
        tracing::info!("server closed the connection");
        shared.events.on_system_message("Disconnected from server");
    }
}

/// Routes one server line to the event sink. Returns `false` once the
/// session is over.
fn dispatch(line: &str, shared: &Shared) -> bool {
    match ServerFrame::parse(line) {
        Ok(ServerFrame::Shutdown) => {
            tracing::info!("server is shutting down");
            shared.connected.store(false, Ordering::Release);
            shared.events.on_shutdown();
            return false;
        }
        Ok(ServerFrame::File(file)) => {
            shared.events.on_system_message(&format!(
                "{} shared a file: {} ({} bytes)",
                file.sender, file.filename, file.filesize
            ));
        }
        Ok(ServerFrame::Joined(name)) => {
            let users = {
                let mut users = shared.users.lock();
                if !users.contains(&name) {
                    users.push(name);
                }
                users.clone()
            };
            shared.events.on_system_message(line);
            shared.events.on_user_list_change(&users);
        }
        Ok(ServerFrame::Left(name)) => {
            let users = {
                let mut users = shared.users.lock();
                users.retain(|u| *u != name);
                users.clone()
            };
            shared.events.on_system_message(line);
            shared.events.on_user_list_change(&users);
        }
        Ok(ServerFrame::Chat { sender, body }) => {
            // Own lines were already shown by `send`. Another session using
            // the same name still gets through once no echo is pending.
            if sender != shared.username || !shared.take_pending_echo() {
                let text = shared.cipher.decrypt(&body);
                shared.events.on_chat_message(&sender, &text);
            }
        }
        Ok(ServerFrame::Notice(text)) => shared.events.on_system_message(&text),
        Err(e) => {
            tracing::debug!(error = %e, "unrecognised server line");
            shared.events.on_system_message(&e.to_string());
        }
    }
    true
}
