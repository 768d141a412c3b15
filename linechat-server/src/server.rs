//! Listener lifecycle: bind, accept loop, and the ordered shutdown sequence.
//!
//! The listening port doubles as the tenant key for everything the server
//! persists, so two servers on different ports sharing one database never
//! see each other's data.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::broadcast::{Broadcaster, Outgoing};
use crate::persist::StoreWriter;
use crate::registry::SessionRegistry;
use crate::session;
use crate::store::ChatStore;

/// Default pause between the shutdown sentinel and closing the sockets.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(250);

/// Default bound on waiting for session handlers during stop.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors returned by [`ChatServer::start`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// `start` was called on a server that is already listening.
    #[error("server already running on {0}")]
    AlreadyRunning(SocketAddr),

    /// Any other socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the server keeps chat history.
#[derive(Clone, Default)]
pub enum StoreSource {
    /// No persistence; chat is relayed only.
    #[default]
    Disabled,
    /// Open (or create) a database at this path on every start.
    Path(PathBuf),
    /// Use a store owned by the caller.
    Shared(Arc<ChatStore>),
}

/// Tunables for a [`ChatServer`].
#[derive(Clone)]
pub struct ServerOptions {
    /// Interface to listen on.
    pub host: IpAddr,
    /// Pause after the shutdown sentinel so clients can read it.
    pub grace_period: Duration,
    /// How long stop waits for handlers before aborting them.
    pub handler_timeout: Duration,
    /// Chat history backend.
    pub store: StoreSource,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            grace_period: DEFAULT_GRACE_PERIOD,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            store: StoreSource::Disabled,
        }
    }
}

/// State shared by the accept loop and every session handler.
pub struct ServerContext {
    /// Live sessions.
    pub registry: Arc<SessionRegistry>,
    /// Fan-out and persistence of outgoing lines.
    pub broadcaster: Broadcaster,
    /// Bound port, used as the tenant key.
    pub port: u16,
    stopping: AtomicBool,
}

impl ServerContext {
    /// Whether [`ChatServer::stop`] has begun.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

struct Running {
    ctx: Arc<ServerContext>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    stop_accepting: oneshot::Sender<()>,
    accept_task: JoinHandle<JoinSet<()>>,
    store_task: Option<JoinHandle<()>>,
}

/// A multi-client line chat server.
pub struct ChatServer {
    options: ServerOptions,
    registry: Arc<SessionRegistry>,
    running: Option<Running>,
}

impl Default for ChatServer {
    fn default() -> Self {
        Self::new(ServerOptions::default())
    }
}

impl ChatServer {
    /// Creates a stopped server.
    #[must_use]
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            registry: Arc::new(SessionRegistry::new()),
            running: None,
        }
    }

    /// Binds `port` and starts accepting connections.
    ///
    /// Port `0` binds an ephemeral port; the port actually bound is what the
    /// server reports and persists under. The session registry and its
    /// counters start empty. If the configured store cannot be opened the
    /// server runs without persistence.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyRunning`] if the server is listening,
    /// or [`ServerError::Bind`] if the port cannot be bound. No running state
    /// is left behind on error.
    pub async fn start(&mut self, port: u16) -> Result<SocketAddr, ServerError> {
        if let Some(running) = &self.running {
            return Err(ServerError::AlreadyRunning(running.local_addr));
        }

        let addr = SocketAddr::new(self.options.host, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        self.registry.reset();
        let (writer, store_task) = self
            .open_store()
            .map(|store| StoreWriter::spawn(store, local_addr.port()))
            .unzip();
        let ctx = Arc::new(ServerContext {
            registry: Arc::clone(&self.registry),
            broadcaster: Broadcaster::new(Arc::clone(&self.registry), writer, local_addr.port()),
            port: local_addr.port(),
            stopping: AtomicBool::new(false),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (stop_accepting, stop_rx) = oneshot::channel();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&ctx),
            shutdown_rx,
            stop_rx,
        ));

        tracing::info!(addr = %local_addr, "chat server listening");
        self.running = Some(Running {
            ctx,
            local_addr,
            shutdown_tx,
            stop_accepting,
            accept_task,
            store_task,
        });
        Ok(local_addr)
    }

    /// Stops the server.
    ///
    /// Order: stop accepting, send `SERVER_SHUTDOWN` to every session, wait
    /// the grace period, signal every handler to close, wait (bounded) for
    /// them, clear the registry, release the listener, then wait (bounded)
    /// for queued store writes. Does nothing if the server is not running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let Running {
            ctx,
            local_addr,
            shutdown_tx,
            stop_accepting,
            accept_task,
            store_task,
        } = running;

        ctx.stopping.store(true, Ordering::Release);
        let _ = stop_accepting.send(());
        let mut sessions = match accept_task.await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(error = %e, "accept loop ended abnormally");
                JoinSet::new()
            }
        };

        let report = ctx.broadcaster.broadcast(&Outgoing::Shutdown, None);
        tracing::info!(
            addr = %local_addr,
            notified = report.delivered,
            "shutdown sentinel sent"
        );
        tokio::time::sleep(self.options.grace_period).await;

        shutdown_tx.send_replace(true);
        let drained = tokio::time::timeout(self.options.handler_timeout, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = sessions.len(),
                "session handlers did not finish in time, aborting"
            );
            sessions.shutdown().await;
        }

        let leftover = self.registry.clear();
        if leftover > 0 {
            tracing::debug!(leftover, "cleared remaining sessions");
        }
        // Last handle to the store writer; its queue closes here.
        drop(ctx);
        if let Some(task) = store_task {
            if tokio::time::timeout(self.options.handler_timeout, task)
                .await
                .is_err()
            {
                tracing::warn!(addr = %local_addr, "store writes still pending after stop");
            }
        }
        tracing::info!(addr = %local_addr, "chat server stopped");
    }

    /// Whether the server is accepting connections.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bound address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Bound port while running.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.local_addr().map(|a| a.port())
    }

    /// Number of sessions currently registered.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Connections accepted since the last start.
    #[must_use]
    pub fn lifetime_connections(&self) -> u64 {
        self.registry.lifetime_total()
    }

    /// Usernames of sessions that completed the handshake, in accept order.
    #[must_use]
    pub fn usernames(&self) -> Vec<String> {
        self.registry.usernames()
    }

    /// Store used by the running server, if persistence is active.
    #[must_use]
    pub fn store(&self) -> Option<Arc<ChatStore>> {
        self.running
            .as_ref()
            .and_then(|r| r.ctx.broadcaster.store().cloned())
    }

    fn open_store(&self) -> Option<Arc<ChatStore>> {
        match &self.options.store {
            StoreSource::Disabled => None,
            StoreSource::Shared(store) => Some(Arc::clone(store)),
            StoreSource::Path(path) => match ChatStore::open(path) {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "chat store unavailable, running without persistence"
                    );
                    None
                }
            },
        }
    }
}

impl Drop for ChatServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown_tx.send_replace(true);
            running.accept_task.abort();
        }
    }
}

/// Accepts connections until told to stop or the listener fails, then
/// hands back the set of session handlers still running.
async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    shutdown: watch::Receiver<bool>,
    mut stop: oneshot::Receiver<()>,
) -> JoinSet<()> {
    let mut sessions = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut stop => break,
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    let id = ctx.registry.register(remote_addr, tx);
                    tracing::debug!(session_id = id, addr = %remote_addr, "accepted connection");
                    sessions.spawn(session::run(
                        stream,
                        id,
                        rx,
                        Arc::clone(&ctx),
                        shutdown.clone(),
                    ));
                }
                Err(e) if is_transient(&e) => {
                    tracing::debug!(error = %e, "transient accept error");
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed, no longer accepting");
                    break;
                }
            },
        }
    }
    sessions
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
    )
}
