//! Background writer that keeps SQLite work off the async worker threads.
//!
//! Session handlers queue [`StoreOp`]s through a [`StoreWriter`]. A single
//! task drains the queue in order and applies each batch on tokio's blocking
//! pool. A failed write is logged and skipped; it never reaches the session
//! that queued it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::store::{ChatStore, StoreError};

/// Most operations applied per trip to the blocking pool.
const MAX_BATCH: usize = 64;

/// One write against the chat store, scoped to the writer's port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// A relayed chat line, stored decoded.
    Message {
        /// Username of the sender.
        sender: String,
        /// Decoded text.
        plaintext: String,
    },
    /// A session joined (`connected`) or left.
    Connection {
        /// Username bound to the session.
        username: String,
        /// Remote IP of the session.
        ip: String,
        /// `true` for a connect, `false` for a disconnect.
        connected: bool,
    },
    /// A relayed file announcement.
    File {
        /// User offering the file.
        sender: String,
        /// File name as announced.
        filename: String,
        /// Size in bytes.
        filesize: u64,
    },
}

impl StoreOp {
    fn apply(&self, store: &ChatStore, port: u16) -> Result<(), StoreError> {
        match self {
            Self::Message { sender, plaintext } => {
                store.save_message(sender, plaintext, port).map(drop)
            }
            Self::Connection {
                username,
                ip,
                connected,
            } => store.log_connection_event(username, ip, *connected, port),
            Self::File {
                sender,
                filename,
                filesize,
            } => store.record_file(sender, filename, *filesize, port).map(drop),
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Connection { .. } => "connection event",
            Self::File { .. } => "file",
        }
    }
}

/// Handle for queueing writes. Cheap to clone; the writer task ends once
/// every handle is dropped and the queue is drained.
#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<StoreOp>,
    store: Arc<ChatStore>,
}

impl StoreWriter {
    /// Spawns the writer task for `port`. Must be called inside a tokio
    /// runtime. The returned handle completes after the last queued write.
    #[must_use]
    pub fn spawn(store: Arc<ChatStore>, port: u16) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(Arc::clone(&store), port, rx));
        (Self { tx, store }, task)
    }

    /// Queues `op` without waiting for it to be applied.
    pub fn submit(&self, op: StoreOp) {
        if let Err(e) = self.tx.send(op) {
            tracing::warn!(op = e.0.label(), "store writer has stopped, dropping write");
        }
    }

    /// The store this writer applies to.
    #[must_use]
    pub const fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }
}

async fn run(store: Arc<ChatStore>, port: u16, mut rx: mpsc::UnboundedReceiver<StoreOp>) {
    let mut batch = Vec::with_capacity(MAX_BATCH);
    while rx.recv_many(&mut batch, MAX_BATCH).await > 0 {
        let ops = std::mem::take(&mut batch);
        let store = Arc::clone(&store);
        if let Err(e) = tokio::task::spawn_blocking(move || apply_batch(&store, port, &ops)).await
        {
            tracing::error!(port, error = %e, "store write batch did not complete");
        }
    }
    tracing::debug!(port, "store writer finished");
}

fn apply_batch(store: &ChatStore, port: u16, ops: &[StoreOp]) {
    for op in ops {
        if let Err(e) = op.apply(store, port) {
            tracing::warn!(port, op = op.label(), error = %e, "store write failed");
        }
    }
}
