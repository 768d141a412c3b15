//! Fan-out of server lines to every session, with persistence of chat
//! lines.
//!
//! Delivery and durability are decoupled: a line is queued for every
//! session first, then chat lines are handed to the [`StoreWriter`]. A store
//! failure is logged by the writer and never affects delivery.

use std::sync::Arc;

use linechat_proto::frame::{FileAnnouncement, ServerFrame};

use crate::persist::{StoreOp, StoreWriter};
use crate::registry::{BroadcastReport, SessionId, SessionRegistry};
use crate::store::ChatStore;

/// A line the server sends to all sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// System notice such as `"alice joined"`. Not persisted.
    Notice(String),
    /// A chat line. `body` is the encoded text as received and `plaintext`
    /// its decoding, which is what gets persisted.
    Chat {
        /// Username of the sender.
        sender: String,
        /// Decoded text.
        plaintext: String,
        /// Encoded text, relayed unmodified.
        body: String,
    },
    /// A relayed file announcement. Recorded separately by the session.
    File(FileAnnouncement),
    /// The shutdown sentinel.
    Shutdown,
}

impl Outgoing {
    /// The wire line for this message.
    #[must_use]
    pub fn to_line(&self) -> String {
        match self {
            Self::Notice(text) => text.clone(),
            Self::Chat { sender, body, .. } => ServerFrame::Chat {
                sender: sender.clone(),
                body: body.clone(),
            }
            .to_line(),
            Self::File(file) => ServerFrame::File(file.clone()).to_line(),
            Self::Shutdown => ServerFrame::Shutdown.to_line(),
        }
    }
}

/// Sends lines to every registered session and persists chat lines.
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
    writer: Option<StoreWriter>,
    port: u16,
}

impl Broadcaster {
    /// Creates a broadcaster for sessions on `port`. Without a writer, chat
    /// lines are delivered but not persisted.
    #[must_use]
    pub const fn new(
        registry: Arc<SessionRegistry>,
        writer: Option<StoreWriter>,
        port: u16,
    ) -> Self {
        Self {
            registry,
            writer,
            port,
        }
    }

    /// Delivers `message` to every registered session, the origin included,
    /// in registry order.
    pub fn broadcast(&self, message: &Outgoing, origin: Option<SessionId>) -> BroadcastReport {
        let line = message.to_line();
        let report = self.registry.broadcast(&line);

        if !report.failed.is_empty() {
            tracing::warn!(
                port = self.port,
                origin = ?origin,
                failed = report.failed.len(),
                "broadcast skipped sessions with closed writers"
            );
        }
        tracing::debug!(
            port = self.port,
            origin = ?origin,
            delivered = report.delivered,
            "broadcast line"
        );

        if let Outgoing::Chat {
            sender, plaintext, ..
        } = message
        {
            self.persist(StoreOp::Message {
                sender: sender.clone(),
                plaintext: plaintext.clone(),
            });
        }

        report
    }

    /// Store behind the writer, if persistence is active.
    #[must_use]
    pub fn store(&self) -> Option<&Arc<ChatStore>> {
        self.writer.as_ref().map(StoreWriter::store)
    }

    /// Queues a write for this port. Does nothing without a store.
    pub fn persist(&self, op: StoreOp) {
        if let Some(writer) = &self.writer {
            writer.submit(op);
        }
    }

    /// Listening port used as the tenant key.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}
