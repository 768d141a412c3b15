//! Notifications from the client network task to whoever presents them.
//!
//! The network side only ever talks to a [`ChatEvents`] implementation. A
//! terminal front end, a test, or any other consumer plugs in here; the
//! usual choice is [`ChannelSink`], which turns every callback into a
//! [`ClientEvent`] on a tokio channel.

use tokio::sync::mpsc;

/// Callbacks invoked by [`crate::client::ChatClient`].
///
/// Called from the client's background read task, so implementations must
/// not block.
pub trait ChatEvents: Send + Sync + 'static {
    /// A line to show as a system message (joins, leaves, file
    /// announcements, protocol problems).
    fn on_system_message(&self, text: &str);

    /// A decoded chat message.
    fn on_chat_message(&self, sender: &str, text: &str);

    /// The known user list changed.
    fn on_user_list_change(&self, users: &[String]);

    /// The server announced it is shutting down.
    fn on_shutdown(&self);
}

/// Owned form of a [`ChatEvents`] callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// See [`ChatEvents::on_system_message`].
    System(String),
    /// See [`ChatEvents::on_chat_message`].
    Chat {
        /// Username of the sender.
        sender: String,
        /// Decoded text.
        text: String,
    },
    /// See [`ChatEvents::on_user_list_change`].
    Users(Vec<String>),
    /// See [`ChatEvents::on_shutdown`].
    Shutdown,
}

/// [`ChatEvents`] implementation forwarding every callback over a channel.
///
/// Events sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its events arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}

impl ChatEvents for ChannelSink {
    fn on_system_message(&self, text: &str) {
        self.emit(ClientEvent::System(text.to_string()));
    }

    fn on_chat_message(&self, sender: &str, text: &str) {
        self.emit(ClientEvent::Chat {
            sender: sender.to_string(),
            text: text.to_string(),
        });
    }

    fn on_user_list_change(&self, users: &[String]) {
        self.emit(ClientEvent::Users(users.to_vec()));
    }

    fn on_shutdown(&self) {
        self.emit(ClientEvent::Shutdown);
    }
}
