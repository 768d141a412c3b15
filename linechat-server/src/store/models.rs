//! Row types returned by [`super::ChatStore`].

use std::fmt;

/// One chat message as persisted. Rows in `messages` and `message_history`
/// share this shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    /// Row id within its table.
    pub id: i64,
    /// Username of the sender.
    pub sender: String,
    /// Decoded message text.
    pub plaintext: String,
    /// Encoded message text as it travelled on the wire.
    pub ciphertext: String,
    /// Listening port the message was sent on.
    pub port: u16,
    /// Local time the message was stored.
    pub timestamp: String,
}

/// Direction of a connection event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Session bound a username.
    Connect,
    /// Session closed.
    Disconnect,
}

impl ConnectionAction {
    /// Value stored in the `action` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
        }
    }

    /// Parses the `action` column. Unknown values read as disconnects.
    #[must_use]
    pub fn from_column(value: &str) -> Self {
        if value == "connect" {
            Self::Connect
        } else {
            Self::Disconnect
        }
    }
}

impl fmt::Display for ConnectionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only connection log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Row id.
    pub id: i64,
    /// Username of the session.
    pub username: String,
    /// Remote IP of the session.
    pub ip: String,
    /// Connect or disconnect.
    pub action: ConnectionAction,
    /// Listening port.
    pub port: u16,
    /// Local time of the event.
    pub timestamp: String,
}

/// Per-port account summary, upserted on each connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    /// Username, unique per port.
    pub username: String,
    /// Listening port.
    pub port: u16,
    /// Empty for accounts created by the chat server itself.
    pub password_hash: String,
    /// Time of the most recent connect.
    pub last_login: Option<String>,
    /// IP of the most recent connect.
    pub last_ip: Option<String>,
    /// Number of connects seen on this port.
    pub connection_count: u64,
}

/// Metadata of an announced file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Row id.
    pub id: i64,
    /// Announcing user.
    pub sender: String,
    /// Announced file name.
    pub filename: String,
    /// Announced size in bytes.
    pub filesize: u64,
    /// Listening port.
    pub port: u16,
    /// Local time of the announcement.
    pub timestamp: String,
}

/// Aggregate counts for one port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    /// Rows in `messages`.
    pub message_count: u64,
    /// Distinct usernames in the connection log.
    pub distinct_users: u64,
    /// Connect events.
    pub connects: u64,
    /// Disconnect events.
    pub disconnects: u64,
}

/// Per-user activity summary used by exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStats {
    /// Username.
    pub username: String,
    /// Messages sent on this port.
    pub message_count: u64,
    /// Connects on this port.
    pub connection_count: u64,
    /// Time of the most recent connect.
    pub last_login: Option<String>,
}

/// Rows removed by [`super::ChatStore::delete_all_for_port`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    /// Rows removed from `messages`.
    pub messages: usize,
    /// Rows removed from `message_history`.
    pub history: usize,
    /// Rows removed from `connection_events`.
    pub events: usize,
    /// Rows removed from `file_metadata`.
    pub files: usize,
    /// Rows removed from `accounts`.
    pub accounts: usize,
}

impl DeleteSummary {
    /// Total rows removed across all tables.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.messages + self.history + self.events + self.files + self.accounts
    }
}
