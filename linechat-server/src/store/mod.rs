//! Port-scoped SQLite persistence for messages, connection events and
//! account statistics.
//!
//! Every operation takes the server's listening port, which partitions all
//! data: nothing written under one port is visible to queries, deletes or
//! exports scoped to another.
//!
//! A single [`rusqlite::Connection`] sits behind a [`parking_lot::Mutex`]
//! so the store can be shared between session tasks. Callers on the
//! delivery path treat a [`StoreError`] as a logged no-op.

mod migrations;
pub mod models;
mod queries;

use std::path::{Path, PathBuf};

use linechat_proto::cipher::Cipher;
use parking_lot::Mutex;
use rusqlite::Connection;

pub use models::{
    ConnectionAction, ConnectionEvent, DeleteSummary, FileRecord, MessageRecord, PortStats,
    UserAccount, UserStats,
};
pub use queries::MAX_RECENT;

/// Errors raised by the chat store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite reported an error (including aborted transactions).
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database directory or an export file could not be written.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Shared handle to the server chat database.
pub struct ChatStore {
    conn: Mutex<Connection>,
    cipher: Cipher,
    path: Option<PathBuf>,
}

impl ChatStore {
    /// Opens (or creates) the database at `path`, creating parent
    /// directories and running migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory cannot be created or SQLite
    /// fails to open or migrate the file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrations::run(&conn)?;

        tracing::info!(path = %path.display(), "chat store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            cipher: Cipher::default(),
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens a private in-memory database. Used by tests and `--db :memory:`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if SQLite cannot create the database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cipher: Cipher::default(),
            path: None,
        })
    }

    /// File backing this store, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Cipher used to derive stored cipher text.
    #[must_use]
    pub const fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }
}

/// Local wall-clock time in the format stored in every `created_at` column.
///
/// Millisecond precision keeps lexical order equal to time order.
#[must_use]
pub fn now_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}
