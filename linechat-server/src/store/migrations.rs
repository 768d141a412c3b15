//! Schema for the server chat store.

use rusqlite::Connection;

use super::StoreError;

/// Creates every table and index if missing. Safe to run on each open.
pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            sender      TEXT NOT NULL,
            plaintext   TEXT NOT NULL,
            ciphertext  TEXT NOT NULL,
            port        INTEGER NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_port
            ON messages(port, created_at);

        -- Same content as `messages`; kept as a separate surface.
        CREATE TABLE IF NOT EXISTS message_history (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            sender      TEXT NOT NULL,
            plaintext   TEXT NOT NULL,
            ciphertext  TEXT NOT NULL,
            port        INTEGER NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_history_port
            ON message_history(port, created_at);

        CREATE TABLE IF NOT EXISTS connection_events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            username    TEXT NOT NULL,
            ip          TEXT NOT NULL,
            action      TEXT NOT NULL CHECK (action IN ('connect', 'disconnect')),
            port        INTEGER NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_port_user
            ON connection_events(port, username);

        CREATE TABLE IF NOT EXISTS accounts (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            username          TEXT NOT NULL,
            port              INTEGER NOT NULL,
            password_hash     TEXT NOT NULL DEFAULT '',
            last_login        TEXT,
            last_ip           TEXT,
            connection_count  INTEGER NOT NULL DEFAULT 0,
            UNIQUE(username, port)
        );

        CREATE TABLE IF NOT EXISTS file_metadata (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            sender      TEXT NOT NULL,
            filename    TEXT NOT NULL,
            filesize    INTEGER NOT NULL,
            port        INTEGER NOT NULL,
            created_at  TEXT NOT NULL
        );
        ",
    )?;

    tracing::debug!("chat store migrations complete");
    Ok(())
}
