use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::{
    ConnectionAction, ConnectionEvent, DeleteSummary, FileRecord, MessageRecord, PortStats,
    UserAccount, UserStats,
};
use super::{ChatStore, StoreError, now_timestamp};

/// Upper bound on rows returned by [`ChatStore::recent_messages`].
pub const MAX_RECENT: usize = 1000;

const MESSAGE_COLUMNS: &str = "id, sender, plaintext, ciphertext, port, created_at";

impl ChatStore {
    // -- Writes --

    /// Stores a chat message in both the flat log and the history table.
    ///
    /// The cipher text is derived here from `plaintext`. Both rows are
    /// written in one transaction: either both exist afterwards or neither.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if either insert fails; nothing is
    /// persisted in that case.
    pub fn save_message(
        &self,
        sender: &str,
        plaintext: &str,
        port: u16,
    ) -> Result<MessageRecord, StoreError> {
        let ciphertext = self.cipher.encrypt(plaintext);
        let timestamp = now_timestamp();

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (sender, plaintext, ciphertext, port, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![sender, plaintext, ciphertext, port, timestamp],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO message_history (sender, plaintext, ciphertext, port, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![sender, plaintext, ciphertext, port, timestamp],
            )?;
            tx.commit()?;

            Ok(MessageRecord {
                id,
                sender: sender.to_string(),
                plaintext: plaintext.to_string(),
                ciphertext,
                port,
                timestamp,
            })
        })
    }

    /// Appends a connection event. On connect the account summary for
    /// `(username, port)` is inserted or has its counter, last login and
    /// last IP refreshed, in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the event or upsert fails.
    pub fn log_connection_event(
        &self,
        username: &str,
        ip: &str,
        is_connect: bool,
        port: u16,
    ) -> Result<(), StoreError> {
        let action = if is_connect {
            ConnectionAction::Connect
        } else {
            ConnectionAction::Disconnect
        };
        let timestamp = now_timestamp();

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO connection_events (username, ip, action, port, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![username, ip, action.as_str(), port, timestamp],
            )?;
            if is_connect {
                tx.execute(
                    "INSERT INTO accounts (username, port, last_login, last_ip, connection_count)
                     VALUES (?1, ?2, ?3, ?4, 1)
                     ON CONFLICT(username, port) DO UPDATE SET
                         connection_count = connection_count + 1,
                         last_login = excluded.last_login,
                         last_ip = excluded.last_ip",
                    params![username, port, timestamp, ip],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Records the metadata of an announced file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the insert fails.
    pub fn record_file(
        &self,
        sender: &str,
        filename: &str,
        filesize: u64,
        port: u16,
    ) -> Result<i64, StoreError> {
        let size = i64::try_from(filesize).unwrap_or(i64::MAX);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO file_metadata (sender, filename, filesize, port, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![sender, filename, size, port, now_timestamp()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Removes every row stored under `port` from all tables.
    ///
    /// Runs as one transaction; any failure rolls the whole delete back.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if any delete fails, in which case no
    /// data has been removed.
    pub fn delete_all_for_port(&self, port: u16) -> Result<DeleteSummary, StoreError> {
        let summary = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let summary = DeleteSummary {
                messages: tx.execute("DELETE FROM messages WHERE port = ?1", [port])?,
                events: tx.execute("DELETE FROM connection_events WHERE port = ?1", [port])?,
                files: tx.execute("DELETE FROM file_metadata WHERE port = ?1", [port])?,
                history: tx.execute("DELETE FROM message_history WHERE port = ?1", [port])?,
                accounts: tx.execute("DELETE FROM accounts WHERE port = ?1", [port])?,
            };
            tx.commit()?;
            Ok(summary)
        })?;

        tracing::info!(port, rows = summary.total(), "deleted all data for port");
        Ok(summary)
    }

    // -- Reads --

    /// Most recent messages on `port`, newest first, capped at
    /// `min(limit, MAX_RECENT)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the query fails.
    pub fn recent_messages(&self, port: u16, limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
        let limit = i64::try_from(limit.min(MAX_RECENT)).unwrap_or(0);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE port = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![port, limit], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Case-insensitive substring search over plaintext, cipher text and
    /// sender of the messages on `port`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the query fails.
    pub fn search_messages(&self, port: u16, keyword: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let pattern = like_pattern(keyword);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE port = ?1
                   AND (plaintext LIKE ?2 ESCAPE '\\'
                        OR ciphertext LIKE ?2 ESCAPE '\\'
                        OR sender LIKE ?2 ESCAPE '\\')
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map(params![port, pattern], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Full history for `port` in chronological order, optionally narrowed
    /// to rows matching `keyword` the same way [`Self::search_messages`] does.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the query fails.
    pub fn history(&self, port: u16, keyword: Option<&str>) -> Result<Vec<MessageRecord>, StoreError> {
        let pattern = like_pattern(keyword.unwrap_or_default());
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM message_history
                 WHERE port = ?1
                   AND (plaintext LIKE ?2 ESCAPE '\\'
                        OR ciphertext LIKE ?2 ESCAPE '\\'
                        OR sender LIKE ?2 ESCAPE '\\')
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map(params![port, pattern], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Users whose latest connection event on `port` is a connect, sorted
    /// by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the query fails.
    pub fn active_users(&self, port: u16) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT a.username
                 FROM accounts a
                 JOIN connection_events e
                   ON e.username = a.username AND e.port = a.port
                 WHERE a.port = ?1
                   AND e.action = 'connect'
                   AND e.id = (SELECT MAX(id) FROM connection_events
                               WHERE username = a.username AND port = a.port)
                 ORDER BY a.username",
            )?;
            let rows = stmt
                .query_map([port], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    /// Aggregate counts for `port`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if a count query fails.
    pub fn port_stats(&self, port: u16) -> Result<PortStats, StoreError> {
        self.with_conn(|conn| {
            Ok(PortStats {
                message_count: count(conn, "SELECT COUNT(*) FROM messages WHERE port = ?1", port)?,
                distinct_users: count(
                    conn,
                    "SELECT COUNT(DISTINCT username) FROM connection_events WHERE port = ?1",
                    port,
                )?,
                connects: count(
                    conn,
                    "SELECT COUNT(*) FROM connection_events WHERE port = ?1 AND action = 'connect'",
                    port,
                )?,
                disconnects: count(
                    conn,
                    "SELECT COUNT(*) FROM connection_events WHERE port = ?1 AND action = 'disconnect'",
                    port,
                )?,
            })
        })
    }

    /// Per-user message and connection counts for `port`, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the query fails.
    pub fn user_stats(&self, port: u16) -> Result<Vec<UserStats>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.username,
                        (SELECT COUNT(*) FROM message_history h
                         WHERE h.port = a.port AND h.sender = a.username),
                        a.connection_count,
                        a.last_login
                 FROM accounts a
                 WHERE a.port = ?1
                 ORDER BY a.username",
            )?;
            let rows = stmt
                .query_map([port], |row| {
                    Ok(UserStats {
                        username: row.get(0)?,
                        message_count: to_u64(row.get(1)?),
                        connection_count: to_u64(row.get(2)?),
                        last_login: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Account summary for `(username, port)`, if the user ever connected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the query fails.
    pub fn account(&self, username: &str, port: u16) -> Result<Option<UserAccount>, StoreError> {
        self.with_conn(|conn| {
            let account = conn
                .query_row(
                    "SELECT username, port, password_hash, last_login, last_ip, connection_count
                     FROM accounts WHERE username = ?1 AND port = ?2",
                    params![username, port],
                    |row| {
                        Ok(UserAccount {
                            username: row.get(0)?,
                            port: row.get(1)?,
                            password_hash: row.get(2)?,
                            last_login: row.get(3)?,
                            last_ip: row.get(4)?,
                            connection_count: to_u64(row.get(5)?),
                        })
                    },
                )
                .optional()?;
            Ok(account)
        })
    }

    /// Connection log for `port`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the query fails.
    pub fn connection_events(&self, port: u16) -> Result<Vec<ConnectionEvent>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, ip, action, port, created_at
                 FROM connection_events WHERE port = ?1
                 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map([port], |row| {
                    Ok(ConnectionEvent {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        ip: row.get(2)?,
                        action: ConnectionAction::from_column(&row.get::<_, String>(3)?),
                        port: row.get(4)?,
                        timestamp: row.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Announced files on `port`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the query fails.
    pub fn files(&self, port: u16) -> Result<Vec<FileRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender, filename, filesize, port, created_at
                 FROM file_metadata WHERE port = ?1
                 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map([port], |row| {
                    Ok(FileRecord {
                        id: row.get(0)?,
                        sender: row.get(1)?,
                        filename: row.get(2)?,
                        filesize: to_u64(row.get(3)?),
                        port: row.get(4)?,
                        timestamp: row.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Number of rows for `port` in `messages` and `message_history`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if a count query fails.
    pub fn table_counts(&self, port: u16) -> Result<(u64, u64), StoreError> {
        self.with_conn(|conn| {
            Ok((
                count(conn, "SELECT COUNT(*) FROM messages WHERE port = ?1", port)?,
                count(conn, "SELECT COUNT(*) FROM message_history WHERE port = ?1", port)?,
            ))
        })
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get(0)?,
        sender: row.get(1)?,
        plaintext: row.get(2)?,
        ciphertext: row.get(3)?,
        port: row.get(4)?,
        timestamp: row.get(5)?,
    })
}

fn count(conn: &Connection, sql: &str, port: u16) -> Result<u64, StoreError> {
    let n: i64 = conn.query_row(sql, [port], |row| row.get(0))?;
    Ok(to_u64(n))
}

fn to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or_default()
}

/// `%keyword%` with LIKE wildcards in `keyword` escaped.
fn like_pattern(keyword: &str) -> String {
    let mut pattern = String::with_capacity(keyword.len() + 2);
    pattern.push('%');
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
