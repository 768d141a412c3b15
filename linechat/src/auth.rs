//! Local account store for the client.
//!
//! Accounts live in a small SQLite file on the user's machine; the server
//! never sees these passwords. Passwords are hashed with Argon2id and
//! stored as PHC strings.

use std::path::{Path, PathBuf};

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

/// Errors raised by the account store.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// SQLite reported an error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database directory could not be created.
    #[error("failed to create {path}: {source}")]
    Io {
        /// Directory that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An account with this username already exists.
    #[error("username {0:?} is already registered")]
    UsernameTaken(String),

    /// Username or password is blank.
    #[error("username and password must not be empty")]
    EmptyCredentials,

    /// Hashing failed or a stored hash could not be parsed.
    #[error("password hash error: {0}")]
    Hash(String),
}

/// SQLite-backed username/password store.
pub struct AuthStore {
    conn: Mutex<Connection>,
}

impl AuthStore {
    /// Opens (or creates) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if the directory cannot be created or SQLite
    /// fails to open the file.
    pub fn open(path: &Path) -> Result<Self, AuthError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| AuthError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Opens a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Sqlite`] if SQLite cannot create the database.
    pub fn open_in_memory() -> Result<Self, AuthError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AuthError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                username      TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at    TEXT NOT NULL,
                last_login    TEXT
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an account.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UsernameTaken`] for a duplicate username and
    /// [`AuthError::EmptyCredentials`] for blank input.
    pub fn register(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::EmptyCredentials);
        }

        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Hash(e.to_string()))?
            .to_string();

        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO users (username, password_hash, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(username) DO NOTHING",
            params![username, hash, now_timestamp()],
        )?;
        drop(conn);

        if inserted == 0 {
            return Err(AuthError::UsernameTaken(username.to_string()));
        }
        tracing::info!(username = %username, "account registered");
        Ok(())
    }

    /// Checks a password. On success the last-login time is updated.
    ///
    /// Returns `false` for an unknown user or a wrong password.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if the database fails or the stored hash is
    /// corrupt.
    pub fn verify(&self, username: &str, password: &str) -> Result<bool, AuthError> {
        let username = username.trim();
        let conn = self.conn.lock();
        let stored: Option<String> = conn
            .query_row(
                "SELECT password_hash FROM users WHERE username = ?1",
                [username],
                |row| row.get(0),
            )
            .optional()?;
        let Some(stored) = stored else {
            return Ok(false);
        };

        let parsed = PasswordHash::new(&stored).map_err(|e| AuthError::Hash(e.to_string()))?;
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            tracing::debug!(username = %username, "password rejected");
            return Ok(false);
        }

        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE username = ?2",
            params![now_timestamp(), username],
        )?;
        Ok(true)
    }

    /// Whether an account exists.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Sqlite`] if the query fails.
    pub fn exists(&self, username: &str) -> Result<bool, AuthError> {
        let found: Option<i64> = self
            .conn
            .lock()
            .query_row(
                "SELECT 1 FROM users WHERE username = ?1",
                [username.trim()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Last successful login, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Sqlite`] if the query fails.
    pub fn last_login(&self, username: &str) -> Result<Option<String>, AuthError> {
        let value: Option<Option<String>> = self
            .conn
            .lock()
            .query_row(
                "SELECT last_login FROM users WHERE username = ?1",
                [username.trim()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten())
    }
}

fn now_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}
