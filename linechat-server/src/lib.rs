//! `LineChat` server library.
//!
//! Exposes the chat server for use in tests and embedding. The server
//! accepts TCP connections, binds each to a username from its first line,
//! broadcasts chat lines to every session, and persists history under the
//! listening port.

pub mod broadcast;
pub mod config;
pub mod export;
pub mod persist;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;

pub use server::{ChatServer, ServerError, ServerOptions, StoreSource};
pub use store::ChatStore;
