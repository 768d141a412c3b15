//! `LineChat` client library.
//!
//! The network side ([`client`]) reports everything it receives through the
//! [`events::ChatEvents`] trait and never touches the terminal. Local
//! accounts live in [`auth`].

pub mod auth;
pub mod client;
pub mod config;
pub mod events;

pub use client::{ChatClient, ClientError};
pub use events::{ChannelSink, ChatEvents, ClientEvent};
