// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Server shutdown as seen by connected clients.
//!
//! These tests validate:
//! - every client gets `on_shutdown` before the connection closes
//! - sends after shutdown fail with `NotConnected`
//! - disconnect after shutdown is a no-op rather than an error

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use linechat::client::{ChatClient, ClientError};
use linechat::events::{ChannelSink, ClientEvent};
use linechat_server::server::{ChatServer, ServerOptions};
use tokio::sync::mpsc::UnboundedReceiver;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

async fn next_matching(
    rx: &mut UnboundedReceiver<ClientEvent>,
    pred: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn stop_notifies_both_clients() {
    let mut server = ChatServer::new(ServerOptions {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        grace_period: Duration::from_millis(100),
        ..ServerOptions::default()
    });
    let addr = server.start(0).await.unwrap();

    let mut clients = Vec::new();
    for name in ["alice", "bob"] {
        let (sink, mut rx) = ChannelSink::new();
        let client = ChatClient::connect(addr, name, Arc::new(sink)).await.unwrap();
        let joined = format!("{name} joined");
        next_matching(&mut rx, |e| matches!(e, ClientEvent::System(t) if *t == joined)).await;
        clients.push((client, rx));
    }

    server.stop().await;

    for (client, rx) in &mut clients {
        let event = next_matching(rx, |e| {
            matches!(e, ClientEvent::Shutdown | ClientEvent::System(_))
                && !matches!(e, ClientEvent::System(t) if t.ends_with(" joined"))
        })
        .await;
        assert_eq!(event, ClientEvent::Shutdown);
        assert!(!client.is_connected());
        assert!(matches!(
            client.send("anyone?").await,
            Err(ClientError::NotConnected)
        ));
        client.disconnect().await.unwrap();
    }
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let mut server = ChatServer::new(ServerOptions {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        ..ServerOptions::default()
    });
    let addr = server.start(0).await.unwrap();
    server.stop().await;

    let (sink, _rx) = ChannelSink::new();
    let result = ChatClient::connect(addr, "late", Arc::new(sink)).await;
    assert!(matches!(result, Err(ClientError::Connect { .. })));
}
