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

//! End-to-end chat between two `ChatClient`s through a live server.
//!
//! These tests validate:
//! - both clients see the join notices and track the user list
//! - a chat line travels encoded and is decoded by the receiver
//! - the server persists the plaintext under its listening port
//! - file announcements reach the other client as system messages
//! - an explicit disconnect produces a leave notice
//! - a rejected file announcement reaches only its sender, as a system message
//! - two sessions under one name each suppress only their own echo

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use linechat::client::ChatClient;
use linechat::events::{ChannelSink, ClientEvent};
use linechat_proto::cipher;
use linechat_server::server::{ChatServer, ServerOptions, StoreSource};
use linechat_server::store::ChatStore;
use tokio::sync::mpsc::UnboundedReceiver;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server(store: &Arc<ChatStore>) -> (ChatServer, SocketAddr) {
    let mut server = ChatServer::new(ServerOptions {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        grace_period: Duration::from_millis(100),
        store: StoreSource::Shared(Arc::clone(store)),
        ..ServerOptions::default()
    });
    let addr = server.start(0).await.unwrap();
    (server, addr)
}

async fn join(addr: SocketAddr, name: &str) -> (ChatClient, UnboundedReceiver<ClientEvent>) {
    let (sink, rx) = ChannelSink::new();
    let client = ChatClient::connect(addr, name, Arc::new(sink)).await.unwrap();
    (client, rx)
}

/// Waits for the first event matching `pred`, skipping others.
async fn wait_event(
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

async fn wait_system(rx: &mut UnboundedReceiver<ClientEvent>, text: &str) {
    wait_event(rx, |e| matches!(e, ClientEvent::System(t) if t == text)).await;
}

#[tokio::test]
async fn alice_and_bob_exchange_a_message() {
    let store = Arc::new(ChatStore::open_in_memory().unwrap());
    let (mut server, addr) = start_server(&store).await;

    let (alice, mut alice_rx) = join(addr, "alice").await;
    wait_system(&mut alice_rx, "alice joined").await;
    let (bob, mut bob_rx) = join(addr, "bob").await;
    wait_system(&mut bob_rx, "bob joined").await;
    wait_system(&mut alice_rx, "bob joined").await;
    assert_eq!(alice.users(), vec!["alice".to_string(), "bob".to_string()]);

    alice.send("hello").await.unwrap();

    // Alice sees her own line locally, once.
    let own = wait_event(&mut alice_rx, |e| matches!(e, ClientEvent::Chat { .. })).await;
    assert_eq!(
        own,
        ClientEvent::Chat {
            sender: "alice".into(),
            text: "hello".into()
        }
    );

    let received = wait_event(&mut bob_rx, |e| matches!(e, ClientEvent::Chat { .. })).await;
    assert_eq!(
        received,
        ClientEvent::Chat {
            sender: "alice".into(),
            text: "hello".into()
        }
    );

    let port = addr.port();
    for _ in 0..100 {
        if !store.recent_messages(port, 10).unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let rows = store.recent_messages(port, 10).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].sender, "alice");
    assert_eq!(rows[0].plaintext, "hello");
    assert_eq!(rows[0].ciphertext, cipher::encrypt("hello"));
    assert_eq!(rows[0].port, port);
    assert_eq!(store.table_counts(port).unwrap(), (1, 1));

    bob.disconnect().await.unwrap();
    alice.disconnect().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn file_announcement_and_leave_notice() {
    let store = Arc::new(ChatStore::open_in_memory().unwrap());
    let (mut server, addr) = start_server(&store).await;

    let (alice, mut alice_rx) = join(addr, "alice").await;
    wait_system(&mut alice_rx, "alice joined").await;
    let (bob, mut bob_rx) = join(addr, "bob").await;
    wait_system(&mut bob_rx, "bob joined").await;
    wait_system(&mut alice_rx, "bob joined").await;

    bob.send_file_announcement("photo.png", 4096).await.unwrap();
    wait_system(&mut alice_rx, "bob shared a file: photo.png (4096 bytes)").await;

    bob.disconnect().await.unwrap();
    wait_system(&mut alice_rx, "bob left").await;
    let users = wait_event(&mut alice_rx, |e| matches!(e, ClientEvent::Users(_))).await;
    assert_eq!(users, ClientEvent::Users(vec!["alice".into()]));

    // The disconnect is recorded in the background, after the leave notice.
    for _ in 0..100 {
        if store.active_users(addr.port()).unwrap() == vec!["alice".to_string()] {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.active_users(addr.port()).unwrap(), vec!["alice".to_string()]);
    let account = store.account("bob", addr.port()).unwrap().unwrap();
    assert_eq!(account.connection_count, 1);
    assert_eq!(account.last_ip.as_deref(), Some("127.0.0.1"));

    alice.disconnect().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn rejected_file_announcement_is_a_system_message() {
    let store = Arc::new(ChatStore::open_in_memory().unwrap());
    let (mut server, addr) = start_server(&store).await;

    let (alice, mut alice_rx) = join(addr, "alice").await;
    wait_system(&mut alice_rx, "alice joined").await;
    let (bob, mut bob_rx) = join(addr, "bob").await;
    wait_system(&mut bob_rx, "bob joined").await;
    wait_system(&mut alice_rx, "bob joined").await;

    // An empty name goes out as `FILE::12`, which the server rejects.
    alice.send_file_announcement("", 12).await.unwrap();
    let notice = wait_event(&mut alice_rx, |e| {
        matches!(e, ClientEvent::System(_) | ClientEvent::Chat { .. })
    })
    .await;
    match notice {
        ClientEvent::System(text) => assert!(text.contains("malformed file announcement")),
        other => panic!("expected a system message, got {other:?}"),
    }
    assert!(alice.is_connected());

    // Bob never hears about it; his next event is Alice's chat line.
    alice.send("after").await.unwrap();
    let next = wait_event(&mut bob_rx, |e| {
        matches!(e, ClientEvent::System(_) | ClientEvent::Chat { .. })
    })
    .await;
    assert_eq!(
        next,
        ClientEvent::Chat {
            sender: "alice".into(),
            text: "after".into()
        }
    );

    bob.disconnect().await.unwrap();
    alice.disconnect().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn sessions_sharing_a_name_still_hear_each_other() {
    let store = Arc::new(ChatStore::open_in_memory().unwrap());
    let (mut server, addr) = start_server(&store).await;

    let (first, mut first_rx) = join(addr, "alice").await;
    wait_system(&mut first_rx, "alice joined").await;
    let (second, mut second_rx) = join(addr, "alice").await;
    wait_system(&mut second_rx, "alice joined").await;
    wait_system(&mut first_rx, "alice joined").await;

    let is_chat = |e: &ClientEvent| matches!(e, ClientEvent::Chat { .. });
    let chat = |text: &str| ClientEvent::Chat {
        sender: "alice".into(),
        text: text.into(),
    };

    first.send("from the first").await.unwrap();
    assert_eq!(wait_event(&mut first_rx, is_chat).await, chat("from the first"));
    assert_eq!(wait_event(&mut second_rx, is_chat).await, chat("from the first"));

    // The first session's relayed copy was swallowed, so the next chat it
    // sees is the namesake's line.
    second.send("from the second").await.unwrap();
    assert_eq!(wait_event(&mut second_rx, is_chat).await, chat("from the second"));
    assert_eq!(wait_event(&mut first_rx, is_chat).await, chat("from the second"));

    first.disconnect().await.unwrap();
    second.disconnect().await.unwrap();
    server.stop().await;
}
