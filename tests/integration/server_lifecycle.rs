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

//! Integration tests for the server over raw TCP.
//!
//! These tests validate:
//! - registry size after concurrent accepts and partial disconnects
//! - broadcast reaching every session despite a peer vanishing mid-flight
//! - the stop sequence (sentinel first, then close, no leave notices)
//! - disconnect and file announcement handling
//! - history partitioned by listening port

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use linechat_proto::cipher;
use linechat_server::server::{ChatServer, ServerOptions, StoreSource};
use linechat_server::store::{ChatStore, ConnectionAction};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw line-level connection to the server.
struct RawConn {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl RawConn {
    async fn open(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn join(addr: SocketAddr, username: &str) -> Self {
        let mut conn = Self::open(addr).await;
        conn.send(username).await;
        conn.expect(&format!("{username} joined")).await;
        conn
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    /// Next line, or `None` on EOF.
    async fn next(&mut self) -> Option<String> {
        tokio::time::timeout(READ_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap_or(None)
    }

    async fn expect(&mut self, want: &str) {
        assert_eq!(self.next().await.as_deref(), Some(want));
    }

    /// Skips lines until `want` arrives.
    async fn expect_eventually(&mut self, want: &str) {
        while let Some(line) = self.next().await {
            if line == want {
                return;
            }
        }
        panic!("connection closed before {want:?}");
    }
}

fn options(store: StoreSource) -> ServerOptions {
    ServerOptions {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        grace_period: Duration::from_millis(100),
        store,
        ..ServerOptions::default()
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registry_size_tracks_accepts_and_disconnects() {
    const N: usize = 20;
    const M: usize = 7;

    let mut server = ChatServer::new(options(StoreSource::Disabled));
    let addr = server.start(0).await.unwrap();

    let joins = (0..N).map(|i| {
        tokio::spawn(async move {
            let mut conn = RawConn::open(addr).await;
            conn.send(&format!("user{i}")).await;
            conn
        })
    });
    let mut conns = Vec::new();
    for join in joins {
        conns.push(join.await.unwrap());
    }

    wait_for(|| server.usernames().len() == N).await;
    assert_eq!(server.session_count(), N);

    conns.truncate(N - M);
    wait_for(|| server.session_count() == N - M).await;
    assert_eq!(server.lifetime_connections(), N as u64);

    server.stop().await;
    assert_eq!(server.session_count(), 0);
}

#[tokio::test]
async fn broadcast_survives_a_vanishing_peer() {
    let mut server = ChatServer::new(options(StoreSource::Disabled));
    let addr = server.start(0).await.unwrap();

    let mut alice = RawConn::join(addr, "alice").await;
    let mut others = Vec::new();
    for name in ["bob", "carol", "dave"] {
        others.push(RawConn::join(addr, name).await);
        alice.expect(&format!("{name} joined")).await;
    }
    let doomed = RawConn::join(addr, "eve").await;
    drop(doomed);

    let body = cipher::encrypt("still here");
    alice.send(&body).await;

    let want = format!("alice: {body}");
    alice.expect_eventually(&want).await;
    for conn in &mut others {
        conn.expect_eventually(&want).await;
    }

    server.stop().await;
}

#[tokio::test]
async fn stop_sends_sentinel_then_closes_without_leave_notices() {
    let store = Arc::new(ChatStore::open_in_memory().unwrap());
    let mut server = ChatServer::new(options(StoreSource::Shared(Arc::clone(&store))));
    let addr = server.start(0).await.unwrap();

    let mut alice = RawConn::join(addr, "alice").await;
    let mut bob = RawConn::join(addr, "bob").await;
    alice.expect("bob joined").await;

    server.stop().await;

    alice.expect("SERVER_SHUTDOWN").await;
    assert_eq!(alice.next().await, None);
    bob.expect("SERVER_SHUTDOWN").await;
    assert_eq!(bob.next().await, None);

    assert!(!server.is_running());
    assert!(TcpStream::connect(addr).await.is_err());

    // Disconnects are still recorded even though nobody is told.
    let events = store.connection_events(addr.port()).unwrap();
    let disconnects = events
        .iter()
        .filter(|e| e.action == ConnectionAction::Disconnect)
        .count();
    assert_eq!(disconnects, 2);
}

#[tokio::test]
async fn disconnect_line_ends_session_and_notifies_others() {
    let store = Arc::new(ChatStore::open_in_memory().unwrap());
    let mut server = ChatServer::new(options(StoreSource::Shared(Arc::clone(&store))));
    let addr = server.start(0).await.unwrap();

    let mut alice = RawConn::join(addr, "alice").await;
    let mut bob = RawConn::join(addr, "bob").await;
    alice.expect("bob joined").await;

    bob.send("DISCONNECT:bob:127.0.0.1:5555").await;
    alice.expect("bob left").await;
    assert_eq!(bob.next().await, None);

    // A malformed disconnect still closes the session.
    let mut carol = RawConn::join(addr, "carol").await;
    alice.expect("carol joined").await;
    carol.send("DISCONNECT:garbage").await;
    alice.expect("carol left").await;

    wait_for(|| server.session_count() == 1).await;
    wait_for(|| store.active_users(addr.port()).unwrap() == vec!["alice".to_string()]).await;
    server.stop().await;
}

#[tokio::test]
async fn file_announcements_are_relayed_and_recorded() {
    let store = Arc::new(ChatStore::open_in_memory().unwrap());
    let mut server = ChatServer::new(options(StoreSource::Shared(Arc::clone(&store))));
    let addr = server.start(0).await.unwrap();

    let mut alice = RawConn::join(addr, "alice").await;
    let mut bob = RawConn::join(addr, "bob").await;
    alice.expect("bob joined").await;

    alice.send("FILE:report:v2.pdf:2048").await;
    bob.expect("FILE:alice:report:v2.pdf:2048").await;
    alice.expect("FILE:alice:report:v2.pdf:2048").await;

    // Malformed: only the sender hears about it, and stays connected.
    alice.send("FILE:nosize").await;
    let notice = alice.next().await.unwrap();
    assert!(notice.contains("malformed file announcement"));
    assert!(!notice.contains(": "), "notice must not look like a chat line");

    let body = cipher::encrypt("after");
    alice.send(&body).await;
    bob.expect(&format!("alice: {body}")).await;

    // Writes are applied in order, so once the chat row lands the file row
    // is already there.
    wait_for(|| !store.recent_messages(addr.port(), 10).unwrap().is_empty()).await;
    let files = store.files(addr.port()).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].sender, "alice");
    assert_eq!(files[0].filename, "report:v2.pdf");
    assert_eq!(files[0].filesize, 2048);
    // File lines are not chat history.
    let history = store.recent_messages(addr.port(), 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].plaintext, "after");

    server.stop().await;
}

#[tokio::test]
async fn history_is_partitioned_by_port() {
    let store = Arc::new(ChatStore::open_in_memory().unwrap());
    let mut first = ChatServer::new(options(StoreSource::Shared(Arc::clone(&store))));
    let mut second = ChatServer::new(options(StoreSource::Shared(Arc::clone(&store))));
    let a = first.start(0).await.unwrap();
    let b = second.start(0).await.unwrap();

    let mut alice = RawConn::join(a, "alice").await;
    let mut bob = RawConn::join(b, "bob").await;
    alice.send(&cipher::encrypt("on first")).await;
    bob.send(&cipher::encrypt("on second")).await;
    alice.expect_eventually(&format!("alice: {}", cipher::encrypt("on first"))).await;
    bob.expect_eventually(&format!("bob: {}", cipher::encrypt("on second"))).await;

    // Persistence follows delivery, so the rows may land just after the echo.
    wait_for(|| store.recent_messages(a.port(), 10).unwrap().len() == 1).await;
    wait_for(|| store.recent_messages(b.port(), 10).unwrap().len() == 1).await;
    let on_a = store.recent_messages(a.port(), 10).unwrap();
    let on_b = store.recent_messages(b.port(), 10).unwrap();
    assert_eq!(on_a.len(), 1);
    assert_eq!(on_a[0].plaintext, "on first");
    assert_eq!(on_b.len(), 1);
    assert_eq!(on_b[0].plaintext, "on second");

    store.delete_all_for_port(a.port()).unwrap();
    assert!(store.recent_messages(a.port(), 10).unwrap().is_empty());
    assert_eq!(store.recent_messages(b.port(), 10).unwrap().len(), 1);

    first.stop().await;
    second.stop().await;
}
