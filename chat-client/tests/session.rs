//! Client sessions against a real relay over loopback TCP.

use chat_client::{connect, run_duplex, DuplexOutcome, ReceiverExit, SenderExit};
use chat_relay::{bind_listener, ChatRelay, Config, Framing};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const STEP: Duration = Duration::from_secs(5);

async fn start_relay() -> (Arc<ChatRelay>, String) {
    let listener = bind_listener("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    // Line framing so each chat line is relayed as one whole message.
    let mut config = Config::default();
    config.server.framing = Framing::Line;
    let relay = Arc::new(ChatRelay::new(config));
    tokio::spawn(relay.clone().run(listener));
    (relay, addr)
}

async fn wait_for_connections(relay: &ChatRelay, expected: usize) {
    tokio::time::timeout(STEP, async {
        while relay.total_connections() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("relay did not reach expected connection count");
}

/// Start a client session; returns its input channel and a handle yielding
/// the outcome plus everything it printed.
async fn start_client(
    addr: &str,
    name: &str,
) -> (mpsc::Sender<String>, JoinHandle<(DuplexOutcome, Vec<u8>)>) {
    let stream = connect(addr).await.unwrap();
    let (tx, rx) = mpsc::channel(16);
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        let mut output = Vec::new();
        let outcome = run_duplex(stream, Some(name), rx, &mut output).await;
        (outcome, output)
    });
    (tx, handle)
}

#[tokio::test]
async fn two_clients_chat_through_relay() {
    let (relay, addr) = start_relay().await;

    let (alice, alice_session) = start_client(&addr, "alice").await;
    let (_bob, bob_session) = start_client(&addr, "bob").await;
    wait_for_connections(&relay, 2).await;

    alice.send("hello".to_string()).await.unwrap();
    alice.send("quit".to_string()).await.unwrap();

    let (outcome, alice_output) = tokio::time::timeout(STEP, alice_session)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.sender, SenderExit::Quit);
    assert!(alice_output.is_empty(), "alice must not hear herself");

    wait_for_connections(&relay, 1).await;

    // Stopping the relay closes bob's connection; his receiver drains what
    // was already delivered and then sees the close.
    relay.shutdown();
    let (outcome, bob_output) = tokio::time::timeout(STEP, bob_session)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.receiver, ReceiverExit::ServerClosed);
    assert_eq!(outcome.sender, SenderExit::Cancelled);
    assert_eq!(String::from_utf8(bob_output).unwrap(), "alice:hello\nalice:quit\n");
}

#[tokio::test]
async fn connect_failure_is_reported() {
    // Bind then drop to get a port with nothing listening on it.
    let listener = bind_listener("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = connect(&addr).await.unwrap_err();
    assert!(err.to_string().contains(&addr));
}
