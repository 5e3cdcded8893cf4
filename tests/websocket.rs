#![cfg(feature = "ws")]
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use pubsub_socket::error::ProtocolError;
use pubsub_socket::transport::{TransportConfig, WsStrategy};
use pubsub_socket::ws::config::Config;
use pubsub_socket::ws::{ConnectionManager, ManagerEvent, ManagerState, Network};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const TIMEOUT: Duration = Duration::from_secs(2);

/// Frames the server pushes to every connected client.
#[derive(Debug, Clone)]
enum Push {
    Text(String),
    Close(u16),
}

/// Mock Pusher server.
///
/// Every accepted connection first receives the next scripted greeting, or a
/// `pusher:connection_established` frame with socket id `{n}.{n}` once the script is exhausted.
struct MockWsServer {
    addr: SocketAddr,
    /// Broadcast frames to ALL connected clients
    push_tx: broadcast::Sender<Push>,
    /// Text frames received from clients
    received_rx: mpsc::UnboundedReceiver<String>,
    /// Request URIs of accepted connections
    requests_rx: mpsc::UnboundedReceiver<String>,
}

impl MockWsServer {
    async fn start() -> Self {
        Self::with_greetings(Vec::new()).await
    }

    /// Start a mock server on a random port.
    async fn with_greetings<I: IntoIterator<Item = Push>>(greetings: I) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (push_tx, _) = broadcast::channel::<Push>(100);
        let (received_tx, received_rx) = mpsc::unbounded_channel::<String>();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel::<String>();
        let greetings = Arc::new(Mutex::new(greetings.into_iter().collect::<VecDeque<_>>()));

        let broadcast_tx = push_tx.clone();

        tokio::spawn(async move {
            let mut accepted = 0_u32;
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let requests = requests_tx.clone();
                let callback = move |request: &Request, response: Response| {
                    drop(requests.send(request.uri().to_string()));
                    Ok::<Response, ErrorResponse>(response)
                };
                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };

                accepted += 1;
                let greeting = greetings
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| established(&format!("{accepted}.{accepted}")));

                let (mut write, mut read) = ws_stream.split();
                let received = received_tx.clone();
                let mut push_rx = broadcast_tx.subscribe();

                // Spawn a task to handle this connection
                tokio::spawn(async move {
                    if send_push(&mut write, greeting).await.is_err() {
                        return;
                    }

                    loop {
                        tokio::select! {
                            // Handle incoming frames from client
                            frame = read.next() => {
                                match frame {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(received.send(text.to_string()));
                                    }
                                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                            // Handle outgoing frames to client
                            push = push_rx.recv() => {
                                match push {
                                    Ok(push) => {
                                        if send_push(&mut write, push).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            push_tx,
            received_rx,
            requests_rx,
        }
    }

    fn manager(&self, config: Config) -> ConnectionManager {
        let transport = TransportConfig::builder()
            .key("app-key")
            .host("127.0.0.1")
            .ws_port(self.addr.port())
            .build();

        ConnectionManager::new(
            "app-key",
            config,
            WsStrategy::new(transport),
            Network::default(),
        )
        .unwrap()
    }

    /// Send a text frame to all connected clients.
    fn send(&self, message: &Value) {
        drop(self.push_tx.send(Push::Text(message.to_string())));
    }

    /// Close all connected clients with `code`.
    fn close(&self, code: u16) {
        drop(self.push_tx.send(Push::Close(code)));
    }

    /// Receive the next text frame sent by a client.
    async fn recv(&mut self) -> Option<Value> {
        let text = timeout(TIMEOUT, self.received_rx.recv())
            .await
            .ok()
            .flatten()?;
        serde_json::from_str(&text).ok()
    }

    /// Receive the next frame for `event`, skipping others.
    async fn recv_event(&mut self, event: &str) -> Option<Value> {
        loop {
            let frame = self.recv().await?;
            if frame["event"] == event {
                return Some(frame);
            }
        }
    }

    async fn recv_request(&mut self) -> Option<String> {
        timeout(TIMEOUT, self.requests_rx.recv())
            .await
            .ok()
            .flatten()
    }
}

async fn send_push<S>(write: &mut S, push: Push) -> Result<(), S::Error>
where
    S: futures_util::Sink<Message> + Unpin,
{
    match push {
        Push::Text(text) => write.send(Message::Text(text.into())).await,
        Push::Close(code) => {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: "closed by test".into(),
            };
            write.send(Message::Close(Some(frame))).await
        }
    }
}

fn established(socket_id: &str) -> Push {
    let data = json!({ "socket_id": socket_id, "activity_timeout": 120 }).to_string();
    Push::Text(json!({ "event": "pusher:connection_established", "data": data }).to_string())
}

async fn wait_for_socket(manager: &ConnectionManager, socket_id: &str) {
    timeout(TIMEOUT, async {
        while manager.socket_id().as_deref() != Some(socket_id) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn wait_for_state(manager: &ConnectionManager, state: ManagerState) {
    let mut states = manager.state_receiver();
    timeout(TIMEOUT, states.wait_for(|current| *current == state))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn handshake_connects_with_server_socket_id() {
    let mut server = MockWsServer::start().await;
    let manager = server.manager(Config::default());

    manager.connect();
    wait_for_state(&manager, ManagerState::Connected).await;

    assert_eq!(manager.socket_id().as_deref(), Some("1.1"));
    let request = server.recv_request().await.unwrap();
    assert!(request.starts_with("/app/app-key?protocol=7&client=rust&version="));
    assert!(request.ends_with("&flash=false"));
}

#[tokio::test]
async fn send_event_reaches_the_server() {
    let mut server = MockWsServer::start().await;
    let manager = server.manager(Config::default());

    manager.connect();
    wait_for_state(&manager, ManagerState::Connected).await;

    assert!(manager.send_event("client-move", json!({ "x": 1 }), Some("private-room")));

    let frame = server.recv_event("client-move").await.unwrap();
    assert_eq!(frame["channel"], "private-room");
    assert_eq!(frame["data"], json!({ "x": 1 }));
}

#[tokio::test]
async fn server_ping_is_answered_with_pong() {
    let mut server = MockWsServer::start().await;
    let manager = server.manager(Config::default());

    manager.connect();
    wait_for_state(&manager, ManagerState::Connected).await;

    server.send(&json!({ "event": "pusher:ping", "data": {} }));

    assert!(server.recv_event("pusher:pong").await.is_some());
}

#[tokio::test]
async fn inbound_messages_are_re_emitted() {
    let server = MockWsServer::start().await;
    let manager = server.manager(Config::default());
    let mut rx = manager.subscribe();

    manager.connect();
    wait_for_state(&manager, ManagerState::Connected).await;

    server.send(&json!({
        "event": "update",
        "channel": "room",
        "data": json!({ "n": 1 }).to_string(),
    }));

    let message = timeout(TIMEOUT, async {
        loop {
            if let Ok(ManagerEvent::Message(message)) = rx.recv().await {
                return message;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(message.event, "update");
    assert_eq!(message.channel.as_deref(), Some("room"));
    assert_eq!(message.data, json!({ "n": 1 }));
}

#[tokio::test]
async fn handshake_error_refuses_the_connection() {
    let error = json!({
        "event": "pusher:error",
        "data": { "code": 4001, "message": "Application does not exist" },
    });
    let server = MockWsServer::with_greetings([Push::Text(error.to_string())]).await;
    let manager = server.manager(Config::default());
    let mut rx = manager.subscribe();

    manager.connect();
    wait_for_state(&manager, ManagerState::Disconnected).await;

    let error = timeout(TIMEOUT, async {
        loop {
            if let Ok(ManagerEvent::Error(error)) = rx.recv().await {
                return error;
            }
        }
    })
    .await
    .unwrap();

    let protocol = error.downcast_ref::<ProtocolError>().unwrap();
    assert_eq!(protocol.code, Some(4001));
    assert_eq!(protocol.message, "Application does not exist");
    assert_eq!(manager.socket_id(), None);
}

#[tokio::test]
async fn close_during_handshake_backs_off() {
    let server = MockWsServer::with_greetings([Push::Close(4100)]).await;
    let config = Config::builder()
        .retry_delay(Duration::from_millis(50))
        .build();
    let manager = server.manager(config);

    manager.connect();

    // Second connection gets the default greeting
    wait_for_socket(&manager, "2.2").await;
    assert_eq!(manager.state(), ManagerState::Connected);
}

#[tokio::test]
async fn retry_close_code_reconnects() {
    let server = MockWsServer::start().await;
    let manager = server.manager(Config::default());

    manager.connect();
    wait_for_socket(&manager, "1.1").await;

    server.close(4200);

    wait_for_socket(&manager, "2.2").await;
    assert_eq!(manager.state(), ManagerState::Connected);
}

#[tokio::test]
async fn refused_close_code_disconnects() {
    let server = MockWsServer::start().await;
    let manager = server.manager(Config::default());

    manager.connect();
    wait_for_state(&manager, ManagerState::Connected).await;

    server.close(4009);

    wait_for_state(&manager, ManagerState::Disconnected).await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(manager.state(), ManagerState::Disconnected);
}

#[tokio::test]
async fn unanswered_ping_closes_and_reconnects() {
    let mut server = MockWsServer::start().await;
    let config = Config::builder()
        .activity_timeout(Duration::from_millis(100))
        .pong_timeout(Duration::from_millis(100))
        .retry_delay(Duration::from_millis(50))
        .build();
    let manager = server.manager(config);

    manager.connect();
    wait_for_socket(&manager, "1.1").await;

    assert!(server.recv_event("pusher:ping").await.is_some());
    wait_for_socket(&manager, "2.2").await;
}

#[tokio::test]
async fn disconnect_closes_the_socket() {
    let server = MockWsServer::start().await;
    let manager = server.manager(Config::default());

    manager.connect();
    wait_for_state(&manager, ManagerState::Connected).await;

    manager.disconnect();
    wait_for_state(&manager, ManagerState::Disconnected).await;

    assert!(!manager.send("{}"));
    sleep(Duration::from_millis(200)).await;
    assert_eq!(manager.state(), ManagerState::Disconnected);
}
