#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Deeply nested uses in sub-modules are falsely flagged as being unused"
)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pubsub_socket::Result;
use pubsub_socket::error::Error;
use pubsub_socket::protocol::Message;
use pubsub_socket::ws::{
    Action, Attempt, Connection, ConnectionEvent, ConnectionManager, ConnectionStrategy,
    Handshake, Listener, ManagerEvent, TimelineSender,
};
use serde_json::Value;
use tokio::sync::broadcast;

pub const SOCKET_ID: &str = "42";

/// In-memory [`Connection`] that records what the manager sends and lets tests play the
/// transport's side.
pub struct MockConnection {
    id: String,
    supports_ping: bool,
    sent: Mutex<Vec<Message>>,
    raw: Mutex<Vec<String>>,
    closes: AtomicUsize,
    listener: Mutex<Option<Listener>>,
}

impl MockConnection {
    #[must_use]
    pub fn new(id: &str) -> Arc<Self> {
        Self::build(id, false)
    }

    /// A connection that does its own liveness checks.
    #[must_use]
    pub fn with_ping(id: &str) -> Arc<Self> {
        Self::build(id, true)
    }

    fn build(id: &str, supports_ping: bool) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_owned(),
            supports_ping,
            sent: Mutex::default(),
            raw: Mutex::default(),
            closes: AtomicUsize::new(0),
            listener: Mutex::default(),
        })
    }

    /// Report an event as the transport would.
    pub fn emit(&self, event: ConnectionEvent) {
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.emit(event);
        }
    }

    /// Names of all events sent through [`Connection::send_event`].
    #[must_use]
    pub fn sent_events(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|message| message.event.clone())
            .collect()
    }

    #[must_use]
    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    #[must_use]
    pub fn sent_raw(&self) -> Vec<String> {
        self.raw.lock().unwrap().clone()
    }

    #[must_use]
    pub fn count_sent(&self, event: &str) -> usize {
        self.sent_events().iter().filter(|e| *e == event).count()
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.listener.lock().unwrap().is_some()
    }

    #[must_use]
    pub fn bound_listener(&self) -> Option<Listener> {
        self.listener.lock().unwrap().clone()
    }
}

impl Connection for MockConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, data: &str) -> bool {
        self.raw.lock().unwrap().push(data.to_owned());
        true
    }

    fn send_event(&self, event: &str, data: Value, channel: Option<&str>) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push(Message::new(event, data, channel));
        true
    }

    fn close(&self) {
        // Like a real transport, Closed is reported once
        if self.closes.fetch_add(1, Ordering::SeqCst) == 0 {
            self.emit(ConnectionEvent::Closed);
        }
    }

    fn supports_ping(&self) -> bool {
        self.supports_ping
    }

    fn bind(&self, listener: Listener) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    fn unbind(&self) {
        *self.listener.lock().unwrap() = None;
    }
}

/// What [`MockStrategy`] does on one run.
pub enum Step {
    Connect {
        connection: Arc<MockConnection>,
        activity_timeout: Option<Duration>,
    },
    Reject(Action),
    Fail,
}

impl Step {
    #[must_use]
    pub fn connect(connection: &Arc<MockConnection>) -> Self {
        Self::Connect {
            connection: Arc::clone(connection),
            activity_timeout: None,
        }
    }
}

/// Replays scripted [`Step`]s, one per run. Runs past the end of the script never complete.
pub struct MockStrategy {
    supported: bool,
    steps: Mutex<VecDeque<Step>>,
    attempts: Mutex<Vec<Attempt>>,
}

impl MockStrategy {
    #[must_use]
    pub fn new<I: IntoIterator<Item = Step>>(steps: I) -> Arc<Self> {
        Arc::new(Self {
            supported: true,
            steps: Mutex::new(steps.into_iter().collect()),
            attempts: Mutex::default(),
        })
    }

    /// A strategy whose runs never complete.
    #[must_use]
    pub fn pending() -> Arc<Self> {
        Self::new(Vec::<Step>::new())
    }

    #[must_use]
    pub fn unsupported() -> Arc<Self> {
        Arc::new(Self {
            supported: false,
            steps: Mutex::default(),
            attempts: Mutex::default(),
        })
    }

    #[must_use]
    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl ConnectionStrategy for MockStrategy {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn connect(&self, attempt: Attempt) -> Result<Handshake> {
        self.attempts.lock().unwrap().push(attempt);
        let step = self.steps.lock().unwrap().pop_front();

        match step {
            Some(Step::Connect {
                connection,
                activity_timeout: None,
            }) => {
                let socket_id = connection.id().to_owned();
                Ok(Handshake::connected(connection, socket_id))
            }
            Some(Step::Connect {
                connection,
                activity_timeout,
            }) => {
                let socket_id = connection.id().to_owned();
                Ok(Handshake::Connected {
                    connection,
                    socket_id,
                    activity_timeout,
                })
            }
            Some(Step::Reject(action)) => Ok(Handshake::rejected(action)),
            Some(Step::Fail) => Err(Error::validation("dial failed")),
            None => std::future::pending().await,
        }
    }
}

/// Counts flushes and records the encryption flag of each.
#[derive(Default)]
pub struct CountingTimeline {
    flushes: Mutex<Vec<bool>>,
}

impl CountingTimeline {
    #[must_use]
    pub fn flushes(&self) -> Vec<bool> {
        self.flushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TimelineSender for CountingTimeline {
    async fn send(&self, encrypted: bool) -> Result<()> {
        self.flushes.lock().unwrap().push(encrypted);
        Ok(())
    }
}

/// Let every task that is ready run. With paused time this also fires zero-delay timers.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Everything received so far.
pub fn drain(rx: &mut broadcast::Receiver<ManagerEvent>) -> Vec<ManagerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[must_use]
pub fn names(events: &[ManagerEvent]) -> Vec<&'static str> {
    events.iter().map(ManagerEvent::name).collect()
}
