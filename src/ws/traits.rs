//! Collaborators the connection manager is built from.
//!
//! The manager never opens sockets itself. It asks a [`ConnectionStrategy`] for a
//! [`Handshake`], adopts the resulting [`Connection`], and listens to a [`NetworkMonitor`] for
//! reachability changes. [`crate::transport`] provides WebSocket implementations of the first
//! two.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::handshake::{Action, Handshake};
use crate::Result;
use crate::error::Error;
use crate::protocol::Message;

/// Parameters of a single strategy run.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// How many times the strategy already failed during this connection attempt
    pub retry: u32,
    /// Whether the strategy must use an encrypted transport
    pub use_tls: bool,
}

impl Attempt {
    pub(crate) const fn new(retry: u32, use_tls: bool) -> Self {
        Self { retry, use_tls }
    }
}

/// Performs the transport-level connect and the protocol handshake.
///
/// The manager runs [`ConnectionStrategy::connect`] on its own task and aborts that task when
/// the attempt is no longer wanted, so implementations should not spawn work that outlives the
/// returned future.
///
/// # Example
///
/// ```ignore
/// struct Fixed(Arc<dyn Connection>);
///
/// #[async_trait]
/// impl ConnectionStrategy for Fixed {
///     async fn connect(&self, _attempt: Attempt) -> Result<Handshake> {
///         Ok(Handshake::connected(Arc::clone(&self.0), "1.1"))
///     }
/// }
/// ```
#[async_trait]
pub trait ConnectionStrategy: Send + Sync + 'static {
    /// Whether this strategy can work in the current environment.
    fn is_supported(&self) -> bool {
        true
    }

    /// Connect and negotiate. An `Err` makes the manager run the strategy again with
    /// `attempt.retry + 1`.
    async fn connect(&self, attempt: Attempt) -> Result<Handshake>;
}

/// Events an established [`Connection`] reports to its listener.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Any inbound protocol message, including pongs
    Message(Message),
    /// The server pinged us and expects a pong
    Ping,
    /// The transport asks for an application-level ping to be sent
    PingRequest,
    /// Transport or protocol error. The transport closes itself on fatal errors.
    Error(Arc<Error>),
    /// The server asked for a recovery action, usually right before closing
    Action(Action),
    /// The transport is closed. Reported at most once.
    Closed,
}

/// Receives [`ConnectionEvent`]s from a bound [`Connection`].
#[derive(Clone)]
pub struct Listener(Arc<dyn Fn(ConnectionEvent) + Send + Sync>);

impl Listener {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ConnectionEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn emit(&self, event: ConnectionEvent) {
        (self.0)(event);
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Listener")
    }
}

/// An established, handshaken transport.
///
/// Owned by the manager while it is `connected`; every method takes `&self` so sends can be
/// delegated from any manager handle.
pub trait Connection: Send + Sync + 'static {
    /// Socket id assigned by the server.
    fn id(&self) -> &str;

    /// Send a raw, already encoded frame. Returns `false` if it could not be queued.
    fn send(&self, data: &str) -> bool;

    /// Encode and send an event.
    fn send_event(&self, event: &str, data: Value, channel: Option<&str>) -> bool;

    /// Close the transport. A bound listener receives [`ConnectionEvent::Closed`].
    fn close(&self);

    /// Whether the transport performs its own liveness checks, making the manager's ping/pong
    /// heartbeat unnecessary.
    fn supports_ping(&self) -> bool;

    /// Route all further events to `listener`, replacing any previous one.
    fn bind(&self, listener: Listener);

    /// Stop delivering events.
    fn unbind(&self);
}

/// A reachability edge.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Online,
    Offline,
}

/// Source of network reachability information.
pub trait NetworkMonitor: Send + Sync + 'static {
    /// `Some(false)` only when the network is known to be down. `None` means unknown.
    fn is_online(&self) -> Option<bool>;

    /// Edge notifications. The subscription lives as long as the returned receiver.
    fn subscribe(&self) -> broadcast::Receiver<Reachability>;
}

/// Best-effort reporter of connection diagnostics, flushed periodically and on connect.
#[async_trait]
pub trait TimelineSender: Send + Sync + 'static {
    async fn send(&self, encrypted: bool) -> Result<()>;
}

#[async_trait]
impl<T: ConnectionStrategy + ?Sized> ConnectionStrategy for Arc<T> {
    fn is_supported(&self) -> bool {
        (**self).is_supported()
    }

    async fn connect(&self, attempt: Attempt) -> Result<Handshake> {
        (**self).connect(attempt).await
    }
}

impl<T: NetworkMonitor + ?Sized> NetworkMonitor for Arc<T> {
    fn is_online(&self) -> Option<bool> {
        (**self).is_online()
    }

    fn subscribe(&self) -> broadcast::Receiver<Reachability> {
        (**self).subscribe()
    }
}

#[async_trait]
impl<T: TimelineSender + ?Sized> TimelineSender for Arc<T> {
    async fn send(&self, encrypted: bool) -> Result<()> {
        (**self).send(encrypted).await
    }
}
