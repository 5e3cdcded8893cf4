//! WebSocket transport for the Pusher Channels protocol.
//!
//! [`WsStrategy`] dials the server and performs the handshake; the resulting [`WsConnection`]
//! is handed to [`crate::ws::ConnectionManager`] inside a [`crate::ws::Handshake`].
//!
//! ```rust,no_run
//! use pubsub_socket::transport::{TransportConfig, WsStrategy};
//! use pubsub_socket::ws::config::Config;
//! use pubsub_socket::ws::{ConnectionManager, Network};
//!
//! #[tokio::main]
//! async fn main() -> pubsub_socket::Result<()> {
//!     let transport = TransportConfig::for_cluster("app-key", "eu");
//!     let manager = ConnectionManager::new(
//!         "app-key",
//!         Config::default(),
//!         WsStrategy::new(transport),
//!         Network::default(),
//!     )?;
//!
//!     manager.connect();
//!     Ok(())
//! }
//! ```

mod connection;
mod strategy;

pub use connection::WsConnection;
pub use strategy::{TransportConfig, WsStrategy};

use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
