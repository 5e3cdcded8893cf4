//! Connects to a Pusher Channels cluster and logs every manager event.
//!
//! Run with tracing enabled:
//! ```sh
//! PUSHER_KEY=<app key> PUSHER_CLUSTER=eu RUST_LOG=info cargo run --example connect --features ws,tracing
//! ```
//!
//! Optionally log to a file:
//! ```sh
//! LOG_FILE=connect.log PUSHER_KEY=<app key> RUST_LOG=debug cargo run --example connect --features ws,tracing
//! ```

use std::fs::File;
use std::time::Duration;

use futures::StreamExt as _;
use pubsub_socket::transport::{TransportConfig, WsStrategy};
use pubsub_socket::ws::config::Config;
use pubsub_socket::ws::{ConnectionManager, ManagerEvent, Network};
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(path) = std::env::var("LOG_FILE") {
        let file = File::create(path)?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }

    let key = std::env::var("PUSHER_KEY")?;
    let cluster = std::env::var("PUSHER_CLUSTER").unwrap_or_else(|_| "mt1".to_owned());

    let transport = TransportConfig::for_cluster(&key, &cluster);
    let manager = ConnectionManager::new(
        key,
        Config::default(),
        WsStrategy::new(transport),
        Network::default(),
    )?;

    let mut events = Box::pin(manager.events());
    manager.connect();

    while let Ok(Some(event)) = timeout(Duration::from_secs(300), events.next()).await {
        match event {
            ManagerEvent::StateChange(change) => {
                info!(previous = %change.previous, current = %change.current, "state_change");
            }
            ManagerEvent::Connected { socket_id } => info!(%socket_id, "connected"),
            ManagerEvent::ConnectingIn(delay) => info!(?delay, "connecting_in"),
            ManagerEvent::Message(message) => {
                info!(event = %message.event, channel = ?message.channel, data = %message.data);
            }
            ManagerEvent::Error(error) => warn!(%error),
            ManagerEvent::Failed => {
                warn!("WebSocket transport is not supported");
                break;
            }
            other => info!(event = other.name()),
        }
    }

    manager.disconnect();
    Ok(())
}
