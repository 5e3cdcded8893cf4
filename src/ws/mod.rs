//! Connection management.
//!
//! This module provides the connection state machine and the collaborator traits it is built
//! from, independent of any concrete transport.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Owns one logical connection: strategy runs, handshake, heartbeat,
//!   reachability and reconnection
//! - [`ConnectionStrategy`]: Opens a transport and performs the handshake
//! - [`Connection`]: An established transport the manager adopts
//! - [`NetworkMonitor`]: Reachability edges; [`Network`] is a settable implementation
//!
//! # Example
//!
//! ```ignore
//! let manager = ConnectionManager::new("app-key", Config::default(), strategy, Network::default())?;
//! let mut states = manager.state_receiver();
//!
//! manager.connect();
//! states.wait_for(|state| state.is_connected()).await?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod network;
pub mod state;
pub mod timer;
pub mod traits;

pub use connection::ConnectionManager;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use handshake::{Action, Handshake};
pub use network::Network;
pub use state::{ManagerEvent, ManagerState, StateChange};
pub use traits::*;
