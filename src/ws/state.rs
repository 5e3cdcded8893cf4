//! Manager states and the events published on every transition.

use std::sync::Arc;
use std::time::Duration;

use strum_macros::{AsRefStr, Display, IntoStaticStr};

use crate::error::Error;
use crate::protocol::Message;

/// State of a [`super::ConnectionManager`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ManagerState {
    /// Constructed, `connect` never called. Never re-entered.
    #[default]
    Initialized,
    /// A connection attempt is in flight or a retry is about to start one
    Connecting,
    /// A handshake succeeded and a connection is held
    Connected,
    /// Not connected, either by request or after the transport closed
    Disconnected,
    /// The attempt timed out or the network is known to be offline
    Unavailable,
    /// The strategy is not supported in this environment
    Failed,
}

impl ManagerState {
    /// Whether the manager should still be trying to stay connected.
    #[must_use]
    pub const fn should_retry(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Payload of [`ManagerEvent::StateChange`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub previous: ManagerState,
    pub current: ManagerState,
}

/// Everything a [`super::ConnectionManager`] publishes to subscribers.
///
/// A transition publishes [`ManagerEvent::StateChange`] followed by the event named after the
/// new state.
#[non_exhaustive]
#[derive(Debug, Clone, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ManagerEvent {
    StateChange(StateChange),
    Connecting,
    Connected {
        /// Socket id assigned by the handshake
        socket_id: String,
    },
    Disconnected,
    Unavailable,
    Failed,
    /// A retry was scheduled with a non-zero delay
    ConnectingIn(Duration),
    /// Inbound message re-emitted from the active connection
    Message(Message),
    /// Transport or protocol error; does not change the state by itself
    Error(Arc<Error>),
}

impl ManagerEvent {
    /// Event name, e.g. `"state_change"` or `"connected"`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// The event named after `state`, if that state has one.
    pub(crate) fn for_state(state: ManagerState, socket_id: Option<&str>) -> Option<Self> {
        let event = match state {
            ManagerState::Initialized => return None,
            ManagerState::Connecting => Self::Connecting,
            ManagerState::Connected => Self::Connected {
                socket_id: socket_id.unwrap_or_default().to_owned(),
            },
            ManagerState::Disconnected => Self::Disconnected,
            ManagerState::Unavailable => Self::Unavailable,
            ManagerState::Failed => Self::Failed,
        };
        Some(event)
    }
}
