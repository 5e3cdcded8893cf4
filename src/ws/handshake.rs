//! Outcomes of a connection handshake and the recovery actions shared with established
//! connections.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::traits::Connection;
use crate::error::ProtocolError;

/// Recovery action requested by the server, either during the handshake or by closing an
/// established connection with a specific code.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Only encrypted connections are accepted; switch to TLS and retry immediately
    TlsOnly,
    /// The server will not accept this client; stop retrying
    Refused,
    /// Retry after the fixed retry delay
    Backoff,
    /// Retry immediately
    Retry,
    /// A tag the manager has no policy for. Logged and otherwise ignored.
    Unrecognized(String),
}

impl Action {
    /// Parses an action tag. `ssl_only` is accepted as a legacy spelling of `tls_only`.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "tls_only" | "ssl_only" => Self::TlsOnly,
            "refused" => Self::Refused,
            "backoff" => Self::Backoff,
            "retry" => Self::Retry,
            other => Self::Unrecognized(other.to_owned()),
        }
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Self::TlsOnly => "tls_only",
            Self::Refused => "refused",
            Self::Backoff => "backoff",
            Self::Retry => "retry",
            Self::Unrecognized(tag) => tag,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Result of a successful strategy run.
#[non_exhaustive]
pub enum Handshake {
    /// The server accepted the connection.
    Connected {
        connection: Arc<dyn Connection>,
        /// Socket id assigned by the server
        socket_id: String,
        /// Activity timeout advertised by the server, if any
        activity_timeout: Option<Duration>,
    },
    /// The server rejected the connection and asked for `action`.
    Rejected {
        action: Action,
        error: Option<ProtocolError>,
    },
}

impl Handshake {
    #[must_use]
    pub fn connected<S: Into<String>>(connection: Arc<dyn Connection>, socket_id: S) -> Self {
        Self::Connected {
            connection,
            socket_id: socket_id.into(),
            activity_timeout: None,
        }
    }

    #[must_use]
    pub fn rejected(action: Action) -> Self {
        Self::Rejected {
            action,
            error: None,
        }
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected {
                socket_id,
                activity_timeout,
                ..
            } => f
                .debug_struct("Connected")
                .field("socket_id", socket_id)
                .field("activity_timeout", activity_timeout)
                .finish_non_exhaustive(),
            Self::Rejected { action, error } => f
                .debug_struct("Rejected")
                .field("action", action)
                .field("error", error)
                .finish(),
        }
    }
}
