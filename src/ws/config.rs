#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;

const DEFAULT_ACTIVITY_TIMEOUT_DURATION: Duration = Duration::from_secs(120);
const DEFAULT_PONG_TIMEOUT_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_UNAVAILABLE_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_DELAY_DURATION: Duration = Duration::from_millis(1000);
const DEFAULT_TIMELINE_INTERVAL_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Configuration for [`crate::ws::ConnectionManager`] behavior.
///
/// ```
/// use std::time::Duration;
///
/// use pubsub_socket::ws::config::Config;
///
/// let config = Config::builder()
///     .activity_timeout(Duration::from_secs(30))
///     .use_tls(true)
///     .build();
///
/// assert_eq!(config.pong_timeout, Duration::from_secs(30));
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Idle time after the last inbound message before a ping is sent. The server may lower this
    /// during the handshake.
    #[builder(default = DEFAULT_ACTIVITY_TIMEOUT_DURATION)]
    pub activity_timeout: Duration,
    /// Maximum time to wait for any inbound message after a ping before the transport is closed
    #[builder(default = DEFAULT_PONG_TIMEOUT_DURATION)]
    pub pong_timeout: Duration,
    /// Time a single connection attempt may stay in `connecting` before the manager reports
    /// `unavailable`
    #[builder(default = DEFAULT_UNAVAILABLE_TIMEOUT_DURATION)]
    pub unavailable_timeout: Duration,
    /// Fixed delay used for `backoff` actions and for reconnecting after the transport closes
    #[builder(default = DEFAULT_RETRY_DELAY_DURATION)]
    pub retry_delay: Duration,
    /// How often the timeline sender is flushed
    #[builder(default = DEFAULT_TIMELINE_INTERVAL_DURATION)]
    pub timeline_interval: Duration,
    /// Start in encrypted mode. A `tls_only` action switches this on for the rest of the session.
    #[builder(default)]
    pub use_tls: bool,
    /// Capacity of the broadcast channel carrying [`crate::ws::ManagerEvent`]s
    #[builder(default = DEFAULT_EVENT_CAPACITY)]
    pub event_capacity: usize,
    /// Pacing and cap for strategy-internal retries
    #[builder(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Configuration for the retries a strategy gets within a single connection attempt.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ReconnectConfig {
    /// Maximum number of strategy failures before giving up.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Initial backoff duration for first retry
    #[builder(default = DEFAULT_INITIAL_BACKOFF_DURATION)]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[builder(default = DEFAULT_MAX_BACKOFF_DURATION)]
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    #[builder(default = DEFAULT_BACKOFF_MULTIPLIER)]
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_max_elapsed_time(None) // We handle max attempts separately
            .build()
    }
}
