#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use futures::Stream;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::sleep;
use tokio_util::task::AbortOnDropHandle;

use super::config::Config;
use super::error::WsError;
use super::handshake::{Action, Handshake};
use super::state::{ManagerEvent, ManagerState, StateChange};
use super::timer::{PeriodicTimer, Timer, TimerSlot};
use super::traits::{
    Attempt, Connection, ConnectionEvent, ConnectionStrategy, Listener, NetworkMonitor,
    Reachability, TimelineSender,
};
use crate::Result;
use crate::error::Error;
use crate::protocol::Message;

/// Connection held while `connected`, published read-only to handles for delegated sends.
struct Active {
    connection: Arc<dyn Connection>,
    socket_id: String,
}

enum Command {
    Connect,
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Retry,
    Unavailable,
    Activity,
    Pong,
}

/// Everything the actor reacts to besides handle commands.
enum Input {
    Elapsed { timer: TimerKind, id: u64 },
    Attempt { id: u64, result: Result<Handshake> },
    Connection { generation: u64, event: ConnectionEvent },
}

enum Next {
    Command(Command),
    Input(Input),
    Network(Option<Reachability>),
}

/// Manages the lifecycle of one logical connection: strategy runs, handshake outcomes,
/// heartbeat, reachability and reconnection.
///
/// All state lives in a single background task; this handle only queues commands and reads
/// published state, so it is cheap to clone. The task exits, releasing the connection, once
/// every handle is dropped.
///
/// # Example
///
/// ```ignore
/// let manager = ConnectionManager::new("app-key", Config::default(), strategy, Network::default())?;
/// let mut events = manager.subscribe();
///
/// manager.connect();
/// while let Ok(event) = events.recv().await {
///     if let ManagerEvent::Connected { socket_id } = event {
///         println!("connected as {socket_id}");
///         break;
///     }
/// }
///
/// manager.send_event("client-hello", json!({}), Some("private-room"));
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    key: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ManagerEvent>,
    state_rx: watch::Receiver<ManagerState>,
    active_rx: watch::Receiver<Option<Active>>,
    tls_rx: watch::Receiver<bool>,
}

impl ConnectionManager {
    /// Create a connection manager and start its background task. Must be called within a tokio
    /// runtime. Nothing connects until [`ConnectionManager::connect`].
    pub fn new<K, S, N>(key: K, config: Config, strategy: S, network: N) -> Result<Self>
    where
        K: Into<String>,
        S: ConnectionStrategy,
        N: NetworkMonitor,
    {
        Self::spawn(key.into(), config, Arc::new(strategy), Arc::new(network), None)
    }

    /// Like [`ConnectionManager::new`], also reporting to `timeline` every
    /// [`Config::timeline_interval`] and once per successful connection.
    pub fn with_timeline<K, S, N, T>(
        key: K,
        config: Config,
        strategy: S,
        network: N,
        timeline: T,
    ) -> Result<Self>
    where
        K: Into<String>,
        S: ConnectionStrategy,
        N: NetworkMonitor,
        T: TimelineSender,
    {
        Self::spawn(
            key.into(),
            config,
            Arc::new(strategy),
            Arc::new(network),
            Some(Arc::new(timeline)),
        )
    }

    fn spawn(
        key: String,
        config: Config,
        strategy: Arc<dyn ConnectionStrategy>,
        network: Arc<dyn NetworkMonitor>,
        timeline: Option<Arc<dyn TimelineSender>>,
    ) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::validation("application key must not be empty"));
        }
        if config.event_capacity == 0 {
            return Err(Error::validation("event capacity must be greater than zero"));
        }
        if config.timeline_interval.is_zero() {
            return Err(Error::validation("timeline interval must be greater than zero"));
        }

        let key: Arc<str> = key.into();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity);
        let (state_tx, state_rx) = watch::channel(ManagerState::Initialized);
        let (active_tx, active_rx) = watch::channel(None);
        let (tls_tx, tls_rx) = watch::channel(config.use_tls);
        let reachability = network.subscribe();

        let actor = Actor {
            key: Arc::clone(&key),
            encrypted: config.use_tls,
            activity_timeout: config.activity_timeout,
            backoff: config.reconnect.clone().into(),
            config,
            strategy,
            network,
            timeline,
            inputs: inputs_tx,
            events: events.clone(),
            state_tx,
            active_tx,
            tls_tx,
            state: ManagerState::Initialized,
            connection: None,
            socket_id: None,
            generation: 0,
            runner: None,
            retry_count: 0,
            retry_timer: TimerSlot::default(),
            unavailable_timer: TimerSlot::default(),
            activity_timer: TimerSlot::default(),
            timeline_timer: None,
            next_id: 0,
        };

        tokio::spawn(actor.run(commands_rx, inputs_rx, reachability));

        Ok(Self {
            key,
            commands: commands_tx,
            events,
            state_rx,
            active_rx,
            tls_rx,
        })
    }

    /// Application key this manager was created with.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Start connecting. No-op while connected or while an attempt is in flight.
    pub fn connect(&self) {
        _ = self.commands.send(Command::Connect);
    }

    /// Abort any attempt, cancel all timers, close the connection and move to `disconnected`.
    pub fn disconnect(&self) {
        _ = self.commands.send(Command::Disconnect);
    }

    /// Send a raw frame on the current connection. `false` when not connected.
    pub fn send(&self, data: &str) -> bool {
        self.connection().is_some_and(|connection| connection.send(data))
    }

    /// Send an event on the current connection. `false` when not connected.
    pub fn send_event(&self, event: &str, data: Value, channel: Option<&str>) -> bool {
        self.connection()
            .is_some_and(|connection| connection.send_event(event, data, channel))
    }

    fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.active_rx
            .borrow()
            .as_ref()
            .map(|active| Arc::clone(&active.connection))
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> ManagerState {
        *self.state_rx.borrow()
    }

    /// Socket id of the current connection.
    #[must_use]
    pub fn socket_id(&self) -> Option<String> {
        self.active_rx
            .borrow()
            .as_ref()
            .map(|active| active.socket_id.clone())
    }

    /// Whether attempts are made over an encrypted transport.
    #[must_use]
    pub fn is_using_tls(&self) -> bool {
        *self.tls_rx.borrow()
    }

    /// Subscribe to state changes, messages and errors.
    ///
    /// Each call returns a new independent receiver that sees events published after the call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// Subscribe to state changes only.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ManagerState> {
        self.state_rx.clone()
    }

    /// Events as a [`Stream`]. Events missed because the subscriber lagged are skipped.
    pub fn events(&self) -> impl Stream<Item = ManagerEvent> + use<> {
        let mut rx = self.events.subscribe();

        stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(count, "Event stream lagged");
                        #[cfg(not(feature = "tracing"))]
                        let _ = count;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

/// In-flight strategy run. Dropping it aborts the run.
struct Runner {
    id: u64,
    _handle: AbortOnDropHandle<()>,
}

struct Actor {
    #[cfg_attr(
        not(feature = "tracing"),
        expect(dead_code, reason = "Only read by log statements")
    )]
    key: Arc<str>,
    config: Config,
    strategy: Arc<dyn ConnectionStrategy>,
    network: Arc<dyn NetworkMonitor>,
    timeline: Option<Arc<dyn TimelineSender>>,

    inputs: mpsc::UnboundedSender<Input>,
    events: broadcast::Sender<ManagerEvent>,
    state_tx: watch::Sender<ManagerState>,
    active_tx: watch::Sender<Option<Active>>,
    tls_tx: watch::Sender<bool>,

    state: ManagerState,
    connection: Option<Arc<dyn Connection>>,
    socket_id: Option<String>,
    /// Bumped whenever a connection is adopted or released; events tagged with an older value
    /// come from a connection we no longer own.
    generation: u64,
    runner: Option<Runner>,
    retry_count: u32,
    backoff: ExponentialBackoff,
    retry_timer: TimerSlot,
    unavailable_timer: TimerSlot,
    /// Holds either the activity timer or the pong timer
    activity_timer: TimerSlot,
    timeline_timer: Option<PeriodicTimer>,
    encrypted: bool,
    activity_timeout: Duration,
    next_id: u64,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut inputs: mpsc::UnboundedReceiver<Input>,
        reachability: broadcast::Receiver<Reachability>,
    ) {
        let mut reachability = Some(reachability);

        loop {
            let next = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => Next::Command(command),
                    None => break,
                },
                Some(input) = inputs.recv() => Next::Input(input),
                edge = next_edge(reachability.as_mut()) => Next::Network(edge),
            };

            match next {
                Next::Command(Command::Connect) => self.connect(),
                Next::Command(Command::Disconnect) => self.disconnect(),
                Next::Input(Input::Elapsed { timer, id }) => self.on_elapsed(timer, id),
                Next::Input(Input::Attempt { id, result }) => self.on_attempt(id, result),
                Next::Input(Input::Connection { generation, event }) => {
                    self.on_connection_event(generation, event);
                }
                Next::Network(Some(edge)) => self.on_reachability(edge),
                Next::Network(None) => reachability = None,
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(key = %self.key, "All handles dropped, shutting down");
        self.disconnect_internally();
        self.timeline_timer = None;
    }

    fn connect(&mut self) {
        if self.connection.is_some() || self.runner.is_some() {
            return;
        }
        if !self.strategy.is_supported() {
            self.update_state(ManagerState::Failed);
            return;
        }
        if self.network.is_online() == Some(false) {
            self.update_state(ManagerState::Unavailable);
            return;
        }

        self.update_state(ManagerState::Connecting);
        self.start_timeline();
        self.retry_count = 0;
        self.backoff.reset();
        self.start_runner(Duration::ZERO);
        self.set_unavailable_timer();
    }

    fn disconnect(&mut self) {
        self.disconnect_internally();
        self.timeline_timer = None;
        self.update_state(ManagerState::Disconnected);
    }

    /// Tear down everything owned for the current attempt or connection without changing state.
    fn disconnect_internally(&mut self) {
        self.runner = None;
        self.retry_timer.cancel();
        self.unavailable_timer.cancel();
        self.stop_activity_check();
        if let Some(connection) = self.abandon_connection() {
            connection.close();
        }
    }

    fn start_runner(&mut self, delay: Duration) {
        let id = self.next_id();
        let attempt = Attempt::new(self.retry_count, self.encrypted);
        let strategy = Arc::clone(&self.strategy);
        let inputs = self.inputs.clone();

        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            let result = strategy.connect(attempt).await;
            _ = inputs.send(Input::Attempt { id, result });
        });

        self.runner = Some(Runner {
            id,
            _handle: AbortOnDropHandle::new(handle),
        });
    }

    fn on_attempt(&mut self, id: u64, result: Result<Handshake>) {
        if self.runner.as_ref().is_none_or(|runner| runner.id != id) {
            return;
        }

        match result {
            Ok(handshake) => {
                self.runner = None;
                self.on_handshake(handshake);
            }
            Err(error) => {
                self.retry_count = self.retry_count.saturating_add(1);

                #[cfg(feature = "tracing")]
                tracing::warn!(key = %self.key, attempt = self.retry_count, error = %error, "Strategy failed");
                self.emit(ManagerEvent::Error(Arc::new(error)));

                if let Some(max) = self.config.reconnect.max_attempts
                    && self.retry_count >= max
                {
                    self.runner = None;
                    self.unavailable_timer.cancel();
                    let exhausted = WsError::RetriesExhausted {
                        attempts: self.retry_count,
                    };
                    self.emit(ManagerEvent::Error(Arc::new(exhausted.into())));
                    self.update_state(ManagerState::Unavailable);
                    return;
                }

                let delay = self
                    .backoff
                    .next_backoff()
                    .unwrap_or(self.config.reconnect.max_backoff);
                self.start_runner(delay);
            }
        }
    }

    fn on_handshake(&mut self, handshake: Handshake) {
        match handshake {
            Handshake::Connected {
                connection,
                socket_id,
                activity_timeout,
            } => {
                self.unavailable_timer.cancel();
                self.activity_timeout = activity_timeout
                    .filter(|timeout| !timeout.is_zero())
                    .map_or(self.config.activity_timeout, |timeout| {
                        timeout.min(self.config.activity_timeout)
                    });
                self.socket_id = Some(socket_id.clone());
                self.set_connection(connection, socket_id);
                self.update_state(ManagerState::Connected);
                self.flush_timeline();
            }
            Handshake::Rejected { action, error } => {
                if let Some(error) = error {
                    self.emit(ManagerEvent::Error(Arc::new(error.into())));
                }
                self.on_action(action);
            }
        }
    }

    fn on_action(&mut self, action: Action) {
        #[cfg(feature = "tracing")]
        tracing::debug!(key = %self.key, %action, "Handling action");

        match action {
            Action::TlsOnly => {
                self.encrypted = true;
                self.tls_tx.send_replace(true);
                self.retry_in(Duration::ZERO);
            }
            Action::Refused => self.disconnect(),
            Action::Backoff => self.retry_in(self.config.retry_delay),
            Action::Retry => self.retry_in(Duration::ZERO),
            Action::Unrecognized(tag) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %self.key, %tag, "Ignoring unrecognized action");
                let error = WsError::UnrecognizedAction(tag);
                self.emit(ManagerEvent::Error(Arc::new(error.into())));
            }
        }
    }

    fn retry_in(&mut self, delay: Duration) {
        if !delay.is_zero() {
            self.emit(ManagerEvent::ConnectingIn(delay));
        }
        let id = self.next_id();
        let timer = self.timer(TimerKind::Retry, id, delay);
        self.retry_timer.arm(id, timer);
    }

    fn set_unavailable_timer(&mut self) {
        let id = self.next_id();
        let timer = self.timer(TimerKind::Unavailable, id, self.config.unavailable_timeout);
        self.unavailable_timer.arm(id, timer);
    }

    fn on_elapsed(&mut self, kind: TimerKind, id: u64) {
        match kind {
            TimerKind::Retry => {
                if self.retry_timer.fire(id) {
                    self.disconnect_internally();
                    self.connect();
                }
            }
            TimerKind::Unavailable => {
                if self.unavailable_timer.fire(id) {
                    self.update_state(ManagerState::Unavailable);
                }
            }
            TimerKind::Activity => {
                if self.activity_timer.fire(id) {
                    self.send_activity_check();
                }
            }
            TimerKind::Pong => {
                if self.activity_timer.fire(id)
                    && let Some(connection) = &self.connection
                {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        key = %self.key,
                        "Heartbeat timeout: no message received within {:?}",
                        self.config.pong_timeout
                    );
                    connection.close();
                }
            }
        }
    }

    fn set_connection(&mut self, connection: Arc<dyn Connection>, socket_id: String) {
        _ = self.abandon_connection();

        self.generation += 1;
        let generation = self.generation;
        let inputs = self.inputs.clone();
        connection.bind(Listener::new(move |event| {
            _ = inputs.send(Input::Connection { generation, event });
        }));

        self.active_tx.send_replace(Some(Active {
            connection: Arc::clone(&connection),
            socket_id,
        }));
        self.connection = Some(connection);
        self.reset_activity_check();
    }

    /// Stop listening to the current connection and give up ownership of it.
    fn abandon_connection(&mut self) -> Option<Arc<dyn Connection>> {
        let connection = self.connection.take()?;
        connection.unbind();
        self.generation += 1;
        self.active_tx.send_replace(None);
        self.stop_activity_check();
        Some(connection)
    }

    fn on_connection_event(&mut self, generation: u64, event: ConnectionEvent) {
        if generation != self.generation {
            return;
        }
        let Some(connection) = self.connection.clone() else {
            return;
        };

        match event {
            ConnectionEvent::Message(message) => {
                self.reset_activity_check();
                self.emit(ManagerEvent::Message(message));
            }
            ConnectionEvent::Ping => {
                send_message(connection.as_ref(), Message::pong());
            }
            ConnectionEvent::PingRequest => {
                send_message(connection.as_ref(), Message::ping());
            }
            ConnectionEvent::Error(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %self.key, error = %error, "Transport error");
                self.emit(ManagerEvent::Error(error));
            }
            ConnectionEvent::Action(action) => self.on_action(action),
            ConnectionEvent::Closed => self.on_closed(),
        }
    }

    fn on_closed(&mut self) {
        let should_retry = self.state.should_retry();

        _ = self.abandon_connection();
        self.update_state(ManagerState::Disconnected);

        if should_retry && !self.retry_timer.is_armed() {
            self.retry_in(self.config.retry_delay);
        }
    }

    fn on_reachability(&mut self, edge: Reachability) {
        #[cfg(feature = "tracing")]
        tracing::debug!(key = %self.key, ?edge, state = %self.state, "Reachability changed");

        match edge {
            Reachability::Online => {
                if matches!(
                    self.state,
                    ManagerState::Connecting | ManagerState::Unavailable
                ) {
                    self.retry_in(Duration::ZERO);
                }
            }
            Reachability::Offline => {
                if self.state.should_retry() {
                    self.disconnect_internally();
                    self.update_state(ManagerState::Disconnected);
                    self.update_state(ManagerState::Unavailable);
                }
            }
        }
    }

    fn reset_activity_check(&mut self) {
        self.stop_activity_check();
        let Some(connection) = &self.connection else {
            return;
        };
        if connection.supports_ping() {
            return;
        }

        let id = self.next_id();
        let timer = self.timer(TimerKind::Activity, id, self.activity_timeout);
        self.activity_timer.arm(id, timer);
    }

    fn send_activity_check(&mut self) {
        self.stop_activity_check();
        let Some(connection) = &self.connection else {
            return;
        };

        send_message(connection.as_ref(), Message::ping());

        let id = self.next_id();
        let timer = self.timer(TimerKind::Pong, id, self.config.pong_timeout);
        self.activity_timer.arm(id, timer);
    }

    fn stop_activity_check(&mut self) {
        self.activity_timer.cancel();
    }

    fn start_timeline(&mut self) {
        if self.timeline_timer.is_some() {
            return;
        }
        let Some(timeline) = &self.timeline else {
            return;
        };

        let timeline = Arc::clone(timeline);
        let tls_rx = self.tls_tx.subscribe();
        self.timeline_timer = Some(PeriodicTimer::new(
            self.config.timeline_interval,
            move || send_timeline(Arc::clone(&timeline), *tls_rx.borrow()),
        ));
    }

    fn flush_timeline(&self) {
        if let Some(timeline) = &self.timeline {
            tokio::spawn(send_timeline(Arc::clone(timeline), self.encrypted));
        }
    }

    fn update_state(&mut self, new: ManagerState) {
        if new == self.state {
            return;
        }
        let previous = std::mem::replace(&mut self.state, new);

        #[cfg(feature = "tracing")]
        tracing::info!(key = %self.key, %previous, current = %new, "State changed");

        self.state_tx.send_replace(new);
        self.emit(ManagerEvent::StateChange(StateChange {
            previous,
            current: new,
        }));
        if let Some(event) = ManagerEvent::for_state(new, self.socket_id.as_deref()) {
            self.emit(event);
        }
    }

    fn emit(&self, event: ManagerEvent) {
        // No subscribers is not an error
        _ = self.events.send(event);
    }

    fn timer(&self, kind: TimerKind, id: u64, delay: Duration) -> Timer {
        let inputs = self.inputs.clone();
        Timer::new(delay, move || {
            _ = inputs.send(Input::Elapsed { timer: kind, id });
        })
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

fn send_message(connection: &dyn Connection, message: Message) -> bool {
    connection.send_event(&message.event, message.data, message.channel.as_deref())
}

async fn next_edge(rx: Option<&mut broadcast::Receiver<Reachability>>) -> Option<Reachability> {
    let Some(rx) = rx else {
        return std::future::pending().await;
    };

    loop {
        match rx.recv().await {
            Ok(edge) => return Some(edge),
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn send_timeline(timeline: Arc<dyn TimelineSender>, encrypted: bool) {
    if let Err(e) = timeline.send(encrypted).await {
        #[cfg(feature = "tracing")]
        tracing::debug!(error = %e, "Unable to send timeline");
        #[cfg(not(feature = "tracing"))]
        let _ = &e;
    }
}
