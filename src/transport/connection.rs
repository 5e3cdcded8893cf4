use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::{Sink, SinkExt as _, StreamExt as _};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as Frame;

use super::WsStream;
use super::strategy::close_details;
use crate::protocol::{self, ERROR_EVENT, Message, PING_EVENT};
use crate::ws::{Connection, ConnectionEvent, Listener};

/// How long a close frame may take to go out before the socket is dropped anyway.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

enum Outgoing {
    Text(String),
    Close,
}

type ListenerSlot = Arc<RwLock<Option<Listener>>>;

/// An established WebSocket connection.
///
/// A background task owns the socket. Outbound frames are queued to it, inbound frames are
/// decoded and reported to the bound [`Listener`]. The task ends, reporting
/// [`ConnectionEvent::Closed`] once, when either side closes or this handle is dropped.
pub struct WsConnection {
    id: String,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    listener: ListenerSlot,
}

impl WsConnection {
    pub(super) fn spawn(id: String, stream: WsStream) -> Self {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let listener = ListenerSlot::default();

        tokio::spawn(run(stream, outgoing_rx, Arc::clone(&listener)));

        Self {
            id,
            outgoing,
            listener,
        }
    }
}

impl Connection for WsConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, data: &str) -> bool {
        self.outgoing
            .send(Outgoing::Text(data.to_owned()))
            .is_ok()
    }

    fn send_event(&self, event: &str, data: Value, channel: Option<&str>) -> bool {
        match protocol::encode_message(&Message::new(event, data, channel)) {
            Ok(text) => self.send(&text),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(event, error = %e, "Unable to encode event");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                false
            }
        }
    }

    fn close(&self) {
        _ = self.outgoing.send(Outgoing::Close);
    }

    fn supports_ping(&self) -> bool {
        false
    }

    fn bind(&self, listener: Listener) {
        *self
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn unbind(&self) {
        *self
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

fn emit(listener: &ListenerSlot, event: ConnectionEvent) {
    let bound = listener
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    if let Some(bound) = bound {
        bound.emit(event);
    }
}

async fn run(
    stream: WsStream,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    listener: ListenerSlot,
) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            // Handle incoming frames
            frame = read.next() => match frame {
                Some(Ok(Frame::Text(text))) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(text = %text.as_str(), "Received WebSocket text message");
                    dispatch(&listener, text.as_str());
                }
                Some(Ok(Frame::Close(frame))) => {
                    let (code, reason) = close_details(frame.as_ref());
                    if let Some(error) = protocol::close_error(code, &reason) {
                        emit(&listener, ConnectionEvent::Error(Arc::new(error.into())));
                    }
                    if let Some(action) = protocol::close_action(code) {
                        emit(&listener, ConnectionEvent::Action(action));
                    }
                    break;
                }
                Some(Ok(_)) => {
                    // Binary frames are not part of the protocol; ping/pong frames are answered
                    // by tungstenite.
                }
                Some(Err(e)) => {
                    emit(&listener, ConnectionEvent::Error(Arc::new(e.into())));
                    break;
                }
                None => break,
            },

            // Handle outgoing frames from the manager
            command = outgoing.recv() => match command {
                Some(Outgoing::Text(text)) => {
                    if write.send(Frame::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    send_close(&mut write).await;
                    break;
                }
            },
        }
    }

    emit(&listener, ConnectionEvent::Closed);
}

/// Sends a close frame, giving up after [`CLOSE_TIMEOUT`] when the peer stops reading.
async fn send_close<S>(write: &mut S)
where
    S: Sink<Frame> + Unpin,
{
    if timeout(CLOSE_TIMEOUT, write.send(Frame::Close(None)))
        .await
        .is_err()
    {
        #[cfg(feature = "tracing")]
        tracing::debug!(timeout = ?CLOSE_TIMEOUT, "Timed out sending close frame");
    }
}

fn dispatch(listener: &ListenerSlot, text: &str) {
    let message = match protocol::decode_message(text) {
        Ok(message) => message,
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(%text, error = %e, "Failed to parse WebSocket message");
            emit(listener, ConnectionEvent::Error(Arc::new(e)));
            return;
        }
    };

    let follow_up = match message.event.as_str() {
        PING_EVENT => Some(ConnectionEvent::Ping),
        ERROR_EVENT => {
            let error = protocol::error_data(&message.data);
            Some(ConnectionEvent::Error(Arc::new(error.into())))
        }
        _ => None,
    };

    emit(listener, ConnectionEvent::Message(message));
    if let Some(event) = follow_up {
        emit(listener, event);
    }
}
