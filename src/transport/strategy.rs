use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use futures::StreamExt as _;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use url::Url;

use super::WsStream;
use super::connection::WsConnection;
use crate::protocol::{self, HandshakeFrame, PROTOCOL_VERSION};
use crate::ws::{Action, Attempt, ConnectionStrategy, Handshake, WsError};
use crate::{CLIENT_NAME, Result, VERSION};

const DEFAULT_WS_PORT: u16 = 80;
const DEFAULT_WSS_PORT: u16 = 443;
const DEFAULT_HANDSHAKE_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
/// Reported when the server closes without a close frame
const NO_STATUS_CODE: u16 = 1005;

/// Where and how [`WsStrategy`] connects.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct TransportConfig {
    /// Application key, part of the connection path
    #[builder(into)]
    pub key: String,
    /// Host name, e.g. `ws-eu.pusher.com`
    #[builder(into)]
    pub host: String,
    #[builder(default = DEFAULT_WS_PORT)]
    pub ws_port: u16,
    #[builder(default = DEFAULT_WSS_PORT)]
    pub wss_port: u16,
    /// Upper bound for dialing plus receiving the handshake frame
    #[builder(default = DEFAULT_HANDSHAKE_TIMEOUT_DURATION)]
    pub handshake_timeout: Duration,
}

impl TransportConfig {
    /// Configuration for a hosted cluster, `ws-{cluster}.pusher.com`.
    #[must_use]
    pub fn for_cluster(key: &str, cluster: &str) -> Self {
        Self::builder()
            .key(key)
            .host(format!("ws-{cluster}.pusher.com"))
            .build()
    }

    /// Connection URL for the given encryption mode.
    pub fn url(&self, use_tls: bool) -> Result<Url> {
        let (scheme, port) = if use_tls {
            ("wss", self.wss_port)
        } else {
            ("ws", self.ws_port)
        };

        let mut url = Url::parse(&format!(
            "{scheme}://{}:{port}/app/{}",
            self.host, self.key
        ))?;
        url.query_pairs_mut()
            .append_pair("protocol", &PROTOCOL_VERSION.to_string())
            .append_pair("client", CLIENT_NAME)
            .append_pair("version", VERSION)
            .append_pair("flash", "false");

        Ok(url)
    }
}

/// Dials a single WebSocket endpoint and performs the protocol handshake.
#[derive(Debug, Clone)]
pub struct WsStrategy {
    config: TransportConfig,
}

impl WsStrategy {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConnectionStrategy for WsStrategy {
    async fn connect(&self, attempt: Attempt) -> Result<Handshake> {
        let url = self.config.url(attempt.use_tls)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%url, retry = attempt.retry, "Connecting");

        timeout(self.config.handshake_timeout, handshake(&url))
            .await
            .map_err(|_e| WsError::Timeout)?
    }
}

async fn handshake(url: &Url) -> Result<Handshake> {
    let (mut stream, _) = connect_async(url.as_str()).await?;

    loop {
        let Some(frame) = stream.next().await else {
            return Err(WsError::ConnectionClosed.into());
        };

        match frame? {
            Frame::Text(text) => {
                let frame = protocol::decode_message(text.as_str())
                    .and_then(|message| protocol::decode_handshake(&message));
                return finish(stream, frame).await;
            }
            Frame::Close(frame) => {
                let (code, reason) = close_details(frame.as_ref());
                let action = protocol::close_action(code).unwrap_or(Action::Backoff);

                #[cfg(feature = "tracing")]
                tracing::debug!(code, %reason, %action, "Closed during handshake");

                return Ok(Handshake::Rejected {
                    action,
                    error: protocol::close_error(code, &reason),
                });
            }
            _ => {
                // Pings are answered by tungstenite; nothing else is meaningful before the
                // handshake.
            }
        }
    }
}

async fn finish(mut stream: WsStream, frame: Result<HandshakeFrame>) -> Result<Handshake> {
    match frame {
        Ok(HandshakeFrame::Established {
            socket_id,
            activity_timeout,
        }) => {
            let connection = WsConnection::spawn(socket_id.clone(), stream);
            Ok(Handshake::Connected {
                connection: Arc::new(connection),
                socket_id,
                activity_timeout,
            })
        }
        Ok(HandshakeFrame::Rejected { action, error }) => {
            _ = stream.close(None).await;
            Ok(Handshake::Rejected {
                action,
                error: Some(error),
            })
        }
        Err(e) => {
            _ = stream.close(None).await;
            Err(e)
        }
    }
}

pub(super) fn close_details(frame: Option<&CloseFrame>) -> (u16, String) {
    frame.map_or((NO_STATUS_CODE, String::new()), |frame| {
        (u16::from(frame.code), frame.reason.as_str().to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_uses_plain_port_without_tls() {
        let config = TransportConfig::builder()
            .key("abc")
            .host("localhost")
            .ws_port(6001)
            .build();

        let url = config.url(false).unwrap();

        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.port(), Some(6001));
        assert_eq!(url.path(), "/app/abc");
        assert!(
            url.query()
                .unwrap()
                .starts_with("protocol=7&client=rust&version=")
        );
    }

    #[test]
    fn url_switches_to_wss() {
        let config = TransportConfig::for_cluster("abc", "mt1");

        let url = config.url(true).unwrap();

        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("ws-mt1.pusher.com"));
        // Default port for the scheme is elided
        assert_eq!(url.port_or_known_default(), Some(443));
    }

    #[test]
    fn missing_close_frame_is_no_status() {
        assert_eq!(close_details(None), (1005, String::new()));
    }
}
