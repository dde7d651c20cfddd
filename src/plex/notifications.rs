//! Push-notification feed of a Plex Media Server.
//!
//! The server pushes JSON messages over a websocket for every kind of
//! activity (playback, transcodes, library scans, timeline updates).
//! [`AlertListener`] yields the decoded notification containers one at a
//! time; classifying them is the caller's job.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::Message as WebsocketMessage, MaybeTlsStream, WebSocketStream,
};
use url::Url;

use crate::{
    error::{Error, Result},
    plex::protocol::{AlertMessage, NotificationContainer},
};

/// Messages larger than this are dropped unparsed to prevent out of
/// memory conditions.
const MAX_MESSAGE_SIZE: usize = 65_536;

/// An open notification websocket.
pub struct AlertListener {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl AlertListener {
    /// Opens the notification websocket.
    ///
    /// # Errors
    ///
    /// Returns error if the websocket handshake fails.
    pub async fn connect(url: &Url) -> Result<Self> {
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        debug!("notification websocket open");

        Ok(Self { ws })
    }

    /// Waits for the next notification.
    ///
    /// Non-notification traffic (pings, unparseable or oversized
    /// messages) is handled internally and never surfaces to the caller.
    ///
    /// # Errors
    ///
    /// Returns `Aborted` when the server closes the connection and
    /// `Unavailable` when the stream ends without a close frame.
    pub async fn next(&mut self) -> Result<NotificationContainer> {
        loop {
            let message = self
                .ws
                .next()
                .await
                .ok_or_else(|| Error::unavailable("notification stream ended"))??;

            match message {
                WebsocketMessage::Text(message) => {
                    let message_size = message.len();
                    if message_size > MAX_MESSAGE_SIZE {
                        error!("ignoring oversized message with {message_size} bytes");
                        continue;
                    }

                    match serde_json::from_str::<AlertMessage>(&message) {
                        Ok(alert) => {
                            if let Some(container) = alert.notification_container {
                                return Ok(container);
                            }
                            trace!("message without notification container");
                        }
                        Err(e) => {
                            trace!("{message:#?}");
                            debug!("error parsing message: {e}");
                        }
                    }
                }
                WebsocketMessage::Ping(payload) => {
                    trace!("ping -> pong");
                    self.ws.send(WebsocketMessage::Pong(payload)).await?;
                }
                WebsocketMessage::Close(payload) => {
                    return Err(Error::aborted(format!(
                        "connection closed by server: {payload:?}"
                    )));
                }
                _ => trace!("message type unimplemented"),
            }
        }
    }
}
