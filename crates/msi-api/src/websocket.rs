//! WebSocket port to a hosted widget.
//!
//! [`WebSocketConnector`] opens the socket and spawns a bridge task that
//! turns text messages into [`Frame`]s and back. The returned [`Port`] is
//! what a [`MessageChannel`](crate::channel::MessageChannel) consumes.
//!
//! There is no reconnect loop here: a dropped socket surfaces as a
//! disconnected channel and the host decides whether to reload.
//!
//! # Example
//!
//! ```rust,ignore
//! use msi_api::channel::{Connector, MessageChannel};
//! use msi_api::websocket::WebSocketConnector;
//!
//! let connector = WebSocketConnector::new().with_header("x-access-token", token);
//! let port = connector.connect(&Url::parse("wss://msi.dedot.io/socket")?).await?;
//! let channel = MessageChannel::new(port);
//! ```

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::channel::{Connector, Port};
use crate::error::Error;
use crate::frame::Frame;

// ── WebSocketConnector ───────────────────────────────────────────────

/// Opens WebSocket ports. Cheap to clone; every port it opens stops when
/// the connector's [`shutdown`](Self::shutdown) is called.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    headers: Vec<(String, String)>,
    cancel: CancellationToken,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header to every upgrade request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Stop every bridge task spawned by this connector.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Port, Error> {
        tracing::info!(url = %url, "Connecting to widget socket");

        let ws_url = websocket_url(url)?;
        let uri: tungstenite::http::Uri = ws_url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

        let mut request = ClientRequestBuilder::new(uri);
        for (name, value) in &self.headers {
            request = request.with_header(name.as_str(), value.as_str());
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        tracing::info!("Widget socket connected");

        let (to_socket, from_channel) = mpsc::unbounded_channel();
        let (to_channel, from_socket) = mpsc::unbounded_channel();

        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            if let Err(e) = bridge(ws_stream, from_channel, to_channel, cancel).await {
                tracing::warn!(error = %e, "Widget socket closed with error");
            }
        });

        Ok(Port {
            outbound: to_socket,
            inbound: from_socket,
        })
    }
}

/// Map `http(s)` widget URLs onto `ws(s)`; pass `ws(s)` through.
fn websocket_url(url: &Url) -> Result<Url, Error> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::WebSocketConnect(format!(
                "unsupported URL scheme: {other}"
            )));
        }
    };
    let mut ws = url.clone();
    ws.set_scheme(scheme)
        .map_err(|()| Error::WebSocketConnect(format!("cannot use scheme {scheme} for {url}")))?;
    Ok(ws)
}

// ── Bridge task ──────────────────────────────────────────────────────

/// Shuttle frames between the socket and the channel until either side
/// goes away.
async fn bridge<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    mut from_channel: mpsc::UnboundedReceiver<Frame>,
    to_channel: mpsc::UnboundedSender<Frame>,
    cancel: CancellationToken,
) -> Result<(), Error>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                return Ok(());
            }
            outbound = from_channel.recv() => {
                let Some(frame) = outbound else {
                    tracing::debug!("Channel dropped, closing widget socket");
                    let _ = write.send(tungstenite::Message::Close(None)).await;
                    return Ok(());
                };
                let text = serde_json::to_string(&frame).map_err(|e| Error::Deserialization {
                    message: e.to_string(),
                    body: String::new(),
                })?;
                write
                    .send(tungstenite::Message::text(text))
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            inbound = read.next() => {
                match inbound {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if let Some(frame) = Frame::parse(text.as_str()) {
                            if to_channel.send(frame).is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        return match frame {
                            Some(cf) => Err(Error::WebSocketClosed {
                                code: u16::from(cf.code),
                                reason: cf.reason.to_string(),
                            }),
                            None => {
                                tracing::info!("Widget socket closed (no payload)");
                                Ok(())
                            }
                        };
                    }
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    None => {
                        tracing::info!("Widget socket stream ended");
                        return Ok(());
                    }
                    Some(Ok(_)) => {
                        // Binary, ping/pong, raw frames: nothing to route.
                    }
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
