//! Order room events.
//!
//! [`EventSocket`] joins an order's journey room and surfaces its events
//! (peers coming and going, route/stage/location changes, chat messages) as
//! typed callbacks. It rides on any [`Channel`]; [`EventSocket::connect`]
//! opens one through a [`Connector`] and authenticates it.
//!
//! Events are not buffered and a dropped socket is not re-established.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::channel::{Channel, Connector, HandlerId, MessageChannel, handler, request};
use crate::error::Error;
use crate::models::{GpsLocation, Message, OrderStage, Peer};

/// How long `AUTH` and `JOIN` wait for the server's answer.
pub const ROOM_TIMEOUT: Duration = Duration::from_secs(12);

/// Handshake payload identifying the connecting party.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketAuth {
    pub utype: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_origin: Option<String>,
    pub access_token: String,
}

impl SocketAuth {
    pub fn client(id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            utype: "client".into(),
            id: id.into(),
            remote_origin: None,
            access_token: access_token.into(),
        }
    }
}

/// Room event names.
pub mod event {
    pub const AUTH: &str = "AUTH";
    pub const JOIN: &str = "JOIN";
    pub const LEFT: &str = "LEFT";
    pub const CONNECTED: &str = "CONNECTED";
    pub const DISCONNECTED: &str = "DISCONNECTED";
    pub const ROUTE_CHANGE: &str = "ROUTE-CHANGE";
    pub const STAGE_CHANGE: &str = "STAGE-CHANGE";
    pub const LOCATION_CHANGE: &str = "LOCATION-CHANGE";
    pub const MESSAGE: &str = "MESSAGE";
}

pub struct EventSocket {
    channel: Arc<dyn Channel>,
}

impl EventSocket {
    /// Open a socket at `url` and authenticate as `auth`.
    pub async fn connect<C: Connector>(connector: &C, url: &Url, auth: &SocketAuth) -> Result<Self, Error> {
        let port = connector.connect(url).await?;
        let socket = Self::attach(MessageChannel::new(port));
        let payload = serde_json::to_value(auth).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        if let Err(e) = request(socket.channel.as_ref(), event::AUTH, Some(payload), ROOM_TIMEOUT).await {
            socket.disconnect();
            return Err(e);
        }
        tracing::info!(utype = %auth.utype, id = %auth.id, "Event socket connected");
        Ok(socket)
    }

    /// Use an already established channel.
    pub fn attach(channel: Arc<dyn Channel>) -> Self {
        Self { channel }
    }

    pub fn disconnect(&self) {
        self.channel.reset();
    }

    /// Join the order room identified by a journey-room token.
    /// A non-empty error answer rejects the join with that message.
    pub async fn join(&self, jrtoken: &str) -> Result<(), Error> {
        if jrtoken.is_empty() {
            return Err(Error::InvalidArgument("Undefined journey room token".into()));
        }
        request(
            self.channel.as_ref(),
            event::JOIN,
            Some(Value::String(jrtoken.to_owned())),
            ROOM_TIMEOUT,
        )
        .await
        .map(drop)
    }

    fn subscribe<T, F>(&self, name: &'static str, f: F) -> HandlerId
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.channel.on(
            name,
            handler(move |payload, _| match serde_json::from_value::<T>(payload) {
                Ok(value) => f(value),
                Err(e) => tracing::debug!(event = name, error = %e, "Dropping malformed room event"),
            }),
        )
    }

    pub fn on_left(&self, f: impl Fn(Peer) + Send + Sync + 'static) -> HandlerId {
        self.subscribe(event::LEFT, f)
    }

    pub fn on_connected(&self, f: impl Fn(Peer) + Send + Sync + 'static) -> HandlerId {
        self.subscribe(event::CONNECTED, f)
    }

    pub fn on_disconnected(&self, f: impl Fn(Peer) + Send + Sync + 'static) -> HandlerId {
        self.subscribe(event::DISCONNECTED, f)
    }

    pub fn on_route_change(&self, f: impl Fn(Value) + Send + Sync + 'static) -> HandlerId {
        self.subscribe(event::ROUTE_CHANGE, f)
    }

    pub fn on_stage_change(&self, f: impl Fn(OrderStage) + Send + Sync + 'static) -> HandlerId {
        self.subscribe(event::STAGE_CHANGE, f)
    }

    pub fn on_location_change(&self, f: impl Fn(GpsLocation) + Send + Sync + 'static) -> HandlerId {
        self.subscribe(event::LOCATION_CHANGE, f)
    }

    pub fn on_message(&self, f: impl Fn(Message) + Send + Sync + 'static) -> HandlerId {
        self.subscribe(event::MESSAGE, f)
    }

    /// Remove a subscription made with one of the `on_*` methods.
    pub fn off(&self, name: &str, id: HandlerId) {
        self.channel.off(name, Some(id));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn join_succeeds_on_empty_answer() {
        let (host, server) = MessageChannel::pair();
        server.on(
            event::JOIN,
            handler(|payload, r| {
                assert_eq!(payload, json!("jr-1"));
                r.unwrap().ok(Value::Null);
            }),
        );
        let socket = EventSocket::attach(host);
        socket.join("jr-1").await.unwrap();
    }

    #[tokio::test]
    async fn join_rejection_carries_server_message() {
        let (host, server) = MessageChannel::pair();
        server.on(event::JOIN, handler(|_, r| drop(r.unwrap().fail("Room closed"))));
        let socket = EventSocket::attach(host);
        let err = socket.join("jr-1").await.unwrap_err();
        assert_eq!(err.to_string(), "Room closed");
    }

    #[tokio::test]
    async fn typed_callbacks_receive_decoded_payloads() {
        let (host, server) = MessageChannel::pair();
        let socket = EventSocket::attach(host);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let stage_tx = tx.clone();
        socket.on_stage_change(move |stage| drop(stage_tx.send(stage.current)));
        socket.on_location_change(move |loc| drop(tx.send(format!("{},{}", loc.lng, loc.lat))));

        server.emit(event::STAGE_CHANGE, Some(json!({ "current": "pickup", "status": "ongoing" })), None);
        server.emit(event::LOCATION_CHANGE, Some(json!({ "bad": true })), None);
        server.emit(event::LOCATION_CHANGE, Some(json!({ "lng": 1.5, "lat": 2.5 })), None);

        assert_eq!(rx.recv().await.unwrap(), "pickup");
        assert_eq!(rx.recv().await.unwrap(), "1.5,2.5");
    }

    #[tokio::test]
    async fn disconnect_resets_the_channel() {
        let (host, _server) = MessageChannel::pair();
        let socket = EventSocket::attach(host.clone());
        socket.disconnect();
        assert!(!host.state().is_established());
        assert!(matches!(socket.join("jr").await, Err(Error::NotConnected)));
    }
}
