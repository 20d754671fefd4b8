// ── Location and peer feeds ──
//
// Streams that mirror a position on the widget: the user's own location as
// the widget reports it, and a peer's position or direction as the caller
// pushes it.

use std::sync::{Arc, Mutex};

use msi_api::channel::{Channel, HandlerId, handler};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::controls::RemoteControls;
use crate::error::CoreError;
use crate::model::{Caption, DirectionUpdate, GpsLocation, NavigationSignal, PositionUpdate, UserType};
use crate::stream::{Stream, lock};

pub mod event {
    pub const PIN_CURRENT_LOCATION: &str = "pin:current:location";
    pub const CURRENT_LOCATION: &str = "current:location";
    pub const CURRENT_LOCATION_LIVE: &str = "current:location:live";
    pub const CURRENT_LOCATION_ERROR: &str = "current:location:error";
    pub const LIVE_LOCATION_START: &str = "live:location:start";
    pub const LIVE_LOCATION_UPDATE: &str = "live:location:update";
    pub const LIVE_LOCATION_END: &str = "live:location:end";
    pub const PIN_PEER: &str = "pin:peer:location";
    pub const UNPIN_PEER: &str = "unpin:peer:location";
}

const PEER_ID: &str = "peer";
const SIGNAL_CAPACITY: usize = 32;

// ── My location ──────────────────────────────────────────────────────

const LOCATION_EVENTS: [&str; 5] = [
    event::CURRENT_LOCATION,
    event::CURRENT_LOCATION_LIVE,
    event::LIVE_LOCATION_START,
    event::LIVE_LOCATION_UPDATE,
    event::LIVE_LOCATION_END,
];

/// Pin the user on the widget and follow the location it reports.
/// Closing the stream stops listening.
pub fn my_location(channel: &Arc<dyn Channel>, user_type: UserType) -> Stream<GpsLocation> {
    let stream: Stream<GpsLocation> = Stream::new();
    channel.emit(event::PIN_CURRENT_LOCATION, Some(json!(user_type)), None);

    let mut registered: Vec<(&'static str, HandlerId)> = Vec::with_capacity(LOCATION_EVENTS.len() + 1);
    for name in LOCATION_EVENTS {
        let stream = stream.clone();
        let id = channel.on(
            name,
            handler(move |payload, _| match serde_json::from_value::<GpsLocation>(payload) {
                Ok(location) => stream.sync(&location),
                Err(e) => debug!(event = name, error = %e, "malformed location dropped"),
            }),
        );
        registered.push((name, id));
    }

    let errors = stream.clone();
    let id = channel.on(
        event::CURRENT_LOCATION_ERROR,
        handler(move |payload, _| {
            let reason = match payload {
                Value::String(message) => message,
                other => other.to_string(),
            };
            errors.error(CoreError::Remote { reason });
        }),
    );
    registered.push((event::CURRENT_LOCATION_ERROR, id));

    let channel = Arc::clone(channel);
    stream.on_close(move || {
        for (name, id) in registered {
            channel.off(name, Some(id));
        }
    });
    stream
}

// ── Peer location ────────────────────────────────────────────────────

/// Pin a peer at `position`. Each update pushed into the stream moves the
/// pin; closing it unpins.
pub fn peer_location(
    channel: &Arc<dyn Channel>,
    position: GpsLocation,
    caption: Option<Caption>,
) -> Stream<PositionUpdate> {
    let stream: Stream<PositionUpdate> = Stream::new();
    pin_peer(channel.as_ref(), position, caption.as_ref());

    // The last caption sticks until a new one is pushed.
    let current = Arc::new(Mutex::new(caption));
    {
        let channel = Arc::clone(channel);
        let handle = stream.clone();
        stream.on_data(move |update: &PositionUpdate| {
            let Some(position) = update.position else {
                handle.error(CoreError::InvalidData);
                return;
            };
            let mut caption = lock(&current);
            if update.caption.is_some() {
                caption.clone_from(&update.caption);
            }
            pin_peer(channel.as_ref(), position, caption.as_ref());
        });
    }

    let channel = Arc::clone(channel);
    stream.on_close(move || channel.emit(event::UNPIN_PEER, Some(json!(PEER_ID)), None));
    stream
}

fn pin_peer(channel: &dyn Channel, position: GpsLocation, caption: Option<&Caption>) {
    channel.emit(
        event::PIN_PEER,
        Some(json!({ "id": PEER_ID, "position": position, "caption": caption })),
        None,
    );
}

// ── Peer direction ───────────────────────────────────────────────────

/// Feed for showing a peer's navigation on the widget. The caller pushes
/// `{status, direction, position}` updates into [`stream`](Self::stream).
pub struct PeerDirection {
    stream: Stream<DirectionUpdate>,
    signals: broadcast::Sender<NavigationSignal>,
}

impl PeerDirection {
    pub fn open(controls: Arc<RemoteControls>) -> Self {
        let stream: Stream<DirectionUpdate> = Stream::new();
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);

        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        {
            let handle = stream.clone();
            let signals = signals.clone();
            stream.on_data(move |update: &DirectionUpdate| {
                let (Some(direction), Some(position)) = (&update.direction, update.position) else {
                    handle.error(CoreError::InvalidData);
                    return;
                };
                let _ = tx.send(json!({ "direction": direction, "position": position }));
                relay_status(&handle, &signals, update);
            });
        }
        {
            // Dropping the last stream handle drops `tx` and ends the relay.
            let stream = stream.downgrade();
            tokio::spawn(async move {
                while let Some(route) = rx.recv().await {
                    if let Err(e) = controls.upsert_direction(&route).await {
                        warn!(error = %e, "Failed to upsert peer direction");
                        if let Some(stream) = stream.upgrade() {
                            stream.error(e);
                        }
                    }
                }
            });
        }
        {
            let signals = signals.clone();
            stream.on_close(move || {
                let _ = signals.send(NavigationSignal::Closed);
            });
        }

        Self { stream, signals }
    }

    pub fn stream(&self) -> Stream<DirectionUpdate> {
        self.stream.clone()
    }

    pub fn signals(&self) -> broadcast::Receiver<NavigationSignal> {
        self.signals.subscribe()
    }

    pub fn close(&self) {
        self.stream.close();
    }
}

/// Signal for a pushed update. The update itself is already on the stream,
/// so unlike the navigation feed nothing is re-synced.
fn relay_status(
    stream: &Stream<DirectionUpdate>,
    signals: &broadcast::Sender<NavigationSignal>,
    update: &DirectionUpdate,
) {
    if update.status.is_terminal() {
        stream.close();
    } else {
        if let Some(signal) = update.status.signal() {
            let _ = signals.send(signal);
        }
    }
}

// ── Pickup / dropoff ─────────────────────────────────────────────────

pub async fn pickup_point(
    controls: &RemoteControls,
    coords: GpsLocation,
    caption: Option<Caption>,
) -> Result<(), CoreError> {
    let caption = caption
        .unwrap_or_default()
        .merged_over(Caption::label("Pickup point"));
    controls.set_origin(coords, Some(caption)).await
}

pub async fn dropoff_point(
    controls: &RemoteControls,
    coords: GpsLocation,
    caption: Option<Caption>,
) -> Result<(), CoreError> {
    let caption = caption
        .unwrap_or_default()
        .merged_over(Caption::label("Destination point"));
    controls.set_destination(coords, Some(caption)).await
}

// ── Tests ────────────────────────────────────────────────────────────
