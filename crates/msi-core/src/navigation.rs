// ── Navigation session ──
//
// Live turn-by-turn navigation on the widget. Starting a session sets the
// route, seeds the widget with a starting position, and then relays every
// `navigation:direction` push onto the session feed. Positions pushed into
// the session input are forwarded as `navigation:navigate` calls.
//
// Closing the feed (locally, or on an UNAVAILABLE status) dismisses the
// navigation on the widget exactly once.

use std::sync::Arc;

use msi_api::channel::handler;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::controls::{RemoteControls, event};
use crate::error::CoreError;
use crate::model::{DirectionUpdate, GpsLocation, Itinerary, NavigationSignal, PositionUpdate};
use crate::stream::Stream;

const SIGNAL_CAPACITY: usize = 32;

/// A running navigation.
pub struct NavigationSession {
    feed: Stream<DirectionUpdate>,
    input: Stream<PositionUpdate>,
    signals: broadcast::Sender<NavigationSignal>,
}

impl NavigationSession {
    /// Set `itinerary` as the route and start navigating from its origin,
    /// or from the current location when the itinerary has none.
    ///
    /// Fails with [`CoreError::LocationUnavailable`] when no starting
    /// position can be found; navigation is not started in that case.
    pub async fn start(controls: Arc<RemoteControls>, itinerary: &Itinerary) -> Result<Self, CoreError> {
        controls.set_route(itinerary).await?;

        let position = match itinerary.origin.as_ref().map(|o| o.coords) {
            Some(coords) => coords,
            None => current_location(&controls).await?,
        };

        let session = Self::listen(Arc::clone(&controls));

        // Once loaded, a failed start must still dismiss on the widget.
        if let Err(e) = begin(&controls, position).await {
            warn!(error = %e, "navigation start failed");
            session.close();
            return Err(e);
        }
        info!(lng = position.lng, lat = position.lat, "navigation started");
        Ok(session)
    }

    /// Wire the feed, the input relay and the close hook.
    fn listen(controls: Arc<RemoteControls>) -> Self {
        let feed: Stream<DirectionUpdate> = Stream::new();
        let input: Stream<PositionUpdate> = Stream::new();
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        feed.pipe(&input);

        let channel = Arc::clone(controls.channel());
        let listener = {
            let feed = feed.clone();
            let signals = signals.clone();
            channel.on(
                event::NAVIGATION_DIRECTION,
                handler(move |payload, responder| {
                    if let Some(r) = responder {
                        r.ok(serde_json::Value::Null);
                    }
                    match serde_json::from_value::<DirectionUpdate>(payload) {
                        Ok(update) => relay_direction(&feed, &signals, &update),
                        Err(e) => {
                            debug!(error = %e, "malformed navigation direction");
                            feed.error(CoreError::InvalidData);
                        }
                    }
                }),
            )
        };

        // Positions go out one at a time, in the order they were pushed.
        let (tx, mut rx) = mpsc::unbounded_channel::<GpsLocation>();
        {
            let input_handle = input.clone();
            input.on_data(move |update: &PositionUpdate| match update.position {
                Some(position) => {
                    let _ = tx.send(position);
                }
                None => input_handle.error(CoreError::InvalidData),
            });
        }
        {
            let controls = Arc::clone(&controls);
            let input = input.downgrade();
            tokio::spawn(async move {
                while let Some(position) = rx.recv().await {
                    if let Err(e) = controls.navigate(position).await {
                        if let Some(input) = input.upgrade() {
                            input.error(e);
                        }
                    }
                }
            });
        }

        {
            let signals = signals.clone();
            feed.on_close(move || {
                channel.off(event::NAVIGATION_DIRECTION, Some(listener));
                let _ = signals.send(NavigationSignal::Closed);

                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    warn!("No runtime to dismiss navigation");
                    return;
                };
                runtime.spawn(async move {
                    if let Err(e) = controls.stop_navigation().await {
                        warn!(error = %e, "Failed to dismiss navigation");
                    }
                });
            });
        }

        Self {
            feed,
            input,
            signals,
        }
    }

    /// Direction updates pushed by the widget.
    pub fn stream(&self) -> Stream<DirectionUpdate> {
        self.feed.clone()
    }

    /// Push the caller's own positions here to advance navigation.
    /// An update without a position raises a stream error.
    pub fn input(&self) -> Stream<PositionUpdate> {
        self.input.clone()
    }

    /// Lifecycle signals, one per known status received, then `Closed`.
    pub fn signals(&self) -> broadcast::Receiver<NavigationSignal> {
        self.signals.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.feed.is_active()
    }

    /// End the session and dismiss the navigation on the widget.
    pub fn close(&self) {
        self.feed.close();
    }
}

impl std::fmt::Debug for NavigationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationSession")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Deliver one update, raise its signal, and close on a terminal status.
/// `Closed` itself is raised by the feed's close hook.
fn relay_direction(
    feed: &Stream<DirectionUpdate>,
    signals: &broadcast::Sender<NavigationSignal>,
    update: &DirectionUpdate,
) {
    if !feed.is_active() {
        return;
    }
    feed.sync(update);
    if update.status.is_terminal() {
        feed.close();
    } else if let Some(signal) = update.status.signal() {
        let _ = signals.send(signal);
    }
}

async fn begin(controls: &RemoteControls, position: GpsLocation) -> Result<(), CoreError> {
    controls.start_navigation().await?;
    controls.set_initial_position(position).await
}

async fn current_location(controls: &RemoteControls) -> Result<GpsLocation, CoreError> {
    match controls.get_current_location().await {
        Ok(Some(location)) => Ok(location),
        Ok(None) => Err(CoreError::LocationUnavailable),
        Err(e) => {
            debug!(error = %e, "current location lookup failed");
            Err(CoreError::LocationUnavailable)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{NavigationStatus, RoutePoint};
    use crate::testing::Widget;
    use msi_api::channel::Channel;
    use secrecy::SecretString;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    fn controls(host: Arc<msi_api::MessageChannel>) -> Arc<RemoteControls> {
        Arc::new(RemoteControls::new(
            host,
            Duration::from_secs(12),
            SecretString::from("tok".to_owned()),
        ))
    }

    fn itinerary_from(lng: f64, lat: f64) -> Itinerary {
        Itinerary {
            origin: Some(RoutePoint::new(GpsLocation::new(lng, lat))),
            destination: Some(RoutePoint::new(GpsLocation::new(1.0, 1.0))),
            ..Itinerary::default()
        }
    }

    fn ack_setup(widget: &Widget) {
        widget.ack(event::SET_ROUTE);
        widget.ack(event::NAVIGATION_LOAD);
        widget.ack(event::INITIAL_POSITION);
        widget.ack(event::NAVIGATION_DISMISS);
        widget.ack(event::NAVIGATION_NAVIGATE);
    }

    fn push(widget: &Widget, status: &str) {
        widget.channel.emit(
            event::NAVIGATION_DIRECTION,
            Some(json!({ "status": status, "direction": { "eta": 3 }, "position": { "lng": 0.5, "lat": 0.5 } })),
            None,
        );
    }

    #[tokio::test]
    async fn setup_runs_route_start_then_initial_position() {
        let (host, mut widget) = Widget::pair();
        ack_setup(&widget);

        let session = NavigationSession::start(controls(host), &itinerary_from(-0.2, 5.6))
            .await
            .unwrap();
        assert!(session.is_active());

        let seen = widget.drain().await;
        let names: Vec<&str> = seen.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec![event::SET_ROUTE, event::NAVIGATION_LOAD, event::INITIAL_POSITION]);
        assert_eq!(seen[2].1["lat"], 5.6);
    }

    #[tokio::test]
    async fn statuses_map_to_signals_and_unavailable_ends_the_session() {
        let (host, mut widget) = Widget::pair();
        ack_setup(&widget);
        let session = NavigationSession::start(controls(host), &itinerary_from(0.0, 0.1))
            .await
            .unwrap();
        widget.drain().await;

        let mut signals = session.signals();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        session
            .stream()
            .on_data(move |u: &DirectionUpdate| sink.lock().unwrap().push(u.status));

        push(&widget, "STARTED");
        push(&widget, "REROUTING");
        push(&widget, "HIGH_TRAFFIC");
        push(&widget, "UNAVAILABLE");

        let mut emitted = Vec::new();
        for _ in 0..3 {
            emitted.push(signals.recv().await.unwrap().to_string());
        }
        assert_eq!(emitted, vec!["started", "high_traffic", "closed"]);
        assert_eq!(
            *statuses.lock().unwrap(),
            vec![
                NavigationStatus::Started,
                NavigationStatus::Unknown,
                NavigationStatus::HighTraffic,
                NavigationStatus::Unavailable
            ]
        );
        assert!(!session.is_active());
        assert!(!session.input().is_active());

        // Further pushes and closes change nothing.
        push(&widget, "ARRIVED");
        session.close();
        let names = widget.drain_names().await;
        assert_eq!(names, vec![event::NAVIGATION_DISMISS]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_origin_and_location_timeout_aborts_setup() {
        let (host, mut widget) = Widget::pair();
        widget.ack(event::SET_ROUTE);
        let _parked = widget.park(event::GET_CURRENT_LOCATION);
        widget.ack(event::NAVIGATION_LOAD);

        let itinerary = Itinerary {
            destination: Some(RoutePoint::new(GpsLocation::new(1.0, 1.0))),
            ..Itinerary::default()
        };
        let err = NavigationSession::start(controls(host), &itinerary)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unable to get current location");

        let names = widget.drain_names().await;
        assert_eq!(names, vec![event::SET_ROUTE, event::GET_CURRENT_LOCATION]);
    }

    #[tokio::test]
    async fn failed_initial_position_dismisses_the_loaded_navigation() {
        let (host, mut widget) = Widget::pair();
        widget.ack(event::SET_ROUTE);
        widget.ack(event::NAVIGATION_LOAD);
        widget.answer(event::INITIAL_POSITION, Err("bad position".into()));
        widget.ack(event::NAVIGATION_DISMISS);

        let controls = controls(host);
        let err = NavigationSession::start(Arc::clone(&controls), &itinerary_from(0.0, 0.1))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "bad position");

        let mut names = Vec::new();
        for _ in 0..4 {
            names.push(widget.next().await.0);
        }
        assert_eq!(
            names,
            vec![
                event::SET_ROUTE,
                event::NAVIGATION_LOAD,
                event::INITIAL_POSITION,
                event::NAVIGATION_DISMISS
            ]
        );

        // The relay and dismiss tasks let go of the controls.
        for _ in 0..100 {
            if Arc::strong_count(&controls) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(Arc::strong_count(&controls), 1);
    }

    #[tokio::test]
    async fn pushed_positions_become_navigate_calls() {
        let (host, mut widget) = Widget::pair();
        ack_setup(&widget);
        let session = NavigationSession::start(controls(host), &itinerary_from(0.0, 0.1))
            .await
            .unwrap();
        widget.drain().await;

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let input = session.input();
        input.on_error(move |e| sink.lock().unwrap().push(e.to_string()));

        input.sync(&PositionUpdate::default());
        input.sync(&PositionUpdate::at(GpsLocation::new(0.3, 0.4)));

        let (name, payload) = widget.next().await;
        assert_eq!(name, event::NAVIGATION_NAVIGATE);
        assert_eq!(payload["lng"], 0.3);
        assert_eq!(*errors.lock().unwrap(), vec!["Invalid Data"]);
        assert!(input.is_active());
    }

    #[tokio::test]
    async fn local_close_dismisses_once() {
        let (host, mut widget) = Widget::pair();
        ack_setup(&widget);
        let session = NavigationSession::start(controls(host), &itinerary_from(0.0, 0.1))
            .await
            .unwrap();
        widget.drain().await;
        let mut signals = session.signals();

        session.close();
        session.close();
        session.stream().close();

        assert_eq!(signals.recv().await.unwrap(), NavigationSignal::Closed);
        assert_eq!(widget.drain_names().await, vec![event::NAVIGATION_DISMISS]);
    }
}
