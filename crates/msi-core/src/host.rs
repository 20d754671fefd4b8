// ── Gateway host ──
//
// Owns the connection to one map widget: probes the network, opens a port,
// binds with the access token, and hands out controls and feeds once bound.
// Every mount builds a fresh channel; the previous one is reset and its
// subscriptions are gone for good.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use msi_api::channel::{Channel, ConnectionState, Connector, MessageChannel, handler, request};
use msi_api::transport::{TransportConfig, probe};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::config::GatewayOptions;
use crate::controls::RemoteControls;
use crate::error::CoreError;
use crate::feeds::{self, PeerDirection};
use crate::model::{Caption, Entity, GpsLocation, Itinerary, PositionUpdate, UserType};
use crate::navigation::NavigationSession;
use crate::periferals::Periferals;
use crate::plugins::{PluginContext, PluginRegistry};
use crate::stream::Stream;

const EVENT_CHANNEL_SIZE: usize = 64;

pub mod event {
    pub const BIND: &str = "bind";
    pub const READY: &str = "ready";
    pub const ERROR: &str = "error";
    pub const EVENT: &str = "event";
}

/// Host lifecycle, kept apart from anything the widget forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Ready,
    Error(String),
    Closed,
}

/// An arbitrary event the widget forwarded to the host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ForwardedEvent {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

struct Bound {
    channel: Arc<MessageChannel>,
    controls: Arc<RemoteControls>,
}

/// Connects to the widget through `C` and exposes it once bound.
pub struct GatewayHost<C: Connector> {
    options: GatewayOptions,
    connector: C,
    registry: PluginRegistry,
    http: reqwest::Client,
    current: ArcSwapOption<Bound>,
    lifecycle: broadcast::Sender<HostEvent>,
    forwarded: broadcast::Sender<ForwardedEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    /// Bumped on every mount and close; stale channel watchers compare
    /// against it before touching `state`.
    epoch: Arc<AtomicU64>,
}

impl<C: Connector> GatewayHost<C> {
    /// Validate `options` and build the host. Nothing is connected yet.
    pub fn new(options: GatewayOptions, connector: C, registry: PluginRegistry) -> Result<Self, CoreError> {
        options.validate()?;
        let http = TransportConfig::default()
            .with_timeout(options.rpc_timeout)
            .build_client()?;
        let (lifecycle, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (forwarded, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            options,
            connector,
            registry,
            http,
            current: ArcSwapOption::empty(),
            lifecycle,
            forwarded,
            state: Arc::new(state),
            epoch: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Probe the widget root (when enabled), then mount.
    pub async fn load(&self) -> Result<(), CoreError> {
        let url = self.options.url()?;
        if self.options.probe && !probe(&self.http, &url).await {
            let err = CoreError::NetworkUnavailable;
            self.raise(HostEvent::Error(err.to_string()));
            return Err(err);
        }
        self.mount().await
    }

    /// Open a fresh channel to the widget and bind it. Any previous
    /// channel is reset first.
    pub async fn mount(&self) -> Result<(), CoreError> {
        let url = self.options.url()?;
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(previous) = self.current.swap(None) {
            debug!("resetting previous widget channel");
            previous.channel.reset();
        }
        self.state.send_replace(ConnectionState::Connecting);

        let port = match self.connector.connect(&url).await {
            Ok(port) => port,
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                let err = CoreError::from(e);
                self.raise(HostEvent::Error(err.to_string()));
                return Err(err);
            }
        };
        let channel = MessageChannel::new(port);
        self.state.send_replace(ConnectionState::Connected);
        self.listen(&channel);

        let bound = request(
            &*channel,
            event::BIND,
            Some(self.options.bind_payload()),
            self.options.rpc_timeout,
        )
        .await;
        if let Err(e) = bound {
            let err = match e {
                msi_api::Error::Timeout { .. } => CoreError::timeout(event::BIND, self.options.rpc_timeout),
                other => CoreError::from(other),
            };
            warn!(error = %err, "widget bind failed");
            channel.reset();
            self.state.send_replace(ConnectionState::Disconnected);
            self.raise(HostEvent::Error(err.to_string()));
            return Err(err);
        }

        channel.set_state(ConnectionState::Bound);
        self.state.send_replace(ConnectionState::Bound);
        self.watch_hangup(&channel, epoch);

        let as_dyn: Arc<dyn Channel> = Arc::clone(&channel) as Arc<dyn Channel>;
        let controls = Arc::new(RemoteControls::new(
            Arc::clone(&as_dyn),
            self.options.rpc_timeout,
            self.options.access_token.clone(),
        ));
        self.current.store(Some(Arc::new(Bound {
            channel,
            controls: Arc::clone(&controls),
        })));
        info!(url = %url, "widget bound");

        if !self.options.plugins.is_empty() {
            let ctx = PluginContext {
                channel: as_dyn,
                controls,
            };
            if let Err(e) = self.registry.mount(&self.options.plugins, &ctx) {
                self.raise(HostEvent::Error(e.to_string()));
                return Err(e);
            }
        }

        self.raise(HostEvent::Ready);
        Ok(())
    }

    /// Re-open the widget on a fresh channel.
    pub async fn reload(&self) -> Result<(), CoreError> {
        self.mount().await
    }

    /// Drop the widget channel. Feeds opened on it stop receiving.
    pub fn close(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(previous) = self.current.swap(None) {
            previous.channel.reset();
            self.state.send_replace(ConnectionState::Disconnected);
            self.raise(HostEvent::Closed);
        }
    }

    fn listen(&self, channel: &MessageChannel) {
        let lifecycle = self.lifecycle.clone();
        channel.on(
            event::READY,
            handler(move |_, _| {
                let _ = lifecycle.send(HostEvent::Ready);
            }),
        );

        let lifecycle = self.lifecycle.clone();
        channel.on(
            event::ERROR,
            handler(move |payload, _| {
                let reason = match payload {
                    Value::String(reason) => reason,
                    other => other.to_string(),
                };
                let _ = lifecycle.send(HostEvent::Error(reason));
            }),
        );

        let forwarded = self.forwarded.clone();
        channel.on(
            event::EVENT,
            handler(move |payload, _| match serde_json::from_value::<ForwardedEvent>(payload) {
                Ok(ev) => {
                    let _ = forwarded.send(ev);
                }
                Err(e) => debug!(error = %e, "malformed forwarded event dropped"),
            }),
        );
    }

    /// Follow the channel down when the widget hangs up. A mount or close
    /// that happened since `epoch` owns the state instead.
    fn watch_hangup(&self, channel: &MessageChannel, epoch: u64) {
        let mut channel_state = channel.subscribe_state();
        let state = Arc::clone(&self.state);
        let current = Arc::clone(&self.epoch);
        tokio::spawn(async move {
            if channel_state
                .wait_for(|s| *s == ConnectionState::Disconnected)
                .await
                .is_err()
            {
                return;
            }
            let followed = state.send_if_modified(|s| {
                if current.load(Ordering::Acquire) != epoch || *s == ConnectionState::Disconnected {
                    return false;
                }
                *s = ConnectionState::Disconnected;
                true
            });
            if followed {
                warn!("widget channel dropped");
            }
        });
    }

    fn raise(&self, event: HostEvent) {
        let _ = self.lifecycle.send(event);
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn lifecycle(&self) -> broadcast::Receiver<HostEvent> {
        self.lifecycle.subscribe()
    }

    pub fn forwarded(&self) -> broadcast::Receiver<ForwardedEvent> {
        self.forwarded.subscribe()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Bound and the widget is still on the line.
    pub fn is_ready(&self) -> bool {
        self.current
            .load_full()
            .is_some_and(|bound| bound.channel.state() == ConnectionState::Bound)
    }

    // ── Bound accessors ──────────────────────────────────────────────

    fn bound(&self) -> Result<Arc<Bound>, CoreError> {
        self.current.load_full().ok_or(CoreError::NotReady)
    }

    pub fn channel(&self) -> Result<Arc<dyn Channel>, CoreError> {
        let bound = self.bound()?;
        Ok(Arc::clone(&bound.channel) as Arc<dyn Channel>)
    }

    pub fn controls(&self) -> Result<Arc<RemoteControls>, CoreError> {
        Ok(Arc::clone(&self.bound()?.controls))
    }

    /// Show `list` in the periferals layer and mirror it.
    pub fn periferals(&self, list: Vec<Entity>) -> Result<Periferals, CoreError> {
        Ok(Periferals::open(self.channel()?, list, self.options.entity_timeout))
    }

    pub async fn navigation(&self, itinerary: &Itinerary) -> Result<NavigationSession, CoreError> {
        NavigationSession::start(self.controls()?, itinerary).await
    }

    pub fn my_location(&self, user_type: UserType) -> Result<Stream<GpsLocation>, CoreError> {
        Ok(feeds::my_location(&self.channel()?, user_type))
    }

    pub fn peer_location(
        &self,
        position: GpsLocation,
        caption: Option<Caption>,
    ) -> Result<Stream<PositionUpdate>, CoreError> {
        Ok(feeds::peer_location(&self.channel()?, position, caption))
    }

    pub fn peer_direction(&self) -> Result<PeerDirection, CoreError> {
        Ok(PeerDirection::open(self.controls()?))
    }

    pub async fn pickup_point(&self, coords: GpsLocation, caption: Option<Caption>) -> Result<(), CoreError> {
        feeds::pickup_point(&*self.controls()?, coords, caption).await
    }

    pub async fn dropoff_point(&self, coords: GpsLocation, caption: Option<Caption>) -> Result<(), CoreError> {
        feeds::dropoff_point(&*self.controls()?, coords, caption).await
    }
}

impl<C: Connector> Drop for GatewayHost<C> {
    fn drop(&mut self) {
        if let Some(bound) = self.current.swap(None) {
            bound.channel.reset();
        }
    }
}

impl<C: Connector> std::fmt::Debug for GatewayHost<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayHost")
            .field("env", &self.options.env)
            .field("ready", &self.is_ready())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
