//! Host-side SDK for the De.MSI map widget, built on `msi-api`.
//!
//! - **[`GatewayHost`]** — Probes the network, opens a channel to the
//!   widget, binds it with the access token and mounts plugins. Every
//!   [`reload()`](GatewayHost::reload) starts over on a fresh channel.
//!
//! - **[`RemoteControls`]** — Timeout-guarded calls on the widget: map
//!   style, geocoding, search, route composition, navigation.
//!
//! - **[`Stream<T>`]** — Push stream behind every live feed. Synchronous
//!   fan-out, a single error handler, idempotent close that travels
//!   downstream only.
//!
//! - **[`Periferals`]** — Locally mirrored entity list kept in step with the
//!   widget's periferals layer; mutations apply optimistically.
//!
//! - **[`NavigationSession`]** — Live navigation relaying widget directions
//!   and the caller's own positions.

pub mod config;
pub mod controls;
pub mod error;
pub mod feeds;
pub mod host;
pub mod model;
pub mod navigation;
pub mod periferals;
pub mod plugins;
pub mod stream;

#[cfg(test)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ENTITY_TIMEOUT, Environment, GatewayOptions, RPC_TIMEOUT};
pub use controls::RemoteControls;
pub use error::CoreError;
pub use feeds::PeerDirection;
pub use host::{ForwardedEvent, GatewayHost, HostEvent};
pub use navigation::NavigationSession;
pub use periferals::{PeriferalChange, PeriferalUpdate, Periferals};
pub use plugins::{PluginContext, PluginFactory, PluginRegistry};
pub use stream::{Stream, WeakStream};

pub use model::{
    Caption, DirectionUpdate, Entity, GpsLocation, Itinerary, LivePosition, NavigationSignal,
    NavigationStatus, PositionUpdate, RouteEnd, RoutePoint, UserType, WaypointIndex,
};

// Wire types callers need to plug in their own transport.
pub use msi_api::{Channel, ConnectionState, Connector, MessageChannel, Port, WebSocketConnector};
