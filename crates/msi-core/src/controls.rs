// ── Remote controls ──
//
// Timeout-guarded request/response operations on the map widget. Each call
// emits one event with an acknowledgement and resolves on whichever comes
// first: the ack or the fixed window. A late ack is dropped.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use msi_api::channel::{Channel, request};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::CoreError;
use crate::model::{Caption, GpsLocation, Itinerary, WaypointIndex};

/// Widget event names used by the controls.
pub mod event {
    pub const SET_MAP_STYLE: &str = "set:map:style";
    pub const GET_CURRENT_LOCATION: &str = "get:current:location";
    pub const PIN_CURRENT_LOCATION: &str = "pin:current:location";
    pub const RESOLVE_PLACE: &str = "resolve:place";
    pub const RESOLVE_COORDINATES: &str = "resolve:coordinates";
    pub const SEARCH_QUERY: &str = "search:query";
    pub const SEARCH_SELECT: &str = "search:select";
    pub const SET_ORIGIN: &str = "set:route:origin";
    pub const REMOVE_ORIGIN: &str = "remove:route:origin";
    pub const SET_DESTINATION: &str = "set:route:destination";
    pub const REMOVE_DESTINATION: &str = "remove:route:destination";
    pub const ADD_WAYPOINT: &str = "add:route:waypoint";
    pub const UPDATE_WAYPOINT: &str = "update:route:waypoint";
    pub const REMOVE_WAYPOINT: &str = "remove:route:waypoint";
    pub const SET_WAYPOINT_CAPTION: &str = "set:waypoint:caption";
    pub const UPDATE_WAYPOINT_CAPTION: &str = "update:waypoint:caption";
    pub const SET_ROUTE: &str = "set:route";
    pub const UPSERT_DIRECTION: &str = "upsert:navigation:direction";
    pub const INITIAL_POSITION: &str = "initial:navigation:position";
    pub const NAVIGATION_LOAD: &str = "navigation:load";
    pub const NAVIGATION_DISMISS: &str = "navigation:dismiss";
    pub const NAVIGATION_NAVIGATE: &str = "navigation:navigate";
    pub const NAVIGATION_DIRECTION: &str = "navigation:direction";
}

/// RPC catalogue over a bound channel. Holds no state beyond the access
/// token, which [`refresh_token`](Self::refresh_token) replaces locally.
pub struct RemoteControls {
    channel: Arc<dyn Channel>,
    timeout: Duration,
    access_token: RwLock<SecretString>,
}

impl RemoteControls {
    pub fn new(channel: Arc<dyn Channel>, timeout: Duration, access_token: SecretString) -> Self {
        Self {
            channel,
            timeout,
            access_token: RwLock::new(access_token),
        }
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // ── Call plumbing ────────────────────────────────────────────────

    async fn call(&self, event: &str, payload: Option<Value>) -> Result<Value, CoreError> {
        match request(self.channel.as_ref(), event, payload, self.timeout).await {
            Ok(result) => Ok(result),
            Err(msi_api::Error::Timeout { .. }) => Err(CoreError::timeout(event, self.timeout)),
            Err(e) => Err(e.into()),
        }
    }

    async fn call_unit(&self, event: &str, payload: Option<Value>) -> Result<(), CoreError> {
        self.call(event, payload).await.map(drop)
    }

    async fn call_as<T: DeserializeOwned>(&self, event: &str, payload: Option<Value>) -> Result<T, CoreError> {
        let raw = self.call(event, payload).await?;
        serde_json::from_value(raw).map_err(|e| {
            debug!(event, error = %e, "Unexpected acknowledgement payload");
            CoreError::InvalidData
        })
    }

    fn encode(value: &impl Serialize) -> Result<Value, CoreError> {
        serde_json::to_value(value).map_err(|e| CoreError::Internal(e.to_string()))
    }

    // ── Map ──────────────────────────────────────────────────────────

    pub async fn set_map_style(&self, style: &str) -> Result<(), CoreError> {
        self.call_unit(event::SET_MAP_STYLE, Some(json!(style))).await
    }

    // ── Location ─────────────────────────────────────────────────────

    pub async fn get_current_location(&self) -> Result<Option<GpsLocation>, CoreError> {
        self.call_as(event::GET_CURRENT_LOCATION, None).await
    }

    /// Pin the user's current location on the map.
    pub async fn pin_current_location(&self) -> Result<Option<GpsLocation>, CoreError> {
        self.call_as(event::PIN_CURRENT_LOCATION, None).await
    }

    /// Coordinates for a place name.
    pub async fn resolve_place(&self, name: &str) -> Result<Option<GpsLocation>, CoreError> {
        self.call_as(event::RESOLVE_PLACE, Some(json!(name))).await
    }

    /// Place details for coordinates. Relayed as the widget sends them.
    pub async fn resolve_coordinates(&self, coords: GpsLocation) -> Result<Option<Value>, CoreError> {
        self.call_as(event::RESOLVE_COORDINATES, Some(Self::encode(&coords)?))
            .await
    }

    // ── Search ───────────────────────────────────────────────────────

    pub async fn search_query(&self, input: &str) -> Result<Vec<String>, CoreError> {
        let found: Option<Vec<String>> = self.call_as(event::SEARCH_QUERY, Some(json!(input))).await?;
        Ok(found.unwrap_or_default())
    }

    /// Details of the `index`-th suggestion from the last query.
    pub async fn search_select(&self, index: u32) -> Result<Option<Value>, CoreError> {
        self.call_as(event::SEARCH_SELECT, Some(json!(index))).await
    }

    // ── Route composition ────────────────────────────────────────────

    pub async fn set_origin(&self, coords: GpsLocation, caption: Option<Caption>) -> Result<(), CoreError> {
        let payload = json!({ "coords": coords, "caption": caption });
        self.call_unit(event::SET_ORIGIN, Some(payload)).await
    }

    pub async fn remove_origin(&self) -> Result<(), CoreError> {
        self.call_unit(event::REMOVE_ORIGIN, None).await
    }

    pub async fn set_destination(&self, coords: GpsLocation, caption: Option<Caption>) -> Result<(), CoreError> {
        let payload = json!({ "coords": coords, "caption": caption });
        self.call_unit(event::SET_DESTINATION, Some(payload)).await
    }

    pub async fn remove_destination(&self) -> Result<(), CoreError> {
        self.call_unit(event::REMOVE_DESTINATION, None).await
    }

    pub async fn add_waypoint(&self, coords: GpsLocation, caption: Option<Caption>) -> Result<(), CoreError> {
        let payload = json!({ "coords": coords, "caption": caption });
        self.call_unit(event::ADD_WAYPOINT, Some(payload)).await
    }

    pub async fn update_waypoint(
        &self,
        index: u32,
        coords: GpsLocation,
        caption: Option<Caption>,
    ) -> Result<(), CoreError> {
        let payload = json!({ "index": index, "coords": coords, "caption": caption });
        self.call_unit(event::UPDATE_WAYPOINT, Some(payload)).await
    }

    pub async fn remove_waypoint(&self, index: u32) -> Result<(), CoreError> {
        self.call_unit(event::REMOVE_WAYPOINT, Some(json!(index))).await
    }

    pub async fn set_waypoint_caption(&self, index: WaypointIndex, caption: Option<Caption>) -> Result<(), CoreError> {
        let payload = json!({ "index": index, "caption": caption });
        self.call_unit(event::SET_WAYPOINT_CAPTION, Some(payload)).await
    }

    pub async fn update_waypoint_caption(
        &self,
        index: WaypointIndex,
        caption: Option<Caption>,
    ) -> Result<(), CoreError> {
        let payload = json!({ "index": index, "caption": caption });
        self.call_unit(event::UPDATE_WAYPOINT_CAPTION, Some(payload)).await
    }

    /// Replace the whole route.
    pub async fn set_route(&self, itinerary: &Itinerary) -> Result<(), CoreError> {
        self.call_unit(event::SET_ROUTE, Some(Self::encode(itinerary)?)).await
    }

    // ── Navigation ───────────────────────────────────────────────────

    /// Insert or replace the direction drawn for a navigation feed.
    pub async fn upsert_direction(&self, direction: &Value) -> Result<(), CoreError> {
        self.call_unit(event::UPSERT_DIRECTION, Some(direction.clone())).await
    }

    pub async fn set_initial_position(&self, position: GpsLocation) -> Result<(), CoreError> {
        self.call_unit(event::INITIAL_POSITION, Some(Self::encode(&position)?))
            .await
    }

    pub async fn start_navigation(&self) -> Result<(), CoreError> {
        self.call_unit(event::NAVIGATION_LOAD, None).await
    }

    pub async fn stop_navigation(&self) -> Result<(), CoreError> {
        self.call_unit(event::NAVIGATION_DISMISS, None).await
    }

    /// Advance navigation to a new position.
    pub async fn navigate(&self, position: GpsLocation) -> Result<(), CoreError> {
        self.call_unit(event::NAVIGATION_NAVIGATE, Some(Self::encode(&position)?))
            .await
    }

    // ── Access token ─────────────────────────────────────────────────

    /// Swap the access token. Local only; empty tokens are ignored.
    pub fn refresh_token(&self, token: SecretString) {
        if token.expose_secret().is_empty() {
            return;
        }
        *self
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn access_token(&self) -> SecretString {
        self.access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
