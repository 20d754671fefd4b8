// ── Domain model ──
//
// Payload types exchanged with the map widget. Captions, directions and
// search results are relayed, never interpreted, so they stay loosely typed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

pub use msi_api::models::{GpsLocation, LngLat};

/// Label block shown next to a pin or waypoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sublabel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Caption {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    /// Fill unset fields from `defaults`; fields set here win.
    pub fn merged_over(self, defaults: Caption) -> Caption {
        let mut extra = defaults.extra;
        extra.extend(self.extra);
        Caption {
            label: self.label.or(defaults.label),
            sublabel: self.sublabel.or(defaults.sublabel),
            duration: self.duration.or(defaults.duration),
            unit: self.unit.or(defaults.unit),
            extra,
        }
    }
}

// ── Route ────────────────────────────────────────────────────────────

/// One stop of an itinerary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub coords: GpsLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<Caption>,
}

impl RoutePoint {
    pub fn new(coords: GpsLocation) -> Self {
        Self {
            index: None,
            coords,
            caption: None,
        }
    }

    pub fn with_caption(mut self, caption: Caption) -> Self {
        self.caption = Some(caption);
        self
    }
}

/// Origin, intermediate stops and destination. Replaced wholesale by
/// `set_route`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Itinerary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<RoutePoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waypoints: Vec<RoutePoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<RoutePoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// Which waypoint a caption call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaypointIndex {
    Endpoint(RouteEnd),
    Stop(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteEnd {
    Origin,
    Destination,
}

// ── Entities ─────────────────────────────────────────────────────────

/// A tracked vehicle or premises shown in the periferals layer.
/// `id` is unique within one periferals list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub position: GpsLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<Caption>,
    /// Anything else the widget renders (type, grade, status, ...).
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl Entity {
    pub fn new(id: impl Into<String>, position: GpsLocation) -> Self {
        Self {
            id: id.into(),
            position,
            caption: None,
            profile: Map::new(),
        }
    }
}

/// New position for a moving entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePosition {
    pub id: String,
    pub position: GpsLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<Caption>,
}

// ── Navigation ───────────────────────────────────────────────────────

/// Status reported by the widget with every direction update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NavigationStatus {
    Started,
    Stale,
    LongStop,
    LowTraffic,
    ModerateTraffic,
    HighTraffic,
    SpeedWarning,
    Nearby,
    Arrived,
    /// Terminal: the session ends.
    Unavailable,
    /// Any status this build does not know. Relayed, but raises no signal.
    #[serde(other)]
    Unknown,
}

impl NavigationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Unavailable)
    }

    /// Lifecycle signal raised for this status. `Unavailable` raises `Closed`;
    /// unknown statuses raise nothing.
    pub fn signal(self) -> Option<NavigationSignal> {
        Some(match self {
            Self::Started => NavigationSignal::Started,
            Self::Stale => NavigationSignal::Stale,
            Self::LongStop => NavigationSignal::LongStop,
            Self::LowTraffic => NavigationSignal::LowTraffic,
            Self::ModerateTraffic => NavigationSignal::ModerateTraffic,
            Self::HighTraffic => NavigationSignal::HighTraffic,
            Self::SpeedWarning => NavigationSignal::SpeedWarning,
            Self::Nearby => NavigationSignal::Nearby,
            Self::Arrived => NavigationSignal::Arrived,
            Self::Unavailable => NavigationSignal::Closed,
            Self::Unknown => return None,
        })
    }
}

/// Local lifecycle event of a navigation feed, named after the lowercased
/// status (`high_traffic`, ...), plus the terminal `closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum NavigationSignal {
    Started,
    Stale,
    LongStop,
    LowTraffic,
    ModerateTraffic,
    HighTraffic,
    SpeedWarning,
    Nearby,
    Arrived,
    Closed,
}

/// A `navigation:direction` push, or a direction fed into a peer feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionUpdate {
    pub status: NavigationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<GpsLocation>,
}

/// A position fed into a feed by the caller's own GPS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<GpsLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<Caption>,
}

impl PositionUpdate {
    pub fn at(position: GpsLocation) -> Self {
        Self {
            position: Some(position),
            caption: None,
        }
    }
}

/// Who is standing at the current location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserType {
    #[default]
    Client,
    Agent,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_round_trips_screaming_case() {
        let s: NavigationStatus = serde_json::from_value(json!("HIGH_TRAFFIC")).unwrap();
        assert_eq!(s, NavigationStatus::HighTraffic);
        assert_eq!(s.signal().unwrap().to_string(), "high_traffic");
        assert_eq!(NavigationStatus::Unavailable.signal(), Some(NavigationSignal::Closed));
        assert!(NavigationStatus::Unavailable.is_terminal());
    }

    #[test]
    fn unrecognised_status_still_parses() {
        let update: DirectionUpdate =
            serde_json::from_value(json!({ "status": "REROUTING", "direction": { "eta": 9 } })).unwrap();
        assert_eq!(update.status, NavigationStatus::Unknown);
        assert_eq!(update.status.signal(), None);
        assert!(!update.status.is_terminal());
    }

    #[test]
    fn caller_caption_wins_over_defaults() {
        let merged = Caption {
            sublabel: Some("Gate B".into()),
            ..Caption::default()
        }
        .merged_over(Caption::label("Pickup point"));
        assert_eq!(merged.label.as_deref(), Some("Pickup point"));
        assert_eq!(merged.sublabel.as_deref(), Some("Gate B"));

        let merged = Caption::label("Home").merged_over(Caption::label("Pickup point"));
        assert_eq!(merged.label.as_deref(), Some("Home"));
    }

    #[test]
    fn entity_keeps_profile_fields() {
        let e: Entity = serde_json::from_value(json!({
            "id": "v1",
            "position": { "lng": 0.0, "lat": 0.0 },
            "type": "bike",
            "grade": 2
        }))
        .unwrap();
        assert_eq!(e.profile["type"], "bike");
        assert_eq!(serde_json::to_value(&e).unwrap()["grade"], 2);
    }

    #[test]
    fn waypoint_index_accepts_ends_and_numbers() {
        assert_eq!(
            serde_json::to_value(WaypointIndex::Endpoint(RouteEnd::Origin)).unwrap(),
            json!("origin")
        );
        assert_eq!(serde_json::to_value(WaypointIndex::Stop(2)).unwrap(), json!(2));
        let idx: WaypointIndex = serde_json::from_value(json!("destination")).unwrap();
        assert_eq!(idx, WaypointIndex::Endpoint(RouteEnd::Destination));
    }
}
