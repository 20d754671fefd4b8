// Wire models shared by the REST collaborators and the widget channel.
//
// Field names follow the remote JSON (camelCase). Anything the server sends
// beyond the typed fields lands in `extra` so nothing is silently dropped.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Geometry ─────────────────────────────────────────────────────────

/// A point on the map, with optional heading in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsLocation {
    pub lng: f64,
    pub lat: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

impl GpsLocation {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self {
            lng,
            lat,
            heading: None,
        }
    }

    /// Both axes are non-zero. The remote treats a zero axis as unset.
    pub fn is_set(&self) -> bool {
        self.lng != 0.0 && self.lat != 0.0
    }
}

/// `[lng, lat]` pair, as waypoints carry it.
pub type LngLat = [f64; 2];

// ── Orders ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaypointKind {
    Pickup,
    Dropoff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointContact {
    #[serde(rename = "type")]
    pub kind: String,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub no: u32,
    #[serde(rename = "type")]
    pub kind: WaypointKind,
    pub description: String,
    pub coordinates: LngLat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub contact: WaypointContact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub waypoint_no: u32,
    pub care_level: u8,
    pub category: String,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    Cash,
    Card,
    Momo,
    Wigo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amount {
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fees {
    pub total: Amount,
    #[serde(default)]
    pub tax: f64,
    #[serde(default)]
    pub discount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub mode: PaymentMode,
    #[serde(default)]
    pub paid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderService {
    pub fees: Fees,
    pub payment: Payment,
    #[serde(default)]
    pub xpress: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStage {
    pub current: String,
    pub status: String,
}

/// Operator roles an order can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
pub enum OperatorKind {
    #[serde(rename = "DSP")]
    #[strum(serialize = "DSP")]
    Dsp,
    #[serde(rename = "partner")]
    #[strum(serialize = "partner")]
    Partner,
    #[serde(rename = "warehouse")]
    #[strum(serialize = "warehouse")]
    Warehouse,
    #[serde(rename = "agent")]
    #[strum(serialize = "agent")]
    Agent,
}

// ── Peers & messaging ────────────────────────────────────────────────

/// A participant joining or leaving an order room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    #[serde(default)]
    pub utype: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Chat message relayed through an order room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Peer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// A vehicle around a location, as returned by the client periferals lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GpsLocation>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}
