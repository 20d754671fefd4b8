// Order and client REST collaborators
//
// `OrderClient` drives one order through its intent token: waypoints,
// packages, service terms, operators, and monitoring. `ClientApi` covers the
// per-client listings. Both ride on `AccessClient::send`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use reqwest::Method;
use serde::Serialize;
use serde_json::{Value, json};

use crate::access::AccessClient;
use crate::error::Error;
use crate::models::{GpsLocation, OperatorKind, OrderService, OrderStage, Package, Vehicle, Waypoint};

const INTENT_HEADER: &str = "x-intent-token";

fn to_body(value: &impl Serialize) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(|e| Error::InvalidArgument(e.to_string()))
}

// ── OrderClient ──────────────────────────────────────────────────────

/// Operations on a single order, keyed by its intent token.
///
/// Every method takes an optional explicit token; `None` uses the token
/// from the last successful [`intent`](Self::intent).
pub struct OrderClient {
    access: AccessClient,
    intent_token: RwLock<Option<String>>,
}

impl OrderClient {
    pub fn new(access: AccessClient) -> Self {
        Self {
            access,
            intent_token: RwLock::new(None),
        }
    }

    pub fn intent_token(&self) -> Option<String> {
        self.intent_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_intent(&self, token: Option<String>) {
        *self
            .intent_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn resolve(&self, token: Option<&str>) -> Result<String, Error> {
        token
            .map(str::to_owned)
            .or_else(|| self.intent_token())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::InvalidArgument("Expected intent order token".into()))
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<crate::access::Envelope, Error> {
        let token = self.resolve(token)?;
        self.access
            .send(method, path, body, &[(INTENT_HEADER, token.as_str())])
            .await
    }

    // ── Intent ───────────────────────────────────────────────────────

    /// Open an order intent for `client_id` and remember its token.
    pub async fn intent(&self, client_id: &str) -> Result<String, Error> {
        if client_id.is_empty() {
            return Err(Error::InvalidArgument("<clientId> argument required".into()));
        }
        let body = json!({ "clientId": client_id });
        let mut envelope = self
            .access
            .send(Method::POST, "order/intent", Some(&body), &[])
            .await?;
        let token: String = envelope.take("token")?;
        self.store_intent(Some(token.clone()));
        Ok(token)
    }

    /// Drop an order intent. Clears the remembered token.
    pub async fn unintent(&self, token: &str) -> Result<(), Error> {
        if token.is_empty() {
            return Err(Error::InvalidArgument("Undefined intent token".into()));
        }
        self.access
            .send(Method::DELETE, "order/intent", None, &[(INTENT_HEADER, token)])
            .await?;
        self.store_intent(None);
        Ok(())
    }

    // ── Waypoints ────────────────────────────────────────────────────

    pub async fn add_waypoints(&self, list: &[Waypoint], token: Option<&str>) -> Result<Vec<Waypoint>, Error> {
        if list.is_empty() {
            return Err(Error::InvalidArgument("Expected at least one waypoint".into()));
        }
        let body = to_body(&list)?;
        let mut env = self.call(Method::PUT, "order/waypoints/add", Some(&body), token).await?;
        env.take("waypoints")
    }

    pub async fn get_waypoint(&self, no: u32, token: Option<&str>) -> Result<Waypoint, Error> {
        check_number(no, "Expected waypoint number")?;
        let mut env = self
            .call(Method::GET, &format!("order/waypoints/{no}"), None, token)
            .await?;
        env.take("waypoint")
    }

    pub async fn fetch_waypoints(&self, token: Option<&str>) -> Result<Vec<Waypoint>, Error> {
        let mut env = self.call(Method::GET, "order/waypoints", None, token).await?;
        env.take("waypoints")
    }

    /// Patch a waypoint. `updates` uses dotted keys such as `contact.phone`.
    pub async fn update_waypoint(
        &self,
        no: u32,
        updates: &Value,
        token: Option<&str>,
    ) -> Result<Vec<Waypoint>, Error> {
        check_number(no, "Expected waypoint number")?;
        check_object(updates, "Expect <updates: WaypointOptions> to be object")?;
        let mut env = self
            .call(Method::PATCH, &format!("order/waypoints/{no}"), Some(updates), token)
            .await?;
        env.take("waypoints")
    }

    pub async fn delete_waypoint(&self, no: u32, token: Option<&str>) -> Result<Vec<Waypoint>, Error> {
        check_number(no, "Expected waypoint number")?;
        let mut env = self
            .call(Method::DELETE, &format!("order/waypoints/{no}"), None, token)
            .await?;
        env.take("waypoints")
    }

    // ── Packages ─────────────────────────────────────────────────────

    pub async fn add_packages(&self, list: &[Package], token: Option<&str>) -> Result<Vec<Package>, Error> {
        if list.is_empty() {
            return Err(Error::InvalidArgument("Expected at least one package".into()));
        }
        let body = to_body(&list)?;
        let mut env = self.call(Method::PUT, "order/packages/add", Some(&body), token).await?;
        env.take("packages")
    }

    /// Look up a package by tracking code.
    pub async fn get_package(&self, ptc: &str, token: Option<&str>) -> Result<Package, Error> {
        if ptc.is_empty() {
            return Err(Error::InvalidArgument("Expected <PTC> Package Tracking Code".into()));
        }
        let mut env = self
            .call(Method::GET, &format!("order/packages/{ptc}"), None, token)
            .await?;
        env.take("package")
    }

    pub async fn fetch_packages(&self, token: Option<&str>) -> Result<Vec<Package>, Error> {
        let mut env = self.call(Method::GET, "order/packages", None, token).await?;
        env.take("packages")
    }

    pub async fn update_package(
        &self,
        ptc: &str,
        updates: &Value,
        token: Option<&str>,
    ) -> Result<Vec<Package>, Error> {
        if ptc.is_empty() {
            return Err(Error::InvalidArgument("Expected Package Tracking Code".into()));
        }
        check_object(updates, "Expect <updates: PackageOptions> to be object")?;
        let mut env = self
            .call(Method::PATCH, &format!("order/packages/{ptc}"), Some(updates), token)
            .await?;
        env.take("packages")
    }

    pub async fn delete_package(&self, ptc: &str, token: Option<&str>) -> Result<Vec<Package>, Error> {
        if ptc.is_empty() {
            return Err(Error::InvalidArgument("Expected Package Tracking Code".into()));
        }
        let mut env = self
            .call(Method::DELETE, &format!("order/packages/{ptc}"), None, token)
            .await?;
        env.take("packages")
    }

    // ── Service ──────────────────────────────────────────────────────

    /// Submit the service terms. Returns the journey-room token used to
    /// join the order's event room.
    pub async fn initiate(&self, service: &OrderService, token: Option<&str>) -> Result<String, Error> {
        let body = to_body(service)?;
        let mut env = self.call(Method::POST, "order/service", Some(&body), token).await?;
        env.take("jrtoken")
    }

    pub async fn get_service(&self, token: Option<&str>) -> Result<OrderService, Error> {
        let mut env = self.call(Method::GET, "order/service", None, token).await?;
        env.take("service")
    }

    pub async fn update_service(&self, updates: &Value, token: Option<&str>) -> Result<OrderService, Error> {
        check_object(updates, "Expect <updates: OrderServiceOptions> to be object")?;
        let mut env = self.call(Method::PATCH, "order/service", Some(updates), token).await?;
        env.take("service")
    }

    /// Rate the service, 1 to 5.
    pub async fn rate_service(&self, rating: u8, token: Option<&str>) -> Result<(), Error> {
        if !(1..=5).contains(&rating) {
            return Err(Error::InvalidArgument("Expect <rating> to be number between 1 and 5".into()));
        }
        let body = json!({ "rating": rating });
        self.call(Method::POST, "order/service/rating", Some(&body), token).await?;
        Ok(())
    }

    // ── Operators ────────────────────────────────────────────────────

    pub async fn get_operator(&self, kind: OperatorKind, token: Option<&str>) -> Result<Value, Error> {
        let mut env = self
            .call(Method::GET, &format!("order/operators?type={kind}"), None, token)
            .await?;
        let mut operators: HashMap<String, Value> = env.take("operators")?;
        Ok(operators.remove(&kind.to_string()).unwrap_or(Value::Null))
    }

    pub async fn get_operators(&self, token: Option<&str>) -> Result<HashMap<String, Value>, Error> {
        let mut env = self.call(Method::GET, "order/operators", None, token).await?;
        env.take("operators")
    }

    // ── Monitoring ───────────────────────────────────────────────────

    pub async fn current_stage(&self, token: Option<&str>) -> Result<OrderStage, Error> {
        let mut env = self.call(Method::GET, "order/stage", None, token).await?;
        env.take("stage")
    }

    pub async fn current_route(&self, token: Option<&str>) -> Result<Value, Error> {
        let mut env = self.call(Method::GET, "order/route", None, token).await?;
        env.take("route")
    }
}

fn check_number(no: u32, message: &str) -> Result<(), Error> {
    if no == 0 {
        Err(Error::InvalidArgument(message.to_owned()))
    } else {
        Ok(())
    }
}

fn check_object(value: &Value, message: &str) -> Result<(), Error> {
    if value.is_object() {
        Ok(())
    } else {
        Err(Error::InvalidArgument(message.to_owned()))
    }
}

// ── ClientApi ────────────────────────────────────────────────────────

/// Listings scoped to one client. Every call needs an access token.
pub struct ClientApi {
    access: AccessClient,
    client_id: String,
}

impl ClientApi {
    pub fn new(client_id: impl Into<String>, access: AccessClient) -> Result<Self, Error> {
        let client_id = client_id.into();
        if client_id.is_empty() {
            return Err(Error::Config("undefined client id".into()));
        }
        Ok(Self { access, client_id })
    }

    pub async fn active_orders(&self) -> Result<Vec<OrderService>, Error> {
        self.access.require_token()?;
        let path = format!("client/{}/orders/actives", self.client_id);
        let mut env = self.access.send(Method::GET, &path, None, &[]).await?;
        env.take("orders")
    }

    pub async fn order_history(&self) -> Result<Vec<OrderService>, Error> {
        self.access.require_token()?;
        let path = format!("client/{}/orders/history", self.client_id);
        let mut env = self.access.send(Method::GET, &path, None, &[]).await?;
        env.take("orders")
    }

    /// Vehicles around `location`.
    pub async fn periferals(&self, location: GpsLocation) -> Result<Vec<Vehicle>, Error> {
        self.access.require_token()?;
        if !location.is_set() {
            return Err(Error::InvalidArgument("Invalid location coordinates".into()));
        }
        let body = to_body(&location)?;
        let path = format!("client/{}/periferals", self.client_id);
        let mut env = self.access.send(Method::POST, &path, Some(&body), &[]).await?;
        env.take("periferals")
    }
}
