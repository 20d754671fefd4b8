// ── Runtime gateway configuration ──
//
// These types describe *how* to reach and bind the map widget. They carry
// the access token and call tuning, but never touch disk; msi-config (or
// any embedder) builds a `GatewayOptions` and hands it in.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};
use url::Url;

use crate::error::CoreError;

pub use msi_api::Environment;

/// Default acknowledgement window for remote controls.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(12);

/// Default acknowledgement window for periferal entity operations.
pub const ENTITY_TIMEOUT: Duration = Duration::from_secs(8);

/// Widget root for an environment.
pub fn widget_url(env: Environment) -> &'static str {
    match env {
        Environment::Dev => "http://localhost:4800",
        Environment::Prod => "https://msi.dedot.io",
    }
}

/// Options for one gateway host.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Required; sent with the bind handshake.
    pub access_token: SecretString,
    pub env: Environment,
    /// Overrides the environment's widget root.
    pub base_url: Option<Url>,
    /// Reported to the widget as the embedding origin.
    pub origin: Option<String>,
    pub rpc_timeout: Duration,
    pub entity_timeout: Duration,
    /// Check the widget root is reachable before mounting.
    pub probe: bool,
    /// Plugins to mount after a successful bind, in order.
    pub plugins: Vec<String>,
    /// Extra fields merged into the bind payload.
    pub bind: Map<String, Value>,
}

impl GatewayOptions {
    pub fn new(access_token: SecretString) -> Self {
        Self {
            access_token,
            env: Environment::Dev,
            base_url: None,
            origin: None,
            rpc_timeout: RPC_TIMEOUT,
            entity_timeout: ENTITY_TIMEOUT,
            probe: true,
            plugins: Vec::new(),
            bind: Map::new(),
        }
    }

    /// Reject unusable options before any I/O happens.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.access_token.expose_secret().trim().is_empty() {
            return Err(CoreError::Config {
                message: "Invalid Access Token".into(),
            });
        }
        if self.rpc_timeout.is_zero() || self.entity_timeout.is_zero() {
            return Err(CoreError::Config {
                message: "timeouts must be greater than zero".into(),
            });
        }
        self.url().map(drop)
    }

    /// Where the widget is served.
    pub fn url(&self) -> Result<Url, CoreError> {
        match &self.base_url {
            Some(url) => Ok(url.clone()),
            None => Url::parse(widget_url(self.env)).map_err(|e| CoreError::Config {
                message: format!("Invalid URL: {e}"),
            }),
        }
    }

    /// Payload of the `bind` handshake: the options the widget needs plus
    /// the embedding origin.
    pub fn bind_payload(&self) -> Value {
        let mut payload = self.bind.clone();
        payload.insert("accessToken".into(), json!(self.access_token.expose_secret()));
        payload.insert("env".into(), json!(self.env.to_string()));
        if let Some(origin) = &self.origin {
            payload.insert("origin".into(), json!(origin));
        }
        Value::Object(payload)
    }
}
