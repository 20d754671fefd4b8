// REST access client
//
// Wraps `reqwest::Client` with the versioned URL scheme, the SDK user-agent
// header, bearer auth, and the `{ error, message, ... }` response envelope.
// Token issuance and rotation live here too; the order and client
// collaborators build on `AccessClient::send`.

use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Interval between automatic token rotations.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(225);

// ── Options ──────────────────────────────────────────────────────────

/// Deployment target. Picks the default base URLs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

impl Environment {
    /// Default REST API root for this environment.
    pub fn api_url(self) -> &'static str {
        match self {
            Self::Prod => "https://api.delidev.com",
            Self::Dev => "http://api.delidev.io:24800",
        }
    }
}

/// How to reach the REST API.
#[derive(Debug, Clone)]
pub struct AccessOptions {
    pub env: Environment,
    /// API version: `/v{n}/` prefix and `De.remote/{n}.0` user agent.
    pub version: u32,
    /// Rotate the token every [`REFRESH_INTERVAL`] after it is first issued.
    pub autorefresh: bool,
    /// Sent as the `origin` header when set.
    pub remote_origin: Option<String>,
    /// Overrides the environment's API root (tests, self-hosted stacks).
    pub base_url: Option<Url>,
    pub timeout: Duration,
}

impl Default for AccessOptions {
    fn default() -> Self {
        Self {
            env: Environment::Dev,
            version: 1,
            autorefresh: false,
            remote_origin: None,
            base_url: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Application credentials used to obtain access tokens.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub workspace: String,
    pub app_id: String,
    pub app_secret: SecretString,
}

impl Credentials {
    fn validate(&self) -> Result<(), Error> {
        if self.workspace.is_empty() {
            return Err(Error::Config("undefined workspace reference".into()));
        }
        if self.app_id.is_empty() {
            return Err(Error::Config("undefined app id".into()));
        }
        if self.app_secret.expose_secret().is_empty() {
            return Err(Error::Config("undefined app secret".into()));
        }
        Ok(())
    }
}

// ── Envelope ─────────────────────────────────────────────────────────

/// A decoded `{ error: false, ... }` response body.
#[derive(Debug, Clone, Default)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// Take one field out of the envelope and decode it.
    /// A missing field decodes from `null`.
    pub fn take<T: DeserializeOwned>(&mut self, field: &str) -> Result<T, Error> {
        let raw = self.0.remove(field).unwrap_or(Value::Null);
        serde_json::from_value(raw.clone()).map_err(|e| Error::Deserialization {
            message: format!("field `{field}`: {e}"),
            body: raw.to_string(),
        })
    }
}

fn decode_envelope(status: reqwest::StatusCode, body: &str) -> Result<Envelope, Error> {
    let map: Map<String, Value> = match serde_json::from_str(body) {
        Ok(map) => map,
        Err(_) if !status.is_success() => {
            return Err(Error::Api {
                message: format!("HTTP {status}"),
            });
        }
        Err(e) => {
            let preview: String = body.chars().take(200).collect();
            return Err(Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.to_owned(),
            });
        }
    };

    if map.get("error").and_then(Value::as_bool).unwrap_or(false) {
        let message = map
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Request failed")
            .to_owned();
        return Err(Error::Api { message });
    }
    Ok(Envelope(map))
}

// ── AccessClient ─────────────────────────────────────────────────────

/// Client for the De.Dot REST API. Cheap to clone; clones share the token.
#[derive(Clone)]
pub struct AccessClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    base_url: Url,
    version: u32,
    autorefresh: bool,
    remote_origin: Option<String>,
    credentials: Option<Credentials>,
    token: RwLock<Option<SecretString>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self
            .refresh_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl AccessClient {
    pub fn new(options: &AccessOptions) -> Result<Self, Error> {
        if options.version == 0 {
            return Err(Error::Config("API version must be at least 1".into()));
        }
        let base_url = match &options.base_url {
            Some(url) => url.clone(),
            None => Url::parse(options.env.api_url())?,
        };
        let http = TransportConfig::default()
            .with_timeout(options.timeout)
            .build_client()?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url,
                version: options.version,
                autorefresh: options.autorefresh,
                remote_origin: options.remote_origin.clone(),
                credentials: None,
                token: RwLock::new(None),
                refresh_task: Mutex::new(None),
            }),
        })
    }

    /// Client able to issue and rotate its own tokens.
    pub fn with_credentials(options: &AccessOptions, credentials: Credentials) -> Result<Self, Error> {
        credentials.validate()?;
        let mut client = Self::new(options)?;
        // Freshly built, so the Arc is unique.
        if let Some(inner) = Arc::get_mut(&mut client.inner) {
            inner.credentials = Some(credentials);
        }
        Ok(client)
    }

    /// Client using a token issued elsewhere.
    pub fn with_token(options: &AccessOptions, token: SecretString) -> Result<Self, Error> {
        if token.expose_secret().is_empty() {
            return Err(Error::Config("undefined access token".into()));
        }
        let client = Self::new(options)?;
        client.set_token(token);
        Ok(client)
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn token(&self) -> Option<SecretString> {
        self.inner
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_token(&self, token: SecretString) {
        *self
            .inner
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }

    /// Stop automatic token rotation.
    pub fn shutdown(&self) {
        if let Some(task) = self
            .inner
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    // ── URL & request helpers ────────────────────────────────────────

    /// `{base}/v{version}/{path}` with any leading slash on `path` dropped.
    pub(crate) fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.inner.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/v{}/{path}", self.inner.version))?)
    }

    /// Send a request and unwrap the response envelope.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<Envelope, Error> {
        let url = self.url(path)?;
        debug!("{method} {url}");

        let mut builder = self
            .inner
            .http
            .request(method, url)
            .header("x-user-agent", format!("De.remote/{}.0", self.inner.version));

        if let Some(origin) = &self.inner.remote_origin {
            builder = builder.header("origin", origin);
        }
        if let Some(token) = self.token() {
            builder = builder.bearer_auth(token.expose_secret());
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(Error::Transport)?;
        let status = resp.status();
        let text = resp.text().await.map_err(Error::Transport)?;
        decode_envelope(status, &text)
    }

    /// Fail fast when no token is held.
    pub(crate) fn require_token(&self) -> Result<(), Error> {
        if self.has_token() {
            Ok(())
        } else {
            Err(Error::AuthenticationRequired)
        }
    }

    // ── Tokens ───────────────────────────────────────────────────────

    /// Issue a new access token from the application credentials.
    pub async fn get_token(&self) -> Result<SecretString, Error> {
        let token = self.fetch_token().await?;
        self.arm_refresh();
        Ok(token)
    }

    /// Rotate the current token, falling back to a fresh issue on failure.
    pub async fn refresh_token(&self) -> Result<SecretString, Error> {
        if !self.has_token() {
            return Err(Error::AuthenticationRequired);
        }
        let token = self.rotate().await?;
        self.arm_refresh();
        Ok(token)
    }

    fn credentials(&self) -> Result<&Credentials, Error> {
        self.inner
            .credentials
            .as_ref()
            .ok_or_else(|| Error::Config("application credentials are required to issue tokens".into()))
    }

    async fn fetch_token(&self) -> Result<SecretString, Error> {
        let creds = self.credentials()?;
        let body = json!({
            "workspace": creds.workspace,
            "id": creds.app_id,
            "secret": creds.app_secret.expose_secret(),
        });
        let mut envelope = self.send(Method::POST, "access/token", Some(&body), &[]).await?;
        let token = SecretString::from(envelope.take::<String>("token")?);
        self.set_token(token.clone());
        debug!("access token issued");
        Ok(token)
    }

    async fn renew(&self) -> Result<SecretString, Error> {
        let creds = self.credentials()?;
        let body = json!({ "secret": creds.app_secret.expose_secret() });
        let mut envelope = self.send(Method::PATCH, "access/refresh", Some(&body), &[]).await?;
        let token = SecretString::from(envelope.take::<String>("token")?);
        self.set_token(token.clone());
        debug!("access token refreshed");
        Ok(token)
    }

    async fn rotate(&self) -> Result<SecretString, Error> {
        match self.renew().await {
            Ok(token) => Ok(token),
            Err(e) => {
                warn!(error = %e, "Refresh access token failed, requesting a new one");
                self.fetch_token().await
            }
        }
    }

    /// (Re)start the rotation timer when auto-refresh is on.
    fn arm_refresh(&self) {
        if !self.inner.autorefresh {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(REFRESH_INTERVAL).await;
                let Some(inner) = weak.upgrade() else { break };
                let client = AccessClient { inner };
                if let Err(e) = client.rotate().await {
                    warn!(error = %e, "Automatic token rotation failed");
                }
            }
        });

        let previous = self
            .inner
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl std::fmt::Debug for AccessClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("version", &self.inner.version)
            .field("has_token", &self.has_token())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client() -> AccessClient {
        let options = AccessOptions {
            base_url: Some(Url::parse("http://127.0.0.1:9/").unwrap()),
            version: 2,
            ..AccessOptions::default()
        };
        AccessClient::new(&options).unwrap()
    }

    #[test]
    fn environment_picks_api_root() {
        assert_eq!(Environment::Prod.api_url(), "https://api.delidev.com");
        assert_eq!(Environment::Dev.api_url(), "http://api.delidev.io:24800");
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Prod);
    }

    #[test]
    fn url_is_versioned_and_slash_tolerant() {
        let c = client();
        assert_eq!(c.url("/access/token").unwrap().as_str(), "http://127.0.0.1:9/v2/access/token");
        assert_eq!(c.url("order/waypoints/3").unwrap().path(), "/v2/order/waypoints/3");
    }

    #[test]
    fn envelope_error_flag_maps_to_api_error() {
        let err = decode_envelope(
            reqwest::StatusCode::OK,
            r#"{"error":true,"message":"Invalid workspace"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Api { ref message } if message == "Invalid workspace"));
    }

    #[test]
    fn envelope_take_decodes_fields() {
        let mut env = decode_envelope(
            reqwest::StatusCode::OK,
            r#"{"error":false,"token":"abc","count":3}"#,
        )
        .unwrap();
        assert_eq!(env.take::<String>("token").unwrap(), "abc");
        assert_eq!(env.take::<u32>("count").unwrap(), 3);
        assert_eq!(env.take::<Option<String>>("missing").unwrap(), None);
    }

    #[test]
    fn non_json_error_status_is_api_error() {
        let err = decode_envelope(reqwest::StatusCode::BAD_GATEWAY, "<html>").unwrap_err();
        assert!(matches!(err, Error::Api { .. }));
    }

    #[test]
    fn empty_credentials_fail_fast() {
        let creds = Credentials {
            workspace: String::new(),
            app_id: "app".into(),
            app_secret: SecretString::from("s3cret".to_owned()),
        };
        let err = AccessClient::with_credentials(&AccessOptions::default(), creds).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn empty_token_fails_fast() {
        let err = AccessClient::with_token(&AccessOptions::default(), SecretString::from(String::new()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
