// Shared HTTP transport settings.
//
// The access client, the order/client REST collaborators, and the gateway
// reachability probe all build their reqwest::Client from here.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::Error;

const DEFAULT_USER_AGENT: &str = concat!("msi-sdk/", env!("CARGO_PKG_VERSION"));

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: Vec::new(),
        }
    }
}

impl TransportConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a default header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Config(format!("invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("invalid header value for {name}: {e}")))?;
            headers.insert(name, value);
        }

        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(Error::Transport)
    }
}

/// Reachability check against the gateway base URL.
///
/// Any HTTP response counts as reachable, including error statuses; only a
/// transport failure (DNS, refused, timeout) reports `false`.
pub async fn probe(client: &reqwest::Client, url: &Url) -> bool {
    match client.head(url.clone()).send().await {
        Ok(resp) => {
            tracing::debug!(url = %url, status = %resp.status(), "Gateway reachable");
            true
        }
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Gateway unreachable");
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_header_names() {
        let config = TransportConfig::default().with_header("bad header", "x");
        assert!(matches!(config.build_client(), Err(Error::Config(_))));
    }

    #[test]
    fn default_user_agent_names_the_sdk() {
        assert!(TransportConfig::default().user_agent.starts_with("msi-sdk/"));
    }
}
