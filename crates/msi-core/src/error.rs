// ── Core error types ──
//
// User-facing errors from msi-core. Wire details (frame parsing, HTTP
// status codes) stay in msi-api; the `From<msi_api::Error>` impl maps
// them onto these variants.

use std::time::Duration;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Remote call errors ───────────────────────────────────────────
    /// No acknowledgement within the fixed window. Any late answer is ignored.
    #[error("{operation} timeout after {}s", .timeout.as_secs())]
    Timeout { operation: String, timeout: Duration },

    /// The widget answered with an error; `reason` is passed through verbatim.
    #[error("{reason}")]
    Remote { reason: String },

    /// No bound channel yet, or the channel was torn down mid-call.
    #[error("Gateway is not ready")]
    NotReady,

    // ── Feed errors ──────────────────────────────────────────────────
    #[error("Unable to get current location")]
    LocationUnavailable,

    #[error("Invalid Data")]
    InvalidData,

    // ── Host errors ──────────────────────────────────────────────────
    #[error("Plugin not found: {name}")]
    PluginNotFound { name: String },

    #[error("Internet network problem")]
    NetworkUnavailable,

    // ── REST errors (wrapped, not exposed raw) ───────────────────────
    #[error("API error: {message}")]
    Api { message: String },

    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn timeout(operation: &str, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.to_owned(),
            timeout,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<msi_api::Error> for CoreError {
    fn from(err: msi_api::Error) -> Self {
        match err {
            msi_api::Error::Config(message) | msi_api::Error::InvalidArgument(message) => {
                CoreError::Config { message }
            }
            msi_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            msi_api::Error::Timeout { timeout_ms } => CoreError::Timeout {
                operation: "Request".into(),
                timeout: Duration::from_millis(timeout_ms),
            },
            msi_api::Error::NotConnected | msi_api::Error::ChannelReset => CoreError::NotReady,
            msi_api::Error::Remote(reason) => CoreError::Remote { reason },
            msi_api::Error::Transport(ref e) if e.is_connect() || e.is_timeout() => {
                CoreError::NetworkUnavailable
            }
            msi_api::Error::Transport(e) => CoreError::ConnectionFailed {
                reason: e.to_string(),
            },
            msi_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed { reason },
            msi_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                reason: format!("socket closed ({code}): {reason}"),
            },
            msi_api::Error::Api { message } => CoreError::Api { message },
            msi_api::Error::AuthenticationRequired => CoreError::Api {
                message: "Authentication required".into(),
            },
            msi_api::Error::Deserialization { message, .. } => {
                CoreError::Internal(format!("Deserialization: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_reason_is_verbatim() {
        let err = CoreError::from(msi_api::Error::Remote("Route not found".into()));
        assert_eq!(err.to_string(), "Route not found");
    }

    #[test]
    fn reset_channel_reads_as_not_ready() {
        assert!(matches!(
            CoreError::from(msi_api::Error::ChannelReset),
            CoreError::NotReady
        ));
    }

    #[test]
    fn timeout_names_the_operation() {
        let err = CoreError::timeout("Add entity", Duration::from_secs(8));
        assert_eq!(err.to_string(), "Add entity timeout after 8s");
        assert!(err.is_timeout());
    }
}
