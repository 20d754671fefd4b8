use thiserror::Error;

/// Top-level error type for the `msi-api` crate.
///
/// Covers every failure mode of the wire layer: the cross-boundary message
/// channel, the WebSocket port, and the REST collaborators.
/// `msi-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Configuration ───────────────────────────────────────────────
    /// A required option was missing or empty. Raised before any I/O.
    #[error("Invalid configuration: {0}")]
    Config(String),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// An acknowledgement did not arrive within the fixed window.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Channel ─────────────────────────────────────────────────────
    /// The channel has no established transport (not connected yet, or reset).
    #[error("Channel is not connected")]
    NotConnected,

    /// The acknowledgement was dropped because the channel was torn down.
    #[error("Channel was reset before the acknowledgement arrived")]
    ChannelReset,

    /// The remote side populated the acknowledgement's error slot.
    #[error("{0}")]
    Remote(String),

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // ── REST ────────────────────────────────────────────────────────
    /// The REST envelope carried `error: true`.
    #[error("{message}")]
    Api { message: String },

    /// A REST call that needs an access token was attempted without one.
    #[error("Authentication required")]
    AuthenticationRequired,

    /// A request argument failed local validation.
    #[error("{0}")]
    InvalidArgument(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) | Self::ChannelReset => true,
            _ => false,
        }
    }

    /// Returns `true` if the remote side (widget or API) reported the failure.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_) | Self::Api { .. })
    }
}
