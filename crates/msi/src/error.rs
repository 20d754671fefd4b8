//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError`, wire and config errors into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use msi_config::ConfigError;
use msi_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the gateway at {url}")]
    #[diagnostic(
        code(msi::unreachable),
        help(
            "Check your network connection and the widget URL.\n\
             Try: msi probe --widget-url {url}"
        )
    )]
    Unreachable { url: String },

    #[error("Connection failed: {reason}")]
    #[diagnostic(code(msi::connection_failed))]
    ConnectionFailed { reason: String },

    #[error("Gateway is not ready")]
    #[diagnostic(
        code(msi::not_ready),
        help("The widget channel closed before the call completed. Run the command again.")
    )]
    NotReady,

    // ── Authentication ───────────────────────────────────────────────

    #[error("No {what} configured for profile '{profile}'")]
    #[diagnostic(
        code(msi::no_credentials),
        help(
            "Set it in the profile, store it in the system keyring under service 'msi',\n\
             or point the profile's *_env field at an environment variable."
        )
    )]
    NoCredentials { what: String, profile: String },

    #[error("Authentication failed: {message}")]
    #[diagnostic(code(msi::auth_failed), help("Verify the workspace, app id and app secret."))]
    AuthFailed { message: String },

    // ── Remote ───────────────────────────────────────────────────────

    #[error("API error: {message}")]
    #[diagnostic(code(msi::api_error))]
    Api { message: String },

    #[error("Widget error: {reason}")]
    #[diagnostic(code(msi::remote))]
    Remote { reason: String },

    #[error("{operation} timed out after {seconds}s")]
    #[diagnostic(
        code(msi::timeout),
        help("Increase rpc_timeout in your profile or check the gateway's responsiveness.")
    )]
    Timeout { operation: String, seconds: u64 },

    // ── Validation / configuration ───────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(msi::validation))]
    Validation { field: String, reason: String },

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(code(msi::profile_not_found), help("Expected at: {path}"))]
    ProfileNotFound { name: String, path: String },

    #[error(transparent)]
    #[diagnostic(code(msi::config))]
    Config(ConfigError),

    #[error("{0}")]
    #[diagnostic(code(msi::internal))]
    Internal(String),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(msi::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unreachable { .. } | Self::ConnectionFailed { .. } | Self::NotReady => {
                exit_code::CONNECTION
            }
            Self::NoCredentials { .. } | Self::AuthFailed { .. } => exit_code::AUTH,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ProfileNotFound { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { what, profile } => CliError::NoCredentials {
                what: what.into(),
                profile,
            },
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound {
                name: profile,
                path: msi_config::config_path().display().to_string(),
            },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config { message } => CliError::Validation {
                field: "options".into(),
                reason: message,
            },
            CoreError::Timeout { operation, timeout } => CliError::Timeout {
                operation,
                seconds: timeout.as_secs(),
            },
            CoreError::Remote { reason } => CliError::Remote { reason },
            CoreError::NotReady => CliError::NotReady,
            CoreError::NetworkUnavailable => CliError::Unreachable {
                url: "(gateway)".into(),
            },
            CoreError::ConnectionFailed { reason } => CliError::ConnectionFailed { reason },
            CoreError::Api { message } => CliError::Api { message },
            other @ (CoreError::LocationUnavailable
            | CoreError::InvalidData
            | CoreError::PluginNotFound { .. }
            | CoreError::Internal(_)) => CliError::Internal(other.to_string()),
        }
    }
}

impl From<msi_api::Error> for CliError {
    fn from(err: msi_api::Error) -> Self {
        match err {
            msi_api::Error::AuthenticationRequired => CliError::AuthFailed {
                message: "no access token".into(),
            },
            other => CoreError::from(other).into(),
        }
    }
}
