//! Shared configuration for the msi tools.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `msi_core::GatewayOptions` and the REST
//! `AccessOptions` / `Credentials`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use msi_api::{AccessOptions, Credentials};
use msi_core::{Environment, GatewayOptions};

const KEYRING_SERVICE: &str = "msi";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("unknown profile '{profile}'")]
    UnknownProfile { profile: String },

    #[error("no {what} configured for profile '{profile}'")]
    NoCredentials { what: &'static str, profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named workspace profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default)]
    pub env: Environment,

    /// Widget call window, seconds.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout: u64,

    /// Periferal entity call window, seconds.
    #[serde(default = "default_entity_timeout")]
    pub entity_timeout: u64,

    /// HTTP timeout for REST calls, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_probe")]
    pub probe: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            env: Environment::default(),
            rpc_timeout: default_rpc_timeout(),
            entity_timeout: default_entity_timeout(),
            timeout: default_timeout(),
            probe: default_probe(),
        }
    }
}

fn default_rpc_timeout() -> u64 {
    12
}
fn default_entity_timeout() -> u64 {
    8
}
fn default_timeout() -> u64 {
    30
}
fn default_probe() -> bool {
    true
}

/// A named workspace profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Overrides `defaults.env`.
    pub env: Option<Environment>,

    /// Widget root override (e.g. a self-hosted gateway).
    pub widget_url: Option<String>,

    /// REST API root override.
    pub api_url: Option<String>,

    /// REST API version.
    pub api_version: Option<u32>,

    /// Origin reported to the widget and the REST API.
    pub origin: Option<String>,

    /// Workspace reference for token requests.
    pub workspace: Option<String>,

    /// Application id for token requests.
    pub app_id: Option<String>,

    /// Application secret (plaintext, prefer keyring or env var).
    pub app_secret: Option<String>,

    /// Environment variable name containing the application secret.
    pub app_secret_env: Option<String>,

    /// Access token for the widget (plaintext, prefer keyring or env var).
    pub access_token: Option<String>,

    /// Environment variable name containing the access token.
    pub access_token_env: Option<String>,

    /// Rotate REST tokens in the background.
    #[serde(default)]
    pub autorefresh: bool,

    /// Plugins mounted after the widget binds.
    #[serde(default)]
    pub plugins: Vec<String>,

    pub rpc_timeout: Option<u64>,
    pub entity_timeout: Option<u64>,
    pub timeout: Option<u64>,
    pub probe: Option<bool>,
}

impl Profile {
    pub fn environment(&self, defaults: &Defaults) -> Environment {
        self.env.unwrap_or(defaults.env)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "dedot", "msi").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("msi");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` (missing is fine) layered under `MSI_*` env vars.
/// Nested keys use a double underscore: `MSI_DEFAULTS__ENV=prod`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MSI_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profile selection ───────────────────────────────────────────────

/// Pick the profile named `requested`, else the configured default.
///
/// An explicitly requested profile must exist. A missing default profile
/// yields an empty one, so env vars alone can drive the tools.
pub fn select_profile(cfg: &Config, requested: Option<&str>) -> Result<(String, Profile), ConfigError> {
    if let Some(name) = requested {
        return cfg
            .profiles
            .get(name)
            .map(|p| (name.to_owned(), p.clone()))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.to_owned(),
            });
    }

    let name = cfg.default_profile.clone().unwrap_or_else(|| "default".into());
    let profile = cfg.profiles.get(&name).cloned().unwrap_or_default();
    Ok((name, profile))
}

// ── Credential resolution ───────────────────────────────────────────

/// Env var named by the profile, then the system keyring, then plaintext.
fn resolve_secret(
    profile_name: &str,
    what: &'static str,
    env_name: Option<&str>,
    plaintext: Option<&str>,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's *_env → env var lookup
    if let Some(env_name) = env_name {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/{what}")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(value) = plaintext {
        return Ok(SecretString::from(value.to_owned()));
    }

    Err(ConfigError::NoCredentials {
        what,
        profile: profile_name.into(),
    })
}

/// Access token for the widget.
pub fn resolve_access_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    resolve_secret(
        profile_name,
        "access-token",
        profile.access_token_env.as_deref(),
        profile.access_token.as_deref(),
    )
}

/// Application credentials for REST token requests.
pub fn resolve_credentials(profile: &Profile, profile_name: &str) -> Result<Credentials, ConfigError> {
    let missing = |what| ConfigError::NoCredentials {
        what,
        profile: profile_name.into(),
    };
    let workspace = profile.workspace.clone().ok_or_else(|| missing("workspace"))?;
    let app_id = profile.app_id.clone().ok_or_else(|| missing("app id"))?;
    let app_secret = resolve_secret(
        profile_name,
        "app-secret",
        profile.app_secret_env.as_deref(),
        profile.app_secret.as_deref(),
    )?;

    Ok(Credentials {
        workspace,
        app_id,
        app_secret,
    })
}

// ── Translation ─────────────────────────────────────────────────────

fn parse_url(field: &str, raw: &str) -> Result<url::Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

/// Build `GatewayOptions` from a profile, falling back to `defaults`.
pub fn profile_to_gateway_options(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<GatewayOptions, ConfigError> {
    let mut options = GatewayOptions::new(resolve_access_token(profile, profile_name)?);
    options.env = profile.environment(defaults);
    options.base_url = profile
        .widget_url
        .as_deref()
        .map(|raw| parse_url("widget_url", raw))
        .transpose()?;
    options.origin.clone_from(&profile.origin);
    options.rpc_timeout = Duration::from_secs(profile.rpc_timeout.unwrap_or(defaults.rpc_timeout));
    options.entity_timeout =
        Duration::from_secs(profile.entity_timeout.unwrap_or(defaults.entity_timeout));
    options.probe = profile.probe.unwrap_or(defaults.probe);
    options.plugins.clone_from(&profile.plugins);

    options.validate().map_err(|e| ConfigError::Validation {
        field: "gateway".into(),
        reason: e.to_string(),
    })?;
    Ok(options)
}

/// Build REST `AccessOptions` from a profile, falling back to `defaults`.
pub fn profile_to_access_options(profile: &Profile, defaults: &Defaults) -> Result<AccessOptions, ConfigError> {
    Ok(AccessOptions {
        env: profile.environment(defaults),
        version: profile.api_version.unwrap_or(1),
        autorefresh: profile.autorefresh,
        remote_origin: profile.origin.clone(),
        base_url: profile
            .api_url
            .as_deref()
            .map(|raw| parse_url("api_url", raw))
            .transpose()?,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
    })
}

// ── Tests ───────────────────────────────────────────────────────────
