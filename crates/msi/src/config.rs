//! CLI-aware wrappers over `msi-config`: profile selection plus the
//! global flag overrides.

use secrecy::SecretString;

use msi_api::{AccessOptions, Credentials};
use msi_config::{Config, Defaults, Profile};
use msi_core::GatewayOptions;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The profile the command runs against, with flags applied.
pub struct Resolved {
    pub name: String,
    pub profile: Profile,
    pub defaults: Defaults,
}

pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let cfg: Config = msi_config::load_config()?;
    let (name, mut profile) = msi_config::select_profile(&cfg, global.profile.as_deref())?;

    if let Some(env) = global.env {
        profile.env = Some(env.into());
    }
    if global.widget_url.is_some() {
        profile.widget_url.clone_from(&global.widget_url);
    }
    if global.api_url.is_some() {
        profile.api_url.clone_from(&global.api_url);
    }

    tracing::debug!(profile = %name, "resolved profile");
    Ok(Resolved {
        name,
        profile,
        defaults: cfg.defaults,
    })
}

impl Resolved {
    pub fn gateway_options(&self, global: &GlobalOpts) -> Result<GatewayOptions, CliError> {
        let mut profile = self.profile.clone();
        if global.access_token.is_some() {
            profile.access_token.clone_from(&global.access_token);
        }
        let mut options = msi_config::profile_to_gateway_options(&profile, &self.name, &self.defaults)?;
        // A flag token beats every stored one.
        if let Some(token) = &global.access_token {
            options.access_token = SecretString::from(token.clone());
        }
        Ok(options)
    }

    pub fn access_options(&self) -> Result<AccessOptions, CliError> {
        Ok(msi_config::profile_to_access_options(&self.profile, &self.defaults)?)
    }

    pub fn credentials(&self) -> Result<Credentials, CliError> {
        Ok(msi_config::resolve_credentials(&self.profile, &self.name)?)
    }

    /// Bearer token for REST calls: the flag, else the profile's access token.
    pub fn bearer(&self, global: &GlobalOpts) -> Result<SecretString, CliError> {
        if let Some(token) = &global.access_token {
            return Ok(SecretString::from(token.clone()));
        }
        Ok(msi_config::resolve_access_token(&self.profile, &self.name)?)
    }
}
