use serde_json::json;

use msi_api::transport::{TransportConfig, probe};
use msi_core::config::widget_url;

use crate::cli::GlobalOpts;
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

pub async fn handle(resolved: &Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    let raw = match &resolved.profile.widget_url {
        Some(url) => url.clone(),
        None => widget_url(resolved.profile.environment(&resolved.defaults)).to_owned(),
    };
    let url: url::Url = raw.parse().map_err(|_| CliError::Validation {
        field: "widget_url".into(),
        reason: format!("invalid URL: {raw}"),
    })?;

    let client = TransportConfig::default()
        .with_timeout(std::time::Duration::from_secs(resolved.defaults.timeout))
        .build_client()?;

    if !probe(&client, &url).await {
        return Err(CliError::Unreachable {
            url: url.to_string(),
        });
    }
    output::print(&json!({ "url": url.as_str(), "reachable": true }), global.output)
}
