use secrecy::ExposeSecret;
use serde_json::json;

use msi_api::AccessClient;

use crate::cli::GlobalOpts;
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

pub async fn handle(resolved: &Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    let mut options = resolved.access_options()?;
    // One-shot: nothing stays alive to use a rotated token.
    options.autorefresh = false;

    let client = AccessClient::with_credentials(&options, resolved.credentials()?)?;
    let token = client.get_token().await?;
    client.shutdown();

    output::print(&json!({ "token": token.expose_secret() }), global.output)
}
