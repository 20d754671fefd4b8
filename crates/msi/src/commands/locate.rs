use msi_core::{CoreError, GatewayHost, PluginRegistry, WebSocketConnector};

use crate::cli::{GlobalOpts, LocateArgs};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: LocateArgs, resolved: &Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    let options = resolved.gateway_options(global)?;
    let connector = WebSocketConnector::new();
    let host = GatewayHost::new(options, connector.clone(), PluginRegistry::new())?;

    let located = locate(&host, args.pin).await;
    host.close();
    connector.shutdown();

    let location = located?.ok_or(CoreError::LocationUnavailable)?;
    output::print(&location, global.output)
}

async fn locate(
    host: &GatewayHost<WebSocketConnector>,
    pin: bool,
) -> Result<Option<msi_core::GpsLocation>, CoreError> {
    host.load().await?;
    let controls = host.controls()?;
    if pin {
        controls.pin_current_location().await
    } else {
        controls.get_current_location().await
    }
}
