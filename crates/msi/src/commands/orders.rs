use msi_api::{AccessClient, ClientApi};

use crate::cli::{GlobalOpts, OrdersArgs, OrdersCommand};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: OrdersArgs, resolved: &Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    let client_id = args.client.ok_or_else(|| CliError::Validation {
        field: "client".into(),
        reason: "pass the client id with --client".into(),
    })?;

    let access = AccessClient::with_token(&resolved.access_options()?, resolved.bearer(global)?)?;
    let api = ClientApi::new(client_id, access)?;

    let orders = match args.command {
        OrdersCommand::Active => api.active_orders().await?,
        OrdersCommand::History => api.order_history().await?,
    };
    tracing::debug!(count = orders.len(), "fetched orders");
    output::print(&orders, global.output)
}
