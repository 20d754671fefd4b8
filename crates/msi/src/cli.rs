//! Clap derive structures for the `msi` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// msi -- drive the De.MSI map gateway from the command line
#[derive(Debug, Parser)]
#[command(
    name = "msi",
    version,
    about = "Probe, authenticate against, and query the De.MSI map gateway",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Workspace profile to use
    #[arg(long, short = 'p', env = "MSI_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Target environment (overrides profile)
    #[arg(long, env = "MSI_ENV", global = true)]
    pub env: Option<EnvArg>,

    /// Widget root URL (overrides profile)
    #[arg(long, env = "MSI_WIDGET_URL", global = true)]
    pub widget_url: Option<String>,

    /// REST API root URL (overrides profile)
    #[arg(long, env = "MSI_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Widget access token (overrides profile)
    #[arg(long, env = "MSI_ACCESS_TOKEN", global = true, hide_env = true)]
    pub access_token: Option<String>,

    /// Output format
    #[arg(long, short = 'o', env = "MSI_OUTPUT", default_value = "json", global = true)]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EnvArg {
    Dev,
    Prod,
}

impl From<EnvArg> for msi_core::Environment {
    fn from(env: EnvArg) -> Self {
        match env {
            EnvArg::Dev => Self::Dev,
            EnvArg::Prod => Self::Prod,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check that the widget root is reachable
    Probe,

    /// Request an access token with the profile's app credentials
    Token,

    /// List a client's orders
    Orders(OrdersArgs),

    /// Bind the widget and print the current location
    Locate(LocateArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct OrdersArgs {
    #[command(subcommand)]
    pub command: OrdersCommand,

    /// Client id the orders belong to
    #[arg(long, global = true)]
    pub client: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum OrdersCommand {
    /// Orders still in progress
    Active,
    /// Completed and cancelled orders
    History,
}

#[derive(Debug, Args)]
pub struct LocateArgs {
    /// Also pin the location on the map
    #[arg(long)]
    pub pin: bool,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    pub shell: clap_complete::Shell,
}
