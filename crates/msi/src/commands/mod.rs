//! Command dispatch: bridges CLI args -> SDK calls -> output formatting.

pub mod locate;
pub mod orders;
pub mod probe;
pub mod token;

use crate::cli::{Command, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;

/// Dispatch a profile-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, resolved: &Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Probe => probe::handle(resolved, global).await,
        Command::Token => token::handle(resolved, global).await,
        Command::Orders(args) => orders::handle(args, resolved, global).await,
        Command::Locate(args) => locate::handle(args, resolved, global).await,
        Command::Completions(_) => Err(CliError::Internal(
            "completions are generated before dispatch".into(),
        )),
    }
}
