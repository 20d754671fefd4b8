//! Output formatting for command results.

use serde::Serialize;

use crate::cli::OutputFormat;
use crate::error::CliError;

/// Print `value` to stdout in the selected format.
pub fn print<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<(), CliError> {
    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::JsonCompact => serde_json::to_string(value)?,
    };
    println!("{text}");
    Ok(())
}
