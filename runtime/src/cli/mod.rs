//! CLI subcommand implementations for the rankharvest binary.

pub mod context;
pub mod details_cmd;
pub mod doctor;
pub mod etl_cmd;
pub mod rank_cmd;

use anyhow::Result;
use serde::Serialize;

/// Print a report as pretty JSON on stdout.
pub fn print_report<T: Serialize>(report: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
