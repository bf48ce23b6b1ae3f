//! Run the processors over unprocessed records.

use crate::config::HarvestConfig;
use crate::etl::{BatchSummary, EtlRunner};
use crate::store::Database;
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

fn runner(config: &HarvestConfig) -> Result<EtlRunner> {
    let db = Arc::new(Database::open(&config.database_path)?);
    Ok(EtlRunner::new(db, config.filter, config.etl.clone()))
}

pub fn run_type(config: &HarvestConfig, data_type: &str) -> Result<()> {
    let summary = runner(config)?.run_for_type(data_type)?;
    super::print_report(&summary)
}

/// Rank types first so dimensions exist before summaries and trends.
pub fn run_all(config: &HarvestConfig) -> Result<()> {
    let summaries: BTreeMap<&str, BatchSummary> = runner(config)?.run_all()?.into_iter().collect();
    super::print_report(&summaries)
}
