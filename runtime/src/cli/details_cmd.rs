//! Detail acquisition: first collection, repair and direct summary fetches.

use super::context::{close_browser, Harvest};
use crate::jobs::{run_first_collection, run_repair, run_summary_collection};
use anyhow::Result;

/// Capture summary and trend for videos never attempted before.
pub async fn run_first(harvest: &Harvest, limit: Option<usize>) -> Result<()> {
    let limit = limit.unwrap_or(harvest.config.repair.first_collection_limit);
    let (fetcher, renderer) = harvest.browser_fetcher().await?;
    let result = run_first_collection(
        &fetcher,
        &harvest.records,
        &harvest.dimensions,
        &mut harvest.scheduler(),
        limit,
    )
    .await;
    close_browser(fetcher, renderer).await;
    super::print_report(&result?)
}

/// Re-capture whatever half of a video's details is missing.
pub async fn run_repair_pass(
    harvest: &Harvest,
    window_hours: Option<i64>,
    limit: Option<usize>,
) -> Result<()> {
    let window = chrono::Duration::hours(window_hours.unwrap_or(harvest.config.repair.window_hours));
    let limit = limit.unwrap_or(harvest.config.repair.limit);
    let (fetcher, renderer) = harvest.browser_fetcher().await?;
    let result = run_repair(
        &fetcher,
        &harvest.records,
        &harvest.dimensions,
        &mut harvest.scheduler(),
        window,
        limit,
    )
    .await;
    close_browser(fetcher, renderer).await;
    super::print_report(&result?)
}

/// Fetch summaries over plain HTTP.
pub async fn run_summaries(harvest: &Harvest, aweme_ids: Vec<String>, date_code: String) -> Result<()> {
    let fetcher = harvest.http_fetcher()?;
    let report = run_summary_collection(
        &fetcher,
        &harvest.records,
        &mut harvest.scheduler(),
        aweme_ids,
        &date_code,
    )
    .await;
    super::print_report(&report)
}
