//! Collect rank list pages.

use super::context::Harvest;
use crate::jobs::run_rank_collection;
use crate::period::{RankPeriod, DATE_CODE_FORMAT};
use anyhow::Result;
use chrono::{Duration, Local};

/// Yesterday in local time, the newest day the provider has ranked.
pub fn default_date_code() -> String {
    (Local::now().date_naive() - Duration::days(1))
        .format(DATE_CODE_FORMAT)
        .to_string()
}

pub async fn run(
    harvest: &Harvest,
    period: RankPeriod,
    date_code: Option<String>,
    pages: Option<u32>,
    page_size: Option<u32>,
) -> Result<()> {
    let date_code = date_code.unwrap_or_else(default_date_code);
    let pages = pages.unwrap_or(harvest.config.rank.pages);
    let page_size = page_size.unwrap_or(harvest.config.rank.page_size);
    let fetcher = harvest.http_fetcher()?;

    let report = run_rank_collection(
        &fetcher,
        &harvest.records,
        &mut harvest.scheduler(),
        period,
        &date_code,
        pages,
        page_size,
    )
    .await;
    super::print_report(&report)
}
