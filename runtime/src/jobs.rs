//! Acquisition passes: rank pages, first-time detail collection and repair of
//! partially collected videos. Every attempt, successful or not, ends up as
//! a source record.

use crate::fetcher::{DetailKind, FetchError, Fetcher};
use crate::period::{RankPeriod, DATE_CODE_FORMAT};
use crate::scheduler::{AcquisitionScheduler, CycleReport};
use crate::store::dimensions::{DetailTarget, DimensionStore};
use crate::store::records::{IngestionStore, NewRecord, RequestSnapshot};
use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

/// Limits for the detail passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub window_hours: i64,
    pub limit: usize,
    pub first_collection_limit: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            limit: 50,
            first_collection_limit: 80,
        }
    }
}

fn detail_types() -> [&'static str; 2] {
    DetailKind::ALL.map(DetailKind::data_type)
}

fn date_code_of(target: &DetailTarget) -> String {
    target
        .pub_time
        .map(|t| t.format(DATE_CODE_FORMAT).to_string())
        .unwrap_or_default()
}

/// Fetch `pages` pages of one rank list and store each as a source record.
pub async fn run_rank_collection<R: Rng>(
    fetcher: &dyn Fetcher,
    records: &IngestionStore,
    scheduler: &mut AcquisitionScheduler<R>,
    period: RankPeriod,
    date_code: &str,
    pages: u32,
    page_size: u32,
) -> CycleReport {
    let page_indexes: Vec<u32> = (1..=pages).collect();
    scheduler
        .run_cycle(page_indexes, |page| async move {
            let data_type = period.data_type();
            match fetcher.fetch_video_rank(period, date_code, page, page_size).await {
                Ok(out) => {
                    let id = records.save(&NewRecord::fetched(
                        data_type, date_code, date_code, out.raw, out.request,
                    ))?;
                    info!("stored {data_type} {date_code} page {page} as record {id}");
                    Ok(())
                }
                Err(e) => {
                    record_failure(records, data_type, date_code, date_code, &e)?;
                    Err(anyhow::Error::new(e).context(format!("{data_type} {date_code} page {page}")))
                }
            }
        })
        .await
}

/// Fetch the summary endpoint directly for each video id.
pub async fn run_summary_collection<R: Rng>(
    fetcher: &dyn Fetcher,
    records: &IngestionStore,
    scheduler: &mut AcquisitionScheduler<R>,
    aweme_ids: Vec<String>,
    date_code: &str,
) -> CycleReport {
    let data_type = DetailKind::Summary.data_type();
    scheduler
        .run_cycle(aweme_ids, |aweme_id| async move {
            match fetcher.fetch_video_summary(&aweme_id, date_code).await {
                Ok(out) => {
                    let id = records.save(&NewRecord::fetched(
                        data_type, &aweme_id, date_code, out.raw, out.request,
                    ))?;
                    info!("stored {data_type} {aweme_id} as record {id}");
                    Ok(())
                }
                Err(e) => {
                    record_failure(records, data_type, &aweme_id, date_code, &e)?;
                    Err(anyhow::Error::new(e).context(format!("{data_type} {aweme_id}")))
                }
            }
        })
        .await
}

/// Capture both detail kinds for videos never attempted before, newest
/// publish time first.
pub async fn run_first_collection<R: Rng>(
    fetcher: &dyn Fetcher,
    records: &IngestionStore,
    dimensions: &DimensionStore,
    scheduler: &mut AcquisitionScheduler<R>,
    limit: usize,
) -> Result<CycleReport> {
    let attempted: HashSet<String> = records
        .list_all_collected_entity_ids(&detail_types())?
        .into_iter()
        .collect();
    let targets: Vec<DetailTarget> = dimensions
        .list_detail_targets()?
        .into_iter()
        .filter(|t| !attempted.contains(&t.aweme_id))
        .take(limit)
        .collect();
    info!("first collection: {} video(s) pending", targets.len());

    Ok(scheduler
        .run_cycle(targets, |target| async move {
            collect_details(fetcher, records, &target, &DetailKind::ALL).await
        })
        .await)
}

/// Re-capture the missing kind for videos that got only one of summary and
/// trend within the window.
pub async fn run_repair<R: Rng>(
    fetcher: &dyn Fetcher,
    records: &IngestionStore,
    dimensions: &DimensionStore,
    scheduler: &mut AcquisitionScheduler<R>,
    window: chrono::Duration,
    limit: usize,
) -> Result<CycleReport> {
    let types = detail_types();
    let since = chrono::Utc::now() - window;
    let mut work = Vec::new();
    for aweme_id in records.find_partially_collected(window, &types)? {
        if work.len() >= limit {
            break;
        }
        let have = records.collected_types_since(&aweme_id, since, &types)?;
        let missing: Vec<DetailKind> = DetailKind::ALL
            .into_iter()
            .filter(|k| !have.iter().any(|t| t == k.data_type()))
            .collect();
        match dimensions.detail_target(&aweme_id)? {
            Some(target) if !missing.is_empty() => work.push((target, missing)),
            Some(_) => {}
            None => warn!("repair: video {aweme_id} has no detail url, skipping"),
        }
    }
    info!("repair: {} video(s) partially collected", work.len());

    Ok(scheduler
        .run_cycle(work, |(target, missing)| async move {
            collect_details(fetcher, records, &target, &missing).await
        })
        .await)
}

/// Capture `kinds` for one video and store one record per kind. Kinds the
/// capture did not deliver are stored as failed fetches.
pub async fn collect_details(
    fetcher: &dyn Fetcher,
    records: &IngestionStore,
    target: &DetailTarget,
    kinds: &[DetailKind],
) -> Result<()> {
    let date_code = date_code_of(target);
    let id = target.aweme_id.as_str();

    let capture = match fetcher.capture_video_details(target, kinds).await {
        Ok(capture) => capture,
        Err(e) => {
            for kind in kinds {
                record_failure(records, kind.data_type(), id, &date_code, &e)?;
            }
            return Err(anyhow::Error::new(e).context(format!("video {id}")));
        }
    };

    let mut missing = Vec::new();
    for kind in kinds {
        let record = match capture.bodies.get(kind) {
            Some(body) => NewRecord::fetched(
                kind.data_type(),
                id,
                &date_code,
                body.as_str(),
                capture.request.clone(),
            ),
            None => {
                missing.push(kind.label());
                let reason = capture
                    .incomplete
                    .clone()
                    .unwrap_or_else(|| "response not captured".to_string());
                NewRecord::failed(kind.data_type(), id, &date_code, reason, capture.request.clone())
            }
        };
        records.save(&record)?;
    }

    if missing.is_empty() {
        info!("video {id}: captured {} detail payload(s)", kinds.len());
        Ok(())
    } else {
        anyhow::bail!("video {id}: missing {}", missing.join(", "))
    }
}

fn record_failure(
    records: &IngestionStore,
    data_type: &str,
    entity_id: &str,
    date_code: &str,
    error: &FetchError,
) -> Result<()> {
    let request = error.request().cloned().unwrap_or_default();
    records.save(&NewRecord::failed(
        data_type,
        entity_id,
        date_code,
        error.to_string(),
        request,
    ))?;
    Ok(())
}
