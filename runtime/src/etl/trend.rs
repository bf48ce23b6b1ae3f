//! Daily trend curves.
//!
//! The filter needs both the creator's followers and the video's likes, and
//! likes come from the sibling summary record. A trend whose summary has not
//! been collected yet is filtered rather than guessed at.

use super::envelope::{lenient_f64, lenient_i64, lenient_string, Envelope};
use super::filter::FilterThresholds;
use super::summary::SummaryData;
use super::{Disposition, ProcessError, Processor};
use crate::fetcher::{VIDEO_SUMMARY, VIDEO_TREND};
use crate::store::dimensions::{bump_trend_watermark, DimensionStore};
use crate::store::facts::{dedupe_trend_facts, replace_trend_facts, TrendFact};
use crate::store::records::{IngestionStore, SourceRecord};
use crate::store::Database;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct TrendItem {
    #[serde(deserialize_with = "lenient_i64")]
    date_code: i64,
    #[serde(deserialize_with = "lenient_i64")]
    like_count: i64,
    #[serde(deserialize_with = "lenient_string")]
    like_count_str: String,
    #[serde(deserialize_with = "lenient_i64")]
    share_count: i64,
    #[serde(deserialize_with = "lenient_string")]
    share_count_str: String,
    #[serde(deserialize_with = "lenient_i64")]
    comment_count: i64,
    #[serde(deserialize_with = "lenient_string")]
    comment_count_str: String,
    #[serde(deserialize_with = "lenient_i64")]
    collect_count: i64,
    #[serde(deserialize_with = "lenient_string")]
    collect_count_str: String,
    #[serde(deserialize_with = "lenient_f64")]
    interaction_rate: f64,
    #[serde(deserialize_with = "lenient_string")]
    interaction_rate_str: String,
    #[serde(deserialize_with = "lenient_f64")]
    sales_gmv: f64,
    #[serde(deserialize_with = "lenient_string")]
    sales_gmv_str: String,
    #[serde(deserialize_with = "lenient_i64")]
    sales_count: i64,
    #[serde(deserialize_with = "lenient_string")]
    sales_count_str: String,
    #[serde(deserialize_with = "lenient_i64")]
    fans: i64,
    #[serde(deserialize_with = "lenient_string")]
    fans_str: String,
    #[serde(rename = "GPM", deserialize_with = "lenient_f64")]
    gpm: f64,
    #[serde(rename = "GPMStr", deserialize_with = "lenient_string")]
    gpm_str: String,
    #[serde(deserialize_with = "lenient_i64")]
    inc_like_count: i64,
    #[serde(deserialize_with = "lenient_i64")]
    inc_share_count: i64,
    #[serde(deserialize_with = "lenient_i64")]
    inc_comment_count: i64,
    #[serde(deserialize_with = "lenient_i64")]
    inc_collect_count: i64,
    #[serde(deserialize_with = "lenient_i64")]
    inc_sales_count: i64,
    #[serde(deserialize_with = "lenient_f64")]
    inc_sales_gmv: f64,
    #[serde(deserialize_with = "lenient_i64")]
    inc_fans: i64,
    #[serde(deserialize_with = "lenient_string")]
    list_time_str: String,
    #[serde(deserialize_with = "lenient_i64")]
    time_stamp: i64,
}

impl TrendItem {
    fn into_fact(self, aweme_id: &str) -> TrendFact {
        TrendFact {
            aweme_id: aweme_id.to_string(),
            date_code: self.date_code,
            like_count: self.like_count,
            like_count_str: self.like_count_str,
            share_count: self.share_count,
            share_count_str: self.share_count_str,
            comment_count: self.comment_count,
            comment_count_str: self.comment_count_str,
            collect_count: self.collect_count,
            collect_count_str: self.collect_count_str,
            interaction_rate: self.interaction_rate,
            interaction_rate_str: self.interaction_rate_str,
            sales_count: self.sales_count,
            sales_count_str: self.sales_count_str,
            sales_gmv: self.sales_gmv,
            sales_gmv_str: self.sales_gmv_str,
            fans: self.fans,
            fans_str: self.fans_str,
            gpm: self.gpm,
            gpm_str: self.gpm_str,
            inc_like_count: self.inc_like_count,
            inc_share_count: self.inc_share_count,
            inc_comment_count: self.inc_comment_count,
            inc_collect_count: self.inc_collect_count,
            inc_sales_count: self.inc_sales_count,
            inc_sales_gmv: self.inc_sales_gmv,
            inc_fans: self.inc_fans,
            list_time_str: self.list_time_str,
            time_stamp: self.time_stamp,
        }
    }
}

pub struct TrendProcessor {
    db: Arc<Database>,
    records: IngestionStore,
    dimensions: DimensionStore,
    thresholds: FilterThresholds,
}

impl TrendProcessor {
    pub fn new(db: Arc<Database>, thresholds: FilterThresholds) -> Self {
        Self {
            records: IngestionStore::new(Arc::clone(&db)),
            dimensions: DimensionStore::new(Arc::clone(&db)),
            db,
            thresholds,
        }
    }

    /// Likes from the newest summary record, if one was collected.
    fn summary_likes(&self, aweme_id: &str) -> Result<Option<i64>, ProcessError> {
        let Some(summary) = self.records.find_latest(VIDEO_SUMMARY, aweme_id)? else {
            return Ok(None);
        };
        let unreadable = |reason: String| {
            ProcessError::MissingPrerequisite(format!(
                "summary record {} unreadable: {reason}",
                summary.id
            ))
        };
        let envelope = Envelope::parse(&summary.raw_content).map_err(|e| unreadable(e.to_string()))?;
        envelope.check().map_err(|e| unreadable(e.to_string()))?;
        let data = envelope
            .payload_as::<SummaryData>()
            .map_err(|e| unreadable(e.to_string()))?
            .ok_or_else(|| unreadable("data is null".to_string()))?;
        Ok(Some(data.likes()))
    }
}

impl Processor for TrendProcessor {
    fn data_types(&self) -> &[&'static str] {
        &[VIDEO_TREND]
    }

    fn process(&self, record: &SourceRecord) -> Result<Disposition, ProcessError> {
        let envelope = Envelope::parse(&record.raw_content)?;
        envelope.check()?;

        let aweme_id = record.entity_id.as_str();
        let video = self
            .dimensions
            .get_video(aweme_id)?
            .ok_or_else(|| ProcessError::MissingPrerequisite(format!("video {aweme_id}")))?;
        let blogger = self.dimensions.get_blogger(video.blogger_id)?.ok_or_else(|| {
            ProcessError::MissingPrerequisite(format!(
                "blogger {} of video {aweme_id}",
                video.blogger_id
            ))
        })?;
        let Some(likes) = self.summary_likes(aweme_id)? else {
            return Ok(Disposition::Filtered {
                reason: "summary not collected".to_string(),
            });
        };
        if self.thresholds.suppresses(likes, blogger.fans_num) {
            return Ok(Disposition::Filtered {
                reason: self.thresholds.reason(likes, blogger.fans_num),
            });
        }

        let items: Vec<TrendItem> = envelope.payload_as()?.unwrap_or_default();
        let facts = dedupe_trend_facts(
            items
                .into_iter()
                .map(|item| item.into_fact(aweme_id))
                .collect(),
        );

        let now = Utc::now();
        let written = self.db.transaction(|tx| {
            let written = replace_trend_facts(tx, &facts, now)?;
            bump_trend_watermark(tx, aweme_id, now)?;
            Ok(written)
        })?;

        Ok(Disposition::Processed {
            note: Some(format!("{written} trend point(s)")),
        })
    }
}
