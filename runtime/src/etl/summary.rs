//! Video summary counters.

use super::envelope::{lenient_i64, lenient_string, Envelope};
use super::filter::FilterThresholds;
use super::units::count_or_zero;
use super::{Disposition, ProcessError, Processor};
use crate::fetcher::VIDEO_SUMMARY;
use crate::store::dimensions::{update_video_summary, DimensionStore, VideoSummary};
use crate::store::records::SourceRecord;
use crate::store::Database;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

/// `data` object of the summary endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SummaryData {
    #[serde(deserialize_with = "lenient_string")]
    pub play_count_str: String,
    #[serde(deserialize_with = "lenient_string")]
    pub like_count_str: String,
    #[serde(deserialize_with = "lenient_string")]
    pub comment_count_str: String,
    #[serde(deserialize_with = "lenient_string")]
    pub share_count_str: String,
    #[serde(deserialize_with = "lenient_string")]
    pub collect_count_str: String,
    #[serde(deserialize_with = "lenient_string")]
    pub interaction_rate_str: String,
    #[serde(deserialize_with = "lenient_string")]
    pub score: String,
    #[serde(deserialize_with = "lenient_string")]
    pub like_comment_rate_str: String,
    #[serde(deserialize_with = "lenient_string")]
    pub sales_gmv_str: String,
    #[serde(deserialize_with = "lenient_string")]
    pub sales_count_str: String,
    #[serde(deserialize_with = "lenient_string")]
    pub goods_count_str: String,
    #[serde(rename = "GPM", deserialize_with = "lenient_string")]
    pub gpm: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub aweme_type: i64,
}

impl SummaryData {
    /// Parsed `LikeCountStr`; unreadable counts are zero.
    pub fn likes(&self) -> i64 {
        count_or_zero(&self.like_count_str)
    }

    fn into_summary(self) -> VideoSummary {
        VideoSummary {
            play_count_str: self.play_count_str,
            like_count_str: self.like_count_str,
            comment_count_str: self.comment_count_str,
            share_count_str: self.share_count_str,
            collect_count_str: self.collect_count_str,
            interaction_rate_str: self.interaction_rate_str,
            score_str: self.score,
            like_comment_rate_str: self.like_comment_rate_str,
            sales_gmv_str: self.sales_gmv_str,
            sales_count_str: self.sales_count_str,
            goods_count_str: self.goods_count_str,
            gpm_str: self.gpm,
            aweme_type: self.aweme_type,
        }
    }
}

pub struct SummaryProcessor {
    db: Arc<Database>,
    dimensions: DimensionStore,
    thresholds: FilterThresholds,
}

impl SummaryProcessor {
    pub fn new(db: Arc<Database>, thresholds: FilterThresholds) -> Self {
        Self {
            dimensions: DimensionStore::new(Arc::clone(&db)),
            db,
            thresholds,
        }
    }
}

impl Processor for SummaryProcessor {
    fn data_types(&self) -> &[&'static str] {
        &[VIDEO_SUMMARY]
    }

    fn process(&self, record: &SourceRecord) -> Result<Disposition, ProcessError> {
        let envelope = Envelope::parse(&record.raw_content)?;
        envelope.check()?;
        let Some(data) = envelope.payload_as::<SummaryData>()? else {
            return Ok(Disposition::Processed {
                note: Some("summary data is null".to_string()),
            });
        };

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

        let likes = data.likes();
        if self.thresholds.suppresses(likes, blogger.fans_num) {
            return Ok(Disposition::Filtered {
                reason: self.thresholds.reason(likes, blogger.fans_num),
            });
        }

        let summary = data.into_summary();
        let updated = self
            .db
            .with_conn(|c| update_video_summary(c, aweme_id, &summary, Utc::now()))?;
        if !updated {
            return Err(ProcessError::MissingPrerequisite(format!("video {aweme_id}")));
        }
        Ok(Disposition::processed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::{EtlOptions, EtlRunner};
    use crate::store::dimensions::{upsert_blogger, upsert_video_from_rank, BloggerDimension, CollectionStatus, VideoFromRank};
    use crate::store::records::{IngestionStore, NewRecord, RecordStatus, RequestSnapshot};
    use serde_json::json;

    fn setup(fans: i64) -> (Arc<Database>, IngestionStore, EtlRunner) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.with_conn(|c| {
            upsert_video_from_rank(
                c,
                &VideoFromRank {
                    aweme_id: "7301".to_string(),
                    blogger_id: 1001,
                    ..VideoFromRank::default()
                },
                Utc::now(),
            )?;
            upsert_blogger(
                c,
                &BloggerDimension {
                    blogger_id: 1001,
                    fans_num: fans,
                    ..BloggerDimension::default()
                },
                Utc::now(),
            )
        })
        .unwrap();
        let runner = EtlRunner::new(Arc::clone(&db), FilterThresholds::default(), EtlOptions::default());
        (Arc::clone(&db), IngestionStore::new(db), runner)
    }

    fn summary_raw(likes: &str) -> String {
        json!({
            "Status": true, "Msg": "", "Code": 0,
            "data": {
                "PlayCountStr": "120w", "LikeCountStr": likes, "CommentCountStr": "812",
                "ShareCountStr": "96", "CollectCountStr": "1,204", "InteractionRateStr": "3.1%",
                "Score": 9.3, "LikeCommentRateStr": "2.4%", "SalesGmvStr": "25w-50w",
                "SalesCountStr": "2500-5000", "GoodsCountStr": "1", "GPM": "312.5", "AwemeType": 1
            }
        })
        .to_string()
    }

    fn save(records: &IngestionStore, id: &str, raw: String) -> i64 {
        records
            .save(&NewRecord::fetched(VIDEO_SUMMARY, id, "20250714", raw, RequestSnapshot::default()))
            .unwrap()
    }

    #[test]
    fn test_summary_updates_video_and_watermark() {
        let (db, records, runner) = setup(100);
        let id = save(&records, "7301", summary_raw("1.2w"));
        assert_eq!(runner.run_for_type(VIDEO_SUMMARY).unwrap().processed, 1);
        assert_eq!(records.get(id).unwrap().unwrap().status, RecordStatus::Processed);

        let video = DimensionStore::new(db).get_video("7301").unwrap().unwrap();
        assert_eq!(video.summary.like_count_str, "1.2w");
        assert_eq!(video.summary.score_str, "9.3");
        assert_eq!(video.summary.gpm_str, "312.5");
        assert_eq!(video.summary.aweme_type, 1);
        assert!(video.summary_updated_at.is_some());
        assert!(video.trend_updated_at.is_none());
        assert_eq!(video.collection_status, CollectionStatus::Partial);
    }

    #[test]
    fn test_filter_boundary() {
        // 50 likes and 200 followers sit exactly on the thresholds.
        let (db, records, runner) = setup(200);
        let at = save(&records, "7301", summary_raw("50"));
        runner.run_for_type(VIDEO_SUMMARY).unwrap();
        let rec = records.get(at).unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Filtered);
        assert!(rec.processing_log.contains("likes 50"));
        let video = DimensionStore::new(Arc::clone(&db)).get_video("7301").unwrap().unwrap();
        assert!(video.summary_updated_at.is_none());

        let above = save(&records, "7301", summary_raw("51"));
        runner.run_for_type(VIDEO_SUMMARY).unwrap();
        assert_eq!(records.get(above).unwrap().unwrap().status, RecordStatus::Processed);
    }

    #[test]
    fn test_unknown_video_is_missing_prerequisite() {
        let (_, records, runner) = setup(100);
        let id = save(&records, "9999", summary_raw("1w"));
        runner.run_for_type(VIDEO_SUMMARY).unwrap();
        let rec = records.get(id).unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Error);
        assert_eq!(rec.processing_log, "missing prerequisite: video 9999");
    }

    #[test]
    fn test_null_data_is_processed_with_note() {
        let (_, records, runner) = setup(100);
        let id = save(&records, "7301", r#"{"Status":true,"data":null}"#.to_string());
        runner.run_for_type(VIDEO_SUMMARY).unwrap();
        let rec = records.get(id).unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Processed);
        assert_eq!(rec.processing_log, "summary data is null");
    }
}
