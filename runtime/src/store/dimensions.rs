//! Video, blogger and product dimension tables.
//!
//! Upserts merge into the existing row: an empty or zero incoming value never
//! replaces a stored one, and rows are never deleted. Write helpers take a
//! plain `&Connection` so they compose inside a caller's transaction.

use super::{parse_timestamp, timestamp, Database};
use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{named_params, params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stored format for upstream publish times (provider local time).
pub const PUB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Coarse detail-collection progress of one video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionStatus {
    Pending,
    Partial,
    Complete,
}

impl CollectionStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            2 => Self::Complete,
            1 => Self::Partial,
            _ => Self::Pending,
        }
    }
}

/// Video attributes carried by a rank list entry.
#[derive(Debug, Clone, Default)]
pub struct VideoFromRank {
    pub aweme_id: String,
    pub aweme_desc: String,
    pub aweme_cover_url: String,
    pub aweme_share_url: String,
    pub aweme_detail_url: String,
    pub aweme_pub_time: Option<NaiveDateTime>,
    pub duration_str: String,
    pub score_str: String,
    pub blogger_id: i64,
    pub goods_id: String,
}

/// Aggregate counters from a summary payload, kept as provider strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoSummary {
    pub play_count_str: String,
    pub like_count_str: String,
    pub comment_count_str: String,
    pub share_count_str: String,
    pub collect_count_str: String,
    pub interaction_rate_str: String,
    pub score_str: String,
    pub like_comment_rate_str: String,
    pub sales_gmv_str: String,
    pub sales_count_str: String,
    pub goods_count_str: String,
    pub gpm_str: String,
    pub aweme_type: i64,
}

#[derive(Debug, Clone)]
pub struct VideoDimension {
    pub aweme_id: String,
    pub aweme_desc: String,
    pub aweme_cover_url: String,
    pub aweme_share_url: String,
    pub aweme_detail_url: String,
    pub aweme_pub_time: Option<NaiveDateTime>,
    pub duration_str: String,
    pub blogger_id: i64,
    pub goods_id: String,
    pub summary: VideoSummary,
    pub summary_updated_at: Option<DateTime<Utc>>,
    pub trend_updated_at: Option<DateTime<Utc>>,
    pub collection_status: CollectionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BloggerDimension {
    pub blogger_id: i64,
    pub blogger_uid: String,
    pub blogger_name: String,
    pub blogger_avatar: String,
    pub fans_num: i64,
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductDimension {
    pub goods_id: String,
    pub title: String,
    pub cover_url: String,
    pub price_range: String,
    pub price: f64,
    pub cos_ratio: String,
    pub commission_price: String,
    pub shop_name: String,
    pub brand_name: String,
    pub category_names: String,
}

/// A video queued for detail collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailTarget {
    pub aweme_id: String,
    pub detail_url: String,
    pub pub_time: Option<NaiveDateTime>,
}

fn parse_pub_time(raw: Option<String>) -> Option<NaiveDateTime> {
    raw.and_then(|s| NaiveDateTime::parse_from_str(&s, PUB_TIME_FORMAT).ok())
}

pub fn upsert_video_from_rank(conn: &Connection, v: &VideoFromRank, now: DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO videos (aweme_id, aweme_desc, aweme_cover_url, aweme_share_url,
             aweme_detail_url, aweme_pub_time, duration_str, score_str, blogger_id, goods_id,
             created_at, updated_at)
         VALUES (:id, :desc, :cover, :share, :detail, :pub, :duration, :score, :blogger,
             :goods, :now, :now)
         ON CONFLICT (aweme_id) DO UPDATE SET
             aweme_desc = COALESCE(NULLIF(excluded.aweme_desc, ''), videos.aweme_desc),
             aweme_cover_url = COALESCE(NULLIF(excluded.aweme_cover_url, ''), videos.aweme_cover_url),
             aweme_share_url = COALESCE(NULLIF(excluded.aweme_share_url, ''), videos.aweme_share_url),
             aweme_detail_url = COALESCE(NULLIF(excluded.aweme_detail_url, ''), videos.aweme_detail_url),
             aweme_pub_time = COALESCE(excluded.aweme_pub_time, videos.aweme_pub_time),
             duration_str = COALESCE(NULLIF(excluded.duration_str, ''), videos.duration_str),
             score_str = COALESCE(NULLIF(excluded.score_str, ''), videos.score_str),
             blogger_id = COALESCE(NULLIF(excluded.blogger_id, 0), videos.blogger_id),
             goods_id = COALESCE(NULLIF(excluded.goods_id, ''), videos.goods_id),
             updated_at = excluded.updated_at",
        named_params! {
            ":id": v.aweme_id,
            ":desc": v.aweme_desc,
            ":cover": v.aweme_cover_url,
            ":share": v.aweme_share_url,
            ":detail": v.aweme_detail_url,
            ":pub": v.aweme_pub_time.map(|t| t.format(PUB_TIME_FORMAT).to_string()),
            ":duration": v.duration_str,
            ":score": v.score_str,
            ":blogger": v.blogger_id,
            ":goods": v.goods_id,
            ":now": timestamp(now),
        },
    )?;
    Ok(())
}

pub fn upsert_blogger(conn: &Connection, b: &BloggerDimension, now: DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO bloggers (blogger_id, blogger_uid, blogger_name, blogger_avatar, fans_num,
             tag, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT (blogger_id) DO UPDATE SET
             blogger_uid = COALESCE(NULLIF(excluded.blogger_uid, ''), bloggers.blogger_uid),
             blogger_name = COALESCE(NULLIF(excluded.blogger_name, ''), bloggers.blogger_name),
             blogger_avatar = COALESCE(NULLIF(excluded.blogger_avatar, ''), bloggers.blogger_avatar),
             fans_num = COALESCE(NULLIF(excluded.fans_num, 0), bloggers.fans_num),
             tag = COALESCE(NULLIF(excluded.tag, ''), bloggers.tag),
             updated_at = excluded.updated_at",
        params![
            b.blogger_id,
            b.blogger_uid,
            b.blogger_name,
            b.blogger_avatar,
            b.fans_num,
            b.tag,
            timestamp(now),
        ],
    )?;
    Ok(())
}

pub fn upsert_product(conn: &Connection, p: &ProductDimension, now: DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO products (goods_id, title, cover_url, price_range, price, cos_ratio,
             commission_price, shop_name, brand_name, category_names, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
         ON CONFLICT (goods_id) DO UPDATE SET
             title = COALESCE(NULLIF(excluded.title, ''), products.title),
             cover_url = COALESCE(NULLIF(excluded.cover_url, ''), products.cover_url),
             price_range = COALESCE(NULLIF(excluded.price_range, ''), products.price_range),
             price = COALESCE(NULLIF(excluded.price, 0), products.price),
             cos_ratio = COALESCE(NULLIF(excluded.cos_ratio, ''), products.cos_ratio),
             commission_price = COALESCE(NULLIF(excluded.commission_price, ''), products.commission_price),
             shop_name = COALESCE(NULLIF(excluded.shop_name, ''), products.shop_name),
             brand_name = COALESCE(NULLIF(excluded.brand_name, ''), products.brand_name),
             category_names = COALESCE(NULLIF(excluded.category_names, ''), products.category_names),
             updated_at = excluded.updated_at",
        params![
            p.goods_id,
            p.title,
            p.cover_url,
            p.price_range,
            p.price,
            p.cos_ratio,
            p.commission_price,
            p.shop_name,
            p.brand_name,
            p.category_names,
            timestamp(now),
        ],
    )?;
    Ok(())
}

/// Overwrite the summary subset of a video and move its summary watermark.
/// Returns `false` if the video does not exist.
pub fn update_video_summary(
    conn: &Connection,
    aweme_id: &str,
    s: &VideoSummary,
    now: DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE videos SET
             play_count_str = :play, like_count_str = :like, comment_count_str = :comment,
             share_count_str = :share, collect_count_str = :collect,
             interaction_rate_str = :interaction, score_str = COALESCE(NULLIF(:score, ''), score_str),
             like_comment_rate_str = :like_comment, sales_gmv_str = :gmv,
             sales_count_str = :sales, goods_count_str = :goods, gpm_str = :gpm,
             aweme_type = :aweme_type,
             summary_updated_at = :now,
             collection_status = CASE WHEN trend_updated_at IS NOT NULL THEN 2 ELSE 1 END,
             updated_at = :now
         WHERE aweme_id = :id",
        named_params! {
            ":play": s.play_count_str,
            ":like": s.like_count_str,
            ":comment": s.comment_count_str,
            ":share": s.share_count_str,
            ":collect": s.collect_count_str,
            ":interaction": s.interaction_rate_str,
            ":score": s.score_str,
            ":like_comment": s.like_comment_rate_str,
            ":gmv": s.sales_gmv_str,
            ":sales": s.sales_count_str,
            ":goods": s.goods_count_str,
            ":gpm": s.gpm_str,
            ":aweme_type": s.aweme_type,
            ":now": timestamp(now),
            ":id": aweme_id,
        },
    )?;
    Ok(changed == 1)
}

/// Move the trend watermark. Returns `false` if the video does not exist.
pub fn bump_trend_watermark(conn: &Connection, aweme_id: &str, now: DateTime<Utc>) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE videos SET
             trend_updated_at = ?2,
             collection_status = CASE WHEN summary_updated_at IS NOT NULL THEN 2 ELSE 1 END,
             updated_at = ?2
         WHERE aweme_id = ?1",
        params![aweme_id, timestamp(now)],
    )?;
    Ok(changed == 1)
}

const VIDEO_COLUMNS: &str = "aweme_id, aweme_desc, aweme_cover_url, aweme_share_url, \
     aweme_detail_url, aweme_pub_time, duration_str, score_str, blogger_id, goods_id, \
     play_count_str, like_count_str, comment_count_str, share_count_str, collect_count_str, \
     interaction_rate_str, like_comment_rate_str, sales_gmv_str, sales_count_str, \
     goods_count_str, gpm_str, aweme_type, summary_updated_at, trend_updated_at, \
     collection_status";

fn read_video(row: &Row<'_>) -> rusqlite::Result<VideoDimension> {
    let summary_at: Option<String> = row.get(22)?;
    let trend_at: Option<String> = row.get(23)?;
    Ok(VideoDimension {
        aweme_id: row.get(0)?,
        aweme_desc: row.get(1)?,
        aweme_cover_url: row.get(2)?,
        aweme_share_url: row.get(3)?,
        aweme_detail_url: row.get(4)?,
        aweme_pub_time: parse_pub_time(row.get(5)?),
        duration_str: row.get(6)?,
        blogger_id: row.get(8)?,
        goods_id: row.get(9)?,
        summary: VideoSummary {
            score_str: row.get(7)?,
            play_count_str: row.get(10)?,
            like_count_str: row.get(11)?,
            comment_count_str: row.get(12)?,
            share_count_str: row.get(13)?,
            collect_count_str: row.get(14)?,
            interaction_rate_str: row.get(15)?,
            like_comment_rate_str: row.get(16)?,
            sales_gmv_str: row.get(17)?,
            sales_count_str: row.get(18)?,
            goods_count_str: row.get(19)?,
            gpm_str: row.get(20)?,
            aweme_type: row.get(21)?,
        },
        summary_updated_at: summary_at.as_deref().and_then(parse_timestamp),
        trend_updated_at: trend_at.as_deref().and_then(parse_timestamp),
        collection_status: CollectionStatus::from_code(row.get(24)?),
    })
}

/// Read side of the dimension tables.
#[derive(Clone)]
pub struct DimensionStore {
    db: Arc<Database>,
}

impl DimensionStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get_video(&self, aweme_id: &str) -> Result<Option<VideoDimension>> {
        self.db.with_conn(|c| {
            c.query_row(
                &format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE aweme_id = ?1"),
                params![aweme_id],
                read_video,
            )
            .optional()
        })
    }

    pub fn get_blogger(&self, blogger_id: i64) -> Result<Option<BloggerDimension>> {
        self.db.with_conn(|c| {
            c.query_row(
                "SELECT blogger_id, blogger_uid, blogger_name, blogger_avatar, fans_num, tag
                 FROM bloggers WHERE blogger_id = ?1",
                params![blogger_id],
                |row| {
                    Ok(BloggerDimension {
                        blogger_id: row.get(0)?,
                        blogger_uid: row.get(1)?,
                        blogger_name: row.get(2)?,
                        blogger_avatar: row.get(3)?,
                        fans_num: row.get(4)?,
                        tag: row.get(5)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn get_product(&self, goods_id: &str) -> Result<Option<ProductDimension>> {
        self.db.with_conn(|c| {
            c.query_row(
                "SELECT goods_id, title, cover_url, price_range, price, cos_ratio,
                     commission_price, shop_name, brand_name, category_names
                 FROM products WHERE goods_id = ?1",
                params![goods_id],
                |row| {
                    Ok(ProductDimension {
                        goods_id: row.get(0)?,
                        title: row.get(1)?,
                        cover_url: row.get(2)?,
                        price_range: row.get(3)?,
                        price: row.get(4)?,
                        cos_ratio: row.get(5)?,
                        commission_price: row.get(6)?,
                        shop_name: row.get(7)?,
                        brand_name: row.get(8)?,
                        category_names: row.get(9)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Videos that carry a detail-page URL, newest publish time first.
    pub fn list_detail_targets(&self) -> Result<Vec<DetailTarget>> {
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT aweme_id, aweme_detail_url, aweme_pub_time FROM videos
                 WHERE aweme_detail_url != ''
                 ORDER BY aweme_pub_time DESC, aweme_id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(DetailTarget {
                    aweme_id: row.get(0)?,
                    detail_url: row.get(1)?,
                    pub_time: parse_pub_time(row.get(2)?),
                })
            })?;
            rows.collect()
        })
    }

    pub fn detail_target(&self, aweme_id: &str) -> Result<Option<DetailTarget>> {
        Ok(self.get_video(aweme_id)?.map(|v| DetailTarget {
            aweme_id: v.aweme_id,
            detail_url: v.aweme_detail_url,
            pub_time: v.aweme_pub_time,
        }))
    }

    pub fn count_videos(&self) -> Result<i64> {
        self.db
            .with_conn(|c| c.query_row("SELECT COUNT(*) FROM videos", [], |row| row.get(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<Database>, DimensionStore) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (Arc::clone(&db), DimensionStore::new(db))
    }

    fn video(id: &str) -> VideoFromRank {
        VideoFromRank {
            aweme_id: id.to_string(),
            aweme_desc: "夏日防晒".to_string(),
            aweme_cover_url: "https://p3.example/cover.jpg".to_string(),
            aweme_detail_url: "aweme/detail?sign=abc".to_string(),
            aweme_pub_time: NaiveDateTime::parse_from_str("2025-07-14 18:30:00", PUB_TIME_FORMAT).ok(),
            blogger_id: 88,
            goods_id: "g1".to_string(),
            ..VideoFromRank::default()
        }
    }

    #[test]
    fn test_video_upsert_keeps_existing_on_empty_values() {
        let (db, dims) = setup();
        db.with_conn(|c| upsert_video_from_rank(c, &video("1"), Utc::now()))
            .unwrap();
        let sparse = VideoFromRank {
            aweme_id: "1".to_string(),
            aweme_desc: "新标题".to_string(),
            ..VideoFromRank::default()
        };
        db.with_conn(|c| upsert_video_from_rank(c, &sparse, Utc::now()))
            .unwrap();

        let v = dims.get_video("1").unwrap().unwrap();
        assert_eq!(v.aweme_desc, "新标题");
        assert_eq!(v.aweme_cover_url, "https://p3.example/cover.jpg");
        assert_eq!(v.blogger_id, 88);
        assert!(v.aweme_pub_time.is_some());
        assert_eq!(v.collection_status, CollectionStatus::Pending);
    }

    #[test]
    fn test_blogger_followers_not_zeroed() {
        let (db, dims) = setup();
        let b = BloggerDimension {
            blogger_id: 7,
            blogger_name: "小店主".to_string(),
            fans_num: 1200,
            ..BloggerDimension::default()
        };
        db.with_conn(|c| upsert_blogger(c, &b, Utc::now())).unwrap();
        let update = BloggerDimension {
            blogger_id: 7,
            tag: "美妆".to_string(),
            ..BloggerDimension::default()
        };
        db.with_conn(|c| upsert_blogger(c, &update, Utc::now())).unwrap();

        let stored = dims.get_blogger(7).unwrap().unwrap();
        assert_eq!(stored.fans_num, 1200);
        assert_eq!(stored.blogger_name, "小店主");
        assert_eq!(stored.tag, "美妆");
    }

    #[test]
    fn test_watermarks_drive_collection_status() {
        let (db, dims) = setup();
        db.with_conn(|c| upsert_video_from_rank(c, &video("1"), Utc::now()))
            .unwrap();

        let summary = VideoSummary {
            like_count_str: "1.2w".to_string(),
            ..VideoSummary::default()
        };
        assert!(db
            .with_conn(|c| update_video_summary(c, "1", &summary, Utc::now()))
            .unwrap());
        let v = dims.get_video("1").unwrap().unwrap();
        assert_eq!(v.collection_status, CollectionStatus::Partial);
        assert_eq!(v.summary.like_count_str, "1.2w");

        assert!(db
            .with_conn(|c| bump_trend_watermark(c, "1", Utc::now()))
            .unwrap());
        let v = dims.get_video("1").unwrap().unwrap();
        assert_eq!(v.collection_status, CollectionStatus::Complete);
        assert!(v.trend_updated_at.is_some());

        assert!(!db
            .with_conn(|c| bump_trend_watermark(c, "missing", Utc::now()))
            .unwrap());
    }

    #[test]
    fn test_detail_targets_newest_first() {
        let (db, dims) = setup();
        let mut older = video("old");
        older.aweme_pub_time =
            NaiveDateTime::parse_from_str("2025-07-01 08:00:00", PUB_TIME_FORMAT).ok();
        let mut no_url = video("nourl");
        no_url.aweme_detail_url.clear();
        db.with_conn(|c| {
            upsert_video_from_rank(c, &older, Utc::now())?;
            upsert_video_from_rank(c, &video("new"), Utc::now())?;
            upsert_video_from_rank(c, &no_url, Utc::now())
        })
        .unwrap();

        let ids: Vec<String> = dims
            .list_detail_targets()
            .unwrap()
            .into_iter()
            .map(|t| t.aweme_id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }
}
