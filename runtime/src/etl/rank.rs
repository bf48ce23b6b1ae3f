//! Rank list pages: dimension upserts plus one fact per list entry.

use super::envelope::{lenient_f64, lenient_i64, lenient_string, Envelope};
use super::{Disposition, ProcessError, Processor};
use crate::period::{period_dates, RankPeriod};
use crate::store::dimensions::{
    upsert_blogger, upsert_product, upsert_video_from_rank, BloggerDimension, ProductDimension,
    VideoFromRank,
};
use crate::store::facts::{insert_rank_facts, RankFact};
use crate::store::records::SourceRecord;
use crate::store::Database;
use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// `awemePubTime` format used by rank items.
const RANK_PUB_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RankPage {
    #[serde(rename = "List")]
    list: Vec<RankItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RankItem {
    #[serde(deserialize_with = "lenient_i64")]
    rank_num: i64,
    base_aweme_dto: AwemeDto,
    base_goods_dto: GoodsDto,
    base_blogger_dto: BloggerDto,
    #[serde(deserialize_with = "lenient_string")]
    sales_count: String,
    #[serde(deserialize_with = "lenient_string")]
    total_sales: String,
    #[serde(deserialize_with = "lenient_string")]
    like_count_inc: String,
    #[serde(deserialize_with = "lenient_string")]
    play_count_inc: String,
    #[serde(rename = "AwemeDetailUrl", deserialize_with = "lenient_string")]
    aweme_detail_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AwemeDto {
    #[serde(deserialize_with = "lenient_string")]
    aweme_id: String,
    #[serde(deserialize_with = "lenient_string")]
    aweme_cover_url: String,
    #[serde(deserialize_with = "lenient_string")]
    aweme_desc: String,
    #[serde(deserialize_with = "lenient_string")]
    aweme_pub_time: String,
    #[serde(deserialize_with = "lenient_string")]
    aweme_share_url: String,
    #[serde(deserialize_with = "lenient_string")]
    duration_str: String,
    #[serde(deserialize_with = "lenient_string")]
    aweme_score_str: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GoodsDto {
    #[serde(deserialize_with = "lenient_string")]
    gid: String,
    #[serde(deserialize_with = "lenient_string")]
    title: String,
    #[serde(deserialize_with = "lenient_string")]
    cover_url: String,
    #[serde(deserialize_with = "lenient_string")]
    price_range: String,
    #[serde(deserialize_with = "lenient_f64")]
    price: f64,
    #[serde(deserialize_with = "lenient_string")]
    cos_ratio: String,
    #[serde(deserialize_with = "lenient_string")]
    commission_price: String,
    #[serde(deserialize_with = "lenient_string")]
    shop_name: String,
    #[serde(deserialize_with = "lenient_string")]
    douyin_brand_name: String,
    #[serde(deserialize_with = "lenient_string")]
    cate_names: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BloggerDto {
    #[serde(deserialize_with = "lenient_i64")]
    blogger_id: i64,
    #[serde(deserialize_with = "lenient_string")]
    blogger_uid: String,
    #[serde(deserialize_with = "lenient_string")]
    blogger_name: String,
    #[serde(deserialize_with = "lenient_string")]
    blogger_avatar: String,
    #[serde(deserialize_with = "lenient_i64")]
    fans_num: i64,
    #[serde(deserialize_with = "lenient_string")]
    tag: String,
}

impl RankItem {
    fn video(&self) -> VideoFromRank {
        let a = &self.base_aweme_dto;
        VideoFromRank {
            aweme_id: a.aweme_id.clone(),
            aweme_desc: a.aweme_desc.clone(),
            aweme_cover_url: a.aweme_cover_url.clone(),
            aweme_share_url: a.aweme_share_url.clone(),
            aweme_detail_url: self.aweme_detail_url.clone(),
            aweme_pub_time: NaiveDateTime::parse_from_str(&a.aweme_pub_time, RANK_PUB_TIME_FORMAT)
                .ok(),
            duration_str: a.duration_str.clone(),
            score_str: a.aweme_score_str.clone(),
            blogger_id: self.base_blogger_dto.blogger_id,
            goods_id: self.base_goods_dto.gid.clone(),
        }
    }

    fn blogger(&self) -> BloggerDimension {
        let b = &self.base_blogger_dto;
        BloggerDimension {
            blogger_id: b.blogger_id,
            blogger_uid: b.blogger_uid.clone(),
            blogger_name: b.blogger_name.clone(),
            blogger_avatar: b.blogger_avatar.clone(),
            fans_num: b.fans_num,
            tag: b.tag.clone(),
        }
    }

    fn product(&self) -> ProductDimension {
        let g = &self.base_goods_dto;
        ProductDimension {
            goods_id: g.gid.clone(),
            title: g.title.clone(),
            cover_url: g.cover_url.clone(),
            price_range: g.price_range.clone(),
            price: g.price,
            cos_ratio: g.cos_ratio.clone(),
            commission_price: g.commission_price.clone(),
            shop_name: g.shop_name.clone(),
            brand_name: g.douyin_brand_name.clone(),
            category_names: g.cate_names.clone(),
        }
    }
}

pub struct RankProcessor {
    db: Arc<Database>,
}

impl RankProcessor {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl Processor for RankProcessor {
    fn data_types(&self) -> &[&'static str] {
        &["video_rank_day", "video_rank_week", "video_rank_month"]
    }

    fn process(&self, record: &SourceRecord) -> Result<Disposition, ProcessError> {
        let period = RankPeriod::from_data_type(&record.data_type).ok_or_else(|| {
            ProcessError::Payload(format!("not a rank record: {}", record.data_type))
        })?;
        let envelope = Envelope::parse(&record.raw_content)?;
        envelope.check()?;
        let page: RankPage = envelope.payload_as()?.unwrap_or_default();
        if page.list.is_empty() {
            return Ok(Disposition::Processed {
                note: Some("empty rank list".to_string()),
            });
        }

        let date_code = if record.date_code.is_empty() {
            &record.entity_id
        } else {
            &record.date_code
        };
        let dates = period_dates(period, date_code);
        let now = Utc::now();

        let (items, inserted) = self.db.transaction(|tx| {
            let mut facts = Vec::with_capacity(page.list.len());
            for item in &page.list {
                let aweme_id = &item.base_aweme_dto.aweme_id;
                if aweme_id.is_empty() {
                    warn!("record {}: rank {} has no awemeId, skipped", record.id, item.rank_num);
                    continue;
                }
                upsert_video_from_rank(tx, &item.video(), now)?;
                if item.base_blogger_dto.blogger_id != 0 {
                    upsert_blogger(tx, &item.blogger(), now)?;
                }
                if !item.base_goods_dto.gid.is_empty() {
                    upsert_product(tx, &item.product(), now)?;
                }
                facts.push(RankFact {
                    aweme_id: aweme_id.clone(),
                    period_type: period.as_str().to_string(),
                    rank_date: dates.rank_date.clone(),
                    start_date: dates.start_date.clone(),
                    end_date: dates.end_date.clone(),
                    rank_num: item.rank_num,
                    blogger_id: item.base_blogger_dto.blogger_id,
                    goods_id: item.base_goods_dto.gid.clone(),
                    sales_count_str: item.sales_count.clone(),
                    total_sales_str: item.total_sales.clone(),
                    like_count_inc_str: item.like_count_inc.clone(),
                    play_count_inc_str: item.play_count_inc.clone(),
                });
            }
            let inserted = insert_rank_facts(tx, &facts, now)?;
            Ok((facts.len(), inserted))
        })?;

        debug!(
            "record {}: {period} rank {} -> {items} item(s), {inserted} new fact(s)",
            record.id, dates.rank_date
        );
        Ok(Disposition::Processed {
            note: Some(format!("{items} item(s), {inserted} new fact(s)")),
        })
    }
}
