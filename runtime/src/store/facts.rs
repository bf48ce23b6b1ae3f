//! Rank and trend fact tables.

use super::{timestamp, Database};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{named_params, params, Connection};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankFact {
    pub aweme_id: String,
    pub period_type: String,
    pub rank_date: String,
    pub start_date: String,
    pub end_date: String,
    pub rank_num: i64,
    pub blogger_id: i64,
    pub goods_id: String,
    pub sales_count_str: String,
    pub total_sales_str: String,
    pub like_count_inc_str: String,
    pub play_count_inc_str: String,
}

/// One day of a video's engagement and sales curve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendFact {
    pub aweme_id: String,
    pub date_code: i64,
    pub like_count: i64,
    pub like_count_str: String,
    pub share_count: i64,
    pub share_count_str: String,
    pub comment_count: i64,
    pub comment_count_str: String,
    pub collect_count: i64,
    pub collect_count_str: String,
    pub interaction_rate: f64,
    pub interaction_rate_str: String,
    pub sales_count: i64,
    pub sales_count_str: String,
    pub sales_gmv: f64,
    pub sales_gmv_str: String,
    pub fans: i64,
    pub fans_str: String,
    pub gpm: f64,
    pub gpm_str: String,
    pub inc_like_count: i64,
    pub inc_share_count: i64,
    pub inc_comment_count: i64,
    pub inc_collect_count: i64,
    pub inc_sales_count: i64,
    pub inc_sales_gmv: f64,
    pub inc_fans: i64,
    pub list_time_str: String,
    pub time_stamp: i64,
}

/// Batch insert; rows already present for the same
/// (aweme_id, period_type, rank_date) are left untouched.
pub fn insert_rank_facts(conn: &Connection, facts: &[RankFact], now: DateTime<Utc>) -> rusqlite::Result<usize> {
    let now = timestamp(now);
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO rank_facts (aweme_id, period_type, rank_date, start_date,
             end_date, rank_num, blogger_id, goods_id, sales_count_str, total_sales_str,
             like_count_inc_str, play_count_inc_str, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )?;
    let mut inserted = 0;
    for f in facts {
        inserted += stmt.execute(params![
            f.aweme_id,
            f.period_type,
            f.rank_date,
            f.start_date,
            f.end_date,
            f.rank_num,
            f.blogger_id,
            f.goods_id,
            f.sales_count_str,
            f.total_sales_str,
            f.like_count_inc_str,
            f.play_count_inc_str,
            now,
        ])?;
    }
    Ok(inserted)
}

/// Keep only the last row for each (aweme_id, date_code), preserving the
/// order in which surviving keys first appeared.
pub fn dedupe_trend_facts(facts: Vec<TrendFact>) -> Vec<TrendFact> {
    let mut slot: HashMap<(String, i64), usize> = HashMap::new();
    let mut out: Vec<TrendFact> = Vec::with_capacity(facts.len());
    for fact in facts {
        let key = (fact.aweme_id.clone(), fact.date_code);
        match slot.get(&key) {
            Some(&i) => out[i] = fact,
            None => {
                slot.insert(key, out.len());
                out.push(fact);
            }
        }
    }
    out
}

/// Delete every existing row for the keys in `facts`, then insert `facts`.
/// Callers run this inside a transaction and pass deduplicated input.
pub fn replace_trend_facts(conn: &Connection, facts: &[TrendFact], now: DateTime<Utc>) -> rusqlite::Result<usize> {
    let now = timestamp(now);
    let mut delete = conn.prepare("DELETE FROM trend_facts WHERE aweme_id = ?1 AND date_code = ?2")?;
    for f in facts {
        delete.execute(params![f.aweme_id, f.date_code])?;
    }

    let mut insert = conn.prepare(
        "INSERT INTO trend_facts (aweme_id, date_code, like_count, like_count_str, share_count,
             share_count_str, comment_count, comment_count_str, collect_count, collect_count_str,
             interaction_rate, interaction_rate_str, sales_count, sales_count_str, sales_gmv,
             sales_gmv_str, fans, fans_str, gpm, gpm_str, inc_like_count, inc_share_count,
             inc_comment_count, inc_collect_count, inc_sales_count, inc_sales_gmv, inc_fans,
             list_time_str, time_stamp, created_at)
         VALUES (:aweme_id, :date_code, :like_count, :like_count_str, :share_count,
             :share_count_str, :comment_count, :comment_count_str, :collect_count,
             :collect_count_str, :interaction_rate, :interaction_rate_str, :sales_count,
             :sales_count_str, :sales_gmv, :sales_gmv_str, :fans, :fans_str, :gpm, :gpm_str,
             :inc_like_count, :inc_share_count, :inc_comment_count, :inc_collect_count,
             :inc_sales_count, :inc_sales_gmv, :inc_fans, :list_time_str, :time_stamp,
             :created_at)",
    )?;
    let mut inserted = 0;
    for f in facts {
        inserted += insert.execute(named_params! {
            ":aweme_id": f.aweme_id,
            ":date_code": f.date_code,
            ":like_count": f.like_count,
            ":like_count_str": f.like_count_str,
            ":share_count": f.share_count,
            ":share_count_str": f.share_count_str,
            ":comment_count": f.comment_count,
            ":comment_count_str": f.comment_count_str,
            ":collect_count": f.collect_count,
            ":collect_count_str": f.collect_count_str,
            ":interaction_rate": f.interaction_rate,
            ":interaction_rate_str": f.interaction_rate_str,
            ":sales_count": f.sales_count,
            ":sales_count_str": f.sales_count_str,
            ":sales_gmv": f.sales_gmv,
            ":sales_gmv_str": f.sales_gmv_str,
            ":fans": f.fans,
            ":fans_str": f.fans_str,
            ":gpm": f.gpm,
            ":gpm_str": f.gpm_str,
            ":inc_like_count": f.inc_like_count,
            ":inc_share_count": f.inc_share_count,
            ":inc_comment_count": f.inc_comment_count,
            ":inc_collect_count": f.inc_collect_count,
            ":inc_sales_count": f.inc_sales_count,
            ":inc_sales_gmv": f.inc_sales_gmv,
            ":inc_fans": f.inc_fans,
            ":list_time_str": f.list_time_str,
            ":time_stamp": f.time_stamp,
            ":created_at": now,
        })?;
    }
    Ok(inserted)
}

/// Read access to the fact tables.
#[derive(Clone)]
pub struct FactStore {
    db: Arc<Database>,
}

impl FactStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn rank_facts_for_date(&self, period_type: &str, rank_date: &str) -> Result<Vec<RankFact>> {
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT aweme_id, period_type, rank_date, start_date, end_date, rank_num,
                     blogger_id, goods_id, sales_count_str, total_sales_str,
                     like_count_inc_str, play_count_inc_str
                 FROM rank_facts WHERE period_type = ?1 AND rank_date = ?2
                 ORDER BY rank_num",
            )?;
            let rows = stmt.query_map(params![period_type, rank_date], |row| {
                Ok(RankFact {
                    aweme_id: row.get(0)?,
                    period_type: row.get(1)?,
                    rank_date: row.get(2)?,
                    start_date: row.get(3)?,
                    end_date: row.get(4)?,
                    rank_num: row.get(5)?,
                    blogger_id: row.get(6)?,
                    goods_id: row.get(7)?,
                    sales_count_str: row.get(8)?,
                    total_sales_str: row.get(9)?,
                    like_count_inc_str: row.get(10)?,
                    play_count_inc_str: row.get(11)?,
                })
            })?;
            rows.collect()
        })
    }

    /// `(date_code, like_count, like_count_str)` per stored trend row.
    pub fn trend_points(&self, aweme_id: &str) -> Result<Vec<(i64, i64, String)>> {
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT date_code, like_count, like_count_str FROM trend_facts
                 WHERE aweme_id = ?1 ORDER BY date_code, id",
            )?;
            let rows = stmt.query_map(params![aweme_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trend(id: &str, date: i64, likes: i64) -> TrendFact {
        TrendFact {
            aweme_id: id.to_string(),
            date_code: date,
            like_count: likes,
            like_count_str: likes.to_string(),
            ..TrendFact::default()
        }
    }

    #[test]
    fn test_rank_insert_ignores_duplicates() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let fact = RankFact {
            aweme_id: "1".to_string(),
            period_type: "day".to_string(),
            rank_date: "20250715".to_string(),
            rank_num: 3,
            ..RankFact::default()
        };
        let first = db
            .with_conn(|c| insert_rank_facts(c, &[fact.clone()], Utc::now()))
            .unwrap();
        let again = db
            .with_conn(|c| insert_rank_facts(c, &[fact], Utc::now()))
            .unwrap();
        assert_eq!((first, again), (1, 0));
    }

    #[test]
    fn test_dedupe_keeps_last_occurrence() {
        let out = dedupe_trend_facts(vec![
            trend("a", 20250701, 1),
            trend("a", 20250702, 2),
            trend("a", 20250701, 9),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].date_code, 20250701);
        assert_eq!(out[0].like_count, 9);
    }

    #[test]
    fn test_replace_overwrites_only_given_keys() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let facts = FactStore::new(Arc::clone(&db));
        db.transaction(|tx| {
            replace_trend_facts(tx, &[trend("a", 1, 10), trend("a", 2, 20)], Utc::now())?;
            Ok(())
        })
        .unwrap();
        db.transaction(|tx| {
            replace_trend_facts(tx, &[trend("a", 2, 25), trend("a", 3, 30)], Utc::now())?;
            Ok(())
        })
        .unwrap();

        let points = facts.trend_points("a").unwrap();
        assert_eq!(
            points,
            vec![
                (1, 10, "10".to_string()),
                (2, 25, "25".to_string()),
                (3, 30, "30".to_string()),
            ]
        );
    }
}
