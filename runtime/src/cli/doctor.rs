//! Environment readiness check.

use crate::config::HarvestConfig;
use crate::fetcher::DetailKind;
use crate::period::RankPeriod;
use crate::renderer::chromium::find_chromium;
use crate::store::dimensions::DimensionStore;
use crate::store::records::{IngestionStore, RecordStatus};
use crate::store::Database;
use crate::trust::identity::ScrapingIdentity;
use anyhow::Result;
use std::sync::Arc;

/// Check Chromium, identity files and the database without touching the
/// provider.
pub async fn run(config: &HarvestConfig) -> Result<()> {
    println!("rankharvest doctor");
    println!("==================");
    println!();
    println!("Base URL: {}", config.base_url);
    println!();

    let chromium = find_chromium(config.browser.chromium_path.as_deref());
    match &chromium {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!("[!!] Chromium NOT found. Set browser.chromium_path or RANKHARVEST_CHROMIUM_PATH."),
    }

    let mut usable = 0;
    if config.identities.is_empty() {
        println!("[!!] No identity files configured");
    }
    for path in &config.identities {
        match ScrapingIdentity::from_file(path) {
            Ok(identity) => {
                let live = identity.live_cookies().len();
                if live == 0 {
                    println!("[!!] {}: every cookie has expired", identity.label());
                } else {
                    usable += 1;
                    println!("[OK] {}: {live} live cookie(s)", identity.label());
                }
            }
            Err(e) => println!("[!!] {}: {e:#}", path.display()),
        }
    }

    let db_ok = if config.database_path.exists() {
        match Database::open(&config.database_path) {
            Ok(db) => {
                let db = Arc::new(db);
                let records = IngestionStore::new(Arc::clone(&db));
                let videos = DimensionStore::new(db).count_videos()?;
                println!("[OK] Database: {} ({videos} video(s))", config.database_path.display());
                for period in RankPeriod::ALL {
                    let data_type = period.data_type();
                    let pending = records.count_by_status(data_type, RecordStatus::Unprocessed)?;
                    println!("     {data_type}: {pending} unprocessed");
                }
                for data_type in DetailKind::ALL.map(DetailKind::data_type) {
                    let pending = records.count_by_status(data_type, RecordStatus::Unprocessed)?;
                    println!("     {data_type}: {pending} unprocessed");
                }
                true
            }
            Err(e) => {
                println!("[!!] Database {}: {e:#}", config.database_path.display());
                false
            }
        }
    } else {
        println!("[??] Database {} will be created on first run", config.database_path.display());
        true
    };

    println!();
    if chromium.is_some() && usable > 0 && db_ok {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }
    Ok(())
}
