//! Harvester configuration.
//!
//! One JSON file, every section optional, then a handful of `RANKHARVEST_*`
//! environment overrides. The parsed value is handed to constructors; nothing
//! below the binary reads the environment.

use crate::acquisition::http_client::HttpOptions;
use crate::acquisition::throttle::ThrottleConfig;
use crate::etl::filter::FilterThresholds;
use crate::etl::EtlOptions;
use crate::jobs::RepairConfig;
use crate::renderer::chromium::BrowserOptions;
use crate::scheduler::PacingConfig;
use crate::store::Database;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "https://www.feigua.cn";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankOptions {
    pub page_size: u32,
    /// Pages fetched per rank run.
    pub pages: u32,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            pages: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub base_url: String,
    pub database_path: PathBuf,
    /// Cookie export files, one per identity.
    pub identities: Vec<PathBuf>,
    pub throttle: ThrottleConfig,
    pub pacing: PacingConfig,
    pub filter: FilterThresholds,
    pub browser: BrowserOptions,
    pub etl: EtlOptions,
    pub repair: RepairConfig,
    pub http: HttpOptions,
    pub rank: RankOptions,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            database_path: Database::default_path(),
            identities: Vec::new(),
            throttle: ThrottleConfig::default(),
            pacing: PacingConfig::default(),
            filter: FilterThresholds::default(),
            browser: BrowserOptions::default(),
            etl: EtlOptions::default(),
            repair: RepairConfig::default(),
            http: HttpOptions::default(),
            rank: RankOptions::default(),
        }
    }
}

impl HarvestConfig {
    /// Read `path` (defaults when `None`) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config {}", p.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("invalid config {}", p.display()))?
            }
            None => Self::default(),
        };
        config.apply_overrides(read_env_string);
        Ok(config)
    }

    /// Overlay `RANKHARVEST_*` values looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = get("RANKHARVEST_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = get("RANKHARVEST_DATABASE") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = get("RANKHARVEST_IDENTITIES") {
            self.identities = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(v) = get("RANKHARVEST_CHROMIUM_PATH") {
            self.browser.chromium_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("RANKHARVEST_PROXY") {
            self.browser.proxy = Some(v.clone());
            self.http.proxy = Some(v);
        }
        if let Some(v) = get("RANKHARVEST_HEADLESS") {
            self.browser.headless = !matches!(v.as_str(), "0" | "false" | "no");
        }
        self.throttle.min_wait_ms = read_u64(&get, "RANKHARVEST_MIN_WAIT_MS", self.throttle.min_wait_ms);
        self.throttle.max_wait_ms = read_u64(&get, "RANKHARVEST_MAX_WAIT_MS", self.throttle.max_wait_ms);
        self.etl.max_retries = read_u64(&get, "RANKHARVEST_MAX_RETRIES", u64::from(self.etl.max_retries))
            .try_into()
            .unwrap_or(self.etl.max_retries);
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url)
            .with_context(|| format!("base_url {:?} is not a valid URL", self.base_url))?;
        if self.identities.is_empty() {
            bail!("no identity files configured (identities / RANKHARVEST_IDENTITIES)");
        }
        if self.throttle.min_wait_ms > self.throttle.max_wait_ms {
            bail!(
                "throttle: min_wait_ms {} exceeds max_wait_ms {}",
                self.throttle.min_wait_ms,
                self.throttle.max_wait_ms
            );
        }
        self.pacing.validate()?;
        if self.rank.page_size == 0 || self.rank.pages == 0 {
            bail!("rank: page_size and pages must be at least 1");
        }
        if self.repair.window_hours <= 0 {
            bail!("repair.window_hours must be positive");
        }
        Ok(())
    }
}

fn read_u64<F>(get: &F, name: &str, default_value: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    get(name)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default_value)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn valid() -> HarvestConfig {
        HarvestConfig {
            identities: vec![PathBuf::from("a.json")],
            ..HarvestConfig::default()
        }
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"identities": ["/tmp/a.json"], "throttle": {{"min_wait_ms": 10}}, "filter": {{"max_likes": 80}}}}"#
        )
        .unwrap();
        let config = HarvestConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.identities, vec![PathBuf::from("/tmp/a.json")]);
        assert_eq!(config.throttle.min_wait_ms, 10);
        assert_eq!(config.throttle.max_wait_ms, ThrottleConfig::default().max_wait_ms);
        assert_eq!(config.filter.max_likes, 80);
        assert_eq!(config.filter.max_followers, 200);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = HarvestConfig::load(Some(file.path())).unwrap_err();
        assert!(format!("{err:#}").contains("invalid config"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("RANKHARVEST_IDENTITIES", "/a.json, /b.json,"),
            ("RANKHARVEST_MIN_WAIT_MS", "250"),
            ("RANKHARVEST_MAX_WAIT_MS", "not-a-number"),
            ("RANKHARVEST_HEADLESS", "false"),
            ("RANKHARVEST_PROXY", "http://127.0.0.1:8080"),
            ("RANKHARVEST_BASE_URL", ""),
        ]);
        let mut config = HarvestConfig::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.identities, vec![PathBuf::from("/a.json"), PathBuf::from("/b.json")]);
        assert_eq!(config.throttle.min_wait_ms, 250);
        assert_eq!(config.throttle.max_wait_ms, ThrottleConfig::default().max_wait_ms);
        assert!(!config.browser.headless);
        assert_eq!(config.http.proxy.as_deref(), Some("http://127.0.0.1:8080"));
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());
        assert!(HarvestConfig::default().validate().is_err());

        let mut c = valid();
        c.throttle.min_wait_ms = 5000;
        c.throttle.max_wait_ms = 100;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.base_url = "not a url".to_string();
        assert!(c.validate().is_err());

        let mut c = valid();
        c.rank.page_size = 0;
        assert!(c.validate().is_err());
    }
}
