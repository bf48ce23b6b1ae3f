//! Pre-authenticated scraping identities and round-robin rotation.
//!
//! Each identity is one cookie export file (a JSON array of cookie records,
//! as written by common browser cookie-export extensions). Files are read once
//! at startup; the pool never reloads or mutates them.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no usable identity could be loaded from {0} file(s)")]
    NoIdentities(usize),
}

/// One cookie record from an exported cookie jar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    /// Unix seconds. Missing or non-positive means a session cookie.
    #[serde(default, alias = "expirationDate")]
    pub expires: Option<f64>,
}

fn default_path() -> String {
    "/".to_string()
}

impl CookieRecord {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.expires.filter(|s| *s > 0.0)?;
        Utc.timestamp_opt(secs as i64, 0).single()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at <= now)
    }
}

/// An immutable bundle of session cookies.
#[derive(Debug, Clone)]
pub struct ScrapingIdentity {
    label: String,
    cookies: Vec<CookieRecord>,
}

impl ScrapingIdentity {
    pub fn new(label: impl Into<String>, cookies: Vec<CookieRecord>) -> Self {
        Self {
            label: label.into(),
            cookies,
        }
    }

    /// Parse a cookie export file. Cookies already expired are dropped.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read cookie file: {}", path.display()))?;
        let cookies: Vec<CookieRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("malformed cookie file: {}", path.display()))?;

        let label = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let now = Utc::now();
        let total = cookies.len();
        let live: Vec<CookieRecord> = cookies
            .into_iter()
            .filter(|c| !c.is_expired_at(now))
            .collect();
        if live.len() < total {
            debug!(
                "identity {label}: skipped {} expired cookie(s)",
                total - live.len()
            );
        }

        Ok(Self::new(label, live))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Cookies that are still valid right now.
    pub fn live_cookies(&self) -> Vec<&CookieRecord> {
        let now = Utc::now();
        self.cookies.iter().filter(|c| !c.is_expired_at(now)).collect()
    }

    /// `name=value; name=value` form for a `Cookie` request header.
    pub fn cookie_header(&self) -> String {
        self.live_cookies()
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Fixed set of identities handed out in strict rotation.
pub struct IdentityPool {
    identities: Vec<Arc<ScrapingIdentity>>,
    cursor: Mutex<usize>,
}

// Labels only; cookie values stay out of logs.
impl fmt::Debug for IdentityPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.identities.iter().map(|i| i.label()).collect();
        f.debug_struct("IdentityPool")
            .field("identities", &labels)
            .finish_non_exhaustive()
    }
}

impl IdentityPool {
    /// Load every cookie file, skipping the ones that fail to parse.
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let mut identities = Vec::with_capacity(paths.len());
        for path in paths {
            match ScrapingIdentity::from_file(path) {
                Ok(identity) => {
                    info!(
                        "loaded identity {} ({} cookies)",
                        identity.label(),
                        identity.cookies.len()
                    );
                    identities.push(identity);
                }
                Err(e) => error!("skipping identity {}: {e:#}", path.display()),
            }
        }
        if identities.is_empty() {
            return Err(IdentityError::NoIdentities(paths.len()).into());
        }
        Ok(Self::from_identities(identities)?)
    }

    pub fn from_identities(identities: Vec<ScrapingIdentity>) -> Result<Self, IdentityError> {
        if identities.is_empty() {
            return Err(IdentityError::NoIdentities(0));
        }
        Ok(Self {
            identities: identities.into_iter().map(Arc::new).collect(),
            cursor: Mutex::new(0),
        })
    }

    /// Identity at the cursor; advances the cursor.
    pub fn next(&self) -> Arc<ScrapingIdentity> {
        let mut cursor = self.cursor.lock().unwrap_or_else(|p| p.into_inner());
        let identity = Arc::clone(&self.identities[*cursor]);
        *cursor = (*cursor + 1) % self.identities.len();
        identity
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn cookie(name: &str, value: &str, expires: Option<f64>) -> CookieRecord {
        CookieRecord {
            name: name.to_string(),
            value: value.to_string(),
            domain: ".feigua.cn".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: false,
            expires,
        }
    }

    #[test]
    fn test_cookie_header_format() {
        let id = ScrapingIdentity::new(
            "a",
            vec![cookie("sid", "abc", None), cookie("uid", "42", None)],
        );
        assert_eq!(id.cookie_header(), "sid=abc; uid=42");
    }

    #[test]
    fn test_cookie_header_skips_expired() {
        let past = (Utc::now().timestamp() - 60) as f64;
        let future = (Utc::now().timestamp() + 3600) as f64;
        let id = ScrapingIdentity::new(
            "a",
            vec![cookie("old", "x", Some(past)), cookie("new", "y", Some(future))],
        );
        assert_eq!(id.cookie_header(), "new=y");
    }

    #[test]
    fn test_round_robin_visits_each_once() {
        let pool = IdentityPool::from_identities(
            ["a", "b", "c"]
                .iter()
                .map(|l| ScrapingIdentity::new(*l, vec![]))
                .collect(),
        )
        .unwrap();

        let first: Vec<String> = (0..3).map(|_| pool.next().label().to_string()).collect();
        assert_eq!(first, vec!["a", "b", "c"]);
        assert_eq!(pool.next().label(), "a");
    }

    #[test]
    fn test_round_robin_under_concurrency() {
        let pool = Arc::new(
            IdentityPool::from_identities(
                (0..4)
                    .map(|i| ScrapingIdentity::new(format!("id{i}"), vec![]))
                    .collect(),
            )
            .unwrap(),
        );

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.next().label().to_string())
            })
            .collect();
        let seen: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_load_skips_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("alice.json");
        std::fs::write(
            &good,
            r#"[{"name":"sid","value":"1","domain":".feigua.cn","path":"/","secure":true,"httpOnly":true,"expirationDate":4102444800}]"#,
        )
        .unwrap();
        let bad = dir.path().join("broken.json");
        std::fs::write(&bad, "{not json").unwrap();
        let missing = dir.path().join("missing.json");

        let pool = IdentityPool::load(&[bad, good, missing]).unwrap();
        assert_eq!(pool.len(), 1);
        let id = pool.next();
        assert_eq!(id.label(), "alice");
        assert_eq!(id.cookie_header(), "sid=1");
    }

    #[test]
    fn test_load_fails_when_nothing_loads() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("broken.json");
        std::fs::write(&bad, "[]]").unwrap();
        let err = IdentityPool::load(&[bad]).unwrap_err();
        assert!(err.downcast_ref::<IdentityError>().is_some());
    }

    #[test]
    fn test_pool_debug_hides_cookie_values() {
        let pool = IdentityPool::from_identities(vec![ScrapingIdentity::new(
            "alice",
            vec![cookie("sid", "secret-token", None)],
        )])
        .unwrap();
        let shown = format!("{pool:?}");
        assert!(shown.contains("alice"), "{shown}");
        assert!(!shown.contains("secret-token"), "{shown}");
    }

    #[test]
    fn test_session_cookie_never_expires() {
        let c = cookie("s", "v", Some(-1.0));
        assert!(!c.is_expired_at(Utc::now()));
        assert!(c.expires_at().is_none());
    }
}
