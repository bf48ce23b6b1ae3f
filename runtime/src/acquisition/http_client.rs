//! reqwest client construction for upstream API calls.
//!
//! Not a browser: plain HTTP with a desktop Chrome user agent, transparent
//! gzip and a per-request timeout. Redirects are capped; no retries happen
//! at this layer.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                                      AppleWebKit/537.36 (KHTML, like Gecko) \
                                      Chrome/138.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    pub timeout_ms: u64,
    pub user_agent: String,
    /// Optional proxy URL applied to every request.
    pub proxy: Option<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
        }
    }
}

/// Build the shared client used by the HTTP fetcher.
pub fn build_client(options: &HttpOptions) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_millis(options.timeout_ms))
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent(options.user_agent.as_str())
        .gzip(true);

    if let Some(proxy) = options.proxy.as_deref().filter(|p| !p.is_empty()) {
        let proxy = reqwest::Proxy::all(proxy)
            .with_context(|| format!("invalid proxy url: {proxy}"))?;
        builder = builder.proxy(proxy);
    }

    builder.build().context("failed to build http client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_default_client() {
        assert!(build_client(&HttpOptions::default()).is_ok());
    }

    #[test]
    fn test_empty_proxy_is_ignored() {
        let options = HttpOptions {
            proxy: Some(String::new()),
            ..HttpOptions::default()
        };
        assert!(build_client(&options).is_ok());
    }
}
