//! Chromium-backed sessions using chromiumoxide.

use super::{CaptureSession, NetworkEvent, Renderer};
use crate::acquisition::http_client::DEFAULT_USER_AGENT;
use crate::trust::identity::ScrapingIdentity;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EnableParams, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams,
    RequestId,
};
use chromiumoxide::page::Page;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    pub headless: bool,
    pub chromium_path: Option<PathBuf>,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub window_width: u32,
    pub window_height: u32,
    /// Deadline for one detail-page capture.
    pub capture_timeout_ms: u64,
    /// Time spent on the site root before the first capture of a session.
    pub warmup_ms: u64,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chromium_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            window_width: 1920,
            window_height: 1080,
            capture_timeout_ms: 30_000,
            warmup_ms: 5_000,
        }
    }
}

/// Find the Chromium binary: configured path first, then `PATH`.
pub fn find_chromium(preferred: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = preferred.filter(|p| p.exists()) {
        return Some(path.to_path_buf());
    }

    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Launch arguments that keep the automated tab close to a regular desktop one.
fn launch_args(options: &BrowserOptions) -> Vec<String> {
    let mut args = vec![
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-gpu".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-extensions".to_string(),
        "--no-first-run".to_string(),
        format!("--user-agent={}", options.user_agent),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
    }
    if let Some(proxy) = options.proxy.as_deref().filter(|p| !p.is_empty()) {
        args.push(format!("--proxy-server={proxy}"));
    }
    args
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Browser,
    handler: JoinHandle<()>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch a Chromium instance configured by `options`.
    pub async fn launch(options: &BrowserOptions) -> Result<Self> {
        let chrome_path = find_chromium(options.chromium_path.as_deref())
            .context("Chromium not found. Set browser.chromium_path or install Chrome.")?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(options.window_width, options.window_height);
        if !options.headless {
            builder = builder.with_head();
        }
        for arg in launch_args(options) {
            builder = builder.arg(arg);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler: {e}");
                }
            }
        });

        info!("launched Chromium (headless: {})", options.headless);
        Ok(Self {
            browser,
            handler,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Err(e) = self.browser.close().await {
            warn!("browser close: {e}");
        }
        self.handler.abort();
        Ok(())
    }
}

fn cookie_params(identity: &ScrapingIdentity) -> Vec<CookieParam> {
    identity
        .live_cookies()
        .into_iter()
        .filter_map(|c| {
            let mut builder = CookieParam::builder()
                .name(c.name.clone())
                .value(c.value.clone())
                .path(c.path.clone())
                .secure(c.secure)
                .http_only(c.http_only);
            if !c.domain.is_empty() {
                builder = builder.domain(c.domain.clone());
            }
            match builder.build() {
                Ok(param) => Some(param),
                Err(e) => {
                    warn!("identity {}: dropping cookie {}: {e}", identity.label(), c.name);
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_session(&self, identity: &ScrapingIdentity) -> Result<Arc<dyn CaptureSession>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        let cookies = cookie_params(identity);
        let count = cookies.len();
        page.set_cookies(cookies)
            .await
            .with_context(|| format!("failed to set cookies for {}", identity.label()))?;
        debug!("session for {}: {count} cookies applied", identity.label());

        self.active_count.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(ChromiumSession {
            page,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    fn active_sessions(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A single Chromium tab.
pub struct ChromiumSession {
    page: Page,
    active_count: Arc<AtomicUsize>,
}

#[async_trait]
impl CaptureSession for ChromiumSession {
    async fn network_events(&self) -> Result<BoxStream<'static, NetworkEvent>> {
        self.page
            .execute(EnableParams::default())
            .await
            .context("failed to enable network events")?;

        let received = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .context("failed to subscribe to responseReceived")?
            .map(|ev| NetworkEvent::ResponseReceived {
                request_id: ev.request_id.inner().clone(),
                url: ev.response.url.clone(),
            });
        let finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .context("failed to subscribe to loadingFinished")?
            .map(|ev| NetworkEvent::LoadingFinished {
                request_id: ev.request_id.inner().clone(),
            });

        Ok(futures::stream::select(received, finished).boxed())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("navigation to {url} failed"))?;
        Ok(())
    }

    async fn response_body(&self, request_id: &str) -> Result<String> {
        let resp = self
            .page
            .execute(GetResponseBodyParams::new(RequestId::new(request_id)))
            .await
            .with_context(|| format!("getResponseBody failed for {request_id}"))?;
        if resp.result.base64_encoded {
            let bytes = STANDARD
                .decode(&resp.result.body)
                .context("response body is not valid base64")?;
            Ok(String::from_utf8(bytes).context("response body is not utf-8")?)
        } else {
            Ok(resp.result.body.clone())
        }
    }

    async fn close(&self) -> Result<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        if let Err(e) = self.page.clone().close().await {
            debug!("page close: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::identity::CookieRecord;

    #[test]
    fn test_launch_args_include_stealth_and_proxy() {
        let options = BrowserOptions {
            proxy: Some("http://127.0.0.1:7890".to_string()),
            ..BrowserOptions::default()
        };
        let args = launch_args(&options);
        assert!(args.contains(&"--disable-blink-features=AutomationControlled".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--proxy-server=http://127.0.0.1:7890".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--user-agent=Mozilla/5.0")));
    }

    #[test]
    fn test_headful_has_no_headless_flag() {
        let options = BrowserOptions {
            headless: false,
            ..BrowserOptions::default()
        };
        assert!(!launch_args(&options).iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn test_cookie_params_from_identity() {
        let identity = ScrapingIdentity::new(
            "acct",
            vec![CookieRecord {
                name: "FEIGUA".to_string(),
                value: "token".to_string(),
                domain: ".feigua.cn".to_string(),
                path: "/".to_string(),
                secure: true,
                http_only: true,
                expires: None,
            }],
        );
        let params = cookie_params(&identity);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "FEIGUA");
        assert_eq!(params[0].domain.as_deref(), Some(".feigua.cn"));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_session_sees_network_events() {
        let renderer = ChromiumRenderer::launch(&BrowserOptions::default())
            .await
            .expect("failed to launch");
        let identity = ScrapingIdentity::new("anon", vec![]);
        let session = renderer.new_session(&identity).await.expect("session");
        let mut events = session.network_events().await.expect("events");

        session
            .navigate("data:text/html,<h1>Hello</h1>")
            .await
            .expect("navigation failed");
        let first = tokio::time::timeout(std::time::Duration::from_secs(5), events.next()).await;
        assert!(first.is_ok());

        session.close().await.expect("close failed");
        assert_eq!(renderer.active_sessions(), 0);
        renderer.shutdown().await.expect("shutdown failed");
    }
}
