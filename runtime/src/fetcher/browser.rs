//! Detail-page capture through a real browser.
//!
//! The summary and trend endpoints are signed by page scripts, so they are
//! harvested from the network traffic of the rendered detail page instead of
//! being called directly. One session is opened lazily per fetcher and
//! reused; it warms up on the site root before the first capture. A session
//! that fails outright is dropped, and the next capture opens a fresh one
//! with the next identity.

use super::{DetailCapture, DetailKind, FetchError, Fetcher};
use crate::renderer::capture::{self, CaptureError, CaptureTarget};
use crate::renderer::{CaptureSession, Renderer};
use crate::store::dimensions::DetailTarget;
use crate::store::records::RequestSnapshot;
use crate::trust::identity::IdentityPool;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct BrowserFetcher {
    base_url: String,
    pool: Arc<IdentityPool>,
    renderer: Arc<dyn Renderer>,
    capture_timeout: Duration,
    warmup: Duration,
    session: Mutex<Option<Arc<dyn CaptureSession>>>,
}

impl BrowserFetcher {
    pub fn new(
        base_url: impl Into<String>,
        pool: Arc<IdentityPool>,
        renderer: Arc<dyn Renderer>,
        capture_timeout: Duration,
        warmup: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pool,
            renderer,
            capture_timeout,
            warmup,
            session: Mutex::new(None),
        }
    }

    /// `{base_url}/app/{detail_url}`
    pub fn entry_url(&self, detail_url: &str) -> String {
        format!("{}/app/{}", self.base_url, detail_url.trim_start_matches('/'))
    }

    async fn session(&self) -> Result<Arc<dyn CaptureSession>, FetchError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(Arc::clone(session));
        }

        let identity = self.pool.next();
        let session = self
            .renderer
            .new_session(&identity)
            .await
            .map_err(FetchError::Session)?;
        info!("browser session opened with identity {}", identity.label());

        // Warm-up failure is not fatal.
        if let Err(e) = session.navigate(&self.base_url).await {
            warn!("warm-up navigation to {} failed: {e:#}", self.base_url);
        }
        tokio::time::sleep(self.warmup).await;

        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Drop the cached session if it is still `broken`, closing it best-effort.
    async fn discard_session(&self, broken: &Arc<dyn CaptureSession>) {
        let stale = {
            let mut slot = self.session.lock().await;
            match slot.as_ref() {
                Some(current) if Arc::ptr_eq(current, broken) => slot.take(),
                _ => None,
            }
        };
        if let Some(session) = stale {
            if let Err(e) = session.close().await {
                warn!("closing failed browser session: {e:#}");
            }
        }
    }
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    fn variant(&self) -> &'static str {
        "browser"
    }

    async fn capture_video_details(
        &self,
        target: &DetailTarget,
        kinds: &[DetailKind],
    ) -> Result<DetailCapture, FetchError> {
        if target.detail_url.is_empty() {
            return Err(FetchError::NoEntryUrl(target.aweme_id.clone()));
        }
        let entry_url = self.entry_url(&target.detail_url);
        let request = RequestSnapshot {
            method: "GET".to_string(),
            url: entry_url.clone(),
            params: String::new(),
            headers: "{}".to_string(),
        };
        let targets: Vec<CaptureTarget> = kinds
            .iter()
            .map(|k| CaptureTarget::new(k.label(), k.path()))
            .collect();

        let session = self.session().await?;
        let outcome = capture::capture(
            Arc::clone(&session),
            &entry_url,
            &targets,
            self.capture_timeout,
        )
        .await;
        let (bodies, incomplete) = match outcome {
            Ok(bodies) => (bodies, None),
            Err(err @ CaptureError::Incomplete { .. }) => {
                let message = err.to_string();
                warn!("video {}: {message}", target.aweme_id);
                (err.into_partial(), Some(message))
            }
            Err(source) => {
                warn!("video {}: {source}; discarding browser session", target.aweme_id);
                self.discard_session(&session).await;
                return Err(FetchError::Capture { source, request });
            }
        };

        let bodies: HashMap<DetailKind, String> = kinds
            .iter()
            .filter_map(|k| bodies.get(k.label()).map(|b| (*k, b.clone())))
            .collect();
        Ok(DetailCapture {
            bodies,
            request,
            incomplete,
        })
    }

    async fn close(&self) -> anyhow::Result<()> {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await?;
        }
        Ok(())
    }
}
