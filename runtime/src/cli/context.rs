//! Wiring shared by the acquisition subcommands.

use crate::acquisition::http_client::build_client;
use crate::acquisition::throttle::RateLimitedTransport;
use crate::config::HarvestConfig;
use crate::fetcher::browser::BrowserFetcher;
use crate::fetcher::http::HttpFetcher;
use crate::fetcher::Fetcher;
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::Renderer;
use crate::scheduler::AcquisitionScheduler;
use crate::store::dimensions::DimensionStore;
use crate::store::records::IngestionStore;
use crate::store::Database;
use crate::trust::identity::IdentityPool;
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct Harvest {
    pub config: HarvestConfig,
    pub db: Arc<Database>,
    pub records: IngestionStore,
    pub dimensions: DimensionStore,
    pub pool: Arc<IdentityPool>,
    shutdown: watch::Receiver<bool>,
}

impl Harvest {
    /// Open the database and load identities. Ctrl-C stops the current
    /// cycle after the item in flight.
    pub fn open(config: HarvestConfig) -> Result<Self> {
        config.validate()?;
        if let Some(dir) = config.database_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let db = Arc::new(Database::open(&config.database_path)?);
        let pool = Arc::new(IdentityPool::load(&config.identities)?);
        info!(
            "database {} with {} identity(ies)",
            config.database_path.display(),
            pool.len()
        );

        let (tx, shutdown) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current item");
                let _ = tx.send(true);
            }
        });

        Ok(Self {
            records: IngestionStore::new(Arc::clone(&db)),
            dimensions: DimensionStore::new(Arc::clone(&db)),
            config,
            db,
            pool,
            shutdown,
        })
    }

    pub fn scheduler(&self) -> AcquisitionScheduler<StdRng> {
        AcquisitionScheduler::new(self.config.pacing.clone(), StdRng::from_entropy())
            .with_shutdown(self.shutdown.clone())
    }

    pub fn http_fetcher(&self) -> Result<HttpFetcher> {
        let client = build_client(&self.config.http)?;
        let transport = Arc::new(RateLimitedTransport::new(client, &self.config.throttle));
        Ok(HttpFetcher::new(
            &self.config.base_url,
            Arc::clone(&self.pool),
            transport,
            self.config.http.user_agent.clone(),
            Duration::from_millis(self.config.http.timeout_ms),
        )?)
    }

    /// Launch Chromium and wrap it in a fetcher. The renderer is returned so
    /// the caller can shut it down once the fetcher is gone.
    pub async fn browser_fetcher(&self) -> Result<(BrowserFetcher, Arc<ChromiumRenderer>)> {
        let options = &self.config.browser;
        let renderer = Arc::new(ChromiumRenderer::launch(options).await?);
        let fetcher = BrowserFetcher::new(
            self.config.base_url.clone(),
            Arc::clone(&self.pool),
            Arc::clone(&renderer) as Arc<dyn Renderer>,
            Duration::from_millis(options.capture_timeout_ms),
            Duration::from_millis(options.warmup_ms),
        );
        Ok((fetcher, renderer))
    }
}

/// Close the fetcher, then the browser behind it.
pub async fn close_browser(fetcher: BrowserFetcher, renderer: Arc<ChromiumRenderer>) {
    if let Err(e) = fetcher.close().await {
        warn!("closing browser session: {e:#}");
    }
    drop(fetcher);
    match Arc::try_unwrap(renderer) {
        Ok(renderer) => {
            if let Err(e) = renderer.shutdown().await {
                warn!("browser shutdown: {e:#}");
            }
        }
        Err(_) => warn!("renderer still referenced, leaving browser to exit with the process"),
    }
}
