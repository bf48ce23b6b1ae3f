//! Jittered request pacing in front of a reqwest client.
//!
//! A background task drops one permit into a single-slot channel, then waits
//! a random interval before offering the next. Callers take one permit per
//! request. The first permit is placed before the task starts, so the first
//! request of a run never waits.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// Permit interval bounds, in milliseconds (inclusive).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_wait_ms: 1_500,
            max_wait_ms: 4_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{method} {url}: cancelled before completion")]
    Cancelled { method: String, url: String },

    #[error("{method} {url}: permit generator stopped")]
    Closed { method: String, url: String },

    #[error("{method} {url}: {source}")]
    Request {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Outcome of waiting for a permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    Cancelled,
    Closed,
}

/// HTTP transport that paces every request through the permit channel.
pub struct RateLimitedTransport {
    client: reqwest::Client,
    permits: Mutex<mpsc::Receiver<()>>,
    generator: JoinHandle<()>,
}

impl RateLimitedTransport {
    /// Must be called from within a tokio runtime.
    pub fn new(client: reqwest::Client, config: &ThrottleConfig) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity is 1 and the channel is fresh, so this cannot fail.
        let _ = tx.try_send(());

        let min = config.min_wait_ms.min(config.max_wait_ms);
        let max = config.max_wait_ms.max(min);
        let generator = tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            loop {
                let wait = rng.gen_range(min..=max);
                tokio::time::sleep(Duration::from_millis(wait)).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });

        Self {
            client,
            permits: Mutex::new(rx),
            generator,
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Wait for one permit, or for `cancel` to resolve first.
    pub async fn acquire_until<F>(&self, cancel: F) -> Acquire
    where
        F: Future,
    {
        let wait = async {
            let mut rx = self.permits.lock().await;
            rx.recv().await
        };
        tokio::select! {
            biased;
            permit = wait => match permit {
                Some(()) => Acquire::Granted,
                None => Acquire::Closed,
            },
            _ = cancel => Acquire::Cancelled,
        }
    }

    /// [`acquire_until`](Self::acquire_until) with a relative deadline.
    pub async fn acquire_within(&self, deadline: Duration) -> Acquire {
        self.acquire_until(tokio::time::sleep(deadline)).await
    }

    /// Send `request` once a permit is available. `cancel` covers both the
    /// permit wait and the request itself.
    pub async fn execute_until<F>(
        &self,
        request: reqwest::Request,
        cancel: F,
    ) -> Result<reqwest::Response, TransportError>
    where
        F: Future,
    {
        let method = request.method().to_string();
        let url = request.url().to_string();

        tokio::pin!(cancel);
        match self.acquire_until(&mut cancel).await {
            Acquire::Granted => {}
            Acquire::Cancelled => return Err(TransportError::Cancelled { method, url }),
            Acquire::Closed => return Err(TransportError::Closed { method, url }),
        }

        debug!("{method} {url}");
        tokio::select! {
            resp = self.client.execute(request) => {
                resp.map_err(|source| TransportError::Request { method, url, source })
            }
            _ = &mut cancel => Err(TransportError::Cancelled { method, url }),
        }
    }

    /// [`execute_until`](Self::execute_until) with a relative deadline.
    pub async fn execute(
        &self,
        request: reqwest::Request,
        deadline: Duration,
    ) -> Result<reqwest::Response, TransportError> {
        self.execute_until(request, tokio::time::sleep(deadline)).await
    }
}

impl Drop for RateLimitedTransport {
    fn drop(&mut self) {
        self.generator.abort();
    }
}
