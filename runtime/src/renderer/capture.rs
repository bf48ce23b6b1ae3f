//! Multi-endpoint capture from a single page navigation.
//!
//! Correlation is two-phase. `ResponseReceived` only records which request id
//! belongs to which endpoint label; the body is fetched once the matching
//! `LoadingFinished` arrives, since Chromium may not have flushed it earlier.
//! Body fetches run in a `JoinSet` owned by the listener task, and the
//! listener is aborted when [`capture`] returns, so nothing outlives the call.

use super::{CaptureSession, NetworkEvent};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// One endpoint to harvest: responses whose URL contains `path` are stored
/// under `label`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTarget {
    pub label: String,
    pub path: String,
}

impl CaptureTarget {
    pub fn new(label: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Deadline hit first. `partial` still holds every body captured so far.
    #[error("capture incomplete: {captured}/{expected} captured")]
    Incomplete {
        captured: usize,
        expected: usize,
        partial: HashMap<String, String>,
    },

    #[error("navigation to {url} failed: {source}")]
    Navigation {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("browser session error: {0}")]
    Session(#[source] anyhow::Error),
}

impl CaptureError {
    /// Bodies captured before the failure.
    pub fn into_partial(self) -> HashMap<String, String> {
        match self {
            Self::Incomplete { partial, .. } => partial,
            _ => HashMap::new(),
        }
    }
}

struct CaptureState {
    targets: Vec<CaptureTarget>,
    /// request id -> label, filled on headers, drained on load finished.
    tracking: Mutex<HashMap<String, String>>,
    /// label -> body, first successful body wins.
    results: Mutex<HashMap<String, String>>,
    progress: Notify,
}

impl CaptureState {
    fn label_for(&self, url: &str) -> Option<&str> {
        self.targets
            .iter()
            .find(|t| url.contains(&t.path))
            .map(|t| t.label.as_str())
    }

    fn is_captured(&self, label: &str) -> bool {
        self.results
            .lock()
            .map(|r| r.contains_key(label))
            .unwrap_or(false)
    }

    fn track(&self, request_id: String, label: &str) {
        if let Ok(mut tracking) = self.tracking.lock() {
            tracking.insert(request_id, label.to_string());
        }
    }

    fn untrack(&self, request_id: &str) -> Option<String> {
        self.tracking.lock().ok()?.remove(request_id)
    }

    fn store(&self, label: String, body: String) {
        let inserted = match self.results.lock() {
            Ok(mut results) if !results.contains_key(&label) => {
                results.insert(label, body);
                true
            }
            _ => false,
        };
        if inserted {
            self.progress.notify_one();
        }
    }

    fn captured(&self) -> usize {
        self.results.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn snapshot(&self) -> HashMap<String, String> {
        self.results.lock().map(|r| r.clone()).unwrap_or_default()
    }

    async fn wait_all(&self) {
        while self.captured() < self.targets.len() {
            self.progress.notified().await;
        }
    }
}

async fn listen(
    session: Arc<dyn CaptureSession>,
    state: Arc<CaptureState>,
    mut events: futures::stream::BoxStream<'static, NetworkEvent>,
) {
    let mut fetches = JoinSet::new();
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(NetworkEvent::ResponseReceived { request_id, url }) => {
                    if let Some(label) = state.label_for(&url) {
                        if !state.is_captured(label) {
                            debug!("tracking {request_id} as {label}");
                            state.track(request_id, label);
                        }
                    }
                }
                Some(NetworkEvent::LoadingFinished { request_id }) => {
                    let Some(label) = state.untrack(&request_id) else {
                        continue;
                    };
                    let session = Arc::clone(&session);
                    let state = Arc::clone(&state);
                    fetches.spawn(async move {
                        match session.response_body(&request_id).await {
                            Ok(body) => {
                                debug!("captured {label} ({} bytes)", body.len());
                                state.store(label, body);
                            }
                            Err(e) => warn!("body fetch for {label} ({request_id}) failed: {e:#}"),
                        }
                    });
                }
                None => break,
            },
            Some(_) = fetches.join_next(), if !fetches.is_empty() => {}
        }
    }
    while fetches.join_next().await.is_some() {}
}

/// Navigate `session` to `entry_url` and collect one response body per
/// target, waiting at most `deadline` in total.
pub async fn capture(
    session: Arc<dyn CaptureSession>,
    entry_url: &str,
    targets: &[CaptureTarget],
    deadline: Duration,
) -> Result<HashMap<String, String>, CaptureError> {
    if targets.is_empty() {
        return Ok(HashMap::new());
    }
    let state = Arc::new(CaptureState {
        targets: targets.to_vec(),
        tracking: Mutex::new(HashMap::new()),
        results: Mutex::new(HashMap::new()),
        progress: Notify::new(),
    });

    let events = session
        .network_events()
        .await
        .map_err(CaptureError::Session)?;
    let listener = tokio::spawn(listen(Arc::clone(&session), Arc::clone(&state), events));

    let run = async {
        session.navigate(entry_url).await?;
        state.wait_all().await;
        Ok::<(), anyhow::Error>(())
    };
    let outcome = tokio::time::timeout(deadline, run).await;
    listener.abort();

    let expected = targets.len();
    match outcome {
        Ok(Ok(())) => Ok(state.snapshot()),
        Ok(Err(source)) => Err(CaptureError::Navigation {
            url: entry_url.to_string(),
            source,
        }),
        Err(_) => {
            let partial = state.snapshot();
            if partial.len() == expected {
                return Ok(partial);
            }
            Err(CaptureError::Incomplete {
                captured: partial.len(),
                expected,
                partial,
            })
        }
    }
}
