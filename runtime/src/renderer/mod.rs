//! Browser abstraction for network-level capture.
//!
//! A `Renderer` hands out `CaptureSession`s (one tab each, already carrying
//! an identity's cookies). A session exposes just enough of the DevTools
//! network domain for [`capture`] to correlate responses with their bodies.

pub mod capture;
pub mod chromium;

use crate::trust::identity::ScrapingIdentity;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// The two network events capture cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// Response headers arrived. The body may not be readable yet.
    ResponseReceived { request_id: String, url: String },
    /// The response body is fully loaded.
    LoadingFinished { request_id: String },
}

/// A browser engine that can open sessions.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open a new tab with the identity's cookies applied.
    async fn new_session(&self, identity: &ScrapingIdentity) -> Result<Arc<dyn CaptureSession>>;
    /// Number of currently open sessions.
    fn active_sessions(&self) -> usize;
}

/// A single browser tab.
#[async_trait]
pub trait CaptureSession: Send + Sync {
    /// Enable network events and subscribe to them.
    async fn network_events(&self) -> Result<BoxStream<'static, NetworkEvent>>;
    /// Navigate the tab. Resolves once the navigation has committed.
    async fn navigate(&self, url: &str) -> Result<()>;
    /// Body of a finished response.
    async fn response_body(&self, request_id: &str) -> Result<String>;
    async fn close(&self) -> Result<()>;
}
