//! Per-endpoint acquisition against the provider.
//!
//! Two variants implement [`Fetcher`]: [`http::HttpFetcher`] calls the JSON
//! endpoints directly through the rate-limited transport, and
//! [`browser::BrowserFetcher`] renders a detail page and captures the XHR
//! responses it triggers. Operations a variant cannot perform return
//! [`FetchError::NotSupported`].

pub mod browser;
pub mod http;

use crate::acquisition::throttle::TransportError;
use crate::period::RankPeriod;
use crate::renderer::capture::CaptureError;
use crate::store::dimensions::DetailTarget;
use crate::store::records::RequestSnapshot;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub const RANK_PATH: &str = "/api/v3/awemerank/sellGoodsAwemeRank";
pub const SUMMARY_PATH: &str = "/api/v3/aweme/detail/detail/sumData";
pub const TREND_PATH: &str = "/api/v3/aweme/detail/detail/trends";

pub const VIDEO_SUMMARY: &str = "video_summary";
pub const VIDEO_TREND: &str = "video_trend";

/// Detail endpoints reachable from a video's detail page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetailKind {
    Summary,
    Trend,
}

impl DetailKind {
    pub const ALL: [DetailKind; 2] = [DetailKind::Summary, DetailKind::Trend];

    pub fn data_type(self) -> &'static str {
        match self {
            Self::Summary => VIDEO_SUMMARY,
            Self::Trend => VIDEO_TREND,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Self::Summary => SUMMARY_PATH,
            Self::Trend => TREND_PATH,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Trend => "trend",
        }
    }

    pub fn from_data_type(data_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.data_type() == data_type)
    }
}

/// Raw body plus what was sent to get it.
#[derive(Debug, Clone)]
pub struct FetchOutput {
    pub raw: String,
    pub request: RequestSnapshot,
}

/// Bodies captured from one detail page.
#[derive(Debug, Clone)]
pub struct DetailCapture {
    pub bodies: HashMap<DetailKind, String>,
    pub request: RequestSnapshot,
    /// Set when the deadline hit before every requested kind arrived.
    pub incomplete: Option<String>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport: {source}")]
    Transport {
        #[source]
        source: TransportError,
        request: RequestSnapshot,
    },

    #[error("{} returned status {status}", .request.url)]
    Status { status: u16, request: RequestSnapshot },

    #[error("failed to read response body: {source}")]
    Body {
        #[source]
        source: reqwest::Error,
        request: RequestSnapshot,
    },

    #[error("failed to build request: {0}")]
    Build(#[source] reqwest::Error),

    #[error("{source}")]
    Capture {
        #[source]
        source: CaptureError,
        request: RequestSnapshot,
    },

    #[error("identity {label} has no live cookies")]
    Identity { label: String },

    #[error("browser session unavailable: {0:#}")]
    Session(#[source] anyhow::Error),

    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("video {0} has no detail url")]
    NoEntryUrl(String),

    #[error("{variant} fetcher does not support {operation}")]
    NotSupported {
        variant: &'static str,
        operation: &'static str,
    },
}

impl FetchError {
    /// Request snapshot, when the failure happened after one was built.
    pub fn request(&self) -> Option<&RequestSnapshot> {
        match self {
            Self::Transport { request, .. }
            | Self::Status { request, .. }
            | Self::Body { request, .. }
            | Self::Capture { request, .. } => Some(request),
            _ => None,
        }
    }
}

/// Acquisition operations against the provider.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Short variant name used in logs and errors.
    fn variant(&self) -> &'static str;

    /// One page of the sales-video ranking for `period` on `date_code`.
    async fn fetch_video_rank(
        &self,
        _period: RankPeriod,
        _date_code: &str,
        _page_index: u32,
        _page_size: u32,
    ) -> Result<FetchOutput, FetchError> {
        Err(FetchError::NotSupported {
            variant: self.variant(),
            operation: "fetch_video_rank",
        })
    }

    /// Aggregate counters of one video.
    async fn fetch_video_summary(
        &self,
        _aweme_id: &str,
        _date_code: &str,
    ) -> Result<FetchOutput, FetchError> {
        Err(FetchError::NotSupported {
            variant: self.variant(),
            operation: "fetch_video_summary",
        })
    }

    /// Render the video's detail page and capture the requested endpoints.
    async fn capture_video_details(
        &self,
        _target: &DetailTarget,
        _kinds: &[DetailKind],
    ) -> Result<DetailCapture, FetchError> {
        Err(FetchError::NotSupported {
            variant: self.variant(),
            operation: "capture_video_details",
        })
    }

    /// Release long-lived resources such as browser sessions.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
