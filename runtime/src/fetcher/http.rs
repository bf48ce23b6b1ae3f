//! Direct JSON endpoint calls through the rate-limited transport.

use super::{FetchError, FetchOutput, Fetcher, RANK_PATH, SUMMARY_PATH};
use crate::acquisition::throttle::RateLimitedTransport;
use crate::period::RankPeriod;
use crate::store::records::RequestSnapshot;
use crate::trust::identity::IdentityPool;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, ACCEPT_LANGUAGE, COOKIE, USER_AGENT};
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const ACCEPT_JSON: &str = "application/json, text/plain, */*";
const ACCEPT_LANGUAGE_ZH: &str = "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7";

pub struct HttpFetcher {
    base_url: Url,
    pool: Arc<IdentityPool>,
    transport: Arc<RateLimitedTransport>,
    user_agent: String,
    deadline: Duration,
}

impl HttpFetcher {
    pub fn new(
        base_url: &str,
        pool: Arc<IdentityPool>,
        transport: Arc<RateLimitedTransport>,
        user_agent: impl Into<String>,
        deadline: Duration,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            pool,
            transport,
            user_agent: user_agent.into(),
            deadline,
        })
    }

    /// GET `path` with `params`, using the next identity's cookies.
    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<FetchOutput, FetchError> {
        let endpoint = self.base_url.join(path)?;
        let mut url = endpoint.clone();
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));

        let identity = self.pool.next();
        let cookie = identity.cookie_header();
        if cookie.is_empty() {
            return Err(FetchError::Identity {
                label: identity.label().to_string(),
            });
        }

        let request = self
            .transport
            .client()
            .get(url.clone())
            .header(COOKIE, cookie)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, ACCEPT_JSON)
            .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_ZH)
            .build()
            .map_err(FetchError::Build)?;

        let snapshot = RequestSnapshot {
            method: request.method().to_string(),
            url: endpoint.to_string(),
            params: url.query().unwrap_or_default().to_string(),
            headers: headers_json(request.headers()),
        };
        debug!("GET {url} as {}", identity.label());

        let response = match self.transport.execute(request, self.deadline).await {
            Ok(response) => response,
            Err(source) => {
                return Err(FetchError::Transport {
                    source,
                    request: snapshot,
                })
            }
        };
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                status: status.as_u16(),
                request: snapshot,
            });
        }
        match response.text().await {
            Ok(raw) => Ok(FetchOutput {
                raw,
                request: snapshot,
            }),
            Err(source) => Err(FetchError::Body {
                source,
                request: snapshot,
            }),
        }
    }
}

/// Header map as a JSON object; repeated names keep the last value.
fn headers_json(headers: &HeaderMap) -> String {
    let map: BTreeMap<&str, &str> = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect();
    serde_json::to_string(&map).unwrap_or_default()
}

fn epoch_millis() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn variant(&self) -> &'static str {
        "http"
    }

    async fn fetch_video_rank(
        &self,
        period: RankPeriod,
        date_code: &str,
        page_index: u32,
        page_size: u32,
    ) -> Result<FetchOutput, FetchError> {
        info!("fetching {period} rank {date_code} page {page_index}");
        let params = [
            ("pageIndex", page_index.to_string()),
            ("pageSize", page_size.to_string()),
            ("period", period.as_str().to_string()),
            ("desc", "1".to_string()),
            ("datecode", date_code.to_string()),
            ("sort", "14".to_string()),
            ("rankType", "14".to_string()),
            ("priceRange", "1-500".to_string()),
            ("_", epoch_millis()),
        ];
        self.get(RANK_PATH, &params).await
    }

    async fn fetch_video_summary(
        &self,
        aweme_id: &str,
        date_code: &str,
    ) -> Result<FetchOutput, FetchError> {
        let params = [
            ("awemeId", aweme_id.to_string()),
            ("dateCode", date_code.to_string()),
            ("_", epoch_millis()),
        ];
        self.get(SUMMARY_PATH, &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::throttle::ThrottleConfig;
    use crate::fetcher::DetailKind;
    use crate::store::dimensions::DetailTarget;
    use crate::trust::identity::{CookieRecord, ScrapingIdentity};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cookie(name: &str, value: &str) -> CookieRecord {
        CookieRecord {
            name: name.to_string(),
            value: value.to_string(),
            domain: ".feigua.cn".to_string(),
            path: "/".to_string(),
            secure: false,
            http_only: false,
            expires: None,
        }
    }

    fn fetcher(base: &str, identities: Vec<ScrapingIdentity>) -> HttpFetcher {
        let pool = Arc::new(IdentityPool::from_identities(identities).unwrap());
        let transport = Arc::new(RateLimitedTransport::new(
            reqwest::Client::new(),
            &ThrottleConfig {
                min_wait_ms: 0,
                max_wait_ms: 0,
            },
        ));
        HttpFetcher::new(base, pool, transport, "test-agent", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_rank_request_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RANK_PATH))
            .and(query_param("pageIndex", "2"))
            .and(query_param("pageSize", "50"))
            .and(query_param("period", "week"))
            .and(query_param("datecode", "20250714"))
            .and(query_param("priceRange", "1-500"))
            .and(query_param("sort", "14"))
            .and(header("cookie", "FEIGUA=abc; sid=1"))
            .and(header("user-agent", "test-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Status":true}"#))
            .expect(1)
            .mount(&server)
            .await;

        let f = fetcher(
            &server.uri(),
            vec![ScrapingIdentity::new(
                "a",
                vec![cookie("FEIGUA", "abc"), cookie("sid", "1")],
            )],
        );
        let out = f
            .fetch_video_rank(RankPeriod::Week, "20250714", 2, 50)
            .await
            .unwrap();
        assert_eq!(out.raw, r#"{"Status":true}"#);
        assert_eq!(out.request.method, "GET");
        assert_eq!(out.request.url, format!("{}{RANK_PATH}", server.uri()));
        assert!(out.request.params.starts_with("pageIndex=2&pageSize=50&period=week"));
        let headers: serde_json::Value = serde_json::from_str(&out.request.headers).unwrap();
        assert_eq!(headers["accept"], ACCEPT_JSON);
    }

    #[tokio::test]
    async fn test_identities_rotate_between_requests() {
        let server = MockServer::start().await;
        for token in ["one", "two"] {
            Mock::given(path(SUMMARY_PATH))
                .and(header("cookie", format!("FEIGUA={token}").as_str()))
                .respond_with(ResponseTemplate::new(200).set_body_string(token))
                .expect(1)
                .mount(&server)
                .await;
        }
        let f = fetcher(
            &server.uri(),
            vec![
                ScrapingIdentity::new("a", vec![cookie("FEIGUA", "one")]),
                ScrapingIdentity::new("b", vec![cookie("FEIGUA", "two")]),
            ],
        );
        let first = f.fetch_video_summary("7", "20250715").await.unwrap();
        let second = f.fetch_video_summary("7", "20250715").await.unwrap();
        assert_eq!(first.raw, "one");
        assert_eq!(second.raw, "two");
    }

    #[tokio::test]
    async fn test_non_200_keeps_snapshot() {
        let server = MockServer::start().await;
        Mock::given(path(SUMMARY_PATH))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let f = fetcher(&server.uri(), vec![ScrapingIdentity::new("a", vec![cookie("k", "v")])]);
        let err = f.fetch_video_summary("7", "20250715").await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 403, .. }));
        let snapshot = err.request().unwrap();
        assert!(snapshot.params.contains("awemeId=7"));
        assert!(snapshot.params.contains("dateCode=20250715"));
    }

    #[tokio::test]
    async fn test_identity_without_cookies_is_rejected() {
        let f = fetcher("http://127.0.0.1:9", vec![ScrapingIdentity::new("empty", vec![])]);
        let err = f.fetch_video_summary("7", "20250715").await.unwrap_err();
        assert!(matches!(err, FetchError::Identity { ref label } if label == "empty"));
    }

    #[tokio::test]
    async fn test_detail_capture_is_not_supported() {
        let f = fetcher("http://127.0.0.1:9", vec![ScrapingIdentity::new("a", vec![])]);
        let target = DetailTarget {
            aweme_id: "7".to_string(),
            detail_url: "x".to_string(),
            pub_time: None,
        };
        let err = f
            .capture_video_details(&target, &DetailKind::ALL)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotSupported { variant: "http", .. }));
    }
}
