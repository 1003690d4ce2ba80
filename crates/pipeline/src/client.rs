//! Request dispatch with interceptors, retry and demo short-circuit.
//!
//! Retry policy: idempotent GETs get up to `max_retries` extra attempts on
//! timeouts, connection failures and 502/503/504, with exponential backoff
//! plus jitter. Other methods are sent exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngExt;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use session::SessionManager;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::bearer::bearer_header;
use crate::config::ClientConfig;
use crate::fixtures::DemoFixtures;
use crate::metrics;
use crate::{Error, ErrorClassification, Interceptor, Result};

#[derive(Clone)]
pub struct RequestPipeline {
    client: reqwest::Client,
    base_url: Url,
    manager: SessionManager,
    interceptors: Vec<Arc<dyn Interceptor>>,
    fixtures: Arc<DemoFixtures>,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl RequestPipeline {
    /// Build a pipeline against `base_url`. The HTTP client carries the
    /// configured timeout and no cookie store, so credentials only travel in
    /// headers the interceptors add.
    pub fn new(config: &ClientConfig, base_url: Url, manager: SessionManager) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            manager,
            interceptors: Vec::new(),
            fixtures: Arc::new(DemoFixtures::builtin()),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay(),
        })
    }

    /// Interceptors run in registration order.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn with_fixtures(mut self, fixtures: DemoFixtures) -> Self {
        self.fixtures = Arc::new(fixtures);
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Absolute URL for an API path. The path is appended to the base, so a
    /// base of `http://host/api` and `/me` give `http://host/api/me`.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let raw = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let text = self.dispatch(Method::GET, path, None, None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let text = self.dispatch(Method::POST, path, Some(body), None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// POST with an empty body whose response body is ignored.
    pub async fn post_no_content(&self, path: &str) -> Result<()> {
        self.dispatch(Method::POST, path, None, None).await.map(|_| ())
    }

    /// Like [`post_no_content`](Self::post_no_content), but authenticated
    /// with `token` instead of whatever the session currently holds. Used
    /// once the session has already been cleared locally.
    pub async fn post_no_content_as(&self, path: &str, token: &str) -> Result<()> {
        self.dispatch(Method::POST, path, None, Some(token))
            .await
            .map(|_| ())
    }

    #[instrument(
        skip_all,
        fields(request_id = %uuid::Uuid::new_v4(), method = %method, path = %path)
    )]
    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        bearer: Option<&str>,
    ) -> Result<String> {
        if self.manager.demo().get() {
            return self.serve_demo(&method, path);
        }

        let url = self.endpoint(path)?;
        let mut headers = HeaderMap::new();
        for interceptor in &self.interceptors {
            interceptor.prepare_request(path, &mut headers)?;
        }
        if let Some(token) = bearer {
            headers.insert(AUTHORIZATION, bearer_header(token)?);
        }

        let max_retries = if method == Method::GET {
            self.max_retries
        } else {
            0
        };

        let mut attempt = 0u32;
        loop {
            match self.send_once(&method, &url, &headers, body.as_ref()).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "retrying request"
                    );
                    metrics::record_retry(method.as_str());
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(self.fail(path, e)),
            }
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<&Value>,
    ) -> Result<String> {
        let started = Instant::now();
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .headers(headers.clone());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        metrics::record_request(
            status.as_u16(),
            method.as_str(),
            started.elapsed().as_secs_f64(),
        );

        if status.is_success() {
            debug!(status = status.as_u16(), "request succeeded");
            return Ok(text);
        }
        Err(Error::Status {
            status: status.as_u16(),
            body: text,
        })
    }

    /// Let interceptors react to a final failure, then shape the error the
    /// caller sees.
    fn fail(&self, path: &str, err: Error) -> Error {
        let classification = match &err {
            Error::Status { status, .. } => ErrorClassification::from_status(*status),
            e if e.is_transient() => ErrorClassification::Transient,
            _ => ErrorClassification::Passthrough,
        };

        for interceptor in &self.interceptors {
            interceptor.report_error(path, classification);
        }

        if classification == ErrorClassification::Unauthorized {
            warn!(path, "request unauthorized");
            metrics::record_error("unauthorized");
            return Error::Unauthorized;
        }

        let error_type = match &err {
            Error::Status { .. } => "status",
            Error::Timeout => "timeout",
            _ => "transport",
        };
        warn!(path, error = %err, "request failed");
        metrics::record_error(error_type);
        err
    }

    fn serve_demo(&self, method: &Method, path: &str) -> Result<String> {
        if *method != Method::GET {
            debug!(method = %method, path, "rejecting request in demo mode");
            return Err(Error::DemoMode(method.to_string()));
        }
        let fixture = self
            .fixtures
            .get(path)
            .ok_or_else(|| Error::DemoFixtureMissing(path.to_owned()))?;
        debug!(path, "served demo fixture");
        Ok(serde_json::to_string(fixture)?)
    }

    /// `base * 2^(attempt-1)` plus up to `base` of jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.retry_base_delay.as_millis() as u64;
        let exp = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
        let jitter = rand::rng().random_range(0..=base_ms);
        Duration::from_millis(exp.saturating_add(jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bearer::BearerAuth;
    use crate::headers::{HeaderInjection, StaticHeaders};
    use common::{ManualClock, MemoryNavigator};
    use session::{MemoryStore, Profile, TokenData};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        server: MockServer,
        manager: SessionManager,
        nav: Arc<MemoryNavigator>,
        pipeline: RequestPipeline,
    }

    async fn harness(max_retries: u32) -> Harness {
        let server = MockServer::start().await;
        let manager = SessionManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(1_000)),
        );
        let nav = Arc::new(MemoryNavigator::new(
            Url::parse("http://localhost:5173/dashboard").unwrap(),
        ));
        let config = ClientConfig {
            max_retries,
            retry_base_delay_ms: 1,
            ..Default::default()
        };
        let base = Url::parse(&format!("{}/api", server.uri())).unwrap();
        let pipeline = RequestPipeline::new(&config, base, manager.clone())
            .unwrap()
            .with_interceptor(Arc::new(
                StaticHeaders::new(&[HeaderInjection {
                    name: "x-client".into(),
                    value: "test".into(),
                }])
                .unwrap(),
            ))
            .with_interceptor(Arc::new(BearerAuth::new(manager.clone(), nav.clone())));
        Harness {
            server,
            manager,
            nav,
            pipeline,
        }
    }

    fn sign_in(manager: &SessionManager) {
        manager
            .session()
            .write(TokenData {
                access_token: "t1".into(),
                refresh_token: None,
                expires_in: 3600,
                user: Profile {
                    id: "u".into(),
                    display_name: None,
                    email: None,
                    extra: Default::default(),
                },
            })
            .unwrap();
    }

    #[test]
    fn endpoint_appends_to_base_path() {
        let manager = SessionManager::in_memory();
        let pipeline = RequestPipeline::new(
            &ClientConfig::default(),
            Url::parse("http://localhost:3001/api/").unwrap(),
            manager,
        )
        .unwrap();
        assert_eq!(
            pipeline.endpoint("/auth/login").unwrap().as_str(),
            "http://localhost:3001/api/auth/login"
        );
    }

    #[tokio::test]
    async fn get_attaches_bearer_and_static_headers() {
        let h = harness(0).await;
        sign_in(&h.manager);
        Mock::given(method("GET"))
            .and(path("/api/me"))
            .and(header("authorization", "Bearer t1"))
            .and(header("x-client", "test"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "u"})),
            )
            .expect(1)
            .mount(&h.server)
            .await;

        let me: Value = h.pipeline.get_json("/me").await.unwrap();
        assert_eq!(me["id"], "u");
    }

    #[tokio::test]
    async fn login_endpoint_is_sent_without_bearer() {
        let h = harness(0).await;
        sign_in(&h.manager);
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"auth_url": "x"})),
            )
            .mount(&h.server)
            .await;

        let _: Value = h
            .pipeline
            .post_json("/auth/login", &serde_json::json!({}))
            .await
            .unwrap();

        let requests = h.server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
        assert_eq!(requests[0].headers.get("x-client").unwrap(), "test");
    }

    #[tokio::test]
    async fn explicit_token_is_sent_after_session_is_gone() {
        let h = harness(0).await;
        Mock::given(method("POST"))
            .and(path("/api/auth/logout"))
            .and(header("authorization", "Bearer ended"))
            .and(header("x-client", "test"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&h.server)
            .await;

        assert!(h.manager.token().is_none());
        h.pipeline
            .post_no_content_as("/auth/logout", "ended")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn explicit_token_overrides_session_token() {
        let h = harness(0).await;
        sign_in(&h.manager);
        Mock::given(method("POST"))
            .and(path("/api/auth/logout"))
            .and(header("authorization", "Bearer other"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&h.server)
            .await;

        h.pipeline
            .post_no_content_as("/auth/logout", "other")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unauthorized_clears_session_and_navigates() {
        let h = harness(2).await;
        sign_in(&h.manager);
        Mock::given(method("GET"))
            .and(path("/api/me"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&h.server)
            .await;

        let err = h.pipeline.get_json::<Value>("/me").await.unwrap_err();

        assert!(matches!(err, Error::Unauthorized));
        assert!(h.manager.token().is_none());
        assert_eq!(h.nav.last_assigned().unwrap().path(), "/onboarding");
    }

    #[tokio::test]
    async fn other_statuses_are_returned_to_caller() {
        let h = harness(2).await;
        Mock::given(method("GET"))
            .and(path("/api/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .expect(1)
            .mount(&h.server)
            .await;

        let err = h.pipeline.get_json::<Value>("/missing").await.unwrap_err();
        match err {
            Error::Status { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "nope");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_retries_transient_status() {
        let h = harness(2).await;
        Mock::given(method("GET"))
            .and(path("/api/me"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&h.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "u"})))
            .mount(&h.server)
            .await;

        let me: Value = h.pipeline.get_json("/me").await.unwrap();
        assert_eq!(me["id"], "u");
        assert_eq!(h.server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn get_retry_is_bounded() {
        let h = harness(2).await;
        Mock::given(method("GET"))
            .and(path("/api/me"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&h.server)
            .await;

        let err = h.pipeline.get_json::<Value>("/me").await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn post_is_never_retried() {
        let h = harness(2).await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&h.server)
            .await;

        let err = h
            .pipeline
            .post_json::<_, Value>("/auth/refresh", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn zero_retries_sends_once() {
        let h = harness(0).await;
        Mock::given(method("GET"))
            .and(path("/api/me"))
            .respond_with(ResponseTemplate::new(504))
            .expect(1)
            .mount(&h.server)
            .await;

        assert!(h.pipeline.get_json::<Value>("/me").await.is_err());
    }

    #[tokio::test]
    async fn demo_mode_serves_fixtures_without_network() {
        let h = harness(0).await;
        h.manager.demo().set(true);

        let me: Value = h.pipeline.get_json("/me").await.unwrap();
        assert_eq!(me["id"], "demo-user");

        let err = h.pipeline.get_json::<Value>("/me/top/tracks").await.unwrap_err();
        assert!(matches!(err, Error::DemoFixtureMissing(p) if p == "/me/top/tracks"));

        let err = h
            .pipeline
            .post_json::<_, Value>("/auth/login", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DemoMode(m) if m == "POST"));

        assert!(h.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn connection_failure_is_http_error() {
        let manager = SessionManager::in_memory();
        let config = ClientConfig {
            max_retries: 1,
            retry_base_delay_ms: 1,
            ..Default::default()
        };
        let pipeline =
            RequestPipeline::new(&config, Url::parse("http://127.0.0.1:9").unwrap(), manager)
                .unwrap();

        let err = pipeline.get_json::<Value>("/me").await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let config = ClientConfig {
            retry_base_delay_ms: 100,
            ..Default::default()
        };
        let pipeline = RequestPipeline::new(
            &config,
            Url::parse("http://localhost").unwrap(),
            SessionManager::in_memory(),
        )
        .unwrap();

        let first = pipeline.backoff(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(200));
        let third = pipeline.backoff(3);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));
    }
}
