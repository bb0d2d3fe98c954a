use crate::api::edge::{EDGE_VERIFY_HEADER, EDGE_ZONE_HEADER};
use crate::config::Settings;
use crate::create_app;
use crate::state::AppState;
use axum::body::Body;
use axum::Router;
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use log::LevelFilter;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tower::ServiceExt;

/// Test fixture wiring a complete in-memory gateway.
///
/// Requests built through the fixture carry valid edge headers by default;
/// use [`TestFixture::request_without_edge`] to simulate a request that
/// bypassed the WAF.
///
/// # Examples
///
/// ```rust
/// #[tokio::test]
/// async fn test_endpoint() {
///     let fixture = TestFixture::new().await;
///     let response = fixture.get("/health").await;
///     response.assert_ok();
/// }
/// ```
pub struct TestFixture {
    /// The application router
    pub app: Router,
    /// Configuration settings
    pub settings: Settings,
    /// The state behind the router, for driving failover in tests
    pub state: AppState,
}

impl TestFixture {
    pub async fn new() -> Self {
        let _ = env_logger::builder()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();

        let settings = Settings::for_test();
        let state = AppState::for_testing(&settings).await;
        let app = create_app(state.clone()).await;

        Self {
            app,
            settings,
            state,
        }
    }

    /// Request builder with valid edge headers and a JSON content type.
    pub fn request_builder(&self, method: Method, uri: impl AsRef<str>) -> http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri.as_ref())
            .header(EDGE_ZONE_HEADER, self.settings.edge.zone_id.as_str())
            .header(EDGE_VERIFY_HEADER, self.settings.edge.secret.as_str())
            .header("Content-Type", "application/json")
    }

    /// Request builder with no edge headers at all.
    pub fn request_without_edge(
        &self,
        method: Method,
        uri: impl AsRef<str>,
    ) -> http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri.as_ref())
            .header("Content-Type", "application/json")
    }

    pub async fn get(&self, uri: impl AsRef<str>) -> TestResponse {
        let request = self
            .request_builder(Method::GET, uri)
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    /// GET with extra headers (e.g. Authorization, x-resource-tenant).
    pub async fn get_with_headers(
        &self,
        uri: impl AsRef<str>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = self.request_builder(Method::GET, uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::empty()).expect("Failed to build request");
        self.send(request).await
    }

    pub async fn post<T: Serialize>(&self, uri: impl AsRef<str>, body: &T) -> TestResponse {
        let json_body = serde_json::to_vec(body).expect("Failed to serialize body to JSON");
        let request = self
            .request_builder(Method::POST, uri)
            .body(Body::from(json_body))
            .expect("Failed to build request");
        self.send(request).await
    }

    pub async fn post_with_headers<T: Serialize>(
        &self,
        uri: impl AsRef<str>,
        body: &T,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let json_body = serde_json::to_vec(body).expect("Failed to serialize body to JSON");
        let mut builder = self.request_builder(Method::POST, uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(Body::from(json_body))
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Sends a request and collects the response into a [`TestResponse`].
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        let json = if !body.is_empty() {
            serde_json::from_slice(&body).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        TestResponse {
            status,
            headers,
            json,
        }
    }

    /// Run the full authorize → token flow for a registered client and
    /// return the bearer token.
    pub async fn login(&self, client_id: &str) -> String {
        let client = self
            .settings
            .client(client_id)
            .expect("unknown test client")
            .clone();

        let response = self
            .get(format!(
                "/authorize?client_id={}&redirect_uri={}",
                client.client_id, client.redirect_uri
            ))
            .await;
        response.assert_status(StatusCode::FOUND);
        let code = response.location_param("code");

        let response = self
            .post(
                "/token",
                &serde_json::json!({
                    "code": code,
                    "client_id": client.client_id,
                    "redirect_uri": client.redirect_uri,
                }),
            )
            .await;
        response.assert_ok();
        response.json["session_token"]
            .as_str()
            .expect("token response carries session_token")
            .to_string()
    }
}

/// Collected response: status, headers, and parsed JSON body.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub json: Value,
}

impl TestResponse {
    pub fn assert_ok(&self) {
        assert_eq!(
            self.status,
            StatusCode::OK,
            "expected 200 OK, got {} with body {}",
            self.status,
            self.json
        );
    }

    pub fn assert_status(&self, expected: StatusCode) {
        assert_eq!(
            self.status, expected,
            "expected {expected}, got {} with body {}",
            self.status, self.json
        );
    }

    /// The error code carried in the JSON error body.
    pub fn error_code(&self) -> &str {
        self.json["error"].as_str().unwrap_or_default()
    }

    pub fn json_as<T: DeserializeOwned>(&self) -> T {
        serde_json::from_value(self.json.clone()).expect("Failed to parse response body")
    }

    /// The Location header of a redirect response.
    pub fn location(&self) -> url::Url {
        let value = self
            .headers
            .get(http::header::LOCATION)
            .expect("response carries a Location header")
            .to_str()
            .expect("Location header is valid UTF-8");
        url::Url::parse(value).expect("Location header is a valid URL")
    }

    /// A query parameter from the Location header.
    pub fn location_param(&self, name: &str) -> String {
        let location = self.location();
        location
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .unwrap_or_else(|| panic!("redirect carries no '{name}' parameter"))
    }
}
