//! HTTP implementation of the parent API.
//!
//! The actual HTTP client is abstracted via a trait so the JSON handling and
//! status mapping can be tested without a network.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::parent::ParentApi;
use panelsync_protocol::{ParentUser, UsageResponse, UsageUpdate};
use serde::de::DeserializeOwned;
use std::time::Duration;
use uuid::Uuid;

/// Header carrying the parent API key.
pub const API_KEY_HEADER: &str = "Hiddify-API-Key";

/// Longest body excerpt kept in errors and logs.
const BODY_EXCERPT: usize = 200;

/// HTTP method used by the parent API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET.
    Get,
    /// PATCH.
    Patch,
}

/// One HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Extra headers.
    pub headers: Vec<(&'static str, String)>,
    /// JSON body, if any.
    pub body: Option<Vec<u8>>,
    /// Deadline for the whole exchange.
    pub timeout: Duration,
}

/// One HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Raw body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns the first characters of the body, lossily decoded.
    pub fn body_excerpt(&self) -> String {
        String::from_utf8_lossy(&self.body)
            .chars()
            .take(BODY_EXCERPT)
            .collect()
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends one request. Non-2xx statuses are returned, not raised.
    fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse>;
}

/// Blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client, optionally skipping certificate verification.
    pub fn new(accept_invalid_certs: bool) -> SyncResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Patch => reqwest::Method::PATCH,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = request.body {
            builder = builder.header("Content-Type", "application/json").body(body);
        }

        let response = builder.send().map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(map_reqwest_error)?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::Transport(err.to_string())
    }
}

/// The parent API over HTTP.
///
/// Routes, rooted at `{parent_url}/{api_path}`:
/// - `GET /{uuid}/` → `{"current_usage_GB": n}`, 404 when unknown
/// - `PATCH /{uuid}/` with `{"current_usage_GB": n}`
/// - `GET /` → array of users
pub struct HttpParentApi<C: HttpClient> {
    users_url: String,
    api_key: String,
    user_timeout: Duration,
    list_timeout: Duration,
    client: C,
}

impl<C: HttpClient> HttpParentApi<C> {
    /// Creates a parent API client from the sync configuration.
    pub fn new(config: &SyncConfig, client: C) -> Self {
        Self {
            users_url: config.users_url(),
            api_key: config.api_key.clone(),
            user_timeout: config.user_timeout,
            list_timeout: config.list_timeout,
            client,
        }
    }

    /// Returns the user collection URL.
    pub fn users_url(&self) -> &str {
        &self.users_url
    }

    fn user_url(&self, uuid: &Uuid) -> String {
        format!("{}/{}/", self.users_url, uuid)
    }

    fn request(
        &self,
        method: HttpMethod,
        url: String,
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> HttpRequest {
        HttpRequest {
            method,
            url,
            headers: vec![(API_KEY_HEADER, self.api_key.clone())],
            body,
            timeout,
        }
    }
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> SyncResult<T> {
    serde_json::from_slice(&response.body).map_err(|e| SyncError::Decode(e.to_string()))
}

fn status_error(response: &HttpResponse) -> SyncError {
    SyncError::HttpStatus {
        status: response.status,
        body: response.body_excerpt(),
    }
}

impl<C: HttpClient> ParentApi for HttpParentApi<C> {
    fn fetch_usage(&self, uuid: &Uuid) -> SyncResult<Option<f64>> {
        let request = self.request(HttpMethod::Get, self.user_url(uuid), None, self.user_timeout);
        let response = self.client.send(request)?;
        match response.status {
            200 => Ok(Some(decode::<UsageResponse>(&response)?.current_usage_gb)),
            404 => Ok(None),
            _ => Err(status_error(&response)),
        }
    }

    fn update_usage(&self, uuid: &Uuid, total_gb: f64) -> SyncResult<()> {
        let body = serde_json::to_vec(&UsageUpdate {
            current_usage_gb: total_gb,
        })
        .map_err(|e| SyncError::Decode(e.to_string()))?;
        let request = self.request(
            HttpMethod::Patch,
            self.user_url(uuid),
            Some(body),
            self.user_timeout,
        );

        let response = self.client.send(request)?;
        if response.status == 200 {
            return Ok(());
        }
        let err = status_error(&response);
        tracing::warn!(%uuid, status = response.status, body = %response.body_excerpt(), "parent rejected usage update");
        Err(err)
    }

    fn list_users(&self) -> SyncResult<Vec<ParentUser>> {
        let url = format!("{}/", self.users_url);
        let request = self.request(HttpMethod::Get, url, None, self.list_timeout);
        let response = self.client.send(request)?;
        if response.status != 200 {
            return Err(status_error(&response));
        }
        decode(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct TestClient {
        responses: Mutex<VecDeque<SyncResult<HttpResponse>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn respond(&self, status: u16, body: &str) {
            self.responses.lock().push_back(Ok(HttpResponse {
                status,
                body: body.as_bytes().to_vec(),
            }));
        }

        fn fail(&self, err: SyncError) {
            self.responses.lock().push_back(Err(err));
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().clone()
        }
    }

    impl HttpClient for &TestClient {
        fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
            self.requests.lock().push(request);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(SyncError::Transport("no response scripted".into())))
        }
    }

    fn config() -> SyncConfig {
        SyncConfig::new("https://panel.example.com/secret/", "key-1")
    }

    #[test]
    fn fetch_usage_reads_gb() {
        let client = TestClient::new();
        client.respond(200, r#"{"current_usage_GB": 2.5, "name": "alice"}"#);
        let api = HttpParentApi::new(&config(), &client);
        let uuid = Uuid::new_v4();

        assert_eq!(api.fetch_usage(&uuid).unwrap(), Some(2.5));

        let sent = client.requests();
        assert_eq!(sent[0].method, HttpMethod::Get);
        assert_eq!(
            sent[0].url,
            format!("https://panel.example.com/secret/api/v2/admin/user/{uuid}/")
        );
        assert_eq!(sent[0].headers, vec![(API_KEY_HEADER, "key-1".to_string())]);
        assert_eq!(sent[0].timeout, Duration::from_secs(30));
    }

    #[test]
    fn fetch_usage_missing_field_is_zero() {
        let client = TestClient::new();
        client.respond(200, r#"{"name": "bob"}"#);
        let api = HttpParentApi::new(&config(), &client);
        assert_eq!(api.fetch_usage(&Uuid::new_v4()).unwrap(), Some(0.0));
    }

    #[test]
    fn fetch_usage_not_found() {
        let client = TestClient::new();
        client.respond(404, "");
        let api = HttpParentApi::new(&config(), &client);
        assert_eq!(api.fetch_usage(&Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn fetch_usage_server_error() {
        let client = TestClient::new();
        client.respond(503, "maintenance");
        client.fail(SyncError::Timeout);
        let api = HttpParentApi::new(&config(), &client);

        let err = api.fetch_usage(&Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, SyncError::HttpStatus { status: 503, .. }));
        assert!(matches!(
            api.fetch_usage(&Uuid::new_v4()),
            Err(SyncError::Timeout)
        ));
    }

    #[test]
    fn update_usage_sends_patch() {
        let client = TestClient::new();
        client.respond(200, "{}");
        let api = HttpParentApi::new(&config(), &client);
        let uuid = Uuid::new_v4();

        api.update_usage(&uuid, 3.25).unwrap();

        let sent = client.requests();
        assert_eq!(sent[0].method, HttpMethod::Patch);
        let body: serde_json::Value = serde_json::from_slice(sent[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({"current_usage_GB": 3.25}));
    }

    #[test]
    fn update_usage_truncates_error_body() {
        let client = TestClient::new();
        client.respond(400, &"x".repeat(1000));
        let api = HttpParentApi::new(&config(), &client);

        match api.update_usage(&Uuid::new_v4(), 1.0) {
            Err(SyncError::HttpStatus { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body.len(), 200);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn list_users_uses_bulk_timeout() {
        let client = TestClient::new();
        let uuid = Uuid::new_v4();
        client.respond(
            200,
            &format!(
                r#"[{{"uuid": "{uuid}", "name": "carol", "usage_limit_GB": 10,
                    "package_days": 30, "mode": "no_reset", "enable": 1}}]"#
            ),
        );
        let api = HttpParentApi::new(&config(), &client);

        let users = api.list_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].uuid, uuid);
        assert!(users[0].enable);

        let sent = client.requests();
        assert_eq!(
            sent[0].url,
            "https://panel.example.com/secret/api/v2/admin/user/"
        );
        assert_eq!(sent[0].timeout, Duration::from_secs(60));
    }

    #[test]
    fn list_users_rejects_bad_schema() {
        let client = TestClient::new();
        client.respond(200, r#"[{"uuid": "not-a-uuid"}]"#);
        let api = HttpParentApi::new(&config(), &client);
        assert!(matches!(api.list_users(), Err(SyncError::Decode(_))));
    }
}
