//! HTTP client for the glucolog cloud API.
//!
//! The engine never constructs raw requests; this client owns URLs, auth
//! headers, and response decoding, and exposes one method per named remote
//! operation.

use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;

use crate::error::{ConnectError, Result};
use crate::types::{ApiErrorResponse, CreateReadingRequest, ProfileDto, ReadingDto, ReadingListResponse};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Client for the glucolog cloud API.
#[derive(Debug, Clone)]
pub struct ConnectClient {
    client: reqwest::Client,
    base_url: String,
}

impl ConnectClient {
    /// Create a new API client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the cloud API (e.g.,
    ///   "https://api.glucolog.app")
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create headers for an API request.
    fn headers(&self, token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ConnectError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            // Try to parse error response
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(ConnectError::api(
                    status.as_u16(),
                    format!("{}: {}", error.code, error.message),
                ));
            }
            return Err(ConnectError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "Failed to deserialize response. Body: {}, Error: {}",
                body,
                e
            );
            ConnectError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    /// Submit a reading.
    ///
    /// POST /api/v1/readings
    pub async fn create_reading(
        &self,
        token: &str,
        request: &CreateReadingRequest,
    ) -> Result<ReadingDto> {
        let url = format!("{}/api/v1/readings", self.base_url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers(token)?)
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// The caller's full reading set.
    ///
    /// GET /api/v1/readings/mine
    pub async fn list_my_readings(&self, token: &str) -> Result<Vec<ReadingDto>> {
        let url = format!("{}/api/v1/readings/mine", self.base_url);

        let response = self
            .client
            .get(&url)
            .headers(self.headers(token)?)
            .send()
            .await?;

        let list: ReadingListResponse = Self::parse_response(response).await?;
        Ok(list.readings)
    }

    /// The most recent readings.
    ///
    /// GET /api/v1/readings/latest?limit={n}
    pub async fn list_latest_readings(&self, token: &str, limit: usize) -> Result<Vec<ReadingDto>> {
        let url = format!("{}/api/v1/readings/latest", self.base_url);

        let response = self
            .client
            .get(&url)
            .headers(self.headers(token)?)
            .query(&[("limit", limit.to_string())])
            .send()
            .await?;

        let list: ReadingListResponse = Self::parse_response(response).await?;
        Ok(list.readings)
    }

    /// Refresh gamification/profile data.
    ///
    /// GET /api/v1/profile
    pub async fn get_profile(&self, token: &str) -> Result<ProfileDto> {
        let url = format!("{}/api/v1/profile", self.base_url);

        let response = self
            .client
            .get(&url)
            .headers(self.headers(token)?)
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use glucolog_core::readings::{MealContext, ReadingUnit};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        request_line: String,
        authorization: Option<String>,
    }

    #[derive(Debug, Clone)]
    struct MockResponse {
        status: u16,
        body: String,
    }

    fn api_error_body(code: &str, message: &str) -> String {
        format!(r#"{{"code":"{}","message":"{}"}}"#, code, message)
    }

    fn reading_body(id: i64, value: f64) -> String {
        format!(
            r#"{{"id":{},"value":{:.1},"unit":"mg_dl","recordedAt":"2026-03-01T08:00:00Z","context":"fasting"}}"#,
            id, value
        )
    }

    fn header_end_offset(buffer: &[u8]) -> Option<usize> {
        buffer.windows(4).position(|window| window == b"\r\n\r\n")
    }

    async fn read_http_request(
        stream: &mut tokio::net::TcpStream,
    ) -> Option<(String, HashMap<String, String>)> {
        let mut buffer = Vec::new();
        loop {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if header_end_offset(&buffer).is_some() {
                break;
            }
        }

        let header_end = header_end_offset(&buffer)?;
        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let mut lines = head.lines();
        let request_line = lines.next()?.to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        let mut body_read = buffer.len().saturating_sub(header_end + 4);
        while body_read < content_length {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                break;
            }
            body_read = body_read.saturating_add(read);
        }

        Some((request_line, headers))
    }

    fn status_text(status: u16) -> &'static str {
        match status {
            200 => "OK",
            201 => "Created",
            400 => "Bad Request",
            401 => "Unauthorized",
            500 => "Internal Server Error",
            _ => "Error",
        }
    }

    async fn write_http_response(
        stream: &mut tokio::net::TcpStream,
        status: u16,
        body: &str,
    ) -> std::io::Result<()> {
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            status_text(status),
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await
    }

    async fn start_mock_server(
        responses: Vec<MockResponse>,
    ) -> (
        String,
        Arc<TokioMutex<Vec<CapturedRequest>>>,
        tokio::task::JoinHandle<()>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let captured = Arc::new(TokioMutex::new(Vec::<CapturedRequest>::new()));
        let scripted = Arc::new(TokioMutex::new(VecDeque::from(responses)));
        let captured_clone = Arc::clone(&captured);
        let scripted_clone = Arc::clone(&scripted);

        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(value) => value,
                    Err(_) => break,
                };
                let captured_inner = Arc::clone(&captured_clone);
                let scripted_inner = Arc::clone(&scripted_clone);
                tokio::spawn(async move {
                    let Some((request_line, headers)) = read_http_request(&mut stream).await
                    else {
                        return;
                    };
                    captured_inner.lock().await.push(CapturedRequest {
                        request_line,
                        authorization: headers.get("authorization").cloned(),
                    });

                    let response =
                        scripted_inner
                            .lock()
                            .await
                            .pop_front()
                            .unwrap_or(MockResponse {
                                status: 500,
                                body: api_error_body("INTERNAL", "unexpected request"),
                            });
                    let _ = write_http_response(&mut stream, response.status, &response.body).await;
                });
            }
        });

        (format!("http://{}", addr), captured, handle)
    }

    fn create_request() -> CreateReadingRequest {
        CreateReadingRequest {
            value: 150.0,
            unit: ReadingUnit::MgDl,
            recorded_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            notes: None,
            context: MealContext::Fasting,
        }
    }

    #[tokio::test]
    async fn create_reading_decodes_accepted_record() {
        let (base_url, captured, server) = start_mock_server(vec![MockResponse {
            status: 201,
            body: reading_body(999, 150.0),
        }])
        .await;

        let client = ConnectClient::new(&base_url);
        let dto = client
            .create_reading("token-1", &create_request())
            .await
            .expect("create success");

        assert_eq!(dto.id, 999);
        assert_eq!(dto.value, 150.0);
        let requests = captured.lock().await.clone();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].request_line.starts_with("POST /api/v1/readings"));
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer token-1"));

        server.abort();
    }

    #[tokio::test]
    async fn api_error_body_is_decoded_into_the_envelope() {
        let (base_url, _captured, server) = start_mock_server(vec![MockResponse {
            status: 500,
            body: api_error_body("INTERNAL", "database on fire"),
        }])
        .await;

        let client = ConnectClient::new(&base_url);
        let err = client
            .create_reading("token", &create_request())
            .await
            .expect_err("must fail");

        match err {
            ConnectError::Api { status, message } => {
                assert_eq!(status, 500);
                assert!(message.contains("INTERNAL"));
                assert!(message.contains("database on fire"));
            }
            other => panic!("expected Api error, got {:?}", other),
        }

        server.abort();
    }

    #[tokio::test]
    async fn unauthorized_response_classifies_as_reauth() {
        let (base_url, _captured, server) = start_mock_server(vec![MockResponse {
            status: 401,
            body: api_error_body("UNAUTHORIZED", "token expired"),
        }])
        .await;

        let client = ConnectClient::new(&base_url);
        let err = client
            .list_my_readings("stale-token")
            .await
            .expect_err("must fail");

        assert_eq!(
            err.retry_class(),
            glucolog_core::errors::SyncRetryClass::ReauthRequired
        );
        server.abort();
    }

    #[tokio::test]
    async fn list_latest_passes_limit_and_decodes_list() {
        let (base_url, captured, server) = start_mock_server(vec![MockResponse {
            status: 200,
            body: format!(
                r#"{{"readings":[{},{}]}}"#,
                reading_body(1, 95.0),
                reading_body(2, 180.0)
            ),
        }])
        .await;

        let client = ConnectClient::new(&base_url);
        let readings = client
            .list_latest_readings("token", 25)
            .await
            .expect("list success");

        assert_eq!(readings.len(), 2);
        let requests = captured.lock().await.clone();
        assert!(requests[0]
            .request_line
            .starts_with("GET /api/v1/readings/latest?limit=25"));

        server.abort();
    }
}
