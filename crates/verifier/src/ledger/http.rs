//! 원격 HTTP 원장 클라이언트
//!
//! - `POST {endpoint}/records` : 페이로드 제출, 응답 `{"ledger_ref": "..."}`
//! - `GET {endpoint}/records/{ref}` : 레코드 상태 조회
//!
//! 4xx 응답은 `Rejected`, 5xx/연결 실패/타임아웃은 `Unavailable`로 분류합니다.
//! 408과 429는 일시적 상태로 보고 `Unavailable`로 분류합니다.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use scanguard_core::config::LedgerConfig;

use super::{LedgerClient, LedgerPayload, LedgerRecord, LedgerRecordStatus, LedgerRef};
use crate::error::{LedgerError, VerifierError};

/// 제출 요청 본문
#[derive(Serialize)]
struct SubmitRequest<'a> {
    content_hash: &'a str,
    payload: &'a LedgerPayload,
}

/// 제출 응답 본문
#[derive(Deserialize)]
struct SubmitResponse {
    ledger_ref: String,
}

/// 조회 응답 본문
#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    status: Option<LedgerRecordStatus>,
    #[serde(default)]
    content_hash: Option<String>,
}

/// 원격 HTTP 원장 클라이언트
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpLedgerClient {
    /// 엔드포인트와 API 키로 클라이언트를 생성합니다.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, VerifierError> {
        Self::with_builder(reqwest::Client::builder().timeout(timeout), endpoint, api_key)
    }

    fn with_builder(
        builder: reqwest::ClientBuilder,
        endpoint: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, VerifierError> {
        let endpoint = endpoint.into().trim_end_matches('/').to_owned();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(VerifierError::Config {
                field: "ledger.endpoint".to_owned(),
                reason: format!("'{endpoint}' is not an http(s) URL"),
            });
        }

        let client = builder
            .build()
            .map_err(|e| VerifierError::Config {
                field: "ledger".to_owned(),
                reason: format!("failed to build http client: {e}"),
            })?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.filter(|key| !key.is_empty()),
        })
    }

    /// `[ledger]` 설정에서 클라이언트를 생성합니다.
    pub fn from_config(config: &LedgerConfig) -> Result<Self, VerifierError> {
        Self::new(
            config.endpoint.clone(),
            Some(config.api_key.clone()),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// 정규화된 엔드포인트
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

fn transport_error(e: reqwest::Error) -> LedgerError {
    if e.is_timeout() {
        LedgerError::Unavailable(format!("request timed out: {e}"))
    } else if e.is_connect() {
        LedgerError::Unavailable(format!("connection failed: {e}"))
    } else {
        LedgerError::Unavailable(e.to_string())
    }
}

async fn status_error(response: reqwest::Response) -> LedgerError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };

    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        LedgerError::Unavailable(message)
    } else if status.is_client_error() {
        LedgerError::Rejected(message)
    } else {
        LedgerError::Unavailable(message)
    }
}

impl LedgerClient for HttpLedgerClient {
    async fn submit(&self, payload: &LedgerPayload) -> Result<LedgerRef, LedgerError> {
        let content_hash = payload.content_hash()?;
        let url = format!("{}/records", self.endpoint);
        debug!(url = %url, incident_id = %payload.incident_id, "submitting ledger record");

        let request = self
            .client
            .post(&url)
            .header("Idempotency-Key", content_hash.as_str())
            .json(&SubmitRequest {
                content_hash: &content_hash,
                payload,
            });

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("unreadable ledger response: {e}")))?;
        Ok(LedgerRef(body.ledger_ref))
    }

    async fn query(&self, ledger_ref: &LedgerRef) -> Result<LedgerRecord, LedgerError> {
        let url = format!("{}/records/{}", self.endpoint, ledger_ref);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(LedgerError::NotFound(ledger_ref.to_string()));
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("unreadable ledger response: {e}")))?;
        Ok(LedgerRecord {
            ledger_ref: ledger_ref.clone(),
            status: body.status.unwrap_or(LedgerRecordStatus::Pending),
            content_hash: body.content_hash,
        })
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    /// 요청 하나를 받아 고정 응답을 돌려주는 서버. 받은 요청 원문을 반환합니다.
    async fn one_shot_server(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
            String::from_utf8_lossy(&raw).into_owned()
        });

        (format!("http://{addr}"), handle)
    }

    fn payload() -> LedgerPayload {
        LedgerPayload {
            incident_id: "i-1".to_owned(),
            product_code: "P1".to_owned(),
            reason: "scan_anomaly".to_owned(),
            scan_count: 12,
            location_summary: vec!["a".to_owned()],
            detected_at: 1_700_000_000,
        }
    }

    fn client(endpoint: &str) -> HttpLedgerClient {
        // 환경의 프록시 설정이 로컬 서버 요청을 가로채지 않도록 함
        let builder = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5));
        HttpLedgerClient::with_builder(builder, endpoint, Some("secret-token".to_owned())).unwrap()
    }

    #[test]
    fn new_rejects_non_http_endpoint() {
        let err = HttpLedgerClient::new("ledger.local", None, Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("ledger.endpoint"));
    }

    #[test]
    fn new_trims_trailing_slash() {
        let client = HttpLedgerClient::new("https://ledger.example.com/api/", None, Duration::from_secs(1))
            .unwrap();
        assert_eq!(client.endpoint(), "https://ledger.example.com/api");
    }

    #[tokio::test]
    async fn submit_posts_payload_with_bearer() {
        let (endpoint, server) = one_shot_server("201 Created", r#"{"ledger_ref":"tx-42"}"#).await;

        let ledger_ref = client(&endpoint).submit(&payload()).await.unwrap();
        assert_eq!(ledger_ref.as_str(), "tx-42");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /records HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret-token"));
        assert!(request.contains(&payload().content_hash().unwrap()));
        assert!(request.contains(r#""product_code":"P1""#));
    }

    #[tokio::test]
    async fn client_error_is_rejected() {
        let (endpoint, server) = one_shot_server("422 Unprocessable Entity", r#"{"error":"schema"}"#).await;
        let err = client(&endpoint).submit(&payload()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(ref msg) if msg.contains("schema")));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let (endpoint, server) = one_shot_server("503 Service Unavailable", "").await;
        let err = client(&endpoint).submit(&payload()).await.unwrap_err();
        assert!(err.is_retryable());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rate_limit_is_unavailable() {
        let (endpoint, server) = one_shot_server("429 Too Many Requests", "").await;
        let err = client(&endpoint).submit(&payload()).await.unwrap_err();
        assert!(err.is_retryable());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}"))
            .submit(&payload())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn query_reads_status() {
        let (endpoint, server) = one_shot_server(
            "200 OK",
            r#"{"ledger_ref":"tx-42","status":"final","content_hash":"abc"}"#,
        )
        .await;

        let record = client(&endpoint)
            .query(&LedgerRef("tx-42".to_owned()))
            .await
            .unwrap();
        assert_eq!(record.status, LedgerRecordStatus::Final);
        assert_eq!(record.content_hash.as_deref(), Some("abc"));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /records/tx-42 HTTP/1.1"));
    }

    #[tokio::test]
    async fn query_missing_is_not_found() {
        let (endpoint, server) = one_shot_server("404 Not Found", "").await;
        let err = client(&endpoint)
            .query(&LedgerRef("tx-0".to_owned()))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        server.await.unwrap();
    }
}
