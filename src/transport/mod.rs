//! HTTP transport: one request, one response, no interpretation.
//!
//! The [`Transport`] trait is the single seam between the bridge and the
//! network. It executes exactly one HTTP round-trip per call, honors the
//! call's [`CancellationHandle`], and hands every response back untouched —
//! non-2xx statuses included. Error normalization belongs to the provider
//! plugin and retry belongs to the layer above; the transport does neither.
//!
//! [`ReqwestTransport`] is the production implementation. Tests inject their
//! own `Transport` to replay recorded vendor fixtures without a network.

pub mod interceptor;
pub mod redaction;
pub mod retry;

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::cancel::CancellationHandle;
use crate::error::{CancelStage, Error, Result};

/// A lazily produced sequence of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Request body forms accepted by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Text(String),
    Bytes(Vec<u8>),
}

impl RequestBody {
    /// The body as UTF-8 text, when it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RequestBody::Text(s) => Some(s),
            RequestBody::Bytes(_) => None,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            RequestBody::Text(s) => s.into_bytes(),
            RequestBody::Bytes(b) => b,
        }
    }
}

/// One outgoing HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "POST".into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Attach a JSON body and the matching content type.
    pub fn json(mut self, value: &serde_json::Value) -> Self {
        self.headers
            .insert("content-type".into(), "application/json".into());
        self.body = Some(RequestBody::Text(value.to_string()));
        self
    }

    /// Reject malformed URLs and methods before dispatch.
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.url)
            .map_err(|e| Error::validation(format!("malformed url {:?}: {e}", self.url)))?;
        reqwest::Method::from_bytes(self.method.as_bytes())
            .map_err(|_| Error::validation(format!("malformed method {:?}", self.method)))?;
        Ok(())
    }
}

/// One complete HTTP response with a fully drained body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Header lookup, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == lower)
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn body_json(&self) -> Result<serde_json::Value> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::streaming(format!("response body is not valid JSON: {e}")))
    }
}

/// Executes HTTP requests. Implementations must not retry and must not
/// interpret status codes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a request and drain the body.
    async fn fetch(
        &self,
        request: HttpRequest,
        cancel: &CancellationHandle,
    ) -> Result<HttpResponse>;

    /// Execute a request and expose the body as a lazy byte stream. The
    /// stream truncates when `cancel` fires mid-body.
    async fn stream(
        &self,
        request: HttpRequest,
        cancel: &CancellationHandle,
    ) -> Result<(u16, BTreeMap<String, String>, ByteStream)>;
}

/// Production transport over a shared `reqwest::Client`.
///
/// The client is built without a request timeout: deadlines are enforced by
/// the call-scoped cancellation handle so that per-call and per-provider
/// timeouts resolve in one place.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn dispatch(
        &self,
        request: HttpRequest,
        cancel: &CancellationHandle,
    ) -> Result<reqwest::Response> {
        request.validate()?;
        if cancel.is_cancelled() {
            return Err(Error::cancelled(CancelStage::Execution));
        }

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| Error::validation(format!("malformed method {:?}", request.method)))?;
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body.into_bytes());
        }

        tokio::select! {
            result = builder.send() => result.map_err(Error::from),
            _ = cancel.cancelled() => Err(Error::cancelled(CancelStage::Execution)),
        }
    }
}

fn collect_headers(response: &reqwest::Response) -> BTreeMap<String, String> {
    response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch(
        &self,
        request: HttpRequest,
        cancel: &CancellationHandle,
    ) -> Result<HttpResponse> {
        let response = self.dispatch(request, cancel).await?;
        let status = response.status().as_u16();
        let status_text = response
            .status()
            .canonical_reason()
            .unwrap_or_default()
            .to_string();
        let headers = collect_headers(&response);

        let body = tokio::select! {
            bytes = response.bytes() => bytes.map_err(Error::from)?.to_vec(),
            _ = cancel.cancelled() => return Err(Error::cancelled(CancelStage::Execution)),
        };

        Ok(HttpResponse {
            status,
            status_text,
            headers,
            body,
        })
    }

    async fn stream(
        &self,
        request: HttpRequest,
        cancel: &CancellationHandle,
    ) -> Result<(u16, BTreeMap<String, String>, ByteStream)> {
        let response = self.dispatch(request, cancel).await?;
        let status = response.status().as_u16();
        let headers = collect_headers(&response);

        let cancel = cancel.clone();
        let bytes = response.bytes_stream();
        // take_until truncates the body without yielding an error item.
        let stream = bytes
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(Error::from))
            .take_until(Box::pin(async move { cancel.cancelled().await }));

        Ok((status, headers, Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder_and_validation() {
        let req = HttpRequest::post("https://api.openai.com/v1/responses")
            .header("authorization", "Bearer key")
            .json(&serde_json::json!({"model": "gpt-4o"}));
        assert_eq!(req.method, "POST");
        assert_eq!(req.headers["content-type"], "application/json");
        assert!(req.validate().is_ok());

        let bad_url = HttpRequest::post("not a url");
        assert!(matches!(bad_url.validate(), Err(Error::Validation(_))));

        let bad_method = HttpRequest {
            method: "P OST".into(),
            ..HttpRequest::post("https://example.com")
        };
        assert!(matches!(bad_method.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_response_header_case_insensitive() {
        let mut headers = BTreeMap::new();
        headers.insert("Retry-After".to_string(), "20".to_string());
        let response = HttpResponse {
            status: 429,
            status_text: "Too Many Requests".into(),
            headers,
            body: Vec::new(),
        };
        assert_eq!(response.header("retry-after"), Some("20"));
        assert_eq!(response.header("RETRY-AFTER"), Some("20"));
        assert_eq!(response.header("missing"), None);
        assert!(!response.is_success());
    }

    #[test]
    fn test_body_json() {
        let response = HttpResponse {
            status: 200,
            status_text: "OK".into(),
            headers: BTreeMap::new(),
            body: br#"{"ok": true}"#.to_vec(),
        };
        assert_eq!(response.body_json().unwrap()["ok"], true);

        let broken = HttpResponse {
            body: b"not json".to_vec(),
            ..response
        };
        assert!(matches!(broken.body_json(), Err(Error::Streaming(_))));
    }

    #[test]
    fn test_fetch_rejects_cancelled_before_dispatch() {
        tokio_test::block_on(async {
            let transport = ReqwestTransport::new();
            let cancel = CancellationHandle::new();
            cancel.cancel();
            let err = transport
                .fetch(HttpRequest::get("https://example.com"), &cancel)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Cancelled { .. }));
        });
    }
}
