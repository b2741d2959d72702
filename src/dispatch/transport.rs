use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;

use crate::error::TransportError;
use crate::format::{Body, Headers, ResponseDescription, form_encode, query_pairs};

/// A request as the transport sends it. GET requests carry their payload
/// in the query string. Other methods send it as the body, encoded after the
/// declared `Content-Type`: form-urlencoded structures are form encoded,
/// string payloads go out verbatim and everything else is JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    /// Query parameters for GET, the body otherwise.
    pub payload: Option<Value>,
}

impl OutgoingRequest {
    /// Request without headers or payload.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            payload: None,
        }
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// What came back, read fully into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: Headers,
    pub body: String,
}

impl RawResponse {
    /// Body parsed as JSON, when it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Response as written to the history. The body is kept as raw text.
    pub fn describe(&self) -> ResponseDescription {
        let mut description = ResponseDescription::new(self.status).headers(self.headers.clone());
        description.reason = self.reason.clone();
        description.body = if self.body.is_empty() {
            Body::Empty
        } else {
            Body::Text(self.body.clone())
        };
        description
    }
}

/// Sends outbound endpoint calls. Non-2xx responses are errors.
pub trait HttpTransport: Send + Sync {
    fn send(
        &self,
        request: OutgoingRequest,
    ) -> impl Future<Output = Result<RawResponse, TransportError>> + Send;
}

/// Timeouts for the outbound client, the `[http]` config table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Seconds.
    pub connect_timeout: u64,
    /// Seconds.
    pub timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 10,
            timeout: 120,
        }
    }
}

/// [`HttpTransport`] backed by a shared `reqwest` client.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Client with the configured connect and total timeouts.
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self { client })
    }

    /// Wraps a preconfigured client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, TransportError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, values) in request.headers.iter() {
            for value in values {
                builder = builder.header(name, value);
            }
        }
        if let Some(payload) = &request.payload {
            builder = if request.method == Method::GET {
                builder.query(&query_pairs(payload))
            } else if is_form(request.headers.content_type().as_deref()) {
                builder.body(form_encode(payload))
            } else if let Value::String(text) = payload {
                builder.body(text.clone())
            } else {
                builder.json(payload)
            };
        }

        let response = builder.send().await?;
        let status = response.status();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: request.url,
                body,
            });
        }

        Ok(RawResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
            headers,
            body,
        })
    }
}

fn is_form(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}
