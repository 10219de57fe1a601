//! Origin HTTP capability
//!
//! An origin call yields a typed event stream: status, headers, body
//! chunks, then a single terminal event. The stream is only advanced when
//! the relay polls it, so body reads are paced by tunnel writes.

use crate::config::OriginConfig;
use crate::session::PendingRequest;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::Method;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginEvent {
    Status { code: u16, reason: String },
    Headers(Vec<(String, String)>),
    Body(Bytes),
    /// The response body was read to the end.
    Complete,
    /// The call failed before or during the response.
    Failed(String),
}

impl OriginEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OriginEvent::Status { .. } => "status",
            OriginEvent::Headers(_) => "headers",
            OriginEvent::Body(_) => "body chunk",
            OriginEvent::Complete => "completion",
            OriginEvent::Failed(_) => "failure",
        }
    }
}

/// Dropping the stream abandons the call and releases its connection.
pub type OriginEvents = BoxStream<'static, OriginEvent>;

pub trait HttpOrigin: Send + Sync + 'static {
    fn call(&self, request: PendingRequest) -> OriginEvents;
}

/// [`HttpOrigin`] backed by a pooled `reqwest` client.
#[derive(Clone)]
pub struct ReqwestOrigin {
    client: reqwest::Client,
}

impl ReqwestOrigin {
    pub fn new(config: &OriginConfig) -> crank_shared::Result<Self> {
        let redirects = if config.follow_redirects {
            Policy::default()
        } else {
            Policy::none()
        };
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .redirect(redirects);
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if config.title_case_headers {
            builder = builder.http1_title_case_headers();
        }
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| crank_shared::Error::Origin(root_cause(&e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpOrigin for ReqwestOrigin {
    fn call(&self, request: PendingRequest) -> OriginEvents {
        let client = self.client.clone();
        Box::pin(async_stream::stream! {
            let builder = match prepare(&client, &request) {
                Ok(builder) => builder,
                Err(reason) => {
                    yield OriginEvent::Failed(reason);
                    return;
                }
            };
            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    yield OriginEvent::Failed(root_cause(&e));
                    return;
                }
            };

            debug!(url = %request.url, status = response.status().as_u16(), "Origin responded");
            yield OriginEvent::Status {
                code: response.status().as_u16(),
                reason: reason_phrase(&response),
            };
            yield OriginEvent::Headers(response_headers(response.headers()));

            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        yield OriginEvent::Body(bytes);
                    }
                    Err(e) => {
                        yield OriginEvent::Failed(root_cause(&e));
                        return;
                    }
                }
            }
            yield OriginEvent::Complete;
        })
    }
}

fn prepare(client: &reqwest::Client, request: &PendingRequest) -> Result<reqwest::RequestBuilder, String> {
    let method = Method::from_bytes(request.method.as_bytes())
        .map_err(|_| format!("Invalid method {:?}", request.method))?;

    let mut headers = HeaderMap::with_capacity(request.headers.len());
    for (name, value) in &request.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| format!("Invalid header name {:?}", name))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| format!("Invalid value for header {:?}", name))?;
        headers.append(header_name, header_value);
    }

    Ok(client.request(method, request.url.clone()).headers(headers))
}

/// Prefer the phrase the origin actually sent; hyper only records it when
/// it differs from the canonical one.
fn reason_phrase(response: &reqwest::Response) -> String {
    response
        .extensions()
        .get::<hyper::ext::ReasonPhrase>()
        .and_then(|reason| std::str::from_utf8(reason.as_bytes()).ok())
        .or_else(|| response.status().canonical_reason())
        .unwrap_or_default()
        .to_string()
}

fn response_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Innermost message of an error chain, e.g. "Connection refused (os error 111)".
fn root_cause(err: &(dyn std::error::Error + 'static)) -> String {
    let mut cause = err;
    while let Some(source) = cause.source() {
        cause = source;
    }
    cause.to_string()
}
