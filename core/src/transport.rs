//! The HTTP transport seam.
//!
//! # Design
//! `Transport` is the only component that performs I/O. It receives a fully
//! shaped `HttpRequest`, the cancellation handle issued for this attempt and
//! the per-call timeout, and either returns the response (any status code) or
//! a `TransportError` describing why no response arrived.
//!
//! `ReqwestTransport` holds one pooled `reqwest::Client` and applies the
//! timeout per request. The exchange future is raced against the
//! cancellation token; when the token fires the future is dropped, which
//! closes the connection and abandons the exchange on the wire.

use std::error::Error as _;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{TransportError, TransportErrorKind};
use crate::http::{Body, HttpMethod, HttpRequest, HttpResponse};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute `request`, honouring `cancel` and `timeout`.
    async fn send(
        &self,
        request: HttpRequest,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}

/// `Transport` backed by a shared `reqwest` client.
///
/// Cloning is cheap and clones share the connection pool.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client, e.g. with proxies or custom TLS roots.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn exchange(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(timeout)
            .query(&request.params);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        builder = match request.body {
            Some(Body::Json(value)) => builder.body(
                serde_json::to_vec(&value)
                    .map_err(|e| TransportError::new(TransportErrorKind::Other, e.to_string()))?,
            ),
            Some(Body::Form(encoded)) => builder.body(encoded),
            None => builder,
        };

        // 4xx/5xx come back as data; status interpretation belongs to the pipeline.
        let response = builder.send().await.map_err(|e| classify(e, timeout))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v.to_string())))
            .collect();
        let body = response.text().await.map_err(|e| classify(e, timeout))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::aborted());
        }
        trace!(method = %request.method, url = %request.url, "reqwest dispatch");
        let url = request.url.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%url, "exchange dropped on cancellation");
                Err(TransportError::aborted())
            }
            result = self.exchange(request, timeout) => result,
        }
    }
}

fn timed_out(timeout: Duration) -> TransportError {
    TransportError::timeout(format!("timeout of {}ms exceeded", timeout.as_millis()))
}

/// Map a `reqwest` failure onto the pipeline's transport taxonomy.
fn classify(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        return timed_out(timeout);
    }
    if error.is_connect() {
        return TransportError::network(error.to_string());
    }
    match io_source(&error) {
        Some(io_error) => classify_io(io_error, timeout),
        None => TransportError::new(TransportErrorKind::Other, error.to_string()),
    }
}

/// First `io::Error` in the source chain of `error`.
fn io_source(error: &reqwest::Error) -> Option<&io::Error> {
    let mut source = error.source();
    while let Some(err) = source {
        if let Some(io_error) = err.downcast_ref::<io::Error>() {
            return Some(io_error);
        }
        source = err.source();
    }
    None
}

fn classify_io(error: &io::Error, timeout: Duration) -> TransportError {
    match error.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => timed_out(timeout),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => TransportError::network(error.to_string()),
        _ => TransportError::new(TransportErrorKind::Other, error.to_string()),
    }
}
