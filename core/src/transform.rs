//! Request/response transform hooks.
//!
//! # Design
//! `Transform` is a set of hook points the client invokes at fixed places in
//! every call. Each method has a pass-through default, so an implementation
//! overrides only the hooks it cares about and an absent hook is simply the
//! default body.
//!
//! Call order:
//! 1. `before_request` once per call, before registration and dispatch.
//! 2. `response_interceptor` on each successful transport round-trip.
//! 3. `response_error` on each failed round-trip; may resubmit via the client.
//! 4. `transform_response` once, on the final response.
//! 5. `request_catch` once, if the call still failed after step 3.
//!
//! `DefaultTransform` implements the standard behaviour: URL prefixing,
//! cache-busting timestamps, bearer tokens, envelope unwrapping and
//! transport-error classification with retry-on-timeout.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{Call, Client};
use crate::credentials::CredentialStore;
use crate::error::{
    Error, Result, TransportErrorKind, EMPTY_RESPONSE_MESSAGE, NETWORK_MESSAGE, TIMEOUT_MESSAGE,
};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::options::EffectiveOptions;
use crate::retry;

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
}

/// Query parameter carrying the cache-busting timestamp.
pub const TIMESTAMP_PARAM: &str = "_t";

/// What a call resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// The untouched transport response.
    Response(HttpResponse),
    /// The decoded body, or the `result` of a success envelope.
    Data(Value),
    /// A failed envelope swallowed because the caller opted into it.
    Empty,
}

impl Output {
    pub fn into_data(self) -> Option<Value> {
        match self {
            Output::Data(value) => Some(value),
            Output::Response(response) => Some(decode_body(&response.body)),
            Output::Empty => None,
        }
    }

    /// Deserialise the payload into `T`. `Empty` yields `None`.
    pub fn json<T: DeserializeOwned>(self) -> Result<Option<T>> {
        self.into_data()
            .map(|value| {
                serde_json::from_value(value).map_err(|e| Error::Deserialization(e.to_string()))
            })
            .transpose()
    }
}

/// Decode a body as JSON, falling back to a plain string. Empty is `null`.
pub fn decode_body(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

#[async_trait]
pub trait Transform: Send + Sync {
    /// Shape the request before it is registered and dispatched.
    fn before_request(&self, request: HttpRequest, _options: &EffectiveOptions) -> HttpRequest {
        request
    }

    /// Final mapping of an error the call is about to fail with.
    fn request_catch(&self, error: Error, _options: &EffectiveOptions) -> Error {
        error
    }

    fn response_interceptor(&self, response: HttpResponse) -> HttpResponse {
        response
    }

    /// Turn the final response into the call's output.
    fn transform_response(
        &self,
        response: HttpResponse,
        _options: &EffectiveOptions,
    ) -> Result<Output> {
        Ok(Output::Response(response))
    }

    /// React to a failed round-trip. Returning `Ok` recovers the call.
    async fn response_error(
        &self,
        _client: &Client,
        _call: Call,
        error: Error,
    ) -> Result<HttpResponse> {
        Err(error)
    }
}

/// A transform with every hook left at its default.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl Transform for PassThrough {}

/// Status codes carried inside response envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeCodes {
    pub success: i64,
    pub unauthorized: i64,
}

impl Default for EnvelopeCodes {
    fn default() -> Self {
        Self {
            success: 0,
            unauthorized: 401,
        }
    }
}

pub struct DefaultTransform {
    credentials: Arc<dyn CredentialStore>,
    codes: EnvelopeCodes,
}

impl DefaultTransform {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            credentials,
            codes: EnvelopeCodes::default(),
        }
    }

    pub fn with_codes(mut self, codes: EnvelopeCodes) -> Self {
        self.codes = codes;
        self
    }

    /// Integral codes only; `0`, `0.0` and `"0"` all read as `0`.
    fn envelope_code(data: &Value) -> Option<i64> {
        match data.get("code")? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(integral))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl Transform for DefaultTransform {
    fn before_request(&self, mut request: HttpRequest, options: &EffectiveOptions) -> HttpRequest {
        if options.join_prefix {
            if let Some(prefix) = &options.url_prefix {
                request.url = format!("{prefix}{}", request.url);
            }
        }
        if let Some(api_url) = &options.api_url {
            request.url = format!("{api_url}{}", request.url);
        }

        if options.join_time && request.method == HttpMethod::Get {
            request.params.retain(|(k, _)| k != TIMESTAMP_PARAM);
            request.params.push((
                TIMESTAMP_PARAM.to_string(),
                Utc::now().timestamp_millis().to_string(),
            ));
        }

        // An explicit Authorization header on the request is left alone.
        if options.with_token && !request.headers.contains("authorization") {
            if let Some(token) = self.credentials.get() {
                request.headers.insert(
                    "Authorization",
                    format!("{}{token}", options.authentication_scheme),
                );
            }
        }

        request
    }

    fn transform_response(
        &self,
        response: HttpResponse,
        options: &EffectiveOptions,
    ) -> Result<Output> {
        if options.is_return_native_response {
            return Ok(Output::Response(response));
        }
        if !options.is_transform_response {
            return Ok(Output::Data(decode_body(&response.body)));
        }

        let data = decode_body(&response.body);
        if data.is_null() {
            return Err(Error::EmptyResponse);
        }

        let code = Self::envelope_code(&data);
        if code == Some(self.codes.success) {
            return Ok(Output::Data(data.get("result").cloned().unwrap_or(Value::Null)));
        }

        if code == Some(self.codes.unauthorized) {
            warn!("unauthorized response, clearing stored credentials");
            self.credentials.clear();
        }

        if let Some(on_error) = &options.on_error {
            on_error.call(&data);
        }

        if options.is_catch_error {
            debug!(?code, "failed envelope swallowed");
            return Ok(Output::Empty);
        }

        let message = data
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(EMPTY_RESPONSE_MESSAGE)
            .to_string();
        Err(Error::Envelope { code, message })
    }

    async fn response_error(
        &self,
        client: &Client,
        call: Call,
        error: Error,
    ) -> Result<HttpResponse> {
        let Error::Transport(transport) = &error else {
            return Err(error);
        };

        if retry::should_retry(&call, &error) {
            return retry::maybe_retry(client, call, error).await;
        }

        let message = match transport.kind {
            TransportErrorKind::Timeout => TIMEOUT_MESSAGE.to_string(),
            TransportErrorKind::Network => NETWORK_MESSAGE.to_string(),
            _ => transport.message.clone(),
        };
        Err(Error::Request {
            kind: transport.kind,
            message,
        })
    }
}
