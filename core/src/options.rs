//! Client and per-request configuration.
//!
//! # Design
//! Caller-facing option structs are all-optional so that a partial value
//! describes "only what I want to change". `Merge` combines two of them
//! field by field: a `Some` on the override side wins, nested option groups
//! (`retry_request`, `request_options`, `headers`) merge recursively, and
//! neither input is modified. `EffectiveOptions` is the fully resolved view a
//! single call runs with, produced once per call and carried alongside the
//! request through every pipeline stage.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::http::Headers;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_URL_PREFIX: &str = "/api";
pub const DEFAULT_RETRY_COUNT: u32 = 5;
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_millis(100);
pub const DEFAULT_AUTHENTICATION_SCHEME: &str = "Bearer ";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Field-wise merge where `other` takes precedence.
pub trait Merge {
    fn merge(&self, other: &Self) -> Self;
}

fn pick<T: Clone>(base: &Option<T>, over: &Option<T>) -> Option<T> {
    over.clone().or_else(|| base.clone())
}

fn pick_merged<T: Merge + Clone>(base: &Option<T>, over: &Option<T>) -> Option<T> {
    match (base, over) {
        (Some(b), Some(o)) => Some(b.merge(o)),
        _ => pick(base, over),
    }
}

/// Callback invoked with the decoded envelope of a failed response.
#[derive(Clone)]
pub struct OnError(Arc<dyn Fn(&serde_json::Value) + Send + Sync>);

impl OnError {
    pub fn new(f: impl Fn(&serde_json::Value) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, envelope: &serde_json::Value) {
        (self.0)(envelope)
    }
}

impl fmt::Debug for OnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OnError(..)")
    }
}

impl PartialEq for OnError {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Retry-on-timeout settings as supplied by a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryOptions {
    pub is_open_retry: Option<bool>,
    pub count: Option<u32>,
    #[serde(rename = "waitTime")]
    pub wait_time_ms: Option<u64>,
}

impl Merge for RetryOptions {
    fn merge(&self, other: &Self) -> Self {
        Self {
            is_open_retry: pick(&self.is_open_retry, &other.is_open_retry),
            count: pick(&self.count, &other.count),
            wait_time_ms: pick(&self.wait_time_ms, &other.wait_time_ms),
        }
    }
}

/// Resolved retry policy of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub count: u32,
    pub wait: Duration,
}

impl From<&RetryOptions> for RetryPolicy {
    fn from(options: &RetryOptions) -> Self {
        Self {
            enabled: options.is_open_retry.unwrap_or(false),
            count: options.count.unwrap_or(0),
            wait: options
                .wait_time_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RETRY_WAIT),
        }
    }
}

/// Per-call request-shaping options. Every field is optional; unset fields
/// fall back to the client's defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestOptions {
    /// Prepended to every URL, outside the prefix.
    pub api_url: Option<String>,
    pub url_prefix: Option<String>,
    pub join_prefix: Option<bool>,
    /// Append a `_t` cache-busting parameter to GET requests.
    pub join_time: Option<bool>,
    pub with_token: Option<bool>,
    pub is_return_native_response: Option<bool>,
    pub is_transform_response: Option<bool>,
    /// Resolve failed envelopes with no value instead of raising.
    pub is_catch_error: Option<bool>,
    /// Opt this call out of de-duplication.
    pub ignore_cancel_token: Option<bool>,
    pub retry_request: Option<RetryOptions>,
    #[serde(skip)]
    pub on_error: Option<OnError>,
}

impl RequestOptions {
    /// Built-in defaults applied underneath every client.
    pub fn defaults() -> Self {
        Self {
            api_url: Some(String::new()),
            url_prefix: Some(DEFAULT_URL_PREFIX.to_string()),
            join_prefix: Some(true),
            join_time: Some(false),
            with_token: Some(true),
            is_return_native_response: Some(false),
            is_transform_response: Some(true),
            is_catch_error: Some(false),
            ignore_cancel_token: Some(false),
            retry_request: Some(RetryOptions {
                is_open_retry: Some(true),
                count: Some(DEFAULT_RETRY_COUNT),
                wait_time_ms: Some(DEFAULT_RETRY_WAIT.as_millis() as u64),
            }),
            on_error: None,
        }
    }
}

impl Merge for RequestOptions {
    fn merge(&self, other: &Self) -> Self {
        Self {
            api_url: pick(&self.api_url, &other.api_url),
            url_prefix: pick(&self.url_prefix, &other.url_prefix),
            join_prefix: pick(&self.join_prefix, &other.join_prefix),
            join_time: pick(&self.join_time, &other.join_time),
            with_token: pick(&self.with_token, &other.with_token),
            is_return_native_response: pick(
                &self.is_return_native_response,
                &other.is_return_native_response,
            ),
            is_transform_response: pick(&self.is_transform_response, &other.is_transform_response),
            is_catch_error: pick(&self.is_catch_error, &other.is_catch_error),
            ignore_cancel_token: pick(&self.ignore_cancel_token, &other.ignore_cancel_token),
            retry_request: pick_merged(&self.retry_request, &other.retry_request),
            on_error: pick(&self.on_error, &other.on_error),
        }
    }
}

/// Client-wide configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientOptions {
    #[serde(rename = "timeout")]
    pub timeout_ms: Option<u64>,
    /// Prefix placed before the token in the `Authorization` header. Empty
    /// means the bearer default.
    pub authentication_scheme: Option<String>,
    pub headers: Headers,
    pub request_options: RequestOptions,
}

impl ClientOptions {
    pub fn defaults() -> Self {
        Self {
            timeout_ms: Some(DEFAULT_TIMEOUT.as_millis() as u64),
            authentication_scheme: Some(String::new()),
            headers: Headers::new().with("Content-Type", JSON_CONTENT_TYPE),
            request_options: RequestOptions::defaults(),
        }
    }

    /// Parse a partial configuration from JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Deserialization(e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Resolve the options a single call runs with.
    pub fn effective(&self, overrides: Option<&RequestOptions>) -> EffectiveOptions {
        let merged = match overrides {
            Some(o) => self.request_options.merge(o),
            None => self.request_options.clone(),
        };
        let scheme = self
            .authentication_scheme
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_AUTHENTICATION_SCHEME.to_string());

        EffectiveOptions {
            api_url: merged.api_url.filter(|s| !s.is_empty()),
            url_prefix: merged.url_prefix,
            join_prefix: merged.join_prefix.unwrap_or(false),
            join_time: merged.join_time.unwrap_or(false),
            with_token: merged.with_token.unwrap_or(true),
            is_return_native_response: merged.is_return_native_response.unwrap_or(false),
            is_transform_response: merged.is_transform_response.unwrap_or(false),
            is_catch_error: merged.is_catch_error.unwrap_or(false),
            ignore_cancel_token: merged.ignore_cancel_token.unwrap_or(false),
            retry: merged.retry_request.as_ref().map(RetryPolicy::from),
            on_error: merged.on_error,
            authentication_scheme: scheme,
            timeout: self.timeout(),
        }
    }
}

impl Merge for ClientOptions {
    fn merge(&self, other: &Self) -> Self {
        Self {
            timeout_ms: pick(&self.timeout_ms, &other.timeout_ms),
            authentication_scheme: pick(&self.authentication_scheme, &other.authentication_scheme),
            headers: self.headers.merge(&other.headers),
            request_options: self.request_options.merge(&other.request_options),
        }
    }
}

/// Options of one call after merging client defaults with call overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveOptions {
    pub api_url: Option<String>,
    pub url_prefix: Option<String>,
    pub join_prefix: bool,
    pub join_time: bool,
    pub with_token: bool,
    pub is_return_native_response: bool,
    pub is_transform_response: bool,
    pub is_catch_error: bool,
    pub ignore_cancel_token: bool,
    pub retry: Option<RetryPolicy>,
    pub on_error: Option<OnError>,
    pub authentication_scheme: String,
    pub timeout: Duration,
}

impl Default for EffectiveOptions {
    fn default() -> Self {
        ClientOptions::defaults().effective(None)
    }
}
