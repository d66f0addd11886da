//! Request-shaping HTTP client pipeline.
//!
//! # Overview
//! Wraps a pluggable HTTP transport with the policies an application API
//! client usually needs around every call: URL prefixing, bearer tokens,
//! cache-busting timestamps, form encoding, de-duplication of identical
//! in-flight requests, retry of timed-out GETs, and unwrapping of
//! `{code, result, message}` response envelopes.
//!
//! # Design
//! - `Client` composes the pieces; `create_client` wires the defaults.
//! - `Transform` holds the hook points. Every hook has a pass-through
//!   default, and `DefaultTransform` supplies the standard behaviour.
//! - `PendingTracker` de-duplicates by `METHOD&url`: the newest request wins
//!   and the older one is cancelled.
//! - `Transport` is the only I/O seam. `ReqwestTransport` is the production
//!   implementation; tests substitute scripted transports.
//! - Options are partial structs merged field by field (`Merge`) into the
//!   `EffectiveOptions` a single call runs with.

pub mod client;
pub mod credentials;
pub mod error;
pub mod form;
pub mod http;
pub mod options;
pub mod pending;
pub mod retry;
pub mod transform;
pub mod transport;

pub use client::{create_client, Call, Client};
pub use credentials::{global_credentials, CredentialStore, MemoryCredentialStore};
pub use error::{Error, Result, TransportError, TransportErrorKind};
pub use http::{Body, Headers, HttpMethod, HttpRequest, HttpResponse};
pub use options::{
    ClientOptions, EffectiveOptions, Merge, OnError, RequestOptions, RetryOptions, RetryPolicy,
};
pub use pending::{pending_key, PendingTracker, Registration};
pub use retry::RetryState;
pub use transform::{DefaultTransform, EnvelopeCodes, Output, PassThrough, Transform};
pub use transport::{ReqwestTransport, Transport};
