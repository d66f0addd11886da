//! Pipeline behaviour against a scripted in-memory transport.
//!
//! # Design
//! `ScriptedTransport` pops one `Reply` per send (falling back to a fixed
//! reply once the queue is empty) and records every request it sees. `Hang`
//! replies park until the attempt's cancellation token fires, which lets the
//! tests observe de-duplication and bulk cancellation deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vaxios_core::error::{NETWORK_MESSAGE, TIMEOUT_MESSAGE};
use vaxios_core::{
    Body, Client, ClientOptions, CredentialStore, DefaultTransform, EffectiveOptions, Error,
    Headers, HttpMethod, HttpRequest, HttpResponse, MemoryCredentialStore, Output, RequestOptions,
    RetryOptions, Transform, Transport, TransportError, TransportErrorKind,
};

#[derive(Clone)]
enum Reply {
    Respond(HttpResponse),
    Fail(TransportError),
    Hang,
}

fn ok_envelope(result: serde_json::Value) -> Reply {
    Reply::Respond(HttpResponse::new(
        200,
        json!({"code": 0, "result": result, "message": "ok"}).to_string(),
    ))
}

fn timeout() -> Reply {
    Reply::Fail(TransportError::timeout("timeout of 10ms exceeded"))
}

struct ScriptedTransport {
    queue: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    seen: Mutex<Vec<HttpRequest>>,
    entered: Notify,
}

impl ScriptedTransport {
    fn new(queue: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(queue.into()),
            fallback,
            seen: Mutex::new(Vec::new()),
            entered: Notify::new(),
        })
    }

    fn sends(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn seen(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: CancellationToken,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.seen.lock().unwrap().push(request);
        let reply = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        self.entered.notify_one();
        match reply {
            Reply::Respond(response) => Ok(response),
            Reply::Fail(error) => Err(error),
            Reply::Hang => {
                cancel.cancelled().await;
                Err(TransportError::aborted())
            }
        }
    }
}

/// Credential store that counts `clear` calls.
#[derive(Default)]
struct CountingStore {
    inner: MemoryCredentialStore,
    clears: AtomicUsize,
}

impl CredentialStore for CountingStore {
    fn get(&self) -> Option<String> {
        self.inner.get()
    }

    fn set(&self, token: String) {
        self.inner.set(token)
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear()
    }
}

fn fast_retry(count: u32) -> RequestOptions {
    RequestOptions {
        retry_request: Some(RetryOptions {
            is_open_retry: Some(true),
            count: Some(count),
            wait_time_ms: Some(1),
        }),
        ..RequestOptions::default()
    }
}

fn client_with(transport: Arc<ScriptedTransport>) -> Client {
    Client::with_parts(
        ClientOptions::default(),
        transport,
        Arc::new(DefaultTransform::new(Arc::new(MemoryCredentialStore::new()))),
    )
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timed_out_get_is_retried_exactly_n_times() {
    let transport = ScriptedTransport::new(vec![], timeout());
    let client = client_with(transport.clone());

    let err = client
        .get(HttpRequest::get("/users"), Some(fast_retry(3)))
        .await
        .unwrap_err();

    assert_eq!(transport.sends(), 4);
    assert!(matches!(&err, Error::Transport(e) if e.kind == TransportErrorKind::Timeout));
    assert!(client.pending().is_empty());
    // before_request ran once: no double prefix on retries
    assert!(transport.seen().iter().all(|r| r.url == "/api/users"));
}

/// Fails every attempt with a timeout after a short exchange, recording when
/// each attempt started and how many ran at once.
#[derive(Default)]
struct SlowTimeoutTransport {
    starts: Mutex<Vec<Instant>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

const EXCHANGE: Duration = Duration::from_millis(20);

#[async_trait]
impl Transport for SlowTimeoutTransport {
    async fn send(
        &self,
        _request: HttpRequest,
        _cancel: CancellationToken,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.starts.lock().unwrap().push(Instant::now());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(EXCHANGE).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Err(TransportError::timeout("timeout of 20ms exceeded"))
    }
}

#[tokio::test(start_paused = true)]
async fn retries_are_sequential_with_a_fixed_delay() {
    let transport = Arc::new(SlowTimeoutTransport::default());
    let client = Client::with_parts(
        ClientOptions::default(),
        transport.clone(),
        Arc::new(DefaultTransform::new(Arc::new(MemoryCredentialStore::new()))),
    );
    let options = RequestOptions {
        retry_request: Some(RetryOptions {
            is_open_retry: Some(true),
            count: Some(3),
            wait_time_ms: Some(100),
        }),
        ..RequestOptions::default()
    };

    let err = client
        .get(HttpRequest::get("/users"), Some(options))
        .await
        .unwrap_err();
    assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));

    let starts = transport.starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 4);
    // each attempt starts once the previous one failed and the wait elapsed
    for pair in starts.windows(2) {
        assert_eq!(pair[1] - pair[0], EXCHANGE + Duration::from_millis(100));
    }
    assert_eq!(transport.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_recovers_when_a_later_attempt_succeeds() {
    let transport = ScriptedTransport::new(vec![timeout(), timeout()], ok_envelope(json!([1])));
    let client = client_with(transport.clone());

    let out = client
        .get(HttpRequest::get("/users"), Some(fast_retry(5)))
        .await
        .unwrap();

    assert_eq!(out, Output::Data(json!([1])));
    assert_eq!(transport.sends(), 3);
}

#[tokio::test]
async fn non_get_methods_are_never_retried() {
    for method in [HttpMethod::Post, HttpMethod::Put, HttpMethod::Delete] {
        let transport = ScriptedTransport::new(vec![], timeout());
        let client = client_with(transport.clone());

        let err = client
            .request(HttpRequest::new(method, "/users"), Some(fast_retry(3)))
            .await
            .unwrap_err();

        assert_eq!(transport.sends(), 1, "{method}");
        assert_eq!(err.to_string(), TIMEOUT_MESSAGE);
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));
    }
}

#[tokio::test]
async fn zero_retry_count_propagates_original_error() {
    let transport = ScriptedTransport::new(vec![], timeout());
    let client = client_with(transport.clone());

    let err = client
        .get(HttpRequest::get("/users"), Some(fast_retry(0)))
        .await
        .unwrap_err();

    assert_eq!(transport.sends(), 1);
    assert!(matches!(err, Error::Transport(_)));
}

#[tokio::test]
async fn disabled_retry_classifies_timeout() {
    let transport = ScriptedTransport::new(vec![], timeout());
    let client = client_with(transport.clone());
    let options = RequestOptions {
        retry_request: Some(RetryOptions {
            is_open_retry: Some(false),
            ..RetryOptions::default()
        }),
        ..RequestOptions::default()
    };

    let err = client
        .get(HttpRequest::get("/users"), Some(options))
        .await
        .unwrap_err();

    assert_eq!(transport.sends(), 1);
    assert!(matches!(
        &err,
        Error::Request { kind: TransportErrorKind::Timeout, message } if message == TIMEOUT_MESSAGE
    ));
}

// ---------------------------------------------------------------------------
// De-duplication and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn newer_identical_request_cancels_older() {
    let transport = ScriptedTransport::new(vec![Reply::Hang], ok_envelope(json!("second")));
    let client = client_with(transport.clone());

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.get(HttpRequest::get("/users"), None).await }
    });
    transport.entered.notified().await;
    assert!(client.pending().contains(HttpMethod::Get, "/api/users"));

    let second = client.get(HttpRequest::get("/users"), None).await.unwrap();
    assert_eq!(second, Output::Data(json!("second")));

    let first = first.await.unwrap().unwrap_err();
    assert!(first.is_aborted());
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn different_methods_are_not_deduplicated() {
    let transport = ScriptedTransport::new(vec![Reply::Hang], ok_envelope(json!(null)));
    let client = client_with(transport.clone());

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.get(HttpRequest::get("/users"), None).await }
    });
    transport.entered.notified().await;

    client.post(HttpRequest::post("/users"), None).await.unwrap();
    assert!(client.pending().contains(HttpMethod::Get, "/api/users"));

    assert_eq!(client.cancel_all(), 1);
    assert!(first.await.unwrap().unwrap_err().is_aborted());
}

#[tokio::test]
async fn cancel_all_aborts_every_tracked_request() {
    let transport =
        ScriptedTransport::new(vec![Reply::Hang, Reply::Hang], ok_envelope(json!(null)));
    let client = client_with(transport.clone());

    let mut calls = Vec::new();
    for url in ["/a", "/b"] {
        let client = client.clone();
        calls.push(tokio::spawn(async move {
            client.get(HttpRequest::get(url), None).await
        }));
        transport.entered.notified().await;
    }
    assert_eq!(client.pending().len(), 2);

    assert_eq!(client.cancel_all(), 2);
    for call in calls {
        assert!(call.await.unwrap().unwrap_err().is_aborted());
    }
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn ignored_requests_are_not_tracked() {
    let transport = ScriptedTransport::new(vec![Reply::Hang], ok_envelope(json!(null)));
    let client = client_with(transport.clone());
    let signal = CancellationToken::new();

    let call = tokio::spawn({
        let client = client.clone();
        let request = HttpRequest::get("/users").signal(signal.clone());
        let options = RequestOptions {
            ignore_cancel_token: Some(true),
            ..RequestOptions::default()
        };
        async move { client.get(request, Some(options)).await }
    });
    transport.entered.notified().await;
    assert!(client.pending().is_empty());

    signal.cancel();
    assert!(call.await.unwrap().unwrap_err().is_aborted());
}

#[tokio::test]
async fn network_failure_cancels_all_pending() {
    let transport = ScriptedTransport::new(
        vec![Reply::Hang, Reply::Fail(TransportError::network("connection refused"))],
        ok_envelope(json!(null)),
    );
    let client = client_with(transport.clone());

    let hanging = tokio::spawn({
        let client = client.clone();
        async move { client.get(HttpRequest::get("/a"), None).await }
    });
    transport.entered.notified().await;

    let err = client.get(HttpRequest::get("/b"), None).await.unwrap_err();
    assert_eq!(err.to_string(), NETWORK_MESSAGE);
    assert_eq!(err.transport_kind(), Some(TransportErrorKind::Network));

    assert!(hanging.await.unwrap().unwrap_err().is_aborted());
    assert!(client.pending().is_empty());
}

/// Records whether the call was still tracked when the response hook ran.
struct ObservingTransform {
    client: Mutex<Option<Client>>,
    still_pending: Mutex<Option<bool>>,
}

impl Transform for ObservingTransform {
    fn transform_response(
        &self,
        response: HttpResponse,
        _options: &EffectiveOptions,
    ) -> vaxios_core::Result<Output> {
        if let Some(client) = self.client.lock().unwrap().as_ref() {
            *self.still_pending.lock().unwrap() = Some(!client.pending().is_empty());
        }
        Ok(Output::Response(response))
    }
}

#[tokio::test]
async fn response_hooks_never_see_the_call_as_pending() {
    let transport = ScriptedTransport::new(vec![], ok_envelope(json!(null)));
    let transform = Arc::new(ObservingTransform {
        client: Mutex::new(None),
        still_pending: Mutex::new(None),
    });
    let client = Client::with_parts(ClientOptions::default(), transport, transform.clone());
    *transform.client.lock().unwrap() = Some(client.clone());

    client.get(HttpRequest::get("/users"), None).await.unwrap();
    assert_eq!(*transform.still_pending.lock().unwrap(), Some(false));

    // break the client <-> transform cycle
    transform.client.lock().unwrap().take();
}

// ---------------------------------------------------------------------------
// Shaping and envelopes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prefix_and_timestamp_are_applied() {
    let transport = ScriptedTransport::new(vec![], ok_envelope(json!(null)));
    let client = client_with(transport.clone());
    let options = RequestOptions {
        join_time: Some(true),
        ..RequestOptions::default()
    };

    client
        .get(HttpRequest::get("/users"), Some(options.clone()))
        .await
        .unwrap();
    client
        .get(HttpRequest::get("/users"), Some(options))
        .await
        .unwrap();

    let seen = transport.seen();
    assert_eq!(seen[0].url, "/api/users");
    assert!(seen.iter().all(|r| r.param_value("_t").is_some()));
}

#[tokio::test]
async fn form_content_type_re_encodes_body() {
    let transport = ScriptedTransport::new(vec![], ok_envelope(json!("token")));
    let client = client_with(transport.clone());
    client.set_headers(&Headers::new().with(
        "Content-Type",
        "application/x-www-form-urlencoded",
    ));

    client
        .post(
            HttpRequest::post("/login").json(json!({"username": "admin", "password": "secret"})),
            None,
        )
        .await
        .unwrap();

    let seen = transport.seen();
    assert_eq!(
        seen[0].body,
        Some(Body::Form("password=secret&username=admin".to_string()))
    );
}

#[tokio::test]
async fn unauthorized_envelope_clears_credentials_once() {
    let transport = ScriptedTransport::new(
        vec![Reply::Respond(HttpResponse::new(
            200,
            r#"{"code":401,"message":"session expired"}"#,
        ))],
        ok_envelope(json!(null)),
    );
    let store = Arc::new(CountingStore::default());
    store.set("abc".to_string());
    let client = Client::with_parts(
        ClientOptions::default(),
        transport.clone(),
        Arc::new(DefaultTransform::new(store.clone())),
    );

    let err = client.get(HttpRequest::get("/me"), None).await.unwrap_err();

    assert_eq!(err.to_string(), "session expired");
    assert_eq!(store.clears.load(Ordering::SeqCst), 1);
    assert_eq!(store.get(), None);
    assert_eq!(
        transport.seen()[0].headers.get("authorization"),
        Some("Bearer abc")
    );
}

#[tokio::test]
async fn success_envelope_resolves_to_result() {
    let transport = ScriptedTransport::new(vec![], ok_envelope(json!({"id": 1, "name": "ada"})));
    let client = client_with(transport);

    let out = client.get(HttpRequest::get("/users/1"), None).await.unwrap();
    assert_eq!(out, Output::Data(json!({"id": 1, "name": "ada"})));
}

struct MappingTransform;

impl Transform for MappingTransform {
    fn request_catch(&self, error: Error, _options: &EffectiveOptions) -> Error {
        Error::Hook(format!("mapped: {error}"))
    }
}

#[tokio::test]
async fn request_catch_maps_failed_calls() {
    let transport = ScriptedTransport::new(vec![], Reply::Fail(TransportError::aborted()));
    let client =
        Client::with_parts(ClientOptions::default(), transport, Arc::new(MappingTransform));

    let err = client.get(HttpRequest::get("/x"), None).await.unwrap_err();
    assert!(matches!(&err, Error::Hook(m) if m == "mapped: request aborted"));
}

#[tokio::test]
async fn caller_request_is_not_mutated_by_shaping() {
    let transport = ScriptedTransport::new(vec![], ok_envelope(json!(null)));
    let client = client_with(transport);
    let original = HttpRequest::get("/users");

    client.get(original.clone(), None).await.unwrap();
    assert_eq!(original.url, "/users");
    assert!(original.params.is_empty());
}
