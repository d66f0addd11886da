//! The client facade.
//!
//! # Design
//! A call moves through `configured → dispatched → succeeded | failed`.
//! `request` resolves the call's `EffectiveOptions`, runs `before_request`,
//! re-encodes form bodies, then hands a `Call` to `dispatch`. `dispatch` is
//! one transport round-trip: it merges default headers, registers the call
//! with the pending tracker, sends, and clears the registration before any
//! response hook runs. A failed round-trip goes to `response_error`, which
//! may call `dispatch` again (retry); that re-entry is a new registration
//! just like a fresh call.
//!
//! `Client` is a cheap handle over shared state, so it can be cloned into
//! tasks and handed to hooks.

use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use tracing::debug;

use crate::credentials::global_credentials;
use crate::error::{Result, TransportErrorKind};
use crate::form::apply_form_encoding;
use crate::http::{Headers, HttpMethod, HttpRequest, HttpResponse};
use crate::options::{ClientOptions, EffectiveOptions, Merge, RequestOptions};
use crate::pending::PendingTracker;
use crate::retry::RetryState;
use crate::transform::{DefaultTransform, Output, Transform};
use crate::transport::{ReqwestTransport, Transport};

/// A request in flight together with the options it runs under.
#[derive(Debug, Clone)]
pub struct Call {
    pub request: HttpRequest,
    pub options: EffectiveOptions,
    pub retry: RetryState,
}

impl Call {
    pub fn new(request: HttpRequest, options: EffectiveOptions) -> Self {
        Self {
            request,
            options,
            retry: RetryState::default(),
        }
    }
}

struct Inner {
    options: ClientOptions,
    headers: RwLock<Headers>,
    transport: Arc<dyn Transport>,
    transform: Arc<dyn Transform>,
    pending: PendingTracker,
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

/// Build a client over `reqwest` with the standard transform and the
/// process-wide credential store. `options` is merged onto the defaults.
pub fn create_client(options: ClientOptions) -> Client {
    Client::with_parts(
        options,
        Arc::new(ReqwestTransport::new()),
        Arc::new(DefaultTransform::new(global_credentials())),
    )
}

impl Client {
    pub fn with_parts(
        options: ClientOptions,
        transport: Arc<dyn Transport>,
        transform: Arc<dyn Transform>,
    ) -> Self {
        let options = ClientOptions::defaults().merge(&options);
        let headers = RwLock::new(options.headers.clone());
        Self {
            inner: Arc::new(Inner {
                options,
                headers,
                transport,
                transform,
                pending: PendingTracker::new(),
            }),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub fn pending(&self) -> &PendingTracker {
        &self.inner.pending
    }

    /// Current default headers.
    pub fn headers(&self) -> Headers {
        self.inner
            .headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge `headers` into the defaults used by future calls.
    pub fn set_headers(&self, headers: &Headers) {
        let mut current = self
            .inner
            .headers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *current = current.merge(headers);
    }

    /// Abort every tracked in-flight request.
    pub fn cancel_all(&self) -> usize {
        self.inner.pending.remove_all_pending()
    }

    pub async fn request(
        &self,
        request: HttpRequest,
        options: Option<RequestOptions>,
    ) -> Result<Output> {
        let effective = self.inner.options.effective(options.as_ref());
        let transform = &self.inner.transform;

        let request = transform.before_request(request, &effective);
        let request = apply_form_encoding(request, &self.headers());
        debug!(method = %request.method, url = %request.url, "request configured");

        let call = Call::new(request, effective.clone());
        match self.dispatch(call).await {
            Ok(response) => transform.transform_response(response, &effective),
            Err(error) => Err(transform.request_catch(error, &effective)),
        }
    }

    pub async fn get(
        &self,
        request: HttpRequest,
        options: Option<RequestOptions>,
    ) -> Result<Output> {
        self.request(with_method(request, HttpMethod::Get), options).await
    }

    pub async fn post(
        &self,
        request: HttpRequest,
        options: Option<RequestOptions>,
    ) -> Result<Output> {
        self.request(with_method(request, HttpMethod::Post), options).await
    }

    pub async fn put(
        &self,
        request: HttpRequest,
        options: Option<RequestOptions>,
    ) -> Result<Output> {
        self.request(with_method(request, HttpMethod::Put), options).await
    }

    pub async fn delete(
        &self,
        request: HttpRequest,
        options: Option<RequestOptions>,
    ) -> Result<Output> {
        self.request(with_method(request, HttpMethod::Delete), options).await
    }

    /// One transport round-trip for `call`, including tracker bookkeeping
    /// and the response/error hooks.
    pub fn dispatch(&self, call: Call) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            let inner = &self.inner;
            let mut request = call.request.clone();
            request.headers = self.headers().merge(&request.headers);

            let registration =
                (!call.options.ignore_cancel_token).then(|| inner.pending.add_pending(&request));
            let token = registration
                .as_ref()
                .map(|r| r.token().clone())
                .or_else(|| request.signal.clone())
                .unwrap_or_default();

            debug!(
                method = %request.method,
                url = %request.url,
                attempt = call.retry.attempts,
                "request dispatched"
            );
            let result = inner
                .transport
                .send(request, token, call.options.timeout)
                .await;

            if let Some(registration) = &registration {
                inner.pending.remove_pending(registration);
            }

            match result {
                Ok(response) => {
                    debug!(status = response.status, url = %call.request.url, "request succeeded");
                    Ok(inner.transform.response_interceptor(response))
                }
                Err(error) => {
                    debug!(url = %call.request.url, error = %error, "request failed");
                    if error.kind == TransportErrorKind::Network {
                        inner.pending.remove_all_pending();
                    }
                    inner.transform.response_error(self, call, error.into()).await
                }
            }
        })
    }
}

fn with_method(mut request: HttpRequest, method: HttpMethod) -> HttpRequest {
    request.method = method;
    request
}
