//! Retry of timed-out idempotent requests.
//!
//! Only GET requests that failed with a transport timeout are retried, and
//! only while the call's retry policy is enabled with a nonzero count. The
//! delay between attempts is fixed. Each retry is a full re-dispatch through
//! the client, so the pending tracker sees it as a fresh registration.

use tracing::{debug, warn};

use crate::client::{Call, Client};
use crate::error::{Error, Result};
use crate::http::{HttpMethod, HttpResponse};

/// Attempt counter threaded alongside a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempts: u32,
}

/// Whether `error` on `call` is eligible for the retry policy at all.
pub fn should_retry(call: &Call, error: &Error) -> bool {
    let Error::Transport(transport) = error else {
        return false;
    };
    transport.is_timeout()
        && call.request.method == HttpMethod::Get
        && call.options.retry.is_some_and(|policy| policy.enabled)
}

/// Re-dispatch `call` after the configured delay, or hand `error` back when
/// the policy is disabled or exhausted.
pub async fn maybe_retry(client: &Client, mut call: Call, error: Error) -> Result<HttpResponse> {
    let Some(policy) = call.options.retry.filter(|p| p.enabled && p.count > 0) else {
        return Err(error);
    };

    if call.retry.attempts >= policy.count {
        debug!(
            url = %call.request.url,
            attempts = call.retry.attempts,
            "retry budget exhausted"
        );
        return Err(error);
    }

    call.retry.attempts += 1;
    warn!(
        url = %call.request.url,
        attempt = call.retry.attempts,
        max = policy.count,
        wait_ms = policy.wait.as_millis() as u64,
        "request timed out, retrying"
    );
    tokio::time::sleep(policy.wait).await;
    client.dispatch(call).await
}
