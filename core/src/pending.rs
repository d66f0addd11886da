//! In-flight request tracking and de-duplication.
//!
//! # Design
//! Requests are identified by `METHOD&url` (query parameters excluded).
//! Registering a request whose key is already tracked cancels the older one
//! before the new entry is stored, so exactly one request per key is current
//! at any time. Every mutation happens under a single lock acquisition and
//! the lock is never held across an `.await`.
//!
//! Each tracked attempt also gets a unique id. Removal only touches the entry
//! if the id still matches: a request that was superseded and settles late
//! (typically as `Aborted`) must not cancel its replacement.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::http::{HttpMethod, HttpRequest};

/// De-duplication key of a request.
pub fn pending_key(method: HttpMethod, url: &str) -> String {
    format!("{method}&{url}")
}

/// Handle returned by `PendingTracker::add_pending` for one dispatch attempt.
#[derive(Debug, Clone)]
pub struct Registration {
    key: String,
    id: Option<Uuid>,
    token: CancellationToken,
}

impl Registration {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cancellation handle the transport must observe.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// False when the request carried its own external signal.
    pub fn is_tracked(&self) -> bool {
        self.id.is_some()
    }
}

#[derive(Debug)]
struct Entry {
    id: Uuid,
    token: CancellationToken,
}

/// Map of in-flight requests to their cancellation handles.
#[derive(Debug, Default)]
pub struct PendingTracker {
    entries: Mutex<HashMap<String, Entry>>,
}

impl PendingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `request`, cancelling any older request with the same key.
    ///
    /// A request that already carries a `signal` is not stored; the returned
    /// registration simply hands that signal back.
    pub fn add_pending(&self, request: &HttpRequest) -> Registration {
        let key = pending_key(request.method, &request.url);
        let mut entries = self.lock();

        if let Some(previous) = entries.remove(&key) {
            warn!(key = %key, "cancelling duplicate in-flight request");
            previous.token.cancel();
        }

        match &request.signal {
            Some(external) => Registration {
                key,
                id: None,
                token: external.clone(),
            },
            None => {
                let id = Uuid::new_v4();
                let token = CancellationToken::new();
                entries.insert(
                    key.clone(),
                    Entry {
                        id,
                        token: token.clone(),
                    },
                );
                debug!(key = %key, %id, "request registered");
                Registration {
                    key,
                    id: Some(id),
                    token,
                }
            }
        }
    }

    /// Cancel and drop the entry for `registration` if it is still current.
    /// Returns whether an entry was removed.
    pub fn remove_pending(&self, registration: &Registration) -> bool {
        let Some(id) = registration.id else {
            return false;
        };
        let mut entries = self.lock();
        match entries.get(&registration.key) {
            Some(entry) if entry.id == id => {
                if let Some(entry) = entries.remove(&registration.key) {
                    entry.token.cancel();
                }
                true
            }
            _ => false,
        }
    }

    /// Cancel every tracked request and clear the map. Returns how many
    /// entries were cancelled.
    pub fn remove_all_pending(&self) -> usize {
        let mut entries = self.lock();
        let count = entries.len();
        for (_, entry) in entries.drain() {
            entry.token.cancel();
        }
        if count > 0 {
            warn!(count, "cancelled all pending requests");
        }
        count
    }

    /// Drop all entries without cancelling them.
    pub fn reset(&self) {
        *self.lock() = HashMap::new();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, method: HttpMethod, url: &str) -> bool {
        self.lock().contains_key(&pending_key(method, url))
    }
}
