//! Access-token storage consulted when attaching `Authorization` headers.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Source of the bearer token for outgoing requests.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, token: String);
    fn clear(&self);
}

/// In-memory token slot.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|t| !t.is_empty())
    }

    fn set(&self, token: String) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    fn clear(&self) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Process-wide store shared by clients built with `create_client`.
pub fn global_credentials() -> Arc<dyn CredentialStore> {
    static STORE: OnceLock<Arc<MemoryCredentialStore>> = OnceLock::new();
    STORE
        .get_or_init(|| Arc::new(MemoryCredentialStore::new()))
        .clone()
}
