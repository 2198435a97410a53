//! Authentication context injected into the resource client.
//!
//! Tokens live behind [`CredentialStore`] and route changes go through
//! [`Navigator`], so the global 401 handling can be exercised without a
//! browser or real storage.

use crate::persistence::{self, PersistenceError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("credential store error: {0}")]
    Store(#[from] PersistenceError),
}

/// The two tokens the dashboard keeps between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Credentials, AuthError>;
    fn store(&self, credentials: &Credentials) -> Result<(), AuthError>;
    fn clear(&self) -> Result<(), AuthError>;
}

pub trait Navigator: Send + Sync {
    fn current_route(&self) -> String;
    fn navigate(&self, route: &str);
}

// ============================================================================
// STORES
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<Credentials>,
}

impl MemoryCredentialStore {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials: RwLock::new(credentials),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Credentials, AuthError> {
        let guard = self.credentials.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone())
    }

    fn store(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let mut guard = self.credentials.write().unwrap_or_else(|e| e.into_inner());
        *guard = credentials.clone();
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        self.store(&Credentials::default())
    }
}

/// Tokens persisted as a JSON file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Credentials, AuthError> {
        Ok(persistence::read_json(&self.path)?.unwrap_or_default())
    }

    fn store(&self, credentials: &Credentials) -> Result<(), AuthError> {
        persistence::write_json(&self.path, credentials)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        persistence::remove_json(&self.path)?;
        Ok(())
    }
}

// ============================================================================
// NAVIGATION
// ============================================================================

/// In-process route history; the embedding UI reads `current_route`.
#[derive(Debug)]
pub struct MemoryNavigator {
    history: Mutex<Vec<String>>,
}

impl MemoryNavigator {
    pub fn new(initial_route: impl Into<String>) -> Self {
        Self {
            history: Mutex::new(vec![initial_route.into()]),
        }
    }

    pub fn history(&self) -> Vec<String> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Navigator for MemoryNavigator {
    fn current_route(&self) -> String {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.last().cloned().unwrap_or_default()
    }

    fn navigate(&self, route: &str) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(route.to_string());
    }
}

// ============================================================================
// CONTEXT
// ============================================================================

#[derive(Clone)]
pub struct AuthContext {
    store: Arc<dyn CredentialStore>,
    navigator: Arc<dyn Navigator>,
    login_route: String,
    /// Serializes the "already on login?" check with the navigation.
    redirect: Arc<Mutex<()>>,
}

impl AuthContext {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
        login_route: impl Into<String>,
    ) -> Self {
        Self {
            store,
            navigator,
            login_route: login_route.into(),
            redirect: Arc::new(Mutex::new(())),
        }
    }

    /// Access token for the `Authorization` header. Store failures are
    /// logged and treated as "signed out".
    pub fn access_token(&self) -> Option<String> {
        match self.store.load() {
            Ok(credentials) => credentials.access_token,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read stored credentials");
                None
            }
        }
    }

    pub fn credentials(&self) -> Result<Credentials, AuthError> {
        self.store.load()
    }

    pub fn sign_in(&self, credentials: &Credentials) -> Result<(), AuthError> {
        self.store.store(credentials)
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    /// Explicit sign-out. Unlike the 401 path, a store failure is returned.
    pub fn sign_out(&self) -> Result<(), AuthError> {
        self.store.clear()?;
        self.redirect_to_login();
        Ok(())
    }

    /// Global reaction to HTTP 401: drop stored tokens and send the user to
    /// the login route unless they are already there. Safe to call from any
    /// number of concurrent requests.
    pub fn handle_unauthorized(&self) {
        if let Err(err) = self.store.clear() {
            tracing::warn!(error = %err, "failed to clear stored credentials");
        }
        tracing::info!(route = %self.login_route, "session expired");
        self.redirect_to_login();
    }

    fn redirect_to_login(&self) {
        let _guard = self.redirect.lock().unwrap_or_else(|e| e.into_inner());
        if self.navigator.current_route() != self.login_route {
            self.navigator.navigate(&self.login_route);
        }
    }
}
