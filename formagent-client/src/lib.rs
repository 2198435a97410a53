//! Formagent Client
//!
//! Keeps editable local state consistent with the server-owned resources of
//! the formagent dashboard REST API:
//! - `ResourceClient` / `ApiClient`: typed REST calls with global 401 handling
//! - `QueryCache`: shared snapshots with prefix invalidation
//! - `DraftState`: per-field dirty tracking and hydration
//! - `AutosaveHandle`: debounced background persistence with retry
//! - `AgentEditor`: the agent builder tying them together

pub mod api;
pub mod api_client;
pub mod auth;
pub mod autosave;
pub mod cache;
pub mod config;
pub mod context;
pub mod download;
pub mod draft;
pub mod editor;
pub mod error;
pub mod notifications;
pub mod persistence;
pub mod telemetry;
pub mod transport;

pub use api::{keys, AgentsApi, BillingApi, SessionsApi, WebhooksApi};
pub use api_client::{ApiClient, ApiClientError, ResourceClient};
pub use auth::{
    AuthContext, AuthError, CredentialStore, Credentials, FileCredentialStore,
    MemoryCredentialStore, MemoryNavigator, Navigator,
};
pub use autosave::{
    AutosaveHandle, AutosavePhase, AutosaveState, AutosaveTarget, Persisted, SyncStatus,
};
pub use cache::{CacheError, CacheEvent, QueryCache, QueryKey, Snapshot};
pub use config::{AutosaveConfig, CacheConfig, ClientConfig, ConfigError, RetryConfig, TelemetryConfig};
pub use context::ClientContext;
pub use download::{save_download, Download, DownloadError};
pub use draft::{DirtyFields, DraftState, HydrationOutcome, HydrationPolicy};
pub use editor::{AgentEditor, EditorError, EditorMode, SaveOutcome};
pub use error::ClientError;
pub use notifications::{Notification, NotificationLevel, Notifier};
pub use telemetry::init_tracing;
pub use transport::ReqwestTransport;
