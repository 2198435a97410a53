//! Session-wide client context: configuration, API client, query cache and
//! notifier shared by every editor and list view.

use crate::api_client::{ApiClient, ResourceClient};
use crate::auth::{
    AuthContext, AuthError, CredentialStore, FileCredentialStore, MemoryCredentialStore, Navigator,
};
use crate::cache::QueryCache;
use crate::config::ClientConfig;
use crate::download::{save_download, Download, DownloadError};
use crate::editor::{AgentEditor, EditorError};
use crate::error::ClientError;
use crate::notifications::Notifier;
use crate::transport::ReqwestTransport;
use formagent_core::{AgentId, Transport};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct ClientContext {
    config: Arc<ClientConfig>,
    api: ApiClient,
    cache: QueryCache,
    notifier: Notifier,
}

impl ClientContext {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>, auth: AuthContext) -> Self {
        let cache = QueryCache::new(config.cache.stale_time());
        Self {
            api: ApiClient::new(ResourceClient::new(transport, auth)),
            cache,
            notifier: Notifier::new(),
            config: Arc::new(config),
        }
    }

    /// Validate `config` and wire the reqwest transport plus the credential
    /// store it names (file-backed when `credentials_path` is set).
    pub fn from_config(config: ClientConfig, navigator: Arc<dyn Navigator>) -> Result<Self, ClientError> {
        config.validate()?;
        let store: Arc<dyn CredentialStore> = match &config.credentials_path {
            Some(path) => Arc::new(FileCredentialStore::new(path.clone())),
            None => Arc::new(MemoryCredentialStore::default()),
        };
        let auth = AuthContext::new(store, navigator, config.login_route.clone());
        let transport = ReqwestTransport::new(&config)?;
        tracing::info!(api_base_url = %config.api_base_url, "client context ready");
        Ok(Self::new(config, Arc::new(transport), auth))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn auth(&self) -> &AuthContext {
        self.api.rest().auth()
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn new_agent(&self) -> AgentEditor {
        AgentEditor::create(self)
    }

    pub async fn open_agent(&self, id: AgentId) -> Result<AgentEditor, EditorError> {
        AgentEditor::open(self, id).await
    }

    /// Write a download into `downloads_dir`.
    pub async fn save_download(&self, download: &Download) -> Result<PathBuf, DownloadError> {
        save_download(&self.config.downloads_dir, download).await
    }

    /// Forget credentials and cached data, then go to the login route.
    pub fn sign_out(&self) -> Result<(), AuthError> {
        self.cache.clear();
        self.auth().sign_out()
    }
}
