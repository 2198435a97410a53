#![allow(dead_code)]

use formagent_client::{
    AuthContext, ClientConfig, ClientContext, Credentials, MemoryCredentialStore, MemoryNavigator,
    Notification, ResourceClient,
};
use formagent_test_utils::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

pub const START_ROUTE: &str = "/agents/builder";

pub struct Harness {
    pub ctx: ClientContext,
    pub navigator: Arc<MemoryNavigator>,
    pub store: Arc<MemoryCredentialStore>,
}

/// Defaults with jitter disabled so retry timing is exact.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new("http://formagent.test");
    config.autosave.retry.jitter_ms = 0;
    config
}

pub fn auth(token: Option<&str>) -> (AuthContext, Arc<MemoryNavigator>, Arc<MemoryCredentialStore>) {
    let credentials = token.map(Credentials::bearer).unwrap_or_default();
    let store = Arc::new(MemoryCredentialStore::new(credentials));
    let navigator = Arc::new(MemoryNavigator::new(START_ROUTE));
    let auth = AuthContext::new(store.clone(), navigator.clone(), "/login");
    (auth, navigator, store)
}

pub fn resource_client<T: Transport + 'static>(
    transport: T,
    token: Option<&str>,
) -> (ResourceClient, Arc<MemoryNavigator>, Arc<MemoryCredentialStore>) {
    let (auth, navigator, store) = auth(token);
    (ResourceClient::new(Arc::new(transport), auth), navigator, store)
}

pub fn harness<T: Transport + 'static>(transport: T, config: ClientConfig) -> Harness {
    let (auth, navigator, store) = auth(Some("test-token"));
    Harness {
        ctx: ClientContext::new(config, Arc::new(transport), auth),
        navigator,
        store,
    }
}

pub fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        out.push(notification);
    }
    out
}

/// Elapsed milliseconds between two instants of the paused test clock.
pub fn ms_between(start: Instant, at: Instant) -> u128 {
    at.duration_since(start).as_millis()
}

pub async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
