//! Error types for the formagent client.

use crate::api_client::ApiClientError;
use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::download::DownloadError;
use crate::editor::EditorError;
use crate::persistence::PersistenceError;
use crate::telemetry::TelemetryError;
use formagent_core::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Api(#[from] ApiClientError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Editor(#[from] EditorError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}
