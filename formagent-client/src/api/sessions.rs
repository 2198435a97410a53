use crate::api_client::{ApiClientError, ResourceClient};
use crate::download::Download;
use formagent_core::{ListSessionsParams, Page, Session, SessionId};

/// `/sessions` endpoints.
#[derive(Clone)]
pub struct SessionsApi {
    rest: ResourceClient,
}

impl SessionsApi {
    pub fn new(rest: ResourceClient) -> Self {
        Self { rest }
    }

    pub async fn list(&self, params: &ListSessionsParams) -> Result<Page<Session>, ApiClientError> {
        self.rest.get_query("/sessions", params).await
    }

    pub async fn get(&self, id: SessionId) -> Result<Session, ApiClientError> {
        self.rest.get(&format!("/sessions/{}", id)).await
    }

    pub async fn delete(&self, id: SessionId) -> Result<(), ApiClientError> {
        self.rest.delete(&format!("/sessions/{}", id)).await
    }

    /// CSV export of the sessions matching `params`; pagination is ignored
    /// by the server.
    pub async fn export(&self, params: &ListSessionsParams) -> Result<Download, ApiClientError> {
        self.rest
            .download("/sessions/export", Some(params), "sessions.csv")
            .await
    }
}
