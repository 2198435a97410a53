use crate::api_client::{ApiClientError, ResourceClient};
use formagent_core::{Webhook, WebhookDraft, WebhookId, WebhookTestResult};

/// `/webhooks` endpoints.
#[derive(Clone)]
pub struct WebhooksApi {
    rest: ResourceClient,
}

impl WebhooksApi {
    pub fn new(rest: ResourceClient) -> Self {
        Self { rest }
    }

    pub async fn list(&self) -> Result<Vec<Webhook>, ApiClientError> {
        self.rest.get("/webhooks").await
    }

    pub async fn create(&self, draft: &WebhookDraft) -> Result<Webhook, ApiClientError> {
        self.rest.post("/webhooks", draft).await
    }

    pub async fn update(&self, id: WebhookId, draft: &WebhookDraft) -> Result<Webhook, ApiClientError> {
        self.rest.put(&format!("/webhooks/{}", id), draft).await
    }

    pub async fn delete(&self, id: WebhookId) -> Result<(), ApiClientError> {
        self.rest.delete(&format!("/webhooks/{}", id)).await
    }

    /// Ask the server to deliver a sample event to the endpoint.
    pub async fn test(&self, id: WebhookId) -> Result<WebhookTestResult, ApiClientError> {
        self.rest.post_empty(&format!("/webhooks/{}/test", id)).await
    }
}
