use super::keys;
use crate::api_client::{ApiClientError, ResourceClient};
use crate::cache::{CacheError, QueryCache};
use formagent_core::{
    Agent, AgentDraft, AgentId, KnowledgeRef, ListAgentsParams, MultipartPart, Page,
};

/// `/agents` endpoints.
#[derive(Clone)]
pub struct AgentsApi {
    rest: ResourceClient,
}

impl AgentsApi {
    pub fn new(rest: ResourceClient) -> Self {
        Self { rest }
    }

    pub async fn list(&self, params: &ListAgentsParams) -> Result<Page<Agent>, ApiClientError> {
        self.rest.get_query("/agents", params).await
    }

    pub async fn get(&self, id: AgentId) -> Result<Agent, ApiClientError> {
        self.rest.get(&format!("/agents/{}", id)).await
    }

    pub async fn create(&self, draft: &AgentDraft) -> Result<Agent, ApiClientError> {
        self.rest.post("/agents", draft).await
    }

    /// Full-draft PATCH; the server replaces every editable field.
    pub async fn update(&self, id: AgentId, draft: &AgentDraft) -> Result<Agent, ApiClientError> {
        self.rest.patch(&format!("/agents/{}", id), draft).await
    }

    pub async fn delete(&self, id: AgentId) -> Result<(), ApiClientError> {
        self.rest.delete(&format!("/agents/{}", id)).await
    }

    pub async fn publish(&self, id: AgentId) -> Result<Agent, ApiClientError> {
        self.rest.post_empty(&format!("/agents/{}/publish", id)).await
    }

    pub async fn unpublish(&self, id: AgentId) -> Result<Agent, ApiClientError> {
        self.rest.post_empty(&format!("/agents/{}/unpublish", id)).await
    }

    pub async fn duplicate(&self, id: AgentId) -> Result<Agent, ApiClientError> {
        self.rest.post_empty(&format!("/agents/{}/duplicate", id)).await
    }

    /// Attach a knowledge document to the agent.
    pub async fn upload_knowledge(
        &self,
        id: AgentId,
        title: &str,
        file_name: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<KnowledgeRef, ApiClientError> {
        let parts = vec![
            MultipartPart::Text {
                name: "title".to_string(),
                value: title.to_string(),
            },
            MultipartPart::File {
                name: "file".to_string(),
                file_name: file_name.to_string(),
                content_type: content_type.map(str::to_string),
                bytes,
            },
        ];
        self.rest
            .upload(&format!("/agents/{}/knowledge", id), parts)
            .await
    }

    /// List through the cache under [`keys::agent_list`].
    pub async fn cached_list(
        &self,
        cache: &QueryCache,
        params: &ListAgentsParams,
    ) -> Result<Page<Agent>, CacheError> {
        let api = self.clone();
        let owned = params.clone();
        cache
            .fetch(&keys::agent_list(params), move || async move {
                api.list(&owned).await
            })
            .await
    }

    /// Detail through the cache under [`keys::agent`].
    pub async fn cached_get(&self, cache: &QueryCache, id: AgentId) -> Result<Agent, CacheError> {
        let api = self.clone();
        cache
            .fetch(&keys::agent(id), move || async move { api.get(id).await })
            .await
    }
}
