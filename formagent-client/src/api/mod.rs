//! Typed endpoint groups, one per dashboard area.
//!
//! Each group is a thin wrapper over [`ResourceClient`](crate::ResourceClient).
//! None of them touch the query cache on their own: callers run writes
//! through [`QueryCache::mutate`](crate::QueryCache::mutate) with the keys
//! from [`keys`].

mod agents;
mod billing;
mod sessions;
mod webhooks;

pub use agents::AgentsApi;
pub use billing::BillingApi;
pub use sessions::SessionsApi;
pub use webhooks::WebhooksApi;

/// Cache keys owned by the endpoint groups.
pub mod keys {
    use crate::cache::QueryKey;
    use formagent_core::{AgentId, ListAgentsParams, ListSessionsParams, SessionId};
    use serde::Serialize;

    /// Prefix of every agent entry, lists and details alike.
    pub fn agents() -> QueryKey {
        QueryKey::new(["agents"])
    }

    pub fn agent_list(params: &ListAgentsParams) -> QueryKey {
        agents().child("list").child(params_segment(params))
    }

    pub fn agent(id: AgentId) -> QueryKey {
        agents().child(id)
    }

    pub fn sessions() -> QueryKey {
        QueryKey::new(["sessions"])
    }

    pub fn session_list(params: &ListSessionsParams) -> QueryKey {
        sessions().child(params_segment(params))
    }

    pub fn session(id: SessionId) -> QueryKey {
        QueryKey::new(["session"]).child(id)
    }

    pub fn webhooks() -> QueryKey {
        QueryKey::new(["webhooks"])
    }

    pub fn invoices() -> QueryKey {
        QueryKey::new(["invoices"])
    }

    fn params_segment<P: Serialize>(params: &P) -> String {
        serde_json::to_string(params).unwrap_or_default()
    }

}
