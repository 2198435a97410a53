//! Formagent Test Utilities
//!
//! Centralized test infrastructure for the formagent workspace:
//! - `ScriptedTransport`: canned responses per route, records every request
//! - `FakeAgentServer`: in-memory agent REST API with fault injection
//! - Proptest generators for drafts and cache keys
//! - Fixtures for common scenarios

pub use formagent_core::{
    Agent, AgentDraft, AgentId, AgentStatus, Appearance, EntityIdType, FieldKind, FormField,
    HttpRequest, HttpResponse, KnowledgeRef, Method, Page, Persona, RequestBody, Transport,
    TransportError,
};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// A request as seen by a fake transport, with the (tokio) instant it
/// arrived so debounce timing can be asserted under a paused clock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub at: Instant,
    pub request: HttpRequest,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// SCRIPTED TRANSPORT
// ============================================================================

#[derive(Default)]
struct Route {
    responses: VecDeque<Result<HttpResponse, TransportError>>,
    delay: Duration,
}

#[derive(Default)]
struct ScriptState {
    routes: HashMap<(Method, String), Route>,
    requests: Vec<RecordedRequest>,
}

/// Transport answering from per-route queues. The last queued response of
/// a route is sticky and keeps being returned; unknown routes get a 404.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: Method, path: &str, response: HttpResponse) -> &Self {
        self.push(method, path, Ok(response))
    }

    pub fn respond_json<T: serde::Serialize>(
        &self,
        method: Method,
        path: &str,
        status: u16,
        body: &T,
    ) -> &Self {
        let response = HttpResponse::json(status, body).expect("fixture body serializes");
        self.push(method, path, Ok(response))
    }

    pub fn fail(&self, method: Method, path: &str, error: TransportError) -> &Self {
        self.push(method, path, Err(error))
    }

    pub fn delay(&self, method: Method, path: &str, delay: Duration) -> &Self {
        let mut state = lock(&self.state);
        state
            .routes
            .entry((method, path.to_string()))
            .or_default()
            .delay = delay;
        drop(state);
        self
    }

    fn push(
        &self,
        method: Method,
        path: &str,
        response: Result<HttpResponse, TransportError>,
    ) -> &Self {
        let mut state = lock(&self.state);
        state
            .routes
            .entry((method, path.to_string()))
            .or_default()
            .responses
            .push_back(response);
        drop(state);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.state)
            .requests
            .iter()
            .map(|r| r.request.clone())
            .collect()
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        lock(&self.state)
            .requests
            .iter()
            .filter(|r| r.request.method == method && r.request.path == path)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let (delay, response) = {
            let mut state = lock(&self.state);
            state.requests.push(RecordedRequest {
                at: Instant::now(),
                request: request.clone(),
            });
            match state.routes.get_mut(&(request.method, request.path.clone())) {
                Some(route) => {
                    let response = if route.responses.len() > 1 {
                        route.responses.pop_front()
                    } else {
                        route.responses.front().cloned()
                    };
                    (route.delay, response)
                }
                None => (Duration::ZERO, None),
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        response.unwrap_or_else(|| {
            Ok(HttpResponse::new(
                404,
                format!(r#"{{"message":"no route for {} {}"}}"#, request.method, request.path),
            ))
        })
    }
}

// ============================================================================
// FAKE AGENT SERVER
// ============================================================================

#[derive(Default)]
struct FakeState {
    agents: HashMap<AgentId, Agent>,
    requests: Vec<RecordedRequest>,
    failing_writes: usize,
    write_delays: VecDeque<Duration>,
    unauthorized: bool,
}

/// In-memory implementation of the agent endpoints:
/// `GET/POST /agents`, `GET/PATCH/DELETE /agents/{id}`,
/// `POST /agents/{id}/publish|unpublish|duplicate`.
#[derive(Clone, Default)]
pub struct FakeAgentServer {
    state: Arc<Mutex<FakeState>>,
}

impl FakeAgentServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(agent: Agent) -> Self {
        let server = Self::new();
        server.insert(agent);
        server
    }

    pub fn insert(&self, agent: Agent) {
        lock(&self.state).agents.insert(agent.id, agent);
    }

    pub fn agent(&self, id: AgentId) -> Option<Agent> {
        lock(&self.state).agents.get(&id).cloned()
    }

    /// Mutate a stored agent as another client would.
    pub fn modify(&self, id: AgentId, f: impl FnOnce(&mut Agent)) {
        if let Some(agent) = lock(&self.state).agents.get_mut(&id) {
            f(agent);
            agent.updated_at = Utc::now();
        }
    }

    /// The next `n` writes (POST/PATCH/DELETE) answer with HTTP 500.
    pub fn fail_next_writes(&self, n: usize) {
        lock(&self.state).failing_writes = n;
    }

    /// Delay the next write by `delay` before it is applied.
    pub fn delay_next_write(&self, delay: Duration) {
        lock(&self.state).write_delays.push_back(delay);
    }

    pub fn set_unauthorized(&self, unauthorized: bool) {
        lock(&self.state).unauthorized = unauthorized;
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.recorded().into_iter().map(|r| r.request).collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        lock(&self.state)
            .requests
            .iter()
            .filter(|r| r.request.method == method && r.request.path == path)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        lock(&self.state).requests.len()
    }

    /// Bodies of every PATCH sent so far, decoded as drafts.
    pub fn patch_bodies(&self) -> Vec<AgentDraft> {
        lock(&self.state)
            .requests
            .iter()
            .filter(|r| r.request.method == Method::Patch)
            .filter_map(|r| match &r.request.body {
                RequestBody::Json(value) => serde_json::from_value(value.clone()).ok(),
                _ => None,
            })
            .collect()
    }

    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        let mut state = lock(&self.state);
        if state.unauthorized {
            return error_response(401, "Unauthorized");
        }

        let is_write = request.method != Method::Get;
        if is_write && state.failing_writes > 0 {
            state.failing_writes -= 1;
            return error_response(500, "Internal server error");
        }

        let segments: Vec<&str> = request
            .path
            .trim_start_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        match (request.method, segments.as_slice()) {
            (Method::Get, ["agents"]) => {
                let mut items: Vec<Agent> = state.agents.values().cloned().collect();
                items.sort_by_key(|a| a.created_at);
                let total = items.len() as u64;
                json_response(
                    200,
                    &Page {
                        items,
                        page: 1,
                        per_page: 50,
                        total,
                    },
                )
            }
            (Method::Post, ["agents"]) => match decode_draft(request) {
                Some(draft) => {
                    let now = Utc::now();
                    let agent = agent_from_draft(AgentId::now_v7(), &draft, now);
                    state.agents.insert(agent.id, agent.clone());
                    json_response(201, &agent)
                }
                None => error_response(400, "Invalid agent body"),
            },
            (method, ["agents", id, rest @ ..]) => {
                let Some(id) = parse_id(id) else {
                    return error_response(400, "Invalid agent id");
                };
                if !state.agents.contains_key(&id) {
                    return error_response(404, "Agent not found");
                }
                match (method, rest) {
                    (Method::Get, []) => json_response(200, &state.agents[&id]),
                    (Method::Patch, []) => match decode_draft(request) {
                        Some(draft) => {
                            let agent = state.agents.get_mut(&id).expect("checked above");
                            let created_at = agent.created_at;
                            let status = agent.status;
                            *agent = agent_from_draft(id, &draft, created_at);
                            agent.status = status;
                            agent.updated_at = Utc::now();
                            json_response(200, &*agent)
                        }
                        None => error_response(400, "Invalid agent body"),
                    },
                    (Method::Delete, []) => {
                        state.agents.remove(&id);
                        HttpResponse::new(204, Vec::new())
                    }
                    (Method::Post, ["publish"]) | (Method::Post, ["unpublish"]) => {
                        let agent = state.agents.get_mut(&id).expect("checked above");
                        agent.status = if rest == ["publish"] {
                            AgentStatus::Published
                        } else {
                            AgentStatus::Draft
                        };
                        agent.updated_at = Utc::now();
                        json_response(200, &*agent)
                    }
                    (Method::Post, ["duplicate"]) => {
                        let source = state.agents[&id].clone();
                        let mut copy = agent_from_draft(AgentId::now_v7(), &source.to_draft(), Utc::now());
                        copy.name = format!("{} (copy)", source.name);
                        copy.slug = format!("{}-copy", source.slug);
                        state.agents.insert(copy.id, copy.clone());
                        json_response(201, &copy)
                    }
                    _ => error_response(404, "Not found"),
                }
            }
            _ => error_response(404, "Not found"),
        }
    }
}

#[async_trait]
impl Transport for FakeAgentServer {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let delay = {
            let mut state = lock(&self.state);
            state.requests.push(RecordedRequest {
                at: Instant::now(),
                request: request.clone(),
            });
            if request.method != Method::Get {
                state.write_delays.pop_front()
            } else {
                None
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.handle(&request))
    }
}

fn parse_id(raw: &str) -> Option<AgentId> {
    uuid::Uuid::parse_str(raw).ok().map(AgentId::new)
}

fn decode_draft(request: &HttpRequest) -> Option<AgentDraft> {
    match &request.body {
        RequestBody::Json(value) => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}

fn json_response<T: serde::Serialize>(status: u16, body: &T) -> HttpResponse {
    HttpResponse::json(status, body).expect("fixture body serializes")
}

fn error_response(status: u16, message: &str) -> HttpResponse {
    json_response(status, &serde_json::json!({ "message": message }))
}

fn agent_from_draft(id: AgentId, draft: &AgentDraft, created_at: chrono::DateTime<Utc>) -> Agent {
    Agent {
        id,
        name: draft.name.clone(),
        slug: draft.slug.clone(),
        status: AgentStatus::Draft,
        fields: draft.fields.clone(),
        persona: draft.persona.clone(),
        appearance: draft.appearance.clone(),
        knowledge: draft.knowledge.clone(),
        created_at,
        updated_at: created_at,
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// A draft that passes validation.
pub fn sample_draft() -> AgentDraft {
    AgentDraft {
        name: "Lead intake".to_string(),
        slug: "lead-intake".to_string(),
        fields: vec![
            FormField::new("email", "Email address", FieldKind::Email).required(),
            FormField::new("company", "Company", FieldKind::Text),
        ],
        persona: Persona::default(),
        appearance: Appearance::default(),
        knowledge: vec![KnowledgeRef {
            document_id: "doc-1".to_string(),
            title: "Pricing FAQ".to_string(),
        }],
    }
}

/// A persisted agent built from [`sample_draft`].
pub fn sample_agent() -> Agent {
    agent_from_draft(AgentId::now_v7(), &sample_draft(), Utc::now())
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_field_kind() -> impl Strategy<Value = FieldKind> {
        prop_oneof![
            Just(FieldKind::Text),
            Just(FieldKind::LongText),
            Just(FieldKind::Email),
            Just(FieldKind::Number),
            Just(FieldKind::Select),
            Just(FieldKind::Boolean),
        ]
    }

    pub fn arb_form_field() -> impl Strategy<Value = FormField> {
        ("[a-z][a-z_]{0,11}", "[A-Za-z ]{1,24}", arb_field_kind(), any::<bool>()).prop_map(
            |(key, label, kind, required)| {
                let mut field = FormField::new(key, label, kind);
                field.required = required;
                field
            },
        )
    }

    /// Drafts with arbitrary (possibly empty) names, slugs and field lists.
    pub fn arb_draft() -> impl Strategy<Value = AgentDraft> {
        (
            "[A-Za-z ]{0,16}",
            "[a-z0-9-]{0,16}",
            prop::collection::vec(arb_form_field(), 0..4),
        )
            .prop_map(|(name, slug, fields)| AgentDraft {
                name,
                slug,
                fields,
                ..AgentDraft::default()
            })
    }

    pub fn arb_key_segments() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[a-z]{1,6}", 1..5)
    }
}
