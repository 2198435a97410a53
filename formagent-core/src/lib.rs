//! Formagent Core - Entity Types
//!
//! Pure data structures shared by every formagent crate. Nothing in here
//! performs I/O; the `Transport` trait is the seam where the client crate
//! plugs in a real HTTP stack.

pub mod agent;
pub mod identity;
pub mod resources;
pub mod transport;
pub mod validation;

pub use agent::{
    slugify, Agent, AgentDraft, AgentStatus, Appearance, DraftField, FieldKind, FormField,
    KnowledgeRef, Persona,
};
pub use identity::{AgentId, EntityIdType, InvoiceId, SessionId, Timestamp, WebhookId};
pub use resources::{
    Invoice, InvoiceStatus, ListAgentsParams, ListSessionsParams, Page, Session, SessionStatus,
    Webhook, WebhookDraft, WebhookEvent, WebhookTestResult,
};
pub use transport::{
    HttpRequest, HttpResponse, Method, MultipartPart, RequestBody, Transport, TransportError,
};
pub use validation::{ValidationError, ValidationErrors};
