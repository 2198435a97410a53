//! Agent resource and its client-side draft shape.

use crate::identity::{AgentId, Timestamp};
use serde::{Deserialize, Serialize};

// ============================================================================
// STATUS
// ============================================================================

/// Publication status of an agent. Only the server moves an agent between
/// states; the client requests transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Draft => "draft",
            AgentStatus::Published => "published",
            AgentStatus::Archived => "archived",
        }
    }
}

// ============================================================================
// EDITABLE SUB-SHAPES
// ============================================================================

/// Kind of answer a form field collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    LongText,
    Email,
    Phone,
    Number,
    Date,
    Select,
    MultiSelect,
    Boolean,
    File,
}

/// A single question the agent collects during a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub key: String,
    pub label: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
}

impl FormField {
    pub fn new(key: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            kind,
            required: false,
            options: Vec::new(),
            help_text: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Conversational voice of the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub display_name: String,
    pub tone: String,
    #[serde(default)]
    pub greeting: String,
    #[serde(default)]
    pub instructions: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            display_name: "Assistant".to_string(),
            tone: "friendly".to_string(),
            greeting: "Hi! I have a few quick questions for you.".to_string(),
            instructions: String::new(),
        }
    }
}

/// Visual settings of the embedded chat widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appearance {
    pub primary_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub show_branding: bool,
}

impl Default for Appearance {
    fn default() -> Self {
        Self {
            primary_color: "#4f46e5".to_string(),
            avatar_url: None,
            show_branding: true,
        }
    }
}

/// Reference to a knowledge document uploaded for the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeRef {
    pub document_id: String,
    pub title: String,
}

// ============================================================================
// AGENT
// ============================================================================

/// Server-owned agent resource as returned by the REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub fields: Vec<FormField>,
    #[serde(default)]
    pub persona: Persona,
    #[serde(default)]
    pub appearance: Appearance,
    #[serde(default)]
    pub knowledge: Vec<KnowledgeRef>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Agent {
    /// Copy of the editable fields.
    pub fn to_draft(&self) -> AgentDraft {
        AgentDraft {
            name: self.name.clone(),
            slug: self.slug.clone(),
            fields: self.fields.clone(),
            persona: self.persona.clone(),
            appearance: self.appearance.clone(),
            knowledge: self.knowledge.clone(),
        }
    }
}

// ============================================================================
// DRAFT
// ============================================================================

/// Editable fields of an agent, tracked individually by the draft state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftField {
    Name,
    Slug,
    Fields,
    Persona,
    Appearance,
    Knowledge,
}

impl DraftField {
    pub const COUNT: usize = 6;

    pub const ALL: [DraftField; Self::COUNT] = [
        DraftField::Name,
        DraftField::Slug,
        DraftField::Fields,
        DraftField::Persona,
        DraftField::Appearance,
        DraftField::Knowledge,
    ];

    pub fn index(&self) -> usize {
        match self {
            DraftField::Name => 0,
            DraftField::Slug => 1,
            DraftField::Fields => 2,
            DraftField::Persona => 3,
            DraftField::Appearance => 4,
            DraftField::Knowledge => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DraftField::Name => "name",
            DraftField::Slug => "slug",
            DraftField::Fields => "fields",
            DraftField::Persona => "persona",
            DraftField::Appearance => "appearance",
            DraftField::Knowledge => "knowledge",
        }
    }
}

/// Client-local, uncommitted copy of an agent's editable fields.
///
/// This is also the request body of create and update calls; the server
/// assigns `id`, `status` and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentDraft {
    pub name: String,
    pub slug: String,
    pub fields: Vec<FormField>,
    pub persona: Persona,
    pub appearance: Appearance,
    pub knowledge: Vec<KnowledgeRef>,
}

impl AgentDraft {
    /// Whether `field` holds the same value in both drafts.
    pub fn field_eq(&self, other: &AgentDraft, field: DraftField) -> bool {
        match field {
            DraftField::Name => self.name == other.name,
            DraftField::Slug => self.slug == other.slug,
            DraftField::Fields => self.fields == other.fields,
            DraftField::Persona => self.persona == other.persona,
            DraftField::Appearance => self.appearance == other.appearance,
            DraftField::Knowledge => self.knowledge == other.knowledge,
        }
    }

    /// Overwrite `field` with the value held by `source`.
    pub fn copy_field(&mut self, source: &AgentDraft, field: DraftField) {
        match field {
            DraftField::Name => self.name.clone_from(&source.name),
            DraftField::Slug => self.slug.clone_from(&source.slug),
            DraftField::Fields => self.fields.clone_from(&source.fields),
            DraftField::Persona => self.persona.clone_from(&source.persona),
            DraftField::Appearance => self.appearance.clone_from(&source.appearance),
            DraftField::Knowledge => self.knowledge.clone_from(&source.knowledge),
        }
    }
}

/// Derive a URL slug from a display name: lowercase ASCII alphanumerics
/// separated by single hyphens.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    slug
}
