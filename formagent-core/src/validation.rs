//! Local, pre-request validation of agent drafts.
//!
//! Validation runs before any network call; a failing draft never leaves
//! the client.

use crate::agent::{AgentDraft, DraftField};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single field-level problem, displayed next to the offending input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field: DraftField,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: DraftField, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// All problems found in one validation pass, in field order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter()
    }

    /// Message for `field`, if it failed.
    pub fn for_field(&self, field: DraftField) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    fn push(&mut self, field: DraftField, message: &str) {
        self.errors.push(ValidationError::new(field, message));
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl AgentDraft {
    /// Required-field check shared by explicit save and the autosave guard.
    pub fn has_required_fields(&self) -> bool {
        !self.name.trim().is_empty() && !self.slug.trim().is_empty() && !self.fields.is_empty()
    }

    /// Validate the draft for an explicit save.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();

        if self.name.trim().is_empty() {
            errors.push(DraftField::Name, "Agent name is required");
        }

        let slug = self.slug.trim();
        if slug.is_empty() {
            errors.push(DraftField::Slug, "Slug is required");
        } else if !is_valid_slug(slug) {
            errors.push(
                DraftField::Slug,
                "Slug may only contain lowercase letters, digits and hyphens",
            );
        }

        if self.fields.is_empty() {
            errors.push(DraftField::Fields, "Add at least one field");
        } else if self.fields.iter().any(|f| f.key.trim().is_empty()) {
            errors.push(DraftField::Fields, "Every field needs a key");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn is_valid_slug(slug: &str) -> bool {
    !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
