//! Identity types for formagent resources

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Shared behaviour of the strongly-typed resource identifiers.
pub trait EntityIdType: Copy + Eq + std::hash::Hash + fmt::Display {
    fn new(uuid: Uuid) -> Self;
    fn as_uuid(&self) -> Uuid;

    /// Generate a fresh UUIDv7 id (timestamp-sortable).
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

entity_id!(
    /// Identifier of a conversational form agent.
    AgentId
);
entity_id!(
    /// Identifier of a respondent session.
    SessionId
);
entity_id!(WebhookId);
entity_id!(InvoiceId);
