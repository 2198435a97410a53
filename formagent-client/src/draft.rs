//! Local draft state and hydration from server snapshots.
//!
//! The draft is never authoritative. Each editable field carries a dirty
//! flag and the revision of its last local edit, so a snapshot arriving
//! from a background refetch can refresh untouched fields without
//! clobbering in-progress edits.

use bitflags::bitflags;
use formagent_core::{AgentDraft, DraftField};
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DirtyFields: u8 {
        const NAME = 1 << 0;
        const SLUG = 1 << 1;
        const FIELDS = 1 << 2;
        const PERSONA = 1 << 3;
        const APPEARANCE = 1 << 4;
        const KNOWLEDGE = 1 << 5;
    }
}

impl DirtyFields {
    pub fn of(field: DraftField) -> Self {
        match field {
            DraftField::Name => DirtyFields::NAME,
            DraftField::Slug => DirtyFields::SLUG,
            DraftField::Fields => DirtyFields::FIELDS,
            DraftField::Persona => DirtyFields::PERSONA,
            DraftField::Appearance => DirtyFields::APPEARANCE,
            DraftField::Knowledge => DirtyFields::KNOWLEDGE,
        }
    }

    pub fn fields(&self) -> Vec<DraftField> {
        DraftField::ALL
            .into_iter()
            .filter(|f| self.contains(DirtyFields::of(*f)))
            .collect()
    }
}

/// How a server snapshot is merged into a draft that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HydrationPolicy {
    /// Copy the first snapshot only; later snapshots are ignored.
    Once,
    /// Copy a snapshot only while the draft has no local edits.
    WhenClean,
    /// Copy every field that has no local edit; keep dirty fields.
    #[default]
    PreserveDirty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HydrationOutcome {
    /// Fields whose local value changed.
    pub applied: Vec<DraftField>,
    /// Dirty fields where the server now holds a different value.
    pub conflicts: Vec<DraftField>,
    /// The snapshot was not applied at all.
    pub skipped: bool,
}

#[derive(Debug, Clone)]
pub struct DraftState {
    draft: AgentDraft,
    server: Option<AgentDraft>,
    dirty: DirtyFields,
    revision: u64,
    field_revisions: [u64; DraftField::COUNT],
    policy: HydrationPolicy,
}

impl DraftState {
    /// Create-mode draft initialized from defaults.
    pub fn new(policy: HydrationPolicy) -> Self {
        Self::from_draft(AgentDraft::default(), policy)
    }

    pub fn from_draft(draft: AgentDraft, policy: HydrationPolicy) -> Self {
        Self {
            draft,
            server: None,
            dirty: DirtyFields::empty(),
            revision: 0,
            field_revisions: [0; DraftField::COUNT],
            policy,
        }
    }

    pub fn draft(&self) -> &AgentDraft {
        &self.draft
    }

    /// Last snapshot received from the server, if any.
    pub fn server(&self) -> Option<&AgentDraft> {
        self.server.as_ref()
    }

    pub fn dirty(&self) -> DirtyFields {
        self.dirty
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn is_hydrated(&self) -> bool {
        self.server.is_some()
    }

    /// Monotonic counter bumped on every local edit.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn policy(&self) -> HydrationPolicy {
        self.policy
    }

    /// Apply a local edit to `field`. Returns `false` (and records nothing)
    /// when the edit leaves the value unchanged.
    pub fn edit<F>(&mut self, field: DraftField, f: F) -> bool
    where
        F: FnOnce(&mut AgentDraft),
    {
        let before = self.draft.clone();
        f(&mut self.draft);
        if self.draft.field_eq(&before, field) {
            return false;
        }
        self.revision += 1;
        self.field_revisions[field.index()] = self.revision;
        self.dirty |= DirtyFields::of(field);
        true
    }

    /// Merge a server snapshot according to the hydration policy.
    pub fn hydrate(&mut self, snapshot: &AgentDraft) -> HydrationOutcome {
        let first = self.server.is_none();
        self.server = Some(snapshot.clone());

        let mut outcome = HydrationOutcome::default();
        match self.policy {
            HydrationPolicy::Once if !first => {
                outcome.skipped = true;
                outcome.conflicts = self.differing(snapshot, DraftField::ALL.to_vec());
            }
            HydrationPolicy::WhenClean if self.is_dirty() => {
                outcome.skipped = true;
                outcome.conflicts = self.differing(snapshot, self.dirty.fields());
            }
            HydrationPolicy::Once | HydrationPolicy::WhenClean => {
                outcome.applied = self.copy_fields(snapshot, DraftField::ALL.to_vec());
                self.dirty = DirtyFields::empty();
            }
            HydrationPolicy::PreserveDirty => {
                let mut clean = Vec::new();
                for field in DraftField::ALL {
                    if !self.dirty.contains(DirtyFields::of(field)) {
                        clean.push(field);
                    } else if self.draft.field_eq(snapshot, field) {
                        // The server caught up with the local edit.
                        self.dirty.remove(DirtyFields::of(field));
                    } else {
                        outcome.conflicts.push(field);
                    }
                }
                outcome.applied = self.copy_fields(snapshot, clean);
            }
        }
        outcome
    }

    /// Adopt `snapshot` as the server baseline without touching the draft,
    /// e.g. the resource returned by the create call that produced it.
    pub fn set_server(&mut self, snapshot: AgentDraft) {
        self.server = Some(snapshot);
    }

    /// Record that a write carrying the draft at `revision` succeeded.
    /// Fields edited after that revision stay dirty.
    pub fn mark_persisted(&mut self, revision: u64) {
        for field in DraftField::ALL {
            if self.field_revisions[field.index()] <= revision {
                self.dirty.remove(DirtyFields::of(field));
            }
        }
    }

    /// Throw away local edits in favour of the last server snapshot.
    pub fn discard_changes(&mut self) -> Vec<DraftField> {
        let Some(server) = self.server.clone() else {
            return Vec::new();
        };
        let dirty = self.dirty.fields();
        let reverted = self.copy_fields(&server, dirty);
        self.dirty = DirtyFields::empty();
        reverted
    }

    fn differing(&self, snapshot: &AgentDraft, fields: Vec<DraftField>) -> Vec<DraftField> {
        fields
            .into_iter()
            .filter(|f| !self.draft.field_eq(snapshot, *f))
            .collect()
    }

    fn copy_fields(&mut self, snapshot: &AgentDraft, fields: Vec<DraftField>) -> Vec<DraftField> {
        let mut changed = Vec::new();
        for field in fields {
            if !self.draft.field_eq(snapshot, field) {
                self.draft.copy_field(snapshot, field);
                changed.push(field);
            }
        }
        changed
    }
}
