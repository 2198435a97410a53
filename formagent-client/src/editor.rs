//! Agent builder: one agent's draft, its autosave and the explicit actions.
//!
//! Every write (create, update, publish, unpublish, delete) takes a
//! generation number when it is issued. A response whose generation is no
//! longer the newest skips its side effects, so a slow autosave cannot
//! announce itself after a newer explicit save, and vice versa.

use crate::api::{keys, AgentsApi};
use crate::api_client::ApiClientError;
use crate::autosave::{AutosaveHandle, AutosaveState, AutosaveTarget, Persisted};
use crate::cache::{CacheError, CacheEvent, QueryCache};
use crate::context::ClientContext;
use crate::draft::{DirtyFields, DraftState};
use crate::notifications::Notifier;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use formagent_core::{
    slugify, Agent, AgentDraft, AgentId, AgentStatus, Appearance, DraftField, FormField,
    KnowledgeRef, Persona, ValidationErrors,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    /// Local validation failed; no request was sent.
    #[error("{0}")]
    Validation(ValidationErrors),
    #[error("Save the agent before using this action")]
    NotPersisted,
    #[error("The agent is still being created")]
    SaveInProgress,
    #[error("This agent has been deleted")]
    Deleted,
    #[error(transparent)]
    Api(#[from] ApiClientError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl EditorError {
    pub fn is_unauthorized(&self) -> bool {
        match self {
            EditorError::Api(err) => err.is_unauthorized(),
            EditorError::Cache(err) => err.api_error().is_some_and(ApiClientError::is_unauthorized),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorMode {
    /// The agent does not exist remotely yet.
    Create,
    Edit(AgentId),
}

impl EditorMode {
    pub fn id(&self) -> Option<AgentId> {
        match self {
            EditorMode::Create => None,
            EditorMode::Edit(id) => Some(*id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created(AgentId),
    Updated { at: DateTime<Utc> },
    /// A newer write was issued while this one was in flight; the server
    /// accepted it but its side effects were skipped.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveOrigin {
    Explicit,
    Autosave,
}

struct EditorState {
    mode: EditorMode,
    draft: DraftState,
    slug_touched: bool,
    field_errors: ValidationErrors,
    last_saved_at: Option<DateTime<Utc>>,
    status: Option<AgentStatus>,
    conflicts: Vec<DraftField>,
    creating: bool,
    deleted: bool,
    /// Bumped whenever a write lands; snapshots fetched across a landing
    /// write are dropped in favour of the refetch its invalidation starts.
    settled_writes: u64,
}

struct EditorShared {
    agents: AgentsApi,
    cache: QueryCache,
    notifier: Notifier,
    state: Mutex<EditorState>,
    generation: AtomicU64,
}

impl EditorShared {
    fn new(ctx: &ClientContext, mode: EditorMode, draft: DraftState, status: Option<AgentStatus>) -> Arc<Self> {
        Arc::new(Self {
            agents: ctx.api().agents(),
            cache: ctx.cache().clone(),
            notifier: ctx.notifier().clone(),
            state: Mutex::new(EditorState {
                mode,
                draft,
                slug_touched: false,
                field_errors: ValidationErrors::default(),
                last_saved_at: None,
                status,
                conflicts: Vec::new(),
                creating: false,
                deleted: false,
                settled_writes: 0,
            }),
            generation: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, EditorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_latest(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn persisted_id(&self) -> Result<AgentId, EditorError> {
        let state = self.lock();
        if state.deleted {
            return Err(EditorError::Deleted);
        }
        state.mode.id().ok_or(EditorError::NotPersisted)
    }

    async fn create(&self) -> Result<AgentId, EditorError> {
        let (draft, revision) = {
            let mut state = self.lock();
            if state.creating {
                return Err(EditorError::SaveInProgress);
            }
            state.creating = true;
            (state.draft.draft().clone(), state.draft.revision())
        };
        self.next_generation();
        let result = self.agents.create(&draft).await;

        let agent = {
            let mut state = self.lock();
            state.creating = false;
            match result {
                Ok(agent) => {
                    state.mode = EditorMode::Edit(agent.id);
                    state.status = Some(agent.status);
                    state.draft.mark_persisted(revision);
                    state.draft.set_server(agent.to_draft());
                    state.last_saved_at = Some(Utc::now());
                    state.settled_writes += 1;
                    agent
                }
                Err(err) => {
                    drop(state);
                    self.report_failure(&err, SaveOrigin::Explicit, true);
                    return Err(err.into());
                }
            }
        };

        tracing::info!(agent_id = %agent.id, "agent created");
        self.cache.invalidate(&keys::agents());
        self.notifier.success("Agent created");
        Ok(agent.id)
    }

    async fn update(&self, id: AgentId, origin: SaveOrigin) -> Result<SaveOutcome, ApiClientError> {
        let (draft, revision) = {
            let state = self.lock();
            (state.draft.draft().clone(), state.draft.revision())
        };
        let generation = self.next_generation();
        tracing::debug!(agent_id = %id, generation, ?origin, "saving agent");

        let result = self.agents.update(id, &draft).await;
        let latest = self.is_latest(generation);
        match result {
            Ok(_) if !latest => {
                tracing::debug!(agent_id = %id, generation, "save superseded by a newer write");
                Ok(SaveOutcome::Superseded)
            }
            Ok(_) => {
                let at = Utc::now();
                {
                    let mut state = self.lock();
                    state.draft.mark_persisted(revision);
                    state.last_saved_at = Some(at);
                    state.settled_writes += 1;
                }
                self.cache.invalidate(&keys::agents());
                if origin == SaveOrigin::Explicit {
                    self.notifier.success("Agent saved");
                }
                Ok(SaveOutcome::Updated { at })
            }
            Err(err) => {
                self.report_failure(&err, origin, latest);
                Err(err)
            }
        }
    }

    async fn transition(&self, publish: bool) -> Result<AgentStatus, EditorError> {
        let id = self.persisted_id()?;
        let generation = self.next_generation();
        let result = if publish {
            self.agents.publish(id).await
        } else {
            self.agents.unpublish(id).await
        };
        let latest = self.is_latest(generation);
        match result {
            Ok(agent) => {
                tracing::info!(agent_id = %id, status = agent.status.as_str(), "agent status changed");
                if latest {
                    // The new status reaches the editor through the refetch.
                    self.cache.invalidate(&keys::agents());
                    self.notifier.success(if publish {
                        "Agent published"
                    } else {
                        "Agent unpublished"
                    });
                }
                Ok(agent.status)
            }
            Err(err) => {
                self.report_failure(&err, SaveOrigin::Explicit, latest);
                Err(err.into())
            }
        }
    }

    fn report_failure(&self, err: &ApiClientError, origin: SaveOrigin, latest: bool) {
        tracing::warn!(?origin, latest, error = %err, "agent write failed");
        // 401 already redirected to login; autosave failures stay silent.
        if origin == SaveOrigin::Explicit && latest && !err.is_unauthorized() {
            self.notifier.error(err.to_string());
        }
    }

    async fn refresh(&self, id: AgentId) {
        let settled = self.lock().settled_writes;
        match self.agents.cached_get(&self.cache, id).await {
            Ok(agent) => self.apply_snapshot(&agent, settled),
            Err(err) => tracing::warn!(agent_id = %id, error = %err, "failed to refresh agent"),
        }
    }

    fn apply_snapshot(&self, agent: &Agent, settled_before: u64) {
        let mut state = self.lock();
        if state.deleted || state.settled_writes != settled_before {
            return;
        }
        state.status = Some(agent.status);
        let outcome = state.draft.hydrate(&agent.to_draft());
        if !outcome.conflicts.is_empty() {
            tracing::debug!(agent_id = %agent.id, conflicts = ?outcome.conflicts, "kept local edits over newer server values");
        }
        state.conflicts = outcome.conflicts;
    }
}

#[async_trait]
impl AutosaveTarget for EditorShared {
    fn is_ready(&self) -> bool {
        let state = self.lock();
        !state.deleted
            && matches!(state.mode, EditorMode::Edit(_))
            && state.draft.draft().has_required_fields()
    }

    async fn persist(&self) -> Result<Persisted, ApiClientError> {
        let (mode, dirty) = {
            let state = self.lock();
            (state.mode, state.draft.is_dirty())
        };
        let EditorMode::Edit(id) = mode else {
            return Ok(Persisted::Unchanged);
        };
        if !dirty {
            return Ok(Persisted::Unchanged);
        }
        match self.update(id, SaveOrigin::Autosave).await? {
            SaveOutcome::Superseded => Ok(Persisted::Unchanged),
            SaveOutcome::Updated { .. } | SaveOutcome::Created(_) => Ok(Persisted::Written),
        }
    }
}

fn spawn_watcher(
    shared: Arc<EditorShared>,
    id: AgentId,
    mut events: broadcast::Receiver<CacheEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let key = keys::agent(id);
        loop {
            match events.recv().await {
                Ok(CacheEvent::Invalidated(prefix)) if key.starts_with(&prefix) => {}
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(agent_id = %id, skipped, "editor lagged behind cache events");
                }
                Err(RecvError::Closed) => return,
            }
            shared.refresh(id).await;
        }
    })
}

/// Editor for a single agent. Setters update the local draft and feed the
/// autosave scheduler; [`save`](Self::save) and the status actions persist
/// immediately.
///
/// Dropping the editor cancels a pending autosave. Use
/// [`close`](Self::close) to flush it according to `autosave.flush_on_close`.
pub struct AgentEditor {
    shared: Arc<EditorShared>,
    autosave: Option<AutosaveHandle>,
    watcher: Option<JoinHandle<()>>,
    flush_on_close: bool,
}

impl AgentEditor {
    /// Editor for a new agent, initialized from defaults.
    pub fn create(ctx: &ClientContext) -> Self {
        let policy = ctx.config().autosave.hydration;
        let shared = EditorShared::new(ctx, EditorMode::Create, DraftState::new(policy), None);
        Self::assemble(ctx, shared, None)
    }

    /// Editor for an existing agent, hydrated from the `agents/<id>` entry.
    pub async fn open(ctx: &ClientContext, id: AgentId) -> Result<Self, EditorError> {
        // Subscribe before loading so no invalidation slips in between.
        let events = ctx.cache().subscribe();
        let agent = ctx.api().agents().cached_get(ctx.cache(), id).await?;

        let mut draft = DraftState::new(ctx.config().autosave.hydration);
        draft.hydrate(&agent.to_draft());
        let shared = EditorShared::new(ctx, EditorMode::Edit(id), draft, Some(agent.status));
        let watcher = spawn_watcher(shared.clone(), id, events);
        tracing::debug!(agent_id = %id, "agent editor opened");
        Ok(Self::assemble(ctx, shared, Some(watcher)))
    }

    fn assemble(ctx: &ClientContext, shared: Arc<EditorShared>, watcher: Option<JoinHandle<()>>) -> Self {
        let config = ctx.config().autosave.clone();
        let flush_on_close = config.flush_on_close;
        let autosave = AutosaveHandle::spawn(shared.clone(), config);
        Self {
            shared,
            autosave: Some(autosave),
            watcher,
            flush_on_close,
        }
    }

    // ------------------------------------------------------------------
    // Field setters
    // ------------------------------------------------------------------

    /// In create mode the slug follows the name until it is edited directly.
    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        let changed = {
            let mut state = self.shared.lock();
            let mut changed = state.draft.edit(DraftField::Name, |d| d.name.clone_from(&name));
            if state.mode == EditorMode::Create && !state.slug_touched {
                let slug = slugify(&name);
                changed |= state.draft.edit(DraftField::Slug, |d| d.slug = slug);
            }
            changed
        };
        if changed {
            self.touch();
        }
    }

    pub fn set_slug(&self, slug: impl Into<String>) {
        let slug = slug.into();
        self.shared.lock().slug_touched = true;
        self.edit(DraftField::Slug, |d| d.slug = slug);
    }

    pub fn set_fields(&self, fields: Vec<FormField>) {
        self.edit(DraftField::Fields, |d| d.fields = fields);
    }

    pub fn add_field(&self, field: FormField) {
        self.edit(DraftField::Fields, |d| d.fields.push(field));
    }

    pub fn remove_field(&self, key: &str) {
        self.edit(DraftField::Fields, |d| d.fields.retain(|f| f.key != key));
    }

    pub fn set_persona(&self, persona: Persona) {
        self.edit(DraftField::Persona, |d| d.persona = persona);
    }

    pub fn set_appearance(&self, appearance: Appearance) {
        self.edit(DraftField::Appearance, |d| d.appearance = appearance);
    }

    pub fn set_knowledge(&self, knowledge: Vec<KnowledgeRef>) {
        self.edit(DraftField::Knowledge, |d| d.knowledge = knowledge);
    }

    fn edit<F>(&self, field: DraftField, f: F)
    where
        F: FnOnce(&mut AgentDraft),
    {
        let changed = self.shared.lock().draft.edit(field, f);
        if changed {
            self.touch();
        }
    }

    fn touch(&self) {
        if let Some(autosave) = &self.autosave {
            autosave.touch();
        }
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    /// Validate and persist the whole draft now.
    pub async fn save(&mut self) -> Result<SaveOutcome, EditorError> {
        let mode = {
            let mut state = self.shared.lock();
            if state.deleted {
                return Err(EditorError::Deleted);
            }
            if let Err(errors) = state.draft.draft().validate() {
                tracing::debug!(%errors, "save blocked by validation");
                state.field_errors = errors.clone();
                return Err(EditorError::Validation(errors));
            }
            state.field_errors = ValidationErrors::default();
            state.mode
        };

        match mode {
            EditorMode::Create => {
                let id = self.shared.create().await?;
                if self.watcher.is_none() {
                    let events = self.shared.cache.subscribe();
                    self.watcher = Some(spawn_watcher(self.shared.clone(), id, events));
                }
                // Edits typed while the create was in flight were never armed.
                if self.shared.lock().draft.is_dirty() {
                    self.touch();
                }
                Ok(SaveOutcome::Created(id))
            }
            EditorMode::Edit(id) => Ok(self.shared.update(id, SaveOrigin::Explicit).await?),
        }
    }

    pub async fn publish(&self) -> Result<AgentStatus, EditorError> {
        self.shared.transition(true).await
    }

    pub async fn unpublish(&self) -> Result<AgentStatus, EditorError> {
        self.shared.transition(false).await
    }

    /// Delete the agent remotely and shut the editor down. Pending autosave
    /// edits are discarded.
    pub async fn delete(&mut self) -> Result<(), EditorError> {
        let id = self.shared.persisted_id()?;
        self.shared.next_generation();
        if let Err(err) = self.shared.agents.delete(id).await {
            self.shared.report_failure(&err, SaveOrigin::Explicit, true);
            return Err(err.into());
        }

        self.shared.lock().deleted = true;
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if let Some(autosave) = self.autosave.take() {
            autosave.close(false).await;
        }
        tracing::info!(agent_id = %id, "agent deleted");
        self.shared.cache.invalidate(&keys::agents());
        self.shared.notifier.success("Agent deleted");
        Ok(())
    }

    /// Write a pending autosave now.
    pub async fn flush(&self) {
        if let Some(autosave) = &self.autosave {
            autosave.flush().await;
        }
    }

    /// Revert dirty fields to the last server snapshot.
    pub fn discard_local_changes(&self) -> Vec<DraftField> {
        let mut state = self.shared.lock();
        state.conflicts.clear();
        state.draft.discard_changes()
    }

    /// Stop watching and autosaving; a pending autosave is written first
    /// when `flush_on_close` is set.
    pub async fn close(mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if let Some(autosave) = self.autosave.take() {
            autosave.close(self.flush_on_close).await;
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn draft(&self) -> AgentDraft {
        self.shared.lock().draft.draft().clone()
    }

    pub fn mode(&self) -> EditorMode {
        self.shared.lock().mode
    }

    pub fn id(&self) -> Option<AgentId> {
        self.mode().id()
    }

    pub fn dirty(&self) -> DirtyFields {
        self.shared.lock().draft.dirty()
    }

    pub fn field_errors(&self) -> ValidationErrors {
        self.shared.lock().field_errors.clone()
    }

    /// Inline error for `field` from the last explicit save.
    pub fn field_error(&self, field: DraftField) -> Option<String> {
        self.shared
            .lock()
            .field_errors
            .for_field(field)
            .map(str::to_string)
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().last_saved_at
    }

    /// Server-side status as of the last snapshot.
    pub fn status(&self) -> Option<AgentStatus> {
        self.shared.lock().status
    }

    /// Dirty fields whose server value changed underneath them.
    pub fn conflicts(&self) -> Vec<DraftField> {
        self.shared.lock().conflicts.clone()
    }

    pub fn is_deleted(&self) -> bool {
        self.shared.lock().deleted
    }

    pub fn autosave_state(&self) -> Option<AutosaveState> {
        self.autosave.as_ref().map(AutosaveHandle::state)
    }

    pub fn subscribe_autosave(&self) -> Option<watch::Receiver<AutosaveState>> {
        self.autosave.as_ref().map(AutosaveHandle::subscribe)
    }
}

impl Drop for AgentEditor {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}
