mod common;

use common::{drain, harness, ms_between, sleep_ms, test_config, Harness, START_ROUTE};
use formagent_client::{
    keys, CacheEvent, DirtyFields, EditorError, EditorMode, HydrationPolicy, NotificationLevel,
    SaveOutcome, SyncStatus,
};
use formagent_core::{AgentStatus, DraftField, EntityIdType, FieldKind, FormField, ListAgentsParams};
use formagent_test_utils::{sample_agent, sample_draft, Agent, AgentId, FakeAgentServer, Method};
use std::time::Duration;
use tokio::time::Instant;

fn setup() -> (FakeAgentServer, Agent, Harness) {
    let agent = sample_agent();
    let server = FakeAgentServer::with_agent(agent.clone());
    let h = harness(server.clone(), test_config());
    (server, agent, h)
}

fn agent_path(agent: &Agent) -> String {
    format!("/agents/{}", agent.id)
}

// ----------------------------------------------------------------------------
// Autosave through the editor
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn three_quick_edits_send_one_patch_with_last_value() {
    let (server, agent, h) = setup();
    let start = Instant::now();
    let editor = h.ctx.open_agent(agent.id).await.unwrap();

    editor.set_name("Lead intake v1");
    sleep_ms(500).await;
    editor.set_name("Lead intake v2");
    sleep_ms(500).await;
    editor.set_name("Lead intake v3");
    sleep_ms(3_500).await;

    let patches: Vec<_> = server
        .recorded()
        .into_iter()
        .filter(|r| r.request.method == Method::Patch)
        .collect();
    assert_eq!(patches.len(), 1);
    assert_eq!(ms_between(start, patches[0].at), 4_000);
    assert_eq!(server.patch_bodies()[0].name, "Lead intake v3");
    assert_eq!(server.agent(agent.id).unwrap().name, "Lead intake v3");
    assert!(editor.last_saved_at().is_some());
    assert!(!editor.dirty().contains(DirtyFields::NAME));
}

#[tokio::test(start_paused = true)]
async fn later_edit_starts_an_independent_cycle() {
    let (server, agent, h) = setup();
    let start = Instant::now();
    let editor = h.ctx.open_agent(agent.id).await.unwrap();

    editor.set_name("first");
    sleep_ms(6_000).await;
    editor.set_name("second");
    sleep_ms(5_000).await;

    let at: Vec<u128> = server
        .recorded()
        .into_iter()
        .filter(|r| r.request.method == Method::Patch)
        .map(|r| ms_between(start, r.at))
        .collect();
    assert_eq!(at, vec![3_000, 9_000]);
    let names: Vec<String> = server.patch_bodies().into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["first", "second"]);
}

#[tokio::test(start_paused = true)]
async fn missing_required_fields_keep_autosave_inert() {
    let (server, agent, h) = setup();
    let editor = h.ctx.open_agent(agent.id).await.unwrap();

    editor.set_fields(Vec::new());
    for i in 0..5 {
        editor.set_name(format!("name {}", i));
        sleep_ms(1_000).await;
    }
    editor.set_name("");
    sleep_ms(30_000).await;

    assert_eq!(server.count(Method::Patch, &agent_path(&agent)), 0);
}

#[tokio::test(start_paused = true)]
async fn create_mode_never_autosaves() {
    let server = FakeAgentServer::new();
    let h = harness(server.clone(), test_config());
    let editor = h.ctx.new_agent();

    editor.set_name("Support triage");
    editor.add_field(FormField::new("email", "Email", FieldKind::Email).required());
    sleep_ms(30_000).await;

    assert_eq!(server.total_requests(), 0);
    assert_eq!(editor.mode(), EditorMode::Create);
    assert_eq!(editor.draft().slug, "support-triage");
}

#[tokio::test(start_paused = true)]
async fn autosave_failure_is_silent_and_retried() {
    let (server, agent, h) = setup();
    let mut notifications = h.ctx.notifier().subscribe();
    let editor = h.ctx.open_agent(agent.id).await.unwrap();
    server.fail_next_writes(1);

    editor.set_name("Retried");
    sleep_ms(3_500).await;
    assert_eq!(editor.autosave_state().unwrap().sync, SyncStatus::Unsaved);
    assert!(editor.dirty().contains(DirtyFields::NAME));

    sleep_ms(2_000).await;
    assert_eq!(server.count(Method::Patch, &agent_path(&agent)), 2);
    assert_eq!(editor.autosave_state().unwrap().sync, SyncStatus::Synced);
    assert_eq!(server.agent(agent.id).unwrap().name, "Retried");
    assert!(drain(&mut notifications).is_empty());
}

#[tokio::test(start_paused = true)]
async fn close_flushes_pending_edits_when_configured() {
    let (server, agent, h) = setup();
    let editor = h.ctx.open_agent(agent.id).await.unwrap();
    editor.set_name("Flushed on close");
    sleep_ms(500).await;
    editor.close().await;
    assert_eq!(server.agent(agent.id).unwrap().name, "Flushed on close");

    let mut config = test_config();
    config.autosave.flush_on_close = false;
    let h = harness(server.clone(), config);
    let editor = h.ctx.open_agent(agent.id).await.unwrap();
    editor.set_name("Discarded");
    sleep_ms(500).await;
    editor.close().await;
    sleep_ms(10_000).await;
    assert_eq!(server.agent(agent.id).unwrap().name, "Flushed on close");
}

#[tokio::test(start_paused = true)]
async fn close_writes_edits_left_by_exhausted_autosave() {
    let (server, agent, h) = setup();
    let editor = h.ctx.open_agent(agent.id).await.unwrap();
    server.fail_next_writes(3);

    editor.set_name("Keep me");
    sleep_ms(20_000).await;
    assert_eq!(editor.autosave_state().unwrap().sync, SyncStatus::Failed);
    assert!(editor.dirty().contains(DirtyFields::NAME));
    assert_eq!(server.count(Method::Patch, &agent_path(&agent)), 3);

    editor.close().await;
    assert_eq!(server.count(Method::Patch, &agent_path(&agent)), 4);
    assert_eq!(server.agent(agent.id).unwrap().name, "Keep me");
}

#[tokio::test(start_paused = true)]
async fn explicit_save_during_debounce_leaves_autosave_nothing_to_do() {
    let (server, agent, h) = setup();
    let mut editor = h.ctx.open_agent(agent.id).await.unwrap();

    editor.set_name("Saved by hand");
    sleep_ms(1_000).await;
    editor.save().await.unwrap();
    sleep_ms(5_000).await;

    assert_eq!(server.count(Method::Patch, &agent_path(&agent)), 1);
    let state = editor.autosave_state().unwrap();
    assert_eq!(state.sync, SyncStatus::Synced);
    assert_eq!(state.saves, 0);
    assert_eq!(state.last_saved_at, None);
}

#[tokio::test(start_paused = true)]
async fn dropping_editor_cancels_pending_autosave() {
    let (server, agent, h) = setup();
    let editor = h.ctx.open_agent(agent.id).await.unwrap();
    editor.set_name("Never saved");
    sleep_ms(1_000).await;
    drop(editor);
    sleep_ms(10_000).await;
    assert_eq!(server.count(Method::Patch, &agent_path(&agent)), 0);
}

// ----------------------------------------------------------------------------
// Explicit actions
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn save_with_empty_name_sends_nothing() {
    let server = FakeAgentServer::new();
    let h = harness(server.clone(), test_config());
    let mut editor = h.ctx.new_agent();
    editor.set_slug("valid-slug");
    editor.add_field(FormField::new("email", "Email", FieldKind::Email));
    let before = editor.draft();

    let err = editor.save().await.unwrap_err();
    assert!(matches!(err, EditorError::Validation(_)));
    assert_eq!(
        editor.field_error(DraftField::Name).as_deref(),
        Some("Agent name is required")
    );
    assert_eq!(editor.field_errors().len(), 1);
    assert_eq!(server.total_requests(), 0);
    assert_eq!(editor.draft(), before);
}

#[tokio::test(start_paused = true)]
async fn creating_switches_to_edit_mode_and_invalidates_list() {
    let server = FakeAgentServer::new();
    let h = harness(server.clone(), test_config());
    let agents = h.ctx.api().agents();
    agents
        .cached_list(h.ctx.cache(), &ListAgentsParams::default())
        .await
        .unwrap();
    let list_key = keys::agent_list(&ListAgentsParams::default());
    assert!(!h.ctx.cache().is_stale(&list_key));

    let mut events = h.ctx.cache().subscribe();
    let mut notifications = h.ctx.notifier().subscribe();
    let mut editor = h.ctx.new_agent();
    let draft = sample_draft();
    editor.set_name(draft.name.clone());
    editor.set_fields(draft.fields.clone());

    let outcome = editor.save().await.unwrap();
    let SaveOutcome::Created(id) = outcome else {
        panic!("expected a create, got {:?}", outcome);
    };
    assert_eq!(editor.mode(), EditorMode::Edit(id));
    assert_eq!(editor.id(), Some(id));
    assert_eq!(server.agent(id).unwrap().slug, "lead-intake");
    assert_eq!(events.recv().await.unwrap(), CacheEvent::Invalidated(keys::agents()));
    assert!(h.ctx.cache().is_stale(&list_key));
    assert!(!editor.dirty().contains(DirtyFields::NAME));

    let page = agents
        .cached_list(h.ctx.cache(), &ListAgentsParams::default())
        .await
        .unwrap();
    assert_eq!(page.items[0].id, id);

    let toasts = drain(&mut notifications);
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].level, NotificationLevel::Success);

    // Now persisted, autosave takes over.
    editor.set_name("Lead intake (renamed)");
    sleep_ms(3_500).await;
    assert_eq!(server.count(Method::Patch, &format!("/agents/{}", id)), 1);
}

#[tokio::test(start_paused = true)]
async fn explicit_save_updates_and_notifies() {
    let (server, agent, h) = setup();
    let mut notifications = h.ctx.notifier().subscribe();
    let mut editor = h.ctx.open_agent(agent.id).await.unwrap();

    editor.set_name("Saved explicitly");
    let outcome = editor.save().await.unwrap();
    assert!(matches!(outcome, SaveOutcome::Updated { .. }));
    assert_eq!(server.agent(agent.id).unwrap().name, "Saved explicitly");
    assert!(editor.last_saved_at().is_some());

    let toasts = drain(&mut notifications);
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].message, "Agent saved");
}

#[tokio::test(start_paused = true)]
async fn failed_explicit_save_shows_server_message() {
    let (server, agent, h) = setup();
    let mut notifications = h.ctx.notifier().subscribe();
    let mut editor = h.ctx.open_agent(agent.id).await.unwrap();
    server.fail_next_writes(1);

    editor.set_name("Will fail");
    let err = editor.save().await.unwrap_err();
    assert_eq!(err.to_string(), "Internal server error");

    let toasts = drain(&mut notifications);
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].level, NotificationLevel::Error);
    assert_eq!(toasts[0].message, "Internal server error");
    assert!(editor.dirty().contains(DirtyFields::NAME));
}

#[tokio::test(start_paused = true)]
async fn slow_explicit_save_is_superseded_by_newer_autosave() {
    let (server, agent, h) = setup();
    let mut notifications = h.ctx.notifier().subscribe();
    let mut editor = h.ctx.open_agent(agent.id).await.unwrap();

    editor.set_name("Racing");
    sleep_ms(2_000).await;
    server.delay_next_write(Duration::from_millis(5_000));

    // The autosave armed at t=0 fires at t=3000 while this save is in flight.
    let outcome = editor.save().await.unwrap();
    assert_eq!(outcome, SaveOutcome::Superseded);
    assert_eq!(server.count(Method::Patch, &agent_path(&agent)), 2);
    assert!(drain(&mut notifications).is_empty());
    assert_eq!(editor.autosave_state().unwrap().saves, 1);
}

#[tokio::test(start_paused = true)]
async fn publish_reflects_status_through_refetch() {
    let (server, agent, h) = setup();
    let mut notifications = h.ctx.notifier().subscribe();
    let editor = h.ctx.open_agent(agent.id).await.unwrap();
    assert_eq!(editor.status(), Some(AgentStatus::Draft));
    let draft_before = editor.draft();

    assert_eq!(editor.publish().await.unwrap(), AgentStatus::Published);
    sleep_ms(10).await;
    assert_eq!(editor.status(), Some(AgentStatus::Published));
    assert_eq!(editor.draft(), draft_before);
    assert_eq!(server.count(Method::Get, &agent_path(&agent)), 2);

    assert_eq!(editor.unpublish().await.unwrap(), AgentStatus::Draft);
    sleep_ms(10).await;
    assert_eq!(editor.status(), Some(AgentStatus::Draft));

    let messages: Vec<String> = drain(&mut notifications).into_iter().map(|n| n.message).collect();
    assert_eq!(messages, vec!["Agent published", "Agent unpublished"]);
}

#[tokio::test(start_paused = true)]
async fn status_actions_require_a_persisted_agent() {
    let server = FakeAgentServer::new();
    let h = harness(server.clone(), test_config());
    let mut editor = h.ctx.new_agent();

    assert!(matches!(editor.publish().await, Err(EditorError::NotPersisted)));
    assert!(matches!(editor.unpublish().await, Err(EditorError::NotPersisted)));
    assert!(matches!(editor.delete().await, Err(EditorError::NotPersisted)));
    assert_eq!(server.total_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn delete_removes_agent_and_closes_editor() {
    let (server, agent, h) = setup();
    let mut editor = h.ctx.open_agent(agent.id).await.unwrap();
    editor.set_name("Pending edit");

    editor.delete().await.unwrap();
    assert!(server.agent(agent.id).is_none());
    assert!(editor.is_deleted());
    assert!(editor.autosave_state().is_none());
    assert!(matches!(editor.save().await, Err(EditorError::Deleted)));

    sleep_ms(10_000).await;
    assert_eq!(server.count(Method::Patch, &agent_path(&agent)), 0);
}

// ----------------------------------------------------------------------------
// Hydration and auth
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn refetch_keeps_local_edits_and_reports_conflicts() {
    let (server, agent, h) = setup();
    let editor = h.ctx.open_agent(agent.id).await.unwrap();
    editor.set_slug("local-slug");

    server.modify(agent.id, |a| {
        a.name = "Renamed elsewhere".to_string();
        a.slug = "server-slug".to_string();
    });
    h.ctx.cache().invalidate(&keys::agent(agent.id));
    sleep_ms(10).await;

    let draft = editor.draft();
    assert_eq!(draft.name, "Renamed elsewhere");
    assert_eq!(draft.slug, "local-slug");
    assert_eq!(editor.conflicts(), vec![DraftField::Slug]);

    assert_eq!(editor.discard_local_changes(), vec![DraftField::Slug]);
    assert_eq!(editor.draft().slug, "server-slug");
    assert!(editor.conflicts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn once_policy_ignores_later_snapshots() {
    let agent = sample_agent();
    let server = FakeAgentServer::with_agent(agent.clone());
    let mut config = test_config();
    config.autosave.hydration = HydrationPolicy::Once;
    let h = harness(server.clone(), config);
    let editor = h.ctx.open_agent(agent.id).await.unwrap();

    server.modify(agent.id, |a| a.name = "Renamed elsewhere".to_string());
    h.ctx.cache().invalidate(&keys::agents());
    sleep_ms(10).await;

    // The snapshot is reported, not applied.
    assert_eq!(editor.draft().name, agent.name);
    assert_eq!(editor.conflicts(), vec![DraftField::Name]);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_save_redirects_without_toast() {
    let (server, agent, h) = setup();
    let mut notifications = h.ctx.notifier().subscribe();
    let mut editor = h.ctx.open_agent(agent.id).await.unwrap();
    server.set_unauthorized(true);

    editor.set_name("Expired session");
    let save = editor.save().await;
    let publish = h.ctx.api().agents().publish(agent.id).await;
    assert!(save.unwrap_err().is_unauthorized());
    assert!(publish.unwrap_err().is_unauthorized());

    assert_eq!(h.navigator.history(), vec![START_ROUTE, "/login"]);
    assert_eq!(h.ctx.auth().access_token(), None);
    assert!(drain(&mut notifications).is_empty());
}

#[tokio::test(start_paused = true)]
async fn sign_out_clears_cache_and_credentials() {
    let (_server, agent, h) = setup();
    let key = keys::agent(agent.id);
    h.ctx.api().agents().cached_get(h.ctx.cache(), agent.id).await.unwrap();
    assert!(!h.ctx.cache().is_stale(&key));

    h.ctx.sign_out().unwrap();
    assert!(h.ctx.cache().is_stale(&key));
    assert_eq!(h.ctx.auth().access_token(), None);
    assert_eq!(h.navigator.history(), vec![START_ROUTE, "/login"]);
}

#[tokio::test(start_paused = true)]
async fn opening_missing_agent_fails() {
    let server = FakeAgentServer::new();
    let h = harness(server, test_config());
    let err = h.ctx.open_agent(AgentId::now_v7()).await.err().unwrap();
    assert!(matches!(err, EditorError::Cache(_)));
    assert_eq!(err.to_string(), "Agent not found");
}
