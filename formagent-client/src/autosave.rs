//! Debounced background persistence of a draft.
//!
//! The scheduler runs as its own task:
//!
//! ```text
//! Idle --touch (target ready)--> Pending --quiet period--> Saving --ok--> Idle
//!                                 ^   |                       |
//!                                 +---+ touch resets timer    +--err--> RetryWait --> Saving
//! ```
//!
//! Failures are logged, never shown as notifications. The draft stays dirty
//! and the write is retried with backoff; once attempts run out the state
//! reports the error until the next edit starts a new cycle, or until a
//! flush or flushing close tries once more.

use crate::api_client::ApiClientError;
use crate::config::{AutosaveConfig, RetryConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

/// Result of a successful [`AutosaveTarget::persist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    /// A write reached the server.
    Written,
    /// No save was recorded: nothing was pending (an explicit save already
    /// carried the edits) or a newer write superseded this one.
    Unchanged,
}

/// What the scheduler persists.
#[async_trait]
pub trait AutosaveTarget: Send + Sync + 'static {
    /// Guard: the resource exists remotely and required fields are present.
    fn is_ready(&self) -> bool;

    async fn persist(&self) -> Result<Persisted, ApiClientError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosavePhase {
    Idle,
    Pending,
    Saving,
    RetryWait,
}

/// Persistence status of local edits as far as autosave knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Synced,
    /// The last attempt failed and a retry is scheduled.
    Unsaved,
    /// Retries are exhausted; the next edit starts a new cycle.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutosaveState {
    pub phase: AutosavePhase,
    pub sync: SyncStatus,
    pub last_saved_at: Option<DateTime<Utc>>,
    /// Error of the most recent failed attempt; cleared by the next success.
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub saves: u64,
}

impl AutosaveState {
    fn new() -> Self {
        Self {
            phase: AutosavePhase::Idle,
            sync: SyncStatus::Synced,
            last_saved_at: None,
            last_error: None,
            consecutive_failures: 0,
            saves: 0,
        }
    }

    /// Local edits failed to persist and are still waiting for a retry or
    /// the next edit.
    pub fn has_unsaved_changes(&self) -> bool {
        self.sync != SyncStatus::Synced
    }
}

enum Command {
    Touch,
    Flush(oneshot::Sender<()>),
    Close { flush: bool, done: oneshot::Sender<()> },
}

/// Handle to a running scheduler. Dropping it cancels a pending save
/// without flushing; a save already in flight is allowed to finish.
pub struct AutosaveHandle {
    tx: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<AutosaveState>,
}

impl AutosaveHandle {
    pub fn spawn<T: AutosaveTarget>(target: Arc<T>, config: AutosaveConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(AutosaveState::new());
        let scheduler = Scheduler {
            target,
            debounce: config.debounce(),
            retry: config.retry,
            rx,
            state: state_tx,
        };
        tokio::spawn(scheduler.run());
        Self { tx, state }
    }

    /// A tracked field changed.
    pub fn touch(&self) {
        let _ = self.tx.send(Command::Touch);
    }

    pub fn state(&self) -> AutosaveState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AutosaveState> {
        self.state.clone()
    }

    /// Save immediately if a save is pending, and wait for it.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Stop the scheduler; with `flush`, a pending save is written first.
    pub async fn close(self, flush: bool) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Close { flush, done }).is_ok() {
            let _ = wait.await;
        }
    }
}

enum Exit {
    Continue,
    Stop,
}

struct Scheduler<T> {
    target: Arc<T>,
    debounce: Duration,
    retry: RetryConfig,
    rx: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<AutosaveState>,
}

impl<T: AutosaveTarget> Scheduler<T> {
    async fn run(mut self) {
        loop {
            // Idle
            let Some(command) = self.rx.recv().await else {
                return;
            };
            match command {
                Command::Touch => {}
                Command::Flush(done) => {
                    let mut closing = None;
                    let exit = self.retry_unsaved(&mut closing).await;
                    let _ = done.send(());
                    if let Some(close_done) = closing {
                        let _ = close_done.send(());
                        return;
                    }
                    if let Exit::Stop = exit {
                        return;
                    }
                    continue;
                }
                Command::Close { flush, done } => {
                    let mut closing = Some(done);
                    if flush {
                        // One last attempt for edits a failed cycle left behind.
                        self.retry_unsaved(&mut closing).await;
                    }
                    if let Some(done) = closing {
                        let _ = done.send(());
                    }
                    return;
                }
            }
            if !self.target.is_ready() {
                tracing::trace!("autosave inert: target not ready");
                continue;
            }

            // Pending
            self.set_phase(AutosavePhase::Pending);
            let mut waiters = Vec::new();
            let mut closing = None;
            let mut deadline = Instant::now() + self.debounce;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    command = self.rx.recv() => match command {
                        Some(Command::Touch) => deadline = Instant::now() + self.debounce,
                        Some(Command::Flush(done)) => {
                            waiters.push(done);
                            break;
                        }
                        Some(Command::Close { flush: true, done }) => {
                            closing = Some(done);
                            break;
                        }
                        Some(Command::Close { flush: false, done }) => {
                            tracing::debug!("autosave closed; pending save discarded");
                            let _ = done.send(());
                            return;
                        }
                        None => {
                            tracing::debug!("autosave handle dropped; pending save discarded");
                            return;
                        }
                    }
                }
            }

            let exit = self.save_with_retry(&mut closing).await;
            self.set_phase(AutosavePhase::Idle);
            for waiter in waiters {
                let _ = waiter.send(());
            }
            if let Some(done) = closing {
                let _ = done.send(());
                return;
            }
            if let Exit::Stop = exit {
                return;
            }
        }
    }

    /// Write again if the previous cycle ended without syncing.
    async fn retry_unsaved(&mut self, closing: &mut Option<oneshot::Sender<()>>) -> Exit {
        if self.state.borrow().sync == SyncStatus::Synced {
            return Exit::Continue;
        }
        tracing::debug!("retrying unsaved edits before flush");
        let exit = self.save_with_retry(closing).await;
        self.set_phase(AutosavePhase::Idle);
        exit
    }

    async fn save_with_retry(&mut self, closing: &mut Option<oneshot::Sender<()>>) -> Exit {
        let mut attempt = 0u32;
        loop {
            // Required fields may have been cleared while the timer ran.
            if !self.target.is_ready() {
                tracing::debug!("autosave skipped: target no longer ready");
                return Exit::Continue;
            }

            self.set_phase(AutosavePhase::Saving);
            attempt += 1;
            match self.target.persist().await {
                Ok(persisted) => {
                    self.state.send_modify(|s| {
                        s.sync = SyncStatus::Synced;
                        s.last_error = None;
                        s.consecutive_failures = 0;
                        if persisted == Persisted::Written {
                            s.last_saved_at = Some(Utc::now());
                            s.saves += 1;
                        }
                    });
                    tracing::debug!(attempt, ?persisted, "autosave finished");
                    return Exit::Continue;
                }
                Err(err) => {
                    let message = err.to_string();
                    let give_up = err.is_unauthorized()
                        || attempt >= self.retry.max_attempts
                        || closing.is_some();
                    self.state.send_modify(|s| {
                        s.sync = if give_up { SyncStatus::Failed } else { SyncStatus::Unsaved };
                        s.last_error = Some(message.clone());
                        s.consecutive_failures += 1;
                    });
                    if err.is_unauthorized() {
                        tracing::warn!("autosave stopped: session expired");
                        return Exit::Continue;
                    }
                    if give_up {
                        tracing::warn!(attempt, error = %message, "autosave failed; giving up until next edit");
                        return Exit::Continue;
                    }
                    tracing::warn!(attempt, error = %message, "autosave failed; retrying");
                }
            }

            // RetryWait
            self.set_phase(AutosavePhase::RetryWait);
            let wake = Instant::now() + self.retry.delay(attempt);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(wake) => break,
                    command = self.rx.recv() => match command {
                        // The retry writes the latest draft anyway.
                        Some(Command::Touch) => {}
                        Some(Command::Flush(done)) => {
                            let _ = done.send(());
                        }
                        Some(Command::Close { flush, done }) => {
                            if !flush {
                                let _ = done.send(());
                                return Exit::Stop;
                            }
                            *closing = Some(done);
                            break;
                        }
                        None => return Exit::Stop,
                    }
                }
            }
        }
    }

    fn set_phase(&self, phase: AutosavePhase) {
        self.state.send_modify(|s| s.phase = phase);
    }
}
