//! # Run Cell
//!
//! The single shared, mutable resource of a run. All writes go through
//! [`Journal::commit`], which takes the state lock, refuses writes once the
//! run is cancelled, applies the change atomically, persists it and
//! publishes the resulting events before the lock is released. Event order
//! on a run's stream is therefore the order of its mutations.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use super::state::AgentState;
use crate::error::EngineError;
use crate::events::{RunEvent, RunEventKind, StatusDelta};
use crate::publisher::Publisher;
use crate::store::RunStore;

pub struct RunCell {
    run_id: String,
    state: Mutex<AgentState>,
    /// Held for the duration of one `advance`
    driver: Mutex<()>,
    cancel: CancellationToken,
}

impl RunCell {
    pub fn new(state: AgentState) -> Self {
        Self {
            run_id: state.run_id().to_string(),
            state: Mutex::new(state),
            driver: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn snapshot(&self) -> AgentState {
        self.state.lock().await.clone()
    }

    pub(crate) async fn lock_state(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().await
    }

    pub(crate) async fn lock_driver(&self) -> MutexGuard<'_, ()> {
        self.driver.lock().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Must be called with the state lock held so no write can slip in
    /// between the terminal commit and the signal.
    pub(crate) fn signal_cancelled(&self) {
        self.cancel.cancel();
    }

    /// Await `fut`, giving up as soon as the run is cancelled.
    pub(crate) async fn until_cancelled<F: Future>(&self, fut: F) -> Result<F::Output, EngineError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            out = fut => Ok(out),
        }
    }
}

/// A pending change to one run's state
pub(crate) struct Tx<'a> {
    state: &'a mut AgentState,
    events: Vec<RunEvent>,
}

impl Tx<'_> {
    /// Queue an event carrying the state as it is at this point of the change.
    pub fn emit(&mut self, kind: RunEventKind, agent: Option<&str>) {
        let event = self.event(kind, agent);
        self.events.push(event);
    }

    pub fn emit_message(&mut self, kind: RunEventKind, agent: Option<&str>, message: String) {
        let event = self.event(kind, agent).with_message(message);
        self.events.push(event);
    }

    fn event(&mut self, kind: RunEventKind, agent: Option<&str>) -> RunEvent {
        let seq = self.state.next_event_seq();
        let event = RunEvent::new(kind, seq, StatusDelta::from_state(self.state));
        match agent {
            Some(agent) => event.with_agent(agent),
            None => event,
        }
    }
}

impl Deref for Tx<'_> {
    type Target = AgentState;

    fn deref(&self) -> &AgentState {
        self.state
    }
}

impl DerefMut for Tx<'_> {
    fn deref_mut(&mut self) -> &mut AgentState {
        self.state
    }
}

/// Persists and publishes every committed change
#[derive(Clone)]
pub struct Journal {
    store: Arc<dyn RunStore>,
    publisher: Publisher,
}

impl Journal {
    pub fn new(store: Arc<dyn RunStore>, publisher: Publisher) -> Self {
        Self { store, publisher }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Apply `change` unless the run has been cancelled.
    pub(crate) async fn commit<R>(
        &self,
        cell: &RunCell,
        change: impl FnOnce(&mut Tx<'_>) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let mut guard = cell.lock_state().await;
        if cell.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.apply(&mut guard, change)
    }

    /// Apply `change` even on a cancelled run. Used for decisions that must
    /// be checked against the terminal state itself.
    pub(crate) async fn commit_forced<R>(
        &self,
        cell: &RunCell,
        change: impl FnOnce(&mut Tx<'_>) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let mut guard = cell.lock_state().await;
        self.apply(&mut guard, change)
    }

    /// All-or-nothing: on error the state is restored and nothing is
    /// persisted or published.
    pub(crate) fn apply<R>(
        &self,
        state: &mut AgentState,
        change: impl FnOnce(&mut Tx<'_>) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let before = state.clone();
        let mut tx = Tx {
            state,
            events: Vec::new(),
        };

        let out = match change(&mut tx) {
            Ok(out) => out,
            Err(e) => {
                *tx.state = before;
                return Err(e);
            }
        };

        let events = std::mem::take(&mut tx.events);
        tx.state.touch();
        if let Err(e) = self.store.save(tx.state) {
            *tx.state = before;
            return Err(EngineError::Store(e));
        }

        for event in &events {
            tracing::debug!(
                run_id = %event.run_id,
                seq = event.seq,
                kind = event.kind.as_str(),
                agent = event.agent.as_deref().unwrap_or("-"),
                "Publishing run event"
            );
            self.publisher.publish(event);
        }

        Ok(out)
    }
}
