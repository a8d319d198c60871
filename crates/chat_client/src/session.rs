use std::sync::{Arc, Mutex, MutexGuard};

use shared::domain::{ConnectionState, ConversationKey, Message};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::{
    error::{InvalidSend, SyncError},
    history::HistoryLoader,
    live::{LiveChannel, LiveConnector, LiveEvent},
    merge::{ConversationState, SessionSnapshot, SessionUpdate},
};

const UPDATE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Rejected(InvalidSend),
}

impl SendOutcome {
    pub fn is_sent(self) -> bool {
        matches!(self, Self::Sent)
    }
}

enum SessionInput {
    History(Result<Vec<Message>, SyncError>),
    Live(LiveEvent),
}

struct CoreInner {
    state: ConversationState,
    generation: u64,
    closed: bool,
}

/// Serialized owner of the conversation state. Every producer goes through
/// [`SessionCore::update`].
struct SessionCore {
    inner: Mutex<CoreInner>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionCore {
    fn new(key: ConversationKey) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            inner: Mutex::new(CoreInner {
                state: ConversationState::new(key),
                generation: 0,
                closed: false,
            }),
            updates,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoreInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Runs `mutate` unless the session is closed or `generation` is stale.
    /// Updates are broadcast while the lock is held so subscribers observe them
    /// in application order.
    fn update<R>(
        &self,
        generation: Option<u64>,
        mutate: impl FnOnce(&mut ConversationState) -> (R, Vec<SessionUpdate>),
    ) -> Option<R> {
        let mut guard = self.lock();
        if guard.closed || generation.is_some_and(|issued| issued != guard.generation) {
            return None;
        }
        let (result, updates) = mutate(&mut guard.state);
        for update in updates {
            let _ = self.updates.send(update);
        }
        Some(result)
    }

    fn apply(&self, generation: u64, input: SessionInput) {
        let applied = self.update(Some(generation), |state| {
            let updates = match input {
                SessionInput::History(result) => state.apply_history(result),
                SessionInput::Live(event) => state.apply_live(event),
            };
            ((), updates)
        });
        if applied.is_none() {
            debug!(generation, "session: discarding result for closed session");
        }
    }

    /// Returns false when already closed.
    fn close(&self) -> bool {
        let mut guard = self.lock();
        if guard.closed {
            return false;
        }
        guard.closed = true;
        guard.generation += 1;
        guard.state.release();
        true
    }
}

/// One open conversation between the local participant and a remote one.
///
/// Opening starts the history fetch and the live channel concurrently. Closing
/// (explicitly or by dropping) closes the channel and bumps the generation, so a
/// fetch still in flight resolves into a no-op.
pub struct ConversationSession {
    key: ConversationKey,
    core: Arc<SessionCore>,
    channel: LiveChannel,
    pump_task: JoinHandle<()>,
}

impl ConversationSession {
    /// Must be called inside a tokio runtime.
    pub fn open(
        key: ConversationKey,
        history: Arc<dyn HistoryLoader>,
        connector: Arc<dyn LiveConnector>,
    ) -> Self {
        let core = Arc::new(SessionCore::new(key.clone()));
        let generation = core.generation();

        let (live_tx, mut live_rx) = mpsc::unbounded_channel();
        let channel = LiveChannel::open(connector, key.local().clone(), live_tx);

        let history_core = Arc::clone(&core);
        let history_key = key.clone();
        tokio::spawn(async move {
            let result = history.load(&history_key).await;
            history_core.apply(generation, SessionInput::History(result));
        });

        let pump_core = Arc::clone(&core);
        let pump_task = tokio::spawn(async move {
            while let Some(event) = live_rx.recv().await {
                pump_core.apply(generation, SessionInput::Live(event));
            }
        });

        info!(conversation = %key, "session: opened");
        Self {
            key,
            core,
            channel,
            pump_task,
        }
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn state(&self) -> ConnectionState {
        self.core.lock().state.connection()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.core.lock().state.snapshot()
    }

    pub fn status_text(&self) -> &'static str {
        self.core.lock().state.status_text()
    }

    pub fn is_closed(&self) -> bool {
        self.core.lock().closed
    }

    /// Inbound frames the live channel could not decode.
    pub fn discarded_frames(&self) -> u64 {
        self.channel.discarded_frames()
    }

    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.core.updates.subscribe()
    }

    /// Subscribes and snapshots under one lock: every update not reflected in
    /// the snapshot arrives on the receiver, and none arrives twice.
    pub fn subscribe_with_snapshot(
        &self,
    ) -> (SessionSnapshot, broadcast::Receiver<SessionUpdate>) {
        let guard = self.core.lock();
        (guard.state.snapshot(), self.core.updates.subscribe())
    }

    pub fn dismiss_notices(&self) {
        self.core.update(None, |state| {
            state.dismiss_notices();
            ((), Vec::new())
        });
    }

    /// Appends an optimistic entry and forwards the frame. Refused sends leave
    /// the session untouched and are not errors.
    pub fn send(&self, content: &str) -> SendOutcome {
        let prepared = self.core.update(None, |state| {
            // The pump may not have applied the channel's disconnect yet.
            if !content.trim().is_empty() && self.channel.state() != ConnectionState::Online {
                return (Err(InvalidSend::NotOnline), Vec::new());
            }
            match state.begin_send(content) {
                Ok((frame, updates)) => (Ok(frame), updates),
                Err(reason) => (Err(reason), Vec::new()),
            }
        });
        let frame = match prepared {
            None => return SendOutcome::Rejected(InvalidSend::Closed),
            Some(Err(reason)) => {
                debug!(conversation = %self.key, "session: send rejected: {reason}");
                return SendOutcome::Rejected(reason);
            }
            Some(Ok(frame)) => frame,
        };
        if !self.channel.send(&frame) {
            debug!(conversation = %self.key, "session: live channel dropped outbound frame");
        }
        SendOutcome::Sent
    }

    pub fn close(&self) {
        if !self.core.close() {
            return;
        }
        self.channel.close();
        self.pump_task.abort();
        info!(conversation = %self.key, "session: closed");
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
