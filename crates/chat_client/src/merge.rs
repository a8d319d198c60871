//! Merged transcript and connection state for one conversation, with no I/O.
//!
//! Every producer (history arrival, live events, local sends) goes through this
//! type, and every mutation reports the [`SessionUpdate`]s it caused. The
//! transcript is append-only: entries are added in the order they are observed
//! and never removed or reordered while the session is open. History that
//! resolves after live traffic is therefore appended after that traffic.

use shared::{
    domain::{ConnectionState, ConversationKey, Message, Provenance},
    protocol::ChatFrame,
};
use tracing::{debug, warn};

use crate::{
    error::{InvalidSend, SyncError},
    live::{DisconnectCause, LiveEvent},
};

pub const CONNECTION_ISSUE_NOTICE: &str = "Connection issue. Messages may be delayed.";
const HISTORY_FALLBACK_NOTICE: &str = "Could not load previous messages.";

#[derive(Debug, Clone)]
pub enum SessionUpdate {
    StateChanged(ConnectionState),
    MessageAppended(Message),
    HistoryLoaded { count: usize },
    HistoryFailed(String),
    ConnectionNotice(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryStatus {
    Pending,
    Loaded,
    Failed,
}

/// Point-in-time copy of a session, safe to hand to a renderer.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub key: ConversationKey,
    pub state: ConnectionState,
    pub messages: Vec<Message>,
    pub history_loading: bool,
    pub history_error: Option<String>,
    pub connection_notice: Option<String>,
    pub dropped_messages: u64,
}

impl SessionSnapshot {
    pub fn status_text(&self) -> &'static str {
        status_label(self.history_loading, self.state)
    }
}

fn status_label(history_pending: bool, connection: ConnectionState) -> &'static str {
    if history_pending && connection == ConnectionState::Connecting {
        "Loading history…"
    } else {
        connection.label()
    }
}

#[derive(Debug)]
pub struct ConversationState {
    key: ConversationKey,
    connection: ConnectionState,
    messages: Vec<Message>,
    history: HistoryStatus,
    history_error: Option<String>,
    connection_notice: Option<String>,
    dropped_messages: u64,
}

impl ConversationState {
    pub fn new(key: ConversationKey) -> Self {
        Self {
            key,
            connection: ConnectionState::Connecting,
            messages: Vec::new(),
            history: HistoryStatus::Pending,
            history_error: None,
            connection_notice: None,
            dropped_messages: 0,
        }
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn history_error(&self) -> Option<&str> {
        self.history_error.as_deref()
    }

    pub fn connection_notice(&self) -> Option<&str> {
        self.connection_notice.as_deref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            key: self.key.clone(),
            state: self.connection,
            messages: self.messages.clone(),
            history_loading: self.history == HistoryStatus::Pending,
            history_error: self.history_error.clone(),
            connection_notice: self.connection_notice.clone(),
            dropped_messages: self.dropped_messages,
        }
    }

    pub fn status_text(&self) -> &'static str {
        status_label(self.history == HistoryStatus::Pending, self.connection)
    }

    /// Applies the one-shot history result. Later results are ignored.
    pub fn apply_history(
        &mut self,
        result: Result<Vec<Message>, SyncError>,
    ) -> Vec<SessionUpdate> {
        if self.history != HistoryStatus::Pending {
            warn!(conversation = %self.key, "merge: ignoring repeated history result");
            return Vec::new();
        }

        match result {
            Ok(batch) => {
                self.history = HistoryStatus::Loaded;
                let mut updates = Vec::with_capacity(batch.len() + 1);
                let mut count = 0;
                for message in batch {
                    if message.provenance() != Provenance::History {
                        self.reject(&message, "history entry with non-history provenance");
                        continue;
                    }
                    if let Some(appended) = self.merge_incoming(message) {
                        count += 1;
                        updates.push(SessionUpdate::MessageAppended(appended));
                    }
                }
                debug!(conversation = %self.key, count, "merge: history applied");
                updates.push(SessionUpdate::HistoryLoaded { count });
                updates
            }
            Err(err) => {
                self.history = HistoryStatus::Failed;
                let cause = match err {
                    SyncError::HistoryUnavailable { cause } if !cause.trim().is_empty() => cause,
                    SyncError::HistoryUnavailable { .. } => HISTORY_FALLBACK_NOTICE.to_string(),
                    other => other.to_string(),
                };
                warn!(conversation = %self.key, "merge: history unavailable: {cause}");
                self.history_error = Some(cause.clone());
                vec![SessionUpdate::HistoryFailed(cause)]
            }
        }
    }

    pub fn apply_live(&mut self, event: LiveEvent) -> Vec<SessionUpdate> {
        match event {
            LiveEvent::Online => self.transition(ConnectionState::Online),
            LiveEvent::Disconnected(cause) => {
                let mut updates = self.transition(ConnectionState::Disconnected);
                if !updates.is_empty() {
                    if let DisconnectCause::Error(_) = cause {
                        self.connection_notice = Some(CONNECTION_ISSUE_NOTICE.to_string());
                        updates.push(SessionUpdate::ConnectionNotice(
                            CONNECTION_ISSUE_NOTICE.to_string(),
                        ));
                    }
                }
                updates
            }
            LiveEvent::Inbound(message) => {
                if message.provenance() != Provenance::Live {
                    self.reject(&message, "inbound entry with non-live provenance");
                    return Vec::new();
                }
                self.merge_incoming(message)
                    .map(SessionUpdate::MessageAppended)
                    .into_iter()
                    .collect()
            }
        }
    }

    /// Appends an optimistic entry and returns the frame to forward. Refusals
    /// leave the state untouched.
    pub fn begin_send(
        &mut self,
        content: &str,
    ) -> Result<(ChatFrame, Vec<SessionUpdate>), InvalidSend> {
        let content = content.trim();
        if content.is_empty() {
            return Err(InvalidSend::EmptyContent);
        }
        if self.connection != ConnectionState::Online {
            return Err(InvalidSend::NotOnline);
        }

        let frame = ChatFrame::outbound(&self.key, content);
        let message = Message::new(
            self.key.local().clone(),
            self.key.remote().clone(),
            content,
            Provenance::OptimisticPending,
        )
        .map_err(|_| InvalidSend::EmptyContent)?;
        let updates = self
            .merge_incoming(message)
            .map(SessionUpdate::MessageAppended)
            .into_iter()
            .collect();
        Ok((frame, updates))
    }

    pub fn dismiss_notices(&mut self) {
        self.history_error = None;
        self.connection_notice = None;
    }

    /// Drops the transcript once the owning session is closed.
    pub fn release(&mut self) {
        self.messages = Vec::new();
    }

    /// The only place entries enter the transcript. Optimistic entries are not
    /// reconciled against later live echoes, so an echoed send shows twice.
    fn merge_incoming(&mut self, message: Message) -> Option<Message> {
        if !message.belongs_to(&self.key) {
            self.reject(&message, "message for another conversation");
            return None;
        }
        self.messages.push(message.clone());
        Some(message)
    }

    fn transition(&mut self, next: ConnectionState) -> Vec<SessionUpdate> {
        if !self.connection.can_transition_to(next) {
            debug!(
                conversation = %self.key,
                from = %self.connection,
                to = %next,
                "merge: ignoring invalid state transition"
            );
            return Vec::new();
        }
        self.connection = next;
        vec![SessionUpdate::StateChanged(next)]
    }

    fn reject(&mut self, message: &Message, reason: &str) {
        self.dropped_messages += 1;
        warn!(
            conversation = %self.key,
            sender = %message.sender_id(),
            receiver = %message.receiver_id(),
            "merge: dropping {reason}"
        );
    }
}

#[cfg(test)]
#[path = "tests/merge_tests.rs"]
mod tests;
