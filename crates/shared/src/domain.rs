use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

id_newtype!(ParticipantId);

impl ParticipantId {
    /// Identity strings are kept as given; only blank ids are rejected.
    pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(DomainError::EmptyParticipant);
        }
        Ok(Self(raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

/// The `(local, remote)` pair a conversation session is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    local: ParticipantId,
    remote: ParticipantId,
}

impl ConversationKey {
    pub fn new(local: ParticipantId, remote: ParticipantId) -> Self {
        Self { local, remote }
    }

    pub fn parse(local: &str, remote: &str) -> Result<Self, DomainError> {
        Ok(Self::new(
            ParticipantId::new(local)?,
            ParticipantId::new(remote)?,
        ))
    }

    pub fn local(&self) -> &ParticipantId {
        &self.local
    }

    pub fn remote(&self) -> &ParticipantId {
        &self.remote
    }

    /// Returns the other participant when `id` is part of this pair.
    pub fn counterpart_of(&self, id: &ParticipantId) -> Option<&ParticipantId> {
        if id == &self.local {
            Some(&self.remote)
        } else if id == &self.remote {
            Some(&self.local)
        } else {
            None
        }
    }

    /// True when `(sender, receiver)` is this pair in either order.
    pub fn matches(&self, sender: &ParticipantId, receiver: &ParticipantId) -> bool {
        (sender == &self.local && receiver == &self.remote)
            || (sender == &self.remote && receiver == &self.local)
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.local, self.remote)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    History,
    Live,
    OptimisticPending,
}

impl Provenance {
    pub fn is_confirmed(self) -> bool {
        !matches!(self, Self::OptimisticPending)
    }
}

/// One chat line. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    sender_id: ParticipantId,
    receiver_id: ParticipantId,
    content: String,
    provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sent_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(
        sender_id: ParticipantId,
        receiver_id: ParticipantId,
        content: impl Into<String>,
        provenance: Provenance,
    ) -> Result<Self, DomainError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(DomainError::EmptyContent);
        }
        Ok(Self {
            id: MessageId::generate(),
            sender_id,
            receiver_id,
            content,
            provenance,
            sent_at: None,
        })
    }

    pub fn with_sent_at(mut self, sent_at: Option<DateTime<Utc>>) -> Self {
        self.sent_at = sent_at;
        self
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn sender_id(&self) -> &ParticipantId {
        &self.sender_id
    }

    pub fn receiver_id(&self) -> &ParticipantId {
        &self.receiver_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn is_from(&self, participant: &ParticipantId) -> bool {
        &self.sender_id == participant
    }

    pub fn belongs_to(&self, key: &ConversationKey) -> bool {
        key.matches(&self.sender_id, &self.receiver_id)
    }

    /// Bubble label: `"You"` for the local participant, otherwise the sender id.
    pub fn sender_label(&self, local: &ParticipantId) -> &str {
        if self.is_from(local) {
            "You"
        } else {
            self.sender_id.as_str()
        }
    }
}

/// Live connection lifecycle. `Disconnected` is final for a given connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Online,
    Disconnected,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Online)
                | (Self::Connecting, Self::Disconnected)
                | (Self::Online, Self::Disconnected)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Connecting => "Connecting…",
            Self::Online => "Online",
            Self::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
