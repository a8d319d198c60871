use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ConversationKey, Message, ParticipantId, Provenance},
    error::DomainError,
};

/// Live-channel frame, both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFrame {
    #[serde(alias = "sender")]
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
}

impl ChatFrame {
    pub fn outbound(key: &ConversationKey, content: impl Into<String>) -> Self {
        Self {
            sender_id: key.local().to_string(),
            receiver_id: key.remote().to_string(),
            content: content.into(),
        }
    }

    pub fn into_message(self, provenance: Provenance) -> Result<Message, DomainError> {
        Message::new(
            ParticipantId::new(self.sender_id)?,
            ParticipantId::new(self.receiver_id)?,
            self.content,
            provenance,
        )
    }
}

/// One entry of the history response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(alias = "sender")]
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<serde_json::Value>,
}

impl HistoryRecord {
    /// Builds a `History` message for `key`. A missing receiver is taken to be the
    /// sender's counterpart in the pair.
    pub fn into_message(self, key: &ConversationKey) -> Result<Message, DomainError> {
        let sender = ParticipantId::new(self.sender_id)?;
        let receiver = match self.receiver_id {
            Some(raw) => ParticipantId::new(raw)?,
            None => key
                .counterpart_of(&sender)
                .cloned()
                .ok_or_else(|| DomainError::ForeignConversation {
                    sender: sender.to_string(),
                    receiver: String::new(),
                    conversation: key.to_string(),
                })?,
        };
        if !key.matches(&sender, &receiver) {
            return Err(DomainError::ForeignConversation {
                sender: sender.to_string(),
                receiver: receiver.to_string(),
                conversation: key.to_string(),
            });
        }
        let sent_at = self.timestamp.as_ref().and_then(parse_timestamp);
        Ok(Message::new(sender, receiver, self.content, Provenance::History)?.with_sent_at(sent_at))
    }
}

/// Accepts RFC 3339 strings or epoch milliseconds.
pub fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        serde_json::Value::Number(number) => number
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}
