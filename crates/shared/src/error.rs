use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("participant id must not be empty")]
    EmptyParticipant,
    #[error("message content must not be empty")]
    EmptyContent,
    #[error("message {sender}->{receiver} does not belong to conversation {conversation}")]
    ForeignConversation {
        sender: String,
        receiver: String,
        conversation: String,
    },
}
