//! Client-side conversation synchronizer.
//!
//! A [`ConversationSession`] merges a one-shot history fetch, a live duplex
//! channel and optimistic local sends into one ordered transcript for a pair of
//! participants.

pub mod config;
pub mod error;
pub mod history;
pub mod live;
pub mod merge;
pub mod session;
pub mod transport;

pub use config::{load_settings, ClientSettings, Endpoints};
pub use error::{InvalidSend, SyncError};
pub use history::{HistoryLoader, HttpHistoryLoader};
pub use live::{
    DisconnectCause, LiveChannel, LiveConnector, LiveEvent, LiveTransport, TransportEvent,
};
pub use merge::{SessionSnapshot, SessionUpdate, CONNECTION_ISSUE_NOTICE};
pub use session::{ConversationSession, SendOutcome};
pub use transport::WsConnector;

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
