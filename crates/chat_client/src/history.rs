//! One-shot transcript fetch for a conversation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::{ConversationKey, Message},
    protocol::HistoryRecord,
};
use tracing::{debug, warn};
use url::Url;

use crate::{config::Endpoints, error::SyncError};

const HISTORY_FAILED: &str = "Failed to load messages.";

#[async_trait]
pub trait HistoryLoader: Send + Sync {
    /// Returns the server-ordered transcript, every entry tagged `History`.
    async fn load(&self, key: &ConversationKey) -> Result<Vec<Message>, SyncError>;
}

pub struct HttpHistoryLoader {
    http: Client,
    api_base: Url,
    timeout: Duration,
}

impl HttpHistoryLoader {
    pub fn new(api_base: Url, timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            api_base,
            timeout,
        }
    }

    pub fn from_endpoints(endpoints: &Endpoints) -> Self {
        Self::new(endpoints.api_base.clone(), endpoints.history_timeout)
    }

    pub fn history_url(&self, key: &ConversationKey) -> Result<Url, SyncError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::history("api base url cannot carry a path"))?
            .pop_if_empty()
            .extend([
                "api",
                "chat",
                key.local().as_str(),
                "history",
                key.remote().as_str(),
            ]);
        Ok(url)
    }
}

#[async_trait]
impl HistoryLoader for HttpHistoryLoader {
    async fn load(&self, key: &ConversationKey) -> Result<Vec<Message>, SyncError> {
        let url = self.history_url(key)?;
        let response = self
            .http
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| SyncError::history(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "history: non-success response");
            return Err(SyncError::history(HISTORY_FAILED));
        }

        let records: Option<Vec<HistoryRecord>> = response
            .json()
            .await
            .map_err(|err| SyncError::history(format!("invalid history body: {err}")))?;
        let messages = records_into_messages(key, records.unwrap_or_default());
        debug!(conversation = %key, count = messages.len(), "history: loaded");
        Ok(messages)
    }
}

/// Converts records in server order, dropping entries that cannot belong to `key`.
pub(crate) fn records_into_messages(
    key: &ConversationKey,
    records: Vec<HistoryRecord>,
) -> Vec<Message> {
    records
        .into_iter()
        .filter_map(|record| match record.into_message(key) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(conversation = %key, "history: dropping record: {err}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
