//! Live channel: one duplex connection per open/close cycle, keyed by the local
//! participant.
//!
//! The channel starts in [`ConnectionState::Connecting`] and pushes a single
//! typed stream of [`LiveEvent`]s to its owner. `Disconnected` is final; a new
//! channel (and a new transport) is needed to reconnect.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{ConnectionState, Message, ParticipantId, Provenance},
    protocol::ChatFrame,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::SyncError;

/// Raw events produced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Closed,
    Error(String),
}

/// An established duplex link. Dropping `outbound` closes the transport.
pub struct LiveTransport {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, local: &ParticipantId) -> Result<LiveTransport>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// Always a [`SyncError::Connection`].
    Error(SyncError),
    Closed,
}

impl DisconnectCause {
    fn connection(reason: impl Into<String>) -> Self {
        Self::Error(SyncError::Connection(reason.into()))
    }
}

#[derive(Debug, Clone)]
pub enum LiveEvent {
    Online,
    Disconnected(DisconnectCause),
    Inbound(Message),
}

pub type LiveEventSink = mpsc::UnboundedSender<LiveEvent>;

struct ChannelInner {
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
    closed: bool,
}

struct ChannelShared {
    local: ParticipantId,
    inner: Mutex<ChannelInner>,
    discarded: AtomicU64,
    events: LiveEventSink,
}

impl ChannelShared {
    fn lock(&self) -> MutexGuard<'_, ChannelInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns false when the channel was closed while connecting.
    fn mark_online(&self, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut guard = self.lock();
        if guard.closed || !guard.state.can_transition_to(ConnectionState::Online) {
            return false;
        }
        guard.state = ConnectionState::Online;
        guard.outbound = Some(outbound);
        info!(local = %self.local, "live: online");
        let _ = self.events.send(LiveEvent::Online);
        true
    }

    fn mark_disconnected(&self, cause: DisconnectCause) {
        let mut guard = self.lock();
        if guard.closed || !guard.state.can_transition_to(ConnectionState::Disconnected) {
            return;
        }
        guard.state = ConnectionState::Disconnected;
        guard.outbound = None;
        match &cause {
            DisconnectCause::Error(err) => warn!(local = %self.local, "live: disconnected: {err}"),
            DisconnectCause::Closed => info!(local = %self.local, "live: closed by remote"),
        }
        let _ = self.events.send(LiveEvent::Disconnected(cause));
    }

    fn deliver_frame(&self, text: &str) {
        let message = match decode_frame(text) {
            Ok(message) => message,
            Err(err) => {
                let discarded = self.discarded.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(local = %self.local, discarded, "live: discarding frame: {err}");
                return;
            }
        };

        let guard = self.lock();
        if guard.closed || guard.state != ConnectionState::Online {
            return;
        }
        let _ = self.events.send(LiveEvent::Inbound(message));
    }
}

fn decode_frame(text: &str) -> Result<Message, SyncError> {
    let frame: ChatFrame =
        serde_json::from_str(text).map_err(|err| SyncError::MalformedFrame(err.to_string()))?;
    frame
        .into_message(Provenance::Live)
        .map_err(|err| SyncError::MalformedFrame(err.to_string()))
}

/// Handle to one live connection. Closing (or dropping) the handle tears the
/// transport down and suppresses further events.
pub struct LiveChannel {
    shared: Arc<ChannelShared>,
}

impl LiveChannel {
    /// Starts connecting in the background; must be called inside a tokio runtime.
    pub fn open(
        connector: Arc<dyn LiveConnector>,
        local: ParticipantId,
        events: LiveEventSink,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shared = Arc::new(ChannelShared {
            local,
            inner: Mutex::new(ChannelInner {
                state: ConnectionState::Connecting,
                outbound: None,
                shutdown: Some(shutdown_tx),
                closed: false,
            }),
            discarded: AtomicU64::new(0),
            events,
        });
        debug!(local = %shared.local, "live: connecting");
        tokio::spawn(drive(Arc::clone(&shared), connector, shutdown_rx));
        Self { shared }
    }

    pub fn local(&self) -> &ParticipantId {
        &self.shared.local
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Number of inbound frames dropped because they did not decode.
    pub fn discarded_frames(&self) -> u64 {
        self.shared.discarded.load(Ordering::Relaxed)
    }

    /// Forwards `frame` when online. Any other state makes this a no-op that
    /// returns false.
    pub fn send(&self, frame: &ChatFrame) -> bool {
        let guard = self.shared.lock();
        if guard.closed || guard.state != ConnectionState::Online {
            debug!(local = %self.shared.local, state = %guard.state, "live: send ignored");
            return false;
        }
        let Some(outbound) = guard.outbound.as_ref() else {
            return false;
        };
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(err) => {
                warn!(local = %self.shared.local, "live: failed to encode frame: {err}");
                return false;
            }
        };
        outbound.send(text).is_ok()
    }

    pub fn close(&self) {
        let mut guard = self.shared.lock();
        if guard.closed {
            return;
        }
        guard.closed = true;
        guard.state = ConnectionState::Disconnected;
        guard.outbound = None;
        if let Some(shutdown) = guard.shutdown.take() {
            let _ = shutdown.send(());
        }
        debug!(local = %self.shared.local, "live: closed locally");
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn drive(
    shared: Arc<ChannelShared>,
    connector: Arc<dyn LiveConnector>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let connected = tokio::select! {
        biased;
        result = connector.connect(&shared.local) => result,
        _ = &mut shutdown => {
            debug!(local = %shared.local, "live: closed before connect finished");
            return;
        }
    };

    let LiveTransport {
        outbound,
        mut inbound,
    } = match connected {
        Ok(transport) => transport,
        Err(err) => {
            shared.mark_disconnected(DisconnectCause::connection(format!("{err:#}")));
            return;
        }
    };

    if !shared.mark_online(outbound) {
        return;
    }

    loop {
        let event = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            event = inbound.recv() => event,
        };
        match event {
            Some(TransportEvent::Text(text)) => shared.deliver_frame(&text),
            Some(TransportEvent::Error(err)) => {
                shared.mark_disconnected(DisconnectCause::connection(err));
                break;
            }
            Some(TransportEvent::Closed) | None => {
                shared.mark_disconnected(DisconnectCause::Closed);
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/live_tests.rs"]
mod tests;
