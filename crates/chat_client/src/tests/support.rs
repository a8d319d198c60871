//! In-memory history loader and live connector used by the unit tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::domain::{ConversationKey, Message, ParticipantId};
use tokio::sync::{mpsc, oneshot, Notify};

use crate::{
    error::SyncError,
    history::HistoryLoader,
    live::{LiveConnector, LiveTransport, TransportEvent},
};

pub(crate) const WAIT: Duration = Duration::from_secs(2);

/// The server side of an in-memory transport.
pub(crate) struct RemoteEnd {
    pub outbound: mpsc::UnboundedReceiver<String>,
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl RemoteEnd {
    pub fn push_text(&self, text: impl Into<String>) {
        self.inbound
            .send(TransportEvent::Text(text.into()))
            .expect("channel driver alive");
    }

    pub async fn next_outbound(&mut self) -> Option<String> {
        tokio::time::timeout(WAIT, self.outbound.recv())
            .await
            .expect("outbound frame or close in time")
    }
}

pub(crate) fn transport_pair() -> (LiveTransport, RemoteEnd) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    (
        LiveTransport {
            outbound: outbound_tx,
            inbound: inbound_rx,
        },
        RemoteEnd {
            outbound: outbound_rx,
            inbound: inbound_tx,
        },
    )
}

enum ConnectPlan {
    Accept(LiveTransport),
    Refuse(String),
}

pub(crate) struct FakeConnector {
    plan: Mutex<Option<ConnectPlan>>,
    gate: tokio::sync::Mutex<Option<oneshot::Receiver<()>>>,
    connects: AtomicUsize,
    pub connect_started: Notify,
}

impl FakeConnector {
    fn with_plan(plan: ConnectPlan, gate: Option<oneshot::Receiver<()>>) -> Self {
        Self {
            plan: Mutex::new(Some(plan)),
            gate: tokio::sync::Mutex::new(gate),
            connects: AtomicUsize::new(0),
            connect_started: Notify::new(),
        }
    }

    pub fn accepting() -> (Self, RemoteEnd) {
        let (transport, remote) = transport_pair();
        (Self::with_plan(ConnectPlan::Accept(transport), None), remote)
    }

    /// Connect stays pending until the returned sender fires (or is dropped).
    pub fn gated() -> (Self, RemoteEnd, oneshot::Sender<()>) {
        let (transport, remote) = transport_pair();
        let (gate_tx, gate_rx) = oneshot::channel();
        (
            Self::with_plan(ConnectPlan::Accept(transport), Some(gate_rx)),
            remote,
            gate_tx,
        )
    }

    pub fn refusing(reason: impl Into<String>) -> Self {
        Self::with_plan(ConnectPlan::Refuse(reason.into()), None)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self, _local: &ParticipantId) -> Result<LiveTransport> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connect_started.notify_one();
        let gate = self.gate.lock().await.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let plan = self.plan.lock().expect("plan lock").take();
        match plan {
            Some(ConnectPlan::Accept(transport)) => Ok(transport),
            Some(ConnectPlan::Refuse(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("fake connector already used")),
        }
    }
}

pub(crate) struct FakeHistory {
    result: Mutex<Option<Result<Vec<Message>, SyncError>>>,
    gate: tokio::sync::Mutex<Option<oneshot::Receiver<()>>>,
    loads: AtomicUsize,
    resolutions: AtomicUsize,
}

impl FakeHistory {
    fn with_result(
        result: Result<Vec<Message>, SyncError>,
        gate: Option<oneshot::Receiver<()>>,
    ) -> Self {
        Self {
            result: Mutex::new(Some(result)),
            gate: tokio::sync::Mutex::new(gate),
            loads: AtomicUsize::new(0),
            resolutions: AtomicUsize::new(0),
        }
    }

    pub fn ready(messages: Vec<Message>) -> Self {
        Self::with_result(Ok(messages), None)
    }

    pub fn failing(cause: &str) -> Self {
        Self::with_result(Err(SyncError::history(cause)), None)
    }

    pub fn gated(messages: Vec<Message>) -> (Self, oneshot::Sender<()>) {
        let (gate_tx, gate_rx) = oneshot::channel();
        (Self::with_result(Ok(messages), Some(gate_rx)), gate_tx)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Loads that have returned a result to the caller.
    pub fn resolution_count(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoryLoader for FakeHistory {
    async fn load(&self, _key: &ConversationKey) -> Result<Vec<Message>, SyncError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().await.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let result = self.result.lock().expect("result lock").take();
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        result.unwrap_or_else(|| Err(SyncError::history("fake history already used")))
    }
}

/// Polls `probe` until it holds or the wait budget runs out.
pub(crate) async fn eventually(mut probe: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(WAIT, async {
        while !probe() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
