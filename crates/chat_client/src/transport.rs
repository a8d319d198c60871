use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::domain::ParticipantId;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::Endpoints,
    live::{LiveConnector, LiveTransport, TransportEvent},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector for `{ws_base}/ws/chat?userId={local}`.
pub struct WsConnector {
    ws_base: Url,
}

impl WsConnector {
    pub fn new(ws_base: Url) -> Self {
        Self { ws_base }
    }

    pub fn from_endpoints(endpoints: &Endpoints) -> Self {
        Self::new(endpoints.ws_base.clone())
    }

    pub fn live_url(&self, local: &ParticipantId) -> Result<Url> {
        let mut url = self.ws_base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("websocket base url cannot carry a path: {}", self.ws_base))?
            .pop_if_empty()
            .extend(["ws", "chat"]);
        url.query_pairs_mut()
            .clear()
            .append_pair("userId", local.as_str());
        Ok(url)
    }
}

#[async_trait]
impl LiveConnector for WsConnector {
    async fn connect(&self, local: &ParticipantId) -> Result<LiveTransport> {
        let url = self.live_url(local)?;
        let (socket, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {url}"))?;
        debug!(%url, "ws: handshake complete");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump_socket(socket, outbound_rx, inbound_tx));
        Ok(LiveTransport {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Multiplexes writes and reads for one socket until either side goes away.
async fn pump_socket(
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut writer, mut reader) = socket.split();
    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(text) => {
                    if let Err(err) = writer.send(Message::Text(text)).await {
                        let reason = format!("websocket send failed: {err}");
                        let _ = inbound.send(TransportEvent::Error(reason));
                        break;
                    }
                }
                None => {
                    if let Err(err) = writer.close().await {
                        debug!("ws: close handshake failed: {err}");
                    }
                    break;
                }
            },
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(TransportEvent::Text(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    let _ = inbound.send(TransportEvent::Closed);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("ws: receive failed: {err}");
                    let reason = format!("websocket receive failed: {err}");
                    let _ = inbound.send(TransportEvent::Error(reason));
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
