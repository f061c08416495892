//! Single owner of the live event connection: connect, announce presence,
//! pump inbound events, reconnect with bounded retries, tear down.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::{
    domain::UserId,
    protocol::{ClientEvent, ServerEvent},
};
use tokio::{
    sync::{broadcast, mpsc, watch, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};

use crate::error::TransportError;

pub const RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

const OUTBOUND_BUFFER: usize = 64;
const INBOUND_BUFFER: usize = 256;
const EVENT_FANOUT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// A live connection as a channel pair. The outbound sender failing or the
/// inbound receiver draining means the underlying connection dropped.
pub struct TransportLink {
    pub outbound: mpsc::Sender<ClientEvent>,
    pub inbound: mpsc::Receiver<ServerEvent>,
}

/// Dial seam. Production uses [`WsConnector`]; tests substitute a
/// channel-backed fake.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<TransportLink>;
}

/// WebSocket connector speaking JSON frames.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<TransportLink> {
        let (ws_stream, _) = connect_async(&self.url)
            .await
            .with_context(|| format!("failed to connect websocket: {}", self.url))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientEvent>(OUTBOUND_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerEvent>(INBOUND_BUFFER);

        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(err) => {
                        error!("transport: failed to encode outbound event: {err}");
                        continue;
                    }
                };
                if ws_writer.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if inbound_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!("transport: invalid server event: {err}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("transport: websocket receive failed: {err}");
                        break;
                    }
                }
            }
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

pub struct TransportSession {
    connector: Arc<dyn Connector>,
    outbound: Mutex<Option<mpsc::Sender<ClientEvent>>>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ServerEvent>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl TransportSession {
    pub fn new(connector: Arc<dyn Connector>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_FANOUT_BUFFER);
        Arc::new(Self {
            connector,
            outbound: Mutex::new(None),
            state_tx,
            events,
            supervisor: Mutex::new(None),
        })
    }

    /// Establishes the connection for `identity` and announces presence.
    /// Any previous connection is torn down first: an identity swap rebuilds
    /// the session, it never mutates one in place.
    pub async fn connect(self: &Arc<Self>, identity: UserId) -> Result<(), TransportError> {
        if let Some(task) = self.supervisor.lock().await.take() {
            task.abort();
        }
        self.outbound.lock().await.take();
        self.state_tx.send_replace(ConnectionState::Connecting);

        let link = match self.connector.connect().await {
            Ok(link) => link,
            Err(err) => {
                self.state_tx.send_replace(ConnectionState::Disconnected);
                return Err(TransportError::Connect(err.to_string()));
            }
        };

        if link
            .outbound
            .send(ClientEvent::Join {
                user_id: identity.clone(),
            })
            .await
            .is_err()
        {
            self.state_tx.send_replace(ConnectionState::Disconnected);
            return Err(TransportError::Connect(
                "connection closed before join".to_string(),
            ));
        }

        *self.outbound.lock().await = Some(link.outbound);
        self.state_tx.send_replace(ConnectionState::Connected);
        info!(user_id = %identity, "transport: connected");

        let session = Arc::clone(self);
        let task = tokio::spawn(session.supervise(identity, link.inbound));
        *self.supervisor.lock().await = Some(task);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        *self.state_tx.borrow() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Emits an event if connected, otherwise fails with `NotConnected`.
    pub async fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        // The lock is released before awaiting channel capacity, so a full
        // outbound buffer cannot stall teardown or a redial.
        let tx = match self.outbound.lock().await.as_ref() {
            Some(tx) => tx.clone(),
            None => return Err(TransportError::NotConnected),
        };
        tx.send(event).await.map_err(|_| TransportError::NotConnected)
    }

    /// Explicit teardown. Idempotent; no reconnection is attempted afterwards.
    pub async fn disconnect(&self) {
        let already_closed = *self.state_tx.borrow() == ConnectionState::Closed;
        self.state_tx.send_replace(ConnectionState::Closed);
        self.outbound.lock().await.take();
        if let Some(task) = self.supervisor.lock().await.take() {
            task.abort();
        }
        if !already_closed {
            info!("transport: closed");
        }
    }

    /// Pumps inbound events into the fan-out channel and owns the reconnect
    /// loop. Runs until explicit teardown or retry exhaustion.
    async fn supervise(
        self: Arc<Self>,
        identity: UserId,
        mut inbound: mpsc::Receiver<ServerEvent>,
    ) {
        loop {
            while let Some(event) = inbound.recv().await {
                let _ = self.events.send(event);
            }

            if *self.state_tx.borrow() == ConnectionState::Closed {
                return;
            }

            self.outbound.lock().await.take();
            self.state_tx.send_replace(ConnectionState::Reconnecting);
            warn!(user_id = %identity, "transport: connection dropped, reconnecting");

            match self.redial(&identity).await {
                Some(next_inbound) => inbound = next_inbound,
                None => {
                    if *self.state_tx.borrow() != ConnectionState::Closed {
                        self.state_tx.send_replace(ConnectionState::Disconnected);
                        error!(
                            user_id = %identity,
                            attempts = RECONNECT_ATTEMPTS,
                            "transport: reconnect attempts exhausted"
                        );
                    }
                    return;
                }
            }
        }
    }

    async fn redial(&self, identity: &UserId) -> Option<mpsc::Receiver<ServerEvent>> {
        for attempt in 1..=RECONNECT_ATTEMPTS {
            tokio::time::sleep(RECONNECT_DELAY).await;
            if *self.state_tx.borrow() == ConnectionState::Closed {
                return None;
            }

            let link = match self.connector.connect().await {
                Ok(link) => link,
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = RECONNECT_ATTEMPTS,
                        "transport: reconnect attempt failed: {err}"
                    );
                    continue;
                }
            };

            // Presence must be re-announced before anything else goes out,
            // otherwise the server stops routing events to this identity.
            if link
                .outbound
                .send(ClientEvent::Join {
                    user_id: identity.clone(),
                })
                .await
                .is_err()
            {
                warn!(attempt, "transport: connection closed before rejoin");
                continue;
            }

            *self.outbound.lock().await = Some(link.outbound);
            self.state_tx.send_replace(ConnectionState::Connected);
            info!(user_id = %identity, attempt, "transport: reconnected");
            return Some(link.inbound);
        }
        None
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
