//! Shared test doubles: a channel-backed connector standing in for the
//! websocket dial, plus helpers for awaiting dials and fan-out updates.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::protocol::{ClientEvent, ServerEvent};
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::{
    transport::{Connector, TransportLink},
    ClientUpdate,
};

const TEST_WAIT: Duration = Duration::from_secs(5);

/// The server end of one fake connection. Dropping it simulates the
/// connection dying under the client.
pub(crate) struct ServerSide {
    pub push: mpsc::Sender<ServerEvent>,
    pub sent: mpsc::Receiver<ClientEvent>,
}

impl ServerSide {
    pub async fn next_event(&mut self) -> ClientEvent {
        tokio::time::timeout(TEST_WAIT, self.sent.recv())
            .await
            .expect("timed out waiting for a client event")
            .expect("client side closed")
    }
}

/// Hands out channel-pair links; every successful dial surfaces its server
/// end on the side channel returned by [`FakeConnector::new`].
pub(crate) struct FakeConnector {
    refuse_next: Mutex<u32>,
    sides: mpsc::UnboundedSender<ServerSide>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (sides, side_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                refuse_next: Mutex::new(0),
                sides,
            }),
            side_rx,
        )
    }

    /// The next `count` dials fail before any succeeds again.
    pub async fn refuse_next_dials(&self, count: u32) {
        *self.refuse_next.lock().await = count;
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<TransportLink> {
        {
            let mut refuse = self.refuse_next.lock().await;
            if *refuse > 0 {
                *refuse -= 1;
                return Err(anyhow!("dial refused"));
            }
        }
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        self.sides
            .send(ServerSide {
                push: inbound_tx,
                sent: outbound_rx,
            })
            .map_err(|_| anyhow!("test finished"))?;
        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

pub(crate) async fn next_side(side_rx: &mut mpsc::UnboundedReceiver<ServerSide>) -> ServerSide {
    tokio::time::timeout(TEST_WAIT, side_rx.recv())
        .await
        .expect("timed out waiting for a dial")
        .expect("connector dropped")
}

pub(crate) async fn wait_for_update(
    updates: &mut broadcast::Receiver<ClientUpdate>,
    matches: impl Fn(&ClientUpdate) -> bool,
) -> ClientUpdate {
    tokio::time::timeout(TEST_WAIT, async {
        loop {
            let update = updates.recv().await.expect("update channel closed");
            if matches(&update) {
                return update;
            }
        }
    })
    .await
    .expect("timed out waiting for an update")
}
