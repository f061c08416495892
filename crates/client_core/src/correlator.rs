//! Matches outgoing sends to their acknowledgments.
//!
//! Instead of registering a listener pair per call, all pending sends live in
//! one correlation table; the inbound dispatcher completes the matching handle
//! when a `messageSent` or `messageError` acknowledgment arrives. Every
//! resolution path (confirm, reject, timeout) removes the table entry.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use shared::{
    domain::{ContactAddress, CorrelationToken, UserId},
    error::WireError,
    protocol::{ClientEvent, MessagePayload},
};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::{error::SendError, transport::TransportSession};

pub const SEND_ACK_TIMEOUT: Duration = Duration::from_secs(10);

type PendingHandle = oneshot::Sender<Result<MessagePayload, SendError>>;

/// Unique per call; millisecond timestamp plus a v4 uuid makes collisions
/// negligible even across rapid sends.
pub fn generate_token() -> CorrelationToken {
    CorrelationToken(format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4()))
}

pub struct Correlator {
    transport: Arc<TransportSession>,
    pending: Mutex<HashMap<CorrelationToken, PendingHandle>>,
}

impl Correlator {
    pub fn new(transport: Arc<TransportSession>) -> Self {
        Self {
            transport,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Emits the send event for an already-materialized optimistic message
    /// and awaits the server's verdict. The caller validates the body and
    /// owns the optimistic copy keyed by `token`.
    pub async fn send_text(
        &self,
        sender_id: UserId,
        receiver_address: ContactAddress,
        body: String,
        token: CorrelationToken,
    ) -> Result<MessagePayload, SendError> {
        let (handle, resolution) = oneshot::channel();
        self.pending.lock().await.insert(token.clone(), handle);

        let event = ClientEvent::SendMessage {
            sender_id,
            receiver_address,
            body,
            correlation_token: token.clone(),
        };
        if self.transport.send(event).await.is_err() {
            self.pending.lock().await.remove(&token);
            return Err(SendError::NotConnected);
        }

        match tokio::time::timeout(SEND_ACK_TIMEOUT, resolution).await {
            Ok(Ok(outcome)) => outcome,
            // Handle dropped without resolution: the table was torn down.
            Ok(Err(_)) => Err(SendError::Timeout),
            Err(_) => {
                self.pending.lock().await.remove(&token);
                debug!(token = %token, "correlator: send timed out");
                Err(SendError::Timeout)
            }
        }
    }

    /// Completes a pending send with its confirmation. Returns false when no
    /// send is pending under the token (already resolved, or not ours).
    pub async fn resolve_sent(&self, token: &CorrelationToken, message: MessagePayload) -> bool {
        match self.pending.lock().await.remove(token) {
            Some(handle) => {
                let _ = handle.send(Ok(message));
                true
            }
            None => false,
        }
    }

    pub async fn resolve_error(&self, token: &CorrelationToken, error: WireError) -> bool {
        match self.pending.lock().await.remove(token) {
            Some(handle) => {
                let _ = handle.send(Err(SendError::Rejected(error.to_string())));
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
#[path = "tests/correlator_tests.rs"]
mod tests;
