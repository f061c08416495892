//! Client-side message delivery and synchronization core for a 1:1 chat
//! application.
//!
//! [`ChatClient`] is the lifecycle-scoped session context: constructed at
//! login, torn down at logout. It owns the live transport, the correlation
//! table for outgoing sends, the conversation store, the presence tracker,
//! and the REST history loader, and it runs the single dispatcher that folds
//! inbound events into the store.

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use chrono::Utc;
use shared::{
    domain::{MessageId, MessageKind, MessageStatus, UserId},
    protocol::{ClientEvent, ServerEvent},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod correlator;
pub mod error;
pub mod history;
pub mod presence;
pub mod store;
pub mod transport;

use correlator::Correlator;
use error::SendError;
use history::HistoryLoader;
use presence::{PresenceRecord, PresenceTracker};
use shared::domain::ContactAddress;
use store::{ChatSnapshot, Contact, ConversationStore, InboundOutcome, Message};
use transport::{ConnectionState, Connector, TransportSession, WsConnector};

/// Deferred read-receipt delay, approximating human reading latency so rapid
/// chat switching does not flood the server with receipts.
pub const READ_ACK_DELAY: Duration = Duration::from_millis(1500);

const UPDATE_FANOUT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub socket_url: String,
}

/// The authenticated local actor. Swapping identity tears the whole client
/// down and builds a new one; nothing is mutated in place.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub user_id: UserId,
    pub display_name: String,
    pub address: ContactAddress,
    pub bearer_token: String,
}

/// Change notifications for UI consumption.
#[derive(Debug, Clone)]
pub enum ClientUpdate {
    ConnectionChanged(ConnectionState),
    ChatListChanged,
    MessagesChanged { chat_id: UserId },
    PresenceChanged { user_id: UserId },
    /// Transient; consumers clear their own indicator state.
    TypingChanged { user_id: UserId, is_typing: bool },
    ContactAdded { user_id: UserId },
}

pub struct ChatClient {
    session: UserSession,
    transport: Arc<TransportSession>,
    correlator: Correlator,
    history: HistoryLoader,
    store: Mutex<ConversationStore>,
    presence: Mutex<PresenceTracker>,
    updates: broadcast::Sender<ClientUpdate>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    read_ack_timer: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    /// Establishes a session over a real WebSocket connection.
    pub async fn login(config: ClientConfig, session: UserSession) -> Result<Arc<Self>> {
        let connector = Arc::new(WsConnector::new(config.socket_url.clone()));
        Self::login_with_connector(config, session, connector).await
    }

    pub async fn login_with_connector(
        config: ClientConfig,
        session: UserSession,
        connector: Arc<dyn Connector>,
    ) -> Result<Arc<Self>> {
        let transport = TransportSession::new(connector);
        let (updates, _) = broadcast::channel(UPDATE_FANOUT_BUFFER);
        let client = Arc::new(Self {
            history: HistoryLoader::new(config.server_url.clone(), session.bearer_token.clone()),
            store: Mutex::new(ConversationStore::new(session.user_id.clone())),
            presence: Mutex::new(PresenceTracker::new()),
            correlator: Correlator::new(Arc::clone(&transport)),
            transport,
            session,
            updates,
            dispatcher: Mutex::new(None),
            read_ack_timer: Mutex::new(None),
        });

        client
            .transport
            .connect(client.session.user_id.clone())
            .await?;

        let task = tokio::spawn(Arc::clone(&client).run_dispatcher());
        *client.dispatcher.lock().await = Some(task);

        match client.history.fetch_contacts().await {
            Ok(contacts) => {
                let mut store = client.store.lock().await;
                for contact in contacts {
                    store.upsert_contact(Contact::from_wire(contact));
                }
            }
            Err(err) => warn!("client: contact list fetch failed: {err}"),
        }
        client.notify(ClientUpdate::ChatListChanged);

        info!(user_id = %client.session.user_id, "client: session established");
        Ok(client)
    }

    /// Tears the session down: transport closed, timers cancelled, no further
    /// reconnection. Outstanding sends resolve through their timeout.
    pub async fn logout(&self) {
        if let Some(timer) = self.read_ack_timer.lock().await.take() {
            timer.abort();
        }
        self.transport.disconnect().await;
        if let Some(task) = self.dispatcher.lock().await.take() {
            task.abort();
        }
        info!(user_id = %self.session.user_id, "client: logged out");
    }

    pub fn session(&self) -> &UserSession {
        &self.session
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<ClientUpdate> {
        self.updates.subscribe()
    }

    /// Chats in most-recently-active order.
    pub async fn chats(&self) -> Vec<ChatSnapshot> {
        self.store.lock().await.snapshot()
    }

    pub async fn messages(&self, chat_id: &UserId) -> Vec<Message> {
        self.store
            .lock()
            .await
            .chat(chat_id)
            .map(|chat| chat.messages().to_vec())
            .unwrap_or_default()
    }

    pub async fn presence(&self, contact_id: &UserId) -> Option<PresenceRecord> {
        self.presence.lock().await.get(contact_id).cloned()
    }

    pub async fn set_pinned(&self, chat_id: &UserId, pinned: bool) -> bool {
        let changed = self.store.lock().await.set_pinned(chat_id, pinned);
        if changed {
            self.notify(ClientUpdate::ChatListChanged);
        }
        changed
    }

    pub async fn set_archived(&self, chat_id: &UserId, archived: bool) -> bool {
        let changed = self.store.lock().await.set_archived(chat_id, archived);
        if changed {
            self.notify(ClientUpdate::ChatListChanged);
        }
        changed
    }

    /// Opens a chat: resets its unread counter, seeds its message list from
    /// history (empty on failure rather than blocking), and schedules the
    /// deferred read receipt.
    pub async fn select_chat(self: &Arc<Self>, chat_id: &UserId) -> Result<()> {
        if let Some(timer) = self.read_ack_timer.lock().await.take() {
            timer.abort();
        }

        let contact = self.store.lock().await.select_chat(chat_id);
        let Some(contact) = contact else {
            bail!("no chat for contact {chat_id}");
        };
        self.notify(ClientUpdate::ChatListChanged);

        let seeded = match contact.address.as_ref() {
            Some(address) => match self
                .history
                .load_history(address, chat_id, &self.session)
                .await
            {
                Ok(messages) => messages,
                Err(err) => {
                    warn!(chat_id = %chat_id, "client: {err}, opening with empty history");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        self.store.lock().await.seed_history(chat_id, seeded);
        self.notify(ClientUpdate::MessagesChanged {
            chat_id: chat_id.clone(),
        });

        let client = Arc::clone(self);
        let partner = chat_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(READ_ACK_DELAY).await;
            if client.store.lock().await.selected_chat() != Some(&partner) {
                return;
            }
            let receipt = ClientEvent::MarkMessagesAsRead {
                chat_partner_id: partner,
            };
            if let Err(err) = client.transport.send(receipt).await {
                debug!("client: deferred read receipt not sent: {err}");
            }
        });
        *self.read_ack_timer.lock().await = Some(timer);
        Ok(())
    }

    /// Sends a text message to a chat. An optimistic copy with status
    /// `sending` appears immediately; it is replaced in place by the
    /// confirmed message, or marked `failed` on rejection or timeout. When
    /// the live transport is down the REST fallback is tried first.
    pub async fn send_text(&self, chat_id: &UserId, body: &str) -> Result<(), SendError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(SendError::EmptyBody);
        }

        let receiver_address = {
            let store = self.store.lock().await;
            let chat = store
                .chat(chat_id)
                .ok_or_else(|| SendError::UnknownChat(chat_id.clone()))?;
            chat.contact
                .address
                .clone()
                .ok_or_else(|| SendError::Unroutable(chat_id.clone()))?
        };

        let token = correlator::generate_token();
        let optimistic = Message {
            id: MessageId(token.0.clone()),
            sender_id: self.session.user_id.clone(),
            text: body.to_string(),
            timestamp: Utc::now(),
            status: MessageStatus::Sending,
            kind: MessageKind::Text,
            attachment: None,
        };
        self.store.lock().await.apply_outgoing(chat_id, optimistic);
        self.notify(ClientUpdate::MessagesChanged {
            chat_id: chat_id.clone(),
        });
        self.notify(ClientUpdate::ChatListChanged);

        let outcome = if self.transport.is_connected() {
            self.correlator
                .send_text(
                    self.session.user_id.clone(),
                    receiver_address.clone(),
                    body.to_string(),
                    token.clone(),
                )
                .await
        } else {
            Err(SendError::NotConnected)
        };

        let outcome = match outcome {
            Err(SendError::NotConnected) => {
                debug!(chat_id = %chat_id, "client: live transport down, trying REST send");
                match self.history.post_message(&receiver_address, body).await {
                    Ok(message) => Ok(message),
                    Err(err) => {
                        warn!("client: REST send fallback failed: {err}");
                        Err(SendError::NotConnected)
                    }
                }
            }
            other => other,
        };

        match outcome {
            Ok(message) => {
                self.store
                    .lock()
                    .await
                    .resolve_send(chat_id, &token, message);
                self.notify(ClientUpdate::MessagesChanged {
                    chat_id: chat_id.clone(),
                });
                self.notify(ClientUpdate::ChatListChanged);
                Ok(())
            }
            Err(err) => {
                self.store.lock().await.fail_send(chat_id, &token);
                self.notify(ClientUpdate::MessagesChanged {
                    chat_id: chat_id.clone(),
                });
                Err(err)
            }
        }
    }

    async fn run_dispatcher(self: Arc<Self>) {
        let mut events = self.transport.subscribe();
        let mut state = self.transport.watch_state();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.handle_server_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "client: dispatcher lagged behind transport events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *state.borrow_and_update();
                    self.notify(ClientUpdate::ConnectionChanged(current));
                    if current == ConnectionState::Closed {
                        break;
                    }
                }
            }
        }
    }

    async fn handle_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage(payload) => {
                let message_id = payload.id.clone();
                let sender_id = payload.sender_id.clone();
                let outcome = self.store.lock().await.apply_inbound(payload);
                if outcome == InboundOutcome::Ignored {
                    return;
                }
                self.notify(ClientUpdate::MessagesChanged {
                    chat_id: sender_id.clone(),
                });
                self.notify(ClientUpdate::ChatListChanged);
                let ack = ClientEvent::MessageDeliveredAck { message_id };
                if let Err(err) = self.transport.send(ack).await {
                    debug!("client: delivered ack not sent: {err}");
                }
                if outcome == InboundOutcome::AppliedToSelected {
                    // The chat is on screen; acknowledge the read right away.
                    let receipt = ClientEvent::MarkMessagesAsRead {
                        chat_partner_id: sender_id,
                    };
                    if let Err(err) = self.transport.send(receipt).await {
                        debug!("client: read receipt not sent: {err}");
                    }
                }
            }
            ServerEvent::MessageSent {
                correlation_token,
                message,
            } => {
                if !self
                    .correlator
                    .resolve_sent(&correlation_token, message)
                    .await
                {
                    debug!(token = %correlation_token, "client: unmatched send confirmation");
                }
            }
            ServerEvent::MessageError {
                correlation_token,
                error,
            } => {
                if !self
                    .correlator
                    .resolve_error(&correlation_token, error)
                    .await
                {
                    debug!(token = %correlation_token, "client: unmatched send rejection");
                }
            }
            ServerEvent::MessageStatusUpdate { message_id, status } => {
                let changed = self
                    .store
                    .lock()
                    .await
                    .apply_status_update(&message_id, status);
                if let Some(chat_id) = changed {
                    self.notify(ClientUpdate::MessagesChanged { chat_id });
                }
            }
            ServerEvent::MessagesRead { chat_partner_id } => {
                if self
                    .store
                    .lock()
                    .await
                    .apply_messages_read(&chat_partner_id)
                {
                    self.notify(ClientUpdate::MessagesChanged {
                        chat_id: chat_partner_id,
                    });
                }
            }
            ServerEvent::UserStatusUpdate {
                user_id,
                is_online,
                last_seen,
            } => {
                self.presence
                    .lock()
                    .await
                    .apply_update(user_id.clone(), is_online, last_seen);
                self.store
                    .lock()
                    .await
                    .apply_presence(&user_id, is_online, last_seen);
                self.notify(ClientUpdate::PresenceChanged { user_id });
            }
            ServerEvent::UserTyping { user_id, is_typing } => {
                self.notify(ClientUpdate::TypingChanged { user_id, is_typing });
            }
            ServerEvent::NewContact(contact) => {
                let user_id = contact.id.clone();
                if self
                    .store
                    .lock()
                    .await
                    .upsert_contact(Contact::from_wire(contact))
                {
                    self.notify(ClientUpdate::ContactAdded { user_id });
                    self.notify(ClientUpdate::ChatListChanged);
                }
            }
        }
    }

    fn notify(&self, update: ClientUpdate) {
        let _ = self.updates.send(update);
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
