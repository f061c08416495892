//! Authoritative in-memory fold of all chat and message mutations.
//!
//! Three sources feed this store: the user's own sends, inbound push events,
//! and REST history fetches. The merge rules keep every chat's message list
//! totally ordered by timestamp with at most one entry per confirmed
//! identity, and keep status transitions monotonic.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ContactAddress, CorrelationToken, MessageId, MessageKind, MessageStatus, UserId},
    protocol::{ContactPayload, MessagePayload},
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub url: String,
    pub filename: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
}

impl Message {
    pub fn from_wire(payload: MessagePayload) -> Self {
        let attachment = payload.file_url.map(|url| Attachment {
            url,
            filename: payload.file_name,
            size: payload.file_size,
        });
        Self {
            id: payload.id,
            sender_id: payload.sender_id,
            text: payload.text,
            timestamp: payload.timestamp,
            status: payload.status,
            kind: payload.kind,
            attachment,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub id: UserId,
    pub name: String,
    pub address: Option<ContactAddress>,
    pub photo: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Contact {
    /// Presence starts unknown-offline; it is only ever set by inbound
    /// presence events, never invented locally.
    pub fn from_wire(payload: ContactPayload) -> Self {
        Self {
            id: payload.id,
            name: payload.name,
            address: payload.address,
            photo: payload.profile_photo,
            is_online: false,
            last_seen: None,
        }
    }
}

/// Ordered message list with an identity index: membership checks are O(1)
/// and inserts go to their timestamp position instead of re-sorting.
#[derive(Debug, Default)]
struct MessageList {
    order: Vec<Message>,
    index: HashMap<MessageId, usize>,
}

impl MessageList {
    fn seed(messages: Vec<Message>) -> Self {
        let mut list = Self::default();
        for message in messages {
            list.insert_by_timestamp(message);
        }
        list
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    /// Inserts at the timestamp position; duplicates by identity are dropped.
    fn insert_by_timestamp(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        let mut pos = self.order.len();
        while pos > 0 && self.order[pos - 1].timestamp > message.timestamp {
            pos -= 1;
        }
        self.order.insert(pos, message);
        self.reindex_from(pos);
        true
    }

    /// Appends at the tail regardless of timestamp, preserving the order in
    /// which local sends were issued.
    fn push_tail(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.index.insert(message.id.clone(), self.order.len());
        self.order.push(message);
        true
    }

    /// Replaces the entry under `old_id` in place, keeping its list position.
    /// If the replacement's identity is already present elsewhere, the stale
    /// entry is removed instead so no message is represented twice.
    fn replace(&mut self, old_id: &MessageId, mut message: Message) -> bool {
        let Some(pos) = self.index.remove(old_id) else {
            return false;
        };
        if self.contains(&message.id) {
            self.order.remove(pos);
            self.reindex_from(pos);
        } else {
            // A receipt may already have advanced the old entry; the
            // replacement must not roll the observed status back.
            let current = self.order[pos].status;
            if !current.can_advance_to(message.status) && current != message.status {
                message.status = current;
            }
            self.index.insert(message.id.clone(), pos);
            self.order[pos] = message;
        }
        true
    }

    /// Forward-only status transition; regressions are a no-op.
    fn advance_status(&mut self, id: &MessageId, status: MessageStatus) -> bool {
        let Some(&pos) = self.index.get(id) else {
            return false;
        };
        if !self.order[pos].status.can_advance_to(status) {
            return false;
        }
        self.order[pos].status = status;
        true
    }

    fn reindex_from(&mut self, start: usize) {
        for pos in start..self.order.len() {
            self.index.insert(self.order[pos].id.clone(), pos);
        }
    }

    fn last(&self) -> Option<&Message> {
        self.order.last()
    }

    fn messages(&self) -> &[Message] {
        &self.order
    }
}

#[derive(Debug)]
pub struct Chat {
    pub contact: Contact,
    list: MessageList,
    pub unread: u32,
    pub pinned: bool,
    pub archived: bool,
}

impl Chat {
    fn new(contact: Contact) -> Self {
        Self {
            contact,
            list: MessageList::default(),
            unread: 0,
            pinned: false,
            archived: false,
        }
    }

    pub fn messages(&self) -> &[Message] {
        self.list.messages()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.list.last()
    }
}

/// Read-only view of a chat for list rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSnapshot {
    pub contact: Contact,
    pub unread: u32,
    pub pinned: bool,
    pub archived: bool,
    pub last_message: Option<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Appended to the chat the user currently has open.
    AppliedToSelected,
    Applied,
    /// Duplicate, own echo, or unknown chat; dropped without error.
    Ignored,
}

pub struct ConversationStore {
    local_user: UserId,
    chats: HashMap<UserId, Chat>,
    /// Most-recently-active first.
    order: Vec<UserId>,
    selected: Option<UserId>,
}

impl ConversationStore {
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            chats: HashMap::new(),
            order: Vec::new(),
            selected: None,
        }
    }

    /// At most one chat per contact identifier; a new contact's chat goes to
    /// the front of the list. Returns true when a chat was created.
    pub fn upsert_contact(&mut self, contact: Contact) -> bool {
        if let Some(chat) = self.chats.get_mut(&contact.id) {
            chat.contact.name = contact.name;
            chat.contact.address = contact.address;
            chat.contact.photo = contact.photo;
            return false;
        }
        let id = contact.id.clone();
        self.chats.insert(id.clone(), Chat::new(contact));
        self.order.insert(0, id);
        true
    }

    /// Replaces the chat's message list wholesale with normalized history.
    pub fn seed_history(&mut self, chat_id: &UserId, messages: Vec<Message>) -> bool {
        let Some(chat) = self.chats.get_mut(chat_id) else {
            return false;
        };
        chat.list = MessageList::seed(messages);
        true
    }

    /// Inserts an optimistic message at the tail. Two locally-issued sends
    /// are never reordered relative to each other.
    pub fn apply_outgoing(&mut self, chat_id: &UserId, message: Message) -> bool {
        let Some(chat) = self.chats.get_mut(chat_id) else {
            return false;
        };
        if !chat.list.push_tail(message) {
            return false;
        }
        self.move_to_front(chat_id);
        true
    }

    /// Swaps the optimistic entry keyed by `token` for the confirmed message,
    /// preserving its list position.
    pub fn resolve_send(
        &mut self,
        chat_id: &UserId,
        token: &CorrelationToken,
        payload: MessagePayload,
    ) -> bool {
        let Some(chat) = self.chats.get_mut(chat_id) else {
            return false;
        };
        let temp_id = MessageId(token.0.clone());
        if !chat.list.replace(&temp_id, Message::from_wire(payload)) {
            return false;
        }
        self.move_to_front(chat_id);
        true
    }

    /// Marks the optimistic entry failed in place; it stays in the list and
    /// is eligible for a manual retry with a fresh token.
    pub fn fail_send(&mut self, chat_id: &UserId, token: &CorrelationToken) -> bool {
        let Some(chat) = self.chats.get_mut(chat_id) else {
            return false;
        };
        let temp_id = MessageId(token.0.clone());
        chat.list.advance_status(&temp_id, MessageStatus::Failed)
    }

    /// Folds a push-delivered message into the sender's chat: duplicate
    /// suppression by confirmed identity, timestamp-position insert, unread
    /// increment unless the chat is open, chat moved to the front.
    pub fn apply_inbound(&mut self, payload: MessagePayload) -> InboundOutcome {
        if payload.sender_id == self.local_user {
            return InboundOutcome::Ignored;
        }
        let sender = payload.sender_id.clone();
        let Some(chat) = self.chats.get_mut(&sender) else {
            debug!(sender = %sender, "store: push for unknown chat ignored");
            return InboundOutcome::Ignored;
        };
        if !chat.list.insert_by_timestamp(Message::from_wire(payload)) {
            return InboundOutcome::Ignored;
        }
        let selected = self.selected.as_ref() == Some(&sender);
        if !selected {
            chat.unread += 1;
        }
        self.move_to_front(&sender);
        if selected {
            InboundOutcome::AppliedToSelected
        } else {
            InboundOutcome::Applied
        }
    }

    /// Applies a `delivered`/`read` transition wherever the message lives.
    /// Out-of-order updates are expected under retries and ignored.
    pub fn apply_status_update(
        &mut self,
        message_id: &MessageId,
        status: MessageStatus,
    ) -> Option<UserId> {
        for (chat_id, chat) in &mut self.chats {
            if chat.list.contains(message_id) {
                if chat.list.advance_status(message_id, status) {
                    return Some(chat_id.clone());
                }
                return None;
            }
        }
        None
    }

    /// Bulk read receipt: every message the local user sent to this partner
    /// becomes `read` in one pass.
    pub fn apply_messages_read(&mut self, chat_partner_id: &UserId) -> bool {
        let Some(chat) = self.chats.get_mut(chat_partner_id) else {
            return false;
        };
        let own: Vec<MessageId> = chat
            .list
            .messages()
            .iter()
            .filter(|message| message.sender_id == self.local_user)
            .map(|message| message.id.clone())
            .collect();
        let mut changed = false;
        for id in own {
            changed |= chat.list.advance_status(&id, MessageStatus::Read);
        }
        changed
    }

    /// Selecting a chat resets its unread counter. Returns the contact so
    /// the caller can seed history without re-locking.
    pub fn select_chat(&mut self, chat_id: &UserId) -> Option<Contact> {
        let chat = self.chats.get_mut(chat_id)?;
        chat.unread = 0;
        self.selected = Some(chat_id.clone());
        Some(chat.contact.clone())
    }

    pub fn selected_chat(&self) -> Option<&UserId> {
        self.selected.as_ref()
    }

    pub fn apply_presence(
        &mut self,
        user_id: &UserId,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(chat) = self.chats.get_mut(user_id) else {
            return false;
        };
        chat.contact.is_online = is_online;
        chat.contact.last_seen = if is_online { None } else { last_seen };
        true
    }

    pub fn set_pinned(&mut self, chat_id: &UserId, pinned: bool) -> bool {
        match self.chats.get_mut(chat_id) {
            Some(chat) => {
                chat.pinned = pinned;
                true
            }
            None => false,
        }
    }

    pub fn set_archived(&mut self, chat_id: &UserId, archived: bool) -> bool {
        match self.chats.get_mut(chat_id) {
            Some(chat) => {
                chat.archived = archived;
                true
            }
            None => false,
        }
    }

    pub fn chat(&self, chat_id: &UserId) -> Option<&Chat> {
        self.chats.get(chat_id)
    }

    /// Chats in most-recently-active order.
    pub fn snapshot(&self) -> Vec<ChatSnapshot> {
        self.order
            .iter()
            .filter_map(|id| self.chats.get(id))
            .map(|chat| ChatSnapshot {
                contact: chat.contact.clone(),
                unread: chat.unread,
                pinned: chat.pinned,
                archived: chat.archived,
                last_message: chat.last_message().cloned(),
            })
            .collect()
    }

    fn move_to_front(&mut self, chat_id: &UserId) {
        if self.order.first() == Some(chat_id) {
            return;
        }
        self.order.retain(|id| id != chat_id);
        self.order.insert(0, chat_id.clone());
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
