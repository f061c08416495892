use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ContactAddress, CorrelationToken, MessageId, MessageKind, MessageStatus, UserId},
    error::WireError,
};

/// A server-confirmed message as it appears on the wire, both inside
/// `messageSent` acknowledgments and in `newMessage` pushes.
///
/// The canonical identity field is `id`; older server revisions emit `_id`
/// instead, so deserialization accepts either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(alias = "_id")]
    pub id: MessageId,
    pub sender_id: UserId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPayload {
    #[serde(alias = "_id")]
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<ContactAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_photo: Option<String>,
}

/// Client → server events on the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Announce presence for an identity. Sent on connect and on every
    /// reconnect; a connection that skips this receives no events.
    Join { user_id: UserId },
    SendMessage {
        sender_id: UserId,
        receiver_address: ContactAddress,
        body: String,
        correlation_token: CorrelationToken,
    },
    /// Bulk read receipt for every message from one chat partner.
    MarkMessagesAsRead { chat_partner_id: UserId },
    MessageDeliveredAck { message_id: MessageId },
}

/// Server → client events on the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    NewMessage(MessagePayload),
    MessageSent {
        correlation_token: CorrelationToken,
        message: MessagePayload,
    },
    MessageError {
        correlation_token: CorrelationToken,
        error: WireError,
    },
    MessageStatusUpdate {
        message_id: MessageId,
        status: MessageStatus,
    },
    MessagesRead {
        chat_partner_id: UserId,
    },
    UserStatusUpdate {
        user_id: UserId,
        is_online: bool,
        #[serde(default)]
        last_seen: Option<DateTime<Utc>>,
    },
    /// Transient typing indicator; never persisted.
    UserTyping {
        user_id: UserId,
        is_typing: bool,
    },
    NewContact(ContactPayload),
}
