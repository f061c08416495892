//! REST surface: chat history, the contact list, and the send fallback used
//! when the live transport is down.

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{ContactAddress, MessageId, MessageKind, MessageStatus},
    protocol::{ContactPayload, MessagePayload},
};
use tracing::debug;

use crate::{error::HistoryUnavailable, store::Message, UserSession};

/// A past message as the history endpoint returns it. Sender identity is not
/// explicit; it is resolved by comparing `from` against the local user's own
/// routing address.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    #[serde(alias = "_id")]
    id: MessageId,
    text: String,
    timestamp: DateTime<Utc>,
    from: ContactAddress,
    status: MessageStatus,
    #[serde(rename = "type", default)]
    kind: MessageKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRestRequest<'a> {
    receiver_address: &'a ContactAddress,
    body: &'a str,
}

pub struct HistoryLoader {
    http: Client,
    server_url: String,
    bearer: String,
}

impl HistoryLoader {
    pub fn new(server_url: impl Into<String>, bearer: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into(),
            bearer: bearer.into(),
        }
    }

    /// Fetches and normalizes a chat's past messages, oldest first. The
    /// caller falls back to an empty list on `HistoryUnavailable` rather than
    /// blocking chat display.
    pub async fn load_history(
        &self,
        contact_address: &ContactAddress,
        counterparty: &shared::domain::UserId,
        local: &UserSession,
    ) -> Result<Vec<Message>, HistoryUnavailable> {
        let records: Vec<HistoryRecord> = self
            .http
            .get(format!("{}/messages/{contact_address}", self.server_url))
            .bearer_auth(&self.bearer)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|source| HistoryUnavailable {
                address: contact_address.clone(),
                source,
            })?
            .json()
            .await
            .map_err(|source| HistoryUnavailable {
                address: contact_address.clone(),
                source,
            })?;

        debug!(address = %contact_address, count = records.len(), "history: loaded");

        let mut messages: Vec<Message> = records
            .into_iter()
            .map(|record| {
                let sender_id = if record.from == local.address {
                    local.user_id.clone()
                } else {
                    counterparty.clone()
                };
                Message {
                    id: record.id,
                    sender_id,
                    text: record.text,
                    timestamp: record.timestamp,
                    status: record.status,
                    kind: record.kind,
                    attachment: None,
                }
            })
            .collect();
        messages.sort_by_key(|message| message.timestamp);
        Ok(messages)
    }

    pub async fn fetch_contacts(&self) -> Result<Vec<ContactPayload>> {
        let contacts = self
            .http
            .get(format!("{}/users/contacts", self.server_url))
            .bearer_auth(&self.bearer)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(contacts)
    }

    /// Send fallback for when the live transport is unavailable.
    pub async fn post_message(
        &self,
        receiver_address: &ContactAddress,
        body: &str,
    ) -> Result<MessagePayload> {
        let message = self
            .http
            .post(format!("{}/messages/", self.server_url))
            .bearer_auth(&self.bearer)
            .json(&SendMessageRestRequest {
                receiver_address,
                body,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(message)
    }
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
