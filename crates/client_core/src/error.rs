use shared::domain::{ContactAddress, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("failed to connect: {0}")]
    Connect(String),
}

/// Failure modes of a single outgoing send. None of these are fatal: the
/// optimistic message ends up `Failed` and can be re-sent with a new token.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("message body is empty")]
    EmptyBody,
    #[error("no chat for contact {0}")]
    UnknownChat(UserId),
    #[error("contact {0} has no routable address")]
    Unroutable(UserId),
    #[error("transport is not connected")]
    NotConnected,
    #[error("no acknowledgment before the send deadline")]
    Timeout,
    #[error("send rejected by server: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
#[error("history unavailable for {address}")]
pub struct HistoryUnavailable {
    pub address: ContactAddress,
    #[source]
    pub source: reqwest::Error,
}
