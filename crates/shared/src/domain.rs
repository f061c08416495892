use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(MessageId);
id_newtype!(ContactAddress);
id_newtype!(CorrelationToken);

impl From<CorrelationToken> for MessageId {
    fn from(token: CorrelationToken) -> Self {
        MessageId(token.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Sending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            // Terminal; never compared by rank.
            MessageStatus::Failed => u8::MAX,
        }
    }

    /// Whether a transition to `next` is a forward step. `Failed` is terminal
    /// and only reachable from `Sending`; everything else must strictly
    /// advance under `sending < sent < delivered < read`.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        if self == MessageStatus::Failed {
            return false;
        }
        if next == MessageStatus::Failed {
            return self == MessageStatus::Sending;
        }
        next.rank() > self.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Document,
    Audio,
}
