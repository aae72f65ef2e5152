use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when a textual identifier cannot be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid identifier: {0:?}")]
pub struct ParseIdError(pub String);

macro_rules! numeric_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
        )]
        pub struct $name(pub i64);

        impl $name {
            pub fn parse(s: &str) -> Result<Self, ParseIdError> {
                s.trim()
                    .parse::<i64>()
                    .map(Self)
                    .map_err(|_| ParseIdError(s.to_string()))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

numeric_id!(
    /// Isolation boundary.  All chat data is partitioned by tenant; there are
    /// no cross-tenant queries.
    TenantId
);

numeric_id!(
    /// Tenant-scoped chat identifier.
    ChatId
);

numeric_id!(
    /// Membership chunk identifier, strictly increasing from 1 per chat.
    ChunkId
);

numeric_id!(
    /// Tenant-scoped user identifier.
    UserId
);

impl ChunkId {
    /// The chunk id every chat starts with.
    pub const FIRST: ChunkId = ChunkId(1);

    pub fn next(self) -> ChunkId {
        ChunkId(self.0 + 1)
    }
}

/// 128-bit message identifier, stored as 16 raw bytes and rendered as the
/// canonical 8-4-4-4-12 hex string at the boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Raw 16-byte representation used for storage and index comparisons.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseIdError> {
        Uuid::from_slice(bytes)
            .map(Self)
            .map_err(|_| ParseIdError(hex::encode(bytes)))
    }

    pub fn parse(s: &str) -> Result<Self, ParseIdError> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ParseIdError(s.to_string()))
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity a chat is addressed by: `(tenant, chat)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChatKey {
    pub tenant: TenantId,
    pub chat: ChatId,
}

impl ChatKey {
    pub fn new(tenant: TenantId, chat: ChatId) -> Self {
        Self { tenant, chat }
    }

    /// String form used as associated data for the crypto adapter.
    pub fn aad(&self) -> String {
        format!("{}/{}", self.tenant, self.chat)
    }
}

impl std::fmt::Display for ChatKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant, self.chat)
    }
}
