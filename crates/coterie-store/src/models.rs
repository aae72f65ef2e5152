//! Domain model structs persisted in the per-tenant databases.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to callers above the store boundary.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use coterie_shared::{ChatId, ChunkId, MessageId, TenantId, UserId};

/// Current wall-clock time in epoch milliseconds, the unit used for all
/// ordering and cursor comparisons.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A group chat.  `secure` selects whether message bodies are stored as
/// opaque ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub tenant: TenantId,
    pub id: ChatId,
    /// Mutable chat subject.
    pub subject: Option<String>,
    /// Whether message bodies are encrypted at rest.
    pub secure: bool,
    /// Creation timestamp (epoch millis), immutable once set.
    pub created_at: i64,
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// One member's row inside a membership chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberRow {
    pub user: UserId,
    /// Per-member operational flag, reserved for future delivery modes.
    pub op_mode: i64,
    /// Per-user pull cursor (epoch millis) advanced on each poll.
    pub last_poll: i64,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message, permanently tagged with the chunk that was current
/// when it was written.  The body is opaque ciphertext when the owning chat
/// is secure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub tenant: TenantId,
    pub chat: ChatId,
    pub chunk: ChunkId,
    pub sender: UserId,
    pub subject: Option<String>,
    pub body: Vec<u8>,
    /// Epoch millis; strictly used for ordering and cursor comparisons.
    pub created_at: i64,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Presence status, stored as an integer column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[repr(i64)]
pub enum PresenceStatus {
    Available = 0,
    Away = 1,
    DoNotDisturb = 2,
    Offline = 3,
}

impl PresenceStatus {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Available),
            1 => Some(Self::Away),
            2 => Some(Self::DoNotDisturb),
            3 => Some(Self::Offline),
            _ => None,
        }
    }
}

/// A user's stored presence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Presence {
    pub user: UserId,
    pub status: PresenceStatus,
    pub status_message: Option<String>,
    pub updated_at: i64,
}

impl Presence {
    /// The presence synthesized for a user with an active session but no
    /// stored row yet.
    pub fn available(user: UserId) -> Self {
        Self {
            user,
            status: PresenceStatus::Available,
            status_message: None,
            updated_at: now_millis(),
        }
    }
}
