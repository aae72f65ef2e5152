//! Session-facing access layer.
//!
//! A [`Session`] is an already-resolved `(tenant, user)` pair; identity and
//! session management live outside this crate.  [`ChatAccess`] opens and
//! lists chats on a session's behalf and performs the administrative
//! teardown when a user's access is revoked.

use std::sync::Arc;

use coterie_shared::{ChatId, ChatKey, TenantId, UserId};
use coterie_store::{Chat, StoreError};

use crate::chat::ChatHandle;
use crate::error::{ChatError, Result};
use crate::registry::ChatRegistry;

/// An authenticated session, resolved to its tenant and user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub tenant: TenantId,
    pub user: UserId,
}

/// Parameters for creating a chat.
#[derive(Debug, Clone, Default)]
pub struct ChatDescription {
    /// Client-supplied id; generated when absent.
    pub id: Option<ChatId>,
    pub subject: Option<String>,
    /// Whether message bodies are encrypted at rest.
    pub secure: bool,
}

pub struct ChatAccess {
    registry: Arc<ChatRegistry>,
}

impl ChatAccess {
    pub fn new(registry: Arc<ChatRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ChatRegistry> {
        &self.registry
    }

    /// Create a chat with the session's user as sole initial member and
    /// return its handle.
    pub fn open_chat(&self, session: Session, desc: &ChatDescription) -> Result<Arc<ChatHandle>> {
        let chat = {
            let mut db = self.registry.services().pool().write(session.tenant)?;
            db.create_chat(
                session.tenant,
                desc.id,
                desc.subject.as_deref(),
                desc.secure,
                session.user,
            )
            .map_err(|e| match e {
                StoreError::AlreadyExists => {
                    ChatError::ChatAlreadyExists(desc.id.unwrap_or(ChatId(0)))
                }
                other => ChatError::Storage(other),
            })?
        };

        self.registry
            .get_or_create(ChatKey::new(session.tenant, chat.id))
    }

    /// Open an existing chat's handle.
    pub fn get_chat(&self, session: Session, chat: ChatId) -> Result<Arc<ChatHandle>> {
        self.registry
            .get_or_create(ChatKey::new(session.tenant, chat))
    }

    /// Chats whose current roster includes the session's user.
    pub fn list_chats(&self, session: Session) -> Result<Vec<Chat>> {
        let db = self.registry.services().pool().read(session.tenant)?;
        Ok(db.list_chats_for_user(session.tenant, session.user)?)
    }

    /// Tear down a user's chat access: remove their membership rows from
    /// every chunk of every chat in the tenant, then delete any chat left
    /// without members.  Deletion failures are logged, never surfaced.
    pub fn teardown(&self, session: Session) {
        let tenant = session.tenant;
        let user = session.user;

        let candidates = {
            let db = match self.registry.services().pool().write(tenant) {
                Ok(db) => db,
                Err(e) => {
                    tracing::warn!(%tenant, %user, error = %e, "teardown could not acquire connection");
                    return;
                }
            };

            if let Err(e) = db.remove_user_everywhere(tenant, user) {
                tracing::warn!(%tenant, %user, error = %e, "teardown membership removal failed");
                return;
            }

            match db.memberless_chats(tenant) {
                Ok(chats) => chats,
                Err(e) => {
                    tracing::warn!(%tenant, %user, error = %e, "teardown candidate scan failed");
                    return;
                }
            }
        };

        if candidates.is_empty() {
            return;
        }

        let keys: Vec<ChatKey> = candidates
            .iter()
            .map(|chat| ChatKey::new(tenant, *chat))
            .collect();
        if let Err(e) = self.registry.remove_many(&keys) {
            tracing::warn!(%tenant, %user, error = %e, "teardown chat deletion failed");
        } else {
            tracing::info!(%tenant, %user, removed = keys.len(), "teardown removed memberless chats");
        }
    }
}
