//! The per-chat façade: one [`ChatHandle`] per `(tenant, chat)`.
//!
//! A handle coalesces ledger and message-store operations into
//! join/part/post/poll calls, owns the dispatch watermark and a display-name
//! cache, and applies transparent encryption when the chat is secure.  The
//! registry guarantees at most one live handle per chat, so the in-memory
//! state here is only ever mutated through that single instance; the
//! database transaction remains the real serialization point for ledger
//! rollovers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use coterie_shared::{ChatKey, ChunkId, MessageId, UserId};
use coterie_store::membership::{JoinOutcome, PartOutcome};
use coterie_store::{now_millis, Database, Message, StoreError};

use crate::error::{ChatError, Result};
use crate::listener::{notify_one, ChatListener, ListenerRegistry};
use crate::services::{Services, TenantContext};

/// Attribute changes for an existing message.  A desc with no changed
/// fields makes the whole call a no-op.
#[derive(Debug, Clone, Default)]
pub struct MessageUpdate {
    pub subject: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl MessageUpdate {
    pub fn is_empty(&self) -> bool {
        self.subject.is_none() && self.body.is_none()
    }
}

/// Outcome of a part operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartResult {
    /// The user left; `ChunkId` is the new current chunk.
    Departed(ChunkId),
    /// The user was the last member; the chat and all its rows are gone and
    /// the registry entry must be dropped.
    Deleted,
}

pub struct ChatHandle {
    key: ChatKey,
    secure: bool,
    services: Arc<Services>,
    global_listeners: Arc<ListenerRegistry>,
    local_listeners: RwLock<Vec<Arc<dyn ChatListener>>>,
    /// Lazily resolved tenant context; first writer wins.
    context: OnceLock<TenantContext>,
    /// Max `created_at` observed by the dispatch scheduler for this chat.
    last_checked: AtomicI64,
    /// userID -> display name, populated on demand, never evicted within
    /// the handle's lifetime.
    names: Mutex<HashMap<UserId, String>>,
}

impl std::fmt::Debug for ChatHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHandle")
            .field("key", &self.key)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl ChatHandle {
    /// Open a handle for an existing chat.  Fails with `ChatNotFound` when
    /// the chat row does not exist.
    pub(crate) fn open(
        services: Arc<Services>,
        global_listeners: Arc<ListenerRegistry>,
        key: ChatKey,
    ) -> Result<Self> {
        let chat = {
            let db = services.pool().read(key.tenant)?;
            db.get_chat(key.tenant, key.chat).map_err(|e| match e {
                StoreError::NotFound => ChatError::ChatNotFound(key.chat),
                other => ChatError::Storage(other),
            })?
        };

        Ok(Self {
            key,
            secure: chat.secure,
            services,
            global_listeners,
            local_listeners: RwLock::new(Vec::new()),
            context: OnceLock::new(),
            // Dispatch picks up from the moment the handle materializes.
            last_checked: AtomicI64::new(now_millis()),
            names: Mutex::new(HashMap::new()),
        })
    }

    pub fn key(&self) -> ChatKey {
        self.key
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// The resolved tenant context, fetched once and cached.
    pub fn context(&self) -> Result<&TenantContext> {
        if let Some(ctx) = self.context.get() {
            return Ok(ctx);
        }
        let resolved = self.services.resolver().resolve(self.key.tenant)?;
        Ok(self.context.get_or_init(|| resolved))
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Add `user` to the chat.  The join notice is appended to the outgoing
    /// chunk before the rollover, so the prior roster sees it too.
    pub fn join(&self, user: UserId) -> Result<ChunkId> {
        let notice_text = format!("{} joined the chat", self.display_name(user));
        let notice_body = self.encrypt_body(notice_text.as_bytes())?;

        let outcome = {
            let mut db = self.services.pool().write(self.key.tenant)?;
            db.join_chat(self.key.tenant, self.key.chat, user, Some(&notice_body))
                .map_err(|e| self.not_found_as_chat(e))?
        };

        match outcome {
            JoinOutcome::AlreadyMember => Err(ChatError::AlreadyMember),
            JoinOutcome::Joined { chunk, notice } => {
                if let Some(notice) = notice {
                    self.notify(&with_body(notice, notice_text.into_bytes()));
                }
                Ok(chunk)
            }
        }
    }

    /// Remove `user` from the chat.  Removing the last member deletes the
    /// chat entirely; the caller (registry) must drop its entry on
    /// [`PartResult::Deleted`].
    pub fn part(&self, user: UserId) -> Result<PartResult> {
        let notice_text = format!("{} left the chat", self.display_name(user));
        let notice_body = self.encrypt_body(notice_text.as_bytes())?;

        let outcome = {
            let mut db = self.services.pool().write(self.key.tenant)?;
            db.part_chat(self.key.tenant, self.key.chat, user, Some(&notice_body))
                .map_err(|e| self.not_found_as_chat(e))?
        };

        match outcome {
            PartOutcome::NotMember => Err(ChatError::InvalidArgument(format!(
                "user {user} is not a member of chat {}",
                self.key
            ))),
            PartOutcome::ChatDeleted => Ok(PartResult::Deleted),
            PartOutcome::Departed { chunk, notice } => {
                if let Some(notice) = notice {
                    self.notify(&with_body(notice, notice_text.into_bytes()));
                }
                Ok(PartResult::Departed(chunk))
            }
        }
    }

    /// Members of the current chunk only.
    pub fn members(&self) -> Result<Vec<UserId>> {
        let db = self.services.pool().read(self.key.tenant)?;
        let chunk = db.current_chunk(self.key.tenant, self.key.chat)?;
        Ok(db.members_of_chunk(self.key.tenant, self.key.chat, chunk)?)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Append a message against the current chunk and notify the chat's
    /// effective listener set.
    pub fn post(&self, from: UserId, subject: Option<&str>, body: &[u8]) -> Result<Message> {
        let stored_body = self.encrypt_body(body)?;

        let message = {
            let mut db = self.services.pool().write(self.key.tenant)?;
            db.append_message(self.key.tenant, self.key.chat, from, subject, &stored_body)
                .map_err(|e| self.not_found_as_chat(e))?
        };

        let plain = with_body(message, body.to_vec());
        self.notify(&plain);
        Ok(plain)
    }

    /// Apply a partial update.  A desc with no changed fields is a no-op;
    /// an updated body is re-encrypted for secure chats.
    pub fn update_message(&self, id: MessageId, update: &MessageUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let body = match &update.body {
            Some(body) => Some(self.encrypt_body(body)?),
            None => None,
        };

        let mut db = self.services.pool().write(self.key.tenant)?;
        db.update_message(
            self.key.tenant,
            id,
            update.subject.as_deref(),
            body.as_deref(),
        )
        .map_err(|e| match e {
            StoreError::NotFound => ChatError::MessageNotFound(id),
            other => ChatError::from_store(other),
        })
    }

    pub fn delete_message(&self, id: MessageId) -> Result<()> {
        let mut db = self.services.pool().write(self.key.tenant)?;
        db.delete_message(self.key.tenant, id).map_err(|e| match e {
            StoreError::NotFound => ChatError::MessageNotFound(id),
            other => ChatError::Storage(other),
        })
    }

    /// Fetch messages by id as seen by `as_user`.  The lookup is constrained
    /// to chunks the user held membership in; the first unresolvable id
    /// fails the whole call.
    pub fn get_messages(&self, ids: &[MessageId], as_user: UserId) -> Result<Vec<Message>> {
        let db = self.services.pool().read(self.key.tenant)?;
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            let message = db
                .get_message_visible_to(self.key.tenant, self.key.chat, as_user, *id)
                .map_err(|e| match e {
                    StoreError::NotFound => ChatError::MessageNotFound(*id),
                    other => ChatError::Storage(other),
                })?;
            messages.push(self.decrypt_message(message)?);
        }
        Ok(messages)
    }

    /// Partial-result variant: unresolvable ids are collected instead of
    /// failing the batch.
    pub fn get_messages_partial(
        &self,
        ids: &[MessageId],
        as_user: UserId,
    ) -> Result<(Vec<Message>, Vec<MessageId>)> {
        let db = self.services.pool().read(self.key.tenant)?;
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for id in ids {
            match db.get_message_visible_to(self.key.tenant, self.key.chat, as_user, *id) {
                Ok(message) => found.push(self.decrypt_message(message)?),
                Err(StoreError::NotFound) => missing.push(*id),
                Err(other) => return Err(ChatError::Storage(other)),
            }
        }
        Ok((found, missing))
    }

    /// Count of messages `user` has not seen, scoped to their chunks.
    pub fn unread_count(&self, user: UserId, since: Option<i64>) -> Result<i64> {
        let db = self.services.pool().read(self.key.tenant)?;
        Ok(db.unread_count(self.key.tenant, self.key.chat, user, since)?)
    }

    /// Read the user's new messages and advance their pull cursor, as one
    /// transaction view.
    pub fn poll_messages(&self, since: Option<i64>, user: UserId) -> Result<Vec<Message>> {
        let messages = {
            let mut db = self.services.pool().write(self.key.tenant)?;
            db.poll_messages(self.key.tenant, self.key.chat, user, since)?
        };
        messages
            .into_iter()
            .map(|m| self.decrypt_message(m))
            .collect()
    }

    /// Change the chat's subject.
    pub fn set_subject(&self, subject: Option<&str>) -> Result<()> {
        let db = self.services.pool().write(self.key.tenant)?;
        db.set_chat_subject(self.key.tenant, self.key.chat, subject)
            .map_err(|e| self.not_found_as_chat(e))
    }

    // ------------------------------------------------------------------
    // Dispatch path
    // ------------------------------------------------------------------

    /// Messages of the current chunk newer than the dispatch watermark,
    /// advancing the watermark to the max `created_at` observed.  Used only
    /// by the dispatch scheduler; no user's pull cursor is touched.
    pub fn new_messages_for_dispatch(&self, db: &Database) -> Result<Vec<Message>> {
        let chunk = db.current_chunk(self.key.tenant, self.key.chat)?;
        let since = self.last_checked.load(Ordering::Acquire);
        let messages =
            db.messages_since_in_chunk(self.key.tenant, self.key.chat, chunk, since)?;

        if let Some(max) = messages.iter().map(|m| m.created_at).max() {
            self.advance_watermark(max);
        }

        messages
            .into_iter()
            .map(|m| self.decrypt_message(m))
            .collect()
    }

    /// The current dispatch watermark (max observed `created_at`).
    pub fn last_checked(&self) -> i64 {
        self.last_checked.load(Ordering::Acquire)
    }

    /// Monotonic advance: never regresses, even under clock skew across
    /// rows.
    fn advance_watermark(&self, observed: i64) {
        let mut current = self.last_checked.load(Ordering::Acquire);
        while observed > current {
            match self.last_checked.compare_exchange(
                current,
                observed,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    pub fn add_listener(&self, listener: Arc<dyn ChatListener>) {
        self.local_listeners.write().push(listener);
    }

    pub fn local_listener_count(&self) -> usize {
        self.local_listeners.read().len()
    }

    /// Whether any listener (global or chat-local) would observe this chat.
    pub fn has_effective_listeners(&self) -> bool {
        self.global_listeners.global_count() > 0 || self.local_listener_count() > 0
    }

    /// Fan a message out to the effective listener set, global listeners
    /// first.
    pub(crate) fn notify(&self, message: &Message) {
        for listener in self.global_listeners.global_snapshot() {
            notify_one(&listener, self.key, message);
        }
        for listener in self.local_listeners.read().iter() {
            notify_one(listener, self.key, message);
        }
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    /// Resolve and cache a member's display name.  A cache miss performs
    /// exactly one directory lookup; concurrent misses for the same id are
    /// resolved first-writer-wins so both readers get a consistent name.
    pub fn display_name(&self, user: UserId) -> String {
        if let Some(name) = self.names.lock().get(&user) {
            return name.clone();
        }

        let resolved = self
            .services
            .directory()
            .display_name(self.key.tenant, user)
            .unwrap_or_else(|| user.to_string());

        self.names
            .lock()
            .entry(user)
            .or_insert(resolved)
            .clone()
    }

    // ------------------------------------------------------------------
    // Crypto
    // ------------------------------------------------------------------

    fn encrypt_body(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if !self.secure {
            return Ok(plaintext.to_vec());
        }
        Ok(self
            .services
            .crypto()?
            .encrypt(plaintext, &self.key.aad())?)
    }

    fn decrypt_message(&self, mut message: Message) -> Result<Message> {
        if self.secure {
            message.body = self
                .services
                .crypto()?
                .decrypt(&message.body, &self.key.aad())?;
        }
        Ok(message)
    }

    /// A store-level `NotFound` on a chat-scoped operation means the chat
    /// row is gone.
    fn not_found_as_chat(&self, e: StoreError) -> ChatError {
        match e {
            StoreError::NotFound => ChatError::ChatNotFound(self.key.chat),
            other => ChatError::from_store(other),
        }
    }
}

fn with_body(message: Message, body: Vec<u8>) -> Message {
    Message { body, ..message }
}
