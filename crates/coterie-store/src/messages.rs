//! The message store: append-only rows tagged with their membership chunk.
//!
//! Two range-query scopes exist deliberately.  The polling path filters by
//! the chunks the requesting user was ever a member of (the privacy
//! boundary); the dispatch path reads only the chat's single current chunk,
//! because its job is "what is new globally", not per-user visibility.

use rusqlite::{params, Transaction, TransactionBehavior};

use coterie_shared::constants::MAX_BODY_BYTES;
use coterie_shared::{ChatId, ChunkId, MessageId, TenantId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::membership::{current_chunk_in_tx, ensure_chat_exists};
use crate::models::{now_millis, Message};

impl Database {
    // ------------------------------------------------------------------
    // Append
    // ------------------------------------------------------------------

    /// Append a message against the chat's current chunk.  The current chunk
    /// is re-read inside the insert transaction so a concurrent rollover can
    /// never stamp the message with a stale chunk.
    pub fn append_message(
        &mut self,
        tenant: TenantId,
        chat: ChatId,
        sender: UserId,
        subject: Option<&str>,
        body: &[u8],
    ) -> Result<Message> {
        let now = now_millis();
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_chat_exists(&tx, tenant, chat)?;
        let chunk = current_chunk_in_tx(&tx, tenant, chat)?;
        let message = insert_message_in_tx(&tx, tenant, chat, chunk, sender, subject, body, now)?;
        tx.commit()?;
        Ok(message)
    }

    // ------------------------------------------------------------------
    // Range queries
    // ------------------------------------------------------------------

    /// Messages of a single chunk newer than `since`, ascending by creation
    /// time.  Dispatch-scheduler scope.
    pub fn messages_since_in_chunk(
        &self,
        tenant: TenantId,
        chat: ChatId,
        chunk: ChunkId,
        since: i64,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, tenant_id, chat_id, chunk_id, user_id, subject, body, created_at
             FROM chat_messages
             WHERE tenant_id = ?1 AND chat_id = ?2 AND chunk_id = ?3 AND created_at > ?4
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![tenant.0, chat.0, chunk.0, since], row_to_message)?;
        collect(rows)
    }

    /// Messages newer than `since` across every chunk the user was a member
    /// of, ascending by creation time.  Polling scope.
    pub fn messages_since_for_user(
        &self,
        tenant: TenantId,
        chat: ChatId,
        user: UserId,
        since: i64,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, tenant_id, chat_id, chunk_id, user_id, subject, body, created_at
             FROM chat_messages
             WHERE tenant_id = ?1 AND chat_id = ?2 AND created_at > ?4
               AND chunk_id IN (SELECT chunk_id FROM chat_members
                                WHERE tenant_id = ?1 AND chat_id = ?2 AND user_id = ?3)
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![tenant.0, chat.0, user.0, since], row_to_message)?;
        collect(rows)
    }

    /// The user's stored pull cursor for this chat: the `last_poll` of their
    /// most recent membership row.
    pub fn last_poll_of(
        &self,
        tenant: TenantId,
        chat: ChatId,
        user: UserId,
    ) -> Result<Option<i64>> {
        let mut stmt = self.conn().prepare(
            "SELECT last_poll FROM chat_members
             WHERE tenant_id = ?1 AND chat_id = ?2 AND user_id = ?3
             ORDER BY chunk_id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![tenant.0, chat.0, user.0])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Count of messages the user has not seen since `since` (or their
    /// stored pull cursor when `since` is absent), scoped to their chunks.
    pub fn unread_count(
        &self,
        tenant: TenantId,
        chat: ChatId,
        user: UserId,
        since: Option<i64>,
    ) -> Result<i64> {
        let since = match since {
            Some(s) => s,
            None => self.last_poll_of(tenant, chat, user)?.unwrap_or(0),
        };
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chat_messages
             WHERE tenant_id = ?1 AND chat_id = ?2 AND created_at > ?4
               AND chunk_id IN (SELECT chunk_id FROM chat_members
                                WHERE tenant_id = ?1 AND chat_id = ?2 AND user_id = ?3)",
            params![tenant.0, chat.0, user.0, since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Read the user's new messages and advance their pull cursor to `now`
    /// in the same transaction, so two polls in quick succession never
    /// double-count.  The cursor update targets only the user's current
    /// chunk membership row.
    pub fn poll_messages(
        &mut self,
        tenant: TenantId,
        chat: ChatId,
        user: UserId,
        since: Option<i64>,
    ) -> Result<Vec<Message>> {
        let now = now_millis();
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let since = match since {
            Some(s) => s,
            None => {
                let mut stmt = tx.prepare(
                    "SELECT last_poll FROM chat_members
                     WHERE tenant_id = ?1 AND chat_id = ?2 AND user_id = ?3
                     ORDER BY chunk_id DESC LIMIT 1",
                )?;
                let mut rows = stmt.query(params![tenant.0, chat.0, user.0])?;
                match rows.next()? {
                    Some(row) => row.get(0)?,
                    None => 0,
                }
            }
        };

        let messages = {
            let mut stmt = tx.prepare(
                "SELECT message_id, tenant_id, chat_id, chunk_id, user_id, subject, body, created_at
                 FROM chat_messages
                 WHERE tenant_id = ?1 AND chat_id = ?2 AND created_at > ?4
                   AND chunk_id IN (SELECT chunk_id FROM chat_members
                                    WHERE tenant_id = ?1 AND chat_id = ?2 AND user_id = ?3)
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map(params![tenant.0, chat.0, user.0, since], row_to_message)?;
            collect(rows)?
        };

        tx.execute(
            "UPDATE chat_members SET last_poll = ?4
             WHERE tenant_id = ?1 AND chat_id = ?2 AND user_id = ?3
               AND chunk_id = (SELECT MAX(chunk_id) FROM chat_chunks
                               WHERE tenant_id = ?1 AND chat_id = ?2)",
            params![tenant.0, chat.0, user.0, now],
        )?;

        tx.commit()?;
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Point lookups
    // ------------------------------------------------------------------

    /// Fetch a message, constrained to the chunks `user` held membership in.
    /// A message outside those chunks is indistinguishable from one that
    /// does not exist.
    pub fn get_message_visible_to(
        &self,
        tenant: TenantId,
        chat: ChatId,
        user: UserId,
        id: MessageId,
    ) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT message_id, tenant_id, chat_id, chunk_id, user_id, subject, body, created_at
                 FROM chat_messages
                 WHERE message_id = ?1 AND tenant_id = ?2 AND chat_id = ?3
                   AND chunk_id IN (SELECT chunk_id FROM chat_members
                                    WHERE tenant_id = ?2 AND chat_id = ?3 AND user_id = ?4)",
                params![id.as_bytes().as_slice(), tenant.0, chat.0, user.0],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    // ------------------------------------------------------------------
    // Update / delete
    // ------------------------------------------------------------------

    /// Partial-field update.  At least one of `subject` / `body` must be
    /// present (a no-change call is the caller's no-op, not ours); the
    /// message's `created_at` is rewritten.
    pub fn update_message(
        &mut self,
        tenant: TenantId,
        id: MessageId,
        subject: Option<&str>,
        body: Option<&[u8]>,
    ) -> Result<()> {
        if let Some(body) = body {
            check_body_len(body)?;
        }
        let now = now_millis();

        let affected = match (subject, body) {
            (Some(subject), Some(body)) => self.conn().execute(
                "UPDATE chat_messages SET subject = ?3, body = ?4, created_at = ?5
                 WHERE message_id = ?1 AND tenant_id = ?2",
                params![id.as_bytes().as_slice(), tenant.0, subject, body, now],
            )?,
            (Some(subject), None) => self.conn().execute(
                "UPDATE chat_messages SET subject = ?3, created_at = ?4
                 WHERE message_id = ?1 AND tenant_id = ?2",
                params![id.as_bytes().as_slice(), tenant.0, subject, now],
            )?,
            (None, Some(body)) => self.conn().execute(
                "UPDATE chat_messages SET body = ?3, created_at = ?4
                 WHERE message_id = ?1 AND tenant_id = ?2",
                params![id.as_bytes().as_slice(), tenant.0, body, now],
            )?,
            (None, None) => return Ok(()),
        };

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Delete a message by id.
    pub fn delete_message(&mut self, tenant: TenantId, id: MessageId) -> Result<()> {
        let affected = self.conn().execute(
            "DELETE FROM chat_messages WHERE message_id = ?1 AND tenant_id = ?2",
            params![id.as_bytes().as_slice(), tenant.0],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn check_body_len(body: &[u8]) -> Result<()> {
    if body.len() > MAX_BODY_BYTES {
        return Err(StoreError::BodyTooLong {
            size: body.len(),
            max: MAX_BODY_BYTES,
        });
    }
    Ok(())
}

/// Insert a message row inside an open transaction.  Shared with the
/// membership ledger for join/leave notices.
#[allow(clippy::too_many_arguments)]
pub(crate) fn insert_message_in_tx(
    tx: &Transaction<'_>,
    tenant: TenantId,
    chat: ChatId,
    chunk: ChunkId,
    sender: UserId,
    subject: Option<&str>,
    body: &[u8],
    now: i64,
) -> Result<Message> {
    check_body_len(body)?;

    let id = MessageId::generate();
    tx.execute(
        "INSERT INTO chat_messages
             (message_id, tenant_id, chat_id, chunk_id, user_id, subject, body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id.as_bytes().as_slice(),
            tenant.0,
            chat.0,
            chunk.0,
            sender.0,
            subject,
            body,
            now
        ],
    )?;

    Ok(Message {
        id,
        tenant,
        chat,
        chunk,
        sender,
        subject: subject.map(str::to_string),
        body: body.to_vec(),
        created_at: now,
    })
}

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_bytes: Vec<u8> = row.get(0)?;
    let id = MessageId::from_bytes(&id_bytes).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Blob, Box::new(e))
    })?;

    Ok(Message {
        id,
        tenant: TenantId(row.get(1)?),
        chat: ChatId(row.get(2)?),
        chunk: ChunkId(row.get(3)?),
        sender: UserId(row.get(4)?),
        subject: row.get(5)?,
        body: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn collect(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<Message>>,
) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}
