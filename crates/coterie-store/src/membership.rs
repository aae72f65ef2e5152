//! The membership ledger: versioned append-only chat rosters.
//!
//! A chat's membership is organized into monotonically increasing chunks.
//! Mutation never edits a superseded chunk: a rollover copies the current
//! chunk's member rows forward into chunk `current + 1`, applying the delta
//! on the way.  A message written while chunk N was current stays associated
//! with chunk N forever, which is what makes "who could see this message"
//! answerable after the roster changes.

use rusqlite::{params, Transaction, TransactionBehavior};

use coterie_shared::{ChatId, ChunkId, TenantId, UserId};

use crate::chats::delete_chats_in_tx;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::insert_message_in_tx;
use crate::models::{now_millis, MemberRow, Message};

/// Result of a [`Database::join_chat`] call.
#[derive(Debug)]
pub enum JoinOutcome {
    /// The user was added; `chunk` is the freshly created current chunk.
    Joined {
        chunk: ChunkId,
        /// The join notice appended to the outgoing chunk, if one was
        /// requested.
        notice: Option<Message>,
    },
    /// The user is already present in the current chunk.
    AlreadyMember,
}

/// Result of a [`Database::part_chat`] call.
#[derive(Debug)]
pub enum PartOutcome {
    /// The user was removed; `chunk` is the freshly created current chunk.
    Departed {
        chunk: ChunkId,
        notice: Option<Message>,
    },
    /// The user was the last member; the chat and all derived rows are gone.
    ChatDeleted,
    /// The user is not a member of the current chunk.
    NotMember,
}

impl Database {
    /// The chat's current chunk: the maximum chunk id, or 1 if the chat has
    /// not been initialized yet.
    pub fn current_chunk(&self, tenant: TenantId, chat: ChatId) -> Result<ChunkId> {
        let id: i64 = self.conn().query_row(
            "SELECT COALESCE(MAX(chunk_id), 1) FROM chat_chunks
             WHERE tenant_id = ?1 AND chat_id = ?2",
            params![tenant.0, chat.0],
            |row| row.get(0),
        )?;
        Ok(ChunkId(id))
    }

    /// Member ids of a specific chunk, ordered by user id.
    pub fn members_of_chunk(
        &self,
        tenant: TenantId,
        chat: ChatId,
        chunk: ChunkId,
    ) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM chat_members
             WHERE tenant_id = ?1 AND chat_id = ?2 AND chunk_id = ?3
             ORDER BY user_id ASC",
        )?;
        let rows = stmt.query_map(params![tenant.0, chat.0, chunk.0], |row| {
            row.get::<_, i64>(0)
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(UserId(row?));
        }
        Ok(members)
    }

    /// Roll the chat's membership over to a new chunk, adding and removing
    /// the given users.  Returns `None` when the resulting roster would be
    /// identical to the current one; no chunk is created in that case.
    pub fn rollover_chunk(
        &mut self,
        tenant: TenantId,
        chat: ChatId,
        add: &[UserId],
        remove: &[UserId],
    ) -> Result<Option<ChunkId>> {
        let now = now_millis();
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let rolled = rollover_in_tx(&tx, tenant, chat, add, remove, now)?;
        tx.commit()?;
        Ok(rolled)
    }

    /// Add a user to the chat: appends the join notice to the *outgoing*
    /// chunk (so the prior roster sees it too), then rolls the membership
    /// over to include the new member.  Fully transactional.
    pub fn join_chat(
        &mut self,
        tenant: TenantId,
        chat: ChatId,
        user: UserId,
        notice_body: Option<&[u8]>,
    ) -> Result<JoinOutcome> {
        let now = now_millis();
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        ensure_chat_exists(&tx, tenant, chat)?;

        let current = current_chunk_in_tx(&tx, tenant, chat)?;
        if chunk_has_member(&tx, tenant, chat, current, user)? {
            return Ok(JoinOutcome::AlreadyMember);
        }

        let notice = match notice_body {
            Some(body) => Some(insert_message_in_tx(
                &tx, tenant, chat, current, user, None, body, now,
            )?),
            None => None,
        };

        let chunk = rollover_in_tx(&tx, tenant, chat, &[user], &[], now)?
            .unwrap_or(current);
        tx.commit()?;

        tracing::debug!(%tenant, %chat, %user, %chunk, "user joined");
        Ok(JoinOutcome::Joined { chunk, notice })
    }

    /// Remove a user from the chat.  If the removal would empty the roster
    /// the entire chat is cascade-deleted instead; otherwise a leave notice
    /// is appended to the outgoing chunk and the membership rolls over.
    pub fn part_chat(
        &mut self,
        tenant: TenantId,
        chat: ChatId,
        user: UserId,
        notice_body: Option<&[u8]>,
    ) -> Result<PartOutcome> {
        let now = now_millis();
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        ensure_chat_exists(&tx, tenant, chat)?;

        let current = current_chunk_in_tx(&tx, tenant, chat)?;
        let members = members_in_tx(&tx, tenant, chat, current)?;
        if !members.iter().any(|m| m.user == user) {
            return Ok(PartOutcome::NotMember);
        }

        if members.len() == 1 {
            delete_chats_in_tx(&tx, tenant, &[chat])?;
            tx.commit()?;
            tracing::debug!(%tenant, %chat, %user, "last member left, chat deleted");
            return Ok(PartOutcome::ChatDeleted);
        }

        let notice = match notice_body {
            Some(body) => Some(insert_message_in_tx(
                &tx, tenant, chat, current, user, None, body, now,
            )?),
            None => None,
        };

        let chunk = rollover_in_tx(&tx, tenant, chat, &[], &[user], now)?
            .unwrap_or(current);
        tx.commit()?;

        tracing::debug!(%tenant, %chat, %user, %chunk, "user left");
        Ok(PartOutcome::Departed { chunk, notice })
    }

    /// Delete a user's membership rows across every chunk of every chat in
    /// the tenant.  Used during session/account teardown; chats left without
    /// members become deletion candidates (see
    /// [`Database::memberless_chats`]).
    pub fn remove_user_everywhere(&self, tenant: TenantId, user: UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM chat_members WHERE tenant_id = ?1 AND user_id = ?2",
            params![tenant.0, user.0],
        )?;
        tracing::debug!(%tenant, %user, rows = affected, "removed user from all chunks");
        Ok(affected)
    }
}

// ---------------------------------------------------------------------------
// Transaction-scoped helpers
// ---------------------------------------------------------------------------

pub(crate) fn ensure_chat_exists(
    tx: &Transaction<'_>,
    tenant: TenantId,
    chat: ChatId,
) -> Result<()> {
    let exists: bool = tx
        .prepare("SELECT 1 FROM chats WHERE tenant_id = ?1 AND chat_id = ?2")?
        .exists(params![tenant.0, chat.0])?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::NotFound)
    }
}

pub(crate) fn current_chunk_in_tx(
    tx: &Transaction<'_>,
    tenant: TenantId,
    chat: ChatId,
) -> Result<ChunkId> {
    let id: i64 = tx.query_row(
        "SELECT COALESCE(MAX(chunk_id), 1) FROM chat_chunks
         WHERE tenant_id = ?1 AND chat_id = ?2",
        params![tenant.0, chat.0],
        |row| row.get(0),
    )?;
    Ok(ChunkId(id))
}

fn chunk_has_member(
    tx: &Transaction<'_>,
    tenant: TenantId,
    chat: ChatId,
    chunk: ChunkId,
    user: UserId,
) -> Result<bool> {
    let exists = tx
        .prepare(
            "SELECT 1 FROM chat_members
             WHERE tenant_id = ?1 AND chat_id = ?2 AND chunk_id = ?3 AND user_id = ?4",
        )?
        .exists(params![tenant.0, chat.0, chunk.0, user.0])?;
    Ok(exists)
}

fn members_in_tx(
    tx: &Transaction<'_>,
    tenant: TenantId,
    chat: ChatId,
    chunk: ChunkId,
) -> Result<Vec<MemberRow>> {
    let mut stmt = tx.prepare(
        "SELECT user_id, op_mode, last_poll FROM chat_members
         WHERE tenant_id = ?1 AND chat_id = ?2 AND chunk_id = ?3
         ORDER BY user_id ASC",
    )?;
    let rows = stmt.query_map(params![tenant.0, chat.0, chunk.0], |row| {
        Ok(MemberRow {
            user: UserId(row.get(0)?),
            op_mode: row.get(1)?,
            last_poll: row.get(2)?,
        })
    })?;

    let mut members = Vec::new();
    for row in rows {
        members.push(row?);
    }
    Ok(members)
}

/// Copy the current chunk's member rows into a new chunk, applying the
/// delta.  Carried-forward members keep their `op_mode` and `last_poll`;
/// added members start fresh.  Returns `None` (and creates nothing) when the
/// new roster would not differ.
fn rollover_in_tx(
    tx: &Transaction<'_>,
    tenant: TenantId,
    chat: ChatId,
    add: &[UserId],
    remove: &[UserId],
    now: i64,
) -> Result<Option<ChunkId>> {
    let current = current_chunk_in_tx(tx, tenant, chat)?;
    let members = members_in_tx(tx, tenant, chat, current)?;

    let mut roster: Vec<MemberRow> = members
        .iter()
        .filter(|m| !remove.contains(&m.user))
        .cloned()
        .collect();
    for user in add {
        if !roster.iter().any(|m| m.user == *user) {
            roster.push(MemberRow {
                user: *user,
                op_mode: 0,
                last_poll: 0,
            });
        }
    }

    let before: Vec<UserId> = members.iter().map(|m| m.user).collect();
    let mut after: Vec<UserId> = roster.iter().map(|m| m.user).collect();
    after.sort();
    if before == after {
        return Ok(None);
    }

    let next = current.next();
    tx.execute(
        "INSERT INTO chat_chunks (tenant_id, chat_id, chunk_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![tenant.0, chat.0, next.0, now],
    )?;

    let mut stmt = tx.prepare(
        "INSERT INTO chat_members (tenant_id, chat_id, chunk_id, user_id, op_mode, last_poll)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for member in &roster {
        stmt.execute(params![
            tenant.0,
            chat.0,
            next.0,
            member.user.0,
            member.op_mode,
            member.last_poll
        ])?;
    }

    Ok(Some(next))
}
