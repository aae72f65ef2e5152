//! CRUD operations for [`Chat`] records, plus batched cascade deletion.

use rusqlite::{params, Transaction, TransactionBehavior};

use coterie_shared::{ChatId, ChunkId, TenantId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{now_millis, Chat};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a chat with its first membership chunk and the creator as the
    /// sole member.  `id` may be client-supplied; if absent the next free
    /// tenant-scoped id is generated.
    pub fn create_chat(
        &mut self,
        tenant: TenantId,
        id: Option<ChatId>,
        subject: Option<&str>,
        secure: bool,
        creator: UserId,
    ) -> Result<Chat> {
        let now = now_millis();
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let id = match id {
            Some(id) => {
                let exists: bool = tx
                    .prepare("SELECT 1 FROM chats WHERE tenant_id = ?1 AND chat_id = ?2")?
                    .exists(params![tenant.0, id.0])?;
                if exists {
                    return Err(StoreError::AlreadyExists);
                }
                id
            }
            None => {
                let next: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(chat_id), 0) + 1 FROM chats WHERE tenant_id = ?1",
                    params![tenant.0],
                    |row| row.get(0),
                )?;
                ChatId(next)
            }
        };

        tx.execute(
            "INSERT INTO chats (tenant_id, chat_id, subject, secure, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![tenant.0, id.0, subject, secure as i64, now],
        )?;
        tx.execute(
            "INSERT INTO chat_chunks (tenant_id, chat_id, chunk_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![tenant.0, id.0, ChunkId::FIRST.0, now],
        )?;
        tx.execute(
            "INSERT INTO chat_members (tenant_id, chat_id, chunk_id, user_id, op_mode, last_poll)
             VALUES (?1, ?2, ?3, ?4, 0, 0)",
            params![tenant.0, id.0, ChunkId::FIRST.0, creator.0],
        )?;

        tx.commit()?;

        tracing::debug!(%tenant, chat = %id, %creator, "created chat");

        Ok(Chat {
            tenant,
            id,
            subject: subject.map(str::to_string),
            secure,
            created_at: now,
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single chat.
    pub fn get_chat(&self, tenant: TenantId, chat: ChatId) -> Result<Chat> {
        self.conn()
            .query_row(
                "SELECT tenant_id, chat_id, subject, secure, created_at
                 FROM chats
                 WHERE tenant_id = ?1 AND chat_id = ?2",
                params![tenant.0, chat.0],
                row_to_chat,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List the chats whose *current* chunk includes the user, ordered by
    /// creation time.
    pub fn list_chats_for_user(&self, tenant: TenantId, user: UserId) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.tenant_id, c.chat_id, c.subject, c.secure, c.created_at
             FROM chats c
             JOIN chat_members m
               ON m.tenant_id = c.tenant_id AND m.chat_id = c.chat_id
             WHERE c.tenant_id = ?1
               AND m.user_id = ?2
               AND m.chunk_id = (SELECT MAX(k.chunk_id) FROM chat_chunks k
                                 WHERE k.tenant_id = c.tenant_id AND k.chat_id = c.chat_id)
             ORDER BY c.created_at ASC",
        )?;

        let rows = stmt.query_map(params![tenant.0, user.0], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    /// Chats whose current chunk has no members left.  These are deletion
    /// candidates after a user teardown.
    pub fn memberless_chats(&self, tenant: TenantId) -> Result<Vec<ChatId>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.chat_id
             FROM chats c
             WHERE c.tenant_id = ?1
               AND NOT EXISTS (
                   SELECT 1 FROM chat_members m
                   WHERE m.tenant_id = c.tenant_id
                     AND m.chat_id = c.chat_id
                     AND m.chunk_id = (SELECT MAX(k.chunk_id) FROM chat_chunks k
                                       WHERE k.tenant_id = c.tenant_id
                                         AND k.chat_id = c.chat_id))",
        )?;

        let rows = stmt.query_map(params![tenant.0], |row| row.get::<_, i64>(0))?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(ChatId(row?));
        }
        Ok(chats)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Change a chat's subject, its one mutable attribute.
    pub fn set_chat_subject(
        &self,
        tenant: TenantId,
        chat: ChatId,
        subject: Option<&str>,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE chats SET subject = ?3 WHERE tenant_id = ?1 AND chat_id = ?2",
            params![tenant.0, chat.0, subject],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete the listed chats and all their derived rows in one
    /// transaction.
    pub fn delete_chats_cascade(&mut self, tenant: TenantId, chats: &[ChatId]) -> Result<()> {
        if chats.is_empty() {
            return Ok(());
        }

        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        delete_chats_in_tx(&tx, tenant, chats)?;
        tx.commit()?;

        tracing::debug!(%tenant, count = chats.len(), "cascade-deleted chats");
        Ok(())
    }
}

/// Delete chats and all derived rows inside an open transaction.  One
/// prepared statement per table, executed once per chat id, keeps the
/// batching granularity predictable.
pub(crate) fn delete_chats_in_tx(
    tx: &Transaction<'_>,
    tenant: TenantId,
    chats: &[ChatId],
) -> Result<()> {
    const DELETES: [&str; 4] = [
        "DELETE FROM chat_messages WHERE tenant_id = ?1 AND chat_id = ?2",
        "DELETE FROM chat_members  WHERE tenant_id = ?1 AND chat_id = ?2",
        "DELETE FROM chat_chunks   WHERE tenant_id = ?1 AND chat_id = ?2",
        "DELETE FROM chats         WHERE tenant_id = ?1 AND chat_id = ?2",
    ];

    for sql in DELETES {
        let mut stmt = tx.prepare(sql)?;
        for chat in chats {
            stmt.execute(params![tenant.0, chat.0])?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Chat`].
fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        tenant: TenantId(row.get(0)?),
        id: ChatId(row.get(1)?),
        subject: row.get(2)?,
        secure: row.get::<_, i64>(3)? != 0,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tenant_db_file;

    fn test_db(tenant: TenantId) -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(tenant_db_file(tenant));
        let db = Database::open_at(&path, tenant).unwrap();
        (dir, db)
    }

    #[test]
    fn create_and_get() {
        let tenant = TenantId(1);
        let (_dir, mut db) = test_db(tenant);

        let chat = db
            .create_chat(tenant, None, Some("standup"), false, UserId(10))
            .unwrap();
        assert_eq!(chat.id, ChatId(1));

        let loaded = db.get_chat(tenant, chat.id).unwrap();
        assert_eq!(loaded, chat);

        // Generated ids are strictly increasing.
        let second = db.create_chat(tenant, None, None, false, UserId(10)).unwrap();
        assert_eq!(second.id, ChatId(2));
    }

    #[test]
    fn client_supplied_id_collision() {
        let tenant = TenantId(1);
        let (_dir, mut db) = test_db(tenant);

        db.create_chat(tenant, Some(ChatId(7)), None, false, UserId(1))
            .unwrap();
        let err = db
            .create_chat(tenant, Some(ChatId(7)), None, false, UserId(2))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
    }

    #[test]
    fn missing_chat_is_not_found() {
        let tenant = TenantId(1);
        let (_dir, db) = test_db(tenant);
        assert!(matches!(
            db.get_chat(tenant, ChatId(99)),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn subject_update() {
        let tenant = TenantId(1);
        let (_dir, mut db) = test_db(tenant);
        let chat = db.create_chat(tenant, None, None, false, UserId(1)).unwrap();

        db.set_chat_subject(tenant, chat.id, Some("renamed")).unwrap();
        assert_eq!(
            db.get_chat(tenant, chat.id).unwrap().subject.as_deref(),
            Some("renamed")
        );
    }

    #[test]
    fn list_scopes_to_current_chunk() {
        let tenant = TenantId(1);
        let (_dir, mut db) = test_db(tenant);
        let chat = db.create_chat(tenant, None, None, false, UserId(1)).unwrap();

        assert_eq!(db.list_chats_for_user(tenant, UserId(1)).unwrap().len(), 1);
        assert!(db.list_chats_for_user(tenant, UserId(2)).unwrap().is_empty());

        let _ = db.join_chat(tenant, chat.id, UserId(2), None).unwrap();
        assert_eq!(db.list_chats_for_user(tenant, UserId(2)).unwrap().len(), 1);
    }

    #[test]
    fn cascade_delete_removes_all_rows() {
        let tenant = TenantId(1);
        let (_dir, mut db) = test_db(tenant);
        let chat = db.create_chat(tenant, None, None, false, UserId(1)).unwrap();
        db.append_message(tenant, chat.id, UserId(1), None, b"hello")
            .unwrap();

        db.delete_chats_cascade(tenant, &[chat.id]).unwrap();

        assert!(matches!(
            db.get_chat(tenant, chat.id),
            Err(StoreError::NotFound)
        ));
        let orphans: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM chat_messages WHERE tenant_id = ?1 AND chat_id = ?2",
                params![tenant.0, chat.id.0],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(orphans, 0);
    }
}
