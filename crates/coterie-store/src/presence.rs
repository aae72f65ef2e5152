//! Presence rows with an upsert-retry discipline.
//!
//! There is no portable atomic upsert assumed of the storage layer, so a
//! write is `UPDATE`, then `INSERT` if nothing was updated, then one more
//! `UPDATE` if the insert lost a race to a concurrent first-writer.

use rusqlite::params;

use coterie_shared::{TenantId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{now_millis, Presence, PresenceStatus};

impl Database {
    /// Write a user's presence, racing safely against concurrent
    /// first-writers.
    pub fn set_presence(
        &self,
        tenant: TenantId,
        user: UserId,
        status: PresenceStatus,
        status_message: Option<&str>,
    ) -> Result<()> {
        let now = now_millis();

        let updated = self.update_presence_row(tenant, user, status, status_message, now)?;
        if updated {
            return Ok(());
        }

        match self.conn().execute(
            "INSERT INTO presence (tenant_id, user_id, status, status_message, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![tenant.0, user.0, status as i64, status_message, now],
        ) {
            Ok(_) => Ok(()),
            Err(insert_err) => {
                // Lost the first-write race; the row exists now, so the
                // update must succeed.
                let retried =
                    self.update_presence_row(tenant, user, status, status_message, now)?;
                if retried {
                    Ok(())
                } else {
                    Err(StoreError::Sqlite(insert_err))
                }
            }
        }
    }

    /// Read a user's presence.  A user with an active session but no stored
    /// row yet gets a synthesized "available, default status" presence; the
    /// synthesized row is inserted best-effort.
    pub fn get_presence(&self, tenant: TenantId, user: UserId) -> Result<Presence> {
        let found = self
            .conn()
            .query_row(
                "SELECT user_id, status, status_message, updated_at
                 FROM presence
                 WHERE tenant_id = ?1 AND user_id = ?2",
                params![tenant.0, user.0],
                row_to_presence,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Sqlite(other)),
            })?;

        if let Some(presence) = found {
            return Ok(presence);
        }

        let synthesized = Presence::available(user);
        if let Err(e) = self.conn().execute(
            "INSERT OR IGNORE INTO presence (tenant_id, user_id, status, status_message, updated_at)
             VALUES (?1, ?2, ?3, NULL, ?4)",
            params![
                tenant.0,
                user.0,
                synthesized.status as i64,
                synthesized.updated_at
            ],
        ) {
            tracing::debug!(%tenant, %user, error = %e, "best-effort presence insert failed");
        }
        Ok(synthesized)
    }

    fn update_presence_row(
        &self,
        tenant: TenantId,
        user: UserId,
        status: PresenceStatus,
        status_message: Option<&str>,
        now: i64,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE presence SET status = ?3, status_message = ?4, updated_at = ?5
             WHERE tenant_id = ?1 AND user_id = ?2",
            params![tenant.0, user.0, status as i64, status_message, now],
        )?;
        Ok(affected > 0)
    }
}

/// Map a `rusqlite::Row` to a [`Presence`].
fn row_to_presence(row: &rusqlite::Row<'_>) -> rusqlite::Result<Presence> {
    let status_raw: i64 = row.get(1)?;
    let status = PresenceStatus::from_i64(status_raw).unwrap_or(PresenceStatus::Available);

    Ok(Presence {
        user: UserId(row.get(0)?),
        status,
        status_message: row.get(2)?,
        updated_at: row.get(3)?,
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
    fn set_then_get() {
        let tenant = TenantId(1);
        let (_dir, db) = test_db(tenant);

        db.set_presence(tenant, UserId(5), PresenceStatus::Away, Some("brb"))
            .unwrap();

        let p = db.get_presence(tenant, UserId(5)).unwrap();
        assert_eq!(p.status, PresenceStatus::Away);
        assert_eq!(p.status_message.as_deref(), Some("brb"));
    }

    #[test]
    fn first_write_goes_through_insert() {
        let tenant = TenantId(1);
        let (_dir, db) = test_db(tenant);

        // No row exists, so the initial UPDATE affects nothing and the
        // INSERT path runs.
        db.set_presence(tenant, UserId(5), PresenceStatus::DoNotDisturb, None)
            .unwrap();
        // Second write takes the plain UPDATE path.
        db.set_presence(tenant, UserId(5), PresenceStatus::Available, None)
            .unwrap();

        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM presence WHERE tenant_id = ?1 AND user_id = ?2",
                params![tenant.0, 5i64],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn read_synthesizes_available_default() {
        let tenant = TenantId(1);
        let (_dir, db) = test_db(tenant);

        let p = db.get_presence(tenant, UserId(9)).unwrap();
        assert_eq!(p.status, PresenceStatus::Available);
        assert!(p.status_message.is_none());

        // The synthesized row was persisted best-effort.
        let stored = db.get_presence(tenant, UserId(9)).unwrap();
        assert_eq!(stored.status, PresenceStatus::Available);
    }
}
