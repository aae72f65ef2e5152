//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] to one tenant's
//! database file and guarantees that migrations are run before any other
//! operation.  Writable connections use an `IMMEDIATE` transaction for every
//! multi-statement operation; since SQLite has no `SELECT ... FOR UPDATE`,
//! taking the write lock up front is the serialization point for concurrent
//! membership rollovers on the same chat.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

use coterie_shared::TenantId;

use crate::error::Result;
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`] scoped to one tenant.
pub struct Database {
    tenant: TenantId,
    conn: Connection,
}

/// File name of a tenant's database under the pool root.
pub fn tenant_db_file(tenant: TenantId) -> String {
    format!("tenant_{}.db", tenant)
}

impl Database {
    /// Open (or create) a tenant database at an explicit path, running any
    /// pending migrations.
    pub fn open_at(path: &Path, tenant: TenantId) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        // Writers briefly hold the file lock during rollovers; wait instead
        // of failing with SQLITE_BUSY.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        migrations::run_migrations(&conn)?;

        Ok(Self { tenant, conn })
    }

    /// Open an existing tenant database read-only.  The file must already
    /// have been created (and migrated) by a writable open.
    pub fn open_read_only(path: &Path, tenant: TenantId) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self { tenant, conn })
    }

    /// The tenant this connection is scoped to.
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed operations, but direct access is
    /// occasionally needed for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return a mutable reference to the underlying connection (required for
    /// explicit transactions).
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}
