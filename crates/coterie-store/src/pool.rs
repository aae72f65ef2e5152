//! Per-tenant connection provider.
//!
//! [`TenantPool`] maps a tenant id to its database file and hands out
//! connections as RAII guards: dropping a guard releases the connection on
//! every exit path, including early returns and panics.  Each tenant has one
//! writable connection (serialized by a mutex) and a small pool of read-only
//! connections.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use directories::ProjectDirs;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use coterie_shared::TenantId;

use crate::database::{tenant_db_file, Database};
use crate::error::{Result, StoreError};

/// Read-only connections kept alive per tenant once released.
const MAX_POOLED_READERS: usize = 4;

/// Guard around a tenant's single writable connection.
pub type WriteConn = ArcMutexGuard<RawMutex, Database>;

struct TenantSlot {
    tenant: TenantId,
    path: PathBuf,
    writer: Arc<Mutex<Database>>,
    readers: Mutex<Vec<Database>>,
}

impl TenantSlot {
    /// Opening the writer first creates the file and runs migrations, so
    /// read-only opens afterwards always see a valid schema.
    fn open(root: &std::path::Path, tenant: TenantId) -> Result<Self> {
        let path = root.join(tenant_db_file(tenant));
        let writer = Database::open_at(&path, tenant)?;
        Ok(Self {
            tenant,
            path,
            writer: Arc::new(Mutex::new(writer)),
            readers: Mutex::new(Vec::new()),
        })
    }
}

/// Guard around a pooled read-only connection.  Returns the connection to
/// the tenant's pool on drop.
pub struct ReadConn {
    db: Option<Database>,
    slot: Arc<TenantSlot>,
}

impl Deref for ReadConn {
    type Target = Database;

    fn deref(&self) -> &Database {
        self.db.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for ReadConn {
    fn deref_mut(&mut self) -> &mut Database {
        self.db.as_mut().expect("connection present until drop")
    }
}

impl Drop for ReadConn {
    fn drop(&mut self) {
        if let Some(db) = self.db.take() {
            let mut pool = self.slot.readers.lock();
            if pool.len() < MAX_POOLED_READERS {
                pool.push(db);
            }
        }
    }
}

/// Connection provider for all tenants.
pub struct TenantPool {
    root: PathBuf,
    slots: DashMap<TenantId, Arc<TenantSlot>>,
}

impl TenantPool {
    /// Create a pool rooted at an explicit directory (created if missing).
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        tracing::info!(root = %root.display(), "opening tenant pool");

        Ok(Self {
            root,
            slots: DashMap::new(),
        })
    }

    /// Create a pool in the platform-appropriate data directory.
    pub fn new_default() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("org", "coterie", "coterie").ok_or(StoreError::NoDataDir)?;
        Self::new(project_dirs.data_dir().join("tenants"))
    }

    fn slot(&self, tenant: TenantId) -> Result<Arc<TenantSlot>> {
        if let Some(slot) = self.slots.get(&tenant) {
            return Ok(slot.clone());
        }

        // First access for this tenant: open outside the map shard lock,
        // then insert-if-absent.  A concurrent loser's connection is simply
        // dropped.
        let slot = Arc::new(TenantSlot::open(&self.root, tenant)?);
        Ok(self.slots.entry(tenant).or_insert(slot).clone())
    }

    /// Acquire the tenant's writable connection, blocking until it is free.
    pub fn write(&self, tenant: TenantId) -> Result<WriteConn> {
        let slot = self.slot(tenant)?;
        Ok(slot.writer.lock_arc())
    }

    /// Acquire a read-only connection for the tenant.
    pub fn read(&self, tenant: TenantId) -> Result<ReadConn> {
        let slot = self.slot(tenant)?;
        let pooled = slot.readers.lock().pop();
        let db = match pooled {
            Some(db) => db,
            None => Database::open_read_only(&slot.path, slot.tenant)?,
        };
        Ok(ReadConn {
            db: Some(db),
            slot,
        })
    }
}
