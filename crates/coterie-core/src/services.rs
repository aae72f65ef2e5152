//! Service wiring: the explicitly constructed composition root.
//!
//! [`Services`] replaces any static lookup: it owns the connection provider
//! and the collaborator trait objects, and is passed down by `Arc` into the
//! registry and every chat handle.  The crypto adapter is optional and bound
//! lazily through a `OnceLock` ("exactly one binding, all callers see the
//! same adapter").

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use coterie_shared::{CryptoAdapter, TenantId, UserId};
use coterie_store::TenantPool;

use crate::error::{ChatError, Result};

/// Resolved per-tenant context, cached lazily by each chat handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub id: TenantId,
    pub name: String,
}

/// Resolves a tenant id to its context.
pub trait ContextResolver: Send + Sync {
    fn resolve(&self, tenant: TenantId) -> Result<TenantContext>;
}

/// Identity/directory service: user display names.
pub trait Directory: Send + Sync {
    /// Resolve a display name; `None` when the directory has no entry.
    fn display_name(&self, tenant: TenantId, user: UserId) -> Option<String>;

    /// Snapshot of all known users of a tenant, used by roster construction.
    fn list_users(&self, tenant: TenantId) -> Vec<(UserId, String)>;
}

/// In-memory directory, useful for tests and single-node deployments.
#[derive(Default)]
pub struct StaticDirectory {
    users: DashMap<(TenantId, UserId), String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant: TenantId, user: UserId, name: impl Into<String>) {
        self.users.insert((tenant, user), name.into());
    }
}

impl Directory for StaticDirectory {
    fn display_name(&self, tenant: TenantId, user: UserId) -> Option<String> {
        self.users.get(&(tenant, user)).map(|n| n.clone())
    }

    fn list_users(&self, tenant: TenantId) -> Vec<(UserId, String)> {
        self.users
            .iter()
            .filter(|entry| entry.key().0 == tenant)
            .map(|entry| (entry.key().1, entry.value().clone()))
            .collect()
    }
}

/// Resolver that synthesizes a context from the tenant id alone.
pub struct StaticResolver;

impl ContextResolver for StaticResolver {
    fn resolve(&self, tenant: TenantId) -> Result<TenantContext> {
        Ok(TenantContext {
            id: tenant,
            name: format!("tenant-{tenant}"),
        })
    }
}

/// The collaborators every chat operation needs.
pub struct Services {
    pool: Arc<TenantPool>,
    directory: Arc<dyn Directory>,
    resolver: Arc<dyn ContextResolver>,
    crypto: OnceLock<Arc<dyn CryptoAdapter>>,
}

impl Services {
    pub fn new(
        pool: Arc<TenantPool>,
        directory: Arc<dyn Directory>,
        resolver: Arc<dyn ContextResolver>,
    ) -> Self {
        Self {
            pool,
            directory,
            resolver,
            crypto: OnceLock::new(),
        }
    }

    pub fn pool(&self) -> &Arc<TenantPool> {
        &self.pool
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    pub fn resolver(&self) -> &Arc<dyn ContextResolver> {
        &self.resolver
    }

    /// Bind the crypto adapter.  Later bindings are ignored; the first one
    /// wins for the process lifetime.
    pub fn bind_crypto(&self, adapter: Arc<dyn CryptoAdapter>) {
        if self.crypto.set(adapter).is_err() {
            tracing::warn!("crypto adapter already bound, ignoring rebind");
        }
    }

    /// The bound crypto adapter, required whenever a secure chat touches a
    /// message body.
    pub fn crypto(&self) -> Result<&Arc<dyn CryptoAdapter>> {
        self.crypto
            .get()
            .ok_or(ChatError::ServiceUnavailable("crypto adapter"))
    }
}
