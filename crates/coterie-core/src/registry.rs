//! The chat registry: at most one live [`ChatHandle`] per `(tenant, chat)`.
//!
//! Backed by a `DashMap` whose entry API gives atomic insert-if-absent
//! semantics, so concurrent first-access constructs exactly one handle and
//! every caller observes the same instance.  Entries live for the process
//! lifetime; the only eviction paths are chat deletion and `remove_many`.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use coterie_shared::{ChatKey, TenantId, UserId};

use crate::chat::{ChatHandle, PartResult};
use crate::error::Result;
use crate::listener::{ChatListener, ListenerRegistry};
use crate::services::Services;

pub struct ChatRegistry {
    services: Arc<Services>,
    chats: DashMap<ChatKey, Arc<ChatHandle>>,
    listeners: Arc<ListenerRegistry>,
}

impl ChatRegistry {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            chats: DashMap::new(),
            listeners: Arc::new(ListenerRegistry::new()),
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn add_global_listener(&self, listener: Arc<dyn ChatListener>) {
        self.listeners.add_global(listener);
    }

    /// Get the chat's handle, constructing it if absent.  The construction
    /// (which reads the chat row) runs under the entry's shard lock, so a
    /// concurrent caller for the same key waits and receives the same
    /// instance rather than building a second one.
    pub fn get_or_create(&self, key: ChatKey) -> Result<Arc<ChatHandle>> {
        match self.chats.entry(key) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let handle = Arc::new(ChatHandle::open(
                    self.services.clone(),
                    self.listeners.clone(),
                    key,
                )?);
                Ok(entry.insert(handle).clone())
            }
        }
    }

    /// Lookup without construction.
    pub fn opt_get(&self, key: ChatKey) -> Option<Arc<ChatHandle>> {
        self.chats.get(&key).map(|entry| entry.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    /// Tenants currently holding at least one registered chat.
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> =
            self.chats.iter().map(|entry| entry.key().tenant).collect();
        tenants.sort();
        tenants.dedup();
        tenants
    }

    /// Registered handles of one tenant.
    pub fn chats_of_tenant(&self, tenant: TenantId) -> Vec<Arc<ChatHandle>> {
        self.chats
            .iter()
            .filter(|entry| entry.key().tenant == tenant)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Part a user from a chat, dropping the registry entry synchronously
    /// when the chat was deleted with the last member.
    pub fn part(&self, key: ChatKey, user: UserId) -> Result<PartResult> {
        let handle = self.get_or_create(key)?;
        let result = handle.part(user)?;
        if result == PartResult::Deleted {
            self.chats.remove(&key);
        }
        Ok(result)
    }

    /// Remove registry entries and cascade-delete the chats' rows, one
    /// batched transaction per tenant.
    pub fn remove_many(&self, keys: &[ChatKey]) -> Result<()> {
        let mut by_tenant: HashMap<TenantId, Vec<_>> = HashMap::new();
        for key in keys {
            by_tenant.entry(key.tenant).or_default().push(key.chat);
            self.chats.remove(key);
        }

        for (tenant, chats) in by_tenant {
            let mut db = self.services.pool().write(tenant)?;
            db.delete_chats_cascade(tenant, &chats)?;
        }
        Ok(())
    }
}
