//! Per-tenant roster: a display-name snapshot plus stored presence.

use std::collections::HashMap;
use std::sync::Arc;

use coterie_shared::{TenantId, UserId};
use coterie_store::{Presence, PresenceStatus};

use crate::error::Result;
use crate::services::Services;

/// A tenant's roster.  The name map is a snapshot taken at construction,
/// not live-updated; presence reads and writes go to storage.
pub struct Roster {
    tenant: TenantId,
    services: Arc<Services>,
    names: HashMap<UserId, String>,
}

impl Roster {
    pub fn new(tenant: TenantId, services: Arc<Services>) -> Self {
        let names = services
            .directory()
            .list_users(tenant)
            .into_iter()
            .collect();
        Self {
            tenant,
            services,
            names,
        }
    }

    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// Display name from the construction-time snapshot.
    pub fn display_name(&self, user: UserId) -> Option<&str> {
        self.names.get(&user).map(String::as_str)
    }

    /// All users known at construction time, unordered.
    pub fn users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.names.keys().copied()
    }

    /// Write a user's presence through the upsert-retry path.
    pub fn set_presence(
        &self,
        user: UserId,
        status: PresenceStatus,
        status_message: Option<&str>,
    ) -> Result<()> {
        let db = self.services.pool().write(self.tenant)?;
        Ok(db.set_presence(self.tenant, user, status, status_message)?)
    }

    /// Read a user's presence; a session-active user without a stored row
    /// gets a synthesized "available" presence.
    pub fn get_presence(&self, user: UserId) -> Result<Presence> {
        let db = self.services.pool().write(self.tenant)?;
        Ok(db.get_presence(self.tenant, user)?)
    }
}
