//! # coterie-store
//!
//! SQLite persistence for the Coterie chat store.  Each tenant gets its own
//! database file; every table additionally carries a leading `tenant_id`
//! column so rows keep their fully qualified identity.  The crate exposes a
//! synchronous [`Database`] handle with typed operations for chats,
//! membership chunks, messages, and presence, plus the [`TenantPool`]
//! connection provider that hands out read-only and writable connections
//! per tenant.

pub mod chats;
pub mod database;
pub mod membership;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod presence;

mod error;

pub use database::{tenant_db_file, Database};
pub use error::StoreError;
pub use models::*;
pub use pool::{ReadConn, TenantPool, WriteConn};
