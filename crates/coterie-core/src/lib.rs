//! # coterie-core
//!
//! The in-memory engine of the Coterie chat store: per-chat façades over the
//! persistence layer, a concurrent registry guaranteeing at most one live
//! object per chat, a fixed-delay dispatch scheduler pushing new messages to
//! listeners, and the session-facing access layer.
//!
//! The composition root is [`Services`]: construct one explicitly, hand it
//! to a [`ChatRegistry`], and pass that down by reference.  Tests build a
//! fresh `Services` per case instead of resetting shared state.

pub mod access;
pub mod chat;
pub mod config;
pub mod dispatch;
pub mod listener;
pub mod registry;
pub mod roster;
pub mod services;

mod error;

pub use access::{ChatAccess, ChatDescription, Session};
pub use chat::{ChatHandle, MessageUpdate, PartResult};
pub use config::CoterieConfig;
pub use dispatch::Dispatcher;
pub use error::{ChatError, Result};
pub use listener::{ChatListener, ListenerRegistry};
pub use registry::ChatRegistry;
pub use roster::Roster;
pub use services::{ContextResolver, Directory, Services, StaticDirectory, StaticResolver, TenantContext};
