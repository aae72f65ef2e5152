//! The dispatch scheduler: a single fixed-delay background task.
//!
//! Every cycle walks all tenants with at least one listened chat, acquires
//! one read-only connection per tenant, fetches each chat's new messages,
//! and fans them out to the effective listener set.  Per-tenant work runs on
//! the blocking pool so one tenant's slow storage never delays another; the
//! delay to the next cycle starts only after every tenant scan of the
//! current cycle has completed.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;

use coterie_shared::TenantId;

use crate::chat::ChatHandle;
use crate::registry::ChatRegistry;

pub struct Dispatcher {
    task: JoinHandle<()>,
}

impl Dispatcher {
    /// Spawn the scheduler with the given fixed delay between cycles.
    pub fn start(registry: Arc<ChatRegistry>, interval: Duration) -> Self {
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                run_cycle(&registry).await;
            }
        });
        tracing::info!(interval_ms = interval.as_millis() as u64, "dispatch scheduler started");
        Self { task }
    }

    /// Cancel the timer.  In-flight per-tenant scans on the blocking pool
    /// are abandoned rather than awaited; this shutdown race is accepted.
    pub fn shutdown(self) {
        self.task.abort();
        tracing::info!("dispatch scheduler stopped");
    }
}

/// One full scheduler cycle.  Public so embedders and tests can drive the
/// scan without the timer.
pub async fn run_cycle(registry: &Arc<ChatRegistry>) {
    if registry.is_empty() {
        return;
    }

    let mut scans = Vec::new();
    for tenant in registry.tenants() {
        let chats: Vec<Arc<ChatHandle>> = registry
            .chats_of_tenant(tenant)
            .into_iter()
            .filter(|chat| chat.has_effective_listeners())
            .collect();
        if chats.is_empty() {
            continue;
        }

        let registry = registry.clone();
        scans.push(tokio::task::spawn_blocking(move || {
            scan_tenant(&registry, tenant, &chats);
        }));
    }

    for result in join_all(scans).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "tenant scan task failed");
        }
    }
}

/// Scan one tenant's listened chats over a single read-only connection.
/// A broken chat is logged and skipped; it never halts its siblings.
fn scan_tenant(registry: &Arc<ChatRegistry>, tenant: TenantId, chats: &[Arc<ChatHandle>]) {
    let db = match registry.services().pool().read(tenant) {
        Ok(db) => db,
        Err(e) => {
            tracing::warn!(%tenant, error = %e, "could not acquire dispatch connection");
            return;
        }
    };

    for chat in chats {
        match chat.new_messages_for_dispatch(&db) {
            Ok(messages) => {
                for message in &messages {
                    chat.notify(message);
                }
            }
            Err(e) => {
                tracing::warn!(chat = %chat.key(), error = %e, "dispatch scan failed for chat");
            }
        }
    }
}
