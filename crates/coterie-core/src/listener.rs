//! Message listeners and the catch-and-log notification boundary.
//!
//! Global listeners apply to every chat; per-chat listeners live on the chat
//! handle.  A chat's effective listener set is the union, global first.  A
//! failing listener must never prevent the remaining listeners (or chats, or
//! tenants) from being processed, so every callback runs inside an explicit
//! panic boundary.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use coterie_shared::ChatKey;
use coterie_store::Message;

/// Callback invoked for each newly observed message.
///
/// Implementations are not assumed reentrant-safe; failures (panics) are
/// caught and logged at the call site.
pub trait ChatListener: Send + Sync {
    fn on_message(&self, chat: ChatKey, message: &Message);
}

/// The global half of the listener registry.
#[derive(Default)]
pub struct ListenerRegistry {
    global: RwLock<Vec<Arc<dyn ChatListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_global(&self, listener: Arc<dyn ChatListener>) {
        self.global.write().push(listener);
    }

    pub fn global_count(&self) -> usize {
        self.global.read().len()
    }

    /// Snapshot of the global listeners, in registration order.
    pub fn global_snapshot(&self) -> Vec<Arc<dyn ChatListener>> {
        self.global.read().clone()
    }
}

/// Notify one listener inside a panic boundary.
pub(crate) fn notify_one(listener: &Arc<dyn ChatListener>, chat: ChatKey, message: &Message) {
    let result = catch_unwind(AssertUnwindSafe(|| listener.on_message(chat, message)));
    if result.is_err() {
        tracing::error!(%chat, message_id = %message.id, "chat listener panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use coterie_shared::{ChatId, ChunkId, MessageId, TenantId, UserId};

    struct Counting(AtomicUsize);

    impl ChatListener for Counting {
        fn on_message(&self, _chat: ChatKey, _message: &Message) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;

    impl ChatListener for Panicking {
        fn on_message(&self, _chat: ChatKey, _message: &Message) {
            panic!("listener bug");
        }
    }

    fn message() -> Message {
        Message {
            id: MessageId::generate(),
            tenant: TenantId(1),
            chat: ChatId(1),
            chunk: ChunkId(1),
            sender: UserId(1),
            subject: None,
            body: b"hi".to_vec(),
            created_at: 0,
        }
    }

    #[test]
    fn panic_is_contained() {
        let chat = ChatKey::new(TenantId(1), ChatId(1));
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let broken: Arc<dyn ChatListener> = Arc::new(Panicking);
        let counting_dyn: Arc<dyn ChatListener> = counting.clone();

        let msg = message();
        notify_one(&broken, chat, &msg);
        notify_one(&counting_dyn, chat, &msg);

        // The broken listener did not stop the next one.
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }
}
