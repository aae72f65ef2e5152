//! Shared constants.

/// Maximum stored size of a message body in bytes.  Writes beyond this limit
/// are rejected with a distinct "message too long" error instead of being
/// truncated by the storage layer.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// XChaCha20-Poly1305 nonce size (prepended to every ciphertext).
pub const NONCE_SIZE: usize = 24;

/// BLAKE3 derive-key context for per-chat message keys.
pub const KDF_CONTEXT_CHAT_KEY: &str = "coterie 2026-01-10 chat message key";

/// Default fixed delay between dispatch scheduler runs, in seconds.
pub const DEFAULT_DISPATCH_INTERVAL_SECS: u64 = 5;
