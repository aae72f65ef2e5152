//! v001 -- Initial schema creation.
//!
//! Creates the four core row-sets: `chats`, `chat_chunks` + `chat_members`,
//! `chat_messages`, and `presence`.  Every table leads with a `tenant_id`
//! column even though each tenant lives in its own database file, so a row
//! always carries its fully qualified identity.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    tenant_id  INTEGER NOT NULL,
    chat_id    INTEGER NOT NULL,
    subject    TEXT,
    secure     INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    created_at INTEGER NOT NULL,            -- epoch millis

    PRIMARY KEY (tenant_id, chat_id)
);

-- ----------------------------------------------------------------
-- Membership chunks: versioned snapshots of a chat's roster.
-- chunk_id is strictly increasing from 1 per chat; the row with the
-- maximum chunk_id is the current chunk.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_chunks (
    tenant_id  INTEGER NOT NULL,
    chat_id    INTEGER NOT NULL,
    chunk_id   INTEGER NOT NULL,
    created_at INTEGER NOT NULL,

    PRIMARY KEY (tenant_id, chat_id, chunk_id)
);

CREATE TABLE IF NOT EXISTS chat_members (
    tenant_id  INTEGER NOT NULL,
    chat_id    INTEGER NOT NULL,
    chunk_id   INTEGER NOT NULL,
    user_id    INTEGER NOT NULL,
    op_mode    INTEGER NOT NULL DEFAULT 0,  -- reserved delivery-mode flag
    last_poll  INTEGER NOT NULL DEFAULT 0,  -- per-user pull cursor (millis)

    PRIMARY KEY (tenant_id, chat_id, chunk_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_members_user
    ON chat_members(tenant_id, user_id);

-- ----------------------------------------------------------------
-- Messages: append-only, tagged with the chunk current at write time.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_messages (
    message_id BLOB PRIMARY KEY NOT NULL,   -- 16 raw bytes of a 128-bit id
    tenant_id  INTEGER NOT NULL,
    chat_id    INTEGER NOT NULL,
    chunk_id   INTEGER NOT NULL,
    user_id    INTEGER NOT NULL,            -- sender
    subject    TEXT,
    body       BLOB NOT NULL,               -- opaque ciphertext if secure
    created_at INTEGER NOT NULL             -- epoch millis, ordering cursor
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON chat_messages(tenant_id, chat_id, chunk_id, created_at);

-- ----------------------------------------------------------------
-- Presence
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS presence (
    tenant_id      INTEGER NOT NULL,
    user_id        INTEGER NOT NULL,
    status         INTEGER NOT NULL DEFAULT 0,
    status_message TEXT,
    updated_at     INTEGER NOT NULL,

    PRIMARY KEY (tenant_id, user_id)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
