//! Cross-component scenarios: chat lifecycle, chunk visibility, and the
//! session access layer.

use std::sync::Arc;

use coterie_core::{
    ChatAccess, ChatDescription, ChatError, ChatRegistry, MessageUpdate, PartResult, Services,
    Session, StaticDirectory, StaticResolver,
};
use coterie_shared::crypto::{generate_symmetric_key, ChaChaAdapter};
use coterie_shared::{ChatId, ChatKey, ChunkId, TenantId, UserId};
use coterie_store::TenantPool;

const TENANT: TenantId = TenantId(1);
const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const CAROL: UserId = UserId(3);

fn setup() -> (tempfile::TempDir, Arc<ChatRegistry>, ChatAccess) {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(TenantPool::new(dir.path()).unwrap());

    let directory = StaticDirectory::new();
    directory.insert(TENANT, ALICE, "alice");
    directory.insert(TENANT, BOB, "bob");
    directory.insert(TENANT, CAROL, "carol");

    let services = Arc::new(Services::new(
        pool,
        Arc::new(directory),
        Arc::new(StaticResolver),
    ));
    let registry = Arc::new(ChatRegistry::new(services));
    let access = ChatAccess::new(registry.clone());
    (dir, registry, access)
}

fn session(user: UserId) -> Session {
    Session {
        tenant: TENANT,
        user,
    }
}

#[test]
fn end_to_end_chunk_lifecycle() {
    let (_dir, registry, access) = setup();

    // Chunk 1: members = {alice}.
    let chat = access
        .open_chat(session(ALICE), &ChatDescription::default())
        .unwrap();
    assert_eq!(chat.members().unwrap(), vec![ALICE]);

    // join(bob) -> chunk 2; the join notice lands in chunk 1.
    let chunk = chat.join(BOB).unwrap();
    assert_eq!(chunk, ChunkId(2));
    assert_eq!(chat.members().unwrap(), vec![ALICE, BOB]);

    let notices = chat.poll_messages(Some(0), ALICE).unwrap();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].chunk, ChunkId(1));
    assert_eq!(notices[0].body, b"bob joined the chat");

    // post("hi") lands in chunk 2.
    let hi = chat.post(ALICE, None, b"hi").unwrap();
    assert_eq!(hi.chunk, ChunkId(2));

    // part(alice) with bob remaining -> chunk 3 plus a leave notice.
    let result = registry.part(chat.key(), ALICE).unwrap();
    assert_eq!(result, PartResult::Departed(ChunkId(3)));
    assert_eq!(chat.members().unwrap(), vec![BOB]);

    // Bob was a member of chunk 2 when "hi" was written, so the fetch
    // succeeds even though he was absent from chunk 1.
    let fetched = chat.get_messages(&[hi.id], BOB).unwrap();
    assert_eq!(fetched[0].body, b"hi");

    // The chunk-1 join notice stays invisible to bob...
    let err = chat.get_messages(&[notices[0].id], BOB).unwrap_err();
    assert!(matches!(err, ChatError::MessageNotFound(_)));

    // ...and carol, never a member at all, cannot fetch anything.
    let err = chat.get_messages(&[hi.id], CAROL).unwrap_err();
    assert!(matches!(err, ChatError::MessageNotFound(_)));
}

#[test]
fn last_member_part_deletes_chat_and_registry_entry() {
    let (_dir, registry, access) = setup();

    let chat = access
        .open_chat(session(ALICE), &ChatDescription::default())
        .unwrap();
    let key = chat.key();
    chat.join(BOB).unwrap();

    assert_eq!(registry.part(key, BOB).unwrap(), PartResult::Departed(ChunkId(3)));
    assert_eq!(registry.part(key, ALICE).unwrap(), PartResult::Deleted);

    assert!(registry.opt_get(key).is_none());
    let err = access.get_chat(session(ALICE), key.chat).unwrap_err();
    assert!(matches!(err, ChatError::ChatNotFound(_)));
}

#[test]
fn double_join_and_duplicate_chat_ids() {
    let (_dir, _registry, access) = setup();

    let desc = ChatDescription {
        id: Some(ChatId(77)),
        ..Default::default()
    };
    let chat = access.open_chat(session(ALICE), &desc).unwrap();

    assert!(matches!(
        chat.join(ALICE).unwrap_err(),
        ChatError::AlreadyMember
    ));
    assert!(matches!(
        access.open_chat(session(BOB), &desc).unwrap_err(),
        ChatError::ChatAlreadyExists(ChatId(77))
    ));
}

#[test]
fn noop_update_leaves_message_untouched() {
    let (_dir, _registry, access) = setup();

    let chat = access
        .open_chat(session(ALICE), &ChatDescription::default())
        .unwrap();
    let posted = chat.post(ALICE, Some("subj"), b"original").unwrap();

    chat.update_message(posted.id, &MessageUpdate::default())
        .unwrap();

    let loaded = chat.get_messages(&[posted.id], ALICE).unwrap().remove(0);
    assert_eq!(loaded.body, posted.body);
    assert_eq!(loaded.subject, posted.subject);
    assert_eq!(loaded.created_at, posted.created_at);
}

#[test]
fn partial_fetch_reports_missing_ids() {
    let (_dir, _registry, access) = setup();

    let chat = access
        .open_chat(session(ALICE), &ChatDescription::default())
        .unwrap();
    let posted = chat.post(ALICE, None, b"here").unwrap();
    chat.join(BOB).unwrap();

    // `posted` sits in chunk 1 where bob never was.
    let (found, missing) = chat.get_messages_partial(&[posted.id], BOB).unwrap();
    assert!(found.is_empty());
    assert_eq!(missing, vec![posted.id]);
}

#[test]
fn secure_chat_bodies_are_ciphertext_at_rest() {
    let (_dir, registry, access) = setup();
    registry
        .services()
        .bind_crypto(Arc::new(ChaChaAdapter::new(generate_symmetric_key())));

    let desc = ChatDescription {
        secure: true,
        ..Default::default()
    };
    let chat = access.open_chat(session(ALICE), &desc).unwrap();
    let posted = chat.post(ALICE, None, b"whisper").unwrap();

    // The caller-visible message is plaintext...
    assert_eq!(posted.body, b"whisper");
    let polled = chat.poll_messages(Some(0), ALICE).unwrap();
    assert_eq!(polled[0].body, b"whisper");

    // ...but the stored row is not.
    let db = registry.services().pool().read(TENANT).unwrap();
    let raw: Vec<u8> = db
        .conn()
        .query_row(
            "SELECT body FROM chat_messages WHERE message_id = ?1",
            [posted.id.as_bytes().as_slice()],
            |row| row.get(0),
        )
        .unwrap();
    assert_ne!(raw, b"whisper");
}

#[test]
fn secure_chat_without_adapter_is_unavailable() {
    let (_dir, _registry, access) = setup();

    let desc = ChatDescription {
        secure: true,
        ..Default::default()
    };
    let chat = access.open_chat(session(ALICE), &desc).unwrap();

    assert!(matches!(
        chat.post(ALICE, None, b"whisper").unwrap_err(),
        ChatError::ServiceUnavailable(_)
    ));
}

#[test]
fn concurrent_get_or_create_yields_one_instance() {
    let (_dir, registry, access) = setup();

    let chat = access
        .open_chat(session(ALICE), &ChatDescription::default())
        .unwrap();
    let key = chat.key();
    drop(chat);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        handles.push(std::thread::spawn(move || {
            registry.get_or_create(key).unwrap()
        }));
    }

    let chats: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for chat in &chats[1..] {
        assert!(Arc::ptr_eq(&chats[0], chat));
    }
    assert_eq!(registry.len(), 1);
}

#[test]
fn teardown_drops_degenerate_chats() {
    let (_dir, registry, access) = setup();

    // alice-only chat: degenerate once alice is gone.
    let solo = access
        .open_chat(session(ALICE), &ChatDescription::default())
        .unwrap();
    // Shared chat survives through bob.
    let shared = access
        .open_chat(session(ALICE), &ChatDescription::default())
        .unwrap();
    shared.join(BOB).unwrap();

    access.teardown(session(ALICE));

    assert!(registry.opt_get(solo.key()).is_none());
    assert!(matches!(
        access.get_chat(session(BOB), solo.key().chat).unwrap_err(),
        ChatError::ChatNotFound(_)
    ));

    let remaining = access.get_chat(session(BOB), shared.key().chat).unwrap();
    assert_eq!(remaining.members().unwrap(), vec![BOB]);
}

#[test]
fn list_chats_follows_current_membership() {
    let (_dir, _registry, access) = setup();

    let chat = access
        .open_chat(session(ALICE), &ChatDescription::default())
        .unwrap();
    assert!(access.list_chats(session(BOB)).unwrap().is_empty());

    chat.join(BOB).unwrap();
    let bobs = access.list_chats(session(BOB)).unwrap();
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].id, chat.key().chat);

    let key = ChatKey::new(TENANT, chat.key().chat);
    assert_eq!(key, chat.key());
}
