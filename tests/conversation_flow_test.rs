//! End-to-end flows against the service layer and an in-memory store.

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use messaging_core::config::Config;
use messaging_core::error::AppError;
use messaging_core::models::{ConversationKind, MediaDescriptor, MessageKind};
use messaging_core::services::conversation_service::{ConversationPatch, ConversationService};
use messaging_core::services::message_service::{MessageService, NewMessage, SortOrder};
use messaging_core::services::read_state::ReadStateService;
use messaging_core::services::Actor;
use messaging_core::store::{DocumentStore, MemoryStore};

fn text_message(text: &str) -> NewMessage {
    NewMessage {
        kind: MessageKind::Text,
        text: Some(text.to_string()),
        media: None,
        reply_to: None,
    }
}

#[tokio::test]
async fn direct_conversation_is_idempotent_per_pair() {
    let store = MemoryStore::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let first = ConversationService::create_or_get(
        &store,
        alice,
        vec![bob],
        ConversationKind::Direct,
        None,
    )
    .await
    .unwrap();

    // Same pair from the other side resolves to the same conversation.
    let second = ConversationService::create_or_get(
        &store,
        bob,
        vec![alice],
        ConversationKind::Direct,
        None,
    )
    .await
    .unwrap();

    assert_eq!(first.conversation.id, second.conversation.id);
    assert_eq!(second.conversation.participant_count, 2);
}

#[tokio::test]
async fn racing_direct_creates_settle_on_one_conversation() {
    let store = MemoryStore::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let (a, b) = tokio::join!(
        ConversationService::create_or_get(
            &store,
            alice,
            vec![bob],
            ConversationKind::Direct,
            None
        ),
        ConversationService::create_or_get(
            &store,
            bob,
            vec![alice],
            ConversationKind::Direct,
            None
        ),
    );

    assert_eq!(a.unwrap().conversation.id, b.unwrap().conversation.id);
}

#[tokio::test]
async fn hello_flow_send_read_and_unread() {
    let store = MemoryStore::new();
    let config = Config::test_defaults();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let conv = ConversationService::create_or_get(
        &store,
        alice,
        vec![bob],
        ConversationKind::Direct,
        None,
    )
    .await
    .unwrap()
    .conversation;

    let message = MessageService::send_message(&store, &config, conv.id, alice, text_message("hello"))
        .await
        .unwrap();
    assert_eq!(message.author_id, alice);

    // Unread for the peer, never for the author.
    assert_eq!(
        ReadStateService::unread_count(&store, conv.id, bob).await.unwrap(),
        1
    );
    assert_eq!(
        ReadStateService::unread_count(&store, conv.id, alice)
            .await
            .unwrap(),
        0
    );

    ReadStateService::mark_as_read(&store, conv.id, bob, None)
        .await
        .unwrap();
    assert_eq!(
        ReadStateService::unread_count(&store, conv.id, bob).await.unwrap(),
        0
    );

    // The conversation surface reflects the latest message.
    let listed = ConversationService::list_conversations(&store, bob, 10, None)
        .await
        .unwrap();
    assert_eq!(listed.items.len(), 1);
    assert_eq!(listed.items[0].last_message_preview.as_deref(), Some("hello"));
}

#[tokio::test]
async fn read_marker_is_monotonic() {
    let store = MemoryStore::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = ConversationService::create_or_get(
        &store,
        alice,
        vec![bob],
        ConversationKind::Direct,
        None,
    )
    .await
    .unwrap()
    .conversation;

    let later = Utc::now();
    let earlier = later - Duration::minutes(5);

    let effective = ReadStateService::mark_as_read(&store, conv.id, bob, Some(later))
        .await
        .unwrap();
    assert_eq!(effective, later);

    // A delayed acknowledgement cannot move the marker backwards.
    let effective = ReadStateService::mark_as_read(&store, conv.id, bob, Some(earlier))
        .await
        .unwrap();
    assert_eq!(effective, later);
}

#[tokio::test]
async fn locked_conversation_rejects_new_messages() {
    let store = MemoryStore::new();
    let config = Config::test_defaults();
    let (admin, member) = (Uuid::new_v4(), Uuid::new_v4());

    let conv = ConversationService::create_or_get(
        &store,
        admin,
        vec![member],
        ConversationKind::Group,
        Some("announcements".into()),
    )
    .await
    .unwrap()
    .conversation;

    ConversationService::update_conversation(
        &store,
        conv.id,
        Actor::user(admin),
        ConversationPatch {
            locked: Some(true),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let err = MessageService::send_message(&store, &config, conv.id, member, text_message("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConversationLocked));

    // The rejected message left no trace in the ledger.
    let page = MessageService::get_messages(&store, conv.id, admin, 10, None, SortOrder::Desc)
        .await
        .unwrap();
    assert!(page.items.is_empty());

    // Unlocking restores the flow.
    ConversationService::update_conversation(
        &store,
        conv.id,
        Actor::user(admin),
        ConversationPatch {
            locked: Some(false),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    MessageService::send_message(&store, &config, conv.id, member, text_message("hi"))
        .await
        .unwrap();
}

#[tokio::test]
async fn non_participants_are_rejected() {
    let store = MemoryStore::new();
    let config = Config::test_defaults();
    let (alice, bob, eve) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let conv = ConversationService::create_or_get(
        &store,
        alice,
        vec![bob],
        ConversationKind::Direct,
        None,
    )
    .await
    .unwrap()
    .conversation;

    let err = MessageService::send_message(&store, &config, conv.id, eve, text_message("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotParticipant));

    let err = MessageService::get_messages(&store, conv.id, eve, 10, None, SortOrder::Desc)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotParticipant));

    // A direct conversation never admits a third user.
    let err = ConversationService::join_conversation(&store, conv.id, eve)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
}

#[tokio::test]
async fn edit_window_is_enforced() {
    let store = MemoryStore::new();
    let config = Config::test_defaults();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let conv = ConversationService::create_or_get(
        &store,
        alice,
        vec![bob],
        ConversationKind::Direct,
        None,
    )
    .await
    .unwrap()
    .conversation;

    let message =
        MessageService::send_message(&store, &config, conv.id, alice, text_message("typo"))
            .await
            .unwrap();

    // Fresh message: edit succeeds and only the author may do it.
    let err = MessageService::edit_message(&store, &config, message.id, bob, "hijack")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotAuthor));

    let edited = MessageService::edit_message(&store, &config, message.id, alice, "fixed")
        .await
        .unwrap();
    assert!(edited.edited_at.is_some());

    // Age the message to the edge of the window: still editable. The
    // exact-boundary instant is pinned by a unit test on the window
    // predicate; end to end the clock keeps moving, so leave a little
    // slack here.
    let mut doc = store.get("messages", &message.id.to_string()).await.unwrap().unwrap();
    doc["created_at"] = json!(
        Utc::now() - Duration::minutes(config.edit_window_minutes) + Duration::seconds(30)
    );
    store
        .set("messages", &message.id.to_string(), doc)
        .await
        .unwrap();
    MessageService::edit_message(&store, &config, message.id, alice, "still in time")
        .await
        .unwrap();

    // Age the message past the window and try again.
    let mut doc = store.get("messages", &message.id.to_string()).await.unwrap().unwrap();
    doc["created_at"] = json!(Utc::now() - Duration::minutes(config.edit_window_minutes + 1));
    store
        .set("messages", &message.id.to_string(), doc)
        .await
        .unwrap();

    let err = MessageService::edit_message(&store, &config, message.id, alice, "too late")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EditWindowExpired { .. }));
}

#[tokio::test]
async fn soft_delete_redacts_and_excludes() {
    let store = MemoryStore::new();
    let config = Config::test_defaults();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let conv = ConversationService::create_or_get(
        &store,
        alice,
        vec![bob],
        ConversationKind::Direct,
        None,
    )
    .await
    .unwrap()
    .conversation;

    let keep = MessageService::send_message(&store, &config, conv.id, alice, text_message("keep"))
        .await
        .unwrap();
    let gone = MessageService::send_message(&store, &config, conv.id, alice, text_message("gone"))
        .await
        .unwrap();

    let deleted = MessageService::delete_message(&store, gone.id, Actor::user(alice))
        .await
        .unwrap();
    let dto = deleted.to_dto();
    assert!(dto.deleted);
    assert!(dto.text.is_none());

    // History, unread counts and repeat deletes all treat it as gone.
    let page = MessageService::get_messages(&store, conv.id, bob, 10, None, SortOrder::Asc)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, keep.id);

    assert_eq!(
        ReadStateService::unread_count(&store, conv.id, bob).await.unwrap(),
        1
    );

    let err = MessageService::delete_message(&store, gone.id, Actor::user(alice))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConflictingState(_)));

    // A moderator may remove someone else's message; plain users may not.
    let err = MessageService::delete_message(&store, keep.id, Actor::user(bob))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotAuthor));
    MessageService::delete_message(&store, keep.id, Actor::moderator(bob))
        .await
        .unwrap();
}

#[tokio::test]
async fn media_messages_validate_their_parts() {
    let store = MemoryStore::new();
    let config = Config::test_defaults();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = ConversationService::create_or_get(
        &store,
        alice,
        vec![bob],
        ConversationKind::Direct,
        None,
    )
    .await
    .unwrap()
    .conversation;

    // Image without media payload.
    let err = MessageService::send_message(
        &store,
        &config,
        conv.id,
        alice,
        NewMessage {
            kind: MessageKind::Image,
            text: None,
            media: None,
            reply_to: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidMessage(_)));

    // Text that sanitizes down to nothing.
    let err = MessageService::send_message(
        &store,
        &config,
        conv.id,
        alice,
        text_message("<b> </b>"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidMessage(_)));

    let message = MessageService::send_message(
        &store,
        &config,
        conv.id,
        alice,
        NewMessage {
            kind: MessageKind::Image,
            text: None,
            media: Some(MediaDescriptor {
                url: "https://cdn.example/pic.jpg".into(),
                mime_type: Some("image/jpeg".into()),
                size_bytes: Some(1024),
                duration_ms: None,
            }),
            reply_to: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(message.body.kind(), MessageKind::Image);

    let listed = ConversationService::list_conversations(&store, alice, 10, None)
        .await
        .unwrap();
    assert_eq!(listed.items[0].last_message_preview.as_deref(), Some("[photo]"));
}

#[tokio::test]
async fn reactions_toggle_exactly_once() {
    let store = MemoryStore::new();
    let config = Config::test_defaults();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = ConversationService::create_or_get(
        &store,
        alice,
        vec![bob],
        ConversationKind::Direct,
        None,
    )
    .await
    .unwrap()
    .conversation;

    let message = MessageService::send_message(&store, &config, conv.id, alice, text_message("hi"))
        .await
        .unwrap();

    let reacted = MessageService::add_reaction(&store, message.id, bob, "👍")
        .await
        .unwrap();
    assert_eq!(reacted.to_dto().reaction_counts.get("👍"), Some(&1));

    let err = MessageService::add_reaction(&store, message.id, bob, "👍")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConflictingState(_)));

    let cleared = MessageService::remove_reaction(&store, message.id, bob, "👍")
        .await
        .unwrap();
    assert!(cleared.to_dto().reaction_counts.is_empty());

    let err = MessageService::remove_reaction(&store, message.id, bob, "👍")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConflictingState(_)));
}

#[tokio::test]
async fn history_pages_walk_in_order() {
    let store = MemoryStore::new();
    let config = Config::test_defaults();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = ConversationService::create_or_get(
        &store,
        alice,
        vec![bob],
        ConversationKind::Direct,
        None,
    )
    .await
    .unwrap()
    .conversation;

    for i in 0..5 {
        MessageService::send_message(&store, &config, conv.id, alice, text_message(&format!("m{i}")))
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = MessageService::get_messages(
            &store,
            conv.id,
            bob,
            2,
            cursor.as_deref(),
            SortOrder::Asc,
        )
        .await
        .unwrap();
        seen.extend(page.items.iter().map(|m| m.text.clone().unwrap()));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(seen, vec!["m0", "m1", "m2", "m3", "m4"]);

    // Descending order flips the walk.
    let page = MessageService::get_messages(&store, conv.id, bob, 10, None, SortOrder::Desc)
        .await
        .unwrap();
    let newest_first: Vec<_> = page.items.iter().map(|m| m.text.clone().unwrap()).collect();
    assert_eq!(newest_first, vec!["m4", "m3", "m2", "m1", "m0"]);
}

#[tokio::test]
async fn leaving_and_rejoining_a_group() {
    let store = MemoryStore::new();
    let (admin, member, newcomer) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let conv = ConversationService::create_or_get(
        &store,
        admin,
        vec![member],
        ConversationKind::Group,
        Some("team".into()),
    )
    .await
    .unwrap()
    .conversation;

    let joined = ConversationService::join_conversation(&store, conv.id, newcomer)
        .await
        .unwrap();
    assert_eq!(joined.participant_count, 3);

    // Double-join conflicts instead of inflating the count.
    let err = ConversationService::join_conversation(&store, conv.id, newcomer)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConflictingState(_)));

    let left = ConversationService::leave_conversation(&store, conv.id, newcomer)
        .await
        .unwrap();
    assert_eq!(left.participant_count, 2);

    // The leaver no longer sees the conversation.
    let listed = ConversationService::list_conversations(&store, newcomer, 10, None)
        .await
        .unwrap();
    assert!(listed.items.is_empty());

    // Everyone leaving deactivates the group.
    ConversationService::leave_conversation(&store, conv.id, member)
        .await
        .unwrap();
    let last = ConversationService::leave_conversation(&store, conv.id, admin)
        .await
        .unwrap();
    assert!(!last.active);
}

#[tokio::test]
async fn only_admins_update_group_metadata() {
    let store = MemoryStore::new();
    let (admin, member) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = ConversationService::create_or_get(
        &store,
        admin,
        vec![member],
        ConversationKind::Group,
        Some("before".into()),
    )
    .await
    .unwrap()
    .conversation;

    let err = ConversationService::update_conversation(
        &store,
        conv.id,
        Actor::user(member),
        ConversationPatch {
            title: Some("after".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let updated = ConversationService::update_conversation(
        &store,
        conv.id,
        Actor::user(admin),
        ConversationPatch {
            title: Some("after".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(updated.title.as_deref(), Some("after"));
}
