use std::collections::HashSet;

use shared::domain::Role;

use super::*;
use crate::{
    test_support::{context, owner, user},
    Audience,
};

fn send(body: &str) -> SendMessageRequest {
    SendMessageRequest {
        body: body.into(),
        client_nonce: None,
        attachment_ids: Vec::new(),
    }
}

async fn room_with(ctx: &ApiContext, creator: &Actor, name: &str, members: &[&Actor]) -> RoomId {
    create_room(
        ctx,
        creator,
        &CreateRoomRequest {
            name: name.into(),
            member_ids: members.iter().map(|m| m.user_id).collect(),
        },
    )
    .await
    .expect("room")
    .room_id
}

#[tokio::test]
async fn non_members_are_forbidden_and_other_tenants_see_nothing() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let mia = user(&ctx, &olivia, "mia", Role::Member).await;
    let outsider = owner(&ctx, "globex").await;
    let room_id = room_with(&ctx, &olivia, "leads", &[]).await;

    let err = list_messages(&ctx, &mia, room_id, &MessageHistoryQuery::default())
        .await
        .expect_err("non member");
    assert_eq!(err.code, ErrorCode::Forbidden);
    let err = send_message(&ctx, &mia, room_id, &send("hi")).await.expect_err("non member send");
    assert_eq!(err.code, ErrorCode::Forbidden);
    let err = join_room(&ctx, &outsider, room_id).await.expect_err("other tenant");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn messages_are_validated_and_broadcast_with_the_nonce() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let room_id = room_with(&ctx, &olivia, "general", &[]).await;
    let mut events = ctx.subscribe();

    let err = send_message(&ctx, &olivia, room_id, &send("   ")).await.expect_err("blank");
    assert_eq!(err.code, ErrorCode::Validation);
    let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
    let err = send_message(&ctx, &olivia, room_id, &send(&long)).await.expect_err("long");
    assert_eq!(err.code, ErrorCode::Validation);

    let message = send_message(
        &ctx,
        &olivia,
        room_id,
        &SendMessageRequest {
            body: "  hello  ".into(),
            client_nonce: Some("nonce-1".into()),
            attachment_ids: Vec::new(),
        },
    )
    .await
    .expect("send");
    assert_eq!(message.body, "hello");
    assert_eq!(message.sender_name, "Olivia Owner");

    let envelope = events.recv().await.expect("event");
    assert_eq!(envelope.audience, Audience::Room(room_id));
    match envelope.event {
        ServerEvent::MessageCreated {
            message: created,
            client_nonce,
        } => {
            assert_eq!(created.message_id, message.message_id);
            assert_eq!(client_nonce.as_deref(), Some("nonce-1"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn history_pages_backwards_with_has_more() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let room_id = room_with(&ctx, &olivia, "general", &[]).await;
    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(
            send_message(&ctx, &olivia, room_id, &send(&format!("m{n}")))
                .await
                .expect("send")
                .message_id,
        );
    }

    let page = list_messages(
        &ctx,
        &olivia,
        room_id,
        &MessageHistoryQuery {
            before: None,
            limit: Some(2),
        },
    )
    .await
    .expect("latest");
    let got: Vec<_> = page.messages.iter().map(|m| m.message_id).collect();
    assert_eq!(got, [ids[3], ids[4]]);
    assert!(page.has_more);

    let page = list_messages(
        &ctx,
        &olivia,
        room_id,
        &MessageHistoryQuery {
            before: Some(ids[1].0),
            limit: Some(0),
        },
    )
    .await
    .expect("oldest");
    let got: Vec<_> = page.messages.iter().map(|m| m.message_id).collect();
    assert_eq!(got, [ids[0]]);
    assert!(!page.has_more);
}

#[tokio::test]
async fn only_senders_edit_and_managers_may_delete() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let mia = user(&ctx, &olivia, "mia", Role::Member).await;
    let max = user(&ctx, &olivia, "max", Role::Member).await;
    let room_id = room_with(&ctx, &olivia, "general", &[&mia, &max]).await;
    let message = send_message(&ctx, &mia, room_id, &send("draft")).await.expect("send");

    let err = edit_message(
        &ctx,
        &max,
        message.message_id,
        &EditMessageRequest { body: "hijack".into() },
    )
    .await
    .expect_err("other member edit");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let edited = edit_message(
        &ctx,
        &mia,
        message.message_id,
        &EditMessageRequest { body: "final".into() },
    )
    .await
    .expect("edit");
    assert_eq!(edited.body, "final");
    assert!(edited.edited_at.is_some());

    let err = delete_message(&ctx, &max, message.message_id).await.expect_err("other member delete");
    assert_eq!(err.code, ErrorCode::Forbidden);
    delete_message(&ctx, &olivia, message.message_id).await.expect("manager delete");

    let page = list_messages(&ctx, &mia, room_id, &MessageHistoryQuery::default())
        .await
        .expect("history");
    assert!(page.messages.is_empty());
    let err = edit_message(
        &ctx,
        &mia,
        message.message_id,
        &EditMessageRequest { body: "again".into() },
    )
    .await
    .expect_err("deleted");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn deleting_requires_room_membership() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let ava = user(&ctx, &olivia, "ava", Role::Admin).await;
    let mia = user(&ctx, &olivia, "mia", Role::Member).await;
    let max = user(&ctx, &olivia, "max", Role::Member).await;
    let room_id = room_with(&ctx, &mia, "private", &[&max]).await;
    let secret = send_message(&ctx, &mia, room_id, &send("secret")).await.expect("send");
    let note = send_message(&ctx, &max, room_id, &send("note")).await.expect("send");

    let err = delete_message(&ctx, &ava, secret.message_id)
        .await
        .expect_err("admin outside the room");
    assert_eq!(err.code, ErrorCode::Forbidden);

    remove_room_member(&ctx, &mia, room_id, max.user_id).await.expect("remove max");
    let err = delete_message(&ctx, &max, note.message_id)
        .await
        .expect_err("removed sender");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let page = list_messages(&ctx, &mia, room_id, &MessageHistoryQuery::default())
        .await
        .expect("history");
    let bodies: Vec<&str> = page.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, ["secret", "note"]);
}

#[tokio::test]
async fn reactions_toggle_and_keep_first_use_order() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let mia = user(&ctx, &olivia, "mia", Role::Member).await;
    let room_id = room_with(&ctx, &olivia, "general", &[&mia]).await;
    let message = send_message(&ctx, &olivia, room_id, &send("ship it")).await.expect("send");
    let react = |emoji: &str| ToggleReactionRequest { emoji: emoji.into() };

    toggle_reaction(&ctx, &mia, message.message_id, &react("🚀")).await.expect("rocket");
    toggle_reaction(&ctx, &olivia, message.message_id, &react("👍")).await.expect("thumbs");
    let reactions = toggle_reaction(&ctx, &olivia, message.message_id, &react("🚀"))
        .await
        .expect("rocket again");
    let summary: Vec<_> = reactions.iter().map(|r| (r.emoji.as_str(), r.count)).collect();
    assert_eq!(summary, [("🚀", 2), ("👍", 1)]);

    let reactions = toggle_reaction(&ctx, &mia, message.message_id, &react("🚀"))
        .await
        .expect("rocket removed");
    let rocket = reactions.iter().find(|r| r.emoji == "🚀").expect("rocket");
    assert_eq!(rocket.user_ids, vec![olivia.user_id]);
    assert_eq!(reactions.len(), 2);

    let err = toggle_reaction(&ctx, &mia, message.message_id, &react("x".repeat(17).as_str()))
        .await
        .expect_err("long emoji");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn read_markers_drive_unread_counts() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let mia = user(&ctx, &olivia, "mia", Role::Member).await;
    let room_id = room_with(&ctx, &olivia, "general", &[&mia]).await;
    let first = send_message(&ctx, &olivia, room_id, &send("one")).await.expect("one");
    let second = send_message(&ctx, &olivia, room_id, &send("two")).await.expect("two");
    send_message(&ctx, &mia, room_id, &send("mine")).await.expect("own");

    let rooms = list_rooms(&ctx, &mia).await.expect("rooms");
    assert_eq!(rooms[0].unread_count, 2);

    let summary = mark_read(&ctx, &mia, room_id, second.message_id).await.expect("read");
    assert_eq!(summary.unread_count, 0);
    let summary = mark_read(&ctx, &mia, room_id, first.message_id).await.expect("older");
    assert_eq!(summary.unread_count, 0);

    let other_room = room_with(&ctx, &olivia, "other", &[&mia]).await;
    let err = mark_read(&ctx, &mia, other_room, second.message_id)
        .await
        .expect_err("message from another room");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn direct_rooms_are_reused_and_fixed() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let mia = user(&ctx, &olivia, "mia", Role::Member).await;
    let max = user(&ctx, &olivia, "max", Role::Member).await;

    let first = open_direct_room(&ctx, &olivia, &OpenDirectRoomRequest { user_id: mia.user_id })
        .await
        .expect("open");
    let again = open_direct_room(&ctx, &mia, &OpenDirectRoomRequest { user_id: olivia.user_id })
        .await
        .expect("reopen");
    assert_eq!(first.room_id, again.room_id);
    assert!(first.is_direct);
    assert_eq!(first.member_count, 2);

    let err = open_direct_room(&ctx, &olivia, &OpenDirectRoomRequest { user_id: olivia.user_id })
        .await
        .expect_err("self");
    assert_eq!(err.code, ErrorCode::Validation);
    let err = add_room_member(&ctx, &olivia, first.room_id, max.user_id)
        .await
        .expect_err("fixed");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn removed_members_get_room_removed() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let mia = user(&ctx, &olivia, "mia", Role::Member).await;
    let max = user(&ctx, &olivia, "max", Role::Member).await;
    let room_id = room_with(&ctx, &mia, "project", &[&max]).await;

    let err = remove_room_member(&ctx, &max, room_id, mia.user_id)
        .await
        .expect_err("member removing creator");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let mut events = ctx.subscribe();
    let members = remove_room_member(&ctx, &mia, room_id, max.user_id)
        .await
        .expect("creator removes");
    assert_eq!(members.len(), 1);

    let removal = events.recv().await.expect("event");
    assert!(matches!(removal.event, ServerEvent::RoomRemoved { room_id: r } if r == room_id));
    assert!(removal.delivers_to(max.tenant_id, max.user_id, &HashSet::new()));
    assert!(!removal.delivers_to(mia.tenant_id, mia.user_id, &HashSet::new()));

    let err = join_room(&ctx, &max, room_id).await.expect_err("no longer a member");
    assert_eq!(err.code, ErrorCode::Forbidden);

    add_room_member(&ctx, &mia, room_id, max.user_id).await.expect("re-add");
    remove_room_member(&ctx, &max, room_id, max.user_id).await.expect("leave");
}

#[tokio::test]
async fn typing_events_skip_the_typist() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let room_id = room_with(&ctx, &olivia, "general", &[]).await;
    let mut events = ctx.subscribe();

    start_typing(&ctx, &olivia, room_id).await.expect("typing");
    let envelope = events.recv().await.expect("event");
    let joined = HashSet::from([room_id]);
    assert!(!envelope.delivers_to(olivia.tenant_id, olivia.user_id, &joined));
    assert!(envelope.delivers_to(olivia.tenant_id, UserId(olivia.user_id.0 + 100), &joined));
    match envelope.event {
        ServerEvent::TypingStarted { expires_in_ms, .. } => assert_eq!(expires_in_ms, 3000),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn attachments_are_claimed_once_by_their_uploader() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let mia = user(&ctx, &olivia, "mia", Role::Member).await;
    let room_id = room_with(&ctx, &olivia, "files", &[&mia]).await;

    let uploaded = upload_attachment(&ctx, &olivia, room_id, Some("notes.txt"), Some("text/plain"), b"hello")
        .await
        .expect("upload");
    assert_eq!(uploaded.size_bytes, 5);

    let err = send_message(
        &ctx,
        &mia,
        room_id,
        &SendMessageRequest {
            body: String::new(),
            client_nonce: None,
            attachment_ids: vec![uploaded.attachment_id],
        },
    )
    .await
    .expect_err("someone else's upload");
    assert_eq!(err.code, ErrorCode::Validation);

    let message = send_message(
        &ctx,
        &olivia,
        room_id,
        &SendMessageRequest {
            body: String::new(),
            client_nonce: None,
            attachment_ids: vec![uploaded.attachment_id],
        },
    )
    .await
    .expect("attachment only message");
    assert_eq!(message.attachments, vec![uploaded.clone()]);

    let err = send_message(
        &ctx,
        &olivia,
        room_id,
        &SendMessageRequest {
            body: "again".into(),
            client_nonce: None,
            attachment_ids: vec![uploaded.attachment_id],
        },
    )
    .await
    .expect_err("already claimed");
    assert_eq!(err.code, ErrorCode::Validation);

    let (stored, content) = download_attachment(&ctx, &mia, uploaded.attachment_id)
        .await
        .expect("download");
    assert_eq!(stored.filename, "notes.txt");
    assert_eq!(content, b"hello");
}

#[tokio::test]
async fn uploads_are_bounded_and_named_safely() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let room_id = room_with(&ctx, &olivia, "files", &[]).await;

    let err = upload_attachment(&ctx, &olivia, room_id, None, None, b"")
        .await
        .expect_err("empty");
    assert_eq!(err.code, ErrorCode::Validation);
    let big = vec![0u8; ctx.max_attachment_bytes + 1];
    let err = upload_attachment(&ctx, &olivia, room_id, None, None, &big)
        .await
        .expect_err("too large");
    assert_eq!(err.code, ErrorCode::PayloadTooLarge);
    let err = upload_attachment(&ctx, &olivia, room_id, Some("../etc/passwd"), None, b"x")
        .await
        .expect_err("path");
    assert_eq!(err.code, ErrorCode::Validation);

    let unnamed = upload_attachment(&ctx, &olivia, room_id, None, None, b"x")
        .await
        .expect("unnamed");
    assert_eq!(unnamed.filename, "attachment");
}
