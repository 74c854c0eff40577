use shared::protocol::ReactionSummary;

use super::*;

const ROOM: RoomId = RoomId(1);
const ME: UserId = UserId(10);
const MIA: UserId = UserId(11);

fn message(id: i64, sender: UserId, body: &str) -> ChatMessagePayload {
    ChatMessagePayload {
        message_id: MessageId(id),
        room_id: ROOM,
        sender_id: sender,
        sender_name: format!("user-{}", sender.0),
        body: body.into(),
        attachments: Vec::new(),
        reactions: Vec::new(),
        created_at: Utc::now(),
        edited_at: None,
    }
}

fn bodies(state: &ChatState) -> Vec<&str> {
    state
        .messages(ROOM)
        .into_iter()
        .map(|m| m.body.as_str())
        .collect()
}

fn typing(user: UserId) -> ServerEvent {
    ServerEvent::TypingStarted {
        room_id: ROOM,
        user_id: user,
        display_name: "Mia".into(),
        expires_in_ms: 3000,
    }
}

#[test]
fn history_pages_merge_in_id_order_without_duplicates() {
    let mut state = ChatState::new(ME);
    state.merge_history(
        ROOM,
        MessagePage {
            messages: vec![message(3, MIA, "c"), message(4, MIA, "d")],
            has_more: true,
        },
    );
    assert!(state.has_more(ROOM));
    assert_eq!(state.oldest_message_id(ROOM), Some(MessageId(3)));

    state.merge_history(
        ROOM,
        MessagePage {
            messages: vec![message(1, MIA, "a"), message(2, MIA, "b"), message(3, MIA, "c")],
            has_more: false,
        },
    );
    assert_eq!(bodies(&state), ["a", "b", "c", "d"]);
    assert!(!state.has_more(ROOM));
}

#[test]
fn echo_with_nonce_replaces_the_pending_message() {
    let mut state = ChatState::new(ME);
    state.add_pending(ROOM, "n-1", "hello");
    assert_eq!(state.pending(ROOM).len(), 1);
    assert_eq!(state.pending(ROOM)[0].status, PendingStatus::Sending);

    let created = ServerEvent::MessageCreated {
        message: message(7, ME, "hello"),
        client_nonce: Some("n-1".into()),
    };
    state.apply(&created, Instant::now());
    assert!(state.pending(ROOM).is_empty());
    assert_eq!(bodies(&state), ["hello"]);

    // the REST response arriving after the echo changes nothing
    state.confirm_pending("n-1", message(7, ME, "hello"));
    assert_eq!(bodies(&state), ["hello"]);
    assert!(state.pending(ROOM).is_empty());
}

#[test]
fn failed_sends_stay_visible_until_discarded() {
    let mut state = ChatState::new(ME);
    state.add_pending(ROOM, "n-2", "lost");
    state.fail_pending(ROOM, "n-2");
    assert_eq!(state.pending(ROOM)[0].status, PendingStatus::Failed);

    let discarded = state.discard_pending(ROOM, "n-2").expect("pending");
    assert_eq!(discarded.body, "lost");
    assert!(state.pending(ROOM).is_empty());
}

#[test]
fn reactions_are_replaced_wholesale() {
    let mut state = ChatState::new(ME);
    state.apply(
        &ServerEvent::MessageCreated {
            message: message(1, MIA, "ship it"),
            client_nonce: None,
        },
        Instant::now(),
    );
    let reactions = |emoji: &str, users: Vec<UserId>| ServerEvent::ReactionsUpdated {
        room_id: ROOM,
        message_id: MessageId(1),
        reactions: vec![ReactionSummary {
            emoji: emoji.into(),
            count: users.len() as u32,
            user_ids: users,
        }],
    };
    state.apply(&reactions("👍", vec![ME, MIA]), Instant::now());
    state.apply(&reactions("🚀", vec![MIA]), Instant::now());

    let stored = &state.messages(ROOM)[0].reactions;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].emoji, "🚀");
}

#[test]
fn typing_indicators_expire_after_three_seconds() {
    let mut state = ChatState::new(ME);
    let start = Instant::now();
    state.apply(&typing(MIA), start);

    assert_eq!(state.typing_users(ROOM, start + Duration::from_millis(2900)).len(), 1);
    assert!(state.typing_users(ROOM, start + Duration::from_millis(3000)).is_empty());

    // a fresh event restarts the timer
    state.apply(&typing(MIA), start + Duration::from_millis(2000));
    assert_eq!(state.typing_users(ROOM, start + Duration::from_millis(4500)).len(), 1);

    state.prune_typing(start + Duration::from_secs(10));
    assert!(state.typing_users(ROOM, start).is_empty());
}

#[test]
fn typing_clears_on_stop_or_message() {
    let mut state = ChatState::new(ME);
    let now = Instant::now();
    state.apply(&typing(MIA), now);
    state.apply(
        &ServerEvent::TypingStopped {
            room_id: ROOM,
            user_id: MIA,
        },
        now,
    );
    assert!(state.typing_users(ROOM, now).is_empty());

    state.apply(&typing(MIA), now);
    state.apply(
        &ServerEvent::MessageCreated {
            message: message(5, MIA, "done"),
            client_nonce: None,
        },
        now,
    );
    assert!(state.typing_users(ROOM, now).is_empty());
}

#[test]
fn own_typing_events_are_ignored() {
    let mut state = ChatState::new(ME);
    let now = Instant::now();
    state.apply(&typing(ME), now);
    assert!(state.typing_users(ROOM, now).is_empty());
}

#[test]
fn edits_deletes_and_room_removal() {
    let mut state = ChatState::new(ME);
    let now = Instant::now();
    state.set_rooms(vec![ChatRoomSummary {
        room_id: ROOM,
        name: "general".into(),
        is_direct: false,
        created_by: ME,
        member_count: 2,
        unread_count: 0,
        last_message_at: None,
    }]);
    state.merge_history(
        ROOM,
        MessagePage {
            messages: vec![message(1, MIA, "tpyo"), message(2, MIA, "bye")],
            has_more: false,
        },
    );

    state.apply(
        &ServerEvent::MessageUpdated {
            message: message(1, MIA, "typo"),
        },
        now,
    );
    state.apply(
        &ServerEvent::MessageDeleted {
            room_id: ROOM,
            message_id: MessageId(2),
        },
        now,
    );
    assert_eq!(bodies(&state), ["typo"]);

    state.apply(&ServerEvent::RoomRemoved { room_id: ROOM }, now);
    assert!(state.room(ROOM).is_none());
    assert!(state.messages(ROOM).is_empty());
}
