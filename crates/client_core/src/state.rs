//! Local chat state driven by REST responses and socket events. Nothing here
//! performs I/O; the caller supplies the clock.

use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use shared::{
    domain::{MessageId, RoomId, UserId},
    protocol::{ChatMessagePayload, ChatRoomSummary, MessagePage, ServerEvent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStatus {
    Sending,
    Failed,
}

/// A message shown optimistically before the server has stored it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub client_nonce: String,
    pub room_id: RoomId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub status: PendingStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypingUser {
    pub user_id: UserId,
    pub display_name: String,
    pub expires_at: Instant,
}

#[derive(Debug, Default)]
struct RoomTimeline {
    messages: BTreeMap<MessageId, ChatMessagePayload>,
    pending: Vec<PendingMessage>,
    typing: HashMap<UserId, TypingUser>,
    has_more: bool,
}

impl RoomTimeline {
    fn upsert(&mut self, message: ChatMessagePayload) {
        self.typing.remove(&message.sender_id);
        self.messages.insert(message.message_id, message);
    }

    fn take_pending(&mut self, client_nonce: &str) -> Option<PendingMessage> {
        let index = self
            .pending
            .iter()
            .position(|pending| pending.client_nonce == client_nonce)?;
        Some(self.pending.remove(index))
    }
}

#[derive(Debug, Default)]
pub struct ChatState {
    self_user: Option<UserId>,
    rooms: BTreeMap<RoomId, ChatRoomSummary>,
    timelines: HashMap<RoomId, RoomTimeline>,
}

impl ChatState {
    pub fn new(self_user: UserId) -> Self {
        Self {
            self_user: Some(self_user),
            ..Self::default()
        }
    }

    pub fn set_rooms(&mut self, rooms: Vec<ChatRoomSummary>) {
        self.rooms = rooms.into_iter().map(|room| (room.room_id, room)).collect();
        self.timelines.retain(|room_id, _| self.rooms.contains_key(room_id));
    }

    pub fn upsert_room(&mut self, room: ChatRoomSummary) {
        self.rooms.insert(room.room_id, room);
    }

    pub fn rooms(&self) -> impl Iterator<Item = &ChatRoomSummary> {
        self.rooms.values()
    }

    pub fn room(&self, room_id: RoomId) -> Option<&ChatRoomSummary> {
        self.rooms.get(&room_id)
    }

    /// Merges one history page. Messages already present are replaced by the
    /// page's copy, so repeated fetches never duplicate.
    pub fn merge_history(&mut self, room_id: RoomId, page: MessagePage) {
        let timeline = self.timelines.entry(room_id).or_default();
        for message in page.messages {
            timeline.messages.insert(message.message_id, message);
        }
        timeline.has_more = page.has_more;
    }

    pub fn messages(&self, room_id: RoomId) -> Vec<&ChatMessagePayload> {
        self.timelines
            .get(&room_id)
            .map(|timeline| timeline.messages.values().collect())
            .unwrap_or_default()
    }

    pub fn oldest_message_id(&self, room_id: RoomId) -> Option<MessageId> {
        self.timelines
            .get(&room_id)?
            .messages
            .keys()
            .next()
            .copied()
    }

    pub fn has_more(&self, room_id: RoomId) -> bool {
        self.timelines
            .get(&room_id)
            .is_some_and(|timeline| timeline.has_more)
    }

    pub fn pending(&self, room_id: RoomId) -> &[PendingMessage] {
        self.timelines
            .get(&room_id)
            .map(|timeline| timeline.pending.as_slice())
            .unwrap_or_default()
    }

    pub fn add_pending(&mut self, room_id: RoomId, client_nonce: &str, body: &str) {
        self.timelines
            .entry(room_id)
            .or_default()
            .pending
            .push(PendingMessage {
                client_nonce: client_nonce.to_string(),
                room_id,
                body: body.to_string(),
                created_at: Utc::now(),
                status: PendingStatus::Sending,
            });
    }

    /// Replaces the pending entry with the stored message. The socket echo
    /// may have done this already.
    pub fn confirm_pending(&mut self, client_nonce: &str, message: ChatMessagePayload) {
        let timeline = self.timelines.entry(message.room_id).or_default();
        timeline.take_pending(client_nonce);
        timeline.messages.insert(message.message_id, message);
    }

    pub fn fail_pending(&mut self, room_id: RoomId, client_nonce: &str) {
        if let Some(pending) = self
            .timelines
            .get_mut(&room_id)
            .and_then(|timeline| {
                timeline
                    .pending
                    .iter_mut()
                    .find(|pending| pending.client_nonce == client_nonce)
            })
        {
            pending.status = PendingStatus::Failed;
        }
    }

    pub fn discard_pending(&mut self, room_id: RoomId, client_nonce: &str) -> Option<PendingMessage> {
        self.timelines.get_mut(&room_id)?.take_pending(client_nonce)
    }

    /// Users typing in `room_id` whose indicator has not expired at `now`.
    pub fn typing_users(&self, room_id: RoomId, now: Instant) -> Vec<&TypingUser> {
        let mut users: Vec<_> = self
            .timelines
            .get(&room_id)
            .map(|timeline| {
                timeline
                    .typing
                    .values()
                    .filter(|user| user.expires_at > now)
                    .collect()
            })
            .unwrap_or_default();
        users.sort_by_key(|user| user.user_id);
        users
    }

    pub fn prune_typing(&mut self, now: Instant) {
        for timeline in self.timelines.values_mut() {
            timeline.typing.retain(|_, user| user.expires_at > now);
        }
    }

    pub fn apply(&mut self, event: &ServerEvent, now: Instant) {
        match event {
            ServerEvent::MessageCreated {
                message,
                client_nonce,
            } => {
                let timeline = self.timelines.entry(message.room_id).or_default();
                if let Some(nonce) = client_nonce {
                    timeline.take_pending(nonce);
                }
                timeline.upsert(message.clone());
                if let Some(room) = self.rooms.get_mut(&message.room_id) {
                    room.last_message_at = Some(message.created_at);
                }
            }
            ServerEvent::MessageUpdated { message } => {
                self.timelines
                    .entry(message.room_id)
                    .or_default()
                    .messages
                    .insert(message.message_id, message.clone());
            }
            ServerEvent::MessageDeleted {
                room_id,
                message_id,
            } => {
                if let Some(timeline) = self.timelines.get_mut(room_id) {
                    timeline.messages.remove(message_id);
                }
            }
            ServerEvent::ReactionsUpdated {
                room_id,
                message_id,
                reactions,
            } => {
                if let Some(message) = self
                    .timelines
                    .get_mut(room_id)
                    .and_then(|timeline| timeline.messages.get_mut(message_id))
                {
                    message.reactions = reactions.clone();
                }
            }
            ServerEvent::TypingStarted {
                room_id,
                user_id,
                display_name,
                expires_in_ms,
            } => {
                if self.self_user == Some(*user_id) {
                    return;
                }
                self.timelines.entry(*room_id).or_default().typing.insert(
                    *user_id,
                    TypingUser {
                        user_id: *user_id,
                        display_name: display_name.clone(),
                        expires_at: now + Duration::from_millis(*expires_in_ms),
                    },
                );
            }
            ServerEvent::TypingStopped { room_id, user_id } => {
                if let Some(timeline) = self.timelines.get_mut(room_id) {
                    timeline.typing.remove(user_id);
                }
            }
            ServerEvent::RoomUpdated { room } => self.upsert_room(room.clone()),
            ServerEvent::RoomMembersUpdated { room_id, members } => {
                if let Some(room) = self.rooms.get_mut(room_id) {
                    room.member_count = u32::try_from(members.len()).unwrap_or(u32::MAX);
                }
            }
            ServerEvent::RoomRemoved { room_id } => {
                self.rooms.remove(room_id);
                self.timelines.remove(room_id);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
