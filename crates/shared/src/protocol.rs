use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    account::SubscriptionSummary,
    domain::{AttachmentId, MessageId, ObjectiveId, RoomId, StatusId, UserId},
    error::ApiError,
    okr::FeedbackSummary,
};

/// How long a typing indicator stays visible after the last `typing` event.
pub const TYPING_INDICATOR_TTL_MS: u64 = 3_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    JoinRoom {
        room_id: RoomId,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    Typing {
        room_id: RoomId,
    },
    StopTyping {
        room_id: RoomId,
    },
    NewMessage {
        room_id: RoomId,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_nonce: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachment_ids: Vec<AttachmentId>,
    },
    MarkRead {
        room_id: RoomId,
        message_id: MessageId,
    },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRoomSummary {
    pub room_id: RoomId,
    pub name: String,
    pub is_direct: bool,
    pub created_by: UserId,
    pub member_count: u32,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMember {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_message_id: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentPayload {
    pub attachment_id: AttachmentId,
    pub filename: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: u32,
    pub user_ids: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentPayload>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<ReactionSummary>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<ChatMessagePayload>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDirectRoomRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment_ids: Vec<AttachmentId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditMessageRequest {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadRequest {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageHistoryQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedAttachment {
    pub attachment: AttachmentPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomJoined {
        room_id: RoomId,
    },
    RoomLeft {
        room_id: RoomId,
    },
    MessageCreated {
        message: ChatMessagePayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_nonce: Option<String>,
    },
    MessageUpdated {
        message: ChatMessagePayload,
    },
    MessageDeleted {
        room_id: RoomId,
        message_id: MessageId,
    },
    ReactionsUpdated {
        room_id: RoomId,
        message_id: MessageId,
        reactions: Vec<ReactionSummary>,
    },
    TypingStarted {
        room_id: RoomId,
        user_id: UserId,
        display_name: String,
        expires_in_ms: u64,
    },
    TypingStopped {
        room_id: RoomId,
        user_id: UserId,
    },
    RoomUpdated {
        room: ChatRoomSummary,
    },
    RoomMembersUpdated {
        room_id: RoomId,
        members: Vec<RoomMember>,
    },
    RoomRemoved {
        room_id: RoomId,
    },
    ObjectiveChanged {
        objective_id: ObjectiveId,
    },
    ObjectiveDeleted {
        objective_id: ObjectiveId,
    },
    BoardChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_id: Option<StatusId>,
    },
    FeedbackReceived {
        feedback: FeedbackSummary,
    },
    SubscriptionUpdated {
        subscription: SubscriptionSummary,
    },
    Pong,
    Error(ApiError),
}
