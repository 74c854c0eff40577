use std::collections::BTreeSet;

use shared::{
    domain::{AttachmentId, MessageId, RoomId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        AttachmentPayload, ChatMessagePayload, ChatRoomSummary, CreateRoomRequest,
        EditMessageRequest, MessageHistoryQuery, MessagePage, OpenDirectRoomRequest,
        ReactionSummary, RoomMember, SendMessageRequest, ServerEvent, ToggleReactionRequest,
        TYPING_INDICATOR_TTL_MS,
    },
};
use storage::{NewAttachment, StoredAttachment, StoredMessage, StoredRoom};
use tracing::{debug, info};

use crate::{internal, org::active_tenant_user, required_text, Actor, ApiContext, Envelope};

pub const MAX_MESSAGE_CHARS: usize = 4000;
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const MAX_HISTORY_LIMIT: u32 = 100;
const MAX_EMOJI_CHARS: usize = 16;
const MAX_FILENAME_BYTES: usize = 180;
const DEFAULT_FILENAME: &str = "attachment";

async fn tenant_room(ctx: &ApiContext, actor: &Actor, room_id: RoomId) -> Result<StoredRoom, ApiError> {
    ctx.storage
        .room(actor.tenant_id, room_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("room not found"))
}

async fn is_member(ctx: &ApiContext, room_id: RoomId, user_id: UserId) -> Result<bool, ApiError> {
    ctx.storage
        .is_room_member(room_id, user_id)
        .await
        .map_err(internal)
}

/// Loads a room of the actor's tenant that the actor belongs to.
async fn member_room(ctx: &ApiContext, actor: &Actor, room_id: RoomId) -> Result<StoredRoom, ApiError> {
    let room = tenant_room(ctx, actor, room_id).await?;
    if !is_member(ctx, room_id, actor.user_id).await? {
        return Err(ApiError::forbidden("not a member of this room"));
    }
    Ok(room)
}

async fn summary_for(
    ctx: &ApiContext,
    actor: &Actor,
    room_id: RoomId,
    viewer: UserId,
) -> Result<ChatRoomSummary, ApiError> {
    ctx.storage
        .room_summary(actor.tenant_id, room_id, viewer)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("room not found"))
}

async fn visible_message(
    ctx: &ApiContext,
    actor: &Actor,
    message_id: MessageId,
) -> Result<StoredMessage, ApiError> {
    ctx.storage
        .message(actor.tenant_id, message_id)
        .await
        .map_err(internal)?
        .filter(|message| !message.deleted)
        .ok_or_else(|| ApiError::not_found("message not found"))
}

async fn message_payload(
    ctx: &ApiContext,
    actor: &Actor,
    message_id: MessageId,
) -> Result<ChatMessagePayload, ApiError> {
    ctx.storage
        .message_payload(actor.tenant_id, message_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("message not found"))
}

fn validate_body(body: &str, has_attachments: bool) -> Result<String, ApiError> {
    let body = body.trim();
    if body.is_empty() && !has_attachments {
        return Err(ApiError::validation("message body must not be empty"));
    }
    if body.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::validation(format!(
            "message body must be at most {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(body.to_string())
}

/// Announces room membership changes to current members and the summary to
/// the affected users.
async fn publish_membership(
    ctx: &ApiContext,
    actor: &Actor,
    room_id: RoomId,
    added: &[UserId],
) -> Result<Vec<RoomMember>, ApiError> {
    let members = list_members_unchecked(ctx, room_id).await?;
    ctx.publish(Envelope::room(
        actor.tenant_id,
        room_id,
        ServerEvent::RoomMembersUpdated {
            room_id,
            members: members.clone(),
        },
    ));
    for &user_id in added {
        let room = summary_for(ctx, actor, room_id, user_id).await?;
        ctx.publish(Envelope::users(
            actor.tenant_id,
            vec![user_id],
            ServerEvent::RoomUpdated { room },
        ));
    }
    Ok(members)
}

async fn list_members_unchecked(ctx: &ApiContext, room_id: RoomId) -> Result<Vec<RoomMember>, ApiError> {
    ctx.storage
        .list_room_members(room_id)
        .await
        .map_err(internal)
}

pub async fn create_room(
    ctx: &ApiContext,
    actor: &Actor,
    request: &CreateRoomRequest,
) -> Result<ChatRoomSummary, ApiError> {
    let name = required_text("room name", &request.name, 80)?;
    let member_ids: BTreeSet<UserId> = request
        .member_ids
        .iter()
        .copied()
        .filter(|user_id| *user_id != actor.user_id)
        .collect();
    for &user_id in &member_ids {
        active_tenant_user(ctx, actor, user_id).await?;
    }
    let member_ids: Vec<UserId> = member_ids.into_iter().collect();

    let room_id = ctx
        .storage
        .create_room(actor.tenant_id, &name, false, actor.user_id, &member_ids)
        .await
        .map_err(internal)?;
    info!(
        tenant_id = actor.tenant_id.0,
        room_id = room_id.0,
        members = member_ids.len() + 1,
        "chat room created"
    );

    let mut everyone = vec![actor.user_id];
    everyone.extend(member_ids);
    publish_membership(ctx, actor, room_id, &everyone).await?;
    summary_for(ctx, actor, room_id, actor.user_id).await
}

/// Returns the direct room shared with `user_id`, creating it on first use.
pub async fn open_direct_room(
    ctx: &ApiContext,
    actor: &Actor,
    request: &OpenDirectRoomRequest,
) -> Result<ChatRoomSummary, ApiError> {
    if request.user_id == actor.user_id {
        return Err(ApiError::validation("cannot open a direct room with yourself"));
    }
    let other = active_tenant_user(ctx, actor, request.user_id).await?;
    if let Some(room_id) = ctx
        .storage
        .direct_room_between(actor.tenant_id, actor.user_id, other.user_id)
        .await
        .map_err(internal)?
    {
        return summary_for(ctx, actor, room_id, actor.user_id).await;
    }

    let me = active_tenant_user(ctx, actor, actor.user_id).await?;
    let name = format!("{} & {}", me.display_name, other.display_name);
    let room_id = ctx
        .storage
        .create_room(actor.tenant_id, &name, true, actor.user_id, &[other.user_id])
        .await
        .map_err(internal)?;
    info!(tenant_id = actor.tenant_id.0, room_id = room_id.0, "direct room created");

    publish_membership(ctx, actor, room_id, &[actor.user_id, other.user_id]).await?;
    summary_for(ctx, actor, room_id, actor.user_id).await
}

pub async fn list_rooms(ctx: &ApiContext, actor: &Actor) -> Result<Vec<ChatRoomSummary>, ApiError> {
    ctx.storage
        .rooms_for_user(actor.tenant_id, actor.user_id)
        .await
        .map_err(internal)
}

pub async fn get_room(ctx: &ApiContext, actor: &Actor, room_id: RoomId) -> Result<ChatRoomSummary, ApiError> {
    member_room(ctx, actor, room_id).await?;
    summary_for(ctx, actor, room_id, actor.user_id).await
}

pub async fn list_room_members(
    ctx: &ApiContext,
    actor: &Actor,
    room_id: RoomId,
) -> Result<Vec<RoomMember>, ApiError> {
    member_room(ctx, actor, room_id).await?;
    list_members_unchecked(ctx, room_id).await
}

pub async fn add_room_member(
    ctx: &ApiContext,
    actor: &Actor,
    room_id: RoomId,
    user_id: UserId,
) -> Result<Vec<RoomMember>, ApiError> {
    let room = member_room(ctx, actor, room_id).await?;
    if room.is_direct {
        return Err(ApiError::validation("direct rooms have fixed members"));
    }
    active_tenant_user(ctx, actor, user_id).await?;
    let added = ctx
        .storage
        .add_room_member(room_id, user_id)
        .await
        .map_err(internal)?;
    if !added {
        return list_members_unchecked(ctx, room_id).await;
    }
    info!(tenant_id = actor.tenant_id.0, room_id = room_id.0, user_id = user_id.0, "room member added");
    publish_membership(ctx, actor, room_id, &[user_id]).await
}

/// Members may leave; the room creator and managers may remove anyone.
pub async fn remove_room_member(
    ctx: &ApiContext,
    actor: &Actor,
    room_id: RoomId,
    user_id: UserId,
) -> Result<Vec<RoomMember>, ApiError> {
    let room = tenant_room(ctx, actor, room_id).await?;
    let allowed = user_id == actor.user_id
        || room.created_by == actor.user_id
        || actor.role.is_manager();
    if !allowed {
        return Err(ApiError::forbidden(
            "only the room creator or a manager can remove members",
        ));
    }
    if room.is_direct {
        return Err(ApiError::validation("direct rooms have fixed members"));
    }
    let removed = ctx
        .storage
        .remove_room_member(room_id, user_id)
        .await
        .map_err(internal)?;
    if !removed {
        return Err(ApiError::not_found("user is not a member of this room"));
    }
    info!(tenant_id = actor.tenant_id.0, room_id = room_id.0, user_id = user_id.0, "room member removed");

    ctx.publish(Envelope::users(
        actor.tenant_id,
        vec![user_id],
        ServerEvent::RoomRemoved { room_id },
    ));
    publish_membership(ctx, actor, room_id, &[]).await
}

/// Checks that the actor may subscribe to a room's live events.
pub async fn join_room(ctx: &ApiContext, actor: &Actor, room_id: RoomId) -> Result<(), ApiError> {
    member_room(ctx, actor, room_id).await?;
    Ok(())
}

pub async fn send_message(
    ctx: &ApiContext,
    actor: &Actor,
    room_id: RoomId,
    request: &SendMessageRequest,
) -> Result<ChatMessagePayload, ApiError> {
    member_room(ctx, actor, room_id).await?;
    let attachment_ids: Vec<AttachmentId> = request
        .attachment_ids
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let body = validate_body(&request.body, !attachment_ids.is_empty())?;

    for &attachment_id in &attachment_ids {
        let claimable = ctx
            .storage
            .attachment(actor.tenant_id, attachment_id)
            .await
            .map_err(internal)?
            .is_some_and(|a| {
                a.room_id == room_id && a.uploader_id == actor.user_id && a.message_id.is_none()
            });
        if !claimable {
            return Err(ApiError::validation(format!(
                "attachment {} cannot be attached to this message",
                attachment_id.0
            )));
        }
    }

    let message_id = ctx
        .storage
        .insert_message(room_id, actor.user_id, &body, &attachment_ids)
        .await
        .map_err(internal)?;
    let message = message_payload(ctx, actor, message_id).await?;
    debug!(room_id = room_id.0, message_id = message_id.0, "chat message stored");

    ctx.publish(Envelope::room(
        actor.tenant_id,
        room_id,
        ServerEvent::MessageCreated {
            message: message.clone(),
            client_nonce: request.client_nonce.clone(),
        },
    ));
    // the sender is no longer typing once the message lands
    ctx.publish(
        Envelope::room(
            actor.tenant_id,
            room_id,
            ServerEvent::TypingStopped {
                room_id,
                user_id: actor.user_id,
            },
        )
        .excluding(actor.user_id),
    );
    Ok(message)
}

pub async fn list_messages(
    ctx: &ApiContext,
    actor: &Actor,
    room_id: RoomId,
    query: &MessageHistoryQuery,
) -> Result<MessagePage, ApiError> {
    member_room(ctx, actor, room_id).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let (messages, has_more) = ctx
        .storage
        .list_messages(room_id, query.before.map(MessageId), limit)
        .await
        .map_err(internal)?;
    Ok(MessagePage { messages, has_more })
}

pub async fn edit_message(
    ctx: &ApiContext,
    actor: &Actor,
    message_id: MessageId,
    request: &EditMessageRequest,
) -> Result<ChatMessagePayload, ApiError> {
    let message = visible_message(ctx, actor, message_id).await?;
    member_room(ctx, actor, message.room_id).await?;
    if message.sender_id != actor.user_id {
        return Err(ApiError::forbidden("only the sender can edit a message"));
    }
    let has_attachments = !message_payload(ctx, actor, message_id)
        .await?
        .attachments
        .is_empty();
    let body = validate_body(&request.body, has_attachments)?;

    ctx.storage
        .edit_message(message_id, &body)
        .await
        .map_err(internal)?;
    let updated = message_payload(ctx, actor, message_id).await?;
    ctx.publish(Envelope::room(
        actor.tenant_id,
        message.room_id,
        ServerEvent::MessageUpdated {
            message: updated.clone(),
        },
    ));
    Ok(updated)
}

pub async fn delete_message(ctx: &ApiContext, actor: &Actor, message_id: MessageId) -> Result<(), ApiError> {
    let message = visible_message(ctx, actor, message_id).await?;
    member_room(ctx, actor, message.room_id).await?;
    if message.sender_id != actor.user_id && !actor.role.is_manager() {
        return Err(ApiError::forbidden(
            "only the sender or a manager can delete a message",
        ));
    }
    ctx.storage
        .soft_delete_message(message_id)
        .await
        .map_err(internal)?;
    info!(
        tenant_id = actor.tenant_id.0,
        room_id = message.room_id.0,
        message_id = message_id.0,
        "chat message deleted"
    );
    ctx.publish(Envelope::room(
        actor.tenant_id,
        message.room_id,
        ServerEvent::MessageDeleted {
            room_id: message.room_id,
            message_id,
        },
    ));
    Ok(())
}

pub async fn toggle_reaction(
    ctx: &ApiContext,
    actor: &Actor,
    message_id: MessageId,
    request: &ToggleReactionRequest,
) -> Result<Vec<ReactionSummary>, ApiError> {
    let emoji = required_text("emoji", &request.emoji, MAX_EMOJI_CHARS)?;
    let message = visible_message(ctx, actor, message_id).await?;
    member_room(ctx, actor, message.room_id).await?;

    ctx.storage
        .toggle_reaction(message_id, actor.user_id, &emoji)
        .await
        .map_err(internal)?;
    let reactions = ctx
        .storage
        .reactions_for_message(message_id)
        .await
        .map_err(internal)?;
    ctx.publish(Envelope::room(
        actor.tenant_id,
        message.room_id,
        ServerEvent::ReactionsUpdated {
            room_id: message.room_id,
            message_id,
            reactions: reactions.clone(),
        },
    ));
    Ok(reactions)
}

/// Moves the actor's read marker forward to `message_id`. Returns the room
/// summary with the new unread count.
pub async fn mark_read(
    ctx: &ApiContext,
    actor: &Actor,
    room_id: RoomId,
    message_id: MessageId,
) -> Result<ChatRoomSummary, ApiError> {
    member_room(ctx, actor, room_id).await?;
    let in_room = ctx
        .storage
        .message(actor.tenant_id, message_id)
        .await
        .map_err(internal)?
        .is_some_and(|message| message.room_id == room_id);
    if !in_room {
        return Err(ApiError::not_found("message not found in this room"));
    }

    let moved = ctx
        .storage
        .mark_read(room_id, actor.user_id, message_id)
        .await
        .map_err(internal)?;
    let room = summary_for(ctx, actor, room_id, actor.user_id).await?;
    if moved {
        ctx.publish(Envelope::users(
            actor.tenant_id,
            vec![actor.user_id],
            ServerEvent::RoomUpdated { room: room.clone() },
        ));
    }
    Ok(room)
}

pub async fn start_typing(ctx: &ApiContext, actor: &Actor, room_id: RoomId) -> Result<(), ApiError> {
    member_room(ctx, actor, room_id).await?;
    let user = active_tenant_user(ctx, actor, actor.user_id).await?;
    ctx.publish(
        Envelope::room(
            actor.tenant_id,
            room_id,
            ServerEvent::TypingStarted {
                room_id,
                user_id: actor.user_id,
                display_name: user.display_name,
                expires_in_ms: TYPING_INDICATOR_TTL_MS,
            },
        )
        .excluding(actor.user_id),
    );
    Ok(())
}

pub async fn stop_typing(ctx: &ApiContext, actor: &Actor, room_id: RoomId) -> Result<(), ApiError> {
    member_room(ctx, actor, room_id).await?;
    ctx.publish(
        Envelope::room(
            actor.tenant_id,
            room_id,
            ServerEvent::TypingStopped {
                room_id,
                user_id: actor.user_id,
            },
        )
        .excluding(actor.user_id),
    );
    Ok(())
}

fn validate_filename(filename: Option<&str>) -> Result<String, ApiError> {
    let filename = filename.map(str::trim).unwrap_or_default();
    if filename.is_empty() {
        return Ok(DEFAULT_FILENAME.to_string());
    }
    let invalid = filename.len() > MAX_FILENAME_BYTES
        || filename == "."
        || filename == ".."
        || filename.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if invalid {
        return Err(ApiError::validation(format!(
            "filename must be at most {MAX_FILENAME_BYTES} bytes without path separators"
        )));
    }
    Ok(filename.to_string())
}

pub async fn upload_attachment(
    ctx: &ApiContext,
    actor: &Actor,
    room_id: RoomId,
    filename: Option<&str>,
    mime_type: Option<&str>,
    content: &[u8],
) -> Result<AttachmentPayload, ApiError> {
    member_room(ctx, actor, room_id).await?;
    if content.is_empty() {
        return Err(ApiError::validation("attachment must not be empty"));
    }
    if content.len() > ctx.max_attachment_bytes {
        return Err(ApiError::new(
            ErrorCode::PayloadTooLarge,
            format!("attachment exceeds {} bytes", ctx.max_attachment_bytes),
        ));
    }
    let filename = validate_filename(filename)?;
    let mime_type = mime_type.map(str::trim).filter(|mime| !mime.is_empty());
    if mime_type.is_some_and(|mime| mime.len() > 100) {
        return Err(ApiError::validation("mime type is too long"));
    }

    let attachment_id = ctx
        .storage
        .create_attachment(NewAttachment {
            room_id,
            uploader_id: actor.user_id,
            filename: &filename,
            mime_type,
            content,
        })
        .await
        .map_err(internal)?;
    info!(
        tenant_id = actor.tenant_id.0,
        room_id = room_id.0,
        attachment_id = attachment_id.0,
        size = content.len(),
        "attachment uploaded"
    );
    Ok(AttachmentPayload {
        attachment_id,
        filename,
        size_bytes: content.len() as u64,
        mime_type: mime_type.map(str::to_string),
    })
}

pub async fn download_attachment(
    ctx: &ApiContext,
    actor: &Actor,
    attachment_id: AttachmentId,
) -> Result<(StoredAttachment, Vec<u8>), ApiError> {
    let attachment = ctx
        .storage
        .attachment(actor.tenant_id, attachment_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("attachment not found"))?;
    member_room(ctx, actor, attachment.room_id).await?;
    let content = ctx
        .storage
        .attachment_content(attachment_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("attachment not found"))?;
    Ok((attachment, content))
}

#[cfg(test)]
#[path = "tests/chat_tests.rs"]
mod tests;
