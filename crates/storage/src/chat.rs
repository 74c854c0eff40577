use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use shared::{
    domain::{AttachmentId, MessageId, RoomId, TenantId, UserId},
    protocol::{AttachmentPayload, ChatMessagePayload, ChatRoomSummary, ReactionSummary, RoomMember},
};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite};

use crate::{non_negative, Storage};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRoom {
    pub room_id: RoomId,
    pub tenant_id: TenantId,
    pub name: String,
    pub is_direct: bool,
    pub created_by: UserId,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub body: String,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct StoredAttachment {
    pub attachment_id: AttachmentId,
    pub room_id: RoomId,
    pub message_id: Option<MessageId>,
    pub uploader_id: UserId,
    pub filename: String,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
}

impl StoredAttachment {
    pub fn payload(&self) -> AttachmentPayload {
        AttachmentPayload {
            attachment_id: self.attachment_id,
            filename: self.filename.clone(),
            size_bytes: self.size_bytes,
            mime_type: self.mime_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NewAttachment<'a> {
    pub room_id: RoomId,
    pub uploader_id: UserId,
    pub filename: &'a str,
    pub mime_type: Option<&'a str>,
    pub content: &'a [u8],
}

const MESSAGE_SELECT: &str = "SELECT m.id, m.room_id, m.sender_user_id, u.display_name, m.body, \
     m.deleted, m.created_at, m.edited_at \
     FROM chat_messages m \
     INNER JOIN users u ON u.id = m.sender_user_id \
     INNER JOIN chat_rooms r ON r.id = m.room_id";

const ROOM_SUMMARY_SELECT: &str = "SELECT r.id, r.name, r.is_direct, r.created_by, \
     (SELECT COUNT(*) FROM chat_room_members x WHERE x.room_id = r.id), \
     (SELECT COUNT(*) FROM chat_messages m \
        WHERE m.room_id = r.id AND m.deleted = 0 AND m.sender_user_id != ? \
          AND m.id > COALESCE(crm.last_read_message_id, 0)), \
     (SELECT MAX(m.created_at) FROM chat_messages m WHERE m.room_id = r.id AND m.deleted = 0), \
     (SELECT MAX(m.id) FROM chat_messages m WHERE m.room_id = r.id AND m.deleted = 0) AS last_message_id \
     FROM chat_rooms r";

fn message_from_row(r: &SqliteRow) -> StoredMessage {
    StoredMessage {
        message_id: MessageId(r.get::<i64, _>(0)),
        room_id: RoomId(r.get::<i64, _>(1)),
        sender_id: UserId(r.get::<i64, _>(2)),
        sender_name: r.get::<String, _>(3),
        body: r.get::<String, _>(4),
        deleted: r.get::<bool, _>(5),
        created_at: r.get::<DateTime<Utc>, _>(6),
        edited_at: r.get::<Option<DateTime<Utc>>, _>(7),
    }
}

fn room_summary_from_row(r: &SqliteRow) -> ChatRoomSummary {
    ChatRoomSummary {
        room_id: RoomId(r.get::<i64, _>(0)),
        name: r.get::<String, _>(1),
        is_direct: r.get::<bool, _>(2),
        created_by: UserId(r.get::<i64, _>(3)),
        member_count: non_negative(r.get::<i64, _>(4)),
        unread_count: non_negative(r.get::<i64, _>(5)),
        last_message_at: r.get::<Option<DateTime<Utc>>, _>(6),
    }
}

fn attachment_from_row(r: &SqliteRow) -> StoredAttachment {
    StoredAttachment {
        attachment_id: AttachmentId(r.get::<i64, _>(0)),
        room_id: RoomId(r.get::<i64, _>(1)),
        message_id: r.get::<Option<i64>, _>(2).map(MessageId),
        uploader_id: UserId(r.get::<i64, _>(3)),
        filename: r.get::<String, _>(4),
        mime_type: r.get::<Option<String>, _>(5),
        size_bytes: u64::try_from(r.get::<i64, _>(6)).unwrap_or_default(),
    }
}

impl Storage {
    /// Creates a room with `created_by` and `member_ids` as members.
    pub async fn create_room(
        &self,
        tenant_id: TenantId,
        name: &str,
        is_direct: bool,
        created_by: UserId,
        member_ids: &[UserId],
    ) -> Result<RoomId> {
        let mut tx = self.pool.begin().await?;
        let room_id: i64 = sqlx::query_scalar(
            "INSERT INTO chat_rooms (tenant_id, name, is_direct, created_by) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(name)
        .bind(is_direct)
        .bind(created_by.0)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert chat room")?;

        for user_id in std::iter::once(&created_by).chain(member_ids) {
            sqlx::query("INSERT OR IGNORE INTO chat_room_members (room_id, user_id) VALUES (?, ?)")
                .bind(room_id)
                .bind(user_id.0)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(RoomId(room_id))
    }

    pub async fn room(&self, tenant_id: TenantId, room_id: RoomId) -> Result<Option<StoredRoom>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, is_direct, created_by FROM chat_rooms WHERE tenant_id = ? AND id = ?",
        )
        .bind(tenant_id.0)
        .bind(room_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredRoom {
            room_id: RoomId(r.get::<i64, _>(0)),
            tenant_id: TenantId(r.get::<i64, _>(1)),
            name: r.get::<String, _>(2),
            is_direct: r.get::<bool, _>(3),
            created_by: UserId(r.get::<i64, _>(4)),
        }))
    }

    pub async fn room_by_name(&self, tenant_id: TenantId, name: &str) -> Result<Option<RoomId>> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM chat_rooms WHERE tenant_id = ? AND name = ? AND is_direct = 0 ORDER BY id ASC LIMIT 1",
        )
        .bind(tenant_id.0)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id.map(RoomId))
    }

    pub async fn direct_room_between(
        &self,
        tenant_id: TenantId,
        first: UserId,
        second: UserId,
    ) -> Result<Option<RoomId>> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT r.id FROM chat_rooms r
             INNER JOIN chat_room_members a ON a.room_id = r.id AND a.user_id = ?
             INNER JOIN chat_room_members b ON b.room_id = r.id AND b.user_id = ?
             WHERE r.tenant_id = ? AND r.is_direct = 1
             ORDER BY r.id ASC
             LIMIT 1",
        )
        .bind(first.0)
        .bind(second.0)
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id.map(RoomId))
    }

    /// Rooms `user_id` belongs to, most recent activity first.
    pub async fn rooms_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Vec<ChatRoomSummary>> {
        let rows = sqlx::query(&format!(
            "{ROOM_SUMMARY_SELECT}
             INNER JOIN chat_room_members crm ON crm.room_id = r.id AND crm.user_id = ?
             WHERE r.tenant_id = ?
             ORDER BY COALESCE(last_message_id, 0) DESC, r.id DESC"
        ))
        .bind(user_id.0)
        .bind(user_id.0)
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(room_summary_from_row).collect())
    }

    /// Summary of one room as seen by `viewer`. The unread count is relative
    /// to the viewer's read marker.
    pub async fn room_summary(
        &self,
        tenant_id: TenantId,
        room_id: RoomId,
        viewer: UserId,
    ) -> Result<Option<ChatRoomSummary>> {
        let row = sqlx::query(&format!(
            "{ROOM_SUMMARY_SELECT}
             LEFT JOIN chat_room_members crm ON crm.room_id = r.id AND crm.user_id = ?
             WHERE r.tenant_id = ? AND r.id = ?"
        ))
        .bind(viewer.0)
        .bind(viewer.0)
        .bind(tenant_id.0)
        .bind(room_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(room_summary_from_row))
    }

    pub async fn is_room_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM chat_room_members WHERE room_id = ? AND user_id = ?",
        )
        .bind(room_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    pub async fn room_member_ids(&self, room_id: RoomId) -> Result<Vec<UserId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM chat_room_members WHERE room_id = ? ORDER BY user_id ASC",
        )
        .bind(room_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(UserId).collect())
    }

    pub async fn list_room_members(&self, room_id: RoomId) -> Result<Vec<RoomMember>> {
        let rows = sqlx::query(
            "SELECT crm.user_id, u.display_name, crm.last_read_message_id
             FROM chat_room_members crm
             INNER JOIN users u ON u.id = crm.user_id
             WHERE crm.room_id = ?
             ORDER BY lower(u.display_name) ASC, crm.user_id ASC",
        )
        .bind(room_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| RoomMember {
                user_id: UserId(r.get::<i64, _>(0)),
                display_name: r.get::<String, _>(1),
                last_read_message_id: r.get::<Option<i64>, _>(2).map(MessageId),
            })
            .collect())
    }

    /// Returns `false` when the user was already a member.
    pub async fn add_room_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool> {
        let inserted =
            sqlx::query("INSERT OR IGNORE INTO chat_room_members (room_id, user_id) VALUES (?, ?)")
                .bind(room_id.0)
                .bind(user_id.0)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(inserted > 0)
    }

    pub async fn remove_room_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM chat_room_members WHERE room_id = ? AND user_id = ?")
            .bind(room_id.0)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    /// Inserts a message and claims the given uploads for it.
    pub async fn insert_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        body: &str,
        attachment_ids: &[AttachmentId],
    ) -> Result<MessageId> {
        let mut tx = self.pool.begin().await?;
        let message_id: i64 = sqlx::query_scalar(
            "INSERT INTO chat_messages (room_id, sender_user_id, body) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(room_id.0)
        .bind(sender_id.0)
        .bind(body)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert chat message")?;

        for attachment_id in attachment_ids {
            let claimed = sqlx::query(
                "UPDATE chat_attachments SET message_id = ?
                 WHERE id = ? AND room_id = ? AND uploader_user_id = ? AND message_id IS NULL",
            )
            .bind(message_id)
            .bind(attachment_id.0)
            .bind(room_id.0)
            .bind(sender_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if claimed == 0 {
                anyhow::bail!("attachment {} is no longer claimable", attachment_id.0);
            }
        }

        tx.commit().await?;
        Ok(MessageId(message_id))
    }

    /// Looks up a message, including soft-deleted ones.
    pub async fn message(
        &self,
        tenant_id: TenantId,
        message_id: MessageId,
    ) -> Result<Option<StoredMessage>> {
        let row = sqlx::query(&format!("{MESSAGE_SELECT} WHERE r.tenant_id = ? AND m.id = ?"))
            .bind(tenant_id.0)
            .bind(message_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(message_from_row))
    }

    pub async fn message_payload(
        &self,
        tenant_id: TenantId,
        message_id: MessageId,
    ) -> Result<Option<ChatMessagePayload>> {
        let Some(message) = self.message(tenant_id, message_id).await? else {
            return Ok(None);
        };
        if message.deleted {
            return Ok(None);
        }
        Ok(self.hydrate_messages(vec![message]).await?.pop())
    }

    /// One page of visible history ending before `before`, ascending by id.
    /// The flag is set when older messages remain.
    pub async fn list_messages(
        &self,
        room_id: RoomId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<(Vec<ChatMessagePayload>, bool)> {
        let rows = sqlx::query(&format!(
            "{MESSAGE_SELECT}
             WHERE m.room_id = ? AND m.deleted = 0 AND (? IS NULL OR m.id < ?)
             ORDER BY m.id DESC
             LIMIT ?"
        ))
        .bind(room_id.0)
        .bind(before.map(|id| id.0))
        .bind(before.map(|id| id.0))
        .bind(i64::from(limit) + 1)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<StoredMessage> = rows.iter().map(message_from_row).collect();
        let has_more = messages.len() > limit as usize;
        messages.truncate(limit as usize);
        messages.reverse();
        Ok((self.hydrate_messages(messages).await?, has_more))
    }

    pub async fn edit_message(&self, message_id: MessageId, body: &str) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE chat_messages SET body = ?, edited_at = CURRENT_TIMESTAMP WHERE id = ? AND deleted = 0",
        )
        .bind(body)
        .bind(message_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn soft_delete_message(&self, message_id: MessageId) -> Result<bool> {
        let updated =
            sqlx::query("UPDATE chat_messages SET deleted = 1 WHERE id = ? AND deleted = 0")
                .bind(message_id.0)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(updated > 0)
    }

    /// Adds the reaction, or removes it if the user already reacted with the
    /// same emoji. Returns `true` when the reaction is now present.
    pub async fn toggle_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query(
            "DELETE FROM chat_reactions WHERE message_id = ? AND user_id = ? AND emoji = ?",
        )
        .bind(message_id.0)
        .bind(user_id.0)
        .bind(emoji)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if removed == 0 {
            sqlx::query("INSERT INTO chat_reactions (message_id, user_id, emoji) VALUES (?, ?, ?)")
                .bind(message_id.0)
                .bind(user_id.0)
                .bind(emoji)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(removed == 0)
    }

    pub async fn reactions_for_message(&self, message_id: MessageId) -> Result<Vec<ReactionSummary>> {
        let mut grouped = self.reactions_for_messages(&[message_id]).await?;
        Ok(grouped.remove(&message_id).unwrap_or_default())
    }

    /// Moves the read marker forward. Older markers are ignored.
    pub async fn mark_read(
        &self,
        room_id: RoomId,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE chat_room_members SET last_read_message_id = ?
             WHERE room_id = ? AND user_id = ?
               AND (last_read_message_id IS NULL OR last_read_message_id < ?)",
        )
        .bind(message_id.0)
        .bind(room_id.0)
        .bind(user_id.0)
        .bind(message_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn create_attachment(&self, attachment: NewAttachment<'_>) -> Result<AttachmentId> {
        let size_bytes = i64::try_from(attachment.content.len()).unwrap_or(i64::MAX);
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO chat_attachments (room_id, uploader_user_id, filename, mime_type, size_bytes, content)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(attachment.room_id.0)
        .bind(attachment.uploader_id.0)
        .bind(attachment.filename)
        .bind(attachment.mime_type)
        .bind(size_bytes)
        .bind(attachment.content)
        .fetch_one(&self.pool)
        .await?;
        Ok(AttachmentId(id))
    }

    pub async fn attachment(
        &self,
        tenant_id: TenantId,
        attachment_id: AttachmentId,
    ) -> Result<Option<StoredAttachment>> {
        let row = sqlx::query(
            "SELECT a.id, a.room_id, a.message_id, a.uploader_user_id, a.filename, a.mime_type, a.size_bytes
             FROM chat_attachments a
             INNER JOIN chat_rooms r ON r.id = a.room_id
             WHERE r.tenant_id = ? AND a.id = ?",
        )
        .bind(tenant_id.0)
        .bind(attachment_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(attachment_from_row))
    }

    pub async fn attachment_content(&self, attachment_id: AttachmentId) -> Result<Option<Vec<u8>>> {
        let content: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT content FROM chat_attachments WHERE id = ?")
                .bind(attachment_id.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(content)
    }

    async fn hydrate_messages(&self, messages: Vec<StoredMessage>) -> Result<Vec<ChatMessagePayload>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<MessageId> = messages.iter().map(|m| m.message_id).collect();
        let mut attachments = self.attachments_for_messages(&ids).await?;
        let mut reactions = self.reactions_for_messages(&ids).await?;

        Ok(messages
            .into_iter()
            .map(|m| ChatMessagePayload {
                attachments: attachments.remove(&m.message_id).unwrap_or_default(),
                reactions: reactions.remove(&m.message_id).unwrap_or_default(),
                message_id: m.message_id,
                room_id: m.room_id,
                sender_id: m.sender_id,
                sender_name: m.sender_name,
                body: m.body,
                created_at: m.created_at,
                edited_at: m.edited_at,
            })
            .collect())
    }

    async fn attachments_for_messages(
        &self,
        message_ids: &[MessageId],
    ) -> Result<HashMap<MessageId, Vec<AttachmentPayload>>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT id, room_id, message_id, uploader_user_id, filename, mime_type, size_bytes
             FROM chat_attachments WHERE message_id IN (",
        );
        let mut separated = query.separated(", ");
        for id in message_ids {
            separated.push_bind(id.0);
        }
        separated.push_unseparated(") ORDER BY id ASC");

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut grouped: HashMap<MessageId, Vec<AttachmentPayload>> = HashMap::new();
        for row in &rows {
            let attachment = attachment_from_row(row);
            if let Some(message_id) = attachment.message_id {
                grouped.entry(message_id).or_default().push(attachment.payload());
            }
        }
        Ok(grouped)
    }

    /// Reaction summaries per message, each list ordered by the first use of
    /// the emoji.
    async fn reactions_for_messages(
        &self,
        message_ids: &[MessageId],
    ) -> Result<HashMap<MessageId, Vec<ReactionSummary>>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT message_id, emoji, user_id FROM chat_reactions WHERE message_id IN (",
        );
        let mut separated = query.separated(", ");
        for id in message_ids {
            separated.push_bind(id.0);
        }
        separated.push_unseparated(") ORDER BY message_id ASC, rowid ASC");

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut grouped: HashMap<MessageId, Vec<ReactionSummary>> = HashMap::new();
        for row in rows {
            let message_id = MessageId(row.get::<i64, _>(0));
            let emoji = row.get::<String, _>(1);
            let user_id = UserId(row.get::<i64, _>(2));
            let summaries = grouped.entry(message_id).or_default();
            match summaries.iter_mut().find(|s| s.emoji == emoji) {
                Some(summary) => {
                    summary.count += 1;
                    summary.user_ids.push(user_id);
                }
                None => summaries.push(ReactionSummary {
                    emoji,
                    count: 1,
                    user_ids: vec![user_id],
                }),
            }
        }
        Ok(grouped)
    }
}
