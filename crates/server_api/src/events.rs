use std::collections::HashSet;

use shared::{
    domain::{RoomId, TenantId, UserId},
    protocol::ServerEvent,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Tenant,
    /// Only sockets that joined the room.
    Room(RoomId),
    Users(Vec<UserId>),
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub tenant_id: TenantId,
    pub audience: Audience,
    pub exclude_user: Option<UserId>,
    pub event: ServerEvent,
}

impl Envelope {
    pub fn tenant(tenant_id: TenantId, event: ServerEvent) -> Self {
        Self {
            tenant_id,
            audience: Audience::Tenant,
            exclude_user: None,
            event,
        }
    }

    pub fn room(tenant_id: TenantId, room_id: RoomId, event: ServerEvent) -> Self {
        Self {
            tenant_id,
            audience: Audience::Room(room_id),
            exclude_user: None,
            event,
        }
    }

    pub fn users(tenant_id: TenantId, user_ids: Vec<UserId>, event: ServerEvent) -> Self {
        Self {
            tenant_id,
            audience: Audience::Users(user_ids),
            exclude_user: None,
            event,
        }
    }

    pub fn excluding(mut self, user_id: UserId) -> Self {
        self.exclude_user = Some(user_id);
        self
    }

    /// Whether a socket of `user_id` in `tenant_id` that joined
    /// `joined_rooms` should receive this envelope.
    pub fn delivers_to(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        joined_rooms: &HashSet<RoomId>,
    ) -> bool {
        if self.tenant_id != tenant_id || self.exclude_user == Some(user_id) {
            return false;
        }
        match &self.audience {
            Audience::Tenant => true,
            Audience::Room(room_id) => joined_rooms.contains(room_id),
            Audience::Users(user_ids) => user_ids.contains(&user_id),
        }
    }
}
