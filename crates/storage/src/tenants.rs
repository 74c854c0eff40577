use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use shared::{
    account::{TenantSummary, UserSummary},
    domain::{Plan, Role, TenantId, UserId},
};
use sqlx::{sqlite::SqliteRow, Row};

use crate::{non_negative, Storage, DEFAULT_STATUSES};

#[derive(Debug, Clone)]
pub struct StoredTenant {
    pub tenant_id: TenantId,
    pub name: String,
    pub slug: String,
}

impl StoredTenant {
    pub fn summary(&self) -> TenantSummary {
        TenantSummary {
            tenant_id: self.tenant_id,
            name: self.name.clone(),
            slug: self.slug.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub deactivated: bool,
}

impl StoredUser {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            user_id: self.user_id,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
            deactivated: self.deactivated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteRedemption {
    Redeemed(UserId),
    AlreadyUsed,
    NoSeatsLeft,
}

#[derive(Debug, Clone)]
pub struct StoredInvite {
    pub code: String,
    pub tenant_id: TenantId,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

const USER_COLUMNS: &str = "id, tenant_id, username, display_name, role, deactivated";

/// Holds when another active owner remains besides the row being updated.
const OTHER_ACTIVE_OWNER: &str = "EXISTS (SELECT 1 FROM users AS other \
     WHERE other.tenant_id = users.tenant_id AND other.id != users.id \
     AND other.role = 'owner' AND other.deactivated = 0)";

fn user_from_row(r: &SqliteRow) -> StoredUser {
    StoredUser {
        user_id: UserId(r.get::<i64, _>(0)),
        tenant_id: TenantId(r.get::<i64, _>(1)),
        username: r.get::<String, _>(2),
        display_name: r.get::<String, _>(3),
        role: Role::from_db(&r.get::<String, _>(4)),
        deactivated: r.get::<bool, _>(5),
    }
}

fn tenant_from_row(r: &SqliteRow) -> StoredTenant {
    StoredTenant {
        tenant_id: TenantId(r.get::<i64, _>(0)),
        name: r.get::<String, _>(1),
        slug: r.get::<String, _>(2),
    }
}

impl Storage {
    /// Creates a tenant together with its owner, the default board statuses
    /// and a free subscription.
    pub async fn bootstrap_tenant(
        &self,
        name: &str,
        slug: &str,
        owner_username: &str,
        owner_display_name: &str,
    ) -> Result<(TenantId, UserId)> {
        let mut tx = self.pool.begin().await?;

        let tenant_id: i64 =
            sqlx::query_scalar("INSERT INTO tenants (name, slug) VALUES (?, ?) RETURNING id")
                .bind(name)
                .bind(slug)
                .fetch_one(&mut *tx)
                .await
                .context("failed to insert tenant")?;

        let user_id: i64 = sqlx::query_scalar(
            "INSERT INTO users (tenant_id, username, display_name, role) VALUES (?, ?, ?, 'owner') RETURNING id",
        )
        .bind(tenant_id)
        .bind(owner_username)
        .bind(owner_display_name)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert tenant owner")?;

        for (position, (status_name, color, is_done)) in DEFAULT_STATUSES.iter().enumerate() {
            sqlx::query(
                "INSERT INTO statuses (tenant_id, name, color, position, is_done) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(tenant_id)
            .bind(*status_name)
            .bind(*color)
            .bind(position as i64)
            .bind(*is_done)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("INSERT INTO subscriptions (tenant_id, plan, state, seats) VALUES (?, ?, 'active', ?)")
            .bind(tenant_id)
            .bind(Plan::Free.as_str())
            .bind(Plan::Free.max_seats())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((TenantId(tenant_id), UserId(user_id)))
    }

    pub async fn tenant(&self, tenant_id: TenantId) -> Result<Option<StoredTenant>> {
        let row = sqlx::query("SELECT id, name, slug FROM tenants WHERE id = ?")
            .bind(tenant_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(tenant_from_row))
    }

    pub async fn tenant_by_slug(&self, slug: &str) -> Result<Option<StoredTenant>> {
        let row = sqlx::query("SELECT id, name, slug FROM tenants WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(tenant_from_row))
    }

    pub async fn list_tenants(&self) -> Result<Vec<StoredTenant>> {
        let rows = sqlx::query("SELECT id, name, slug FROM tenants ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(tenant_from_row).collect())
    }

    pub async fn create_user(
        &self,
        tenant_id: TenantId,
        username: &str,
        display_name: &str,
        role: Role,
    ) -> Result<UserId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (tenant_id, username, display_name, role) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(username)
        .bind(display_name)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to insert user '{username}'"))?;
        Ok(UserId(id))
    }

    pub async fn user(&self, tenant_id: TenantId, user_id: UserId) -> Result<Option<StoredUser>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE tenant_id = ? AND id = ?"
        ))
        .bind(tenant_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn user_by_username(
        &self,
        tenant_id: TenantId,
        username: &str,
    ) -> Result<Option<StoredUser>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE tenant_id = ? AND username = ?"
        ))
        .bind(tenant_id.0)
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn list_users(&self, tenant_id: TenantId) -> Result<Vec<StoredUser>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE tenant_id = ? ORDER BY lower(display_name) ASC, id ASC"
        ))
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    pub async fn count_active_users(&self, tenant_id: TenantId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE tenant_id = ? AND deactivated = 0",
        )
        .bind(tenant_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(non_negative(count))
    }

    pub async fn count_active_owners(&self, tenant_id: TenantId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE tenant_id = ? AND deactivated = 0 AND role = 'owner'",
        )
        .bind(tenant_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(non_negative(count))
    }

    pub async fn set_user_role(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        role: Role,
    ) -> Result<bool> {
        let updated = sqlx::query(&format!(
            "UPDATE users SET role = ? WHERE tenant_id = ? AND id = ? \
             AND (? = 'owner' OR role != 'owner' OR deactivated = 1 OR {OTHER_ACTIVE_OWNER})"
        ))
        .bind(role.as_str())
        .bind(tenant_id.0)
        .bind(user_id.0)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn set_display_name(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        display_name: &str,
    ) -> Result<bool> {
        let updated =
            sqlx::query("UPDATE users SET display_name = ? WHERE tenant_id = ? AND id = ?")
                .bind(display_name)
                .bind(tenant_id.0)
                .bind(user_id.0)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(updated > 0)
    }

    /// Flags the user as deactivated and drops their team memberships. Chat
    /// history and check-ins keep referencing the user.
    pub async fn deactivate_user(&self, tenant_id: TenantId, user_id: UserId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(&format!(
            "UPDATE users SET deactivated = 1 WHERE tenant_id = ? AND id = ? AND deactivated = 0 \
             AND (role != 'owner' OR {OTHER_ACTIVE_OWNER})"
        ))
        .bind(tenant_id.0)
        .bind(user_id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Ok(false);
        }
        sqlx::query("DELETE FROM team_members WHERE user_id = ?")
            .bind(user_id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    pub async fn create_invite(
        &self,
        tenant_id: TenantId,
        code: &str,
        role: Role,
        created_by: UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO invites (code, tenant_id, role, created_by, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(code)
        .bind(tenant_id.0)
        .bind(role.as_str())
        .bind(created_by.0)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn invite(&self, code: &str) -> Result<Option<StoredInvite>> {
        let row = sqlx::query(
            "SELECT code, tenant_id, role, expires_at, consumed_at IS NOT NULL FROM invites WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredInvite {
            code: r.get::<String, _>(0),
            tenant_id: TenantId(r.get::<i64, _>(1)),
            role: Role::from_db(&r.get::<String, _>(2)),
            expires_at: r.get::<DateTime<Utc>, _>(3),
            consumed: r.get::<bool, _>(4),
        }))
    }

    /// Marks the invite consumed and creates the invited user in one
    /// transaction. The seat count is checked by the insert itself, so
    /// concurrent redemptions cannot overrun the subscription.
    pub async fn redeem_invite(
        &self,
        invite: &StoredInvite,
        username: &str,
        display_name: &str,
    ) -> Result<InviteRedemption> {
        let mut tx = self.pool.begin().await?;
        let consumed = sqlx::query(
            "UPDATE invites SET consumed_at = CURRENT_TIMESTAMP WHERE code = ? AND consumed_at IS NULL",
        )
        .bind(&invite.code)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if consumed == 0 {
            return Ok(InviteRedemption::AlreadyUsed);
        }

        let user_id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO users (tenant_id, username, display_name, role)
             SELECT ?, ?, ?, ?
             WHERE (SELECT COUNT(*) FROM users WHERE tenant_id = ? AND deactivated = 0)
                 < (SELECT seats FROM subscriptions WHERE tenant_id = ?)
             RETURNING id",
        )
        .bind(invite.tenant_id.0)
        .bind(username)
        .bind(display_name)
        .bind(invite.role.as_str())
        .bind(invite.tenant_id.0)
        .bind(invite.tenant_id.0)
        .fetch_optional(&mut *tx)
        .await
        .with_context(|| format!("failed to insert invited user '{username}'"))?;

        // dropping the transaction rolls back the consumed invite
        let Some(user_id) = user_id else {
            return Ok(InviteRedemption::NoSeatsLeft);
        };
        tx.commit().await?;
        Ok(InviteRedemption::Redeemed(UserId(user_id)))
    }
}
