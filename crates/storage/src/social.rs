use anyhow::Result;
use chrono::{DateTime, Utc};
use shared::{
    domain::{BadgeId, FeedbackId, ObjectiveId, TenantId, UserId},
    okr::{BadgeSummary, FeedbackSummary},
};
use sqlx::{sqlite::SqliteRow, Row};

use crate::Storage;

const FEEDBACK_SELECT: &str = "SELECT f.id, f.from_user_id, u.display_name, f.to_user_id, f.message, \
     f.objective_id, f.created_at, b.id, b.name, b.description, b.icon \
     FROM feedback f \
     INNER JOIN users u ON u.id = f.from_user_id \
     LEFT JOIN badges b ON b.id = f.badge_id";

fn badge_from_row(r: &SqliteRow) -> BadgeSummary {
    BadgeSummary {
        badge_id: BadgeId(r.get::<i64, _>(0)),
        name: r.get::<String, _>(1),
        description: r.get::<Option<String>, _>(2),
        icon: r.get::<String, _>(3),
    }
}

fn feedback_from_row(r: &SqliteRow) -> FeedbackSummary {
    let badge = r.get::<Option<i64>, _>(7).map(|badge_id| BadgeSummary {
        badge_id: BadgeId(badge_id),
        name: r.get::<String, _>(8),
        description: r.get::<Option<String>, _>(9),
        icon: r.get::<String, _>(10),
    });
    FeedbackSummary {
        feedback_id: FeedbackId(r.get::<i64, _>(0)),
        from_user_id: UserId(r.get::<i64, _>(1)),
        from_name: r.get::<String, _>(2),
        to_user_id: UserId(r.get::<i64, _>(3)),
        message: r.get::<String, _>(4),
        badge,
        objective_id: r.get::<Option<i64>, _>(5).map(ObjectiveId),
        created_at: r.get::<DateTime<Utc>, _>(6),
    }
}

impl Storage {
    pub async fn create_badge(
        &self,
        tenant_id: TenantId,
        name: &str,
        description: Option<&str>,
        icon: &str,
    ) -> Result<BadgeId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO badges (tenant_id, name, description, icon) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(name)
        .bind(description)
        .bind(icon)
        .fetch_one(&self.pool)
        .await?;
        Ok(BadgeId(id))
    }

    pub async fn list_badges(&self, tenant_id: TenantId) -> Result<Vec<BadgeSummary>> {
        let rows = sqlx::query(
            "SELECT id, name, description, icon FROM badges WHERE tenant_id = ? ORDER BY id ASC",
        )
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(badge_from_row).collect())
    }

    pub async fn badge(&self, tenant_id: TenantId, badge_id: BadgeId) -> Result<Option<BadgeSummary>> {
        let row = sqlx::query(
            "SELECT id, name, description, icon FROM badges WHERE tenant_id = ? AND id = ?",
        )
        .bind(tenant_id.0)
        .bind(badge_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(badge_from_row))
    }

    pub async fn create_feedback(
        &self,
        tenant_id: TenantId,
        from_user_id: UserId,
        to_user_id: UserId,
        message: &str,
        badge_id: Option<BadgeId>,
        objective_id: Option<ObjectiveId>,
    ) -> Result<FeedbackId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO feedback (tenant_id, from_user_id, to_user_id, message, badge_id, objective_id)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(from_user_id.0)
        .bind(to_user_id.0)
        .bind(message)
        .bind(badge_id.map(|id| id.0))
        .bind(objective_id.map(|id| id.0))
        .fetch_one(&self.pool)
        .await?;
        Ok(FeedbackId(id))
    }

    pub async fn feedback(
        &self,
        tenant_id: TenantId,
        feedback_id: FeedbackId,
    ) -> Result<Option<FeedbackSummary>> {
        let row = sqlx::query(&format!("{FEEDBACK_SELECT} WHERE f.tenant_id = ? AND f.id = ?"))
            .bind(tenant_id.0)
            .bind(feedback_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(feedback_from_row))
    }

    /// Feedback received by `user_id`, newest first.
    pub async fn feedback_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Vec<FeedbackSummary>> {
        let rows = sqlx::query(&format!(
            "{FEEDBACK_SELECT} WHERE f.tenant_id = ? AND f.to_user_id = ? ORDER BY f.id DESC"
        ))
        .bind(tenant_id.0)
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(feedback_from_row).collect())
    }
}
