use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use shared::{
    domain::{
        CheckInId, Confidence, KeyResultId, MetricType, ObjectiveId, StatusId, TeamId,
        TemplateId, TenantId, TimeframeId, UserId,
    },
    okr::{CheckInSummary, KeyResultSummary, KeyResultTemplate, ObjectiveSummary, TemplateSummary},
    progress::key_result_progress,
};
use sqlx::{sqlite::SqliteRow, Row};

use crate::{non_negative, Storage};

#[derive(Debug, Clone)]
pub struct NewObjective {
    pub title: String,
    pub description: Option<String>,
    pub team_id: Option<TeamId>,
    pub timeframe_id: Option<TimeframeId>,
    pub owner_id: Option<UserId>,
    pub parent_id: Option<ObjectiveId>,
    pub status_id: Option<StatusId>,
}

#[derive(Debug, Clone)]
pub struct NewKeyResult {
    pub objective_id: ObjectiveId,
    pub owner_id: Option<UserId>,
    pub title: String,
    pub metric_type: MetricType,
    pub start_value: f64,
    pub target_value: f64,
    pub unit: Option<String>,
    pub weight: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectiveListFilter {
    pub team_id: Option<TeamId>,
    pub timeframe_id: Option<TimeframeId>,
    pub status_id: Option<StatusId>,
    pub owner_id: Option<UserId>,
}

const OBJECTIVE_COLUMNS: &str = "id, title, description, team_id, timeframe_id, owner_user_id, \
     parent_objective_id, status_id, position, progress, created_at, updated_at";

const KEY_RESULT_COLUMNS: &str = "id, objective_id, owner_user_id, title, metric_type, \
     start_value, target_value, current_value, unit, weight, position, updated_at";

const CHECK_IN_SELECT: &str = "SELECT c.id, c.objective_id, c.key_result_id, c.author_user_id, \
     u.display_name, c.previous_value, c.new_value, c.confidence, c.note, c.created_at \
     FROM check_ins c INNER JOIN users u ON u.id = c.author_user_id";

fn objective_from_row(r: &SqliteRow) -> ObjectiveSummary {
    ObjectiveSummary {
        objective_id: ObjectiveId(r.get::<i64, _>(0)),
        title: r.get::<String, _>(1),
        description: r.get::<Option<String>, _>(2),
        team_id: r.get::<Option<i64>, _>(3).map(TeamId),
        timeframe_id: r.get::<Option<i64>, _>(4).map(TimeframeId),
        owner_id: r.get::<Option<i64>, _>(5).map(UserId),
        parent_id: r.get::<Option<i64>, _>(6).map(ObjectiveId),
        status_id: r.get::<Option<i64>, _>(7).map(StatusId),
        position: non_negative(r.get::<i64, _>(8)),
        progress: r.get::<f64, _>(9),
        created_at: r.get::<DateTime<Utc>, _>(10),
        updated_at: r.get::<DateTime<Utc>, _>(11),
    }
}

fn key_result_from_row(r: &SqliteRow) -> KeyResultSummary {
    let metric_type = MetricType::from_db(&r.get::<String, _>(4));
    let start_value = r.get::<f64, _>(5);
    let target_value = r.get::<f64, _>(6);
    let current_value = r.get::<f64, _>(7);
    KeyResultSummary {
        key_result_id: KeyResultId(r.get::<i64, _>(0)),
        objective_id: ObjectiveId(r.get::<i64, _>(1)),
        owner_id: r.get::<Option<i64>, _>(2).map(UserId),
        title: r.get::<String, _>(3),
        metric_type,
        start_value,
        target_value,
        current_value,
        unit: r.get::<Option<String>, _>(8),
        weight: r.get::<f64, _>(9),
        position: non_negative(r.get::<i64, _>(10)),
        progress: key_result_progress(metric_type, start_value, target_value, current_value),
        updated_at: r.get::<DateTime<Utc>, _>(11),
    }
}

fn check_in_from_row(r: &SqliteRow) -> CheckInSummary {
    CheckInSummary {
        check_in_id: CheckInId(r.get::<i64, _>(0)),
        objective_id: ObjectiveId(r.get::<i64, _>(1)),
        key_result_id: r.get::<Option<i64>, _>(2).map(KeyResultId),
        author_id: UserId(r.get::<i64, _>(3)),
        author_name: r.get::<String, _>(4),
        previous_value: r.get::<Option<f64>, _>(5),
        new_value: r.get::<Option<f64>, _>(6),
        confidence: Confidence::from_db(&r.get::<String, _>(7)),
        note: r.get::<Option<String>, _>(8),
        created_at: r.get::<DateTime<Utc>, _>(9),
    }
}

/// SQLite `CURRENT_TIMESTAMP` text layout, for comparisons against stored
/// timestamps.
fn sqlite_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

impl Storage {
    /// Inserts the objective at the end of its status column.
    pub async fn create_objective(
        &self,
        tenant_id: TenantId,
        objective: &NewObjective,
    ) -> Result<ObjectiveId> {
        let status_id = objective.status_id.map(|id| id.0);
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO objectives
                (tenant_id, team_id, timeframe_id, owner_user_id, parent_objective_id, status_id, title, description, position)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?,
                (SELECT COALESCE(MAX(position), -1) + 1 FROM objectives WHERE tenant_id = ? AND status_id IS ?))
             RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(objective.team_id.map(|id| id.0))
        .bind(objective.timeframe_id.map(|id| id.0))
        .bind(objective.owner_id.map(|id| id.0))
        .bind(objective.parent_id.map(|id| id.0))
        .bind(status_id)
        .bind(&objective.title)
        .bind(&objective.description)
        .bind(tenant_id.0)
        .bind(status_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert objective")?;
        Ok(ObjectiveId(id))
    }

    pub async fn objective(
        &self,
        tenant_id: TenantId,
        objective_id: ObjectiveId,
    ) -> Result<Option<ObjectiveSummary>> {
        let row = sqlx::query(&format!(
            "SELECT {OBJECTIVE_COLUMNS} FROM objectives WHERE tenant_id = ? AND id = ?"
        ))
        .bind(tenant_id.0)
        .bind(objective_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(objective_from_row))
    }

    /// Lists objectives ordered by column position. Unset filter fields
    /// match everything.
    pub async fn list_objectives(
        &self,
        tenant_id: TenantId,
        filter: &ObjectiveListFilter,
    ) -> Result<Vec<ObjectiveSummary>> {
        let team_id = filter.team_id.map(|id| id.0);
        let timeframe_id = filter.timeframe_id.map(|id| id.0);
        let status_id = filter.status_id.map(|id| id.0);
        let owner_id = filter.owner_id.map(|id| id.0);
        let rows = sqlx::query(&format!(
            "SELECT {OBJECTIVE_COLUMNS} FROM objectives
             WHERE tenant_id = ?
               AND (? IS NULL OR team_id = ?)
               AND (? IS NULL OR timeframe_id = ?)
               AND (? IS NULL OR status_id = ?)
               AND (? IS NULL OR owner_user_id = ?)
             ORDER BY position ASC, id ASC"
        ))
        .bind(tenant_id.0)
        .bind(team_id)
        .bind(team_id)
        .bind(timeframe_id)
        .bind(timeframe_id)
        .bind(status_id)
        .bind(status_id)
        .bind(owner_id)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(objective_from_row).collect())
    }

    /// Persists the editable fields of an objective. Status and position only
    /// change through [`Storage::move_objective`].
    pub async fn update_objective(
        &self,
        tenant_id: TenantId,
        objective: &ObjectiveSummary,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE objectives
             SET title = ?, description = ?, team_id = ?, timeframe_id = ?, owner_user_id = ?,
                 parent_objective_id = ?, updated_at = CURRENT_TIMESTAMP
             WHERE tenant_id = ? AND id = ?",
        )
        .bind(&objective.title)
        .bind(&objective.description)
        .bind(objective.team_id.map(|id| id.0))
        .bind(objective.timeframe_id.map(|id| id.0))
        .bind(objective.owner_id.map(|id| id.0))
        .bind(objective.parent_id.map(|id| id.0))
        .bind(tenant_id.0)
        .bind(objective.objective_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    /// Deletes an objective. Its children move up to its parent and the gap
    /// it leaves in its status column is closed.
    pub async fn delete_objective(
        &self,
        tenant_id: TenantId,
        objective_id: ObjectiveId,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT parent_objective_id, status_id, position FROM objectives WHERE tenant_id = ? AND id = ?",
        )
        .bind(tenant_id.0)
        .bind(objective_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let parent_id = row.get::<Option<i64>, _>(0);
        let status_id = row.get::<Option<i64>, _>(1);
        let position = row.get::<i64, _>(2);

        sqlx::query(
            "UPDATE objectives SET parent_objective_id = ?, updated_at = CURRENT_TIMESTAMP
             WHERE tenant_id = ? AND parent_objective_id = ?",
        )
        .bind(parent_id)
        .bind(tenant_id.0)
        .bind(objective_id.0)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM objectives WHERE id = ?")
            .bind(objective_id.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE objectives SET position = position - 1
             WHERE tenant_id = ? AND status_id IS ? AND position > ?",
        )
        .bind(tenant_id.0)
        .bind(status_id)
        .bind(position)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// `None` when the objective does not exist in the tenant.
    pub async fn objective_parent(
        &self,
        tenant_id: TenantId,
        objective_id: ObjectiveId,
    ) -> Result<Option<Option<ObjectiveId>>> {
        let parent: Option<Option<i64>> = sqlx::query_scalar(
            "SELECT parent_objective_id FROM objectives WHERE tenant_id = ? AND id = ?",
        )
        .bind(tenant_id.0)
        .bind(objective_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(parent.map(|parent| parent.map(ObjectiveId)))
    }

    pub async fn child_objective_ids(
        &self,
        tenant_id: TenantId,
        objective_id: ObjectiveId,
    ) -> Result<Vec<ObjectiveId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM objectives WHERE tenant_id = ? AND parent_objective_id = ? ORDER BY position ASC, id ASC",
        )
        .bind(tenant_id.0)
        .bind(objective_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(ObjectiveId).collect())
    }

    pub async fn child_objective_progress(
        &self,
        tenant_id: TenantId,
        objective_id: ObjectiveId,
    ) -> Result<Vec<f64>> {
        let values = sqlx::query_scalar::<_, f64>(
            "SELECT progress FROM objectives WHERE tenant_id = ? AND parent_objective_id = ?",
        )
        .bind(tenant_id.0)
        .bind(objective_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(values)
    }

    pub async fn set_objective_progress(
        &self,
        tenant_id: TenantId,
        objective_id: ObjectiveId,
        progress: f64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE objectives SET progress = ?, updated_at = CURRENT_TIMESTAMP WHERE tenant_id = ? AND id = ?",
        )
        .bind(progress)
        .bind(tenant_id.0)
        .bind(objective_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Moves a card to `position` in the `status_id` column. The position is
    /// clamped to the column length and both columns keep dense positions.
    /// Returns the stored position, or `None` if the objective is unknown.
    pub async fn move_objective(
        &self,
        tenant_id: TenantId,
        objective_id: ObjectiveId,
        status_id: StatusId,
        position: u32,
    ) -> Result<Option<u32>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status_id, position FROM objectives WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id.0)
            .bind(objective_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let old_status = row.get::<Option<i64>, _>(0);
        let old_position = row.get::<i64, _>(1);

        sqlx::query(
            "UPDATE objectives SET position = position - 1
             WHERE tenant_id = ? AND status_id IS ? AND position > ? AND id != ?",
        )
        .bind(tenant_id.0)
        .bind(old_status)
        .bind(old_position)
        .bind(objective_id.0)
        .execute(&mut *tx)
        .await?;

        let column_len: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM objectives WHERE tenant_id = ? AND status_id = ? AND id != ?",
        )
        .bind(tenant_id.0)
        .bind(status_id.0)
        .bind(objective_id.0)
        .fetch_one(&mut *tx)
        .await?;
        let target = i64::from(position).min(column_len);

        sqlx::query(
            "UPDATE objectives SET position = position + 1
             WHERE tenant_id = ? AND status_id = ? AND position >= ? AND id != ?",
        )
        .bind(tenant_id.0)
        .bind(status_id.0)
        .bind(target)
        .bind(objective_id.0)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE objectives SET status_id = ?, position = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(status_id.0)
        .bind(target)
        .bind(objective_id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(non_negative(target)))
    }

    pub async fn create_key_result(
        &self,
        tenant_id: TenantId,
        key_result: &NewKeyResult,
    ) -> Result<KeyResultId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO key_results
                (tenant_id, objective_id, owner_user_id, title, metric_type, start_value, target_value,
                 current_value, unit, weight, position)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                (SELECT COALESCE(MAX(position), -1) + 1 FROM key_results WHERE objective_id = ?))
             RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(key_result.objective_id.0)
        .bind(key_result.owner_id.map(|id| id.0))
        .bind(&key_result.title)
        .bind(key_result.metric_type.as_str())
        .bind(key_result.start_value)
        .bind(key_result.target_value)
        .bind(key_result.start_value)
        .bind(&key_result.unit)
        .bind(key_result.weight)
        .bind(key_result.objective_id.0)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert key result")?;
        Ok(KeyResultId(id))
    }

    pub async fn key_result(
        &self,
        tenant_id: TenantId,
        key_result_id: KeyResultId,
    ) -> Result<Option<KeyResultSummary>> {
        let row = sqlx::query(&format!(
            "SELECT {KEY_RESULT_COLUMNS} FROM key_results WHERE tenant_id = ? AND id = ?"
        ))
        .bind(tenant_id.0)
        .bind(key_result_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(key_result_from_row))
    }

    pub async fn list_key_results(
        &self,
        tenant_id: TenantId,
        objective_id: ObjectiveId,
    ) -> Result<Vec<KeyResultSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {KEY_RESULT_COLUMNS} FROM key_results
             WHERE tenant_id = ? AND objective_id = ?
             ORDER BY position ASC, id ASC"
        ))
        .bind(tenant_id.0)
        .bind(objective_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(key_result_from_row).collect())
    }

    pub async fn update_key_result(
        &self,
        tenant_id: TenantId,
        key_result: &KeyResultSummary,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE key_results
             SET title = ?, start_value = ?, target_value = ?, weight = ?, unit = ?, owner_user_id = ?,
                 updated_at = CURRENT_TIMESTAMP
             WHERE tenant_id = ? AND id = ?",
        )
        .bind(&key_result.title)
        .bind(key_result.start_value)
        .bind(key_result.target_value)
        .bind(key_result.weight)
        .bind(&key_result.unit)
        .bind(key_result.owner_id.map(|id| id.0))
        .bind(tenant_id.0)
        .bind(key_result.key_result_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn delete_key_result(
        &self,
        tenant_id: TenantId,
        key_result_id: KeyResultId,
    ) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM key_results WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id.0)
            .bind(key_result_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    /// Stores the new current value and the check-in that records it.
    pub async fn record_key_result_check_in(
        &self,
        tenant_id: TenantId,
        key_result_id: KeyResultId,
        author_id: UserId,
        value: f64,
        confidence: Confidence,
        note: Option<&str>,
    ) -> Result<Option<CheckInId>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT objective_id, current_value FROM key_results WHERE tenant_id = ? AND id = ?",
        )
        .bind(tenant_id.0)
        .bind(key_result_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let objective_id = row.get::<i64, _>(0);
        let previous_value = row.get::<f64, _>(1);

        sqlx::query(
            "UPDATE key_results SET current_value = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(value)
        .bind(key_result_id.0)
        .execute(&mut *tx)
        .await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO check_ins
                (tenant_id, objective_id, key_result_id, author_user_id, previous_value, new_value, confidence, note)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(objective_id)
        .bind(key_result_id.0)
        .bind(author_id.0)
        .bind(previous_value)
        .bind(value)
        .bind(confidence.as_str())
        .bind(note)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(CheckInId(id)))
    }

    pub async fn record_objective_check_in(
        &self,
        tenant_id: TenantId,
        objective_id: ObjectiveId,
        author_id: UserId,
        confidence: Confidence,
        note: Option<&str>,
    ) -> Result<CheckInId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO check_ins (tenant_id, objective_id, author_user_id, confidence, note)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(objective_id.0)
        .bind(author_id.0)
        .bind(confidence.as_str())
        .bind(note)
        .fetch_one(&self.pool)
        .await?;
        Ok(CheckInId(id))
    }

    pub async fn check_in(
        &self,
        tenant_id: TenantId,
        check_in_id: CheckInId,
    ) -> Result<Option<CheckInSummary>> {
        let row = sqlx::query(&format!("{CHECK_IN_SELECT} WHERE c.tenant_id = ? AND c.id = ?"))
            .bind(tenant_id.0)
            .bind(check_in_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(check_in_from_row))
    }

    pub async fn objective_check_ins(
        &self,
        tenant_id: TenantId,
        objective_id: ObjectiveId,
    ) -> Result<Vec<CheckInSummary>> {
        let rows = sqlx::query(&format!(
            "{CHECK_IN_SELECT} WHERE c.tenant_id = ? AND c.objective_id = ? ORDER BY c.id DESC"
        ))
        .bind(tenant_id.0)
        .bind(objective_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(check_in_from_row).collect())
    }

    pub async fn key_result_check_ins(
        &self,
        tenant_id: TenantId,
        key_result_id: KeyResultId,
    ) -> Result<Vec<CheckInSummary>> {
        let rows = sqlx::query(&format!(
            "{CHECK_IN_SELECT} WHERE c.tenant_id = ? AND c.key_result_id = ? ORDER BY c.id DESC"
        ))
        .bind(tenant_id.0)
        .bind(key_result_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(check_in_from_row).collect())
    }

    pub async fn recent_check_ins(
        &self,
        tenant_id: TenantId,
        limit: u32,
    ) -> Result<Vec<CheckInSummary>> {
        let rows = sqlx::query(&format!(
            "{CHECK_IN_SELECT} WHERE c.tenant_id = ? ORDER BY c.id DESC LIMIT ?"
        ))
        .bind(tenant_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(check_in_from_row).collect())
    }

    pub async fn count_check_ins_since(
        &self,
        tenant_id: TenantId,
        since: DateTime<Utc>,
    ) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM check_ins WHERE tenant_id = ? AND created_at >= ?",
        )
        .bind(tenant_id.0)
        .bind(sqlite_timestamp(since))
        .fetch_one(&self.pool)
        .await?;
        Ok(non_negative(count))
    }

    pub async fn create_template(
        &self,
        tenant_id: TenantId,
        name: &str,
        description: Option<&str>,
        objective_title: &str,
        key_results: &[KeyResultTemplate],
    ) -> Result<TemplateId> {
        let key_results =
            serde_json::to_string(key_results).context("failed to encode template key results")?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO templates (tenant_id, name, description, objective_title, key_results)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(name)
        .bind(description)
        .bind(objective_title)
        .bind(key_results)
        .fetch_one(&self.pool)
        .await?;
        Ok(TemplateId(id))
    }

    pub async fn list_templates(&self, tenant_id: TenantId) -> Result<Vec<TemplateSummary>> {
        let rows = sqlx::query(
            "SELECT id, name, description, objective_title, key_results
             FROM templates WHERE tenant_id = ? ORDER BY lower(name) ASC, id ASC",
        )
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(template_from_row).collect()
    }

    pub async fn template(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
    ) -> Result<Option<TemplateSummary>> {
        let row = sqlx::query(
            "SELECT id, name, description, objective_title, key_results
             FROM templates WHERE tenant_id = ? AND id = ?",
        )
        .bind(tenant_id.0)
        .bind(template_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(template_from_row).transpose()
    }

    pub async fn delete_template(&self, tenant_id: TenantId, template_id: TemplateId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM templates WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id.0)
            .bind(template_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}

fn template_from_row(r: &SqliteRow) -> Result<TemplateSummary> {
    let template_id = r.get::<i64, _>(0);
    let key_results = serde_json::from_str(&r.get::<String, _>(4))
        .with_context(|| format!("template {template_id} has malformed key results"))?;
    Ok(TemplateSummary {
        template_id: TemplateId(template_id),
        name: r.get::<String, _>(1),
        description: r.get::<Option<String>, _>(2),
        objective_title: r.get::<String, _>(3),
        key_results,
    })
}
