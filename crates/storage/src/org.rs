use std::collections::HashMap;

use anyhow::Result;
use chrono::NaiveDate;
use shared::{
    domain::{CadenceId, StatusId, TeamId, TenantId, TimeframeId, UserId},
    okr::{CadenceSummary, StatusSummary, TeamSummary, TimeframeSummary},
};
use sqlx::{sqlite::SqliteRow, Row};

use crate::{non_negative, Storage};

fn timeframe_from_row(r: &SqliteRow) -> TimeframeSummary {
    TimeframeSummary {
        timeframe_id: TimeframeId(r.get::<i64, _>(0)),
        cadence_id: r.get::<Option<i64>, _>(1).map(CadenceId),
        name: r.get::<String, _>(2),
        starts_on: r.get::<NaiveDate, _>(3),
        ends_on: r.get::<NaiveDate, _>(4),
    }
}

fn status_from_row(r: &SqliteRow) -> StatusSummary {
    StatusSummary {
        status_id: StatusId(r.get::<i64, _>(0)),
        name: r.get::<String, _>(1),
        color: r.get::<String, _>(2),
        position: non_negative(r.get::<i64, _>(3)),
        is_done: r.get::<bool, _>(4),
    }
}

impl Storage {
    pub async fn create_team(
        &self,
        tenant_id: TenantId,
        name: &str,
        description: Option<&str>,
    ) -> Result<TeamId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO teams (tenant_id, name, description) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;
        Ok(TeamId(id))
    }

    pub async fn list_teams(&self, tenant_id: TenantId) -> Result<Vec<TeamSummary>> {
        let rows = sqlx::query(
            "SELECT id, name, description FROM teams WHERE tenant_id = ? ORDER BY lower(name) ASC",
        )
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await?;

        let member_rows = sqlx::query(
            "SELECT tm.team_id, tm.user_id
             FROM team_members tm
             INNER JOIN teams t ON t.id = tm.team_id
             WHERE t.tenant_id = ?
             ORDER BY tm.user_id ASC",
        )
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await?;
        let mut members: HashMap<i64, Vec<UserId>> = HashMap::new();
        for r in member_rows {
            members
                .entry(r.get::<i64, _>(0))
                .or_default()
                .push(UserId(r.get::<i64, _>(1)));
        }

        Ok(rows
            .into_iter()
            .map(|r| {
                let id = r.get::<i64, _>(0);
                TeamSummary {
                    team_id: TeamId(id),
                    name: r.get::<String, _>(1),
                    description: r.get::<Option<String>, _>(2),
                    member_ids: members.remove(&id).unwrap_or_default(),
                }
            })
            .collect())
    }

    pub async fn team(&self, tenant_id: TenantId, team_id: TeamId) -> Result<Option<TeamSummary>> {
        let row = sqlx::query("SELECT id, name, description FROM teams WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id.0)
            .bind(team_id.0)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let member_ids = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM team_members WHERE team_id = ? ORDER BY user_id ASC",
        )
        .bind(team_id.0)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(UserId)
        .collect();

        Ok(Some(TeamSummary {
            team_id: TeamId(row.get::<i64, _>(0)),
            name: row.get::<String, _>(1),
            description: row.get::<Option<String>, _>(2),
            member_ids,
        }))
    }

    pub async fn update_team(
        &self,
        tenant_id: TenantId,
        team_id: TeamId,
        name: &str,
        description: Option<&str>,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE teams SET name = ?, description = ? WHERE tenant_id = ? AND id = ?",
        )
        .bind(name)
        .bind(description)
        .bind(tenant_id.0)
        .bind(team_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn delete_team(&self, tenant_id: TenantId, team_id: TeamId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM teams WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id.0)
            .bind(team_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    pub async fn add_team_member(&self, team_id: TeamId, user_id: UserId) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO team_members (team_id, user_id) VALUES (?, ?)")
            .bind(team_id.0)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_team_member(&self, team_id: TeamId, user_id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM team_members WHERE team_id = ? AND user_id = ?")
            .bind(team_id.0)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn create_cadence(
        &self,
        tenant_id: TenantId,
        name: &str,
        period_months: u32,
    ) -> Result<CadenceId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO cadences (tenant_id, name, period_months) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(name)
        .bind(period_months)
        .fetch_one(&self.pool)
        .await?;
        Ok(CadenceId(id))
    }

    pub async fn list_cadences(&self, tenant_id: TenantId) -> Result<Vec<CadenceSummary>> {
        let rows = sqlx::query(
            "SELECT id, name, period_months FROM cadences WHERE tenant_id = ? ORDER BY id ASC",
        )
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| CadenceSummary {
                cadence_id: CadenceId(r.get::<i64, _>(0)),
                name: r.get::<String, _>(1),
                period_months: non_negative(r.get::<i64, _>(2)),
            })
            .collect())
    }

    pub async fn cadence(
        &self,
        tenant_id: TenantId,
        cadence_id: CadenceId,
    ) -> Result<Option<CadenceSummary>> {
        let row = sqlx::query(
            "SELECT id, name, period_months FROM cadences WHERE tenant_id = ? AND id = ?",
        )
        .bind(tenant_id.0)
        .bind(cadence_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| CadenceSummary {
            cadence_id: CadenceId(r.get::<i64, _>(0)),
            name: r.get::<String, _>(1),
            period_months: non_negative(r.get::<i64, _>(2)),
        }))
    }

    pub async fn delete_cadence(&self, tenant_id: TenantId, cadence_id: CadenceId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM cadences WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id.0)
            .bind(cadence_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    pub async fn create_timeframe(
        &self,
        tenant_id: TenantId,
        cadence_id: Option<CadenceId>,
        name: &str,
        starts_on: NaiveDate,
        ends_on: NaiveDate,
    ) -> Result<TimeframeId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO timeframes (tenant_id, cadence_id, name, starts_on, ends_on) VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(cadence_id.map(|id| id.0))
        .bind(name)
        .bind(starts_on)
        .bind(ends_on)
        .fetch_one(&self.pool)
        .await?;
        Ok(TimeframeId(id))
    }

    pub async fn list_timeframes(&self, tenant_id: TenantId) -> Result<Vec<TimeframeSummary>> {
        let rows = sqlx::query(
            "SELECT id, cadence_id, name, starts_on, ends_on
             FROM timeframes
             WHERE tenant_id = ?
             ORDER BY starts_on ASC, id ASC",
        )
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(timeframe_from_row).collect())
    }

    pub async fn timeframe(
        &self,
        tenant_id: TenantId,
        timeframe_id: TimeframeId,
    ) -> Result<Option<TimeframeSummary>> {
        let row = sqlx::query(
            "SELECT id, cadence_id, name, starts_on, ends_on FROM timeframes WHERE tenant_id = ? AND id = ?",
        )
        .bind(tenant_id.0)
        .bind(timeframe_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(timeframe_from_row))
    }

    pub async fn update_timeframe(
        &self,
        tenant_id: TenantId,
        timeframe: &TimeframeSummary,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE timeframes SET name = ?, starts_on = ?, ends_on = ? WHERE tenant_id = ? AND id = ?",
        )
        .bind(&timeframe.name)
        .bind(timeframe.starts_on)
        .bind(timeframe.ends_on)
        .bind(tenant_id.0)
        .bind(timeframe.timeframe_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn delete_timeframe(
        &self,
        tenant_id: TenantId,
        timeframe_id: TimeframeId,
    ) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM timeframes WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id.0)
            .bind(timeframe_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    pub async fn list_statuses(&self, tenant_id: TenantId) -> Result<Vec<StatusSummary>> {
        let rows = sqlx::query(
            "SELECT id, name, color, position, is_done FROM statuses WHERE tenant_id = ? ORDER BY position ASC, id ASC",
        )
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(status_from_row).collect())
    }

    pub async fn status(
        &self,
        tenant_id: TenantId,
        status_id: StatusId,
    ) -> Result<Option<StatusSummary>> {
        let row = sqlx::query(
            "SELECT id, name, color, position, is_done FROM statuses WHERE tenant_id = ? AND id = ?",
        )
        .bind(tenant_id.0)
        .bind(status_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(status_from_row))
    }

    pub async fn create_status(
        &self,
        tenant_id: TenantId,
        name: &str,
        color: &str,
        is_done: bool,
    ) -> Result<StatusId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO statuses (tenant_id, name, color, position, is_done)
             VALUES (?, ?, ?, (SELECT COALESCE(MAX(position), -1) + 1 FROM statuses WHERE tenant_id = ?), ?)
             RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(name)
        .bind(color)
        .bind(tenant_id.0)
        .bind(is_done)
        .fetch_one(&self.pool)
        .await?;
        Ok(StatusId(id))
    }

    pub async fn update_status(&self, tenant_id: TenantId, status: &StatusSummary) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE statuses SET name = ?, color = ?, is_done = ? WHERE tenant_id = ? AND id = ?",
        )
        .bind(&status.name)
        .bind(&status.color)
        .bind(status.is_done)
        .bind(tenant_id.0)
        .bind(status.status_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn count_objectives_with_status(&self, status_id: StatusId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM objectives WHERE status_id = ?")
            .bind(status_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(non_negative(count))
    }

    /// Deletes the status and closes the gap it leaves in the column order.
    pub async fn delete_status(&self, tenant_id: TenantId, status_id: StatusId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let position: Option<i64> =
            sqlx::query_scalar("SELECT position FROM statuses WHERE tenant_id = ? AND id = ?")
                .bind(tenant_id.0)
                .bind(status_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(position) = position else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM statuses WHERE id = ?")
            .bind(status_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE statuses SET position = position - 1 WHERE tenant_id = ? AND position > ?")
            .bind(tenant_id.0)
            .bind(position)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Rewrites status positions to follow `ordered_ids`. The caller checks
    /// that the ids are a permutation of the tenant's statuses.
    pub async fn reorder_statuses(&self, tenant_id: TenantId, ordered_ids: &[StatusId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (position, status_id) in ordered_ids.iter().enumerate() {
            sqlx::query("UPDATE statuses SET position = ? WHERE tenant_id = ? AND id = ?")
                .bind(position as i64)
                .bind(tenant_id.0)
                .bind(status_id.0)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
