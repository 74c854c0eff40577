use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use shared::{
    account::SubscriptionSummary,
    domain::{Plan, SubscriptionState, TenantId},
};
use sqlx::Row;

use crate::{non_negative, Storage};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredSubscription {
    pub tenant_id: TenantId,
    pub plan: Plan,
    pub state: SubscriptionState,
    pub seats: u32,
    pub pending_payment_id: Option<String>,
    pub pending_plan: Option<Plan>,
    pub pending_seats: Option<u32>,
    pub current_period_end: Option<DateTime<Utc>>,
}

impl StoredSubscription {
    pub fn summary(&self, seats_used: u32) -> SubscriptionSummary {
        SubscriptionSummary {
            plan: self.plan,
            state: self.state,
            seats: self.seats,
            seats_used,
            pending_plan: self.pending_plan,
            pending_seats: self.pending_seats,
            current_period_end: self.current_period_end,
        }
    }
}

impl Storage {
    pub async fn subscription(&self, tenant_id: TenantId) -> Result<StoredSubscription> {
        let row = sqlx::query(
            "SELECT plan, state, seats, pending_payment_id, pending_plan, pending_seats, current_period_end
             FROM subscriptions WHERE tenant_id = ?",
        )
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| anyhow!("tenant {} has no subscription row", tenant_id.0))?;

        Ok(StoredSubscription {
            tenant_id,
            plan: Plan::from_db(&row.get::<String, _>(0)),
            state: SubscriptionState::from_db(&row.get::<String, _>(1)),
            seats: non_negative(row.get::<i64, _>(2)),
            pending_payment_id: row.get::<Option<String>, _>(3),
            pending_plan: row.get::<Option<String>, _>(4).as_deref().map(Plan::from_db),
            pending_seats: row.get::<Option<i64>, _>(5).map(non_negative),
            current_period_end: row.get::<Option<DateTime<Utc>>, _>(6),
        })
    }

    /// Overwrites every subscription column with `subscription`.
    pub async fn save_subscription(&self, subscription: &StoredSubscription) -> Result<()> {
        sqlx::query(
            "UPDATE subscriptions
             SET plan = ?, state = ?, seats = ?, pending_payment_id = ?, pending_plan = ?,
                 pending_seats = ?, current_period_end = ?, updated_at = CURRENT_TIMESTAMP
             WHERE tenant_id = ?",
        )
        .bind(subscription.plan.as_str())
        .bind(subscription.state.as_str())
        .bind(subscription.seats)
        .bind(&subscription.pending_payment_id)
        .bind(subscription.pending_plan.map(Plan::as_str))
        .bind(subscription.pending_seats)
        .bind(subscription.current_period_end)
        .bind(subscription.tenant_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
