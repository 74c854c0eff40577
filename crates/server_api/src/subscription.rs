use std::collections::BTreeMap;

use billing::{BillingError, PaymentRequest, PaymentStatus};
use chrono::{Duration, Utc};
use shared::{
    account::{CheckoutRequest, CheckoutResponse, PlanSummary, SubscriptionSummary},
    domain::{Plan, SubscriptionState, TenantId},
    error::{ApiError, ErrorCode},
    protocol::ServerEvent,
};
use storage::StoredSubscription;
use tracing::{info, warn};

use crate::{internal, Actor, ApiContext, Envelope};

pub const BILLING_PERIOD_DAYS: i64 = 30;

fn upstream(err: BillingError) -> ApiError {
    warn!(error = %err, "payment provider call failed");
    ApiError::new(ErrorCode::Upstream, err.to_string())
}

pub fn plans() -> Vec<PlanSummary> {
    Plan::ALL
        .iter()
        .map(|&plan| PlanSummary {
            plan,
            max_seats: plan.max_seats(),
            price_per_seat_cents: plan.price_per_seat_cents(),
        })
        .collect()
}

async fn load(ctx: &ApiContext, tenant_id: TenantId) -> Result<(StoredSubscription, u32), ApiError> {
    let subscription = ctx
        .storage
        .subscription(tenant_id)
        .await
        .map_err(internal)?;
    let seats_used = ctx
        .storage
        .count_active_users(tenant_id)
        .await
        .map_err(internal)?;
    Ok((subscription, seats_used))
}

async fn save_and_publish(
    ctx: &ApiContext,
    subscription: &StoredSubscription,
    seats_used: u32,
) -> Result<SubscriptionSummary, ApiError> {
    ctx.storage
        .save_subscription(subscription)
        .await
        .map_err(internal)?;
    let summary = subscription.summary(seats_used);
    ctx.publish(Envelope::tenant(
        subscription.tenant_id,
        ServerEvent::SubscriptionUpdated {
            subscription: summary.clone(),
        },
    ));
    Ok(summary)
}

fn clear_pending(subscription: &mut StoredSubscription) {
    subscription.pending_payment_id = None;
    subscription.pending_plan = None;
    subscription.pending_seats = None;
}

pub async fn subscription(ctx: &ApiContext, actor: &Actor) -> Result<SubscriptionSummary, ApiError> {
    let (subscription, seats_used) = load(ctx, actor.tenant_id).await?;
    Ok(subscription.summary(seats_used))
}

/// Fails with `forbidden` once every paid-for seat is held by an active user.
pub(crate) async fn ensure_seat_available(ctx: &ApiContext, tenant_id: TenantId) -> Result<(), ApiError> {
    let (subscription, seats_used) = load(ctx, tenant_id).await?;
    if seats_used >= subscription.seats {
        return Err(ApiError::forbidden(format!(
            "all {} seats of the subscription are in use",
            subscription.seats
        )));
    }
    Ok(())
}

pub async fn checkout(
    ctx: &ApiContext,
    actor: &Actor,
    request: &CheckoutRequest,
) -> Result<CheckoutResponse, ApiError> {
    actor.require_owner()?;
    let (mut subscription, seats_used) = load(ctx, actor.tenant_id).await?;
    let max_seats = request.plan.max_seats();
    if request.seats == 0 || request.seats > max_seats {
        return Err(ApiError::validation(format!(
            "the {} plan allows 1 to {max_seats} seats",
            request.plan.as_str()
        )));
    }
    if request.seats < seats_used {
        return Err(ApiError::validation(format!(
            "{seats_used} active users need at least as many seats"
        )));
    }

    if request.plan == Plan::Free {
        clear_pending(&mut subscription);
        subscription.plan = Plan::Free;
        subscription.state = SubscriptionState::Active;
        subscription.seats = request.seats;
        subscription.current_period_end = None;
        let summary = save_and_publish(ctx, &subscription, seats_used).await?;
        info!(tenant_id = actor.tenant_id.0, "switched to free plan");
        return Ok(CheckoutResponse {
            subscription: summary,
            client_secret: None,
        });
    }

    let metadata = BTreeMap::from([
        ("tenant_id".to_string(), actor.tenant_id.0.to_string()),
        ("plan".to_string(), request.plan.as_str().to_string()),
        ("seats".to_string(), request.seats.to_string()),
    ]);
    let intent = ctx
        .payments
        .create_payment(PaymentRequest {
            amount_cents: request.plan.price_per_seat_cents() * u64::from(request.seats),
            currency: ctx.currency.clone(),
            description: format!("{} plan, {} seats", request.plan.as_str(), request.seats),
            metadata,
        })
        .await
        .map_err(upstream)?;
    info!(
        tenant_id = actor.tenant_id.0,
        provider = ctx.payments.name(),
        payment_id = %intent.id,
        plan = request.plan.as_str(),
        seats = request.seats,
        "checkout started"
    );

    subscription.state = SubscriptionState::Pending;
    subscription.pending_payment_id = Some(intent.id);
    subscription.pending_plan = Some(request.plan);
    subscription.pending_seats = Some(request.seats);
    let summary = save_and_publish(ctx, &subscription, seats_used).await?;
    Ok(CheckoutResponse {
        subscription: summary,
        client_secret: intent.client_secret,
    })
}

/// Polls the provider for the pending payment and settles the subscription.
pub async fn confirm_checkout(ctx: &ApiContext, actor: &Actor) -> Result<SubscriptionSummary, ApiError> {
    actor.require_owner()?;
    let (mut subscription, seats_used) = load(ctx, actor.tenant_id).await?;
    let Some(payment_id) = subscription.pending_payment_id.clone() else {
        return Err(ApiError::validation("no checkout is in progress"));
    };

    let status = ctx
        .payments
        .payment_status(&payment_id)
        .await
        .map_err(upstream)?;
    info!(tenant_id = actor.tenant_id.0, %payment_id, ?status, "checkout confirmation");

    match status {
        PaymentStatus::Succeeded => {
            if let Some(plan) = subscription.pending_plan {
                subscription.plan = plan;
            }
            if let Some(seats) = subscription.pending_seats {
                subscription.seats = seats;
            }
            subscription.state = SubscriptionState::Active;
            subscription.current_period_end = Some(Utc::now() + Duration::days(BILLING_PERIOD_DAYS));
            clear_pending(&mut subscription);
        }
        status if status.is_failed() => {
            clear_pending(&mut subscription);
            subscription.state = SubscriptionState::Active;
        }
        _ => return Ok(subscription.summary(seats_used)),
    }
    save_and_publish(ctx, &subscription, seats_used).await
}

pub async fn cancel_subscription(ctx: &ApiContext, actor: &Actor) -> Result<SubscriptionSummary, ApiError> {
    actor.require_owner()?;
    let (mut subscription, seats_used) = load(ctx, actor.tenant_id).await?;
    let was_paid = subscription.plan != Plan::Free;

    clear_pending(&mut subscription);
    subscription.plan = Plan::Free;
    subscription.seats = subscription.seats.min(Plan::Free.max_seats());
    subscription.current_period_end = None;
    subscription.state = if was_paid {
        SubscriptionState::Canceled
    } else {
        SubscriptionState::Active
    };
    info!(tenant_id = actor.tenant_id.0, was_paid, "subscription canceled");
    save_and_publish(ctx, &subscription, seats_used).await
}

#[cfg(test)]
#[path = "tests/subscription_tests.rs"]
mod tests;
