use shared::domain::Role;

use super::*;
use crate::test_support::{context, context_with_payments, owner, user};

fn checkout_request(plan: Plan, seats: u32) -> CheckoutRequest {
    CheckoutRequest { plan, seats }
}

#[test]
fn plans_list_every_tier() {
    let plans = plans();
    let tiers: Vec<_> = plans.iter().map(|p| (p.plan, p.max_seats, p.price_per_seat_cents)).collect();
    assert_eq!(
        tiers,
        [
            (Plan::Free, 5, 0),
            (Plan::Team, 50, 800),
            (Plan::Business, 500, 1500)
        ]
    );
}

#[tokio::test]
async fn new_tenants_start_on_the_free_plan() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let summary = subscription(&ctx, &olivia).await.expect("subscription");
    assert_eq!(summary.plan, Plan::Free);
    assert_eq!(summary.state, SubscriptionState::Active);
    assert_eq!(summary.seats, 5);
    assert_eq!(summary.seats_used, 1);
}

#[tokio::test]
async fn paid_checkout_waits_for_confirmation() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let mut events = ctx.subscribe();

    let started = checkout(&ctx, &olivia, &checkout_request(Plan::Team, 10))
        .await
        .expect("checkout");
    assert!(started.client_secret.is_some());
    assert_eq!(started.subscription.state, SubscriptionState::Pending);
    assert_eq!(started.subscription.plan, Plan::Free);
    assert_eq!(started.subscription.pending_plan, Some(Plan::Team));
    assert_eq!(started.subscription.pending_seats, Some(10));

    let confirmed = confirm_checkout(&ctx, &olivia).await.expect("confirm");
    assert_eq!(confirmed.plan, Plan::Team);
    assert_eq!(confirmed.seats, 10);
    assert_eq!(confirmed.state, SubscriptionState::Active);
    assert_eq!(confirmed.pending_plan, None);
    let period_end = confirmed.current_period_end.expect("period end");
    let days = (period_end - Utc::now()).num_days();
    assert!((29..=30).contains(&days));

    let mut updates = 0;
    while let Ok(envelope) = events.try_recv() {
        if matches!(envelope.event, ServerEvent::SubscriptionUpdated { .. }) {
            updates += 1;
        }
    }
    assert_eq!(updates, 2);

    let err = confirm_checkout(&ctx, &olivia).await.expect_err("nothing pending");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn checkout_charges_price_times_seats() {
    let sandbox = std::sync::Arc::new(billing::SandboxProvider::default());
    let mut ctx = context().await;
    let payments: std::sync::Arc<dyn billing::PaymentProvider> = sandbox.clone();
    ctx.payments = payments;
    let olivia = owner(&ctx, "acme").await;

    checkout(&ctx, &olivia, &checkout_request(Plan::Business, 3))
        .await
        .expect("checkout");
    let stored = ctx.storage.subscription(olivia.tenant_id).await.expect("row");
    let payment_id = stored.pending_payment_id.expect("pending payment");
    let recorded = sandbox.recorded_payment(&payment_id).await.expect("recorded");
    assert_eq!(recorded.amount_cents, 4500);
    assert_eq!(recorded.currency, "usd");
    assert_eq!(
        recorded.metadata.get("tenant_id"),
        Some(&olivia.tenant_id.0.to_string())
    );
}

#[tokio::test]
async fn processing_payments_stay_pending() {
    let ctx = context_with_payments(PaymentStatus::Processing).await;
    let olivia = owner(&ctx, "acme").await;
    checkout(&ctx, &olivia, &checkout_request(Plan::Team, 10))
        .await
        .expect("checkout");
    let summary = confirm_checkout(&ctx, &olivia).await.expect("confirm");
    assert_eq!(summary.state, SubscriptionState::Pending);
    assert_eq!(summary.pending_plan, Some(Plan::Team));
}

#[tokio::test]
async fn failed_payments_restore_the_previous_plan() {
    let ctx = context_with_payments(PaymentStatus::Canceled).await;
    let olivia = owner(&ctx, "acme").await;
    checkout(&ctx, &olivia, &checkout_request(Plan::Team, 10))
        .await
        .expect("checkout");
    let summary = confirm_checkout(&ctx, &olivia).await.expect("confirm");
    assert_eq!(summary.state, SubscriptionState::Active);
    assert_eq!(summary.plan, Plan::Free);
    assert_eq!(summary.pending_plan, None);
    assert_eq!(summary.seats, 5);
}

#[tokio::test]
async fn seat_counts_are_validated() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    user(&ctx, &olivia, "mia", Role::Member).await;
    user(&ctx, &olivia, "max", Role::Member).await;

    let err = checkout(&ctx, &olivia, &checkout_request(Plan::Team, 2))
        .await
        .expect_err("fewer seats than users");
    assert_eq!(err.code, ErrorCode::Validation);
    let err = checkout(&ctx, &olivia, &checkout_request(Plan::Free, 6))
        .await
        .expect_err("over the free limit");
    assert_eq!(err.code, ErrorCode::Validation);
    let err = checkout(&ctx, &olivia, &checkout_request(Plan::Team, 51))
        .await
        .expect_err("over the team limit");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn only_owners_manage_billing() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let adam = user(&ctx, &olivia, "adam", Role::Admin).await;
    let err = checkout(&ctx, &adam, &checkout_request(Plan::Team, 10))
        .await
        .expect_err("admin");
    assert_eq!(err.code, ErrorCode::Forbidden);
    let err = cancel_subscription(&ctx, &adam).await.expect_err("admin cancel");
    assert_eq!(err.code, ErrorCode::Forbidden);
    subscription(&ctx, &adam).await.expect("anyone can read");
}

#[tokio::test]
async fn canceling_a_paid_plan_returns_to_free() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    checkout(&ctx, &olivia, &checkout_request(Plan::Team, 20))
        .await
        .expect("checkout");
    confirm_checkout(&ctx, &olivia).await.expect("confirm");

    let canceled = cancel_subscription(&ctx, &olivia).await.expect("cancel");
    assert_eq!(canceled.plan, Plan::Free);
    assert_eq!(canceled.state, SubscriptionState::Canceled);
    assert_eq!(canceled.seats, 5);
    assert_eq!(canceled.current_period_end, None);

    let again = cancel_subscription(&ctx, &olivia).await.expect("cancel free");
    assert_eq!(again.state, SubscriptionState::Active);
}

#[tokio::test]
async fn seat_check_counts_only_active_users() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let mut members = Vec::new();
    for name in ["a", "b", "c", "d"] {
        members.push(user(&ctx, &olivia, name, Role::Member).await);
    }
    let err = ensure_seat_available(&ctx, olivia.tenant_id)
        .await
        .expect_err("full");
    assert_eq!(err.code, ErrorCode::Forbidden);

    ctx.storage
        .deactivate_user(olivia.tenant_id, members[0].user_id)
        .await
        .expect("deactivate");
    ensure_seat_available(&ctx, olivia.tenant_id)
        .await
        .expect("seat freed");
}
