use std::sync::Arc;

use axum::{extract::State, Json};
use server_api::subscription;
use shared::account::{CheckoutRequest, CheckoutResponse, PlanSummary, SubscriptionSummary};
use tracing::info;

use crate::{
    app_state::AppState,
    http::{ApiJson, Auth, HttpResult},
};

pub(crate) async fn plans() -> Json<Vec<PlanSummary>> {
    Json(subscription::plans())
}

pub(crate) async fn current(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
) -> HttpResult<SubscriptionSummary> {
    Ok(Json(subscription::subscription(&state.api, &actor).await?))
}

pub(crate) async fn checkout(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiJson(req): ApiJson<CheckoutRequest>,
) -> HttpResult<CheckoutResponse> {
    let response = subscription::checkout(&state.api, &actor, &req).await?;
    info!(
        tenant_id = actor.tenant_id.0,
        plan = ?req.plan,
        seats = req.seats,
        "checkout started"
    );
    Ok(Json(response))
}

pub(crate) async fn confirm(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
) -> HttpResult<SubscriptionSummary> {
    Ok(Json(subscription::confirm_checkout(&state.api, &actor).await?))
}

pub(crate) async fn cancel(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
) -> HttpResult<SubscriptionSummary> {
    let summary = subscription::cancel_subscription(&state.api, &actor).await?;
    info!(tenant_id = actor.tenant_id.0, "subscription canceled");
    Ok(Json(summary))
}
