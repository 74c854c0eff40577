use std::sync::Arc;

use axum::{extract::State, Json};
use server_api::feedback;
use shared::{
    domain::UserId,
    okr::{BadgeSummary, CreateBadgeRequest, FeedbackSummary, GiveFeedbackRequest},
};

use crate::{
    app_state::AppState,
    http::{ApiJson, ApiPath, Auth, HttpResult},
};

pub(crate) async fn list_badges(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
) -> HttpResult<Vec<BadgeSummary>> {
    Ok(Json(feedback::list_badges(&state.api, &actor).await?))
}

pub(crate) async fn create_badge(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiJson(req): ApiJson<CreateBadgeRequest>,
) -> HttpResult<BadgeSummary> {
    Ok(Json(feedback::create_badge(&state.api, &actor, &req).await?))
}

pub(crate) async fn give_feedback(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiJson(req): ApiJson<GiveFeedbackRequest>,
) -> HttpResult<FeedbackSummary> {
    Ok(Json(feedback::give_feedback(&state.api, &actor, &req).await?))
}

pub(crate) async fn user_feedback(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(user_id): ApiPath<i64>,
) -> HttpResult<Vec<FeedbackSummary>> {
    Ok(Json(
        feedback::list_feedback(&state.api, &actor, UserId(user_id)).await?,
    ))
}
