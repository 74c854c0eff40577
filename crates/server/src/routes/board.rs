use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use server_api::{board, reports};
use shared::{
    domain::{ObjectiveId, StatusId, TimeframeId},
    okr::{
        Board, CreateStatusRequest, DashboardReport, MoveObjectiveRequest, ObjectiveSummary,
        ReorderStatusesRequest, StatusSummary, TimeframeQuery, UpdateStatusRequest,
    },
};

use crate::{
    app_state::AppState,
    http::{ApiJson, ApiPath, ApiQuery, Auth, HttpError, HttpResult},
};

pub(crate) async fn list_statuses(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
) -> HttpResult<Vec<StatusSummary>> {
    Ok(Json(board::list_statuses(&state.api, &actor).await?))
}

pub(crate) async fn create_status(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiJson(req): ApiJson<CreateStatusRequest>,
) -> HttpResult<StatusSummary> {
    Ok(Json(board::create_status(&state.api, &actor, &req).await?))
}

pub(crate) async fn update_status(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(status_id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateStatusRequest>,
) -> HttpResult<StatusSummary> {
    Ok(Json(
        board::update_status(&state.api, &actor, StatusId(status_id), &req).await?,
    ))
}

pub(crate) async fn delete_status(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(status_id): ApiPath<i64>,
) -> Result<StatusCode, HttpError> {
    board::delete_status(&state.api, &actor, StatusId(status_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn reorder_statuses(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiJson(req): ApiJson<ReorderStatusesRequest>,
) -> HttpResult<Vec<StatusSummary>> {
    Ok(Json(board::reorder_statuses(&state.api, &actor, &req).await?))
}

pub(crate) async fn get_board(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiQuery(q): ApiQuery<TimeframeQuery>,
) -> HttpResult<Board> {
    Ok(Json(
        board::board(&state.api, &actor, q.timeframe_id.map(TimeframeId)).await?,
    ))
}

pub(crate) async fn move_objective(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(objective_id): ApiPath<i64>,
    ApiJson(req): ApiJson<MoveObjectiveRequest>,
) -> HttpResult<ObjectiveSummary> {
    Ok(Json(
        board::move_objective(&state.api, &actor, ObjectiveId(objective_id), &req).await?,
    ))
}

pub(crate) async fn dashboard(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiQuery(q): ApiQuery<TimeframeQuery>,
) -> HttpResult<DashboardReport> {
    Ok(Json(
        reports::dashboard(&state.api, &actor, q.timeframe_id.map(TimeframeId)).await?,
    ))
}
