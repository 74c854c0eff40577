use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use server_api::org;
use shared::{
    account::{UpdateRoleRequest, UserSummary},
    domain::{CadenceId, TeamId, TimeframeId, UserId},
    okr::{
        CadenceSummary, CreateCadenceRequest, CreateTeamRequest, CreateTimeframeRequest,
        GenerateTimeframesRequest, TeamSummary, TimeframeSummary, UpdateTeamRequest,
        UpdateTimeframeRequest,
    },
};

use crate::{
    app_state::AppState,
    http::{ApiJson, ApiPath, Auth, HttpError, HttpResult},
};

pub(crate) async fn list_users(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
) -> HttpResult<Vec<UserSummary>> {
    Ok(Json(org::list_users(&state.api, &actor).await?))
}

pub(crate) async fn update_user_role(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(user_id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateRoleRequest>,
) -> HttpResult<UserSummary> {
    Ok(Json(
        org::update_user_role(&state.api, &actor, UserId(user_id), &req).await?,
    ))
}

pub(crate) async fn deactivate_user(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(user_id): ApiPath<i64>,
) -> Result<StatusCode, HttpError> {
    org::deactivate_user(&state.api, &actor, UserId(user_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn list_teams(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
) -> HttpResult<Vec<TeamSummary>> {
    Ok(Json(org::list_teams(&state.api, &actor).await?))
}

pub(crate) async fn create_team(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiJson(req): ApiJson<CreateTeamRequest>,
) -> HttpResult<TeamSummary> {
    Ok(Json(org::create_team(&state.api, &actor, &req).await?))
}

pub(crate) async fn get_team(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(team_id): ApiPath<i64>,
) -> HttpResult<TeamSummary> {
    Ok(Json(org::get_team(&state.api, &actor, TeamId(team_id)).await?))
}

pub(crate) async fn update_team(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(team_id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateTeamRequest>,
) -> HttpResult<TeamSummary> {
    Ok(Json(
        org::update_team(&state.api, &actor, TeamId(team_id), &req).await?,
    ))
}

pub(crate) async fn delete_team(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(team_id): ApiPath<i64>,
) -> Result<StatusCode, HttpError> {
    org::delete_team(&state.api, &actor, TeamId(team_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn add_team_member(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath((team_id, user_id)): ApiPath<(i64, i64)>,
) -> HttpResult<TeamSummary> {
    Ok(Json(
        org::add_team_member(&state.api, &actor, TeamId(team_id), UserId(user_id)).await?,
    ))
}

pub(crate) async fn remove_team_member(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath((team_id, user_id)): ApiPath<(i64, i64)>,
) -> HttpResult<TeamSummary> {
    Ok(Json(
        org::remove_team_member(&state.api, &actor, TeamId(team_id), UserId(user_id)).await?,
    ))
}

pub(crate) async fn list_cadences(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
) -> HttpResult<Vec<CadenceSummary>> {
    Ok(Json(org::list_cadences(&state.api, &actor).await?))
}

pub(crate) async fn create_cadence(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiJson(req): ApiJson<CreateCadenceRequest>,
) -> HttpResult<CadenceSummary> {
    Ok(Json(org::create_cadence(&state.api, &actor, &req).await?))
}

pub(crate) async fn delete_cadence(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(cadence_id): ApiPath<i64>,
) -> Result<StatusCode, HttpError> {
    org::delete_cadence(&state.api, &actor, CadenceId(cadence_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn generate_timeframes(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(cadence_id): ApiPath<i64>,
    ApiJson(req): ApiJson<GenerateTimeframesRequest>,
) -> HttpResult<Vec<TimeframeSummary>> {
    Ok(Json(
        org::generate_timeframes(&state.api, &actor, CadenceId(cadence_id), &req).await?,
    ))
}

pub(crate) async fn list_timeframes(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
) -> HttpResult<Vec<TimeframeSummary>> {
    Ok(Json(org::list_timeframes(&state.api, &actor).await?))
}

pub(crate) async fn create_timeframe(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiJson(req): ApiJson<CreateTimeframeRequest>,
) -> HttpResult<TimeframeSummary> {
    Ok(Json(org::create_timeframe(&state.api, &actor, &req).await?))
}

pub(crate) async fn update_timeframe(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(timeframe_id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateTimeframeRequest>,
) -> HttpResult<TimeframeSummary> {
    Ok(Json(
        org::update_timeframe(&state.api, &actor, TimeframeId(timeframe_id), &req).await?,
    ))
}

pub(crate) async fn delete_timeframe(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(timeframe_id): ApiPath<i64>,
) -> Result<StatusCode, HttpError> {
    org::delete_timeframe(&state.api, &actor, TimeframeId(timeframe_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
