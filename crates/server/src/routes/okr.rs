use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use server_api::okr;
use shared::{
    domain::{KeyResultId, ObjectiveId, TemplateId, TimeframeId},
    okr::{
        ApplyTemplateRequest, CheckInSummary, CreateKeyResultRequest, CreateObjectiveRequest,
        CreateTemplateRequest, KeyResultCheckInRequest, KeyResultSummary, ObjectiveCheckInRequest,
        ObjectiveDetail, ObjectiveFilter, ObjectiveNode, ObjectiveSummary, TemplateSummary,
        TimeframeQuery, UpdateKeyResultRequest, UpdateObjectiveRequest,
    },
};

use crate::{
    app_state::AppState,
    http::{ApiJson, ApiPath, ApiQuery, Auth, HttpError, HttpResult},
};

pub(crate) async fn list_objectives(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiQuery(filter): ApiQuery<ObjectiveFilter>,
) -> HttpResult<Vec<ObjectiveSummary>> {
    Ok(Json(okr::list_objectives(&state.api, &actor, &filter).await?))
}

pub(crate) async fn create_objective(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiJson(req): ApiJson<CreateObjectiveRequest>,
) -> HttpResult<ObjectiveDetail> {
    Ok(Json(okr::create_objective(&state.api, &actor, &req).await?))
}

pub(crate) async fn objective_tree(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiQuery(q): ApiQuery<TimeframeQuery>,
) -> HttpResult<Vec<ObjectiveNode>> {
    let timeframe_id = q.timeframe_id.map(TimeframeId);
    Ok(Json(okr::objective_tree(&state.api, &actor, timeframe_id).await?))
}

pub(crate) async fn get_objective(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(objective_id): ApiPath<i64>,
) -> HttpResult<ObjectiveDetail> {
    Ok(Json(
        okr::get_objective(&state.api, &actor, ObjectiveId(objective_id)).await?,
    ))
}

pub(crate) async fn update_objective(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(objective_id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateObjectiveRequest>,
) -> HttpResult<ObjectiveDetail> {
    Ok(Json(
        okr::update_objective(&state.api, &actor, ObjectiveId(objective_id), &req).await?,
    ))
}

pub(crate) async fn delete_objective(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(objective_id): ApiPath<i64>,
) -> Result<StatusCode, HttpError> {
    okr::delete_objective(&state.api, &actor, ObjectiveId(objective_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn list_key_results(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(objective_id): ApiPath<i64>,
) -> HttpResult<Vec<KeyResultSummary>> {
    Ok(Json(
        okr::list_key_results(&state.api, &actor, ObjectiveId(objective_id)).await?,
    ))
}

pub(crate) async fn create_key_result(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(objective_id): ApiPath<i64>,
    ApiJson(req): ApiJson<CreateKeyResultRequest>,
) -> HttpResult<KeyResultSummary> {
    Ok(Json(
        okr::create_key_result(&state.api, &actor, ObjectiveId(objective_id), &req).await?,
    ))
}

pub(crate) async fn update_key_result(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(key_result_id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateKeyResultRequest>,
) -> HttpResult<KeyResultSummary> {
    Ok(Json(
        okr::update_key_result(&state.api, &actor, KeyResultId(key_result_id), &req).await?,
    ))
}

pub(crate) async fn delete_key_result(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(key_result_id): ApiPath<i64>,
) -> Result<StatusCode, HttpError> {
    okr::delete_key_result(&state.api, &actor, KeyResultId(key_result_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn objective_check_ins(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(objective_id): ApiPath<i64>,
) -> HttpResult<Vec<CheckInSummary>> {
    Ok(Json(
        okr::objective_check_ins(&state.api, &actor, ObjectiveId(objective_id)).await?,
    ))
}

pub(crate) async fn check_in_objective(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(objective_id): ApiPath<i64>,
    ApiJson(req): ApiJson<ObjectiveCheckInRequest>,
) -> HttpResult<CheckInSummary> {
    Ok(Json(
        okr::check_in_objective(&state.api, &actor, ObjectiveId(objective_id), &req).await?,
    ))
}

pub(crate) async fn key_result_check_ins(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(key_result_id): ApiPath<i64>,
) -> HttpResult<Vec<CheckInSummary>> {
    Ok(Json(
        okr::key_result_check_ins(&state.api, &actor, KeyResultId(key_result_id)).await?,
    ))
}

pub(crate) async fn check_in_key_result(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(key_result_id): ApiPath<i64>,
    ApiJson(req): ApiJson<KeyResultCheckInRequest>,
) -> HttpResult<CheckInSummary> {
    Ok(Json(
        okr::check_in_key_result(&state.api, &actor, KeyResultId(key_result_id), &req).await?,
    ))
}

pub(crate) async fn list_templates(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
) -> HttpResult<Vec<TemplateSummary>> {
    Ok(Json(okr::list_templates(&state.api, &actor).await?))
}

pub(crate) async fn create_template(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiJson(req): ApiJson<CreateTemplateRequest>,
) -> HttpResult<TemplateSummary> {
    Ok(Json(okr::create_template(&state.api, &actor, &req).await?))
}

pub(crate) async fn delete_template(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(template_id): ApiPath<i64>,
) -> Result<StatusCode, HttpError> {
    okr::delete_template(&state.api, &actor, TemplateId(template_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn apply_template(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(template_id): ApiPath<i64>,
    ApiJson(req): ApiJson<ApplyTemplateRequest>,
) -> HttpResult<ObjectiveDetail> {
    Ok(Json(
        okr::apply_template(&state.api, &actor, TemplateId(template_id), &req).await?,
    ))
}
