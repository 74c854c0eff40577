use std::sync::Arc;

use axum::{extract::State, Json};
use server_api::session;
use shared::account::{
    AcceptInviteRequest, CreateInviteRequest, InviteResponse, LoginRequest, SessionResponse,
    SignupRequest, UpdateProfileRequest, UserSummary,
};
use tracing::info;

use crate::{
    app_state::AppState,
    http::{ApiJson, Auth, HttpResult},
};

pub(crate) async fn signup(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<SignupRequest>,
) -> HttpResult<SessionResponse> {
    let session = session::signup(&state.api, &req).await?;
    info!(tenant_id = session.tenant.tenant_id.0, "tenant signed up");
    Ok(Json(session))
}

pub(crate) async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> HttpResult<SessionResponse> {
    Ok(Json(session::login(&state.api, &req).await?))
}

pub(crate) async fn accept_invite(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<AcceptInviteRequest>,
) -> HttpResult<SessionResponse> {
    Ok(Json(session::accept_invite(&state.api, &req).await?))
}

pub(crate) async fn me(State(state): State<Arc<AppState>>, Auth(actor): Auth) -> HttpResult<UserSummary> {
    Ok(Json(session::me(&state.api, &actor).await?))
}

pub(crate) async fn update_me(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiJson(req): ApiJson<UpdateProfileRequest>,
) -> HttpResult<UserSummary> {
    Ok(Json(session::update_profile(&state.api, &actor, &req).await?))
}

pub(crate) async fn create_invite(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiJson(req): ApiJson<CreateInviteRequest>,
) -> HttpResult<InviteResponse> {
    Ok(Json(session::create_invite(&state.api, &actor, &req).await?))
}
