use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use auth::TokenConfig;
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{delete, get, patch, post, put},
    Router,
};
use server_api::ApiContext;
use storage::Storage;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;
mod http;
mod routes;
mod ws;

use crate::{
    app_state::AppState,
    config::{load_settings, prepare_database_url},
    routes::{account, board, chat, feedback, okr, org, subscription},
};

/// Headroom on top of the attachment limit for multipart framing and JSON
/// envelopes.
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings()?;
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; check the parent directory and its permissions"
        );
        error
    })?;
    let payments = settings.build_payment_provider()?;
    info!(provider = %settings.payment_provider, "payment provider ready");

    let api = ApiContext::new(
        storage,
        TokenConfig {
            secret: settings.jwt_secret.clone(),
            ttl_seconds: settings.token_ttl_seconds,
        },
        payments,
        settings.currency.clone(),
        settings.max_attachment_bytes,
    );
    let app = build_router(
        Arc::new(AppState::new(api)),
        settings.cors_allowed_origin.as_deref(),
    )?;

    let addr: SocketAddr = settings
        .server_bind
        .parse()
        .with_context(|| format!("invalid server_bind '{}'", settings.server_bind))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn build_router(state: Arc<AppState>, cors_allowed_origin: Option<&str>) -> anyhow::Result<Router> {
    let body_limit = state
        .api
        .max_attachment_bytes
        .saturating_add(BODY_OVERHEAD_BYTES);

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/signup", post(account::signup))
        .route("/login", post(account::login))
        .route("/invites/accept", post(account::accept_invite))
        .route("/invites", post(account::create_invite))
        .route("/me", get(account::me).patch(account::update_me))
        .route("/users", get(org::list_users))
        .route("/users/:id", delete(org::deactivate_user))
        .route("/users/:id/role", patch(org::update_user_role))
        .route("/users/:id/feedback", get(feedback::user_feedback))
        .route("/teams", get(org::list_teams).post(org::create_team))
        .route(
            "/teams/:id",
            get(org::get_team)
                .patch(org::update_team)
                .delete(org::delete_team),
        )
        .route(
            "/teams/:id/members/:user_id",
            put(org::add_team_member).delete(org::remove_team_member),
        )
        .route("/cadences", get(org::list_cadences).post(org::create_cadence))
        .route("/cadences/:id", delete(org::delete_cadence))
        .route("/cadences/:id/timeframes", post(org::generate_timeframes))
        .route(
            "/timeframes",
            get(org::list_timeframes).post(org::create_timeframe),
        )
        .route(
            "/timeframes/:id",
            patch(org::update_timeframe).delete(org::delete_timeframe),
        )
        .route(
            "/statuses",
            get(board::list_statuses).post(board::create_status),
        )
        .route("/statuses/order", put(board::reorder_statuses))
        .route(
            "/statuses/:id",
            patch(board::update_status).delete(board::delete_status),
        )
        .route("/board", get(board::get_board))
        .route("/objectives/tree", get(okr::objective_tree))
        .route(
            "/objectives",
            get(okr::list_objectives).post(okr::create_objective),
        )
        .route(
            "/objectives/:id",
            get(okr::get_objective)
                .patch(okr::update_objective)
                .delete(okr::delete_objective),
        )
        .route("/objectives/:id/move", post(board::move_objective))
        .route(
            "/objectives/:id/key-results",
            get(okr::list_key_results).post(okr::create_key_result),
        )
        .route(
            "/key-results/:id",
            patch(okr::update_key_result).delete(okr::delete_key_result),
        )
        .route(
            "/objectives/:id/check-ins",
            get(okr::objective_check_ins).post(okr::check_in_objective),
        )
        .route(
            "/key-results/:id/check-ins",
            get(okr::key_result_check_ins).post(okr::check_in_key_result),
        )
        .route(
            "/templates",
            get(okr::list_templates).post(okr::create_template),
        )
        .route("/templates/:id", delete(okr::delete_template))
        .route("/templates/:id/apply", post(okr::apply_template))
        .route(
            "/badges",
            get(feedback::list_badges).post(feedback::create_badge),
        )
        .route("/feedback", post(feedback::give_feedback))
        .route("/reports/dashboard", get(board::dashboard))
        .route("/billing/plans", get(subscription::plans))
        .route("/billing/subscription", get(subscription::current))
        .route("/billing/checkout", post(subscription::checkout))
        .route("/billing/confirm", post(subscription::confirm))
        .route("/billing/cancel", post(subscription::cancel))
        .route("/chat/rooms", get(chat::list_rooms).post(chat::create_room))
        .route("/chat/direct", post(chat::open_direct_room))
        .route("/chat/rooms/:id", get(chat::get_room))
        .route("/chat/rooms/:id/members", get(chat::list_members))
        .route(
            "/chat/rooms/:id/members/:user_id",
            put(chat::add_member).delete(chat::remove_member),
        )
        .route(
            "/chat/rooms/:id/messages",
            get(chat::list_messages).post(chat::send_message),
        )
        .route("/chat/rooms/:id/read", post(chat::mark_read))
        .route("/chat/rooms/:id/attachments", post(chat::upload_attachment))
        .route(
            "/chat/messages/:id",
            patch(chat::edit_message).delete(chat::delete_message),
        )
        .route("/chat/messages/:id/reactions", post(chat::toggle_reaction))
        .route("/chat/attachments/:id", get(chat::download_attachment))
        .route("/ws", get(ws::ws_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state);

    let Some(origin) = cors_allowed_origin.filter(|origin| !origin.trim().is_empty()) else {
        return Ok(router);
    };
    let origin = HeaderValue::from_str(origin.trim())
        .with_context(|| format!("invalid cors_allowed_origin '{origin}'"))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);
    Ok(router.layer(cors))
}

async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
