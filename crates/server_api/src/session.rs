use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use shared::{
    account::{
        AcceptInviteRequest, CreateInviteRequest, InviteResponse, LoginRequest, SessionResponse,
        SignupRequest, UpdateProfileRequest, UserSummary,
    },
    domain::{Role, TenantId, UserId},
    error::{ApiError, ErrorCode},
};
use storage::InviteRedemption;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{conflict_or_internal, internal, required_text, Actor, ApiContext};

pub const INVITE_TTL_DAYS: i64 = 7;

pub(crate) fn validate_slug(slug: &str) -> Result<String, ApiError> {
    let slug = slug.trim();
    let valid_chars = slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !(3..=40).contains(&slug.len()) || !valid_chars {
        return Err(ApiError::validation(
            "tenant slug must be 3-40 characters of a-z, 0-9 or '-'",
        ));
    }
    Ok(slug.to_string())
}

pub(crate) fn validate_username(username: &str) -> Result<String, ApiError> {
    let username = username.trim();
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !(1..=40).contains(&username.len()) || !valid_chars {
        return Err(ApiError::validation(
            "username must be 1-40 characters of letters, digits, '_', '.' or '-'",
        ));
    }
    Ok(username.to_string())
}

fn validate_display_name(display_name: &str) -> Result<String, ApiError> {
    required_text("display name", display_name, 80)
}

async fn issue_session(
    ctx: &ApiContext,
    tenant_id: TenantId,
    user_id: UserId,
) -> Result<SessionResponse, ApiError> {
    let tenant = ctx
        .storage
        .tenant(tenant_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::unauthorized("unknown tenant"))?;
    let user = ctx
        .storage
        .user(tenant_id, user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::unauthorized("unknown user"))?;

    let token = auth::mint_token(&ctx.tokens, tenant_id, user_id, user.role)
        .map_err(|e| ApiError::new(ErrorCode::Internal, format!("token mint failed: {e}")))?;
    Ok(SessionResponse {
        token,
        tenant: tenant.summary(),
        user: user.summary(),
    })
}

pub async fn signup(ctx: &ApiContext, request: &SignupRequest) -> Result<SessionResponse, ApiError> {
    let tenant_name = required_text("tenant name", &request.tenant_name, 80)?;
    let slug = validate_slug(&request.tenant_slug)?;
    let username = validate_username(&request.username)?;
    let display_name = validate_display_name(&request.display_name)?;

    let (tenant_id, user_id) = ctx
        .storage
        .bootstrap_tenant(&tenant_name, &slug, &username, &display_name)
        .await
        .map_err(|e| conflict_or_internal(e, "tenant slug is already taken"))?;
    info!(tenant_id = tenant_id.0, %slug, "tenant created");
    issue_session(ctx, tenant_id, user_id).await
}

pub async fn login(ctx: &ApiContext, request: &LoginRequest) -> Result<SessionResponse, ApiError> {
    let rejected = || ApiError::unauthorized("unknown tenant or user");
    let tenant = ctx
        .storage
        .tenant_by_slug(request.tenant_slug.trim())
        .await
        .map_err(internal)?
        .ok_or_else(rejected)?;
    let user = ctx
        .storage
        .user_by_username(tenant.tenant_id, request.username.trim())
        .await
        .map_err(internal)?
        .ok_or_else(rejected)?;
    if user.deactivated {
        return Err(rejected());
    }
    issue_session(ctx, tenant.tenant_id, user.user_id).await
}

/// Resolves a session token into an actor, reloading the role from storage.
pub async fn authenticate(ctx: &ApiContext, token: &str) -> Result<Actor, ApiError> {
    let identity = auth::verify_token(&ctx.tokens, token).map_err(|e| {
        warn!(error = %e, "rejected session token");
        ApiError::unauthorized("invalid or expired session token")
    })?;
    let user = ctx
        .storage
        .user(identity.tenant_id, identity.user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::unauthorized("unknown user"))?;
    if user.deactivated {
        return Err(ApiError::unauthorized("user is deactivated"));
    }
    Ok(Actor {
        tenant_id: user.tenant_id,
        user_id: user.user_id,
        role: user.role,
    })
}

pub async fn me(ctx: &ApiContext, actor: &Actor) -> Result<UserSummary, ApiError> {
    ctx.storage
        .user(actor.tenant_id, actor.user_id)
        .await
        .map_err(internal)?
        .map(|user| user.summary())
        .ok_or_else(|| ApiError::not_found("user not found"))
}

pub async fn update_profile(
    ctx: &ApiContext,
    actor: &Actor,
    request: &UpdateProfileRequest,
) -> Result<UserSummary, ApiError> {
    let display_name = validate_display_name(&request.display_name)?;
    ctx.storage
        .set_display_name(actor.tenant_id, actor.user_id, &display_name)
        .await
        .map_err(internal)?;
    me(ctx, actor).await
}

pub async fn create_invite(
    ctx: &ApiContext,
    actor: &Actor,
    request: &CreateInviteRequest,
) -> Result<InviteResponse, ApiError> {
    actor.require_manager()?;
    if request.role == Role::Owner {
        actor.require_owner()?;
    }

    let invite_code = URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes());
    let expires_at = Utc::now() + Duration::days(INVITE_TTL_DAYS);
    ctx.storage
        .create_invite(actor.tenant_id, &invite_code, request.role, actor.user_id, expires_at)
        .await
        .map_err(internal)?;
    Ok(InviteResponse {
        invite_code,
        role: request.role,
        expires_at,
    })
}

pub async fn accept_invite(
    ctx: &ApiContext,
    request: &AcceptInviteRequest,
) -> Result<SessionResponse, ApiError> {
    let invalid = || ApiError::validation("invite code is invalid or expired");
    let invite = ctx
        .storage
        .invite(request.invite_code.trim())
        .await
        .map_err(internal)?
        .ok_or_else(invalid)?;
    if invite.consumed || invite.expires_at <= Utc::now() {
        return Err(invalid());
    }

    let username = validate_username(&request.username)?;
    let display_name = validate_display_name(&request.display_name)?;

    crate::subscription::ensure_seat_available(ctx, invite.tenant_id).await?;
    if ctx
        .storage
        .user_by_username(invite.tenant_id, &username)
        .await
        .map_err(internal)?
        .is_some()
    {
        return Err(ApiError::conflict("username is already taken"));
    }

    let redemption = ctx
        .storage
        .redeem_invite(&invite, &username, &display_name)
        .await
        .map_err(|e| conflict_or_internal(e, "username is already taken"))?;
    let user_id = match redemption {
        InviteRedemption::Redeemed(user_id) => user_id,
        InviteRedemption::AlreadyUsed => return Err(invalid()),
        InviteRedemption::NoSeatsLeft => {
            return Err(ApiError::forbidden("all seats of the subscription are in use"))
        }
    };
    info!(tenant_id = invite.tenant_id.0, user_id = user_id.0, "invite accepted");
    issue_session(ctx, invite.tenant_id, user_id).await
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
