use chrono::NaiveDate;
use shared::{
    account::{UpdateRoleRequest, UserSummary},
    domain::{CadenceId, Role, TeamId, TimeframeId, UserId},
    error::ApiError,
    okr::{
        CadenceSummary, CreateCadenceRequest, CreateTeamRequest, CreateTimeframeRequest,
        GenerateTimeframesRequest, TeamSummary, TimeframeSummary, UpdateTeamRequest,
        UpdateTimeframeRequest,
    },
};
use storage::StoredUser;
use tracing::info;

use crate::{conflict_or_internal, internal, optional_text, required_text, Actor, ApiContext};

const ALLOWED_PERIODS: [u32; 4] = [1, 3, 6, 12];
const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

pub(crate) async fn tenant_user(
    ctx: &ApiContext,
    actor: &Actor,
    user_id: UserId,
) -> Result<StoredUser, ApiError> {
    ctx.storage
        .user(actor.tenant_id, user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("user not found"))
}

/// Like [`tenant_user`] but rejects deactivated users.
pub(crate) async fn active_tenant_user(
    ctx: &ApiContext,
    actor: &Actor,
    user_id: UserId,
) -> Result<StoredUser, ApiError> {
    let user = tenant_user(ctx, actor, user_id).await?;
    if user.deactivated {
        return Err(ApiError::validation("user is deactivated"));
    }
    Ok(user)
}

pub async fn list_users(ctx: &ApiContext, actor: &Actor) -> Result<Vec<UserSummary>, ApiError> {
    let users = ctx
        .storage
        .list_users(actor.tenant_id)
        .await
        .map_err(internal)?;
    Ok(users.iter().map(StoredUser::summary).collect())
}

async fn ensure_not_last_owner(ctx: &ApiContext, actor: &Actor, target: &StoredUser) -> Result<(), ApiError> {
    if target.role != Role::Owner || target.deactivated {
        return Ok(());
    }
    let owners = ctx
        .storage
        .count_active_owners(actor.tenant_id)
        .await
        .map_err(internal)?;
    if owners <= 1 {
        return Err(last_owner());
    }
    Ok(())
}

fn last_owner() -> ApiError {
    ApiError::validation("a tenant needs at least one owner")
}

pub async fn update_user_role(
    ctx: &ApiContext,
    actor: &Actor,
    user_id: UserId,
    request: &UpdateRoleRequest,
) -> Result<UserSummary, ApiError> {
    actor.require_manager()?;
    let target = tenant_user(ctx, actor, user_id).await?;
    if target.role == Role::Owner || request.role == Role::Owner {
        actor.require_owner()?;
    }
    if request.role != Role::Owner {
        ensure_not_last_owner(ctx, actor, &target).await?;
    }

    let updated = ctx
        .storage
        .set_user_role(actor.tenant_id, user_id, request.role)
        .await
        .map_err(internal)?;
    if !updated {
        return Err(last_owner());
    }
    info!(tenant_id = actor.tenant_id.0, user_id = user_id.0, role = request.role.as_str(), "role updated");
    Ok(tenant_user(ctx, actor, user_id).await?.summary())
}

pub async fn deactivate_user(ctx: &ApiContext, actor: &Actor, user_id: UserId) -> Result<(), ApiError> {
    actor.require_manager()?;
    if user_id == actor.user_id {
        return Err(ApiError::validation("cannot deactivate yourself"));
    }
    let target = tenant_user(ctx, actor, user_id).await?;
    if target.role == Role::Owner {
        actor.require_owner()?;
    }
    ensure_not_last_owner(ctx, actor, &target).await?;

    let updated = ctx
        .storage
        .deactivate_user(actor.tenant_id, user_id)
        .await
        .map_err(internal)?;
    if !updated && !target.deactivated {
        return Err(last_owner());
    }
    info!(tenant_id = actor.tenant_id.0, user_id = user_id.0, "user deactivated");
    Ok(())
}

pub async fn create_team(
    ctx: &ApiContext,
    actor: &Actor,
    request: &CreateTeamRequest,
) -> Result<TeamSummary, ApiError> {
    actor.require_manager()?;
    let name = required_text("team name", &request.name, 80)?;
    let description = optional_text("description", request.description.as_deref(), 500)?;
    let team_id = ctx
        .storage
        .create_team(actor.tenant_id, &name, description.as_deref())
        .await
        .map_err(|e| conflict_or_internal(e, "a team with that name exists"))?;
    get_team(ctx, actor, team_id).await
}

pub async fn list_teams(ctx: &ApiContext, actor: &Actor) -> Result<Vec<TeamSummary>, ApiError> {
    ctx.storage.list_teams(actor.tenant_id).await.map_err(internal)
}

pub async fn get_team(ctx: &ApiContext, actor: &Actor, team_id: TeamId) -> Result<TeamSummary, ApiError> {
    ctx.storage
        .team(actor.tenant_id, team_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("team not found"))
}

pub async fn update_team(
    ctx: &ApiContext,
    actor: &Actor,
    team_id: TeamId,
    request: &UpdateTeamRequest,
) -> Result<TeamSummary, ApiError> {
    actor.require_manager()?;
    let current = get_team(ctx, actor, team_id).await?;
    let name = match &request.name {
        Some(name) => required_text("team name", name, 80)?,
        None => current.name,
    };
    let description = match &request.description {
        Some(description) => optional_text("description", description.as_deref(), 500)?,
        None => current.description,
    };
    ctx.storage
        .update_team(actor.tenant_id, team_id, &name, description.as_deref())
        .await
        .map_err(|e| conflict_or_internal(e, "a team with that name exists"))?;
    get_team(ctx, actor, team_id).await
}

pub async fn delete_team(ctx: &ApiContext, actor: &Actor, team_id: TeamId) -> Result<(), ApiError> {
    actor.require_manager()?;
    let deleted = ctx
        .storage
        .delete_team(actor.tenant_id, team_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(ApiError::not_found("team not found"));
    }
    Ok(())
}

pub async fn add_team_member(
    ctx: &ApiContext,
    actor: &Actor,
    team_id: TeamId,
    user_id: UserId,
) -> Result<TeamSummary, ApiError> {
    actor.require_manager()?;
    get_team(ctx, actor, team_id).await?;
    active_tenant_user(ctx, actor, user_id).await?;
    ctx.storage
        .add_team_member(team_id, user_id)
        .await
        .map_err(internal)?;
    get_team(ctx, actor, team_id).await
}

pub async fn remove_team_member(
    ctx: &ApiContext,
    actor: &Actor,
    team_id: TeamId,
    user_id: UserId,
) -> Result<TeamSummary, ApiError> {
    actor.require_manager()?;
    get_team(ctx, actor, team_id).await?;
    ctx.storage
        .remove_team_member(team_id, user_id)
        .await
        .map_err(internal)?;
    get_team(ctx, actor, team_id).await
}

pub async fn create_cadence(
    ctx: &ApiContext,
    actor: &Actor,
    request: &CreateCadenceRequest,
) -> Result<CadenceSummary, ApiError> {
    actor.require_manager()?;
    let name = required_text("cadence name", &request.name, 80)?;
    if !ALLOWED_PERIODS.contains(&request.period_months) {
        return Err(ApiError::validation("period_months must be 1, 3, 6 or 12"));
    }
    let cadence_id = ctx
        .storage
        .create_cadence(actor.tenant_id, &name, request.period_months)
        .await
        .map_err(internal)?;
    get_cadence(ctx, actor, cadence_id).await
}

pub async fn list_cadences(ctx: &ApiContext, actor: &Actor) -> Result<Vec<CadenceSummary>, ApiError> {
    ctx.storage
        .list_cadences(actor.tenant_id)
        .await
        .map_err(internal)
}

async fn get_cadence(
    ctx: &ApiContext,
    actor: &Actor,
    cadence_id: CadenceId,
) -> Result<CadenceSummary, ApiError> {
    ctx.storage
        .cadence(actor.tenant_id, cadence_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("cadence not found"))
}

pub async fn delete_cadence(ctx: &ApiContext, actor: &Actor, cadence_id: CadenceId) -> Result<(), ApiError> {
    actor.require_manager()?;
    let deleted = ctx
        .storage
        .delete_cadence(actor.tenant_id, cadence_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(ApiError::not_found("cadence not found"));
    }
    Ok(())
}

fn check_date_range(starts_on: NaiveDate, ends_on: NaiveDate) -> Result<(), ApiError> {
    if starts_on >= ends_on {
        return Err(ApiError::validation("starts_on must be before ends_on"));
    }
    Ok(())
}

pub async fn create_timeframe(
    ctx: &ApiContext,
    actor: &Actor,
    request: &CreateTimeframeRequest,
) -> Result<TimeframeSummary, ApiError> {
    actor.require_manager()?;
    let name = required_text("timeframe name", &request.name, 80)?;
    check_date_range(request.starts_on, request.ends_on)?;
    if let Some(cadence_id) = request.cadence_id {
        get_cadence(ctx, actor, cadence_id).await?;
    }
    let timeframe_id = ctx
        .storage
        .create_timeframe(
            actor.tenant_id,
            request.cadence_id,
            &name,
            request.starts_on,
            request.ends_on,
        )
        .await
        .map_err(internal)?;
    get_timeframe(ctx, actor, timeframe_id).await
}

pub async fn list_timeframes(ctx: &ApiContext, actor: &Actor) -> Result<Vec<TimeframeSummary>, ApiError> {
    ctx.storage
        .list_timeframes(actor.tenant_id)
        .await
        .map_err(internal)
}

pub(crate) async fn get_timeframe(
    ctx: &ApiContext,
    actor: &Actor,
    timeframe_id: TimeframeId,
) -> Result<TimeframeSummary, ApiError> {
    ctx.storage
        .timeframe(actor.tenant_id, timeframe_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("timeframe not found"))
}

pub async fn update_timeframe(
    ctx: &ApiContext,
    actor: &Actor,
    timeframe_id: TimeframeId,
    request: &UpdateTimeframeRequest,
) -> Result<TimeframeSummary, ApiError> {
    actor.require_manager()?;
    let mut timeframe = get_timeframe(ctx, actor, timeframe_id).await?;
    if let Some(name) = &request.name {
        timeframe.name = required_text("timeframe name", name, 80)?;
    }
    if let Some(starts_on) = request.starts_on {
        timeframe.starts_on = starts_on;
    }
    if let Some(ends_on) = request.ends_on {
        timeframe.ends_on = ends_on;
    }
    check_date_range(timeframe.starts_on, timeframe.ends_on)?;
    ctx.storage
        .update_timeframe(actor.tenant_id, &timeframe)
        .await
        .map_err(internal)?;
    Ok(timeframe)
}

pub async fn delete_timeframe(
    ctx: &ApiContext,
    actor: &Actor,
    timeframe_id: TimeframeId,
) -> Result<(), ApiError> {
    actor.require_manager()?;
    let deleted = ctx
        .storage
        .delete_timeframe(actor.tenant_id, timeframe_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(ApiError::not_found("timeframe not found"));
    }
    Ok(())
}

/// Name and inclusive date range of every period of `year` for a cadence of
/// `period_months`.
pub fn periods_for_year(period_months: u32, year: i32) -> Vec<(String, NaiveDate, NaiveDate)> {
    if !ALLOWED_PERIODS.contains(&period_months) {
        return Vec::new();
    }
    let count = 12 / period_months;
    (0..count)
        .filter_map(|index| {
            let first_month = index * period_months + 1;
            let starts_on = NaiveDate::from_ymd_opt(year, first_month, 1)?;
            let next_start = if first_month + period_months > 12 {
                NaiveDate::from_ymd_opt(year + 1, 1, 1)?
            } else {
                NaiveDate::from_ymd_opt(year, first_month + period_months, 1)?
            };
            let ends_on = next_start.pred_opt()?;
            let name = match period_months {
                1 => format!("{} {year}", MONTH_NAMES[(first_month - 1) as usize]),
                3 => format!("Q{} {year}", index + 1),
                6 => format!("H{} {year}", index + 1),
                _ => format!("FY {year}"),
            };
            Some((name, starts_on, ends_on))
        })
        .collect()
}

/// Creates the timeframes of `year` for a cadence, skipping names that
/// already exist. Returns only the newly created timeframes.
pub async fn generate_timeframes(
    ctx: &ApiContext,
    actor: &Actor,
    cadence_id: CadenceId,
    request: &GenerateTimeframesRequest,
) -> Result<Vec<TimeframeSummary>, ApiError> {
    actor.require_manager()?;
    if !(1970..=9999).contains(&request.year) {
        return Err(ApiError::validation("year is out of range"));
    }
    let cadence = get_cadence(ctx, actor, cadence_id).await?;
    let existing: Vec<String> = list_timeframes(ctx, actor)
        .await?
        .into_iter()
        .map(|t| t.name)
        .collect();

    let mut created = Vec::new();
    for (name, starts_on, ends_on) in periods_for_year(cadence.period_months, request.year) {
        if existing.contains(&name) {
            continue;
        }
        let timeframe_id = ctx
            .storage
            .create_timeframe(actor.tenant_id, Some(cadence_id), &name, starts_on, ends_on)
            .await
            .map_err(internal)?;
        created.push(get_timeframe(ctx, actor, timeframe_id).await?);
    }
    info!(
        tenant_id = actor.tenant_id.0,
        cadence_id = cadence_id.0,
        year = request.year,
        created = created.len(),
        "timeframes generated"
    );
    Ok(created)
}

#[cfg(test)]
#[path = "tests/org_tests.rs"]
mod tests;
