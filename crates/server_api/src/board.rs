use std::collections::{HashMap, HashSet};

use shared::{
    domain::{ObjectiveId, StatusId, TimeframeId},
    error::ApiError,
    okr::{
        Board, BoardColumn, CreateStatusRequest, MoveObjectiveRequest, ObjectiveSummary,
        ReorderStatusesRequest, StatusSummary, UpdateStatusRequest,
    },
    protocol::ServerEvent,
};
use storage::ObjectiveListFilter;
use tracing::info;

use crate::{
    internal,
    okr::{ensure_status, objective_summary},
    org::get_timeframe,
    required_text, Actor, ApiContext, Envelope,
};

pub const DEFAULT_STATUS_COLOR: &str = "#6b7280";

fn validate_color(color: &str) -> Result<String, ApiError> {
    let color = color.trim();
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(ApiError::validation("color must look like #rrggbb"));
    }
    Ok(color.to_ascii_lowercase())
}

fn board_changed(ctx: &ApiContext, actor: &Actor, status_id: Option<StatusId>) {
    ctx.publish(Envelope::tenant(
        actor.tenant_id,
        ServerEvent::BoardChanged { status_id },
    ));
}

async fn get_status(ctx: &ApiContext, actor: &Actor, status_id: StatusId) -> Result<StatusSummary, ApiError> {
    ctx.storage
        .status(actor.tenant_id, status_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("status not found"))
}

pub async fn list_statuses(ctx: &ApiContext, actor: &Actor) -> Result<Vec<StatusSummary>, ApiError> {
    ctx.storage
        .list_statuses(actor.tenant_id)
        .await
        .map_err(internal)
}

pub async fn create_status(
    ctx: &ApiContext,
    actor: &Actor,
    request: &CreateStatusRequest,
) -> Result<StatusSummary, ApiError> {
    actor.require_manager()?;
    let name = required_text("status name", &request.name, 40)?;
    let color = match &request.color {
        Some(color) => validate_color(color)?,
        None => DEFAULT_STATUS_COLOR.to_string(),
    };
    let status_id = ctx
        .storage
        .create_status(actor.tenant_id, &name, &color, request.is_done)
        .await
        .map_err(internal)?;
    board_changed(ctx, actor, Some(status_id));
    get_status(ctx, actor, status_id).await
}

pub async fn update_status(
    ctx: &ApiContext,
    actor: &Actor,
    status_id: StatusId,
    request: &UpdateStatusRequest,
) -> Result<StatusSummary, ApiError> {
    actor.require_manager()?;
    let mut status = get_status(ctx, actor, status_id).await?;
    if let Some(name) = &request.name {
        status.name = required_text("status name", name, 40)?;
    }
    if let Some(color) = &request.color {
        status.color = validate_color(color)?;
    }
    if let Some(is_done) = request.is_done {
        status.is_done = is_done;
    }
    ctx.storage
        .update_status(actor.tenant_id, &status)
        .await
        .map_err(internal)?;
    board_changed(ctx, actor, Some(status_id));
    Ok(status)
}

pub async fn delete_status(ctx: &ApiContext, actor: &Actor, status_id: StatusId) -> Result<(), ApiError> {
    actor.require_manager()?;
    get_status(ctx, actor, status_id).await?;
    let in_use = ctx
        .storage
        .count_objectives_with_status(status_id)
        .await
        .map_err(internal)?;
    if in_use > 0 {
        return Err(ApiError::conflict(format!(
            "status is used by {in_use} objective(s)"
        )));
    }
    ctx.storage
        .delete_status(actor.tenant_id, status_id)
        .await
        .map_err(internal)?;
    board_changed(ctx, actor, None);
    Ok(())
}

/// Rewrites column order. `status_ids` must name every status of the tenant
/// exactly once.
pub async fn reorder_statuses(
    ctx: &ApiContext,
    actor: &Actor,
    request: &ReorderStatusesRequest,
) -> Result<Vec<StatusSummary>, ApiError> {
    actor.require_manager()?;
    let current: HashSet<StatusId> = list_statuses(ctx, actor)
        .await?
        .into_iter()
        .map(|status| status.status_id)
        .collect();
    let requested: HashSet<StatusId> = request.status_ids.iter().copied().collect();
    if requested.len() != request.status_ids.len() || requested != current {
        return Err(ApiError::validation(
            "status_ids must list every status exactly once",
        ));
    }
    ctx.storage
        .reorder_statuses(actor.tenant_id, &request.status_ids)
        .await
        .map_err(internal)?;
    board_changed(ctx, actor, None);
    list_statuses(ctx, actor).await
}

pub async fn board(
    ctx: &ApiContext,
    actor: &Actor,
    timeframe_id: Option<TimeframeId>,
) -> Result<Board, ApiError> {
    if let Some(timeframe_id) = timeframe_id {
        get_timeframe(ctx, actor, timeframe_id).await?;
    }
    let statuses = list_statuses(ctx, actor).await?;
    let objectives = ctx
        .storage
        .list_objectives(
            actor.tenant_id,
            &ObjectiveListFilter {
                timeframe_id,
                ..Default::default()
            },
        )
        .await
        .map_err(internal)?;

    let mut by_status: HashMap<StatusId, Vec<ObjectiveSummary>> = HashMap::new();
    let mut unassigned = Vec::new();
    for objective in objectives {
        match objective.status_id {
            Some(status_id) => by_status.entry(status_id).or_default().push(objective),
            None => unassigned.push(objective),
        }
    }

    let columns = statuses
        .into_iter()
        .map(|status| BoardColumn {
            objectives: by_status.remove(&status.status_id).unwrap_or_default(),
            status,
        })
        .collect();
    Ok(Board { columns, unassigned })
}

pub async fn move_objective(
    ctx: &ApiContext,
    actor: &Actor,
    objective_id: ObjectiveId,
    request: &MoveObjectiveRequest,
) -> Result<ObjectiveSummary, ApiError> {
    let before = objective_summary(ctx, actor, objective_id).await?;
    ensure_status(ctx, actor, request.status_id).await?;
    let position = ctx
        .storage
        .move_objective(actor.tenant_id, objective_id, request.status_id, request.position)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("objective not found"))?;
    info!(
        tenant_id = actor.tenant_id.0,
        objective_id = objective_id.0,
        status_id = request.status_id.0,
        position,
        "objective moved"
    );

    if before.status_id != Some(request.status_id) {
        board_changed(ctx, actor, before.status_id);
    }
    board_changed(ctx, actor, Some(request.status_id));
    ctx.publish(Envelope::tenant(
        actor.tenant_id,
        ServerEvent::ObjectiveChanged { objective_id },
    ));
    objective_summary(ctx, actor, objective_id).await
}

#[cfg(test)]
#[path = "tests/board_tests.rs"]
mod tests;
