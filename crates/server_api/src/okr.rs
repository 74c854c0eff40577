use std::collections::{HashMap, HashSet};

use shared::{
    domain::{KeyResultId, MetricType, ObjectiveId, StatusId, TeamId, TemplateId, TimeframeId, UserId},
    error::ApiError,
    okr::{
        ApplyTemplateRequest, CheckInSummary, CreateKeyResultRequest, CreateObjectiveRequest,
        CreateTemplateRequest, KeyResultCheckInRequest, KeyResultSummary, KeyResultTemplate,
        ObjectiveCheckInRequest, ObjectiveDetail, ObjectiveFilter, ObjectiveNode, ObjectiveSummary,
        TemplateSummary, UpdateKeyResultRequest, UpdateObjectiveRequest,
    },
    progress::{average_progress, weighted_progress},
    protocol::ServerEvent,
};
use storage::{NewKeyResult, NewObjective, ObjectiveListFilter};
use tracing::{debug, info};

use crate::{
    internal, optional_text,
    org::{active_tenant_user, get_team, get_timeframe},
    required_text, Actor, ApiContext, Envelope,
};

const MAX_TITLE_CHARS: usize = 200;
const MAX_TEXT_CHARS: usize = 2000;

fn publish_changed(ctx: &ApiContext, actor: &Actor, objective_id: ObjectiveId) {
    ctx.publish(Envelope::tenant(
        actor.tenant_id,
        ServerEvent::ObjectiveChanged { objective_id },
    ));
}

pub(crate) async fn objective_summary(
    ctx: &ApiContext,
    actor: &Actor,
    objective_id: ObjectiveId,
) -> Result<ObjectiveSummary, ApiError> {
    ctx.storage
        .objective(actor.tenant_id, objective_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("objective not found"))
}

async fn key_result_summary(
    ctx: &ApiContext,
    actor: &Actor,
    key_result_id: KeyResultId,
) -> Result<KeyResultSummary, ApiError> {
    ctx.storage
        .key_result(actor.tenant_id, key_result_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("key result not found"))
}

pub(crate) async fn ensure_status(ctx: &ApiContext, actor: &Actor, status_id: StatusId) -> Result<(), ApiError> {
    ctx.storage
        .status(actor.tenant_id, status_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("status not found"))?;
    Ok(())
}

async fn check_references(
    ctx: &ApiContext,
    actor: &Actor,
    team_id: Option<TeamId>,
    timeframe_id: Option<TimeframeId>,
    owner_id: Option<UserId>,
) -> Result<(), ApiError> {
    if let Some(team_id) = team_id {
        get_team(ctx, actor, team_id).await?;
    }
    if let Some(timeframe_id) = timeframe_id {
        get_timeframe(ctx, actor, timeframe_id).await?;
    }
    if let Some(owner_id) = owner_id {
        active_tenant_user(ctx, actor, owner_id).await?;
    }
    Ok(())
}

/// Rejects a parent that is the objective itself or one of its descendants.
async fn ensure_acyclic(
    ctx: &ApiContext,
    actor: &Actor,
    objective_id: ObjectiveId,
    parent_id: ObjectiveId,
) -> Result<(), ApiError> {
    let mut visited = HashSet::new();
    let mut cursor = Some(parent_id);
    while let Some(id) = cursor {
        if id == objective_id {
            return Err(ApiError::validation(
                "an objective cannot be its own ancestor",
            ));
        }
        if !visited.insert(id) {
            break;
        }
        cursor = ctx
            .storage
            .objective_parent(actor.tenant_id, id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::not_found("parent objective not found"))?;
    }
    Ok(())
}

/// Recomputes progress for `objective_id` and every ancestor above it.
pub(crate) async fn recompute_progress(
    ctx: &ApiContext,
    actor: &Actor,
    objective_id: ObjectiveId,
) -> Result<(), ApiError> {
    let mut visited = HashSet::new();
    let mut cursor = Some(objective_id);
    while let Some(id) = cursor {
        if !visited.insert(id) {
            break;
        }
        let key_results = ctx
            .storage
            .list_key_results(actor.tenant_id, id)
            .await
            .map_err(internal)?;
        let progress = if key_results.is_empty() {
            let children = ctx
                .storage
                .child_objective_progress(actor.tenant_id, id)
                .await
                .map_err(internal)?;
            average_progress(children)
        } else {
            weighted_progress(key_results.iter().map(|kr| (kr.progress, kr.weight)))
        };
        ctx.storage
            .set_objective_progress(actor.tenant_id, id, progress)
            .await
            .map_err(internal)?;
        debug!(objective_id = id.0, progress, "objective progress updated");
        publish_changed(ctx, actor, id);

        cursor = ctx
            .storage
            .objective_parent(actor.tenant_id, id)
            .await
            .map_err(internal)?
            .flatten();
    }
    Ok(())
}

pub async fn create_objective(
    ctx: &ApiContext,
    actor: &Actor,
    request: &CreateObjectiveRequest,
) -> Result<ObjectiveDetail, ApiError> {
    let title = required_text("title", &request.title, MAX_TITLE_CHARS)?;
    let description = optional_text("description", request.description.as_deref(), MAX_TEXT_CHARS)?;
    check_references(ctx, actor, request.team_id, request.timeframe_id, request.owner_id).await?;
    if let Some(parent_id) = request.parent_id {
        objective_summary(ctx, actor, parent_id).await?;
    }
    let status_id = match request.status_id {
        Some(status_id) => {
            ensure_status(ctx, actor, status_id).await?;
            status_id
        }
        None => ctx
            .storage
            .list_statuses(actor.tenant_id)
            .await
            .map_err(internal)?
            .first()
            .map(|status| status.status_id)
            .ok_or_else(|| ApiError::validation("tenant has no statuses configured"))?,
    };

    let objective_id = ctx
        .storage
        .create_objective(
            actor.tenant_id,
            &NewObjective {
                title,
                description,
                team_id: request.team_id,
                timeframe_id: request.timeframe_id,
                owner_id: request.owner_id,
                parent_id: request.parent_id,
                status_id: Some(status_id),
            },
        )
        .await
        .map_err(internal)?;
    info!(tenant_id = actor.tenant_id.0, objective_id = objective_id.0, "objective created");

    recompute_progress(ctx, actor, objective_id).await?;
    ctx.publish(Envelope::tenant(
        actor.tenant_id,
        ServerEvent::BoardChanged {
            status_id: Some(status_id),
        },
    ));
    get_objective(ctx, actor, objective_id).await
}

pub async fn get_objective(
    ctx: &ApiContext,
    actor: &Actor,
    objective_id: ObjectiveId,
) -> Result<ObjectiveDetail, ApiError> {
    let objective = objective_summary(ctx, actor, objective_id).await?;
    let key_results = ctx
        .storage
        .list_key_results(actor.tenant_id, objective_id)
        .await
        .map_err(internal)?;
    let child_ids = ctx
        .storage
        .child_objective_ids(actor.tenant_id, objective_id)
        .await
        .map_err(internal)?;
    Ok(ObjectiveDetail {
        objective,
        key_results,
        child_ids,
    })
}

pub async fn list_objectives(
    ctx: &ApiContext,
    actor: &Actor,
    filter: &ObjectiveFilter,
) -> Result<Vec<ObjectiveSummary>, ApiError> {
    ctx.storage
        .list_objectives(
            actor.tenant_id,
            &ObjectiveListFilter {
                team_id: filter.team_id.map(TeamId),
                timeframe_id: filter.timeframe_id.map(TimeframeId),
                status_id: filter.status_id.map(StatusId),
                owner_id: filter.owner_id.map(UserId),
            },
        )
        .await
        .map_err(internal)
}

pub async fn update_objective(
    ctx: &ApiContext,
    actor: &Actor,
    objective_id: ObjectiveId,
    request: &UpdateObjectiveRequest,
) -> Result<ObjectiveDetail, ApiError> {
    let mut objective = objective_summary(ctx, actor, objective_id).await?;
    let previous_parent = objective.parent_id;

    if let Some(title) = &request.title {
        objective.title = required_text("title", title, MAX_TITLE_CHARS)?;
    }
    if let Some(description) = &request.description {
        objective.description = optional_text("description", description.as_deref(), MAX_TEXT_CHARS)?;
    }
    if let Some(team_id) = request.team_id {
        objective.team_id = team_id;
    }
    if let Some(timeframe_id) = request.timeframe_id {
        objective.timeframe_id = timeframe_id;
    }
    if let Some(owner_id) = request.owner_id {
        objective.owner_id = owner_id;
    }
    check_references(
        ctx,
        actor,
        request.team_id.flatten(),
        request.timeframe_id.flatten(),
        request.owner_id.flatten(),
    )
    .await?;
    if let Some(parent_id) = request.parent_id {
        if let Some(parent_id) = parent_id {
            ensure_acyclic(ctx, actor, objective_id, parent_id).await?;
        }
        objective.parent_id = parent_id;
    }

    ctx.storage
        .update_objective(actor.tenant_id, &objective)
        .await
        .map_err(internal)?;

    if objective.parent_id != previous_parent {
        if let Some(previous_parent) = previous_parent {
            recompute_progress(ctx, actor, previous_parent).await?;
        }
        recompute_progress(ctx, actor, objective_id).await?;
    } else {
        publish_changed(ctx, actor, objective_id);
    }
    get_objective(ctx, actor, objective_id).await
}

pub async fn delete_objective(
    ctx: &ApiContext,
    actor: &Actor,
    objective_id: ObjectiveId,
) -> Result<(), ApiError> {
    let objective = objective_summary(ctx, actor, objective_id).await?;
    ctx.storage
        .delete_objective(actor.tenant_id, objective_id)
        .await
        .map_err(internal)?;
    info!(tenant_id = actor.tenant_id.0, objective_id = objective_id.0, "objective deleted");

    ctx.publish(Envelope::tenant(
        actor.tenant_id,
        ServerEvent::ObjectiveDeleted { objective_id },
    ));
    ctx.publish(Envelope::tenant(
        actor.tenant_id,
        ServerEvent::BoardChanged {
            status_id: objective.status_id,
        },
    ));
    if let Some(parent_id) = objective.parent_id {
        recompute_progress(ctx, actor, parent_id).await?;
    }
    Ok(())
}

/// Objectives of a timeframe (or all) nested under their parents. An
/// objective whose parent falls outside the selection becomes a root.
pub async fn objective_tree(
    ctx: &ApiContext,
    actor: &Actor,
    timeframe_id: Option<TimeframeId>,
) -> Result<Vec<ObjectiveNode>, ApiError> {
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

    let ids: HashSet<ObjectiveId> = objectives.iter().map(|o| o.objective_id).collect();
    let mut children: HashMap<Option<ObjectiveId>, Vec<ObjectiveSummary>> = HashMap::new();
    for objective in objectives {
        let parent = objective.parent_id.filter(|parent| ids.contains(parent));
        children.entry(parent).or_default().push(objective);
    }

    fn build(
        parent: Option<ObjectiveId>,
        children: &mut HashMap<Option<ObjectiveId>, Vec<ObjectiveSummary>>,
    ) -> Vec<ObjectiveNode> {
        let Some(level) = children.remove(&parent) else {
            return Vec::new();
        };
        level
            .into_iter()
            .map(|objective| {
                let id = objective.objective_id;
                ObjectiveNode {
                    objective,
                    children: build(Some(id), children),
                }
            })
            .collect()
    }

    Ok(build(None, &mut children))
}

fn check_value(field: &str, value: f64) -> Result<f64, ApiError> {
    if !value.is_finite() {
        return Err(ApiError::validation(format!("{field} must be a finite number")));
    }
    Ok(value)
}

fn check_weight(weight: f64) -> Result<f64, ApiError> {
    if !weight.is_finite() || weight <= 0.0 {
        return Err(ApiError::validation("weight must be greater than zero"));
    }
    Ok(weight)
}

pub async fn create_key_result(
    ctx: &ApiContext,
    actor: &Actor,
    objective_id: ObjectiveId,
    request: &CreateKeyResultRequest,
) -> Result<KeyResultSummary, ApiError> {
    objective_summary(ctx, actor, objective_id).await?;
    let title = required_text("title", &request.title, MAX_TITLE_CHARS)?;
    let unit = optional_text("unit", request.unit.as_deref(), 20)?;
    let weight = check_weight(request.weight)?;
    let (start_value, target_value) = if request.metric_type == MetricType::Boolean {
        (0.0, 1.0)
    } else {
        (
            check_value("start_value", request.start_value)?,
            check_value("target_value", request.target_value)?,
        )
    };
    if let Some(owner_id) = request.owner_id {
        active_tenant_user(ctx, actor, owner_id).await?;
    }

    let key_result_id = ctx
        .storage
        .create_key_result(
            actor.tenant_id,
            &NewKeyResult {
                objective_id,
                owner_id: request.owner_id,
                title,
                metric_type: request.metric_type,
                start_value,
                target_value,
                unit,
                weight,
            },
        )
        .await
        .map_err(internal)?;
    recompute_progress(ctx, actor, objective_id).await?;
    key_result_summary(ctx, actor, key_result_id).await
}

pub async fn list_key_results(
    ctx: &ApiContext,
    actor: &Actor,
    objective_id: ObjectiveId,
) -> Result<Vec<KeyResultSummary>, ApiError> {
    objective_summary(ctx, actor, objective_id).await?;
    ctx.storage
        .list_key_results(actor.tenant_id, objective_id)
        .await
        .map_err(internal)
}

pub async fn update_key_result(
    ctx: &ApiContext,
    actor: &Actor,
    key_result_id: KeyResultId,
    request: &UpdateKeyResultRequest,
) -> Result<KeyResultSummary, ApiError> {
    let mut key_result = key_result_summary(ctx, actor, key_result_id).await?;
    if let Some(title) = &request.title {
        key_result.title = required_text("title", title, MAX_TITLE_CHARS)?;
    }
    if key_result.metric_type != MetricType::Boolean {
        if let Some(start_value) = request.start_value {
            key_result.start_value = check_value("start_value", start_value)?;
        }
        if let Some(target_value) = request.target_value {
            key_result.target_value = check_value("target_value", target_value)?;
        }
    }
    if let Some(weight) = request.weight {
        key_result.weight = check_weight(weight)?;
    }
    if let Some(unit) = &request.unit {
        key_result.unit = optional_text("unit", unit.as_deref(), 20)?;
    }
    if let Some(owner_id) = request.owner_id {
        if let Some(owner_id) = owner_id {
            active_tenant_user(ctx, actor, owner_id).await?;
        }
        key_result.owner_id = owner_id;
    }

    ctx.storage
        .update_key_result(actor.tenant_id, &key_result)
        .await
        .map_err(internal)?;
    recompute_progress(ctx, actor, key_result.objective_id).await?;
    key_result_summary(ctx, actor, key_result_id).await
}

pub async fn delete_key_result(
    ctx: &ApiContext,
    actor: &Actor,
    key_result_id: KeyResultId,
) -> Result<(), ApiError> {
    let key_result = key_result_summary(ctx, actor, key_result_id).await?;
    ctx.storage
        .delete_key_result(actor.tenant_id, key_result_id)
        .await
        .map_err(internal)?;
    recompute_progress(ctx, actor, key_result.objective_id).await
}

pub async fn check_in_key_result(
    ctx: &ApiContext,
    actor: &Actor,
    key_result_id: KeyResultId,
    request: &KeyResultCheckInRequest,
) -> Result<CheckInSummary, ApiError> {
    let key_result = key_result_summary(ctx, actor, key_result_id).await?;
    let value = check_value("value", request.value)?;
    let note = optional_text("note", request.note.as_deref(), MAX_TEXT_CHARS)?;

    let check_in_id = ctx
        .storage
        .record_key_result_check_in(
            actor.tenant_id,
            key_result_id,
            actor.user_id,
            value,
            request.confidence,
            note.as_deref(),
        )
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("key result not found"))?;
    recompute_progress(ctx, actor, key_result.objective_id).await?;
    check_in_summary(ctx, actor, check_in_id).await
}

pub async fn check_in_objective(
    ctx: &ApiContext,
    actor: &Actor,
    objective_id: ObjectiveId,
    request: &ObjectiveCheckInRequest,
) -> Result<CheckInSummary, ApiError> {
    objective_summary(ctx, actor, objective_id).await?;
    let note = optional_text("note", request.note.as_deref(), MAX_TEXT_CHARS)?;
    let check_in_id = ctx
        .storage
        .record_objective_check_in(
            actor.tenant_id,
            objective_id,
            actor.user_id,
            request.confidence,
            note.as_deref(),
        )
        .await
        .map_err(internal)?;
    publish_changed(ctx, actor, objective_id);
    check_in_summary(ctx, actor, check_in_id).await
}

async fn check_in_summary(
    ctx: &ApiContext,
    actor: &Actor,
    check_in_id: shared::domain::CheckInId,
) -> Result<CheckInSummary, ApiError> {
    ctx.storage
        .check_in(actor.tenant_id, check_in_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("check-in not found"))
}

pub async fn objective_check_ins(
    ctx: &ApiContext,
    actor: &Actor,
    objective_id: ObjectiveId,
) -> Result<Vec<CheckInSummary>, ApiError> {
    objective_summary(ctx, actor, objective_id).await?;
    ctx.storage
        .objective_check_ins(actor.tenant_id, objective_id)
        .await
        .map_err(internal)
}

pub async fn key_result_check_ins(
    ctx: &ApiContext,
    actor: &Actor,
    key_result_id: KeyResultId,
) -> Result<Vec<CheckInSummary>, ApiError> {
    key_result_summary(ctx, actor, key_result_id).await?;
    ctx.storage
        .key_result_check_ins(actor.tenant_id, key_result_id)
        .await
        .map_err(internal)
}

pub async fn create_template(
    ctx: &ApiContext,
    actor: &Actor,
    request: &CreateTemplateRequest,
) -> Result<TemplateSummary, ApiError> {
    actor.require_manager()?;
    let name = required_text("template name", &request.name, 80)?;
    let description = optional_text("description", request.description.as_deref(), MAX_TEXT_CHARS)?;
    let objective_title = required_text("objective title", &request.objective_title, MAX_TITLE_CHARS)?;
    let mut key_results = Vec::with_capacity(request.key_results.len());
    for template in &request.key_results {
        let target_value = if template.metric_type == MetricType::Boolean {
            1.0
        } else {
            check_value("target_value", template.target_value)?
        };
        key_results.push(KeyResultTemplate {
            title: required_text("key result title", &template.title, MAX_TITLE_CHARS)?,
            metric_type: template.metric_type,
            target_value,
            unit: optional_text("unit", template.unit.as_deref(), 20)?,
        });
    }

    let template_id = ctx
        .storage
        .create_template(
            actor.tenant_id,
            &name,
            description.as_deref(),
            &objective_title,
            &key_results,
        )
        .await
        .map_err(internal)?;
    template_summary(ctx, actor, template_id).await
}

async fn template_summary(
    ctx: &ApiContext,
    actor: &Actor,
    template_id: TemplateId,
) -> Result<TemplateSummary, ApiError> {
    ctx.storage
        .template(actor.tenant_id, template_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("template not found"))
}

pub async fn list_templates(ctx: &ApiContext, actor: &Actor) -> Result<Vec<TemplateSummary>, ApiError> {
    ctx.storage
        .list_templates(actor.tenant_id)
        .await
        .map_err(internal)
}

pub async fn delete_template(
    ctx: &ApiContext,
    actor: &Actor,
    template_id: TemplateId,
) -> Result<(), ApiError> {
    actor.require_manager()?;
    let deleted = ctx
        .storage
        .delete_template(actor.tenant_id, template_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(ApiError::not_found("template not found"));
    }
    Ok(())
}

/// Instantiates a template as a new objective with one key result per
/// template entry, all starting at zero.
pub async fn apply_template(
    ctx: &ApiContext,
    actor: &Actor,
    template_id: TemplateId,
    request: &ApplyTemplateRequest,
) -> Result<ObjectiveDetail, ApiError> {
    let template = template_summary(ctx, actor, template_id).await?;
    let created = create_objective(
        ctx,
        actor,
        &CreateObjectiveRequest {
            title: template.objective_title.clone(),
            description: template.description.clone(),
            team_id: request.team_id,
            timeframe_id: request.timeframe_id,
            owner_id: request.owner_id,
            parent_id: None,
            status_id: None,
        },
    )
    .await?;
    let objective_id = created.objective.objective_id;

    for key_result in &template.key_results {
        create_key_result(
            ctx,
            actor,
            objective_id,
            &CreateKeyResultRequest {
                title: key_result.title.clone(),
                metric_type: key_result.metric_type,
                start_value: 0.0,
                target_value: key_result.target_value,
                unit: key_result.unit.clone(),
                weight: 1.0,
                owner_id: request.owner_id,
            },
        )
        .await?;
    }
    info!(
        tenant_id = actor.tenant_id.0,
        template_id = template_id.0,
        objective_id = objective_id.0,
        "template applied"
    );
    get_objective(ctx, actor, objective_id).await
}

#[cfg(test)]
#[path = "tests/okr_tests.rs"]
mod tests;
