use std::collections::HashSet;

use chrono::{Duration, Utc};
use shared::{
    domain::TimeframeId,
    error::ApiError,
    okr::{DashboardReport, StatusCount, TeamProgress},
    progress::average_progress,
};
use storage::ObjectiveListFilter;

use crate::{internal, org::get_timeframe, Actor, ApiContext};

const RECENT_CHECK_INS: u32 = 10;
const ACTIVITY_WINDOW_DAYS: i64 = 7;

/// Aggregates objectives of a timeframe (or all of them). Check-in activity
/// always covers the whole tenant.
pub async fn dashboard(
    ctx: &ApiContext,
    actor: &Actor,
    timeframe_id: Option<TimeframeId>,
) -> Result<DashboardReport, ApiError> {
    if let Some(timeframe_id) = timeframe_id {
        get_timeframe(ctx, actor, timeframe_id).await?;
    }
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
    let statuses = ctx
        .storage
        .list_statuses(actor.tenant_id)
        .await
        .map_err(internal)?;
    let teams = ctx
        .storage
        .list_teams(actor.tenant_id)
        .await
        .map_err(internal)?;

    let done: HashSet<_> = statuses
        .iter()
        .filter(|status| status.is_done)
        .map(|status| status.status_id)
        .collect();
    let completed = objectives
        .iter()
        .filter(|o| o.status_id.is_some_and(|id| done.contains(&id)))
        .count();

    let by_status = statuses
        .iter()
        .map(|status| StatusCount {
            status_id: status.status_id,
            name: status.name.clone(),
            count: objectives
                .iter()
                .filter(|o| o.status_id == Some(status.status_id))
                .count() as u32,
        })
        .collect();

    let by_team = teams
        .into_iter()
        .map(|team| {
            let progress: Vec<f64> = objectives
                .iter()
                .filter(|o| o.team_id == Some(team.team_id))
                .map(|o| o.progress)
                .collect();
            TeamProgress {
                team_id: team.team_id,
                name: team.name,
                objective_count: progress.len() as u32,
                average_progress: average_progress(progress),
            }
        })
        .collect();

    let since = Utc::now() - Duration::days(ACTIVITY_WINDOW_DAYS);
    let check_ins_last_7_days = ctx
        .storage
        .count_check_ins_since(actor.tenant_id, since)
        .await
        .map_err(internal)?;
    let recent_check_ins = ctx
        .storage
        .recent_check_ins(actor.tenant_id, RECENT_CHECK_INS)
        .await
        .map_err(internal)?;

    Ok(DashboardReport {
        timeframe_id,
        total_objectives: objectives.len() as u32,
        completed_objectives: completed as u32,
        average_progress: average_progress(objectives.iter().map(|o| o.progress)),
        by_status,
        by_team,
        check_ins_last_7_days,
        recent_check_ins,
    })
}

#[cfg(test)]
mod tests {
    use shared::okr::{
        CreateKeyResultRequest, CreateObjectiveRequest, CreateTeamRequest, KeyResultCheckInRequest,
        MoveObjectiveRequest,
    };
    use shared::domain::{Confidence, MetricType};

    use super::*;
    use crate::{board, okr, org, test_support::{context, owner}};

    #[tokio::test]
    async fn dashboard_counts_done_columns_and_recent_activity() {
        let ctx = context().await;
        let olivia = owner(&ctx, "acme").await;
        let team = org::create_team(
            &ctx,
            &olivia,
            &CreateTeamRequest {
                name: "Growth".into(),
                description: None,
            },
        )
        .await
        .expect("team");

        let new_objective = |title: &str| CreateObjectiveRequest {
            title: title.into(),
            description: None,
            team_id: Some(team.team_id),
            timeframe_id: None,
            owner_id: None,
            parent_id: None,
            status_id: None,
        };
        let first = okr::create_objective(&ctx, &olivia, &new_objective("Grow"))
            .await
            .expect("first");
        let second = okr::create_objective(&ctx, &olivia, &new_objective("Retain"))
            .await
            .expect("second");

        let kr = okr::create_key_result(
            &ctx,
            &olivia,
            first.objective.objective_id,
            &CreateKeyResultRequest {
                title: "Signups".into(),
                metric_type: MetricType::Number,
                start_value: 0.0,
                target_value: 10.0,
                unit: None,
                weight: 1.0,
                owner_id: None,
            },
        )
        .await
        .expect("kr");
        okr::check_in_key_result(
            &ctx,
            &olivia,
            kr.key_result_id,
            &KeyResultCheckInRequest {
                value: 5.0,
                confidence: Confidence::High,
                note: None,
            },
        )
        .await
        .expect("check-in");

        let statuses = board::list_statuses(&ctx, &olivia).await.expect("statuses");
        let done = statuses.iter().find(|s| s.is_done).expect("done column");
        board::move_objective(
            &ctx,
            &olivia,
            second.objective.objective_id,
            &MoveObjectiveRequest {
                status_id: done.status_id,
                position: 0,
            },
        )
        .await
        .expect("move");

        let report = dashboard(&ctx, &olivia, None).await.expect("dashboard");
        assert_eq!(report.total_objectives, 2);
        assert_eq!(report.completed_objectives, 1);
        assert_eq!(report.average_progress, 25.0);
        assert_eq!(report.check_ins_last_7_days, 1);
        assert_eq!(report.recent_check_ins.len(), 1);
        assert_eq!(report.by_team.len(), 1);
        assert_eq!(report.by_team[0].objective_count, 2);
        let done_count = report
            .by_status
            .iter()
            .find(|s| s.status_id == done.status_id)
            .expect("done count");
        assert_eq!(done_count.count, 1);
    }
}
