use shared::{
    error::ErrorCode,
    okr::{CreateObjectiveRequest, ObjectiveFilter},
};

use super::*;
use crate::{
    okr,
    test_support::{context, owner, user},
};

#[tokio::test]
async fn the_last_owner_cannot_be_demoted_or_removed() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let adam = user(&ctx, &olivia, "adam", Role::Admin).await;

    let err = update_user_role(&ctx, &olivia, olivia.user_id, &UpdateRoleRequest { role: Role::Admin })
        .await
        .expect_err("last owner");
    assert_eq!(err.code, ErrorCode::Validation);

    let err = deactivate_user(&ctx, &adam, olivia.user_id)
        .await
        .expect_err("admin removing owner");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let promoted = update_user_role(&ctx, &olivia, adam.user_id, &UpdateRoleRequest { role: Role::Owner })
        .await
        .expect("promote");
    assert_eq!(promoted.role, Role::Owner);
    update_user_role(&ctx, &olivia, olivia.user_id, &UpdateRoleRequest { role: Role::Admin })
        .await
        .expect("demote with a second owner");
}

#[tokio::test]
async fn deactivated_owners_can_still_be_demoted() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let oscar = user(&ctx, &olivia, "oscar", Role::Owner).await;

    deactivate_user(&ctx, &olivia, oscar.user_id)
        .await
        .expect("deactivate second owner");
    let demoted = update_user_role(&ctx, &olivia, oscar.user_id, &UpdateRoleRequest { role: Role::Member })
        .await
        .expect("demote deactivated owner");
    assert_eq!(demoted.role, Role::Member);
    assert_eq!(
        ctx.storage
            .count_active_owners(olivia.tenant_id)
            .await
            .expect("owners"),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn owners_removing_each_other_leave_one_behind() {
    let ctx = context().await;
    for round in 0..5 {
        let olivia = owner(&ctx, &format!("acme-{round}")).await;
        let oscar = user(&ctx, &olivia, "oscar", Role::Owner).await;

        let demote = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                update_user_role(&ctx, &olivia, oscar.user_id, &UpdateRoleRequest { role: Role::Admin })
                    .await
                    .map(|_| ())
            })
        };
        let remove = {
            let ctx = ctx.clone();
            tokio::spawn(async move { deactivate_user(&ctx, &oscar, olivia.user_id).await })
        };

        let mut succeeded = 0;
        for outcome in [demote.await.expect("join"), remove.await.expect("join")] {
            match outcome {
                Ok(()) => succeeded += 1,
                Err(err) => assert_eq!(err.code, ErrorCode::Validation, "{err}"),
            }
        }
        assert_eq!(succeeded, 1);
        assert_eq!(
            ctx.storage
                .count_active_owners(olivia.tenant_id)
                .await
                .expect("owners"),
            1
        );
    }
}

#[tokio::test]
async fn members_cannot_manage_users_or_teams() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let mia = user(&ctx, &olivia, "mia", Role::Member).await;

    let err = update_user_role(&ctx, &mia, mia.user_id, &UpdateRoleRequest { role: Role::Admin })
        .await
        .expect_err("self promote");
    assert_eq!(err.code, ErrorCode::Forbidden);
    let err = create_team(
        &ctx,
        &mia,
        &CreateTeamRequest {
            name: "Rogue".into(),
            description: None,
        },
    )
    .await
    .expect_err("member team");
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn deactivating_yourself_is_rejected() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let err = deactivate_user(&ctx, &olivia, olivia.user_id)
        .await
        .expect_err("self");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn team_membership_is_idempotent() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let mia = user(&ctx, &olivia, "mia", Role::Member).await;
    let team = create_team(
        &ctx,
        &olivia,
        &CreateTeamRequest {
            name: "Platform".into(),
            description: Some("Infra".into()),
        },
    )
    .await
    .expect("team");

    add_team_member(&ctx, &olivia, team.team_id, mia.user_id).await.expect("add");
    let team = add_team_member(&ctx, &olivia, team.team_id, mia.user_id)
        .await
        .expect("add again");
    assert_eq!(team.member_ids, vec![mia.user_id]);

    let team = remove_team_member(&ctx, &olivia, team.team_id, mia.user_id)
        .await
        .expect("remove");
    assert!(team.member_ids.is_empty());
    remove_team_member(&ctx, &olivia, team.team_id, mia.user_id)
        .await
        .expect("remove again");

    let err = create_team(
        &ctx,
        &olivia,
        &CreateTeamRequest {
            name: "Platform".into(),
            description: None,
        },
    )
    .await
    .expect_err("duplicate");
    assert_eq!(err.code, ErrorCode::Conflict);
}

#[tokio::test]
async fn deleting_a_team_keeps_its_objectives() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let team = create_team(
        &ctx,
        &olivia,
        &CreateTeamRequest {
            name: "Sales".into(),
            description: None,
        },
    )
    .await
    .expect("team");
    let objective = okr::create_objective(
        &ctx,
        &olivia,
        &CreateObjectiveRequest {
            title: "Close deals".into(),
            description: None,
            team_id: Some(team.team_id),
            timeframe_id: None,
            owner_id: None,
            parent_id: None,
            status_id: None,
        },
    )
    .await
    .expect("objective");

    delete_team(&ctx, &olivia, team.team_id).await.expect("delete");
    let objectives = okr::list_objectives(&ctx, &olivia, &ObjectiveFilter::default())
        .await
        .expect("list");
    assert_eq!(objectives.len(), 1);
    assert_eq!(objectives[0].objective_id, objective.objective.objective_id);
    assert_eq!(objectives[0].team_id, None);

    let err = get_team(&ctx, &olivia, team.team_id).await.expect_err("gone");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn teams_of_other_tenants_are_not_found() {
    let ctx = context().await;
    let acme = owner(&ctx, "acme").await;
    let globex = owner(&ctx, "globex").await;
    let team = create_team(
        &ctx,
        &acme,
        &CreateTeamRequest {
            name: "Secret".into(),
            description: None,
        },
    )
    .await
    .expect("team");

    let err = get_team(&ctx, &globex, team.team_id).await.expect_err("foreign");
    assert_eq!(err.code, ErrorCode::NotFound);
    let err = delete_team(&ctx, &globex, team.team_id).await.expect_err("foreign delete");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn cadence_periods_are_validated() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let err = create_cadence(
        &ctx,
        &olivia,
        &CreateCadenceRequest {
            name: "Odd".into(),
            period_months: 5,
        },
    )
    .await
    .expect_err("five months");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[test]
fn periods_cover_the_whole_year() {
    let quarters = periods_for_year(3, 2025);
    assert_eq!(quarters.len(), 4);
    assert_eq!(quarters[0].0, "Q1 2025");
    assert_eq!(quarters[0].1, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    assert_eq!(quarters[0].2, NaiveDate::from_ymd_opt(2025, 3, 31).unwrap());
    assert_eq!(quarters[3].2, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());

    let months = periods_for_year(1, 2024);
    assert_eq!(months.len(), 12);
    assert_eq!(months[1].0, "Feb 2024");
    assert_eq!(months[1].2, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

    let halves = periods_for_year(6, 2025);
    assert_eq!(halves[1].0, "H2 2025");
    assert_eq!(periods_for_year(12, 2025)[0].0, "FY 2025");
    assert!(periods_for_year(5, 2025).is_empty());
}

#[tokio::test]
async fn generating_timeframes_skips_existing_names() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let cadence = create_cadence(
        &ctx,
        &olivia,
        &CreateCadenceRequest {
            name: "Quarterly".into(),
            period_months: 3,
        },
    )
    .await
    .expect("cadence");
    create_timeframe(
        &ctx,
        &olivia,
        &CreateTimeframeRequest {
            name: "Q2 2025".into(),
            cadence_id: None,
            starts_on: NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            ends_on: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
        },
    )
    .await
    .expect("manual timeframe");

    let created = generate_timeframes(&ctx, &olivia, cadence.cadence_id, &GenerateTimeframesRequest { year: 2025 })
        .await
        .expect("generate");
    let names: Vec<_> = created.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["Q1 2025", "Q3 2025", "Q4 2025"]);

    let again = generate_timeframes(&ctx, &olivia, cadence.cadence_id, &GenerateTimeframesRequest { year: 2025 })
        .await
        .expect("regenerate");
    assert!(again.is_empty());

    let all = list_timeframes(&ctx, &olivia).await.expect("list");
    let ordered: Vec<_> = all.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(ordered, ["Q1 2025", "Q2 2025", "Q3 2025", "Q4 2025"]);
}

#[tokio::test]
async fn timeframe_ranges_must_be_ordered() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let err = create_timeframe(
        &ctx,
        &olivia,
        &CreateTimeframeRequest {
            name: "Backwards".into(),
            cadence_id: None,
            starts_on: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            ends_on: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
        },
    )
    .await
    .expect_err("backwards");
    assert_eq!(err.code, ErrorCode::Validation);

    let timeframe = create_timeframe(
        &ctx,
        &olivia,
        &CreateTimeframeRequest {
            name: "Summer".into(),
            cadence_id: None,
            starts_on: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            ends_on: NaiveDate::from_ymd_opt(2025, 8, 31).unwrap(),
        },
    )
    .await
    .expect("timeframe");
    let err = update_timeframe(
        &ctx,
        &olivia,
        timeframe.timeframe_id,
        &UpdateTimeframeRequest {
            ends_on: Some(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()),
            ..Default::default()
        },
    )
    .await
    .expect_err("update backwards");
    assert_eq!(err.code, ErrorCode::Validation);
}
