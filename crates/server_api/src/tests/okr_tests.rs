use shared::{
    domain::{Confidence, Role},
    error::ErrorCode,
};

use super::*;
use crate::test_support::{context, owner, user};

fn objective(title: &str, parent_id: Option<ObjectiveId>) -> CreateObjectiveRequest {
    CreateObjectiveRequest {
        title: title.into(),
        description: None,
        team_id: None,
        timeframe_id: None,
        owner_id: None,
        parent_id,
        status_id: None,
    }
}

fn numeric_kr(title: &str, target: f64, weight: f64) -> CreateKeyResultRequest {
    CreateKeyResultRequest {
        title: title.into(),
        metric_type: MetricType::Number,
        start_value: 0.0,
        target_value: target,
        unit: None,
        weight,
        owner_id: None,
    }
}

async fn check_in(ctx: &ApiContext, actor: &Actor, key_result_id: KeyResultId, value: f64) -> CheckInSummary {
    check_in_key_result(
        ctx,
        actor,
        key_result_id,
        &KeyResultCheckInRequest {
            value,
            confidence: Confidence::Medium,
            note: None,
        },
    )
    .await
    .expect("check-in")
}

#[tokio::test]
async fn new_objectives_land_at_the_end_of_the_first_column() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let statuses = ctx.storage.list_statuses(olivia.tenant_id).await.expect("statuses");

    let first = create_objective(&ctx, &olivia, &objective("One", None)).await.expect("one");
    let second = create_objective(&ctx, &olivia, &objective("Two", None)).await.expect("two");
    assert_eq!(first.objective.status_id, Some(statuses[0].status_id));
    assert_eq!(first.objective.position, 0);
    assert_eq!(second.objective.position, 1);
    assert_eq!(second.objective.progress, 0.0);
}

#[tokio::test]
async fn weighted_key_results_drive_objective_progress() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let created = create_objective(&ctx, &olivia, &objective("Grow", None)).await.expect("objective");
    let objective_id = created.objective.objective_id;

    let heavy = create_key_result(&ctx, &olivia, objective_id, &numeric_kr("Revenue", 100.0, 3.0))
        .await
        .expect("heavy");
    let light = create_key_result(&ctx, &olivia, objective_id, &numeric_kr("Leads", 10.0, 1.0))
        .await
        .expect("light");

    let recorded = check_in(&ctx, &olivia, heavy.key_result_id, 50.0).await;
    assert_eq!(recorded.previous_value, Some(0.0));
    assert_eq!(recorded.new_value, Some(50.0));
    check_in(&ctx, &olivia, light.key_result_id, 10.0).await;

    let detail = get_objective(&ctx, &olivia, objective_id).await.expect("detail");
    // (50 * 3 + 100 * 1) / 4
    assert_eq!(detail.objective.progress, 62.5);
    assert_eq!(detail.key_results.len(), 2);

    let history = key_result_check_ins(&ctx, &olivia, heavy.key_result_id)
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].author_name, "Olivia Owner");
}

#[tokio::test]
async fn progress_rolls_up_the_ancestor_chain() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let root = create_objective(&ctx, &olivia, &objective("Company", None)).await.expect("root");
    let root_id = root.objective.objective_id;
    let middle = create_objective(&ctx, &olivia, &objective("Department", Some(root_id)))
        .await
        .expect("middle");
    let middle_id = middle.objective.objective_id;
    let leaf = create_objective(&ctx, &olivia, &objective("Team", Some(middle_id)))
        .await
        .expect("leaf");
    let leaf_id = leaf.objective.objective_id;
    let sibling = create_objective(&ctx, &olivia, &objective("Other team", Some(middle_id)))
        .await
        .expect("sibling");

    let kr = create_key_result(&ctx, &olivia, leaf_id, &numeric_kr("Ship", 4.0, 1.0))
        .await
        .expect("kr");
    check_in(&ctx, &olivia, kr.key_result_id, 4.0).await;

    let leaf = get_objective(&ctx, &olivia, leaf_id).await.expect("leaf");
    let middle = get_objective(&ctx, &olivia, middle_id).await.expect("middle");
    let root = get_objective(&ctx, &olivia, root_id).await.expect("root");
    assert_eq!(leaf.objective.progress, 100.0);
    assert_eq!(middle.objective.progress, 50.0);
    assert_eq!(root.objective.progress, 50.0);
    assert_eq!(middle.child_ids, vec![leaf_id, sibling.objective.objective_id]);

    delete_objective(&ctx, &olivia, sibling.objective.objective_id)
        .await
        .expect("delete sibling");
    let root = get_objective(&ctx, &olivia, root_id).await.expect("root");
    assert_eq!(root.objective.progress, 100.0);
}

#[tokio::test]
async fn parent_changes_cannot_create_cycles() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let root = create_objective(&ctx, &olivia, &objective("Root", None)).await.expect("root");
    let root_id = root.objective.objective_id;
    let child = create_objective(&ctx, &olivia, &objective("Child", Some(root_id)))
        .await
        .expect("child");
    let child_id = child.objective.objective_id;

    let to_self = UpdateObjectiveRequest {
        parent_id: Some(Some(root_id)),
        ..Default::default()
    };
    let err = update_objective(&ctx, &olivia, root_id, &to_self).await.expect_err("self");
    assert_eq!(err.code, ErrorCode::Validation);

    let to_descendant = UpdateObjectiveRequest {
        parent_id: Some(Some(child_id)),
        ..Default::default()
    };
    let err = update_objective(&ctx, &olivia, root_id, &to_descendant)
        .await
        .expect_err("descendant");
    assert_eq!(err.code, ErrorCode::Validation);

    let detach = UpdateObjectiveRequest {
        parent_id: Some(None),
        ..Default::default()
    };
    let detached = update_objective(&ctx, &olivia, child_id, &detach).await.expect("detach");
    assert_eq!(detached.objective.parent_id, None);
}

#[tokio::test]
async fn deleting_an_objective_reparents_its_children() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let root = create_objective(&ctx, &olivia, &objective("Root", None)).await.expect("root");
    let root_id = root.objective.objective_id;
    let middle = create_objective(&ctx, &olivia, &objective("Middle", Some(root_id)))
        .await
        .expect("middle");
    let leaf = create_objective(&ctx, &olivia, &objective("Leaf", Some(middle.objective.objective_id)))
        .await
        .expect("leaf");

    let mut events = ctx.subscribe();
    delete_objective(&ctx, &olivia, middle.objective.objective_id)
        .await
        .expect("delete");
    let leaf = get_objective(&ctx, &olivia, leaf.objective.objective_id)
        .await
        .expect("leaf");
    assert_eq!(leaf.objective.parent_id, Some(root_id));

    let first = events.recv().await.expect("event");
    assert!(matches!(
        first.event,
        ServerEvent::ObjectiveDeleted { objective_id } if objective_id == middle.objective.objective_id
    ));
}

#[tokio::test]
async fn objective_tree_nests_children() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let root = create_objective(&ctx, &olivia, &objective("Root", None)).await.expect("root");
    let root_id = root.objective.objective_id;
    create_objective(&ctx, &olivia, &objective("A", Some(root_id))).await.expect("a");
    create_objective(&ctx, &olivia, &objective("B", Some(root_id))).await.expect("b");
    create_objective(&ctx, &olivia, &objective("Loose", None)).await.expect("loose");

    let tree = objective_tree(&ctx, &olivia, None).await.expect("tree");
    assert_eq!(tree.len(), 2);
    let root_node = tree
        .iter()
        .find(|node| node.objective.objective_id == root_id)
        .expect("root node");
    let titles: Vec<_> = root_node.children.iter().map(|n| n.objective.title.as_str()).collect();
    assert_eq!(titles, ["A", "B"]);
}

#[tokio::test]
async fn key_result_rules_are_enforced() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let created = create_objective(&ctx, &olivia, &objective("Grow", None)).await.expect("objective");
    let objective_id = created.objective.objective_id;

    let err = create_key_result(&ctx, &olivia, objective_id, &numeric_kr("Zero", 10.0, 0.0))
        .await
        .expect_err("zero weight");
    assert_eq!(err.code, ErrorCode::Validation);

    let boolean = create_key_result(
        &ctx,
        &olivia,
        objective_id,
        &CreateKeyResultRequest {
            title: "Launch".into(),
            metric_type: MetricType::Boolean,
            start_value: 5.0,
            target_value: 42.0,
            unit: None,
            weight: 1.0,
            owner_id: None,
        },
    )
    .await
    .expect("boolean");
    assert_eq!(boolean.start_value, 0.0);
    assert_eq!(boolean.target_value, 1.0);

    check_in(&ctx, &olivia, boolean.key_result_id, 1.0).await;
    let detail = get_objective(&ctx, &olivia, objective_id).await.expect("detail");
    assert_eq!(detail.objective.progress, 100.0);

    delete_key_result(&ctx, &olivia, boolean.key_result_id)
        .await
        .expect("delete kr");
    let detail = get_objective(&ctx, &olivia, objective_id).await.expect("detail");
    assert_eq!(detail.objective.progress, 0.0);
}

#[tokio::test]
async fn objective_check_ins_are_listed_newest_first() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let created = create_objective(&ctx, &olivia, &objective("Grow", None)).await.expect("objective");
    let objective_id = created.objective.objective_id;

    for note in ["first", "second"] {
        check_in_objective(
            &ctx,
            &olivia,
            objective_id,
            &ObjectiveCheckInRequest {
                confidence: Confidence::Low,
                note: Some(note.into()),
            },
        )
        .await
        .expect("check-in");
    }
    let history = objective_check_ins(&ctx, &olivia, objective_id).await.expect("history");
    let notes: Vec<_> = history.iter().filter_map(|c| c.note.as_deref()).collect();
    assert_eq!(notes, ["second", "first"]);
    assert!(history.iter().all(|c| c.key_result_id.is_none()));
}

#[tokio::test]
async fn templates_create_objectives_with_key_results() {
    let ctx = context().await;
    let olivia = owner(&ctx, "acme").await;
    let mia = user(&ctx, &olivia, "mia", Role::Member).await;

    let request = CreateTemplateRequest {
        name: "Launch".into(),
        description: Some("Product launch".into()),
        objective_title: "Launch the product".into(),
        key_results: vec![
            KeyResultTemplate {
                title: "Beta users".into(),
                metric_type: MetricType::Number,
                target_value: 100.0,
                unit: Some("users".into()),
            },
            KeyResultTemplate {
                title: "Press release".into(),
                metric_type: MetricType::Boolean,
                target_value: 7.0,
                unit: None,
            },
        ],
    };
    let err = create_template(&ctx, &mia, &request).await.expect_err("member");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let template = create_template(&ctx, &olivia, &request).await.expect("template");
    assert_eq!(template.key_results[1].target_value, 1.0);

    let applied = apply_template(
        &ctx,
        &mia,
        template.template_id,
        &ApplyTemplateRequest {
            owner_id: Some(mia.user_id),
            ..Default::default()
        },
    )
    .await
    .expect("apply");
    assert_eq!(applied.objective.title, "Launch the product");
    assert_eq!(applied.objective.owner_id, Some(mia.user_id));
    assert_eq!(applied.key_results.len(), 2);
    assert!(applied.key_results.iter().all(|kr| kr.current_value == 0.0));

    delete_template(&ctx, &olivia, template.template_id).await.expect("delete");
    assert!(list_templates(&ctx, &olivia).await.expect("list").is_empty());
}

#[tokio::test]
async fn foreign_references_are_not_found() {
    let ctx = context().await;
    let acme = owner(&ctx, "acme").await;
    let globex = owner(&ctx, "globex").await;
    let foreign = create_objective(&ctx, &globex, &objective("Foreign", None))
        .await
        .expect("foreign");

    let err = create_objective(
        &ctx,
        &acme,
        &objective("Child of foreign", Some(foreign.objective.objective_id)),
    )
    .await
    .expect_err("foreign parent");
    assert_eq!(err.code, ErrorCode::NotFound);

    let err = create_objective(
        &ctx,
        &acme,
        &CreateObjectiveRequest {
            owner_id: Some(globex.user_id),
            ..objective("Owned elsewhere", None)
        },
    )
    .await
    .expect_err("foreign owner");
    assert_eq!(err.code, ErrorCode::NotFound);

    let err = get_objective(&ctx, &acme, foreign.objective.objective_id)
        .await
        .expect_err("foreign get");
    assert_eq!(err.code, ErrorCode::NotFound);
}
