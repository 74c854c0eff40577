use shared::{
    domain::UserId,
    error::ApiError,
    okr::{BadgeSummary, CreateBadgeRequest, FeedbackSummary, GiveFeedbackRequest},
    protocol::ServerEvent,
};
use tracing::info;

use crate::{
    internal,
    okr::objective_summary,
    optional_text,
    org::{active_tenant_user, tenant_user},
    required_text, Actor, ApiContext, Envelope,
};

pub async fn create_badge(
    ctx: &ApiContext,
    actor: &Actor,
    request: &CreateBadgeRequest,
) -> Result<BadgeSummary, ApiError> {
    actor.require_manager()?;
    let name = required_text("badge name", &request.name, 60)?;
    let description = optional_text("description", request.description.as_deref(), 500)?;
    let icon = required_text("icon", &request.icon, 16)?;
    let badge_id = ctx
        .storage
        .create_badge(actor.tenant_id, &name, description.as_deref(), &icon)
        .await
        .map_err(internal)?;
    ctx.storage
        .badge(actor.tenant_id, badge_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("badge not found"))
}

pub async fn list_badges(ctx: &ApiContext, actor: &Actor) -> Result<Vec<BadgeSummary>, ApiError> {
    ctx.storage
        .list_badges(actor.tenant_id)
        .await
        .map_err(internal)
}

pub async fn give_feedback(
    ctx: &ApiContext,
    actor: &Actor,
    request: &GiveFeedbackRequest,
) -> Result<FeedbackSummary, ApiError> {
    if request.to_user_id == actor.user_id {
        return Err(ApiError::validation("cannot give feedback to yourself"));
    }
    let message = required_text("message", &request.message, 2000)?;
    active_tenant_user(ctx, actor, request.to_user_id).await?;
    if let Some(badge_id) = request.badge_id {
        ctx.storage
            .badge(actor.tenant_id, badge_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::not_found("badge not found"))?;
    }
    if let Some(objective_id) = request.objective_id {
        objective_summary(ctx, actor, objective_id).await?;
    }

    let feedback_id = ctx
        .storage
        .create_feedback(
            actor.tenant_id,
            actor.user_id,
            request.to_user_id,
            &message,
            request.badge_id,
            request.objective_id,
        )
        .await
        .map_err(internal)?;
    let feedback = ctx
        .storage
        .feedback(actor.tenant_id, feedback_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("feedback not found"))?;
    info!(
        tenant_id = actor.tenant_id.0,
        from = actor.user_id.0,
        to = request.to_user_id.0,
        "feedback given"
    );

    ctx.publish(Envelope::users(
        actor.tenant_id,
        vec![request.to_user_id],
        ServerEvent::FeedbackReceived {
            feedback: feedback.clone(),
        },
    ));
    Ok(feedback)
}

pub async fn list_feedback(
    ctx: &ApiContext,
    actor: &Actor,
    user_id: UserId,
) -> Result<Vec<FeedbackSummary>, ApiError> {
    tenant_user(ctx, actor, user_id).await?;
    ctx.storage
        .feedback_for_user(actor.tenant_id, user_id)
        .await
        .map_err(internal)
}

#[cfg(test)]
mod tests {
    use shared::{domain::Role, error::ErrorCode};

    use super::*;
    use crate::test_support::{context, owner, user};

    #[tokio::test]
    async fn feedback_reaches_only_the_receiver() {
        let ctx = context().await;
        let olivia = owner(&ctx, "acme").await;
        let mia = user(&ctx, &olivia, "mia", Role::Member).await;
        let mut events = ctx.subscribe();

        let badge = create_badge(
            &ctx,
            &olivia,
            &CreateBadgeRequest {
                name: "Team player".into(),
                description: None,
                icon: "🤝".into(),
            },
        )
        .await
        .expect("badge");
        let feedback = give_feedback(
            &ctx,
            &olivia,
            &GiveFeedbackRequest {
                to_user_id: mia.user_id,
                message: "Great launch".into(),
                badge_id: Some(badge.badge_id),
                objective_id: None,
            },
        )
        .await
        .expect("feedback");
        assert_eq!(feedback.badge, Some(badge));
        assert_eq!(feedback.from_name, "Olivia Owner");

        let envelope = events.recv().await.expect("event");
        let rooms = Default::default();
        assert!(envelope.delivers_to(mia.tenant_id, mia.user_id, &rooms));
        assert!(!envelope.delivers_to(olivia.tenant_id, olivia.user_id, &rooms));

        let received = list_feedback(&ctx, &olivia, mia.user_id).await.expect("list");
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message, "Great launch");
    }

    #[tokio::test]
    async fn feedback_to_self_or_foreign_badges_is_rejected() {
        let ctx = context().await;
        let olivia = owner(&ctx, "acme").await;
        let mia = user(&ctx, &olivia, "mia", Role::Member).await;
        let other = owner(&ctx, "globex").await;
        let foreign_badge = create_badge(
            &ctx,
            &other,
            &CreateBadgeRequest {
                name: "Star".into(),
                description: None,
                icon: "⭐".into(),
            },
        )
        .await
        .expect("badge");

        let err = give_feedback(
            &ctx,
            &mia,
            &GiveFeedbackRequest {
                to_user_id: mia.user_id,
                message: "me".into(),
                badge_id: None,
                objective_id: None,
            },
        )
        .await
        .expect_err("self");
        assert_eq!(err.code, ErrorCode::Validation);

        let err = give_feedback(
            &ctx,
            &mia,
            &GiveFeedbackRequest {
                to_user_id: olivia.user_id,
                message: "thanks".into(),
                badge_id: Some(foreign_badge.badge_id),
                objective_id: None,
            },
        )
        .await
        .expect_err("foreign badge");
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn members_cannot_create_badges() {
        let ctx = context().await;
        let olivia = owner(&ctx, "acme").await;
        let mia = user(&ctx, &olivia, "mia", Role::Member).await;
        let err = create_badge(
            &ctx,
            &mia,
            &CreateBadgeRequest {
                name: "Nope".into(),
                description: None,
                icon: "x".into(),
            },
        )
        .await
        .expect_err("forbidden");
        assert_eq!(err.code, ErrorCode::Forbidden);
    }
}
