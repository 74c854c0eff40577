use std::sync::Arc;

use auth::TokenConfig;
use billing::{PaymentStatus, SandboxProvider};
use shared::domain::Role;
use storage::Storage;

use crate::{Actor, ApiContext};

pub(crate) async fn context() -> ApiContext {
    context_with_payments(PaymentStatus::Succeeded).await
}

pub(crate) async fn context_with_payments(outcome: PaymentStatus) -> ApiContext {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    ApiContext::new(
        storage,
        TokenConfig {
            secret: "test-secret".into(),
            ttl_seconds: 3600,
        },
        Arc::new(SandboxProvider::with_outcome(outcome)),
        "usd",
        1024,
    )
}

/// Creates a tenant and returns its owner.
pub(crate) async fn owner(ctx: &ApiContext, slug: &str) -> Actor {
    let (tenant_id, user_id) = ctx
        .storage
        .bootstrap_tenant("Acme", slug, "owner", "Olivia Owner")
        .await
        .expect("tenant");
    Actor {
        tenant_id,
        user_id,
        role: Role::Owner,
    }
}

pub(crate) async fn user(ctx: &ApiContext, owner: &Actor, username: &str, role: Role) -> Actor {
    let user_id = ctx
        .storage
        .create_user(owner.tenant_id, username, username, role)
        .await
        .expect("user");
    Actor {
        tenant_id: owner.tenant_id,
        user_id,
        role,
    }
}
