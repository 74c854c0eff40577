use std::sync::Arc;

use auth::TokenConfig;
use billing::PaymentProvider;
use shared::{
    domain::{Role, TenantId, UserId},
    error::{ApiError, ErrorCode},
};
use storage::Storage;
use tokio::sync::broadcast;
use tracing::error;

pub mod board;
pub mod chat;
pub mod events;
pub mod feedback;
pub mod okr;
pub mod org;
pub mod reports;
pub mod session;
pub mod subscription;

pub use events::{Audience, Envelope};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub tokens: TokenConfig,
    pub payments: Arc<dyn PaymentProvider>,
    pub currency: String,
    pub max_attachment_bytes: usize,
    pub events: broadcast::Sender<Envelope>,
}

impl ApiContext {
    pub fn new(
        storage: Storage,
        tokens: TokenConfig,
        payments: Arc<dyn PaymentProvider>,
        currency: impl Into<String>,
        max_attachment_bytes: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            storage,
            tokens,
            payments,
            currency: currency.into(),
            max_attachment_bytes,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.events.subscribe()
    }

    /// Fans the envelope out to every live socket. Having no subscribers is
    /// not an error.
    pub fn publish(&self, envelope: Envelope) {
        let _ = self.events.send(envelope);
    }
}

/// The authenticated caller of an operation. The role is the one stored at
/// authentication time, not the one baked into the session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn require_manager(&self) -> Result<(), ApiError> {
        if self.role.is_manager() {
            Ok(())
        } else {
            Err(ApiError::forbidden("requires an owner or admin"))
        }
    }

    pub fn require_owner(&self) -> Result<(), ApiError> {
        if self.role == Role::Owner {
            Ok(())
        } else {
            Err(ApiError::forbidden("requires the tenant owner"))
        }
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    error!(error = %err, "storage operation failed");
    ApiError::new(ErrorCode::Internal, "internal error")
}

/// Maps a storage error to `conflict` when it is a uniqueness violation.
fn conflict_or_internal(err: anyhow::Error, message: &str) -> ApiError {
    if storage::is_unique_violation(&err) {
        ApiError::conflict(message)
    } else {
        internal(err)
    }
}

/// Trims `value` and checks it is non-empty and at most `max_chars` long.
fn required_text(field: &str, value: &str, max_chars: usize) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation(format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > max_chars {
        return Err(ApiError::validation(format!(
            "{field} must be at most {max_chars} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Like [`required_text`] but blank input becomes `None`.
fn optional_text(field: &str, value: Option<&str>, max_chars: usize) -> Result<Option<String>, ApiError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => required_text(field, text, max_chars).map(Some),
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
