//! Payment provider seam used by subscription checkout.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod sandbox;
mod stripe;

pub use sandbox::SandboxProvider;
pub use stripe::StripeProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub amount_cents: u64,
    pub currency: String,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Succeeded,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl PaymentStatus {
    /// The payment can no longer succeed without a new checkout.
    pub fn is_failed(self) -> bool {
        matches!(self, PaymentStatus::Canceled | PaymentStatus::Unknown)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("payment provider rejected the request: {0}")]
    Api(String),
    #[error("payment provider unreachable: {0}")]
    Network(String),
    #[error("unexpected payment provider response: {0}")]
    Parse(String),
    #[error("unknown payment '{0}'")]
    UnknownPayment(String),
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_payment(&self, request: PaymentRequest) -> Result<PaymentIntent, BillingError>;
    async fn payment_status(&self, payment_id: &str) -> Result<PaymentStatus, BillingError>;
    fn name(&self) -> &'static str;
}

#[cfg(test)]
#[path = "tests/billing_tests.rs"]
mod tests;
