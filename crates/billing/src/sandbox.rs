use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{BillingError, PaymentIntent, PaymentProvider, PaymentRequest, PaymentStatus};

/// In-process provider for development and tests. Payments succeed as soon
/// as they are created unless a different outcome is configured.
#[derive(Debug)]
pub struct SandboxProvider {
    outcome: PaymentStatus,
    payments: Mutex<HashMap<String, PaymentRequest>>,
}

impl Default for SandboxProvider {
    fn default() -> Self {
        Self::with_outcome(PaymentStatus::Succeeded)
    }
}

impl SandboxProvider {
    pub fn with_outcome(outcome: PaymentStatus) -> Self {
        Self {
            outcome,
            payments: Mutex::new(HashMap::new()),
        }
    }

    pub async fn recorded_payment(&self, payment_id: &str) -> Option<PaymentRequest> {
        self.payments.lock().await.get(payment_id).cloned()
    }
}

#[async_trait]
impl PaymentProvider for SandboxProvider {
    async fn create_payment(&self, request: PaymentRequest) -> Result<PaymentIntent, BillingError> {
        let id = format!("pi_sandbox_{}", Uuid::new_v4().simple());
        let client_secret = format!("{id}_secret");
        self.payments.lock().await.insert(id.clone(), request);
        Ok(PaymentIntent {
            id,
            client_secret: Some(client_secret),
            status: self.outcome,
        })
    }

    async fn payment_status(&self, payment_id: &str) -> Result<PaymentStatus, BillingError> {
        if self.payments.lock().await.contains_key(payment_id) {
            Ok(self.outcome)
        } else {
            Err(BillingError::UnknownPayment(payment_id.to_string()))
        }
    }

    fn name(&self) -> &'static str {
        "sandbox"
    }
}
