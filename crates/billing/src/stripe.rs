use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::{BillingError, PaymentIntent, PaymentProvider, PaymentRequest, PaymentStatus};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Stripe-compatible provider talking form-encoded HTTP to
/// `/v1/payment_intents`.
#[derive(Debug, Clone)]
pub struct StripeProvider {
    secret_key: String,
    api_base: String,
    client: reqwest::Client,
}

impl StripeProvider {
    pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.api_base)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, BillingError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BillingError::Network(e.to_string()))?;

        if !status.is_success() {
            #[derive(Deserialize)]
            struct ApiErrorBody {
                error: ApiErrorDetail,
            }

            #[derive(Deserialize)]
            struct ApiErrorDetail {
                message: String,
            }

            warn!(%status, "payment provider returned an error");
            if let Ok(error) = serde_json::from_str::<ApiErrorBody>(&body) {
                return Err(BillingError::Api(error.error.message));
            }
            return Err(BillingError::Api(format!("HTTP {status}: {body}")));
        }

        serde_json::from_str(&body).map_err(|e| BillingError::Parse(e.to_string()))
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    async fn create_payment(&self, request: PaymentRequest) -> Result<PaymentIntent, BillingError> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".to_string(), request.amount_cents.to_string()),
            ("currency".to_string(), request.currency),
            ("description".to_string(), request.description),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        for (key, value) in request.metadata {
            form.push((format!("metadata[{key}]"), value));
        }

        let response = self
            .client
            .post(self.url("payment_intents"))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| BillingError::Network(e.to_string()))?;

        self.handle_response(response).await
    }

    async fn payment_status(&self, payment_id: &str) -> Result<PaymentStatus, BillingError> {
        let response = self
            .client
            .get(self.url(&format!("payment_intents/{payment_id}")))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| BillingError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BillingError::UnknownPayment(payment_id.to_string()));
        }
        let intent: PaymentIntent = self.handle_response(response).await?;
        Ok(intent.status)
    }

    fn name(&self) -> &'static str {
        "stripe"
    }
}
