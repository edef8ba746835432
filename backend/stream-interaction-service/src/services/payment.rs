use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRequest {
    pub amount: f64,
    pub currency: String,
    pub payer_id: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Approved { transaction_id: String },
    Declined { error_code: String },
}

/// External payment gateway; authorizes and captures in one call
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn authorize_and_capture(&self, request: &ChargeRequest) -> Result<PaymentOutcome>;
}

pub type SharedPaymentProcessor = Arc<dyn PaymentProcessor>;

/// Charges through `processor` and returns the transaction id. Declines,
/// gateway errors and an elapsed `limit` all surface as `Payment`.
pub async fn capture(
    processor: &dyn PaymentProcessor,
    request: &ChargeRequest,
    limit: Duration,
) -> Result<String> {
    match timeout(limit, processor.authorize_and_capture(request)).await {
        Ok(Ok(PaymentOutcome::Approved { transaction_id })) => Ok(transaction_id),
        Ok(Ok(PaymentOutcome::Declined { error_code })) => {
            Err(EngineError::Payment(format!("charge declined: {}", error_code)))
        }
        Ok(Err(e)) => Err(EngineError::Payment(e.to_string())),
        Err(_) => Err(EngineError::Payment(format!(
            "payment processor timed out after {:?}",
            limit
        ))),
    }
}

/// In-process processor for local runs: approves anything up to `ceiling`
#[derive(Debug, Clone)]
pub struct SandboxPaymentProcessor {
    ceiling: f64,
}

impl SandboxPaymentProcessor {
    pub fn new(ceiling: f64) -> Self {
        Self { ceiling }
    }
}

impl Default for SandboxPaymentProcessor {
    fn default() -> Self {
        Self::new(10_000.0)
    }
}

#[async_trait]
impl PaymentProcessor for SandboxPaymentProcessor {
    async fn authorize_and_capture(&self, request: &ChargeRequest) -> Result<PaymentOutcome> {
        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Ok(PaymentOutcome::Declined {
                error_code: "invalid_amount".to_string(),
            });
        }
        if request.amount > self.ceiling {
            return Ok(PaymentOutcome::Declined {
                error_code: "limit_exceeded".to_string(),
            });
        }
        Ok(PaymentOutcome::Approved {
            transaction_id: format!("sandbox-{}", Uuid::new_v4()),
        })
    }
}
