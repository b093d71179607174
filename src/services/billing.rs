//! Billing system client.
//!
//! The billing system records payments against invoices; this service
//! only instructs it and never mutates invoice state directly.

use crate::config::BillingConfig;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Payment details sent to the billing system.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentNotice {
    pub amount: Decimal,
    pub currency: String,
    pub reference: Option<String>,
    pub transaction_date: NaiveDate,
    pub provider_transaction_id: String,
}

#[derive(Debug, Error)]
pub enum BillingError {
    /// The billing system refused to record the payment. Carries the
    /// billing system's own message for manual follow-up.
    #[error("Payment rejected: {0}")]
    Rejected(String),

    #[error("Billing system unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait BillingClient: Send + Sync {
    /// Record a payment against an invoice.
    async fn add_payment(
        &self,
        invoice_id: &str,
        notice: &PaymentNotice,
    ) -> Result<(), BillingError>;
}

/// HTTP implementation against the billing system's REST API.
pub struct HttpBillingClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct AddPaymentResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

impl HttpBillingClient {
    pub fn new(config: &BillingConfig) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BillingError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BillingClient for HttpBillingClient {
    #[instrument(skip(self, notice), fields(invoice_id = %invoice_id))]
    async fn add_payment(
        &self,
        invoice_id: &str,
        notice: &PaymentNotice,
    ) -> Result<(), BillingError> {
        let url = format!("{}/invoices/{}/payments", self.base_url, invoice_id);

        let response = self
            .client
            .post(&url)
            .json(notice)
            .send()
            .await
            .map_err(|e| BillingError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BillingError::Unavailable(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: AddPaymentResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Unavailable(e.to_string()))?;

        if body.success {
            Ok(())
        } else {
            Err(BillingError::Rejected(
                body.message
                    .unwrap_or_else(|| "no reason given".to_string()),
            ))
        }
    }
}
