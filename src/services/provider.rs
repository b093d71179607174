//! Open Banking provider client.
//!
//! The trait is the seam the sync scheduler depends on; the HTTP
//! implementation talks to the provider's transactions endpoint with a
//! request timeout. Retry classification lives here so the scheduler can
//! distinguish authorization failures (token expired, never retried) from
//! transient outages.

use crate::config::ProviderConfig;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// A transaction as returned by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTransaction {
    pub id: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reference: Option<String>,
    pub date: NaiveDate,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider rejected the access token. Not retryable; the
    /// connection must be re-authorized.
    #[error("Provider rejected the access token")]
    Unauthorized,

    #[error("Provider request timed out")]
    Timeout,

    #[error("Provider rate limited the request")]
    RateLimited,

    #[error("Provider returned HTTP {0}")]
    Http(u16),

    #[error("Provider network error: {0}")]
    Network(String),

    #[error("Failed to decode provider response: {0}")]
    Decode(String),
}

/// Transient failures are retried with backoff; authorization and decode
/// failures are not.
pub fn is_retryable(err: &ProviderError) -> bool {
    match err {
        ProviderError::Timeout | ProviderError::RateLimited | ProviderError::Network(_) => true,
        ProviderError::Http(status) => *status >= 500,
        ProviderError::Unauthorized | ProviderError::Decode(_) => false,
    }
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Fetch transactions for an account in the `[from, to]` date range.
    async fn get_transactions(
        &self,
        provider_account_id: &str,
        access_token: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ProviderTransaction>, ProviderError>;
}

/// HTTP implementation against the provider's REST API.
pub struct HttpProviderClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProviderClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    #[instrument(skip(self, access_token), fields(provider_account_id = %provider_account_id, from = %from, to = %to))]
    async fn get_transactions(
        &self,
        provider_account_id: &str,
        access_token: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ProviderTransaction>, ProviderError> {
        let url = format!(
            "{}/accounts/{}/transactions",
            self.base_url, provider_account_id
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("from", from.to_string()), ("to", to.to_string())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        match response.status() {
            status if status.is_success() => response
                .json::<Vec<ProviderTransaction>>()
                .await
                .map_err(|e| ProviderError::Decode(e.to_string())),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err(ProviderError::Unauthorized)
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited),
            status => Err(ProviderError::Http(status.as_u16())),
        }
    }
}
