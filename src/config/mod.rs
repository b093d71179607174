//! Configuration module for bank-sync-service.

use crate::error::AppError;
use crate::models::ConfidenceLevel;
use std::env;

#[derive(Debug, Clone)]
pub struct SyncServiceConfig {
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub billing: BillingConfig,
    pub matching: MatchingConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub auto_matching: bool,
    pub auto_apply: bool,
    pub confidence_level: ConfidenceLevel,
    pub relevance_floor: f64,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub initial_lookback_days: i64,
    pub overlap_days: i64,
    pub max_concurrent_accounts: usize,
}

impl SyncServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self {
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "bank-sync-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3001),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            provider: ProviderConfig {
                base_url: env::var("PROVIDER_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openbanking.example".to_string()),
                request_timeout_secs: env::var("PROVIDER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
                max_retries: env::var("PROVIDER_MAX_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
            },
            billing: BillingConfig {
                base_url: env::var("BILLING_BASE_URL")
                    .unwrap_or_else(|_| "http://billing-system:3001".to_string()),
                request_timeout_secs: env::var("BILLING_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            },
            matching: MatchingConfig {
                auto_matching: parse_switch(env::var("AUTO_MATCHING").ok().as_deref(), true),
                auto_apply: parse_switch(env::var("AUTO_APPLY").ok().as_deref(), false),
                confidence_level: ConfidenceLevel::from_str(
                    &env::var("MATCHING_CONFIDENCE").unwrap_or_else(|_| "medium".to_string()),
                ),
                relevance_floor: env::var("MATCHING_RELEVANCE_FLOOR")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.4),
            },
            sync: SyncConfig {
                initial_lookback_days: env::var("SYNC_INITIAL_LOOKBACK_DAYS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
                overlap_days: env::var("SYNC_OVERLAP_DAYS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
                max_concurrent_accounts: env::var("SYNC_MAX_CONCURRENT_ACCOUNTS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(4),
            },
        })
    }
}

/// Parse an `on`/`off` switch, accepting the usual boolean spellings.
fn parse_switch(value: Option<&str>, default: bool) -> bool {
    match value {
        Some(v) => matches!(
            v.to_ascii_lowercase().as_str(),
            "on" | "true" | "yes" | "1"
        ),
        None => default,
    }
}
