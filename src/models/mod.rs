//! Domain models for bank-sync-service.

#![allow(clippy::should_implement_trait)]

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Bank Connection Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Active,
    TokenExpired,
    Revoked,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::TokenExpired => "token_expired",
            Self::Revoked => "revoked",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "token_expired" => Self::TokenExpired,
            "revoked" => Self::Revoked,
            _ => Self::Revoked,
        }
    }
}

/// A tenant's authorized bank account at the Open Banking provider.
///
/// Created externally on OAuth completion. The sync scheduler flips the
/// status to `token_expired` when the stored expiry has passed; manual
/// re-authorization is required to make the connection active again.
#[derive(Debug, Clone, FromRow)]
pub struct BankConnection {
    pub connection_id: Uuid,
    pub tenant_id: Uuid,
    pub provider_account_id: String,
    pub account_name: String,
    pub bank_name: String,
    pub access_token: String,
    pub token_expires_utc: DateTime<Utc>,
    pub status: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl BankConnection {
    pub fn token_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.token_expires_utc < now
    }
}

// ============================================================================
// Bank Transaction Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Unmatched,
    Matched,
    Ignored,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::Matched => "matched",
            Self::Ignored => "ignored",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "unmatched" => Self::Unmatched,
            "matched" => Self::Matched,
            "ignored" => Self::Ignored,
            _ => Self::Unmatched,
        }
    }
}

/// A bank transaction fetched from the provider.
///
/// `provider_transaction_id` is the idempotency key: a transaction is
/// inserted once on first sight and never re-inserted, enforced by a
/// unique constraint in the store.
#[derive(Debug, Clone, FromRow)]
pub struct BankTransaction {
    pub transaction_id: Uuid,
    pub tenant_id: Uuid,
    pub connection_id: Uuid,
    pub provider_transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub reference: Option<String>,
    pub transaction_date: NaiveDate,
    pub status: String,
    pub invoice_id: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Input for inserting a newly fetched transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub tenant_id: Uuid,
    pub connection_id: Uuid,
    pub provider_transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub reference: Option<String>,
    pub transaction_date: NaiveDate,
}

// ============================================================================
// Match Candidate Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateStatus {
    Pending,
    Approved,
    Rejected,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

/// A scored pairing of one transaction and one invoice.
///
/// At most one candidate per transaction ever reaches `approved`.
#[derive(Debug, Clone, FromRow)]
pub struct MatchCandidate {
    pub candidate_id: Uuid,
    pub transaction_id: Uuid,
    pub invoice_id: String,
    pub confidence: f64,
    pub status: String,
    pub created_utc: DateTime<Utc>,
}

/// Input for persisting a candidate produced by the matching engine.
#[derive(Debug, Clone)]
pub struct NewMatchCandidate {
    pub transaction_id: Uuid,
    pub invoice_id: String,
    pub confidence: f64,
}

// ============================================================================
// Invoice Read Model
// ============================================================================

/// An outstanding billing invoice, consumed as an already-available input.
///
/// Only `unpaid` invoices participate in matching; the billing system owns
/// the lifecycle of this record.
#[derive(Debug, Clone, FromRow)]
pub struct Invoice {
    pub invoice_id: String,
    pub tenant_id: Uuid,
    pub invoice_number: String,
    pub customer_reference: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: String,
}

// ============================================================================
// Confidence Levels
// ============================================================================

/// Qualitative auto-apply confidence level from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
    Exact,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Exact => "exact",
        }
    }

    /// Unrecognized levels fall back to `medium`.
    pub fn from_str(s: &str) -> Self {
        match s {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            "exact" => Self::Exact,
            _ => Self::Medium,
        }
    }
}

// ============================================================================
// Run Statistics
// ============================================================================

/// Aggregated outcome of one sync invocation.
///
/// A run never fails for partial failures; degraded accounts and
/// transactions show up in `errors` instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub accounts_processed: u32,
    pub accounts_skipped: u32,
    pub transactions_fetched: u32,
    pub transactions_new: u32,
    pub matches_found: u32,
    pub matches_applied: u32,
    pub errors: u32,
}

impl RunStats {
    pub fn merge(&mut self, other: &RunStats) {
        self.accounts_processed += other.accounts_processed;
        self.accounts_skipped += other.accounts_skipped;
        self.transactions_fetched += other.transactions_fetched;
        self.transactions_new += other.transactions_new;
        self.matches_found += other.matches_found;
        self.matches_applied += other.matches_applied;
        self.errors += other.errors;
    }
}
