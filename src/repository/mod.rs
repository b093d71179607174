//! Repository traits over the persistent store.
//!
//! One trait per entity so storage stays swappable; production uses the
//! sqlx-backed [`postgres::Database`], tests substitute in-memory fakes.

pub mod postgres;

use crate::error::AppError;
use crate::models::{
    BankConnection, BankTransaction, Invoice, MatchCandidate, NewMatchCandidate, NewTransaction,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

pub use postgres::Database;

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// All connections eligible for syncing, i.e. status `active`.
    async fn list_active(&self) -> Result<Vec<BankConnection>, AppError>;

    /// Flip a connection to `token_expired`. Manual re-authorization is
    /// the only way back to `active`.
    async fn mark_token_expired(&self, connection_id: Uuid) -> Result<(), AppError>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn get(&self, transaction_id: Uuid) -> Result<Option<BankTransaction>, AppError>;

    async fn find_by_provider_id(
        &self,
        provider_transaction_id: &str,
    ) -> Result<Option<BankTransaction>, AppError>;

    /// Insert a newly fetched transaction as `unmatched`.
    ///
    /// Returns `Ok(None)` when the provider transaction id is already
    /// stored; re-observing a transaction is expected, not an error.
    async fn insert(&self, new: NewTransaction) -> Result<Option<BankTransaction>, AppError>;

    /// Watermark source: the most recent stored transaction date for a
    /// connection, `None` before the first sync.
    async fn latest_transaction_date(
        &self,
        connection_id: Uuid,
    ) -> Result<Option<NaiveDate>, AppError>;

    /// Manual-review path: park a transaction as `ignored`.
    async fn mark_ignored(&self, transaction_id: Uuid) -> Result<(), AppError>;
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Unpaid invoices for a tenant, the matching universe.
    async fn outstanding_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<Invoice>, AppError>;
}

#[async_trait]
pub trait MatchRepository: Send + Sync {
    async fn get(&self, candidate_id: Uuid) -> Result<Option<MatchCandidate>, AppError>;

    async fn insert_candidates(
        &self,
        candidates: &[NewMatchCandidate],
    ) -> Result<Vec<MatchCandidate>, AppError>;

    /// Drop a transaction's `pending` candidates ahead of re-matching.
    /// Approved and rejected candidates are never touched.
    async fn delete_pending_for_transaction(&self, transaction_id: Uuid)
        -> Result<(), AppError>;

    /// Atomically approve a candidate and mark its transaction `matched`
    /// with the invoice link populated. Either both records change or
    /// neither does.
    async fn approve_match(
        &self,
        candidate_id: Uuid,
        transaction_id: Uuid,
        invoice_id: &str,
    ) -> Result<(), AppError>;
}
