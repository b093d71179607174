//! sqlx/Postgres implementation of the repository traits.

use crate::error::AppError;
use crate::models::{
    BankConnection, BankTransaction, CandidateStatus, ConnectionStatus, Invoice, MatchCandidate,
    NewMatchCandidate, NewTransaction, TransactionStatus,
};
use crate::repository::{
    ConnectionRepository, InvoiceRepository, MatchRepository, TransactionRepository,
};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "bank-sync-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

// =========================================================================
// Bank Connection Operations
// =========================================================================

#[async_trait]
impl ConnectionRepository for Database {
    #[instrument(skip(self))]
    async fn list_active(&self) -> Result<Vec<BankConnection>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_active_connections"])
            .start_timer();

        let connections = sqlx::query_as::<_, BankConnection>(
            r#"
            SELECT connection_id, tenant_id, provider_account_id, account_name, bank_name,
                   access_token, token_expires_utc, status, created_utc, updated_utc
            FROM bank_connections
            WHERE status = $1
            ORDER BY connection_id
            "#,
        )
        .bind(ConnectionStatus::Active.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list active connections: {}", e))
        })?;

        timer.observe_duration();
        Ok(connections)
    }

    #[instrument(skip(self), fields(connection_id = %connection_id))]
    async fn mark_token_expired(&self, connection_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_token_expired"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE bank_connections
            SET status = $2, updated_utc = NOW()
            WHERE connection_id = $1 AND status = 'active'
            "#,
        )
        .bind(connection_id)
        .bind(ConnectionStatus::TokenExpired.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark token expired: {}", e))
        })?;

        timer.observe_duration();
        info!(connection_id = %connection_id, "Connection marked token_expired");

        Ok(())
    }
}

// =========================================================================
// Bank Transaction Operations
// =========================================================================

#[async_trait]
impl TransactionRepository for Database {
    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    async fn get(&self, transaction_id: Uuid) -> Result<Option<BankTransaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_transaction"])
            .start_timer();

        let transaction = sqlx::query_as::<_, BankTransaction>(
            r#"
            SELECT transaction_id, tenant_id, connection_id, provider_transaction_id, amount,
                   currency, description, reference, transaction_date, status, invoice_id,
                   created_utc
            FROM bank_transactions
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get transaction: {}", e))
        })?;

        timer.observe_duration();
        Ok(transaction)
    }

    #[instrument(skip(self), fields(provider_transaction_id = %provider_transaction_id))]
    async fn find_by_provider_id(
        &self,
        provider_transaction_id: &str,
    ) -> Result<Option<BankTransaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_by_provider_id"])
            .start_timer();

        let transaction = sqlx::query_as::<_, BankTransaction>(
            r#"
            SELECT transaction_id, tenant_id, connection_id, provider_transaction_id, amount,
                   currency, description, reference, transaction_date, status, invoice_id,
                   created_utc
            FROM bank_transactions
            WHERE provider_transaction_id = $1
            "#,
        )
        .bind(provider_transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to find transaction by provider id: {}",
                e
            ))
        })?;

        timer.observe_duration();
        Ok(transaction)
    }

    #[instrument(skip(self, new), fields(provider_transaction_id = %new.provider_transaction_id))]
    async fn insert(&self, new: NewTransaction) -> Result<Option<BankTransaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_transaction"])
            .start_timer();

        let transaction_id = Uuid::new_v4();

        // ON CONFLICT DO NOTHING makes ingestion idempotent even when two
        // runs race past the existence check.
        let transaction = sqlx::query_as::<_, BankTransaction>(
            r#"
            INSERT INTO bank_transactions (transaction_id, tenant_id, connection_id,
                provider_transaction_id, amount, currency, description, reference,
                transaction_date, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (provider_transaction_id) DO NOTHING
            RETURNING transaction_id, tenant_id, connection_id, provider_transaction_id, amount,
                      currency, description, reference, transaction_date, status, invoice_id,
                      created_utc
            "#,
        )
        .bind(transaction_id)
        .bind(new.tenant_id)
        .bind(new.connection_id)
        .bind(&new.provider_transaction_id)
        .bind(new.amount)
        .bind(&new.currency)
        .bind(&new.description)
        .bind(&new.reference)
        .bind(new.transaction_date)
        .bind(TransactionStatus::Unmatched.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert transaction: {}", e))
        })?;

        timer.observe_duration();

        match &transaction {
            Some(t) => info!(transaction_id = %t.transaction_id, "Transaction stored"),
            None => debug!(
                provider_transaction_id = %new.provider_transaction_id,
                "Duplicate provider transaction id, skipped"
            ),
        }

        Ok(transaction)
    }

    #[instrument(skip(self), fields(connection_id = %connection_id))]
    async fn latest_transaction_date(
        &self,
        connection_id: Uuid,
    ) -> Result<Option<NaiveDate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["latest_transaction_date"])
            .start_timer();

        let (date,): (Option<NaiveDate>,) = sqlx::query_as(
            r#"
            SELECT MAX(transaction_date)
            FROM bank_transactions
            WHERE connection_id = $1
            "#,
        )
        .bind(connection_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to get latest transaction date: {}",
                e
            ))
        })?;

        timer.observe_duration();
        Ok(date)
    }

    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    async fn mark_ignored(&self, transaction_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_ignored"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE bank_transactions
            SET status = $2
            WHERE transaction_id = $1 AND status = 'unmatched'
            "#,
        )
        .bind(transaction_id)
        .bind(TransactionStatus::Ignored.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to ignore transaction: {}", e))
        })?;

        timer.observe_duration();
        Ok(())
    }
}

// =========================================================================
// Invoice Operations
// =========================================================================

#[async_trait]
impl InvoiceRepository for Database {
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn outstanding_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["outstanding_invoices"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, tenant_id, invoice_number, customer_reference, amount, currency,
                   issue_date, due_date, status
            FROM invoices
            WHERE tenant_id = $1 AND status = 'unpaid'
            ORDER BY invoice_id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list outstanding invoices: {}", e))
        })?;

        timer.observe_duration();
        Ok(invoices)
    }
}

// =========================================================================
// Match Candidate Operations
// =========================================================================

#[async_trait]
impl MatchRepository for Database {
    #[instrument(skip(self), fields(candidate_id = %candidate_id))]
    async fn get(&self, candidate_id: Uuid) -> Result<Option<MatchCandidate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_candidate"])
            .start_timer();

        let candidate = sqlx::query_as::<_, MatchCandidate>(
            r#"
            SELECT candidate_id, transaction_id, invoice_id, confidence, status, created_utc
            FROM match_candidates
            WHERE candidate_id = $1
            "#,
        )
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get candidate: {}", e)))?;

        timer.observe_duration();
        Ok(candidate)
    }

    #[instrument(skip(self, candidates), fields(count = candidates.len()))]
    async fn insert_candidates(
        &self,
        candidates: &[NewMatchCandidate],
    ) -> Result<Vec<MatchCandidate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_candidates"])
            .start_timer();

        let mut stored = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let candidate_id = Uuid::new_v4();
            let row = sqlx::query_as::<_, MatchCandidate>(
                r#"
                INSERT INTO match_candidates (candidate_id, transaction_id, invoice_id,
                    confidence, status)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING candidate_id, transaction_id, invoice_id, confidence, status,
                          created_utc
                "#,
            )
            .bind(candidate_id)
            .bind(candidate.transaction_id)
            .bind(&candidate.invoice_id)
            .bind(candidate.confidence)
            .bind(CandidateStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert candidate: {}", e))
            })?;
            stored.push(row);
        }

        timer.observe_duration();
        Ok(stored)
    }

    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    async fn delete_pending_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_pending_candidates"])
            .start_timer();

        sqlx::query(
            r#"
            DELETE FROM match_candidates
            WHERE transaction_id = $1 AND status = 'pending'
            "#,
        )
        .bind(transaction_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to delete pending candidates: {}", e))
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self), fields(candidate_id = %candidate_id, transaction_id = %transaction_id))]
    async fn approve_match(
        &self,
        candidate_id: Uuid,
        transaction_id: Uuid,
        invoice_id: &str,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["approve_match"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let approved = sqlx::query(
            r#"
            UPDATE match_candidates
            SET status = $2
            WHERE candidate_id = $1 AND status = 'pending'
            "#,
        )
        .bind(candidate_id)
        .bind(CandidateStatus::Approved.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to approve candidate: {}", e))
        })?;

        if approved.rows_affected() == 0 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Candidate is not pending"
            )));
        }

        let matched = sqlx::query(
            r#"
            UPDATE bank_transactions
            SET status = $2, invoice_id = $3
            WHERE transaction_id = $1 AND status = 'unmatched'
            "#,
        )
        .bind(transaction_id)
        .bind(TransactionStatus::Matched.as_str())
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark transaction matched: {}", e))
        })?;

        if matched.rows_affected() == 0 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Transaction is not unmatched"
            )));
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit approval: {}", e))
        })?;

        timer.observe_duration();
        info!(
            candidate_id = %candidate_id,
            transaction_id = %transaction_id,
            invoice_id = %invoice_id,
            "Match approved"
        );

        Ok(())
    }
}
