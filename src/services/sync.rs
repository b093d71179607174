//! Sync scheduler: the per-account transaction fetch with watermarking,
//! idempotent ingestion, matching and policy-driven auto-apply.
//!
//! One `run_sync` invocation is one logical run. Accounts are independent:
//! a failure for one account is recorded in the run stats and never aborts
//! the run, and transactions within a batch are isolated from each other
//! the same way. Only a store failure while listing the active connections
//! is fatal to the whole run.

#![allow(clippy::too_many_arguments)]

use crate::config::{MatchingConfig, SyncConfig};
use crate::error::AppError;
use crate::models::{BankConnection, NewTransaction, RunStats};
use crate::repository::{ConnectionRepository, TransactionRepository};
use crate::services::apply::{ApplyOutcome, PaymentApplicationService};
use crate::services::matching::MatchingEngine;
use crate::services::metrics::{
    record_account_sync, record_error, record_transaction_ingested, PROVIDER_FETCH_DURATION,
    SYNC_RUNS,
};
use crate::services::policy;
use crate::services::provider::{self, ProviderClient, ProviderError, ProviderTransaction};
use crate::services::retry::{retry_call, RetryConfig};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashSet;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// In-process advisory locks keyed by connection id, preventing two
/// overlapping runs from syncing the same account concurrently.
#[derive(Clone, Default)]
pub struct AccountLocks {
    inner: Arc<DashSet<Uuid>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a connection, or `None` if it is held.
    pub fn try_acquire(&self, connection_id: Uuid) -> Option<AccountLockGuard> {
        if self.inner.insert(connection_id) {
            Some(AccountLockGuard {
                set: self.inner.clone(),
                connection_id,
            })
        } else {
            None
        }
    }
}

/// RAII guard releasing the per-account lock on drop.
pub struct AccountLockGuard {
    set: Arc<DashSet<Uuid>>,
    connection_id: Uuid,
}

impl Drop for AccountLockGuard {
    fn drop(&mut self) {
        self.set.remove(&self.connection_id);
    }
}

#[derive(Debug, Default)]
struct IngestOutcome {
    candidates: u32,
    applied: u32,
    errors: u32,
}

pub struct SyncScheduler {
    connections: Arc<dyn ConnectionRepository>,
    transactions: Arc<dyn TransactionRepository>,
    matching: Arc<MatchingEngine>,
    applier: Arc<PaymentApplicationService>,
    provider: Arc<dyn ProviderClient>,
    matching_config: MatchingConfig,
    sync_config: SyncConfig,
    retry: RetryConfig,
    locks: AccountLocks,
}

impl SyncScheduler {
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        transactions: Arc<dyn TransactionRepository>,
        matching: Arc<MatchingEngine>,
        applier: Arc<PaymentApplicationService>,
        provider: Arc<dyn ProviderClient>,
        matching_config: MatchingConfig,
        sync_config: SyncConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            connections,
            transactions,
            matching,
            applier,
            provider,
            matching_config,
            sync_config,
            retry,
            locks: AccountLocks::new(),
        }
    }

    /// Run one sync invocation over every active connection.
    ///
    /// Accounts run in up to `max_concurrent_accounts` parallel workers.
    /// Cancellation is run-scoped: accounts not yet started when `cancel`
    /// fires are skipped, in-flight accounts complete.
    #[instrument(skip(self, cancel))]
    pub async fn run_sync(&self, cancel: &CancellationToken) -> Result<RunStats, AppError> {
        let connections = self.connections.list_active().await.map_err(|e| {
            SYNC_RUNS.with_label_values(&["failed"]).inc();
            e
        })?;

        info!(accounts = connections.len(), "Sync run starting");

        let limit = self.sync_config.max_concurrent_accounts.max(1);
        let stats = stream::iter(connections)
            .map(|connection| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        record_account_sync("cancelled");
                        RunStats {
                            accounts_skipped: 1,
                            ..Default::default()
                        }
                    } else {
                        self.sync_account(connection, Utc::now()).await
                    }
                }
            })
            .buffer_unordered(limit)
            .fold(RunStats::default(), |mut acc, account_stats| async move {
                acc.merge(&account_stats);
                acc
            })
            .await;

        SYNC_RUNS.with_label_values(&["completed"]).inc();
        info!(
            accounts_processed = stats.accounts_processed,
            accounts_skipped = stats.accounts_skipped,
            transactions_fetched = stats.transactions_fetched,
            transactions_new = stats.transactions_new,
            matches_found = stats.matches_found,
            matches_applied = stats.matches_applied,
            errors = stats.errors,
            "Sync run completed"
        );

        Ok(stats)
    }

    /// Sync a single account. Failures degrade this account only.
    #[instrument(skip(self, connection, now), fields(connection_id = %connection.connection_id, tenant_id = %connection.tenant_id))]
    async fn sync_account(&self, connection: BankConnection, now: DateTime<Utc>) -> RunStats {
        let mut stats = RunStats::default();

        let Some(_guard) = self.locks.try_acquire(connection.connection_id) else {
            warn!(
                connection_id = %connection.connection_id,
                "Sync already in progress for this account, skipping"
            );
            record_account_sync("locked");
            stats.accounts_skipped += 1;
            return stats;
        };

        if connection.token_expired_at(now) {
            warn!(
                connection_id = %connection.connection_id,
                bank = %connection.bank_name,
                expired_utc = %connection.token_expires_utc,
                "Access token expired, account needs re-authorization"
            );
            if let Err(e) = self
                .connections
                .mark_token_expired(connection.connection_id)
                .await
            {
                warn!(error = %e, "Failed to persist token_expired status");
                record_error("store");
                stats.errors += 1;
            }
            record_account_sync("token_expired");
            stats.accounts_skipped += 1;
            return stats;
        }

        let (from, to) = match self.fetch_window(connection.connection_id, now).await {
            Ok(window) => window,
            Err(e) => {
                warn!(error = %e, "Failed to derive fetch window");
                record_error("store");
                stats.errors += 1;
                return stats;
            }
        };

        let started = Instant::now();
        let fetched = retry_call(
            &self.retry,
            "get_transactions",
            provider::is_retryable,
            || {
                self.provider.get_transactions(
                    &connection.provider_account_id,
                    &connection.access_token,
                    from,
                    to,
                )
            },
        )
        .await;
        let fetch_status = match &fetched {
            Ok(_) => "ok",
            Err(ProviderError::Unauthorized) => "unauthorized",
            Err(_) => "failed",
        };
        PROVIDER_FETCH_DURATION
            .with_label_values(&[fetch_status])
            .observe(started.elapsed().as_secs_f64());

        let fetched = match fetched {
            Ok(transactions) => transactions,
            Err(ProviderError::Unauthorized) => {
                warn!(
                    connection_id = %connection.connection_id,
                    "Provider rejected the access token, marking connection token_expired"
                );
                if let Err(e) = self
                    .connections
                    .mark_token_expired(connection.connection_id)
                    .await
                {
                    warn!(error = %e, "Failed to persist token_expired status");
                    record_error("store");
                }
                record_account_sync("unauthorized");
                record_error("provider_unauthorized");
                stats.errors += 1;
                return stats;
            }
            Err(e) => {
                warn!(
                    connection_id = %connection.connection_id,
                    error = %e,
                    "Provider fetch failed, account skipped for this run"
                );
                record_account_sync("provider_failed");
                record_error("provider_unavailable");
                stats.errors += 1;
                return stats;
            }
        };

        for provider_transaction in fetched {
            stats.transactions_fetched += 1;
            let provider_transaction_id = provider_transaction.id.clone();

            match self
                .ingest_transaction(&connection, provider_transaction)
                .await
            {
                Ok(Some(outcome)) => {
                    stats.transactions_new += 1;
                    stats.matches_found += outcome.candidates;
                    stats.matches_applied += outcome.applied;
                    stats.errors += outcome.errors;
                }
                Ok(None) => {
                    // Already stored, expected on overlapping fetch windows.
                }
                Err(e) => {
                    warn!(
                        provider_transaction_id = %provider_transaction_id,
                        error = %e,
                        "Failed to ingest transaction, continuing with batch"
                    );
                    record_error("ingest");
                    stats.errors += 1;
                }
            }
        }

        record_account_sync("ok");
        stats.accounts_processed += 1;
        stats
    }

    /// Derive the fetch window for a connection.
    ///
    /// Incremental syncs start a few days before the last stored
    /// transaction date so provider-side late arrivals are still picked
    /// up; the unique provider transaction id keeps the overlap
    /// duplicate-free. First syncs look back a fixed number of days.
    async fn fetch_window(
        &self,
        connection_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(NaiveDate, NaiveDate), AppError> {
        let today = now.date_naive();
        let from = match self
            .transactions
            .latest_transaction_date(connection_id)
            .await?
        {
            Some(latest) => latest - Duration::days(self.sync_config.overlap_days),
            None => today - Duration::days(self.sync_config.initial_lookback_days),
        };
        Ok((from.min(today), today))
    }

    /// Ingest one fetched transaction: idempotent insert, then matching
    /// and the auto-apply decision.
    ///
    /// Returns `Ok(None)` for an already-stored transaction.
    async fn ingest_transaction(
        &self,
        connection: &BankConnection,
        provider_transaction: ProviderTransaction,
    ) -> Result<Option<IngestOutcome>, AppError> {
        if self
            .transactions
            .find_by_provider_id(&provider_transaction.id)
            .await?
            .is_some()
        {
            record_transaction_ingested("duplicate");
            return Ok(None);
        }

        let stored = self
            .transactions
            .insert(NewTransaction {
                tenant_id: connection.tenant_id,
                connection_id: connection.connection_id,
                provider_transaction_id: provider_transaction.id,
                amount: provider_transaction.amount,
                currency: provider_transaction.currency,
                description: provider_transaction.description,
                reference: provider_transaction.reference,
                transaction_date: provider_transaction.date,
            })
            .await?;

        // Lost the race against a concurrent insert: same as a duplicate.
        let Some(stored) = stored else {
            record_transaction_ingested("duplicate");
            return Ok(None);
        };
        record_transaction_ingested("new");

        let mut outcome = IngestOutcome::default();
        if !self.matching_config.auto_matching {
            return Ok(Some(outcome));
        }

        let candidates = self.matching.find_matches(stored.transaction_id).await?;
        outcome.candidates = candidates.len() as u32;

        if self.matching_config.auto_apply && !candidates.is_empty() {
            if let Some(top) =
                policy::should_auto_apply(&candidates, self.matching_config.confidence_level)
            {
                match self.applier.apply_payment(top.candidate_id).await {
                    Ok(ApplyOutcome::Applied) => outcome.applied += 1,
                    Ok(ApplyOutcome::AlreadyApplied) => {}
                    Err(e) => {
                        warn!(
                            candidate_id = %top.candidate_id,
                            invoice_id = %top.invoice_id,
                            error = %e,
                            "Auto-apply failed, candidate stays pending for manual review"
                        );
                        record_error("apply");
                        outcome.errors += 1;
                    }
                }
            }
        }

        Ok(Some(outcome))
    }
}
