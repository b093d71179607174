//! Common test utilities: in-memory repositories and scripted collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use bank_sync_service::config::{MatchingConfig, SyncConfig};
use bank_sync_service::error::AppError;
use bank_sync_service::models::{
    BankConnection, BankTransaction, CandidateStatus, ConfidenceLevel, ConnectionStatus, Invoice,
    MatchCandidate, NewMatchCandidate, NewTransaction, TransactionStatus,
};
use bank_sync_service::repository::{
    ConnectionRepository, InvoiceRepository, MatchRepository, TransactionRepository,
};
use bank_sync_service::services::billing::{BillingClient, BillingError, PaymentNotice};
use bank_sync_service::services::provider::{ProviderClient, ProviderError, ProviderTransaction};
use bank_sync_service::services::retry::RetryConfig;
use bank_sync_service::services::{MatchingEngine, PaymentApplicationService, SyncScheduler};
use chrono::{Duration, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use uuid::Uuid;

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory implementation of every repository trait.
#[derive(Default)]
pub struct InMemoryStore {
    pub connections: Mutex<HashMap<Uuid, BankConnection>>,
    pub transactions: Mutex<HashMap<Uuid, BankTransaction>>,
    pub invoices: Mutex<Vec<Invoice>>,
    pub candidates: Mutex<HashMap<Uuid, MatchCandidate>>,
    /// Provider transaction ids whose insert is scripted to fail.
    pub fail_insert_for: Mutex<HashSet<String>>,
}

impl InMemoryStore {
    pub fn fail_insert(&self, provider_transaction_id: &str) {
        self.fail_insert_for
            .lock()
            .unwrap()
            .insert(provider_transaction_id.to_string());
    }

    pub fn add_connection(&self, connection: BankConnection) {
        self.connections
            .lock()
            .unwrap()
            .insert(connection.connection_id, connection);
    }

    pub fn add_invoice(&self, invoice: Invoice) {
        self.invoices.lock().unwrap().push(invoice);
    }

    pub fn connection(&self, connection_id: Uuid) -> BankConnection {
        self.connections.lock().unwrap()[&connection_id].clone()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.lock().unwrap().len()
    }

    pub fn transaction_by_provider_id(&self, provider_transaction_id: &str) -> BankTransaction {
        self.transactions
            .lock()
            .unwrap()
            .values()
            .find(|t| t.provider_transaction_id == provider_transaction_id)
            .cloned()
            .expect("transaction not stored")
    }

    /// All candidates for a transaction, best confidence first.
    pub fn candidates_for(&self, transaction_id: Uuid) -> Vec<MatchCandidate> {
        let mut candidates: Vec<MatchCandidate> = self
            .candidates
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.transaction_id == transaction_id)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        candidates
    }
}

#[async_trait]
impl ConnectionRepository for InMemoryStore {
    async fn list_active(&self) -> Result<Vec<BankConnection>, AppError> {
        let mut active: Vec<BankConnection> = self
            .connections
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.status == ConnectionStatus::Active.as_str())
            .cloned()
            .collect();
        active.sort_by_key(|c| c.connection_id);
        Ok(active)
    }

    async fn mark_token_expired(&self, connection_id: Uuid) -> Result<(), AppError> {
        let mut connections = self.connections.lock().unwrap();
        if let Some(connection) = connections.get_mut(&connection_id) {
            if connection.status == ConnectionStatus::Active.as_str() {
                connection.status = ConnectionStatus::TokenExpired.as_str().to_string();
                connection.updated_utc = Utc::now();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionRepository for InMemoryStore {
    async fn get(&self, transaction_id: Uuid) -> Result<Option<BankTransaction>, AppError> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .get(&transaction_id)
            .cloned())
    }

    async fn find_by_provider_id(
        &self,
        provider_transaction_id: &str,
    ) -> Result<Option<BankTransaction>, AppError> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .values()
            .find(|t| t.provider_transaction_id == provider_transaction_id)
            .cloned())
    }

    async fn insert(&self, new: NewTransaction) -> Result<Option<BankTransaction>, AppError> {
        if self
            .fail_insert_for
            .lock()
            .unwrap()
            .contains(&new.provider_transaction_id)
        {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "scripted insert failure"
            )));
        }

        let mut transactions = self.transactions.lock().unwrap();
        if transactions
            .values()
            .any(|t| t.provider_transaction_id == new.provider_transaction_id)
        {
            return Ok(None);
        }

        let transaction = BankTransaction {
            transaction_id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            connection_id: new.connection_id,
            provider_transaction_id: new.provider_transaction_id,
            amount: new.amount,
            currency: new.currency,
            description: new.description,
            reference: new.reference,
            transaction_date: new.transaction_date,
            status: TransactionStatus::Unmatched.as_str().to_string(),
            invoice_id: None,
            created_utc: Utc::now(),
        };
        transactions.insert(transaction.transaction_id, transaction.clone());
        Ok(Some(transaction))
    }

    async fn latest_transaction_date(
        &self,
        connection_id: Uuid,
    ) -> Result<Option<NaiveDate>, AppError> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.connection_id == connection_id)
            .map(|t| t.transaction_date)
            .max())
    }

    async fn mark_ignored(&self, transaction_id: Uuid) -> Result<(), AppError> {
        let mut transactions = self.transactions.lock().unwrap();
        if let Some(transaction) = transactions.get_mut(&transaction_id) {
            if transaction.status == TransactionStatus::Unmatched.as_str() {
                transaction.status = TransactionStatus::Ignored.as_str().to_string();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryStore {
    async fn outstanding_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<Invoice>, AppError> {
        let mut invoices: Vec<Invoice> = self
            .invoices
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.tenant_id == tenant_id && i.status == "unpaid")
            .cloned()
            .collect();
        invoices.sort_by(|a, b| a.invoice_id.cmp(&b.invoice_id));
        Ok(invoices)
    }
}

#[async_trait]
impl MatchRepository for InMemoryStore {
    async fn get(&self, candidate_id: Uuid) -> Result<Option<MatchCandidate>, AppError> {
        Ok(self.candidates.lock().unwrap().get(&candidate_id).cloned())
    }

    async fn insert_candidates(
        &self,
        candidates: &[NewMatchCandidate],
    ) -> Result<Vec<MatchCandidate>, AppError> {
        let mut stored = Vec::with_capacity(candidates.len());
        let mut map = self.candidates.lock().unwrap();
        for new in candidates {
            let candidate = MatchCandidate {
                candidate_id: Uuid::new_v4(),
                transaction_id: new.transaction_id,
                invoice_id: new.invoice_id.clone(),
                confidence: new.confidence,
                status: CandidateStatus::Pending.as_str().to_string(),
                created_utc: Utc::now(),
            };
            map.insert(candidate.candidate_id, candidate.clone());
            stored.push(candidate);
        }
        Ok(stored)
    }

    async fn delete_pending_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<(), AppError> {
        self.candidates.lock().unwrap().retain(|_, c| {
            c.transaction_id != transaction_id || c.status != CandidateStatus::Pending.as_str()
        });
        Ok(())
    }

    async fn approve_match(
        &self,
        candidate_id: Uuid,
        transaction_id: Uuid,
        invoice_id: &str,
    ) -> Result<(), AppError> {
        // Check both guards before mutating anything, mirroring the SQL
        // transaction in the Postgres implementation.
        let mut candidates = self.candidates.lock().unwrap();
        let mut transactions = self.transactions.lock().unwrap();

        let candidate_ok = candidates
            .get(&candidate_id)
            .map(|c| c.status == CandidateStatus::Pending.as_str())
            .unwrap_or(false);
        let transaction_ok = transactions
            .get(&transaction_id)
            .map(|t| t.status == TransactionStatus::Unmatched.as_str())
            .unwrap_or(false);

        if !candidate_ok {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Candidate is not pending"
            )));
        }
        if !transaction_ok {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Transaction is not unmatched"
            )));
        }

        let candidate = candidates.get_mut(&candidate_id).unwrap();
        candidate.status = CandidateStatus::Approved.as_str().to_string();

        let transaction = transactions.get_mut(&transaction_id).unwrap();
        transaction.status = TransactionStatus::Matched.as_str().to_string();
        transaction.invoice_id = Some(invoice_id.to_string());

        Ok(())
    }
}

// ============================================================================
// Scripted collaborators
// ============================================================================

/// Scripted Open Banking provider: per-account responses plus failure
/// injection, recording every fetch window it receives.
#[derive(Default)]
pub struct FakeProvider {
    pub responses: Mutex<HashMap<String, Vec<ProviderTransaction>>>,
    pub fail_accounts: Mutex<HashSet<String>>,
    pub unauthorized_accounts: Mutex<HashSet<String>>,
    pub calls: Mutex<Vec<(String, NaiveDate, NaiveDate)>>,
}

impl FakeProvider {
    pub fn respond_with(&self, provider_account_id: &str, transactions: Vec<ProviderTransaction>) {
        self.responses
            .lock()
            .unwrap()
            .insert(provider_account_id.to_string(), transactions);
    }

    pub fn fail_account(&self, provider_account_id: &str) {
        self.fail_accounts
            .lock()
            .unwrap()
            .insert(provider_account_id.to_string());
    }

    pub fn reject_token(&self, provider_account_id: &str) {
        self.unauthorized_accounts
            .lock()
            .unwrap()
            .insert(provider_account_id.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_window_for(&self, provider_account_id: &str) -> (NaiveDate, NaiveDate) {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(account, _, _)| account == provider_account_id)
            .map(|(_, from, to)| (*from, *to))
            .expect("no provider call recorded for account")
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    async fn get_transactions(
        &self,
        provider_account_id: &str,
        _access_token: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ProviderTransaction>, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push((provider_account_id.to_string(), from, to));

        if self
            .unauthorized_accounts
            .lock()
            .unwrap()
            .contains(provider_account_id)
        {
            return Err(ProviderError::Unauthorized);
        }
        if self
            .fail_accounts
            .lock()
            .unwrap()
            .contains(provider_account_id)
        {
            return Err(ProviderError::Network("connection reset".to_string()));
        }

        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(provider_account_id)
            .map(|transactions| {
                transactions
                    .iter()
                    .filter(|t| t.date >= from && t.date <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Scripted billing system: accepts or rejects payments, recording what
/// it was asked to apply.
#[derive(Default)]
pub struct FakeBilling {
    pub reject_with: Mutex<Option<String>>,
    pub payments: Mutex<Vec<(String, PaymentNotice)>>,
}

impl FakeBilling {
    pub fn reject(&self, message: &str) {
        *self.reject_with.lock().unwrap() = Some(message.to_string());
    }

    pub fn payment_count(&self) -> usize {
        self.payments.lock().unwrap().len()
    }
}

#[async_trait]
impl BillingClient for FakeBilling {
    async fn add_payment(
        &self,
        invoice_id: &str,
        notice: &PaymentNotice,
    ) -> Result<(), BillingError> {
        if let Some(message) = self.reject_with.lock().unwrap().clone() {
            return Err(BillingError::Rejected(message));
        }
        self.payments
            .lock()
            .unwrap()
            .push((invoice_id.to_string(), notice.clone()));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct TestHarness {
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<FakeProvider>,
    pub billing: Arc<FakeBilling>,
    pub matching: Arc<MatchingEngine>,
    pub applier: Arc<PaymentApplicationService>,
    pub scheduler: SyncScheduler,
}

pub fn default_matching_config() -> MatchingConfig {
    MatchingConfig {
        auto_matching: true,
        auto_apply: false,
        confidence_level: ConfidenceLevel::Medium,
        relevance_floor: 0.4,
    }
}

pub fn default_sync_config() -> SyncConfig {
    SyncConfig {
        initial_lookback_days: 30,
        overlap_days: 3,
        max_concurrent_accounts: 4,
    }
}

pub fn harness(matching_config: MatchingConfig) -> TestHarness {
    let store = Arc::new(InMemoryStore::default());
    let provider = Arc::new(FakeProvider::default());
    let billing = Arc::new(FakeBilling::default());

    let matching = Arc::new(MatchingEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        matching_config.relevance_floor,
    ));
    let applier = Arc::new(PaymentApplicationService::new(
        store.clone(),
        store.clone(),
        billing.clone(),
    ));
    let scheduler = SyncScheduler::new(
        store.clone(),
        store.clone(),
        matching.clone(),
        applier.clone(),
        provider.clone(),
        matching_config,
        default_sync_config(),
        // Keep retries fast in tests.
        RetryConfig {
            max_retries: 1,
            initial_backoff: StdDuration::from_millis(1),
            max_backoff: StdDuration::from_millis(2),
            backoff_multiplier: 2.0,
            add_jitter: false,
        },
    );

    TestHarness {
        store,
        provider,
        billing,
        matching,
        applier,
        scheduler,
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn active_connection(tenant_id: Uuid, provider_account_id: &str) -> BankConnection {
    BankConnection {
        connection_id: Uuid::new_v4(),
        tenant_id,
        provider_account_id: provider_account_id.to_string(),
        account_name: "Business Current Account".to_string(),
        bank_name: "Test Bank".to_string(),
        access_token: "tok_valid".to_string(),
        token_expires_utc: Utc::now() + Duration::hours(1),
        status: ConnectionStatus::Active.as_str().to_string(),
        created_utc: Utc::now(),
        updated_utc: Utc::now(),
    }
}

pub fn expired_connection(tenant_id: Uuid, provider_account_id: &str) -> BankConnection {
    BankConnection {
        access_token: "tok_stale".to_string(),
        token_expires_utc: Utc::now() - Duration::hours(1),
        ..active_connection(tenant_id, provider_account_id)
    }
}

pub fn provider_txn(
    id: &str,
    amount: &str,
    currency: &str,
    reference: &str,
    transaction_date: NaiveDate,
) -> ProviderTransaction {
    ProviderTransaction {
        id: id.to_string(),
        amount: amount.parse().unwrap(),
        currency: currency.to_string(),
        description: "FASTER PAYMENT RECEIVED".to_string(),
        reference: if reference.is_empty() {
            None
        } else {
            Some(reference.to_string())
        },
        date: transaction_date,
    }
}

/// Insert a transaction directly into the store, bypassing the scheduler.
pub async fn seed_transaction(
    store: &InMemoryStore,
    tenant_id: Uuid,
    connection_id: Uuid,
    provider_transaction_id: &str,
    amount: &str,
    currency: &str,
    reference: &str,
    transaction_date: NaiveDate,
) -> BankTransaction {
    store
        .insert(NewTransaction {
            tenant_id,
            connection_id,
            provider_transaction_id: provider_transaction_id.to_string(),
            amount: amount.parse().unwrap(),
            currency: currency.to_string(),
            description: "FASTER PAYMENT RECEIVED".to_string(),
            reference: if reference.is_empty() {
                None
            } else {
                Some(reference.to_string())
            },
            transaction_date,
        })
        .await
        .unwrap()
        .expect("seed transaction already present")
}

pub fn unpaid_invoice(
    tenant_id: Uuid,
    invoice_id: &str,
    amount: &str,
    currency: &str,
    due_date: NaiveDate,
) -> Invoice {
    Invoice {
        invoice_id: invoice_id.to_string(),
        tenant_id,
        invoice_number: invoice_id.to_string(),
        customer_reference: None,
        amount: amount.parse().unwrap(),
        currency: currency.to_string(),
        issue_date: due_date - Duration::days(14),
        due_date,
        status: "unpaid".to_string(),
    }
}
