//! Payment application: approve a candidate, mark its transaction matched
//! and instruct the billing system, as one unit.

use crate::error::AppError;
use crate::models::{CandidateStatus, TransactionStatus};
use crate::repository::{MatchRepository, TransactionRepository};
use crate::services::billing::{BillingClient, PaymentNotice};
use crate::services::metrics::record_payment_application;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Outcome of a payment application attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The transaction was already matched; nothing was re-applied.
    AlreadyApplied,
}

pub struct PaymentApplicationService {
    transactions: Arc<dyn TransactionRepository>,
    matches: Arc<dyn MatchRepository>,
    billing: Arc<dyn BillingClient>,
}

impl PaymentApplicationService {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        matches: Arc<dyn MatchRepository>,
        billing: Arc<dyn BillingClient>,
    ) -> Self {
        Self {
            transactions,
            matches,
            billing,
        }
    }

    /// Apply a match candidate as a payment.
    ///
    /// Idempotent per transaction: an already-matched transaction (or an
    /// already-approved candidate) short-circuits to `AlreadyApplied`.
    /// The billing system is instructed before any record changes; on a
    /// billing failure nothing is mutated and the billing message is
    /// surfaced to the caller.
    #[instrument(skip(self), fields(candidate_id = %candidate_id))]
    pub async fn apply_payment(&self, candidate_id: Uuid) -> Result<ApplyOutcome, AppError> {
        let candidate = self
            .matches
            .get(candidate_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Match candidate not found")))?;

        let transaction = self
            .transactions
            .get(candidate.transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Transaction not found")))?;

        if TransactionStatus::from_str(&transaction.status) == TransactionStatus::Matched
            || CandidateStatus::from_str(&candidate.status) == CandidateStatus::Approved
        {
            record_payment_application("already_applied");
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        // Ignored is terminal for the automated path; refuse before the
        // billing system is instructed.
        if TransactionStatus::from_str(&transaction.status) == TransactionStatus::Ignored {
            record_payment_application("rejected_ignored");
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Transaction is ignored"
            )));
        }

        let notice = PaymentNotice {
            amount: transaction.amount,
            currency: transaction.currency.clone(),
            reference: transaction.reference.clone(),
            transaction_date: transaction.transaction_date,
            provider_transaction_id: transaction.provider_transaction_id.clone(),
        };

        if let Err(e) = self.billing.add_payment(&candidate.invoice_id, &notice).await {
            warn!(
                candidate_id = %candidate_id,
                invoice_id = %candidate.invoice_id,
                error = %e,
                "Billing system did not record the payment, candidate left pending"
            );
            record_payment_application("billing_failed");
            return Err(AppError::from(e));
        }

        self.matches
            .approve_match(
                candidate_id,
                candidate.transaction_id,
                &candidate.invoice_id,
            )
            .await?;

        record_payment_application("applied");
        info!(
            candidate_id = %candidate_id,
            transaction_id = %candidate.transaction_id,
            invoice_id = %candidate.invoice_id,
            confidence = candidate.confidence,
            "Payment applied"
        );

        Ok(ApplyOutcome::Applied)
    }
}
