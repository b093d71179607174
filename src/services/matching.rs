//! Confidence-scored matching of bank transactions to outstanding invoices.
//!
//! Scoring is a pure function of transaction and invoice attributes, so
//! identical inputs always produce identical scores and ordering. Signals:
//!
//! - currency inequality excludes a candidate outright
//! - amount agreement carries the highest weight
//! - payment-reference agreement with the invoice number or customer
//!   reference carries the next weight
//! - date proximity to the invoice due/issue date decays with distance
//!
//! Candidates scoring below the relevance floor are discarded rather than
//! persisted, keeping candidate storage bounded.

use crate::error::AppError;
use crate::models::{BankTransaction, Invoice, MatchCandidate, NewMatchCandidate};
use crate::repository::{InvoiceRepository, MatchRepository, TransactionRepository};
use crate::services::metrics::MATCH_CANDIDATES;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

const AMOUNT_EXACT_WEIGHT: f64 = 0.65;
const AMOUNT_NEAR_WEIGHT: f64 = 0.35;
const REFERENCE_EXACT_WEIGHT: f64 = 0.25;
const REFERENCE_TOKEN_WEIGHT: f64 = 0.10;
const DATE_WEIGHT_MAX: f64 = 0.10;
const DATE_WINDOW_DAYS: i64 = 30;

/// Relative amount difference still considered "near" (1%).
const AMOUNT_NEAR_TOLERANCE: (i64, u32) = (1, 2);

/// An invoice scored against one transaction.
#[derive(Debug, Clone)]
struct ScoredInvoice {
    invoice_id: String,
    confidence: f64,
    date_distance: i64,
}

pub struct MatchingEngine {
    transactions: Arc<dyn TransactionRepository>,
    invoices: Arc<dyn InvoiceRepository>,
    matches: Arc<dyn MatchRepository>,
    relevance_floor: f64,
}

impl MatchingEngine {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        invoices: Arc<dyn InvoiceRepository>,
        matches: Arc<dyn MatchRepository>,
        relevance_floor: f64,
    ) -> Self {
        Self {
            transactions,
            invoices,
            matches,
            relevance_floor,
        }
    }

    /// Score a transaction against the tenant's outstanding invoices and
    /// persist the candidates above the relevance floor.
    ///
    /// Returns the stored candidates sorted descending by confidence.
    /// Pending candidates from an earlier matching pass are replaced;
    /// approved and rejected candidates are left alone.
    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    pub async fn find_matches(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<MatchCandidate>, AppError> {
        let transaction = self
            .transactions
            .get(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Transaction not found")))?;

        let invoices = self
            .invoices
            .outstanding_for_tenant(transaction.tenant_id)
            .await?;

        let mut scored: Vec<ScoredInvoice> = Vec::new();
        let mut discarded = 0u64;

        for invoice in &invoices {
            match score_invoice(&transaction, invoice) {
                Some(s) if s.confidence >= self.relevance_floor => scored.push(s),
                Some(_) => discarded += 1,
                None => {}
            }
        }

        // Deterministic ordering: best score first, ties broken by smaller
        // date distance, then lower invoice id.
        scored.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.date_distance.cmp(&b.date_distance))
                .then_with(|| a.invoice_id.cmp(&b.invoice_id))
        });

        MATCH_CANDIDATES
            .with_label_values(&["discarded"])
            .inc_by(discarded as f64);
        MATCH_CANDIDATES
            .with_label_values(&["persisted"])
            .inc_by(scored.len() as f64);

        debug!(
            transaction_id = %transaction_id,
            invoices = invoices.len(),
            candidates = scored.len(),
            discarded = discarded,
            "Matching completed"
        );

        if scored.is_empty() {
            return Ok(Vec::new());
        }

        let new_candidates: Vec<NewMatchCandidate> = scored
            .into_iter()
            .map(|s| NewMatchCandidate {
                transaction_id,
                invoice_id: s.invoice_id,
                confidence: s.confidence,
            })
            .collect();

        self.matches
            .delete_pending_for_transaction(transaction_id)
            .await?;
        self.matches.insert_candidates(&new_candidates).await
    }
}

/// Score one invoice against one transaction.
///
/// Returns `None` when the invoice is excluded by the currency filter.
fn score_invoice(transaction: &BankTransaction, invoice: &Invoice) -> Option<ScoredInvoice> {
    if !transaction
        .currency
        .eq_ignore_ascii_case(&invoice.currency)
    {
        return None;
    }

    let date_distance = date_distance_days(transaction, invoice);
    let score = amount_score(transaction.amount, invoice.amount)
        + reference_score(transaction, invoice)
        + date_score(date_distance);

    Some(ScoredInvoice {
        invoice_id: invoice.invoice_id.clone(),
        confidence: score.clamp(0.0, 1.0),
        date_distance,
    })
}

fn amount_score(transaction_amount: Decimal, invoice_amount: Decimal) -> f64 {
    if transaction_amount == invoice_amount {
        return AMOUNT_EXACT_WEIGHT;
    }
    if invoice_amount.is_zero() {
        return 0.0;
    }
    let tolerance = Decimal::new(AMOUNT_NEAR_TOLERANCE.0, AMOUNT_NEAR_TOLERANCE.1);
    let relative = ((transaction_amount - invoice_amount) / invoice_amount).abs();
    if relative <= tolerance {
        AMOUNT_NEAR_WEIGHT
    } else {
        0.0
    }
}

fn reference_score(transaction: &BankTransaction, invoice: &Invoice) -> f64 {
    let haystack = format!(
        "{} {}",
        transaction.reference.as_deref().unwrap_or(""),
        transaction.description
    );
    let haystack = normalize(&haystack);

    let invoice_number = normalize(&invoice.invoice_number);
    if !invoice_number.is_empty() && haystack.contains(&invoice_number) {
        return REFERENCE_EXACT_WEIGHT;
    }

    if let Some(customer_ref) = &invoice.customer_reference {
        let customer_ref = normalize(customer_ref);
        if !customer_ref.is_empty() && haystack.contains(&customer_ref) {
            return REFERENCE_EXACT_WEIGHT;
        }
    }

    // Weaker signal: any sufficiently long token of the invoice number
    // appearing in the payment text.
    for token in tokens(&invoice.invoice_number) {
        if haystack.contains(&token) {
            return REFERENCE_TOKEN_WEIGHT;
        }
    }

    0.0
}

fn date_score(date_distance: i64) -> f64 {
    if date_distance > DATE_WINDOW_DAYS {
        return 0.0;
    }
    DATE_WEIGHT_MAX * (1.0 - date_distance as f64 / DATE_WINDOW_DAYS as f64)
}

/// Distance in days to the nearer of the invoice due and issue dates.
fn date_distance_days(transaction: &BankTransaction, invoice: &Invoice) -> i64 {
    let to_due = (transaction.transaction_date - invoice.due_date)
        .num_days()
        .abs();
    let to_issue = (transaction.transaction_date - invoice.issue_date)
        .num_days()
        .abs();
    to_due.min(to_issue)
}

/// Uppercase and strip everything but ASCII alphanumerics, so that
/// "inv-1042", "INV 1042" and "INV/1042" all compare equal.
fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Alphanumeric tokens of at least four characters, normalized.
fn tokens(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= 4)
        .map(normalize)
        .collect()
}
