//! Payment application integration tests.

mod common;

use bank_sync_service::error::AppError;
use bank_sync_service::models::{NewMatchCandidate, TransactionStatus};
use bank_sync_service::repository::{MatchRepository, TransactionRepository};
use bank_sync_service::services::apply::ApplyOutcome;
use bank_sync_service::services::billing::BillingError;
use chrono::{Duration, Utc};
use common::{default_matching_config, harness, seed_transaction, unpaid_invoice, TestHarness};
use rust_decimal::Decimal;
use uuid::Uuid;

async fn seed_candidate(h: &TestHarness, confidence: f64) -> (Uuid, Uuid) {
    let tenant = Uuid::new_v4();
    let today = Utc::now().date_naive();

    h.store.add_invoice(unpaid_invoice(
        tenant,
        "INV-1042",
        "50.00",
        "GBP",
        today + Duration::days(4),
    ));
    let transaction = seed_transaction(
        &h.store,
        tenant,
        Uuid::new_v4(),
        "tr_1",
        "50.00",
        "GBP",
        "INV-1042",
        today,
    )
    .await;

    let stored = h
        .store
        .insert_candidates(&[NewMatchCandidate {
            transaction_id: transaction.transaction_id,
            invoice_id: "INV-1042".to_string(),
            confidence,
        }])
        .await
        .unwrap();

    (stored[0].candidate_id, transaction.transaction_id)
}

#[tokio::test]
async fn applying_a_candidate_approves_it_and_matches_the_transaction() {
    let h = harness(default_matching_config());
    let (candidate_id, transaction_id) = seed_candidate(&h, 0.95).await;

    let outcome = h.applier.apply_payment(candidate_id).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied);

    let transaction = h.store.transaction_by_provider_id("tr_1");
    assert_eq!(transaction.status, TransactionStatus::Matched.as_str());
    assert_eq!(transaction.invoice_id.as_deref(), Some("INV-1042"));

    let candidates = h.store.candidates_for(transaction_id);
    assert_eq!(candidates[0].status, "approved");

    let payments = h.billing.payments.lock().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].0, "INV-1042");
    assert_eq!(payments[0].1.amount, "50.00".parse::<Decimal>().unwrap());
    assert_eq!(payments[0].1.provider_transaction_id, "tr_1");
}

#[tokio::test]
async fn billing_rejection_mutates_nothing_and_surfaces_the_reason() {
    let h = harness(default_matching_config());
    let (candidate_id, transaction_id) = seed_candidate(&h, 0.95).await;
    h.billing.reject("invoice already settled");

    let result = h.applier.apply_payment(candidate_id).await;
    match result {
        Err(AppError::Billing(BillingError::Rejected(message))) => {
            assert_eq!(message, "invoice already settled");
        }
        other => panic!("expected billing rejection, got {:?}", other.map(|_| ())),
    }

    let transaction = h.store.transaction_by_provider_id("tr_1");
    assert_eq!(transaction.status, TransactionStatus::Unmatched.as_str());
    assert_eq!(transaction.invoice_id, None);
    assert_eq!(h.store.candidates_for(transaction_id)[0].status, "pending");
    assert_eq!(h.billing.payment_count(), 0);
}

#[tokio::test]
async fn second_apply_for_the_same_candidate_is_a_noop() {
    let h = harness(default_matching_config());
    let (candidate_id, _) = seed_candidate(&h, 0.95).await;

    assert_eq!(
        h.applier.apply_payment(candidate_id).await.unwrap(),
        ApplyOutcome::Applied
    );
    assert_eq!(
        h.applier.apply_payment(candidate_id).await.unwrap(),
        ApplyOutcome::AlreadyApplied
    );
    assert_eq!(h.billing.payment_count(), 1);
}

#[tokio::test]
async fn only_one_candidate_per_transaction_is_ever_applied() {
    let h = harness(default_matching_config());
    let (first_candidate, transaction_id) = seed_candidate(&h, 0.95).await;

    let second = h
        .store
        .insert_candidates(&[NewMatchCandidate {
            transaction_id,
            invoice_id: "INV-1042".to_string(),
            confidence: 0.8,
        }])
        .await
        .unwrap();

    assert_eq!(
        h.applier.apply_payment(first_candidate).await.unwrap(),
        ApplyOutcome::Applied
    );
    // The transaction is matched, so the rival candidate short-circuits.
    assert_eq!(
        h.applier.apply_payment(second[0].candidate_id).await.unwrap(),
        ApplyOutcome::AlreadyApplied
    );
    assert_eq!(h.billing.payment_count(), 1);
}

#[tokio::test]
async fn an_ignored_transaction_is_refused_before_billing_is_called() {
    let h = harness(default_matching_config());
    let (candidate_id, transaction_id) = seed_candidate(&h, 0.95).await;
    h.store.mark_ignored(transaction_id).await.unwrap();

    let result = h.applier.apply_payment(candidate_id).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
    assert_eq!(h.billing.payment_count(), 0);
}

#[tokio::test]
async fn applying_an_unknown_candidate_is_not_found() {
    let h = harness(default_matching_config());

    let result = h.applier.apply_payment(Uuid::new_v4()).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}
