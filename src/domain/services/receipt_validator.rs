use std::{
    collections::HashMap,
    pin::pin,
    sync::{Arc, Mutex},
};

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::{
    data::datasources::entitlement_cache_datasource::EntitlementCache,
    domain::{
        entities::{
            entitlement::{Entitlement, PlanTier},
            iap_product_id::tier_for_sku,
            purchase_transaction::{
                PurchaseHistoryEntry, PurchaseOutcome, PurchaseTransaction, RecordedOutcome,
                TransactionState,
            },
        },
        repositories::subscription_repository::SubscriptionRepository,
    },
    errors::{IapError, SubscriptionApiError},
};

use super::session_entitlement::SessionEntitlement;

/// Turns raw store transactions into confirmed or rejected outcomes.
///
/// Every validation, whether it comes from the store listener or from a
/// restore, goes through here so a transaction is never submitted to the
/// backend twice at the same time.
pub struct ReceiptValidator {
    repository: Arc<dyn SubscriptionRepository>,
    cache: Arc<EntitlementCache>,
    session: Arc<SessionEntitlement>,
    in_flight: InFlight,
}

type InFlight = Arc<Mutex<HashMap<String, Arc<Notify>>>>;

/// Marks a transaction as being validated until dropped. Dropping it wakes
/// every caller waiting in [`ReceiptValidator::claim`].
pub struct InFlightGuard {
    transaction_id: String,
    in_flight: InFlight,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let released = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.transaction_id);
        if let Some(notify) = released {
            notify.notify_waiters();
        }
    }
}

/// Result of [`ReceiptValidator::claim`].
pub struct Claim {
    pub guard: InFlightGuard,
    /// True when another validation of the transaction had to finish first;
    /// its outcome is then in the purchase history.
    pub waited: bool,
}

impl ReceiptValidator {
    pub fn new(
        repository: Arc<dyn SubscriptionRepository>,
        cache: Arc<EntitlementCache>,
        session: Arc<SessionEntitlement>,
    ) -> Self {
        Self {
            repository,
            cache,
            session,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Claims the transaction for validation, waiting for a validation that
    /// is already running to release it first.
    pub async fn claim(&self, transaction_id: &str) -> Claim {
        let mut waited = false;
        loop {
            let notify = match self.try_claim(transaction_id) {
                Ok(guard) => return Claim { guard, waited },
                Err(notify) => notify,
            };
            debug!(transaction_id, "waiting for in-flight validation");
            waited = true;
            let mut notified = pin!(notify.notified());
            notified.as_mut().enable();
            // The holder may have released between the failed claim and
            // enabling the waiter.
            if self.holds(transaction_id, &notify) {
                notified.await;
            }
        }
    }

    /// Claims the transaction unless another validation holds it.
    fn try_claim(&self, transaction_id: &str) -> Result<InFlightGuard, Arc<Notify>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(notify) = in_flight.get(transaction_id) {
            return Err(notify.clone());
        }
        in_flight.insert(transaction_id.to_string(), Arc::new(Notify::new()));
        Ok(InFlightGuard {
            transaction_id: transaction_id.to_string(),
            in_flight: self.in_flight.clone(),
        })
    }

    fn holds(&self, transaction_id: &str, notify: &Arc<Notify>) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(transaction_id)
            .is_some_and(|current| Arc::ptr_eq(current, notify))
    }

    /// Resolves a transaction the store delivered, reusing the outcome
    /// recorded by an earlier validation when there is one. A transaction that
    /// was confirmed but never finished only needs finishing.
    pub async fn resolve(
        &self,
        transaction: &PurchaseTransaction,
        guard: &InFlightGuard,
    ) -> Result<PurchaseOutcome, IapError> {
        match self.cache.recorded_outcome(&transaction.transaction_id).await {
            Some(RecordedOutcome::Confirmed) => {
                info!(
                    transaction_id = %transaction.transaction_id,
                    "transaction already confirmed, finishing only"
                );
                let entitlement = self
                    .cache
                    .load_active()
                    .await
                    .filter(|e| e.product_id.as_deref() == Some(transaction.product_id.as_str()))
                    .unwrap_or_else(|| Entitlement::from_transaction(transaction));
                Ok(PurchaseOutcome::Confirmed {
                    transaction_id: transaction.transaction_id.clone(),
                    entitlement,
                })
            }
            Some(RecordedOutcome::Rejected) => {
                info!(
                    transaction_id = %transaction.transaction_id,
                    "transaction already rejected, finishing only"
                );
                Ok(PurchaseOutcome::Rejected {
                    transaction_id: transaction.transaction_id.clone(),
                    reason: "receipt was rejected previously".to_string(),
                })
            }
            None => self.validate(transaction, guard).await,
        }
    }

    /// Submits the receipt to the backend. Rejections and other terminal
    /// backend answers are a `Rejected` outcome. Transient failures are
    /// errors and leave nothing recorded.
    pub async fn validate(
        &self,
        transaction: &PurchaseTransaction,
        _guard: &InFlightGuard,
    ) -> Result<PurchaseOutcome, IapError> {
        let transaction_id = transaction.transaction_id.clone();
        debug!(
            %transaction_id,
            product_id = %transaction.product_id,
            state = ?TransactionState::Validating,
            "validating receipt"
        );
        let outcome = match self.repository.validate_receipt(transaction).await {
            Ok(record) => {
                let entitlement = Entitlement::from_record(&record, Some(&transaction.product_id));
                if entitlement.is_active {
                    self.cache.store_active(&entitlement).await;
                    self.cache.store_receipt(&transaction.receipt).await;
                    self.session.confirm(entitlement.clone());
                    PurchaseOutcome::Confirmed {
                        transaction_id,
                        entitlement,
                    }
                } else {
                    PurchaseOutcome::Rejected {
                        transaction_id,
                        reason: format!("subscription is {:?}", record.status),
                    }
                }
            }
            Err(SubscriptionApiError::Rejected { code, message }) => PurchaseOutcome::Rejected {
                transaction_id,
                reason: format!("{code}: {message}"),
            },
            Err(e) if e.is_terminal() => {
                warn!(
                    %transaction_id,
                    error = %e,
                    "backend cannot validate receipt, treating it as rejected"
                );
                PurchaseOutcome::Rejected {
                    transaction_id,
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                warn!(
                    transaction_id = %transaction.transaction_id,
                    error = %e,
                    "receipt validation did not complete"
                );
                return Err(IapError::from_validation_error(e));
            }
        };
        self.record(transaction, &outcome).await;
        info!(
            transaction_id = %transaction.transaction_id,
            state = ?outcome.state(),
            "receipt validated"
        );
        Ok(outcome)
    }

    async fn record(&self, transaction: &PurchaseTransaction, outcome: &PurchaseOutcome) {
        self.cache
            .append_history(PurchaseHistoryEntry {
                transaction_id: transaction.transaction_id.clone(),
                product_id: transaction.product_id.clone(),
                transaction_date: transaction.transaction_date,
                outcome: match outcome {
                    PurchaseOutcome::Confirmed { .. } => RecordedOutcome::Confirmed,
                    PurchaseOutcome::Rejected { .. } => RecordedOutcome::Rejected,
                },
                recorded_at: Utc::now(),
            })
            .await
    }
}

impl Entitlement {
    /// Entitlement of a transaction the backend confirmed in an earlier
    /// session, when the cached snapshot no longer describes it.
    fn from_transaction(transaction: &PurchaseTransaction) -> Self {
        let tier = tier_for_sku(&transaction.product_id);
        Self {
            is_active: tier.is_some(),
            billing_period: tier.map(|t| t.billing_period()),
            product_id: Some(transaction.product_id.clone()),
            plan: if tier.is_some() {
                PlanTier::Pro
            } else {
                PlanTier::Free
            },
            expiry_date: None,
            auto_renewing: transaction.auto_renewing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::datasources::key_value_storage::MemoryKeyValueStorage,
        domain::entities::iap_purchase_id::IapReceipt,
        errors::IapErrorKind,
        test_support::{FakeSubscriptionRepository, Validation},
    };

    fn validator() -> (ReceiptValidator, Arc<FakeSubscriptionRepository>, Arc<EntitlementCache>) {
        let repository = Arc::new(FakeSubscriptionRepository::default());
        let cache = Arc::new(EntitlementCache::new(Arc::new(MemoryKeyValueStorage::new())));
        let validator = ReceiptValidator::new(
            repository.clone(),
            cache.clone(),
            Arc::new(SessionEntitlement::new()),
        );
        (validator, repository, cache)
    }

    fn transaction(id: &str) -> PurchaseTransaction {
        PurchaseTransaction {
            transaction_id: id.to_string(),
            product_id: "pro_monthly".to_string(),
            receipt: IapReceipt::GooglePlayPurchaseToken(format!("token-{id}")),
            transaction_date: Utc::now(),
            auto_renewing: Some(true),
        }
    }

    #[test]
    fn second_claim_fails_until_the_first_drops() {
        let (validator, _, _) = validator();
        let guard = validator.try_claim("t1").unwrap();
        assert!(validator.try_claim("t1").is_err());
        assert!(validator.try_claim("t2").is_ok());
        drop(guard);
        assert!(validator.try_claim("t1").is_ok());
    }

    #[tokio::test]
    async fn claim_waits_for_in_flight_validation_and_reuses_its_outcome() {
        let (validator, repository, _) = validator();
        let validator = Arc::new(validator);
        let tx = transaction("t1");
        let guard = validator.try_claim("t1").unwrap();

        let waiter = tokio::spawn({
            let validator = validator.clone();
            let tx = tx.clone();
            async move {
                let claim = validator.claim("t1").await;
                assert!(claim.waited);
                validator.resolve(&tx, &claim.guard).await
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        validator.validate(&tx, &guard).await.unwrap();
        drop(guard);
        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome.state(), TransactionState::Confirmed);
        assert_eq!(repository.validate_calls(), 1);
    }

    #[tokio::test]
    async fn uncontended_claim_does_not_wait() {
        let (validator, _, _) = validator();
        let claim = validator.claim("t1").await;
        assert!(!claim.waited);
        assert!(validator.try_claim("t1").is_err());
    }

    #[tokio::test]
    async fn confirmed_receipt_is_cached_and_recorded() {
        let (validator, _, cache) = validator();
        let tx = transaction("t1");
        let guard = validator.try_claim("t1").unwrap();
        let outcome = validator.validate(&tx, &guard).await.unwrap();
        assert_eq!(outcome.state(), TransactionState::Confirmed);
        assert_eq!(cache.recorded_outcome("t1").await, Some(RecordedOutcome::Confirmed));
        assert_eq!(cache.last_receipt().await.as_deref(), Some("token-t1"));
        assert!(validator.session.is_confirmed());
    }

    #[tokio::test]
    async fn rejection_is_recorded_and_not_revalidated() {
        let (validator, repository, cache) = validator();
        repository.set_validation("t1", Validation::Rejected);
        let tx = transaction("t1");
        let guard = validator.try_claim("t1").unwrap();

        let outcome = validator.resolve(&tx, &guard).await.unwrap();
        assert_eq!(outcome.state(), TransactionState::Rejected);
        assert!(cache.load_active().await.is_none());

        let again = validator.resolve(&tx, &guard).await.unwrap();
        assert_eq!(again.state(), TransactionState::Rejected);
        assert_eq!(repository.validate_calls(), 1);
    }

    #[tokio::test]
    async fn transient_failure_records_nothing() {
        let (validator, repository, cache) = validator();
        repository.set_validation("t1", Validation::Unavailable);
        let tx = transaction("t1");
        let guard = validator.try_claim("t1").unwrap();
        let err = validator.validate(&tx, &guard).await.unwrap_err();
        assert_eq!(err.kind(), IapErrorKind::BackendUnavailable);
        assert!(cache.recorded_outcome("t1").await.is_none());
    }

    #[tokio::test]
    async fn undecodable_backend_answer_is_a_recorded_rejection() {
        let (validator, repository, cache) = validator();
        repository.set_validation("t1", Validation::Malformed);
        let tx = transaction("t1");
        let guard = validator.try_claim("t1").unwrap();
        let outcome = validator.validate(&tx, &guard).await.unwrap();
        assert_eq!(outcome.state(), TransactionState::Rejected);
        assert_eq!(cache.recorded_outcome("t1").await, Some(RecordedOutcome::Rejected));
        assert!(cache.load_active().await.is_none());
    }
}
