use std::sync::Arc;

use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    config::IapConfig,
    constants::COMMAND_CHANNEL_CAPACITY,
    data::{
        datasources::{
            access_token_provider::AccessTokenProvider,
            entitlement_cache_datasource::EntitlementCache, key_value_storage::KeyValueStorage,
        },
        repositories::subscription_repository_impl::SubscriptionRepositoryImpl,
    },
    domain::{
        entities::{
            entitlement::{Entitlement, OptimisticEntitlement, PlanTier, RestoreResult},
            iap_product_id::{billing_period_for_sku, ProductTier},
            purchase_transaction::PurchaseOutcome,
            store_product::StoreSubscription,
            subscription_record::{RestoreSummary, SubscriptionRecord},
        },
        repositories::subscription_repository::SubscriptionRepository,
        services::{
            connection_manager::StoreConnectionManager,
            feature_gate::FeatureGate,
            reconciliation_loop::{Command, ReconciliationLoop},
            receipt_validator::ReceiptValidator,
            session_entitlement::SessionEntitlement,
        },
        stores::entitlement_store::EntitlementStore,
    },
    errors::{IapError, IapErrorKind},
};

/// Entry point for UI callers: purchase, restore, status and gating.
///
/// Owns the reconciliation loop, which stops once the reconciler is dropped
/// or shut down.
pub struct EntitlementReconciler {
    config: IapConfig,
    connection: StoreConnectionManager,
    repository: Arc<dyn SubscriptionRepository>,
    cache: Arc<EntitlementCache>,
    session: Arc<SessionEntitlement>,
    validator: Arc<ReceiptValidator>,
    commands: mpsc::Sender<Command>,
    outcomes: broadcast::Sender<PurchaseOutcome>,
    loop_handle: JoinHandle<()>,
}

impl EntitlementReconciler {
    /// Wires the reconciler against the HTTP backend described by `config`.
    pub fn from_config(
        config: IapConfig,
        store: Arc<dyn EntitlementStore>,
        storage: Arc<dyn KeyValueStorage>,
        token_provider: Arc<dyn AccessTokenProvider>,
    ) -> Result<Self, IapError> {
        let repository = SubscriptionRepositoryImpl::new(&config, token_provider)
            .map_err(IapError::from_backend_error)?;
        Self::new(
            config,
            store,
            Arc::new(repository),
            Arc::new(EntitlementCache::new(storage)),
        )
    }

    /// Must be called inside a tokio runtime; spawns the reconciliation loop.
    pub fn new(
        config: IapConfig,
        store: Arc<dyn EntitlementStore>,
        repository: Arc<dyn SubscriptionRepository>,
        cache: Arc<EntitlementCache>,
    ) -> Result<Self, IapError> {
        if store.platform() != config.platform {
            return Err(IapError::new(
                IapErrorKind::ConnectionFailed,
                format!(
                    "configured for {} but the store is {}",
                    config.platform,
                    store.platform()
                ),
            ));
        }
        let events = store.take_events().ok_or_else(|| {
            IapError::new(
                IapErrorKind::Unknown,
                "store events are already consumed by another reconciler",
            )
        })?;
        let session = Arc::new(SessionEntitlement::new());
        let validator = Arc::new(ReceiptValidator::new(
            repository.clone(),
            cache.clone(),
            session.clone(),
        ));
        let (commands, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (outcomes, _) = broadcast::channel(COMMAND_CHANNEL_CAPACITY);
        let reconciliation_loop = ReconciliationLoop::new(
            store.clone(),
            validator.clone(),
            events,
            commands_rx,
            outcomes.clone(),
            config.purchase_clock_skew,
        );
        let loop_handle = tokio::spawn(reconciliation_loop.run());
        Ok(Self {
            connection: StoreConnectionManager::new(store),
            config,
            repository,
            cache,
            session,
            validator,
            commands,
            outcomes,
            loop_handle,
        })
    }

    pub fn connection(&self) -> &StoreConnectionManager {
        &self.connection
    }

    pub fn feature_gate(&self) -> FeatureGate {
        FeatureGate::new(self.session.clone(), self.config.quotas.clone())
    }

    /// Outcomes of every validated transaction, including replays nobody
    /// was waiting for.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<PurchaseOutcome> {
        self.outcomes.subscribe()
    }

    /// Store catalog entries for the plans sold on this platform.
    pub async fn list_plans(&self) -> Result<Vec<StoreSubscription>, IapError> {
        self.connection.ensure_connected().await?;
        self.connection
            .store()
            .list_subscriptions(&ProductTier::skus(self.config.platform))
            .await
    }

    pub async fn purchase_tier(&self, tier: ProductTier) -> Result<PurchaseOutcome, IapError> {
        self.purchase_subscription(tier.sku(self.config.platform), None)
            .await
    }

    /// Starts checkout and waits until the resulting transaction is confirmed
    /// or rejected by the backend. A rejected receipt comes back as
    /// `ValidationFailed`, and store errors (including cancellation) as their
    /// own kinds. Subscribers of [`Self::subscribe_outcomes`] still see the
    /// `Rejected` outcome.
    pub async fn purchase_subscription(
        &self,
        product_id: &str,
        offer_token: Option<&str>,
    ) -> Result<PurchaseOutcome, IapError> {
        self.connection.ensure_connected().await?;
        let (respond, response) = oneshot::channel();
        self.commands
            .send(Command::Purchase {
                product_id: product_id.to_string(),
                offer_token: offer_token.map(str::to_string),
                respond,
            })
            .await
            .map_err(|_| stopped())?;
        response.await.map_err(|_| stopped())?
    }

    /// Re-queries the store for owned subscriptions and validates each with
    /// the backend. Finding nothing is a success with `is_active: false`.
    pub async fn restore_purchases(&self) -> Result<RestoreResult, IapError> {
        self.connection.ensure_connected().await?;
        let transactions = self.connection.store().restore().await?;
        if transactions.is_empty() {
            info!("restore found no purchases");
            return Ok(RestoreResult::nothing_restored());
        }

        let mut confirmed = Vec::new();
        let mut last_error = None;
        for transaction in &transactions {
            // A transaction the loop is validating right now is waited on and
            // its recorded outcome reused.
            let claim = self.validator.claim(&transaction.transaction_id).await;
            let result = if claim.waited {
                self.validator.resolve(transaction, &claim.guard).await
            } else {
                self.validator.validate(transaction, &claim.guard).await
            };
            match result {
                Ok(PurchaseOutcome::Confirmed { entitlement, .. }) => {
                    confirmed.push((transaction.transaction_date, entitlement))
                }
                Ok(PurchaseOutcome::Rejected { reason, .. }) => {
                    info!(
                        transaction_id = %transaction.transaction_id,
                        %reason,
                        "restored purchase rejected"
                    )
                }
                Err(e) => last_error = Some(e),
            }
        }

        // Latest purchase wins, which covers users who changed plans.
        let Some((_, latest)) = confirmed.into_iter().max_by_key(|(date, _)| *date) else {
            return match last_error {
                Some(e) => Err(IapError::with_source(
                    IapErrorKind::RestoreFailed,
                    "restored purchases could not be validated",
                    e,
                )),
                None => Ok(RestoreResult::nothing_restored()),
            };
        };
        self.cache.store_active(&latest).await;
        self.session.confirm(latest.clone());
        Ok(RestoreResult::from_entitlement(latest))
    }

    /// Submits every receipt the store still holds to the backend's bulk
    /// restore endpoint in one call, and applies the subscription it reports.
    pub async fn sync_receipts(&self) -> Result<RestoreSummary, IapError> {
        self.connection.ensure_connected().await?;
        let transactions = self.connection.store().restore().await?;
        if transactions.is_empty() {
            return Ok(RestoreSummary {
                restored: 0,
                current_subscription: None,
                is_active: false,
                plan: PlanTier::Free,
            });
        }
        let summary = self
            .repository
            .restore_receipts(&transactions)
            .await
            .map_err(|e| {
                IapError::with_source(IapErrorKind::RestoreFailed, "bulk restore failed", e)
            })?;
        info!(
            restored = summary.restored,
            is_active = summary.is_active,
            "receipts synced with backend"
        );
        if let (true, Some(record)) = (summary.is_active, &summary.current_subscription) {
            let entitlement = Entitlement {
                is_active: true,
                plan: summary.plan,
                ..Entitlement::from_record(record, None)
            };
            self.cache.store_active(&entitlement).await;
            self.session.confirm(entitlement);
        }
        Ok(summary)
    }

    /// Asks the backend whether the user is entitled. The backend always
    /// wins over the cache; when it cannot be reached the answer is "not
    /// entitled".
    pub async fn check_subscription_status(&self) -> Entitlement {
        let cached = self.cache.load_active().await;
        let snapshot = match self.repository.status().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "subscription status unavailable, treating as inactive");
                return Entitlement::inactive();
            }
        };
        if !snapshot.is_active {
            if cached.as_ref().is_some_and(|c| c.is_active) {
                info!("backend no longer reports an active subscription, clearing cache");
            }
            self.cache.clear_active().await;
            self.session.revoke();
            return Entitlement::inactive();
        }

        let cached_product = cached.and_then(|c| c.product_id);
        let entitlement = match &snapshot.subscription {
            Some(record) => {
                let product_id = record.product_id.clone().or(cached_product);
                Entitlement {
                    is_active: true,
                    plan: snapshot.plan,
                    ..Entitlement::from_record(record, product_id.as_deref())
                }
            }
            None => Entitlement {
                is_active: true,
                plan: snapshot.plan,
                billing_period: cached_product
                    .as_deref()
                    .and_then(billing_period_for_sku),
                product_id: cached_product,
                ..Entitlement::inactive()
            },
        };
        self.cache.store_active(&entitlement).await;
        self.session.confirm(entitlement.clone());
        entitlement
    }

    /// Last known entitlement, for rendering before the status check
    /// returns.
    pub async fn cached_entitlement(&self) -> Option<OptimisticEntitlement> {
        let entitlement = self.cache.load_active().await?;
        Some(OptimisticEntitlement {
            entitlement,
            confirmed_this_session: self.session.is_confirmed(),
        })
    }

    pub async fn subscription_history(&self) -> Result<Vec<SubscriptionRecord>, IapError> {
        self.repository
            .history()
            .await
            .map_err(IapError::from_backend_error)
    }

    /// Cancels at period end, then refreshes the entitlement so the cache
    /// reflects the backend.
    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionRecord, IapError> {
        let record = self
            .repository
            .cancel(subscription_id)
            .await
            .map_err(IapError::from_backend_error)?;
        self.check_subscription_status().await;
        Ok(record)
    }

    /// Stops the reconciliation loop and disconnects the store.
    pub async fn shutdown(self) {
        let Self {
            connection,
            commands,
            loop_handle,
            ..
        } = self;
        drop(commands);
        if let Err(e) = loop_handle.await {
            warn!(error = %e, "reconciliation loop ended abnormally");
        }
        if let Err(e) = connection.store().disconnect().await {
            warn!(error = %e, "failed to disconnect store on shutdown");
        }
    }
}

fn stopped() -> IapError {
    IapError::new(IapErrorKind::Unknown, "reconciliation loop is not running")
}
