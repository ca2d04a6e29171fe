use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    domain::{
        entities::{
            purchase_transaction::{PurchaseOutcome, PurchaseTransaction, TransactionState},
            store_event::{StoreError, StoreEvent},
        },
        stores::entitlement_store::EntitlementStore,
    },
    errors::{IapError, IapErrorKind, StoreOperation},
};

use super::receipt_validator::ReceiptValidator;

pub(crate) type PurchaseResponder = oneshot::Sender<Result<PurchaseOutcome, IapError>>;

pub(crate) enum Command {
    Purchase {
        product_id: String,
        offer_token: Option<String>,
        respond: PurchaseResponder,
    },
}

/// A checkout the user started and is waiting on.
struct PendingPurchase {
    product_id: String,
    requested_at: DateTime<Utc>,
    /// Set once a store update has been matched to this purchase.
    transaction_id: Option<String>,
    respond: PurchaseResponder,
}

struct Completion {
    transaction_id: String,
    result: Result<PurchaseOutcome, IapError>,
    finished: bool,
}

/// Single consumer of store events. Every transaction passes through here,
/// so deduplication and finish-once bookkeeping live in one place.
pub(crate) struct ReconciliationLoop {
    store: Arc<dyn EntitlementStore>,
    validator: Arc<ReceiptValidator>,
    events: mpsc::Receiver<StoreEvent>,
    commands: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    outcomes: broadcast::Sender<PurchaseOutcome>,
    pending: Vec<PendingPurchase>,
    validating: HashSet<String>,
    finished: HashSet<String>,
    clock_skew: chrono::Duration,
}

impl ReconciliationLoop {
    pub(crate) fn new(
        store: Arc<dyn EntitlementStore>,
        validator: Arc<ReceiptValidator>,
        events: mpsc::Receiver<StoreEvent>,
        commands: mpsc::Receiver<Command>,
        outcomes: broadcast::Sender<PurchaseOutcome>,
        clock_skew: chrono::Duration,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            store,
            validator,
            events,
            commands,
            completions_tx,
            completions_rx,
            outcomes,
            pending: Vec::new(),
            validating: HashSet::new(),
            finished: HashSet::new(),
            clock_skew,
        }
    }

    /// Runs until every reconciler handle is dropped.
    pub(crate) async fn run(mut self) {
        info!("reconciliation loop started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = self.events.recv() => self.handle_event(event),
                Some(completion) = self.completions_rx.recv() => self.handle_completion(completion),
            }
        }
        info!(pending = self.pending.len(), "reconciliation loop stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Purchase {
                product_id,
                offer_token,
                respond,
            } => {
                self.pending.retain(|p| !p.respond.is_closed());
                self.pending.push(PendingPurchase {
                    product_id: product_id.clone(),
                    requested_at: Utc::now(),
                    transaction_id: None,
                    respond,
                });
                if let Err(e) = self
                    .store
                    .purchase(&product_id, offer_token.as_deref())
                    .await
                {
                    // The checkout never opened; the waiter we just pushed is
                    // the last one.
                    if let Some(pending) = self.pending.pop() {
                        let _ = pending.respond.send(Err(e));
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::Update(transaction) => self.handle_update(transaction),
            StoreEvent::Error(error) => self.handle_store_error(error),
        }
    }

    fn handle_update(&mut self, transaction: PurchaseTransaction) {
        let transaction_id = transaction.transaction_id.clone();
        debug!(
            %transaction_id,
            product_id = %transaction.product_id,
            state = ?TransactionState::Received,
            "store delivered transaction"
        );
        if self.finished.contains(&transaction_id) {
            debug!(%transaction_id, "transaction already finished this session");
            return;
        }
        // Bind before deduplicating: the purchase waits on whichever
        // validation of this transaction completes.
        if self.bind_to_pending(&transaction) {
            debug!(%transaction_id, "matched transaction to pending purchase");
        }
        if !self.validating.insert(transaction_id.clone()) {
            debug!(%transaction_id, "transaction already being validated");
            return;
        }
        if !self.is_bound(&transaction_id) {
            info!(%transaction_id, "processing transaction replayed by the store");
        }

        let store = self.store.clone();
        let validator = self.validator.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            // A restore may hold the transaction; its outcome is reused.
            let claim = validator.claim(&transaction.transaction_id).await;
            let result = validator.resolve(&transaction, &claim.guard).await;
            let finished = match &result {
                // Terminal either way; an unfinished rejection would be
                // redelivered forever.
                Ok(_) => match store.finish_transaction(&transaction).await {
                    Ok(()) => {
                        debug!(
                            transaction_id = %transaction.transaction_id,
                            state = ?TransactionState::Finished,
                            "transaction finished"
                        );
                        true
                    }
                    Err(e) => {
                        warn!(
                            transaction_id = %transaction.transaction_id,
                            error = %e,
                            "failed to finish transaction, store will redeliver it"
                        );
                        false
                    }
                },
                // Left unfinished so the store redelivers it for another try.
                Err(_) => false,
            };
            let _ = completions.send(Completion {
                transaction_id: transaction.transaction_id,
                result,
                finished,
            });
            drop(claim);
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        self.validating.remove(&completion.transaction_id);
        if completion.finished {
            self.finished.insert(completion.transaction_id.clone());
        }
        if let Ok(outcome) = &completion.result {
            let _ = self.outcomes.send(outcome.clone());
        }
        let position = self
            .pending
            .iter()
            .position(|p| p.transaction_id.as_deref() == Some(completion.transaction_id.as_str()));
        match position {
            Some(i) => {
                let pending = self.pending.remove(i);
                let result = match completion.result {
                    Ok(PurchaseOutcome::Rejected { reason, .. }) => {
                        Err(IapError::new(IapErrorKind::ValidationFailed, reason))
                    }
                    other => other,
                };
                let _ = pending.respond.send(result);
            }
            None => {
                if let Err(e) = completion.result {
                    warn!(
                        transaction_id = %completion.transaction_id,
                        error = %e,
                        "replayed transaction could not be validated"
                    );
                }
            }
        }
    }

    fn handle_store_error(&mut self, error: StoreError) {
        let position = self
            .pending
            .iter()
            .position(|p| {
                p.transaction_id.is_none()
                    && error.product_id.as_deref() == Some(p.product_id.as_str())
            })
            .or_else(|| self.pending.iter().position(|p| p.transaction_id.is_none()));
        let Some(i) = position else {
            if error.is_cancellation() {
                debug!("checkout cancelled with no purchase pending");
            } else {
                warn!(error = %error, "store error with no purchase pending");
            }
            return;
        };
        let pending = self.pending.remove(i);
        let err = IapError::from_store_error(error, StoreOperation::Purchase);
        if err.kind() == IapErrorKind::PurchaseCancelled {
            debug!(product_id = %pending.product_id, "purchase cancelled by user");
        }
        let _ = pending.respond.send(Err(err));
    }

    /// Binds a transaction to the oldest waiting purchase of the same product
    /// that was requested before the transaction happened. Older transactions
    /// are replays from a previous session and bind to nothing.
    fn bind_to_pending(&mut self, transaction: &PurchaseTransaction) -> bool {
        if self.is_bound(&transaction.transaction_id) {
            return false;
        }
        let skew = self.clock_skew;
        let Some(pending) = self.pending.iter_mut().find(|p| {
            p.transaction_id.is_none()
                && p.product_id == transaction.product_id
                && transaction.transaction_date >= p.requested_at - skew
        }) else {
            return false;
        };
        pending.transaction_id = Some(transaction.transaction_id.clone());
        true
    }

    fn is_bound(&self, transaction_id: &str) -> bool {
        self.pending
            .iter()
            .any(|p| p.transaction_id.as_deref() == Some(transaction_id))
    }
}
