/*!
 * Transaction coordination
 *
 * Runs a unit of work against the configured store so that ledger
 * movements and order mutations commit or roll back together.
 */

use metrics::{counter, histogram};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::errors::ServiceError;
use crate::repositories::{Store, UnitOfWork};

/// Wraps each state transition in one transaction.
///
/// The unit of work is moved into `work` and handed back with the outcome,
/// so the coordinator decides whether to commit or roll back:
///
/// ```rust,ignore
/// coordinator
///     .run_in_transaction("production.start", move |mut tx| async move {
///         let result = ledger.post_batch(tx.as_mut(), lines, now).await;
///         (tx, result)
///     })
///     .await?;
/// ```
///
/// A `ConflictingUpdate` raised anywhere in the unit (including commit)
/// replays `work` on a fresh unit, up to `max_conflict_retries` times.
#[derive(Clone)]
pub struct TransactionCoordinator {
    store: Arc<dyn Store>,
    max_conflict_retries: u32,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<dyn Store>, max_conflict_retries: u32) -> Self {
        Self {
            store,
            max_conflict_retries,
        }
    }

    #[instrument(skip(self, work))]
    pub async fn run_in_transaction<T, F, Fut>(
        &self,
        operation: &'static str,
        mut work: F,
    ) -> Result<T, ServiceError>
    where
        F: FnMut(Box<dyn UnitOfWork>) -> Fut + Send,
        Fut: Future<Output = (Box<dyn UnitOfWork>, Result<T, ServiceError>)> + Send,
        T: Send,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let tx = self.store.begin().await?;
            let (mut tx, outcome) = work(tx).await;

            let err = match outcome {
                Ok(value) => match tx.commit().await {
                    Ok(()) => {
                        counter!("orders.tx.committed", 1, "operation" => operation);
                        histogram!("orders.tx.attempts", f64::from(attempt));
                        return Ok(value);
                    }
                    Err(err) => err,
                },
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "rollback failed");
                    }
                    err
                }
            };

            counter!("orders.tx.rolled_back", 1, "operation" => operation);

            if err.is_conflict() && attempt <= self.max_conflict_retries {
                counter!("orders.tx.conflicts", 1, "operation" => operation);
                debug!(attempt, error = %err, "concurrent update detected, replaying transaction");
                tokio::task::yield_now().await;
                continue;
            }

            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::product::{self, ProductKind};
    use crate::repositories::MemoryStore;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn flour() -> product::Model {
        let now = Utc::now();
        product::Model {
            id: Uuid::new_v4(),
            sku: "FLOUR-1".into(),
            name: "Flour".into(),
            unit: "kg".into(),
            kind: ProductKind::RawMaterial,
            qty_on_hand: dec!(100),
            min_qty: Decimal::ZERO,
            cost_price: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn commits_on_success() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = TransactionCoordinator::new(store.clone(), 3);
        let product = flour();
        let id = product.id;

        coordinator
            .run_in_transaction("test.insert", move |mut tx| {
                let product = product.clone();
                async move {
                    let result = tx.insert_product(product).await.map(|_| ());
                    (tx, result)
                }
            })
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_product(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rolls_back_and_propagates_original_error() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = TransactionCoordinator::new(store.clone(), 3);
        let product = flour();
        let id = product.id;

        let result: Result<(), _> = coordinator
            .run_in_transaction("test.fail", move |mut tx| {
                let product = product.clone();
                async move {
                    if let Err(e) = tx.insert_product(product).await {
                        return (tx, Err(e));
                    }
                    (tx, Err(ServiceError::InvalidBom("no components".into())))
                }
            })
            .await;

        assert_matches!(result, Err(ServiceError::InvalidBom(msg)) if msg == "no components");
        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_product(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conflicts_are_replayed_until_retries_run_out() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = TransactionCoordinator::new(store, 2);
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<(), _> = coordinator
            .run_in_transaction("test.conflict", move |tx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (tx, Err(ServiceError::ConflictingUpdate("balance moved".into())))
                }
            })
            .await;

        assert_matches!(result, Err(ServiceError::ConflictingUpdate(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn business_errors_are_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = TransactionCoordinator::new(store, 5);
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<(), _> = coordinator
            .run_in_transaction("test.business", move |tx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (tx, Err(ServiceError::NotFound("product".into())))
                }
            })
            .await;

        assert_matches!(result, Err(ServiceError::NotFound(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
