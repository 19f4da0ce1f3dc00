pub mod memory;
pub mod postgres_order_store;

pub use memory::InMemoryOrderStore;
pub use postgres_order_store::PostgresOrderStore;

use async_trait::async_trait;
use domain::Order;
use thiserror::Error;
use tracing::warn;

/// Durable storage for orders, keyed by `order_uid`
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert the order, or overwrite every field of the existing record with
    /// the same `order_uid`. Returns the key that was written.
    async fn save_order(&self, order: &Order) -> Result<String, StoreError>;

    /// Point lookup. `Ok(None)` when no record exists for the key.
    async fn get_order(&self, order_uid: &str) -> Result<Option<Order>, StoreError>;

    /// Enumerate every stored key
    async fn list_order_uids(&self) -> Result<Vec<String>, StoreError>;

    /// Load every stored order.
    ///
    /// Only a failure to enumerate keys is an error; a record that cannot be
    /// fetched (or disappeared in the meantime) is logged and skipped.
    async fn get_all_orders(&self) -> Result<Vec<Order>, StoreError> {
        let uids = self.list_order_uids().await?;
        let mut orders = Vec::with_capacity(uids.len());

        for uid in uids {
            match self.get_order(&uid).await {
                Ok(Some(order)) => orders.push(order),
                Ok(None) => {
                    warn!(order_uid = %uid, "Order vanished during enumeration, skipping");
                }
                Err(e) => {
                    warn!(order_uid = %uid, error = %e, "Failed to load order, skipping");
                }
            }
        }

        Ok(orders)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Order with uid {0} already exists")]
    Conflict(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
