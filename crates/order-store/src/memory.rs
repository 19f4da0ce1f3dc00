use super::{OrderStore, StoreError};
use async_trait::async_trait;
use domain::Order;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Snapshot of how often each store operation was invoked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub saves: usize,
    pub gets: usize,
    pub lists: usize,
}

/// Volatile order store for tests and local runs without PostgreSQL.
///
/// Counts calls per operation and can be switched into an unavailable mode
/// where every operation fails.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<String, Order>>,
    saves: AtomicUsize,
    gets: AtomicUsize,
    lists: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `orders`; seeding is not counted as calls
    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let map = orders
            .into_iter()
            .map(|order| (order.order_uid.clone(), order))
            .collect();

        Self {
            orders: RwLock::new(map),
            ..Default::default()
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn call_counts(&self) -> StoreCallCounts {
        StoreCallCounts {
            saves: self.saves.load(Ordering::SeqCst),
            gets: self.gets.load(Ordering::SeqCst),
            lists: self.lists.load(Ordering::SeqCst),
        }
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn save_order(&self, order: &Order) -> Result<String, StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        self.orders
            .write()
            .await
            .insert(order.order_uid.clone(), order.clone());
        Ok(order.order_uid.clone())
    }

    async fn get_order(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        Ok(self.orders.read().await.get(order_uid).cloned())
    }

    async fn list_order_uids(&self) -> Result<Vec<String>, StoreError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut uids: Vec<String> = self.orders.read().await.keys().cloned().collect();
        uids.sort();
        Ok(uids)
    }
}
