use common::metrics;
use domain::Order;
use order_store::OrderStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::response::OrderResponse;
use crate::ServiceError;

/// In-memory mirror of the order store.
///
/// Writes go to the store first and reach the cache only once the store
/// accepted them, so every cached entry is backed by a persisted record.
/// Misses are read through from the store. Entries are never evicted.
///
/// One lock guards the whole map; it is never held across store I/O.
pub struct OrderCacheService {
    store: Arc<dyn OrderStore>,
    cache: RwLock<HashMap<String, Order>>,
}

impl OrderCacheService {
    /// Build the service and warm the cache from the store.
    ///
    /// The restore is bounded by `restore_timeout`. Failure or expiry is
    /// logged and the service starts with whatever the restore managed to
    /// load, possibly nothing.
    pub async fn new(store: Arc<dyn OrderStore>, restore_timeout: Duration) -> Self {
        let service = Self::cold(store);

        match tokio::time::timeout(restore_timeout, service.restore_cache()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                error!(error = %e, "Failed to restore cache, starting with partial state");
            }
            Err(_) => {
                error!(
                    timeout_secs = restore_timeout.as_secs_f64(),
                    "Cache restore timed out, starting with partial state"
                );
            }
        }

        service
    }

    /// Service with an empty cache and no restore
    pub fn cold(store: Arc<dyn OrderStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Persist `order` (upsert) and then make it visible in the cache.
    ///
    /// An order whose uid is empty or only whitespace gets a generated one. If the store rejects the
    /// write the cache is left untouched.
    pub async fn create_order(&self, mut order: Order) -> Result<String, ServiceError> {
        if !order.has_uid() {
            order.order_uid = Uuid::new_v4().to_string();
            debug!(order_uid = %order.order_uid, "Generated uid for order without one");
        }

        let start = Instant::now();
        let saved = self.store.save_order(&order).await;
        metrics::record_store_operation("save_order", saved.is_ok(), start.elapsed().as_secs_f64());
        let order_uid = saved?;

        let entries = {
            let mut cache = self.cache.write().await;
            cache.insert(order_uid.clone(), order);
            cache.len()
        };
        metrics::set_cache_entries(entries);

        info!(order_uid = %order_uid, "Order saved to store and cache");
        Ok(order_uid)
    }

    /// Look an order up, reading through to the store on a miss
    pub async fn get_by_uid(&self, order_uid: &str) -> Result<OrderResponse, ServiceError> {
        if order_uid.trim().is_empty() {
            return Err(ServiceError::Validation("order uid is required".to_string()));
        }

        if let Some(order) = self.cache.read().await.get(order_uid) {
            metrics::record_cache_request(true);
            debug!(order_uid, "Cache hit");
            return Ok(OrderResponse::from(order));
        }

        metrics::record_cache_request(false);
        debug!(order_uid, "Cache miss, querying store");

        let start = Instant::now();
        let loaded = self.store.get_order(order_uid).await;
        metrics::record_store_operation("get_order", loaded.is_ok(), start.elapsed().as_secs_f64());

        let order = loaded?.ok_or_else(|| ServiceError::NotFound(order_uid.to_string()))?;

        let mut cache = self.cache.write().await;
        // A write that landed while we were reading the store is newer than
        // what we loaded; keep it.
        let cached = cache.entry(order.order_uid.clone()).or_insert(order);
        let response = OrderResponse::from(&*cached);
        metrics::set_cache_entries(cache.len());

        Ok(response)
    }

    /// Load every stored order into the cache.
    ///
    /// The store is read first; the cache is then populated in a single
    /// exclusive section without replacing entries already cached. Returns
    /// the number of orders loaded.
    pub async fn restore_cache(&self) -> Result<usize, ServiceError> {
        let start = Instant::now();
        let loaded = self.store.get_all_orders().await;
        metrics::record_store_operation(
            "get_all_orders",
            loaded.is_ok(),
            start.elapsed().as_secs_f64(),
        );
        let orders = loaded?;
        let restored = orders.len();

        let mut cache = self.cache.write().await;
        for order in orders {
            if !order.has_uid() {
                warn!("Skipping stored order without uid");
                continue;
            }
            // Entries written since the store was read are newer; keep them
            cache.entry(order.order_uid.clone()).or_insert(order);
        }
        metrics::set_cache_entries(cache.len());

        info!(restored, cached = cache.len(), "Restored orders to cache");
        Ok(restored)
    }

    /// Number of orders currently cached
    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_cached(&self, order_uid: &str) -> bool {
        self.cache.read().await.contains_key(order_uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use order_store::{InMemoryOrderStore, StoreError};

    mock! {
        pub Store {}

        #[async_trait]
        impl OrderStore for Store {
            async fn save_order(&self, order: &Order) -> Result<String, StoreError>;
            async fn get_order(&self, order_uid: &str) -> Result<Option<Order>, StoreError>;
            async fn list_order_uids(&self) -> Result<Vec<String>, StoreError>;
        }
    }

    fn order(uid: &str, track_number: &str) -> Order {
        Order {
            order_uid: uid.to_string(),
            track_number: track_number.to_string(),
            locale: "en".to_string(),
            ..Default::default()
        }
    }

    fn unavailable() -> StoreError {
        StoreError::Unavailable("connection refused".to_string())
    }

    async fn service_over(store: Arc<InMemoryOrderStore>) -> OrderCacheService {
        OrderCacheService::new(store, Duration::from_secs(1)).await
    }

    #[tokio::test]
    async fn test_create_then_get_returns_same_fields_from_cache() {
        let store = Arc::new(InMemoryOrderStore::new());
        let service = service_over(store.clone()).await;

        let mut created = order("A1", "T1");
        created.items.push(domain::Item {
            chrt_id: 42,
            brand: "Vivienne Sabo".to_string(),
            ..Default::default()
        });

        let uid = service.create_order(created.clone()).await.unwrap();
        assert_eq!(uid, "A1");

        let gets_before = store.call_counts().gets;
        let response = service.get_by_uid("A1").await.unwrap();

        assert_eq!(response, OrderResponse::from(&created));
        assert_eq!(store.call_counts().gets, gets_before);
    }

    #[tokio::test]
    async fn test_create_twice_keeps_only_latest_values() {
        let store = Arc::new(InMemoryOrderStore::new());
        let service = service_over(store.clone()).await;

        service.create_order(order("A1", "T1")).await.unwrap();
        let mut second = order("A1", "T2");
        second.locale = String::new();
        service.create_order(second).await.unwrap();

        let response = service.get_by_uid("A1").await.unwrap();
        assert_eq!(response.track_number, "T2");
        assert_eq!(response.locale, "");
        assert_eq!(service.cached_len().await, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_create_without_uid_generates_one() {
        let store = Arc::new(InMemoryOrderStore::new());
        let service = service_over(store.clone()).await;

        let uid = service.create_order(order("", "T1")).await.unwrap();

        assert!(Uuid::parse_str(&uid).is_ok());
        assert!(service.is_cached(&uid).await);
        assert_eq!(store.get_order(&uid).await.unwrap().unwrap().order_uid, uid);
    }

    #[tokio::test]
    async fn test_create_with_whitespace_uid_generates_one() {
        let store = Arc::new(InMemoryOrderStore::new());
        let service = service_over(store.clone()).await;

        let uid = service.create_order(order("   ", "T1")).await.unwrap();

        assert!(Uuid::parse_str(&uid).is_ok());
        assert!(!service.is_cached("   ").await);
        assert!(store.get_order("   ").await.unwrap().is_none());
        assert_eq!(service.get_by_uid(&uid).await.unwrap().track_number, "T1");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache_untouched() {
        let mut store = MockStore::new();
        store.expect_list_order_uids().returning(|| Ok(vec![]));
        store
            .expect_save_order()
            .times(1)
            .returning(|_| Err(unavailable()));
        store.expect_get_order().times(1).returning(|_| Ok(None));

        let service = OrderCacheService::new(Arc::new(store), Duration::from_secs(1)).await;

        let result = service.create_order(order("X", "T1")).await;
        assert!(matches!(result, Err(ServiceError::Store(_))));
        assert!(!service.is_cached("X").await);

        let lookup = service.get_by_uid("X").await;
        assert!(matches!(lookup, Err(ServiceError::NotFound(uid)) if uid == "X"));
    }

    #[tokio::test]
    async fn test_miss_reads_through_once() {
        let store = Arc::new(InMemoryOrderStore::new());
        let service = OrderCacheService::cold(store.clone());
        store.save_order(&order("B2", "T9")).await.unwrap();

        let first = service.get_by_uid("B2").await.unwrap();
        let second = service.get_by_uid("B2").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.track_number, "T9");
        assert_eq!(store.call_counts().gets, 1);
    }

    #[tokio::test]
    async fn test_unknown_uid_is_not_found() {
        let store = Arc::new(InMemoryOrderStore::new());
        let service = service_over(store).await;

        let result = service.get_by_uid("missing").await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
        assert_eq!(service.cached_len().await, 0);
    }

    #[tokio::test]
    async fn test_store_failure_on_miss_is_reported_as_store_error() {
        let store = Arc::new(InMemoryOrderStore::new());
        let service = service_over(store.clone()).await;
        store.set_unavailable(true);

        let result = service.get_by_uid("A1").await;
        assert!(matches!(result, Err(ServiceError::Store(_))));
    }

    #[tokio::test]
    async fn test_blank_uid_is_rejected() {
        let store = Arc::new(InMemoryOrderStore::new());
        let service = service_over(store.clone()).await;

        assert!(matches!(
            service.get_by_uid("  ").await,
            Err(ServiceError::Validation(_))
        ));
        assert_eq!(store.call_counts().gets, 0);
    }

    #[tokio::test]
    async fn test_construction_warms_cache_without_later_store_reads() {
        let store = Arc::new(InMemoryOrderStore::with_orders([
            order("A1", "T1"),
            order("B2", "T2"),
            order("C3", "T3"),
        ]));
        let service = service_over(store.clone()).await;
        assert_eq!(service.cached_len().await, 3);

        let warm = store.call_counts();
        for (uid, track) in [("A1", "T1"), ("B2", "T2"), ("C3", "T3")] {
            let response = service.get_by_uid(uid).await.unwrap();
            assert_eq!(response.track_number, track);
        }

        assert_eq!(store.call_counts(), warm);
    }

    #[tokio::test]
    async fn test_restore_is_idempotent() {
        let store = Arc::new(InMemoryOrderStore::with_orders([
            order("A1", "T1"),
            order("B2", "T2"),
        ]));
        let service = service_over(store).await;

        let snapshot = service.cache.read().await.clone();
        assert_eq!(service.restore_cache().await.unwrap(), 2);
        assert_eq!(service.restore_cache().await.unwrap(), 2);

        assert_eq!(*service.cache.read().await, snapshot);
    }

    #[tokio::test]
    async fn test_restore_keeps_newer_cached_entries() {
        let store = Arc::new(InMemoryOrderStore::with_orders([
            order("A1", "stale"),
            order("B2", "T2"),
        ]));
        let service = OrderCacheService::cold(store);
        service
            .cache
            .write()
            .await
            .insert("A1".to_string(), order("A1", "fresh"));

        assert_eq!(service.restore_cache().await.unwrap(), 2);

        assert_eq!(service.get_by_uid("A1").await.unwrap().track_number, "fresh");
        assert_eq!(service.get_by_uid("B2").await.unwrap().track_number, "T2");
    }

    #[tokio::test]
    async fn test_restore_failure_is_not_fatal() {
        let mut store = MockStore::new();
        store
            .expect_list_order_uids()
            .times(1)
            .returning(|| Err(unavailable()));

        let service = OrderCacheService::new(Arc::new(store), Duration::from_secs(1)).await;

        assert_eq!(service.cached_len().await, 0);
    }

    struct StallingStore;

    #[async_trait]
    impl OrderStore for StallingStore {
        async fn save_order(&self, order: &Order) -> Result<String, StoreError> {
            Ok(order.order_uid.clone())
        }

        async fn get_order(&self, _order_uid: &str) -> Result<Option<Order>, StoreError> {
            Ok(None)
        }

        async fn list_order_uids(&self) -> Result<Vec<String>, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_restore_is_bounded_by_deadline() {
        let start = Instant::now();
        let service =
            OrderCacheService::new(Arc::new(StallingStore), Duration::from_millis(50)).await;

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(service.cached_len().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_and_reads() {
        let store = Arc::new(InMemoryOrderStore::with_orders(
            (0..16).map(|i| order(&format!("seed-{i}"), "seed")),
        ));
        let service = Arc::new(service_over(store.clone()).await);

        let mut handles = Vec::new();
        for i in 0..32 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .create_order(order(&format!("new-{i}"), &format!("T{i}")))
                    .await
                    .map(|_| ())
            }));
        }
        for i in 0..64 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .get_by_uid(&format!("seed-{}", i % 16))
                    .await
                    .map(|_| ())
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(service.cached_len().await, 48);
        for i in 0..32 {
            let response = service.get_by_uid(&format!("new-{i}")).await.unwrap();
            assert_eq!(response.track_number, format!("T{i}"));
        }
        assert_eq!(store.len().await, 48);
    }
}
