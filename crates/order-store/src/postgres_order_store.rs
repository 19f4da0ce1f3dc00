use super::{OrderStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Delivery, Item, Order, Payment};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};

const UNIQUE_VIOLATION: &str = "23505";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        order_uid VARCHAR(255) PRIMARY KEY,
        track_number VARCHAR(255),
        entry VARCHAR(50),
        delivery JSONB,
        payment JSONB,
        items JSONB,
        locale VARCHAR(10),
        internal_signature VARCHAR(255),
        customer_id VARCHAR(255),
        delivery_service VARCHAR(100),
        shardkey VARCHAR(50),
        sm_id INTEGER,
        date_created TIMESTAMP WITH TIME ZONE,
        oof_shard VARCHAR(50)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_orders_order_uid ON orders(order_uid)",
    "CREATE INDEX IF NOT EXISTS idx_orders_date_created ON orders(date_created)",
];

/// Row shape of the `orders` table. Nested records live in JSONB columns.
#[derive(Debug, FromRow)]
struct OrderRow {
    order_uid: String,
    track_number: Option<String>,
    entry: Option<String>,
    delivery: Option<Json<Delivery>>,
    payment: Option<Json<Payment>>,
    items: Option<Json<Vec<Item>>>,
    locale: Option<String>,
    internal_signature: Option<String>,
    customer_id: Option<String>,
    delivery_service: Option<String>,
    shardkey: Option<String>,
    sm_id: Option<i32>,
    date_created: Option<DateTime<Utc>>,
    oof_shard: Option<String>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            order_uid: row.order_uid,
            track_number: row.track_number.unwrap_or_default(),
            entry: row.entry.unwrap_or_default(),
            delivery: row.delivery.map(|d| d.0).unwrap_or_default(),
            payment: row.payment.map(|p| p.0).unwrap_or_default(),
            items: row.items.map(|i| i.0).unwrap_or_default(),
            locale: row.locale.unwrap_or_default(),
            internal_signature: row.internal_signature.unwrap_or_default(),
            customer_id: row.customer_id.unwrap_or_default(),
            delivery_service: row.delivery_service.unwrap_or_default(),
            shardkey: row.shardkey.unwrap_or_default(),
            sm_id: row.sm_id.unwrap_or_default(),
            date_created: row.date_created.unwrap_or_default(),
            oof_shard: row.oof_shard.unwrap_or_default(),
        }
    }
}

/// PostgreSQL implementation of the order store
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url` and verify the server answers
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        info!(max_connections, "Connected to PostgreSQL");

        Ok(Self { pool })
    }

    /// Create the `orders` table and its indexes if they do not exist yet
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Order schema is up to date");
        Ok(())
    }

    /// Get the database pool (useful for testing and shutdown)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_write_error(order_uid: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StoreError::Conflict(order_uid.to_string());
        }
    }
    StoreError::DatabaseError(err)
}

/// JSONB columns of one order, encoded before any database round trip
struct OrderDocuments {
    delivery: Value,
    payment: Value,
    items: Value,
}

impl OrderDocuments {
    fn encode(order: &Order) -> Result<Self, StoreError> {
        Ok(Self {
            delivery: serde_json::to_value(&order.delivery)?,
            payment: serde_json::to_value(&order.payment)?,
            items: serde_json::to_value(&order.items)?,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn save_order(&self, order: &Order) -> Result<String, StoreError> {
        let documents = OrderDocuments::encode(order)?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                order_uid, track_number, entry, delivery, payment, items,
                locale, internal_signature, customer_id, delivery_service,
                shardkey, sm_id, date_created, oof_shard
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (order_uid) DO UPDATE SET
                track_number = EXCLUDED.track_number,
                entry = EXCLUDED.entry,
                delivery = EXCLUDED.delivery,
                payment = EXCLUDED.payment,
                items = EXCLUDED.items,
                locale = EXCLUDED.locale,
                internal_signature = EXCLUDED.internal_signature,
                customer_id = EXCLUDED.customer_id,
                delivery_service = EXCLUDED.delivery_service,
                shardkey = EXCLUDED.shardkey,
                sm_id = EXCLUDED.sm_id,
                date_created = EXCLUDED.date_created,
                oof_shard = EXCLUDED.oof_shard
            "#,
        )
        .bind(&order.order_uid)
        .bind(&order.track_number)
        .bind(&order.entry)
        .bind(Json(documents.delivery))
        .bind(Json(documents.payment))
        .bind(Json(documents.items))
        .bind(&order.locale)
        .bind(&order.internal_signature)
        .bind(&order.customer_id)
        .bind(&order.delivery_service)
        .bind(&order.shardkey)
        .bind(order.sm_id)
        .bind(order.date_created)
        .bind(&order.oof_shard)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(&order.order_uid, e))?;

        debug!(order_uid = %order.order_uid, "Upserted order");
        Ok(order.order_uid.clone())
    }

    async fn get_order(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT
                order_uid, track_number, entry, delivery, payment, items,
                locale, internal_signature, customer_id, delivery_service,
                shardkey, sm_id, date_created, oof_shard
            FROM orders
            WHERE order_uid = $1
            "#,
        )
        .bind(order_uid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Order::from))
    }

    async fn list_order_uids(&self) -> Result<Vec<String>, StoreError> {
        let uids: Vec<String> = sqlx::query_scalar("SELECT order_uid FROM orders")
            .fetch_all(&self.pool)
            .await?;

        debug!(count = uids.len(), "Enumerated order uids");
        Ok(uids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_with_nulls_maps_to_defaults() {
        let row = OrderRow {
            order_uid: "A1".to_string(),
            track_number: Some("T1".to_string()),
            entry: None,
            delivery: None,
            payment: Some(Json(Payment {
                currency: "USD".to_string(),
                amount: 1817,
                ..Default::default()
            })),
            items: Some(Json(vec![Item {
                chrt_id: 9934930,
                ..Default::default()
            }])),
            locale: None,
            internal_signature: None,
            customer_id: None,
            delivery_service: None,
            shardkey: None,
            sm_id: None,
            date_created: None,
            oof_shard: None,
        };

        let order = Order::from(row);

        assert_eq!(order.order_uid, "A1");
        assert_eq!(order.track_number, "T1");
        assert_eq!(order.entry, "");
        assert_eq!(order.delivery, Delivery::default());
        assert_eq!(order.payment.amount, 1817);
        assert_eq!(order.items[0].chrt_id, 9934930);
        assert_eq!(order.sm_id, 0);
    }

    #[test]
    fn test_documents_encode_nested_values() {
        let order = Order {
            order_uid: "A1".to_string(),
            payment: Payment {
                currency: "USD".to_string(),
                amount: 1817,
                ..Default::default()
            },
            items: vec![Item {
                chrt_id: 9934930,
                ..Default::default()
            }],
            ..Default::default()
        };

        let documents = OrderDocuments::encode(&order).unwrap();

        assert_eq!(documents.payment["currency"], "USD");
        assert_eq!(documents.payment["amount"], 1817);
        assert_eq!(documents.items[0]["chrt_id"], 9934930);
        assert_eq!(documents.delivery["city"], "");
    }

    #[test]
    fn test_encoding_failure_maps_to_serialization_error() {
        let err = serde_json::from_str::<Value>("{").unwrap_err();
        assert!(matches!(
            StoreError::from(err),
            StoreError::SerializationError(_)
        ));
    }

    #[test]
    fn test_schema_creates_both_indexes() {
        assert!(SCHEMA.iter().any(|s| s.contains("idx_orders_order_uid")));
        assert!(SCHEMA.iter().any(|s| s.contains("idx_orders_date_created")));
    }

    #[tokio::test]
    async fn test_store_creation() {
        let pool = PgPool::connect_lazy("postgresql://test").unwrap();
        let store = PostgresOrderStore::new(pool);
        assert!(!store.pool().is_closed());
    }
}
