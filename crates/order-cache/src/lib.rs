pub mod ingest;
pub mod response;
pub mod service;

pub use ingest::{IngestOutcome, OrderIngestor};
pub use response::{DeliveryResponse, ItemResponse, OrderResponse, PaymentResponse};
pub use service::OrderCacheService;

use order_store::StoreError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),
}
