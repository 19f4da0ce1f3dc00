use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use common::metrics;
use order_cache::{OrderResponse, ServiceError};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ErrorReply = (StatusCode, Json<ErrorResponse>);

fn reply(status: StatusCode, message: &str) -> ErrorReply {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

/// Get a single order by uid
pub async fn get_order_handler(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderResponse>, ErrorReply> {
    if order_id.trim().is_empty() {
        metrics::record_lookup("bad_request");
        return Err(reply(StatusCode::BAD_REQUEST, "order id is required"));
    }

    let result = tokio::time::timeout(state.lookup_timeout, state.orders.get_by_uid(&order_id))
        .await
        .unwrap_or(Err(ServiceError::Timeout(state.lookup_timeout)));

    match result {
        Ok(order) => {
            metrics::record_lookup("found");
            Ok(Json(order))
        }
        Err(e) => Err(lookup_failure(&order_id, e)),
    }
}

/// Maps lookup failures to responses. A store failure or an expired deadline
/// is reported exactly like a missing order.
fn lookup_failure(order_id: &str, err: ServiceError) -> ErrorReply {
    match err {
        ServiceError::Validation(_) => {
            metrics::record_lookup("bad_request");
            reply(StatusCode::BAD_REQUEST, "order id is required")
        }
        ServiceError::NotFound(_) => {
            info!(order_uid = order_id, "Order not found");
            metrics::record_lookup("not_found");
            reply(StatusCode::NOT_FOUND, "order not found")
        }
        other => {
            error!(order_uid = order_id, error = %other, "Order lookup failed");
            metrics::record_lookup("error");
            reply(StatusCode::NOT_FOUND, "order not found")
        }
    }
}
