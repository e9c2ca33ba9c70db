//! HTTP surface of the pay service.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;

use super::engine::Ledger;
use super::wire::{BalanceMap, TransferError, TransferRequest, TxValue};

/// Internal wire API consumed by the game service.
pub fn create_router(ledger: Arc<Ledger>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/internal/transfer", post(execute_transfer))
        .route("/internal/balance/:account_id", get(get_balance))
        .with_state(ledger)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn execute_transfer(
    State(ledger): State<Arc<Ledger>>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<BalanceMap>, PayError> {
    let balances = ledger.execute_transfer(&req).await?;
    Ok(Json(balances))
}

async fn get_balance(
    State(ledger): State<Arc<Ledger>>,
    Path(account_id): Path<String>,
) -> Result<Json<TxValue>, PayError> {
    let value = ledger.balance(&account_id).await.map_err(PayError::Storage)?;
    Ok(Json(TxValue { value }))
}

// ===== Error Handling =====

#[derive(Debug)]
enum PayError {
    Transfer(TransferError),
    Storage(anyhow::Error),
}

impl From<TransferError> for PayError {
    fn from(err: TransferError) -> Self {
        PayError::Transfer(err)
    }
}

impl IntoResponse for PayError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            PayError::Transfer(err) => {
                let status = match err {
                    TransferError::InvalidLegs
                    | TransferError::NonZeroSum
                    | TransferError::InsufficientFunds(_) => StatusCode::BAD_REQUEST,
                    TransferError::Conflict | TransferError::IdempotentReplay => {
                        StatusCode::CONFLICT
                    }
                    TransferError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string(), err.code())
            }
            PayError::Storage(err) => {
                tracing::error!("balance read failed: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "FATAL".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}
