//! Game-service HTTP API: wallet and table/bet endpoints.
//!
//! Authentication and sessions live in front of this service; handlers take
//! the player id directly.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::config::Config;
use crate::game::store::GameStore;
use crate::ledger::wire::{Amount, TxValue};
use crate::models::{Bet, Table};
use crate::notifier::{GameEvent, Notifier};
use crate::pay::intent::{PendingTx, TxType};
use crate::pay::processor::TxProcessor;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<GameStore>,
    pub processor: Arc<TxProcessor>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Arc<Config>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/tables", get(list_tables))
        .route("/api/tables/:table_id/join", post(join_table))
        .route("/api/tables/:table_id/leave", post(leave_table))
        .route("/api/tables/:table_id/bet", post(place_bet))
        .route("/api/wallet/:player_id/balance", get(get_balance))
        .route("/api/wallet/:player_id/deposit", post(deposit))
        .route("/api/wallet/:player_id/withdraw", post(withdraw))
        .with_state(state)
}

// ===== Route Handlers =====

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_tables(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let tables = state.store.list_tables().await?;
    let out: Vec<serde_json::Value> = tables
        .into_iter()
        .map(|(t, count)| {
            json!({
                "id": t.id,
                "name": t.name,
                "tier": t.tier,
                "min_bet": t.tier.min_bet(),
                "max_bet": t.tier.max_bet(),
                "max_seats": t.tier.max_seats(),
                "player_count": count,
                "next_spin_time": t.next_spin_time,
                "last_winning_number": t.last_winning_number,
            })
        })
        .collect();
    Ok(Json(json!({ "tables": out })))
}

async fn join_table(
    State(state): State<AppState>,
    Path(table_id): Path<String>,
    Json(req): Json<JoinTableRequest>,
) -> Result<Json<Table>, ApiError> {
    let table = state
        .store
        .get_table(&table_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Table not found".to_string()))?;

    let player = state
        .store
        .get_or_create_player(&req.player_id, req.name.as_deref().unwrap_or(&req.player_id))
        .await?;

    if player.current_table_id.as_deref() == Some(table_id.as_str()) {
        return Err(ApiError::Conflict("Player already at this table".to_string()));
    }
    if player.current_table_id.is_some() {
        return Err(ApiError::Conflict(
            "You are already at another table. Leave it first.".to_string(),
        ));
    }

    let seated = state.store.players_at_table(&table_id).await?;
    if seated.len() >= table.tier.max_seats() {
        return Err(ApiError::BadRequest("Table is full".to_string()));
    }

    let now = Utc::now();
    state.store.seat_player(&req.player_id, &table_id, now).await?;

    let mut player = player;
    player.current_table_id = Some(table_id.clone());
    player.last_active_at = now;
    state.notifier.notify(GameEvent::PlayerJoined {
        table_id,
        player,
    });

    Ok(Json(table))
}

async fn leave_table(
    State(state): State<AppState>,
    Path(table_id): Path<String>,
    Json(req): Json<LeaveTableRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .get_table(&table_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Table not found".to_string()))?;

    let player = state
        .store
        .get_player(&req.player_id)
        .await?
        .filter(|p| p.current_table_id.as_deref() == Some(table_id.as_str()))
        .ok_or_else(|| ApiError::NotFound("Player not at this table".to_string()))?;

    state.store.unseat_player(&req.player_id).await?;
    state.notifier.notify(GameEvent::PlayerLeft { table_id, player });

    Ok(StatusCode::NO_CONTENT)
}

async fn place_bet(
    State(state): State<AppState>,
    Path(table_id): Path<String>,
    Json(req): Json<PlaceBetRequest>,
) -> Result<Json<Bet>, ApiError> {
    let table = state
        .store
        .get_table(&table_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Table not found".to_string()))?;

    let player = state
        .store
        .get_player(&req.player_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Player not found".to_string()))?;

    if player.current_table_id.as_deref() != Some(table_id.as_str()) {
        return Err(ApiError::BadRequest(
            "You must join the table first".to_string(),
        ));
    }

    if req.amount < table.tier.min_bet() || req.amount > table.tier.max_bet() {
        return Err(ApiError::BadRequest(format!(
            "Bet must be between {} and {}",
            table.tier.min_bet(),
            table.tier.max_bet()
        )));
    }
    if !(0..=36).contains(&req.chosen_number) {
        return Err(ApiError::BadRequest(
            "Number must be between 0 and 36".to_string(),
        ));
    }
    if req.amount <= 0 {
        return Err(ApiError::BadRequest("Bet amount must be positive".to_string()));
    }

    let now = Utc::now();
    if (table.next_spin_time - now).num_seconds() < 2 {
        return Err(ApiError::BadRequest(
            "Too close to next spin, wait a moment".to_string(),
        ));
    }

    let balance = state
        .processor
        .player_balance(&req.player_id)
        .await
        .map_err(ApiError::BadRequest)?;
    if req.amount > balance {
        return Err(ApiError::BadRequest("Insufficient funds".to_string()));
    }

    // Charge through the settlement pipeline before the bet exists; the
    // intent id carries the bet id so a replay can never charge twice.
    let bet_id = Uuid::new_v4().to_string();
    let pending = PendingTx::new(
        format!("BetId_{}", bet_id),
        TxType::Spend,
        req.player_id.clone(),
        req.amount,
    );
    state.store.insert_pending_tx(&pending).await?;

    state
        .processor
        .process(pending)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let bet = Bet {
        id: bet_id,
        player_id: req.player_id.clone(),
        table_id: table_id.clone(),
        chosen_number: req.chosen_number,
        amount: req.amount,
        is_resolved: false,
        winning_number: None,
        payout: None,
        placed_at: now,
        resolved_at: None,
    };
    if let Err(e) = state.store.insert_bet(&bet).await {
        // The stake is already in the house account; the next spin will not
        // see this bet. Needs an operator-driven refund.
        error!(bet = %bet.id, player = %req.player_id, "charged but failed to record bet: {e:#}");
        return Err(ApiError::Internal(e));
    }

    state.store.touch_player(&req.player_id, now).await?;
    state.notifier.notify(GameEvent::BetPlaced {
        table_id,
        bet: bet.clone(),
    });

    Ok(Json(bet))
}

async fn get_balance(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
) -> Result<Json<TxValue>, ApiError> {
    let value = state
        .processor
        .player_balance(&player_id)
        .await
        .map_err(ApiError::BadRequest)?;
    Ok(Json(TxValue { value }))
}

async fn deposit(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
    Json(req): Json<WalletTransaction>,
) -> Result<StatusCode, ApiError> {
    if req.amount < state.config.min_deposit || req.amount > state.config.max_deposit {
        return Err(ApiError::BadRequest(format!(
            "Invalid amount [{}]. Min/max deposit is {}/{}",
            req.amount, state.config.min_deposit, state.config.max_deposit
        )));
    }

    // Registered now, settled by the reconciler sweep. The id would come
    // from the payment provider in a real deployment.
    let pending = PendingTx::new(
        Uuid::new_v4().to_string(),
        TxType::Deposit,
        player_id,
        req.amount,
    );
    state.store.insert_pending_tx(&pending).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn withdraw(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
    Json(req): Json<WalletTransaction>,
) -> Result<StatusCode, ApiError> {
    if req.amount < state.config.min_withdrawal {
        return Err(ApiError::BadRequest(format!(
            "Invalid amount [{}]. Min withdrawal is {}",
            req.amount, state.config.min_withdrawal
        )));
    }

    // Pre-check only; the ledger is the authority when the intent settles.
    let balance = state
        .processor
        .player_balance(&player_id)
        .await
        .map_err(ApiError::BadRequest)?;
    if req.amount > balance {
        return Err(ApiError::BadRequest("Insufficient funds".to_string()));
    }

    let pending = PendingTx::new(
        Uuid::new_v4().to_string(),
        TxType::Withdrawal,
        player_id,
        req.amount,
    );
    state.store.insert_pending_tx(&pending).await?;

    Ok(StatusCode::NO_CONTENT)
}

// ===== Request Types =====

#[derive(Deserialize)]
struct JoinTableRequest {
    player_id: String,
    name: Option<String>,
}

#[derive(Deserialize)]
struct LeaveTableRequest {
    player_id: String,
}

#[derive(Deserialize)]
struct PlaceBetRequest {
    player_id: String,
    chosen_number: i32,
    amount: Amount,
}

#[derive(Deserialize)]
struct WalletTransaction {
    amount: Amount,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Internal(err) => {
                error!("internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
