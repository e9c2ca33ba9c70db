//! Client side of the pay-service wire boundary.
//!
//! `PayApi` is the seam between the game service and the ledger: the HTTP
//! implementation talks to a separate pay process, the local implementation
//! embeds the engine in-process (single-binary mode and tests).

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::ledger::engine::Ledger;
use crate::ledger::wire::{Amount, BalanceMap, ErrorBody, TransferError, TransferRequest, TxValue};

#[derive(Debug, Error)]
pub enum PayApiError {
    /// Typed rejection from the ledger itself.
    #[error("{0}")]
    Transfer(#[from] TransferError),
    /// Unrecognized client-side rejection (4xx without a known code). Terminal.
    #[error("pay service rejected request: {0}")]
    Rejected(String),
    /// Network / 5xx / storage trouble. Worth another attempt.
    #[error("pay service unreachable: {0}")]
    Transport(String),
    #[error("communication schema mismatch")]
    SchemaMismatch,
}

impl PayApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PayApiError::Transport(_) => true,
            PayApiError::Transfer(err) => err.is_retryable(),
            PayApiError::Rejected(_) | PayApiError::SchemaMismatch => false,
        }
    }

    pub fn is_idempotent_replay(&self) -> bool {
        matches!(self, PayApiError::Transfer(TransferError::IdempotentReplay))
    }
}

#[async_trait]
pub trait PayApi: Send + Sync {
    async fn transfer(&self, req: &TransferRequest) -> Result<BalanceMap, PayApiError>;
    async fn balance(&self, account_id: &str) -> Result<Amount, PayApiError>;
}

/// In-process ledger, no wire in between.
pub struct LocalPayApi {
    ledger: Arc<Ledger>,
}

impl LocalPayApi {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl PayApi for LocalPayApi {
    async fn transfer(&self, req: &TransferRequest) -> Result<BalanceMap, PayApiError> {
        Ok(self.ledger.execute_transfer(req).await?)
    }

    async fn balance(&self, account_id: &str) -> Result<Amount, PayApiError> {
        self.ledger
            .balance(account_id)
            .await
            .map_err(|e| PayApiError::Transport(e.to_string()))
    }
}

/// Talks to a separate pay service over HTTP.
pub struct HttpPayApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPayApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PayApi for HttpPayApi {
    async fn transfer(&self, req: &TransferRequest) -> Result<BalanceMap, PayApiError> {
        let response = self
            .client
            .post(format!("{}/internal/transfer", self.base_url))
            .json(req)
            .send()
            .await
            .map_err(|e| PayApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<BalanceMap>()
                .await
                .map_err(|_| PayApiError::SchemaMismatch);
        }

        if let Ok(body) = response.json::<ErrorBody>().await {
            if let Some(err) = TransferError::from_code(&body.code, &body.error) {
                return Err(err.into());
            }
        }

        if status.is_client_error() {
            Err(PayApiError::Rejected(status.to_string()))
        } else {
            Err(PayApiError::Transport(status.to_string()))
        }
    }

    async fn balance(&self, account_id: &str) -> Result<Amount, PayApiError> {
        let response = self
            .client
            .get(format!("{}/internal/balance/{}", self.base_url, account_id))
            .send()
            .await
            .map_err(|e| PayApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let value = response
                .json::<TxValue>()
                .await
                .map_err(|_| PayApiError::SchemaMismatch)?;
            return Ok(value.value);
        }

        if status.is_client_error() {
            Err(PayApiError::Rejected(status.to_string()))
        } else {
            Err(PayApiError::Transport(status.to_string()))
        }
    }
}
