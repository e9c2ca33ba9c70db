//! Shared transfer types for the pay-service wire boundary

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Money in minor units. Integer arithmetic keeps leg sums exact.
pub type Amount = i64;

pub const SYS_PREFIX: &str = "SYS_";
pub const PLAYER_PREFIX: &str = "PLAYER_";
/// Counterparty for deposits and withdrawals (funds entering/leaving the site).
pub const EXTERNAL: &str = "SYS_EXTERNAL";
/// Counterparty for bets and payouts.
pub const HOUSE: &str = "SYS_HOUSE";

/// Ledger account id for a player.
pub fn player_account_id(player_id: &str) -> String {
    format!("{}{}", PLAYER_PREFIX, player_id)
}

/// System accounts are exempt from the non-negative balance check.
pub fn is_system_account(account_id: &str) -> bool {
    account_id.starts_with(SYS_PREFIX)
}

/// One (account, signed amount) pair of a transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferLeg {
    pub account_id: String,
    pub amount: Amount,
}

impl TransferLeg {
    pub fn new(account_id: impl Into<String>, amount: Amount) -> Self {
        Self {
            account_id: account_id.into(),
            amount,
        }
    }
}

/// A balanced transfer submitted to the ledger. Not persisted as-is; the
/// accepted form lives on as a journal entry plus its lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub idempotency_key: String,
    pub reason: String,
    pub legs: Vec<TransferLeg>,
}

/// Touched account id -> balance after commit.
pub type BalanceMap = HashMap<String, Amount>;

/// Balance response payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TxValue {
    pub value: Amount,
}

/// Error payload returned by the pay service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// Everything `execute_transfer` can reject with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("transfer must have at least two legs")]
    InvalidLegs,
    #[error("transfer legs must sum to zero")]
    NonZeroSum,
    #[error("insufficient funds on account {0}")]
    InsufficientFunds(String),
    #[error("account modified concurrently, retry with fresh state")]
    Conflict,
    #[error("idempotency key already applied")]
    IdempotentReplay,
    #[error("ledger failure: {0}")]
    Fatal(String),
}

impl TransferError {
    /// Stable wire code. Insufficient funds carries the offending account.
    pub fn code(&self) -> String {
        match self {
            TransferError::InvalidLegs => "INVALID_LEGS".to_string(),
            TransferError::NonZeroSum => "NON_ZERO_SUM".to_string(),
            TransferError::InsufficientFunds(account) => {
                format!("INSUFFICIENT_FUNDS_{}", account)
            }
            TransferError::Conflict => "CONCURRENCY_CONFLICT".to_string(),
            TransferError::IdempotentReplay => "IDEMPOTENT_REPLAY".to_string(),
            TransferError::Fatal(_) => "FATAL".to_string(),
        }
    }

    /// Inverse of [`code`](Self::code), for the HTTP client side.
    pub fn from_code(code: &str, message: &str) -> Option<Self> {
        if let Some(account) = code.strip_prefix("INSUFFICIENT_FUNDS_") {
            return Some(TransferError::InsufficientFunds(account.to_string()));
        }
        match code {
            "INVALID_LEGS" => Some(TransferError::InvalidLegs),
            "NON_ZERO_SUM" => Some(TransferError::NonZeroSum),
            "CONCURRENCY_CONFLICT" => Some(TransferError::Conflict),
            "IDEMPOTENT_REPLAY" => Some(TransferError::IdempotentReplay),
            "FATAL" => Some(TransferError::Fatal(message.to_string())),
            _ => None,
        }
    }

    /// Conflicts and ledger-side failures are worth another attempt;
    /// validation and business rejections are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Conflict | TransferError::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_account_id() {
        assert_eq!(player_account_id("p42"), "PLAYER_p42");
        assert!(!is_system_account(&player_account_id("p42")));
    }

    #[test]
    fn test_system_accounts() {
        assert!(is_system_account(EXTERNAL));
        assert!(is_system_account(HOUSE));
        assert!(!is_system_account("PLAYER_alice"));
    }

    #[test]
    fn test_error_code_round_trip() {
        let cases = [
            TransferError::InvalidLegs,
            TransferError::NonZeroSum,
            TransferError::InsufficientFunds("PLAYER_bob".to_string()),
            TransferError::Conflict,
            TransferError::IdempotentReplay,
        ];
        for err in cases {
            let decoded = TransferError::from_code(&err.code(), "").unwrap();
            assert_eq!(decoded, err);
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(TransferError::Conflict.is_retryable());
        assert!(TransferError::Fatal("db down".into()).is_retryable());
        assert!(!TransferError::IdempotentReplay.is_retryable());
        assert!(!TransferError::InsufficientFunds("PLAYER_a".into()).is_retryable());
        assert!(!TransferError::NonZeroSum.is_retryable());
    }
}
