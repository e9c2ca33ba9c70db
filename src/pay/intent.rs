//! Pending transaction: the durable intent behind every money movement.
//!
//! A PendingTx is created PENDING, claimed exactly once (PENDING -> CRACKED),
//! then driven to SUCCESS or FAILURE. It is never deleted; the log column
//! accumulates an audit trail of every transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::wire::{player_account_id, Amount, TransferLeg, TransferRequest, EXTERNAL, HOUSE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    Deposit,
    Withdrawal,
    Spend,
    Payout,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Deposit => "DEPOSIT",
            TxType::Withdrawal => "WITHDRAWAL",
            TxType::Spend => "SPEND",
            TxType::Payout => "PAYOUT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DEPOSIT" => Some(TxType::Deposit),
            "WITHDRAWAL" => Some(TxType::Withdrawal),
            "SPEND" => Some(TxType::Spend),
            "PAYOUT" => Some(TxType::Payout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Pending,
    Cracked,
    Success,
    Failure,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "PENDING",
            TxStatus::Cracked => "CRACKED",
            TxStatus::Success => "SUCCESS",
            TxStatus::Failure => "FAILURE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TxStatus::Pending),
            "CRACKED" => Some(TxStatus::Cracked),
            "SUCCESS" => Some(TxStatus::Success),
            "FAILURE" => Some(TxStatus::Failure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingTx {
    /// Doubles as the ledger idempotency key. Business-derived where
    /// possible, e.g. "{spin_id}_{bet_id}" for payouts.
    pub id: String,
    pub tx_type: TxType,
    pub status: TxStatus,
    pub player_id: String,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub log: String,
    /// Optimistic-concurrency version, bumped on every persisted write.
    pub version: i64,
}

impl PendingTx {
    pub fn new(id: impl Into<String>, tx_type: TxType, player_id: impl Into<String>, amount: Amount) -> Self {
        Self {
            id: id.into(),
            tx_type,
            status: TxStatus::Pending,
            player_id: player_id.into(),
            amount,
            created_at: Utc::now(),
            processed_at: None,
            log: String::new(),
            version: 0,
        }
    }

    /// Claim the intent for processing. The single-writer gate: succeeds only
    /// from PENDING, so at most one of two racing drivers proceeds.
    pub fn crack(&mut self) -> bool {
        if self.status != TxStatus::Pending {
            return false;
        }
        self.status = TxStatus::Cracked;
        self.append_log("CRACKED");
        true
    }

    pub fn complete(&mut self) {
        self.status = TxStatus::Success;
        self.processed_at = Some(Utc::now());
        self.append_log("SUCCESS");
    }

    pub fn fail(&mut self, reason: &str) {
        self.status = TxStatus::Failure;
        self.processed_at = Some(Utc::now());
        self.append_log(reason);
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TxStatus::Success | TxStatus::Failure)
    }

    fn append_log(&mut self, line: &str) {
        if !self.log.is_empty() {
            self.log.push('\n');
        }
        self.log.push_str(&format!("{}: {}", Utc::now().to_rfc3339(), line));
    }

    /// Map this intent to a two-leg balanced transfer against its fixed
    /// counterparty: EXTERNAL for deposits/withdrawals, HOUSE for bets/payouts.
    pub fn form_transfer_request(&self) -> TransferRequest {
        let player = player_account_id(&self.player_id);
        let legs = match self.tx_type {
            TxType::Deposit => vec![
                TransferLeg::new(EXTERNAL, -self.amount),
                TransferLeg::new(player, self.amount),
            ],
            TxType::Withdrawal => vec![
                TransferLeg::new(EXTERNAL, self.amount),
                TransferLeg::new(player, -self.amount),
            ],
            TxType::Spend => vec![
                TransferLeg::new(HOUSE, self.amount),
                TransferLeg::new(player, -self.amount),
            ],
            TxType::Payout => vec![
                TransferLeg::new(HOUSE, -self.amount),
                TransferLeg::new(player, self.amount),
            ],
        };

        TransferRequest {
            idempotency_key: self.id.clone(),
            reason: self.tx_type.as_str().to_string(),
            legs,
        }
    }
}
