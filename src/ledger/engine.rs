//! Double-entry ledger engine.
//!
//! Validates transfer shape up front, then hands the request to the store
//! for one atomic, idempotent application.

use anyhow::Result;
use tracing::{info, warn};

use super::store::LedgerStore;
use super::wire::{Amount, BalanceMap, TransferError, TransferRequest};

pub struct Ledger {
    store: LedgerStore,
}

impl Ledger {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    pub fn open(db_path: &str) -> Result<Self> {
        Ok(Self::new(LedgerStore::new(db_path)?))
    }

    /// Apply a balanced transfer. Malformed requests are rejected before any
    /// I/O; accepted requests commit fully or not at all.
    pub async fn execute_transfer(
        &self,
        req: &TransferRequest,
    ) -> Result<BalanceMap, TransferError> {
        if req.legs.len() < 2 {
            return Err(TransferError::InvalidLegs);
        }
        if req.legs.iter().map(|l| l.amount).sum::<Amount>() != 0 {
            return Err(TransferError::NonZeroSum);
        }

        match self.store.apply_transfer(req).await {
            Ok(balances) => {
                info!(
                    key = %req.idempotency_key,
                    reason = %req.reason,
                    legs = req.legs.len(),
                    "transfer committed"
                );
                Ok(balances)
            }
            Err(err) => {
                warn!(key = %req.idempotency_key, code = %err.code(), "transfer rejected");
                Err(err)
            }
        }
    }

    /// Current balance; never fails for an unknown account (reads as zero).
    pub async fn balance(&self, account_id: &str) -> Result<Amount> {
        self.store.balance(account_id).await
    }
}
