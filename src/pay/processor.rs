//! Transaction processor: drives one pending transaction to a terminal state.
//!
//! Claim first, then settle against the ledger, then record the outcome.
//! The claim (crack + versioned persist) is what makes a racing inline
//! caller and reconciler sweep mutually exclusive.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::client::PayApi;
use super::intent::PendingTx;
use crate::game::store::GameStore;
use crate::ledger::wire::{player_account_id, Amount, TransferRequest};
use crate::notifier::{GameEvent, Notifier};

const MAX_RETRIES: usize = 3;
const RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ProcessError {
    /// Someone else claimed the intent, or it is already terminal. Not a
    /// failure of the business operation; a no-op for this caller.
    #[error("intent already claimed")]
    AlreadyClaimed,
    /// A persist failed. The intent's durable state is unknown to this
    /// caller; a later reconciler sweep (or an operator) picks it up.
    #[error("storage failure: {0}")]
    Storage(String),
    /// The operation itself failed and the intent was marked FAILURE.
    #[error("{0}")]
    Failed(String),
}

pub struct TxProcessor {
    store: Arc<GameStore>,
    pay: Arc<dyn PayApi>,
    notifier: Arc<dyn Notifier>,
}

impl TxProcessor {
    pub fn new(store: Arc<GameStore>, pay: Arc<dyn PayApi>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            pay,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<GameStore> {
        &self.store
    }

    /// Drive one intent from PENDING to SUCCESS or FAILURE. Returns the
    /// player's post-settlement balance on success.
    pub async fn process(&self, mut tx: PendingTx) -> Result<Amount, ProcessError> {
        if !tx.crack() {
            return Err(ProcessError::AlreadyClaimed);
        }
        match self.store.update_pending_tx(&mut tx).await {
            Ok(true) => {}
            // Lost the claim race against another driver's persisted crack.
            Ok(false) => return Err(ProcessError::AlreadyClaimed),
            Err(e) => return Err(ProcessError::Storage(e.to_string())),
        }

        let request = tx.form_transfer_request();
        let result = self.submit_transfer(&tx.player_id, &request).await;

        match &result {
            Ok(_) => tx.complete(),
            Err(reason) => tx.fail(reason),
        }

        match self.store.update_pending_tx(&mut tx).await {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                // The ledger effect, if any, already happened and is
                // authoritative. Do not re-submit; surface for operators.
                error!(
                    intent = %tx.id,
                    "failed to persist terminal intent state; manual reconciliation required"
                );
                return Err(ProcessError::Storage(
                    "terminal state not persisted".to_string(),
                ));
            }
        }

        match result {
            Ok(balance) => {
                self.notifier.notify(GameEvent::BalanceUpdate {
                    player_id: tx.player_id.clone(),
                    balance,
                });
                Ok(balance)
            }
            Err(reason) => Err(ProcessError::Failed(reason)),
        }
    }

    /// Player-facing balance read, with the same retry policy as transfers.
    pub async fn player_balance(&self, player_id: &str) -> Result<Amount, String> {
        self.read_balance(&player_account_id(player_id)).await
    }

    /// Submit with bounded retries. Business rejections terminate
    /// immediately; an idempotent replay means the transfer already landed,
    /// so the current balance is the answer; everything else gets another
    /// attempt after a short delay.
    async fn submit_transfer(
        &self,
        player_id: &str,
        request: &TransferRequest,
    ) -> Result<Amount, String> {
        let account = player_account_id(player_id);

        for attempt in 0..MAX_RETRIES {
            match self.pay.transfer(request).await {
                Ok(balances) => {
                    return balances
                        .get(&account)
                        .copied()
                        .ok_or_else(|| "Communication schema mismatch.".to_string());
                }
                Err(err) if err.is_idempotent_replay() => {
                    info!(key = %request.idempotency_key, "idempotent replay, reading balance instead");
                    return self.read_balance(&account).await;
                }
                Err(err) if !err.is_retryable() => return Err(err.to_string()),
                Err(err) => {
                    warn!(
                        key = %request.idempotency_key,
                        attempt,
                        "transfer attempt failed: {err}"
                    );
                }
            }

            if attempt < MAX_RETRIES - 1 {
                sleep(RETRY_DELAY).await;
            }
        }

        Err("Time Out.".to_string())
    }

    async fn read_balance(&self, account_id: &str) -> Result<Amount, String> {
        for attempt in 0..MAX_RETRIES {
            match self.pay.balance(account_id).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err.to_string()),
                Err(err) => {
                    warn!(account = %account_id, attempt, "balance attempt failed: {err}");
                }
            }

            if attempt < MAX_RETRIES - 1 {
                sleep(RETRY_DELAY).await;
            }
        }

        Err("Time Out.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::wire::{EXTERNAL, HOUSE};
    use crate::ledger::Ledger;
    use crate::notifier::RecordingNotifier;
    use crate::pay::client::LocalPayApi;
    use crate::pay::intent::{TxStatus, TxType};
    use tempfile::NamedTempFile;

    struct TestEnv {
        processor: TxProcessor,
        store: Arc<GameStore>,
        ledger: Arc<Ledger>,
        notifier: Arc<RecordingNotifier>,
        _game_db: NamedTempFile,
        _pay_db: NamedTempFile,
    }

    fn create_test_env() -> TestEnv {
        let game_db = NamedTempFile::new().unwrap();
        let pay_db = NamedTempFile::new().unwrap();
        let store = Arc::new(GameStore::new(game_db.path().to_str().unwrap()).unwrap());
        let ledger = Arc::new(Ledger::open(pay_db.path().to_str().unwrap()).unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let processor = TxProcessor::new(
            store.clone(),
            Arc::new(LocalPayApi::new(ledger.clone())),
            notifier.clone(),
        );
        TestEnv {
            processor,
            store,
            ledger,
            notifier,
            _game_db: game_db,
            _pay_db: pay_db,
        }
    }

    async fn insert_intent(env: &TestEnv, id: &str, tx_type: TxType, amount: Amount) -> PendingTx {
        let tx = PendingTx::new(id, tx_type, "alice", amount);
        env.store.insert_pending_tx(&tx).await.unwrap();
        tx
    }

    #[tokio::test]
    async fn test_deposit_success_path() {
        let env = create_test_env();
        let tx = insert_intent(&env, "dep1", TxType::Deposit, 1000).await;

        let balance = env.processor.process(tx).await.unwrap();
        assert_eq!(balance, 1000);

        let stored = env.store.get_pending_tx("dep1").await.unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Success);
        assert!(stored.processed_at.is_some());
        assert!(stored.log.contains("CRACKED"));
        assert!(stored.log.contains("SUCCESS"));

        assert_eq!(env.ledger.balance("PLAYER_alice").await.unwrap(), 1000);
        assert_eq!(env.ledger.balance(EXTERNAL).await.unwrap(), -1000);

        let events = env.notifier.events();
        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::BalanceUpdate { player_id, balance }
                if player_id == "alice" && *balance == 1000
        )));
    }

    #[tokio::test]
    async fn test_spend_without_funds_fails_intent() {
        let env = create_test_env();
        let tx = insert_intent(&env, "bet1", TxType::Spend, 50).await;

        let err = env.processor.process(tx).await.unwrap_err();
        assert!(matches!(err, ProcessError::Failed(_)));
        assert!(err.to_string().contains("insufficient funds"));

        let stored = env.store.get_pending_tx("bet1").await.unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Failure);
        assert!(stored.log.contains("insufficient funds"));

        // The business rejection is terminal and no money moved.
        assert_eq!(env.ledger.balance(HOUSE).await.unwrap(), 0);
        assert!(env.notifier.events().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_intent_cannot_be_reprocessed() {
        let env = create_test_env();
        let tx = insert_intent(&env, "dep1", TxType::Deposit, 1000).await;
        env.processor.process(tx).await.unwrap();

        let reloaded = env.store.get_pending_tx("dep1").await.unwrap().unwrap();
        let err = env.processor.process(reloaded).await.unwrap_err();
        assert!(matches!(err, ProcessError::AlreadyClaimed));

        // Processed exactly once.
        assert_eq!(env.ledger.balance("PLAYER_alice").await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn test_crack_race_has_one_winner() {
        let env = create_test_env();
        insert_intent(&env, "dep1", TxType::Deposit, 1000).await;

        // Two drivers hold the same PENDING snapshot; both cracks pass in
        // memory, but the loser's versioned persist does not.
        let snapshot_a = env.store.get_pending_tx("dep1").await.unwrap().unwrap();
        let snapshot_b = env.store.get_pending_tx("dep1").await.unwrap().unwrap();

        env.processor.process(snapshot_a).await.unwrap();
        let err = env.processor.process(snapshot_b).await.unwrap_err();
        assert!(matches!(err, ProcessError::AlreadyClaimed));

        assert_eq!(env.ledger.balance("PLAYER_alice").await.unwrap(), 1000);
        assert_eq!(
            env.store
                .get_pending_tx("dep1")
                .await
                .unwrap()
                .unwrap()
                .status,
            TxStatus::Success
        );
    }

    #[tokio::test]
    async fn test_idempotent_replay_falls_back_to_balance_read() {
        let env = create_test_env();
        let tx = insert_intent(&env, "dep1", TxType::Deposit, 1000).await;

        // Simulate a retried request whose first submission landed but whose
        // response was lost: the transfer is already in the ledger.
        env.ledger
            .execute_transfer(&tx.form_transfer_request())
            .await
            .unwrap();

        let balance = env.processor.process(tx).await.unwrap();
        assert_eq!(balance, 1000);

        let stored = env.store.get_pending_tx("dep1").await.unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Success);
        // Not applied a second time.
        assert_eq!(env.ledger.balance("PLAYER_alice").await.unwrap(), 1000);
        assert_eq!(env.ledger.balance(EXTERNAL).await.unwrap(), -1000);
    }

    #[tokio::test]
    async fn test_player_balance_read() {
        let env = create_test_env();
        assert_eq!(env.processor.player_balance("alice").await.unwrap(), 0);

        let tx = insert_intent(&env, "dep1", TxType::Deposit, 500).await;
        env.processor.process(tx).await.unwrap();
        assert_eq!(env.processor.player_balance("alice").await.unwrap(), 500);
    }
}
