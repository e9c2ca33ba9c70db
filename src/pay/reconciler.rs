//! Reconciler: finishes pending transactions orphaned by a crash.
//!
//! Anything still PENDING past the safety cutoff lost its creator before the
//! claim. The sweep re-drives each through the processor; the crack gate
//! keeps a concurrently racing inline caller from double-applying.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

use super::processor::{ProcessError, TxProcessor};

/// Periodic driver, spawned once per process.
pub async fn reconciler_polling(
    processor: Arc<TxProcessor>,
    poll_interval: Duration,
    cutoff: ChronoDuration,
) -> Result<()> {
    info!(
        "🧾 Starting pending-tx reconciler ({}s poll, {}s cutoff)",
        poll_interval.as_secs_f32(),
        cutoff.num_seconds()
    );

    let mut ticker = interval(poll_interval);
    loop {
        ticker.tick().await;
        if let Err(e) = sweep_stuck(&processor, cutoff).await {
            warn!("reconcile sweep failed: {e:#}");
        }
    }
}

/// One sweep. Per-intent failures are logged and do not abort the rest.
/// Returns how many intents reached SUCCESS.
pub async fn sweep_stuck(processor: &TxProcessor, cutoff: ChronoDuration) -> Result<usize> {
    let stuck = processor
        .store()
        .find_stuck_pending(Utc::now() - cutoff)
        .await?;

    let mut settled = 0;
    for tx in stuck {
        let id = tx.id.clone();
        match processor.process(tx).await {
            Ok(_) => settled += 1,
            // An inline caller got there first; nothing to do.
            Err(ProcessError::AlreadyClaimed) => {}
            Err(e) => warn!(intent = %id, "reconcile failed: {e}"),
        }
    }
    Ok(settled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::store::GameStore;
    use crate::ledger::Ledger;
    use crate::notifier::RecordingNotifier;
    use crate::pay::client::LocalPayApi;
    use crate::pay::intent::{PendingTx, TxStatus, TxType};
    use tempfile::NamedTempFile;

    fn create_test_processor() -> (Arc<TxProcessor>, Arc<GameStore>, Arc<Ledger>, NamedTempFile, NamedTempFile) {
        let game_db = NamedTempFile::new().unwrap();
        let pay_db = NamedTempFile::new().unwrap();
        let store = Arc::new(GameStore::new(game_db.path().to_str().unwrap()).unwrap());
        let ledger = Arc::new(Ledger::open(pay_db.path().to_str().unwrap()).unwrap());
        let processor = Arc::new(TxProcessor::new(
            store.clone(),
            Arc::new(LocalPayApi::new(ledger.clone())),
            Arc::new(RecordingNotifier::default()),
        ));
        (processor, store, ledger, game_db, pay_db)
    }

    #[tokio::test]
    async fn test_sweep_settles_orphaned_intents() {
        let (processor, store, ledger, _g, _p) = create_test_processor();

        let mut orphan = PendingTx::new("dep1", TxType::Deposit, "alice", 1000);
        orphan.created_at = Utc::now() - ChronoDuration::seconds(5);
        store.insert_pending_tx(&orphan).await.unwrap();

        let settled = sweep_stuck(&processor, ChronoDuration::seconds(1))
            .await
            .unwrap();
        assert_eq!(settled, 1);

        let stored = store.get_pending_tx("dep1").await.unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Success);
        assert_eq!(ledger.balance("PLAYER_alice").await.unwrap(), 1000);

        // A second sweep finds nothing left to do.
        assert_eq!(
            sweep_stuck(&processor, ChronoDuration::seconds(1))
                .await
                .unwrap(),
            0
        );
        assert_eq!(ledger.balance("PLAYER_alice").await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn test_sweep_skips_fresh_intents() {
        let (processor, store, _ledger, _g, _p) = create_test_processor();

        let fresh = PendingTx::new("dep1", TxType::Deposit, "alice", 1000);
        store.insert_pending_tx(&fresh).await.unwrap();

        // Still inside the safety window: the creator may yet claim it.
        let settled = sweep_stuck(&processor, ChronoDuration::seconds(60))
            .await
            .unwrap();
        assert_eq!(settled, 0);
        assert_eq!(
            store.get_pending_tx("dep1").await.unwrap().unwrap().status,
            TxStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_sweep_isolates_failures() {
        let (processor, store, ledger, _g, _p) = create_test_processor();

        // An unfunded withdrawal fails its business check; the deposit after
        // it must still settle.
        let mut bad = PendingTx::new("wd1", TxType::Withdrawal, "alice", 500);
        bad.created_at = Utc::now() - ChronoDuration::seconds(10);
        store.insert_pending_tx(&bad).await.unwrap();

        let mut good = PendingTx::new("dep1", TxType::Deposit, "bob", 1000);
        good.created_at = Utc::now() - ChronoDuration::seconds(5);
        store.insert_pending_tx(&good).await.unwrap();

        let settled = sweep_stuck(&processor, ChronoDuration::seconds(1))
            .await
            .unwrap();
        assert_eq!(settled, 1);

        assert_eq!(
            store.get_pending_tx("wd1").await.unwrap().unwrap().status,
            TxStatus::Failure
        );
        assert_eq!(
            store.get_pending_tx("dep1").await.unwrap().unwrap().status,
            TxStatus::Success
        );
        assert_eq!(ledger.balance("PLAYER_bob").await.unwrap(), 1000);
    }
}
