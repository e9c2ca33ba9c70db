//! End-to-end settlement flow: deposit -> bet -> spin -> payout, all against
//! a real (temp-file) game store and ledger, with the reconciler sweep doing
//! the background settling. Verifies money is conserved across the whole run.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tempfile::NamedTempFile;

use malibu_backend::game::store::GameStore;
use malibu_backend::ledger::wire::{player_account_id, EXTERNAL, HOUSE};
use malibu_backend::ledger::Ledger;
use malibu_backend::models::Bet;
use malibu_backend::notifier::NullNotifier;
use malibu_backend::pay::client::LocalPayApi;
use malibu_backend::pay::intent::{PendingTx, TxStatus, TxType};
use malibu_backend::pay::reconciler::sweep_stuck;
use malibu_backend::pay::TxProcessor;

struct Harness {
    store: Arc<GameStore>,
    ledger: Arc<Ledger>,
    processor: Arc<TxProcessor>,
    _game_db: NamedTempFile,
    _pay_db: NamedTempFile,
}

fn harness() -> Harness {
    let game_db = NamedTempFile::new().unwrap();
    let pay_db = NamedTempFile::new().unwrap();
    let store = Arc::new(GameStore::new(game_db.path().to_str().unwrap()).unwrap());
    let ledger = Arc::new(Ledger::open(pay_db.path().to_str().unwrap()).unwrap());
    let processor = Arc::new(TxProcessor::new(
        store.clone(),
        Arc::new(LocalPayApi::new(ledger.clone())),
        Arc::new(NullNotifier),
    ));
    Harness {
        store,
        ledger,
        processor,
        _game_db: game_db,
        _pay_db: pay_db,
    }
}

/// Sum over every account the flow touches; a balanced ledger always reads 0.
async fn total_money(h: &Harness, players: &[&str]) -> i64 {
    let mut total = h.ledger.balance(EXTERNAL).await.unwrap() + h.ledger.balance(HOUSE).await.unwrap();
    for p in players {
        total += h.ledger.balance(&player_account_id(p)).await.unwrap();
    }
    total
}

#[tokio::test]
async fn test_full_settlement_flow() {
    let h = harness();
    let now = Utc::now();
    h.store.seed_tables(now).await.unwrap();
    let (table, _) = h.store.list_tables().await.unwrap().into_iter().next().unwrap();

    // 1. Deposit registered as an intent, settled by the reconciler sweep
    // (the request path never processes deposits inline).
    let mut deposit = PendingTx::new("dep_alice", TxType::Deposit, "alice", 1000);
    deposit.created_at = now - ChronoDuration::seconds(5);
    h.store.insert_pending_tx(&deposit).await.unwrap();

    let settled = sweep_stuck(&h.processor, ChronoDuration::seconds(1)).await.unwrap();
    assert_eq!(settled, 1);
    assert_eq!(h.processor.player_balance("alice").await.unwrap(), 1000);
    assert_eq!(h.ledger.balance(EXTERNAL).await.unwrap(), -1000);

    // 2. Bet placed: the SPEND intent settles inline before the bet exists.
    let spend = PendingTx::new("BetId_b1", TxType::Spend, "alice", 10);
    h.store.insert_pending_tx(&spend).await.unwrap();
    let balance = h.processor.process(spend).await.unwrap();
    assert_eq!(balance, 990);
    assert_eq!(h.ledger.balance(HOUSE).await.unwrap(), 10);

    h.store
        .insert_bet(&Bet {
            id: "b1".to_string(),
            player_id: "alice".to_string(),
            table_id: table.id.clone(),
            chosen_number: 17,
            amount: 10,
            is_resolved: false,
            winning_number: None,
            payout: None,
            placed_at: now,
            resolved_at: None,
        })
        .await
        .unwrap();

    // 3. The spin lands on the chosen number: bet resolves to a 36x payout
    // intent under its deterministic key.
    let outcome = h
        .store
        .resolve_spin(&table.id, "spin1", 17, now, now - ChronoDuration::minutes(30))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.payouts_created, 1);
    assert_eq!(outcome.resolved_bets[0].payout, Some(360));
    assert!(outcome.table.next_spin_time > table.next_spin_time);

    let payout = h.store.get_pending_tx("spin1_b1").await.unwrap().unwrap();
    assert_eq!(payout.status, TxStatus::Pending);
    assert_eq!(payout.amount, 360);

    // 4. The payout intent is an orphan by design; the sweep settles it.
    let settled = sweep_stuck(&h.processor, ChronoDuration::seconds(-5)).await.unwrap();
    assert_eq!(settled, 1);

    assert_eq!(h.processor.player_balance("alice").await.unwrap(), 1350);
    assert_eq!(h.ledger.balance(HOUSE).await.unwrap(), -350);
    assert_eq!(
        h.store.get_pending_tx("spin1_b1").await.unwrap().unwrap().status,
        TxStatus::Success
    );

    // 5. Money was never created or destroyed, and a further sweep is a no-op.
    assert_eq!(total_money(&h, &["alice"]).await, 0);
    assert_eq!(sweep_stuck(&h.processor, ChronoDuration::seconds(-5)).await.unwrap(), 0);
    assert_eq!(h.processor.player_balance("alice").await.unwrap(), 1350);
}

#[tokio::test]
async fn test_losing_bet_keeps_stake_with_house() {
    let h = harness();
    let now = Utc::now();
    h.store.seed_tables(now).await.unwrap();
    let (table, _) = h.store.list_tables().await.unwrap().into_iter().next().unwrap();

    let mut deposit = PendingTx::new("dep_bob", TxType::Deposit, "bob", 1000);
    deposit.created_at = now - ChronoDuration::seconds(5);
    h.store.insert_pending_tx(&deposit).await.unwrap();
    sweep_stuck(&h.processor, ChronoDuration::seconds(1)).await.unwrap();

    let spend = PendingTx::new("BetId_b2", TxType::Spend, "bob", 50);
    h.store.insert_pending_tx(&spend).await.unwrap();
    h.processor.process(spend).await.unwrap();

    h.store
        .insert_bet(&Bet {
            id: "b2".to_string(),
            player_id: "bob".to_string(),
            table_id: table.id.clone(),
            chosen_number: 4,
            amount: 50,
            is_resolved: false,
            winning_number: None,
            payout: None,
            placed_at: now,
            resolved_at: None,
        })
        .await
        .unwrap();

    // Lands on a different number: no payout intent, stake stays with HOUSE.
    let outcome = h
        .store
        .resolve_spin(&table.id, "spin1", 5, now, now - ChronoDuration::minutes(30))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.payouts_created, 0);
    assert_eq!(outcome.resolved_bets[0].payout, Some(0));

    assert_eq!(sweep_stuck(&h.processor, ChronoDuration::seconds(-5)).await.unwrap(), 0);
    assert_eq!(h.processor.player_balance("bob").await.unwrap(), 950);
    assert_eq!(h.ledger.balance(HOUSE).await.unwrap(), 50);
    assert_eq!(total_money(&h, &["bob"]).await, 0);
}

#[tokio::test]
async fn test_withdrawal_flow() {
    let h = harness();
    let now = Utc::now();

    let mut deposit = PendingTx::new("dep_carol", TxType::Deposit, "carol", 5000);
    deposit.created_at = now - ChronoDuration::seconds(5);
    h.store.insert_pending_tx(&deposit).await.unwrap();

    let mut withdrawal = PendingTx::new("wd_carol", TxType::Withdrawal, "carol", 2000);
    withdrawal.created_at = now - ChronoDuration::seconds(4);
    h.store.insert_pending_tx(&withdrawal).await.unwrap();

    // Deposit is older, so it settles first within the sweep and funds the
    // withdrawal.
    let settled = sweep_stuck(&h.processor, ChronoDuration::seconds(1)).await.unwrap();
    assert_eq!(settled, 2);

    assert_eq!(h.processor.player_balance("carol").await.unwrap(), 3000);
    assert_eq!(h.ledger.balance(EXTERNAL).await.unwrap(), -3000);
    assert_eq!(total_money(&h, &["carol"]).await, 0);
}
