//! Outbound event fan-out boundary.
//!
//! The core only needs a capability to tell subscribers of a table what
//! happened; the push transport lives behind it. Delivery is at-least-once
//! and fire-and-forget: the settlement path never depends on it succeeding.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::ledger::wire::Amount;
use crate::models::{Bet, Player, SpinResult};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    BalanceUpdate { player_id: String, balance: Amount },
    SpinResult { table_id: String, result: SpinResult },
    PlayerJoined { table_id: String, player: Player },
    PlayerLeft { table_id: String, player: Player },
    BetPlaced { table_id: String, bet: Bet },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: GameEvent);
}

/// Fans events out over a broadcast channel; websocket sessions (or anything
/// else) subscribe on the other end.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<GameEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, event: GameEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

/// Swallows everything.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: GameEvent) {}
}

/// Test double that keeps every event for inspection.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier {
    events: std::sync::Mutex<Vec<GameEvent>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn events(&self) -> Vec<GameEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn notify(&self, event: GameEvent) {
        self.events.lock().unwrap().push(event);
    }
}
