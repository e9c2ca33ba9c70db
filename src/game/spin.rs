//! Spin settlement: the periodic sweep that resolves due tables.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::store::{GameStore, SpinOutcome};
use crate::ledger::wire::Amount;
use crate::models::{SpinResult, Table};
use crate::notifier::{GameEvent, Notifier};

/// Straight-up win pays 35:1, so a winning stake returns 36x.
pub const WIN_MULTIPLIER: Amount = 35;

pub fn bet_payout(stake: Amount, chosen_number: i32, winning_number: i32) -> Amount {
    if chosen_number == winning_number {
        stake + stake * WIN_MULTIPLIER
    } else {
        0
    }
}

pub struct TableManager {
    store: Arc<GameStore>,
    notifier: Arc<dyn Notifier>,
    idle_cutoff: ChronoDuration,
}

impl TableManager {
    pub fn new(store: Arc<GameStore>, notifier: Arc<dyn Notifier>, idle_cutoff: ChronoDuration) -> Self {
        Self {
            store,
            notifier,
            idle_cutoff,
        }
    }

    /// One sweep: settle every table whose spin is due. A table that fails
    /// stays due and is retried on the next tick; other tables are not
    /// affected.
    pub async fn do_spins(&self) -> Result<()> {
        let due = self.store.due_tables(Utc::now()).await?;
        for table in due {
            if let Err(e) = self.process_spin(&table).await {
                warn!(table = %table.id, "spin failed, retrying next tick: {e:#}");
            }
        }
        Ok(())
    }

    /// Draw, settle and notify for one table. Settlement itself is a single
    /// unit of work in the store; notifications go out only after commit.
    pub async fn process_spin(&self, table: &Table) -> Result<Option<SpinOutcome>> {
        let winning_number = rand::thread_rng().gen_range(0..=36);
        let spin_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let Some(outcome) = self
            .store
            .resolve_spin(&table.id, &spin_id, winning_number, now, now - self.idle_cutoff)
            .await?
        else {
            return Ok(None);
        };

        for player in &outcome.removed_players {
            self.notifier.notify(GameEvent::PlayerLeft {
                table_id: table.id.clone(),
                player: player.clone(),
            });
        }

        info!(
            table = %table.id,
            winning_number,
            bets = outcome.resolved_bets.len(),
            payouts = outcome.payouts_created,
            idled_out = outcome.removed_players.len(),
            "spin settled"
        );

        self.notifier.notify(GameEvent::SpinResult {
            table_id: table.id.clone(),
            result: SpinResult {
                winning_number,
                next_spin_time: outcome.table.next_spin_time,
            },
        });

        Ok(Some(outcome))
    }
}

/// Periodic driver, spawned once per process.
pub async fn spin_polling(manager: Arc<TableManager>, poll_interval: Duration) -> Result<()> {
    info!("🎡 Starting spin scheduler ({}s poll)", poll_interval.as_secs_f32());

    let mut ticker = interval(poll_interval);
    loop {
        ticker.tick().await;
        if let Err(e) = manager.do_spins().await {
            error!("spin sweep failed: {e:#}");
        }
    }
}
