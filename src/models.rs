//! Game-side domain records: players, tables, bets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::wire::Amount;

/// Table tier. Determines stake bounds, seat limit and spin cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableTier {
    Tier1,
    Tier2,
    Tier3,
    Tier4,
}

impl TableTier {
    pub fn min_bet(&self) -> Amount {
        match self {
            TableTier::Tier1 => 10,
            TableTier::Tier2 => 20,
            TableTier::Tier3 => 30,
            TableTier::Tier4 => 50,
        }
    }

    pub fn max_bet(&self) -> Amount {
        match self {
            TableTier::Tier1 => 100,
            TableTier::Tier2 => 200,
            TableTier::Tier3 => 300,
            TableTier::Tier4 => 500,
        }
    }

    pub fn max_seats(&self) -> usize {
        match self {
            TableTier::Tier1 => 40,
            TableTier::Tier2 => 20,
            TableTier::Tier3 => 10,
            TableTier::Tier4 => 4,
        }
    }

    /// Flat across tiers.
    pub fn spin_interval_secs(&self) -> i64 {
        30
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            TableTier::Tier1 => 1,
            TableTier::Tier2 => 2,
            TableTier::Tier3 => 3,
            TableTier::Tier4 => 4,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(TableTier::Tier1),
            2 => Some(TableTier::Tier2),
            3 => Some(TableTier::Tier3),
            4 => Some(TableTier::Tier4),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub current_table_id: Option<String>,
    pub last_active_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    pub name: String,
    pub tier: TableTier,
    pub next_spin_time: DateTime<Utc>,
    pub last_winning_number: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: String,
    pub player_id: String,
    pub table_id: String,
    pub chosen_number: i32,
    pub amount: Amount,
    pub is_resolved: bool,
    pub winning_number: Option<i32>,
    pub payout: Option<Amount>,
    pub placed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// What subscribers of a table see after a spin commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpinResult {
    pub winning_number: i32,
    pub next_spin_time: DateTime<Utc>,
}
