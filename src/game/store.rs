//! Game-service SQLite storage: pending transactions, players, tables, bets.
//!
//! Pending transactions are the durable work queue — append/update only,
//! never deleted. All cross-row mutations (spin settlement) run as a single
//! transaction so a failed tick leaves no partial effects behind.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::spin::bet_payout;
use crate::models::{Bet, Player, Table, TableTier};
use crate::pay::intent::{PendingTx, TxStatus, TxType};

/// Everything one committed spin changed, for post-commit notification.
#[derive(Debug)]
pub struct SpinOutcome {
    pub table: Table,
    pub removed_players: Vec<Player>,
    pub resolved_bets: Vec<Bet>,
    pub payouts_created: usize,
}

#[derive(Clone)]
pub struct GameStore {
    conn: Arc<Mutex<Connection>>,
}

impl GameStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open game db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS pending_txs (
                id TEXT PRIMARY KEY,
                tx_type TEXT NOT NULL,
                status TEXT NOT NULL,
                player_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                processed_at INTEGER,
                log TEXT NOT NULL DEFAULT '',
                version INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_pending_status_created
             ON pending_txs(status, created_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS players (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                current_table_id TEXT,
                last_active_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_players_table ON players(current_table_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tables (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                tier INTEGER NOT NULL,
                next_spin_time INTEGER NOT NULL,
                last_winning_number INTEGER
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS bets (
                id TEXT PRIMARY KEY,
                player_id TEXT NOT NULL,
                table_id TEXT NOT NULL,
                chosen_number INTEGER NOT NULL,
                amount INTEGER NOT NULL,
                is_resolved INTEGER NOT NULL DEFAULT 0,
                winning_number INTEGER,
                payout INTEGER,
                placed_at INTEGER NOT NULL,
                resolved_at INTEGER
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_bets_table_unresolved
             ON bets(table_id, is_resolved)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ===== Pending transactions =====

    pub async fn insert_pending_tx(&self, tx: &PendingTx) -> Result<()> {
        let conn = self.conn.lock().await;
        insert_pending_tx_conn(&conn, tx)?;
        Ok(())
    }

    /// Persist the current state of an intent with a compare-and-swap on its
    /// version. Returns false when another writer got there first; the caller
    /// must treat the intent's state as unknown and leave it to a later sweep.
    pub async fn update_pending_tx(&self, tx: &mut PendingTx) -> Result<bool> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE pending_txs
             SET status = ?1, processed_at = ?2, log = ?3, version = version + 1
             WHERE id = ?4 AND version = ?5",
            params![
                tx.status.as_str(),
                tx.processed_at.map(|t| t.timestamp_millis()),
                tx.log,
                tx.id,
                tx.version
            ],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        tx.version += 1;
        Ok(true)
    }

    pub async fn get_pending_tx(&self, id: &str) -> Result<Option<PendingTx>> {
        let conn = self.conn.lock().await;
        let tx = conn
            .query_row(
                "SELECT id, tx_type, status, player_id, amount, created_at, processed_at, log, version
                 FROM pending_txs WHERE id = ?1",
                [id],
                row_to_pending_tx,
            )
            .optional()?;
        Ok(tx)
    }

    /// PENDING intents created before the cutoff: their creator crashed or
    /// stalled before claiming them.
    pub async fn find_stuck_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<PendingTx>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, tx_type, status, player_id, amount, created_at, processed_at, log, version
             FROM pending_txs
             WHERE status = 'PENDING' AND created_at < ?1
             ORDER BY created_at ASC",
        )?;
        let txs = stmt
            .query_map([cutoff.timestamp_millis()], row_to_pending_tx)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(txs)
    }

    // ===== Players =====

    pub async fn get_or_create_player(&self, id: &str, name: &str) -> Result<Player> {
        let conn = self.conn.lock().await;
        let existing = conn
            .query_row(
                "SELECT id, name, current_table_id, last_active_at FROM players WHERE id = ?1",
                [id],
                row_to_player,
            )
            .optional()?;

        if let Some(player) = existing {
            return Ok(player);
        }

        let player = Player {
            id: id.to_string(),
            name: name.to_string(),
            current_table_id: None,
            last_active_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO players (id, name, current_table_id, last_active_at)
             VALUES (?1, ?2, NULL, ?3)",
            params![player.id, player.name, player.last_active_at.timestamp_millis()],
        )?;
        Ok(player)
    }

    pub async fn get_player(&self, id: &str) -> Result<Option<Player>> {
        let conn = self.conn.lock().await;
        let player = conn
            .query_row(
                "SELECT id, name, current_table_id, last_active_at FROM players WHERE id = ?1",
                [id],
                row_to_player,
            )
            .optional()?;
        Ok(player)
    }

    pub async fn seat_player(&self, player_id: &str, table_id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE players SET current_table_id = ?1, last_active_at = ?2 WHERE id = ?3",
            params![table_id, now.timestamp_millis(), player_id],
        )?;
        Ok(())
    }

    pub async fn unseat_player(&self, player_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE players SET current_table_id = NULL WHERE id = ?1",
            [player_id],
        )?;
        Ok(())
    }

    /// Bumps the idle clock; called on any player action at a table.
    pub async fn touch_player(&self, player_id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE players SET last_active_at = ?1 WHERE id = ?2",
            params![now.timestamp_millis(), player_id],
        )?;
        Ok(())
    }

    pub async fn players_at_table(&self, table_id: &str) -> Result<Vec<Player>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, current_table_id, last_active_at
             FROM players WHERE current_table_id = ?1 ORDER BY name ASC",
        )?;
        let players = stmt
            .query_map([table_id], row_to_player)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(players)
    }

    // ===== Tables =====

    /// First-run seeding. No-op when any table already exists.
    pub async fn seed_tables(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tables", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(0);
        }

        let seeds: [(&str, TableTier, i64); 7] = [
            ("Silver Shells", TableTier::Tier1, 5),
            ("Playful Breeze", TableTier::Tier1, 10),
            ("Sunlight Lounge", TableTier::Tier2, 15),
            ("Golden Sands", TableTier::Tier2, 20),
            ("Secret Rendezvous", TableTier::Tier3, 25),
            ("Dolphin's Breath", TableTier::Tier3, 30),
            ("Eternal Bliss", TableTier::Tier4, 35),
        ];
        for (name, tier, shift_secs) in seeds {
            conn.execute(
                "INSERT INTO tables (id, name, tier, next_spin_time, last_winning_number)
                 VALUES (?1, ?2, ?3, ?4, NULL)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    name,
                    tier.as_i64(),
                    (now + Duration::seconds(shift_secs)).timestamp_millis()
                ],
            )?;
        }
        Ok(seeds.len())
    }

    pub async fn get_table(&self, id: &str) -> Result<Option<Table>> {
        let conn = self.conn.lock().await;
        let table = conn
            .query_row(
                "SELECT id, name, tier, next_spin_time, last_winning_number
                 FROM tables WHERE id = ?1",
                [id],
                row_to_table,
            )
            .optional()?;
        Ok(table)
    }

    pub async fn list_tables(&self) -> Result<Vec<(Table, i64)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT t.id, t.name, t.tier, t.next_spin_time, t.last_winning_number,
                    (SELECT COUNT(*) FROM players p WHERE p.current_table_id = t.id)
             FROM tables t ORDER BY t.tier ASC, t.name ASC",
        )?;
        let tables = stmt
            .query_map([], |row| Ok((row_to_table(row)?, row.get(5)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tables)
    }

    pub async fn due_tables(&self, now: DateTime<Utc>) -> Result<Vec<Table>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, tier, next_spin_time, last_winning_number
             FROM tables WHERE next_spin_time <= ?1",
        )?;
        let tables = stmt
            .query_map([now.timestamp_millis()], row_to_table)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tables)
    }

    // ===== Bets =====

    pub async fn insert_bet(&self, bet: &Bet) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO bets (id, player_id, table_id, chosen_number, amount,
                               is_resolved, winning_number, payout, placed_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                bet.id,
                bet.player_id,
                bet.table_id,
                bet.chosen_number,
                bet.amount,
                bet.is_resolved as i64,
                bet.winning_number,
                bet.payout,
                bet.placed_at.timestamp_millis(),
                bet.resolved_at.map(|t| t.timestamp_millis())
            ],
        )?;
        Ok(())
    }

    pub async fn get_bet(&self, id: &str) -> Result<Option<Bet>> {
        let conn = self.conn.lock().await;
        let bet = conn
            .query_row(
                "SELECT id, player_id, table_id, chosen_number, amount, is_resolved,
                        winning_number, payout, placed_at, resolved_at
                 FROM bets WHERE id = ?1",
                [id],
                row_to_bet,
            )
            .optional()?;
        Ok(bet)
    }

    pub async fn unresolved_bets(&self, table_id: &str) -> Result<Vec<Bet>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, player_id, table_id, chosen_number, amount, is_resolved,
                    winning_number, payout, placed_at, resolved_at
             FROM bets WHERE table_id = ?1 AND is_resolved = 0 ORDER BY placed_at ASC",
        )?;
        let bets = stmt
            .query_map([table_id], row_to_bet)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(bets)
    }

    // ===== Spin settlement =====

    /// Resolve one due table as a single unit of work: drop idle players,
    /// advance the schedule, resolve every open bet and queue payout intents
    /// under deterministic "{spin_id}_{bet_id}" keys. Commits all of it or
    /// nothing; on failure the table stays due and the next tick retries.
    pub async fn resolve_spin(
        &self,
        table_id: &str,
        spin_id: &str,
        winning_number: i32,
        now: DateTime<Utc>,
        idle_cutoff: DateTime<Utc>,
    ) -> Result<Option<SpinOutcome>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let Some(mut table) = tx
            .query_row(
                "SELECT id, name, tier, next_spin_time, last_winning_number
                 FROM tables WHERE id = ?1",
                [table_id],
                row_to_table,
            )
            .optional()?
        else {
            return Ok(None);
        };

        let removed_players = {
            let mut stmt = tx.prepare(
                "SELECT id, name, current_table_id, last_active_at
                 FROM players WHERE current_table_id = ?1 AND last_active_at < ?2",
            )?;
            let idles = stmt
                .query_map(
                    params![table_id, idle_cutoff.timestamp_millis()],
                    row_to_player,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            idles
        };
        for player in &removed_players {
            tx.execute(
                "UPDATE players SET current_table_id = NULL WHERE id = ?1",
                [&player.id],
            )?;
        }

        table.next_spin_time = now + Duration::seconds(table.tier.spin_interval_secs());
        table.last_winning_number = Some(winning_number);
        tx.execute(
            "UPDATE tables SET next_spin_time = ?1, last_winning_number = ?2 WHERE id = ?3",
            params![
                table.next_spin_time.timestamp_millis(),
                winning_number,
                table_id
            ],
        )?;

        let mut resolved_bets = {
            let mut stmt = tx.prepare(
                "SELECT id, player_id, table_id, chosen_number, amount, is_resolved,
                        winning_number, payout, placed_at, resolved_at
                 FROM bets WHERE table_id = ?1 AND is_resolved = 0",
            )?;
            let bets = stmt
                .query_map([table_id], row_to_bet)?
                .collect::<Result<Vec<_>, _>>()?;
            bets
        };

        let mut payouts_created = 0;
        for bet in &mut resolved_bets {
            let payout = bet_payout(bet.amount, bet.chosen_number, winning_number);
            bet.is_resolved = true;
            bet.winning_number = Some(winning_number);
            bet.payout = Some(payout);
            bet.resolved_at = Some(now);

            tx.execute(
                "UPDATE bets SET is_resolved = 1, winning_number = ?1, payout = ?2, resolved_at = ?3
                 WHERE id = ?4",
                params![winning_number, payout, now.timestamp_millis(), bet.id],
            )?;

            if payout > 0 {
                let pending = PendingTx::new(
                    format!("{}_{}", spin_id, bet.id),
                    TxType::Payout,
                    bet.player_id.clone(),
                    payout,
                );
                insert_pending_tx_conn(&tx, &pending)?;
                payouts_created += 1;
            }
        }

        tx.commit()?;
        Ok(Some(SpinOutcome {
            table,
            removed_players,
            resolved_bets,
            payouts_created,
        }))
    }
}

// ===== Row mapping =====

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn decode_err(what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("unknown {}: {}", what, value).into(),
    )
}

fn row_to_pending_tx(row: &Row<'_>) -> rusqlite::Result<PendingTx> {
    let type_str: String = row.get(1)?;
    let status_str: String = row.get(2)?;
    Ok(PendingTx {
        id: row.get(0)?,
        tx_type: TxType::from_str(&type_str).ok_or_else(|| decode_err("tx type", &type_str))?,
        status: TxStatus::from_str(&status_str)
            .ok_or_else(|| decode_err("tx status", &status_str))?,
        player_id: row.get(3)?,
        amount: row.get(4)?,
        created_at: from_millis(row.get(5)?),
        processed_at: row.get::<_, Option<i64>>(6)?.map(from_millis),
        log: row.get(7)?,
        version: row.get(8)?,
    })
}

fn row_to_player(row: &Row<'_>) -> rusqlite::Result<Player> {
    Ok(Player {
        id: row.get(0)?,
        name: row.get(1)?,
        current_table_id: row.get(2)?,
        last_active_at: from_millis(row.get(3)?),
    })
}

fn row_to_table(row: &Row<'_>) -> rusqlite::Result<Table> {
    let tier: i64 = row.get(2)?;
    Ok(Table {
        id: row.get(0)?,
        name: row.get(1)?,
        tier: TableTier::from_i64(tier).ok_or_else(|| decode_err("tier", &tier.to_string()))?,
        next_spin_time: from_millis(row.get(3)?),
        last_winning_number: row.get(4)?,
    })
}

fn row_to_bet(row: &Row<'_>) -> rusqlite::Result<Bet> {
    Ok(Bet {
        id: row.get(0)?,
        player_id: row.get(1)?,
        table_id: row.get(2)?,
        chosen_number: row.get(3)?,
        amount: row.get(4)?,
        is_resolved: row.get::<_, i64>(5)? == 1,
        winning_number: row.get(6)?,
        payout: row.get(7)?,
        placed_at: from_millis(row.get(8)?),
        resolved_at: row.get::<_, Option<i64>>(9)?.map(from_millis),
    })
}

fn insert_pending_tx_conn(conn: &Connection, tx: &PendingTx) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO pending_txs (id, tx_type, status, player_id, amount,
                                  created_at, processed_at, log, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            tx.id,
            tx.tx_type.as_str(),
            tx.status.as_str(),
            tx.player_id,
            tx.amount,
            tx.created_at.timestamp_millis(),
            tx.processed_at.map(|t| t.timestamp_millis()),
            tx.log,
            tx.version
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (GameStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = GameStore::new(temp_file.path().to_str().unwrap()).unwrap();
        (store, temp_file)
    }

    #[tokio::test]
    async fn test_pending_tx_round_trip() {
        let (store, _temp) = create_test_store();

        let tx = PendingTx::new("tx1", TxType::Deposit, "alice", 1000);
        store.insert_pending_tx(&tx).await.unwrap();

        let loaded = store.get_pending_tx("tx1").await.unwrap().unwrap();
        assert_eq!(loaded.tx_type, TxType::Deposit);
        assert_eq!(loaded.status, TxStatus::Pending);
        assert_eq!(loaded.amount, 1000);
        assert_eq!(loaded.version, 0);
    }

    #[tokio::test]
    async fn test_update_pending_tx_version_cas() {
        let (store, _temp) = create_test_store();

        let tx = PendingTx::new("tx1", TxType::Deposit, "alice", 1000);
        store.insert_pending_tx(&tx).await.unwrap();

        // Two drivers load the same snapshot and both try to claim it.
        let mut first = store.get_pending_tx("tx1").await.unwrap().unwrap();
        let mut second = store.get_pending_tx("tx1").await.unwrap().unwrap();
        assert!(first.crack());
        assert!(second.crack());

        assert!(store.update_pending_tx(&mut first).await.unwrap());
        assert_eq!(first.version, 1);
        // The loser's stale version does not pass the CAS.
        assert!(!store.update_pending_tx(&mut second).await.unwrap());

        let loaded = store.get_pending_tx("tx1").await.unwrap().unwrap();
        assert_eq!(loaded.status, TxStatus::Cracked);
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn test_find_stuck_pending_honors_cutoff() {
        let (store, _temp) = create_test_store();

        let mut old = PendingTx::new("old", TxType::Deposit, "alice", 1000);
        old.created_at = Utc::now() - Duration::seconds(10);
        store.insert_pending_tx(&old).await.unwrap();

        let fresh = PendingTx::new("fresh", TxType::Deposit, "alice", 1000);
        store.insert_pending_tx(&fresh).await.unwrap();

        let mut cracked = PendingTx::new("cracked", TxType::Deposit, "alice", 1000);
        cracked.created_at = Utc::now() - Duration::seconds(10);
        cracked.crack();
        store.insert_pending_tx(&cracked).await.unwrap();

        let stuck = store
            .find_stuck_pending(Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        let ids: Vec<&str> = stuck.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["old"]);
    }

    #[tokio::test]
    async fn test_seed_tables_once() {
        let (store, _temp) = create_test_store();

        assert_eq!(store.seed_tables(Utc::now()).await.unwrap(), 7);
        assert_eq!(store.seed_tables(Utc::now()).await.unwrap(), 0);

        let tables = store.list_tables().await.unwrap();
        assert_eq!(tables.len(), 7);
        assert!(tables.iter().all(|(_, count)| *count == 0));
    }

    #[tokio::test]
    async fn test_due_tables() {
        let (store, _temp) = create_test_store();
        let now = Utc::now();
        store.seed_tables(now).await.unwrap();

        // Seeds stagger first spins 5..35s out; nothing is due yet.
        assert!(store.due_tables(now).await.unwrap().is_empty());
        let due = store.due_tables(now + Duration::seconds(36)).await.unwrap();
        assert_eq!(due.len(), 7);
    }

    #[tokio::test]
    async fn test_seating_and_idle_listing() {
        let (store, _temp) = create_test_store();
        let now = Utc::now();
        store.seed_tables(now).await.unwrap();
        let (table, _) = store.list_tables().await.unwrap().into_iter().next().unwrap();

        store.get_or_create_player("p1", "Alice").await.unwrap();
        store.seat_player("p1", &table.id, now).await.unwrap();

        let seated = store.players_at_table(&table.id).await.unwrap();
        assert_eq!(seated.len(), 1);
        assert_eq!(seated[0].id, "p1");

        store.unseat_player("p1").await.unwrap();
        assert!(store.players_at_table(&table.id).await.unwrap().is_empty());
    }
}
