//! SQLite ledger of record: accounts, journal entries, ledger lines.
//!
//! Journal entries and lines are append-only; accounts carry a version that
//! is compared-and-swapped on every balance write.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::wire::{is_system_account, Amount, BalanceMap, TransferError, TransferRequest};

#[derive(Clone)]
pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open ledger db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                balance INTEGER NOT NULL,
                version INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS journal_entries (
                id TEXT PRIMARY KEY,
                idempotency_key TEXT NOT NULL,
                reason TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_journal_idempotency
             ON journal_entries(idempotency_key)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ledger_lines (
                id TEXT PRIMARY KEY,
                journal_entry_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                FOREIGN KEY (journal_entry_id) REFERENCES journal_entries(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ledger_lines_journal
             ON ledger_lines(journal_entry_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ledger_lines_account
             ON ledger_lines(account_id)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Apply an already-validated transfer as one unit of work. Any error
    /// rolls the whole transaction back; nothing is partially applied.
    pub async fn apply_transfer(&self, req: &TransferRequest) -> Result<BalanceMap, TransferError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(fatal)?;

        let journal_id = Uuid::new_v4().to_string();
        match tx.execute(
            "INSERT INTO journal_entries (id, idempotency_key, reason, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                journal_id,
                req.idempotency_key,
                req.reason,
                Utc::now().timestamp_millis()
            ],
        ) {
            Ok(_) => {}
            // The unique idempotency index is the replay guard: the original
            // application already landed, the caller must read, not reapply.
            Err(e) if is_unique_violation(&e) => return Err(TransferError::IdempotentReplay),
            Err(e) => return Err(fatal(e)),
        }

        let mut balances = BalanceMap::new();
        for leg in &req.legs {
            let (balance, version) = read_or_create_account(&tx, &leg.account_id)?;
            let new_balance = balance + leg.amount;

            if new_balance < 0 && !is_system_account(&leg.account_id) {
                return Err(TransferError::InsufficientFunds(leg.account_id.clone()));
            }

            let updated = tx
                .execute(
                    "UPDATE accounts SET balance = ?1, version = version + 1
                     WHERE id = ?2 AND version = ?3",
                    params![new_balance, leg.account_id, version],
                )
                .map_err(fatal)?;
            if updated == 0 {
                return Err(TransferError::Conflict);
            }

            tx.execute(
                "INSERT INTO ledger_lines (id, journal_entry_id, account_id, amount)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    journal_id,
                    leg.account_id,
                    leg.amount
                ],
            )
            .map_err(fatal)?;

            balances.insert(leg.account_id.clone(), new_balance);
        }

        tx.commit().map_err(fatal)?;
        Ok(balances)
    }

    /// Current balance; an account that was never touched reads as zero.
    pub async fn balance(&self, account_id: &str) -> Result<Amount> {
        let conn = self.conn.lock().await;
        let balance = conn
            .query_row(
                "SELECT balance FROM accounts WHERE id = ?1",
                [account_id],
                |row| row.get(0),
            )
            .optional()
            .context("read account balance")?;
        Ok(balance.unwrap_or(0))
    }

    /// Lines recorded for one journal entry, in insertion order.
    pub async fn journal_lines(&self, idempotency_key: &str) -> Result<Vec<(String, Amount)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT l.account_id, l.amount
             FROM ledger_lines l
             JOIN journal_entries j ON j.id = l.journal_entry_id
             WHERE j.idempotency_key = ?1
             ORDER BY l.rowid ASC",
        )?;
        let lines = stmt
            .query_map([idempotency_key], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }
}

fn fatal(err: rusqlite::Error) -> TransferError {
    TransferError::Fatal(err.to_string())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn read_or_create_account(
    tx: &Transaction<'_>,
    account_id: &str,
) -> Result<(Amount, i64), TransferError> {
    let existing: Option<(Amount, i64)> = tx
        .query_row(
            "SELECT balance, version FROM accounts WHERE id = ?1",
            [account_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(fatal)?;

    match existing {
        Some(account) => Ok(account),
        None => {
            tx.execute(
                "INSERT INTO accounts (id, balance, version) VALUES (?1, 0, 0)",
                [account_id],
            )
            .map_err(fatal)?;
            Ok((0, 0))
        }
    }
}
