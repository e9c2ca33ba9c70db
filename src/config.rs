//! Environment-driven configuration.

use crate::ledger::wire::Amount;

#[derive(Debug, Clone)]
pub struct Config {
    pub game_db_path: String,
    pub ledger_db_path: String,
    pub port: u16,
    pub pay_port: u16,
    pub pay_base_url: String,
    /// Run the ledger in-process instead of calling a separate pay service.
    pub embedded_pay: bool,
    pub reconcile_poll_secs: u64,
    pub reconcile_cutoff_secs: i64,
    pub spin_poll_secs: u64,
    pub idle_cutoff_mins: i64,
    pub min_deposit: Amount,
    pub max_deposit: Amount,
    pub min_withdrawal: Amount,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let game_db_path =
            std::env::var("GAME_DB_PATH").unwrap_or_else(|_| "./malibu_game.db".to_string());
        let ledger_db_path =
            std::env::var("LEDGER_DB_PATH").unwrap_or_else(|_| "./malibu_ledger.db".to_string());

        let port = env_parse("PORT", 8080u16);
        let pay_port = env_parse("PAY_PORT", 8081u16);
        let pay_base_url = std::env::var("PAY_BASE_URL")
            .unwrap_or_else(|_| format!("http://127.0.0.1:{}", pay_port));

        let embedded_pay = std::env::var("EMBEDDED_PAY")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(false);

        Self {
            game_db_path,
            ledger_db_path,
            port,
            pay_port,
            pay_base_url,
            embedded_pay,
            reconcile_poll_secs: env_parse("RECONCILE_POLL_SECS", 1u64),
            reconcile_cutoff_secs: env_parse("RECONCILE_CUTOFF_SECS", 1i64),
            spin_poll_secs: env_parse("SPIN_POLL_SECS", 1u64),
            idle_cutoff_mins: env_parse("IDLE_CUTOFF_MINS", 30i64),
            min_deposit: env_parse("MIN_DEPOSIT", 1_000),
            max_deposit: env_parse("MAX_DEPOSIT", 1_000_000),
            min_withdrawal: env_parse("MIN_WITHDRAWAL", 1_000),
        }
    }
}

fn env_parse<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
