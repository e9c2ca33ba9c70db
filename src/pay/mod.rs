//! Payment processing on the game side: pending transactions, the
//! processor that settles them against the ledger, and the reconciler
//! that finishes orphans.

pub mod client;
pub mod intent;
pub mod processor;
pub mod reconciler;

pub use client::{HttpPayApi, LocalPayApi, PayApi, PayApiError};
pub use intent::{PendingTx, TxStatus, TxType};
pub use processor::{ProcessError, TxProcessor};
