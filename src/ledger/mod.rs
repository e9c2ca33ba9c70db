//! Double-entry ledger: the accounting side of the system.

pub mod api;
pub mod engine;
pub mod store;
pub mod wire;

pub use engine::Ledger;
pub use store::LedgerStore;
pub use wire::{Amount, BalanceMap, TransferError, TransferLeg, TransferRequest};
