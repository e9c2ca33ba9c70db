//! Game-side state: tables, seats, bets, and the spin scheduler.

pub mod spin;
pub mod store;

pub use spin::{spin_polling, TableManager};
pub use store::{GameStore, SpinOutcome};
