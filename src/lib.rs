//! dompet: a personal finance ledger whose account balances are kept in
//! lockstep with their transaction history.

pub mod api;
pub mod auth;
pub mod balance;
pub mod config;
pub mod error;
pub mod ledger;
pub mod reports;
pub mod storage;

pub use error::LedgerError;
pub use ledger::Ledger;
