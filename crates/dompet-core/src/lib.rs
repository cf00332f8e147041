//! Core types and traits for dompet storage backends.
//!
//! This crate provides the `StorageBackend` and `UnitOfWork` traits and all
//! associated types, enabling pluggable storage implementations in separate
//! crates.

pub mod models;
pub mod storage;

// Re-export key types at crate root for convenience
pub use models::{Account, AccountId, Category, CategoryId, Kind, Transaction, TransactionId, TransactionView};
pub use models::write::{NewAccount, NewCategory, TransactionDraft};
pub use models::read::{BalanceDiscrepancy, CategoryTotal, PeriodSummary, TransactionFilter};
pub use storage::{checked_add, checked_sum, StorageBackend, StorageError, UnitOfWork};
