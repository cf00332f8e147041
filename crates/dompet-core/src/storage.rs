use rust_decimal::Decimal;
use time::PrimitiveDateTime;

use crate::models::{
    read::{BalanceDiscrepancy, CategoryTotal, PeriodSummary, TransactionFilter},
    write::{NewAccount, NewCategory, TransactionDraft},
    Account, AccountId, Category, CategoryId, Kind, Transaction, TransactionId, TransactionView,
};

use thiserror::Error;

/// Engine failures, classified once at the backend boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("{0}")]
    Duplicate(String),
    #[error("{0}")]
    StillReferenced(String),
    #[error("foreign key violation: {0}")]
    ForeignKey(String),
    #[error("storage busy: {0}")]
    Busy(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("invalid stored value: {0}")]
    Corrupt(String),
    #[error("amount out of range: {0}")]
    Overflow(String),
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        StorageError::NotFound { entity, id }
    }

    /// Failures where retrying the whole unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Busy(_) | StorageError::ConnectionLost(_))
    }
}

/// Adds two amounts, failing instead of panicking when the result leaves
/// the range `Decimal` can represent.
pub fn checked_add(a: Decimal, b: Decimal) -> Result<Decimal, StorageError> {
    a.checked_add(b)
        .ok_or_else(|| StorageError::Overflow(format!("{} + {} exceeds the supported range", a, b)))
}

pub fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Result<Decimal, StorageError> {
    values.into_iter().try_fold(Decimal::ZERO, checked_add)
}

/// One atomic, isolated unit of work against the store.
///
/// A unit is a scoped guard: `commit` consumes it, and dropping it without
/// committing rolls every write back. Implementations must hold whatever
/// lock or connection they need for the whole lifetime of the unit.
///
/// `adjust_balance` is the only write path to `Account::current_balance`.
pub trait UnitOfWork {
    /// Reads an account and holds a write lock on its row until the unit ends.
    fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StorageError>;
    fn category_exists(&mut self, id: CategoryId) -> Result<bool, StorageError>;
    /// Reads a transaction and holds a write lock on its row until the unit ends.
    fn lock_transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>, StorageError>;
    fn insert_transaction(&mut self, draft: &TransactionDraft) -> Result<TransactionId, StorageError>;
    fn update_transaction(&mut self, id: TransactionId, draft: &TransactionDraft) -> Result<(), StorageError>;
    fn delete_transaction(&mut self, id: TransactionId) -> Result<(), StorageError>;
    /// Adds `delta` to the account's current balance and returns the new balance.
    fn adjust_balance(&mut self, account_id: AccountId, delta: Decimal) -> Result<Decimal, StorageError>;

    fn commit(self: Box<Self>) -> Result<(), StorageError>;
    fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

pub trait StorageBackend: Send + Sync {
    /// Short engine name used in logs.
    fn name(&self) -> &'static str;

    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StorageError>;

    // Accounts
    fn create_account(&self, account: &NewAccount) -> Result<AccountId, StorageError>;
    fn rename_account(&self, id: AccountId, name: &str) -> Result<(), StorageError>;
    /// Fails with `StillReferenced` while any transaction points at the account.
    fn delete_account(&self, id: AccountId) -> Result<(), StorageError>;
    fn get_account(&self, id: AccountId) -> Result<Option<Account>, StorageError>;
    fn list_accounts(&self) -> Result<Vec<Account>, StorageError>;
    fn total_balance(&self) -> Result<Decimal, StorageError>;

    // Categories
    fn create_category(&self, category: &NewCategory) -> Result<CategoryId, StorageError>;
    fn update_category(&self, id: CategoryId, category: &NewCategory) -> Result<(), StorageError>;
    /// Detaches referencing transactions, then deletes; returns how many
    /// transactions were detached.
    fn delete_category(&self, id: CategoryId) -> Result<u64, StorageError>;
    fn list_categories(&self, kind: Option<Kind>) -> Result<Vec<Category>, StorageError>;

    // Transactions (read side)
    fn get_transaction(&self, id: TransactionId) -> Result<Option<TransactionView>, StorageError>;
    fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<TransactionView>, StorageError>;

    // Reports
    /// Opening balance plus every signed amount dated strictly before `before`.
    fn balance_before(&self, account_id: AccountId, before: PrimitiveDateTime) -> Result<Decimal, StorageError>;
    fn period_summary(&self, from: PrimitiveDateTime, until: PrimitiveDateTime) -> Result<PeriodSummary, StorageError>;
    fn expense_by_category(&self, from: PrimitiveDateTime, until: PrimitiveDateTime) -> Result<Vec<CategoryTotal>, StorageError>;
    fn balance_discrepancies(&self) -> Result<Vec<BalanceDiscrepancy>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_checked_add_reports_overflow() {
        assert_eq!(checked_add(dec!(1.5), dec!(-0.5)).unwrap(), dec!(1.0));
        assert!(matches!(checked_add(Decimal::MAX, Decimal::ONE), Err(StorageError::Overflow(_))));
        assert!(matches!(checked_add(Decimal::MIN, dec!(-1)), Err(StorageError::Overflow(_))));
    }

    #[test]
    fn test_checked_sum() {
        assert_eq!(checked_sum(Vec::new()).unwrap(), Decimal::ZERO);
        assert_eq!(checked_sum([dec!(10), dec!(-2.5), dec!(0.5)]).unwrap(), dec!(8.0));
        assert!(checked_sum([Decimal::MAX, Decimal::MAX]).is_err());
        assert!(!StorageError::Overflow("x".into()).is_transient());
    }
}
