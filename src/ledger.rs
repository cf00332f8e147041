use std::{sync::Arc, time::Instant};

use dompet_core::{
    models::read::{BalanceDiscrepancy, TransactionFilter},
    models::write::{NewAccount, NewCategory, TransactionDraft},
    Account, AccountId, Category, CategoryId, Kind, StorageBackend, TransactionId, TransactionView,
    UnitOfWork,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{balance, error::LedgerError};

pub const DEFAULT_TRANSIENT_RETRIES: u32 = 2;

/// Entry point for every ledger operation. Transaction writes run as atomic
/// units of work; everything else is a single store call.
pub struct Ledger {
    storage: Arc<dyn StorageBackend>,
    transient_retries: u32,
}

impl Ledger {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            transient_retries: DEFAULT_TRANSIENT_RETRIES,
        }
    }

    pub fn with_transient_retries(mut self, retries: u32) -> Self {
        self.transient_retries = retries;
        self
    }

    pub fn storage(&self) -> &dyn StorageBackend {
        self.storage.as_ref()
    }

    /// Runs `work` inside one unit of work and commits it. Any error drops
    /// the unit, rolling it back. Transient failures re-run the whole unit
    /// up to the configured number of retries.
    pub fn atomically<T>(
        &self,
        operation: &'static str,
        mut work: impl FnMut(&mut dyn UnitOfWork) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        let result = loop {
            let unit_id = Uuid::new_v4();
            let span = tracing::debug_span!("unit_of_work", %unit_id, operation, attempt);
            let _entered = span.enter();

            match self.run_unit(&mut work) {
                Err(e) if e.is_retryable() && attempt < self.transient_retries => {
                    attempt += 1;
                    metrics::increment_counter!("dompet_ledger_retries_total", "operation" => operation);
                    tracing::warn!(error = %e, attempt, "transient store failure, retrying unit");
                }
                outcome => break outcome,
            }
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::increment_counter!(
            "dompet_ledger_operations_total",
            "operation" => operation,
            "outcome" => outcome
        );
        metrics::histogram!(
            "dompet_ledger_operation_seconds",
            started.elapsed().as_secs_f64(),
            "operation" => operation
        );
        if let Err(e) = &result {
            tracing::info!(operation, error = %e, kind = e.kind(), "ledger operation failed");
        }
        result
    }

    fn run_unit<T>(
        &self,
        work: &mut impl FnMut(&mut dyn UnitOfWork) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut unit = self.storage.begin()?;
        let value = work(unit.as_mut())?;
        unit.commit()?;
        Ok(value)
    }

    // Accounts

    pub fn create_account(&self, name: &str, opening_balance: Option<Decimal>) -> Result<AccountId, LedgerError> {
        let name = required_name(name, "account name")?;
        let id = self.storage.create_account(&NewAccount {
            name: name.to_string(),
            opening_balance: opening_balance.unwrap_or(Decimal::ZERO),
        })?;
        tracing::info!(account_id = id, name, "account created");
        Ok(id)
    }

    pub fn rename_account(&self, id: AccountId, name: &str) -> Result<(), LedgerError> {
        let name = required_name(name, "account name")?;
        self.storage.rename_account(id, name)?;
        Ok(())
    }

    /// Rejected with a conflict while any transaction references the account.
    pub fn delete_account(&self, id: AccountId) -> Result<(), LedgerError> {
        self.storage.delete_account(id)?;
        tracing::info!(account_id = id, "account deleted");
        Ok(())
    }

    pub fn get_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.storage
            .get_account(id)?
            .ok_or_else(|| LedgerError::not_found("account", id))
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>, LedgerError> {
        Ok(self.storage.list_accounts()?)
    }

    pub fn total_balance(&self) -> Result<Decimal, LedgerError> {
        Ok(self.storage.total_balance()?)
    }

    /// Accounts whose stored balance disagrees with their history.
    pub fn verify_balances(&self) -> Result<Vec<BalanceDiscrepancy>, LedgerError> {
        let discrepancies = self.storage.balance_discrepancies()?;
        for d in &discrepancies {
            tracing::warn!(
                account_id = d.account_id,
                current = %d.current_balance,
                expected = %d.expected_balance,
                "balance discrepancy"
            );
        }
        Ok(discrepancies)
    }

    // Categories

    pub fn create_category(&self, name: &str, kind: Kind) -> Result<CategoryId, LedgerError> {
        let name = required_name(name, "category name")?;
        Ok(self.storage.create_category(&NewCategory {
            name: name.to_string(),
            kind,
        })?)
    }

    pub fn update_category(&self, id: CategoryId, name: &str, kind: Kind) -> Result<(), LedgerError> {
        let name = required_name(name, "category name")?;
        self.storage.update_category(
            id,
            &NewCategory {
                name: name.to_string(),
                kind,
            },
        )?;
        Ok(())
    }

    /// Deletes a category, leaving its transactions uncategorized. Returns
    /// how many transactions were detached.
    pub fn delete_category(&self, id: CategoryId) -> Result<u64, LedgerError> {
        let detached = self.storage.delete_category(id)?;
        tracing::info!(category_id = id, detached, "category deleted");
        Ok(detached)
    }

    pub fn list_categories(&self, kind: Option<Kind>) -> Result<Vec<Category>, LedgerError> {
        Ok(self.storage.list_categories(kind)?)
    }

    // Transactions

    pub fn create_transaction(&self, draft: &TransactionDraft) -> Result<TransactionId, LedgerError> {
        self.atomically("create_transaction", |unit| balance::apply_create(unit, draft))
    }

    pub fn update_transaction(&self, id: TransactionId, draft: &TransactionDraft) -> Result<(), LedgerError> {
        self.atomically("update_transaction", |unit| balance::apply_update(unit, id, draft))
            .map(|_| ())
    }

    pub fn delete_transaction(&self, id: TransactionId) -> Result<(), LedgerError> {
        self.atomically("delete_transaction", |unit| balance::apply_delete(unit, id))
            .map(|_| ())
    }

    pub fn get_transaction(&self, id: TransactionId) -> Result<TransactionView, LedgerError> {
        self.storage
            .get_transaction(id)?
            .ok_or_else(|| LedgerError::not_found("transaction", id))
    }

    pub fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<TransactionView>, LedgerError> {
        Ok(self.storage.list_transactions(filter)?)
    }
}

fn required_name<'a>(name: &'a str, what: &str) -> Result<&'a str, LedgerError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::validation(format!("{} must not be empty", what)));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use dompet_core::StorageError;
    use dompet_memory::InMemoryStorage;
    use rust_decimal_macros::dec;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(InMemoryStorage::new()))
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let ledger = ledger();
        let calls = AtomicU32::new(0);

        let value = ledger
            .atomically("test", |_| {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StorageError::Busy("locked".to_string()).into())
                } else {
                    Ok(7)
                }
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retries_are_bounded() {
        let ledger = ledger().with_transient_retries(1);
        let calls = AtomicU32::new(0);

        let err = ledger
            .atomically("test", |_| -> Result<(), LedgerError> {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::Busy("locked".to_string()).into())
            })
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_non_transient_failures_are_not_retried() {
        let ledger = ledger();
        let calls = AtomicU32::new(0);

        let err = ledger
            .atomically("test", |_| -> Result<(), LedgerError> {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::validation("nope"))
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_account_names_are_validated_and_trimmed() {
        let ledger = ledger();
        assert!(matches!(ledger.create_account("   ", None), Err(LedgerError::Validation(_))));

        let id = ledger.create_account("  Wallet ", None).unwrap();
        let account = ledger.get_account(id).unwrap();
        assert_eq!(account.name, "Wallet");
        assert_eq!(account.current_balance, dec!(0));

        assert!(matches!(ledger.create_account("Wallet", None), Err(LedgerError::Conflict(_))));
        assert!(matches!(ledger.rename_account(id + 1, "Other"), Err(LedgerError::NotFound(_))));
        assert!(matches!(ledger.get_account(id + 1), Err(LedgerError::NotFound(_))));
    }
}
