//! In-memory storage backend for dompet.
//!
//! All state lives behind one mutex. A unit of work holds that mutex for its
//! whole lifetime and writes into a private copy of the state, which replaces
//! the shared state only on commit; dropping the unit discards the copy.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use dompet_core::{
    models::read::{BalanceDiscrepancy, CategoryTotal, PeriodSummary, TransactionFilter},
    models::write::{NewAccount, NewCategory, TransactionDraft},
    checked_add, checked_sum, Account, AccountId, Category, CategoryId, Kind, StorageBackend, StorageError,
    Transaction, TransactionId, TransactionView, UnitOfWork,
};
use rust_decimal::Decimal;
use time::PrimitiveDateTime;

#[derive(Clone, Default)]
struct State {
    accounts: BTreeMap<AccountId, Account>,
    categories: BTreeMap<CategoryId, Category>,
    transactions: BTreeMap<TransactionId, Transaction>,
    last_account_id: AccountId,
    last_category_id: CategoryId,
    last_transaction_id: TransactionId,
}

impl State {
    fn account_name_taken(&self, name: &str, except: Option<AccountId>) -> bool {
        self.accounts
            .values()
            .any(|a| a.name == name && Some(a.id) != except)
    }

    fn category_taken(&self, category: &NewCategory, except: Option<CategoryId>) -> bool {
        self.categories
            .values()
            .any(|c| c.name == category.name && c.kind == category.kind && Some(c.id) != except)
    }

    fn view(&self, tx: &Transaction) -> TransactionView {
        TransactionView {
            id: tx.id,
            account_id: tx.account_id,
            account_name: self
                .accounts
                .get(&tx.account_id)
                .map(|a| a.name.clone())
                .unwrap_or_default(),
            category_id: tx.category_id,
            category_name: tx
                .category_id
                .and_then(|c| self.categories.get(&c))
                .map(|c| c.name.clone()),
            date: tx.date,
            description: tx.description.clone(),
            amount: tx.amount,
            kind: tx.kind,
        }
    }

    fn in_period(tx: &Transaction, from: PrimitiveDateTime, until: PrimitiveDateTime) -> bool {
        tx.date >= from && tx.date < until
    }

    fn write_row(id: TransactionId, draft: &TransactionDraft) -> Transaction {
        Transaction {
            id,
            account_id: draft.account_id,
            category_id: draft.category_id,
            date: draft.date,
            description: draft.description.clone(),
            amount: draft.amount,
            kind: draft.kind,
        }
    }
}

pub struct InMemoryStorage {
    state: Mutex<State>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    // Units only ever write their private copy, so a panic while the lock
    // is held cannot leave the shared state half-written.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct MemoryUnit<'a> {
    shared: MutexGuard<'a, State>,
    working: State,
    finished: bool,
}

impl UnitOfWork for MemoryUnit<'_> {
    fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StorageError> {
        Ok(self.working.accounts.get(&id).cloned())
    }

    fn category_exists(&mut self, id: CategoryId) -> Result<bool, StorageError> {
        Ok(self.working.categories.contains_key(&id))
    }

    fn lock_transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>, StorageError> {
        Ok(self.working.transactions.get(&id).cloned())
    }

    fn insert_transaction(&mut self, draft: &TransactionDraft) -> Result<TransactionId, StorageError> {
        if !self.working.accounts.contains_key(&draft.account_id) {
            return Err(StorageError::ForeignKey(format!("account {} does not exist", draft.account_id)));
        }
        self.working.last_transaction_id += 1;
        let id = self.working.last_transaction_id;
        self.working.transactions.insert(id, State::write_row(id, draft));
        Ok(id)
    }

    fn update_transaction(&mut self, id: TransactionId, draft: &TransactionDraft) -> Result<(), StorageError> {
        if !self.working.accounts.contains_key(&draft.account_id) {
            return Err(StorageError::ForeignKey(format!("account {} does not exist", draft.account_id)));
        }
        let row = self
            .working
            .transactions
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("transaction", id))?;
        *row = State::write_row(id, draft);
        Ok(())
    }

    fn delete_transaction(&mut self, id: TransactionId) -> Result<(), StorageError> {
        self.working
            .transactions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("transaction", id))
    }

    fn adjust_balance(&mut self, account_id: AccountId, delta: Decimal) -> Result<Decimal, StorageError> {
        let account = self
            .working
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| StorageError::not_found("account", account_id))?;
        account.current_balance = checked_add(account.current_balance, delta)?;
        Ok(account.current_balance)
    }

    fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        let working = std::mem::take(&mut self.working);
        *self.shared = working;
        self.finished = true;
        tracing::debug!("In-memory unit committed");
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        self.finished = true;
        tracing::debug!("In-memory unit rolled back");
        Ok(())
    }
}

impl Drop for MemoryUnit<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("In-memory unit dropped without commit, changes discarded");
        }
    }
}

impl StorageBackend for InMemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    /// Copies the whole state, so each unit costs time proportional to the
    /// number of stored rows. Fine for tests and small ledgers.
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StorageError> {
        let shared = self.state();
        let working = shared.clone();
        tracing::debug!("In-memory unit started");
        Ok(Box::new(MemoryUnit {
            shared,
            working,
            finished: false,
        }))
    }

    fn create_account(&self, account: &NewAccount) -> Result<AccountId, StorageError> {
        let mut state = self.state();
        if state.account_name_taken(&account.name, None) {
            return Err(StorageError::Duplicate(format!("account name '{}' already exists", account.name)));
        }
        state.last_account_id += 1;
        let id = state.last_account_id;
        state.accounts.insert(
            id,
            Account {
                id,
                name: account.name.clone(),
                opening_balance: account.opening_balance,
                current_balance: account.opening_balance,
            },
        );
        Ok(id)
    }

    fn rename_account(&self, id: AccountId, name: &str) -> Result<(), StorageError> {
        let mut state = self.state();
        if !state.accounts.contains_key(&id) {
            return Err(StorageError::not_found("account", id));
        }
        if state.account_name_taken(name, Some(id)) {
            return Err(StorageError::Duplicate(format!("account name '{}' already exists", name)));
        }
        if let Some(account) = state.accounts.get_mut(&id) {
            account.name = name.to_string();
        }
        Ok(())
    }

    fn delete_account(&self, id: AccountId) -> Result<(), StorageError> {
        let mut state = self.state();
        if !state.accounts.contains_key(&id) {
            return Err(StorageError::not_found("account", id));
        }
        if state.transactions.values().any(|t| t.account_id == id) {
            return Err(StorageError::StillReferenced("account still has transactions".to_string()));
        }
        state.accounts.remove(&id);
        Ok(())
    }

    fn get_account(&self, id: AccountId) -> Result<Option<Account>, StorageError> {
        Ok(self.state().accounts.get(&id).cloned())
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let mut accounts: Vec<Account> = self.state().accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(accounts)
    }

    fn total_balance(&self) -> Result<Decimal, StorageError> {
        checked_sum(self.state().accounts.values().map(|a| a.current_balance))
    }

    fn create_category(&self, category: &NewCategory) -> Result<CategoryId, StorageError> {
        let mut state = self.state();
        if state.category_taken(category, None) {
            return Err(StorageError::Duplicate(format!(
                "{} category '{}' already exists",
                category.kind, category.name
            )));
        }
        state.last_category_id += 1;
        let id = state.last_category_id;
        state.categories.insert(
            id,
            Category {
                id,
                name: category.name.clone(),
                kind: category.kind,
            },
        );
        Ok(id)
    }

    fn update_category(&self, id: CategoryId, category: &NewCategory) -> Result<(), StorageError> {
        let mut state = self.state();
        if !state.categories.contains_key(&id) {
            return Err(StorageError::not_found("category", id));
        }
        if state.category_taken(category, Some(id)) {
            return Err(StorageError::Duplicate(format!(
                "{} category '{}' already exists",
                category.kind, category.name
            )));
        }
        state.categories.insert(
            id,
            Category {
                id,
                name: category.name.clone(),
                kind: category.kind,
            },
        );
        Ok(())
    }

    fn delete_category(&self, id: CategoryId) -> Result<u64, StorageError> {
        let mut state = self.state();
        if state.categories.remove(&id).is_none() {
            return Err(StorageError::not_found("category", id));
        }
        let mut detached = 0;
        for tx in state.transactions.values_mut() {
            if tx.category_id == Some(id) {
                tx.category_id = None;
                detached += 1;
            }
        }
        Ok(detached)
    }

    fn list_categories(&self, kind: Option<Kind>) -> Result<Vec<Category>, StorageError> {
        let mut categories: Vec<Category> = self
            .state()
            .categories
            .values()
            .filter(|c| kind.map_or(true, |k| c.kind == k))
            .cloned()
            .collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    fn get_transaction(&self, id: TransactionId) -> Result<Option<TransactionView>, StorageError> {
        let state = self.state();
        Ok(state.transactions.get(&id).map(|tx| state.view(tx)))
    }

    fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<TransactionView>, StorageError> {
        let state = self.state();
        let mut views: Vec<TransactionView> = state
            .transactions
            .values()
            .filter(|tx| filter.matches(tx.account_id, tx.category_id, tx.date))
            .map(|tx| state.view(tx))
            .collect();
        views.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.id.cmp(&a.id)));
        Ok(views)
    }

    fn balance_before(&self, account_id: AccountId, before: PrimitiveDateTime) -> Result<Decimal, StorageError> {
        let state = self.state();
        let account = state
            .accounts
            .get(&account_id)
            .ok_or_else(|| StorageError::not_found("account", account_id))?;
        let movement = checked_sum(
            state
                .transactions
                .values()
                .filter(|tx| tx.account_id == account_id && tx.date < before)
                .map(Transaction::delta),
        )?;
        checked_add(account.opening_balance, movement)
    }

    fn period_summary(&self, from: PrimitiveDateTime, until: PrimitiveDateTime) -> Result<PeriodSummary, StorageError> {
        let state = self.state();
        let mut summary = PeriodSummary::default();
        for tx in state.transactions.values().filter(|tx| State::in_period(tx, from, until)) {
            match tx.kind {
                Kind::Income => summary.income = checked_add(summary.income, tx.amount)?,
                Kind::Expense => summary.expense = checked_add(summary.expense, tx.amount)?,
            }
        }
        Ok(summary)
    }

    fn expense_by_category(&self, from: PrimitiveDateTime, until: PrimitiveDateTime) -> Result<Vec<CategoryTotal>, StorageError> {
        let state = self.state();
        let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();
        for tx in state
            .transactions
            .values()
            .filter(|tx| tx.kind == Kind::Expense && State::in_period(tx, from, until))
        {
            if let Some(category) = tx.category_id.and_then(|c| state.categories.get(&c)) {
                let total = totals.entry(category.name.clone()).or_insert(Decimal::ZERO);
                *total = checked_add(*total, tx.amount)?;
            }
        }
        Ok(CategoryTotal::rank(totals))
    }

    fn balance_discrepancies(&self) -> Result<Vec<BalanceDiscrepancy>, StorageError> {
        let state = self.state();
        let mut expected: BTreeMap<AccountId, Decimal> = state
            .accounts
            .values()
            .map(|a| (a.id, a.opening_balance))
            .collect();
        for tx in state.transactions.values() {
            let balance = expected.entry(tx.account_id).or_insert(Decimal::ZERO);
            *balance = checked_add(*balance, tx.delta())?;
        }
        Ok(state
            .accounts
            .values()
            .filter_map(|a| {
                let expected_balance = expected.get(&a.id).copied().unwrap_or(a.opening_balance);
                (expected_balance != a.current_balance).then(|| BalanceDiscrepancy {
                    account_id: a.id,
                    account_name: a.name.clone(),
                    current_balance: a.current_balance,
                    expected_balance,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    fn draft(account_id: AccountId, amount: Decimal, kind: Kind) -> TransactionDraft {
        TransactionDraft {
            account_id,
            category_id: None,
            date: datetime!(2024-01-10 9:30),
            description: Some("test".to_string()),
            amount,
            kind,
        }
    }

    fn cash(storage: &InMemoryStorage) -> AccountId {
        storage
            .create_account(&NewAccount {
                name: "Cash".to_string(),
                opening_balance: dec!(1000),
            })
            .unwrap()
    }

    #[test]
    fn test_unit_commit_publishes_writes() {
        let storage = InMemoryStorage::new();
        let cash = cash(&storage);

        let mut unit = storage.begin().unwrap();
        unit.insert_transaction(&draft(cash, dec!(200), Kind::Expense)).unwrap();
        assert_eq!(unit.adjust_balance(cash, dec!(-200)).unwrap(), dec!(800));
        unit.commit().unwrap();

        assert_eq!(storage.get_account(cash).unwrap().unwrap().current_balance, dec!(800));
        assert_eq!(storage.list_transactions(&TransactionFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_dropped_unit_discards_writes() {
        let storage = InMemoryStorage::new();
        let cash = cash(&storage);

        {
            let mut unit = storage.begin().unwrap();
            unit.insert_transaction(&draft(cash, dec!(200), Kind::Expense)).unwrap();
            unit.adjust_balance(cash, dec!(-200)).unwrap();
        }

        assert_eq!(storage.get_account(cash).unwrap().unwrap().current_balance, dec!(1000));
        assert!(storage.list_transactions(&TransactionFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_insert_rejects_unknown_account() {
        let storage = InMemoryStorage::new();
        let mut unit = storage.begin().unwrap();
        let err = unit.insert_transaction(&draft(42, dec!(1), Kind::Income)).unwrap_err();
        assert!(matches!(err, StorageError::ForeignKey(_)));
    }

    #[test]
    fn test_delete_account_with_transactions_is_rejected() {
        let storage = InMemoryStorage::new();
        let cash = cash(&storage);
        let mut unit = storage.begin().unwrap();
        unit.insert_transaction(&draft(cash, dec!(5), Kind::Income)).unwrap();
        unit.adjust_balance(cash, dec!(5)).unwrap();
        unit.commit().unwrap();

        let err = storage.delete_account(cash).unwrap_err();
        assert_eq!(err.to_string(), "account still has transactions");
        assert!(storage.get_account(cash).unwrap().is_some());
    }

    #[test]
    fn test_duplicate_names() {
        let storage = InMemoryStorage::new();
        cash(&storage);
        let err = storage
            .create_account(&NewAccount {
                name: "Cash".to_string(),
                opening_balance: Decimal::ZERO,
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(_)));

        let food = NewCategory { name: "Food".to_string(), kind: Kind::Expense };
        storage.create_category(&food).unwrap();
        assert!(matches!(storage.create_category(&food), Err(StorageError::Duplicate(_))));
        // same name under the other kind is fine
        storage
            .create_category(&NewCategory { name: "Food".to_string(), kind: Kind::Income })
            .unwrap();
    }

    #[test]
    fn test_delete_category_detaches_transactions() {
        let storage = InMemoryStorage::new();
        let cash = cash(&storage);
        let food = storage
            .create_category(&NewCategory { name: "Food".to_string(), kind: Kind::Expense })
            .unwrap();

        let mut unit = storage.begin().unwrap();
        for _ in 0..3 {
            let mut d = draft(cash, dec!(10), Kind::Expense);
            d.category_id = Some(food);
            unit.insert_transaction(&d).unwrap();
            unit.adjust_balance(cash, dec!(-10)).unwrap();
        }
        unit.commit().unwrap();

        assert_eq!(storage.delete_category(food).unwrap(), 3);
        let txs = storage.list_transactions(&TransactionFilter::default()).unwrap();
        assert_eq!(txs.len(), 3);
        assert!(txs.iter().all(|t| t.category_id.is_none() && t.category_name.is_none()));
        assert_eq!(storage.get_account(cash).unwrap().unwrap().current_balance, dec!(970));
    }
}
