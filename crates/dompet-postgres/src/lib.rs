//! PostgreSQL storage backend for dompet.
//!
//! Units of work take a client from a small fixed pool, open a transaction,
//! and lock the account rows they touch with `SELECT ... FOR UPDATE`.

use std::{
    collections::BTreeMap,
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError, TryLockError,
    },
    time::Duration,
};

use dompet_core::{
    models::read::{BalanceDiscrepancy, CategoryTotal, PeriodSummary, TransactionFilter},
    models::write::{NewAccount, NewCategory, TransactionDraft},
    Account, AccountId, Category, CategoryId, Kind, StorageBackend, StorageError, Transaction,
    TransactionId, TransactionView, UnitOfWork,
};
use postgres::{error::SqlState, types::ToSql, Client, NoTls, Row};
use rust_decimal::Decimal;
use time::PrimitiveDateTime;

const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const SIGNED_AMOUNT: &str = "CASE WHEN t.kind = 'income' THEN t.amount ELSE -t.amount END";

const TRANSACTION_SELECT: &str =
    "SELECT t.id, t.account_id, t.category_id, t.date, t.description, t.amount, t.kind FROM transactions t";

const VIEW_SELECT: &str = "SELECT t.id, t.account_id, t.category_id, t.date, t.description, t.amount, t.kind,
        a.name AS account_name, c.name AS category_name
     FROM transactions t
     JOIN accounts a ON a.id = t.account_id
     LEFT JOIN categories c ON c.id = t.category_id";

pub struct PostgresStorage {
    url: String,
    lock_timeout: Duration,
    clients: Vec<Mutex<Client>>,
    next: AtomicUsize,
}

impl PostgresStorage {
    pub fn new(url: &str) -> Result<Self, StorageError> {
        Self::with_options(url, DEFAULT_POOL_SIZE, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_options(url: &str, pool_size: usize, lock_timeout: Duration) -> Result<Self, StorageError> {
        let clients = (0..pool_size.max(1))
            .map(|_| connect(url, lock_timeout).map(Mutex::new))
            .collect::<Result<Vec<_>, _>>()?;

        let storage = Self {
            url: url.to_string(),
            lock_timeout,
            clients,
            next: AtomicUsize::new(0),
        };
        storage.init_schema()?;
        tracing::info!(pool_size = storage.clients.len(), "PostgreSQL storage connected");
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let mut client = self.client()?;
        client
            .batch_execute(
                "
            CREATE TABLE IF NOT EXISTS accounts (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                opening_balance NUMERIC NOT NULL,
                current_balance NUMERIC NOT NULL
            );

            CREATE TABLE IF NOT EXISTS categories (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('income', 'expense')),
                UNIQUE (name, kind)
            );

            CREATE TABLE IF NOT EXISTS transactions (
                id BIGSERIAL PRIMARY KEY,
                account_id BIGINT NOT NULL REFERENCES accounts(id),
                category_id BIGINT REFERENCES categories(id) ON DELETE SET NULL,
                date TIMESTAMP NOT NULL,
                description TEXT,
                amount NUMERIC NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('income', 'expense'))
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_account_date
                ON transactions(account_id, date);

            CREATE INDEX IF NOT EXISTS idx_transactions_date
                ON transactions(date);

            CREATE INDEX IF NOT EXISTS idx_transactions_category
                ON transactions(category_id);
            ",
            )
            .map_err(classify)?;
        Ok(())
    }

    /// Takes an idle client if there is one, otherwise waits on the next in
    /// turn. A client whose connection has dropped is replaced.
    fn client(&self) -> Result<MutexGuard<'_, Client>, StorageError> {
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let n = self.clients.len();

        let mut guard = (0..n)
            .find_map(|i| match self.clients[start.wrapping_add(i) % n].try_lock() {
                Ok(guard) => Some(guard),
                Err(TryLockError::Poisoned(p)) => Some(p.into_inner()),
                Err(TryLockError::WouldBlock) => None,
            })
            .unwrap_or_else(|| self.clients[start % n].lock().unwrap_or_else(PoisonError::into_inner));

        if guard.is_closed() {
            tracing::warn!("PostgreSQL connection closed, reconnecting");
            *guard = connect(&self.url, self.lock_timeout)?;
        }
        Ok(guard)
    }
}

fn connect(url: &str, lock_timeout: Duration) -> Result<Client, StorageError> {
    let mut client = Client::connect(url, NoTls)
        .map_err(|e| StorageError::ConnectionLost(format!("PostgreSQL connection failed: {}", e)))?;
    client
        .batch_execute(&format!("SET lock_timeout = '{}ms'", lock_timeout.as_millis()))
        .map_err(classify)?;
    Ok(client)
}

/// Maps SQLSTATE codes onto the typed storage errors.
fn classify(e: postgres::Error) -> StorageError {
    if e.is_closed() {
        return StorageError::ConnectionLost(e.to_string());
    }
    let Some(code) = e.code() else {
        return StorageError::Other(e.to_string());
    };

    if *code == SqlState::UNIQUE_VIOLATION {
        StorageError::Duplicate(e.to_string())
    } else if *code == SqlState::FOREIGN_KEY_VIOLATION {
        StorageError::ForeignKey(e.to_string())
    } else if *code == SqlState::T_R_SERIALIZATION_FAILURE
        || *code == SqlState::T_R_DEADLOCK_DETECTED
        || *code == SqlState::LOCK_NOT_AVAILABLE
        || *code == SqlState::QUERY_CANCELED
    {
        StorageError::Busy(e.to_string())
    } else {
        StorageError::Other(e.to_string())
    }
}

fn duplicate_as(e: postgres::Error, message: impl FnOnce() -> String) -> StorageError {
    match classify(e) {
        StorageError::Duplicate(_) => StorageError::Duplicate(message()),
        other => other,
    }
}

fn column<'a, T: postgres::types::FromSql<'a>>(row: &'a Row, name: &str) -> Result<T, StorageError> {
    row.try_get(name)
        .map_err(|e| StorageError::Corrupt(format!("column {}: {}", name, e)))
}

/// Reads a computed NUMERIC. PostgreSQL can hold values `Decimal` cannot,
/// so a failed conversion here means the sum left the supported range.
fn amount_column(row: &Row, name: &str) -> Result<Decimal, StorageError> {
    row.try_get(name)
        .map_err(|e| StorageError::Overflow(format!("{}: {}", name, e)))
}

fn kind_column(row: &Row) -> Result<Kind, StorageError> {
    let kind: String = column(row, "kind")?;
    Kind::from_str(&kind).map_err(|e| StorageError::Corrupt(e.to_string()))
}

fn account_from_row(row: &Row) -> Result<Account, StorageError> {
    Ok(Account {
        id: column(row, "id")?,
        name: column(row, "name")?,
        opening_balance: column(row, "opening_balance")?,
        current_balance: column(row, "current_balance")?,
    })
}

fn transaction_from_row(row: &Row) -> Result<Transaction, StorageError> {
    Ok(Transaction {
        id: column(row, "id")?,
        account_id: column(row, "account_id")?,
        category_id: column(row, "category_id")?,
        date: column(row, "date")?,
        description: column(row, "description")?,
        amount: column(row, "amount")?,
        kind: kind_column(row)?,
    })
}

fn view_from_row(row: &Row) -> Result<TransactionView, StorageError> {
    Ok(TransactionView {
        id: column(row, "id")?,
        account_id: column(row, "account_id")?,
        account_name: column(row, "account_name")?,
        category_id: column(row, "category_id")?,
        category_name: column(row, "category_name")?,
        date: column(row, "date")?,
        description: column(row, "description")?,
        amount: column(row, "amount")?,
        kind: kind_column(row)?,
    })
}

struct PostgresUnit<'a> {
    client: MutexGuard<'a, Client>,
    finished: bool,
}

impl UnitOfWork for PostgresUnit<'_> {
    fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StorageError> {
        self.client
            .query_opt(
                "SELECT id, name, opening_balance, current_balance FROM accounts WHERE id = $1 FOR UPDATE",
                &[&id],
            )
            .map_err(classify)?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    fn category_exists(&mut self, id: CategoryId) -> Result<bool, StorageError> {
        let row = self
            .client
            .query_one("SELECT EXISTS (SELECT 1 FROM categories WHERE id = $1)", &[&id])
            .map_err(classify)?;
        row.try_get(0).map_err(|e| StorageError::Corrupt(e.to_string()))
    }

    fn lock_transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>, StorageError> {
        self.client
            .query_opt(&format!("{} WHERE t.id = $1 FOR UPDATE", TRANSACTION_SELECT), &[&id])
            .map_err(classify)?
            .as_ref()
            .map(transaction_from_row)
            .transpose()
    }

    fn insert_transaction(&mut self, draft: &TransactionDraft) -> Result<TransactionId, StorageError> {
        let row = self
            .client
            .query_one(
                "INSERT INTO transactions (account_id, category_id, date, description, amount, kind)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING id",
                &[
                    &draft.account_id,
                    &draft.category_id,
                    &draft.date,
                    &draft.description,
                    &draft.amount,
                    &draft.kind.as_str(),
                ],
            )
            .map_err(classify)?;
        column(&row, "id")
    }

    fn update_transaction(&mut self, id: TransactionId, draft: &TransactionDraft) -> Result<(), StorageError> {
        let changed = self
            .client
            .execute(
                "UPDATE transactions
                 SET account_id = $1, category_id = $2, date = $3, description = $4, amount = $5, kind = $6
                 WHERE id = $7",
                &[
                    &draft.account_id,
                    &draft.category_id,
                    &draft.date,
                    &draft.description,
                    &draft.amount,
                    &draft.kind.as_str(),
                    &id,
                ],
            )
            .map_err(classify)?;
        if changed == 0 {
            return Err(StorageError::not_found("transaction", id));
        }
        Ok(())
    }

    fn delete_transaction(&mut self, id: TransactionId) -> Result<(), StorageError> {
        let changed = self
            .client
            .execute("DELETE FROM transactions WHERE id = $1", &[&id])
            .map_err(classify)?;
        if changed == 0 {
            return Err(StorageError::not_found("transaction", id));
        }
        Ok(())
    }

    fn adjust_balance(&mut self, account_id: AccountId, delta: Decimal) -> Result<Decimal, StorageError> {
        let row = self
            .client
            .query_opt(
                "UPDATE accounts SET current_balance = current_balance + $1 WHERE id = $2 RETURNING current_balance",
                &[&delta, &account_id],
            )
            .map_err(classify)?
            .ok_or_else(|| StorageError::not_found("account", account_id))?;
        amount_column(&row, "current_balance")
    }

    fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        self.client.batch_execute("COMMIT").map_err(classify)?;
        self.finished = true;
        tracing::debug!("PostgreSQL unit committed");
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        self.finished = true;
        self.client.batch_execute("ROLLBACK").map_err(classify)?;
        tracing::debug!("PostgreSQL unit rolled back");
        Ok(())
    }
}

impl Drop for PostgresUnit<'_> {
    fn drop(&mut self) {
        if self.finished || self.client.is_closed() {
            return;
        }
        match self.client.batch_execute("ROLLBACK") {
            Ok(()) => tracing::debug!("PostgreSQL unit dropped without commit, rolled back"),
            Err(e) => tracing::warn!(error = %e, "PostgreSQL rollback on drop failed"),
        }
    }
}

impl StorageBackend for PostgresStorage {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StorageError> {
        let mut client = self.client()?;
        client.batch_execute("BEGIN").map_err(classify)?;
        tracing::debug!("PostgreSQL unit started");
        Ok(Box::new(PostgresUnit { client, finished: false }))
    }

    fn create_account(&self, account: &NewAccount) -> Result<AccountId, StorageError> {
        let row = self
            .client()?
            .query_one(
                "INSERT INTO accounts (name, opening_balance, current_balance) VALUES ($1, $2, $2) RETURNING id",
                &[&account.name, &account.opening_balance],
            )
            .map_err(|e| duplicate_as(e, || format!("account name '{}' already exists", account.name)))?;
        column(&row, "id")
    }

    fn rename_account(&self, id: AccountId, name: &str) -> Result<(), StorageError> {
        let changed = self
            .client()?
            .execute("UPDATE accounts SET name = $1 WHERE id = $2", &[&name, &id])
            .map_err(|e| duplicate_as(e, || format!("account name '{}' already exists", name)))?;
        if changed == 0 {
            return Err(StorageError::not_found("account", id));
        }
        Ok(())
    }

    fn delete_account(&self, id: AccountId) -> Result<(), StorageError> {
        let mut client = self.client()?;
        let mut tx = client.transaction().map_err(classify)?;

        let referenced = tx
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM transactions WHERE account_id = $1)",
                &[&id],
            )
            .map_err(classify)?;
        let referenced: bool = referenced.try_get(0).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        if referenced {
            return Err(StorageError::StillReferenced("account still has transactions".to_string()));
        }

        let changed = tx
            .execute("DELETE FROM accounts WHERE id = $1", &[&id])
            .map_err(|e| match classify(e) {
                StorageError::ForeignKey(_) => StorageError::StillReferenced("account still has transactions".to_string()),
                other => other,
            })?;
        if changed == 0 {
            return Err(StorageError::not_found("account", id));
        }
        tx.commit().map_err(classify)
    }

    fn get_account(&self, id: AccountId) -> Result<Option<Account>, StorageError> {
        self.client()?
            .query_opt(
                "SELECT id, name, opening_balance, current_balance FROM accounts WHERE id = $1",
                &[&id],
            )
            .map_err(classify)?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        self.client()?
            .query(
                "SELECT id, name, opening_balance, current_balance FROM accounts ORDER BY name ASC",
                &[],
            )
            .map_err(classify)?
            .iter()
            .map(account_from_row)
            .collect()
    }

    fn total_balance(&self) -> Result<Decimal, StorageError> {
        let row = self
            .client()?
            .query_one("SELECT COALESCE(SUM(current_balance), 0) AS total FROM accounts", &[])
            .map_err(classify)?;
        amount_column(&row, "total")
    }

    fn create_category(&self, category: &NewCategory) -> Result<CategoryId, StorageError> {
        let row = self
            .client()?
            .query_one(
                "INSERT INTO categories (name, kind) VALUES ($1, $2) RETURNING id",
                &[&category.name, &category.kind.as_str()],
            )
            .map_err(|e| duplicate_as(e, || format!("{} category '{}' already exists", category.kind, category.name)))?;
        column(&row, "id")
    }

    fn update_category(&self, id: CategoryId, category: &NewCategory) -> Result<(), StorageError> {
        let changed = self
            .client()?
            .execute(
                "UPDATE categories SET name = $1, kind = $2 WHERE id = $3",
                &[&category.name, &category.kind.as_str(), &id],
            )
            .map_err(|e| duplicate_as(e, || format!("{} category '{}' already exists", category.kind, category.name)))?;
        if changed == 0 {
            return Err(StorageError::not_found("category", id));
        }
        Ok(())
    }

    fn delete_category(&self, id: CategoryId) -> Result<u64, StorageError> {
        let mut client = self.client()?;
        let mut tx = client.transaction().map_err(classify)?;

        let detached = tx
            .execute("UPDATE transactions SET category_id = NULL WHERE category_id = $1", &[&id])
            .map_err(classify)?;
        let changed = tx
            .execute("DELETE FROM categories WHERE id = $1", &[&id])
            .map_err(classify)?;
        if changed == 0 {
            return Err(StorageError::not_found("category", id));
        }
        tx.commit().map_err(classify)?;
        Ok(detached)
    }

    fn list_categories(&self, kind: Option<Kind>) -> Result<Vec<Category>, StorageError> {
        let kind = kind.map(|k| k.as_str());
        self.client()?
            .query(
                "SELECT id, name, kind FROM categories
                 WHERE $1::TEXT IS NULL OR kind = $1
                 ORDER BY name ASC",
                &[&kind],
            )
            .map_err(classify)?
            .iter()
            .map(|row| {
                Ok(Category {
                    id: column(row, "id")?,
                    name: column(row, "name")?,
                    kind: kind_column(row)?,
                })
            })
            .collect()
    }

    fn get_transaction(&self, id: TransactionId) -> Result<Option<TransactionView>, StorageError> {
        self.client()?
            .query_opt(&format!("{} WHERE t.id = $1", VIEW_SELECT), &[&id])
            .map_err(classify)?
            .as_ref()
            .map(view_from_row)
            .transpose()
    }

    fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<TransactionView>, StorageError> {
        let lower = filter.lower_bound();
        let upper = filter.upper_bound();

        let mut conditions: Vec<String> = Vec::new();
        let mut args: Vec<&(dyn ToSql + Sync)> = Vec::new();

        if let Some(account_id) = &filter.account_id {
            args.push(account_id);
            conditions.push(format!("t.account_id = ${}", args.len()));
        }
        if let Some(lower) = &lower {
            args.push(lower);
            conditions.push(format!("t.date >= ${}", args.len()));
        }
        if let Some(upper) = &upper {
            args.push(upper);
            conditions.push(format!("t.date < ${}", args.len()));
        }
        if !filter.category_ids.is_empty() {
            args.push(&filter.category_ids);
            conditions.push(format!("t.category_id = ANY(${})", args.len()));
        }

        let mut query = VIEW_SELECT.to_string();
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query.push_str(" ORDER BY t.date DESC, t.id DESC");

        self.client()?
            .query(&query, &args)
            .map_err(classify)?
            .iter()
            .map(view_from_row)
            .collect()
    }

    fn balance_before(&self, account_id: AccountId, before: PrimitiveDateTime) -> Result<Decimal, StorageError> {
        let row = self
            .client()?
            .query_opt(
                &format!(
                    "SELECT a.opening_balance + COALESCE(SUM({}), 0) AS balance
                     FROM accounts a
                     LEFT JOIN transactions t ON t.account_id = a.id AND t.date < $2
                     WHERE a.id = $1
                     GROUP BY a.id, a.opening_balance",
                    SIGNED_AMOUNT
                ),
                &[&account_id, &before],
            )
            .map_err(classify)?
            .ok_or_else(|| StorageError::not_found("account", account_id))?;
        amount_column(&row, "balance")
    }

    fn period_summary(&self, from: PrimitiveDateTime, until: PrimitiveDateTime) -> Result<PeriodSummary, StorageError> {
        let row = self
            .client()?
            .query_one(
                "SELECT
                    COALESCE(SUM(amount) FILTER (WHERE kind = 'income'), 0) AS income,
                    COALESCE(SUM(amount) FILTER (WHERE kind = 'expense'), 0) AS expense
                 FROM transactions
                 WHERE date >= $1 AND date < $2",
                &[&from, &until],
            )
            .map_err(classify)?;
        Ok(PeriodSummary {
            income: amount_column(&row, "income")?,
            expense: amount_column(&row, "expense")?,
        })
    }

    fn expense_by_category(&self, from: PrimitiveDateTime, until: PrimitiveDateTime) -> Result<Vec<CategoryTotal>, StorageError> {
        let rows = self
            .client()?
            .query(
                "SELECT c.name, SUM(t.amount) AS total
                 FROM transactions t
                 JOIN categories c ON c.id = t.category_id
                 WHERE t.kind = 'expense' AND t.date >= $1 AND t.date < $2
                 GROUP BY c.name",
                &[&from, &until],
            )
            .map_err(classify)?;

        let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();
        for row in &rows {
            totals.insert(column(row, "name")?, amount_column(row, "total")?);
        }
        Ok(CategoryTotal::rank(totals))
    }

    fn balance_discrepancies(&self) -> Result<Vec<BalanceDiscrepancy>, StorageError> {
        let rows = self
            .client()?
            .query(
                &format!(
                    "SELECT a.id, a.name, a.current_balance,
                        a.opening_balance + COALESCE(SUM({}), 0) AS expected_balance
                     FROM accounts a
                     LEFT JOIN transactions t ON t.account_id = a.id
                     GROUP BY a.id, a.name, a.current_balance, a.opening_balance
                     ORDER BY a.name ASC",
                    SIGNED_AMOUNT
                ),
                &[],
            )
            .map_err(classify)?;

        let mut discrepancies = Vec::new();
        for row in &rows {
            let current_balance: Decimal = column(row, "current_balance")?;
            let expected_balance = amount_column(row, "expected_balance")?;
            if current_balance != expected_balance {
                discrepancies.push(BalanceDiscrepancy {
                    account_id: column(row, "id")?,
                    account_name: column(row, "name")?,
                    current_balance,
                    expected_balance,
                });
            }
        }
        Ok(discrepancies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    // Tests share one database, so they run one at a time.
    static SERIAL: Mutex<()> = Mutex::new(());

    fn storage() -> Option<PostgresStorage> {
        let url = std::env::var("DOMPET_TEST_POSTGRES_URL").ok()?;
        let storage = PostgresStorage::with_options(&url, 2, Duration::from_secs(2)).unwrap();
        storage
            .client()
            .unwrap()
            .batch_execute("TRUNCATE transactions, categories, accounts RESTART IDENTITY")
            .unwrap();
        Some(storage)
    }

    fn draft(account_id: AccountId, amount: Decimal, kind: Kind) -> TransactionDraft {
        TransactionDraft {
            account_id,
            category_id: None,
            date: datetime!(2023-01-01 10:00),
            description: Some("Groceries".to_string()),
            amount,
            kind,
        }
    }

    #[test]
    fn test_postgres_basic_operations() {
        let _serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(storage) = storage() else {
            return;
        };

        let cash = storage
            .create_account(&NewAccount { name: "Cash".to_string(), opening_balance: dec!(1000) })
            .unwrap();

        let mut unit = storage.begin().unwrap();
        assert!(unit.lock_account(cash).unwrap().is_some());
        let id = unit.insert_transaction(&draft(cash, dec!(200.50), Kind::Expense)).unwrap();
        assert_eq!(unit.adjust_balance(cash, dec!(-200.50)).unwrap(), dec!(799.50));
        unit.commit().unwrap();

        let view = storage.get_transaction(id).unwrap().unwrap();
        assert_eq!(view.account_name, "Cash");
        assert_eq!(view.amount, dec!(200.50));
        assert_eq!(storage.total_balance().unwrap(), dec!(799.50));
        assert!(storage.balance_discrepancies().unwrap().is_empty());
        assert_eq!(storage.balance_before(cash, datetime!(2023-01-01 0:00)).unwrap(), dec!(1000));
    }

    #[test]
    fn test_postgres_transaction_rollback() {
        let _serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(storage) = storage() else {
            return;
        };

        let cash = storage
            .create_account(&NewAccount { name: "Cash".to_string(), opening_balance: dec!(1000) })
            .unwrap();
        {
            let mut unit = storage.begin().unwrap();
            unit.insert_transaction(&draft(cash, dec!(500), Kind::Income)).unwrap();
            unit.adjust_balance(cash, dec!(500)).unwrap();
        }

        assert_eq!(storage.get_account(cash).unwrap().unwrap().current_balance, dec!(1000));
        assert!(storage.list_transactions(&TransactionFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_postgres_classifies_constraint_errors() {
        let _serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(storage) = storage() else {
            return;
        };

        let account = NewAccount { name: "Cash".to_string(), opening_balance: dec!(0) };
        let cash = storage.create_account(&account).unwrap();
        assert!(matches!(storage.create_account(&account), Err(StorageError::Duplicate(_))));

        let mut unit = storage.begin().unwrap();
        let err = unit.insert_transaction(&draft(cash + 99, dec!(1), Kind::Income)).unwrap_err();
        assert!(matches!(err, StorageError::ForeignKey(_)), "got {:?}", err);
    }
}
