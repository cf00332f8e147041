//! SQLite storage backend for dompet.

use std::{
    collections::BTreeMap,
    str::FromStr,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use dompet_core::{
    models::read::{BalanceDiscrepancy, CategoryTotal, PeriodSummary, TransactionFilter},
    models::write::{NewAccount, NewCategory, TransactionDraft},
    models::{format_date_time, parse_date_time},
    checked_add, checked_sum, Account, AccountId, Category, CategoryId, Kind, StorageBackend, StorageError,
    Transaction, TransactionId, TransactionView, UnitOfWork,
};
use rusqlite::{ffi, params, params_from_iter, types::Value, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use rust_decimal::Decimal;
use time::PrimitiveDateTime;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TRANSACTION_SELECT: &str =
    "SELECT t.id, t.account_id, t.category_id, t.date, t.description, t.amount, t.kind FROM transactions t";

const VIEW_SELECT: &str = "SELECT t.id, t.account_id, t.category_id, t.date, t.description, t.amount, t.kind,
        a.name, c.name
     FROM transactions t
     JOIN accounts a ON a.id = t.account_id
     LEFT JOIN categories c ON c.id = t.category_id";

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        Self::with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn with_busy_timeout(path: &str, busy_timeout: Duration) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(classify)?;

        conn.busy_timeout(busy_timeout).map_err(classify)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(classify)?;

        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        tracing::info!(path, "SQLite storage opened");
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                opening_balance TEXT NOT NULL,
                current_balance TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('income', 'expense')),
                UNIQUE (name, kind)
            );

            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                category_id INTEGER,
                date TEXT NOT NULL,
                description TEXT,
                amount TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('income', 'expense')),
                FOREIGN KEY (account_id) REFERENCES accounts(id),
                FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE SET NULL
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

    // A unit of work rolls back in its Drop impl, which runs before the
    // guard is released, so a poisoned lock still guards a clean connection.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Maps engine result codes onto the typed storage errors.
fn classify(e: rusqlite::Error) -> StorageError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            ErrorCode::ConstraintViolation => match err.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    StorageError::Duplicate(e.to_string())
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => StorageError::ForeignKey(e.to_string()),
                _ => StorageError::Other(e.to_string()),
            },
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StorageError::Busy(e.to_string()),
            _ => StorageError::Other(e.to_string()),
        },
        _ => StorageError::Other(e.to_string()),
    }
}

fn duplicate_as(e: rusqlite::Error, message: impl FnOnce() -> String) -> StorageError {
    match classify(e) {
        StorageError::Duplicate(_) => StorageError::Duplicate(message()),
        other => other,
    }
}

fn str_to_decimal(s: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(s).map_err(|e| StorageError::Corrupt(format!("decimal '{}': {}", s, e)))
}

fn str_to_kind(s: &str) -> Result<Kind, StorageError> {
    Kind::from_str(s).map_err(|e| StorageError::Corrupt(e.to_string()))
}

fn str_to_date_time(s: &str) -> Result<PrimitiveDateTime, StorageError> {
    parse_date_time(s).map_err(|e| StorageError::Corrupt(e.to_string()))
}

type AccountRow = (i64, String, String, String);
type TransactionRow = (i64, i64, Option<i64>, String, Option<String>, String, String);
type ViewRow = (TransactionRow, String, Option<String>);

fn read_account_row(row: &rusqlite::Row) -> rusqlite::Result<AccountRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn read_transaction_row(row: &rusqlite::Row) -> rusqlite::Result<TransactionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn read_view_row(row: &rusqlite::Row) -> rusqlite::Result<ViewRow> {
    Ok((read_transaction_row(row)?, row.get(7)?, row.get(8)?))
}

fn into_account((id, name, opening, current): AccountRow) -> Result<Account, StorageError> {
    Ok(Account {
        id,
        name,
        opening_balance: str_to_decimal(&opening)?,
        current_balance: str_to_decimal(&current)?,
    })
}

fn into_transaction(
    (id, account_id, category_id, date, description, amount, kind): TransactionRow,
) -> Result<Transaction, StorageError> {
    Ok(Transaction {
        id,
        account_id,
        category_id,
        date: str_to_date_time(&date)?,
        description,
        amount: str_to_decimal(&amount)?,
        kind: str_to_kind(&kind)?,
    })
}

fn into_view((row, account_name, category_name): ViewRow) -> Result<TransactionView, StorageError> {
    let tx = into_transaction(row)?;
    Ok(TransactionView {
        id: tx.id,
        account_id: tx.account_id,
        account_name,
        category_id: tx.category_id,
        category_name,
        date: tx.date,
        description: tx.description,
        amount: tx.amount,
        kind: tx.kind,
    })
}

fn select_account(conn: &Connection, id: AccountId) -> Result<Option<Account>, StorageError> {
    conn.query_row(
        "SELECT id, name, opening_balance, current_balance FROM accounts WHERE id = ?1",
        params![id],
        read_account_row,
    )
    .optional()
    .map_err(classify)?
    .map(into_account)
    .transpose()
}

/// Signed amounts grouped by account for the rows matched by `sql`.
fn signed_amounts(conn: &Connection, sql: &str, args: &[Value]) -> Result<Vec<(AccountId, Decimal)>, StorageError> {
    let mut stmt = conn.prepare(sql).map_err(classify)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })
        .map_err(classify)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(classify)?;

    rows.into_iter()
        .map(|(account_id, amount, kind)| Ok((account_id, str_to_kind(&kind)?.signed(str_to_decimal(&amount)?))))
        .collect()
}

fn draft_params(draft: &TransactionDraft) -> [Value; 6] {
    [
        Value::Integer(draft.account_id),
        draft.category_id.map_or(Value::Null, Value::Integer),
        Value::Text(format_date_time(draft.date)),
        draft.description.clone().map_or(Value::Null, Value::Text),
        Value::Text(draft.amount.to_string()),
        Value::Text(draft.kind.as_str().to_string()),
    ]
}

struct SqliteUnit<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl UnitOfWork for SqliteUnit<'_> {
    fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StorageError> {
        // BEGIN IMMEDIATE already holds the database write lock
        select_account(&self.conn, id)
    }

    fn category_exists(&mut self, id: CategoryId) -> Result<bool, StorageError> {
        self.conn
            .query_row("SELECT COUNT(*) > 0 FROM categories WHERE id = ?1", params![id], |row| row.get(0))
            .map_err(classify)
    }

    fn lock_transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>, StorageError> {
        self.conn
            .query_row(&format!("{} WHERE t.id = ?1", TRANSACTION_SELECT), params![id], read_transaction_row)
            .optional()
            .map_err(classify)?
            .map(into_transaction)
            .transpose()
    }

    fn insert_transaction(&mut self, draft: &TransactionDraft) -> Result<TransactionId, StorageError> {
        self.conn
            .execute(
                "INSERT INTO transactions (account_id, category_id, date, description, amount, kind)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params_from_iter(draft_params(draft)),
            )
            .map_err(classify)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_transaction(&mut self, id: TransactionId, draft: &TransactionDraft) -> Result<(), StorageError> {
        let mut args = draft_params(draft).to_vec();
        args.push(Value::Integer(id));
        let changed = self
            .conn
            .execute(
                "UPDATE transactions
                 SET account_id = ?1, category_id = ?2, date = ?3, description = ?4, amount = ?5, kind = ?6
                 WHERE id = ?7",
                params_from_iter(args),
            )
            .map_err(classify)?;
        if changed == 0 {
            return Err(StorageError::not_found("transaction", id));
        }
        Ok(())
    }

    fn delete_transaction(&mut self, id: TransactionId) -> Result<(), StorageError> {
        let changed = self
            .conn
            .execute("DELETE FROM transactions WHERE id = ?1", params![id])
            .map_err(classify)?;
        if changed == 0 {
            return Err(StorageError::not_found("transaction", id));
        }
        Ok(())
    }

    fn adjust_balance(&mut self, account_id: AccountId, delta: Decimal) -> Result<Decimal, StorageError> {
        let current: String = self
            .conn
            .query_row(
                "SELECT current_balance FROM accounts WHERE id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(classify)?
            .ok_or_else(|| StorageError::not_found("account", account_id))?;

        let balance = checked_add(str_to_decimal(&current)?, delta)?;
        self.conn
            .execute(
                "UPDATE accounts SET current_balance = ?1 WHERE id = ?2",
                params![balance.to_string(), account_id],
            )
            .map_err(classify)?;
        Ok(balance)
    }

    fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        // a failed COMMIT leaves the transaction open; Drop rolls it back
        self.conn.execute_batch("COMMIT").map_err(classify)?;
        self.finished = true;
        tracing::debug!("SQLite unit committed");
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK").map_err(classify)?;
        tracing::debug!("SQLite unit rolled back");
        Ok(())
    }
}

impl Drop for SqliteUnit<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.conn.execute_batch("ROLLBACK") {
            Ok(()) => tracing::debug!("SQLite unit dropped without commit, rolled back"),
            Err(e) => tracing::warn!(error = %e, "SQLite rollback on drop failed"),
        }
    }
}

impl StorageBackend for SqliteStorage {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StorageError> {
        let conn = self.conn();
        conn.execute_batch("BEGIN IMMEDIATE").map_err(classify)?;
        tracing::debug!("SQLite unit started");
        Ok(Box::new(SqliteUnit { conn, finished: false }))
    }

    fn create_account(&self, account: &NewAccount) -> Result<AccountId, StorageError> {
        let conn = self.conn();
        let opening = account.opening_balance.to_string();
        conn.execute(
            "INSERT INTO accounts (name, opening_balance, current_balance) VALUES (?1, ?2, ?2)",
            params![account.name, opening],
        )
        .map_err(|e| duplicate_as(e, || format!("account name '{}' already exists", account.name)))?;
        Ok(conn.last_insert_rowid())
    }

    fn rename_account(&self, id: AccountId, name: &str) -> Result<(), StorageError> {
        let conn = self.conn();
        let changed = conn
            .execute("UPDATE accounts SET name = ?1 WHERE id = ?2", params![name, id])
            .map_err(|e| duplicate_as(e, || format!("account name '{}' already exists", name)))?;
        if changed == 0 {
            return Err(StorageError::not_found("account", id));
        }
        Ok(())
    }

    fn delete_account(&self, id: AccountId) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(classify)?;

        let referenced: i64 = tx
            .query_row("SELECT COUNT(*) FROM transactions WHERE account_id = ?1", params![id], |row| row.get(0))
            .map_err(classify)?;
        if referenced > 0 {
            return Err(StorageError::StillReferenced("account still has transactions".to_string()));
        }

        let changed = tx
            .execute("DELETE FROM accounts WHERE id = ?1", params![id])
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
        select_account(&self.conn(), id)
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, name, opening_balance, current_balance FROM accounts ORDER BY name ASC")
            .map_err(classify)?;
        let rows = stmt
            .query_map([], read_account_row)
            .map_err(classify)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)?;
        rows.into_iter().map(into_account).collect()
    }

    fn total_balance(&self) -> Result<Decimal, StorageError> {
        checked_sum(self.list_accounts()?.iter().map(|a| a.current_balance))
    }

    fn create_category(&self, category: &NewCategory) -> Result<CategoryId, StorageError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO categories (name, kind) VALUES (?1, ?2)",
            params![category.name, category.kind.as_str()],
        )
        .map_err(|e| duplicate_as(e, || format!("{} category '{}' already exists", category.kind, category.name)))?;
        Ok(conn.last_insert_rowid())
    }

    fn update_category(&self, id: CategoryId, category: &NewCategory) -> Result<(), StorageError> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE categories SET name = ?1, kind = ?2 WHERE id = ?3",
                params![category.name, category.kind.as_str(), id],
            )
            .map_err(|e| duplicate_as(e, || format!("{} category '{}' already exists", category.kind, category.name)))?;
        if changed == 0 {
            return Err(StorageError::not_found("category", id));
        }
        Ok(())
    }

    fn delete_category(&self, id: CategoryId) -> Result<u64, StorageError> {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(classify)?;

        let detached = tx
            .execute("UPDATE transactions SET category_id = NULL WHERE category_id = ?1", params![id])
            .map_err(classify)?;
        let changed = tx
            .execute("DELETE FROM categories WHERE id = ?1", params![id])
            .map_err(classify)?;
        if changed == 0 {
            return Err(StorageError::not_found("category", id));
        }
        tx.commit().map_err(classify)?;
        Ok(detached as u64)
    }

    fn list_categories(&self, kind: Option<Kind>) -> Result<Vec<Category>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, kind FROM categories
                 WHERE ?1 IS NULL OR kind = ?1
                 ORDER BY name ASC",
            )
            .map_err(classify)?;
        let rows = stmt
            .query_map(params![kind.map(|k| k.as_str())], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })
            .map_err(classify)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)?;

        rows.into_iter()
            .map(|(id, name, kind)| Ok(Category { id, name, kind: str_to_kind(&kind)? }))
            .collect()
    }

    fn get_transaction(&self, id: TransactionId) -> Result<Option<TransactionView>, StorageError> {
        self.conn()
            .query_row(&format!("{} WHERE t.id = ?1", VIEW_SELECT), params![id], read_view_row)
            .optional()
            .map_err(classify)?
            .map(into_view)
            .transpose()
    }

    fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<TransactionView>, StorageError> {
        let mut conditions: Vec<String> = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        if let Some(account_id) = filter.account_id {
            conditions.push("t.account_id = ?".to_string());
            args.push(Value::Integer(account_id));
        }
        if let Some(lower) = filter.lower_bound() {
            conditions.push("t.date >= ?".to_string());
            args.push(Value::Text(format_date_time(lower)));
        }
        if let Some(upper) = filter.upper_bound() {
            conditions.push("t.date < ?".to_string());
            args.push(Value::Text(format_date_time(upper)));
        }
        if !filter.category_ids.is_empty() {
            let placeholders = vec!["?"; filter.category_ids.len()].join(", ");
            conditions.push(format!("t.category_id IN ({})", placeholders));
            args.extend(filter.category_ids.iter().map(|id| Value::Integer(*id)));
        }

        let mut query = VIEW_SELECT.to_string();
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query.push_str(" ORDER BY t.date DESC, t.id DESC");

        let conn = self.conn();
        let mut stmt = conn.prepare(&query).map_err(classify)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), read_view_row)
            .map_err(classify)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)?;
        rows.into_iter().map(into_view).collect()
    }

    fn balance_before(&self, account_id: AccountId, before: PrimitiveDateTime) -> Result<Decimal, StorageError> {
        let conn = self.conn();
        let account = select_account(&conn, account_id)?
            .ok_or_else(|| StorageError::not_found("account", account_id))?;
        let movement = checked_sum(
            signed_amounts(
                &conn,
                "SELECT account_id, amount, kind FROM transactions WHERE account_id = ?1 AND date < ?2",
                &[Value::Integer(account_id), Value::Text(format_date_time(before))],
            )?
            .into_iter()
            .map(|(_, signed)| signed),
        )?;
        checked_add(account.opening_balance, movement)
    }

    fn period_summary(&self, from: PrimitiveDateTime, until: PrimitiveDateTime) -> Result<PeriodSummary, StorageError> {
        let conn = self.conn();
        let mut summary = PeriodSummary::default();
        for (_, signed) in signed_amounts(
            &conn,
            "SELECT account_id, amount, kind FROM transactions WHERE date >= ?1 AND date < ?2",
            &[Value::Text(format_date_time(from)), Value::Text(format_date_time(until))],
        )? {
            if signed.is_sign_negative() {
                summary.expense = checked_add(summary.expense, -signed)?;
            } else {
                summary.income = checked_add(summary.income, signed)?;
            }
        }
        Ok(summary)
    }

    fn expense_by_category(&self, from: PrimitiveDateTime, until: PrimitiveDateTime) -> Result<Vec<CategoryTotal>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT c.name, t.amount
                 FROM transactions t
                 JOIN categories c ON c.id = t.category_id
                 WHERE t.kind = 'expense' AND t.date >= ?1 AND t.date < ?2",
            )
            .map_err(classify)?;
        let rows = stmt
            .query_map(params![format_date_time(from), format_date_time(until)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(classify)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)?;

        let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();
        for (name, amount) in rows {
            let total = totals.entry(name).or_insert(Decimal::ZERO);
            *total = checked_add(*total, str_to_decimal(&amount)?)?;
        }
        Ok(CategoryTotal::rank(totals))
    }

    fn balance_discrepancies(&self) -> Result<Vec<BalanceDiscrepancy>, StorageError> {
        let accounts = self.list_accounts()?;
        let conn = self.conn();
        let mut expected: BTreeMap<AccountId, Decimal> = accounts.iter().map(|a| (a.id, a.opening_balance)).collect();
        for (account_id, signed) in signed_amounts(&conn, "SELECT account_id, amount, kind FROM transactions", &[])? {
            let balance = expected.entry(account_id).or_insert(Decimal::ZERO);
            *balance = checked_add(*balance, signed)?;
        }

        Ok(accounts
            .into_iter()
            .filter_map(|a| {
                let expected_balance = expected.get(&a.id).copied().unwrap_or(a.opening_balance);
                (expected_balance != a.current_balance).then(|| BalanceDiscrepancy {
                    account_id: a.id,
                    account_name: a.name,
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
            date: datetime!(2023-01-01 10:00),
            description: Some("Groceries".to_string()),
            amount,
            kind,
        }
    }

    fn open_with_cash(opening: Decimal) -> (SqliteStorage, AccountId) {
        let storage = SqliteStorage::new(":memory:").unwrap();
        let id = storage
            .create_account(&NewAccount {
                name: "Cash".to_string(),
                opening_balance: opening,
            })
            .unwrap();
        (storage, id)
    }

    #[test]
    fn test_sqlite_basic_operations() {
        let (storage, cash) = open_with_cash(dec!(1000));

        let unit_result = {
            let mut unit = storage.begin().unwrap();
            let id = unit.insert_transaction(&draft(cash, dec!(200.50), Kind::Expense)).unwrap();
            let balance = unit.adjust_balance(cash, dec!(-200.50)).unwrap();
            unit.commit().unwrap();
            (id, balance)
        };
        assert_eq!(unit_result.1, dec!(799.50));

        let view = storage.get_transaction(unit_result.0).unwrap().unwrap();
        assert_eq!(view.account_name, "Cash");
        assert_eq!(view.amount, dec!(200.50));
        assert_eq!(view.kind, Kind::Expense);
        assert_eq!(view.date, datetime!(2023-01-01 10:00));

        let account = storage.get_account(cash).unwrap().unwrap();
        assert_eq!(account.opening_balance, dec!(1000));
        assert_eq!(account.current_balance, dec!(799.50));
        assert!(storage.balance_discrepancies().unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_transaction_rollback() {
        let (storage, cash) = open_with_cash(dec!(1000));

        let mut unit = storage.begin().unwrap();
        unit.insert_transaction(&draft(cash, dec!(500), Kind::Income)).unwrap();
        unit.adjust_balance(cash, dec!(500)).unwrap();
        unit.rollback().unwrap();

        assert_eq!(storage.get_account(cash).unwrap().unwrap().current_balance, dec!(1000));
        assert!(storage.list_transactions(&TransactionFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_failed_balance_write_leaves_no_row() {
        let (storage, cash) = open_with_cash(dec!(1000));
        storage
            .conn()
            .execute_batch(
                "CREATE TRIGGER refuse_balance BEFORE UPDATE OF current_balance ON accounts
                 BEGIN SELECT RAISE(ABORT, 'balance write refused'); END;",
            )
            .unwrap();

        {
            let mut unit = storage.begin().unwrap();
            unit.insert_transaction(&draft(cash, dec!(100), Kind::Expense)).unwrap();
            assert!(unit.adjust_balance(cash, dec!(-100)).is_err());
            // dropped here without commit
        }

        assert!(storage.list_transactions(&TransactionFilter::default()).unwrap().is_empty());
        // the connection is usable again after the implicit rollback
        assert!(storage.begin().is_ok());
    }

    #[test]
    fn test_sqlite_classifies_constraint_errors() {
        let (storage, cash) = open_with_cash(dec!(0));
        let err = storage
            .create_account(&NewAccount {
                name: "Cash".to_string(),
                opening_balance: dec!(0),
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(ref m) if m == "account name 'Cash' already exists"));

        let mut unit = storage.begin().unwrap();
        let err = unit.insert_transaction(&draft(cash + 99, dec!(1), Kind::Income)).unwrap_err();
        assert!(matches!(err, StorageError::ForeignKey(_)), "got {:?}", err);
    }

    #[test]
    fn test_sqlite_delete_account_rejected_while_referenced() {
        let (storage, cash) = open_with_cash(dec!(10));
        let mut unit = storage.begin().unwrap();
        let id = unit.insert_transaction(&draft(cash, dec!(1), Kind::Income)).unwrap();
        unit.adjust_balance(cash, dec!(1)).unwrap();
        unit.commit().unwrap();

        let err = storage.delete_account(cash).unwrap_err();
        assert!(matches!(err, StorageError::StillReferenced(_)));

        let mut unit = storage.begin().unwrap();
        unit.delete_transaction(id).unwrap();
        unit.adjust_balance(cash, dec!(-1)).unwrap();
        unit.commit().unwrap();

        storage.delete_account(cash).unwrap();
        assert!(matches!(storage.delete_account(cash), Err(StorageError::NotFound { .. })));
    }

    #[test]
    fn test_sqlite_list_filters() {
        let (storage, cash) = open_with_cash(dec!(0));
        let food = storage
            .create_category(&NewCategory { name: "Food".to_string(), kind: Kind::Expense })
            .unwrap();
        let rent = storage
            .create_category(&NewCategory { name: "Rent".to_string(), kind: Kind::Expense })
            .unwrap();

        let mut unit = storage.begin().unwrap();
        for (date, category) in [
            (datetime!(2023-01-31 23:59:59), Some(food)),
            (datetime!(2023-02-01 00:00), Some(rent)),
            (datetime!(2023-01-15 12:00), None),
        ] {
            let mut d = draft(cash, dec!(10), Kind::Expense);
            d.date = date;
            d.category_id = category;
            unit.insert_transaction(&d).unwrap();
            unit.adjust_balance(cash, dec!(-10)).unwrap();
        }
        unit.commit().unwrap();

        let january = TransactionFilter {
            from: Some(time::macros::date!(2023-01-01)),
            to: Some(time::macros::date!(2023-01-31)),
            ..Default::default()
        };
        let txs = storage.list_transactions(&january).unwrap();
        assert_eq!(txs.len(), 2);
        // newest first
        assert_eq!(txs[0].date, datetime!(2023-01-31 23:59:59));

        let by_category = TransactionFilter {
            category_ids: vec![food, rent],
            ..Default::default()
        };
        assert_eq!(storage.list_transactions(&by_category).unwrap().len(), 2);

        let totals = storage
            .expense_by_category(datetime!(2023-01-01 0:00), datetime!(2023-03-01 0:00))
            .unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(storage.balance_before(cash, datetime!(2023-02-01 0:00)).unwrap(), dec!(-20));
    }

    #[test]
    fn test_sqlite_file_reopen_keeps_data() {
        let path = std::env::temp_dir().join(format!("dompet-sqlite-test-{}.db", std::process::id()));
        let path_str = path.to_string_lossy().to_string();
        {
            let storage = SqliteStorage::new(&path_str).unwrap();
            storage
                .create_account(&NewAccount { name: "Bank".to_string(), opening_balance: dec!(42) })
                .unwrap();
        }
        {
            let storage = SqliteStorage::new(&path_str).unwrap();
            let accounts = storage.list_accounts().unwrap();
            assert_eq!(accounts.len(), 1);
            assert_eq!(accounts[0].current_balance, dec!(42));
        }
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path_str, suffix));
        }
    }
}
