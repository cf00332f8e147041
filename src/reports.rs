//! Read-only aggregations over the transaction history.

use dompet_core::{
    models::read::{CategoryTotal, PeriodSummary},
    AccountId,
};
use rust_decimal::Decimal;
use time::{Date, Month, PrimitiveDateTime, Time};

use crate::{error::LedgerError, ledger::Ledger};

/// Half-open bounds `[start, end)` of the calendar month containing `day`.
pub fn month_bounds(day: Date) -> Result<(PrimitiveDateTime, PrimitiveDateTime), LedgerError> {
    let start = Date::from_calendar_date(day.year(), day.month(), 1)
        .map_err(|e| LedgerError::Unexpected(e.to_string()))?;
    let (next_year, next_month) = match day.month() {
        Month::December => (day.year() + 1, Month::January),
        m => (day.year(), m.next()),
    };
    let end = Date::from_calendar_date(next_year, next_month, 1)
        .map_err(|e| LedgerError::Unexpected(e.to_string()))?;
    Ok((
        PrimitiveDateTime::new(start, Time::MIDNIGHT),
        PrimitiveDateTime::new(end, Time::MIDNIGHT),
    ))
}

impl Ledger {
    /// Income and expense totals for the month containing `today`.
    pub fn monthly_summary(&self, today: Date) -> Result<PeriodSummary, LedgerError> {
        let (from, until) = month_bounds(today)?;
        Ok(self.storage().period_summary(from, until)?)
    }

    /// Expense totals per category for the month containing `today`, largest
    /// first. Uncategorized expenses and zero totals are left out.
    pub fn expense_by_category(&self, today: Date) -> Result<Vec<CategoryTotal>, LedgerError> {
        let (from, until) = month_bounds(today)?;
        Ok(self.storage().expense_by_category(from, until)?)
    }

    /// Balance of the account just before `at`: its opening balance plus
    /// every transaction dated strictly earlier.
    pub fn opening_balance_at(&self, account_id: AccountId, at: PrimitiveDateTime) -> Result<Decimal, LedgerError> {
        if account_id <= 0 {
            return Err(LedgerError::validation("akunId must be a positive integer"));
        }
        Ok(self.storage().balance_before(account_id, at)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use dompet_core::{models::write::TransactionDraft, Kind};
    use dompet_memory::InMemoryStorage;
    use rust_decimal_macros::dec;
    use time::macros::{date, datetime};

    #[test]
    fn test_month_bounds() {
        assert_eq!(
            month_bounds(date!(2024-02-29)).unwrap(),
            (datetime!(2024-02-01 0:00), datetime!(2024-03-01 0:00))
        );
        assert_eq!(
            month_bounds(date!(2023-12-01)).unwrap(),
            (datetime!(2023-12-01 0:00), datetime!(2024-01-01 0:00))
        );
    }

    fn tx(account_id: AccountId, category_id: Option<i64>, date: PrimitiveDateTime, amount: Decimal, kind: Kind) -> TransactionDraft {
        TransactionDraft {
            account_id,
            category_id,
            date,
            description: None,
            amount,
            kind,
        }
    }

    #[test]
    fn test_reports_over_month() {
        let ledger = Ledger::new(Arc::new(InMemoryStorage::new()));
        let cash = ledger.create_account("Cash", Some(dec!(1000))).unwrap();
        let food = ledger.create_category("Food", Kind::Expense).unwrap();
        let rent = ledger.create_category("Rent", Kind::Expense).unwrap();
        let salary = ledger.create_category("Salary", Kind::Income).unwrap();

        for draft in [
            tx(cash, Some(salary), datetime!(2024-03-01 9:00), dec!(3000), Kind::Income),
            tx(cash, Some(rent), datetime!(2024-03-02 9:00), dec!(1200), Kind::Expense),
            tx(cash, Some(food), datetime!(2024-03-10 12:00), dec!(45.50), Kind::Expense),
            tx(cash, Some(food), datetime!(2024-03-31 23:59:59), dec!(4.50), Kind::Expense),
            tx(cash, None, datetime!(2024-03-15 12:00), dec!(10), Kind::Expense),
            // previous month, outside the window
            tx(cash, Some(food), datetime!(2024-02-29 20:00), dec!(99), Kind::Expense),
        ] {
            ledger.create_transaction(&draft).unwrap();
        }

        let summary = ledger.monthly_summary(date!(2024-03-18)).unwrap();
        assert_eq!(summary.income, dec!(3000));
        assert_eq!(summary.expense, dec!(1260));

        let by_category = ledger.expense_by_category(date!(2024-03-18)).unwrap();
        assert_eq!(by_category.len(), 2);
        assert_eq!(by_category[0].category_name, "Rent");
        assert_eq!(by_category[1].category_name, "Food");
        assert_eq!(by_category[1].total, dec!(50));

        assert_eq!(ledger.opening_balance_at(cash, datetime!(2024-03-01 0:00)).unwrap(), dec!(901));
        assert_eq!(ledger.opening_balance_at(cash, datetime!(2024-03-02 0:00)).unwrap(), dec!(3901));
        assert!(matches!(
            ledger.opening_balance_at(cash + 1, datetime!(2024-03-01 0:00)),
            Err(LedgerError::NotFound(_))
        ));
    }
}
