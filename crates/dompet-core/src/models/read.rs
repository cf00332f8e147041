use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;
use time::{Date, PrimitiveDateTime, Time};

use super::{AccountId, CategoryId};

/// Filters for transaction listings. Both date bounds are whole days and
/// inclusive; `to` covers the entire day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    pub account_id: Option<AccountId>,
    pub from: Option<Date>,
    pub to: Option<Date>,
    pub category_ids: Vec<CategoryId>,
}

impl TransactionFilter {
    pub fn for_account(account_id: AccountId) -> Self {
        Self {
            account_id: Some(account_id),
            ..Default::default()
        }
    }

    /// Inclusive lower bound on the transaction timestamp.
    pub fn lower_bound(&self) -> Option<PrimitiveDateTime> {
        self.from.map(|d| PrimitiveDateTime::new(d, Time::MIDNIGHT))
    }

    /// Exclusive upper bound: midnight after the `to` day. `None` when the
    /// filter is open-ended or `to` is the last representable day.
    pub fn upper_bound(&self) -> Option<PrimitiveDateTime> {
        self.to
            .and_then(|d| d.next_day())
            .map(|d| PrimitiveDateTime::new(d, Time::MIDNIGHT))
    }

    pub fn matches(&self, account_id: AccountId, category_id: Option<CategoryId>, date: PrimitiveDateTime) -> bool {
        if let Some(a) = self.account_id {
            if a != account_id {
                return false;
            }
        }
        if let Some(lo) = self.lower_bound() {
            if date < lo {
                return false;
            }
        }
        if let Some(hi) = self.upper_bound() {
            if date >= hi {
                return false;
            }
        }
        if !self.category_ids.is_empty() {
            match category_id {
                Some(c) if self.category_ids.contains(&c) => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub income: Decimal,
    pub expense: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTotal {
    pub category_name: String,
    pub total: Decimal,
}

impl CategoryTotal {
    /// Drops zero totals and orders by total descending, then name.
    pub fn rank(totals: BTreeMap<String, Decimal>) -> Vec<CategoryTotal> {
        let mut ranked: Vec<CategoryTotal> = totals
            .into_iter()
            .filter(|(_, total)| *total > Decimal::ZERO)
            .map(|(category_name, total)| CategoryTotal { category_name, total })
            .collect();
        ranked.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.category_name.cmp(&b.category_name)));
        ranked
    }
}

/// An account whose stored balance disagrees with its transaction history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceDiscrepancy {
    pub account_id: AccountId,
    pub account_name: String,
    pub current_balance: Decimal,
    pub expected_balance: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::{date, datetime};

    #[test]
    fn test_filter_end_date_covers_whole_day() {
        let filter = TransactionFilter {
            from: Some(date!(2024-01-01)),
            to: Some(date!(2024-01-31)),
            ..Default::default()
        };
        assert!(filter.matches(1, None, datetime!(2024-01-01 0:00)));
        assert!(filter.matches(1, None, datetime!(2024-01-31 23:59:59)));
        assert!(!filter.matches(1, None, datetime!(2024-02-01 0:00)));
        assert!(!filter.matches(1, None, datetime!(2023-12-31 23:59:59)));
    }

    #[test]
    fn test_filter_categories_exclude_uncategorized() {
        let filter = TransactionFilter {
            category_ids: vec![2, 3],
            ..Default::default()
        };
        assert!(filter.matches(1, Some(3), datetime!(2024-01-01 0:00)));
        assert!(!filter.matches(1, Some(1), datetime!(2024-01-01 0:00)));
        assert!(!filter.matches(1, None, datetime!(2024-01-01 0:00)));
    }

    #[test]
    fn test_rank_category_totals() {
        let mut totals = BTreeMap::new();
        totals.insert("Food".to_string(), dec!(120));
        totals.insert("Rent".to_string(), dec!(900));
        totals.insert("Fun".to_string(), dec!(0));
        totals.insert("Bills".to_string(), dec!(120));

        let ranked = CategoryTotal::rank(totals);
        let names: Vec<&str> = ranked.iter().map(|c| c.category_name.as_str()).collect();
        assert_eq!(names, vec!["Rent", "Bills", "Food"]);
    }
}
