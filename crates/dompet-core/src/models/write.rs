use rust_decimal::Decimal;
use time::PrimitiveDateTime;

use super::{AccountId, CategoryId, Kind};

#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub name: String,
    pub opening_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCategory {
    pub name: String,
    pub kind: Kind,
}

/// The complete set of caller-supplied fields of a transaction, used both
/// for create and for full replacement on update.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDraft {
    pub account_id: AccountId,
    pub category_id: Option<CategoryId>,
    pub date: PrimitiveDateTime,
    pub description: Option<String>,
    pub amount: Decimal,
    pub kind: Kind,
}

impl TransactionDraft {
    pub fn delta(&self) -> Decimal {
        self.kind.signed(self.amount)
    }
}
