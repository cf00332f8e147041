use std::{fmt::Display, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{
    format_description::well_known::Rfc3339,
    macros::format_description,
    OffsetDateTime, PrimitiveDateTime, Time,
};

pub mod write;
pub mod read;

pub type AccountId = i64;
pub type CategoryId = i64;
pub type TransactionId = i64;

time::serde::format_description!(
    sql_datetime,
    PrimitiveDateTime,
    "[year]-[month]-[day] [hour]:[minute]:[second]"
);

/// Direction of a money movement. Income raises the account balance,
/// expense lowers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    #[serde(alias = "pemasukan")]
    Income,
    #[serde(alias = "pengeluaran")]
    Expense,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Income => "income",
            Kind::Expense => "expense",
        }
    }

    /// Signed balance effect of moving `amount` in this direction.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            Kind::Income => amount,
            Kind::Expense => -amount,
        }
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid kind '{0}', expected income or expense")]
pub struct ParseKindError(pub String);

impl FromStr for Kind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "income" | "pemasukan" => Ok(Kind::Income),
            "expense" | "pengeluaran" => Ok(Kind::Expense),
            _ => Err(ParseKindError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub opening_balance: Decimal,
    pub current_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    #[serde(rename = "tipe")]
    pub kind: Kind,
}

/// A stored transaction row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub category_id: Option<CategoryId>,
    #[serde(with = "sql_datetime")]
    pub date: PrimitiveDateTime,
    pub description: Option<String>,
    pub amount: Decimal,
    pub kind: Kind,
}

impl Transaction {
    /// The balance effect this row had when it was written.
    pub fn delta(&self) -> Decimal {
        self.kind.signed(self.amount)
    }
}

/// A transaction joined with the display names of its account and category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionView {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub account_name: String,
    pub category_id: Option<CategoryId>,
    pub category_name: Option<String>,
    #[serde(with = "sql_datetime")]
    pub date: PrimitiveDateTime,
    pub description: Option<String>,
    pub amount: Decimal,
    pub kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid date '{0}', expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS")]
pub struct ParseDateTimeError(pub String);

/// Parses the date formats accepted on input. A bare date means midnight;
/// an RFC 3339 timestamp with an offset is converted to UTC.
pub fn parse_date_time(s: &str) -> Result<PrimitiveDateTime, ParseDateTimeError> {
    let s = s.trim();
    let err = || ParseDateTimeError(s.to_string());

    if let Ok(dt) = PrimitiveDateTime::parse(s, format_description!("[year]-[month]-[day] [hour]:[minute]:[second]")) {
        return Ok(dt);
    }
    if let Ok(dt) = PrimitiveDateTime::parse(s, format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]")) {
        return Ok(dt);
    }
    if let Ok(d) = time::Date::parse(s, format_description!("[year]-[month]-[day]")) {
        return Ok(PrimitiveDateTime::new(d, Time::MIDNIGHT));
    }
    let odt = OffsetDateTime::parse(s, &Rfc3339).map_err(|_| err())?;
    let utc = odt.to_offset(time::UtcOffset::UTC);
    // second precision is all the stores keep
    let time = utc.time().replace_nanosecond(0).map_err(|_| err())?;
    Ok(PrimitiveDateTime::new(utc.date(), time))
}

/// Canonical text form used by the SQL backends; sorts chronologically.
pub fn format_date_time(dt: PrimitiveDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        dt.year(),
        dt.month() as u8,
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    #[test]
    fn test_kind_sign() {
        assert_eq!(Kind::Income.signed(dec!(50)), dec!(50));
        assert_eq!(Kind::Expense.signed(dec!(50)), dec!(-50));
    }

    #[test]
    fn test_kind_accepts_original_spellings() {
        assert_eq!("pemasukan".parse::<Kind>().unwrap(), Kind::Income);
        assert_eq!(" Pengeluaran ".parse::<Kind>().unwrap(), Kind::Expense);
        assert_eq!("EXPENSE".parse::<Kind>().unwrap(), Kind::Expense);
        assert!("transfer".parse::<Kind>().is_err());
    }

    #[test]
    fn test_parse_date_time_formats() {
        assert_eq!(parse_date_time("2024-03-05").unwrap(), datetime!(2024-03-05 0:00));
        assert_eq!(parse_date_time("2024-03-05 13:14:15").unwrap(), datetime!(2024-03-05 13:14:15));
        assert_eq!(parse_date_time("2024-03-05T13:14:15").unwrap(), datetime!(2024-03-05 13:14:15));
        assert_eq!(parse_date_time("2024-03-05T13:14:15.250+07:00").unwrap(), datetime!(2024-03-05 06:14:15));
        assert!(parse_date_time("05/03/2024").is_err());
        assert!(parse_date_time("").is_err());
    }

    #[test]
    fn test_format_date_time_sorts_lexically() {
        let a = format_date_time(datetime!(2023-12-31 23:59:59));
        let b = format_date_time(datetime!(2024-01-01 0:00));
        assert_eq!(a, "2023-12-31 23:59:59");
        assert!(a < b);
    }

    #[test]
    fn test_transaction_delta() {
        let tx = Transaction {
            id: 1,
            account_id: 1,
            category_id: None,
            date: datetime!(2024-01-01 0:00),
            description: None,
            amount: dec!(12.50),
            kind: Kind::Expense,
        };
        assert_eq!(tx.delta(), dec!(-12.50));
    }
}
