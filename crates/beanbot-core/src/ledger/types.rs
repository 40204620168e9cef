use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

/// The five beancount account roots.
pub const ROOT_ACCOUNTS: [&str; 5] = ["Assets", "Liabilities", "Equity", "Income", "Expenses"];

/// Residual per currency below this is treated as balanced (rounding slack).
pub fn balance_tolerance() -> Decimal {
    Decimal::new(5, 3) // 0.005
}

/// A signed quantity of one commodity, e.g. `-5.40 USD`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Amount {
    pub number: Decimal,
    pub currency: String,
}

impl Amount {
    pub fn new(number: Decimal, currency: impl Into<String>) -> Self {
        Self {
            number,
            currency: currency.into(),
        }
    }

    /// Parse `"-5.40 USD"`. Thousands separators are tolerated.
    pub fn parse(s: &str) -> Option<Amount> {
        let mut parts = s.split_whitespace();
        let number_raw = parts.next()?.replace(',', "");
        let currency = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        let number = Decimal::from_str(&number_raw).ok()?;
        if !is_currency(currency) {
            return None;
        }
        Some(Amount::new(number, currency))
    }

    pub fn negated(&self) -> Amount {
        Amount::new(-self.number, self.currency.clone())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.number, self.currency)
    }
}

/// Commodity symbols are all-caps alphanumerics starting with a letter.
pub fn is_currency(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '.' || c == '-')
}

/// A colon-separated account name rooted at one of [`ROOT_ACCOUNTS`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Account(pub String);

impl Account {
    pub fn parse(s: &str) -> Option<Account> {
        let mut segments = s.split(':');
        let root = segments.next()?;
        if !ROOT_ACCOUNTS.contains(&root) {
            return None;
        }
        let mut seen_child = false;
        for seg in segments {
            seen_child = true;
            let mut chars = seg.chars();
            match chars.next() {
                Some(c) if c.is_ascii_uppercase() || c.is_ascii_digit() => {}
                _ => return None,
            }
            if !seg
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            {
                return None;
            }
        }
        if !seen_child {
            return None;
        }
        Some(Account(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn root(&self) -> &str {
        self.0.split(':').next().unwrap_or("")
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One leg of a transaction. `amount == None` is an elided (auto-balancing)
/// posting; `priced` marks postings carrying `@`/`{}` annotations, which the
/// subset does not balance-check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Posting {
    pub account: Account,
    pub amount: Option<Amount>,
    pub priced: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub date: NaiveDate,
    pub flag: char,
    pub payee: Option<String>,
    pub narration: String,
    pub postings: Vec<Posting>,
}

impl Transaction {
    pub fn elided_count(&self) -> usize {
        self.postings.iter().filter(|p| p.amount.is_none()).count()
    }

    pub fn has_priced_posting(&self) -> bool {
        self.postings.iter().any(|p| p.priced)
    }

    /// Per-currency sum of the explicit postings, zero entries dropped.
    pub fn residual(&self) -> Vec<Amount> {
        let mut sums: Vec<Amount> = Vec::new();
        for p in &self.postings {
            let Some(amount) = &p.amount else { continue };
            match sums.iter_mut().find(|a| a.currency == amount.currency) {
                Some(existing) => existing.number += amount.number,
                None => sums.push(amount.clone()),
            }
        }
        sums.retain(|a| !a.number.is_zero());
        sums
    }
}

/// Top-level ledger directives the subset models. `Raw` carries lines the
/// parser recognizes as directives but does not interpret (price, note,
/// include, ...).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    Open { date: NaiveDate, account: Account },
    Close { date: NaiveDate, account: Account },
    Option { name: String, value: String },
    Commodity { date: NaiveDate, currency: String },
    Balance { date: NaiveDate, account: Account, amount: Amount },
    Txn(Transaction),
    Raw(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_parses_sign_and_separators() {
        let a = Amount::parse("-1,234.50 USD").unwrap();
        assert_eq!(a.number, Decimal::from_str("-1234.50").unwrap());
        assert_eq!(a.currency, "USD");
        assert_eq!(a.negated().number, Decimal::from_str("1234.50").unwrap());
    }

    #[test]
    fn amount_rejects_garbage() {
        assert!(Amount::parse("USD").is_none());
        assert!(Amount::parse("5 usd").is_none());
        assert!(Amount::parse("5 USD extra").is_none());
    }

    #[test]
    fn account_requires_known_root_and_child() {
        assert!(Account::parse("Assets:Bank:Checking").is_some());
        assert!(Account::parse("Expenses:Food").is_some());
        assert!(Account::parse("Assets").is_none());
        assert!(Account::parse("Wallet:Cash").is_none());
        assert!(Account::parse("Assets:lowercase").is_none());
    }

    #[test]
    fn residual_groups_by_currency() {
        let txn = Transaction {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            flag: '*',
            payee: None,
            narration: "x".into(),
            postings: vec![
                Posting {
                    account: Account::parse("Assets:Cash").unwrap(),
                    amount: Some(Amount::parse("-5 USD").unwrap()),
                    priced: false,
                },
                Posting {
                    account: Account::parse("Expenses:Food").unwrap(),
                    amount: Some(Amount::parse("5 USD").unwrap()),
                    priced: false,
                },
                Posting {
                    account: Account::parse("Expenses:Food").unwrap(),
                    amount: Some(Amount::parse("2 EUR").unwrap()),
                    priced: false,
                },
            ],
        };
        let residual = txn.residual();
        assert_eq!(residual.len(), 1);
        assert_eq!(residual[0], Amount::parse("2 EUR").unwrap());
    }
}
