use std::path::Path;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    domain::UserId,
    errors::Error,
    ledger::{types::Account, LedgerStore},
    Result,
};

/// Instructions for the extraction model. `{reference_year}` fills the year
/// assumed for dates the statement prints without one.
pub const EXTRACTION_PROMPT_TEMPLATE: &str = "You are a financial extraction engine. \
Extract statement information from the provided document, determine which ledger account the \
statement belongs to, and classify each transaction. Always return valid JSON that matches the \
supplied schema. For every transaction emit exactly these keys and nothing else: date, \
description, amount, debit, credit. amount must be signed relative to the statement ledger: \
positive amounts indicate money entering the ledger account, negative amounts indicate money \
leaving it. When amount < 0, set `debit` to the ledger account itself and `credit` to the \
counterparty account (e.g. an expense). When amount > 0, set `credit` to the ledger account \
itself and `debit` to the counterparty account (e.g. income or transfers). Output entries so \
the newest transaction appears first and the oldest last. If any transaction date is missing a \
year, assume the year is {reference_year} and keep the given month/day. YOU MAY ONLY USE \
ACCOUNT NAMES FROM THE ALLOWED LIST BELOW.";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatementPeriod {
    pub start_date: String,
    pub end_date: String,
}

/// One statement row as the model reports it. `amount` is signed relative
/// to the ledger account; `debit`/`credit` name the two legs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatementRow {
    pub date: String,
    pub description: String,
    pub amount: f64,
    pub debit: String,
    pub credit: String,
}

impl StatementRow {
    /// Exact amount via the shortest decimal representation of the float.
    pub fn amount_decimal(&self) -> Decimal {
        Decimal::from_str(&self.amount.to_string()).unwrap_or_default()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BankStatement {
    pub institution: String,
    pub account_holder: String,
    pub account_number: String,
    pub currency: String,
    /// The beancount account this statement posts to.
    pub ledger_account: String,
    pub statement_period: StatementPeriod,
    pub opening_balance: f64,
    pub closing_balance: f64,
    pub transactions: Vec<StatementRow>,
}

impl BankStatement {
    /// Reject statements that stray outside the user's accounts or whose
    /// debit/credit orientation contradicts the amount sign.
    pub fn validate(&self, allowed_accounts: &[String]) -> Result<()> {
        let allowed: Vec<&str> = allowed_accounts.iter().map(|s| s.trim()).collect();
        let ledger = self.ledger_account.trim();
        let mut missing: Vec<String> = Vec::new();
        let note_missing = |name: &str, missing: &mut Vec<String>| {
            if !allowed.contains(&name) && !missing.iter().any(|m| m == name) {
                missing.push(name.to_string());
            }
        };

        note_missing(ledger, &mut missing);
        for row in &self.transactions {
            let debit = row.debit.trim();
            let credit = row.credit.trim();
            let amount = row.amount_decimal();
            note_missing(debit, &mut missing);
            note_missing(credit, &mut missing);
            if amount < Decimal::ZERO && debit != ledger {
                return Err(Error::LedgerValidation(format!(
                    "transaction on {} should debit {ledger} because the amount is negative, got {debit}",
                    row.date
                )));
            }
            if amount > Decimal::ZERO && credit != ledger {
                return Err(Error::LedgerValidation(format!(
                    "transaction on {} should credit {ledger} because the amount is positive, got {credit}",
                    row.date
                )));
            }
        }
        if !missing.is_empty() {
            missing.sort();
            return Err(Error::LedgerValidation(format!(
                "model produced account names not present in the ledger: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

/// Statement rows rendered to ledger entries, with a skip count for
/// duplicates and zero-amount rows.
#[derive(Clone, Debug, Default)]
pub struct RenderedImport {
    pub entries: Vec<String>,
    pub new_count: usize,
    pub skipped: usize,
}

/// Turn a validated statement into ledger entries, skipping rows whose
/// (date, amount) already exists on the ledger account. The first element
/// of `entries` is the import heading comment.
pub fn generate_statement_entries(
    store: &LedgerStore,
    user: UserId,
    statement: &BankStatement,
    source: &Path,
    now: NaiveDateTime,
) -> Result<RenderedImport> {
    let ledger_account = statement.ledger_account.trim().to_string();
    let ledger_parsed = Account::parse(&ledger_account).ok_or_else(|| {
        Error::LedgerValidation(format!("bad ledger account name: {ledger_account}"))
    })?;
    let history = store.history_records(user)?;

    let mut out = RenderedImport::default();
    for row in &statement.transactions {
        let amount = row.amount_decimal();
        if amount.is_zero() {
            out.skipped += 1;
            continue;
        }

        let mut counter = resolve_counter_account(&ledger_account, row)?;
        if let Some(suggested) =
            store.suggest_counter_account(&row.description, &ledger_account, &history)
        {
            if suggested != counter && suggested != ledger_account {
                counter = suggested;
            }
        }

        let date = NaiveDate::parse_from_str(row.date.trim(), "%Y-%m-%d").ok();
        if store.posting_exists(
            user,
            &ledger_parsed,
            amount,
            Some(statement.currency.as_str()),
            date,
        )? {
            out.skipped += 1;
            continue;
        }

        out.entries
            .push(render_entry(statement, row, &ledger_account, &counter));
        out.new_count += 1;
    }

    if out.entries.is_empty() {
        out.new_count = 0;
        return Ok(out);
    }
    out.entries.insert(0, render_heading(source, now));
    Ok(out)
}

fn resolve_counter_account(ledger_account: &str, row: &StatementRow) -> Result<String> {
    let debit = row.debit.trim();
    let credit = row.credit.trim();
    let counter = if row.amount_decimal() < Decimal::ZERO {
        if !credit.is_empty() && credit != ledger_account {
            credit
        } else {
            debit
        }
    } else if !debit.is_empty() && debit != ledger_account {
        debit
    } else {
        credit
    };
    if counter.is_empty() || counter == ledger_account {
        return Err(Error::LedgerValidation(
            "model did not supply a counter account distinct from the ledger account".to_string(),
        ));
    }
    Ok(counter.to_string())
}

fn render_entry(
    statement: &BankStatement,
    row: &StatementRow,
    ledger_account: &str,
    counter_account: &str,
) -> String {
    let ledger_amount = row.amount_decimal();
    let counter_amount = -ledger_amount;
    let description = sanitize_description(&row.description);
    let currency = &statement.currency;
    format!(
        "{} * \"{}\"\n  {}  {} {}\n  {}  {} {}",
        row.date.trim(),
        description,
        ledger_account,
        format_decimal(ledger_amount),
        currency,
        counter_account,
        format_decimal(counter_amount),
        currency,
    )
}

fn format_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

fn sanitize_description(description: &str) -> String {
    description.replace('\n', " ").trim().replace('"', "'")
}

fn render_heading(source: &Path, now: NaiveDateTime) -> String {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| source.display().to_string());
    format!(
        "; =========== import {name} at {} ===========",
        now.format("%Y-%m-%d %H:%M:%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn statement(rows: Vec<StatementRow>) -> BankStatement {
        BankStatement {
            institution: "Kaspi".into(),
            account_holder: "User".into(),
            account_number: "KZ01".into(),
            currency: "USD".into(),
            ledger_account: "Assets:Bank:Checking".into(),
            statement_period: StatementPeriod {
                start_date: "2024-01-01".into(),
                end_date: "2024-01-31".into(),
            },
            opening_balance: 100.0,
            closing_balance: 95.0,
            transactions: rows,
        }
    }

    fn spend_row(date: &str, amount: f64) -> StatementRow {
        StatementRow {
            date: date.into(),
            description: "Coffee \"Shop\"".into(),
            amount,
            debit: "Assets:Bank:Checking".into(),
            credit: "Expenses:Food".into(),
        }
    }

    fn allowed() -> Vec<String> {
        vec!["Assets:Bank:Checking".into(), "Expenses:Food".into()]
    }

    fn tmp_store(prefix: &str) -> LedgerStore {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis();
        let dir = std::env::temp_dir().join(format!(
            "beanbot-stmt-{prefix}-{}-{}",
            std::process::id(),
            millis
        ));
        std::fs::create_dir_all(&dir).unwrap();
        LedgerStore::new(dir)
    }

    const USER: UserId = UserId(7);

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn validate_accepts_consistent_statement() {
        assert!(statement(vec![spend_row("2024-01-10", -5.0)])
            .validate(&allowed())
            .is_ok());
    }

    #[test]
    fn validate_rejects_unknown_account() {
        let mut s = statement(vec![spend_row("2024-01-10", -5.0)]);
        s.transactions[0].credit = "Expenses:Unknown".into();
        let err = s.validate(&allowed()).unwrap_err();
        assert!(err.to_string().contains("Expenses:Unknown"));
    }

    #[test]
    fn validate_rejects_wrong_orientation() {
        let mut s = statement(vec![spend_row("2024-01-10", 5.0)]);
        // Positive amount must credit the ledger account.
        s.transactions[0].credit = "Expenses:Food".into();
        s.transactions[0].debit = "Assets:Bank:Checking".into();
        let err = s.validate(&allowed()).unwrap_err();
        assert!(err.to_string().contains("should credit"));
    }

    #[test]
    fn generate_renders_heading_and_balanced_pair() {
        let store = tmp_store("render");
        let s = statement(vec![spend_row("2024-01-10", -5.5)]);
        let import = generate_statement_entries(
            &store,
            USER,
            &s,
            &PathBuf::from("/tmp/jan.pdf"),
            noon(),
        )
        .unwrap();
        assert_eq!(import.new_count, 1);
        assert_eq!(
            import.entries[0],
            "; =========== import jan.pdf at 2024-02-01 12:00:00 ==========="
        );
        assert_eq!(
            import.entries[1],
            "2024-01-10 * \"Coffee 'Shop'\"\n  Assets:Bank:Checking  -5.5 USD\n  Expenses:Food  5.5 USD"
        );
    }

    #[test]
    fn generate_skips_zero_and_duplicate_rows() {
        let store = tmp_store("skip");
        store
            .append_entries(
                USER,
                &["2024-01-10 * \"Coffee\"\n  Assets:Bank:Checking -5.5 USD\n  Expenses:Food 5.5 USD"
                    .to_string()],
            )
            .unwrap();
        let s = statement(vec![
            spend_row("2024-01-10", -5.5),
            spend_row("2024-01-11", 0.0),
            spend_row("2024-01-12", -7.0),
        ]);
        let import =
            generate_statement_entries(&store, USER, &s, &PathBuf::from("jan.pdf"), noon())
                .unwrap();
        assert_eq!(import.new_count, 1);
        assert_eq!(import.skipped, 2);
        assert!(import.entries[1].contains("2024-01-12"));
    }

    #[test]
    fn generate_with_nothing_new_returns_no_heading() {
        let store = tmp_store("empty");
        let s = statement(vec![spend_row("2024-01-11", 0.0)]);
        let import =
            generate_statement_entries(&store, USER, &s, &PathBuf::from("jan.pdf"), noon())
                .unwrap();
        assert!(import.entries.is_empty());
        assert_eq!(import.new_count, 0);
        assert_eq!(import.skipped, 1);
    }
}
