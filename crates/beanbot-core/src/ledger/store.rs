use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::{domain::UserId, Result};

use super::parse;
use super::types::*;

/// Per-user, append-only ledger files under a root directory.
///
/// Each user id maps to `root/{id}.bean`; a missing file reads as an empty
/// ledger. All writes go through [`LedgerStore::append_validated`] in normal
/// operation so a bad entry can never land on disk.
#[derive(Clone, Debug)]
pub struct LedgerStore {
    root: PathBuf,
}

impl LedgerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn user_ledger_path(&self, user: UserId) -> PathBuf {
        self.root.join(user.ledger_name())
    }

    /// Ledger text; missing file reads as empty.
    pub fn read(&self, user: UserId) -> Result<String> {
        let path = self.user_ledger_path(user);
        match fs::read_to_string(&path) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_empty(&self, user: UserId) -> bool {
        self.read(user).map(|c| c.trim().is_empty()).unwrap_or(true)
    }

    /// Append entries without validating. Entries are normalized, separated
    /// by exactly one blank line, and the file always ends with a newline.
    pub fn append_entries(&self, user: UserId, entries: &[String]) -> Result<PathBuf> {
        let path = self.user_ledger_path(user);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let cleaned: Vec<String> = entries
            .iter()
            .filter(|e| !e.trim().is_empty())
            .map(|e| normalize_entry(e))
            .collect();
        let existing = self.read(user)?;
        fs::write(&path, compose_content(&existing, &cleaned))?;
        Ok(path)
    }

    /// Append entries, re-validate the whole file, and roll the file back to
    /// its prior bytes if validation fails.
    pub fn append_validated(&self, user: UserId, entries: &[String]) -> Result<PathBuf> {
        let path = self.user_ledger_path(user);
        let existed = path.exists();
        let snapshot = self.read(user)?;

        self.append_entries(user, entries)?;
        let appended = self.read(user)?;

        if let Err(err) = parse::validate(&appended) {
            if existed {
                fs::write(&path, snapshot)?;
            } else {
                fs::remove_file(&path)?;
            }
            return Err(err);
        }
        Ok(path)
    }

    /// Validate the ledger as it currently stands.
    pub fn validate(&self, user: UserId) -> Result<()> {
        parse::validate(&self.read(user)?)
    }

    /// Net balance per account, formatted `Account: 12.34 USD, -3 EUR`, plus
    /// the sorted list of known accounts. Elided postings absorb the
    /// transaction residual; zero balances render as `0`.
    pub fn summarize_accounts(&self, user: UserId) -> Result<(Vec<String>, Vec<String>)> {
        let content = self.read(user)?;
        if content.trim().is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let directives = parse::parse(&content)?;

        let mut balances: BTreeMap<Account, BTreeMap<String, Decimal>> = BTreeMap::new();
        let mut accounts: std::collections::BTreeSet<Account> = Default::default();

        for (_, d) in &directives {
            match d {
                Directive::Open { account, .. } | Directive::Close { account, .. } => {
                    accounts.insert(account.clone());
                }
                Directive::Txn(txn) => {
                    let residual = txn.residual();
                    for p in &txn.postings {
                        accounts.insert(p.account.clone());
                        let by_currency = balances.entry(p.account.clone()).or_default();
                        match &p.amount {
                            Some(a) => {
                                *by_currency.entry(a.currency.clone()).or_default() += a.number;
                            }
                            None => {
                                for r in &residual {
                                    *by_currency.entry(r.currency.clone()).or_default() -=
                                        r.number;
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        let mut lines = Vec::new();
        for account in &accounts {
            let positions: Vec<String> = balances
                .get(account)
                .map(|by_currency| {
                    by_currency
                        .iter()
                        .filter(|(_, n)| !n.is_zero())
                        .map(|(c, n)| format!("{n} {c}"))
                        .collect()
                })
                .unwrap_or_default();
            let rendered = if positions.is_empty() {
                "0".to_string()
            } else {
                positions.join(", ")
            };
            lines.push(format!("{account}: {rendered}"));
        }
        let names = accounts.iter().map(|a| a.to_string()).collect();
        Ok((lines, names))
    }

    /// Sorted account names opened or referenced in the ledger.
    pub fn list_accounts(&self, user: UserId) -> Result<Vec<String>> {
        Ok(self.summarize_accounts(user)?.1)
    }

    /// Duplicate check: does any posting on `account` carry this amount (or
    /// its negation)? `currency` and `date` narrow the match when given.
    pub fn posting_exists(
        &self,
        user: UserId,
        account: &Account,
        amount: Decimal,
        currency: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<bool> {
        let content = self.read(user)?;
        if content.trim().is_empty() {
            return Ok(false);
        }
        for (_, d) in parse::parse(&content)? {
            let Directive::Txn(txn) = d else { continue };
            if let Some(target) = date {
                if txn.date != target {
                    continue;
                }
            }
            for p in &txn.postings {
                if &p.account != account {
                    continue;
                }
                let Some(a) = &p.amount else { continue };
                if let Some(c) = currency {
                    if a.currency != c {
                        continue;
                    }
                }
                if a.number == amount || a.number == -amount {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

fn normalize_entry(entry: &str) -> String {
    entry
        .trim()
        .lines()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

fn compose_content(existing: &str, new_entries: &[String]) -> String {
    if new_entries.is_empty() {
        if existing.is_empty() {
            return String::new();
        }
        return ensure_trailing_newline(existing.trim_end_matches('\n'));
    }

    let existing_trimmed = existing.trim_end();
    let new_text = new_entries
        .iter()
        .map(|e| e.trim_end())
        .collect::<Vec<_>>()
        .join("\n\n");
    let combined = if existing_trimmed.is_empty() {
        new_text
    } else {
        format!("{existing_trimmed}\n\n{new_text}")
    };
    ensure_trailing_newline(combined.trim_end())
}

fn ensure_trailing_newline(content: &str) -> String {
    if content.ends_with('\n') {
        content.to_string()
    } else {
        format!("{content}\n")
    }
}
