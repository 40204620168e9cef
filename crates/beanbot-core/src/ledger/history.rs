use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::{domain::UserId, Result};

use super::store::LedgerStore;
use super::types::Directive;
use super::parse;

/// What the ledger remembers about one payee: how often each account pair
/// appeared and when the payee was last seen.
#[derive(Clone, Debug, Default)]
pub struct PayeeHistory {
    pub display_name: String,
    pub pair_counts: BTreeMap<(String, String), usize>,
    pub last_date: Option<NaiveDate>,
}

/// Keyed by lowercased payee.
pub type HistoryRecords = BTreeMap<String, PayeeHistory>;

impl LedgerStore {
    /// Account-pair usage per payee, for counter-account suggestions.
    pub fn history_records(&self, user: UserId) -> Result<HistoryRecords> {
        let content = self.read(user)?;
        let mut records: HistoryRecords = BTreeMap::new();
        if content.trim().is_empty() {
            return Ok(records);
        }

        for (_, d) in parse::parse(&content)? {
            let Directive::Txn(txn) = d else { continue };
            let Some(payee) = txn.payee.as_deref().map(str::trim).filter(|p| !p.is_empty())
            else {
                continue;
            };
            let record = records.entry(payee.to_lowercase()).or_insert_with(|| {
                PayeeHistory {
                    display_name: payee.to_string(),
                    ..Default::default()
                }
            });
            if record.last_date.map_or(true, |d| txn.date > d) {
                record.last_date = Some(txn.date);
            }
            if txn.postings.len() == 2 {
                let pair = (
                    txn.postings[0].account.to_string(),
                    txn.postings[1].account.to_string(),
                );
                *record.pair_counts.entry(pair).or_default() += 1;
            }
        }
        Ok(records)
    }

    /// Pick the counter account this user has paired with `ledger_account`
    /// most often for a payee mentioned in `description`.
    pub fn suggest_counter_account(
        &self,
        description: &str,
        ledger_account: &str,
        history: &HistoryRecords,
    ) -> Option<String> {
        let haystack = description.to_lowercase();
        let record = history
            .iter()
            .filter(|(payee, _)| haystack.contains(payee.as_str()))
            .max_by_key(|(payee, _)| payee.len())
            .map(|(_, r)| r)?;

        let mut best: Option<(&str, usize)> = None;
        let mut fallback: Option<(&str, usize)> = None;
        for ((a, b), count) in &record.pair_counts {
            let counter = if a == ledger_account {
                Some(b.as_str())
            } else if b == ledger_account {
                Some(a.as_str())
            } else {
                None
            };
            if let Some(counter) = counter {
                if best.map_or(true, |(_, c)| *count > c) {
                    best = Some((counter, *count));
                }
            } else {
                // Pair from another ledger account; reuse its counter leg.
                if fallback.map_or(true, |(_, c)| *count > c) {
                    fallback = Some((b.as_str(), *count));
                }
            }
        }
        best.or(fallback)
            .map(|(counter, _)| counter.to_string())
            .filter(|c| c != ledger_account)
    }

    /// Recent payees with their most common account pair, newest first.
    pub fn transaction_history_summary(&self, user: UserId, limit: usize) -> Result<Vec<String>> {
        let records = self.history_records(user)?;
        let mut ordered: Vec<&PayeeHistory> = records.values().collect();
        ordered.sort_by_key(|r| std::cmp::Reverse(r.last_date));

        let mut lines = Vec::new();
        for record in ordered.into_iter().take(limit) {
            let Some(((a, b), count)) = record
                .pair_counts
                .iter()
                .max_by_key(|(_, count)| **count)
                .map(|(pair, count)| (pair.clone(), *count))
            else {
                continue;
            };
            let last = record
                .last_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            lines.push(format!(
                "\"{}\": {a} vs {b} x{count}, last {last}",
                record.display_name
            ));
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store(prefix: &str) -> LedgerStore {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis();
        let dir = std::env::temp_dir().join(format!(
            "beanbot-hist-{prefix}-{}-{}",
            std::process::id(),
            millis
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let store = LedgerStore::new(dir);
        store
            .append_entries(
                USER,
                &[
                    "2024-01-10 * \"Coffee Shop\" \"Latte\"\n  Assets:Bank:Checking -5 USD\n  Expenses:Food 5 USD".to_string(),
                    "2024-01-12 * \"Coffee Shop\" \"Snack\"\n  Assets:Bank:Checking -7 USD\n  Expenses:Food 7 USD".to_string(),
                    "2024-01-15 * \"ACME Corp\" \"Paycheck\"\n  Assets:Bank:Checking 1000 USD\n  Income:Salary -1000 USD".to_string(),
                    "2024-01-20 * \"Coffee Shop\" \"Cash payment\"\n  Assets:Cash -3 USD\n  Expenses:Food 3 USD".to_string(),
                ],
            )
            .unwrap();
        store
    }

    const USER: UserId = UserId(9);

    #[test]
    fn history_records_capture_counts_and_dates() {
        let store = sample_store("records");
        let records = store.history_records(USER).unwrap();
        let record = records.get("coffee shop").unwrap();
        let pair = (
            "Assets:Bank:Checking".to_string(),
            "Expenses:Food".to_string(),
        );
        assert_eq!(record.pair_counts[&pair], 2);
        assert_eq!(record.last_date, NaiveDate::from_ymd_opt(2024, 1, 20));
    }

    #[test]
    fn suggest_counter_account_prefers_matching_ledger() {
        let store = sample_store("suggest");
        let records = store.history_records(USER).unwrap();

        let bank = store.suggest_counter_account(
            "Coffee Shop latte",
            "Assets:Bank:Checking",
            &records,
        );
        assert_eq!(bank.as_deref(), Some("Expenses:Food"));

        let cash = store.suggest_counter_account("Coffee Shop latte", "Assets:Cash", &records);
        assert_eq!(cash.as_deref(), Some("Expenses:Food"));

        assert!(store
            .suggest_counter_account("unrelated merchant", "Assets:Cash", &records)
            .is_none());
    }

    #[test]
    fn history_summary_formats_recent_pairs() {
        let store = sample_store("summary");
        let lines = store.transaction_history_summary(USER, 3).unwrap();
        assert!(lines.iter().any(|l| l.contains("\"Coffee Shop\"")));
        assert!(lines
            .iter()
            .any(|l| l.contains("Assets:Bank:Checking vs Expenses:Food")));
        assert!(lines.iter().any(|l| l.contains("last 2024-01-20")));
    }
}
