use chrono::NaiveDate;

use crate::{errors::Error, Result};

use super::types::*;

/// A directive plus the 1-based line it started on.
pub type Spanned = (usize, Directive);

/// Parse ledger text into directives.
///
/// Line-oriented: a top-level line opens a directive, indented lines are
/// postings (or metadata, which is skipped). Unknown dated directives and
/// bare keywords like `include`/`plugin` become [`Directive::Raw`].
pub fn parse(content: &str) -> Result<Vec<Spanned>> {
    let mut out: Vec<Spanned> = Vec::new();
    let mut current: Option<(usize, Transaction)> = None;

    for (idx, raw) in content.lines().enumerate() {
        let lineno = idx + 1;
        let line = strip_comment(raw);

        if line.trim().is_empty() {
            continue;
        }

        // Org-style section headers and full-line hash comments.
        if line.starts_with('*') || line.starts_with('#') {
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            let Some((_, txn)) = current.as_mut() else {
                return Err(Error::LedgerParse {
                    line: lineno,
                    reason: "indented line outside a transaction".to_string(),
                });
            };
            if let Some(posting) = parse_posting(line.trim(), lineno)? {
                txn.postings.push(posting);
            }
            continue;
        }

        // A new top-level line closes the open transaction.
        if let Some((start, txn)) = current.take() {
            out.push((start, Directive::Txn(txn)));
        }

        let directive = parse_top_level(line.trim_end(), lineno)?;
        match directive {
            TopLevel::TxnHeader(txn) => current = Some((lineno, txn)),
            TopLevel::Directive(d) => out.push((lineno, d)),
        }
    }

    if let Some((start, txn)) = current.take() {
        out.push((start, Directive::Txn(txn)));
    }

    Ok(out)
}

/// Validate ledger text: parse, then check the double-entry invariants.
///
/// - explicit postings must sum to zero per currency (within tolerance);
/// - at most one posting per transaction may elide its amount;
/// - referenced accounts must be opened, unless the file has no `open`
///   directives at all (bootstrap entries open their own accounts).
pub fn validate(content: &str) -> Result<()> {
    let directives = parse(content)?;

    let mut opened: Vec<&Account> = Vec::new();
    for (_, d) in &directives {
        if let Directive::Open { account, .. } = d {
            opened.push(account);
        }
    }
    let check_opened = !opened.is_empty();

    for (line, d) in &directives {
        match d {
            Directive::Txn(txn) => {
                if txn.postings.is_empty() {
                    return Err(Error::LedgerValidation(format!(
                        "line {line}: transaction has no postings"
                    )));
                }
                let elided = txn.elided_count();
                if elided > 1 {
                    return Err(Error::LedgerValidation(format!(
                        "line {line}: more than one posting without an amount"
                    )));
                }
                if elided == 0 && !txn.has_priced_posting() {
                    for residual in txn.residual() {
                        if residual.number.abs() > balance_tolerance() {
                            return Err(Error::LedgerValidation(format!(
                                "line {line}: transaction does not balance: {residual}"
                            )));
                        }
                    }
                }
                if check_opened {
                    for p in &txn.postings {
                        if !opened.contains(&&p.account) {
                            return Err(Error::LedgerValidation(format!(
                                "line {line}: account {} is not opened",
                                p.account
                            )));
                        }
                    }
                }
            }
            Directive::Balance { account, .. } if check_opened => {
                if !opened.contains(&account) {
                    return Err(Error::LedgerValidation(format!(
                        "line {line}: account {account} is not opened"
                    )));
                }
            }
            _ => {}
        }
    }

    Ok(())
}

enum TopLevel {
    TxnHeader(Transaction),
    Directive(Directive),
}

fn parse_top_level(line: &str, lineno: usize) -> Result<TopLevel> {
    if let Some(rest) = line.strip_prefix("option ") {
        let mut strings = QuotedStrings::new(rest);
        let name = strings.next().unwrap_or_default();
        let value = strings.next().unwrap_or_default();
        return Ok(TopLevel::Directive(Directive::Option { name, value }));
    }
    if line.starts_with("include ")
        || line.starts_with("plugin ")
        || line.starts_with("pushtag ")
        || line.starts_with("poptag ")
    {
        return Ok(TopLevel::Directive(Directive::Raw(line.to_string())));
    }

    let (date_str, rest) = line.split_once(char::is_whitespace).ok_or_else(|| {
        Error::LedgerParse {
            line: lineno,
            reason: format!("unrecognized line: {line}"),
        }
    })?;
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|_| Error::LedgerParse {
        line: lineno,
        reason: format!("expected a YYYY-MM-DD date, got {date_str}"),
    })?;
    let rest = rest.trim_start();

    let (keyword, tail) = match rest.split_once(char::is_whitespace) {
        Some((k, t)) => (k, t.trim_start()),
        None => (rest, ""),
    };

    match keyword {
        "open" => {
            let account = parse_account(first_token(tail), lineno)?;
            Ok(TopLevel::Directive(Directive::Open { date, account }))
        }
        "close" => {
            let account = parse_account(first_token(tail), lineno)?;
            Ok(TopLevel::Directive(Directive::Close { date, account }))
        }
        "commodity" => Ok(TopLevel::Directive(Directive::Commodity {
            date,
            currency: first_token(tail).to_string(),
        })),
        "balance" => {
            let (acct_str, amount_str) =
                tail.split_once(char::is_whitespace)
                    .ok_or_else(|| Error::LedgerParse {
                        line: lineno,
                        reason: "balance needs an account and an amount".to_string(),
                    })?;
            let account = parse_account(acct_str, lineno)?;
            let amount = Amount::parse(amount_str).ok_or_else(|| Error::LedgerParse {
                line: lineno,
                reason: format!("bad amount: {amount_str}"),
            })?;
            Ok(TopLevel::Directive(Directive::Balance {
                date,
                account,
                amount,
            }))
        }
        "*" | "!" | "txn" => {
            let flag = if keyword == "!" { '!' } else { '*' };
            let mut strings = QuotedStrings::new(tail);
            let first = strings.next();
            let second = strings.next();
            let (payee, narration) = match (first, second) {
                (Some(p), Some(n)) => (Some(p), n),
                (Some(n), None) => (None, n),
                _ => (None, String::new()),
            };
            Ok(TopLevel::TxnHeader(Transaction {
                date,
                flag,
                payee,
                narration,
                postings: Vec::new(),
            }))
        }
        // price, note, event, pad, document, query...
        _ => Ok(TopLevel::Directive(Directive::Raw(line.to_string()))),
    }
}

/// Returns `None` for metadata lines (`key: value`) and tag-only lines.
fn parse_posting(line: &str, lineno: usize) -> Result<Option<Posting>> {
    let first = first_token(line);
    if first.is_empty() || first.starts_with('#') || first.starts_with('^') {
        return Ok(None);
    }
    let Some(account) = Account::parse(first) else {
        // Metadata keys are lowercase and end with ':'.
        if first.ends_with(':') {
            return Ok(None);
        }
        return Err(Error::LedgerParse {
            line: lineno,
            reason: format!("bad posting account: {first}"),
        });
    };

    let rest = line[first.len()..].trim();
    if rest.is_empty() {
        return Ok(Some(Posting {
            account,
            amount: None,
            priced: false,
        }));
    }

    // `@`/`@@` prices and `{}` costs exempt the leg from balance checking.
    let priced = rest.contains('@') || rest.contains('{');
    let amount_part = rest
        .split(['@', '{'])
        .next()
        .unwrap_or("")
        .trim();
    let amount = Amount::parse(amount_part).ok_or_else(|| Error::LedgerParse {
        line: lineno,
        reason: format!("bad posting amount: {rest}"),
    })?;
    Ok(Some(Posting {
        account,
        amount: Some(amount),
        priced,
    }))
}

fn parse_account(s: &str, lineno: usize) -> Result<Account> {
    Account::parse(s).ok_or_else(|| Error::LedgerParse {
        line: lineno,
        reason: format!("bad account name: {s}"),
    })
}

fn first_token(s: &str) -> &str {
    s.split_whitespace().next().unwrap_or("")
}

/// Cut a trailing `;` comment, respecting double-quoted strings.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_string = !in_string,
            ';' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Iterator over `"..."` strings in a directive tail.
struct QuotedStrings<'a> {
    rest: &'a str,
}

impl<'a> QuotedStrings<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s }
    }
}

impl<'a> Iterator for QuotedStrings<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let start = self.rest.find('"')? + 1;
        let end_rel = self.rest[start..].find('"')?;
        let item = self.rest[start..start + end_rel].to_string();
        self.rest = &self.rest[start + end_rel + 1..];
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"option "operating_currency" "USD"
2000-01-01 open Assets:Bank:Checking
2000-01-01 open Expenses:Food

2024-01-10 * "Coffee Shop" "Latte"
  Assets:Bank:Checking -5 USD
  Expenses:Food 5 USD
"#;

    #[test]
    fn parses_sample_ledger() {
        let ds = parse(SAMPLE).unwrap();
        assert_eq!(ds.len(), 4);
        assert!(matches!(ds[0].1, Directive::Option { .. }));
        let Directive::Txn(txn) = &ds[3].1 else {
            panic!("expected a transaction, got {:?}", ds[3]);
        };
        assert_eq!(ds[3].0, 5);
        assert_eq!(txn.payee.as_deref(), Some("Coffee Shop"));
        assert_eq!(txn.narration, "Latte");
        assert_eq!(txn.postings.len(), 2);
    }

    #[test]
    fn narration_only_header() {
        let ds = parse("2024-01-10 * \"Just narration\"\n  Assets:Cash -1 USD\n  Expenses:Food\n")
            .unwrap();
        let Directive::Txn(txn) = &ds[0].1 else {
            panic!("expected txn");
        };
        assert_eq!(txn.payee, None);
        assert_eq!(txn.narration, "Just narration");
        assert_eq!(txn.elided_count(), 1);
    }

    #[test]
    fn inline_comments_and_metadata_are_skipped() {
        let src = "2024-01-10 * \"x\" ; trailing\n  note: \"meta\"\n  Assets:Cash -1 USD ; leg\n  Expenses:Food 1 USD\n";
        let ds = parse(src).unwrap();
        let Directive::Txn(txn) = &ds[0].1 else {
            panic!("expected txn");
        };
        assert_eq!(txn.postings.len(), 2);
    }

    #[test]
    fn unknown_dated_directive_passes_through() {
        let ds = parse("2024-01-10 price USD 0.92 EUR\n").unwrap();
        assert!(matches!(ds[0].1, Directive::Raw(_)));
    }

    #[test]
    fn garbage_line_is_an_error() {
        let err = parse("this is not a ledger\n").unwrap_err();
        assert!(matches!(err, Error::LedgerParse { line: 1, .. }));
    }

    #[test]
    fn validate_accepts_balanced_file() {
        assert!(validate(SAMPLE).is_ok());
    }

    #[test]
    fn validate_rejects_unbalanced_transaction() {
        let src = "2024-01-10 * \"x\"\n  Assets:Cash -5 USD\n  Expenses:Food 4 USD\n";
        let err = validate(src).unwrap_err();
        assert!(err.to_string().contains("does not balance"));
    }

    #[test]
    fn validate_allows_rounding_slack() {
        let src = "2024-01-10 * \"x\"\n  Assets:Cash -5.004 USD\n  Expenses:Food 5 USD\n";
        assert!(validate(src).is_ok());
    }

    #[test]
    fn validate_rejects_two_elided_postings() {
        let src = "2024-01-10 * \"x\"\n  Assets:Cash\n  Expenses:Food\n";
        let err = validate(src).unwrap_err();
        assert!(err.to_string().contains("more than one posting"));
    }

    #[test]
    fn validate_rejects_unopened_account() {
        let src = "2000-01-01 open Assets:Cash\n2024-01-10 * \"x\"\n  Assets:Cash -1 USD\n  Expenses:Food 1 USD\n";
        let err = validate(src).unwrap_err();
        assert!(err.to_string().contains("Expenses:Food"));
    }

    #[test]
    fn validate_skips_account_check_without_open_directives() {
        let src = "2024-01-10 * \"x\"\n  Assets:Cash -1 USD\n  Expenses:Food 1 USD\n";
        assert!(validate(src).is_ok());
    }

    #[test]
    fn validate_skips_balance_check_for_priced_legs() {
        let src = "2024-01-10 * \"fx\"\n  Assets:Cash -5 USD @ 0.92 EUR\n  Assets:Euros 4.60 EUR\n";
        assert!(validate(src).is_ok());
    }
}
