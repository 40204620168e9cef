use chrono::NaiveDate;

/// System prompt for entry drafting. The model must answer with a single
/// JSON object: `{"entries": ["..."], "summary": "..."}`.
pub const SYSTEM_PROMPT: &str = r#"You are a "Beancount bookkeeping assistant". Your job is to use the user's transaction information and the provided accounts list to produce transactions that strictly follow Beancount syntax and can be posted without errors. Create new accounts only when necessary. Be professional, precise, and auditable.

[Core Principles]
1) Follow Beancount syntax and double-entry bookkeeping; every transaction must balance.
2) Prioritize accounts from the provided list. Only create a new account when no suitable one exists, and follow the user's naming conventions.
3) After generating entries, perform a self-check (balance, accounts exist and are opened, currency handling, appropriate categorization, duplicate detection).
4) When data is ambiguous or missing, infer carefully, but record uncertainties in the summary.
5) Strictly honor the user's preferences (default currency, date format, merchant mappings, naming rules).

[Transaction Formatting]
- Date format: YYYY-MM-DD; flag: confirmed `*`, uncertain `!`.
- Payee is the merchant; narration briefly states the purpose.
- Indent postings with two spaces (no tabs); amounts are immediately followed by the currency (e.g. `-37.50 USD`).
- Single currency: put the amount on the cash account line and leave the opposing posting blank so the ledger balances it.
- When creating a new account, include the required `open` directive with a date in the same entry and avoid new top-level accounts.

[JSON-only Output]
- Output exactly one JSON object with the keys:
  - "entries": list of strings; each element is a complete multi-line Beancount snippet.
  - "summary": string or null; your self-check conclusion or items needing confirmation.
- Do not emit Markdown, code fences, extra fields, or explanations; only the JSON.
- If information is insufficient, "entries" may be empty, but the summary must explain what is missing.

Begin now: using the user's input and the provided accounts list, return only an object shaped like:
{"entries": ["..."], "summary": "..."}"#;

/// Everything that feeds the user-turn prompt for one draft.
#[derive(Clone, Debug)]
pub struct DraftRequest {
    pub text: String,
    pub account_summary: Vec<String>,
    pub ledger_empty: bool,
    pub custom_instruction: Option<String>,
    pub error_context: Option<String>,
    pub today: NaiveDate,
}

impl DraftRequest {
    pub fn build_prompt(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(instruction) = self
            .custom_instruction
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            parts.push(format!(
                "The user's custom instruction is below. Follow it exactly:\n{instruction}\n"
            ));
        }

        parts.push(
            "Turn the user's request below into Beancount-compliant transaction entries.".into(),
        );

        if self.account_summary.is_empty() {
            parts.push(
                "The ledger currently has no accounts. Initialize defaults such as the operating \
                 currency and the basic account structure (Assets, Liabilities, Income, Expenses, \
                 Equity), and use option, commodity, and open directives to create opening entries."
                    .into(),
            );
        } else {
            parts.push(format!(
                "Existing ledger accounts and balances are listed below. Reuse them whenever \
                 possible to avoid duplicates:\n{}",
                self.account_summary.join("\n")
            ));
        }

        parts.push(
            "Only create new accounts when the request truly requires one that does not exist. \
             Add an open directive dated at the start of the current year and follow the \
             existing hierarchy."
                .into(),
        );

        if self.ledger_empty {
            parts.push(
                "The ledger is currently empty. Add the required option, commodity, and open \
                 directives to establish the default currency and base account structure before \
                 recording the user's transaction."
                    .into(),
            );
        }

        if let Some(ctx) = self.error_context.as_deref() {
            parts.push(format!("Previous error or feedback:\n{ctx}\n"));
        }

        parts.push(format!("Today's date: {}", self.today.format("%Y-%m-%d")));
        parts.push(format!("User input: {}", self.text));

        parts.join("\n")
    }

    /// Error context fed back into the prompt after a failed validation.
    pub fn autofix_context(error_summary: &str, entry_preview: &str, original_text: &str) -> String {
        format!(
            "The previously generated entries failed validation. Use the details below to fix \
             them:\nError details:\n{error_summary}\n\nGenerated entry \
             preview:\n{entry_preview}\n\nOriginal message:\n{original_text}\nRegenerate entries \
             that pass validation. Review every error carefully and provide new entries that \
             resolve the issues."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> DraftRequest {
        DraftRequest {
            text: "spent 5 USD on coffee".into(),
            account_summary: vec!["Assets:Cash: -5 USD".into()],
            ledger_empty: false,
            custom_instruction: None,
            error_context: None,
            today: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        }
    }

    #[test]
    fn prompt_includes_accounts_date_and_input() {
        let p = base_request().build_prompt();
        assert!(p.contains("Assets:Cash: -5 USD"));
        assert!(p.contains("Today's date: 2024-03-01"));
        assert!(p.ends_with("User input: spent 5 USD on coffee"));
        assert!(!p.contains("custom instruction"));
    }

    #[test]
    fn empty_ledger_gets_bootstrap_guidance() {
        let mut req = base_request();
        req.account_summary.clear();
        req.ledger_empty = true;
        let p = req.build_prompt();
        assert!(p.contains("currently has no accounts"));
        assert!(p.contains("option, commodity, and open directives"));
    }

    #[test]
    fn custom_instruction_leads_the_prompt() {
        let mut req = base_request();
        req.custom_instruction = Some("Always use KZT.".into());
        let p = req.build_prompt();
        assert!(p.starts_with("The user's custom instruction"));
        assert!(p.contains("Always use KZT."));
    }

    #[test]
    fn blank_instruction_is_ignored() {
        let mut req = base_request();
        req.custom_instruction = Some("   ".into());
        assert!(!req.build_prompt().contains("custom instruction"));
    }

    #[test]
    fn error_context_is_injected_before_the_input() {
        let mut req = base_request();
        req.error_context = Some("line 3: transaction does not balance".into());
        let p = req.build_prompt();
        let err_pos = p.find("Previous error or feedback").unwrap();
        let input_pos = p.find("User input:").unwrap();
        assert!(err_pos < input_pos);
    }
}
