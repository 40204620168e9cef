//! The model-facing side of the bot: ports for drafting ledger entries and
//! extracting bank statements, plus provider-agnostic prompt assembly.
//!
//! Adapter crates implement the traits over a concrete HTTP backend; the
//! core only deals in prompts and parsed responses.

pub mod prompt;
pub mod statement;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use prompt::DraftRequest;
pub use statement::{BankStatement, StatementRow};

/// Parsed model output for a draft request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DraftResponse {
    pub entries: Vec<String>,
    pub summary: Option<String>,
}

impl DraftResponse {
    /// A response is usable when it proposes entries or at least explains
    /// why it could not.
    pub fn is_usable(&self) -> bool {
        !self.entries.is_empty() || self.summary.as_deref().map(str::trim).is_some_and(|s| !s.is_empty())
    }
}

/// Input for statement extraction: the downloaded attachment plus the
/// account context the model must stay within.
#[derive(Clone, Debug)]
pub struct StatementRequest {
    pub path: PathBuf,
    pub note: Option<String>,
    pub account_summary: Vec<String>,
    pub allowed_accounts: Vec<String>,
    pub history_lines: Vec<String>,
    pub reference_year: i32,
}

impl StatementRequest {
    /// The full extraction prompt: template, allowed accounts, balances,
    /// recent history, and the user's note if they attached one.
    pub fn build_prompt(&self) -> String {
        let instructions = statement::EXTRACTION_PROMPT_TEMPLATE
            .replace("{reference_year}", &self.reference_year.to_string());
        let history_block = if self.history_lines.is_empty() {
            "No prior transactions found; use the allowed accounts consistently.".to_string()
        } else {
            self.history_lines.join("\n")
        };
        let mut out = format!(
            "{instructions}\n\nStrict example format: [{{\"date\":\"2024-05-02\",\
             \"description\":\"Sample\",\"amount\":-12.34,\"debit\":\"Assets:Bank:Checking\",\
             \"credit\":\"Expenses:Food\"}}]\nAllowed account names (verbatim only):\n{}\n\n\
             User account summary:\n{}\n\n\
             Recent transaction history (reuse the same ledger/counter accounts when \
             descriptions are similar; most recent first):\n{history_block}",
            self.allowed_accounts.join("\n"),
            self.account_summary.join("\n"),
        );
        if let Some(note) = self.note.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            out.push_str("\n\nAdditional user note: ");
            out.push_str(note);
        }
        out
    }
}

/// Drafts double-entry ledger text from user input.
#[async_trait]
pub trait EntryModel: Send + Sync {
    async fn draft_entries(&self, req: &DraftRequest) -> Result<DraftResponse>;

    async fn extract_statement(&self, req: &StatementRequest) -> Result<BankStatement>;
}

/// Voice-note transcription, separate from [`EntryModel`] because only some
/// backends offer an audio endpoint.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe_file(&self, path: &Path, prompt: &str) -> Result<String>;
}
