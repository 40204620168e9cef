//! Beancount subset: data model, line parser, and the per-user ledger store.
//!
//! The bot only ever appends whole entries; parsing exists to validate what
//! gets written and to answer balance/duplicate queries. Anything the subset
//! does not model passes through untouched so hand-edited ledgers keep
//! loading in the external dashboard.

pub mod history;
pub mod parse;
pub mod store;
pub mod types;

pub use history::{HistoryRecords, PayeeHistory};
pub use store::LedgerStore;
pub use types::{Account, Amount, Directive, Posting, Transaction};
