//! Core domain + application logic for the Beancount bookkeeping bot.
//!
//! This crate is intentionally framework-agnostic. Telegram / LLM providers
//! live behind ports (traits) implemented in adapter crates.

pub mod audit;
pub mod config;
pub mod dashboard;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod instructions;
pub mod interpreter;
pub mod ledger;
pub mod logging;
pub mod messaging;
pub mod pending;
pub mod security;

pub use errors::{Error, Result};
