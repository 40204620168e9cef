//! Cross-messenger abstractions (Telegram today; Slack/Discord later).

pub mod port;
pub mod throttled;
pub mod types;
