//! Telegram conversation layer: parses updates, tracks per-chat steps and
//! drives the ledger and payment gateway.

pub mod commands;
pub mod handlers;
pub mod keyboards;
pub mod messages;
pub mod state;

pub use handlers::{BotError, BotResult, BotService};
pub use state::ConversationStep;
