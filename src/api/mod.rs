pub mod sweep;
pub mod telegram;
pub mod webhooks;
