//! Outbound messaging and inbound Telegram updates

pub mod error;
pub mod keyboard;
pub mod telegram;
pub mod types;

use async_trait::async_trait;

pub use error::{MessagingError, MessagingResult};
pub use keyboard::{InlineButton, Keyboard};
pub use telegram::TelegramClient;
pub use types::{Inbound, Update};

/// Delivery channel for chat messages.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// `text` is HTML; escape anything user supplied with [`escape_html`].
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> MessagingResult<()>;

    /// Stop the client-side spinner on a pressed inline button.
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> MessagingResult<()>;
}

pub fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escaping() {
        assert_eq!(escape_html("<b>Tom & Jerry</b>"), "&lt;b&gt;Tom &amp; Jerry&lt;/b&gt;");
        assert_eq!(escape_html("plain_name"), "plain_name");
    }
}
