//! Telegram Bot API client used for every outbound message.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::{debug, warn};

use super::error::{MessagingError, MessagingResult};
use super::keyboard::Keyboard;
use super::Messenger;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> MessagingResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MessagingError::Transport(format!("failed to build client: {}", e)))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call(&self, method: &str, body: JsonValue) -> MessagingResult<()> {
        let resp = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let parsed: Option<ApiResponse> = serde_json::from_str(&text).ok();

        match parsed {
            Some(api) if api.ok => {
                debug!(method, "telegram call succeeded");
                Ok(())
            }
            Some(api) => {
                let code = api.error_code.unwrap_or_else(|| status.as_u16());
                if code == 429 {
                    let retry_after = api.parameters.and_then(|p| p.retry_after);
                    warn!(method, ?retry_after, "telegram rate limited");
                    return Err(MessagingError::RateLimited { retry_after });
                }
                Err(MessagingError::Api {
                    code,
                    description: api.description.unwrap_or_default(),
                })
            }
            None => Err(MessagingError::Api {
                code: status.as_u16(),
                description: format!("unexpected response body: {}", truncate(&text, 200)),
            }),
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn send_message_body(chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> JsonValue {
    let mut body = json!({
        "chat_id": chat_id,
        "text": text,
        "parse_mode": "HTML",
        "disable_web_page_preview": true,
    });
    if let Some(kb) = keyboard {
        body["reply_markup"] = kb.to_reply_markup();
    }
    body
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> MessagingResult<()> {
        self.call("sendMessage", send_message_body(chat_id, text, keyboard))
            .await
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> MessagingResult<()> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = JsonValue::String(text.to_string());
        }
        self.call("answerCallbackQuery", body).await
    }
}
