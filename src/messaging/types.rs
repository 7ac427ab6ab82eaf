//! Inbound Telegram Bot API update payloads (the subset the bot reads).

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<Sender>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Sender {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: Sender,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

/// One thing a chat did, keyed by chat identity.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Text {
        chat_id: i64,
        from: Sender,
        text: String,
    },
    Callback {
        chat_id: i64,
        from: Sender,
        callback_id: String,
        data: String,
    },
}

impl Inbound {
    pub fn chat_id(&self) -> i64 {
        match self {
            Inbound::Text { chat_id, .. } | Inbound::Callback { chat_id, .. } => *chat_id,
        }
    }

    pub fn from(&self) -> &Sender {
        match self {
            Inbound::Text { from, .. } | Inbound::Callback { from, .. } => from,
        }
    }
}

impl Update {
    /// `None` for update kinds the bot does not handle.
    pub fn into_inbound(self) -> Option<Inbound> {
        if let Some(query) = self.callback_query {
            let chat_id = query
                .message
                .as_ref()
                .map(|m| m.chat.id)
                .unwrap_or(query.from.id);
            return Some(Inbound::Callback {
                chat_id,
                from: query.from,
                callback_id: query.id,
                data: query.data?,
            });
        }

        let message = self.message?;
        let text = message.text?;
        let from = message.from.unwrap_or(Sender {
            id: message.chat.id,
            ..Default::default()
        });
        Some(Inbound::Text {
            chat_id: message.chat.id,
            from,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_update_normalises() {
        let update: Update = serde_json::from_str(
            r#"{"update_id":1,"message":{"message_id":9,"chat":{"id":42,"type":"private"},
                "from":{"id":42,"is_bot":false,"first_name":"Ada"},"text":"/start ref_7"}}"#,
        )
        .unwrap();
        let inbound = update.into_inbound().unwrap();
        assert_eq!(inbound.chat_id(), 42);
        assert_eq!(inbound.from().first_name.as_deref(), Some("Ada"));
        assert!(matches!(inbound, Inbound::Text { ref text, .. } if text == "/start ref_7"));
    }

    #[test]
    fn callback_update_normalises() {
        let update: Update = serde_json::from_str(
            r#"{"update_id":2,"callback_query":{"id":"cb1","from":{"id":42,"is_bot":false},
                "message":{"message_id":3,"chat":{"id":42}},"data":"select_plan_rookie"}}"#,
        )
        .unwrap();
        match update.into_inbound().unwrap() {
            Inbound::Callback {
                chat_id,
                callback_id,
                data,
                ..
            } => {
                assert_eq!(chat_id, 42);
                assert_eq!(callback_id, "cb1");
                assert_eq!(data, "select_plan_rookie");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn stickers_are_ignored() {
        let update: Update = serde_json::from_str(
            r#"{"update_id":3,"message":{"message_id":1,"chat":{"id":5},"sticker":{}}}"#,
        )
        .unwrap();
        assert!(update.into_inbound().is_none());
    }
}
