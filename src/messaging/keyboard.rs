//! Reply and inline keyboards, rendered to Telegram `reply_markup`.

use serde_json::{json, Value as JsonValue};

#[derive(Debug, Clone, PartialEq)]
pub enum ButtonAction {
    Callback(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineButton {
    pub text: String,
    pub action: ButtonAction,
}

impl InlineButton {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: ButtonAction::Callback(data.into()),
        }
    }

    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: ButtonAction::Url(url.into()),
        }
    }

    fn to_json(&self) -> JsonValue {
        match &self.action {
            ButtonAction::Callback(data) => json!({"text": self.text, "callback_data": data}),
            ButtonAction::Url(url) => json!({"text": self.text, "url": url}),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Keyboard {
    /// Persistent buttons under the input box.
    Reply(Vec<Vec<String>>),
    Inline(Vec<Vec<InlineButton>>),
    Remove,
}

impl Keyboard {
    pub fn reply(rows: &[&[&str]]) -> Self {
        Keyboard::Reply(
            rows.iter()
                .map(|row| row.iter().map(|b| b.to_string()).collect())
                .collect(),
        )
    }

    pub fn inline(rows: Vec<Vec<InlineButton>>) -> Self {
        Keyboard::Inline(rows)
    }

    /// Every callback payload on the keyboard, in order.
    pub fn callback_data(&self) -> Vec<&str> {
        match self {
            Keyboard::Inline(rows) => rows
                .iter()
                .flatten()
                .filter_map(|b| match &b.action {
                    ButtonAction::Callback(data) => Some(data.as_str()),
                    ButtonAction::Url(_) => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn to_reply_markup(&self) -> JsonValue {
        match self {
            Keyboard::Reply(rows) => json!({
                "keyboard": rows
                    .iter()
                    .map(|row| row.iter().map(|text| json!({"text": text})).collect::<Vec<_>>())
                    .collect::<Vec<_>>(),
                "resize_keyboard": true,
            }),
            Keyboard::Inline(rows) => json!({
                "inline_keyboard": rows
                    .iter()
                    .map(|row| row.iter().map(InlineButton::to_json).collect::<Vec<_>>())
                    .collect::<Vec<_>>(),
            }),
            Keyboard::Remove => json!({"remove_keyboard": true}),
        }
    }
}
