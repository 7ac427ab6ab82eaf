//! Messaging error types

use thiserror::Error;

use crate::error::{AppError, AppErrorKind, ExternalError};

#[derive(Debug, Clone, Error)]
pub enum MessagingError {
    #[error("telegram request failed: {0}")]
    Transport(String),

    #[error("telegram api error {code}: {description}")]
    Api { code: u16, description: String },

    #[error("telegram rate limit, retry after {retry_after:?}s")]
    RateLimited { retry_after: Option<u64> },
}

pub type MessagingResult<T> = Result<T, MessagingError>;

impl MessagingError {
    /// The chat blocked the bot or no longer exists.
    pub fn is_unreachable_chat(&self) -> bool {
        matches!(self, MessagingError::Api { code: 403, .. })
            || matches!(self, MessagingError::Api { code: 400, description } if description.contains("chat not found"))
    }
}

impl From<MessagingError> for AppError {
    fn from(err: MessagingError) -> Self {
        let kind = match err {
            MessagingError::RateLimited { retry_after } => {
                AppErrorKind::External(ExternalError::RateLimit {
                    service: "Telegram".to_string(),
                    retry_after,
                })
            }
            other => AppErrorKind::External(ExternalError::Messaging {
                message: other.to_string(),
            }),
        };
        AppError::new(kind)
    }
}
