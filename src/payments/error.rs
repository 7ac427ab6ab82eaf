use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    /// Envelope came back with `status: false`, or a non-success HTTP code.
    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },

    #[error("Gateway not configured: {0}")]
    NotConfigured(String),
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
            PaymentError::NotConfigured(_) => false,
        }
    }

    /// Text safe to relay to a bot user.
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::NetworkError { .. } | PaymentError::RateLimitError { .. } => {
                "Payment provider is temporarily unavailable. Please try again shortly".to_string()
            }
            PaymentError::WebhookVerificationError { .. } => {
                "Invalid webhook signature".to_string()
            }
            PaymentError::ProviderError { message, .. } => message.clone(),
            PaymentError::NotConfigured(_) => {
                "Payments are not available right now".to_string()
            }
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{
            AppError, AppErrorKind, ExternalError, InfrastructureError, ValidationError,
        };

        let kind = match &err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidAmount {
                    amount: field.clone().unwrap_or_default(),
                    reason: message.clone(),
                })
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: "Paystack".to_string(),
                retry_after: *retry_after_seconds,
            }),
            PaymentError::NotConfigured(message) => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration {
                    message: message.clone(),
                })
            }
            _ => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "Paystack".to_string(),
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::NetworkError {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::ProviderError {
            provider: "paystack".to_string(),
            message: "Could not resolve account name".to_string(),
            provider_code: None,
            retryable: false,
        }
        .is_retryable());
    }

    #[test]
    fn provider_errors_map_to_bad_gateway() {
        let err: AppError = PaymentError::ProviderError {
            provider: "paystack".to_string(),
            message: "Invalid key".to_string(),
            provider_code: Some("401".to_string()),
            retryable: false,
        }
        .into();
        assert_eq!(err.status_code(), 502);

        let limited: AppError = PaymentError::RateLimitError {
            message: "slow down".to_string(),
            retry_after_seconds: Some(10),
        }
        .into();
        assert_eq!(limited.status_code(), 429);
    }
}
