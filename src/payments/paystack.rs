use crate::config::ConfigError;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    from_minor_units, to_minor_units, Bank, ChargeRequest, ChargeSession, ChargeStatus,
    ChargeVerification, RecipientRequest, ResolvedAccount, TransferReceipt, TransferRequest,
    TransferStatus,
};
use crate::payments::utils::{verify_hmac_sha512_hex, PaymentHttpClient};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    /// Falls back to the secret key, which is what Paystack signs with.
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub allow_transfers: bool,
    pub callback_url: Option<String>,
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            base_url: "https://api.paystack.co".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            allow_transfers: false,
            callback_url: None,
        }
    }
}

impl PaystackConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret_key = std::env::var("PAYSTACK_SECRET_KEY")
            .map_err(|_| ConfigError::MissingVariable("PAYSTACK_SECRET_KEY".to_string()))?;

        Ok(Self {
            webhook_secret: std::env::var("PAYSTACK_WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            base_url: std::env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            timeout_secs: std::env::var("PAYSTACK_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PAYSTACK_TIMEOUT_SECS".to_string()))?,
            max_retries: std::env::var("PAYSTACK_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PAYSTACK_MAX_RETRIES".to_string()))?,
            allow_transfers: std::env::var("PAYSTACK_ALLOW_TRANSFERS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PAYSTACK_ALLOW_TRANSFERS".to_string()))?,
            callback_url: std::env::var("PAYSTACK_CALLBACK_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            secret_key,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue("PAYSTACK_SECRET_KEY".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "PAYSTACK_BASE_URL must be a valid URL".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("PAYSTACK_TIMEOUT_SECS".to_string()));
        }
        Ok(())
    }

    pub fn signing_secret(&self) -> Option<&str> {
        self.webhook_secret
            .as_deref()
            .or(Some(self.secret_key.as_str()))
            .filter(|s| !s.trim().is_empty())
    }
}

pub struct PaystackGateway {
    config: PaystackConfig,
    http: PaymentHttpClient,
}

impl PaystackGateway {
    pub fn new(config: PaystackConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "paystack",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> PaymentResult<T> {
        let raw: PaystackEnvelope<T> = self
            .http
            .request_json(method, &self.endpoint(path), &self.config.secret_key, body)
            .await?;
        raw.into_data()
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn initialize_charge(&self, request: ChargeRequest) -> PaymentResult<ChargeSession> {
        if request.email.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "email is required for paystack initialization".to_string(),
                field: Some("email".to_string()),
            });
        }
        let amount = to_minor_units(request.amount)?;
        if amount <= 0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }

        let mut payload = json!({
            "email": request.email,
            "amount": amount,
            "currency": "NGN",
            "reference": request.reference,
            "metadata": request.metadata,
        });
        if let Some(callback) = request.callback_url.or_else(|| self.config.callback_url.clone()) {
            payload["callback_url"] = JsonValue::String(callback);
        }

        let data: PaystackInitializeData = self
            .call(reqwest::Method::POST, "/transaction/initialize", Some(&payload))
            .await?;
        info!(reference = %data.reference, "paystack charge initialized");

        Ok(ChargeSession {
            reference: data.reference,
            authorization_url: data.authorization_url,
            access_code: data.access_code,
        })
    }

    async fn verify_charge(&self, reference: &str) -> PaymentResult<ChargeVerification> {
        if reference.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "reference is required".to_string(),
                field: Some("reference".to_string()),
            });
        }
        let data: PaystackVerifyData = self
            .call(
                reqwest::Method::GET,
                &format!("/transaction/verify/{}", reference),
                None,
            )
            .await?;

        Ok(ChargeVerification {
            reference: data.reference.unwrap_or_else(|| reference.to_string()),
            status: ChargeStatus::from_provider(&data.status),
            amount: from_minor_units(data.amount),
            channel: data.channel,
            gateway_response: data.gateway_response,
            paid_at: data.paid_at,
        })
    }

    async fn list_banks(&self) -> PaymentResult<Vec<Bank>> {
        let banks: Vec<PaystackBankData> = self
            .call(reqwest::Method::GET, "/bank?country=nigeria", None)
            .await?;
        Ok(banks
            .into_iter()
            .map(|b| Bank {
                name: b.name,
                code: b.code,
            })
            .collect())
    }

    async fn resolve_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> PaymentResult<ResolvedAccount> {
        let data: PaystackResolveData = self
            .call(
                reqwest::Method::GET,
                &format!(
                    "/bank/resolve?account_number={}&bank_code={}",
                    account_number, bank_code
                ),
                None,
            )
            .await?;
        Ok(ResolvedAccount {
            account_number: data.account_number,
            account_name: data.account_name,
        })
    }

    async fn create_transfer_recipient(&self, request: RecipientRequest) -> PaymentResult<String> {
        let payload = json!({
            "type": "nuban",
            "name": request.name,
            "account_number": request.account_number,
            "bank_code": request.bank_code,
            "currency": "NGN",
        });
        let data: PaystackRecipientData = self
            .call(reqwest::Method::POST, "/transferrecipient", Some(&payload))
            .await?;
        Ok(data.recipient_code)
    }

    async fn initiate_transfer(&self, request: TransferRequest) -> PaymentResult<TransferReceipt> {
        if !self.config.allow_transfers {
            return Err(PaymentError::NotConfigured(
                "automatic transfers are disabled".to_string(),
            ));
        }
        let payload = json!({
            "source": "balance",
            "amount": to_minor_units(request.amount)?,
            "recipient": request.recipient_code,
            "reference": request.reference,
            "reason": request.reason,
        });
        let data: PaystackTransferData = self
            .call(reqwest::Method::POST, "/transfer", Some(&payload))
            .await?;
        let status = TransferStatus::from_provider(&data.status);
        if status == TransferStatus::Otp {
            warn!(reference = %request.reference, "transfer awaiting OTP; disable OTP on the Paystack dashboard");
        }

        Ok(TransferReceipt {
            reference: data.reference.unwrap_or(request.reference),
            transfer_code: data.transfer_code,
            status,
        })
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        match self.config.signing_secret() {
            Some(secret) => verify_hmac_sha512_hex(payload, secret, signature),
            None => false,
        }
    }

    fn transfers_enabled(&self) -> bool {
        self.config.allow_transfers
    }
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> PaystackEnvelope<T> {
    fn into_data(self) -> PaymentResult<T> {
        match (self.status, self.data) {
            (true, Some(data)) => Ok(data),
            (_, _) => Err(PaymentError::ProviderError {
                provider: "paystack".to_string(),
                message: if self.message.is_empty() {
                    "request was not successful".to_string()
                } else {
                    self.message
                },
                provider_code: None,
                retryable: false,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaystackInitializeData {
    authorization_url: String,
    #[serde(default)]
    access_code: Option<String>,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct PaystackVerifyData {
    amount: i64,
    status: String,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    paid_at: Option<String>,
    #[serde(default)]
    gateway_response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaystackBankData {
    name: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct PaystackResolveData {
    account_number: String,
    account_name: String,
}

#[derive(Debug, Deserialize)]
struct PaystackRecipientData {
    recipient_code: String,
}

#[derive(Debug, Deserialize)]
struct PaystackTransferData {
    #[serde(default)]
    transfer_code: Option<String>,
    #[serde(default)]
    reference: Option<String>,
    status: String,
}
