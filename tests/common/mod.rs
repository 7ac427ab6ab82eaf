//! Shared fixtures: a scriptable payment gateway, a messenger that records
//! what it sends, and helpers to assemble the application around them.

#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use naira_invest_bot::cache::{InMemorySessionStore, SessionStore};
use naira_invest_bot::config::BotConfig;
use naira_invest_bot::database::ledger_store::LedgerStore;
use naira_invest_bot::database::memory_store::InMemoryLedgerStore;
use naira_invest_bot::messaging::types::Sender;
use naira_invest_bot::messaging::{Inbound, Keyboard, Messenger, MessagingError, MessagingResult};
use naira_invest_bot::payments::error::{PaymentError, PaymentResult};
use naira_invest_bot::payments::types::{
    Bank, ChargeRequest, ChargeSession, ChargeStatus, ChargeVerification, RecipientRequest,
    ResolvedAccount, TransferReceipt, TransferRequest, TransferStatus,
};
use naira_invest_bot::payments::utils::{sign_hmac_sha512_hex, verify_hmac_sha512_hex};
use naira_invest_bot::payments::PaymentGateway;
use naira_invest_bot::services::ledger::AdminAdjustment;
use naira_invest_bot::services::LedgerService;
use naira_invest_bot::{AppComponents, AppState};

pub const WEBHOOK_SECRET: &str = "sk_test_secret";
pub const ADMIN_ID: i64 = 9_000;

pub fn naira(v: i64) -> Decimal {
    Decimal::new(v, 0)
}

pub fn sign(payload: &[u8]) -> String {
    sign_hmac_sha512_hex(payload, WEBHOOK_SECRET).unwrap()
}

// ---------------------------------------------------------------------------
// Payment gateway
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GatewayScript {
    charge_status: HashMap<String, ChargeStatus>,
    charge_amount: HashMap<String, Decimal>,
    fail_initialize: bool,
    fail_transfer: bool,
    transfer_status: Option<TransferStatus>,
    account_name: Option<String>,
    initialized: Vec<ChargeRequest>,
    transfers: Vec<TransferRequest>,
    recipients: Vec<RecipientRequest>,
    verify_calls: usize,
}

pub struct MockGateway {
    script: Mutex<GatewayScript>,
    transfers_enabled: bool,
}

impl MockGateway {
    pub fn new(transfers_enabled: bool) -> Self {
        Self {
            script: Mutex::new(GatewayScript {
                account_name: Some("ADA OKAFOR".to_string()),
                ..Default::default()
            }),
            transfers_enabled,
        }
    }

    /// Verification for `reference` reports `status` and `amount`.
    pub fn set_charge(&self, reference: &str, status: ChargeStatus, amount: Decimal) {
        let mut script = self.script.lock().unwrap();
        script.charge_status.insert(reference.to_string(), status);
        script.charge_amount.insert(reference.to_string(), amount);
    }

    pub fn fail_initialize(&self) {
        self.script.lock().unwrap().fail_initialize = true;
    }

    pub fn fail_transfers(&self) {
        self.script.lock().unwrap().fail_transfer = true;
    }

    pub fn set_transfer_status(&self, status: TransferStatus) {
        self.script.lock().unwrap().transfer_status = Some(status);
    }

    pub fn unresolvable_accounts(&self) {
        self.script.lock().unwrap().account_name = None;
    }

    pub fn initialized(&self) -> Vec<ChargeRequest> {
        self.script.lock().unwrap().initialized.clone()
    }

    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.script.lock().unwrap().transfers.clone()
    }

    pub fn verify_calls(&self) -> usize {
        self.script.lock().unwrap().verify_calls
    }
}

fn provider_error(message: &str) -> PaymentError {
    PaymentError::ProviderError {
        provider: "mock".to_string(),
        message: message.to_string(),
        provider_code: None,
        retryable: false,
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initialize_charge(&self, request: ChargeRequest) -> PaymentResult<ChargeSession> {
        let mut script = self.script.lock().unwrap();
        if script.fail_initialize {
            return Err(provider_error("initialize failed"));
        }
        let session = ChargeSession {
            reference: request.reference.clone(),
            authorization_url: format!("https://checkout.test/{}", request.reference),
            access_code: Some("access".to_string()),
        };
        script.initialized.push(request);
        Ok(session)
    }

    async fn verify_charge(&self, reference: &str) -> PaymentResult<ChargeVerification> {
        let mut script = self.script.lock().unwrap();
        script.verify_calls += 1;
        let status = script
            .charge_status
            .get(reference)
            .cloned()
            .unwrap_or(ChargeStatus::Success);
        let amount = script
            .charge_amount
            .get(reference)
            .copied()
            .unwrap_or(Decimal::new(5_000, 0));
        Ok(ChargeVerification {
            reference: reference.to_string(),
            gateway_response: Some(match status {
                ChargeStatus::Success => "Successful".to_string(),
                _ => "Declined".to_string(),
            }),
            status,
            amount,
            channel: Some("card".to_string()),
            paid_at: None,
        })
    }

    async fn list_banks(&self) -> PaymentResult<Vec<Bank>> {
        Ok(vec![Bank {
            name: "Test Microfinance Bank".to_string(),
            code: "999001".to_string(),
        }])
    }

    async fn resolve_account(
        &self,
        account_number: &str,
        _bank_code: &str,
    ) -> PaymentResult<ResolvedAccount> {
        let script = self.script.lock().unwrap();
        match &script.account_name {
            Some(name) => Ok(ResolvedAccount {
                account_number: account_number.to_string(),
                account_name: name.clone(),
            }),
            None => Err(provider_error("Could not resolve account name")),
        }
    }

    async fn create_transfer_recipient(&self, request: RecipientRequest) -> PaymentResult<String> {
        let mut script = self.script.lock().unwrap();
        let code = format!("RCP_{}", request.account_number);
        script.recipients.push(request);
        Ok(code)
    }

    async fn initiate_transfer(&self, request: TransferRequest) -> PaymentResult<TransferReceipt> {
        let mut script = self.script.lock().unwrap();
        if script.fail_transfer {
            return Err(provider_error("insufficient float"));
        }
        let receipt = TransferReceipt {
            reference: request.reference.clone(),
            transfer_code: Some("TRF_1".to_string()),
            status: script.transfer_status.clone().unwrap_or(TransferStatus::Pending),
        };
        script.transfers.push(request);
        Ok(receipt)
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_hmac_sha512_hex(payload, WEBHOOK_SECRET, signature)
    }

    fn transfers_enabled(&self) -> bool {
        self.transfers_enabled
    }
}

// ---------------------------------------------------------------------------
// Messenger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub chat_id: i64,
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<SentMessage>>,
    answered: Mutex<Vec<String>>,
    blocked: Mutex<HashSet<i64>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries to `chat_id` fail as if the user blocked the bot.
    pub fn block(&self, chat_id: i64) {
        self.blocked.lock().unwrap().insert(chat_id);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts_to(&self, chat_id: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|m| m.chat_id == chat_id)
            .map(|m| m.text)
            .collect()
    }

    pub fn last_to(&self, chat_id: i64) -> Option<SentMessage> {
        self.sent().into_iter().rev().find(|m| m.chat_id == chat_id)
    }

    pub fn last_text(&self, chat_id: i64) -> String {
        self.last_to(chat_id).map(|m| m.text).unwrap_or_default()
    }

    pub fn answered(&self) -> Vec<String> {
        self.answered.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> MessagingResult<()> {
        if self.blocked.lock().unwrap().contains(&chat_id) {
            return Err(MessagingError::Api {
                code: 403,
                description: "Forbidden: bot was blocked by the user".to_string(),
            });
        }
        self.sent.lock().unwrap().push(SentMessage {
            chat_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, _text: Option<&str>) -> MessagingResult<()> {
        self.answered.lock().unwrap().push(callback_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

pub fn bot_config() -> BotConfig {
    BotConfig {
        token: "123:TEST".to_string(),
        api_base: "http://telegram.invalid".to_string(),
        webhook_secret: None,
        username: "NairaInvestBot".to_string(),
        admin_ids: vec![ADMIN_ID],
        payment_group_id: Some(-100),
        support_url: "https://t.me/support".to_string(),
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<dyn LedgerStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub gateway: Arc<MockGateway>,
    pub messenger: Arc<RecordingMessenger>,
}

impl TestApp {
    pub fn new(transfers_enabled: bool) -> Self {
        Self::with_options(transfers_enabled, bot_config(), None)
    }

    pub fn with_options(
        transfers_enabled: bool,
        bot: BotConfig,
        sweep_token: Option<String>,
    ) -> Self {
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
        let sessions: Arc<dyn SessionStore> =
            Arc::new(InMemorySessionStore::new(Duration::from_secs(600)));
        let gateway = Arc::new(MockGateway::new(transfers_enabled));
        let messenger = Arc::new(RecordingMessenger::new());

        let state = AppState::new(AppComponents {
            ledger_store: store.clone(),
            sessions: sessions.clone(),
            gateway: gateway.clone(),
            messenger: messenger.clone(),
            bot,
            sweep_token,
            callback_url: None,
        });

        Self {
            state,
            store,
            sessions,
            gateway,
            messenger,
        }
    }

    pub fn ledger(&self) -> &LedgerService {
        &self.state.ledger
    }

    pub async fn balance(&self, user_id: i64) -> Decimal {
        self.ledger().require_user(user_id).await.unwrap().balance
    }

    /// Creates the user and puts `amount` on their balance.
    pub async fn funded_user(&self, user_id: i64, amount: Decimal) {
        self.ledger()
            .get_or_create_user(user_id, Some(format!("User{}", user_id)), None, None)
            .await
            .unwrap();
        if amount > Decimal::ZERO {
            self.ledger()
                .admin_adjust(ADMIN_ID, user_id, amount, AdminAdjustment::Add)
                .await
                .unwrap();
        }
    }

    pub async fn text(&self, user_id: i64, text: &str) {
        self.state
            .bot
            .handle(Inbound::Text {
                chat_id: user_id,
                from: sender(user_id),
                text: text.to_string(),
            })
            .await;
    }

    pub async fn press(&self, user_id: i64, data: &str) {
        self.state
            .bot
            .handle(Inbound::Callback {
                chat_id: user_id,
                from: sender(user_id),
                callback_id: format!("cb-{}", data),
                data: data.to_string(),
            })
            .await;
    }
}

pub fn sender(user_id: i64) -> Sender {
    Sender {
        id: user_id,
        first_name: Some(format!("User{}", user_id)),
        username: None,
    }
}

/// Poll until `check` holds; spawned webhook tasks finish asynchronously.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
