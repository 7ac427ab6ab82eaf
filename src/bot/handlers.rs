//! Conversation flows. One inbound update is handled at a time per chat; any
//! error that is not a plain input problem lands in [`BotService::handle`],
//! which apologises and clears the chat's step.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheError, SessionStore};
use crate::config::BotConfig;
use crate::database::error::StoreError;
use crate::database::ledger_store::TransitionOutcome;
use crate::database::models::{User, UserId};
use crate::error::AppError;
use crate::messaging::types::Sender;
use crate::messaging::{escape_html, Inbound, Keyboard, Messenger, MessagingError};
use crate::payments::banks::{find_bank, find_bank_by_code, popular_banks, validate_account_number};
use crate::payments::error::PaymentError;
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{Bank, ChargeRequest, RecipientRequest, TransferRequest};
use crate::services::investment_plans::{find_plan, plans};
use crate::services::ledger::{
    AdminAdjustment, BankProfileInput, LedgerError, LedgerService, WithdrawalMode, MIN_DEPOSIT,
    MIN_WITHDRAWAL, WELCOME_BONUS,
};
use crate::services::notification::{NotificationService, NotificationType};

use super::commands::{
    is_account_number, is_valid_email, parse_amount, parse_user_id, parse_yes_no, AdminAction,
    CallbackAction, MenuAction, TextCommand,
};
use super::keyboards;
use super::messages as msg;
use super::state::ConversationStep;

const TOP_REFERRERS_LIMIT: usize = 20;
const DEFAULT_BROADCAST_CONCURRENCY: usize = 10;

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Session(#[from] CacheError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Payment(#[from] PaymentError),
}

pub type BotResult<T> = Result<T, BotError>;

impl From<BotError> for AppError {
    fn from(err: BotError) -> Self {
        match err {
            BotError::Ledger(e) => e.into(),
            BotError::Session(e) => e.into(),
            BotError::Messaging(e) => e.into(),
            BotError::Payment(e) => e.into(),
        }
    }
}

pub struct BotService {
    ledger: LedgerService,
    gateway: Arc<dyn PaymentGateway>,
    messenger: Arc<dyn Messenger>,
    sessions: Arc<dyn SessionStore>,
    notifications: NotificationService,
    config: BotConfig,
    callback_url: Option<String>,
    broadcast_concurrency: usize,
    chat_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl BotService {
    pub fn new(
        ledger: LedgerService,
        gateway: Arc<dyn PaymentGateway>,
        messenger: Arc<dyn Messenger>,
        sessions: Arc<dyn SessionStore>,
        config: BotConfig,
        callback_url: Option<String>,
    ) -> Self {
        Self {
            ledger,
            gateway,
            notifications: NotificationService::new(messenger.clone()),
            messenger,
            sessions,
            config,
            callback_url,
            broadcast_concurrency: DEFAULT_BROADCAST_CONCURRENCY,
            chat_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_broadcast_concurrency(mut self, limit: usize) -> Self {
        self.broadcast_concurrency = limit.max(1);
        self
    }

    pub async fn handle(&self, inbound: Inbound) {
        let chat_id = inbound.chat_id();
        let lock = self.chat_lock(chat_id).await;
        {
            let _guard = lock.lock().await;
            self.handle_in_order(chat_id, &inbound).await;
        }
        self.release_chat_lock(chat_id, lock).await;
    }

    async fn handle_in_order(&self, chat_id: i64, inbound: &Inbound) {
        if let Err(e) = self.dispatch(inbound).await {
            error!(chat_id, user_id = inbound.from().id, error = %e, "bot update failed");
            if let Err(clear_err) = self.sessions.clear(chat_id).await {
                warn!(chat_id, error = %clear_err, "could not clear session after failure");
            }
            let menu = keyboards::main_menu();
            if let Err(send_err) = self
                .messenger
                .send_message(chat_id, msg::GENERIC_ERROR, Some(&menu))
                .await
            {
                warn!(chat_id, error = %send_err, "could not deliver failure message");
            }
        }
    }

    async fn chat_lock(&self, chat_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.chat_locks.lock().await;
        locks
            .entry(chat_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the chat's entry once no other update holds or awaits it.
    async fn release_chat_lock(&self, chat_id: i64, lock: Arc<Mutex<()>>) {
        let mut locks = self.chat_locks.lock().await;
        drop(lock);
        if locks
            .get(&chat_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&chat_id);
        }
    }

    /// Chats with an update in flight.
    pub async fn active_chats(&self) -> usize {
        self.chat_locks.lock().await.len()
    }

    async fn dispatch(&self, inbound: &Inbound) -> BotResult<()> {
        match inbound {
            Inbound::Text {
                chat_id,
                from,
                text,
            } => self.on_text(*chat_id, from, text).await,
            Inbound::Callback {
                chat_id,
                from,
                callback_id,
                data,
            } => {
                if let Err(e) = self.messenger.answer_callback(callback_id, None).await {
                    debug!(chat_id, error = %e, "callback answer failed");
                }
                self.on_callback(*chat_id, from, CallbackAction::parse(data))
                    .await
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn reply(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) -> BotResult<()> {
        self.messenger
            .send_message(chat_id, text, keyboard.as_ref())
            .await?;
        Ok(())
    }

    async fn set_step(&self, chat_id: i64, step: ConversationStep) -> BotResult<()> {
        debug!(chat_id, step = step.name(), "conversation step");
        self.sessions.set(chat_id, &step).await?;
        Ok(())
    }

    async fn clear_step(&self, chat_id: i64) -> BotResult<()> {
        self.sessions.clear(chat_id).await?;
        Ok(())
    }

    async fn ensure_user(&self, from: &Sender) -> BotResult<User> {
        Ok(self
            .ledger
            .get_or_create_user(from.id, from.first_name.clone(), from.username.clone(), None)
            .await?)
    }

    async fn expired(&self, chat_id: i64) -> BotResult<()> {
        self.clear_step(chat_id).await?;
        self.reply(chat_id, msg::SESSION_EXPIRED, Some(keyboards::main_menu()))
            .await
    }

    // ------------------------------------------------------------------
    // Text
    // ------------------------------------------------------------------

    async fn on_text(&self, chat_id: i64, from: &Sender, text: &str) -> BotResult<()> {
        match TextCommand::parse(text) {
            TextCommand::Start { referrer } => self.start(chat_id, from, referrer).await,
            TextCommand::AdminDashboard => {
                if !self.config.is_admin(from.id) {
                    return self.reply(chat_id, msg::ADMIN_ACCESS_DENIED, None).await;
                }
                self.clear_step(chat_id).await?;
                self.reply(chat_id, msg::ADMIN_WELCOME, Some(keyboards::admin_menu()))
                    .await
            }
            TextCommand::Menu(action) => {
                // A menu button abandons whatever flow was in progress.
                self.clear_step(chat_id).await?;
                let user = self.ensure_user(from).await?;
                self.menu(chat_id, user, action).await
            }
            TextCommand::Admin(action) => {
                if !self.config.is_admin(from.id) {
                    return self.reply(chat_id, msg::ADMIN_ACCESS_DENIED, None).await;
                }
                self.admin_menu(chat_id, action).await
            }
            TextCommand::Input(input) => match self.sessions.get(chat_id).await? {
                Some(step) => self.on_input(chat_id, from, step, &input).await,
                None => {
                    self.reply(
                        chat_id,
                        "Please choose an option from the menu below. 👇",
                        Some(keyboards::main_menu()),
                    )
                    .await
                }
            },
        }
    }

    async fn start(&self, chat_id: i64, from: &Sender, referrer: Option<UserId>) -> BotResult<()> {
        self.clear_step(chat_id).await?;
        let mut user = self
            .ledger
            .get_or_create_user(
                from.id,
                from.first_name.clone(),
                from.username.clone(),
                referrer,
            )
            .await?;

        if let Some(updated) = self.ledger.claim_welcome_bonus(from.id).await? {
            user = updated;
            self.reply(chat_id, &msg::welcome_bonus(WELCOME_BONUS), None)
                .await?;
        }

        self.reply(
            chat_id,
            &msg::welcome(&user.display_name(), user.balance),
            Some(keyboards::main_menu()),
        )
        .await
    }

    async fn menu(&self, chat_id: i64, user: User, action: MenuAction) -> BotResult<()> {
        match action {
            MenuAction::Balance => {
                self.reply(chat_id, &msg::balance(&user), Some(keyboards::main_menu()))
                    .await
            }
            MenuAction::Deposit => {
                self.set_step(chat_id, ConversationStep::AwaitingDepositAmount)
                    .await?;
                self.reply(chat_id, msg::DEPOSIT_PROMPT_AMOUNT, None).await
            }
            MenuAction::Withdraw => {
                if user.bank_profile.is_none() {
                    return self
                        .reply(
                            chat_id,
                            msg::WITHDRAW_BANK_NOT_SET,
                            Some(keyboards::set_bank_account(false)),
                        )
                        .await;
                }
                self.set_step(chat_id, ConversationStep::AwaitingWithdrawalAmount)
                    .await?;
                self.reply(chat_id, &msg::withdraw_prompt(user.balance), None)
                    .await
            }
            MenuAction::Wallet => match &user.bank_profile {
                Some(profile) => {
                    self.reply(
                        chat_id,
                        &msg::bank_account_current(profile),
                        Some(keyboards::set_bank_account(true)),
                    )
                    .await
                }
                None => {
                    self.reply(
                        chat_id,
                        msg::BANK_ACCOUNT_NOT_SET,
                        Some(keyboards::set_bank_account(false)),
                    )
                    .await
                }
            },
            MenuAction::Invest => {
                self.set_step(chat_id, ConversationStep::AwaitingPlanSelection)
                    .await?;
                self.reply(
                    chat_id,
                    msg::INVEST_INFO,
                    Some(keyboards::plan_choices(&plans())),
                )
                .await
            }
            MenuAction::Referrals => {
                let link = format!(
                    "https://t.me/{}?start=ref_{}",
                    self.config.username, user.telegram_id
                );
                self.reply(chat_id, &msg::referral(&link), Some(keyboards::main_menu()))
                    .await
            }
            MenuAction::Support => {
                self.reply(
                    chat_id,
                    msg::support(),
                    Some(keyboards::url_button(
                        "💬 Chat with Support",
                        &self.config.support_url,
                    )),
                )
                .await
            }
        }
    }

    async fn on_input(
        &self,
        chat_id: i64,
        from: &Sender,
        step: ConversationStep,
        input: &str,
    ) -> BotResult<()> {
        if step.is_admin_step() && !self.config.is_admin(from.id) {
            self.clear_step(chat_id).await?;
            return self.reply(chat_id, msg::ADMIN_ACCESS_DENIED, None).await;
        }

        match step {
            ConversationStep::AwaitingDepositAmount => self.deposit_amount(chat_id, input).await,
            ConversationStep::AwaitingDepositEmail { amount } => {
                self.deposit_email(chat_id, from, amount, input).await
            }
            ConversationStep::AwaitingWithdrawalAmount => {
                self.withdrawal_amount(chat_id, from, input).await
            }
            ConversationStep::AwaitingAccountNumber => {
                if !is_account_number(input) {
                    return self.reply(chat_id, msg::INVALID_ACCOUNT_NUMBER, None).await;
                }
                self.set_step(
                    chat_id,
                    ConversationStep::AwaitingBankSelection {
                        account_number: input.trim().to_string(),
                    },
                )
                .await?;
                self.reply(
                    chat_id,
                    msg::PROMPT_BANK,
                    Some(keyboards::bank_choices(&popular_banks())),
                )
                .await
            }
            ConversationStep::AwaitingBankSelection { account_number } => {
                match self.lookup_bank(input).await {
                    Some(bank) => self.resolve_account(chat_id, account_number, bank).await,
                    None => self.reply(chat_id, msg::BANK_NOT_FOUND, None).await,
                }
            }
            ConversationStep::AwaitingAccountNameConfirmation { .. } => match parse_yes_no(input) {
                Some(confirmed) => self.confirm_account_name(chat_id, from, step, confirmed).await,
                None => {
                    self.reply(
                        chat_id,
                        msg::ACCOUNT_NAME_CONFIRMATION_INVALID,
                        Some(keyboards::confirm_account_name()),
                    )
                    .await
                }
            },
            ConversationStep::AwaitingPlanSelection => {
                self.reply(
                    chat_id,
                    msg::INVEST_INFO,
                    Some(keyboards::plan_choices(&plans())),
                )
                .await
            }
            ConversationStep::AwaitingInvestmentAmount { plan_id } => {
                self.investment_amount(chat_id, from, &plan_id, input).await
            }
            ConversationStep::AwaitingInvestmentConfirmation { .. } => match parse_yes_no(input) {
                Some(confirmed) => self.confirm_investment(chat_id, from, step, confirmed).await,
                None => {
                    self.reply(
                        chat_id,
                        "Please tap Confirm or Cancel.",
                        Some(keyboards::confirm_investment()),
                    )
                    .await
                }
            },
            ConversationStep::AwaitingAdjustmentTarget { direction } => {
                let Some(target) = self.existing_target(chat_id, input).await? else {
                    return Ok(());
                };
                self.set_step(
                    chat_id,
                    ConversationStep::AwaitingAdjustmentAmount { direction, target },
                )
                .await?;
                self.reply(chat_id, msg::ADMIN_PROMPT_AMOUNT, None).await
            }
            ConversationStep::AwaitingAdjustmentAmount { direction, target } => {
                self.adjustment_amount(chat_id, from, direction, target, input)
                    .await
            }
            ConversationStep::ReviewingWithdrawals { index } => {
                self.show_pending_withdrawal(chat_id, index).await
            }
            ConversationStep::AwaitingDeclineReason { reference, index } => {
                self.decline_withdrawal(chat_id, from, &reference, index, input)
                    .await
            }
            ConversationStep::AwaitingDeleteTarget => {
                let Some(target) = self.existing_target(chat_id, input).await? else {
                    return Ok(());
                };
                let user = self.ledger.require_user(target).await?;
                self.set_step(chat_id, ConversationStep::AwaitingDeleteConfirmation { target })
                    .await?;
                self.reply(
                    chat_id,
                    &msg::delete_user_confirmation(&user),
                    Some(keyboards::confirm_delete_user(target)),
                )
                .await
            }
            ConversationStep::AwaitingDeleteConfirmation { target } => {
                self.reply(
                    chat_id,
                    "Please confirm or cancel the deletion.",
                    Some(keyboards::confirm_delete_user(target)),
                )
                .await
            }
            ConversationStep::AwaitingBroadcastMessage => {
                let message = input.trim().to_string();
                if message.is_empty() {
                    return self.reply(chat_id, msg::ADMIN_PROMPT_BROADCAST, None).await;
                }
                let preview = msg::broadcast_confirmation(&message);
                self.set_step(
                    chat_id,
                    ConversationStep::AwaitingBroadcastConfirmation { message },
                )
                .await?;
                self.reply(chat_id, &preview, Some(keyboards::confirm_broadcast()))
                    .await
            }
            ConversationStep::AwaitingBroadcastConfirmation { .. } => {
                self.reply(
                    chat_id,
                    "Please tap Send or Cancel.",
                    Some(keyboards::confirm_broadcast()),
                )
                .await
            }
        }
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    async fn on_callback(
        &self,
        chat_id: i64,
        from: &Sender,
        action: CallbackAction,
    ) -> BotResult<()> {
        let step = self.sessions.get(chat_id).await?;

        match action {
            CallbackAction::SetBankAccount => {
                self.ensure_user(from).await?;
                self.set_step(chat_id, ConversationStep::AwaitingAccountNumber)
                    .await?;
                self.reply(chat_id, msg::PROMPT_ACCOUNT_NUMBER, None).await
            }
            CallbackAction::SelectBank(code) => {
                let Some(ConversationStep::AwaitingBankSelection { account_number }) = step else {
                    return self.expired(chat_id).await;
                };
                let bank = match self.lookup_bank_code(&code).await {
                    Some(bank) => bank,
                    None => {
                        return self
                            .reply(
                                chat_id,
                                msg::BANK_NOT_FOUND,
                                Some(keyboards::bank_choices(&popular_banks())),
                            )
                            .await
                    }
                };
                self.resolve_account(chat_id, account_number, bank).await
            }
            CallbackAction::ConfirmAccountName(confirmed) => match step {
                Some(step @ ConversationStep::AwaitingAccountNameConfirmation { .. }) => {
                    self.confirm_account_name(chat_id, from, step, confirmed)
                        .await
                }
                _ => self.expired(chat_id).await,
            },
            CallbackAction::SelectPlan(plan_id) => {
                let Some(plan) = find_plan(&plan_id) else {
                    return self
                        .reply(
                            chat_id,
                            msg::INVEST_INFO,
                            Some(keyboards::plan_choices(&plans())),
                        )
                        .await;
                };
                self.ensure_user(from).await?;
                self.set_step(
                    chat_id,
                    ConversationStep::AwaitingInvestmentAmount {
                        plan_id: plan.id.to_string(),
                    },
                )
                .await?;
                self.reply(chat_id, &msg::plan_amount_prompt(&plan), None)
                    .await
            }
            CallbackAction::ConfirmInvestment(confirmed) => match step {
                Some(step @ ConversationStep::AwaitingInvestmentConfirmation { .. }) => {
                    self.confirm_investment(chat_id, from, step, confirmed).await
                }
                _ => self.expired(chat_id).await,
            },
            CallbackAction::Unknown(data) => {
                warn!(chat_id, data = %data, "unknown callback data");
                Ok(())
            }
            admin_action => {
                if !self.config.is_admin(from.id) {
                    return self.reply(chat_id, msg::ADMIN_ACCESS_DENIED, None).await;
                }
                self.on_admin_callback(chat_id, from, step, admin_action)
                    .await
            }
        }
    }

    async fn on_admin_callback(
        &self,
        chat_id: i64,
        from: &Sender,
        step: Option<ConversationStep>,
        action: CallbackAction,
    ) -> BotResult<()> {
        let current_index = match &step {
            Some(ConversationStep::ReviewingWithdrawals { index })
            | Some(ConversationStep::AwaitingDeclineReason { index, .. }) => *index,
            _ => 0,
        };

        match action {
            CallbackAction::NextWithdrawal => {
                self.show_pending_withdrawal(chat_id, current_index + 1)
                    .await
            }
            CallbackAction::PrevWithdrawal => {
                self.show_pending_withdrawal(chat_id, current_index.saturating_sub(1))
                    .await
            }
            CallbackAction::ApproveWithdrawal(reference) => {
                self.approve_withdrawal(chat_id, from, &reference, current_index)
                    .await
            }
            CallbackAction::DeclineWithdrawal(reference) => {
                self.set_step(
                    chat_id,
                    ConversationStep::AwaitingDeclineReason {
                        reference,
                        index: current_index,
                    },
                )
                .await?;
                self.reply(chat_id, msg::ADMIN_PROMPT_DECLINE_REASON, None)
                    .await
            }
            CallbackAction::ConfirmDeleteUser(target) => match step {
                Some(ConversationStep::AwaitingDeleteConfirmation { target: pending })
                    if pending == target =>
                {
                    self.delete_user(chat_id, from, target).await
                }
                _ => self.expired(chat_id).await,
            },
            CallbackAction::CancelDeleteUser(_) => {
                self.clear_step(chat_id).await?;
                self.reply(
                    chat_id,
                    msg::ADMIN_DELETE_CANCELLED,
                    Some(keyboards::admin_menu()),
                )
                .await
            }
            CallbackAction::ConfirmBroadcast => match step {
                Some(ConversationStep::AwaitingBroadcastConfirmation { message }) => {
                    self.clear_step(chat_id).await?;
                    self.broadcast(chat_id, &message).await
                }
                _ => self.expired(chat_id).await,
            },
            CallbackAction::CancelBroadcast => {
                self.clear_step(chat_id).await?;
                self.reply(
                    chat_id,
                    msg::ADMIN_BROADCAST_CANCELLED,
                    Some(keyboards::admin_menu()),
                )
                .await
            }
            other => {
                warn!(chat_id, action = ?other, "callback routed to admin handler unexpectedly");
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Deposit
    // ------------------------------------------------------------------

    async fn deposit_amount(&self, chat_id: i64, input: &str) -> BotResult<()> {
        let Some(amount) = parse_amount(input).filter(|a| a.fract().is_zero()) else {
            return self.reply(chat_id, msg::INVALID_AMOUNT, None).await;
        };
        if amount < MIN_DEPOSIT {
            return self.reply(chat_id, &msg::below_min_deposit(), None).await;
        }
        self.set_step(chat_id, ConversationStep::AwaitingDepositEmail { amount })
            .await?;
        self.reply(chat_id, msg::DEPOSIT_PROMPT_EMAIL, None).await
    }

    async fn deposit_email(
        &self,
        chat_id: i64,
        from: &Sender,
        amount: Decimal,
        input: &str,
    ) -> BotResult<()> {
        let email = input.trim();
        if !is_valid_email(email) {
            return self.reply(chat_id, msg::INVALID_EMAIL, None).await;
        }
        let user = self.ensure_user(from).await?;
        let reference = self.ledger.new_reference("deposit", user.telegram_id);

        let request = ChargeRequest {
            email: email.to_string(),
            amount,
            reference: reference.clone(),
            callback_url: self.callback_url.clone(),
            metadata: json!({
                "user_id": user.telegram_id,
                "chat_id": chat_id,
                "username": user.username,
            }),
        };
        let session = match self.gateway.initialize_charge(request).await {
            Ok(session) => session,
            Err(e) => {
                warn!(user_id = user.telegram_id, reference = %reference, error = %e, "charge initialization failed");
                self.clear_step(chat_id).await?;
                return self
                    .reply(chat_id, msg::DEPOSIT_INIT_FAILED, Some(keyboards::main_menu()))
                    .await;
            }
        };

        self.ledger
            .record_pending_deposit(
                user.telegram_id,
                &session.reference,
                amount,
                json!({"email": email, "source": "paystack"}),
            )
            .await?;
        self.clear_step(chat_id).await?;

        info!(user_id = user.telegram_id, reference = %session.reference, amount = %amount, "deposit link issued");
        self.reply(
            chat_id,
            &msg::payment_link(amount, email, &session.reference),
            Some(keyboards::payment_link(&session.authorization_url)),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Withdrawal
    // ------------------------------------------------------------------

    async fn withdrawal_amount(&self, chat_id: i64, from: &Sender, input: &str) -> BotResult<()> {
        let Some(amount) = parse_amount(input) else {
            return self.reply(chat_id, msg::INVALID_AMOUNT, None).await;
        };
        if amount < MIN_WITHDRAWAL {
            return self.reply(chat_id, &msg::below_min_withdrawal(), None).await;
        }
        let user = self.ensure_user(from).await?;
        if amount > user.balance {
            return self
                .reply(chat_id, &msg::insufficient_balance(user.balance), None)
                .await;
        }

        let mode = if self.gateway.transfers_enabled() {
            WithdrawalMode::Automatic
        } else {
            WithdrawalMode::ManualReview
        };
        let (user, txn) = match self.ledger.begin_withdrawal(user.telegram_id, amount, mode).await {
            Ok(started) => started,
            Err(LedgerError::Store(StoreError::InsufficientBalance { available, .. })) => {
                return self
                    .reply(chat_id, &msg::insufficient_balance(available), None)
                    .await;
            }
            Err(LedgerError::NoBankProfile) => {
                self.clear_step(chat_id).await?;
                return self
                    .reply(
                        chat_id,
                        msg::WITHDRAW_BANK_NOT_SET,
                        Some(keyboards::set_bank_account(false)),
                    )
                    .await;
            }
            Err(e) => return Err(e.into()),
        };
        self.clear_step(chat_id).await?;

        let Some(profile) = user.bank_profile.clone() else {
            return Err(LedgerError::NoBankProfile.into());
        };

        match mode {
            WithdrawalMode::ManualReview => {
                if let Some(group) = self.config.payment_group_id {
                    self.notifications
                        .alert(
                            group,
                            &msg::manual_withdrawal_alert(
                                user.telegram_id,
                                amount,
                                &profile,
                                &txn.reference,
                            ),
                        )
                        .await;
                }
                self.reply(
                    chat_id,
                    &msg::withdrawal_submitted_manual(amount),
                    Some(keyboards::main_menu()),
                )
                .await
            }
            WithdrawalMode::Automatic => {
                match self.start_transfer(&profile, amount, &txn.reference).await {
                    Ok(()) => {
                        self.reply(
                            chat_id,
                            &msg::withdrawal_initiated(amount),
                            Some(keyboards::main_menu()),
                        )
                        .await
                    }
                    Err(e) => {
                        warn!(
                            user_id = user.telegram_id,
                            reference = %txn.reference,
                            error = %e,
                            "transfer initiation failed, refunding"
                        );
                        self.ledger
                            .fail_withdrawal(&txn.reference, Some(user.telegram_id), &e.to_string())
                            .await?;
                        self.reply(
                            chat_id,
                            &msg::withdrawal_transfer_failed(amount),
                            Some(keyboards::main_menu()),
                        )
                        .await
                    }
                }
            }
        }
    }

    async fn start_transfer(
        &self,
        profile: &crate::database::models::BankProfile,
        amount: Decimal,
        reference: &str,
    ) -> Result<(), PaymentError> {
        let recipient_code = match &profile.recipient_code {
            Some(code) => code.clone(),
            None => {
                self.gateway
                    .create_transfer_recipient(RecipientRequest {
                        name: profile.account_name.clone(),
                        account_number: profile.account_number.clone(),
                        bank_code: profile.bank_code.clone(),
                    })
                    .await?
            }
        };
        let receipt = self
            .gateway
            .initiate_transfer(TransferRequest {
                recipient_code,
                amount,
                reference: reference.to_string(),
                reason: "Wallet withdrawal".to_string(),
            })
            .await?;
        if receipt.status.is_rejected() {
            return Err(PaymentError::ProviderError {
                provider: "paystack".to_string(),
                message: format!("transfer {:?}", receipt.status),
                provider_code: None,
                retryable: false,
            });
        }
        info!(reference = %reference, transfer_code = ?receipt.transfer_code, status = ?receipt.status, "transfer initiated");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bank linking
    // ------------------------------------------------------------------

    async fn lookup_bank(&self, input: &str) -> Option<Bank> {
        if let Some(bank) = find_bank(&popular_banks(), input) {
            return Some(bank.clone());
        }
        let banks = self.provider_banks().await;
        find_bank(&banks, input).cloned()
    }

    async fn lookup_bank_code(&self, code: &str) -> Option<Bank> {
        if let Some(bank) = find_bank_by_code(&popular_banks(), code) {
            return Some(bank.clone());
        }
        let banks = self.provider_banks().await;
        find_bank_by_code(&banks, code).cloned()
    }

    async fn provider_banks(&self) -> Vec<Bank> {
        match self.gateway.list_banks().await {
            Ok(banks) => banks,
            Err(e) => {
                warn!(error = %e, "bank list unavailable");
                Vec::new()
            }
        }
    }

    async fn resolve_account(
        &self,
        chat_id: i64,
        account_number: String,
        bank: Bank,
    ) -> BotResult<()> {
        if let Err(reason) = validate_account_number(&account_number, &bank.code) {
            debug!(chat_id, bank = %bank.code, reason = %reason, "account number rejected");
            self.set_step(chat_id, ConversationStep::AwaitingAccountNumber)
                .await?;
            return self.reply(chat_id, msg::INVALID_ACCOUNT_NUMBER, None).await;
        }

        match self.gateway.resolve_account(&account_number, &bank.code).await {
            Ok(resolved) => {
                let text = msg::account_name_found(&resolved.account_name, &bank.name);
                self.set_step(
                    chat_id,
                    ConversationStep::AwaitingAccountNameConfirmation {
                        account_number,
                        bank_code: bank.code,
                        bank_name: bank.name,
                        account_name: resolved.account_name,
                    },
                )
                .await?;
                self.reply(chat_id, &text, Some(keyboards::confirm_account_name()))
                    .await
            }
            Err(e) => {
                warn!(chat_id, bank = %bank.code, error = %e, "account resolution failed");
                self.set_step(chat_id, ConversationStep::AwaitingAccountNumber)
                    .await?;
                self.reply(
                    chat_id,
                    &format!(
                        "{}\n\n{}",
                        msg::ACCOUNT_VERIFICATION_FAILED,
                        msg::PROMPT_ACCOUNT_NUMBER
                    ),
                    None,
                )
                .await
            }
        }
    }

    async fn confirm_account_name(
        &self,
        chat_id: i64,
        from: &Sender,
        step: ConversationStep,
        confirmed: bool,
    ) -> BotResult<()> {
        let ConversationStep::AwaitingAccountNameConfirmation {
            account_number,
            bank_code,
            bank_name,
            account_name,
        } = step
        else {
            return self.expired(chat_id).await;
        };

        if !confirmed {
            self.set_step(chat_id, ConversationStep::AwaitingAccountNumber)
                .await?;
            return self.reply(chat_id, msg::PROMPT_ACCOUNT_NUMBER, None).await;
        }

        let recipient_code = if self.gateway.transfers_enabled() {
            let request = RecipientRequest {
                name: account_name.clone(),
                account_number: account_number.clone(),
                bank_code: bank_code.clone(),
            };
            match self.gateway.create_transfer_recipient(request).await {
                Ok(code) => Some(code),
                Err(e) => {
                    warn!(chat_id, error = %e, "transfer recipient creation failed");
                    self.clear_step(chat_id).await?;
                    return self
                        .reply(
                            chat_id,
                            msg::ACCOUNT_VERIFICATION_FAILED,
                            Some(keyboards::main_menu()),
                        )
                        .await;
                }
            }
        } else {
            None
        };

        self.ensure_user(from).await?;
        let input = BankProfileInput {
            account_number: Some(account_number),
            bank_code: Some(bank_code),
            bank_name: Some(bank_name),
            account_name: Some(account_name),
            recipient_code,
        };
        match self.ledger.save_bank_profile(from.id, input).await {
            Ok(_) => {}
            Err(e) if e.is_validation() => {
                self.set_step(chat_id, ConversationStep::AwaitingAccountNumber)
                    .await?;
                return self.reply(chat_id, msg::INVALID_ACCOUNT_NUMBER, None).await;
            }
            Err(e) => return Err(e.into()),
        }
        self.clear_step(chat_id).await?;
        self.reply(
            chat_id,
            msg::BANK_ACCOUNT_UPDATED,
            Some(keyboards::main_menu()),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Investment
    // ------------------------------------------------------------------

    async fn investment_amount(
        &self,
        chat_id: i64,
        from: &Sender,
        plan_id: &str,
        input: &str,
    ) -> BotResult<()> {
        let Some(plan) = find_plan(plan_id) else {
            return self.expired(chat_id).await;
        };
        let Some(amount) = parse_amount(input) else {
            return self.reply(chat_id, msg::INVALID_AMOUNT, None).await;
        };
        if !plan.accepts(amount) {
            return self
                .reply(chat_id, &msg::outside_plan_limits(&plan), None)
                .await;
        }
        let user = self.ensure_user(from).await?;
        if amount > user.balance {
            return self
                .reply(chat_id, &msg::insufficient_balance(user.balance), None)
                .await;
        }

        self.set_step(
            chat_id,
            ConversationStep::AwaitingInvestmentConfirmation {
                plan_id: plan.id.to_string(),
                amount,
            },
        )
        .await?;
        self.reply(
            chat_id,
            &msg::investment_confirmation(&plan, amount),
            Some(keyboards::confirm_investment()),
        )
        .await
    }

    async fn confirm_investment(
        &self,
        chat_id: i64,
        from: &Sender,
        step: ConversationStep,
        confirmed: bool,
    ) -> BotResult<()> {
        let ConversationStep::AwaitingInvestmentConfirmation { plan_id, amount } = step else {
            return self.expired(chat_id).await;
        };
        self.clear_step(chat_id).await?;

        if !confirmed {
            return self
                .reply(chat_id, msg::INVESTMENT_CANCELLED, Some(keyboards::main_menu()))
                .await;
        }

        match self
            .ledger
            .open_investment(from.id, &plan_id, amount, Utc::now())
            .await
        {
            Ok((_, investment)) => {
                let Some(plan) = find_plan(&plan_id) else {
                    return Err(LedgerError::PlanNotFound(plan_id).into());
                };
                self.reply(
                    chat_id,
                    &msg::investment_success(&plan, amount, investment.maturity_date),
                    Some(keyboards::main_menu()),
                )
                .await
            }
            Err(LedgerError::Store(StoreError::InsufficientBalance { available, .. })) => {
                self.reply(
                    chat_id,
                    &msg::insufficient_balance(available),
                    Some(keyboards::main_menu()),
                )
                .await
            }
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Admin
    // ------------------------------------------------------------------

    async fn admin_menu(&self, chat_id: i64, action: AdminAction) -> BotResult<()> {
        match action {
            AdminAction::AddFunds | AdminAction::RemoveFunds => {
                let direction = if action == AdminAction::AddFunds {
                    AdminAdjustment::Add
                } else {
                    AdminAdjustment::Remove
                };
                self.set_step(
                    chat_id,
                    ConversationStep::AwaitingAdjustmentTarget { direction },
                )
                .await?;
                self.reply(chat_id, msg::ADMIN_PROMPT_USER_ID, None).await
            }
            AdminAction::PendingWithdrawals => self.show_pending_withdrawal(chat_id, 0).await,
            AdminAction::TopReferrers => {
                let referrers = self.ledger.top_referrers(TOP_REFERRERS_LIMIT).await?;
                self.reply(
                    chat_id,
                    &msg::top_referrers(&referrers),
                    Some(keyboards::admin_menu()),
                )
                .await
            }
            AdminAction::DeleteUser => {
                self.set_step(chat_id, ConversationStep::AwaitingDeleteTarget)
                    .await?;
                self.reply(chat_id, msg::ADMIN_PROMPT_USER_ID, None).await
            }
            AdminAction::Broadcast => {
                self.set_step(chat_id, ConversationStep::AwaitingBroadcastMessage)
                    .await?;
                self.reply(chat_id, msg::ADMIN_PROMPT_BROADCAST, None).await
            }
            AdminAction::MainMenu => {
                self.clear_step(chat_id).await?;
                self.reply(
                    chat_id,
                    "Back to the main menu.",
                    Some(keyboards::main_menu()),
                )
                .await
            }
        }
    }

    /// Parses an admin-supplied user id and confirms the user exists,
    /// replying (and keeping the step) when it does not.
    async fn existing_target(&self, chat_id: i64, input: &str) -> BotResult<Option<UserId>> {
        let Some(target) = parse_user_id(input) else {
            self.reply(chat_id, msg::ADMIN_INVALID_USER_ID, None).await?;
            return Ok(None);
        };
        if self.ledger.get_user(target).await?.is_none() {
            self.reply(chat_id, msg::ADMIN_USER_NOT_FOUND, None).await?;
            return Ok(None);
        }
        Ok(Some(target))
    }

    async fn adjustment_amount(
        &self,
        chat_id: i64,
        from: &Sender,
        direction: AdminAdjustment,
        target: UserId,
        input: &str,
    ) -> BotResult<()> {
        let Some(amount) = parse_amount(input) else {
            return self.reply(chat_id, msg::INVALID_AMOUNT, None).await;
        };

        match self
            .ledger
            .admin_adjust(from.id, target, amount, direction)
            .await
        {
            Ok(user) => {
                self.clear_step(chat_id).await?;
                self.reply(
                    chat_id,
                    &msg::admin_funds_adjusted(
                        direction == AdminAdjustment::Add,
                        amount,
                        target,
                        user.balance,
                    ),
                    Some(keyboards::admin_menu()),
                )
                .await
            }
            Err(LedgerError::Store(StoreError::InsufficientBalance { available, .. })) => {
                self.reply(chat_id, &msg::insufficient_balance(available), None)
                    .await
            }
            Err(LedgerError::Store(StoreError::UserNotFound(_))) => {
                self.clear_step(chat_id).await?;
                self.reply(
                    chat_id,
                    msg::ADMIN_USER_NOT_FOUND,
                    Some(keyboards::admin_menu()),
                )
                .await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn show_pending_withdrawal(&self, chat_id: i64, index: usize) -> BotResult<()> {
        let mut pending = self.ledger.pending_manual_withdrawals().await?;
        if pending.is_empty() {
            self.clear_step(chat_id).await?;
            return self
                .reply(
                    chat_id,
                    msg::ADMIN_NO_PENDING_WITHDRAWALS,
                    Some(keyboards::admin_menu()),
                )
                .await;
        }
        pending.sort_by(|a, b| {
            a.transaction
                .created_at
                .cmp(&b.transaction.created_at)
                .then_with(|| a.transaction.reference.cmp(&b.transaction.reference))
        });

        let index = index.min(pending.len() - 1);
        let item = &pending[index];
        self.set_step(chat_id, ConversationStep::ReviewingWithdrawals { index })
            .await?;
        self.reply(
            chat_id,
            &msg::pending_withdrawal(item, index, pending.len()),
            Some(keyboards::withdrawal_review(
                &item.transaction.reference,
                index,
                pending.len(),
            )),
        )
        .await
    }

    async fn approve_withdrawal(
        &self,
        chat_id: i64,
        from: &Sender,
        reference: &str,
        index: usize,
    ) -> BotResult<()> {
        match self.ledger.approve_withdrawal(reference, from.id).await {
            Ok(outcome) => {
                let user_id = outcome.user().telegram_id;
                let amount = outcome.transaction().amount.abs();
                info!(admin_id = from.id, user_id, reference = %reference, "manual withdrawal approved");
                self.notifications
                    .send_notification(user_id, NotificationType::WithdrawalApproved { amount })
                    .await;
                self.reply(chat_id, &msg::withdrawal_approved(reference), None)
                    .await?;
            }
            Err(LedgerError::NotActionable { status, .. }) => {
                self.reply(
                    chat_id,
                    &msg::withdrawal_not_actionable(reference, status.as_str()),
                    None,
                )
                .await?;
            }
            Err(LedgerError::Store(StoreError::TransactionNotFound(_))) => {
                self.reply(
                    chat_id,
                    &msg::withdrawal_not_actionable(reference, "gone"),
                    None,
                )
                .await?;
            }
            Err(e) => return Err(e.into()),
        }
        self.show_pending_withdrawal(chat_id, index).await
    }

    async fn decline_withdrawal(
        &self,
        chat_id: i64,
        from: &Sender,
        reference: &str,
        index: usize,
        input: &str,
    ) -> BotResult<()> {
        let reason = input.trim();
        if reason.is_empty() {
            return self
                .reply(chat_id, msg::ADMIN_PROMPT_DECLINE_REASON, None)
                .await;
        }

        match self
            .ledger
            .decline_withdrawal(reference, from.id, reason)
            .await
        {
            Ok(TransitionOutcome::Applied {
                user, transaction, ..
            }) => {
                let amount = transaction.amount.abs();
                info!(admin_id = from.id, user_id = user.telegram_id, reference = %reference, "manual withdrawal declined and refunded");
                self.notifications
                    .send_notification(
                        user.telegram_id,
                        NotificationType::WithdrawalDeclined {
                            amount,
                            reason: reason.to_string(),
                        },
                    )
                    .await;
                self.reply(
                    chat_id,
                    &msg::withdrawal_declined(reference, user.telegram_id, amount),
                    None,
                )
                .await?;
            }
            Ok(other) => {
                self.reply(
                    chat_id,
                    &msg::withdrawal_not_actionable(reference, other.transaction().status.as_str()),
                    None,
                )
                .await?;
            }
            Err(LedgerError::NotActionable { status, .. }) => {
                self.reply(
                    chat_id,
                    &msg::withdrawal_not_actionable(reference, status.as_str()),
                    None,
                )
                .await?;
            }
            Err(LedgerError::Store(StoreError::TransactionNotFound(_))) => {
                self.reply(
                    chat_id,
                    &msg::withdrawal_not_actionable(reference, "gone"),
                    None,
                )
                .await?;
            }
            Err(e) => return Err(e.into()),
        }
        self.show_pending_withdrawal(chat_id, index).await
    }

    async fn delete_user(&self, chat_id: i64, from: &Sender, target: UserId) -> BotResult<()> {
        self.clear_step(chat_id).await?;
        let deleted = self.ledger.delete_user(target).await?;
        if !deleted {
            return self
                .reply(
                    chat_id,
                    msg::ADMIN_USER_NOT_FOUND,
                    Some(keyboards::admin_menu()),
                )
                .await;
        }
        info!(admin_id = from.id, target, "user deleted by admin");
        if let Err(e) = self.sessions.clear(target).await {
            warn!(target, error = %e, "could not clear deleted user's session");
        }
        self.reply(
            chat_id,
            &msg::user_deleted(target),
            Some(keyboards::admin_menu()),
        )
        .await
    }

    async fn broadcast(&self, chat_id: i64, message: &str) -> BotResult<()> {
        let user_ids = self.ledger.list_user_ids().await?;
        if user_ids.is_empty() {
            return self
                .reply(
                    chat_id,
                    msg::ADMIN_BROADCAST_NO_USERS,
                    Some(keyboards::admin_menu()),
                )
                .await;
        }
        self.reply(chat_id, msg::ADMIN_BROADCAST_IN_PROGRESS, None)
            .await?;

        let text = escape_html(message);
        let results: Vec<bool> = stream::iter(user_ids)
            .map(|user_id| {
                let text = text.as_str();
                async move {
                    match self.messenger.send_message(user_id, text, None).await {
                        Ok(()) => true,
                        Err(e) => {
                            debug!(user_id, error = %e, "broadcast delivery failed");
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.broadcast_concurrency)
            .collect()
            .await;

        let sent = results.iter().filter(|ok| **ok).count();
        let failed = results.len() - sent;
        info!(sent, failed, "broadcast finished");
        self.reply(
            chat_id,
            &msg::broadcast_complete(sent, failed),
            Some(keyboards::admin_menu()),
        )
        .await
    }
}
