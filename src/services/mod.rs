//! Services module for business logic and integrations

pub mod investment_plans;
pub mod ledger;
pub mod notification;
pub mod reference;
pub mod webhook_processor;

pub use ledger::{LedgerError, LedgerResult, LedgerService};
pub use notification::{NotificationService, NotificationType};
pub use webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookProcessorError};
