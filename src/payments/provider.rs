use crate::payments::error::PaymentResult;
use crate::payments::types::{
    Bank, ChargeRequest, ChargeSession, ChargeVerification, RecipientRequest, ResolvedAccount,
    TransferReceipt, TransferRequest,
};
use async_trait::async_trait;

/// Payment provider operations the bot relies on. Amounts are naira at this
/// boundary; implementations convert to the provider's minor unit.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_charge(&self, request: ChargeRequest) -> PaymentResult<ChargeSession>;

    async fn verify_charge(&self, reference: &str) -> PaymentResult<ChargeVerification>;

    async fn list_banks(&self) -> PaymentResult<Vec<Bank>>;

    async fn resolve_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> PaymentResult<ResolvedAccount>;

    /// Returns the recipient handle used by later transfers.
    async fn create_transfer_recipient(&self, request: RecipientRequest) -> PaymentResult<String>;

    async fn initiate_transfer(&self, request: TransferRequest) -> PaymentResult<TransferReceipt>;

    /// `false` when no secret is configured.
    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool;

    fn transfers_enabled(&self) -> bool;
}
