//! Payment provider integration (Paystack)

pub mod banks;
pub mod error;
pub mod paystack;
pub mod provider;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use paystack::{PaystackConfig, PaystackGateway};
pub use provider::PaymentGateway;
