mod attribution;
mod code;
mod ledger;

pub use attribution::AttributionProcessor;
pub use code::{CodeGenerator, RandomCodeGenerator, CODE_LENGTH};
pub use ledger::ReferralLedger;

use crate::repositories::referrals::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ReferralError {
    #[error("username must not be empty")]
    InvalidUsername,
    #[error("could not find an unused referral code after {0} attempts")]
    CodeRetriesExhausted(u32),
    #[error(transparent)]
    Store(#[from] StoreError),
}
