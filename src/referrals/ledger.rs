use std::sync::Arc;

use crate::models::referrals::AccountInsert;
use crate::repositories::referrals::ReferralStore;

use super::code::{CodeGenerator, RandomCodeGenerator};
use super::ReferralError;

const MAX_CODE_ATTEMPTS: u32 = 5;

/// Owns the username → code mapping and the referral counters. One code per
/// username, ever; all uniqueness is enforced at the store so concurrent
/// callers and concurrent processes converge on one account.
#[derive(Clone)]
pub struct ReferralLedger {
    store: Arc<dyn ReferralStore>,
    codes: Arc<dyn CodeGenerator>,
}

impl ReferralLedger {
    pub fn new(store: Arc<dyn ReferralStore>) -> Self {
        Self::with_generator(store, Arc::new(RandomCodeGenerator))
    }

    pub fn with_generator(store: Arc<dyn ReferralStore>, codes: Arc<dyn CodeGenerator>) -> Self {
        ReferralLedger { store, codes }
    }

    /// Returns the caller's referral code, creating the account on first
    /// request. Re-issuing never changes an existing code or counter; if two
    /// callers race to create the same account, the loser returns the
    /// winner's code.
    pub async fn issue_or_get_code(&self, username: &str) -> Result<String, ReferralError> {
        if username.trim().is_empty() {
            return Err(ReferralError::InvalidUsername);
        }

        if let Some(account) = self.store.find_account_by_username(username).await? {
            return Ok(account.code);
        }

        for attempt in 0..MAX_CODE_ATTEMPTS {
            let code = self.codes.generate();
            match self.store.insert_account_if_absent(username, &code).await? {
                AccountInsert::Created(account) => return Ok(account.code),
                AccountInsert::UsernameTaken(account) => return Ok(account.code),
                AccountInsert::CodeCollision => {
                    log::warn!(
                        "Referral code collision for {} (attempt {}), regenerating.",
                        username,
                        attempt + 1
                    );
                }
            }
        }

        Err(ReferralError::CodeRetriesExhausted(MAX_CODE_ATTEMPTS))
    }

    pub async fn lookup_by_code(&self, code: &str) -> Result<Option<String>, ReferralError> {
        let account = self.store.find_account_by_code(code).await?;
        Ok(account.map(|a| a.username))
    }

    pub async fn lookup_code_by_username(
        &self,
        username: &str,
    ) -> Result<Option<String>, ReferralError> {
        let account = self.store.find_account_by_username(username).await?;
        Ok(account.map(|a| a.code))
    }

    /// Referral count for the account, or 0 when no account exists. Callers
    /// that must tell the two apart should probe with
    /// [`lookup_code_by_username`](Self::lookup_code_by_username) first.
    pub async fn get_count(&self, username: &str) -> Result<i32, ReferralError> {
        let account = self.store.find_account_by_username(username).await?;
        Ok(account.map(|a| a.referral_count).unwrap_or(0))
    }

    /// Adds 1 to the account's counter. Returns false as a no-op when the
    /// account is gone, rather than failing the caller.
    pub async fn increment_count(&self, username: &str) -> Result<bool, ReferralError> {
        let rows = self.store.increment_account_count(username).await?;
        Ok(rows > 0)
    }
}
