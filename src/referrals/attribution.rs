use std::sync::Arc;

use crate::models::referrals::AttributionOutcome;
use crate::repositories::referrals::ReferralStore;

use super::ReferralError;

/// Decides the fate of a single referral event.
///
/// Checks run in a fixed order: code presence, code resolution, self-referral
/// against the resolved referrer, then prior attribution. The final check and
/// the credit are one atomic store operation, so a retried or racing event
/// increments the referrer's counter at most once per referred identity.
#[derive(Clone)]
pub struct AttributionProcessor {
    store: Arc<dyn ReferralStore>,
}

impl AttributionProcessor {
    pub fn new(store: Arc<dyn ReferralStore>) -> Self {
        AttributionProcessor { store }
    }

    pub async fn process(
        &self,
        code: Option<&str>,
        referred_id: i64,
        referred_username: Option<&str>,
    ) -> Result<AttributionOutcome, ReferralError> {
        let code = match code {
            Some(code) if !code.trim().is_empty() => code,
            _ => return Ok(AttributionOutcome::NoCodeProvided),
        };

        let referrer = match self.store.find_account_by_code(code).await? {
            Some(account) => account,
            None => return Ok(AttributionOutcome::InvalidCode),
        };

        if referred_username == Some(referrer.username.as_str()) {
            return Ok(AttributionOutcome::SelfReferral);
        }

        if self
            .store
            .record_attribution(referred_id, &referrer.username)
            .await?
        {
            Ok(AttributionOutcome::Attributed {
                referrer: referrer.username,
            })
        } else {
            Ok(AttributionOutcome::AlreadyAttributed)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::task::JoinSet;

    use super::*;
    use crate::referrals::ReferralLedger;
    use crate::repositories::referrals::testing::{MemoryStore, UnavailableStore};
    use crate::repositories::referrals::ReferralStore;

    async fn referrer_with_code(store: &Arc<MemoryStore>, username: &str) -> String {
        let ledger = ReferralLedger::new(store.clone() as Arc<dyn ReferralStore>);
        ledger.issue_or_get_code(username).await.unwrap()
    }

    #[tokio::test]
    async fn absent_or_empty_code_short_circuits() {
        let processor = AttributionProcessor::new(Arc::new(MemoryStore::new()));
        assert_eq!(
            processor.process(None, 1, Some("bob")).await.unwrap(),
            AttributionOutcome::NoCodeProvided
        );
        assert_eq!(
            processor.process(Some(""), 1, Some("bob")).await.unwrap(),
            AttributionOutcome::NoCodeProvided
        );
    }

    #[tokio::test]
    async fn unknown_code_is_invalid() {
        let processor = AttributionProcessor::new(Arc::new(MemoryStore::new()));
        assert_eq!(
            processor
                .process(Some("doesnotexist"), 1, Some("bob"))
                .await
                .unwrap(),
            AttributionOutcome::InvalidCode
        );
    }

    #[tokio::test]
    async fn invalid_code_never_reaches_the_self_referral_check() {
        let store = Arc::new(MemoryStore::new());
        referrer_with_code(&store, "alice").await;
        let processor = AttributionProcessor::new(store);

        // Alice referring herself with a bogus code is still just InvalidCode.
        assert_eq!(
            processor
                .process(Some("doesnotexist"), 1, Some("alice"))
                .await
                .unwrap(),
            AttributionOutcome::InvalidCode
        );
    }

    #[tokio::test]
    async fn self_referral_is_rejected_without_side_effects() {
        let store = Arc::new(MemoryStore::new());
        let code = referrer_with_code(&store, "alice").await;
        let ledger = ReferralLedger::new(store.clone() as Arc<dyn ReferralStore>);
        let processor = AttributionProcessor::new(store.clone());

        assert_eq!(
            processor
                .process(Some(&code), 1, Some("alice"))
                .await
                .unwrap(),
            AttributionOutcome::SelfReferral
        );
        assert!(!store.has_attribution_record(1).await.unwrap());
        assert_eq!(ledger.get_count("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn a_referred_user_without_a_username_cannot_be_a_self_referral() {
        let store = Arc::new(MemoryStore::new());
        let code = referrer_with_code(&store, "alice").await;
        let processor = AttributionProcessor::new(store);

        assert_eq!(
            processor.process(Some(&code), 7, None).await.unwrap(),
            AttributionOutcome::Attributed {
                referrer: "alice".into()
            }
        );
    }

    #[tokio::test]
    async fn first_attribution_credits_once_and_retries_are_noops() {
        let store = Arc::new(MemoryStore::new());
        let code = referrer_with_code(&store, "alice").await;
        let ledger = ReferralLedger::new(store.clone() as Arc<dyn ReferralStore>);
        let processor = AttributionProcessor::new(store.clone());

        assert_eq!(
            processor
                .process(Some(&code), 99, Some("bob"))
                .await
                .unwrap(),
            AttributionOutcome::Attributed {
                referrer: "alice".into()
            }
        );
        assert_eq!(ledger.get_count("alice").await.unwrap(), 1);
        assert!(store.has_attribution_record(99).await.unwrap());

        // Identical retry converges instead of double counting.
        assert_eq!(
            processor
                .process(Some(&code), 99, Some("bob"))
                .await
                .unwrap(),
            AttributionOutcome::AlreadyAttributed
        );
        assert_eq!(ledger.get_count("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn an_identity_is_attributed_to_one_referrer_forever() {
        let store = Arc::new(MemoryStore::new());
        let alice_code = referrer_with_code(&store, "alice").await;
        let carol_code = referrer_with_code(&store, "carol").await;
        let ledger = ReferralLedger::new(store.clone() as Arc<dyn ReferralStore>);
        let processor = AttributionProcessor::new(store);

        processor
            .process(Some(&alice_code), 99, Some("bob"))
            .await
            .unwrap();

        // Bob trying a second referrer's code changes nothing.
        assert_eq!(
            processor
                .process(Some(&carol_code), 99, Some("bob"))
                .await
                .unwrap(),
            AttributionOutcome::AlreadyAttributed
        );
        assert_eq!(ledger.get_count("alice").await.unwrap(), 1);
        assert_eq!(ledger.get_count("carol").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn racing_attributions_credit_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let code = referrer_with_code(&store, "alice").await;
        let ledger = ReferralLedger::new(store.clone() as Arc<dyn ReferralStore>);
        let processor = AttributionProcessor::new(store);

        let mut tasks = JoinSet::new();
        for _ in 0..16 {
            let processor = processor.clone();
            let code = code.clone();
            tasks.spawn(async move {
                processor
                    .process(Some(&code), 99, Some("bob"))
                    .await
                    .unwrap()
            });
        }

        let mut attributed = 0;
        while let Some(outcome) = tasks.join_next().await {
            if matches!(outcome.unwrap(), AttributionOutcome::Attributed { .. }) {
                attributed += 1;
            }
        }

        assert_eq!(attributed, 1);
        assert_eq!(ledger.get_count("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn store_outage_is_an_error_not_an_invalid_code() {
        let processor = AttributionProcessor::new(Arc::new(UnavailableStore));
        assert!(matches!(
            processor.process(Some("somecode"), 1, Some("bob")).await,
            Err(ReferralError::Store(_))
        ));
    }
}
