use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::referrals::{AccountInsert, ReferrerAccount};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("persistence unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Persistence contract consumed by the referral core. Both uniqueness checks
/// ("account if absent", "attribution if absent") are enforced here, not by
/// read-then-write in application code, so concurrent processes stay correct.
#[async_trait]
pub trait ReferralStore: Send + Sync {
    async fn find_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<ReferrerAccount>, StoreError>;

    /// Atomic insert. Returns the pre-existing account on a username conflict
    /// and `CodeCollision` on a code conflict; never errors for either.
    async fn insert_account_if_absent(
        &self,
        username: &str,
        code: &str,
    ) -> Result<AccountInsert, StoreError>;

    async fn find_account_by_code(&self, code: &str)
        -> Result<Option<ReferrerAccount>, StoreError>;

    /// Adds 1 to the named account's counter. Returns rows affected (0 or 1).
    async fn increment_account_count(&self, username: &str) -> Result<u64, StoreError>;

    async fn has_attribution_record(&self, referred_id: i64) -> Result<bool, StoreError>;

    /// Records the attribution and credits the referrer as one transaction.
    /// Returns false, with nothing applied, if `referred_id` was already
    /// attributed.
    async fn record_attribution(
        &self,
        referred_id: i64,
        referrer_username: &str,
    ) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct PgReferralRepository {
    conn: PgPool,
}

impl PgReferralRepository {
    pub fn new(conn: PgPool) -> Self {
        PgReferralRepository { conn }
    }
}

/// Creates the referral tables if they do not exist yet.
pub async fn init_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS referrers (
            username VARCHAR(255) PRIMARY KEY,
            code VARCHAR(15) UNIQUE NOT NULL,
            referral_count INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attributions (
            referred_id BIGINT PRIMARY KEY,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[async_trait]
impl ReferralStore for PgReferralRepository {
    async fn find_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<ReferrerAccount>, StoreError> {
        let account = sqlx::query_as::<_, ReferrerAccount>(
            "SELECT username, code, referral_count, created_at FROM referrers WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.conn)
        .await?;

        Ok(account)
    }

    async fn insert_account_if_absent(
        &self,
        username: &str,
        code: &str,
    ) -> Result<AccountInsert, StoreError> {
        let inserted = sqlx::query_as::<_, ReferrerAccount>(
            r#"
            INSERT INTO referrers (username, code)
            VALUES ($1, $2)
            ON CONFLICT (username) DO NOTHING
            RETURNING username, code, referral_count, created_at
            "#,
        )
        .bind(username)
        .bind(code)
        .fetch_optional(&self.conn)
        .await;

        match inserted {
            Ok(Some(account)) => Ok(AccountInsert::Created(account)),
            // The username conflict was suppressed; read the winner's row.
            Ok(None) => match self.find_account_by_username(username).await? {
                Some(existing) => Ok(AccountInsert::UsernameTaken(existing)),
                None => Ok(AccountInsert::CodeCollision),
            },
            // ON CONFLICT only covers the username key; a duplicate code
            // still raises a unique violation.
            Err(ref e) if is_unique_violation(e) => Ok(AccountInsert::CodeCollision),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_account_by_code(
        &self,
        code: &str,
    ) -> Result<Option<ReferrerAccount>, StoreError> {
        let account = sqlx::query_as::<_, ReferrerAccount>(
            "SELECT username, code, referral_count, created_at FROM referrers WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.conn)
        .await?;

        Ok(account)
    }

    async fn increment_account_count(&self, username: &str) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE referrers SET referral_count = referral_count + 1 WHERE username = $1")
                .bind(username)
                .execute(&self.conn)
                .await?;

        Ok(result.rows_affected())
    }

    async fn has_attribution_record(&self, referred_id: i64) -> Result<bool, StoreError> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT referred_id FROM attributions WHERE referred_id = $1")
                .bind(referred_id)
                .fetch_optional(&self.conn)
                .await?;

        Ok(found.is_some())
    }

    async fn record_attribution(
        &self,
        referred_id: i64,
        referrer_username: &str,
    ) -> Result<bool, StoreError> {
        let mut tx = self.conn.begin().await?;

        let inserted =
            sqlx::query("INSERT INTO attributions (referred_id) VALUES ($1) ON CONFLICT (referred_id) DO NOTHING")
                .bind(referred_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE referrers SET referral_count = referral_count + 1 WHERE username = $1")
            .bind(referrer_username)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::*;

    /// In-memory [`ReferralStore`] with the same atomicity semantics as the
    /// Postgres repository: every mutation holds one lock, so insert-if-absent
    /// and the attribution pair are indivisible.
    #[derive(Default)]
    pub struct MemoryStore {
        inner: Mutex<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        accounts: HashMap<String, ReferrerAccount>,
        attributions: HashSet<i64>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl ReferralStore for MemoryStore {
        async fn find_account_by_username(
            &self,
            username: &str,
        ) -> Result<Option<ReferrerAccount>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.accounts.get(username).cloned())
        }

        async fn insert_account_if_absent(
            &self,
            username: &str,
            code: &str,
        ) -> Result<AccountInsert, StoreError> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(existing) = inner.accounts.get(username) {
                return Ok(AccountInsert::UsernameTaken(existing.clone()));
            }
            if inner.accounts.values().any(|a| a.code == code) {
                return Ok(AccountInsert::CodeCollision);
            }
            let account = ReferrerAccount {
                username: username.to_string(),
                code: code.to_string(),
                referral_count: 0,
                created_at: chrono::Utc::now().naive_utc(),
            };
            inner.accounts.insert(username.to_string(), account.clone());
            Ok(AccountInsert::Created(account))
        }

        async fn find_account_by_code(
            &self,
            code: &str,
        ) -> Result<Option<ReferrerAccount>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.accounts.values().find(|a| a.code == code).cloned())
        }

        async fn increment_account_count(&self, username: &str) -> Result<u64, StoreError> {
            let mut inner = self.inner.lock().unwrap();
            match inner.accounts.get_mut(username) {
                Some(account) => {
                    account.referral_count += 1;
                    Ok(1)
                }
                None => Ok(0),
            }
        }

        async fn has_attribution_record(&self, referred_id: i64) -> Result<bool, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.attributions.contains(&referred_id))
        }

        async fn record_attribution(
            &self,
            referred_id: i64,
            referrer_username: &str,
        ) -> Result<bool, StoreError> {
            let mut inner = self.inner.lock().unwrap();
            if !inner.attributions.insert(referred_id) {
                return Ok(false);
            }
            if let Some(account) = inner.accounts.get_mut(referrer_username) {
                account.referral_count += 1;
            }
            Ok(true)
        }
    }

    /// Store that fails every call, for asserting that outages surface as
    /// errors instead of business outcomes.
    pub struct UnavailableStore;

    #[async_trait]
    impl ReferralStore for UnavailableStore {
        async fn find_account_by_username(
            &self,
            _username: &str,
        ) -> Result<Option<ReferrerAccount>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn insert_account_if_absent(
            &self,
            _username: &str,
            _code: &str,
        ) -> Result<AccountInsert, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn find_account_by_code(
            &self,
            _code: &str,
        ) -> Result<Option<ReferrerAccount>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn increment_account_count(&self, _username: &str) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn has_attribution_record(&self, _referred_id: i64) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn record_attribution(
            &self,
            _referred_id: i64,
            _referrer_username: &str,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }
}
