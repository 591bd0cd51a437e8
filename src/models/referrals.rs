use serde::{Deserialize, Serialize};

/// A user that owns a referral code.
#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct ReferrerAccount {
    pub username: String,
    pub code: String,
    pub referral_count: i32,
    pub created_at: chrono::NaiveDateTime,
}

/// Result of an atomic account insert. A conflict on either unique column is
/// data for the caller, not an error.
#[derive(Clone, Debug)]
pub enum AccountInsert {
    Created(ReferrerAccount),
    /// An account already existed for the username; carries the winner's row.
    UsernameTaken(ReferrerAccount),
    /// The generated code collided with another account's code.
    CodeCollision,
}

/// Decision for one referral event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributionOutcome {
    NoCodeProvided,
    InvalidCode,
    SelfReferral,
    AlreadyAttributed,
    Attributed { referrer: String },
}
