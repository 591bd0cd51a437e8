pub mod referrals;
pub mod telegram;
