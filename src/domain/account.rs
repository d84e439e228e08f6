use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Coins;
use crate::error::{LedgerError, LedgerResult};

pub type AccountId = i64;

/// Characters that may not appear in a username.
const FORBIDDEN_USERNAME_CHARS: &str = "\"'<>!@#$%^&*()=+[]{}|\\/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    /// Current spendable balance, never negative
    pub balance: Coins,
    /// Balance the account was opened with
    pub opening_balance: Coins,
    pub created_at: DateTime<Utc>,
}

/// Identifies an account either by its numeric id or by its unique username.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKey<'a> {
    Id(AccountId),
    Username(&'a str),
}

impl From<AccountId> for AccountKey<'_> {
    fn from(id: AccountId) -> Self {
        AccountKey::Id(id)
    }
}

impl<'a> From<&'a str> for AccountKey<'a> {
    fn from(username: &'a str) -> Self {
        AccountKey::Username(username)
    }
}

impl std::fmt::Display for AccountKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountKey::Id(id) => write!(f, "account #{}", id),
            AccountKey::Username(name) => write!(f, "account '{}'", name),
        }
    }
}

/// Balance snapshot returned by a balance lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountBalance {
    pub id: AccountId,
    pub balance: Coins,
}

pub fn validate_username(username: &str) -> LedgerResult<()> {
    if username.trim().is_empty() {
        return Err(LedgerError::InvalidArgument(
            "username must not be empty".to_string(),
        ));
    }
    if username.chars().any(|c| FORBIDDEN_USERNAME_CHARS.contains(c)) {
        return Err(LedgerError::InvalidArgument(format!(
            "username '{}' contains forbidden characters",
            username
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_usernames() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("bob_42").is_ok());
        assert!(validate_username("pink-hoody-fan").is_ok());
    }

    #[test]
    fn test_invalid_usernames() {
        assert!(validate_username("").is_err());
        assert!(validate_username("   ").is_err());
        assert!(validate_username("robert'); drop").is_err());
        assert!(validate_username("<script>").is_err());
        assert!(validate_username("a/b").is_err());
    }

    #[test]
    fn test_account_key_from() {
        assert_eq!(AccountKey::from(7), AccountKey::Id(7));
        assert_eq!(AccountKey::from("alice"), AccountKey::Username("alice"));
    }
}
