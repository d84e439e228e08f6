use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, Coins};
use crate::error::{LedgerError, LedgerResult};

pub type TransferId = i64;

/// A transfer represents a completed peer-to-peer movement of coins.
/// Transfers are immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    /// Account whose balance decreased
    pub sender_id: AccountId,
    /// Account whose balance increased
    pub receiver_id: AccountId,
    /// Always positive
    pub amount: Coins,
    pub created_at: DateTime<Utc>,
}

/// Coins sent to one counterpart, summed over all transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentSummary {
    #[serde(rename = "toUser")]
    pub to_user: String,
    pub amount: Coins,
}

/// Coins received from one counterpart, summed over all transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedSummary {
    #[serde(rename = "fromUser")]
    pub from_user: String,
    pub amount: Coins,
}

/// Reject transfers that can never succeed, before touching the store.
pub fn validate_transfer(sender: &str, receiver: &str, amount: Coins) -> LedgerResult<()> {
    if amount <= 0 {
        return Err(LedgerError::InvalidArgument(format!(
            "transfer amount must be positive, got {}",
            amount
        )));
    }
    if sender == receiver {
        return Err(LedgerError::InvalidArgument(
            "sender and receiver must differ".to_string(),
        ));
    }
    Ok(())
}

/// Order in which the two balance rows of a transfer are written.
/// Rows are always touched in ascending id order so two opposite-direction
/// transfers cannot wait on each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrder {
    DebitFirst,
    CreditFirst,
}

pub fn write_order(sender_id: AccountId, receiver_id: AccountId) -> WriteOrder {
    if sender_id <= receiver_id {
        WriteOrder::DebitFirst
    } else {
        WriteOrder::CreditFirst
    }
}
