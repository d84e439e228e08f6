use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, Coins};

pub type ProductId = i64;

/// A catalog item. The catalog is static and read-only to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Coins,
}

/// Append-only fact recording a completed buy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: i64,
    pub account_id: AccountId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
}

/// Purchases of one product by one account, summed over all events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    #[serde(rename = "type")]
    pub product: String,
    pub quantity: i64,
}
