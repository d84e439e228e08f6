// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use merch_ledger::application::MarketplaceService;
use merch_ledger::domain::{Account, Coins};
use merch_ledger::{Context, LedgerConfig};
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(MarketplaceService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let config = LedgerConfig::default().with_database(temp_dir.path().join("test.db"));
    let service = MarketplaceService::init(config).await?;
    Ok((service, temp_dir))
}

pub fn ctx() -> Context {
    Context::background()
}

/// Current balance of `username`, read outside any transaction.
pub async fn balance(service: &MarketplaceService, username: &str) -> Result<Coins> {
    Ok(service.account(&ctx(), username).await?.balance)
}

pub async fn count_rows(service: &MarketplaceService, table: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(service.repository().pool())
        .await?;
    Ok(count)
}

/// Test fixture: standard accounts
pub struct Accounts;

impl Accounts {
    /// Open alice and bob with the default opening balance (1000)
    pub async fn alice_and_bob(service: &MarketplaceService) -> Result<(Account, Account)> {
        let alice = service.open_account(&ctx(), "alice", "hash-a").await?;
        let bob = service.open_account(&ctx(), "bob", "hash-b").await?;
        Ok((alice, bob))
    }

    /// Drain an account down to `target` coins by sending the rest to a sink account
    pub async fn set_balance(
        service: &MarketplaceService,
        username: &str,
        target: Coins,
    ) -> Result<()> {
        let current = balance(service, username).await?;
        if current > target {
            if service.account(&ctx(), "sink").await.is_err() {
                service.open_account(&ctx(), "sink", "").await?;
            }
            service
                .transfer(&ctx(), username, "sink", current - target)
                .await?;
        }
        Ok(())
    }
}
