mod common;

use anyhow::Result;
use common::{ctx, test_service};
use merch_ledger::application::MarketplaceService;
use merch_ledger::{ErrorKind, LedgerConfig};
use tempfile::TempDir;

#[tokio::test]
async fn test_open_account_with_opening_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let account = service.open_account(&ctx(), "alice", "hash").await?;

    assert_eq!(account.username, "alice");
    assert_eq!(account.balance, 1000);
    assert_eq!(account.opening_balance, 1000);

    let loaded = service.account(&ctx(), "alice").await?;
    assert_eq!(loaded.id, account.id);
    assert_eq!(loaded.balance, 1000);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_username_conflicts() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service.open_account(&ctx(), "alice", "").await?;

    let err = service
        .open_account(&ctx(), "alice", "other")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    Ok(())
}

#[tokio::test]
async fn test_invalid_usernames_are_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;

    for username in ["", "al!ce", "bob'; --", "<script>"] {
        let err = service
            .open_account(&ctx(), username, "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{:?}", username);
    }
    Ok(())
}

#[tokio::test]
async fn test_unknown_account() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let err = service.account(&ctx(), "ghost").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_configured_opening_balance() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = LedgerConfig {
        opening_balance: 250,
        ..LedgerConfig::default()
    }
    .with_database(temp_dir.path().join("custom.db"));
    let service = MarketplaceService::init(config).await?;

    let account = service.open_account(&ctx(), "alice", "").await?;
    assert_eq!(account.balance, 250);

    // hoody costs 300, more than the configured opening balance
    let err = service.purchase(&ctx(), account.id, "hoody").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert_eq!(service.account(&ctx(), "alice").await?.balance, 250);

    service.purchase(&ctx(), account.id, "powerbank").await?;
    assert_eq!(service.account(&ctx(), "alice").await?.balance, 50);

    let report = service.check_integrity(&ctx()).await?;
    assert_eq!(report.issued, 250);
    assert_eq!(report.spent, 200);
    assert_eq!(report.circulating, 50);
    Ok(())
}

#[tokio::test]
async fn test_connect_reopens_existing_ledger() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = LedgerConfig::default().with_database(temp_dir.path().join("ledger.db"));

    {
        let service = MarketplaceService::init(config.clone()).await?;
        let alice = service.open_account(&ctx(), "alice", "").await?;
        service.purchase(&ctx(), alice.id, "cup").await?;
    }

    let service = MarketplaceService::connect(config).await?;
    assert_eq!(service.account(&ctx(), "alice").await?.balance, 980);
    Ok(())
}

#[tokio::test]
async fn test_connect_to_missing_database_fails() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = LedgerConfig::default().with_database(temp_dir.path().join("missing.db"));

    let err = MarketplaceService::connect(config).await.err();

    assert!(err.is_some_and(|e| e.kind() == ErrorKind::Unavailable));
    Ok(())
}

#[tokio::test]
async fn test_init_is_idempotent() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = LedgerConfig::default().with_database(temp_dir.path().join("ledger.db"));

    MarketplaceService::init(config.clone()).await?;
    let service = MarketplaceService::init(config).await?;

    assert_eq!(service.catalog(&ctx()).await?.len(), 10);
    Ok(())
}
