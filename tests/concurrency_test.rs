mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{Accounts, balance, count_rows, test_service};
use merch_ledger::{Context, ErrorKind};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_cannot_overdraw() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Accounts::alice_and_bob(&service).await?;
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for _ in 0..2 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service
                .transfer(&Context::background(), "alice", "bob", 600)
                .await
        }));
    }

    let mut succeeded = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => succeeded += 1,
            Err(err) => {
                assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
                rejected += 1;
            }
        }
    }

    assert_eq!((succeeded, rejected), (1, 1));
    assert_eq!(balance(&service, "alice").await?, 400);
    assert_eq!(balance(&service, "bob").await?, 1600);
    assert_eq!(count_rows(&service, "transfers").await?, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_purchases_respect_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let (alice, _bob) = Accounts::alice_and_bob(&service).await?;
    let service = Arc::new(service);

    // pink-hoody costs 500; only two of these fit into 1000 coins
    let mut handles = Vec::new();
    for _ in 0..5 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service
                .purchase(&Context::background(), alice.id, "pink-hoody")
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => succeeded += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::InsufficientFunds),
        }
    }

    assert_eq!(succeeded, 2);
    assert_eq!(balance(&service, "alice").await?, 0);
    assert_eq!(count_rows(&service, "purchases").await?, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_complete() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Accounts::alice_and_bob(&service).await?;
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for i in 0..20 {
        let service = Arc::clone(&service);
        let (from, to) = if i % 2 == 0 {
            ("alice", "bob")
        } else {
            ("bob", "alice")
        };
        handles.push(tokio::spawn(async move {
            service
                .transfer(&Context::background(), from, to, 10)
                .await
        }));
    }

    for handle in handles {
        handle.await??;
    }

    assert_eq!(balance(&service, "alice").await?, 1000);
    assert_eq!(balance(&service, "bob").await?, 1000);
    assert_eq!(count_rows(&service, "transfers").await?, 20);

    let report = service.check_integrity(&Context::background()).await?;
    assert!(report.is_healthy(), "issues: {:?}", report.issues);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_during_writes_see_consistent_totals() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Accounts::alice_and_bob(&service).await?;
    let service = Arc::new(service);

    let writer = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            for _ in 0..15 {
                service
                    .transfer(&Context::background(), "alice", "bob", 7)
                    .await?;
            }
            Ok::<_, merch_ledger::LedgerError>(())
        })
    };

    for _ in 0..15 {
        let report = service.check_integrity(&Context::background()).await?;
        assert!(report.is_conserved);
        assert_eq!(report.circulating, 2000);
    }

    writer.await??;
    assert_eq!(balance(&service, "alice").await?, 1000 - 15 * 7);
    Ok(())
}
