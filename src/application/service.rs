use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::config::LedgerConfig;
use crate::domain::{
    build_integrity_report, validate_transfer, validate_username, write_order, Account,
    AccountId, AccountKey, Coins, IntegrityReport, InventoryItem, Product, Purchase,
    ReceivedSummary, SentSummary, Transfer, WriteOrder,
};
use crate::error::{LedgerError, LedgerResult};
use crate::storage::{Context, Repository, TxManager, TxMode};

/// Application service for the marketplace: purchases, transfers and account
/// summaries. Every mutation runs as one unit of work.
pub struct MarketplaceService {
    repo: Repository,
    tx: TxManager,
    config: LedgerConfig,
}

/// Result of a completed purchase
#[derive(Debug, Clone)]
pub struct PurchaseResult {
    pub purchase: Purchase,
    pub product: Product,
}

/// Account summary: balance, inventory and coin history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    pub coins: Coins,
    pub inventory: Vec<InventoryItem>,
    pub coin_history: CoinHistory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinHistory {
    pub received: Vec<ReceivedSummary>,
    pub sent: Vec<SentSummary>,
}

impl MarketplaceService {
    /// Create a new service over the given repository.
    pub fn new(repo: Repository, config: LedgerConfig) -> Self {
        let tx = TxManager::new(repo.pool().clone());
        Self { repo, tx, config }
    }

    /// Create (if needed) and migrate the database, then build the service.
    pub async fn init(config: LedgerConfig) -> LedgerResult<Self> {
        let repo = Repository::init(&config).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database.
    pub async fn connect(config: LedgerConfig) -> LedgerResult<Self> {
        let repo = Repository::connect(&config, false).await?;
        Ok(Self::new(repo, config))
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// A fresh context carrying the configured operation deadline, if any.
    pub fn context(&self) -> Context {
        match self.config.operation_timeout {
            Some(timeout) => Context::background().with_timeout(timeout),
            None => Context::background(),
        }
    }

    /// Run several ledger calls as one unit of work. Service calls made with
    /// the context handed to `work` join its transaction.
    pub async fn run_in_transaction<T, F, Fut>(
        &self,
        ctx: &Context,
        mode: TxMode,
        work: F,
    ) -> LedgerResult<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        self.tx.run(ctx, mode, work).await
    }

    // ========================
    // Account operations
    // ========================

    /// Open an account with the configured opening balance.
    pub async fn open_account(
        &self,
        ctx: &Context,
        username: &str,
        password_hash: &str,
    ) -> LedgerResult<Account> {
        validate_username(username)?;
        let account = self
            .repo
            .create_account(ctx, username, password_hash, self.config.opening_balance)
            .await?;
        tracing::info!(account = account.id, username, "account opened");
        Ok(account)
    }

    /// Get an account by username.
    pub async fn account(&self, ctx: &Context, username: &str) -> LedgerResult<Account> {
        self.repo.account(ctx, AccountKey::Username(username)).await
    }

    /// List the catalog.
    pub async fn catalog(&self, ctx: &Context) -> LedgerResult<Vec<Product>> {
        self.repo.catalog(ctx).await
    }

    // ========================
    // Ledger operations
    // ========================

    /// Buy one unit of `product_name` for `account_id`.
    ///
    /// The guarded debit and the purchase record commit together or not at all.
    pub async fn purchase(
        &self,
        ctx: &Context,
        account_id: AccountId,
        product_name: &str,
    ) -> LedgerResult<PurchaseResult> {
        let result = self
            .tx
            .run(ctx, TxMode::ReadWrite, |ctx| async move {
                let product = self
                    .repo
                    .debit_for_purchase(&ctx, account_id, product_name)
                    .await?;
                let purchase = self.repo.record_purchase(&ctx, account_id, product.id).await?;
                Ok::<_, LedgerError>(PurchaseResult { purchase, product })
            })
            .await?;

        tracing::info!(
            account = account_id,
            product = %result.product.name,
            price = result.product.price,
            "purchase completed"
        );
        Ok(result)
    }

    /// Move `amount` coins from `sender` to `receiver`.
    pub async fn transfer(
        &self,
        ctx: &Context,
        sender: &str,
        receiver: &str,
        amount: Coins,
    ) -> LedgerResult<Transfer> {
        validate_transfer(sender, receiver, amount)?;

        let transfer = self
            .tx
            .run(ctx, TxMode::ReadWrite, |ctx| async move {
                let from = self.repo.balance_of(&ctx, AccountKey::Username(sender)).await?;
                // Fail fast; the guarded debit below is what actually enforces funds.
                if from.balance < amount {
                    return Err(LedgerError::InsufficientFunds {
                        account: AccountKey::Username(sender).to_string(),
                        balance: from.balance,
                        required: amount,
                    });
                }
                let to = self
                    .repo
                    .balance_of(&ctx, AccountKey::Username(receiver))
                    .await?;

                match write_order(from.id, to.id) {
                    WriteOrder::DebitFirst => {
                        self.repo.debit(&ctx, AccountKey::Username(sender), amount).await?;
                        self.repo.credit(&ctx, AccountKey::Username(receiver), amount).await?;
                    }
                    WriteOrder::CreditFirst => {
                        self.repo.credit(&ctx, AccountKey::Username(receiver), amount).await?;
                        self.repo.debit(&ctx, AccountKey::Username(sender), amount).await?;
                    }
                }

                self.repo.record_transfer(&ctx, from.id, to.id, amount).await
            })
            .await?;

        tracing::info!(
            transfer = transfer.id,
            sender,
            receiver,
            amount,
            "transfer completed"
        );
        Ok(transfer)
    }

    /// Balance, inventory and coin history of `username`, read from one snapshot.
    pub async fn info(&self, ctx: &Context, username: &str) -> LedgerResult<Info> {
        self.tx
            .run(ctx, TxMode::ReadOnly, |ctx| async move {
                let account = self
                    .repo
                    .balance_of(&ctx, AccountKey::Username(username))
                    .await?;
                let inventory = self.repo.purchase_history(&ctx, account.id).await?;
                let sent = self.repo.sent_history(&ctx, account.id).await?;
                let received = self.repo.received_history(&ctx, account.id).await?;

                Ok::<_, LedgerError>(Info {
                    coins: account.balance,
                    inventory,
                    coin_history: CoinHistory { received, sent },
                })
            })
            .await
    }

    // ========================
    // Integrity operations
    // ========================

    /// Check ledger integrity and return a report.
    pub async fn check_integrity(&self, ctx: &Context) -> LedgerResult<IntegrityReport> {
        let stats = self
            .tx
            .run(ctx, TxMode::ReadOnly, |ctx| async move {
                self.repo.integrity_stats(&ctx).await
            })
            .await?;

        Ok(build_integrity_report(&stats))
    }
}
