use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite, SqlitePool};

use crate::config::LedgerConfig;
use crate::domain::{
    Account, AccountBalance, AccountId, AccountKey, Coins, IntegrityStats, InventoryItem, Product,
    ProductId, Purchase, ReceivedSummary, SentSummary, Transfer,
};
use crate::error::{ErrorKind, LedgerError, LedgerResult};

use super::{Context, MIGRATION_001_INITIAL, MIGRATION_002_CATALOG};

/// Repository for balances, the catalog and the purchase/transfer facts.
///
/// Every ledger operation is a single statement issued on the connection the
/// given [`Context`] resolves to, so it joins whatever transaction the caller
/// is in.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the SQLite database described by `config`.
    pub async fn connect(config: &LedgerConfig, create_if_missing: bool) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database_path)
            .create_if_missing(create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to database {}",
                    config.database_path.display()
                )
            })?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        sqlx::query(MIGRATION_002_CATALOG)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;

        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(config: &LedgerConfig) -> Result<Self> {
        let repo = Self::connect(config, true).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================
    // Account operations
    // ========================

    /// Open a new account holding `opening_balance` coins.
    pub async fn create_account(
        &self,
        ctx: &Context,
        username: &str,
        password_hash: &str,
        opening_balance: Coins,
    ) -> LedgerResult<Account> {
        let created_at = Utc::now();
        let mut conn = ctx.connection(&self.pool).await?;
        let row = sqlx::query(
            r#"
            INSERT INTO accounts (username, password_hash, balance, opening_balance, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(opening_balance)
        .bind(opening_balance)
        .bind(created_at.to_rfc3339())
        .fetch_one(&mut *conn)
        .await
        .map_err(store_error("create_account"))?;

        Ok(Account {
            id: row.get("id"),
            username: username.to_string(),
            balance: opening_balance,
            opening_balance,
            created_at,
        })
    }

    /// Load an account by id or username.
    pub async fn account(&self, ctx: &Context, key: AccountKey<'_>) -> LedgerResult<Account> {
        let sql = format!(
            "SELECT id, username, balance, opening_balance, created_at FROM accounts WHERE {} = ?",
            key_column(key)
        );
        let mut conn = ctx.connection(&self.pool).await?;
        let row = bind_key(sqlx::query(&sql), key)
            .fetch_optional(&mut *conn)
            .await
            .map_err(store_error("account"))?;

        match row {
            Some(row) => Ok(Self::row_to_account(&row)?),
            None => Err(LedgerError::NotFound(key.to_string())),
        }
    }

    /// Current balance and id of an account.
    pub async fn balance_of(
        &self,
        ctx: &Context,
        key: AccountKey<'_>,
    ) -> LedgerResult<AccountBalance> {
        let sql = format!(
            "SELECT id, balance FROM accounts WHERE {} = ?",
            key_column(key)
        );
        let mut conn = ctx.connection(&self.pool).await?;
        let row = bind_key(sqlx::query(&sql), key)
            .fetch_optional(&mut *conn)
            .await
            .map_err(store_error("balance_of"))?;

        match row {
            Some(row) => Ok(AccountBalance {
                id: row.get("id"),
                balance: row.get("balance"),
            }),
            None => Err(LedgerError::NotFound(key.to_string())),
        }
    }

    /// Decrement a balance by `amount`, guarded by `balance >= amount` in the
    /// same statement. Returns the new balance.
    pub async fn debit(
        &self,
        ctx: &Context,
        key: AccountKey<'_>,
        amount: Coins,
    ) -> LedgerResult<AccountBalance> {
        ensure_positive(amount)?;
        let sql = format!(
            r#"
            UPDATE accounts
            SET balance = balance - ?
            WHERE {} = ? AND balance >= ?
            RETURNING id, balance
            "#,
            key_column(key)
        );

        let row = {
            let mut conn = ctx.connection(&self.pool).await?;
            bind_key(sqlx::query(&sql).bind(amount), key)
                .bind(amount)
                .fetch_optional(&mut *conn)
                .await
                .map_err(store_error("debit"))?
        };

        match row {
            Some(row) => Ok(AccountBalance {
                id: row.get("id"),
                balance: row.get("balance"),
            }),
            None => Err(self.rejected_debit(ctx, key, amount).await),
        }
    }

    /// Increment a balance by `amount`. Returns the credited account id.
    pub async fn credit(
        &self,
        ctx: &Context,
        key: AccountKey<'_>,
        amount: Coins,
    ) -> LedgerResult<AccountId> {
        ensure_positive(amount)?;
        let sql = format!(
            "UPDATE accounts SET balance = balance + ? WHERE {} = ? RETURNING id",
            key_column(key)
        );
        let mut conn = ctx.connection(&self.pool).await?;
        let row = bind_key(sqlx::query(&sql).bind(amount), key)
            .fetch_optional(&mut *conn)
            .await
            .map_err(store_error("credit"))?;

        match row {
            Some(row) => Ok(row.get("id")),
            None => Err(LedgerError::NotFound(key.to_string())),
        }
    }

    /// Work out why a guarded debit matched no row.
    async fn rejected_debit(&self, ctx: &Context, key: AccountKey<'_>, required: Coins) -> LedgerError {
        match self.balance_of(ctx, key).await {
            Ok(current) => {
                tracing::warn!(%key, balance = current.balance, required, "debit rejected");
                LedgerError::InsufficientFunds {
                    account: key.to_string(),
                    balance: current.balance,
                    required,
                }
            }
            Err(err) => err,
        }
    }

    // ========================
    // Catalog operations
    // ========================

    /// Get a product by name.
    pub async fn product(&self, ctx: &Context, name: &str) -> LedgerResult<Product> {
        let mut conn = ctx.connection(&self.pool).await?;
        let row = sqlx::query("SELECT id, name, price FROM products WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await
            .map_err(store_error("product"))?;

        match row {
            Some(row) => Ok(Self::row_to_product(&row)),
            None => Err(LedgerError::NotFound(format!("product '{}'", name))),
        }
    }

    /// List the catalog ordered by name.
    pub async fn catalog(&self, ctx: &Context) -> LedgerResult<Vec<Product>> {
        let mut conn = ctx.connection(&self.pool).await?;
        let rows = sqlx::query("SELECT id, name, price FROM products ORDER BY name")
            .fetch_all(&mut *conn)
            .await
            .map_err(store_error("catalog"))?;

        Ok(rows.iter().map(Self::row_to_product).collect())
    }

    // ========================
    // Purchase operations
    // ========================

    /// Charge an account the price of `product_name`. The decrement is guarded
    /// by `balance >= price` in the same statement. Returns the charged product.
    pub async fn debit_for_purchase(
        &self,
        ctx: &Context,
        account_id: AccountId,
        product_name: &str,
    ) -> LedgerResult<Product> {
        let product = self.product(ctx, product_name).await?;

        let row = {
            let mut conn = ctx.connection(&self.pool).await?;
            sqlx::query(
                r#"
                UPDATE accounts
                SET balance = balance - ?
                WHERE id = ? AND balance >= ?
                RETURNING balance
                "#,
            )
            .bind(product.price)
            .bind(account_id)
            .bind(product.price)
            .fetch_optional(&mut *conn)
            .await
            .map_err(store_error("debit_for_purchase"))?
        };

        match row {
            Some(_) => Ok(product),
            None => Err(self
                .rejected_debit(ctx, AccountKey::Id(account_id), product.price)
                .await),
        }
    }

    /// Append a purchase fact for one unit of `product_id`.
    pub async fn record_purchase(
        &self,
        ctx: &Context,
        account_id: AccountId,
        product_id: ProductId,
    ) -> LedgerResult<Purchase> {
        let created_at = Utc::now();
        let mut conn = ctx.connection(&self.pool).await?;
        let row = sqlx::query(
            r#"
            INSERT INTO purchases (account_id, product_id, quantity, created_at)
            VALUES (?, ?, 1, ?)
            RETURNING id
            "#,
        )
        .bind(account_id)
        .bind(product_id)
        .bind(created_at.to_rfc3339())
        .fetch_one(&mut *conn)
        .await
        .map_err(store_error("record_purchase"))?;

        Ok(Purchase {
            id: row.get("id"),
            account_id,
            product_id,
            quantity: 1,
            created_at,
        })
    }

    /// Purchased products of an account, summed per product.
    pub async fn purchase_history(
        &self,
        ctx: &Context,
        account_id: AccountId,
    ) -> LedgerResult<Vec<InventoryItem>> {
        let mut conn = ctx.connection(&self.pool).await?;
        let rows = sqlx::query(
            r#"
            SELECT p.name AS product, SUM(pu.quantity) AS quantity
            FROM purchases pu
            JOIN products p ON p.id = pu.product_id
            WHERE pu.account_id = ?
            GROUP BY p.name
            ORDER BY p.name
            "#,
        )
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(store_error("purchase_history"))?;

        Ok(rows
            .iter()
            .map(|row| InventoryItem {
                product: row.get("product"),
                quantity: row.get("quantity"),
            })
            .collect())
    }

    // ========================
    // Transfer operations
    // ========================

    /// Append a transfer fact.
    pub async fn record_transfer(
        &self,
        ctx: &Context,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: Coins,
    ) -> LedgerResult<Transfer> {
        let created_at = Utc::now();
        let mut conn = ctx.connection(&self.pool).await?;
        let row = sqlx::query(
            r#"
            INSERT INTO transfers (sender_id, receiver_id, amount, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(amount)
        .bind(created_at.to_rfc3339())
        .fetch_one(&mut *conn)
        .await
        .map_err(store_error("record_transfer"))?;

        Ok(Transfer {
            id: row.get("id"),
            sender_id,
            receiver_id,
            amount,
            created_at,
        })
    }

    /// Coins sent by an account, summed per receiver.
    pub async fn sent_history(
        &self,
        ctx: &Context,
        account_id: AccountId,
    ) -> LedgerResult<Vec<SentSummary>> {
        let mut conn = ctx.connection(&self.pool).await?;
        let rows = sqlx::query(
            r#"
            SELECT a.username AS counterpart, SUM(t.amount) AS amount
            FROM transfers t
            JOIN accounts a ON a.id = t.receiver_id
            WHERE t.sender_id = ?
            GROUP BY a.username
            ORDER BY a.username
            "#,
        )
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(store_error("sent_history"))?;

        Ok(rows
            .iter()
            .map(|row| SentSummary {
                to_user: row.get("counterpart"),
                amount: row.get("amount"),
            })
            .collect())
    }

    /// Coins received by an account, summed per sender.
    pub async fn received_history(
        &self,
        ctx: &Context,
        account_id: AccountId,
    ) -> LedgerResult<Vec<ReceivedSummary>> {
        let mut conn = ctx.connection(&self.pool).await?;
        let rows = sqlx::query(
            r#"
            SELECT a.username AS counterpart, SUM(t.amount) AS amount
            FROM transfers t
            JOIN accounts a ON a.id = t.sender_id
            WHERE t.receiver_id = ?
            GROUP BY a.username
            ORDER BY a.username
            "#,
        )
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(store_error("received_history"))?;

        Ok(rows
            .iter()
            .map(|row| ReceivedSummary {
                from_user: row.get("counterpart"),
                amount: row.get("amount"),
            })
            .collect())
    }

    // ========================
    // Integrity operations
    // ========================

    /// Gather counters for integrity checking.
    pub async fn integrity_stats(&self, ctx: &Context) -> LedgerResult<IntegrityStats> {
        let mut conn = ctx.connection(&self.pool).await?;

        let accounts = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS account_count,
                COALESCE(SUM(CASE WHEN balance < 0 THEN 1 ELSE 0 END), 0) AS negative_balances,
                COALESCE(SUM(balance), 0) AS circulating,
                COALESCE(SUM(opening_balance), 0) AS issued
            FROM accounts
            "#,
        )
        .fetch_one(&mut *conn)
        .await
        .map_err(store_error("integrity_stats"))?;

        let purchases = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM purchases) AS purchase_count,
                (SELECT COALESCE(SUM(pu.quantity * p.price), 0)
                    FROM purchases pu JOIN products p ON p.id = pu.product_id) AS spent,
                (SELECT COUNT(*) FROM purchases pu
                    WHERE NOT EXISTS (SELECT 1 FROM accounts a WHERE a.id = pu.account_id)
                       OR NOT EXISTS (SELECT 1 FROM products p WHERE p.id = pu.product_id))
                    AS dangling_purchases,
                (SELECT COUNT(*) FROM purchases WHERE quantity <= 0) AS invalid_quantities
            "#,
        )
        .fetch_one(&mut *conn)
        .await
        .map_err(store_error("integrity_stats"))?;

        let transfers = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS transfer_count,
                COALESCE(SUM(CASE WHEN amount <= 0 THEN 1 ELSE 0 END), 0) AS invalid_amounts,
                COALESCE(SUM(CASE WHEN sender_id = receiver_id THEN 1 ELSE 0 END), 0)
                    AS self_transfers,
                COALESCE(SUM(CASE
                    WHEN NOT EXISTS (SELECT 1 FROM accounts a WHERE a.id = t.sender_id)
                      OR NOT EXISTS (SELECT 1 FROM accounts a WHERE a.id = t.receiver_id)
                    THEN 1 ELSE 0 END), 0) AS dangling_transfers
            FROM transfers t
            "#,
        )
        .fetch_one(&mut *conn)
        .await
        .map_err(store_error("integrity_stats"))?;

        let invalid_quantities: i64 = purchases.get("invalid_quantities");
        let invalid_amounts: i64 = transfers.get("invalid_amounts");

        Ok(IntegrityStats {
            account_count: accounts.get("account_count"),
            purchase_count: purchases.get("purchase_count"),
            transfer_count: transfers.get("transfer_count"),
            negative_balances: accounts.get("negative_balances"),
            dangling_purchases: purchases.get("dangling_purchases"),
            dangling_transfers: transfers.get("dangling_transfers"),
            invalid_amounts: invalid_quantities + invalid_amounts,
            self_transfers: transfers.get("self_transfers"),
            circulating: accounts.get("circulating"),
            spent: purchases.get("spent"),
            issued: accounts.get("issued"),
        })
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let created_at_str: String = row.get("created_at");

        Ok(Account {
            id: row.get("id"),
            username: row.get("username"),
            balance: row.get("balance"),
            opening_balance: row.get("opening_balance"),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
        })
    }

    fn row_to_product(row: &SqliteRow) -> Product {
        Product {
            id: row.get("id"),
            name: row.get("name"),
            price: row.get("price"),
        }
    }
}

fn key_column(key: AccountKey<'_>) -> &'static str {
    match key {
        AccountKey::Id(_) => "id",
        AccountKey::Username(_) => "username",
    }
}

fn bind_key<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    key: AccountKey<'q>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match key {
        AccountKey::Id(id) => query.bind(id),
        AccountKey::Username(username) => query.bind(username),
    }
}

fn ensure_positive(amount: Coins) -> LedgerResult<()> {
    if amount <= 0 {
        return Err(LedgerError::InvalidArgument(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

/// Classify a driver error and log it under the statement's name.
fn store_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> LedgerError {
    move |err| {
        let err = LedgerError::from_store(operation, err);
        match err.kind() {
            ErrorKind::Unavailable => tracing::error!(operation, error = %err, "statement failed"),
            _ => tracing::warn!(operation, error = %err, "statement rejected"),
        }
        err
    }
}
