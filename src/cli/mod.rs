use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::application::MarketplaceService;
use crate::config::LedgerConfig;
use crate::domain::parse_coins;
use crate::storage::Context;

/// Merch Ledger - coin balances, purchases and transfers
#[derive(Parser)]
#[command(name = "merch-ledger")]
#[command(about = "A transactional coin ledger for a merch marketplace")]
#[command(version)]
pub struct Cli {
    /// Database file path (overrides LEDGER_DATABASE)
    #[arg(short, long)]
    pub database: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database with the merch catalog
    Init,

    /// Open a new account with the opening balance
    Open {
        /// Username (must be unique)
        username: String,

        /// Password hash produced by the authentication layer
        #[arg(long, default_value = "")]
        password_hash: String,
    },

    /// Buy one catalog item
    Buy {
        /// Buyer's username
        username: String,

        /// Catalog item name (e.g., "book", "hoody")
        item: String,
    },

    /// Send coins to another user
    Send {
        /// Number of coins
        amount: String,

        /// Sender's username
        #[arg(long)]
        from: String,

        /// Receiver's username
        #[arg(long)]
        to: String,
    },

    /// Show balance, inventory and coin history
    Info {
        /// Username
        username: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List catalog items and prices
    Catalog,

    /// Verify ledger integrity
    Check,
}

impl Cli {
    /// Install the global tracing subscriber. `RUST_LOG` wins over `--verbose`.
    pub fn init_tracing(&self) {
        tracing_subscriber::registry()
            .with(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| self.default_log_filter().into()),
            )
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    fn default_log_filter(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }

    fn config(&self) -> LedgerConfig {
        let config = LedgerConfig::from_env();
        match &self.database {
            Some(path) => config.with_database(path),
            None => config,
        }
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config();

        match self.command {
            Commands::Init => {
                let path = config.database_path.clone();
                MarketplaceService::init(config).await?;
                println!("Database initialized: {}", path.display());
            }

            Commands::Open {
                username,
                password_hash,
            } => {
                let (service, ctx) = connect(config).await?;
                let account = service
                    .open_account(&ctx, &username, &password_hash)
                    .await?;
                println!(
                    "Opened account {} (#{}) with {} coins",
                    account.username, account.id, account.balance
                );
            }

            Commands::Buy { username, item } => {
                let (service, ctx) = connect(config).await?;
                let account = service.account(&ctx, &username).await?;
                let result = service.purchase(&ctx, account.id, &item).await?;
                println!(
                    "{} bought {} for {} coins",
                    account.username, result.product.name, result.product.price
                );
            }

            Commands::Send { amount, from, to } => {
                let amount = parse_coins(&amount)
                    .with_context(|| format!("Invalid amount '{}'", amount))?;
                let (service, ctx) = connect(config).await?;
                let transfer = service.transfer(&ctx, &from, &to, amount).await?;
                println!(
                    "Sent {} coins: {} -> {} (#{})",
                    transfer.amount, from, to, transfer.id
                );
            }

            Commands::Info { username, json } => {
                let (service, ctx) = connect(config).await?;
                let info = service.info(&ctx, &username).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&info)?);
                } else {
                    println!("{}: {} coins", username, info.coins);
                    println!("\nInventory:");
                    if info.inventory.is_empty() {
                        println!("  (none)");
                    }
                    for item in &info.inventory {
                        println!("  {:<12} x{}", item.product, item.quantity);
                    }
                    println!("\nSent:");
                    for sent in &info.coin_history.sent {
                        println!("  {:<12} {:>8}", sent.to_user, sent.amount);
                    }
                    println!("\nReceived:");
                    for received in &info.coin_history.received {
                        println!("  {:<12} {:>8}", received.from_user, received.amount);
                    }
                }
            }

            Commands::Catalog => {
                let (service, ctx) = connect(config).await?;
                for product in service.catalog(&ctx).await? {
                    println!("  {:<12} {:>6}", product.name, product.price);
                }
            }

            Commands::Check => {
                let (service, ctx) = connect(config).await?;
                run_check_command(&service, &ctx).await?;
            }
        }

        Ok(())
    }
}

async fn connect(config: LedgerConfig) -> Result<(MarketplaceService, Context)> {
    let service = MarketplaceService::connect(config).await?;
    let ctx = service.context();
    Ok((service, ctx))
}

async fn run_check_command(service: &MarketplaceService, ctx: &Context) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.check_integrity(ctx).await?;

    println!("Accounts:  {}", report.account_count);
    println!("Purchases: {}", report.purchase_count);
    println!("Transfers: {}", report.transfer_count);
    println!();
    println!("  {:<12} {:>10}", "Circulating:", report.circulating);
    println!("  {:<12} {:>10}", "Spent:", report.spent);
    println!("  {}", "-".repeat(23));
    println!(
        "  {:<12} {:>10}  {}",
        "Issued:",
        report.issued,
        if report.is_conserved {
            "OK"
        } else {
            "UNBALANCED!"
        }
    );
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}
