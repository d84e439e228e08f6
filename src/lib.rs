pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod storage;

pub use application::MarketplaceService;
pub use config::LedgerConfig;
pub use domain::*;
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use storage::{Context, Repository, TxManager, TxMode};
