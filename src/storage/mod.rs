mod repository;
mod scope;

pub use repository::*;
pub use scope::*;

/// SQL migration for the ledger schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration seeding the merch catalog
pub const MIGRATION_002_CATALOG: &str = include_str!("migrations/002_catalog.sql");
