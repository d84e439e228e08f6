// Application layer - use cases and orchestration over the repository.

mod service;

pub use crate::error::{ErrorKind, LedgerError, LedgerResult};
pub use service::*;
