mod account;
mod coins;
mod integrity;
mod product;
mod transfer;

pub use account::*;
pub use coins::*;
pub use integrity::*;
pub use product::*;
pub use transfer::*;
