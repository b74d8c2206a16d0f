//! Data models

mod access_token;
mod account;
mod audit;
mod identity;
mod tenant;

pub use access_token::*;
pub use account::*;
pub use audit::*;
pub use identity::*;
pub use tenant::*;
