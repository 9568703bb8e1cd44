// Postgres storage layer with sqlx

pub mod models;
pub mod repositories;
pub mod vault;

pub use models::*;
pub use repositories::{ConnectionDirectory, Database};
pub use vault::{Vault, VaultError};
