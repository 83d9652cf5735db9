pub mod credentials;
pub mod database;
pub mod error;
pub mod schema;
pub mod secrets;

pub use credentials::{CredentialStore, SqliteCredentialStore};
pub use database::Database;
pub use error::StoreError;
pub use secrets::{Sealer, SecretError};
