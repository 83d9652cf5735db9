#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    /// Stored material exists but cannot be read back (bad ciphertext, missing key).
    #[error("corrupt credentials: {0}")]
    Corrupt(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}
