use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use herald_core::Credentials;
use rusqlite::OptionalExtension;
use tracing::{debug, info};

use crate::database::Database;
use crate::error::StoreError;
use crate::secrets::Sealer;

/// Persistent home of the session's authentication material.
///
/// Only the connection controller calls into a store, from its own task, so
/// implementations never see concurrent writers.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved (fresh pairing required).
    async fn load(&self) -> Result<Option<Credentials>, StoreError>;

    /// Replace whatever is stored.
    async fn save(&self, credentials: &Credentials) -> Result<(), StoreError>;

    /// Remove stored material. Wiping an empty store is not an error.
    async fn wipe(&self) -> Result<(), StoreError>;
}

/// SQLite-backed store, optionally encrypting material at rest.
#[derive(Clone)]
pub struct SqliteCredentialStore {
    db: Database,
    sealer: Option<Arc<Sealer>>,
}

impl SqliteCredentialStore {
    pub fn new(db: Database, sealer: Option<Sealer>) -> Self {
        Self {
            db,
            sealer: sealer.map(Arc::new),
        }
    }

    /// Open the database at `db_path`. With a `key_path`, material is
    /// encrypted under the key stored there (created on first use).
    pub fn open(db_path: &Path, key_path: Option<&Path>) -> Result<Self, StoreError> {
        let db = Database::open(db_path)?;
        let sealer = key_path
            .map(Sealer::from_key_file)
            .transpose()
            .map_err(|e| StoreError::Key(e.to_string()))?;
        Ok(Self::new(db, sealer))
    }

    /// Unencrypted in-memory store (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?, None))
    }

    pub fn is_encrypted(&self) -> bool {
        self.sealer.is_some()
    }

    fn read(&self) -> Result<Option<Credentials>, StoreError> {
        let row: Option<(String, bool)> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT material, encrypted FROM credentials WHERE id = 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })?;

        let Some((material, encrypted)) = row else {
            return Ok(None);
        };

        let plaintext = match (encrypted, &self.sealer) {
            (false, _) => material,
            (true, Some(sealer)) => sealer
                .open(&material)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            (true, None) => {
                return Err(StoreError::Corrupt(
                    "stored material is encrypted but no key is configured".into(),
                ))
            }
        };
        Ok(Some(Credentials::new(plaintext)))
    }

    fn write(&self, credentials: &Credentials) -> Result<(), StoreError> {
        let (material, encrypted) = match &self.sealer {
            Some(sealer) => (
                sealer
                    .seal(credentials.expose())
                    .map_err(|e| StoreError::Key(e.to_string()))?,
                true,
            ),
            None => (credentials.expose().to_string(), false),
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO credentials (id, material, encrypted, updated_at)
                 VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     material = excluded.material,
                     encrypted = excluded.encrypted,
                     updated_at = excluded.updated_at",
                rusqlite::params![material, encrypted, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    fn clear(&self) -> Result<usize, StoreError> {
        self.db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM credentials", [])?))
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn load(&self) -> Result<Option<Credentials>, StoreError> {
        let loaded = self.read()?;
        debug!(found = loaded.is_some(), "credentials loaded");
        Ok(loaded)
    }

    async fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        self.write(credentials)?;
        debug!(bytes = credentials.len(), encrypted = self.is_encrypted(), "credentials saved");
        Ok(())
    }

    async fn wipe(&self) -> Result<(), StoreError> {
        let removed = self.clear()?;
        info!(removed, "credentials wiped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypted_store() -> SqliteCredentialStore {
        SqliteCredentialStore::new(Database::in_memory().unwrap(), Some(Sealer::generate()))
    }

    #[tokio::test]
    async fn empty_store_loads_none() {
        let store = SqliteCredentialStore::in_memory().unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load() {
        let store = encrypted_store();
        store.save(&Credentials::new("creds-v1")).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(Credentials::new("creds-v1")));
    }

    #[tokio::test]
    async fn save_replaces_previous_material() {
        let store = SqliteCredentialStore::in_memory().unwrap();
        store.save(&Credentials::new("v1")).await.unwrap();
        store.save(&Credentials::new("v2")).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(Credentials::new("v2")));

        let rows: i64 = store
            .db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM credentials", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn wipe_is_idempotent() {
        let store = SqliteCredentialStore::in_memory().unwrap();
        store.save(&Credentials::new("v1")).await.unwrap();
        store.wipe().await.unwrap();
        store.wipe().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn encrypted_material_is_not_plaintext_on_disk() {
        let store = encrypted_store();
        store.save(&Credentials::new("very-secret")).await.unwrap();
        let raw: String = store
            .db
            .with_conn(|conn| Ok(conn.query_row("SELECT material FROM credentials", [], |r| r.get(0))?))
            .unwrap();
        assert!(!raw.contains("very-secret"));
    }

    #[tokio::test]
    async fn wrong_key_reports_corrupt() {
        let db = Database::in_memory().unwrap();
        let writer = SqliteCredentialStore::new(db.clone(), Some(Sealer::generate()));
        writer.save(&Credentials::new("v1")).await.unwrap();

        let reader = SqliteCredentialStore::new(db.clone(), Some(Sealer::generate()));
        assert!(matches!(reader.load().await, Err(StoreError::Corrupt(_))));

        let keyless = SqliteCredentialStore::new(db, None);
        assert!(matches!(keyless.load().await, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn open_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("database/herald.db");
        let key_path = dir.path().join("secret_key");

        let store = SqliteCredentialStore::open(&db_path, Some(&key_path)).unwrap();
        assert!(store.is_encrypted());
        store.save(&Credentials::new("resume-me")).await.unwrap();
        drop(store);

        let reopened = SqliteCredentialStore::open(&db_path, Some(&key_path)).unwrap();
        assert_eq!(reopened.load().await.unwrap(), Some(Credentials::new("resume-me")));
    }
}
