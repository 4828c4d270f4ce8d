// SQLite connection handle shared by the persistent adapters.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, Transaction};
use tokio::sync::Mutex;

use crate::error::{DoryError, DoryResult};

/// An explicitly opened database session.
///
/// Clones share the same connection. After [`SqliteStore::close`] every
/// operation on any clone fails with [`DoryError::Closed`].
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Option<Connection>>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub async fn open(path: &Path, busy_timeout: Duration) -> DoryResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        // PRAGMA journal_mode returns a row, so we use query_row to ignore it
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;

        tracing::info!(target: "dory.storage", path = %path.display(), "opened sqlite store");

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database. Contents vanish on close.
    pub fn open_in_memory() -> DoryResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn is_open(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Close the underlying connection. Closing twice is a no-op.
    pub async fn close(&self) -> DoryResult<()> {
        let Some(conn) = self.conn.lock().await.take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, err)| DoryError::Database(err))?;
        tracing::info!(target: "dory.storage", "closed sqlite store");
        Ok(())
    }

    /// Run `f` against the live connection.
    pub async fn with_connection<T, F>(&self, f: F) -> DoryResult<T>
    where
        F: FnOnce(&Connection) -> DoryResult<T> + Send,
        T: Send,
    {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(DoryError::Closed)?;
        f(conn)
    }

    /// Run `f` inside a transaction that commits only if `f` succeeds.
    pub async fn with_transaction<T, F>(&self, f: F) -> DoryResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> DoryResult<T> + Send,
        T: Send,
    {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(DoryError::Closed)?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("dory.db");
        let store = SqliteStore::open(&path, Duration::from_secs(1)).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn closed_store_rejects_operations() {
        let store = SqliteStore::open_in_memory().unwrap();
        let clone = store.clone();
        assert!(store.is_open().await);

        store.close().await.unwrap();
        store.close().await.unwrap();

        assert!(!clone.is_open().await);
        let err = clone
            .with_connection(|conn| Ok(conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?))
            .await
            .unwrap_err();
        assert!(matches!(err, DoryError::Closed));
    }

    #[tokio::test]
    async fn failed_transaction_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .with_connection(|conn| {
                conn.execute("CREATE TABLE t (v INTEGER)", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let result: DoryResult<()> = store
            .with_transaction(|tx| {
                tx.execute("INSERT INTO t (v) VALUES (1)", [])?;
                Err(DoryError::InvalidData("boom".to_string()))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = store
            .with_connection(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
