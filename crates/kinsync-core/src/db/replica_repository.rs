//! Key/value repository backing the local replica

use crate::error::Result;
use libsql::{params, Connection};

/// Durable storage of serialized replica records (async)
#[allow(async_fn_in_trait)]
pub trait ReplicaRepository {
    /// Raw JSON stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite one record
    async fn put(&self, key: &str, value: &str, updated_at: i64) -> Result<()>;

    /// Insert or overwrite several records in one transaction
    async fn put_many(&self, entries: &[(&str, String)], updated_at: i64) -> Result<()>;

    /// Delete a record; deleting a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;
}

/// libSQL implementation of `ReplicaRepository`
pub struct LibSqlReplicaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlReplicaRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn upsert(&self, key: &str, value: &str, updated_at: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO replica_records (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, updated_at],
            )
            .await?;
        Ok(())
    }
}

impl ReplicaRepository for LibSqlReplicaRepository<'_> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM replica_records WHERE key = ?1", [key])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, updated_at: i64) -> Result<()> {
        self.upsert(key, value, updated_at).await
    }

    async fn put_many(&self, entries: &[(&str, String)], updated_at: i64) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        for (key, value) in entries {
            if let Err(error) = self.upsert(key, value, updated_at).await {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(error);
            }
        }

        if let Err(error) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(error.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM replica_records WHERE key = ?1", [key])
            .await?;
        Ok(())
    }
}
