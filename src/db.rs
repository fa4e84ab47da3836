// src/db.rs
// Async connection pool using deadpool-sqlite
//
// The service keeps one durable table: the embedding rows the HNSW graph is
// rebuilt from on start. Use `pool.interact()` for all access; the closure
// runs on a blocking thread, so it won't stall the async runtime.

use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Database pool wrapper with per-connection setup.
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    /// URI for in-memory databases (used to share state in tests)
    memory_uri: Option<String>,
}

impl DatabasePool {
    /// Open a pooled database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        ensure_parent_directory(path)?;
        let conn_str = path.to_string_lossy().to_string();
        Self::open_internal(conn_str, Some(path.to_path_buf()), None, file_post_create_hook()).await
    }

    /// Open a pooled in-memory database.
    ///
    /// Uses a shared cache URI so all connections access the same in-memory
    /// database. Without shared cache, each connection would get its own
    /// separate database.
    pub async fn open_in_memory() -> Result<Self> {
        let uri = format!("file:memdb_{:?}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        Self::open_internal(uri.clone(), None, Some(uri), memory_post_create_hook()).await
    }

    async fn open_internal(
        conn_str: String,
        path: Option<PathBuf>,
        memory_uri: Option<String>,
        hook: Hook,
    ) -> Result<Self> {
        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(hook)
            .build()
            .context("Failed to build connection pool")?;

        let db_pool = Self {
            pool,
            path,
            memory_uri,
        };

        db_pool.run_migrations().await?;

        Ok(db_pool)
    }

    /// Get the memory URI (for sharing state in tests)
    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    /// Get the database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure with a connection from the pool.
    ///
    /// This is the primary API for database access. The closure runs on a
    /// blocking thread pool, so it won't block the async runtime.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;

        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure that may return a rusqlite::Error.
    pub async fn interact_raw<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.interact(move |conn| f(conn).map_err(Into::into)).await
    }

    /// Create the schema if it does not exist yet.
    async fn run_migrations(&self) -> Result<()> {
        self.interact(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS embeddings (
                     path TEXT PRIMARY KEY,
                     embedding BLOB NOT NULL,
                     updated_at INTEGER NOT NULL
                 );",
            )?;
            Ok(())
        })
        .await
    }
}

/// Ensure parent directory exists with secure permissions (0o700 on Unix).
fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(parent)?.permissions();
            perms.set_mode(0o700); // rwx------
            std::fs::set_permissions(parent, perms)?;
        }
    }
    Ok(())
}

/// Post-create hook for file-based databases: WAL PRAGMAs.
fn file_post_create_hook() -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| setup_connection(conn))
                .await
                .map_err(|e| {
                    deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
                })?
                .map_err(|e| {
                    deadpool_sqlite::HookError::Message(
                        format!("connection setup failed: {e}").into(),
                    )
                })
        })
    })
}

/// Post-create hook for in-memory databases (WAL is not applicable).
fn memory_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys=ON; \
                     PRAGMA busy_timeout=5000;",
                )
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Configure a connection after it's created.
fn setup_connection(conn: &Connection) -> rusqlite::Result<()> {
    // WAL for concurrent readers, busy timeout for write contention,
    // NORMAL synchronous (safe with WAL, reduces fsync overhead).
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; \
         PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout=5000; \
         PRAGMA synchronous=NORMAL;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_in_memory() {
        let pool = DatabasePool::open_in_memory()
            .await
            .expect("Failed to open in-memory pool");

        let count: i64 = pool
            .interact(|conn| {
                conn.execute(
                    "INSERT INTO embeddings (path, embedding, updated_at) VALUES (?, ?, ?)",
                    rusqlite::params!["memory/a.md", vec![0u8; 8], 0i64],
                )?;
                conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .await
            .expect("Failed to insert");

        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let pool = std::sync::Arc::new(
            DatabasePool::open_in_memory()
                .await
                .expect("Failed to open pool"),
        );

        let mut handles = Vec::new();
        for i in 0..10 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.interact(move |conn| {
                    conn.execute(
                        "INSERT INTO embeddings (path, embedding, updated_at) VALUES (?, ?, ?)",
                        rusqlite::params![format!("memory/{i}.md"), vec![0u8; 8], i as i64],
                    )?;
                    Ok(())
                })
                .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().expect("Insert failed");
        }

        let count: i64 = pool
            .interact(|conn| {
                conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .await
            .expect("Count failed");

        assert_eq!(count, 10);
    }
}
