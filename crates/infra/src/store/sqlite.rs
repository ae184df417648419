//! SQLite-backed store (sqlx).
//!
//! The store exposes the synchronous [`Persistence`] API on top of async
//! sqlx. All database work runs on a private single-worker tokio runtime and
//! results are handed back over a channel, so a session can be used from any
//! thread, including from callbacks running inside another runtime's event
//! loop. Must not be dropped from inside an async context.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::mpsc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::runtime::Runtime;

use tillguard_auth::{ActionId, TokenRecord, UserRecord};
use tillguard_core::UserId;

use super::{Persistence, StoreError, StoreSession};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id          TEXT PRIMARY KEY,
        full_name   TEXT NOT NULL,
        short_name  TEXT NOT NULL,
        web_user    TEXT NULL UNIQUE,
        enabled     INTEGER NOT NULL,
        superuser   INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_permissions (
        user_id     TEXT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
        position    INTEGER NOT NULL,
        permission  TEXT NOT NULL,
        PRIMARY KEY (user_id, permission)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_tokens (
        token       TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        user_id     TEXT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
        last_seen   TEXT NULL
    )
    "#,
];

type ConnFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T, sqlx::Error>> + Send + 'c>>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            sqlx::Error::Database(db)
                if db.is_unique_violation() || db.is_foreign_key_violation() =>
            {
                Self::Conflict(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable(err.to_string())
            }
            _ => Self::Backend(err.to_string()),
        }
    }
}

/// Run `fut` on `runtime` and wait for its result on the calling thread.
fn exec<T, F>(runtime: &Runtime, fut: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, sqlx::Error>> + Send + 'static,
{
    let (reply, outcome) = mpsc::channel();
    runtime.spawn(async move {
        let _ = reply.send(fut.await);
    });
    outcome
        .recv()
        .map_err(|_| StoreError::unavailable("sqlite worker stopped"))?
        .map_err(StoreError::from)
}

/// SQLite persistence backend.
pub struct SqliteStore {
    runtime: Runtime,
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url`, e.g. `sqlite://till.db`.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::unavailable(format!("invalid database url '{}': {}", url, e)))?
            .create_if_missing(true)
            .foreign_keys(true);
        Self::connect(SqlitePoolOptions::new().max_connections(4), options)
    }

    /// A private in-memory database, for tests/dev.
    pub fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::unavailable(e.to_string()))?
            .foreign_keys(true);
        // Every connection to `:memory:` is a different database: keep exactly one, forever.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        Self::connect(pool, options)
    }

    fn connect(pool: SqlitePoolOptions, options: SqliteConnectOptions) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("tillguard-sqlite")
            .enable_all()
            .build()
            .map_err(|e| StoreError::unavailable(format!("failed to start sqlite runtime: {}", e)))?;

        let pool = exec(&runtime, async move {
            let pool = pool.connect_with(options).await?;
            for statement in SCHEMA {
                sqlx::query(statement).execute(&pool).await?;
            }
            Ok(pool)
        })?;

        tracing::debug!("sqlite store ready");
        Ok(Self { runtime, pool })
    }
}

impl Persistence for SqliteStore {
    fn session(&self) -> Result<Box<dyn StoreSession + '_>, StoreError> {
        let pool = self.pool.clone();
        let tx = exec(&self.runtime, async move { pool.begin().await })
            .map_err(|e| StoreError::unavailable(e.to_string()))?;
        Ok(Box::new(SqliteSession {
            runtime: &self.runtime,
            tx: Some(tx),
        }))
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        let _ = exec(&self.runtime, async move {
            pool.close().await;
            Ok(())
        });
    }
}

impl core::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("connections", &self.pool.size())
            .finish()
    }
}

/// One transaction. Dropped without commit ⇒ rolled back.
struct SqliteSession<'a> {
    runtime: &'a Runtime,
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteSession<'_> {
    /// Lend the transaction's connection to `op` on the store runtime.
    fn with_conn<T, F>(&mut self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> ConnFuture<'c, T> + Send + 'static,
    {
        let mut tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::Backend("session already finished".to_string()))?;
        let (reply, outcome) = mpsc::channel();
        self.runtime.spawn(async move {
            let result = op(&mut *tx).await;
            let _ = reply.send((tx, result));
        });
        let (tx, result) = outcome
            .recv()
            .map_err(|_| StoreError::unavailable("sqlite worker stopped"))?;
        self.tx = Some(tx);
        result.map_err(StoreError::from)
    }
}

impl StoreSession for SqliteSession<'_> {
    fn user(&mut self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let key = id.to_string();
        self.with_conn(move |conn| Box::pin(async move { fetch_user(conn, &key).await }))
    }

    fn users(&mut self, include_disabled: bool) -> Result<Vec<UserRecord>, StoreError> {
        self.with_conn(move |conn| {
            Box::pin(async move {
                let rows = sqlx::query(
                    r#"
                    SELECT id, full_name, short_name, web_user, enabled, superuser
                    FROM users
                    WHERE enabled = 1 OR ?1
                    ORDER BY id
                    "#,
                )
                .bind(include_disabled)
                .fetch_all(&mut *conn)
                .await?;

                let mut users = Vec::with_capacity(rows.len());
                for row in rows {
                    let mut user = user_from_row(&row)?;
                    user.permissions = fetch_permissions(conn, &user.id.to_string()).await?;
                    users.push(user);
                }
                Ok(users)
            })
        })
    }

    fn save_user(&mut self, user: &UserRecord) -> Result<(), StoreError> {
        let user = user.clone();
        self.with_conn(move |conn| {
            Box::pin(async move {
                let id = user.id.to_string();
                sqlx::query(
                    r#"
                    INSERT INTO users (id, full_name, short_name, web_user, enabled, superuser)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT (id) DO UPDATE SET
                        full_name = excluded.full_name,
                        short_name = excluded.short_name,
                        web_user = excluded.web_user,
                        enabled = excluded.enabled,
                        superuser = excluded.superuser
                    "#,
                )
                .bind(&id)
                .bind(&user.full_name)
                .bind(&user.short_name)
                .bind(&user.web_user)
                .bind(user.enabled)
                .bind(user.superuser)
                .execute(&mut *conn)
                .await?;

                sqlx::query("DELETE FROM user_permissions WHERE user_id = ?1")
                    .bind(&id)
                    .execute(&mut *conn)
                    .await?;

                for (position, permission) in user.permissions.iter().enumerate() {
                    sqlx::query(
                        r#"
                        INSERT OR IGNORE INTO user_permissions (user_id, position, permission)
                        VALUES (?1, ?2, ?3)
                        "#,
                    )
                    .bind(&id)
                    .bind(position as i64)
                    .bind(permission.as_str())
                    .execute(&mut *conn)
                    .await?;
                }
                Ok(())
            })
        })
    }

    fn token(&mut self, token: &str) -> Result<Option<TokenRecord>, StoreError> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            Box::pin(async move {
                let row = sqlx::query(
                    "SELECT token, description, user_id, last_seen FROM user_tokens WHERE token = ?1",
                )
                .bind(&token)
                .fetch_optional(&mut *conn)
                .await?;
                row.as_ref().map(token_from_row).transpose()
            })
        })
    }

    fn tokens_for(&mut self, user: UserId) -> Result<Vec<TokenRecord>, StoreError> {
        let user = user.to_string();
        self.with_conn(move |conn| {
            Box::pin(async move {
                let rows = sqlx::query(
                    r#"
                    SELECT token, description, user_id, last_seen
                    FROM user_tokens
                    WHERE user_id = ?1
                    ORDER BY token
                    "#,
                )
                .bind(&user)
                .fetch_all(&mut *conn)
                .await?;
                rows.iter().map(token_from_row).collect()
            })
        })
    }

    fn save_token(&mut self, token: &TokenRecord) -> Result<(), StoreError> {
        let token = token.clone();
        self.with_conn(move |conn| {
            Box::pin(async move {
                let owner = token.user_id.to_string();
                let exists = sqlx::query("SELECT 1 FROM users WHERE id = ?1")
                    .bind(&owner)
                    .fetch_optional(&mut *conn)
                    .await?;
                if exists.is_none() {
                    return Err(sqlx::Error::RowNotFound);
                }

                sqlx::query(
                    r#"
                    INSERT INTO user_tokens (token, description, user_id, last_seen)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT (token) DO UPDATE SET
                        description = excluded.description,
                        user_id = excluded.user_id,
                        last_seen = excluded.last_seen
                    "#,
                )
                .bind(&token.token)
                .bind(&token.description)
                .bind(&owner)
                .bind(token.last_seen)
                .execute(&mut *conn)
                .await?;
                Ok(())
            })
        })
    }

    fn delete_token(&mut self, token: &str) -> Result<bool, StoreError> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            Box::pin(async move {
                let result = sqlx::query("DELETE FROM user_tokens WHERE token = ?1")
                    .bind(&token)
                    .execute(&mut *conn)
                    .await?;
                Ok(result.rows_affected() > 0)
            })
        })
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::Backend("session already finished".to_string()))?;
        exec(self.runtime, async move { tx.commit().await })
    }
}

impl Drop for SqliteSession<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.runtime.spawn(async move {
                if let Err(err) = tx.rollback().await {
                    tracing::warn!(error = %err, "failed to roll back sqlite session");
                }
            });
        }
    }
}

async fn fetch_user(conn: &mut SqliteConnection, id: &str) -> Result<Option<UserRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, full_name, short_name, web_user, enabled, superuser
        FROM users
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => {
            let mut user = user_from_row(&row)?;
            user.permissions = fetch_permissions(conn, id).await?;
            Ok(Some(user))
        }
        None => Ok(None),
    }
}

async fn fetch_permissions(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<ActionId>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT permission FROM user_permissions WHERE user_id = ?1 ORDER BY position",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| row.try_get::<String, _>("permission").map(ActionId::from))
        .collect()
}

fn parse_user_id(raw: &str) -> Result<UserId, sqlx::Error> {
    UserId::from_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn user_from_row(row: &SqliteRow) -> Result<UserRecord, sqlx::Error> {
    Ok(UserRecord {
        id: parse_user_id(&row.try_get::<String, _>("id")?)?,
        full_name: row.try_get("full_name")?,
        short_name: row.try_get("short_name")?,
        web_user: row.try_get("web_user")?,
        enabled: row.try_get("enabled")?,
        superuser: row.try_get("superuser")?,
        permissions: Vec::new(),
    })
}

fn token_from_row(row: &SqliteRow) -> Result<TokenRecord, sqlx::Error> {
    Ok(TokenRecord {
        token: row.try_get("token")?,
        description: row.try_get("description")?,
        user_id: parse_user_id(&row.try_get::<String, _>("user_id")?)?,
        last_seen: row.try_get::<Option<DateTime<Utc>>, _>("last_seen")?,
    })
}
