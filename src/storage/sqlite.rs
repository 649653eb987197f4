use super::{AllocateError, Allocation, Storage, Tenant, Ticket, TicketInsert, User};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection};
use std::path::Path;
use std::time::Duration;

#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if necessary) the database at `path` and run migrations.
    ///
    /// `busy_timeout_ms` bounds how long a writer waits on a conflicting
    /// transaction before the engine reports SQLITE_BUSY, which surfaces as
    /// [`AllocateError::LockContention`].
    pub async fn new<P: AsRef<Path>>(path: P, busy_timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(busy_timeout_ms))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        // Run migrations
        sqlx::migrate!("./migrations/sqlite")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(Self { pool })
    }

    async fn allocate_in_tx(
        conn: &mut SqliteConnection,
        tenant_id: i64,
        user_id: i64,
        count: u32,
    ) -> Result<Vec<Allocation>, AllocateError> {
        // Eligible = not yet allocated under this tenant. Selection order is
        // ascending ticket_id; no fairness guarantee is made.
        let rows = sqlx::query(
            "SELECT ticket_id FROM tickets
             WHERE ticket_id NOT IN (SELECT ticket_id FROM allocations WHERE tenant_id = ?)
             ORDER BY ticket_id
             LIMIT ?",
        )
        .bind(tenant_id)
        .bind(i64::from(count))
        .fetch_all(&mut *conn)
        .await
        .map_err(map_allocation_error)?;

        if (rows.len() as u64) < u64::from(count) {
            return Err(AllocateError::InsufficientPool {
                requested: count,
                available: rows.len() as u64,
            });
        }

        let now = Utc::now();
        let mut allocations = Vec::with_capacity(rows.len());
        for row in rows {
            let ticket_id: i64 = row.get("ticket_id");
            let res = sqlx::query(
                "INSERT INTO allocations (tenant_id, ticket_id, user_id, created_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(tenant_id)
            .bind(ticket_id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(map_allocation_error)?;

            allocations.push(Allocation {
                allocation_id: res.last_insert_rowid(),
                tenant_id,
                ticket_id,
                user_id,
                created_at: now,
            });
        }

        Ok(allocations)
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_tenant(&self, name: &str) -> Result<Tenant> {
        let now = Utc::now();
        let res = sqlx::query("INSERT INTO tenants (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(Tenant {
            tenant_id: res.last_insert_rowid(),
            name: name.to_string(),
            created_at: now,
        })
    }

    async fn get_tenant(&self, tenant_id: i64) -> Result<Option<Tenant>> {
        let row = sqlx::query("SELECT tenant_id, name, created_at FROM tenants WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Tenant {
            tenant_id: r.get("tenant_id"),
            name: r.get("name"),
            created_at: r.get("created_at"),
        }))
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let rows =
            sqlx::query("SELECT tenant_id, name, created_at FROM tenants ORDER BY tenant_id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|r| Tenant {
                tenant_id: r.get("tenant_id"),
                name: r.get("name"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    async fn create_user(&self, name: &str) -> Result<User> {
        let now = Utc::now();
        let res = sqlx::query("INSERT INTO users (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(User {
            user_id: res.last_insert_rowid(),
            name: name.to_string(),
            created_at: now,
        })
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let row = sqlx::query("SELECT user_id, name, created_at FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| User {
            user_id: r.get("user_id"),
            name: r.get("name"),
            created_at: r.get("created_at"),
        }))
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT user_id, name, created_at FROM users ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| User {
                user_id: r.get("user_id"),
                name: r.get("name"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    async fn ticket_count(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tickets")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }

    async fn insert_ticket(&self, code: &str) -> Result<TicketInsert> {
        match sqlx::query("INSERT INTO tickets (code) VALUES (?)")
            .bind(code)
            .execute(&self.pool)
            .await
        {
            Ok(res) => Ok(TicketInsert::Inserted(Ticket {
                ticket_id: res.last_insert_rowid(),
                code: code.to_string(),
            })),
            Err(err) if is_unique_violation(&err) => Ok(TicketInsert::DuplicateCode),
            Err(err) => Err(err).context("Failed to insert ticket"),
        }
    }

    async fn get_ticket(&self, ticket_id: i64) -> Result<Option<Ticket>> {
        let row = sqlx::query("SELECT ticket_id, code FROM tickets WHERE ticket_id = ?")
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Ticket {
            ticket_id: r.get("ticket_id"),
            code: r.get("code"),
        }))
    }

    async fn allocate_tickets(
        &self,
        tenant_id: i64,
        user_id: i64,
        count: u32,
    ) -> Result<Vec<Allocation>, AllocateError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AllocateError::Storage(e.into()))?;

        // IMMEDIATE takes the database write lock up front, so the
        // eligibility read below and the inserts that follow form one
        // critical section: no concurrent allocation can observe the same
        // tickets as eligible. A conflicting writer makes this BEGIN wait up
        // to the busy timeout, then fail with SQLITE_BUSY.
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(map_allocation_error)?;

        match Self::allocate_in_tx(&mut conn, tenant_id, user_id, count).await {
            Ok(allocations) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(map_allocation_error)?;
                Ok(allocations)
            }
            Err(err) => {
                if let Err(rb) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    tracing::error!("Rollback failed after allocation error: {}", rb);
                }
                Err(err)
            }
        }
    }

    async fn allocations_for_tenant(&self, tenant_id: i64) -> Result<Vec<Allocation>> {
        let rows = sqlx::query(
            "SELECT allocation_id, tenant_id, ticket_id, user_id, created_at
             FROM allocations WHERE tenant_id = ? ORDER BY allocation_id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Allocation {
                allocation_id: r.get("allocation_id"),
                tenant_id: r.get("tenant_id"),
                ticket_id: r.get("ticket_id"),
                user_id: r.get("user_id"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    async fn eligible_ticket_count(&self, tenant_id: i64) -> Result<u64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tickets
             WHERE ticket_id NOT IN (SELECT ticket_id FROM allocations WHERE tenant_id = ?)",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 as u64)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// SQLITE_BUSY (5), SQLITE_LOCKED (6) and their extended codes mean a
// conflicting transaction held the write lock past the busy timeout.
fn is_lock_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("5") | Some("6") | Some("261") | Some("262") | Some("517")
        ),
        _ => false,
    }
}

fn map_allocation_error(err: sqlx::Error) -> AllocateError {
    if is_lock_contention(&err) {
        return AllocateError::LockContention;
    }
    // A unique hit on (tenant_id, ticket_id) means a concurrent allocation
    // got there first despite the lock discipline; retrying is safe.
    if is_unique_violation(&err) {
        return AllocateError::LockContention;
    }
    AllocateError::Storage(err.into())
}
