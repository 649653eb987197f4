pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: i64,
    pub code: String,
}

/// The durable record binding a ticket to a user within a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub allocation_id: i64,
    pub tenant_id: i64,
    pub ticket_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of attempting to add one candidate code to the ticket pool.
#[derive(Debug, Clone)]
pub enum TicketInsert {
    Inserted(Ticket),
    /// The code already exists in the pool. Expected during generation;
    /// the generator discards the candidate and retries.
    DuplicateCode,
}

/// Failure modes of a single allocation call.
///
/// `LockContention` is transient and safe to retry; `InsufficientPool` is
/// definite until new capacity is generated; `Storage` is an infrastructure
/// failure, also safe to retry since nothing was committed.
#[derive(Debug, thiserror::Error)]
pub enum AllocateError {
    #[error("allocation count must be at least 1")]
    InvalidCount,

    #[error("insufficient pool: requested {requested} tickets, {available} eligible for this tenant")]
    InsufficientPool { requested: u32, available: u64 },

    #[error("lock contention with a concurrent allocation")]
    LockContention,

    #[error("storage failure")]
    Storage(#[source] anyhow::Error),
}

#[async_trait]
pub trait Storage: Send + Sync + Clone {
    // Tenant & user administration
    async fn create_tenant(&self, name: &str) -> Result<Tenant>;
    async fn get_tenant(&self, tenant_id: i64) -> Result<Option<Tenant>>;
    async fn list_tenants(&self) -> Result<Vec<Tenant>>;

    async fn create_user(&self, name: &str) -> Result<User>;
    async fn get_user(&self, user_id: i64) -> Result<Option<User>>;
    async fn list_users(&self) -> Result<Vec<User>>;

    // Ticket pool
    async fn ticket_count(&self) -> Result<u64>;
    async fn insert_ticket(&self, code: &str) -> Result<TicketInsert>;
    async fn get_ticket(&self, ticket_id: i64) -> Result<Option<Ticket>>;

    /// Atomically assign `count` tickets not yet allocated under `tenant_id`
    /// to `user_id`. All-or-nothing: on any failure no allocation rows are
    /// visible. The eligibility read and the lock that guards it must be a
    /// single step, so two racing calls for the same tenant can never both
    /// select the same ticket.
    async fn allocate_tickets(
        &self,
        tenant_id: i64,
        user_id: i64,
        count: u32,
    ) -> Result<Vec<Allocation>, AllocateError>;

    async fn allocations_for_tenant(&self, tenant_id: i64) -> Result<Vec<Allocation>>;
    async fn eligible_ticket_count(&self, tenant_id: i64) -> Result<u64>;
}
