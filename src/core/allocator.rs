use crate::storage::{AllocateError, Allocation, Storage};
use std::time::Duration;

/// Assigns tickets to users, one atomic unit of work per call.
///
/// All atomicity lives in [`Storage::allocate_tickets`]; this wrapper carries
/// the policy around it: input validation and a bounded, transparent retry on
/// lock contention. Calls for different tenants never conflict; calls for the
/// same tenant are serialized by the storage layer's locking discipline.
#[derive(Clone)]
pub struct DrawAllocator<S: Storage> {
    storage: S,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<S: Storage> DrawAllocator<S> {
    pub fn new(storage: S, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            storage,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// Atomically allocate `count` tickets under `tenant_id` to `user_id`.
    ///
    /// On success every returned allocation was newly created in this call.
    /// On failure nothing was created: `InsufficientPool` means the tenant's
    /// eligible set is too small, `LockContention` means the retry budget ran
    /// out against concurrent allocations (safe to call again), and `Storage`
    /// wraps infrastructure failures (also safe to call again).
    pub async fn allocate(
        &self,
        tenant_id: i64,
        user_id: i64,
        count: u32,
    ) -> Result<Vec<Allocation>, AllocateError> {
        if count == 0 {
            return Err(AllocateError::InvalidCount);
        }

        let mut attempt = 1u32;
        loop {
            match self
                .storage
                .allocate_tickets(tenant_id, user_id, count)
                .await
            {
                Ok(allocations) => {
                    tracing::debug!(
                        "Allocated {} tickets to user {} under tenant {}",
                        allocations.len(),
                        user_id,
                        tenant_id
                    );
                    return Ok(allocations);
                }
                Err(AllocateError::LockContention) if attempt < self.max_attempts => {
                    tracing::debug!(
                        "Lock contention on tenant {} (attempt {}/{}), retrying",
                        tenant_id,
                        attempt,
                        self.max_attempts
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
