use crate::config::Config;
use crate::core::DrawAllocator;
use crate::storage::{AllocateError, Storage};
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Tallies from one stress run.
#[derive(Debug, Default)]
pub struct StressReport {
    pub requests: u64,
    pub succeeded: u64,
    pub insufficient: u64,
    pub contention: u64,
    pub failed: u64,
    pub tickets_allocated: u64,
}

/// Load driver: issues `requests` allocate calls from `concurrency`
/// concurrent workers. Purely an external caller of the core, useful for
/// exercising the exclusivity invariant under contention; it asserts nothing
/// itself beyond tallying outcomes.
pub async fn run_stress(
    config: Config,
    tenant_id: i64,
    user_id: i64,
    count: u32,
    requests: u64,
    concurrency: u32,
) -> Result<()> {
    let storage = super::admin::open_storage(&config).await?;

    storage
        .get_tenant(tenant_id)
        .await?
        .ok_or_else(|| anyhow!("Tenant {} not found", tenant_id))?;
    storage
        .get_user(user_id)
        .await?
        .ok_or_else(|| anyhow!("User {} not found", user_id))?;

    let allocator = super::admin::allocator_for(&config, storage);

    let remaining = Arc::new(AtomicU64::new(requests));
    let succeeded = Arc::new(AtomicU64::new(0));
    let insufficient = Arc::new(AtomicU64::new(0));
    let contention = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicU64::new(0));
    let tickets = Arc::new(AtomicU64::new(0));

    tracing::info!(
        "Stress run: {} requests x {} tickets, {} workers, tenant {}, user {}",
        requests,
        count,
        concurrency,
        tenant_id,
        user_id
    );

    let started = Instant::now();
    let mut handles = vec![];
    for _ in 0..concurrency.max(1) {
        let allocator = allocator.clone();
        let remaining = remaining.clone();
        let succeeded = succeeded.clone();
        let insufficient = insufficient.clone();
        let contention = contention.clone();
        let failed = failed.clone();
        let tickets = tickets.clone();

        handles.push(tokio::spawn(async move {
            loop {
                if remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_err()
                {
                    break;
                }
                match allocator.allocate(tenant_id, user_id, count).await {
                    Ok(allocations) => {
                        succeeded.fetch_add(1, Ordering::Relaxed);
                        tickets.fetch_add(allocations.len() as u64, Ordering::Relaxed);
                    }
                    Err(AllocateError::InsufficientPool { .. }) => {
                        insufficient.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(AllocateError::LockContention) => {
                        contention.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        tracing::error!("Allocation failed: {:?}", err);
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));
    }

    for joined in futures::future::join_all(handles).await {
        joined?;
    }
    let elapsed = started.elapsed();

    let report = StressReport {
        requests,
        succeeded: succeeded.load(Ordering::SeqCst),
        insufficient: insufficient.load(Ordering::SeqCst),
        contention: contention.load(Ordering::SeqCst),
        failed: failed.load(Ordering::SeqCst),
        tickets_allocated: tickets.load(Ordering::SeqCst),
    };

    println!("\nStress run finished in {:.2?}", elapsed);
    println!("  requests:           {}", report.requests);
    println!("  succeeded:          {}", report.succeeded);
    println!("  insufficient pool:  {}", report.insufficient);
    println!("  lock contention:    {}", report.contention);
    println!("  storage failures:   {}", report.failed);
    println!("  tickets allocated:  {}", report.tickets_allocated);
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        println!("  throughput:         {:.0} req/s", report.requests as f64 / secs);
    }

    if report.failed > 0 {
        return Err(anyhow!("{} requests hit storage failures", report.failed));
    }
    Ok(())
}
