use crate::config::Config;
use crate::core::{DrawAllocator, PoolGenerator};
use crate::storage::sqlite::SqliteStorage;
use crate::storage::{AllocateError, Storage};
use anyhow::{anyhow, Result};
use std::time::Duration;

pub async fn open_storage(config: &Config) -> Result<SqliteStorage> {
    SqliteStorage::new(&config.storage.path, config.allocator.busy_timeout_ms).await
}

pub fn allocator_for(config: &Config, storage: SqliteStorage) -> DrawAllocator<SqliteStorage> {
    DrawAllocator::new(
        storage,
        config.allocator.max_attempts,
        Duration::from_millis(config.allocator.retry_delay_ms),
    )
}

/// `init`: run migrations, top the pool up to the target size, and
/// optionally seed the sample tenants and users.
pub async fn init(config: Config, size: Option<u64>, seed: bool) -> Result<()> {
    let storage = open_storage(&config).await?;

    let target = size.unwrap_or(config.pool.size);
    let generator = PoolGenerator::new(
        storage.clone(),
        config.pool.code_length,
        config.pool.max_code_retries,
    );
    let report = generator.generate_pool(target).await?;

    println!(
        "✓ Ticket pool at {} tickets ({} newly generated, {} collisions retried)",
        report.existing + report.generated,
        report.generated,
        report.collisions
    );

    if seed {
        if storage.list_tenants().await?.is_empty() {
            storage.create_tenant("Tenant A").await?;
            storage.create_tenant("Tenant B").await?;
            println!("✓ Seeded tenants: Tenant A, Tenant B");
        }
        if storage.list_users().await?.is_empty() {
            storage.create_user("User 1").await?;
            storage.create_user("User 2").await?;
            println!("✓ Seeded users: User 1, User 2");
        }
    }

    Ok(())
}

pub async fn add_tenant(config: Config, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow!("Tenant name cannot be empty"));
    }
    if name.len() > 100 {
        return Err(anyhow!("Tenant name too long (max 100 characters)"));
    }

    let storage = open_storage(&config).await?;
    let tenant = storage.create_tenant(name).await?;

    println!("✓ Tenant '{}' created with id {}", tenant.name, tenant.tenant_id);
    Ok(())
}

pub async fn list_tenants(config: Config) -> Result<()> {
    let storage = open_storage(&config).await?;
    let tenants = storage.list_tenants().await?;

    if tenants.is_empty() {
        println!("No tenants found.");
        return Ok(());
    }

    println!("\n{:<10} {:<30} {:<30}", "ID", "Name", "Created");
    println!("{}", "-".repeat(70));
    for tenant in tenants {
        println!(
            "{:<10} {:<30} {:<30}",
            tenant.tenant_id,
            tenant.name,
            tenant.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    Ok(())
}

pub async fn add_user(config: Config, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow!("User name cannot be empty"));
    }
    if name.len() > 100 {
        return Err(anyhow!("User name too long (max 100 characters)"));
    }

    let storage = open_storage(&config).await?;
    let user = storage.create_user(name).await?;

    println!("✓ User '{}' created with id {}", user.name, user.user_id);
    Ok(())
}

pub async fn list_users(config: Config) -> Result<()> {
    let storage = open_storage(&config).await?;
    let users = storage.list_users().await?;

    if users.is_empty() {
        println!("No users found.");
        return Ok(());
    }

    println!("\n{:<10} {:<30} {:<30}", "ID", "Name", "Created");
    println!("{}", "-".repeat(70));
    for user in users {
        println!(
            "{:<10} {:<30} {:<30}",
            user.user_id,
            user.name,
            user.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    Ok(())
}

/// `allocate`: one atomic allocation call against the core.
pub async fn allocate(
    config: Config,
    tenant_id: i64,
    user_id: i64,
    count: u32,
    json: bool,
) -> Result<()> {
    let storage = open_storage(&config).await?;

    // Friendlier than surfacing a foreign key violation from the engine.
    let tenant = storage
        .get_tenant(tenant_id)
        .await?
        .ok_or_else(|| anyhow!("Tenant {} not found", tenant_id))?;
    let user = storage
        .get_user(user_id)
        .await?
        .ok_or_else(|| anyhow!("User {} not found", user_id))?;

    let allocator = allocator_for(&config, storage.clone());

    let allocations = match allocator.allocate(tenant_id, user_id, count).await {
        Ok(allocations) => allocations,
        Err(AllocateError::InsufficientPool {
            requested,
            available,
        }) => {
            return Err(anyhow!(
                "Insufficient pool: requested {} tickets but only {} are eligible for tenant '{}'",
                requested,
                available,
                tenant.name
            ));
        }
        Err(AllocateError::LockContention) => {
            return Err(anyhow!(
                "Allocation lost to concurrent callers after {} attempts; try again",
                config.allocator.max_attempts
            ));
        }
        Err(err) => return Err(err.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&allocations)?);
        return Ok(());
    }

    println!(
        "✓ Allocated {} tickets to '{}' under '{}':",
        allocations.len(),
        user.name,
        tenant.name
    );
    for allocation in &allocations {
        let code = storage
            .get_ticket(allocation.ticket_id)
            .await?
            .map(|t| t.code)
            .unwrap_or_default();
        println!("  #{:<10} {}", allocation.ticket_id, code);
    }
    Ok(())
}

/// `status`: pool size plus per-tenant allocation and eligibility counts.
pub async fn status(config: Config) -> Result<()> {
    let storage = open_storage(&config).await?;

    let pool_size = storage.ticket_count().await?;
    println!("\nTicket pool: {} tickets", pool_size);

    let tenants = storage.list_tenants().await?;
    if tenants.is_empty() {
        println!("No tenants found.\n");
        return Ok(());
    }

    println!(
        "\n{:<10} {:<30} {:<12} {:<12}",
        "ID", "Tenant", "Allocated", "Eligible"
    );
    println!("{}", "-".repeat(64));
    for tenant in tenants {
        let allocated = storage.allocations_for_tenant(tenant.tenant_id).await?.len();
        let eligible = storage.eligible_ticket_count(tenant.tenant_id).await?;
        println!(
            "{:<10} {:<30} {:<12} {:<12}",
            tenant.tenant_id, tenant.name, allocated, eligible
        );
    }
    println!();
    Ok(())
}
