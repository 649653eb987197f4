use prizedraw::core::DrawAllocator;
use prizedraw::storage::sqlite::SqliteStorage;
use prizedraw::storage::{AllocateError, Storage, TicketInsert};
use std::collections::HashSet;
use std::time::Duration;
use tempfile::TempDir;

async fn test_storage() -> (SqliteStorage, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("test.db");
    let storage = SqliteStorage::new(&path, 5000)
        .await
        .expect("Failed to create storage");
    (storage, dir)
}

async fn seed_pool(storage: &SqliteStorage, size: usize) {
    for i in 0..size {
        match storage
            .insert_ticket(&format!("{:010x}", i))
            .await
            .expect("Failed to insert ticket")
        {
            TicketInsert::Inserted(_) => {}
            TicketInsert::DuplicateCode => panic!("seed codes must be unique"),
        }
    }
}

fn allocator(storage: &SqliteStorage) -> DrawAllocator<SqliteStorage> {
    DrawAllocator::new(storage.clone(), 5, Duration::from_millis(10))
}

fn ticket_ids(allocations: &[prizedraw::storage::Allocation]) -> HashSet<i64> {
    allocations.iter().map(|a| a.ticket_id).collect()
}

#[tokio::test]
async fn test_allocate_assigns_requested_count() {
    let (storage, _dir) = test_storage().await;
    seed_pool(&storage, 10).await;
    let tenant = storage.create_tenant("Tenant A").await.unwrap();
    let user = storage.create_user("User 1").await.unwrap();

    let allocations = allocator(&storage)
        .allocate(tenant.tenant_id, user.user_id, 4)
        .await
        .expect("allocation failed");

    assert_eq!(allocations.len(), 4);
    assert_eq!(ticket_ids(&allocations).len(), 4);
    assert!(allocations
        .iter()
        .all(|a| a.tenant_id == tenant.tenant_id && a.user_id == user.user_id));

    assert_eq!(
        storage
            .eligible_ticket_count(tenant.tenant_id)
            .await
            .unwrap(),
        6
    );
}

#[tokio::test]
async fn test_sequential_allocations_never_overlap_within_a_tenant() {
    let (storage, _dir) = test_storage().await;
    seed_pool(&storage, 10).await;
    let tenant = storage.create_tenant("Tenant A").await.unwrap();
    let alice = storage.create_user("Alice").await.unwrap();
    let bob = storage.create_user("Bob").await.unwrap();

    let allocator = allocator(&storage);
    let first = allocator
        .allocate(tenant.tenant_id, alice.user_id, 3)
        .await
        .unwrap();
    let second = allocator
        .allocate(tenant.tenant_id, bob.user_id, 4)
        .await
        .unwrap();

    let first_ids = ticket_ids(&first);
    let second_ids = ticket_ids(&second);
    assert!(first_ids.is_disjoint(&second_ids));

    let all = storage
        .allocations_for_tenant(tenant.tenant_id)
        .await
        .unwrap();
    assert_eq!(all.len(), 7);
    assert_eq!(ticket_ids(&all).len(), 7);
}

#[tokio::test]
async fn test_over_allocation_fails_and_leaves_nothing() {
    let (storage, _dir) = test_storage().await;
    seed_pool(&storage, 5).await;
    let tenant = storage.create_tenant("Tenant A").await.unwrap();
    let user = storage.create_user("User 1").await.unwrap();

    let err = allocator(&storage)
        .allocate(tenant.tenant_id, user.user_id, 6)
        .await
        .unwrap_err();

    match err {
        AllocateError::InsufficientPool {
            requested,
            available,
        } => {
            assert_eq!(requested, 6);
            assert_eq!(available, 5);
        }
        other => panic!("expected InsufficientPool, got {:?}", other),
    }

    // Atomic: the failed call left no rows behind
    assert!(storage
        .allocations_for_tenant(tenant.tenant_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_same_ticket_is_allocable_under_different_tenants() {
    let (storage, _dir) = test_storage().await;
    seed_pool(&storage, 5).await;
    let tenant_a = storage.create_tenant("Tenant A").await.unwrap();
    let tenant_b = storage.create_tenant("Tenant B").await.unwrap();
    let user = storage.create_user("User 1").await.unwrap();

    let allocator = allocator(&storage);
    let under_a = allocator
        .allocate(tenant_a.tenant_id, user.user_id, 5)
        .await
        .unwrap();
    let under_b = allocator
        .allocate(tenant_b.tenant_id, user.user_id, 5)
        .await
        .unwrap();

    // Exclusivity is scoped per tenant: both draws cover the whole pool
    assert_eq!(ticket_ids(&under_a), ticket_ids(&under_b));
}

#[tokio::test]
async fn test_racing_allocations_for_one_tenant_are_all_or_nothing() {
    let (storage, _dir) = test_storage().await;
    seed_pool(&storage, 10).await;
    let tenant = storage.create_tenant("Tenant A").await.unwrap();
    let alice = storage.create_user("Alice").await.unwrap();
    let bob = storage.create_user("Bob").await.unwrap();

    // Two concurrent requests for 6 of 10 tickets: only one can fit.
    let task_a = {
        let allocator = allocator(&storage);
        let tenant_id = tenant.tenant_id;
        let user_id = alice.user_id;
        tokio::spawn(async move { allocator.allocate(tenant_id, user_id, 6).await })
    };
    let task_b = {
        let allocator = allocator(&storage);
        let tenant_id = tenant.tenant_id;
        let user_id = bob.user_id;
        tokio::spawn(async move { allocator.allocate(tenant_id, user_id, 6).await })
    };

    let result_a = task_a.await.unwrap();
    let result_b = task_b.await.unwrap();

    let (winner, loser) = match (result_a, result_b) {
        (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
        (Ok(_), Ok(_)) => panic!("both calls succeeded: 12 tickets from a pool of 10"),
        (Err(a), Err(b)) => panic!("both calls failed: {:?} / {:?}", a, b),
    };

    assert_eq!(winner.len(), 6);
    assert!(matches!(
        loser,
        AllocateError::InsufficientPool { requested: 6, .. }
    ));

    // Exactly the winner's rows exist, nothing partial from the loser
    let all = storage
        .allocations_for_tenant(tenant.tenant_id)
        .await
        .unwrap();
    assert_eq!(all.len(), 6);
    assert_eq!(ticket_ids(&all), ticket_ids(&winner));
}

#[tokio::test]
async fn test_disjoint_tenants_allocate_concurrently_over_the_same_pool() {
    let (storage, _dir) = test_storage().await;
    seed_pool(&storage, 5).await;
    let tenant_a = storage.create_tenant("Tenant A").await.unwrap();
    let tenant_b = storage.create_tenant("Tenant B").await.unwrap();
    let alice = storage.create_user("Alice").await.unwrap();
    let bob = storage.create_user("Bob").await.unwrap();

    let task_a = {
        let allocator = allocator(&storage);
        let tenant_id = tenant_a.tenant_id;
        let user_id = alice.user_id;
        tokio::spawn(async move { allocator.allocate(tenant_id, user_id, 5).await })
    };
    let task_b = {
        let allocator = allocator(&storage);
        let tenant_id = tenant_b.tenant_id;
        let user_id = bob.user_id;
        tokio::spawn(async move { allocator.allocate(tenant_id, user_id, 5).await })
    };

    let under_a = task_a.await.unwrap().expect("tenant A allocation failed");
    let under_b = task_b.await.unwrap().expect("tenant B allocation failed");

    assert_eq!(under_a.len(), 5);
    assert_eq!(under_b.len(), 5);
    assert_eq!(ticket_ids(&under_a), ticket_ids(&under_b));
}

#[tokio::test]
async fn test_concurrent_exhaustion_never_double_books_a_ticket() {
    let (storage, _dir) = test_storage().await;
    seed_pool(&storage, 30).await;
    let tenant = storage.create_tenant("Tenant A").await.unwrap();
    let user = storage.create_user("User 1").await.unwrap();

    // 20 concurrent requests for 2 tickets each over a pool of 30: exactly
    // 15 can succeed, the rest must find the pool exhausted.
    let mut tasks = vec![];
    for _ in 0..20 {
        let allocator = allocator(&storage);
        let tenant_id = tenant.tenant_id;
        let user_id = user.user_id;
        tasks.push(tokio::spawn(async move {
            allocator.allocate(tenant_id, user_id, 2).await
        }));
    }

    let mut succeeded = 0;
    let mut insufficient = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(allocations) => {
                assert_eq!(allocations.len(), 2);
                succeeded += 1;
            }
            Err(AllocateError::InsufficientPool { .. }) => insufficient += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(succeeded, 15);
    assert_eq!(insufficient, 5);

    let all = storage
        .allocations_for_tenant(tenant.tenant_id)
        .await
        .unwrap();
    assert_eq!(all.len(), 30);
    assert_eq!(ticket_ids(&all).len(), 30);
    assert_eq!(
        storage
            .eligible_ticket_count(tenant.tenant_id)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_unknown_tenant_surfaces_storage_error_and_rolls_back() {
    let (storage, _dir) = test_storage().await;
    seed_pool(&storage, 5).await;
    let user = storage.create_user("User 1").await.unwrap();

    // Foreign keys are enforced, so a nonexistent tenant fails the insert
    // inside the transaction and the whole unit of work rolls back.
    let err = allocator(&storage)
        .allocate(999, user.user_id, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, AllocateError::Storage(_)));

    assert!(storage.allocations_for_tenant(999).await.unwrap().is_empty());
}
