use super::*;

#[test]
fn creates_semaphore_on_first_use() {
    let registry = SemaphoreRegistry::new(0);
    assert!(registry.get("jobs").is_none());

    let sem = registry.get_or_create("jobs", 3);
    assert_eq!(sem.capacity(), 3);
    assert_eq!(registry.len(), 1);
}

#[test]
fn returns_same_instance_for_same_key() {
    let registry = SemaphoreRegistry::new(0);

    let first = registry.get_or_create("jobs", 1);
    let second = registry.get_or_create("jobs", 1);

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);
}

#[test]
fn reuse_resizes_existing_semaphore() {
    let registry = SemaphoreRegistry::new(0);

    registry.get_or_create("jobs", 1);
    let sem = registry.get_or_create("jobs", 5);

    assert_eq!(sem.capacity(), 5);
}

#[test]
fn zero_capacity_is_clamped_to_one() {
    let registry = SemaphoreRegistry::new(0);
    let sem = registry.get_or_create("jobs", 0);
    assert_eq!(sem.capacity(), 1);
}

#[test]
fn keys_are_independent() {
    let registry = SemaphoreRegistry::new(0);

    let a = registry.get_or_create("a", 1);
    let b = registry.get_or_create("b", 1);

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn concurrent_creation_yields_one_semaphore() {
    let registry = Arc::new(SemaphoreRegistry::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(
            async move { registry.get_or_create("shared", 2) },
        ));
    }

    let mut sems = Vec::new();
    for handle in handles {
        sems.push(handle.await.unwrap());
    }

    assert_eq!(registry.len(), 1);
    for sem in &sems[1..] {
        assert!(Arc::ptr_eq(&sems[0], sem));
    }
}

#[test]
fn limit_is_passed_to_new_semaphores() {
    let registry = SemaphoreRegistry::new(1);
    let sem = registry.get_or_create("jobs", 5);

    // Ceiling of one holder regardless of capacity.
    assert!(sem.try_acquire(std::time::Duration::ZERO).is_some());
    assert!(sem.try_acquire(std::time::Duration::ZERO).is_none());
}
