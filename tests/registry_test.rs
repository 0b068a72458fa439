//! Client registry tests
//!
//! Run with: cargo test --test registry_test

use lanchat::net::limiter::ConnectionLimiter;
use lanchat::net::registry::ClientRegistry;
use lanchat::types::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

fn registry() -> Arc<ClientRegistry> {
    let limiter = Arc::new(ConnectionLimiter::new(
        1000,
        1000,
        100_000,
        Duration::from_secs(300),
        Duration::from_secs(30),
    ));
    Arc::new(ClientRegistry::new(limiter, 50))
}

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

async fn join(registry: &ClientRegistry, port: u16, name: &str) -> lanchat::types::ClientId {
    registry
        .add(addr(port), mpsc::channel(8).0, Arc::new(Notify::new()), Some(name))
        .await
        .unwrap()
}

// =============================================================================
// MAP CONSISTENCY
// =============================================================================

#[tokio::test]
async fn test_indexes_agree_after_add_remove_rename() {
    let registry = registry();

    let a = join(&registry, 5001, "alice").await;
    let b = join(&registry, 5002, "bob").await;
    let c = join(&registry, 5003, "carol").await;

    registry.update_username(b, "bobby").await.unwrap();
    registry.remove(c).await.unwrap();

    // Every remaining session reachable through all three indexes
    for (id, port, name) in [(a, 5001, "alice"), (b, 5002, "bobby")] {
        assert_eq!(registry.get(id).await.unwrap().id, id);
        assert_eq!(registry.get_by_addr(addr(port)).await.unwrap().id, id);
        assert_eq!(registry.get_by_username(name).await.unwrap().id, id);
    }
    assert!(registry.get(c).await.is_none());
    assert!(registry.get_by_addr(addr(5003)).await.is_none());
    assert!(registry.get_by_username("carol").await.is_none());
    assert!(registry.get_by_username("bob").await.is_none());
    assert_eq!(registry.len().await, 2);
}

#[tokio::test]
async fn test_concurrent_adds_and_removes_stay_consistent() {
    let registry = registry();

    let mut tasks = Vec::new();
    for i in 0..40u16 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let id = registry
                .add(
                    addr(6000 + i),
                    mpsc::channel(8).0,
                    Arc::new(Notify::new()),
                    Some(&format!("user{i}")),
                )
                .await
                .unwrap();
            if i % 2 == 0 {
                assert!(registry.remove(id).await.is_some());
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(registry.len().await, 20);
    let listed = registry.user_list().await;
    assert_eq!(listed.len(), 20);
    // by_username keys are pairwise distinct by construction; every
    // listed user resolves back to a live session
    for (name, _) in listed {
        assert!(registry.get_by_username(&name).await.is_some());
    }
}

// =============================================================================
// USERNAME CONFLICTS
// =============================================================================

#[tokio::test]
async fn test_conflict_suffix_is_smallest_free_k() {
    let registry = registry();

    let mut names = Vec::new();
    for i in 0..5 {
        let id = join(&registry, 5001 + i, "dup").await;
        names.push(registry.username_of(id).await.unwrap());
    }
    assert_eq!(names, vec!["dup", "dup_2", "dup_3", "dup_4", "dup_5"]);

    // Free a suffix in the middle; the next joiner takes it
    let id3 = registry.get_by_username("dup_3").await.unwrap().id;
    registry.remove(id3).await.unwrap();
    let id = join(&registry, 5100, "dup").await;
    assert_eq!(registry.username_of(id).await.unwrap(), "dup_3");
}

#[tokio::test]
async fn test_rename_conflict_excludes_self() {
    let registry = registry();
    let a = join(&registry, 5001, "alice").await;
    let b = join(&registry, 5002, "bob").await;

    // bob takes a contested name
    let (_, resolved) = registry.update_username(b, "alice").await.unwrap();
    assert_eq!(resolved, "alice_2");

    // alice re-requesting her own name is a no-op
    let (old, resolved) = registry.update_username(a, "alice").await.unwrap();
    assert_eq!(old, "alice");
    assert_eq!(resolved, "alice");
}

// =============================================================================
// HISTORY
// =============================================================================

#[tokio::test]
async fn test_history_fifo_capped_chat_only() {
    let limiter = Arc::new(ConnectionLimiter::new(
        1000,
        1000,
        100_000,
        Duration::from_secs(300),
        Duration::from_secs(30),
    ));
    let registry = ClientRegistry::new(limiter, 4);

    registry.add_to_history(&Message::server("not stored")).await;
    for i in 0..6 {
        registry
            .add_to_history(&Message::chat(format!("c{i}"), "alice"))
            .await;
    }

    assert_eq!(registry.history_len().await, 4);
    let tail: Vec<String> = registry
        .history_tail(10)
        .await
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(tail, vec!["c2", "c3", "c4", "c5"]);

    // history_tail(n) returns at most n, newest at the end
    let last_two: Vec<String> = registry
        .history_tail(2)
        .await
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(last_two, vec!["c4", "c5"]);
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test]
async fn test_remove_absent_id_has_no_side_effects() {
    let registry = registry();
    join(&registry, 5001, "alice").await;

    let before = registry.statistics().await;
    assert!(registry.remove(uuid::Uuid::new_v4()).await.is_none());
    let after = registry.statistics().await;

    assert_eq!(before.current_clients, after.current_clients);
    assert_eq!(before.total_disconnected, after.total_disconnected);
}

#[tokio::test]
async fn test_activity_and_message_counters() {
    let registry = registry();
    let id = join(&registry, 5001, "alice").await;

    assert!(registry.update_activity(id).await);
    assert!(registry.record_message(id).await);
    assert!(registry.record_message(id).await);
    assert_eq!(registry.get(id).await.unwrap().user.message_count, 2);

    assert!(!registry.update_activity(uuid::Uuid::new_v4()).await);
}

#[tokio::test]
async fn test_collect_idle_empty_for_fresh_sessions() {
    let registry = registry();
    join(&registry, 5001, "alice").await;
    let idle = registry.collect_idle(Duration::from_secs(60)).await;
    assert!(idle.is_empty());
}
