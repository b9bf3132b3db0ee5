//! Integration tests for the Postgres-backed stores.
//!
//! These tests run against a real database and assume a scratch instance:
//! they claim whatever is pending and mutate proxy rows.
//! Run with: DATABASE_URL=postgres://localhost/crawld_test cargo test --test queue_integration -- --ignored

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crawld::scheduler::NewJob;
use crawld::storage::{Database, JobStore, ProxyStore};

async fn test_db() -> Database {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL environment variable must be set for integration tests");

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .expect("Should connect to Postgres");

    let db = Database::from_pool(pool);
    db.run_migrations().await.expect("Migrations should apply");
    db
}

#[tokio::test]
#[ignore] // Run with: cargo test --test queue_integration -- --ignored
async fn test_concurrent_claims_never_hand_out_the_same_job() {
    let db = test_db().await;
    let store = JobStore::new(db.pool().clone());

    let marker = Uuid::new_v4().simple().to_string();
    let mut inserted = HashSet::new();
    for i in 0..20 {
        let id = store
            .insert(NewJob::new(format!("https://{}.example.com/{}", marker, i)))
            .await
            .expect("Insert should succeed");
        inserted.insert(id);
    }

    // Four claimers race over the queue; SKIP LOCKED must partition it.
    let mut workers = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let store = store.clone();
        workers.spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = store.claim_next().await.expect("Claim should succeed") {
                claimed.push(job.id);
            }
            claimed
        });
    }

    let mut all_claimed = Vec::new();
    while let Some(result) = workers.join_next().await {
        all_claimed.extend(result.expect("Worker should not panic"));
    }

    let unique: HashSet<i64> = all_claimed.iter().copied().collect();
    assert_eq!(
        unique.len(),
        all_claimed.len(),
        "A job was claimed twice: {:?}",
        all_claimed
    );
    for id in &inserted {
        assert!(unique.contains(id), "Inserted job {} was never claimed", id);
    }
}

#[tokio::test]
#[ignore]
async fn test_retry_gate_blocks_claims_until_it_passes() {
    let db = test_db().await;
    let store = JobStore::new(db.pool().clone());

    let url = format!("https://retry-{}.example.com/", Uuid::new_v4().simple());
    let id = store
        .insert(NewJob::new(url))
        .await
        .expect("Insert should succeed");

    // Drain the queue; our job must be among what gets claimed.
    let mut found = false;
    for _ in 0..200 {
        match store.claim_next().await.expect("Claim should succeed") {
            Some(job) => {
                if job.id == id {
                    found = true;
                }
            }
            None => break,
        }
    }
    assert!(found, "Inserted job was never claimed; is this a scratch database?");

    // A future gate makes the job invisible to claimers.
    store
        .mark_retry(id, Utc::now() + chrono::Duration::hours(1), "connection refused")
        .await
        .expect("mark_retry should succeed");
    assert!(
        store.claim_next().await.expect("Claim should succeed").is_none(),
        "Gated job must not be claimable"
    );

    // Once the gate is in the past the job comes back, with its failure
    // history intact.
    store
        .mark_retry(id, Utc::now() - chrono::Duration::seconds(1), "connection refused")
        .await
        .expect("mark_retry should succeed");

    let reclaimed = store
        .claim_next()
        .await
        .expect("Claim should succeed")
        .expect("Past gate makes the job claimable again");
    assert_eq!(reclaimed.id, id);
    assert_eq!(reclaimed.retry_count, 2);
    assert_eq!(reclaimed.last_error.as_deref(), Some("connection refused"));
}

#[tokio::test]
#[ignore]
async fn test_cooldown_filter_excludes_cooling_proxies() {
    let db = test_db().await;
    let store = ProxyStore::new(db.pool().clone());

    let label = format!("itest-{}", Uuid::new_v4().simple());
    let mut ids = Vec::new();
    for i in 0..10 {
        let id = store
            .insert("http", &format!("{}.{}.proxy.test", i, label), 8080, Some(&label), 1.0)
            .await
            .expect("Insert should succeed");
        ids.push(id);
    }

    // Trip the breaker on three of them: cooldown_until moves into the
    // future and they drop out of the selectable set.
    for id in &ids[..3] {
        store
            .record_failure(*id, true, Duration::from_secs(300))
            .await
            .expect("record_failure should succeed");
    }

    let selectable = store.fetch_selectable().await.expect("Fetch should succeed");
    let ours: Vec<i64> = selectable
        .iter()
        .filter(|p| p.label.as_deref() == Some(label.as_str()))
        .map(|p| p.id)
        .collect();

    assert_eq!(ours.len(), 7, "Expected 7 of 10 selectable, got {:?}", ours);
    for id in &ids[..3] {
        assert!(!ours.contains(id), "Cooling proxy {} was selectable", id);
    }
    for id in &ids[3..] {
        assert!(ours.contains(id), "Healthy proxy {} was filtered out", id);
    }
}
