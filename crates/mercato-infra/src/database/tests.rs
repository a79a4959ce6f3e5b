use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DbConn, MockDatabase, QueryTrait, Schema,
};
use serde_json::json;

use mercato_core::ports::{ConstantBackoff, JobFilter, JobListOptions, JobStore, job_processor};
use mercato_core::ProcessorError;
use mercato_core::{Job, JobId, JobState, StoreError};

use super::entity::{job_record, job_worker_lease};
use super::sql_store::claim_candidate;
use super::{DatabaseConfig, SqlJobStore};
use crate::polling::{PollingConfig, PollingQueueStrategy};
use crate::store::PayloadLimits;

async fn sqlite_conn() -> DbConn {
    let conn = DatabaseConfig::default().connect().await.unwrap();
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);
    conn.execute(backend.build(&schema.create_table_from_entity(job_record::Entity)))
        .await
        .unwrap();
    conn.execute(backend.build(&schema.create_table_from_entity(job_worker_lease::Entity)))
        .await
        .unwrap();
    conn
}

async fn sqlite_store() -> SqlJobStore {
    SqlJobStore::with_connection(sqlite_conn().await)
}

async fn settle(store: &SqlJobStore, queue: &str) -> Job {
    store.create(Job::new(queue, json!({}))).await.unwrap();
    let mut job = store.claim_next(queue).await.unwrap().unwrap();
    job.complete(json!({ "ok": true })).unwrap();
    store.update(&job).await.unwrap();
    job
}

#[test]
fn test_postgres_claim_skips_locked_rows() {
    let sql = claim_candidate("idx", &[3, 4], true)
        .build(DatabaseBackend::Postgres)
        .to_string();

    assert!(sql.contains("FOR UPDATE SKIP LOCKED"), "{sql}");
    assert!(sql.contains("NOT IN (3, 4)"), "{sql}");
    assert!(sql.contains(r#"ORDER BY "job_record"."created_at" ASC"#), "{sql}");
}

#[tokio::test]
async fn test_find_job_by_id_on_postgres() {
    let now = Utc::now();
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![job_record::Model {
            id: 7,
            queue_name: "update-search-index".to_owned(),
            data: json!({ "type": "reindex", "ctx": {} }),
            state: "RETRYING".to_owned(),
            progress: 40,
            result: None,
            error: Some("index offline".to_owned()),
            started_at: Some(now),
            settled_at: None,
            is_settled: false,
            created_at: now,
            updated_at: now,
            retries: 3,
            attempts: 1,
        }]])
        .into_connection();

    let store = SqlJobStore::with_connection(db);
    assert!(!store.single_writer());

    let job = store.find_one(JobId(7)).await.unwrap().unwrap();
    assert_eq!(job.id(), Some(JobId(7)));
    assert_eq!(job.state(), JobState::Retrying);
    assert_eq!(job.progress(), 40);
    assert_eq!(job.error(), Some("index offline"));
    assert_eq!(job.retries(), 3);
}

#[tokio::test]
async fn test_detached_store_is_unavailable() {
    let store = sqlite_store().await;
    assert!(store.is_available().await);

    store.detach().await;
    assert!(!store.is_available().await);
    let err = store.create(Job::new("idx", json!({}))).await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable));
    assert!(store.claim_next("idx").await.unwrap_err().is_unavailable());

    store.attach(sqlite_conn().await).await;
    assert!(store.create(Job::new("idx", json!({}))).await.is_ok());
}

#[tokio::test]
async fn test_claims_in_creation_order() {
    let store = sqlite_store().await;
    assert!(store.single_writer());

    for n in 0..4 {
        store.create(Job::new("idx", json!({ "n": n }))).await.unwrap();
    }
    store.create(Job::new("mail", json!({}))).await.unwrap();

    for n in 0..4 {
        let job = store.claim_next("idx").await.unwrap().unwrap();
        assert_eq!(job.data()["n"], n);
        assert_eq!(job.state(), JobState::Running);
        assert_eq!(job.attempts(), 1);
    }
    assert!(store.claim_next("idx").await.unwrap().is_none());

    let stored = store.find_one(JobId(1)).await.unwrap().unwrap();
    assert_eq!(stored.state(), JobState::Running);
    assert!(stored.started_at().is_some());
}

#[tokio::test]
async fn test_backoff_skips_to_next_candidate() {
    let store = SqlJobStore::with_connection(sqlite_conn().await)
        .with_backoff(Arc::new(ConstantBackoff(Duration::from_secs(3600))));

    store
        .create(Job::new("idx", json!({ "n": 1 })).with_retries(2))
        .await
        .unwrap();
    store.create(Job::new("idx", json!({ "n": 2 }))).await.unwrap();

    let mut first = store.claim_next("idx").await.unwrap().unwrap();
    first.fail("boom").unwrap();
    store.update(&first).await.unwrap();

    let second = store.claim_next("idx").await.unwrap().unwrap();
    assert_eq!(second.data()["n"], 2);
    assert!(store.claim_next("idx").await.unwrap().is_none());

    let waiting = store.find_one(first.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(waiting.state(), JobState::Retrying);
    assert_eq!(waiting.attempts(), 1);
}

#[tokio::test]
async fn test_update_after_settlement_is_a_no_op() {
    let store = sqlite_store().await;
    store.create(Job::new("idx", json!({}))).await.unwrap();

    let claimed = store.claim_next("idx").await.unwrap().unwrap();
    let mut winner = claimed.clone();
    let mut loser = claimed;

    winner.cancel().unwrap();
    store.update(&winner).await.unwrap();

    loser.complete(json!("late")).unwrap();
    store.update(&loser).await.unwrap();

    let stored = store.find_one(winner.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.state(), JobState::Cancelled);
    assert!(stored.result().is_none());

    let missing = Job::from(mercato_core::JobRecord {
        id: Some(JobId(999)),
        ..mercato_core::JobRecord::from(&winner)
    });
    assert!(matches!(
        store.update(&missing).await,
        Err(StoreError::NotFound(JobId(999)))
    ));
}

#[tokio::test]
async fn test_progress_requires_running_state() {
    let store = sqlite_store().await;
    let created = store.create(Job::new("idx", json!({}))).await.unwrap();
    let id = created.id().unwrap();

    store.update_progress(id, 55).await.unwrap();
    assert_eq!(store.find_one(id).await.unwrap().unwrap().progress(), 0);

    store.claim_next("idx").await.unwrap();
    store.update_progress(id, 55).await.unwrap();
    assert_eq!(store.find_one(id).await.unwrap().unwrap().progress(), 55);
}

#[tokio::test]
async fn test_remove_settled_older_than_cutoff() {
    let store = sqlite_store().await;
    for _ in 0..5 {
        settle(&store, "idx").await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    let cutoff = Utc::now();
    tokio::time::sleep(Duration::from_millis(10)).await;
    for _ in 0..2 {
        settle(&store, "idx").await;
    }
    settle(&store, "mail").await;

    let removed = store
        .remove_settled(&["idx".to_string()], Some(cutoff))
        .await
        .unwrap();
    assert_eq!(removed, 5);

    let left = store.find_many(&JobListOptions::default()).await.unwrap();
    assert_eq!(left.total_items, 3);
    let queues: HashSet<_> = left.items.iter().map(|j| j.queue_name().to_string()).collect();
    assert!(queues.contains("mail"));
}

#[tokio::test]
async fn test_requeue_stale_and_stats() {
    let store = sqlite_store().await;
    store
        .create(Job::new("idx", json!({})).with_retries(1))
        .await
        .unwrap();
    store.create(Job::new("idx", json!({}))).await.unwrap();
    store.create(Job::new("idx", json!({}))).await.unwrap();
    store.claim_next("idx").await.unwrap();
    store.claim_next("idx").await.unwrap();

    let touched = store
        .requeue_stale(Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(touched, 2);

    let stats = store.stats(Some("idx")).await.unwrap();
    assert_eq!(stats.retrying, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.running, 0);

    let failed = store
        .find_many(&JobListOptions {
            filter: JobFilter {
                states: vec![JobState::Failed],
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.items.len(), 1);
    assert!(failed.items[0].settled_at().is_some());
}

#[tokio::test]
async fn test_oversized_payload_is_truncated() {
    let store = SqlJobStore::with_connection(sqlite_conn().await)
        .with_payload_limits(PayloadLimits::mysql());

    let job = store
        .create(Job::new("mail", json!({ "body": "x".repeat(80_000) })))
        .await
        .unwrap();

    let stored = store.find_one(job.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.data()["body"], "[truncated - originally 80000 bytes]");
}

#[tokio::test]
async fn test_embedded_worker_lease_is_exclusive() {
    let store = sqlite_store().await;
    let ttl = Duration::from_secs(30);

    store.acquire_worker_lease("worker-a", ttl).await.unwrap();
    store.acquire_worker_lease("worker-a", ttl).await.unwrap();

    let err = store.acquire_worker_lease("worker-b", ttl).await.unwrap_err();
    assert!(matches!(err, StoreError::LeaseHeld { ref holder } if holder == "worker-a"));

    // An expired heartbeat can be taken over.
    store
        .acquire_worker_lease("worker-b", Duration::ZERO)
        .await
        .unwrap();

    store.release_worker_lease("worker-b").await.unwrap();
    store.acquire_worker_lease("worker-a", ttl).await.unwrap();
}

#[tokio::test]
async fn test_late_attached_embedded_store_takes_the_lease() {
    let store = Arc::new(SqlJobStore::new());
    let polling = |worker: &str| PollingConfig {
        poll_interval: Duration::from_millis(10),
        worker_id: worker.to_string(),
        ..Default::default()
    };
    let noop = || job_processor(|_ctx| async { Ok::<_, ProcessorError>(json!(null)) });

    let first = PollingQueueStrategy::new(store.clone(), polling("worker-a"));
    assert!(first.start("idx", noop()).await.unwrap());

    store.attach(sqlite_conn().await).await;
    store.create(Job::new("idx", json!({}))).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while store.stats(Some("idx")).await.unwrap().completed < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    // A few more polls, each of which checks the lease first.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = store
        .acquire_worker_lease("worker-b", Duration::from_secs(30))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::LeaseHeld { ref holder } if holder == "worker-a"));

    let second = PollingQueueStrategy::new(store.clone(), polling("worker-b"));
    assert!(matches!(
        second.start("idx", noop()).await,
        Err(StoreError::LeaseHeld { .. })
    ));

    first.stop().await;
    store
        .acquire_worker_lease("worker-b", Duration::from_secs(30))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cancel_keeps_fields_written_by_a_concurrent_claim() {
    let store = sqlite_store().await;
    let id = store
        .create(Job::new("idx", json!({})))
        .await
        .unwrap()
        .id()
        .unwrap();

    // A canceller read the PENDING job, then a worker claimed it.
    let snapshot = store.find_one(id).await.unwrap().unwrap();
    assert_eq!(snapshot.attempts(), 0);
    store.claim_next("idx").await.unwrap().unwrap();

    assert!(store.cancel(id).await.unwrap());
    let stored = store.find_one(id).await.unwrap().unwrap();
    assert_eq!(stored.state(), JobState::Cancelled);
    assert_eq!(stored.attempts(), 1);
    assert!(stored.started_at().is_some());
    assert!(stored.settled_at().is_some());

    assert!(!store.cancel(id).await.unwrap());
    assert!(matches!(
        store.cancel(JobId(404)).await,
        Err(StoreError::NotFound(JobId(404)))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claimers_never_share_a_job() {
    let store = Arc::new(sqlite_store().await);
    for n in 0..20 {
        store.create(Job::new("q", json!({ "n": n }))).await.unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = store.claim_next("q").await.unwrap() {
                claimed.push(job.id().unwrap());
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(seen.insert(id), "job {id} claimed twice");
        }
    }
    assert_eq!(seen.len(), 20);
}
