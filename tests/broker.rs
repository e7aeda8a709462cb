// tests/broker.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;

use assayer::broker::{
    Broker, EnqueueOptions, JobOutcome, JobSpec, JobStatus, MemoryBroker, SqliteBroker,
    WORKER_LOST, WorkerRecord,
};
use assayer::errors::AssayerError;
use assayer::types::WorkerId;

type TestResult = Result<(), Box<dyn Error>>;

fn spec(n: u32) -> JobSpec {
    JobSpec::new("tests.job", json!({ "n": n }))
}

fn sqlite(dir: &TempDir) -> SqliteBroker {
    SqliteBroker::open(dir.path().join("nested").join("broker.db")).unwrap()
}

/// Run the same checks against both broker implementations.
async fn both<F, Fut>(check: F) -> TestResult
where
    F: Fn(Arc<dyn Broker>) -> Fut,
    Fut: std::future::Future<Output = TestResult>,
{
    check(Arc::new(MemoryBroker::new())).await?;
    let dir = TempDir::new()?;
    check(Arc::new(sqlite(&dir))).await?;
    Ok(())
}

#[tokio::test]
async fn claims_are_fifo_per_queue() -> TestResult {
    both(|broker| async move {
        let worker = WorkerId::from("w1");
        let first = broker.enqueue("eval", spec(1), EnqueueOptions::default()).await?;
        let second = broker.enqueue("eval", spec(2), EnqueueOptions::default()).await?;
        broker.enqueue("watch", spec(3), EnqueueOptions::default()).await?;

        let claimed = broker.claim("eval", &worker).await?.expect("first entry");
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.worker, Some(worker.clone()));
        assert_eq!(claimed.job.args, json!({ "n": 1 }));

        let claimed = broker.claim("eval", &worker).await?.expect("second entry");
        assert_eq!(claimed.id, second);
        assert!(broker.claim("eval", &worker).await?.is_none());
        assert_eq!(broker.pending("watch").await?.len(), 1);
        Ok::<(), Box<dyn Error>>(())
    })
    .await
}

#[tokio::test]
async fn finished_results_follow_their_retention() -> TestResult {
    both(|broker| async move {
        let worker = WorkerId::from("w1");
        let kept = broker.enqueue("eval", spec(1), EnqueueOptions::default()).await?;
        let discarded = broker
            .enqueue("eval", spec(2), EnqueueOptions::discard_result())
            .await?;
        let failed = broker
            .enqueue("eval", spec(3), EnqueueOptions::discard_result())
            .await?;
        for _ in 0..3 {
            broker.claim("eval", &worker).await?;
        }

        broker
            .finish(kept, JobOutcome::Finished(Some(json!({ "score": 0.5 }))))
            .await?;
        broker.finish(discarded, JobOutcome::Finished(None)).await?;
        broker
            .finish(failed, JobOutcome::Failed("boom".to_string()))
            .await?;

        let entry = broker.job(kept).await?.expect("kept result");
        assert_eq!(entry.status, JobStatus::Finished);
        assert_eq!(entry.result, Some(json!({ "score": 0.5 })));

        assert!(broker.job(discarded).await?.is_none(), "result_ttl = 0 drops the entry");

        // Failures stay queryable by id even when results are discarded.
        let entry = broker.job(failed).await?.expect("failure retained");
        assert_eq!(entry.status, JobStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some("boom"));
        assert_eq!(broker.list("eval", JobStatus::Failed).await?.len(), 1);
        Ok::<(), Box<dyn Error>>(())
    })
    .await
}

#[tokio::test]
async fn reaping_removes_expired_terminal_entries_only() -> TestResult {
    both(|broker| async move {
        let worker = WorkerId::from("w1");
        let short = EnqueueOptions {
            result_ttl: Duration::from_secs(1),
            failure_ttl: Duration::from_secs(1),
        };
        let done = broker.enqueue("eval", spec(1), short).await?;
        let running = broker.enqueue("eval", spec(2), short).await?;
        let queued = broker.enqueue("eval", spec(3), short).await?;
        broker.claim("eval", &worker).await?;
        broker.claim("eval", &worker).await?;
        broker.finish(done, JobOutcome::Finished(None)).await?;

        assert_eq!(broker.reap_expired(Utc::now()).await?, 0);

        let later = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(broker.reap_expired(later).await?, 1);
        assert!(broker.job(done).await?.is_none());
        assert!(broker.job(running).await?.is_some());
        assert!(broker.job(queued).await?.is_some());
        Ok::<(), Box<dyn Error>>(())
    })
    .await
}

#[tokio::test]
async fn running_entries_of_lost_workers_are_failed() -> TestResult {
    both(|broker| async move {
        let live = WorkerId::from("watch.1.live");
        let stale = WorkerId::from("watch.1.stale");
        let unregistered = WorkerId::from("watch.1.gone");
        broker.register_worker(WorkerRecord::new(live.clone(), "watch")).await?;
        let mut record = WorkerRecord::new(stale.clone(), "watch");
        record.last_heartbeat = Utc::now() - chrono::Duration::minutes(10);
        broker.register_worker(record).await?;

        let mut ids = Vec::new();
        for (n, worker) in [&live, &stale, &unregistered].into_iter().enumerate() {
            ids.push(broker.enqueue("watch", spec(n as u32), EnqueueOptions::default()).await?);
            broker.claim("watch", worker).await?.expect("claimed");
        }
        let queued = broker.enqueue("watch", spec(9), EnqueueOptions::default()).await?;

        assert_eq!(broker.fail_abandoned(Utc::now()).await?, 2);

        let entry = broker.job(ids[0]).await?.expect("live entry");
        assert_eq!(entry.status, JobStatus::Running);
        for id in &ids[1..] {
            let entry = broker.job(*id).await?.expect("failure retained");
            assert_eq!(entry.status, JobStatus::Failed);
            assert_eq!(entry.error.as_deref(), Some(WORKER_LOST));
            assert!(entry.ended_at.is_some());
        }
        assert_eq!(broker.job(queued).await?.expect("queued").status, JobStatus::Queued);
        assert_eq!(broker.list("watch", JobStatus::Failed).await?.len(), 2);

        assert_eq!(broker.fail_abandoned(Utc::now()).await?, 0);
        Ok::<(), Box<dyn Error>>(())
    })
    .await
}

#[tokio::test]
async fn drain_removes_pending_but_not_running_entries() -> TestResult {
    both(|broker| async move {
        let worker = WorkerId::from("w1");
        let running = broker.enqueue("eval", spec(1), EnqueueOptions::default()).await?;
        broker.enqueue("eval", spec(2), EnqueueOptions::default()).await?;
        broker.enqueue("eval", spec(3), EnqueueOptions::default()).await?;
        broker.enqueue("watch", spec(4), EnqueueOptions::default()).await?;
        broker.claim("eval", &worker).await?;

        assert_eq!(broker.drain("eval").await?, 2);
        assert!(broker.pending("eval").await?.is_empty());
        assert_eq!(broker.pending("watch").await?.len(), 1);

        let entry = broker.job(running).await?.expect("running entry survives");
        assert_eq!(entry.status, JobStatus::Running);
        broker.finish(running, JobOutcome::Finished(None)).await?;
        assert_eq!(broker.drain("unknown").await?, 0);
        Ok::<(), Box<dyn Error>>(())
    })
    .await
}

#[tokio::test]
async fn shutdown_requests_reach_live_workers_only() -> TestResult {
    both(|broker| async move {
        let live = WorkerId::from("evaluation.1.live");
        let stale = WorkerId::from("evaluation.1.stale");
        broker.register_worker(WorkerRecord::new(live.clone(), "evaluation")).await?;
        let mut record = WorkerRecord::new(stale.clone(), "evaluation");
        record.last_heartbeat = Utc::now() - chrono::Duration::minutes(10);
        broker.register_worker(record).await?;

        assert!(!broker.heartbeat(&live, None).await?);
        broker.send_shutdown(&live).await?;
        assert!(broker.heartbeat(&live, None).await?, "flag observed on heartbeat");

        let err = broker.send_shutdown(&stale).await.unwrap_err();
        assert!(matches!(err, AssayerError::WorkerUnreachable(_)));
        let err = broker
            .send_shutdown(&WorkerId::from("nobody"))
            .await
            .unwrap_err();
        assert!(matches!(err, AssayerError::WorkerUnreachable(_)));

        // The stale record was dropped; the live one is still listed.
        let ids: Vec<WorkerId> = broker.list_workers().await?.into_iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![live.clone()]);

        broker.unregister_worker(&live).await?;
        assert!(broker.list_workers().await?.is_empty());
        assert!(broker.heartbeat(&live, None).await?, "unknown workers are told to stop");
        Ok::<(), Box<dyn Error>>(())
    })
    .await
}

#[tokio::test]
async fn sqlite_state_is_shared_between_connections() -> TestResult {
    let dir = TempDir::new()?;
    let producer = sqlite(&dir);
    let consumer = sqlite(&dir);

    let id = producer
        .enqueue("eval", spec(1), EnqueueOptions::default())
        .await?;
    let claimed = consumer
        .claim("eval", &WorkerId::from("w1"))
        .await?
        .expect("entry visible to the second connection");
    assert_eq!(claimed.id, id);
    assert!(producer.claim("eval", &WorkerId::from("w2")).await?.is_none());

    consumer
        .finish(id, JobOutcome::Finished(Some(json!({ "ok": true }))))
        .await?;
    let entry = producer.job(id).await?.expect("result visible to producer");
    assert_eq!(entry.result, Some(json!({ "ok": true })));
    Ok(())
}

#[tokio::test]
async fn concurrent_claims_never_hand_out_an_entry_twice() -> TestResult {
    let dir = TempDir::new()?;
    let path = dir.path().join("broker.db");
    let setup = SqliteBroker::open(&path)?;
    for n in 0..40 {
        setup.enqueue("eval", spec(n), EnqueueOptions::default()).await?;
    }

    let mut handles = Vec::new();
    for w in 0..4 {
        let broker = SqliteBroker::open(&path)?;
        handles.push(tokio::spawn(async move {
            let worker = WorkerId::from(format!("w{w}"));
            let mut ids = Vec::new();
            while let Some(entry) = broker.claim("eval", &worker).await.unwrap() {
                ids.push(entry.id);
            }
            ids
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await?);
    }
    let total = all.len();
    all.sort_by_key(|id| id.to_string());
    all.dedup();
    assert_eq!(total, 40);
    assert_eq!(all.len(), 40);
    Ok(())
}
