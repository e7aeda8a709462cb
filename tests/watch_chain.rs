// tests/watch_chain.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use assayer::broker::{Broker, JobStatus, SharedBroker, WORKER_LOST, WorkerRecord};
use assayer::errors::AssayerError;
use assayer::eval::{EVALUATE_CALLABLE, EvaluationJob};
use assayer::exec::{ShutdownSignal, ShutdownTrigger};
use assayer::fs::mock::MockFileSystem;
use assayer::types::{KnownSet, WorkerId};
use assayer::watch::{
    ChainOptions, InlineChain, InlineHold, QueueChain, StreamId, WATCH_CALLABLE, WatchConfig,
    WatchContext, WatchPayload, inline_holder_queue, run_inline, run_tick, seed, start_chain,
};
use assayer_test_utils::builders::WatchConfigBuilder;
use assayer_test_utils::fakes::RecordingBroker;
use assayer_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

struct Harness {
    fs: MockFileSystem,
    broker: RecordingBroker,
    ctx: WatchContext,
    config: WatchConfig,
}

impl Harness {
    fn new(files: &[&str]) -> Self {
        init_tracing();
        let fs = MockFileSystem::new();
        fs.add_dir("ckpt");
        for file in files {
            fs.add_file(format!("ckpt/{file}"), "weights");
        }
        let broker = RecordingBroker::new();
        let ctx = WatchContext::new(Arc::new(broker.clone()), Arc::new(fs.clone()));
        Self {
            fs,
            broker,
            ctx,
            config: WatchConfigBuilder::new("ckpt").build(),
        }
    }

    fn chain(&self) -> QueueChain {
        QueueChain::new(Arc::new(self.broker.clone()), "watch")
    }

    fn watch_payloads(&self) -> Vec<WatchPayload> {
        self.broker
            .enqueued_on("watch")
            .iter()
            .map(|job| {
                assert_eq!(job.callable, WATCH_CALLABLE);
                WatchPayload::from_args(&job.args).unwrap()
            })
            .collect()
    }

    fn evaluated(&self) -> Vec<String> {
        let mut artifacts: Vec<String> = self
            .broker
            .enqueued_on("evaluation")
            .iter()
            .map(|job| {
                assert_eq!(job.callable, EVALUATE_CALLABLE);
                EvaluationJob::from_args(&job.args)
                    .unwrap()
                    .artifact
                    .to_string()
            })
            .collect();
        artifacts.sort();
        artifacts
    }
}

fn known(items: &[&str]) -> KnownSet {
    items.iter().copied().collect()
}

#[tokio::test]
async fn start_without_eval_existing_records_but_does_not_dispatch() -> TestResult {
    let h = Harness::new(&["a.pt", "b.pt"]);

    let start = start_chain(&h.ctx, h.config.clone(), ChainOptions::default(), &h.chain()).await?;

    assert!(start.seeded.is_empty());
    assert!(h.evaluated().is_empty());
    assert!(start.watch_job.is_some());

    let payloads = h.watch_payloads();
    assert_eq!(payloads.len(), 1);
    let (config, state) = payloads[0].clone().into_parts();
    assert_eq!(config, h.config);
    assert_eq!(state.tick, 0);
    assert_eq!(state.known, known(&["ckpt/a.pt", "ckpt/b.pt"]));
    Ok(())
}

#[tokio::test]
async fn start_with_eval_existing_dispatches_before_the_chain() -> TestResult {
    let h = Harness::new(&["a.pt", "b.pt", "notes.txt"]);
    let options = ChainOptions {
        eval_existing: true,
        force: false,
    };

    let start = start_chain(&h.ctx, h.config.clone(), options, &h.chain()).await?;

    assert_eq!(start.seeded.len(), 2);
    assert_eq!(h.evaluated(), vec!["ckpt/a.pt", "ckpt/b.pt"]);

    // Evaluation jobs go out before the first tick.
    let queues: Vec<String> = h.broker.enqueued().into_iter().map(|(q, _, _)| q).collect();
    assert_eq!(queues, vec!["evaluation", "evaluation", "watch"]);
    Ok(())
}

#[test]
fn seed_is_pure() {
    let config = WatchConfigBuilder::new("ckpt").build();
    let current = known(&["ckpt/a.pt", "ckpt/b.pt"]);

    let (state, jobs) = seed(&config, current.clone(), false);
    assert!(jobs.is_empty());
    assert_eq!(state.known, current);

    let (state, jobs) = seed(&config, current.clone(), true);
    assert_eq!(jobs.len(), 2);
    assert_eq!(state.known, current);
    assert_eq!(state.stream, config.stream_id());
}

#[tokio::test]
async fn second_chain_on_same_stream_is_refused_unless_forced() -> TestResult {
    let h = Harness::new(&["a.pt"]);
    start_chain(&h.ctx, h.config.clone(), ChainOptions::default(), &h.chain()).await?;

    let err = start_chain(&h.ctx, h.config.clone(), ChainOptions::default(), &h.chain())
        .await
        .unwrap_err();
    assert!(matches!(err, AssayerError::ChainAlreadyActive(_)));
    assert_eq!(h.broker.inner().pending("watch").await?.len(), 1);

    // A different directory is a different stream.
    h.fs.add_dir("other");
    let other = WatchConfigBuilder::new("other").build();
    start_chain(&h.ctx, other, ChainOptions::default(), &h.chain()).await?;

    let forced = ChainOptions {
        eval_existing: false,
        force: true,
    };
    start_chain(&h.ctx, h.config.clone(), forced, &h.chain()).await?;
    assert_eq!(h.broker.inner().pending("watch").await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn tick_held_by_a_live_worker_keeps_the_chain_active() -> TestResult {
    let h = Harness::new(&[]);
    start_chain(&h.ctx, h.config.clone(), ChainOptions::default(), &h.chain()).await?;
    let worker = WorkerId::from("watch.1.live");
    h.broker.register_worker(WorkerRecord::new(worker.clone(), "watch")).await?;
    h.broker.claim("watch", &worker).await?.expect("tick claimed");

    let err = start_chain(&h.ctx, h.config.clone(), ChainOptions::default(), &h.chain())
        .await
        .unwrap_err();
    assert!(matches!(err, AssayerError::ChainAlreadyActive(_)));
    assert_eq!(h.broker.list("watch", JobStatus::Running).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn tick_held_by_a_lost_worker_does_not_block_a_restart() -> TestResult {
    let h = Harness::new(&[]);
    start_chain(&h.ctx, h.config.clone(), ChainOptions::default(), &h.chain()).await?;
    let worker = WorkerId::from("watch.1.crashed");
    let mut record = WorkerRecord::new(worker.clone(), "watch");
    record.last_heartbeat = Utc::now() - chrono::Duration::minutes(10);
    h.broker.register_worker(record).await?;
    let orphan = h.broker.claim("watch", &worker).await?.expect("tick claimed");

    start_chain(&h.ctx, h.config.clone(), ChainOptions::default(), &h.chain()).await?;

    let entry = h.broker.job(orphan.id).await?.expect("failure retained");
    assert_eq!(entry.status, JobStatus::Failed);
    assert_eq!(entry.error.as_deref(), Some(WORKER_LOST));
    assert!(h.broker.list("watch", JobStatus::Running).await?.is_empty());
    assert_eq!(h.broker.pending("watch").await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn running_inline_chain_refuses_a_second_watch() -> TestResult {
    let h = Harness::new(&["a.pt"]);
    let broker: SharedBroker = Arc::new(h.broker.clone());
    start_chain(&h.ctx, h.config.clone(), ChainOptions::default(), &InlineChain::new()).await?;
    assert!(h.broker.pending("watch").await?.is_empty());

    let (trigger, stop) = ShutdownTrigger::new();
    let hold = InlineHold::acquire(
        broker.clone(),
        &h.config,
        Duration::from_millis(10),
        Arc::new(trigger),
    )
    .await?;

    let err = start_chain(&h.ctx, h.config.clone(), ChainOptions::default(), &h.chain())
        .await
        .unwrap_err();
    assert!(matches!(err, AssayerError::ChainAlreadyActive(_)));

    // `assayer shutdown` reaches the inline chain through its registration.
    broker.send_shutdown(hold.id()).await?;
    with_timeout(stop.triggered()).await;
    hold.release().await?;
    assert!(broker.list_workers().await?.is_empty());

    // A registration left behind by a crashed process lapses with its heartbeat.
    let mut ghost = WorkerRecord::new(WorkerId::from("inline.1.ghost"), inline_holder_queue(&h.config));
    ghost.last_heartbeat = Utc::now() - chrono::Duration::minutes(10);
    broker.register_worker(ghost).await?;
    start_chain(&h.ctx, h.config.clone(), ChainOptions::default(), &h.chain()).await?;
    assert_eq!(h.broker.pending("watch").await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn tick_dispatches_new_artifacts_and_enqueues_one_successor() -> TestResult {
    let h = Harness::new(&["a.pt", "b.pt"]);
    let (state, _) = seed(&h.config, known(&["ckpt/a.pt", "ckpt/b.pt"]), false);
    let payload = WatchPayload::current(h.config.clone(), state);

    h.fs.add_file("ckpt/c.pt", "weights");
    let report = run_tick(payload, &h.ctx, &h.chain(), &ShutdownSignal::never()).await?;

    assert_eq!(report.tick, 1);
    assert_eq!(report.dispatched.len(), 1);
    assert_eq!(h.evaluated(), vec!["ckpt/c.pt"]);
    assert!(report.successor.is_some());

    let enqueued = h.broker.enqueued();
    let watch: Vec<_> = enqueued.iter().filter(|(q, _, _)| q == "watch").collect();
    assert_eq!(watch.len(), 1, "exactly one successor");
    assert!(watch[0].2.result_ttl.is_zero(), "watch ticks never retain results");
    for (_, _, options) in enqueued.iter().filter(|(q, _, _)| q == "evaluation") {
        assert!(options.result_ttl.is_zero());
    }

    let (_, next) = h.watch_payloads()[0].clone().into_parts();
    assert_eq!(next.tick, 1);
    assert_eq!(next.known, known(&["ckpt/a.pt", "ckpt/b.pt", "ckpt/c.pt"]));

    // Remove b, add d.
    h.fs.remove("ckpt/b.pt");
    h.fs.add_file("ckpt/d.pt", "weights");
    let report = run_tick(
        h.watch_payloads()[0].clone(),
        &h.ctx,
        &h.chain(),
        &ShutdownSignal::never(),
    )
    .await?;
    assert_eq!(report.dispatched.len(), 1);
    assert_eq!(h.evaluated(), vec!["ckpt/c.pt", "ckpt/d.pt"]);

    let (_, next) = h.watch_payloads()[1].clone().into_parts();
    assert_eq!(next.known, known(&["ckpt/a.pt", "ckpt/c.pt", "ckpt/d.pt"]));
    Ok(())
}

#[tokio::test]
async fn failed_reschedule_breaks_the_chain_observably() -> TestResult {
    let h = Harness::new(&[]);
    let (state, _) = seed(&h.config, KnownSet::new(), false);
    h.fs.add_file("ckpt/a.pt", "weights");
    h.broker.fail_enqueue_on("watch");

    let err = run_tick(
        WatchPayload::current(h.config.clone(), state),
        &h.ctx,
        &h.chain(),
        &ShutdownSignal::never(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AssayerError::ChainBroken { .. }));
    // Dispatch happened before the reschedule failed.
    assert_eq!(h.evaluated(), vec!["ckpt/a.pt"]);
    assert!(h.watch_payloads().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_dispatch_is_retried_next_tick() -> TestResult {
    let h = Harness::new(&["a.pt"]);
    let (state, _) = seed(&h.config, known(&["ckpt/a.pt"]), false);
    h.fs.add_file("ckpt/b.pt", "weights");
    h.broker.fail_enqueue_on("evaluation");

    let report = run_tick(
        WatchPayload::current(h.config.clone(), state),
        &h.ctx,
        &h.chain(),
        &ShutdownSignal::never(),
    )
    .await?;
    assert!(report.dispatched.is_empty());
    assert_eq!(report.undispatched.len(), 1);

    let (_, next) = h.watch_payloads()[0].clone().into_parts();
    assert_eq!(next.known, known(&["ckpt/a.pt"]));

    h.broker.allow_enqueue_on("evaluation");
    run_tick(
        h.watch_payloads()[0].clone(),
        &h.ctx,
        &h.chain(),
        &ShutdownSignal::never(),
    )
    .await?;
    assert_eq!(h.evaluated(), vec!["ckpt/b.pt"]);
    Ok(())
}

#[tokio::test]
async fn scan_failure_keeps_known_and_still_reschedules() -> TestResult {
    let h = Harness::new(&["a.pt"]);
    let (state, _) = seed(&h.config, known(&["ckpt/a.pt"]), false);
    h.fs.set_unreadable("ckpt");

    let report = run_tick(
        WatchPayload::current(h.config.clone(), state),
        &h.ctx,
        &h.chain(),
        &ShutdownSignal::never(),
    )
    .await?;

    assert!(report.scan_error.is_some());
    assert!(report.successor.is_some());
    let (_, next) = h.watch_payloads()[0].clone().into_parts();
    assert_eq!(next.known, known(&["ckpt/a.pt"]));

    // Once readable again, nothing already known is re-dispatched.
    h.fs.set_readable("ckpt");
    run_tick(
        h.watch_payloads()[0].clone(),
        &h.ctx,
        &h.chain(),
        &ShutdownSignal::never(),
    )
    .await?;
    assert!(h.evaluated().is_empty());
    Ok(())
}

#[tokio::test]
async fn shutdown_during_rest_ends_the_chain() -> TestResult {
    let h = Harness::new(&[]);
    let config = WatchConfigBuilder::new("ckpt")
        .polling_interval(Duration::from_secs(60))
        .build();
    let (state, _) = seed(&config, KnownSet::new(), false);
    h.fs.add_file("ckpt/a.pt", "weights");

    let (trigger, stop) = ShutdownTrigger::new();
    let chain = h.chain();
    let tick = run_tick(WatchPayload::current(config, state), &h.ctx, &chain, &stop);
    let stopper = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
    };
    let (report, ()) = with_timeout(async { tokio::join!(tick, stopper) }).await;
    let report = report?;

    assert!(report.stopped);
    assert!(report.successor.is_none());
    // The tick's own dispatch still happened.
    assert_eq!(h.evaluated(), vec!["ckpt/a.pt"]);
    assert!(h.watch_payloads().is_empty());
    assert!(h.broker.inner().list("watch", JobStatus::Queued).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn inline_driver_runs_consecutive_ticks() -> TestResult {
    let h = Harness::new(&["a.pt"]);
    let (state, _) = seed(&h.config, known(&["ckpt/a.pt"]), false);
    h.fs.add_file("ckpt/b.pt", "weights");

    let reports = with_timeout(run_inline(
        &h.ctx,
        WatchPayload::current(h.config.clone(), state),
        &ShutdownSignal::never(),
        Some(3),
    ))
    .await?;

    assert_eq!(reports.len(), 3);
    let ticks: Vec<u64> = reports.iter().map(|r| r.tick).collect();
    assert_eq!(ticks, vec![1, 2, 3]);
    assert_eq!(reports[0].dispatched.len(), 1);
    assert!(reports[1].dispatched.is_empty());
    assert!(reports[2].dispatched.is_empty());
    assert!(reports.iter().all(|r| r.successor.is_none()));

    // Inline ticks never touch the watch queue.
    assert!(h.watch_payloads().is_empty());
    assert_eq!(h.evaluated(), vec!["ckpt/b.pt"]);
    Ok(())
}

#[test]
fn unknown_payload_version_is_rejected() {
    let config = WatchConfigBuilder::new("ckpt").build();
    let (state, _) = seed(&config, KnownSet::new(), false);
    let mut args = serde_json::to_value(WatchPayload::current(config, state)).unwrap();
    assert_eq!(args["version"], json!("1"));

    args["version"] = json!("99");
    let err = WatchPayload::from_args(&args).unwrap_err();
    assert!(matches!(err, AssayerError::InvalidPayload(_)));
}

#[test]
fn stream_id_depends_on_directory_filter_and_queue() {
    let base = StreamId::for_stream("ckpt", ".*", "watch");
    assert_eq!(base, StreamId::for_stream("ckpt", ".*", "watch"));
    assert_eq!(base.as_str().len(), 16);
    assert_ne!(base, StreamId::for_stream("ckpt2", ".*", "watch"));
    assert_ne!(base, StreamId::for_stream("ckpt", ".*pt", "watch"));
    assert_ne!(base, StreamId::for_stream("ckpt", ".*", "watch2"));
}
