// src/lib.rs

pub mod broker;
pub mod cli;
pub mod config;
pub mod errors;
pub mod eval;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod types;
pub mod watch;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::broker::{Broker, JobStatus, SharedBroker, SqliteBroker};
use crate::cli::{CliArgs, Command, LogLevel, ShutdownArgs, StatusArgs, WatchArgs, WorkerArgs};
use crate::config::{Settings, load_and_validate, load_optional, validate_queue_names, worker_settings};
use crate::errors::AssayerError;
use crate::eval::EvaluatorRegistry;
use crate::exec::{
    DefaultJobRunner, JobRunner, ShutdownController, ShutdownTrigger, WorkerContext,
    WorkerLauncher, WorkerPool,
};
use crate::fs::{FileSystem, RealFileSystem};
use crate::types::JobId;
use crate::watch::{ChainOptions, InlineChain, InlineHold, QueueChain, run_inline, start_chain};

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let config = args.config.as_deref();
    match &args.command {
        Command::Watch(watch) => run_watch(config, args.log_level, watch).await,
        Command::Worker(worker) => run_worker(config, worker).await,
        Command::Shutdown(shutdown) => run_shutdown(config, shutdown).await,
        Command::Status(status) => run_status(config, status).await,
    }
}

/// `assayer watch`: seed a chain, then run or launch the workers.
///
/// - default: launch `assayer worker` processes and return;
/// - `--foreground`: host both pools here until Ctrl-C or `assayer shutdown`;
/// - `--inline`: tick the chain here and host only the eval pool.
async fn run_watch(config: Option<&Path>, log_level: Option<LogLevel>, args: &WatchArgs) -> Result<()> {
    let settings = load_and_validate(config, args.overrides())?;

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let registry = Arc::new(EvaluatorRegistry::with_builtins(fs.clone()));
    // Fail fast on a bad reference; workers still resolve it for every job.
    registry.resolve(&settings.watch.evaluator)?;

    let broker = open_broker(&settings.broker_path)?;
    let ctx = WorkerContext::new(broker.clone(), fs, registry);
    let options = ChainOptions {
        eval_existing: settings.eval_existing,
        force: args.force,
    };

    if args.inline {
        return run_watch_inline(ctx, settings, options).await;
    }

    let chain = QueueChain::new(broker.clone(), settings.watch.watch_queue.clone());
    let start = start_chain(&ctx.watch_context(), settings.watch.clone(), options, &chain).await?;
    println!(
        "watching {} (stream {}, {} existing artifacts dispatched)",
        settings.watch.directory,
        start.payload.stream(),
        start.seeded.len()
    );

    if args.foreground {
        return run_pools_foreground(ctx, &settings).await;
    }

    let launcher = WorkerLauncher::current_exe(&settings.broker_path)?
        .with_config(config.map(Path::to_path_buf))
        .with_log_level(log_level);
    for (queue, count) in [
        (&settings.watch.watch_queue, settings.watch_workers),
        (&settings.watch.eval_queue, settings.eval_workers),
    ] {
        let processes = launcher.launch(queue, count)?;
        println!("started {} worker(s) on {}: {:?}", count, processes.queue(), processes.pids());
    }
    println!(
        "broker: {} (stop with `assayer shutdown`)",
        launcher.broker_path().display()
    );
    Ok(())
}

async fn run_watch_inline(ctx: WorkerContext, settings: Settings, options: ChainOptions) -> Result<()> {
    let (trigger, stop) = ShutdownTrigger::new();
    let trigger = Arc::new(trigger);
    spawn_ctrl_c(trigger.clone());

    let runner: Arc<dyn JobRunner> = Arc::new(DefaultJobRunner::new(ctx.clone()));
    let eval_pool = WorkerPool::spawn(
        settings.watch.eval_queue.clone(),
        settings.eval_workers,
        ctx.broker.clone(),
        runner,
        settings.worker,
        stop.clone(),
    );

    let watch_ctx = ctx.watch_context();
    let start = start_chain(&watch_ctx, settings.watch.clone(), options, &InlineChain::new()).await?;
    let hold = InlineHold::acquire(
        ctx.broker.clone(),
        &settings.watch,
        settings.worker.heartbeat_interval,
        trigger.clone(),
    )
    .await?;

    // Whichever side ends first takes the other one down with it: a broken
    // chain stops the eval pool, and a broker-side shutdown of the eval
    // workers stops the chain. The hold also relays shutdown requests.
    let chain_side = async {
        let result = run_inline(&watch_ctx, start.payload, &stop, None).await;
        trigger.trigger();
        result
    };
    let pool_side = async {
        let result = eval_pool.join().await;
        trigger.trigger();
        result
    };
    let (reports, summaries) = tokio::join!(chain_side, pool_side);
    if let Err(e) = hold.release().await {
        warn!(error = %e, "failed to drop inline chain registration");
    }

    let summaries = summaries?;
    info!(workers = summaries.len(), "eval pool stopped");
    let reports = reports?;
    info!(ticks = reports.len(), "inline watch chain stopped");
    Ok(())
}

async fn run_pools_foreground(ctx: WorkerContext, settings: &Settings) -> Result<()> {
    let (trigger, stop) = ShutdownTrigger::new();
    spawn_ctrl_c(Arc::new(trigger));

    let runner: Arc<dyn JobRunner> = Arc::new(DefaultJobRunner::new(ctx.clone()));
    let watch_pool = WorkerPool::spawn(
        settings.watch.watch_queue.clone(),
        settings.watch_workers,
        ctx.broker.clone(),
        runner.clone(),
        settings.worker,
        stop.clone(),
    );
    let eval_pool = WorkerPool::spawn(
        settings.watch.eval_queue.clone(),
        settings.eval_workers,
        ctx.broker.clone(),
        runner,
        settings.worker,
        stop,
    );

    let (watch, eval) = tokio::join!(watch_pool.join(), eval_pool.join());
    for summary in watch?.into_iter().chain(eval?) {
        info!(
            worker = %summary.id,
            queue = %summary.queue,
            processed = summary.processed,
            failed = summary.failed,
            "worker summary"
        );
    }
    Ok(())
}

/// `assayer worker`: one pool on one queue, until shut down.
async fn run_worker(config: Option<&Path>, args: &WorkerArgs) -> Result<()> {
    if args.concurrency == 0 {
        return Err(AssayerError::ConfigError("--concurrency must be >= 1".to_string()).into());
    }
    let raw = load_optional(config)?;
    let settings = worker_settings(&raw)?;
    let broker_path = args.broker.clone().unwrap_or_else(|| raw.broker_path());

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let registry = Arc::new(EvaluatorRegistry::with_builtins(fs.clone()));
    let broker = open_broker(&broker_path)?;
    let ctx = WorkerContext::new(broker.clone(), fs, registry);

    let (trigger, stop) = ShutdownTrigger::new();
    spawn_ctrl_c(Arc::new(trigger));

    let runner: Arc<dyn JobRunner> = Arc::new(DefaultJobRunner::new(ctx));
    let pool = WorkerPool::spawn(args.queue.clone(), args.concurrency, broker, runner, settings, stop);
    let summaries = pool.join().await?;

    let processed: u64 = summaries.iter().map(|s| s.processed).sum();
    let failed: u64 = summaries.iter().map(|s| s.failed).sum();
    info!(queue = %args.queue, processed, failed, "worker process exiting");
    Ok(())
}

/// `assayer shutdown`: drain both queues and signal every worker.
async fn run_shutdown(config: Option<&Path>, args: &ShutdownArgs) -> Result<()> {
    let raw = load_optional(config)?.merge(args.overrides());
    let (watch_queue, eval_queue) = validate_queue_names(&raw)?;
    let broker = open_broker(&raw.broker_path())?;

    let report = ShutdownController::new(broker, [watch_queue, eval_queue])
        .shutdown_all()
        .await?;

    for (queue, removed) in &report.drained {
        println!("drained {removed} pending job(s) from {queue}");
    }
    println!("signaled {} worker(s)", report.signaled.len());
    for (worker, reason) in &report.unreachable {
        println!("unreachable: {worker} ({reason})");
    }
    if !report.unreachable.is_empty() {
        warn!(count = report.unreachable.len(), "some workers could not be signaled");
    }
    Ok(())
}

/// `assayer status [JOB_ID]`.
async fn run_status(config: Option<&Path>, args: &StatusArgs) -> Result<()> {
    let raw = load_optional(config)?;
    let broker_path = args.broker.clone().unwrap_or_else(|| raw.broker_path());
    let broker = open_broker(&broker_path)?;

    if let Some(job_id) = &args.job_id {
        let id: JobId = job_id
            .parse()
            .map_err(|e: String| AssayerError::ConfigError(e))?;
        match broker.job(id).await? {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
            None => println!("job {id} not found (never existed, or its retention expired)"),
        }
        return Ok(());
    }

    for queue in [raw.watch_queue(), raw.eval_queue()] {
        print_queue_status(broker.as_ref(), queue).await?;
    }

    let workers = broker.list_workers().await?;
    println!("workers ({}):", workers.len());
    for worker in workers {
        let job = worker
            .current_job
            .map(|id| id.to_string())
            .unwrap_or_else(|| "idle".to_string());
        println!(
            "  - {} queue={} host={} pid={} last_heartbeat={} job={}{}",
            worker.id,
            worker.queue,
            worker.host,
            worker.pid,
            worker.last_heartbeat.to_rfc3339(),
            job,
            if worker.shutdown_requested { " (stopping)" } else { "" }
        );
    }
    Ok(())
}

async fn print_queue_status(broker: &dyn Broker, queue: &str) -> Result<()> {
    let mut counts = Vec::new();
    for status in [JobStatus::Queued, JobStatus::Running, JobStatus::Failed] {
        counts.push(format!("{status}={}", broker.list(queue, status).await?.len()));
    }
    println!("queue {queue}: {}", counts.join(" "));
    Ok(())
}

fn open_broker(path: &Path) -> Result<SharedBroker> {
    let broker = SqliteBroker::open(path)
        .with_context(|| format!("opening broker at {}", path.display()))?;
    Ok(Arc::new(broker))
}

fn spawn_ctrl_c(trigger: Arc<ShutdownTrigger>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        info!("Ctrl+C received; stopping after current jobs");
        trigger.trigger();
    });
}
