//! timedtask-demo: push a batch of deferred tasks and watch the scheduler run them.
//!
//! # Usage
//!
//! ```bash
//! # Adaptive scheduler over wall-clock time, ten tasks one second apart
//! timedtask-demo --tasks 10 --run-secs 12
//!
//! # Polling scheduler over game ticks (10ms per tick)
//! timedtask-demo --domain tick --strategy polling --interval-ms 50
//!
//! # From a TOML file
//! timedtask-demo --config scheduler.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use timedtask::{Clock, Scheduler, SchedulerConfig, Task, TickClock, WakeupStrategy, WallClock};

/// Length of one game tick in the tick domain.
const TICK_LENGTH: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Domain {
    Wall,
    Tick,
}

/// Demo driver for the deferred-task scheduler.
#[derive(Parser, Debug)]
#[command(name = "timedtask-demo", version, about)]
struct Cli {
    /// TOML config file (falls back to TIMEDTASK_* environment variables).
    #[arg(long, env = "TIMEDTASK_CONFIG")]
    config: Option<PathBuf>,

    /// Wakeup strategy: "adaptive", "polling" or "polling:<ms>".
    #[arg(long)]
    strategy: Option<String>,

    /// Polling interval in milliseconds (polling strategy only).
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Number of tasks to push, due one second apart.
    #[arg(long, default_value_t = 5)]
    tasks: u32,

    /// Seconds to run before shutting down.
    #[arg(long, default_value_t = 8)]
    run_secs: u64,

    /// Due-key domain.
    #[arg(long, value_enum, default_value_t = Domain::Wall)]
    domain: Domain,
}

impl Cli {
    fn scheduler_config(&self) -> anyhow::Result<SchedulerConfig> {
        let mut config = match &self.config {
            Some(path) => SchedulerConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => {
                timedtask_core::config::load_dotenv();
                SchedulerConfig::from_env()
            }
        };
        if let Some(raw) = &self.strategy {
            config.strategy = raw.parse::<WakeupStrategy>()?;
        }
        if let (WakeupStrategy::Polling { .. }, Some(ms)) = (config.strategy, self.interval_ms) {
            config.strategy = WakeupStrategy::polling(Duration::from_millis(ms));
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(?cli, "starting timedtask-demo");

    let config = cli.scheduler_config()?;
    config.log_summary();

    match cli.domain {
        Domain::Wall => run_demo(Scheduler::new(config, WallClock), &cli).await,
        Domain::Tick => {
            let clock = TickClock::monotonic(TICK_LENGTH);
            run_demo(Scheduler::new(config, clock), &cli).await
        }
    }
}

async fn run_demo<C: Clock>(scheduler: Scheduler<C>, cli: &Cli) -> anyhow::Result<()> {
    let scheduler = Arc::new(scheduler);

    for i in 0..cli.tasks {
        let due = scheduler.clock().deadline_in(Duration::from_secs(u64::from(i) + 1));
        let name = if i % 4 == 3 { "flaky" } else { "greet" };
        scheduler.push(Task::new(name, due, json!({ "seq": i }), |task| {
            let seq = task.argument()["seq"].as_u64().unwrap_or_default();
            if task.name() == "flaky" {
                anyhow::bail!("task {seq} refused to run");
            }
            tracing::info!(seq, due = %task.due(), "hello from task");
            Ok(())
        }));
    }
    tracing::info!(queue = %scheduler, "tasks pushed");

    let cancel = CancellationToken::new();
    let runner = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(cli.run_secs)) => {},
        _ = shutdown_signal() => tracing::info!("shutdown signal received"),
    }

    cancel.cancel();
    runner.await.context("scheduler loop panicked")?;
    scheduler.drain().await;

    println!("{}", scheduler.task_stats());
    println!("{}", serde_json::to_string_pretty(&scheduler.snapshot())?);
    tracing::info!(queue = %scheduler, "timedtask-demo exited cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
