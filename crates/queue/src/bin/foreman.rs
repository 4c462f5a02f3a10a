//! foreman: run a fleet of shell jobs through the build queue.
//!
//! `foreman run` loads the fleet, restores any persisted queue, schedules
//! every job once, and runs until Ctrl-C (or `--for` seconds). On exit the
//! remaining queue is saved for the next start.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use foreman_core::{load_dotenv, Config};
use foreman_queue::{Coordinator, FleetConfig, ShellTask, Task};

// ── CLI ─────────────────────────────────────────────────────────────

/// Build queue and executor scheduler for shell jobs.
#[derive(Parser, Debug)]
#[command(name = "foreman", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start executors and run the configured jobs.
    Run {
        /// Path to the fleet description.
        #[arg(long, env = "FOREMAN_FLEET", default_value = "config/fleet.toml")]
        fleet: PathBuf,

        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long = "for")]
        run_for: Option<u64>,

        /// Interval between queue status lines, in seconds.
        #[arg(long, env = "FOREMAN_STATUS_INTERVAL", default_value_t = 30)]
        status_interval: u64,
    },
    /// Validate the fleet description and print a summary.
    Check {
        #[arg(long, env = "FOREMAN_FLEET", default_value = "config/fleet.toml")]
        fleet: PathBuf,
    },
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env();
    config.validate()?;

    match cli.command {
        Command::Check { fleet } => check(&fleet),
        Command::Run {
            fleet,
            run_for,
            status_interval,
        } => run(config, &fleet, run_for, status_interval).await,
    }
}

fn check(path: &Path) -> anyhow::Result<()> {
    let fleet = FleetConfig::from_file(path)
        .with_context(|| format!("loading fleet from {}", path.display()))?;
    let executors: usize = fleet.nodes.iter().map(|n| n.executors).sum();
    info!(
        path = %path.display(),
        nodes = fleet.nodes.len(),
        executors,
        jobs = fleet.jobs.len(),
        "fleet is valid"
    );
    Ok(())
}

async fn run(
    config: Config,
    path: &Path,
    run_for: Option<u64>,
    status_interval: u64,
) -> anyhow::Result<()> {
    config.log_summary();
    let fleet = FleetConfig::from_file(path)
        .with_context(|| format!("loading fleet from {}", path.display()))?;

    let tasks: HashMap<String, Arc<ShellTask>> = fleet
        .jobs
        .iter()
        .map(|job| (job.name.clone(), Arc::new(ShellTask::from_config(job, &fleet))))
        .collect();

    let mut coordinator = Coordinator::new(config)?;
    for node in fleet.nodes() {
        coordinator.add_node(node);
    }

    let restored = coordinator.restore(|name| {
        tasks
            .get(name)
            .map(|task| Arc::clone(task) as Arc<dyn Task>)
    });
    let default_quiet = coordinator.config().scheduler.default_quiet_period();
    for task in tasks.values() {
        let quiet = task.quiet_period().unwrap_or(default_quiet);
        coordinator
            .queue()
            .add(Arc::clone(task) as Arc<dyn Task>, quiet);
    }
    coordinator.start()?;
    info!(jobs = tasks.len(), restored, "foreman running");

    let queue = Arc::clone(coordinator.queue());
    let deadline = async {
        match run_for {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let mut status = tokio::time::interval(Duration::from_secs(status_interval.max(1)));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            _ = &mut deadline => {
                info!("run time elapsed");
                break;
            }
            _ = status.tick() => {
                let snapshot = queue.snapshot();
                info!(
                    waiting = snapshot.waiting,
                    blocked = snapshot.blocked,
                    buildable = snapshot.buildable,
                    parked = snapshot.parked,
                    "queue status"
                );
                for item in queue.items().iter().filter(|i| i.stuck) {
                    warn!(task = %item.task_name, why = %item.why, "task looks stuck");
                }
            }
        }
    }

    // Joining executor threads blocks; keep it off the runtime's workers.
    tokio::task::spawn_blocking(move || coordinator.shutdown()).await?;

    let metrics = queue.metrics();
    info!(
        dispatched = metrics.total_dispatched,
        avg_wait_ms = metrics.avg_queue_wait.as_millis() as u64,
        "foreman exited cleanly"
    );
    Ok(())
}
