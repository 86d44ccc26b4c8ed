use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use colored::*;
use serde::Serialize;
use simulation_service::{
    CallAction, DbPhase, ObservedEvent, Phase, RecordingObserver, RequestType, SimTime,
    Simulation, SimulationConfig, SimulationMetrics, SimulationSpeed, StopReason,
    DEFAULT_DB_POOL_SIZE,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sim-cli")]
#[command(about = "Run the event loop vs thread pool simulation without a UI")]
#[command(version = "0.1.0")]
struct Cli {
    /// TOML configuration file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of worker processes (1-8)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Threads per worker pool (1-16)
    #[arg(short, long)]
    pool_size: Option<usize>,

    /// Simulation speed (1-10)
    #[arg(short, long)]
    speed: Option<u8>,

    /// Async requests in the initial batch (0-50)
    #[arg(long = "async")]
    async_requests: Option<usize>,

    /// Sync requests in the initial batch (0-50)
    #[arg(long = "sync")]
    sync_requests: Option<usize>,

    /// Seed for all random draws
    #[arg(long)]
    seed: Option<u64>,

    /// Nominal DB connection pool size shown per worker; without a value uses the default of 8
    #[arg(long, num_args = 0..=1)]
    db_capacity: Option<Option<usize>>,

    /// Add a request during the run, e.g. `async@1500` or `sync@200` (repeatable)
    #[arg(long, value_parser = parse_injection)]
    inject: Vec<Injection>,

    /// Give up after this much virtual time
    #[arg(long, default_value = "600000")]
    max_time_ms: u64,

    /// Pace virtual time against the wall clock
    #[arg(long)]
    realtime: bool,

    /// Print every observed event
    #[arg(long)]
    trace: bool,

    /// Print the final metrics as JSON
    #[arg(long)]
    json: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    dump_config: bool,
}

/// A request added at a fixed virtual time
#[derive(Debug, Clone, Copy)]
struct Injection {
    kind: RequestType,
    at: SimTime,
}

fn parse_injection(raw: &str) -> Result<Injection, String> {
    let (kind, at) = raw.split_once('@').ok_or_else(|| format!("expected <type>@<ms>, got '{raw}'"))?;
    let kind = match kind.trim().to_ascii_lowercase().as_str() {
        "async" => RequestType::Async,
        "sync" => RequestType::Sync,
        other => return Err(format!("unknown request type '{other}'")),
    };
    let at = at.trim().parse::<u64>().map_err(|e| format!("invalid time '{at}': {e}"))?;
    Ok(Injection { kind, at: SimTime::from_millis(at) })
}

impl Cli {
    fn build_config(&self) -> anyhow::Result<SimulationConfig> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => SimulationConfig::default(),
        };

        if let Some(workers) = self.workers {
            config.num_workers = workers;
        }
        if let Some(pool_size) = self.pool_size {
            config.thread_pool_size = pool_size;
        }
        if let Some(speed) = self.speed {
            config.simulation_speed = SimulationSpeed::new(speed);
        }
        if let Some(count) = self.async_requests {
            config.async_requests = count;
        }
        if let Some(count) = self.sync_requests {
            config.sync_requests = count;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(capacity) = self.db_capacity {
            config.external_call_capacity = Some(capacity.unwrap_or(DEFAULT_DB_POOL_SIZE));
        }
        Ok(config.clamped())
    }
}

#[derive(Serialize)]
struct Report<'a> {
    seed: u64,
    stopped_by: Option<StopReason>,
    metrics: &'a SimulationMetrics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = cli.build_config()?;

    if cli.dump_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }
    if config.batch_size() == 0 && cli.inject.is_empty() {
        bail!("nothing to simulate: pass --async, --sync or --inject");
    }

    let mut injections: Vec<Injection> = cli.inject.clone();
    injections.sort_by_key(|injection| injection.at);
    let mut injections = VecDeque::from(injections);

    let mut sim = Simulation::new(config, RecordingObserver::new());
    info!(seed = sim.seed(), "Starting simulation");
    sim.start()?;

    let limit = SimTime::from_millis(cli.max_time_ms);
    let wall_start = tokio::time::Instant::now();

    while sim.is_running() {
        let next_event = sim.next_event_time();
        let next_injection = injections.front().map(|injection| injection.at);
        let inject_first = match (next_injection, next_event) {
            (Some(at), Some(next)) => at <= next,
            (Some(_), None) => true,
            (None, _) => false,
        };
        let target = if inject_first { next_injection } else { next_event };
        let Some(target) = target.filter(|at| *at <= limit) else {
            break;
        };

        if cli.realtime {
            tokio::time::sleep_until(wall_start + Duration::from_millis(target.as_millis())).await;
        }

        if inject_first {
            sim.advance_to(target)?;
            if let Some(injection) = injections.pop_front() {
                sim.add_request(injection.kind);
            }
        } else {
            sim.step();
        }

        let events = sim.observer_mut().take();
        if cli.trace {
            events.iter().for_each(print_event);
        }
    }

    if sim.is_running() {
        info!(limit = %limit, "Time limit reached, stopping");
        sim.stop()?;
    }
    let stopped_by = sim.observer().stop_reason();
    let events = sim.observer_mut().take();
    if cli.trace {
        events.iter().for_each(print_event);
    }

    let metrics = sim.metrics();
    if cli.json {
        let report = Report { seed: sim.seed(), stopped_by, metrics: &metrics };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(sim.config(), sim.seed(), stopped_by, &metrics);
    }
    Ok(())
}

fn print_event(event: &ObservedEvent) {
    let at = format!("[{:>8}]", event.at().to_string()).dimmed();
    let line = match event {
        ObservedEvent::Submitted { id, kind, worker, .. } => {
            format!("#{id} {} submitted to worker {worker}", kind_label(*kind))
        }
        ObservedEvent::PhaseChange { id, phase, .. } => match phase {
            Phase::EventLoop => format!("#{id} -> {}", "event loop".cyan()),
            Phase::ThreadPool => format!("#{id} -> {}", "thread pool".magenta()),
            Phase::Queued => format!("#{id} queued"),
        },
        ObservedEvent::TaskProgress { worker, id, db_phase, slot, .. } => {
            let place = match slot {
                Some(slot) => format!("thread {slot}"),
                None => "event loop".to_string(),
            };
            let phase = match db_phase {
                DbPhase::PreAwait => "pre-await",
                DbPhase::DbOperation => "db operation",
                DbPhase::PostAwait => "post-await",
            };
            format!("#{id} {phase} on worker {worker} {place}")
        }
        ObservedEvent::ExternalCall { id, action, .. } => match action {
            CallAction::Add => format!("#{id} {}", "db call started".yellow()),
            CallAction::Remove => format!("#{id} {}", "db call returned".yellow()),
        },
        ObservedEvent::Completed { id, kind, .. } => {
            format!("#{id} {} {}", kind_label(*kind), "completed".green().bold())
        }
        ObservedEvent::Stopped { reason, .. } => format!("{} ({reason:?})", "stopped".red().bold()),
    };
    println!("{at} {line}");
}

fn kind_label(kind: RequestType) -> ColoredString {
    match kind {
        RequestType::Async => "async".cyan(),
        RequestType::Sync => "sync".magenta(),
    }
}

fn print_summary(
    config: &SimulationConfig,
    seed: u64,
    stopped_by: Option<StopReason>,
    metrics: &SimulationMetrics,
) {
    println!("{}", "Simulation summary".bold().underline());
    println!(
        "  workers {}  threads/worker {}  speed {}  seed {}",
        config.num_workers,
        config.thread_pool_size,
        config.simulation_speed.get(),
        seed
    );
    match stopped_by {
        Some(reason) => println!("  stopped: {reason:?} after {}ms", metrics.elapsed_ms),
        None => println!("  still running at {}ms", metrics.elapsed_ms),
    }
    println!();
    println!(
        "  {:<6} {:>9} {:>9} {:>8} {:>8} {:>8} {:>8}",
        "type", "submitted", "completed", "avg ms", "p95 ms", "p99 ms", "max ms"
    );
    for (label, submitted, completed, latency) in [
        ("async", metrics.submitted_async, metrics.completed_async, &metrics.async_latency),
        ("sync", metrics.submitted_sync, metrics.completed_sync, &metrics.sync_latency),
    ] {
        println!(
            "  {:<6} {:>9} {:>9} {:>8} {:>8} {:>8} {:>8}",
            label, submitted, completed, latency.avg_ms, latency.p95_ms, latency.p99_ms, latency.max_ms
        );
    }
    println!();
    println!("  peak busy threads      {}", metrics.peak_busy_threads);
    println!("  peak event loop queue  {}", metrics.peak_event_loop_queue);
    println!("  peak thread pool queue {}", metrics.peak_thread_pool_queue);
    println!("  peak db calls          {}", metrics.peak_external_calls);
    println!("  throughput             {:.2} req/s", metrics.throughput_per_sec);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_injection() {
        let injection = parse_injection("async@1500").unwrap();
        assert_eq!(injection.kind, RequestType::Async);
        assert_eq!(injection.at, SimTime::from_millis(1500));

        let injection = parse_injection(" SYNC @ 20").unwrap();
        assert_eq!(injection.kind, RequestType::Sync);
        assert_eq!(injection.at, SimTime::from_millis(20));

        assert!(parse_injection("async").is_err());
        assert!(parse_injection("batch@10").is_err());
        assert!(parse_injection("sync@soon").is_err());
    }

    #[test]
    fn test_flags_override_and_clamp() {
        let cli = Cli::parse_from(["sim-cli", "--workers", "12", "--speed", "9", "--async", "4"]);
        let config = cli.build_config().unwrap();
        assert_eq!(config.num_workers, 8);
        assert_eq!(config.simulation_speed.get(), 9);
        assert_eq!(config.async_requests, 4);
        assert_eq!(config.sync_requests, 0);
    }

    #[test]
    fn test_db_capacity_flag() {
        let config = Cli::parse_from(["sim-cli", "--db-capacity"]).build_config().unwrap();
        assert_eq!(config.external_call_capacity, Some(DEFAULT_DB_POOL_SIZE));

        let config = Cli::parse_from(["sim-cli", "--db-capacity", "3"]).build_config().unwrap();
        assert_eq!(config.external_call_capacity, Some(3));

        let config = Cli::parse_from(["sim-cli"]).build_config().unwrap();
        assert_eq!(config.external_call_capacity, None);
    }

    #[test]
    fn test_repeated_injections() {
        let cli = Cli::parse_from(["sim-cli", "--inject", "async@10", "--inject", "sync@5"]);
        assert_eq!(cli.inject.len(), 2);
    }
}
